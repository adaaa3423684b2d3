//! Thread-local fixtures.

use crate::accessor::{AccessorRegistry, ValueSlot};
use crate::observability::init_test_tracing;
use serde_json::Value;
use std::cell::RefCell;
use std::sync::Arc;
use std::thread::LocalKey;

/// Key of the [`TRACE_ID`] accessor in [`test_registry`].
pub const TRACE_ID_KEY: &str = "trace_id";

/// Key of the [`USER_ID`] accessor in [`test_registry`].
pub const USER_ID_KEY: &str = "user_id";

thread_local! {
    /// Trace identifier slot.
    pub static TRACE_ID: ValueSlot = const { RefCell::new(None) };

    /// User identifier slot.
    pub static USER_ID: ValueSlot = const { RefCell::new(None) };
}

/// Creates a registry holding the [`TRACE_ID`] and [`USER_ID`] accessors.
///
/// Also installs the test tracing subscriber so install and restore records
/// show up in failing test output.
#[must_use]
pub fn test_registry() -> Arc<AccessorRegistry> {
    init_test_tracing();
    let registry = AccessorRegistry::new();
    registry.register_local(TRACE_ID_KEY, &TRACE_ID);
    registry.register_local(USER_ID_KEY, &USER_ID);
    Arc::new(registry)
}

/// Returns the calling thread's value in `slot`.
pub fn local_value(slot: &'static LocalKey<ValueSlot>) -> Option<Value> {
    slot.with(|cell| cell.borrow().clone())
}

/// Sets the calling thread's value in `slot`.
pub fn set_local(slot: &'static LocalKey<ValueSlot>, value: impl Into<Value>) {
    slot.with(|cell| *cell.borrow_mut() = Some(value.into()));
}

/// Clears the calling thread's value in `slot`.
pub fn clear_local(slot: &'static LocalKey<ValueSlot>) {
    slot.with(|cell| *cell.borrow_mut() = None);
}
