//! Testing utilities for context propagation.
//!
//! This module provides:
//! - A listener recording the thread-local value seen by each hook
//! - Manually driven subscribers and publishers
//! - Registry fixtures over `thread_local!` slots

mod assertions;
mod fixtures;
mod mocks;

pub use assertions::{assert_captured, assert_not_captured, assert_same_listener};
pub use fixtures::{
    clear_local, local_value, set_local, test_registry, TRACE_ID, TRACE_ID_KEY, USER_ID,
    USER_ID_KEY,
};
pub use mocks::{RecordingListener, TestPublisher, TestSubscriber, TestSubscriberBuilder};
