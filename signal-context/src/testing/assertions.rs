//! Test assertions for contexts and listeners.

use crate::context::Context;
use crate::signal::SignalListener;
use serde_json::Value;
use std::sync::Arc;

/// Asserts that `context` carries the capture marker and `key` maps to `expected`.
pub fn assert_captured(context: &Context, key: &str, expected: &Value) {
    assert!(
        context.has_capture_marker(),
        "Expected a captured context, got {:?}",
        context.to_dict()
    );
    assert_eq!(
        context.get(key),
        Some(expected),
        "Expected '{}' to be captured as {}",
        key,
        expected
    );
}

/// Asserts that `context` does not carry the capture marker.
pub fn assert_not_captured(context: &Context) {
    assert!(
        !context.has_capture_marker(),
        "Expected no capture marker, got {:?}",
        context.to_dict()
    );
}

/// Asserts that two listener handles point to the same instance.
pub fn assert_same_listener<T>(
    actual: &Arc<dyn SignalListener<T>>,
    expected: &Arc<dyn SignalListener<T>>,
) {
    assert!(
        Arc::ptr_eq(actual, expected),
        "Expected the original listener to be passed through undecorated"
    );
}
