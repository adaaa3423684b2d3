//! Subscriber context and context capture.
//!
//! This module provides:
//! - The immutable, copy-on-write [`Context`] carried by a subscription
//! - The capture function that snapshots registered thread-locals into it

mod capture;
mod map;

pub use capture::{context_capture, context_capture_with, ContextCapture, KeyPredicate};
pub use map::{Context, ContextKey};
