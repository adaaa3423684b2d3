//! Thread-local accessors.
//!
//! This module provides:
//! - The accessor capability trait (read, write, reset)
//! - Accessors backed by `thread_local!` slots or closures
//! - The registry, with a swappable process-wide default

mod local;
mod registry;

pub use local::{FnAccessor, LocalKeyAccessor, ThreadLocalAccessor, ValueSlot};
pub use registry::AccessorRegistry;
