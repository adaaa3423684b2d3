//! # Signal Context
//!
//! Thread-local context propagation for reactive signal listeners.
//!
//! Reactive pipelines hop threads freely, so values held in thread-locals at
//! subscription time are not visible where signals are later delivered.
//! This crate provides:
//!
//! - **Accessors**: named read/write/reset capabilities over thread-local slots
//! - **Capture**: a function snapshotting accessor values into the subscriber
//!   context, tagged with a capture marker
//! - **Restore decorator**: a listener wrapper installing the snapshot around
//!   every callback and restoring the previous values afterwards
//! - **Tap operators**: conventional and fuseable taps that decorate their
//!   listener only when the subscriber context carries the marker
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use signal_context::prelude::*;
//!
//! thread_local! {
//!     static TRACE_ID: ValueSlot = const { std::cell::RefCell::new(None) };
//! }
//!
//! AccessorRegistry::global().register_local("trace_id", &TRACE_ID);
//!
//! IterPublisher::new(vec![1, 2, 3])
//!     .tap(shared_listener(listener))
//!     .context_capture()
//!     .subscribe(Box::new(subscriber));
//! ```

#![forbid(unsafe_code)]
#![warn(
    clippy::all,
    clippy::pedantic,
    missing_docs,
    rust_2018_idioms
)]
#![allow(
    clippy::module_name_repetitions,
    clippy::must_use_candidate,
    clippy::missing_errors_doc,
    clippy::missing_panics_doc
)]

pub mod accessor;
pub mod config;
pub mod context;
pub mod errors;
pub mod observability;
pub mod signal;
pub mod stream;
pub mod testing;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::accessor::{
        AccessorRegistry, FnAccessor, LocalKeyAccessor, ThreadLocalAccessor, ValueSlot,
    };
    pub use crate::config::PropagationConfig;
    pub use crate::context::{
        context_capture, context_capture_with, Context, ContextCapture, ContextKey,
    };
    pub use crate::errors::{AccessorError, AccessorOperation, PropagationError};
    pub use crate::signal::{
        restore_listener_if_captured, shared_listener, ContextRestoreListener,
        FnListenerFactory, FusionMode, ListenerResult, SignalListener, SignalListenerFactory,
        SignalType,
    };
    pub use crate::stream::{
        ConditionalSubscriber, ContextWrite, IterPublisher, Publisher, PublisherExt,
        QueueSubscription, StreamError, Subscriber, Subscription, SubscriptionHandle, Tap,
        TapFuseable,
    };
}
