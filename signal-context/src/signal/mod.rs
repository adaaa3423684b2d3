//! Signal listeners and the context-restoring decorator.

mod listener;
mod restore;

pub use listener::{
    shared_listener, FnListenerFactory, FusionMode, ListenerResult, SignalListener,
    SignalListenerFactory, SignalType,
};
pub use restore::{restore_listener_if_captured, ContextRestoreListener};
