//! Signal listener trait and supporting types.

use crate::context::Context;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use tracing::warn;

/// Result of a listener callback.
pub type ListenerResult = anyhow::Result<()>;

/// Lifecycle signal kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SignalType {
    /// The subscription was established.
    OnSubscribe,
    /// Demand was requested.
    Request,
    /// The subscription was cancelled.
    Cancel,
    /// A value was emitted.
    OnNext,
    /// The sequence completed.
    OnComplete,
    /// The sequence failed.
    OnError,
}

impl fmt::Display for SignalType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::OnSubscribe => write!(f, "onSubscribe"),
            Self::Request => write!(f, "request"),
            Self::Cancel => write!(f, "cancel"),
            Self::OnNext => write!(f, "onNext"),
            Self::OnComplete => write!(f, "onComplete"),
            Self::OnError => write!(f, "onError"),
        }
    }
}

/// Fusion modes negotiated between adjacent stages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FusionMode {
    /// No fusion.
    #[default]
    None,
    /// Synchronous fusion: the consumer polls until the queue is drained.
    Sync,
    /// Asynchronous fusion: the producer signals availability, the consumer polls.
    Async,
    /// Request for either mode.
    Any,
}

impl FusionMode {
    /// Returns true for an established fused mode.
    #[must_use]
    pub fn is_fused(self) -> bool {
        matches!(self, Self::Sync | Self::Async)
    }

    /// Returns true if a request for `self` accepts `mode`.
    #[must_use]
    pub fn accepts(self, mode: Self) -> bool {
        match self {
            Self::Any => mode.is_fused(),
            requested => requested == mode && mode.is_fused(),
        }
    }
}

impl fmt::Display for FusionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::None => write!(f, "none"),
            Self::Sync => write!(f, "sync"),
            Self::Async => write!(f, "async"),
            Self::Any => write!(f, "any"),
        }
    }
}

/// Observer of every lifecycle signal of one subscription.
///
/// All callbacks have no-op defaults. Errors returned by callbacks are routed
/// by the tap operators to [`SignalListener::handle_listener_error`].
pub trait SignalListener<T>: Send + Sync {
    /// Called before the subscription is established.
    fn do_first(&self) -> ListenerResult {
        Ok(())
    }

    /// Called when the upstream subscription is received.
    fn do_on_subscription(&self) -> ListenerResult {
        Ok(())
    }

    /// Called when a fused mode is established.
    fn do_on_fusion(&self, _mode: FusionMode) -> ListenerResult {
        Ok(())
    }

    /// Called when downstream requests `n` more values.
    fn do_on_request(&self, _n: u64) -> ListenerResult {
        Ok(())
    }

    /// Called when downstream cancels.
    fn do_on_cancel(&self) -> ListenerResult {
        Ok(())
    }

    /// Called for each value.
    fn do_on_next(&self, _value: &T) -> ListenerResult {
        Ok(())
    }

    /// Called on completion, before downstream is notified.
    fn do_on_complete(&self) -> ListenerResult {
        Ok(())
    }

    /// Called on error, before downstream is notified.
    fn do_on_error(&self, _error: &anyhow::Error) -> ListenerResult {
        Ok(())
    }

    /// Called after downstream has been notified of completion.
    fn do_after_complete(&self) -> ListenerResult {
        Ok(())
    }

    /// Called after downstream has been notified of an error.
    fn do_after_error(&self, _error: &anyhow::Error) -> ListenerResult {
        Ok(())
    }

    /// Called once, after whichever terminal path fired.
    fn do_finally(&self, _terminal: SignalType) -> ListenerResult {
        Ok(())
    }

    /// Called for a value received after a terminal signal.
    fn do_on_malformed_on_next(&self, _value: &T) -> ListenerResult {
        Ok(())
    }

    /// Called for a completion received after a terminal signal.
    fn do_on_malformed_on_complete(&self) -> ListenerResult {
        Ok(())
    }

    /// Called for an error received after a terminal signal.
    fn do_on_malformed_on_error(&self, _error: &anyhow::Error) -> ListenerResult {
        Ok(())
    }

    /// Augments the context exposed upstream of the tap.
    fn add_to_context(&self, base: Context) -> Context {
        base
    }

    /// Receives errors raised by this listener's own callbacks.
    fn handle_listener_error(&self, error: &anyhow::Error) {
        warn!(error = %error, "Unhandled signal listener error");
    }
}

/// Produces one listener per subscription.
pub trait SignalListenerFactory<T>: Send + Sync {
    /// State shared by every listener created for one publisher.
    type State: Send + Sync;

    /// Initializes the per-publisher state once, when the operator is built.
    fn initialize_publisher_state(&self) -> Self::State;

    /// Creates the listener for a new subscription.
    ///
    /// `listener_context` is the downstream subscriber's context.
    fn create_listener(
        &self,
        listener_context: &Context,
        state: &Self::State,
    ) -> anyhow::Result<Arc<dyn SignalListener<T>>>;
}

/// A stateless factory backed by a closure.
pub struct FnListenerFactory<F> {
    create: F,
}

impl<F> FnListenerFactory<F> {
    /// Creates a factory from a closure.
    pub fn new(create: F) -> Self {
        Self { create }
    }
}

impl<T, F> SignalListenerFactory<T> for FnListenerFactory<F>
where
    F: Fn(&Context) -> anyhow::Result<Arc<dyn SignalListener<T>>> + Send + Sync,
{
    type State = ();

    fn initialize_publisher_state(&self) -> Self::State {}

    fn create_listener(
        &self,
        listener_context: &Context,
        _state: &Self::State,
    ) -> anyhow::Result<Arc<dyn SignalListener<T>>> {
        (self.create)(listener_context)
    }
}

/// Returns a factory handing out the same listener to every subscription.
pub fn shared_listener<T: 'static>(
    listener: Arc<dyn SignalListener<T>>,
) -> impl SignalListenerFactory<T, State = ()> {
    FnListenerFactory::new(
        move |_: &Context| -> anyhow::Result<Arc<dyn SignalListener<T>>> {
            Ok(Arc::clone(&listener))
        },
    )
}
