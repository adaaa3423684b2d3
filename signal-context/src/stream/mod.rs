//! Reactive-stream contracts, the context-write operator and the tap
//! operators.

mod context_write;
mod source;
mod tap;
mod tap_fuseable;
mod traits;

pub use context_write::{ContextTransform, ContextWrite};
pub use source::IterPublisher;
pub use tap::{Tap, TapConditionalSubscriber, TapSubscriber};
pub use tap_fuseable::{TapConditionalFuseableSubscriber, TapFuseable, TapFuseableSubscriber};
pub use traits::{
    error_subscriber, ConditionalSubscriber, EmptySubscription, Publisher, QueueSubscription,
    StreamError, Subscriber, Subscription, SubscriptionHandle,
};

use crate::context::{context_capture, Context};
use crate::signal::SignalListenerFactory;
use std::sync::Arc;

impl<T, P> Publisher<T> for Arc<P>
where
    T: 'static,
    P: Publisher<T> + ?Sized,
{
    fn subscribe(&self, subscriber: Box<dyn Subscriber<T>>) {
        (**self).subscribe(subscriber);
    }

    fn subscribe_conditional(&self, subscriber: Box<dyn ConditionalSubscriber<T>>) {
        (**self).subscribe_conditional(subscriber);
    }
}

/// Operator chaining for publishers.
pub trait PublisherExt<T: Send + 'static>: Publisher<T> + Sized + 'static {
    /// Erases the publisher type.
    fn shared(self) -> Arc<dyn Publisher<T>> {
        Arc::new(self)
    }

    /// Rewrites the downstream context with `transform` for everything upstream.
    fn context_write<F>(self, transform: F) -> ContextWrite<T>
    where
        F: Fn(&Context) -> Context + Send + Sync + 'static,
    {
        ContextWrite::new(self.shared(), transform)
    }

    /// Captures the subscribing thread's accessor values into the context
    /// seen upstream, using the shared capture function.
    fn context_capture(self) -> ContextWrite<T> {
        ContextWrite::capture(self.shared(), context_capture())
    }

    /// Observes signals through listeners from `factory`, without fusion.
    fn tap<F>(self, factory: F) -> Tap<T, F>
    where
        F: SignalListenerFactory<T>,
    {
        Tap::new(self.shared(), factory)
    }

    /// Observes signals through listeners from `factory`, preserving fusion.
    fn tap_fuseable<F>(self, factory: F) -> TapFuseable<T, F>
    where
        F: SignalListenerFactory<T>,
    {
        TapFuseable::new(self.shared(), factory)
    }
}

impl<T: Send + 'static, P: Publisher<T> + 'static> PublisherExt<T> for P {}
