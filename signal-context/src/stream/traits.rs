//! Publisher, subscriber and subscription contracts.
//!
//! These are the minimal reactive-stream interfaces the tap operators plug
//! into. Request accounting and scheduling belong to the implementations.

use crate::context::Context;
use crate::signal::FusionMode;
use std::sync::Arc;

/// Error type carried by `on_error`.
///
/// Shared so listeners can observe the same error before and after the
/// downstream subscriber consumes it.
pub type StreamError = Arc<anyhow::Error>;

/// Demand and cancellation handle given to a subscriber.
pub trait Subscription: Send + Sync {
    /// Requests `n` more values.
    fn request(&self, n: u64);

    /// Cancels the subscription.
    fn cancel(&self);
}

/// A subscription that can also be drained as a queue.
pub trait QueueSubscription<T>: Subscription {
    /// Negotiates a fusion mode. Returns [`FusionMode::None`] when refused.
    fn request_fusion(&self, requested: FusionMode) -> FusionMode;

    /// Takes the next value. `Ok(None)` means the queue is empty, or, in
    /// synchronous mode, that the source is exhausted.
    fn poll(&self) -> anyhow::Result<Option<T>>;

    /// Returns true if no value is immediately available.
    fn is_empty(&self) -> bool;

    /// Drops any queued values.
    fn clear(&self);
}

/// The subscription handed to `on_subscribe`.
pub enum SubscriptionHandle<T> {
    /// A conventional subscription.
    Plain(Arc<dyn Subscription>),
    /// A subscription that supports fusion.
    Fuseable(Arc<dyn QueueSubscription<T>>),
}

impl<T> Subscription for SubscriptionHandle<T> {
    fn request(&self, n: u64) {
        match self {
            Self::Plain(s) => s.request(n),
            Self::Fuseable(s) => s.request(n),
        }
    }

    fn cancel(&self) {
        match self {
            Self::Plain(s) => s.cancel(),
            Self::Fuseable(s) => s.cancel(),
        }
    }
}

impl<T> SubscriptionHandle<T> {
    /// Returns the queue view for fuseable subscriptions.
    #[must_use]
    pub fn as_fuseable(&self) -> Option<&Arc<dyn QueueSubscription<T>>> {
        match self {
            Self::Plain(_) => None,
            Self::Fuseable(s) => Some(s),
        }
    }
}

impl<T> Clone for SubscriptionHandle<T> {
    fn clone(&self) -> Self {
        match self {
            Self::Plain(s) => Self::Plain(Arc::clone(s)),
            Self::Fuseable(s) => Self::Fuseable(Arc::clone(s)),
        }
    }
}

/// Receiver of lifecycle signals.
pub trait Subscriber<T>: Send {
    /// Returns the context this subscriber exposes upstream.
    fn current_context(&self) -> Context {
        Context::empty()
    }

    /// Receives the subscription. Called exactly once, first.
    fn on_subscribe(&mut self, subscription: SubscriptionHandle<T>);

    /// Receives a value.
    fn on_next(&mut self, value: T);

    /// Receives a terminal error.
    fn on_error(&mut self, error: StreamError);

    /// Receives completion.
    fn on_complete(&mut self);
}

/// A subscriber able to reject values without consuming demand.
pub trait ConditionalSubscriber<T>: Subscriber<T> {
    /// Offers a value. Returns false if it was dropped.
    fn try_on_next(&mut self, value: T) -> bool;
}

/// Source of values for subscribers.
pub trait Publisher<T>: Send + Sync {
    /// Subscribes a conventional subscriber.
    fn subscribe(&self, subscriber: Box<dyn Subscriber<T>>);

    /// Subscribes a conditional subscriber.
    ///
    /// Publishers without a conditional fast path treat it as a plain one.
    fn subscribe_conditional(&self, subscriber: Box<dyn ConditionalSubscriber<T>>)
    where
        T: 'static,
    {
        self.subscribe(Box::new(ConditionalAsPlain(subscriber)));
    }
}

/// Views a conditional subscriber through the plain interface.
pub(crate) struct ConditionalAsPlain<T>(pub(crate) Box<dyn ConditionalSubscriber<T>>);

impl<T> Subscriber<T> for ConditionalAsPlain<T> {
    fn current_context(&self) -> Context {
        self.0.current_context()
    }

    fn on_subscribe(&mut self, subscription: SubscriptionHandle<T>) {
        self.0.on_subscribe(subscription);
    }

    fn on_next(&mut self, value: T) {
        self.0.on_next(value);
    }

    fn on_error(&mut self, error: StreamError) {
        self.0.on_error(error);
    }

    fn on_complete(&mut self) {
        self.0.on_complete();
    }
}

/// A subscription that ignores every request.
#[derive(Debug, Clone, Copy, Default)]
pub struct EmptySubscription;

impl Subscription for EmptySubscription {
    fn request(&self, _n: u64) {}

    fn cancel(&self) {}
}

/// Fails a subscriber before any subscription exists.
pub fn error_subscriber<T, S>(subscriber: &mut S, error: StreamError)
where
    S: Subscriber<T> + ?Sized,
{
    subscriber.on_subscribe(SubscriptionHandle::Plain(Arc::new(EmptySubscription)));
    subscriber.on_error(error);
}
