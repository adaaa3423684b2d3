//! Operator rewriting the context a subscriber exposes upstream.

use super::traits::{ConditionalSubscriber, Publisher, StreamError, Subscriber, SubscriptionHandle};
use crate::context::{Context, ContextCapture};
use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;
use tracing::trace;

/// Context transformation applied at subscription time.
pub type ContextTransform = Arc<dyn Fn(&Context) -> Context + Send + Sync>;

enum ContextOp {
    Capture(Arc<ContextCapture>),
    Transform(ContextTransform),
}

impl ContextOp {
    fn apply(&self, context: &Context) -> Context {
        match self {
            Self::Capture(capture) => capture.apply(context),
            Self::Transform(transform) => transform(context),
        }
    }
}

/// Rewrites the downstream context once per subscription and exposes the
/// result to every operator upstream of it.
///
/// Built from a [`ContextCapture`], it snapshots the subscribing thread's
/// accessor values.
pub struct ContextWrite<T> {
    source: Arc<dyn Publisher<T>>,
    op: ContextOp,
}

impl<T: Send + 'static> ContextWrite<T> {
    /// Creates an operator applying `transform` to the downstream context.
    pub fn new<F>(source: Arc<dyn Publisher<T>>, transform: F) -> Self
    where
        F: Fn(&Context) -> Context + Send + Sync + 'static,
    {
        Self {
            source,
            op: ContextOp::Transform(Arc::new(transform)),
        }
    }

    /// Creates an operator capturing thread-local values with `capture`.
    pub fn capture(source: Arc<dyn Publisher<T>>, capture: Arc<ContextCapture>) -> Self {
        Self {
            source,
            op: ContextOp::Capture(capture),
        }
    }

    /// Returns the capture function, if this operator was built from one.
    #[must_use]
    pub fn capture_function(&self) -> Option<&Arc<ContextCapture>> {
        match &self.op {
            ContextOp::Capture(capture) => Some(capture),
            ContextOp::Transform(_) => None,
        }
    }

    fn context_for<S>(&self, subscriber: &S) -> Context
    where
        S: Subscriber<T> + ?Sized,
    {
        let context = self.op.apply(&subscriber.current_context());
        trace!(entries = context.len(), "Context written for subscriber");
        context
    }
}

impl<T: Send + 'static> Publisher<T> for ContextWrite<T> {
    fn subscribe(&self, subscriber: Box<dyn Subscriber<T>>) {
        let context = self.context_for(subscriber.as_ref());
        self.source.subscribe(Box::new(ContextWriteSubscriber {
            context,
            _signal: PhantomData,
            actual: subscriber,
        }));
    }

    fn subscribe_conditional(&self, subscriber: Box<dyn ConditionalSubscriber<T>>) {
        let context = self.context_for(subscriber.as_ref());
        self.source
            .subscribe_conditional(Box::new(ContextWriteSubscriber {
                context,
                _signal: PhantomData,
                actual: subscriber,
            }));
    }
}

impl<T> fmt::Debug for ContextWrite<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let op = match &self.op {
            ContextOp::Capture(capture) => format!("{capture:?}"),
            ContextOp::Transform(_) => "transform".to_string(),
        };
        f.debug_struct("ContextWrite").field("op", &op).finish()
    }
}

/// Pass-through subscriber exposing the written context.
struct ContextWriteSubscriber<T, S: ?Sized = dyn Subscriber<T>> {
    context: Context,
    _signal: PhantomData<fn(T)>,
    actual: Box<S>,
}

impl<T, S> Subscriber<T> for ContextWriteSubscriber<T, S>
where
    T: Send,
    S: Subscriber<T> + ?Sized,
{
    fn current_context(&self) -> Context {
        self.context.clone()
    }

    fn on_subscribe(&mut self, subscription: SubscriptionHandle<T>) {
        self.actual.on_subscribe(subscription);
    }

    fn on_next(&mut self, value: T) {
        self.actual.on_next(value);
    }

    fn on_error(&mut self, error: StreamError) {
        self.actual.on_error(error);
    }

    fn on_complete(&mut self) {
        self.actual.on_complete();
    }
}

impl<T: Send> ConditionalSubscriber<T> for ContextWriteSubscriber<T, dyn ConditionalSubscriber<T>> {
    fn try_on_next(&mut self, value: T) -> bool {
        self.actual.try_on_next(value)
    }
}
