//! Fusion-aware tap operator.
//!
//! When the upstream subscription is fuseable the tap stays fuseable: values
//! drained through `poll` are reported as `do_on_next`, and a synchronous
//! queue running dry is reported as completion.

use super::tap::{TapCore, TapSource, TapSubscription};
use super::traits::{
    ConditionalSubscriber, Publisher, QueueSubscription, StreamError, Subscriber, Subscription,
    SubscriptionHandle,
};
use crate::accessor::AccessorRegistry;
use crate::config::PropagationConfig;
use crate::context::Context;
use crate::signal::{FusionMode, SignalListener, SignalListenerFactory};
use std::fmt;
use std::sync::Arc;

/// Observes a publisher's signals through listeners, preserving fusion.
pub struct TapFuseable<T, F: SignalListenerFactory<T>> {
    inner: TapSource<T, F>,
}

impl<T: Send + 'static, F: SignalListenerFactory<T>> TapFuseable<T, F> {
    /// Creates a fuseable tap over `source`.
    pub fn new(source: Arc<dyn Publisher<T>>, factory: F) -> Self {
        Self {
            inner: TapSource::new(source, factory),
        }
    }

    /// Uses `registry` instead of the global registry to restore context.
    #[must_use]
    pub fn with_registry(mut self, registry: Arc<AccessorRegistry>) -> Self {
        self.inner.set_registry(registry);
        self
    }

    /// Sets the propagation configuration.
    #[must_use]
    pub fn with_config(mut self, config: PropagationConfig) -> Self {
        self.inner.set_config(config);
        self
    }

    /// Returns the listener a subscriber exposing `context` would get.
    ///
    /// # Errors
    ///
    /// Returns the factory's error if the listener cannot be created.
    pub fn listener_for(&self, context: &Context) -> anyhow::Result<Arc<dyn SignalListener<T>>> {
        self.inner.listener_for(context)
    }
}

impl<T: Send + 'static, F: SignalListenerFactory<T>> Publisher<T> for TapFuseable<T, F> {
    fn subscribe(&self, mut subscriber: Box<dyn Subscriber<T>>) {
        let Some(listener) = self.inner.start(subscriber.as_mut()) else {
            return;
        };
        self.inner
            .source
            .subscribe(Box::new(TapFuseableSubscriber::new(subscriber, listener)));
    }

    fn subscribe_conditional(&self, mut subscriber: Box<dyn ConditionalSubscriber<T>>) {
        let Some(listener) = self.inner.start(subscriber.as_mut()) else {
            return;
        };
        self.inner
            .source
            .subscribe_conditional(Box::new(TapConditionalFuseableSubscriber::new(
                subscriber, listener,
            )));
    }
}

impl<T, F: SignalListenerFactory<T>> fmt::Debug for TapFuseable<T, F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TapFuseable")
            .field("config", &self.inner.config)
            .finish_non_exhaustive()
    }
}

/// Fuseable tap subscriber.
pub struct TapFuseableSubscriber<T, S: ?Sized = dyn Subscriber<T>> {
    core: TapCore<T>,
    actual: Box<S>,
}

/// Fuseable tap subscriber with a conditional downstream.
pub type TapConditionalFuseableSubscriber<T> =
    TapFuseableSubscriber<T, dyn ConditionalSubscriber<T>>;

impl<T, S> TapFuseableSubscriber<T, S>
where
    T: Send + 'static,
    S: Subscriber<T> + ?Sized,
{
    /// Creates a subscriber delivering to `actual` and reporting to `listener`.
    pub fn new(actual: Box<S>, listener: Arc<dyn SignalListener<T>>) -> Self {
        Self {
            core: TapCore::new(listener),
            actual,
        }
    }

    /// Returns the effective listener.
    #[must_use]
    pub fn listener(&self) -> &Arc<dyn SignalListener<T>> {
        self.core.listener()
    }

    fn async_fused(&self) -> bool {
        self.core.fusion_mode() == FusionMode::Async
    }
}

impl<T, S> Subscriber<T> for TapFuseableSubscriber<T, S>
where
    T: Send + 'static,
    S: Subscriber<T> + ?Sized,
{
    fn current_context(&self) -> Context {
        self.core.context(self.actual.as_ref())
    }

    fn on_subscribe(&mut self, upstream: SubscriptionHandle<T>) {
        self.core.subscribed();
        let handle = match upstream {
            SubscriptionHandle::Fuseable(queue) => {
                SubscriptionHandle::Fuseable(Arc::new(TapFuseableSubscription {
                    core: self.core.clone(),
                    upstream: queue,
                }))
            }
            plain @ SubscriptionHandle::Plain(_) => {
                SubscriptionHandle::Plain(Arc::new(TapSubscription::new(self.core.clone(), plain)))
            }
        };
        self.actual.on_subscribe(handle);
    }

    fn on_next(&mut self, value: T) {
        // Async fusion: the signal only announces availability, values are
        // reported when polled.
        if self.async_fused() {
            self.actual.on_next(value);
            return;
        }
        self.core.next(self.actual.as_mut(), value);
    }

    fn on_error(&mut self, error: StreamError) {
        self.core.error(self.actual.as_mut(), error);
    }

    fn on_complete(&mut self) {
        self.core.complete(self.actual.as_mut());
    }
}

impl<T: Send + 'static> ConditionalSubscriber<T> for TapConditionalFuseableSubscriber<T> {
    fn try_on_next(&mut self, value: T) -> bool {
        if self.async_fused() {
            return self.actual.try_on_next(value);
        }
        self.core.try_next(self.actual.as_mut(), value)
    }
}

/// Queue view of a fuseable tap.
struct TapFuseableSubscription<T> {
    core: TapCore<T>,
    upstream: Arc<dyn QueueSubscription<T>>,
}

impl<T> Subscription for TapFuseableSubscription<T> {
    fn request(&self, n: u64) {
        self.core.request(self.upstream.as_ref(), n);
    }

    fn cancel(&self) {
        self.core.cancel(self.upstream.as_ref());
    }
}

impl<T> QueueSubscription<T> for TapFuseableSubscription<T> {
    fn request_fusion(&self, requested: FusionMode) -> FusionMode {
        let mode = self.upstream.request_fusion(requested);
        if mode.is_fused() {
            self.core.set_fusion_mode(mode);
            self.core.guard(self.core.listener().do_on_fusion(mode));
        }
        mode
    }

    fn poll(&self) -> anyhow::Result<Option<T>> {
        match self.upstream.poll() {
            Ok(Some(value)) => {
                self.core.guard(self.core.listener().do_on_next(&value));
                Ok(Some(value))
            }
            Ok(None) => {
                if self.core.fusion_mode() == FusionMode::Sync {
                    self.core.complete_fused();
                }
                Ok(None)
            }
            Err(e) => {
                self.core.error_fused(&e);
                Err(e)
            }
        }
    }

    fn is_empty(&self) -> bool {
        self.upstream.is_empty()
    }

    fn clear(&self) {
        self.upstream.clear();
    }
}
