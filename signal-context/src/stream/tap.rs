//! Tap operator: observes every signal of a subscription through a listener.

use super::traits::{
    error_subscriber, ConditionalSubscriber, Publisher, StreamError, Subscriber, Subscription,
    SubscriptionHandle,
};
use crate::accessor::AccessorRegistry;
use crate::config::PropagationConfig;
use crate::context::Context;
use crate::errors::PropagationError;
use crate::signal::{
    restore_listener_if_captured, FusionMode, ListenerResult, SignalListener,
    SignalListenerFactory, SignalType,
};
use parking_lot::Mutex;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::warn;

#[derive(Default)]
struct TapState {
    done: AtomicBool,
    finalized: AtomicBool,
    fusion: Mutex<FusionMode>,
}

/// Listener plumbing shared by the subscriber and subscription sides of a tap.
///
/// Listener errors never reach the data path: they go to
/// [`SignalListener::handle_listener_error`].
pub(crate) struct TapCore<T> {
    listener: Arc<dyn SignalListener<T>>,
    state: Arc<TapState>,
}

impl<T> Clone for TapCore<T> {
    fn clone(&self) -> Self {
        Self {
            listener: Arc::clone(&self.listener),
            state: Arc::clone(&self.state),
        }
    }
}

impl<T> TapCore<T> {
    pub(crate) fn new(listener: Arc<dyn SignalListener<T>>) -> Self {
        Self {
            listener,
            state: Arc::default(),
        }
    }

    pub(crate) fn listener(&self) -> &Arc<dyn SignalListener<T>> {
        &self.listener
    }

    pub(crate) fn guard(&self, result: ListenerResult) {
        if let Err(e) = result {
            self.listener.handle_listener_error(&e);
        }
    }

    pub(crate) fn fusion_mode(&self) -> FusionMode {
        *self.state.fusion.lock()
    }

    pub(crate) fn set_fusion_mode(&self, mode: FusionMode) {
        *self.state.fusion.lock() = mode;
    }

    pub(crate) fn context<S>(&self, actual: &S) -> Context
    where
        S: Subscriber<T> + ?Sized,
    {
        self.listener.add_to_context(actual.current_context())
    }

    pub(crate) fn subscribed(&self) {
        self.guard(self.listener.do_on_subscription());
    }

    pub(crate) fn next<S>(&self, actual: &mut S, value: T)
    where
        S: Subscriber<T> + ?Sized,
    {
        if self.state.done.load(Ordering::Acquire) {
            self.guard(self.listener.do_on_malformed_on_next(&value));
            return;
        }
        self.guard(self.listener.do_on_next(&value));
        actual.on_next(value);
    }

    pub(crate) fn try_next(&self, actual: &mut dyn ConditionalSubscriber<T>, value: T) -> bool {
        if self.state.done.load(Ordering::Acquire) {
            self.guard(self.listener.do_on_malformed_on_next(&value));
            return true;
        }
        self.guard(self.listener.do_on_next(&value));
        actual.try_on_next(value)
    }

    pub(crate) fn error<S>(&self, actual: &mut S, error: StreamError)
    where
        S: Subscriber<T> + ?Sized,
    {
        if self.state.done.swap(true, Ordering::AcqRel) {
            self.guard(self.listener.do_on_malformed_on_error(&error));
            return;
        }
        self.guard(self.listener.do_on_error(&error));
        actual.on_error(Arc::clone(&error));
        self.guard(self.listener.do_after_error(&error));
        self.finally(SignalType::OnError);
    }

    pub(crate) fn complete<S>(&self, actual: &mut S)
    where
        S: Subscriber<T> + ?Sized,
    {
        if self.state.done.swap(true, Ordering::AcqRel) {
            self.guard(self.listener.do_on_malformed_on_complete());
            return;
        }
        self.guard(self.listener.do_on_complete());
        actual.on_complete();
        self.guard(self.listener.do_after_complete());
        self.finally(SignalType::OnComplete);
    }

    /// Completion observed through a synchronously fused poll.
    pub(crate) fn complete_fused(&self) {
        if self.state.done.swap(true, Ordering::AcqRel) {
            return;
        }
        self.guard(self.listener.do_on_complete());
        self.guard(self.listener.do_after_complete());
        self.finally(SignalType::OnComplete);
    }

    /// Failure observed through a synchronously fused poll.
    pub(crate) fn error_fused(&self, error: &anyhow::Error) {
        if self.state.done.swap(true, Ordering::AcqRel) {
            self.guard(self.listener.do_on_malformed_on_error(error));
            return;
        }
        self.guard(self.listener.do_on_error(error));
        self.guard(self.listener.do_after_error(error));
        self.finally(SignalType::OnError);
    }

    pub(crate) fn request<S>(&self, upstream: &S, n: u64)
    where
        S: Subscription + ?Sized,
    {
        self.guard(self.listener.do_on_request(n));
        upstream.request(n);
    }

    pub(crate) fn cancel<S>(&self, upstream: &S)
    where
        S: Subscription + ?Sized,
    {
        self.guard(self.listener.do_on_cancel());
        upstream.cancel();
        self.finally(SignalType::Cancel);
    }

    pub(crate) fn finally(&self, terminal: SignalType) {
        if !self.state.finalized.swap(true, Ordering::AcqRel) {
            self.guard(self.listener.do_finally(terminal));
        }
    }
}

/// Listener creation and the subscribe-time restore decision, shared by
/// [`Tap`] and [`super::TapFuseable`].
pub(crate) struct TapSource<T, F: SignalListenerFactory<T>> {
    pub(crate) source: Arc<dyn Publisher<T>>,
    factory: F,
    state: F::State,
    registry: Option<Arc<AccessorRegistry>>,
    pub(crate) config: PropagationConfig,
}

impl<T: Send + 'static, F: SignalListenerFactory<T>> TapSource<T, F> {
    pub(crate) fn new(source: Arc<dyn Publisher<T>>, factory: F) -> Self {
        let state = factory.initialize_publisher_state();
        Self {
            source,
            factory,
            state,
            registry: None,
            config: PropagationConfig::default(),
        }
    }

    pub(crate) fn set_registry(&mut self, registry: Arc<AccessorRegistry>) {
        self.registry = Some(registry);
    }

    pub(crate) fn set_config(&mut self, config: PropagationConfig) {
        self.config = config;
    }

    pub(crate) fn listener_for(
        &self,
        context: &Context,
    ) -> anyhow::Result<Arc<dyn SignalListener<T>>> {
        let listener = self
            .factory
            .create_listener(context, &self.state)
            .map_err(|e| PropagationError::ListenerFactory(format!("{e:#}")))?;
        let registry = self
            .registry
            .clone()
            .unwrap_or_else(AccessorRegistry::global);
        Ok(restore_listener_if_captured(
            listener,
            context,
            &registry,
            &self.config,
        ))
    }

    /// Creates the effective listener and runs `do_first`.
    ///
    /// On failure the subscriber is terminated and `None` is returned.
    pub(crate) fn start<S>(&self, actual: &mut S) -> Option<Arc<dyn SignalListener<T>>>
    where
        S: Subscriber<T> + ?Sized,
    {
        let context = actual.current_context();
        let listener = match self.listener_for(&context) {
            Ok(listener) => listener,
            Err(e) => {
                warn!(error = %e, "Signal listener factory failed");
                error_subscriber::<T, S>(actual, Arc::new(e));
                return None;
            }
        };

        if let Err(e) = listener.do_first() {
            listener.handle_listener_error(&e);
            error_subscriber::<T, S>(actual, Arc::new(e));
            return None;
        }

        Some(listener)
    }
}

/// Observes a publisher's signals through listeners from a factory.
///
/// Fusion is not propagated: downstream always sees a conventional
/// subscription. Use [`super::TapFuseable`] to keep fusion.
pub struct Tap<T, F: SignalListenerFactory<T>> {
    inner: TapSource<T, F>,
}

impl<T: Send + 'static, F: SignalListenerFactory<T>> Tap<T, F> {
    /// Creates a tap over `source`.
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

impl<T: Send + 'static, F: SignalListenerFactory<T>> Publisher<T> for Tap<T, F> {
    fn subscribe(&self, mut subscriber: Box<dyn Subscriber<T>>) {
        let Some(listener) = self.inner.start(subscriber.as_mut()) else {
            return;
        };
        self.inner
            .source
            .subscribe(Box::new(TapSubscriber::new(subscriber, listener)));
    }

    fn subscribe_conditional(&self, mut subscriber: Box<dyn ConditionalSubscriber<T>>) {
        let Some(listener) = self.inner.start(subscriber.as_mut()) else {
            return;
        };
        self.inner
            .source
            .subscribe_conditional(Box::new(TapConditionalSubscriber::new(subscriber, listener)));
    }
}

impl<T, F: SignalListenerFactory<T>> fmt::Debug for Tap<T, F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Tap")
            .field("config", &self.inner.config)
            .finish_non_exhaustive()
    }
}

/// Conventional tap subscriber.
pub struct TapSubscriber<T, S: ?Sized = dyn Subscriber<T>> {
    core: TapCore<T>,
    actual: Box<S>,
}

/// Conventional tap subscriber with a conditional downstream.
pub type TapConditionalSubscriber<T> = TapSubscriber<T, dyn ConditionalSubscriber<T>>;

impl<T, S> TapSubscriber<T, S>
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
}

impl<T, S> Subscriber<T> for TapSubscriber<T, S>
where
    T: Send + 'static,
    S: Subscriber<T> + ?Sized,
{
    fn current_context(&self) -> Context {
        self.core.context(self.actual.as_ref())
    }

    fn on_subscribe(&mut self, upstream: SubscriptionHandle<T>) {
        self.core.subscribed();
        let subscription = TapSubscription::new(self.core.clone(), upstream);
        self.actual
            .on_subscribe(SubscriptionHandle::Plain(Arc::new(subscription)));
    }

    fn on_next(&mut self, value: T) {
        self.core.next(self.actual.as_mut(), value);
    }

    fn on_error(&mut self, error: StreamError) {
        self.core.error(self.actual.as_mut(), error);
    }

    fn on_complete(&mut self) {
        self.core.complete(self.actual.as_mut());
    }
}

impl<T: Send + 'static> ConditionalSubscriber<T> for TapConditionalSubscriber<T> {
    fn try_on_next(&mut self, value: T) -> bool {
        self.core.try_next(self.actual.as_mut(), value)
    }
}

/// Downstream view of a conventional tap: requests and cancellation are
/// reported to the listener before reaching upstream.
pub(crate) struct TapSubscription<T> {
    core: TapCore<T>,
    upstream: SubscriptionHandle<T>,
}

impl<T> TapSubscription<T> {
    pub(crate) fn new(core: TapCore<T>, upstream: SubscriptionHandle<T>) -> Self {
        Self { core, upstream }
    }
}

impl<T> Subscription for TapSubscription<T> {
    fn request(&self, n: u64) {
        self.core.request(&self.upstream, n);
    }

    fn cancel(&self) {
        self.core.cancel(&self.upstream);
    }
}
