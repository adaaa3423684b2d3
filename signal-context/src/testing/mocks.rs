//! Recording listeners and manually driven stream endpoints.

use crate::context::Context;
use crate::signal::{FusionMode, ListenerResult, SignalListener, SignalType};
use crate::stream::{
    ConditionalSubscriber, Publisher, QueueSubscription, StreamError, Subscriber, Subscription,
    SubscriptionHandle,
};
use anyhow::anyhow;
use parking_lot::Mutex;
use serde_json::Value;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

type Probe = Arc<dyn Fn() -> Option<Value> + Send + Sync>;

/// Listener that records, for every hook, the value a probe reads at call time.
///
/// Entries read `"{hook}: {value}"` with the value rendered as JSON, or
/// `<none>` when the probe returns nothing.
pub struct RecordingListener {
    probe: Probe,
    entries: Mutex<Vec<String>>,
    failing_hook: Option<&'static str>,
}

impl RecordingListener {
    /// Creates a listener reading values through `probe`.
    pub fn new<P>(probe: P) -> Self
    where
        P: Fn() -> Option<Value> + Send + Sync + 'static,
    {
        Self {
            probe: Arc::new(probe),
            entries: Mutex::new(Vec::new()),
            failing_hook: None,
        }
    }

    /// Makes `hook` return an error after recording.
    #[must_use]
    pub fn failing_on(mut self, hook: &'static str) -> Self {
        self.failing_hook = Some(hook);
        self
    }

    /// Returns the recorded entries.
    #[must_use]
    pub fn entries(&self) -> Vec<String> {
        self.entries.lock().clone()
    }

    /// Returns the names of the hooks called, in order.
    #[must_use]
    pub fn hooks(&self) -> Vec<String> {
        self.entries
            .lock()
            .iter()
            .filter_map(|entry| entry.split(':').next().map(str::to_string))
            .collect()
    }

    /// Clears the recorded entries.
    pub fn clear(&self) {
        self.entries.lock().clear();
    }

    fn record(&self, hook: &'static str) -> ListenerResult {
        let seen = (self.probe)().map_or_else(|| "<none>".to_string(), |v| v.to_string());
        self.entries.lock().push(format!("{hook}: {seen}"));
        if self.failing_hook == Some(hook) {
            return Err(anyhow!("{hook} failed"));
        }
        Ok(())
    }
}

impl fmt::Debug for RecordingListener {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RecordingListener")
            .field("entries", &self.entries.lock().len())
            .field("failing_hook", &self.failing_hook)
            .finish_non_exhaustive()
    }
}

impl<T> SignalListener<T> for RecordingListener {
    fn do_first(&self) -> ListenerResult {
        self.record("do_first")
    }

    fn do_on_subscription(&self) -> ListenerResult {
        self.record("do_on_subscription")
    }

    fn do_on_fusion(&self, _mode: FusionMode) -> ListenerResult {
        self.record("do_on_fusion")
    }

    fn do_on_request(&self, _n: u64) -> ListenerResult {
        self.record("do_on_request")
    }

    fn do_on_cancel(&self) -> ListenerResult {
        self.record("do_on_cancel")
    }

    fn do_on_next(&self, _value: &T) -> ListenerResult {
        self.record("do_on_next")
    }

    fn do_on_complete(&self) -> ListenerResult {
        self.record("do_on_complete")
    }

    fn do_on_error(&self, _error: &anyhow::Error) -> ListenerResult {
        self.record("do_on_error")
    }

    fn do_after_complete(&self) -> ListenerResult {
        self.record("do_after_complete")
    }

    fn do_after_error(&self, _error: &anyhow::Error) -> ListenerResult {
        self.record("do_after_error")
    }

    fn do_finally(&self, _terminal: SignalType) -> ListenerResult {
        self.record("do_finally")
    }

    fn do_on_malformed_on_next(&self, _value: &T) -> ListenerResult {
        self.record("do_on_malformed_on_next")
    }

    fn do_on_malformed_on_complete(&self) -> ListenerResult {
        self.record("do_on_malformed_on_complete")
    }

    fn do_on_malformed_on_error(&self, _error: &anyhow::Error) -> ListenerResult {
        self.record("do_on_malformed_on_error")
    }

    fn add_to_context(&self, base: Context) -> Context {
        let _ = self.record("add_to_context");
        base
    }

    fn handle_listener_error(&self, _error: &anyhow::Error) {
        let _ = self.record("handle_listener_error");
    }
}

type AcceptPredicate<T> = Arc<dyn Fn(&T) -> bool + Send + Sync>;

struct SubscriberState<T> {
    subscription: Option<SubscriptionHandle<T>>,
    fusion: FusionMode,
    values: Vec<T>,
    rejected: Vec<T>,
    errors: Vec<String>,
    completions: usize,
}

impl<T> Default for SubscriberState<T> {
    fn default() -> Self {
        Self {
            subscription: None,
            fusion: FusionMode::None,
            values: Vec::new(),
            rejected: Vec::new(),
            errors: Vec::new(),
            completions: 0,
        }
    }
}

/// Builder for [`TestSubscriber`].
pub struct TestSubscriberBuilder<T> {
    context: Context,
    requested: u64,
    fusion: FusionMode,
    accept: Option<AcceptPredicate<T>>,
}

impl<T: Clone + Send + 'static> TestSubscriberBuilder<T> {
    /// Sets the context the subscriber exposes upstream.
    #[must_use]
    pub fn context(mut self, context: Context) -> Self {
        self.context = context;
        self
    }

    /// Sets the demand requested on subscription. Defaults to unbounded.
    #[must_use]
    pub fn requested(mut self, n: u64) -> Self {
        self.requested = n;
        self
    }

    /// Sets the fusion mode requested from fuseable subscriptions.
    #[must_use]
    pub fn fusion(mut self, mode: FusionMode) -> Self {
        self.fusion = mode;
        self
    }

    /// Accepts only values matching `predicate` when used as a conditional subscriber.
    #[must_use]
    pub fn accept_if<P>(mut self, predicate: P) -> Self
    where
        P: Fn(&T) -> bool + Send + Sync + 'static,
    {
        self.accept = Some(Arc::new(predicate));
        self
    }

    /// Builds the subscriber.
    #[must_use]
    pub fn build(self) -> TestSubscriber<T> {
        TestSubscriber {
            context: self.context,
            requested: self.requested,
            requested_fusion: self.fusion,
            accept: self.accept,
            state: Arc::new(Mutex::new(SubscriberState::default())),
        }
    }
}

/// Subscriber recording every signal it receives.
///
/// Clones share the recorded state, so a clone can be handed to a publisher
/// and the original inspected afterwards.
pub struct TestSubscriber<T> {
    context: Context,
    requested: u64,
    requested_fusion: FusionMode,
    accept: Option<AcceptPredicate<T>>,
    state: Arc<Mutex<SubscriberState<T>>>,
}

impl<T> Clone for TestSubscriber<T> {
    fn clone(&self) -> Self {
        Self {
            context: self.context.clone(),
            requested: self.requested,
            requested_fusion: self.requested_fusion,
            accept: self.accept.clone(),
            state: Arc::clone(&self.state),
        }
    }
}

impl<T: Clone + Send + 'static> TestSubscriber<T> {
    /// Creates a subscriber with unbounded demand and an empty context.
    #[must_use]
    pub fn new() -> Self {
        Self::builder().build()
    }

    /// Returns a builder.
    #[must_use]
    pub fn builder() -> TestSubscriberBuilder<T> {
        TestSubscriberBuilder {
            context: Context::empty(),
            requested: u64::MAX,
            fusion: FusionMode::None,
            accept: None,
        }
    }

    /// Returns the delivered values.
    #[must_use]
    pub fn values(&self) -> Vec<T> {
        self.state.lock().values.clone()
    }

    /// Returns the values refused by the accept predicate.
    #[must_use]
    pub fn rejected(&self) -> Vec<T> {
        self.state.lock().rejected.clone()
    }

    /// Returns the messages of received errors.
    #[must_use]
    pub fn errors(&self) -> Vec<String> {
        self.state.lock().errors.clone()
    }

    /// Returns true if completion was received.
    #[must_use]
    pub fn is_completed(&self) -> bool {
        self.state.lock().completions > 0
    }

    /// Returns the number of completions received.
    #[must_use]
    pub fn completions(&self) -> usize {
        self.state.lock().completions
    }

    /// Returns the negotiated fusion mode.
    #[must_use]
    pub fn fusion_mode(&self) -> FusionMode {
        self.state.lock().fusion
    }

    /// Returns true once a subscription was received.
    #[must_use]
    pub fn is_subscribed(&self) -> bool {
        self.state.lock().subscription.is_some()
    }

    /// Requests `n` more values through the received subscription.
    pub fn request(&self, n: u64) {
        if let Some(subscription) = self.subscription() {
            subscription.request(n);
        }
    }

    /// Cancels the received subscription.
    pub fn cancel(&self) {
        if let Some(subscription) = self.subscription() {
            subscription.cancel();
        }
    }

    /// Drains a fused subscription until it is empty.
    ///
    /// In synchronous mode an exhausted queue means completion.
    pub fn drain_fused(&self) {
        let (subscription, mode) = {
            let state = self.state.lock();
            (state.subscription.clone(), state.fusion)
        };
        let Some(queue) = subscription.as_ref().and_then(SubscriptionHandle::as_fuseable) else {
            return;
        };
        loop {
            match queue.poll() {
                Ok(Some(value)) => self.state.lock().values.push(value),
                Ok(None) => {
                    if mode == FusionMode::Sync {
                        self.state.lock().completions += 1;
                    }
                    return;
                }
                Err(e) => {
                    self.state.lock().errors.push(e.to_string());
                    return;
                }
            }
        }
    }

    fn subscription(&self) -> Option<SubscriptionHandle<T>> {
        self.state.lock().subscription.clone()
    }
}

impl<T: Clone + Send + 'static> Default for TestSubscriber<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Clone + Send + 'static> Subscriber<T> for TestSubscriber<T> {
    fn current_context(&self) -> Context {
        self.context.clone()
    }

    fn on_subscribe(&mut self, subscription: SubscriptionHandle<T>) {
        let mode = match subscription.as_fuseable() {
            Some(queue) if self.requested_fusion != FusionMode::None => {
                queue.request_fusion(self.requested_fusion)
            }
            _ => FusionMode::None,
        };
        {
            let mut state = self.state.lock();
            state.subscription = Some(subscription.clone());
            state.fusion = mode;
        }

        match mode {
            FusionMode::Sync => self.drain_fused(),
            FusionMode::Async => {}
            _ => {
                if self.requested > 0 {
                    subscription.request(self.requested);
                }
            }
        }
    }

    fn on_next(&mut self, value: T) {
        if self.fusion_mode() == FusionMode::Async {
            self.drain_fused();
            return;
        }
        self.state.lock().values.push(value);
    }

    fn on_error(&mut self, error: StreamError) {
        self.state.lock().errors.push(error.to_string());
    }

    fn on_complete(&mut self) {
        self.state.lock().completions += 1;
    }
}

impl<T: Clone + Send + 'static> ConditionalSubscriber<T> for TestSubscriber<T> {
    fn try_on_next(&mut self, value: T) -> bool {
        let accepted = self.accept.as_ref().map_or(true, |accept| accept(&value));
        let mut state = self.state.lock();
        if accepted {
            state.values.push(value);
        } else {
            state.rejected.push(value);
        }
        accepted
    }
}

impl<T> fmt::Debug for TestSubscriber<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.lock();
        f.debug_struct("TestSubscriber")
            .field("values", &state.values.len())
            .field("errors", &state.errors)
            .field("completions", &state.completions)
            .field("fusion", &state.fusion)
            .finish()
    }
}

#[derive(Default)]
struct TestSubscription {
    requested: AtomicU64,
    cancelled: AtomicBool,
}

impl Subscription for TestSubscription {
    fn request(&self, n: u64) {
        let _ = self
            .requested
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |current| {
                Some(current.saturating_add(n))
            });
    }

    fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
    }
}

/// Publisher driven by hand, from any thread.
///
/// Signals are broadcast to every subscriber without checking demand or
/// terminal state, so malformed sequences can be produced on purpose.
pub struct TestPublisher<T> {
    subscribers: Mutex<Vec<Box<dyn Subscriber<T>>>>,
    subscription: Arc<TestSubscription>,
}

impl<T: Clone + Send + 'static> TestPublisher<T> {
    /// Creates a publisher with no subscribers.
    #[must_use]
    pub fn new() -> Self {
        Self {
            subscribers: Mutex::new(Vec::new()),
            subscription: Arc::default(),
        }
    }

    /// Emits `value` to every subscriber.
    pub fn next(&self, value: T) {
        for subscriber in self.subscribers.lock().iter_mut() {
            subscriber.on_next(value.clone());
        }
    }

    /// Completes every subscriber.
    pub fn complete(&self) {
        for subscriber in self.subscribers.lock().iter_mut() {
            subscriber.on_complete();
        }
    }

    /// Fails every subscriber with `error`.
    pub fn error(&self, error: anyhow::Error) {
        let error: StreamError = Arc::new(error);
        for subscriber in self.subscribers.lock().iter_mut() {
            subscriber.on_error(Arc::clone(&error));
        }
    }

    /// Returns the number of subscribers.
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.subscribers.lock().len()
    }

    /// Returns the total demand requested by subscribers.
    #[must_use]
    pub fn requested(&self) -> u64 {
        self.subscription.requested.load(Ordering::Acquire)
    }

    /// Returns true if any subscriber cancelled.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.subscription.cancelled.load(Ordering::Acquire)
    }
}

impl<T: Clone + Send + 'static> Default for TestPublisher<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Clone + Send + 'static> Publisher<T> for TestPublisher<T> {
    fn subscribe(&self, mut subscriber: Box<dyn Subscriber<T>>) {
        subscriber.on_subscribe(SubscriptionHandle::Plain(
            Arc::clone(&self.subscription) as Arc<dyn Subscription>
        ));
        self.subscribers.lock().push(subscriber);
    }
}

impl<T> fmt::Debug for TestPublisher<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TestPublisher")
            .field("subscribers", &self.subscribers.lock().len())
            .finish_non_exhaustive()
    }
}
