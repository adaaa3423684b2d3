//! Publisher over a fixed sequence of values.

use super::traits::{
    ConditionalSubscriber, Publisher, QueueSubscription, Subscriber, Subscription,
    SubscriptionHandle,
};
use crate::signal::FusionMode;
use parking_lot::Mutex;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use tracing::trace;

/// Emits a fixed sequence to each subscriber, honoring demand.
///
/// Subscriptions support synchronous fusion unless the publisher is
/// [hidden](IterPublisher::hide).
pub struct IterPublisher<T> {
    items: Arc<Vec<T>>,
    fuseable: bool,
}

impl<T> IterPublisher<T>
where
    T: Clone + Send + Sync + 'static,
{
    /// Creates a publisher over `items`.
    pub fn new(items: impl IntoIterator<Item = T>) -> Self {
        Self {
            items: Arc::new(items.into_iter().collect()),
            fuseable: true,
        }
    }

    /// Creates a publisher that completes immediately.
    #[must_use]
    pub fn empty() -> Self {
        Self::new(Vec::new())
    }

    /// Hands out conventional subscriptions only.
    #[must_use]
    pub fn hide(mut self) -> Self {
        self.fuseable = false;
        self
    }

    /// Returns true if subscriptions offer fusion.
    #[must_use]
    pub fn is_fuseable(&self) -> bool {
        self.fuseable
    }

    fn attach(&self, downstream: Downstream<T>) {
        let subscription = Arc::new(IterSubscription {
            items: Arc::clone(&self.items),
            index: AtomicUsize::new(0),
            requested: AtomicU64::new(0),
            wip: AtomicUsize::new(0),
            cancelled: AtomicBool::new(false),
            done: AtomicBool::new(false),
            fused: AtomicBool::new(false),
            downstream: Mutex::new(None),
        });

        let handle = if self.fuseable {
            SubscriptionHandle::Fuseable(Arc::clone(&subscription) as Arc<dyn QueueSubscription<T>>)
        } else {
            SubscriptionHandle::Plain(Arc::clone(&subscription) as Arc<dyn Subscription>)
        };

        let mut downstream = downstream;
        downstream.on_subscribe(handle);
        *subscription.downstream.lock() = Some(downstream);
        subscription.drain();
    }
}

impl<T> Publisher<T> for IterPublisher<T>
where
    T: Clone + Send + Sync + 'static,
{
    fn subscribe(&self, subscriber: Box<dyn Subscriber<T>>) {
        self.attach(Downstream::Plain(subscriber));
    }

    fn subscribe_conditional(&self, subscriber: Box<dyn ConditionalSubscriber<T>>) {
        self.attach(Downstream::Conditional(subscriber));
    }
}

impl<T> fmt::Debug for IterPublisher<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IterPublisher")
            .field("len", &self.items.len())
            .field("fuseable", &self.fuseable)
            .finish()
    }
}

enum Downstream<T> {
    Plain(Box<dyn Subscriber<T>>),
    Conditional(Box<dyn ConditionalSubscriber<T>>),
}

impl<T> Downstream<T> {
    fn on_subscribe(&mut self, handle: SubscriptionHandle<T>) {
        match self {
            Self::Plain(s) => s.on_subscribe(handle),
            Self::Conditional(s) => s.on_subscribe(handle),
        }
    }

    /// Returns true if the value consumed demand.
    fn offer(&mut self, value: T) -> bool {
        match self {
            Self::Plain(s) => {
                s.on_next(value);
                true
            }
            Self::Conditional(s) => s.try_on_next(value),
        }
    }

    fn on_complete(&mut self) {
        match self {
            Self::Plain(s) => s.on_complete(),
            Self::Conditional(s) => s.on_complete(),
        }
    }
}

struct IterSubscription<T> {
    items: Arc<Vec<T>>,
    index: AtomicUsize,
    requested: AtomicU64,
    wip: AtomicUsize,
    cancelled: AtomicBool,
    done: AtomicBool,
    fused: AtomicBool,
    downstream: Mutex<Option<Downstream<T>>>,
}

impl<T: Clone> IterSubscription<T> {
    /// Serializes emission: reentrant calls only mark more work.
    fn drain(&self) {
        if self.wip.fetch_add(1, Ordering::AcqRel) != 0 {
            return;
        }
        let mut missed = 1;
        loop {
            self.emit();
            let previous = self.wip.fetch_sub(missed, Ordering::AcqRel);
            missed = previous - missed;
            if missed == 0 {
                break;
            }
        }
    }

    fn emit(&self) {
        if self.fused.load(Ordering::Acquire) {
            return;
        }
        let mut slot = self.downstream.lock();
        let Some(downstream) = slot.as_mut() else {
            return;
        };

        loop {
            if self.cancelled.load(Ordering::Acquire) {
                *slot = None;
                return;
            }

            let index = self.index.load(Ordering::Acquire);
            if index >= self.items.len() {
                if !self.done.swap(true, Ordering::AcqRel) {
                    trace!(emitted = index, "Sequence exhausted");
                    downstream.on_complete();
                }
                *slot = None;
                return;
            }

            let requested = self.requested.load(Ordering::Acquire);
            if requested == 0 {
                return;
            }

            self.index.store(index + 1, Ordering::Release);
            if downstream.offer(self.items[index].clone()) && requested != u64::MAX {
                self.requested.fetch_sub(1, Ordering::AcqRel);
            }
        }
    }
}

impl<T: Clone + Send + Sync> Subscription for IterSubscription<T> {
    fn request(&self, n: u64) {
        if n == 0 || self.fused.load(Ordering::Acquire) {
            return;
        }
        let _ = self
            .requested
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |current| {
                Some(current.saturating_add(n))
            });
        self.drain();
    }

    fn cancel(&self) {
        if !self.cancelled.swap(true, Ordering::AcqRel) {
            self.drain();
        }
    }
}

impl<T: Clone + Send + Sync> QueueSubscription<T> for IterSubscription<T> {
    fn request_fusion(&self, requested: FusionMode) -> FusionMode {
        if requested.accepts(FusionMode::Sync) {
            self.fused.store(true, Ordering::Release);
            FusionMode::Sync
        } else {
            FusionMode::None
        }
    }

    fn poll(&self) -> anyhow::Result<Option<T>> {
        if self.cancelled.load(Ordering::Acquire) {
            return Ok(None);
        }
        let index = self.index.load(Ordering::Acquire);
        match self.items.get(index) {
            Some(value) => {
                self.index.store(index + 1, Ordering::Release);
                Ok(Some(value.clone()))
            }
            None => Ok(None),
        }
    }

    fn is_empty(&self) -> bool {
        self.index.load(Ordering::Acquire) >= self.items.len()
    }

    fn clear(&self) {
        self.index.store(self.items.len(), Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::TestSubscriber;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_emits_all_with_unbounded_demand() {
        let subscriber = TestSubscriber::<i32>::new();
        IterPublisher::new(vec![1, 2, 3]).subscribe(Box::new(subscriber.clone()));

        assert_eq!(subscriber.values(), vec![1, 2, 3]);
        assert!(subscriber.is_completed());
    }

    #[test]
    fn test_honors_bounded_demand() {
        let subscriber = TestSubscriber::<i32>::builder().requested(2).build();
        IterPublisher::new(vec![1, 2, 3]).subscribe(Box::new(subscriber.clone()));

        assert_eq!(subscriber.values(), vec![1, 2]);
        assert!(!subscriber.is_completed());

        subscriber.request(1);
        assert_eq!(subscriber.values(), vec![1, 2, 3]);
        assert!(subscriber.is_completed());
    }

    #[test]
    fn test_empty_completes_without_demand() {
        let subscriber = TestSubscriber::<i32>::builder().requested(0).build();
        IterPublisher::empty().subscribe(Box::new(subscriber.clone()));

        assert!(subscriber.values().is_empty());
        assert!(subscriber.is_completed());
    }

    #[test]
    fn test_cancel_stops_emission() {
        let subscriber = TestSubscriber::<i32>::builder().requested(1).build();
        IterPublisher::new(vec![1, 2, 3]).subscribe(Box::new(subscriber.clone()));

        subscriber.cancel();
        subscriber.request(5);

        assert_eq!(subscriber.values(), vec![1]);
        assert!(!subscriber.is_completed());
    }

    #[test]
    fn test_sync_fusion_drains_by_polling() {
        let subscriber = TestSubscriber::<i32>::builder().fusion(FusionMode::Any).build();
        IterPublisher::new(vec![1, 2]).subscribe(Box::new(subscriber.clone()));

        assert_eq!(subscriber.fusion_mode(), FusionMode::Sync);
        assert_eq!(subscriber.values(), vec![1, 2]);
        assert!(subscriber.is_completed());
    }

    #[test]
    fn test_hidden_refuses_fusion() {
        let subscriber = TestSubscriber::<i32>::builder().fusion(FusionMode::Any).build();
        IterPublisher::new(vec![1]).hide().subscribe(Box::new(subscriber.clone()));

        assert_eq!(subscriber.fusion_mode(), FusionMode::None);
        assert_eq!(subscriber.values(), vec![1]);
    }

    #[test]
    fn test_rejected_values_do_not_consume_demand() {
        let subscriber = TestSubscriber::<i32>::builder()
            .requested(2)
            .accept_if(|v: &i32| v % 2 == 0)
            .build();
        IterPublisher::new(vec![1, 2, 3, 4, 5]).subscribe_conditional(Box::new(subscriber.clone()));

        assert_eq!(subscriber.values(), vec![2, 4]);
        assert_eq!(subscriber.rejected(), vec![1, 3]);
        assert!(!subscriber.is_completed());
    }
}
