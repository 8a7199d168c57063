//! Subscriber registry and per-subscriber delivery handles.

use super::mailbox::{Mailbox, Offer};
use crate::core::ShutdownSignal;
use futures::Stream;
use parking_lot::Mutex;
use std::sync::{Arc, Weak};

type CountListener = Arc<dyn Fn(usize) + Send + Sync>;

/// Internal subscriber registry state.
struct SubscriberRegistryInner<M> {
    subscribers: Vec<(u64, Arc<Mailbox<M>>)>,
    next_id: u64,
    on_change: Option<CountListener>,
}

impl<M> SubscriberRegistryInner<M> {
    fn count_changed(&self) {
        if let Some(listener) = &self.on_change {
            listener(self.subscribers.len());
        }
    }
}

type SharedInner<M> = Arc<Mutex<SubscriberRegistryInner<M>>>;

/// Outcome of one broadcast pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BroadcastReport {
    /// Subscribers whose slot accepted the value.
    pub delivered: usize,
    /// Subscribers removed because their slot was still occupied.
    pub dropped_slow: usize,
}

/// Registry of single-slot subscribers.
///
/// Every broadcast offers the value to each subscriber without waiting. A
/// subscriber whose slot still holds the previous value is considered too
/// slow: it is removed and its channel closed.
///
/// # Examples
///
/// ```rust
/// use hotstore::notify::SubscriberRegistry;
///
/// # async fn example() {
/// let registry = SubscriberRegistry::new();
/// let mut sub = registry.subscribe(None);
///
/// registry.broadcast(&42);
/// assert_eq!(sub.recv().await, Some(42));
/// # }
/// ```
pub struct SubscriberRegistry<M> {
    inner: SharedInner<M>,
}

impl<M> SubscriberRegistry<M> {
    /// Create a new subscriber registry.
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(SubscriberRegistryInner {
                subscribers: Vec::new(),
                next_id: 0,
                on_change: None,
            })),
        }
    }

    /// Call `listener` with the new subscriber count whenever a subscriber
    /// is added or removed, however it was removed.
    ///
    /// The listener runs with the registry lock held and must not call back
    /// into the registry.
    pub fn on_change<F>(&self, listener: F)
    where
        F: Fn(usize) + Send + Sync + 'static,
    {
        self.inner.lock().on_change = Some(Arc::new(listener));
    }

    /// Register a subscriber, seeding its slot with `seed` when present.
    pub fn subscribe(&self, seed: Option<M>) -> Subscription<M> {
        let mailbox = Arc::new(Mailbox::new());
        if let Some(value) = seed {
            // A fresh slot is always empty, so the offer cannot be refused.
            let _ = mailbox.offer(value);
        }

        let mut inner = self.inner.lock();
        let id = inner.next_id;
        inner.next_id += 1;
        inner.subscribers.push((id, Arc::clone(&mailbox)));
        inner.count_changed();
        drop(inner);

        Subscription {
            unsubscriber: Unsubscriber {
                id,
                registry: Arc::downgrade(&self.inner),
                mailbox: Arc::clone(&mailbox),
            },
            mailbox,
        }
    }

    /// Offer `message` to every registered subscriber.
    ///
    /// The registry lock is held only to snapshot and later prune the
    /// subscriber list, never during the per-subscriber offer.
    pub fn broadcast(&self, message: &M) -> BroadcastReport
    where
        M: Clone,
    {
        let targets: Vec<(u64, Arc<Mailbox<M>>)> = self
            .inner
            .lock()
            .subscribers
            .iter()
            .map(|(id, mailbox)| (*id, Arc::clone(mailbox)))
            .collect();

        let mut report = BroadcastReport::default();
        let mut stale = Vec::new();

        for (id, mailbox) in targets {
            match mailbox.offer(message.clone()) {
                Offer::Delivered => report.delivered += 1,
                Offer::Occupied => {
                    mailbox.close(false);
                    report.dropped_slow += 1;
                    stale.push(id);
                }
                Offer::Closed => stale.push(id),
            }
        }

        if !stale.is_empty() {
            let mut inner = self.inner.lock();
            inner.subscribers.retain(|(id, _)| !stale.contains(id));
            inner.count_changed();
        }

        report
    }

    /// Get the number of active subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.inner.lock().subscribers.len()
    }
}

impl<M> Default for SubscriberRegistry<M> {
    fn default() -> Self {
        Self::new()
    }
}

impl<M> Clone for SubscriberRegistry<M> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

/// Idempotent removal handle for a subscription.
///
/// Calling [`Unsubscriber::unsubscribe`] removes the subscriber from its
/// registry and closes its channel, discarding any pending value. Further
/// calls do nothing.
pub struct Unsubscriber<M> {
    id: u64,
    registry: Weak<Mutex<SubscriberRegistryInner<M>>>,
    mailbox: Arc<Mailbox<M>>,
}

impl<M> Unsubscriber<M> {
    /// Identity of the subscription this handle removes.
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Remove the subscription. Returns true only on the call that closed it.
    pub fn unsubscribe(&self) -> bool {
        if let Some(registry) = self.registry.upgrade() {
            let mut inner = registry.lock();
            let before = inner.subscribers.len();
            inner.subscribers.retain(|(id, _)| *id != self.id);
            if inner.subscribers.len() != before {
                inner.count_changed();
            }
        }
        self.mailbox.close(true)
    }
}

impl<M> Clone for Unsubscriber<M> {
    fn clone(&self) -> Self {
        Self {
            id: self.id,
            registry: Weak::clone(&self.registry),
            mailbox: Arc::clone(&self.mailbox),
        }
    }
}

/// Receiving side of a subscription.
///
/// Holds at most one undelivered value. Dropping the subscription
/// unsubscribes it.
pub struct Subscription<M> {
    unsubscriber: Unsubscriber<M>,
    mailbox: Arc<Mailbox<M>>,
}

impl<M> Subscription<M> {
    /// Identity of this subscription.
    pub fn id(&self) -> u64 {
        self.unsubscriber.id
    }

    /// Wait for the next delivered value.
    ///
    /// Returns `None` once the channel is closed and drained, either because
    /// the subscriber was removed for being too slow or because it was
    /// unsubscribed.
    pub async fn recv(&mut self) -> Option<M> {
        self.mailbox.recv().await
    }

    /// Like [`recv`](Self::recv), but gives up when `signal` is cancelled.
    ///
    /// Cancellation unsubscribes, so every later call returns `None` too.
    pub async fn recv_until(&mut self, signal: &ShutdownSignal) -> Option<M> {
        tokio::select! {
            biased;
            _ = signal.cancelled() => {
                self.unsubscribe();
                None
            }
            value = self.mailbox.recv() => value,
        }
    }

    /// Take a pending value without waiting.
    pub fn try_recv(&mut self) -> Option<M> {
        self.mailbox.try_take()
    }

    /// Whether the channel has been closed.
    pub fn is_closed(&self) -> bool {
        self.mailbox.is_closed()
    }

    /// A cloneable handle that can remove this subscription from elsewhere.
    pub fn unsubscriber(&self) -> Unsubscriber<M> {
        self.unsubscriber.clone()
    }

    /// Remove this subscription. Idempotent.
    pub fn unsubscribe(&self) -> bool {
        self.unsubscriber.unsubscribe()
    }

    /// Convert into a stream that ends when the channel closes.
    pub fn into_stream(self) -> impl Stream<Item = M> + Send
    where
        M: Send + 'static,
    {
        futures::stream::unfold(self, |mut sub| async move {
            sub.recv().await.map(|value| (value, sub))
        })
    }

    /// Convert into a stream that also ends, unsubscribing, when `signal`
    /// is cancelled.
    pub fn into_stream_until(self, signal: ShutdownSignal) -> impl Stream<Item = M> + Send
    where
        M: Send + 'static,
    {
        futures::stream::unfold((self, signal), |(mut sub, signal)| async move {
            let value = sub.recv_until(&signal).await?;
            Some((value, (sub, signal)))
        })
    }
}

impl<M> Drop for Subscription<M> {
    fn drop(&mut self) {
        self.unsubscriber.unsubscribe();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::Shutdown;
    use futures::StreamExt;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn test_subscribe_and_broadcast() {
        let registry = SubscriberRegistry::new();
        let mut sub = registry.subscribe(None);

        let report = registry.broadcast(&1);
        assert_eq!(report.delivered, 1);
        assert_eq!(sub.recv().await, Some(1));

        registry.broadcast(&2);
        assert_eq!(sub.recv().await, Some(2));
    }

    #[test]
    fn test_seed_is_first_delivery() {
        let registry = SubscriberRegistry::new();
        let mut sub = registry.subscribe(Some("seed"));
        assert_eq!(sub.try_recv(), Some("seed"));
    }

    #[test]
    fn test_slow_subscriber_is_dropped() {
        let registry = SubscriberRegistry::new();
        let mut fast = registry.subscribe(None);
        let slow = registry.subscribe(None);

        registry.broadcast(&1);
        assert_eq!(fast.try_recv(), Some(1));

        let report = registry.broadcast(&2);
        assert_eq!(report.delivered, 1);
        assert_eq!(report.dropped_slow, 1);
        assert!(slow.is_closed());
        assert!(!fast.is_closed());
        assert_eq!(registry.subscriber_count(), 1);
    }

    #[test]
    fn test_unsubscribe_is_idempotent() {
        let registry = SubscriberRegistry::new();
        let sub = registry.subscribe(Some(5));
        let handle = sub.unsubscriber();

        assert!(handle.unsubscribe());
        assert!(!handle.unsubscribe());
        assert!(!sub.unsubscribe());
        assert_eq!(registry.subscriber_count(), 0);
        assert!(sub.is_closed());
    }

    #[tokio::test]
    async fn test_unsubscribed_handle_gets_nothing() {
        let registry = SubscriberRegistry::new();
        let mut sub = registry.subscribe(Some(1));
        sub.unsubscribe();

        let report = registry.broadcast(&2);
        assert_eq!(report.delivered, 0);
        assert_eq!(sub.recv().await, None);
    }

    #[test]
    fn test_drop_unsubscribes() {
        let registry: SubscriberRegistry<i32> = SubscriberRegistry::new();
        let sub = registry.subscribe(None);
        assert_eq!(registry.subscriber_count(), 1);
        drop(sub);
        assert_eq!(registry.subscriber_count(), 0);
    }

    #[tokio::test]
    async fn test_into_stream_ends_on_close() {
        let registry = SubscriberRegistry::new();
        let sub = registry.subscribe(Some(1));
        let handle = sub.unsubscriber();
        let mut stream = Box::pin(sub.into_stream());

        assert_eq!(stream.next().await, Some(1));
        handle.unsubscribe();
        assert_eq!(stream.next().await, None);
    }

    #[tokio::test]
    async fn test_recv_until_unsubscribes_on_cancel() {
        let registry: SubscriberRegistry<i32> = SubscriberRegistry::new();
        let mut sub = registry.subscribe(None);
        let shutdown = Shutdown::new();
        let signal = shutdown.signal();

        let waiter = tokio::spawn(async move {
            let value = sub.recv_until(&signal).await;
            (value, sub.is_closed())
        });
        tokio::task::yield_now().await;
        shutdown.trigger();

        let (value, closed) = waiter.await.unwrap();
        assert_eq!(value, None);
        assert!(closed);
        assert_eq!(registry.subscriber_count(), 0);
    }

    #[tokio::test]
    async fn test_recv_until_delivers_before_cancel() {
        let registry = SubscriberRegistry::new();
        let mut sub = registry.subscribe(Some(7));
        let shutdown = Shutdown::new();

        assert_eq!(sub.recv_until(&shutdown.signal()).await, Some(7));
        assert_eq!(registry.subscriber_count(), 1);
    }

    #[test]
    fn test_count_listener_sees_every_removal() {
        let registry: SubscriberRegistry<i32> = SubscriberRegistry::new();
        let last = Arc::new(AtomicUsize::new(usize::MAX));
        let seen = Arc::clone(&last);
        registry.on_change(move |count| seen.store(count, Ordering::SeqCst));

        let first = registry.subscribe(None);
        let second = registry.subscribe(None);
        assert_eq!(last.load(Ordering::SeqCst), 2);

        drop(first);
        assert_eq!(last.load(Ordering::SeqCst), 1);

        second.unsubscribe();
        assert_eq!(last.load(Ordering::SeqCst), 0);

        // A second removal of the same subscriber reports nothing new.
        last.store(usize::MAX, Ordering::SeqCst);
        drop(second);
        assert_eq!(last.load(Ordering::SeqCst), usize::MAX);
    }

    #[test]
    fn test_count_listener_sees_slow_drop() {
        let registry = SubscriberRegistry::new();
        let last = Arc::new(AtomicUsize::new(usize::MAX));
        let seen = Arc::clone(&last);
        registry.on_change(move |count| seen.store(count, Ordering::SeqCst));

        let _slow = registry.subscribe(Some(1));
        registry.broadcast(&2);
        assert_eq!(last.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_clone_registry_shares_subscribers() {
        let registry = SubscriberRegistry::new();
        let registry2 = registry.clone();
        let mut sub = registry.subscribe(None);

        registry2.broadcast(&9);
        assert_eq!(sub.try_recv(), Some(9));
    }
}
