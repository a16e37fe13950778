//! Bounded fan-out subscriptions.
//!
//! A [`Hub`] delivers every published event to every live subscriber. Each
//! subscription owns a bounded queue: publishing never blocks, and a
//! subscriber that falls behind loses events and observes a
//! [`HubEvent::Lagged`] marker on its next pull, so it can resynchronize from
//! the authoritative store. One hub instance serves one event kind; sharding
//! by kind means publishers only contend on the shard they touch.
use std::sync::{
    atomic::{AtomicU64, Ordering},
    Arc, Mutex,
};

use flume as channel;
use tracing::trace;

/// Per-subscription queue capacity. Publishing to a full queue drops the
/// event for that one subscriber and bumps its lag counter.
pub const SUBSCRIPTION_CAPACITY: usize = 64;

/// An item pulled from a subscription.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HubEvent<E> {
    /// A published event.
    Item(E),
    /// `n` events were dropped since the last pull. The consumer should
    /// resync from the store before continuing.
    Lagged(u64),
}

struct Subscriber<E> {
    tx: channel::Sender<E>,
    lagged: Arc<AtomicU64>,
}

/// A fan-out publisher for one event kind.
pub struct Hub<E> {
    subscribers: Arc<Mutex<Vec<Subscriber<E>>>>,
}

impl<E> Clone for Hub<E> {
    fn clone(&self) -> Self {
        Self {
            subscribers: Arc::clone(&self.subscribers),
        }
    }
}

impl<E: Clone> Default for Hub<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E: Clone> Hub<E> {
    pub fn new() -> Self {
        Self {
            subscribers: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Open a new subscription. The subscription is live until the returned
    /// receiver is dropped; dropping releases its queue.
    pub fn subscribe(&self) -> HubReceiver<E> {
        let (tx, rx) = channel::bounded(SUBSCRIPTION_CAPACITY);
        let lagged = Arc::new(AtomicU64::new(0));

        self.subscribers
            .lock()
            .expect("hub lock poisoned")
            .push(Subscriber {
                tx,
                lagged: Arc::clone(&lagged),
            });

        HubReceiver { rx, lagged }
    }

    /// Publish an event to all live subscribers. Never blocks: full queues
    /// drop the event and record the lag; dead subscriptions are pruned.
    pub fn publish(&self, event: E) {
        let mut subscribers = self.subscribers.lock().expect("hub lock poisoned");

        subscribers.retain(|sub| match sub.tx.try_send(event.clone()) {
            Ok(()) => true,
            Err(channel::TrySendError::Full(_)) => {
                sub.lagged.fetch_add(1, Ordering::Relaxed);
                trace!("subscriber queue full, event dropped");
                true
            }
            Err(channel::TrySendError::Disconnected(_)) => false,
        });
    }

    /// Number of live subscriptions.
    pub fn subscriber_count(&self) -> usize {
        let mut subscribers = self.subscribers.lock().expect("hub lock poisoned");
        subscribers.retain(|sub| !sub.tx.is_disconnected());
        subscribers.len()
    }
}

/// Consumer side of one subscription.
pub struct HubReceiver<E> {
    rx: channel::Receiver<E>,
    lagged: Arc<AtomicU64>,
}

impl<E> HubReceiver<E> {
    /// Pull the next event. Yields [`HubEvent::Lagged`] first if events were
    /// dropped since the previous pull. Returns an error once the hub is gone
    /// and the queue is drained.
    pub async fn recv(&self) -> Result<HubEvent<E>, channel::RecvError> {
        let missed = self.lagged.swap(0, Ordering::Relaxed);
        if missed > 0 {
            return Ok(HubEvent::Lagged(missed));
        }

        self.rx.recv_async().await.map(HubEvent::Item)
    }

    pub fn is_empty(&self) -> bool {
        self.rx.is_empty()
    }

    pub fn len(&self) -> usize {
        self.rx.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn publish_reaches_every_subscriber() {
        let hub = Hub::new();
        let a = hub.subscribe();
        let b = hub.subscribe();

        hub.publish(7u32);

        tokio_test::block_on(async {
            assert_eq!(a.recv().await.unwrap(), HubEvent::Item(7));
            assert_eq!(b.recv().await.unwrap(), HubEvent::Item(7));
        });
    }

    #[test]
    fn slow_subscriber_lags_without_blocking() {
        let hub = Hub::new();
        let sub = hub.subscribe();

        for i in 0..(SUBSCRIPTION_CAPACITY as u32 + 3) {
            hub.publish(i);
        }

        tokio_test::block_on(async {
            assert_eq!(sub.recv().await.unwrap(), HubEvent::Lagged(3));
            assert_eq!(sub.recv().await.unwrap(), HubEvent::Item(0));
        });
    }

    #[test]
    fn dropped_subscription_is_pruned() {
        let hub = Hub::new();
        let sub = hub.subscribe();
        assert_eq!(hub.subscriber_count(), 1);

        drop(sub);
        hub.publish(0u32);
        assert_eq!(hub.subscriber_count(), 0);
    }
}
