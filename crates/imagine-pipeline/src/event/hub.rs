use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use dashmap::DashMap;
use tokio::sync::mpsc;
use tracing::{debug, trace};

use super::{EventKind, StreamEvent};

struct Subscriber {
    kind: EventKind,
    tx: mpsc::UnboundedSender<StreamEvent>,
}

/// Registry of active subscribers on the shared notification stream.
///
/// Registration, removal and fan-out are safe from any number of tasks.
#[derive(Default)]
pub struct EventHub {
    next_id: AtomicU64,
    subscribers: DashMap<u64, Subscriber>,
    closed: AtomicBool,
}

impl EventHub {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Registers a subscriber for one kind of event.
    ///
    /// Subscribing to a closed hub returns a subscription whose receiver is already finished.
    pub fn subscribe(self: &Arc<Self>, kind: EventKind) -> Subscription {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::unbounded_channel();
        if !self.closed.load(Ordering::Acquire) {
            self.subscribers.insert(id, Subscriber { kind, tx });
            // Lost a race with `close`.
            if self.closed.load(Ordering::Acquire) {
                self.subscribers.remove(&id);
            }
        }
        trace!(subscriber = id, ?kind, "subscribed");
        Subscription {
            id,
            kind,
            hub: Arc::clone(self),
            rx,
            active: true,
        }
    }

    /// Delivers an event to every subscriber of its kind and returns the delivery count.
    pub fn publish(&self, kind: EventKind, event: StreamEvent) -> usize {
        let mut delivered = 0;
        let mut dead = Vec::new();
        for entry in self.subscribers.iter() {
            if entry.kind != kind {
                continue;
            }
            if entry.tx.send(event.clone()).is_ok() {
                delivered += 1;
            } else {
                dead.push(*entry.key());
            }
        }
        // Removal must happen after the iterator releases its shard locks.
        for id in dead {
            self.subscribers.remove(&id);
        }
        trace!(message_id = %event.message_id, ?kind, delivered, "published");
        delivered
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.len()
    }

    /// Drops every subscriber; their receivers finish and later subscriptions start closed.
    pub fn close(&self) {
        self.closed.store(true, Ordering::Release);
        let count = self.subscribers.len();
        self.subscribers.clear();
        debug!(count, "event hub closed");
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    fn remove(&self, id: u64) -> bool {
        self.subscribers.remove(&id).is_some()
    }
}

/// Handle for one registered subscriber.
///
/// Unsubscribes on drop; [`Subscription::unsubscribe`] may be called first and is idempotent.
pub struct Subscription {
    id: u64,
    kind: EventKind,
    hub: Arc<EventHub>,
    rx: mpsc::UnboundedReceiver<StreamEvent>,
    active: bool,
}

impl Subscription {
    pub fn kind(&self) -> EventKind {
        self.kind
    }

    /// Next event for this subscriber, or `None` once unsubscribed or the hub is closed.
    pub async fn recv(&mut self) -> Option<StreamEvent> {
        if !self.active {
            return None;
        }
        self.rx.recv().await
    }

    /// Removes the subscriber from the hub. Returns `true` only on the first call.
    pub fn unsubscribe(&mut self) -> bool {
        if !self.active {
            return false;
        }
        self.active = false;
        self.rx.close();
        let removed = self.hub.remove(self.id);
        trace!(subscriber = self.id, kind = ?self.kind, removed, "unsubscribed");
        true
    }

    pub fn is_active(&self) -> bool {
        self.active
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.unsubscribe();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(id: &str) -> StreamEvent {
        StreamEvent {
            message_id: id.into(),
            ..StreamEvent::default()
        }
    }

    #[tokio::test]
    async fn publish_routes_by_kind() {
        let hub = EventHub::new();
        let mut created = hub.subscribe(EventKind::Created);
        let mut updated = hub.subscribe(EventKind::Updated);

        assert_eq!(hub.publish(EventKind::Created, event("a")), 1);
        assert_eq!(hub.publish(EventKind::Updated, event("b")), 1);

        assert_eq!(created.recv().await.expect("created").message_id, "a");
        assert_eq!(updated.recv().await.expect("updated").message_id, "b");
    }

    #[tokio::test]
    async fn unsubscribe_is_idempotent_and_stops_delivery() {
        let hub = EventHub::new();
        let mut sub = hub.subscribe(EventKind::Created);
        assert_eq!(hub.subscriber_count(), 1);

        assert!(sub.unsubscribe());
        assert!(!sub.unsubscribe());
        assert_eq!(hub.subscriber_count(), 0);
        assert_eq!(hub.publish(EventKind::Created, event("late")), 0);
        assert!(sub.recv().await.is_none());
    }

    #[test]
    fn drop_unsubscribes() {
        let hub = EventHub::new();
        {
            let _a = hub.subscribe(EventKind::Created);
            let _b = hub.subscribe(EventKind::Updated);
            assert_eq!(hub.subscriber_count(), 2);
        }
        assert_eq!(hub.subscriber_count(), 0);
    }

    #[tokio::test]
    async fn close_finishes_receivers_and_rejects_new_subscribers() {
        let hub = EventHub::new();
        let mut sub = hub.subscribe(EventKind::Created);
        hub.close();
        assert!(sub.recv().await.is_none());

        let mut late = hub.subscribe(EventKind::Created);
        assert_eq!(hub.subscriber_count(), 0);
        assert!(late.recv().await.is_none());
    }

    #[tokio::test]
    async fn concurrent_registration_is_consistent() {
        let hub = EventHub::new();
        let tasks: Vec<_> = (0..32)
            .map(|i| {
                let hub = Arc::clone(&hub);
                tokio::spawn(async move {
                    let kind = if i % 2 == 0 {
                        EventKind::Created
                    } else {
                        EventKind::Updated
                    };
                    let mut sub = hub.subscribe(kind);
                    tokio::task::yield_now().await;
                    sub.unsubscribe()
                })
            })
            .collect();
        for task in tasks {
            assert!(task.await.expect("join"));
        }
        assert_eq!(hub.subscriber_count(), 0);
    }
}
