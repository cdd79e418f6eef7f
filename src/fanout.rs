//! In-memory publish/subscribe fanout.
//!
//! Topics are task ids; the wildcard topic `"*"` receives every event.
//! Delivery is non-blocking: each subscriber owns a bounded buffer and a
//! full buffer drops the event for that subscriber only. Drops never
//! reorder the events that do get through.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

use tokio::sync::mpsc;

use crate::event::{Event, WILDCARD_TOPIC};

/// Default per-subscriber buffer capacity.
pub const DEFAULT_BUFFER_CAPACITY: usize = 100;

struct SubscriberSlot {
    id: u64,
    tx: mpsc::Sender<Event>,
    dropped: Arc<AtomicU64>,
}

#[derive(Default)]
struct FanoutInner {
    closed: bool,
    next_id: u64,
    topics: HashMap<String, Vec<SubscriberSlot>>,
}

/// Per-topic fanout with bounded, non-blocking delivery.
///
/// The subscriber table sits behind a reader-writer lock: `publish` takes
/// the read side, `subscribe`/`unsubscribe`/`close` take the write side.
pub struct Fanout {
    inner: RwLock<FanoutInner>,
    capacity: usize,
}

impl Fanout {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_BUFFER_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            inner: RwLock::new(FanoutInner::default()),
            capacity: capacity.max(1),
        }
    }

    /// Register a subscriber for a task id or the wildcard topic.
    ///
    /// After `close`, the returned subscription is already closed: `recv`
    /// yields `None` immediately.
    pub fn subscribe(&self, topic: &str) -> Subscription {
        let (tx, rx) = mpsc::channel(self.capacity);
        let dropped = Arc::new(AtomicU64::new(0));

        let mut inner = self.inner.write().expect("fanout lock poisoned");
        if inner.closed {
            // Dropping the sender here hands back a dead channel.
            return Subscription {
                topic: topic.to_string(),
                id: 0,
                rx,
                dropped,
            };
        }
        inner.next_id += 1;
        let id = inner.next_id;
        inner.topics.entry(topic.to_string()).or_default().push(SubscriberSlot {
            id,
            tx,
            dropped: Arc::clone(&dropped),
        });
        Subscription {
            topic: topic.to_string(),
            id,
            rx,
            dropped,
        }
    }

    /// Remove a subscriber; its delivery channel closes and further
    /// publishes ignore it.
    pub fn unsubscribe(&self, subscription: &Subscription) {
        let mut inner = self.inner.write().expect("fanout lock poisoned");
        let now_empty = match inner.topics.get_mut(&subscription.topic) {
            Some(slots) => {
                slots.retain(|s| s.id != subscription.id);
                slots.is_empty()
            }
            None => false,
        };
        if now_empty {
            inner.topics.remove(&subscription.topic);
        }
    }

    /// Deliver to every subscriber of `event.task_id` and every wildcard
    /// subscriber. Completes in bounded time regardless of subscriber
    /// count or buffer fullness.
    pub fn publish(&self, event: &Event) {
        let inner = self.inner.read().expect("fanout lock poisoned");
        if inner.closed {
            return;
        }
        if let Some(slots) = inner.topics.get(&event.task_id) {
            for slot in slots {
                deliver(slot, event);
            }
        }
        if event.task_id != WILDCARD_TOPIC
            && let Some(slots) = inner.topics.get(WILDCARD_TOPIC)
        {
            for slot in slots {
                deliver(slot, event);
            }
        }
    }

    /// Close every delivery channel. Idempotent; later `subscribe` calls
    /// return an already-closed channel and later `publish` calls are
    /// no-ops.
    pub fn close(&self) {
        let mut inner = self.inner.write().expect("fanout lock poisoned");
        inner.closed = true;
        inner.topics.clear();
    }

    pub fn is_closed(&self) -> bool {
        self.inner.read().expect("fanout lock poisoned").closed
    }

    /// Number of live subscribers across all topics.
    pub fn subscriber_count(&self) -> usize {
        let inner = self.inner.read().expect("fanout lock poisoned");
        inner.topics.values().map(Vec::len).sum()
    }
}

impl Default for Fanout {
    fn default() -> Self {
        Self::new()
    }
}

fn deliver(slot: &SubscriberSlot, event: &Event) {
    if slot.tx.try_send(event.clone()).is_err() {
        // Buffer full or receiver gone. The event is dropped for this
        // subscriber only.
        slot.dropped.fetch_add(1, Ordering::Relaxed);
    }
}

/// Read end of a fanout subscription.
pub struct Subscription {
    topic: String,
    id: u64,
    rx: mpsc::Receiver<Event>,
    dropped: Arc<AtomicU64>,
}

impl Subscription {
    pub async fn recv(&mut self) -> Option<Event> {
        self.rx.recv().await
    }

    pub fn try_recv(&mut self) -> Option<Event> {
        self.rx.try_recv().ok()
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// Events dropped for this subscriber because its buffer was full.
    pub fn dropped_count(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::EventPayload;

    fn task_event(task_id: &str) -> Event {
        Event::new(task_id, EventPayload::TaskUpdated { id: task_id.into() })
    }

    fn session_event() -> Event {
        Event::session_update(EventPayload::SessionUpdate {
            duration_seconds: 5,
            total_tokens: 100,
            cost_usd: 0.01,
            input: 60,
            output: 40,
            tasks_running: 1,
            is_paused: false,
        })
    }

    #[tokio::test]
    async fn delivers_to_topic_subscribers() {
        let fanout = Fanout::new();
        let mut sub = fanout.subscribe("TASK-001");
        fanout.publish(&task_event("TASK-001"));
        let event = sub.recv().await.unwrap();
        assert_eq!(event.task_id, "TASK-001");
    }

    #[tokio::test]
    async fn wildcard_receives_everything_task_topic_does_not() {
        let fanout = Fanout::new();
        let mut wildcard = fanout.subscribe(WILDCARD_TOPIC);
        let mut task_sub = fanout.subscribe("TASK-001");

        fanout.publish(&session_event());
        fanout.publish(&task_event("TASK-002"));

        assert_eq!(wildcard.recv().await.unwrap().event_type(), "session_update");
        assert_eq!(wildcard.recv().await.unwrap().task_id, "TASK-002");
        // The task-specific subscriber saw neither.
        assert!(task_sub.try_recv().is_none());
    }

    #[tokio::test]
    async fn task_event_reaches_both_task_and_wildcard_subscribers() {
        let fanout = Fanout::new();
        let mut wildcard = fanout.subscribe(WILDCARD_TOPIC);
        let mut task_sub = fanout.subscribe("TASK-001");

        fanout.publish(&task_event("TASK-001"));

        assert_eq!(task_sub.recv().await.unwrap().task_id, "TASK-001");
        assert_eq!(wildcard.recv().await.unwrap().task_id, "TASK-001");
    }

    #[tokio::test]
    async fn full_buffer_drops_for_that_subscriber_only() {
        let fanout = Fanout::with_capacity(1);
        let mut slow = fanout.subscribe("TASK-001");
        let mut fast = fanout.subscribe("TASK-001");

        fanout.publish(&task_event("TASK-001"));
        // Drain only the fast subscriber, then publish again: slow's
        // single-slot buffer is still full.
        assert!(fast.recv().await.is_some());
        fanout.publish(&task_event("TASK-001"));

        assert!(fast.try_recv().is_some());
        assert_eq!(slow.dropped_count(), 1);
        assert_eq!(fast.dropped_count(), 0);
        // The first event is still waiting for the slow subscriber.
        assert!(slow.try_recv().is_some());
        assert!(slow.try_recv().is_none());
    }

    #[tokio::test]
    async fn publish_preserves_order_per_subscriber() {
        let fanout = Fanout::new();
        let mut sub = fanout.subscribe(WILDCARD_TOPIC);
        for i in 0..10 {
            fanout.publish(&task_event(&format!("TASK-{i:03}")));
        }
        for i in 0..10 {
            let event = sub.recv().await.unwrap();
            assert_eq!(event.task_id, format!("TASK-{i:03}"));
        }
    }

    #[tokio::test]
    async fn unsubscribe_closes_channel_and_stops_delivery() {
        let fanout = Fanout::new();
        let sub = fanout.subscribe("TASK-001");
        assert_eq!(fanout.subscriber_count(), 1);
        fanout.unsubscribe(&sub);
        assert_eq!(fanout.subscriber_count(), 0);
        // Publishing afterwards must not panic or deliver.
        fanout.publish(&task_event("TASK-001"));
        let mut sub = sub;
        assert!(sub.recv().await.is_none());
    }

    #[tokio::test]
    async fn close_is_idempotent_and_kills_subscribers() {
        let fanout = Fanout::new();
        let mut sub = fanout.subscribe("TASK-001");
        fanout.close();
        fanout.close();
        fanout.close();
        assert!(fanout.is_closed());
        assert!(sub.recv().await.is_none());

        // Subscribe after close: already-closed channel.
        let mut late = fanout.subscribe("TASK-001");
        assert!(late.recv().await.is_none());

        // Publish after close: no-op.
        fanout.publish(&task_event("TASK-001"));
    }
}
