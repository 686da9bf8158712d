//! C8 — Event Bus implementation.
//!
//! Deliberately not built on `tokio::broadcast`: that channel conflates
//! "subscriber missed events" (`Lagged`) with replay semantics, and gives no
//! per-subscriber buffer-size control. Here, each subscriber gets its own
//! bounded `mpsc` channel; a single `Mutex`-guarded ring holds recent events
//! for late-join replay; an `RwLock` guards the subscriber map so publishers
//! take only a read lock for fan-out.

use std::collections::HashMap;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use paasdeploy_core::event::{Event, EventPayload};
use paasdeploy_core::eventbus::{EventBus, SubscriberId, DEFAULT_RING_SIZE, SUBSCRIBER_BUFFER};
use tokio::sync::{mpsc, Mutex, RwLock};
use tracing::debug;

struct Subscriber {
    tx: mpsc::Sender<Event>,
}

/// The production `EventBus`. Cheap to clone (wraps an `Arc` internally via
/// `BoxEventBus` at the call site); constructed once per process.
pub struct InProcessEventBus {
    ring_size: usize,
    subscriber_buffer: usize,
    sequence: AtomicU64,
    next_subscriber_id: AtomicU64,
    ring: Mutex<VecDeque<Event>>,
    subscribers: RwLock<HashMap<SubscriberId, Subscriber>>,
}

impl InProcessEventBus {
    pub fn new(ring_size: usize) -> Self {
        Self {
            ring_size,
            subscriber_buffer: SUBSCRIBER_BUFFER,
            sequence: AtomicU64::new(0),
            next_subscriber_id: AtomicU64::new(0),
            ring: Mutex::new(VecDeque::with_capacity(ring_size)),
            subscribers: RwLock::new(HashMap::new()),
        }
    }
}

impl Default for InProcessEventBus {
    fn default() -> Self {
        Self::new(DEFAULT_RING_SIZE)
    }
}

#[async_trait]
impl EventBus for InProcessEventBus {
    async fn publish(&self, payload: EventPayload) {
        let event = Event {
            sequence: self.sequence.fetch_add(1, Ordering::SeqCst),
            timestamp: Utc::now(),
            payload,
        };

        {
            let mut ring = self.ring.lock().await;
            if ring.len() == self.ring_size {
                ring.pop_front();
            }
            ring.push_back(event.clone());
        }

        let subscribers = self.subscribers.read().await;
        for subscriber in subscribers.values() {
            // Non-blocking: a full channel drops this event for that
            // subscriber only. `publish` never awaits a slow subscriber.
            if let Err(mpsc::error::TrySendError::Full(_)) = subscriber.tx.try_send(event.clone())
            {
                debug!("subscriber channel full, dropping event");
            }
        }
    }

    async fn subscribe(&self) -> (SubscriberId, mpsc::Receiver<Event>) {
        let id = SubscriberId(self.next_subscriber_id.fetch_add(1, Ordering::SeqCst));
        let (tx, rx) = mpsc::channel(self.subscriber_buffer);

        {
            let ring = self.ring.lock().await;
            for event in ring.iter() {
                let _ = tx.try_send(event.clone());
            }
        }

        self.subscribers.write().await.insert(id, Subscriber { tx });
        (id, rx)
    }

    async fn unsubscribe(&self, id: SubscriberId) {
        self.subscribers.write().await.remove(&id);
    }
}

pub fn new_bus(ring_size: usize) -> Arc<dyn EventBus> {
    Arc::new(InProcessEventBus::new(ring_size))
}

#[cfg(test)]
mod tests {
    use super::*;
    use paasdeploy_core::id::ResourceId;

    fn running_payload() -> EventPayload {
        EventPayload::Running {
            deployment_id: ResourceId::new(),
            application_id: ResourceId::new(),
        }
    }

    #[tokio::test]
    async fn subscriber_receives_published_event() {
        let bus = InProcessEventBus::new(10);
        let (_id, mut rx) = bus.subscribe().await;
        bus.publish(running_payload()).await;
        let event = rx.recv().await.unwrap();
        assert_eq!(event.sequence, 0);
    }

    #[tokio::test]
    async fn late_subscriber_replays_ring_in_order() {
        let bus = InProcessEventBus::new(10);
        for _ in 0..5 {
            bus.publish(running_payload()).await;
        }
        let (_id, mut rx) = bus.subscribe().await;
        let mut seqs = Vec::new();
        while let Ok(event) = rx.try_recv() {
            seqs.push(event.sequence);
        }
        assert_eq!(seqs, vec![0, 1, 2, 3, 4]);
    }

    #[tokio::test]
    async fn ring_is_bounded() {
        let bus = InProcessEventBus::new(3);
        for _ in 0..10 {
            bus.publish(running_payload()).await;
        }
        let (_id, mut rx) = bus.subscribe().await;
        let mut seqs = Vec::new();
        while let Ok(event) = rx.try_recv() {
            seqs.push(event.sequence);
        }
        assert_eq!(seqs, vec![7, 8, 9]);
    }

    #[tokio::test]
    async fn slow_subscriber_drops_without_blocking_publisher() {
        let bus = InProcessEventBus::new(10);
        let (id, _rx) = bus.subscribe().await; // never reads

        for _ in 0..(SUBSCRIBER_BUFFER as u64 + 50) {
            bus.publish(running_payload()).await;
        }

        bus.unsubscribe(id).await;
        assert!(bus.subscribers.read().await.is_empty());
    }

    #[tokio::test]
    async fn unsubscribe_is_idempotent() {
        let bus = InProcessEventBus::new(10);
        let (id, _rx) = bus.subscribe().await;
        bus.unsubscribe(id).await;
        bus.unsubscribe(id).await;
    }
}
