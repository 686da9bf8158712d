//! C8 — Event Bus: one-to-many, in-process, non-blocking dispatch. See
//! the redesign note: this is an explicit channel + bounded ring +
//! writer/reader lock contract, not a background-goroutine/shared-map affair.

use async_trait::async_trait;

use crate::error::Result;
use crate::event::{Event, EventPayload};

/// Default bounded per-subscriber channel capacity.
pub const SUBSCRIBER_BUFFER: usize = 100;
/// Default replay ring size.
pub const DEFAULT_RING_SIZE: usize = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriberId(pub u64);

#[async_trait]
pub trait EventBus: Send + Sync {
    /// Stamps `timestamp = now` and a fresh sequence number, appends to the
    /// replay ring, then attempts a non-blocking send to every subscriber.
    /// A full subscriber channel drops that event for that subscriber only;
    /// `publish` itself never blocks or fails on a slow subscriber.
    async fn publish(&self, payload: EventPayload);

    /// Allocates a new subscriber channel and immediately replays the ring's
    /// current contents into it (best-effort; subject to the same
    /// drop-on-full rule as live events).
    async fn subscribe(&self) -> (SubscriberId, tokio::sync::mpsc::Receiver<Event>);

    /// Idempotent.
    async fn unsubscribe(&self, id: SubscriberId);
}

pub type BoxEventBus = std::sync::Arc<dyn EventBus>;

/// Not part of the trait object surface, but used by callers that want
/// `Result`-returning publish sites to read naturally; publish itself cannot
/// fail so this just documents that contract at call sites.
pub type PublishResult = Result<()>;
