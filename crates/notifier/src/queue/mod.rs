//! At-least-once hand-off of notification ids from submission to workers.
//!
//! A dequeued item is leased, not removed: it stays invisible to other
//! workers until it is acked, nacked, or its lease runs out. An expired lease
//! makes the item visible again, which is how a crashed worker's items get
//! picked up by the others. Every lease carries a fresh token; ack/nack with a
//! token that is no longer current are ignored, so a stalled worker cannot
//! release an item another worker now holds.

mod memory;
mod redis;

pub use self::memory::MemoryDispatchQueue;
pub use self::redis::RedisDispatchQueue;

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use herald_common::types::NotificationId;

use crate::error::QueueError;

/// Default lease (visibility) timeout.
pub const DEFAULT_LEASE_TIMEOUT: Duration = Duration::from_secs(60);

/// Default sleep between polls of an empty queue.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(250);

/// A worker's time-bounded claim on one queue item.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Lease {
    pub id: NotificationId,
    pub token: Uuid,
    /// How many times this item has been handed out, this lease included.
    pub deliveries: u32,
    pub expires_at: DateTime<Utc>,
}

impl Lease {
    /// The item was handed out before without being acked or nacked.
    pub fn is_redelivery(&self) -> bool {
        self.deliveries > 1
    }
}

#[async_trait]
pub trait DispatchQueue: Send + Sync + 'static {
    /// Make `id` visible after `delay`.
    ///
    /// An item that is already pending keeps its earlier visibility time; an
    /// item that is currently leased is left to its lease.
    async fn enqueue(&self, id: NotificationId, delay: Duration) -> Result<(), QueueError>;

    /// Lease the next visible item, if any.
    async fn try_dequeue(&self) -> Result<Option<Lease>, QueueError>;

    /// Remove the leased item permanently.
    async fn ack(&self, lease: &Lease) -> Result<(), QueueError>;

    /// Release the lease and make the item visible again after `delay`.
    async fn nack(&self, lease: &Lease, delay: Duration) -> Result<(), QueueError>;

    fn poll_interval(&self) -> Duration {
        DEFAULT_POLL_INTERVAL
    }

    /// Wait until an item is visible and lease it.
    async fn dequeue(&self) -> Result<Lease, QueueError> {
        loop {
            if let Some(lease) = self.try_dequeue().await? {
                return Ok(lease);
            }
            tokio::time::sleep(self.poll_interval()).await;
        }
    }
}
