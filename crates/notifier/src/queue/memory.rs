//! In-process dispatch queue.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tokio::sync::Notify;
use uuid::Uuid;

use herald_common::types::NotificationId;

use super::{DEFAULT_POLL_INTERVAL, DispatchQueue, Lease};
use crate::clock::{Clock, add_duration};
use crate::error::QueueError;

#[derive(Debug, Clone, Copy)]
struct LeaseSlot {
    token: Uuid,
    expires_at: DateTime<Utc>,
}

#[derive(Debug, Default)]
struct QueueState {
    /// Pending items and the instant they become visible.
    pending: HashMap<NotificationId, DateTime<Utc>>,
    leased: HashMap<NotificationId, LeaseSlot>,
    deliveries: HashMap<NotificationId, u32>,
}

impl QueueState {
    fn make_pending(&mut self, id: NotificationId, visible_at: DateTime<Utc>) {
        self.pending
            .entry(id)
            .and_modify(|at| *at = (*at).min(visible_at))
            .or_insert(visible_at);
    }

    /// Return expired leases to the pending set, visible from their expiry.
    fn expire_leases(&mut self, now: DateTime<Utc>) {
        let expired: Vec<(NotificationId, DateTime<Utc>)> = self
            .leased
            .iter()
            .filter(|(_, slot)| slot.expires_at <= now)
            .map(|(id, slot)| (*id, slot.expires_at))
            .collect();

        for (id, expires_at) in expired {
            self.leased.remove(&id);
            self.make_pending(id, expires_at);
            tracing::debug!(notification_id = id, "Lease expired, item visible again");
        }
    }

    fn holds(&self, lease: &Lease) -> bool {
        self.leased
            .get(&lease.id)
            .is_some_and(|slot| slot.token == lease.token)
    }
}

/// Mutex-guarded queue with `Notify` wake-ups for blocked dequeuers.
#[derive(Debug)]
pub struct MemoryDispatchQueue {
    state: Mutex<QueueState>,
    notify: Notify,
    clock: Arc<dyn Clock>,
    lease_timeout: Duration,
    poll_interval: Duration,
}

impl MemoryDispatchQueue {
    pub fn new(clock: Arc<dyn Clock>, lease_timeout: Duration) -> Self {
        Self {
            state: Mutex::new(QueueState::default()),
            notify: Notify::new(),
            clock,
            lease_timeout,
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    /// Items waiting for visibility or already visible.
    pub fn pending_len(&self) -> usize {
        self.state.lock().pending.len()
    }

    /// Items currently held under a lease (expired or not).
    pub fn leased_len(&self) -> usize {
        self.state.lock().leased.len()
    }

    pub fn is_idle(&self) -> bool {
        let state = self.state.lock();
        state.pending.is_empty() && state.leased.is_empty()
    }

    /// When `id` becomes visible, if it is pending.
    pub fn visible_at(&self, id: NotificationId) -> Option<DateTime<Utc>> {
        self.state.lock().pending.get(&id).copied()
    }
}

#[async_trait]
impl DispatchQueue for MemoryDispatchQueue {
    async fn enqueue(&self, id: NotificationId, delay: Duration) -> Result<(), QueueError> {
        let visible_at = add_duration(self.clock.now(), delay);
        {
            let mut state = self.state.lock();
            if state.leased.contains_key(&id) {
                tracing::debug!(notification_id = id, "Enqueue collapsed into live lease");
                return Ok(());
            }
            state.make_pending(id, visible_at);
        }
        self.notify.notify_waiters();
        Ok(())
    }

    async fn try_dequeue(&self) -> Result<Option<Lease>, QueueError> {
        let now = self.clock.now();
        let mut state = self.state.lock();
        state.expire_leases(now);

        let next = state
            .pending
            .iter()
            .filter(|(_, visible_at)| **visible_at <= now)
            .min_by_key(|(id, visible_at)| (**visible_at, **id))
            .map(|(id, _)| *id);

        let Some(id) = next else {
            return Ok(None);
        };

        state.pending.remove(&id);
        let deliveries = {
            let count = state.deliveries.entry(id).or_insert(0);
            *count += 1;
            *count
        };
        let slot = LeaseSlot {
            token: Uuid::new_v4(),
            expires_at: add_duration(now, self.lease_timeout),
        };
        state.leased.insert(id, slot);

        Ok(Some(Lease {
            id,
            token: slot.token,
            deliveries,
            expires_at: slot.expires_at,
        }))
    }

    async fn ack(&self, lease: &Lease) -> Result<(), QueueError> {
        let mut state = self.state.lock();
        if !state.holds(lease) {
            tracing::debug!(notification_id = lease.id, "Ignoring ack for stale lease");
            return Ok(());
        }
        state.leased.remove(&lease.id);
        state.deliveries.remove(&lease.id);
        Ok(())
    }

    async fn nack(&self, lease: &Lease, delay: Duration) -> Result<(), QueueError> {
        let visible_at = add_duration(self.clock.now(), delay);
        {
            let mut state = self.state.lock();
            if !state.holds(lease) {
                tracing::debug!(notification_id = lease.id, "Ignoring nack for stale lease");
                return Ok(());
            }
            state.leased.remove(&lease.id);
            state.make_pending(lease.id, visible_at);
        }
        self.notify.notify_waiters();
        Ok(())
    }

    fn poll_interval(&self) -> Duration {
        self.poll_interval
    }

    async fn dequeue(&self) -> Result<Lease, QueueError> {
        loop {
            let notified = self.notify.notified();
            if let Some(lease) = self.try_dequeue().await? {
                return Ok(lease);
            }
            tokio::select! {
                () = notified => {}
                () = tokio::time::sleep(self.poll_interval) => {}
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;

    fn queue() -> (MemoryDispatchQueue, ManualClock) {
        let clock = ManualClock::default();
        let queue = MemoryDispatchQueue::new(Arc::new(clock.clone()), Duration::from_secs(60));
        (queue, clock)
    }

    #[tokio::test]
    async fn test_immediate_enqueue_is_visible() {
        let (queue, _) = queue();
        queue.enqueue(7, Duration::ZERO).await.unwrap();
        let lease = queue.try_dequeue().await.unwrap().unwrap();
        assert_eq!(lease.id, 7);
        assert_eq!(lease.deliveries, 1);
        assert!(!lease.is_redelivery());
    }

    #[tokio::test]
    async fn test_delay_is_honored() {
        let (queue, clock) = queue();
        queue.enqueue(1, Duration::from_secs(2)).await.unwrap();
        assert!(queue.try_dequeue().await.unwrap().is_none());

        clock.advance(Duration::from_secs(2));
        assert_eq!(queue.try_dequeue().await.unwrap().unwrap().id, 1);
    }

    #[tokio::test]
    async fn test_leased_item_is_invisible_to_second_dequeue() {
        let (queue, _) = queue();
        queue.enqueue(1, Duration::ZERO).await.unwrap();
        let _lease = queue.try_dequeue().await.unwrap().unwrap();
        assert!(queue.try_dequeue().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_expired_lease_is_redelivered() {
        let (queue, clock) = queue();
        queue.enqueue(1, Duration::ZERO).await.unwrap();
        let first = queue.try_dequeue().await.unwrap().unwrap();

        clock.advance(Duration::from_secs(60));
        let second = queue.try_dequeue().await.unwrap().unwrap();
        assert_eq!(second.id, 1);
        assert_eq!(second.deliveries, 2);
        assert!(second.is_redelivery());
        assert_ne!(first.token, second.token);
    }

    #[tokio::test]
    async fn test_stale_ack_does_not_remove_new_lease() {
        let (queue, clock) = queue();
        queue.enqueue(1, Duration::ZERO).await.unwrap();
        let stale = queue.try_dequeue().await.unwrap().unwrap();
        clock.advance(Duration::from_secs(61));
        let current = queue.try_dequeue().await.unwrap().unwrap();

        queue.ack(&stale).await.unwrap();
        assert_eq!(queue.leased_len(), 1);

        queue.ack(&current).await.unwrap();
        assert!(queue.is_idle());
    }

    #[tokio::test]
    async fn test_nack_requeues_with_delay() {
        let (queue, clock) = queue();
        queue.enqueue(1, Duration::ZERO).await.unwrap();
        let lease = queue.try_dequeue().await.unwrap().unwrap();

        queue.nack(&lease, Duration::from_secs(4)).await.unwrap();
        assert_eq!(queue.leased_len(), 0);
        assert!(queue.try_dequeue().await.unwrap().is_none());

        clock.advance(Duration::from_secs(4));
        let again = queue.try_dequeue().await.unwrap().unwrap();
        assert_eq!(again.deliveries, 2);
    }

    #[tokio::test]
    async fn test_enqueue_while_leased_collapses() {
        let (queue, _) = queue();
        queue.enqueue(1, Duration::ZERO).await.unwrap();
        let lease = queue.try_dequeue().await.unwrap().unwrap();

        queue.enqueue(1, Duration::ZERO).await.unwrap();
        assert_eq!(queue.pending_len(), 0);

        queue.ack(&lease).await.unwrap();
        assert!(queue.is_idle());
    }

    #[tokio::test]
    async fn test_duplicate_enqueue_keeps_earliest_visibility() {
        let (queue, clock) = queue();
        queue.enqueue(1, Duration::from_secs(10)).await.unwrap();
        queue.enqueue(1, Duration::from_secs(2)).await.unwrap();
        assert_eq!(queue.pending_len(), 1);

        clock.advance(Duration::from_secs(2));
        assert!(queue.try_dequeue().await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_dequeue_wakes_on_enqueue() {
        let queue = Arc::new(
            MemoryDispatchQueue::new(Arc::new(crate::clock::SystemClock), Duration::from_secs(60))
                .with_poll_interval(Duration::from_secs(30)),
        );
        let waiter = {
            let queue = queue.clone();
            tokio::spawn(async move { queue.dequeue().await })
        };
        tokio::task::yield_now().await;
        queue.enqueue(9, Duration::ZERO).await.unwrap();

        let lease = tokio::time::timeout(Duration::from_secs(5), waiter)
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        assert_eq!(lease.id, 9);
    }
}
