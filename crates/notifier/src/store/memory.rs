//! In-process store used by tests and single-node development setups.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use parking_lot::RwLock;

use herald_common::types::{NewNotification, NotificationId, NotificationRecord, NotificationStatus};

use super::{NotificationStore, check_transition};
use crate::clock::Clock;
use crate::error::StoreError;

#[derive(Debug, Default)]
struct StoreState {
    next_id: NotificationId,
    records: BTreeMap<NotificationId, NotificationRecord>,
}

/// `RwLock`-guarded map of records.
///
/// `set_available(false)` makes every call fail with
/// `StoreError::Unavailable`, which is how tests simulate an outage.
#[derive(Debug)]
pub struct MemoryNotificationStore {
    state: RwLock<StoreState>,
    available: AtomicBool,
    clock: Arc<dyn Clock>,
}

impl MemoryNotificationStore {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            state: RwLock::new(StoreState::default()),
            available: AtomicBool::new(true),
            clock,
        }
    }

    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    pub fn len(&self) -> usize {
        self.state.read().records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn ensure_available(&self) -> Result<(), StoreError> {
        if self.available.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(StoreError::Unavailable("memory store switched off".to_string()))
        }
    }
}

#[async_trait]
impl NotificationStore for MemoryNotificationStore {
    async fn insert(&self, notification: NewNotification) -> Result<NotificationId, StoreError> {
        self.ensure_available()?;
        let now = self.clock.now();
        let mut state = self.state.write();
        state.next_id += 1;
        let id = state.next_id;
        state.records.insert(
            id,
            NotificationRecord {
                id,
                user_id: notification.user_id,
                kind: notification.kind,
                message: notification.message,
                status: NotificationStatus::Queued,
                attempt_count: 0,
                created_at: now,
                updated_at: now,
            },
        );
        Ok(id)
    }

    async fn get(&self, id: NotificationId) -> Result<NotificationRecord, StoreError> {
        self.ensure_available()?;
        self.state
            .read()
            .records
            .get(&id)
            .cloned()
            .ok_or(StoreError::NotFound(id))
    }

    async fn update_status(
        &self,
        id: NotificationId,
        from: NotificationStatus,
        to: NotificationStatus,
        attempt_count: i32,
    ) -> Result<NotificationRecord, StoreError> {
        self.ensure_available()?;
        check_transition(from, to)?;
        let now = self.clock.now();
        let mut state = self.state.write();
        let record = state.records.get_mut(&id).ok_or(StoreError::NotFound(id))?;

        if record.status != from {
            return Err(StoreError::Conflict {
                id,
                expected: from,
                actual: record.status,
            });
        }

        record.status = to;
        record.attempt_count = record.attempt_count.max(attempt_count);
        record.updated_at = now;
        Ok(record.clone())
    }

    async fn finish(
        &self,
        id: NotificationId,
        claimed_attempts: i32,
        to: NotificationStatus,
    ) -> Result<NotificationRecord, StoreError> {
        self.ensure_available()?;
        check_transition(NotificationStatus::Sending, to)?;
        let now = self.clock.now();
        let mut state = self.state.write();
        let record = state.records.get_mut(&id).ok_or(StoreError::NotFound(id))?;

        if record.status != NotificationStatus::Sending || record.attempt_count != claimed_attempts {
            return Err(StoreError::Conflict {
                id,
                expected: NotificationStatus::Sending,
                actual: record.status,
            });
        }

        record.status = to;
        record.updated_at = now;
        Ok(record.clone())
    }

    async fn reclaim(
        &self,
        id: NotificationId,
        expected_attempts: i32,
        attempt_count: i32,
    ) -> Result<NotificationRecord, StoreError> {
        self.ensure_available()?;
        let now = self.clock.now();
        let mut state = self.state.write();
        let record = state.records.get_mut(&id).ok_or(StoreError::NotFound(id))?;

        if record.status != NotificationStatus::Sending || record.attempt_count != expected_attempts {
            return Err(StoreError::Conflict {
                id,
                expected: NotificationStatus::Sending,
                actual: record.status,
            });
        }

        record.attempt_count = record.attempt_count.max(attempt_count);
        record.updated_at = now;
        Ok(record.clone())
    }

    async fn list_by_user(&self, user_id: i64) -> Result<Vec<NotificationRecord>, StoreError> {
        self.ensure_available()?;
        let mut records: Vec<NotificationRecord> = self
            .state
            .read()
            .records
            .values()
            .filter(|r| r.user_id == user_id)
            .cloned()
            .collect();
        records.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        Ok(records)
    }
}
