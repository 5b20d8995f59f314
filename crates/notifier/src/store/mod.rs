//! Notification persistence.
//!
//! The store is the only double-processing guard in the system: every status
//! change is a compare-and-swap on the current status, so duplicate or
//! concurrent dispatch attempts lose with `StoreError::Conflict` instead of
//! overwriting each other.

mod memory;
mod postgres;

pub use memory::MemoryNotificationStore;
pub use postgres::PgNotificationStore;

use async_trait::async_trait;

use herald_common::types::{NewNotification, NotificationId, NotificationRecord, NotificationStatus};

use crate::error::StoreError;

#[async_trait]
pub trait NotificationStore: Send + Sync + 'static {
    /// Persist a new record as `queued` with no attempts and return its id.
    async fn insert(&self, notification: NewNotification) -> Result<NotificationId, StoreError>;

    async fn get(&self, id: NotificationId) -> Result<NotificationRecord, StoreError>;

    /// Move `id` from `from` to `to` if it is currently `from`.
    ///
    /// `attempt_count` never decreases: the stored value becomes the larger of
    /// the current and the given count.
    async fn update_status(
        &self,
        id: NotificationId,
        from: NotificationStatus,
        to: NotificationStatus,
        attempt_count: i32,
    ) -> Result<NotificationRecord, StoreError>;

    /// Release the claim made at `claimed_attempts`, moving `sending` to `to`.
    ///
    /// Fails with `Conflict` once the record has left `sending` or has been
    /// reclaimed since (its attempt count moved on), so a worker whose claim
    /// was taken over cannot overwrite the new owner's outcome.
    async fn finish(
        &self,
        id: NotificationId,
        claimed_attempts: i32,
        to: NotificationStatus,
    ) -> Result<NotificationRecord, StoreError>;

    /// Take over a stale `sending` claim.
    ///
    /// Succeeds only while the record is `sending` with exactly
    /// `expected_attempts`; two workers reclaiming the same record cannot both
    /// win.
    async fn reclaim(
        &self,
        id: NotificationId,
        expected_attempts: i32,
        attempt_count: i32,
    ) -> Result<NotificationRecord, StoreError>;

    /// All records for `user_id`, oldest first.
    async fn list_by_user(&self, user_id: i64) -> Result<Vec<NotificationRecord>, StoreError>;
}

fn check_transition(from: NotificationStatus, to: NotificationStatus) -> Result<(), StoreError> {
    if from.can_transition_to(to) {
        Ok(())
    } else {
        Err(StoreError::InvalidTransition { from, to })
    }
}
