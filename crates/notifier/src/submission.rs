//! Submission path: persist, then enqueue.

use std::sync::Arc;
use std::time::Duration;

use herald_common::types::{NewNotification, NotificationId};

use crate::error::SubmitError;
use crate::queue::DispatchQueue;
use crate::store::NotificationStore;

#[derive(Clone)]
pub struct SubmissionService {
    store: Arc<dyn NotificationStore>,
    queue: Arc<dyn DispatchQueue>,
}

impl SubmissionService {
    pub fn new(store: Arc<dyn NotificationStore>, queue: Arc<dyn DispatchQueue>) -> Self {
        Self { store, queue }
    }

    /// Validate, insert as `queued`, and enqueue for immediate dispatch.
    ///
    /// Nothing is enqueued if the insert fails. If the enqueue fails the record
    /// stays `queued` in the store and the error carries its id.
    pub async fn submit(&self, notification: NewNotification) -> Result<NotificationId, SubmitError> {
        notification.validate().map_err(SubmitError::Invalid)?;

        let user_id = notification.user_id;
        let id = self.store.insert(notification).await?;

        if let Err(source) = self.queue.enqueue(id, Duration::ZERO).await {
            tracing::error!(
                notification_id = id,
                error = %source,
                "Notification stored but enqueue failed"
            );
            return Err(SubmitError::Enqueue { id, source });
        }

        tracing::info!(notification_id = id, user_id, "Notification queued");
        Ok(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use herald_common::types::NotificationStatus;

    use crate::clock::ManualClock;
    use crate::error::{QueueError, StoreError};
    use crate::queue::{Lease, MemoryDispatchQueue};
    use crate::store::MemoryNotificationStore;

    struct BrokenQueue;

    #[async_trait]
    impl DispatchQueue for BrokenQueue {
        async fn enqueue(&self, _id: NotificationId, _delay: Duration) -> Result<(), QueueError> {
            Err(QueueError::Unavailable("broker down".to_string()))
        }

        async fn try_dequeue(&self) -> Result<Option<Lease>, QueueError> {
            Ok(None)
        }

        async fn ack(&self, _lease: &Lease) -> Result<(), QueueError> {
            Ok(())
        }

        async fn nack(&self, _lease: &Lease, _delay: Duration) -> Result<(), QueueError> {
            Ok(())
        }
    }

    fn memory_store() -> Arc<MemoryNotificationStore> {
        Arc::new(MemoryNotificationStore::new(Arc::new(ManualClock::default())))
    }

    #[tokio::test]
    async fn test_submit_inserts_and_enqueues() {
        let clock = ManualClock::default();
        let store = memory_store();
        let queue = Arc::new(MemoryDispatchQueue::new(
            Arc::new(clock),
            Duration::from_secs(60),
        ));
        let service = SubmissionService::new(store.clone(), queue.clone());

        let id = service
            .submit(NewNotification::new(1, "email", "hi"))
            .await
            .unwrap();

        assert_eq!(store.get(id).await.unwrap().status, NotificationStatus::Queued);
        assert_eq!(queue.pending_len(), 1);
    }

    #[tokio::test]
    async fn test_invalid_request_touches_nothing() {
        let store = memory_store();
        let service = SubmissionService::new(store.clone(), Arc::new(BrokenQueue));

        let err = service
            .submit(NewNotification::new(1, "", "hi"))
            .await
            .unwrap_err();
        assert!(matches!(err, SubmitError::Invalid(_)));
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_store_failure_skips_enqueue() {
        let store = memory_store();
        store.set_available(false);
        let queue = Arc::new(MemoryDispatchQueue::new(
            Arc::new(ManualClock::default()),
            Duration::from_secs(60),
        ));
        let service = SubmissionService::new(store, queue.clone());

        let err = service
            .submit(NewNotification::new(1, "email", "hi"))
            .await
            .unwrap_err();
        assert!(matches!(err, SubmitError::Store(StoreError::Unavailable(_))));
        assert!(queue.is_idle());
    }

    #[tokio::test]
    async fn test_enqueue_failure_leaves_record_queued() {
        let store = memory_store();
        let service = SubmissionService::new(store.clone(), Arc::new(BrokenQueue));

        let err = service
            .submit(NewNotification::new(1, "email", "hi"))
            .await
            .unwrap_err();
        let SubmitError::Enqueue { id, .. } = err else {
            panic!("expected enqueue failure, got {err:?}");
        };
        assert_eq!(store.get(id).await.unwrap().status, NotificationStatus::Queued);
    }
}
