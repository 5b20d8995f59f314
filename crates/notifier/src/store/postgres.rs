//! PostgreSQL-backed store.
//!
//! Conditional updates are single `UPDATE ... WHERE status = $from` statements;
//! when no row matches, a follow-up read tells `NotFound` and `Conflict` apart.

use std::sync::Arc;

use async_trait::async_trait;
use sqlx::PgPool;

use herald_common::types::{NewNotification, NotificationId, NotificationRecord, NotificationStatus};

use super::{NotificationStore, check_transition};
use crate::clock::Clock;
use crate::error::StoreError;

pub struct PgNotificationStore {
    pool: PgPool,
    clock: Arc<dyn Clock>,
}

impl PgNotificationStore {
    pub fn new(pool: PgPool, clock: Arc<dyn Clock>) -> Self {
        Self { pool, clock }
    }

    /// Explain why a conditional update matched no row.
    async fn miss(
        &self,
        id: NotificationId,
        expected: NotificationStatus,
    ) -> Result<NotificationRecord, StoreError> {
        let actual: Option<NotificationStatus> =
            sqlx::query_scalar("SELECT status FROM notifications WHERE id = $1")
                .bind(id)
                .fetch_optional(&self.pool)
                .await?;

        match actual {
            Some(actual) => Err(StoreError::Conflict {
                id,
                expected,
                actual,
            }),
            None => Err(StoreError::NotFound(id)),
        }
    }
}

#[async_trait]
impl NotificationStore for PgNotificationStore {
    async fn insert(&self, notification: NewNotification) -> Result<NotificationId, StoreError> {
        let now = self.clock.now();
        let id: NotificationId = sqlx::query_scalar(
            r#"
            INSERT INTO notifications (user_id, type, message, status, attempt_count, created_at, updated_at)
            VALUES ($1, $2, $3, $4, 0, $5, $5)
            RETURNING id
            "#,
        )
        .bind(notification.user_id)
        .bind(&notification.kind)
        .bind(&notification.message)
        .bind(NotificationStatus::Queued)
        .bind(now)
        .fetch_one(&self.pool)
        .await?;

        tracing::debug!(notification_id = id, user_id = notification.user_id, "Notification stored");
        Ok(id)
    }

    async fn get(&self, id: NotificationId) -> Result<NotificationRecord, StoreError> {
        sqlx::query_as::<_, NotificationRecord>("SELECT * FROM notifications WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or(StoreError::NotFound(id))
    }

    async fn update_status(
        &self,
        id: NotificationId,
        from: NotificationStatus,
        to: NotificationStatus,
        attempt_count: i32,
    ) -> Result<NotificationRecord, StoreError> {
        check_transition(from, to)?;

        let updated = sqlx::query_as::<_, NotificationRecord>(
            r#"
            UPDATE notifications
            SET status = $3,
                attempt_count = GREATEST(attempt_count, $4),
                updated_at = $5
            WHERE id = $1 AND status = $2
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(from)
        .bind(to)
        .bind(attempt_count)
        .bind(self.clock.now())
        .fetch_optional(&self.pool)
        .await?;

        match updated {
            Some(record) => Ok(record),
            None => self.miss(id, from).await,
        }
    }

    async fn finish(
        &self,
        id: NotificationId,
        claimed_attempts: i32,
        to: NotificationStatus,
    ) -> Result<NotificationRecord, StoreError> {
        check_transition(NotificationStatus::Sending, to)?;

        let updated = sqlx::query_as::<_, NotificationRecord>(
            r#"
            UPDATE notifications
            SET status = $3,
                updated_at = $4
            WHERE id = $1 AND status = $5 AND attempt_count = $2
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(claimed_attempts)
        .bind(to)
        .bind(self.clock.now())
        .bind(NotificationStatus::Sending)
        .fetch_optional(&self.pool)
        .await?;

        match updated {
            Some(record) => Ok(record),
            None => self.miss(id, NotificationStatus::Sending).await,
        }
    }

    async fn reclaim(
        &self,
        id: NotificationId,
        expected_attempts: i32,
        attempt_count: i32,
    ) -> Result<NotificationRecord, StoreError> {
        let updated = sqlx::query_as::<_, NotificationRecord>(
            r#"
            UPDATE notifications
            SET attempt_count = GREATEST(attempt_count, $3),
                updated_at = $4
            WHERE id = $1 AND status = $5 AND attempt_count = $2
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(expected_attempts)
        .bind(attempt_count)
        .bind(self.clock.now())
        .bind(NotificationStatus::Sending)
        .fetch_optional(&self.pool)
        .await?;

        match updated {
            Some(record) => Ok(record),
            None => self.miss(id, NotificationStatus::Sending).await,
        }
    }

    async fn list_by_user(&self, user_id: i64) -> Result<Vec<NotificationRecord>, StoreError> {
        let records = sqlx::query_as::<_, NotificationRecord>(
            "SELECT * FROM notifications WHERE user_id = $1 ORDER BY created_at ASC, id ASC",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(records)
    }
}
