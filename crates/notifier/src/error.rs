//! Error types for the dispatch subsystem.
//!
//! Store and queue errors are infrastructure failures: they end the current
//! cycle and are never retried by the dispatcher itself. Delivery errors are
//! absorbed by the retry policy and never reach a caller.

use std::time::Duration;

use thiserror::Error;

use herald_common::error::AppError;
use herald_common::types::{NotificationId, NotificationStatus};

/// Errors returned by a `NotificationStore`.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("notification {0} not found")]
    NotFound(NotificationId),

    /// The conditional update's precondition did not hold.
    #[error("notification {id} is {actual}, expected {expected}")]
    Conflict {
        id: NotificationId,
        expected: NotificationStatus,
        actual: NotificationStatus,
    },

    #[error("illegal status transition {from} -> {to}")]
    InvalidTransition {
        from: NotificationStatus,
        to: NotificationStatus,
    },

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("storage unavailable: {0}")]
    Unavailable(String),
}

impl StoreError {
    pub fn is_conflict(&self) -> bool {
        matches!(self, StoreError::Conflict { .. })
    }
}

/// Errors returned by a `DispatchQueue`.
#[derive(Debug, Error)]
pub enum QueueError {
    #[error("redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("malformed queue entry: {0}")]
    Malformed(String),

    #[error("queue unavailable: {0}")]
    Unavailable(String),
}

/// Failure of the external delivery call.
#[derive(Debug, Clone, Error)]
pub enum DeliveryError {
    #[error("delivery failed: {0}")]
    Failed(String),

    #[error("delivery timed out after {0:?}")]
    Timeout(Duration),

    #[error("delivery endpoint rejected notification: HTTP {status}")]
    Rejected { status: u16 },
}

/// Infrastructure failure that aborts one dispatch cycle.
#[derive(Debug, Error)]
pub enum DispatchError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Queue(#[from] QueueError),
}

/// Errors from the submission path.
#[derive(Debug, Error)]
pub enum SubmitError {
    #[error("invalid notification: {0}")]
    Invalid(String),

    /// Nothing was persisted; nothing was enqueued.
    #[error("failed to store notification: {0}")]
    Store(#[from] StoreError),

    /// The record exists with status `queued` but is not in the queue.
    #[error("notification {id} stored but not enqueued: {source}")]
    Enqueue {
        id: NotificationId,
        #[source]
        source: QueueError,
    },
}

impl From<StoreError> for AppError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound(id) => AppError::NotFound(format!("Notification {} not found", id)),
            StoreError::Conflict { .. } | StoreError::InvalidTransition { .. } => {
                AppError::Conflict(err.to_string())
            }
            StoreError::Database(e) => AppError::Database(e),
            StoreError::Unavailable(msg) => AppError::Unavailable(msg),
        }
    }
}

impl From<SubmitError> for AppError {
    fn from(err: SubmitError) -> Self {
        match err {
            SubmitError::Invalid(msg) => AppError::Validation(msg),
            SubmitError::Store(e) => e.into(),
            SubmitError::Enqueue { .. } => AppError::Unavailable(err.to_string()),
        }
    }
}
