use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Store-assigned notification identifier.
pub type NotificationId = i64;

/// Upper bound on the `type` tag length accepted at submission.
pub const MAX_TYPE_LEN: usize = 64;

/// Notification delivery status.
///
/// Legal edges:
/// - `queued → sending` (a worker claims the record)
/// - `sending → sent | failed` (terminal)
/// - `sending → queued` (retry pending; the record waits in the queue under backoff)
/// - `queued → failed` (a queued record with no attempts left)
///
/// Taking over a stale `sending` claim is not an edge here; it goes through
/// the store's attempt-guarded `reclaim`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "lowercase")]
#[sqlx(type_name = "text", rename_all = "lowercase")]
pub enum NotificationStatus {
    Queued,
    Sending,
    Sent,
    Failed,
}

impl NotificationStatus {
    /// `sent` and `failed` are never left.
    pub fn is_terminal(self) -> bool {
        matches!(self, NotificationStatus::Sent | NotificationStatus::Failed)
    }

    pub fn can_transition_to(self, next: NotificationStatus) -> bool {
        use NotificationStatus::*;
        matches!(
            (self, next),
            (Queued, Sending) | (Queued, Failed) | (Sending, Sent) | (Sending, Failed) | (Sending, Queued)
        )
    }
}

impl std::fmt::Display for NotificationStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            NotificationStatus::Queued => write!(f, "queued"),
            NotificationStatus::Sending => write!(f, "sending"),
            NotificationStatus::Sent => write!(f, "sent"),
            NotificationStatus::Failed => write!(f, "failed"),
        }
    }
}

/// A persisted notification and its dispatch state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct NotificationRecord {
    pub id: NotificationId,
    pub user_id: i64,
    /// Delivery channel/category tag (column `type`)
    #[serde(rename = "type")]
    #[sqlx(rename = "type")]
    pub kind: String,
    pub message: String,
    pub status: NotificationStatus,
    /// Delivery attempts started so far
    pub attempt_count: i32,
    pub created_at: DateTime<Utc>,
    /// Last status or attempt write
    pub updated_at: DateTime<Utc>,
}

/// A request to create a notification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewNotification {
    pub user_id: i64,
    #[serde(rename = "type")]
    pub kind: String,
    pub message: String,
}

impl NewNotification {
    pub fn new(user_id: i64, kind: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            user_id,
            kind: kind.into(),
            message: message.into(),
        }
    }

    /// Check the request before anything is persisted.
    pub fn validate(&self) -> Result<(), String> {
        if self.kind.trim().is_empty() {
            return Err("type must not be empty".to_string());
        }
        if self.kind.len() > MAX_TYPE_LEN {
            return Err(format!("type must be at most {} bytes", MAX_TYPE_LEN));
        }
        if self.message.trim().is_empty() {
            return Err("message must not be empty".to_string());
        }
        Ok(())
    }
}

/// Public view of a notification returned by the per-user listing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotificationView {
    pub id: NotificationId,
    pub user_id: i64,
    #[serde(rename = "type")]
    pub kind: String,
    pub message: String,
    pub status: NotificationStatus,
    pub created_at: DateTime<Utc>,
}

impl From<NotificationRecord> for NotificationView {
    fn from(record: NotificationRecord) -> Self {
        Self {
            id: record.id,
            user_id: record.user_id,
            kind: record.kind,
            message: record.message,
            status: record.status,
            created_at: record.created_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use NotificationStatus::*;

    #[test]
    fn test_legal_transitions() {
        assert!(Queued.can_transition_to(Sending));
        assert!(Sending.can_transition_to(Sent));
        assert!(Sending.can_transition_to(Failed));
        assert!(Sending.can_transition_to(Queued));
        assert!(Queued.can_transition_to(Failed));
    }

    #[test]
    fn test_illegal_transitions() {
        assert!(!Queued.can_transition_to(Sent));
        assert!(!Sending.can_transition_to(Sending));
        assert!(!Queued.can_transition_to(Queued));
        assert!(!Sent.can_transition_to(Queued));
        assert!(!Failed.can_transition_to(Sending));
        assert!(!Sent.can_transition_to(Failed));
    }

    #[test]
    fn test_terminal() {
        assert!(Sent.is_terminal());
        assert!(Failed.is_terminal());
        assert!(!Queued.is_terminal());
        assert!(!Sending.is_terminal());
    }

    #[test]
    fn test_status_serializes_lowercase() {
        assert_eq!(serde_json::to_value(Sending).unwrap(), serde_json::json!("sending"));
        assert_eq!(Failed.to_string(), "failed");
    }

    #[test]
    fn test_new_notification_uses_type_key() {
        let parsed: NewNotification = serde_json::from_value(serde_json::json!({
            "user_id": 1,
            "type": "email",
            "message": "hi"
        }))
        .unwrap();
        assert_eq!(parsed, NewNotification::new(1, "email", "hi"));
    }

    #[test]
    fn test_validate_rejects_blank_fields() {
        assert!(NewNotification::new(1, "email", "hi").validate().is_ok());
        assert!(NewNotification::new(1, " ", "hi").validate().is_err());
        assert!(NewNotification::new(1, "email", "").validate().is_err());
        assert!(NewNotification::new(1, "x".repeat(MAX_TYPE_LEN + 1), "hi").validate().is_err());
    }
}
