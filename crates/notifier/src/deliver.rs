//! Delivery channels.
//!
//! The dispatcher treats delivery as an opaque call: `deliver(type, message)`
//! either succeeds or fails. Channel specifics (email, push, SMS) live behind
//! this trait.

use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;

use crate::error::DeliveryError;

#[async_trait]
pub trait Deliverer: Send + Sync + 'static {
    async fn deliver(&self, kind: &str, message: &str) -> Result<(), DeliveryError>;
}

/// Logs each notification and reports success.
///
/// An optional latency simulates a slow channel.
#[derive(Debug, Clone, Default)]
pub struct LogDeliverer {
    latency: Duration,
}

impl LogDeliverer {
    pub fn new(latency: Duration) -> Self {
        Self { latency }
    }
}

#[async_trait]
impl Deliverer for LogDeliverer {
    async fn deliver(&self, kind: &str, message: &str) -> Result<(), DeliveryError> {
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
        tracing::info!(kind, message, "Sending notification");
        Ok(())
    }
}

#[derive(Debug, Serialize)]
struct WebhookBody<'a> {
    #[serde(rename = "type")]
    kind: &'a str,
    message: &'a str,
}

/// POSTs `{"type": ..., "message": ...}` to a fixed URL.
///
/// Any non-2xx response is a delivery failure.
#[derive(Debug, Clone)]
pub struct WebhookDeliverer {
    client: reqwest::Client,
    url: String,
}

impl WebhookDeliverer {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self, DeliveryError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| DeliveryError::Failed(format!("failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            url: url.into(),
        })
    }
}

#[async_trait]
impl Deliverer for WebhookDeliverer {
    async fn deliver(&self, kind: &str, message: &str) -> Result<(), DeliveryError> {
        let response = self
            .client
            .post(&self.url)
            .json(&WebhookBody { kind, message })
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    DeliveryError::Failed(format!("webhook timed out: {}", e))
                } else {
                    DeliveryError::Failed(e.to_string())
                }
            })?;

        let status = response.status();
        if status.is_success() {
            Ok(())
        } else {
            Err(DeliveryError::Rejected {
                status: status.as_u16(),
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_log_deliverer_succeeds() {
        let deliverer = LogDeliverer::default();
        assert!(deliverer.deliver("email", "hi").await.is_ok());
    }

    #[test]
    fn test_webhook_body_uses_type_key() {
        let body = serde_json::to_value(WebhookBody {
            kind: "sms",
            message: "hello",
        })
        .unwrap();
        assert_eq!(body, serde_json::json!({"type": "sms", "message": "hello"}));
    }

    #[tokio::test]
    async fn test_webhook_unreachable_is_failure() {
        let deliverer =
            WebhookDeliverer::new("http://127.0.0.1:9/hook", Duration::from_millis(500)).unwrap();
        let err = deliverer.deliver("email", "hi").await.unwrap_err();
        assert!(matches!(err, DeliveryError::Failed(_)));
    }
}
