use std::time::Duration;

use herald_common::config::AppConfig;

use crate::queue::{DEFAULT_LEASE_TIMEOUT, DEFAULT_POLL_INTERVAL};
use crate::retry::RetryPolicy;

/// Runtime settings for dispatch workers.
#[derive(Debug, Clone)]
pub struct DispatchSettings {
    /// Number of concurrent workers.
    pub workers: usize,
    pub retry: RetryPolicy,
    /// Queue visibility timeout; a claim older than this is considered stale.
    pub lease_timeout: Duration,
    /// Hard limit on one `deliver` call. Always shorter than `lease_timeout`.
    pub delivery_timeout: Duration,
    pub poll_interval: Duration,
    /// Pause after a store/queue failure.
    pub error_backoff: Duration,
    pub shutdown_timeout: Duration,
}

impl Default for DispatchSettings {
    fn default() -> Self {
        Self {
            workers: 4,
            retry: RetryPolicy::default(),
            lease_timeout: DEFAULT_LEASE_TIMEOUT,
            delivery_timeout: Duration::from_secs(30),
            poll_interval: DEFAULT_POLL_INTERVAL,
            error_backoff: Duration::from_secs(5),
            shutdown_timeout: Duration::from_secs(30),
        }
    }
}

impl DispatchSettings {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            workers: config.dispatch_workers,
            retry: RetryPolicy {
                max_retries: config.dispatch_max_retries,
                base_backoff: Duration::from_secs(config.dispatch_base_backoff_secs),
                max_backoff: Duration::from_secs(config.dispatch_max_backoff_secs),
            },
            lease_timeout: Duration::from_secs(config.dispatch_lease_timeout_secs),
            delivery_timeout: Duration::from_secs(config.delivery_timeout_secs),
            poll_interval: Duration::from_millis(config.dispatch_poll_interval_ms),
            error_backoff: Duration::from_secs(config.dispatch_error_backoff_secs),
            shutdown_timeout: Duration::from_secs(config.shutdown_timeout_secs),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_config_defaults_match_settings_defaults() {
        let config = AppConfig::from_vars(|key| {
            (key == "DATABASE_URL").then(|| "postgres://localhost/herald".to_string())
        })
        .unwrap();
        let settings = DispatchSettings::from_config(&config);
        let defaults = DispatchSettings::default();

        assert_eq!(settings.workers, defaults.workers);
        assert_eq!(settings.retry, defaults.retry);
        assert_eq!(settings.lease_timeout, defaults.lease_timeout);
        assert_eq!(settings.delivery_timeout, defaults.delivery_timeout);
        assert_eq!(settings.poll_interval, defaults.poll_interval);
        assert!(settings.delivery_timeout < settings.lease_timeout);
    }
}
