use serde::Deserialize;

/// Global application configuration loaded from environment variables.
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    /// PostgreSQL connection string
    pub database_url: String,

    /// Redis connection string
    pub redis_url: String,

    /// Maximum number of PostgreSQL connections in the pool (default: 20)
    pub db_max_connections: u32,

    /// Address the HTTP API binds to (default: 0.0.0.0:8000)
    pub api_bind_addr: String,

    /// Prefix for every Redis key owned by the dispatch queue
    pub queue_key_prefix: String,

    /// Number of concurrent dispatch workers (default: 4)
    pub dispatch_workers: usize,

    /// Retries allowed after the first failed delivery (default: 3)
    pub dispatch_max_retries: u32,

    /// Base delay for exponential backoff, in seconds (default: 2)
    pub dispatch_base_backoff_secs: u64,

    /// Upper bound on a single backoff delay, in seconds (default: 3600)
    pub dispatch_max_backoff_secs: u64,

    /// Queue lease (visibility) timeout, in seconds (default: 60).
    /// Must exceed `delivery_timeout_secs`.
    pub dispatch_lease_timeout_secs: u64,

    /// Hard limit on a single delivery call, in seconds (default: 30)
    pub delivery_timeout_secs: u64,

    /// How often an idle worker re-checks the queue, in milliseconds (default: 250)
    pub dispatch_poll_interval_ms: u64,

    /// Pause after a store/queue failure before the next cycle, in seconds (default: 5)
    pub dispatch_error_backoff_secs: u64,

    /// Grace period for in-flight deliveries on shutdown, in seconds (default: 30)
    pub shutdown_timeout_secs: u64,

    /// Webhook that receives deliveries. When unset, deliveries are only logged.
    pub delivery_webhook_url: Option<String>,

    /// Artificial latency for the logging deliverer, in milliseconds (default: 0)
    pub delivery_simulated_latency_ms: u64,
}

impl AppConfig {
    /// Load configuration from environment variables.
    pub fn from_env() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();
        Self::from_vars(|key| std::env::var(key).ok())
    }

    /// Build configuration from an arbitrary variable lookup.
    pub fn from_vars<F>(lookup: F) -> anyhow::Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let config = Self {
            database_url: lookup("DATABASE_URL")
                .ok_or_else(|| anyhow::anyhow!("DATABASE_URL environment variable is required"))?,
            redis_url: lookup("REDIS_URL").unwrap_or_else(|| "redis://localhost:6379".to_string()),
            db_max_connections: parse_or(&lookup, "DB_MAX_CONNECTIONS", 20)?,
            api_bind_addr: lookup("API_BIND_ADDR").unwrap_or_else(|| "0.0.0.0:8000".to_string()),
            queue_key_prefix: lookup("QUEUE_KEY_PREFIX")
                .unwrap_or_else(|| "herald:dispatch".to_string()),
            dispatch_workers: parse_or(&lookup, "DISPATCH_WORKERS", 4)?,
            dispatch_max_retries: parse_or(&lookup, "DISPATCH_MAX_RETRIES", 3)?,
            dispatch_base_backoff_secs: parse_or(&lookup, "DISPATCH_BASE_BACKOFF_SECS", 2)?,
            dispatch_max_backoff_secs: parse_or(&lookup, "DISPATCH_MAX_BACKOFF_SECS", 3600)?,
            dispatch_lease_timeout_secs: parse_or(&lookup, "DISPATCH_LEASE_TIMEOUT_SECS", 60)?,
            delivery_timeout_secs: parse_or(&lookup, "DELIVERY_TIMEOUT_SECS", 30)?,
            dispatch_poll_interval_ms: parse_or(&lookup, "DISPATCH_POLL_INTERVAL_MS", 250)?,
            dispatch_error_backoff_secs: parse_or(&lookup, "DISPATCH_ERROR_BACKOFF_SECS", 5)?,
            shutdown_timeout_secs: parse_or(&lookup, "SHUTDOWN_TIMEOUT_SECS", 30)?,
            delivery_webhook_url: lookup("DELIVERY_WEBHOOK_URL").filter(|url| !url.is_empty()),
            delivery_simulated_latency_ms: parse_or(&lookup, "DELIVERY_SIMULATED_LATENCY_MS", 0)?,
        };

        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> anyhow::Result<()> {
        if self.dispatch_workers == 0 {
            anyhow::bail!("DISPATCH_WORKERS must be at least 1");
        }
        if self.dispatch_base_backoff_secs > self.dispatch_max_backoff_secs {
            anyhow::bail!("DISPATCH_BASE_BACKOFF_SECS must not exceed DISPATCH_MAX_BACKOFF_SECS");
        }
        // A lease that can lapse mid-delivery hands the item to a second worker.
        if self.delivery_timeout_secs >= self.dispatch_lease_timeout_secs {
            anyhow::bail!(
                "DISPATCH_LEASE_TIMEOUT_SECS ({}) must exceed DELIVERY_TIMEOUT_SECS ({})",
                self.dispatch_lease_timeout_secs,
                self.delivery_timeout_secs
            );
        }
        Ok(())
    }
}

fn parse_or<F, T>(lookup: &F, key: &str, default: T) -> anyhow::Result<T>
where
    F: Fn(&str) -> Option<String>,
    T: std::str::FromStr,
{
    match lookup(key) {
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|_| anyhow::anyhow!("{} must be a valid {}", key, std::any::type_name::<T>())),
        None => Ok(default),
    }
}
