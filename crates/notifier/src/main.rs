//! Herald dispatch worker binary entrypoint.

use std::sync::Arc;
use std::time::Duration;

use herald_common::config::AppConfig;
use herald_common::db;
use herald_common::redis_pool::create_redis_pool;
use herald_notifier::{
    Clock, Deliverer, DispatchSettings, Dispatcher, LogDeliverer, PgNotificationStore,
    RedisDispatchQueue, SystemClock, WebhookDeliverer, WorkerPool,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "herald_notifier=info".into()),
        )
        .json()
        .init();

    tracing::info!("Herald worker starting...");

    let config = AppConfig::from_env()?;
    let settings = DispatchSettings::from_config(&config);

    let pool = db::create_pool(&config.database_url, config.db_max_connections).await?;
    db::run_migrations(&pool).await?;
    let redis = create_redis_pool(&config.redis_url).await?;

    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let store = Arc::new(PgNotificationStore::new(pool, clock.clone()));
    let queue = Arc::new(
        RedisDispatchQueue::new(
            redis,
            &config.queue_key_prefix,
            clock.clone(),
            settings.lease_timeout,
        )
        .with_poll_interval(settings.poll_interval),
    );

    let deliverer: Arc<dyn Deliverer> = match &config.delivery_webhook_url {
        Some(url) => {
            tracing::info!(url = %url, "Delivering via webhook");
            Arc::new(WebhookDeliverer::new(url.clone(), settings.delivery_timeout)?)
        }
        None => {
            tracing::info!("No DELIVERY_WEBHOOK_URL set, deliveries are only logged");
            Arc::new(LogDeliverer::new(Duration::from_millis(
                config.delivery_simulated_latency_ms,
            )))
        }
    };

    let dispatcher = Arc::new(Dispatcher::new(store, queue, deliverer, clock, &settings));
    let mut workers = WorkerPool::new(dispatcher, settings);
    workers.spawn();

    tokio::signal::ctrl_c().await?;
    tracing::info!("Received shutdown signal, stopping gracefully...");

    let stats = workers.stats();
    workers.shutdown().await?;

    tracing::info!(
        processed = stats.processed.load(std::sync::atomic::Ordering::Relaxed),
        sent = stats.sent.load(std::sync::atomic::Ordering::Relaxed),
        failed = stats.failed.load(std::sync::atomic::Ordering::Relaxed),
        "Herald worker stopped."
    );
    Ok(())
}
