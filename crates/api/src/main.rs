//! Herald API server binary entrypoint.

use std::net::SocketAddr;
use std::sync::Arc;

use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;

use herald_common::config::AppConfig;
use herald_common::db;
use herald_common::redis_pool::create_redis_pool;
use herald_notifier::{Clock, PgNotificationStore, RedisDispatchQueue, SystemClock};

use herald_api::routes::create_router;
use herald_api::state::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::new("herald_api=debug,herald_notifier=debug,tower_http=debug")
        }))
        .init();

    tracing::info!("Starting Herald API server...");

    let config = AppConfig::from_env()?;

    let pool = db::create_pool(&config.database_url, config.db_max_connections).await?;
    db::run_migrations(&pool).await?;
    tracing::info!("Database pool created");

    let redis = create_redis_pool(&config.redis_url).await?;
    tracing::info!("Redis connection established");

    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let store = Arc::new(PgNotificationStore::new(pool, clock.clone()));
    let queue = Arc::new(RedisDispatchQueue::new(
        redis,
        &config.queue_key_prefix,
        clock,
        std::time::Duration::from_secs(config.dispatch_lease_timeout_secs),
    ));

    let state = AppState::new(store, queue);

    let app = create_router(state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive());

    let addr: SocketAddr = config.api_bind_addr.parse()?;
    tracing::info!("API server listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("Received shutdown signal, draining connections...");
        })
        .await?;

    Ok(())
}
