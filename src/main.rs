//! Order Cache - order ingestion service
//!
//! Consumes orders from Kafka into PostgreSQL and serves them over HTTP
//! from a bounded in-memory cache.

use std::sync::Arc;

use anyhow::Context;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use order_cache::api::{create_router, AppState};
use order_cache::cache::OrderCache;
use order_cache::config::Config;
use order_cache::ingest::{spawn_ingestion, KafkaStream, MessageStream, PipelineSettings};
use order_cache::storage::PgOrderStore;

/// Main entry point for the order service.
///
/// # Startup Sequence
/// 1. Initialize tracing subscriber for logging
/// 2. Load and validate configuration from environment variables
/// 3. Connect to PostgreSQL and bootstrap the schema
/// 4. Restore the cache from its durable index
/// 5. Subscribe the stream consumers and start ingestion
/// 6. Serve the read path until SIGINT/SIGTERM
/// 7. Cancel ingestion, wait for the write loops, close the pool
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Defaults to "info" level, can be overridden with RUST_LOG env var
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "order_cache=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting order service");

    let config = Config::from_env();
    config.validate()?;
    info!(
        "Configuration loaded: db={}@{}:{}/{}, topic={}, consumers={}, cache_capacity={}",
        config.database.user,
        config.database.host,
        config.database.port,
        config.database.dbname,
        config.stream.topic,
        config.stream.consumers,
        config.cache_capacity
    );

    let store = Arc::new(
        PgOrderStore::connect(&config.database)
            .await
            .context("failed to connect to the order store")?,
    );
    info!("Order store connected");

    let cache = Arc::new(OrderCache::new(config.cache_capacity, store.clone()));
    match cache.restore().await {
        Ok(restored) => info!("Cache restored with {} orders", restored),
        Err(err) => warn!("Cache restore failed, starting empty: {}", err),
    }

    let mut streams: Vec<Arc<dyn MessageStream>> = Vec::with_capacity(config.stream.consumers);
    for _ in 0..config.stream.consumers {
        let stream = KafkaStream::connect(&config.stream)
            .context("failed to subscribe to the order stream")?;
        streams.push(Arc::new(stream));
    }

    // Bound before ingestion starts: nothing to drain if this fails
    let addr = config.socket_addr()?;
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {}", addr))?;

    let cancel = CancellationToken::new();
    let ingestion = spawn_ingestion(
        streams,
        store.clone(),
        Some(cache.clone()),
        PipelineSettings::from(&config.stream),
        cancel.clone(),
    );

    let app = create_router(AppState::new(cache));
    info!("Server listening on http://{}", addr);

    let served = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(cancel.clone()))
        .await;

    // Drain ingestion before closing the pool, whether or not serving failed
    ingestion.drain(&cancel, store.as_ref()).await;

    served.context("HTTP server failed")?;
    info!("Shutdown complete");
    Ok(())
}

/// Waits for Ctrl+C or SIGTERM, then cancels ingestion.
async fn shutdown_signal(cancel: CancellationToken) {
    let ctrl_c = async {
        if let Err(err) = signal::ctrl_c().await {
            warn!("Failed to listen for Ctrl+C: {}", err);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(err) => {
                warn!("Failed to install SIGTERM handler: {}", err);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, initiating shutdown...");
        }
        _ = terminate => {
            info!("Received SIGTERM, initiating shutdown...");
        }
    }

    cancel.cancel();
}
