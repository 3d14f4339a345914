use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

mod cache;
mod config;
mod domain;
mod health;
mod messaging;
mod metrics;
mod service;
mod store;
mod utils;

#[cfg(test)]
mod testing;

use cache::{OrderCache, TtlCache};
use config::Settings;
use health::HealthRegistry;
use messaging::{KafkaDeadLetterPublisher, KafkaOrderSource, OrderIngestor};
use metrics::{AppState, InstrumentedCache, InstrumentedStore, Metrics, Reporter};
use service::OrderService;
use store::{OrderStore, PgOrderRepository};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize structured logging with environment-based filtering
    // Default to INFO level, can be overridden with RUST_LOG env var
    // Example: RUST_LOG=debug cargo run
    tracing_subscriber::registry()
        .with(fmt::layer().with_target(true).with_thread_ids(true))
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,order_ingest=debug"))
        )
        .init();

    tracing::info!("Starting order ingestion service");

    let settings = Settings::load()?;
    let shutdown = CancellationToken::new();

    // === 1. Metrics ===
    let metrics = Arc::new(Metrics::new()?);
    let reporter: Arc<dyn Reporter> = metrics.clone();
    let health = Arc::new(HealthRegistry::new());

    // === 2. PostgreSQL pool + migrations ===
    tracing::info!("Connecting to PostgreSQL...");
    let repository = PgOrderRepository::connect(&settings.database).await?;
    repository.migrate().await?;
    let store: Arc<dyn OrderStore> = Arc::new(InstrumentedStore::new(
        "postgres",
        Arc::new(repository),
        reporter.clone(),
    ));

    // === 3. Kafka consumer + dead-letter producer ===
    let source = Arc::new(KafkaOrderSource::new(&settings.kafka)?);
    let dead_letters = Arc::new(KafkaDeadLetterPublisher::new(&settings.kafka)?);

    // === 4. Cache + eviction ===
    let ttl_cache = Arc::new(TtlCache::new(settings.cache.ttl()));
    let eviction = ttl_cache.start_deleting(shutdown.child_token());
    let cache: Arc<dyn OrderCache> = Arc::new(InstrumentedCache::new(ttl_cache, reporter.clone()));

    let service = Arc::new(OrderService::new(store.clone(), cache));

    // === 5. Warm-up ===
    match service.warm_up().await {
        Ok(count) => tracing::info!(count = count, "Cache warmed"),
        Err(e) => tracing::warn!(error = %e, "Cache warm-up failed, starting cold"),
    }

    // === 6. Ingestion ===
    let ingestor = OrderIngestor::new(source, service.clone(), dead_letters, reporter.clone(), health.clone())
        .with_retry(settings.ingest.retry_config())
        .with_max_batch(settings.kafka.max_batch);
    let ingestion = {
        let token = shutdown.child_token();
        tokio::spawn(async move { ingestor.run(token).await })
    };

    // === 7. Repository ping ===
    let ping = health::spawn_repository_ping(
        store,
        reporter,
        health.clone(),
        settings.database.ping_interval(),
        shutdown.child_token(),
    );

    // === 8. HTTP: orders API, /metrics, /health ===
    let state = AppState {
        service,
        registry: metrics.registry().clone(),
        health,
    };
    let server = metrics::start_http_server(state, &settings.http.host, settings.http.port)?;
    let server_handle = server.handle();
    let http = tokio::spawn(server);

    // === 9. Shutdown ===
    wait_for_signal().await;
    tracing::info!("Shutdown requested");

    shutdown.cancel();
    server_handle.stop(true).await;

    for (name, task) in [("ingestion", ingestion), ("eviction", eviction), ("ping", ping)] {
        if let Err(e) = task.await {
            tracing::error!(task = name, error = %e, "Background task ended abnormally");
        }
    }
    match http.await {
        Ok(Err(e)) => tracing::error!(error = %e, "HTTP server error"),
        Err(e) => tracing::error!(error = %e, "HTTP server task ended abnormally"),
        Ok(Ok(())) => {}
    }

    tracing::info!("Shutdown complete");
    Ok(())
}

#[cfg(unix)]
async fn wait_for_signal() {
    use tokio::signal::unix::{signal, SignalKind};

    let mut terminate = match signal(SignalKind::terminate()) {
        Ok(stream) => stream,
        Err(e) => {
            tracing::warn!(error = %e, "Cannot listen for SIGTERM, waiting for Ctrl-C only");
            let _ = tokio::signal::ctrl_c().await;
            return;
        }
    };

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {}
        _ = terminate.recv() => {}
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() {
    let _ = tokio::signal::ctrl_c().await;
}
