//! metrics-aggregator server binary

use std::sync::Arc;

use anyhow::Context;
use tokio::signal;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use metrics_aggregator::aggregator::MetricsAggregator;
use metrics_aggregator::api::{create_router, AppState};
use metrics_aggregator::config::{AppConfig, LogFormat};
use metrics_aggregator::discovery::k8s::KubeInventory;
use metrics_aggregator::discovery::{DiscoveryCache, DiscoveryRefresher, WorkloadInventory};
use metrics_aggregator::scrape::{HttpFetcher, Scraper};

fn main() -> anyhow::Result<()> {
    let config = AppConfig::load().context("failed to load configuration")?;

    init_tracing(&config)?;

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(config.server.workers)
        .enable_all()
        .build()
        .context("failed to build tokio runtime")?;

    runtime.block_on(run(config))
}

async fn run(config: AppConfig) -> anyhow::Result<()> {
    tracing::info!(
        server_workers = config.server.workers,
        scrape_workers = config.scrape.workers,
        interval_secs = config.discovery.interval_secs,
        label_prefix = %config.discovery.label_prefix,
        "Starting metrics-aggregator"
    );

    let inventory: Arc<dyn WorkloadInventory> = Arc::new(
        KubeInventory::connect()
            .await
            .context("failed to connect to the Kubernetes API")?,
    );

    // Queries are only served once a first snapshot exists.
    let cache = Arc::new(
        DiscoveryCache::initialize(inventory, config.discovery.label_prefix.clone())
            .await
            .context("initial discovery failed")?,
    );

    let refresher = DiscoveryRefresher::new(cache.clone(), config.discovery.interval());
    refresher.start().await;

    let fetcher = Arc::new(HttpFetcher::new().context("failed to build HTTP client")?);
    let scraper = Scraper::new(fetcher, config.scrape.workers);
    let aggregator = Arc::new(MetricsAggregator::new(
        cache,
        scraper,
        config.scrape.malformed_lines,
    ));

    let router = create_router(AppState::new(aggregator));

    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind to {}", addr))?;
    tracing::info!(%addr, "Listening for HTTP traffic");

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    refresher.stop().await;
    tracing::info!("Shut down");

    Ok(())
}

fn init_tracing(config: &AppConfig) -> anyhow::Result<()> {
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(config.logging.level.clone()))
        .unwrap_or_else(|_| EnvFilter::new("metrics_aggregator=info"));

    let registry = tracing_subscriber::registry().with(env_filter);

    match config.logging.format {
        LogFormat::Json => {
            registry
                .with(tracing_subscriber::fmt::layer().json())
                .init();
        }
        LogFormat::Text => {
            registry.with(tracing_subscriber::fmt::layer()).init();
        }
    }

    Ok(())
}

#[cfg(unix)]
async fn shutdown_signal() {
    let mut terminate = match signal::unix::signal(signal::unix::SignalKind::terminate()) {
        Ok(terminate) => terminate,
        Err(e) => {
            tracing::warn!(error = %e, "Cannot listen for SIGTERM, relying on Ctrl-C only");
            let _ = signal::ctrl_c().await;
            return;
        }
    };

    tokio::select! {
        _ = terminate.recv() => tracing::info!("Received SIGTERM, shutting down"),
        _ = signal::ctrl_c() => tracing::info!("Received SIGINT, shutting down"),
    }
}

#[cfg(not(unix))]
async fn shutdown_signal() {
    let _ = signal::ctrl_c().await;
    tracing::info!("Received Ctrl-C, shutting down");
}
