//! Job status monitor binary.

use std::sync::Arc;

use anyhow::Context;
use metrics_exporter_prometheus::PrometheusBuilder;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use vtrack_engine::{LoggingObserver, MonitorConfig, ReconciliationEngine};
use vtrack_store::{ChangeFeed, RestJobStore};

#[tokio::main]
async fn main() {
    // Install rustls crypto provider (required for TLS/HTTPS)
    rustls::crypto::ring::default_provider()
        .install_default()
        .expect("Failed to install rustls crypto provider");

    // Load environment variables
    dotenvy::dotenv().ok();

    if let Err(e) = init_tracing() {
        eprintln!("Failed to initialize tracing: {:#}", e);
        std::process::exit(1);
    }

    info!("Starting vtrack-monitor");

    if let Err(e) = run().await {
        error!("Monitor error: {:#}", e);
        std::process::exit(1);
    }

    info!("Monitor shutdown complete");
}

/// Colored output for dev, JSON for production.
fn init_tracing() -> anyhow::Result<()> {
    let use_json = std::env::var("LOG_FORMAT")
        .map(|v| v.to_lowercase() == "json")
        .unwrap_or(false);

    let env_filter = EnvFilter::from_default_env()
        .add_directive("vtrack=info".parse()?)
        .add_directive("hyper=warn".parse()?)
        .add_directive("reqwest=warn".parse()?);

    if use_json {
        tracing_subscriber::registry()
            .with(fmt::layer().json())
            .with(env_filter)
            .init();
    } else {
        tracing_subscriber::registry()
            .with(
                fmt::layer()
                    .with_ansi(true)
                    .with_target(true)
                    .with_thread_ids(false)
                    .with_file(false)
                    .with_line_number(false),
            )
            .with(env_filter)
            .init();
    }
    Ok(())
}

async fn run() -> anyhow::Result<()> {
    let config = MonitorConfig::from_env().context("invalid monitor configuration")?;
    info!("Monitor config: {:?}", config);

    if let Some(addr) = config.metrics_addr {
        PrometheusBuilder::new()
            .with_http_listener(addr)
            .install()
            .context("failed to install Prometheus exporter")?;
        info!(%addr, "Prometheus exporter listening");
    }

    let store = RestJobStore::from_env().context("failed to create job store client")?;
    let engine = ReconciliationEngine::new(Arc::new(store), config.reconciler.clone())?;

    let mut subscriptions = Vec::with_capacity(config.scopes.len());
    for scope in &config.scopes {
        let observer = Arc::new(LoggingObserver::new(scope.clone()));
        subscriptions.push(engine.subscribe(scope, observer)?);
        info!(scope = %scope, "Watching scope");
    }

    // The change feed only shortens time-to-next-pass; polling works without it
    if let Some(redis_url) = &config.redis_url {
        match ChangeFeed::new(redis_url) {
            Ok(feed) => {
                for scope in &config.scopes {
                    if let Err(e) = engine.attach_redis_feed(scope, &feed).await {
                        warn!(scope = %scope, "Change feed unavailable, polling only: {}", e);
                    }
                }
            }
            Err(e) => warn!("Invalid REDIS_URL, polling only: {}", e),
        }
    }

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for shutdown signal")?;
    info!("Received shutdown signal");

    engine.shutdown().await;
    drop(subscriptions);
    Ok(())
}
