//! Gantry queue controller daemon.
//!
//! Long-lived process with two concurrent loops over the platform's
//! object store: an event-driven watcher (tag + first admission
//! decision) and a fixed-interval reconciler (race correction + FIFO
//! promotion). The only fatal error is failing to reach the platform
//! API at startup; everything after that is retried forever.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::sync::watch;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use gantry_controller::{
    ApiStore, Config, Evaluator, LimitSource, Reconciler, ReconcilerConfig, RunStore, Watcher,
};
use gantry_model::NamespacePattern;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .with(tracing_subscriber::fmt::layer().json())
        .init();

    info!("Starting gantry queue controller");

    // Load configuration
    let config = Config::from_env()?;
    info!(
        api_url = %config.api_url,
        pattern = %config.namespace_pattern,
        sweep_interval_secs = config.sweep_interval_secs,
        default_limit = config.default_limit,
        "Configuration loaded"
    );

    let pattern = NamespacePattern::parse(&config.namespace_pattern)
        .context("invalid GANTRY_NAMESPACE_PATTERN")?;

    // The platform API must be reachable at startup; this is the only
    // error treated as fatal.
    let api = ApiStore::new(&config)?;
    api.probe()
        .await
        .context("cannot reach the platform API server")?;
    let store: Arc<dyn RunStore> = Arc::new(api);

    // Create shutdown channel
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let limits = Arc::new(LimitSource::new(Arc::clone(&store), config.default_limit));

    // Start the watch loop
    let evaluator = Evaluator::new(Arc::clone(&store), pattern.clone(), Arc::clone(&limits));
    let watcher = Watcher::new(Arc::clone(&store), pattern.clone(), evaluator);
    let watcher_handle = tokio::spawn({
        let shutdown_rx = shutdown_rx.clone();
        async move {
            watcher.run(shutdown_rx).await;
        }
    });

    // Start the reconciliation loop
    let reconciler = Reconciler::new(
        store,
        pattern,
        limits,
        ReconcilerConfig {
            sweep_interval: Duration::from_secs(config.sweep_interval_secs),
        },
    );
    let reconciler_handle = tokio::spawn({
        let shutdown_rx = shutdown_rx.clone();
        async move {
            reconciler.run(shutdown_rx).await;
        }
    });

    // Wait for shutdown signal
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("Received shutdown signal");
        }
        _ = watcher_handle => {
            warn!("Watcher exited");
        }
        _ = reconciler_handle => {
            warn!("Reconciler exited");
        }
    }

    // Signal shutdown to all workers
    let _ = shutdown_tx.send(true);

    // Give workers time to shut down gracefully
    info!("Waiting for workers to shut down...");
    tokio::time::sleep(Duration::from_secs(1)).await;

    info!("Queue controller shutdown complete");
    Ok(())
}
