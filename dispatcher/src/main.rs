// ============================================================================
// Dispatcher - leader-elected message fan-out
// ============================================================================
//
// Every replica runs this binary. All of them poll the leadership lock; the
// one holding it runs the distributor, acknowledger and republisher, the
// others stay idle until the lock frees up.
//
// On SIGTERM/Ctrl-C the coordinator stops, workers are aborted and the lock is
// released so another replica can take over without waiting for the TTL.
//
// ============================================================================

use anyhow::{Context, Result};
use asynchroza_config::Config;
use asynchroza_dispatcher::{DispatcherWorkers, LeadershipCoordinator, WorkerSupervisor};
use asynchroza_metrics::MetricsPusher;
use asynchroza_redis::RedisStore;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration
    let config = Config::from_env().context("Failed to load configuration")?;
    let config = Arc::new(config);

    // Initialize tracing
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(config.rust_log.clone()))
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("=== Dispatcher Starting ===");
    info!(node_id = %config.node_id, "Node identity");
    info!(consumers = ?config.consumers.urls, "Consumer endpoints");
    info!(port = config.acknowledger_port, "Acknowledger port");
    info!("Connecting to Redis at: {}", config.redis_url_safe());

    let store = RedisStore::connect(&config.redis_url)
        .await
        .context("Failed to connect to Redis")?;
    let store = Arc::new(store);

    info!("Connected to Redis");

    let metrics_task = match &config.metrics.pushgateway_url {
        Some(url) => {
            let pusher = MetricsPusher::new(
                url.clone(),
                &config.node_id,
                config.metrics.push_interval(),
            );
            Some(tokio::spawn(pusher.run()))
        }
        None => {
            info!("PUSHGATEWAY_URL not set, metrics push disabled");
            None
        }
    };

    let workers = DispatcherWorkers::new(store.clone(), config.clone());
    let supervisor = WorkerSupervisor::new(Arc::new(workers));
    let mut coordinator = LeadershipCoordinator::new(
        store,
        config.node_id.clone(),
        config.leadership.clone(),
        supervisor,
    );

    coordinator.run(shutdown_signal()).await;

    if let Some(task) = metrics_task {
        task.abort();
    }

    info!("=== Dispatcher Stopped ===");
    Ok(())
}

/// Resolves on SIGTERM or Ctrl-C
async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = sigterm.recv() => {
                        info!("SIGTERM received, initiating graceful shutdown...");
                    }
                    _ = tokio::signal::ctrl_c() => {
                        info!("SIGINT received, initiating graceful shutdown...");
                    }
                }
                return;
            }
            Err(e) => {
                warn!(error = %e, "Failed to register SIGTERM handler, listening for Ctrl-C only");
            }
        }
    }

    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "Failed to listen for Ctrl-C");
        std::future::pending::<()>().await;
    }
    info!("Ctrl-C received, initiating graceful shutdown...");
}
