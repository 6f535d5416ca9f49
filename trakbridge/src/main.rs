//! TrakBridge: polls position providers, builds CoT events, and forwards them to TAK servers.
//! `main` wires together config loading, tracing, the plug-in registry, the queue
//! manager, and the orchestrator — read config, install tracing, register a shutdown signal,
//! then hand off to the long-running loop.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use tokio_util::sync::CancellationToken;
use trakbridge_core::queue::QueueManager;
use trakbridge_plugins::{DemoPositionPlugin, PluginRegistry};
use tracing::info;

use trakbridge::cli::{LogFormatArg, Options};
use trakbridge::orchestrator::Orchestrator;
use trakbridge::repository::{ConfigRepository, InMemoryConfigRepository};
use trakbridge::{config, metrics, tracing_setup};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let options = Options::parse();

    let mut app_config = config::load_config(&options.config_file)
        .with_context(|| format!("couldn't load config file {:?}", options.config_file))?;
    if let Some(format) = options.log_format {
        app_config.logging.format = match format {
            LogFormatArg::Pretty => config::LogFormat::Pretty,
            LogFormatArg::Json => config::LogFormat::Json,
        };
    }

    tracing_setup::install(&app_config.logging)?;
    info!(?app_config, "starting up");

    // rustls 0.23 requires a process-wide default crypto provider before any ClientConfig is
    // built; install it once here rather than at first TLS connection.
    let _ = rustls::crypto::aws_lc_rs::default_provider().install_default();

    let metrics_registry = metrics::install().context("installing metrics exporter")?;
    let _ = &metrics_registry; // scraped by a deployment's /metrics endpoint, out of scope here

    let shutdown = CancellationToken::new();
    setup_signal_handler(shutdown.clone());

    let mut plugins = PluginRegistry::new();
    plugins.register(Arc::new(DemoPositionPlugin::new()));

    let queue_manager = Arc::new(QueueManager::new());
    let repository: Arc<dyn ConfigRepository> = Arc::new(InMemoryConfigRepository::new());

    let orchestrator = Arc::new(Orchestrator::new(
        Arc::clone(&repository),
        plugins,
        Arc::clone(&queue_manager),
        app_config.queue,
        app_config.parallel,
    ));

    let reconcile_interval = Duration::from_secs(app_config.reconcile_interval_seconds);
    let orchestrator_handle = tokio::spawn({
        let orchestrator = Arc::clone(&orchestrator);
        let shutdown = shutdown.clone();
        async move { orchestrator.run(reconcile_interval, shutdown).await }
    });

    let monitoring_handle = tokio::spawn(run_monitoring_tasks(
        Arc::clone(&queue_manager),
        app_config.monitoring,
        app_config.device_state,
        shutdown.clone(),
    ));

    orchestrator_handle
        .await
        .context("orchestrator task panicked")?;
    monitoring_handle
        .await
        .context("monitoring task panicked")?;

    info!("shutdown complete");
    Ok(())
}

/// Periodically logs each destination's queue stats (escalating to `warn!` past
/// `queue_warning_threshold`) and sweeps stale device-state entries, as a lightweight ticking
/// task alongside the main reconciliation loop.
async fn run_monitoring_tasks(
    queue_manager: Arc<QueueManager>,
    monitoring: config::MonitoringConfig,
    device_state: config::DeviceStateConfig,
    shutdown: CancellationToken,
) {
    let meter = opentelemetry::global::meter("trakbridge");
    let queue_metrics = metrics::QueueMetrics::new(&meter);

    let mut ticker = tokio::time::interval(Duration::from_secs(10));
    let eviction = match (
        device_state.eviction_interval_seconds,
        device_state.eviction_horizon_seconds,
    ) {
        (Some(interval), Some(horizon)) => Some((
            Duration::from_secs(interval),
            chrono::Duration::seconds(horizon as i64),
        )),
        _ => None,
    };
    let mut last_eviction = tokio::time::Instant::now();

    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            _ = shutdown.cancelled() => break,
        }

        record_queue_metrics(&queue_manager, &queue_metrics).await;
        if monitoring.log_queue_stats {
            log_queue_stats(&queue_manager, monitoring.queue_warning_threshold).await;
        }

        if let Some((interval, horizon)) = eviction {
            if last_eviction.elapsed() >= interval {
                sweep_stale_devices(&queue_manager, horizon).await;
                last_eviction = tokio::time::Instant::now();
            }
        }
    }
}

async fn record_queue_metrics(queue_manager: &QueueManager, queue_metrics: &metrics::QueueMetrics) {
    for destination in queue_manager.destination_ids().await {
        if let Ok(stats) = queue_manager.stats(&destination).await {
            queue_metrics.record(&destination, &stats);
        }
    }
}

async fn log_queue_stats(queue_manager: &QueueManager, warning_threshold: usize) {
    for destination in queue_manager.destination_ids().await {
        let Ok(stats) = queue_manager.stats(&destination).await else {
            continue;
        };
        if stats.size >= warning_threshold {
            tracing::warn!(destination = %destination, ?stats, "destination queue backing up");
        } else {
            tracing::info!(destination = %destination, ?stats, "queue stats");
        }
    }
}

async fn sweep_stale_devices(queue_manager: &QueueManager, horizon: chrono::Duration) {
    let now = chrono::Utc::now();
    for destination in queue_manager.destination_ids().await {
        if let Ok(evicted) = queue_manager.evict_stale_devices(&destination, now, horizon).await {
            if !evicted.is_empty() {
                info!(destination = %destination, count = evicted.len(), "evicted stale device-state entries");
            }
        }
    }
}

fn setup_signal_handler(shutdown: CancellationToken) {
    tokio::spawn(async move {
        let _ = tokio::signal::ctrl_c().await;
        info!("received shutdown signal");
        shutdown.cancel();
    });
}
