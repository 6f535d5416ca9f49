//! The Orchestrator: periodically reads the config repository, diffs desired state
//! against running workers, and starts/stops Stream and Transmission Workers accordingly. Each
//! running worker's lifetime is governed by a `tokio_util::sync::CancellationToken`, cancelled
//! when the orchestrator decides to stop it.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use trakbridge_core::config::{QueueConfig, TakServerConfig};
use trakbridge_core::queue::QueueManager;
use trakbridge_plugins::PluginRegistry;
use tracing::{info, warn};

use crate::config::ParallelConfig;
use crate::repository::ConfigRepository;
use crate::stream_worker::StreamWorker;

/// One destination's running state: the handle needed to stop its Transmission Worker, plus the
/// config it was started with, so a later reconciliation can detect a modification and trigger
/// the stop-then-start this orchestrator applies to a modified one, which is simpler than
/// in-place mutation of a running worker.
struct RunningServer {
    shutdown: CancellationToken,
    config: TakServerConfig,
}

/// One stream's running state: the handle needed to stop its Stream Worker, plus the config it
/// was started with (see [`RunningServer`]).
struct RunningStream {
    shutdown: CancellationToken,
    config: trakbridge_core::config::StreamConfig,
}

/// Owns the full set of running Stream and Transmission Workers and reconciles them against the
/// config repository on a timer. There is exactly one orchestrator per process; it and the
/// queue registry are process-wide singletons.
pub struct Orchestrator {
    repository: Arc<dyn ConfigRepository>,
    plugins: PluginRegistry,
    queue_manager: Arc<QueueManager>,
    queue_defaults: QueueConfig,
    parallel: ParallelConfig,
    servers: Mutex<HashMap<String, RunningServer>>,
    streams: Mutex<HashMap<String, RunningStream>>,
    /// Serializes reconciliation passes so concurrent callers (the timer loop and an explicit
    /// reload trigger) coalesce into one pass rather than racing each other's start/stop calls.
    reconcile_lock: Mutex<()>,
}

impl Orchestrator {
    pub fn new(
        repository: Arc<dyn ConfigRepository>,
        plugins: PluginRegistry,
        queue_manager: Arc<QueueManager>,
        queue_defaults: QueueConfig,
        parallel: ParallelConfig,
    ) -> Self {
        Orchestrator {
            repository,
            plugins,
            queue_manager,
            queue_defaults,
            parallel,
            servers: Mutex::new(HashMap::new()),
            streams: Mutex::new(HashMap::new()),
            reconcile_lock: Mutex::new(()),
        }
    }

    /// Runs the periodic reconciliation loop until `shutdown` is cancelled, then stops every
    /// running worker before returning.
    pub async fn run(self: Arc<Self>, interval: std::time::Duration, shutdown: CancellationToken) {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {}
                _ = shutdown.cancelled() => break,
            }
            self.reconcile().await;
        }

        self.stop_all().await;
    }

    /// Diffs the repository's desired state against running workers and starts/stops workers to
    /// match. A failure reconciling one stream is isolated and does not affect any
    /// other stream or destination.
    #[tracing::instrument(skip_all)]
    pub async fn reconcile(&self) {
        let _guard = self.reconcile_lock.lock().await;

        let desired_servers = self.repository.list_servers().await;
        self.reconcile_servers(desired_servers).await;

        let desired_streams = self.repository.list_streams().await;
        self.reconcile_streams(desired_streams).await;
    }

    async fn reconcile_servers(&self, desired: Vec<TakServerConfig>) {
        let mut running = self.servers.lock().await;
        let desired_by_id: HashMap<String, TakServerConfig> =
            desired.into_iter().map(|s| (s.id.clone(), s)).collect();

        let mut removed_destinations = Vec::new();
        running.retain(|id, server| {
            if desired_by_id.contains_key(id) {
                return true;
            }
            info!(server_id = %id, "stopping transmission worker for removed destination");
            server.shutdown.cancel();
            removed_destinations.push(id.clone());
            false
        });
        for id in removed_destinations {
            self.queue_manager.delete_queue(&id).await;
        }

        // Modified destinations are stopped here; the loop below starts them back up fresh
        // Stop-then-start is simpler than in-place mutation of a running worker.
        let mut flush_destinations = Vec::new();
        running.retain(|id, server| {
            let Some(desired) = desired_by_id.get(id) else {
                return true;
            };
            if &server.config == desired {
                return true;
            }
            info!(server_id = %id, "destination config changed, restarting transmission worker");
            server.shutdown.cancel();
            if self.queue_defaults.flush_on_config_change {
                flush_destinations.push(id.clone());
            }
            false
        });

        for id in flush_destinations {
            if let Err(error) = self.queue_manager.flush(&id, false).await {
                warn!(server_id = %id, %error, "failed to flush queue on destination config change");
            }
        }

        for (id, server) in desired_by_id {
            if running.contains_key(&id) {
                continue;
            }
            info!(server_id = %id, "starting transmission worker");
            self.queue_manager
                .create_queue(&id, self.queue_defaults)
                .await;
            let shutdown = CancellationToken::new();
            let worker = trakbridge_transport::TransmissionWorker::new(
                server.clone(),
                Arc::clone(&self.queue_manager),
                shutdown.clone(),
            )
            .with_batch_size(self.queue_defaults.batch_size)
            .with_write_timeout(std::time::Duration::from_millis(
                self.queue_defaults.batch_timeout_ms.saturating_mul(10),
            ));
            tokio::spawn(worker.run());
            running.insert(id, RunningServer { shutdown, config: server });
        }
    }

    async fn reconcile_streams(&self, desired: Vec<trakbridge_core::config::StreamConfig>) {
        let mut running = self.streams.lock().await;
        let desired_by_id: HashMap<String, trakbridge_core::config::StreamConfig> =
            desired.into_iter().map(|s| (s.id.clone(), s)).collect();

        running.retain(|id, stream| {
            if desired_by_id.contains_key(id) {
                return true;
            }
            info!(stream_id = %id, "stopping stream worker for removed stream");
            stream.shutdown.cancel();
            false
        });

        // Modified streams are stopped here; the loop below starts them back up with the new
        // config (stop-then-start). A config change invalidates whatever is already
        // buffered for this stream's destinations, so flush those queues too.
        let mut flush_destinations = Vec::new();
        running.retain(|id, stream| {
            let Some(desired) = desired_by_id.get(id) else {
                return true;
            };
            if &stream.config == desired {
                return true;
            }
            info!(stream_id = %id, "stream config changed, restarting stream worker");
            stream.shutdown.cancel();
            if self.queue_defaults.flush_on_config_change {
                flush_destinations.extend(stream.config.destinations.iter().cloned());
            }
            false
        });

        for destination in flush_destinations {
            if let Err(error) = self.queue_manager.flush(&destination, false).await {
                warn!(destination = %destination, %error, "failed to flush queue on stream config change");
            }
        }

        for (id, stream) in desired_by_id {
            if running.contains_key(&id) {
                continue;
            }
            if let Err(error) = stream.validate() {
                warn!(stream_id = %id, %error, "rejecting invalid stream, prior state retained");
                continue;
            }
            let plugin = match self.plugins.get(&stream.plugin_type) {
                Ok(plugin) => plugin,
                Err(error) => {
                    warn!(stream_id = %id, %error, "no plugin registered for stream's plugin_type");
                    continue;
                }
            };

            info!(stream_id = %id, "starting stream worker");
            let shutdown = CancellationToken::new();
            let worker = StreamWorker::new(
                stream.clone(),
                plugin,
                Arc::clone(&self.queue_manager),
                self.parallel,
                shutdown.clone(),
            );
            tokio::spawn(worker.run());
            running.insert(id, RunningStream { shutdown, config: stream });
        }
    }

    async fn stop_all(&self) {
        for (_, server) in self.servers.lock().await.drain() {
            server.shutdown.cancel();
        }
        for (_, stream) in self.streams.lock().await.drain() {
            stream.shutdown.cancel();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::InMemoryConfigRepository;
    use std::collections::{HashMap as StdHashMap, HashSet};
    use trakbridge_core::config::{CotTypeMode, TakProtocol};
    use trakbridge_plugins::DemoPositionPlugin;

    fn server(id: &str) -> TakServerConfig {
        TakServerConfig {
            id: id.to_string(),
            name: id.to_string(),
            host: "127.0.0.1".to_string(),
            port: 1,
            protocol: TakProtocol::Tcp,
            tls_material: None,
        }
    }

    fn stream(id: &str, destination: &str) -> trakbridge_core::config::StreamConfig {
        trakbridge_core::config::StreamConfig {
            id: id.to_string(),
            name: id.to_string(),
            plugin_type: "demo".to_string(),
            plugin_config: StdHashMap::new(),
            poll_interval_seconds: 3600,
            cot_type_default: "a-f-G-U-C".to_string(),
            cot_stale_seconds: 300,
            cot_type_mode: CotTypeMode::Stream,
            destinations: HashSet::from([destination.to_string()]),
            enable_callsign_mapping: false,
            callsign_identifier_field: None,
            callsign_mappings: StdHashMap::new(),
        }
    }

    fn orchestrator(repo: Arc<InMemoryConfigRepository>) -> Orchestrator {
        let mut plugins = PluginRegistry::new();
        plugins.register(Arc::new(DemoPositionPlugin::new()));
        Orchestrator::new(
            repo,
            plugins,
            Arc::new(QueueManager::new()),
            QueueConfig::default(),
            ParallelConfig::default(),
        )
    }

    #[tokio::test]
    async fn reconcile_starts_a_queue_for_each_desired_server() {
        let repo = Arc::new(InMemoryConfigRepository::new());
        repo.save_server(server("s1")).await;
        let orch = orchestrator(repo);

        orch.reconcile().await;

        assert!(orch.queue_manager.stats("s1").await.is_ok());
        assert_eq!(orch.servers.lock().await.len(), 1);
    }

    #[tokio::test]
    async fn reconcile_deletes_the_queue_for_a_removed_server() {
        let repo = Arc::new(InMemoryConfigRepository::new());
        repo.save_server(server("s1")).await;
        let orch = orchestrator(repo.clone());
        orch.reconcile().await;
        assert!(orch.queue_manager.stats("s1").await.is_ok());

        repo.delete_server("s1").await;
        orch.reconcile().await;

        assert!(orch.servers.lock().await.is_empty());
        assert!(orch.queue_manager.stats("s1").await.is_err());
    }

    #[tokio::test]
    async fn reconcile_stops_workers_for_removed_streams() {
        let repo = Arc::new(InMemoryConfigRepository::new());
        repo.save_server(server("s1")).await;
        repo.save_stream(stream("stream-1", "s1")).await;
        let orch = orchestrator(repo.clone());

        orch.reconcile().await;
        assert_eq!(orch.streams.lock().await.len(), 1);

        repo.delete_stream("stream-1").await;
        orch.reconcile().await;
        assert!(orch.streams.lock().await.is_empty());
    }

    #[tokio::test]
    async fn modified_stream_is_restarted_and_flushes_its_destination_queue() {
        let repo = Arc::new(InMemoryConfigRepository::new());
        repo.save_server(server("s1")).await;
        repo.save_stream(stream("stream-1", "s1")).await;
        let orch = orchestrator(repo.clone());
        orch.reconcile().await;

        let original_token = orch.streams.lock().await["stream-1"].shutdown.clone();

        let mut modified = stream("stream-1", "s1");
        modified.poll_interval_seconds = 7200;
        repo.save_stream(modified).await;
        orch.reconcile().await;

        assert!(original_token.is_cancelled());
        let running = orch.streams.lock().await;
        assert_eq!(running.len(), 1);
        assert_eq!(running["stream-1"].config.poll_interval_seconds, 7200);
        assert!(!running["stream-1"].shutdown.is_cancelled());
    }

    #[tokio::test]
    async fn unchanged_stream_is_left_running_across_reconciliations() {
        let repo = Arc::new(InMemoryConfigRepository::new());
        repo.save_server(server("s1")).await;
        repo.save_stream(stream("stream-1", "s1")).await;
        let orch = orchestrator(repo.clone());
        orch.reconcile().await;

        let original_token = orch.streams.lock().await["stream-1"].shutdown.clone();
        orch.reconcile().await;

        assert!(!original_token.is_cancelled());
    }

    #[tokio::test]
    async fn invalid_stream_is_rejected_without_affecting_others() {
        let repo = Arc::new(InMemoryConfigRepository::new());
        repo.save_server(server("s1")).await;
        let mut invalid = stream("bad", "s1");
        invalid.poll_interval_seconds = 0;
        repo.save_stream(invalid).await;
        repo.save_stream(stream("good", "s1")).await;
        let orch = orchestrator(repo);

        orch.reconcile().await;

        let running = orch.streams.lock().await;
        assert_eq!(running.len(), 1);
        assert!(running.contains_key("good"));
    }
}
