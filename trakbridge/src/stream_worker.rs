//! The Stream Worker (C2): polls one provider plug-in on its configured interval,
//! normalizes and validates the returned positions, builds CoT events, and enqueues them to every
//! destination the stream targets. Never propagates an error out of `run` — every error kind is
//! caught and logged at the component boundary it originates from.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use trakbridge_core::cot::{CotBuildOptions, CotEvent, TeamMember};
use trakbridge_core::config::{CotTypeMode, StreamConfig};
use trakbridge_core::error::FetchError;
use trakbridge_core::position::Position;
use trakbridge_core::queue::QueueManager;
use trakbridge_plugins::{FetchContext, ProviderPlugin};
use tracing::{debug, info, warn};

use crate::config::ParallelConfig;

pub struct StreamWorker {
    stream: StreamConfig,
    plugin: Arc<dyn ProviderPlugin>,
    queue_manager: Arc<QueueManager>,
    parallel: ParallelConfig,
    shutdown: CancellationToken,
}

impl StreamWorker {
    pub fn new(
        stream: StreamConfig,
        plugin: Arc<dyn ProviderPlugin>,
        queue_manager: Arc<QueueManager>,
        parallel: ParallelConfig,
        shutdown: CancellationToken,
    ) -> Self {
        StreamWorker {
            stream,
            plugin,
            queue_manager,
            parallel,
            shutdown,
        }
    }

    #[tracing::instrument(skip_all, fields(stream_id = %self.stream.id))]
    pub async fn run(self) {
        let mut interval = Duration::from_secs(self.stream.poll_interval_seconds);

        loop {
            tokio::select! {
                _ = tokio::time::sleep(interval) => {}
                _ = self.shutdown.cancelled() => break,
            }

            interval = self.poll_once().await;
        }

        debug!("stream worker stopped");
    }

    /// Runs one poll cycle and returns the delay to apply before the next one: the stream's
    /// configured interval, unless the provider reported a transient error that suggests a
    /// different backoff (a timeout or rate limit, typically).
    ///
    /// The fetch is bounded by a deadline no longer than the poll interval and raced against
    /// worker shutdown, so a provider that hangs past cancellation can never block this loop past
    /// the current poll cycle.
    async fn poll_once(&self) -> Duration {
        let default_interval = Duration::from_secs(self.stream.poll_interval_seconds);
        let ctx = FetchContext::new(self.shutdown.clone(), default_interval);

        let fetch_result = tokio::select! {
            result = tokio::time::timeout(default_interval, self.plugin.fetch(&ctx, &self.stream.plugin_config)) => result,
            _ = self.shutdown.cancelled() => return default_interval,
        };

        let positions = match fetch_result {
            Ok(Ok(positions)) => positions,
            Ok(Err(error)) => {
                warn!(%error, "provider fetch failed");
                return error.suggested_backoff().unwrap_or(default_interval);
            }
            Err(_elapsed) => {
                let error = FetchError::Timeout("provider fetch exceeded poll interval deadline".to_string());
                warn!(%error, "provider fetch failed");
                return error.suggested_backoff().unwrap_or(default_interval);
            }
        };

        let mut positions: Vec<Position> = positions
            .into_iter()
            .filter(|p| match p.validate() {
                Ok(()) => true,
                Err(error) => {
                    debug!(uid = %p.uid, %error, "dropping invalid position");
                    false
                }
            })
            .collect();

        if self.stream.enable_callsign_mapping {
            if let Some(field) = &self.stream.callsign_identifier_field {
                self.plugin
                    .apply_callsign_mapping(&mut positions, field, &self.stream.callsign_mappings);
            }
        }

        let events = self.build_events(&positions).await;
        self.enqueue(&events).await;

        default_interval
    }

    async fn build_events(&self, positions: &[Position]) -> Vec<CotEvent> {
        if positions.len() >= self.parallel.batch_size_threshold {
            self.build_events_parallel(positions).await
        } else {
            self.build_events_serial(positions)
        }
    }

    fn build_events_serial(&self, positions: &[Position]) -> Vec<CotEvent> {
        positions
            .iter()
            .filter_map(|p| self.build_one(p).ok())
            .collect()
    }

    /// Builds CoT events across a bounded task pool when a poll returns enough positions to make
    /// it worthwhile. A panicking build task is itself just an isolated
    /// per-item failure; when `fallback_on_error` is
    /// set, any panic in the batch causes the whole batch to be rebuilt serially instead, on the
    /// assumption that a panic indicates something the isolated per-item error path didn't catch.
    async fn build_events_parallel(&self, positions: &[Position]) -> Vec<CotEvent> {
        let mut join_set = tokio::task::JoinSet::new();
        let mut events = Vec::with_capacity(positions.len());
        let mut saw_panic = false;

        for chunk in positions.chunks(self.parallel.max_concurrent_tasks.max(1)) {
            for position in chunk {
                let opts = self.build_options(position);
                let position = position.clone();
                join_set.spawn(async move { CotEvent::build(&position, &opts) });
            }
            while let Some(result) = join_set.join_next().await {
                match result {
                    Ok(Ok(event)) => events.push(event),
                    Ok(Err(error)) => debug!(%error, "dropping position that failed CoT build"),
                    Err(join_error) => {
                        warn!(%join_error, "CoT build task panicked");
                        saw_panic = true;
                    }
                }
            }
        }

        if saw_panic && self.parallel.fallback_on_error {
            warn!("falling back to serial CoT construction after a parallel build task panicked");
            return self.build_events_serial(positions);
        }

        events
    }

    fn build_one(&self, position: &Position) -> Result<CotEvent, trakbridge_core::error::CotBuildError> {
        let opts = self.build_options(position);
        CotEvent::build(position, &opts)
    }

    /// Resolves the event `type` by a fixed priority: (i) a per-mapping
    /// override, regardless of `cot_type_mode`; (ii) `cot_type_hint` when the stream runs in
    /// `per_point` mode; (iii) the stream's default.
    fn build_options(&self, position: &Position) -> CotBuildOptions {
        let cot_type = self
            .resolve_cot_type_override(position)
            .or_else(|| match self.stream.cot_type_mode {
                CotTypeMode::PerPoint => position.cot_type_hint.clone(),
                CotTypeMode::Stream => None,
            })
            .unwrap_or_else(|| self.stream.cot_type_default.clone());

        CotBuildOptions {
            cot_type,
            stale_seconds: self.stream.cot_stale_seconds,
            team: self.resolve_team(position),
        }
    }

    fn matching_mapping(&self, position: &Position) -> Option<&trakbridge_core::config::CallsignMapping> {
        if !self.stream.enable_callsign_mapping {
            return None;
        }
        let field = self.stream.callsign_identifier_field.as_ref()?;
        let identifier = position.extra.get(field)?.as_str()?;
        self.stream
            .callsign_mappings
            .get(identifier)
            .filter(|m| m.enabled)
    }

    fn resolve_cot_type_override(&self, position: &Position) -> Option<String> {
        self.matching_mapping(position)?.cot_type_override.clone()
    }

    fn resolve_team(&self, position: &Position) -> Option<TeamMember> {
        self.matching_mapping(position)?.team_member()
    }

    async fn enqueue(&self, events: &[CotEvent]) {
        if events.is_empty() {
            return;
        }
        for destination in &self.stream.destinations {
            if let Err(error) = self
                .queue_manager
                .enqueue_with_replacement(events, destination)
                .await
            {
                warn!(destination = %destination, %error, "failed to enqueue to destination");
            }
        }
        info!(count = events.len(), "enqueued events");
    }
}
