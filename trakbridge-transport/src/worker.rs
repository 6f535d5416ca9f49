//! The Transmission Worker (C5): one task per destination, draining its queue and
//! writing events to the TAK server over the connection state machine in [`crate::state`], with
//! exponential backoff reconnect on a failed or dropped connection. Never holds the queue's
//! internal lock while writing to the network —
//! `QueueManager::dequeue_batch` already copies the batch out and releases it before returning.

use std::time::Duration;

use backoff::backoff::Backoff;
use backoff::ExponentialBackoff;
use tokio_util::sync::CancellationToken;
use trakbridge_core::config::TakServerConfig;
use trakbridge_core::error::TransmitError;
use trakbridge_core::queue::QueueManager;
use tracing::{debug, info, warn};

use crate::connection::Connection;
use crate::state::ConnectionState;

/// How many events the worker asks the queue for per drain. Mirrors the destination's own
/// `QueueConfig::batch_size`, so this is just the default used if the caller doesn't look it up
/// itself.
const DEFAULT_BATCH_SIZE: usize = 8;

/// Default per-write deadline, used if the caller doesn't derive one from the destination's own
/// `QueueConfig::batch_timeout_ms`.
const DEFAULT_WRITE_TIMEOUT: Duration = Duration::from_millis(1000);

fn reconnect_backoff() -> ExponentialBackoff {
    ExponentialBackoff {
        initial_interval: Duration::from_secs(1),
        max_interval: Duration::from_secs(60),
        multiplier: 2.0,
        max_elapsed_time: None,
        ..Default::default()
    }
}

/// Drives one destination's connection for as long as `shutdown` is not cancelled, then drains
/// and stops. Intended to be spawned as its own task by the orchestrator.
pub struct TransmissionWorker {
    server: TakServerConfig,
    queue_manager: std::sync::Arc<QueueManager>,
    shutdown: CancellationToken,
    batch_size: usize,
    write_timeout: Duration,
}

impl TransmissionWorker {
    pub fn new(
        server: TakServerConfig,
        queue_manager: std::sync::Arc<QueueManager>,
        shutdown: CancellationToken,
    ) -> Self {
        TransmissionWorker {
            server,
            queue_manager,
            shutdown,
            batch_size: DEFAULT_BATCH_SIZE,
            write_timeout: DEFAULT_WRITE_TIMEOUT,
        }
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    /// Overrides the per-write deadline, normally derived from the destination's
    /// `QueueConfig::batch_timeout_ms × 10`.
    pub fn with_write_timeout(mut self, write_timeout: Duration) -> Self {
        self.write_timeout = write_timeout;
        self
    }

    pub async fn run(mut self) {
        let mut state = ConnectionState::Disconnected;
        let mut connection: Option<Connection> = None;
        let mut backoff = reconnect_backoff();

        loop {
            let previous_state = state;
            state = match state {
                ConnectionState::Stopped => break,

                ConnectionState::Disconnected => {
                    if self.shutdown.is_cancelled() {
                        ConnectionState::Stopped
                    } else {
                        ConnectionState::Connecting
                    }
                }

                ConnectionState::Connecting => match Connection::connect(&self.server).await {
                    Ok(conn) => {
                        info!(destination = %self.server.id, "connected");
                        connection = Some(conn);
                        backoff.reset();
                        ConnectionState::Connected
                    }
                    Err(error) => {
                        let delay = backoff.next_backoff().unwrap_or(Duration::from_secs(60));
                        warn!(destination = %self.server.id, %error, delay_ms = delay.as_millis() as u64, "connect failed, backing off");
                        tokio::select! {
                            _ = tokio::time::sleep(delay) => {}
                            _ = self.shutdown.cancelled() => {}
                        }
                        ConnectionState::Disconnected
                    }
                },

                ConnectionState::Connected => {
                    let batch = tokio::select! {
                        batch = self.queue_manager.dequeue_batch(&self.server.id, self.batch_size) => batch,
                        _ = self.shutdown.cancelled() => Ok(Vec::new()),
                    };

                    let entries = match batch {
                        Ok(entries) => entries,
                        Err(error) => {
                            warn!(destination = %self.server.id, %error, "queue manager has no queue for this destination; stopping");
                            break;
                        }
                    };

                    let conn = connection.as_mut().expect("Connected state implies a live connection");
                    let mut write_failed = false;
                    for entry in &entries {
                        match tokio::time::timeout(self.write_timeout, conn.write_event(&entry.xml_bytes)).await {
                            Ok(Ok(())) => {}
                            Ok(Err(error)) => {
                                warn!(destination = %self.server.id, %error, "write failed, reconnecting");
                                write_failed = true;
                                break;
                            }
                            Err(_elapsed) => {
                                let error = TransmitError::WriteTimeout;
                                warn!(destination = %self.server.id, %error, "reconnecting");
                                write_failed = true;
                                break;
                            }
                        }
                    }

                    if write_failed {
                        connection = None;
                        // Latest-position semantics mean a lost batch is acceptable under every
                        // overflow strategy except `block`, where a producer may be waiting on
                        // the space this batch would have freed.
                        if matches!(
                            self.queue_manager.overflow_strategy(&self.server.id).await,
                            Ok(trakbridge_core::config::OverflowStrategy::Block)
                        ) {
                            if let Err(error) = self
                                .queue_manager
                                .requeue_at_head(&self.server.id, entries)
                                .await
                            {
                                warn!(destination = %self.server.id, %error, "failed to requeue batch after write failure");
                            }
                        }
                        ConnectionState::Disconnected
                    } else if self.shutdown.is_cancelled() {
                        ConnectionState::Draining
                    } else {
                        ConnectionState::Connected
                    }
                }

                ConnectionState::Draining => {
                    if let Some(conn) = connection.as_mut() {
                        // Hard deadline: don't let a hung close() block shutdown.
                        let _ = tokio::time::timeout(Duration::from_secs(5), conn.shutdown()).await;
                    }
                    debug!(destination = %self.server.id, "drained and stopping");
                    ConnectionState::Stopped
                }
            };

            debug_assert!(
                previous_state.can_transition_to(state),
                "illegal connection state transition: {previous_state:?} -> {state:?}"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use tokio::io::AsyncReadExt;
    use tokio::net::TcpListener;
    use trakbridge_core::config::{QueueConfig, TakProtocol};
    use trakbridge_core::cot::{CotBuildOptions, CotEvent};
    use trakbridge_core::position::Position;

    fn server(port: u16) -> TakServerConfig {
        TakServerConfig {
            id: "s1".to_string(),
            name: "test".to_string(),
            host: "127.0.0.1".to_string(),
            port,
            protocol: TakProtocol::Tcp,
            tls_material: None,
        }
    }

    fn event(uid: &str) -> CotEvent {
        let position = Position::new(uid, uid, 1.0, 2.0, chrono::Utc::now());
        let opts = CotBuildOptions {
            cot_type: "a-f-G-U-C".to_string(),
            stale_seconds: 300,
            team: None,
        };
        CotEvent::build(&position, &opts).unwrap()
    }

    #[tokio::test]
    async fn drains_a_queued_batch_onto_a_live_connection_then_stops_on_shutdown() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let accepted = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = vec![0u8; 4096];
            let n = socket.read(&mut buf).await.unwrap();
            buf.truncate(n);
            buf
        });

        let queue_manager = Arc::new(QueueManager::new());
        queue_manager.create_queue("s1", QueueConfig::default()).await;
        queue_manager
            .enqueue_with_replacement(&[event("a")], "s1")
            .await
            .unwrap();

        let shutdown = CancellationToken::new();
        let worker = TransmissionWorker::new(server(addr.port()), Arc::clone(&queue_manager), shutdown.clone());
        let handle = tokio::spawn(worker.run());

        let received = tokio::time::timeout(Duration::from_secs(2), accepted)
            .await
            .expect("server should receive the batch")
            .unwrap();
        assert!(std::str::from_utf8(&received).unwrap().contains(r#"uid="a""#));

        shutdown.cancel();
        tokio::time::timeout(Duration::from_secs(2), handle)
            .await
            .expect("worker should stop after shutdown")
            .unwrap();
    }

    #[tokio::test]
    async fn custom_write_timeout_does_not_interfere_with_a_healthy_connection() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let accepted = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = vec![0u8; 4096];
            let n = socket.read(&mut buf).await.unwrap();
            buf.truncate(n);
            buf
        });

        let queue_manager = Arc::new(QueueManager::new());
        queue_manager.create_queue("s1", QueueConfig::default()).await;
        queue_manager
            .enqueue_with_replacement(&[event("a")], "s1")
            .await
            .unwrap();

        let shutdown = CancellationToken::new();
        let worker = TransmissionWorker::new(server(addr.port()), Arc::clone(&queue_manager), shutdown.clone())
            .with_write_timeout(Duration::from_millis(50));
        let handle = tokio::spawn(worker.run());

        let received = tokio::time::timeout(Duration::from_secs(2), accepted)
            .await
            .expect("server should receive the batch well within the write deadline")
            .unwrap();
        assert!(std::str::from_utf8(&received).unwrap().contains(r#"uid="a""#));

        shutdown.cancel();
        let _ = tokio::time::timeout(Duration::from_secs(2), handle).await;
    }

    #[tokio::test]
    async fn reconnects_after_the_destination_becomes_available() {
        // Reserve a port, then close it immediately so the first connect attempt fails.
        let probe = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = probe.local_addr().unwrap();
        drop(probe);

        let queue_manager = Arc::new(QueueManager::new());
        queue_manager.create_queue("s1", QueueConfig::default()).await;

        let shutdown = CancellationToken::new();
        let worker = TransmissionWorker::new(server(addr.port()), Arc::clone(&queue_manager), shutdown.clone());
        let handle = tokio::spawn(worker.run());

        // Give the worker a moment to observe the failed connect and enter backoff.
        tokio::time::sleep(Duration::from_millis(50)).await;

        let listener = TcpListener::bind(addr).await.unwrap();
        let accepted = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = vec![0u8; 4096];
            let n = socket.read(&mut buf).await.unwrap();
            buf.truncate(n);
            buf
        });

        queue_manager
            .enqueue_with_replacement(&[event("b")], "s1")
            .await
            .unwrap();

        let received = tokio::time::timeout(Duration::from_secs(5), accepted)
            .await
            .expect("server should eventually receive the batch after reconnecting")
            .unwrap();
        assert!(std::str::from_utf8(&received).unwrap().contains(r#"uid="b""#));

        shutdown.cancel();
        let _ = tokio::time::timeout(Duration::from_secs(2), handle).await;
    }
}
