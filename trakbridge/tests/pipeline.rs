//! End-to-end exercise of the full C1->C5 pipeline against an in-memory mock TAK "server" (a
//! local `TcpListener`).

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use tokio::io::AsyncReadExt;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

use trakbridge::orchestrator::Orchestrator;
use trakbridge::repository::{ConfigRepository, InMemoryConfigRepository};
use trakbridge::stream_worker::StreamWorker;
use trakbridge_core::config::{
    CotTypeMode, QueueConfig, StreamConfig, TakProtocol, TakServerConfig,
};
use trakbridge_core::queue::QueueManager;
use trakbridge_plugins::{DemoPositionPlugin, PluginRegistry};

async fn mock_tak_server() -> (std::net::SocketAddr, tokio::sync::oneshot::Receiver<Vec<u8>>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (tx, rx) = tokio::sync::oneshot::channel();

    tokio::spawn(async move {
        let (mut socket, _) = listener.accept().await.unwrap();
        let mut received = Vec::new();
        let mut buf = [0u8; 4096];
        loop {
            match tokio::time::timeout(Duration::from_millis(500), socket.read(&mut buf)).await {
                Ok(Ok(0)) | Err(_) => break,
                Ok(Ok(n)) => received.extend_from_slice(&buf[..n]),
                Ok(Err(_)) => break,
            }
        }
        let _ = tx.send(received);
    });

    (addr, rx)
}

fn stream_config(destination: &str) -> StreamConfig {
    let mut plugin_config = HashMap::new();
    plugin_config.insert("device_count".to_string(), serde_json::json!(3));
    StreamConfig {
        id: "demo-stream".to_string(),
        name: "Demo stream".to_string(),
        plugin_type: "demo".to_string(),
        plugin_config,
        poll_interval_seconds: 3600,
        cot_type_default: "a-f-G-U-C".to_string(),
        cot_stale_seconds: 300,
        cot_type_mode: CotTypeMode::Stream,
        destinations: HashSet::from([destination.to_string()]),
        enable_callsign_mapping: false,
        callsign_identifier_field: None,
        callsign_mappings: HashMap::new(),
    }
}

/// Drives a [`StreamWorker`] poll directly into a queue, then lets a spawned
/// [`trakbridge_transport::TransmissionWorker`] drain that queue onto a real (loopback) TCP
/// socket, and asserts the bytes the mock server received are well-formed CoT XML for every
/// device the plug-in generated.
#[tokio::test]
async fn demo_stream_reaches_a_live_tak_server_over_tcp() {
    let (addr, received_rx) = mock_tak_server().await;

    let queue_manager = Arc::new(QueueManager::new());
    queue_manager.create_queue("s1", QueueConfig::default()).await;

    let server = TakServerConfig {
        id: "s1".to_string(),
        name: "mock".to_string(),
        host: addr.ip().to_string(),
        port: addr.port(),
        protocol: TakProtocol::Tcp,
        tls_material: None,
    };
    let transmission_shutdown = CancellationToken::new();
    let transmission_worker = trakbridge_transport::TransmissionWorker::new(
        server,
        Arc::clone(&queue_manager),
        transmission_shutdown.clone(),
    );
    let transmission_handle = tokio::spawn(transmission_worker.run());

    let stream_shutdown = CancellationToken::new();
    let worker = StreamWorker::new(
        stream_config("s1"),
        Arc::new(DemoPositionPlugin::new()),
        Arc::clone(&queue_manager),
        trakbridge::config::ParallelConfig::default(),
        stream_shutdown,
    );
    worker.poll_once().await;

    let received = tokio::time::timeout(Duration::from_secs(2), received_rx)
        .await
        .expect("mock server should receive the batch within 2s")
        .unwrap();
    transmission_shutdown.cancel();
    let _ = tokio::time::timeout(Duration::from_secs(1), transmission_handle).await;

    let xml = String::from_utf8(received).unwrap();
    for i in 0..3 {
        assert!(
            xml.contains(&format!(r#"uid="demo-{i}""#)),
            "expected an event for demo-{i} in: {xml}"
        );
    }
    assert!(!xml.contains("<?xml"));
}

/// Exercises the orchestrator's reconciliation against the in-memory repository end to end:
/// saving a stream and a server causes a Transmission Worker to actually connect to the mock
/// server, and the Stream Worker's first poll reaches it through the full Queue Manager path.
#[tokio::test]
async fn orchestrator_wires_a_saved_stream_and_server_into_a_live_connection() {
    let (addr, received_rx) = mock_tak_server().await;

    let repository = Arc::new(InMemoryConfigRepository::new());
    repository
        .save_server(TakServerConfig {
            id: "s1".to_string(),
            name: "mock".to_string(),
            host: addr.ip().to_string(),
            port: addr.port(),
            protocol: TakProtocol::Tcp,
            tls_material: None,
        })
        .await;
    repository.save_stream(stream_config("s1")).await;

    let mut plugins = PluginRegistry::new();
    plugins.register(Arc::new(DemoPositionPlugin::new()));
    let queue_manager = Arc::new(QueueManager::new());

    let orchestrator = Orchestrator::new(
        Arc::clone(&repository) as Arc<dyn ConfigRepository>,
        plugins,
        Arc::clone(&queue_manager),
        QueueConfig::default(),
        trakbridge::config::ParallelConfig::default(),
    );
    orchestrator.reconcile().await;

    // The stream's poll interval is an hour, so nudge a batch through the queue directly rather
    // than waiting for the Stream Worker's own timer.
    queue_manager
        .enqueue_with_replacement(
            &[trakbridge_core::cot::CotEvent::build(
                &trakbridge_core::Position::new(
                    "direct-1",
                    "Direct",
                    1.0,
                    2.0,
                    chrono::Utc::now(),
                ),
                &trakbridge_core::cot::CotBuildOptions {
                    cot_type: "a-f-G-U-C".to_string(),
                    stale_seconds: 300,
                    team: None,
                },
            )
            .unwrap()],
            "s1",
        )
        .await
        .unwrap();

    let received = tokio::time::timeout(Duration::from_secs(2), received_rx)
        .await
        .expect("mock server should receive the directly-enqueued event")
        .unwrap();
    let xml = String::from_utf8(received).unwrap();
    assert!(xml.contains(r#"uid="direct-1""#));
}
