//! The config repository interface: streams and destination servers are persisted by
//! an external collaborator reached through this abstract interface. The core pipeline makes no
//! assumption about the backing store; schema evolution is the repository's concern.
//!
//! Only an in-memory implementation ships here, for tests and examples — a real deployment's
//! admin UI / relational store (out of scope here) supplies its own.

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::RwLock;
use trakbridge_core::config::{StreamConfig, TakServerConfig};

/// Everything the Orchestrator (§4.6) needs to reconcile workers against: the full set of
/// configured streams and destination servers.
#[async_trait]
pub trait ConfigRepository: Send + Sync {
    async fn list_streams(&self) -> Vec<StreamConfig>;
    async fn list_servers(&self) -> Vec<TakServerConfig>;
    async fn save_stream(&self, stream: StreamConfig);
    async fn save_server(&self, server: TakServerConfig);
    async fn delete_stream(&self, stream_id: &str);
    async fn delete_server(&self, server_id: &str);
}

/// An in-process [`ConfigRepository`] backed by two `HashMap`s behind an `RwLock`. Suitable for
/// tests, examples, and single-process deployments that don't need external persistence.
#[derive(Default)]
pub struct InMemoryConfigRepository {
    streams: RwLock<HashMap<String, StreamConfig>>,
    servers: RwLock<HashMap<String, TakServerConfig>>,
}

impl InMemoryConfigRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ConfigRepository for InMemoryConfigRepository {
    async fn list_streams(&self) -> Vec<StreamConfig> {
        self.streams.read().await.values().cloned().collect()
    }

    async fn list_servers(&self) -> Vec<TakServerConfig> {
        self.servers.read().await.values().cloned().collect()
    }

    async fn save_stream(&self, stream: StreamConfig) {
        self.streams.write().await.insert(stream.id.clone(), stream);
    }

    async fn save_server(&self, server: TakServerConfig) {
        self.servers.write().await.insert(server.id.clone(), server);
    }

    async fn delete_stream(&self, stream_id: &str) {
        self.streams.write().await.remove(stream_id);
    }

    async fn delete_server(&self, server_id: &str) {
        self.servers.write().await.remove(server_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::{HashMap as StdHashMap, HashSet};
    use trakbridge_core::config::{CotTypeMode, TakProtocol};

    fn stream(id: &str) -> StreamConfig {
        StreamConfig {
            id: id.to_string(),
            name: id.to_string(),
            plugin_type: "demo".to_string(),
            plugin_config: StdHashMap::new(),
            poll_interval_seconds: 10,
            cot_type_default: "a-f-G-U-C".to_string(),
            cot_stale_seconds: 300,
            cot_type_mode: CotTypeMode::Stream,
            destinations: HashSet::from(["s1".to_string()]),
            enable_callsign_mapping: false,
            callsign_identifier_field: None,
            callsign_mappings: StdHashMap::new(),
        }
    }

    fn server(id: &str) -> TakServerConfig {
        TakServerConfig {
            id: id.to_string(),
            name: id.to_string(),
            host: "127.0.0.1".to_string(),
            port: 8089,
            protocol: TakProtocol::Tcp,
            tls_material: None,
        }
    }

    #[tokio::test]
    async fn save_list_and_delete_round_trip() {
        let repo = InMemoryConfigRepository::new();
        repo.save_stream(stream("a")).await;
        repo.save_server(server("s1")).await;
        assert_eq!(repo.list_streams().await.len(), 1);
        assert_eq!(repo.list_servers().await.len(), 1);

        repo.delete_stream("a").await;
        repo.delete_server("s1").await;
        assert!(repo.list_streams().await.is_empty());
        assert!(repo.list_servers().await.is_empty());
    }

    #[tokio::test]
    async fn saving_a_stream_with_the_same_id_replaces_it() {
        let repo = InMemoryConfigRepository::new();
        repo.save_stream(stream("a")).await;
        let mut updated = stream("a");
        updated.poll_interval_seconds = 99;
        repo.save_stream(updated).await;
        let streams = repo.list_streams().await;
        assert_eq!(streams.len(), 1);
        assert_eq!(streams[0].poll_interval_seconds, 99);
    }
}
