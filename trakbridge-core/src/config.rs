//! Domain configuration types: streams, destinations, and the queue/transmission
//! tuning knobs that the YAML config in the `trakbridge` binary crate ultimately feeds in.

use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

/// Whether a stream's CoT `type` attribute is fixed for every point, or derived per-point from
/// provider-supplied hints.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CotTypeMode {
    Stream,
    PerPoint,
}

/// Per-identifier callsign mapping entry.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CallsignMapping {
    pub callsign: String,
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default)]
    pub cot_type_override: Option<String>,
    #[serde(default)]
    pub team_role: Option<String>,
    #[serde(default)]
    pub team_color: Option<String>,
}

fn default_true() -> bool {
    true
}

impl CallsignMapping {
    /// A mapping is a team-member entry, and should emit `<__group>`, only when both a role and
    /// a color are present.
    pub fn team_member(&self) -> Option<crate::cot::TeamMember> {
        match (&self.team_role, &self.team_color) {
            (Some(role), Some(color)) => Some(crate::cot::TeamMember {
                color: color.clone(),
                role: role.clone(),
            }),
            _ => None,
        }
    }
}

/// A single configured provider-polling pipeline bound to one or more destinations.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct StreamConfig {
    pub id: String,
    pub name: String,
    pub plugin_type: String,
    #[serde(default)]
    pub plugin_config: HashMap<String, serde_json::Value>,
    pub poll_interval_seconds: u64,
    pub cot_type_default: String,
    pub cot_stale_seconds: i64,
    #[serde(default = "default_cot_type_mode")]
    pub cot_type_mode: CotTypeMode,
    pub destinations: HashSet<String>,
    #[serde(default)]
    pub enable_callsign_mapping: bool,
    #[serde(default)]
    pub callsign_identifier_field: Option<String>,
    #[serde(default)]
    pub callsign_mappings: HashMap<String, CallsignMapping>,
}

fn default_cot_type_mode() -> CotTypeMode {
    CotTypeMode::PerPoint
}

/// Errors returned by [`StreamConfig::validate`].
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum StreamConfigError {
    #[error("poll_interval_seconds must be greater than zero")]
    NonPositivePollInterval,
    #[error("cot_stale_seconds must be greater than zero")]
    NonPositiveStale,
    #[error("destinations must not be empty")]
    NoDestinations,
}

impl StreamConfig {
    pub fn validate(&self) -> Result<(), StreamConfigError> {
        if self.poll_interval_seconds == 0 {
            return Err(StreamConfigError::NonPositivePollInterval);
        }
        if self.cot_stale_seconds <= 0 {
            return Err(StreamConfigError::NonPositiveStale);
        }
        if self.destinations.is_empty() {
            return Err(StreamConfigError::NoDestinations);
        }
        Ok(())
    }
}

/// Transport protocol for a TAK server destination.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TakProtocol {
    Tcp,
    Tls,
}

/// TLS material for a destination that uses `protocol = tls`.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct TlsMaterial {
    /// Path to a PEM client certificate, presented to the server when set.
    #[serde(default)]
    pub client_cert_path: Option<String>,
    /// Path to the PEM private key matching `client_cert_path`.
    #[serde(default)]
    pub client_key_path: Option<String>,
    /// Path to a PEM CA bundle to validate the server certificate against. When unset, the
    /// platform's native trust store is used.
    #[serde(default)]
    pub ca_path: Option<String>,
    /// An exact server certificate fingerprint (hex SHA-256) to pin to, bypassing CA validation.
    #[serde(default)]
    pub server_fingerprint_sha256: Option<String>,
}

/// A destination TAK server.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TakServerConfig {
    pub id: String,
    pub name: String,
    pub host: String,
    pub port: u16,
    pub protocol: TakProtocol,
    #[serde(default)]
    pub tls_material: Option<TlsMaterial>,
}

/// Overflow policy applied when a destination's queue is at `max_size`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OverflowStrategy {
    DropOldest,
    DropNewest,
    Block,
}

impl Default for OverflowStrategy {
    fn default() -> Self {
        OverflowStrategy::DropOldest
    }
}

/// Per-destination queue tuning.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct QueueConfig {
    #[serde(default = "QueueConfig::default_max_size")]
    pub max_size: usize,
    #[serde(default = "QueueConfig::default_batch_size")]
    pub batch_size: usize,
    #[serde(default)]
    pub overflow_strategy: OverflowStrategy,
    #[serde(default = "QueueConfig::default_flush_on_config_change")]
    pub flush_on_config_change: bool,
    #[serde(default = "QueueConfig::default_batch_timeout_ms")]
    pub batch_timeout_ms: u64,
}

impl QueueConfig {
    const fn default_max_size() -> usize {
        500
    }
    const fn default_batch_size() -> usize {
        8
    }
    const fn default_flush_on_config_change() -> bool {
        true
    }
    const fn default_batch_timeout_ms() -> u64 {
        100
    }
}

impl Default for QueueConfig {
    fn default() -> Self {
        QueueConfig {
            max_size: Self::default_max_size(),
            batch_size: Self::default_batch_size(),
            overflow_strategy: OverflowStrategy::default(),
            flush_on_config_change: Self::default_flush_on_config_change(),
            batch_timeout_ms: Self::default_batch_timeout_ms(),
        }
    }
}
