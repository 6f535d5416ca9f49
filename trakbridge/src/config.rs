//! Top-level application configuration: YAML file plus `TRAKBRIDGE_`-prefixed
//! environment overrides, split between process-wide settings and the domain defaults
//! layered on top of [`trakbridge_core::config`].

use std::path::Path;

use serde::{Deserialize, Serialize};
use trakbridge_core::config::OverflowStrategy;
use trakbridge_core::error::ConfigError;
use tracing::warn;

/// Output format for the tracing subscriber: `pretty` for interactive use, `json`
/// for production.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    Pretty,
    Json,
}

impl Default for LogFormat {
    fn default() -> Self {
        LogFormat::Pretty
    }
}

/// Logging configuration.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default)]
    pub format: LogFormat,
    /// An `EnvFilter` directive string, e.g. `"trakbridge=debug,info"`.
    #[serde(default = "LoggingConfig::default_filter")]
    pub filter: String,
}

impl LoggingConfig {
    fn default_filter() -> String {
        "info".to_string()
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        LoggingConfig {
            format: LogFormat::default(),
            filter: Self::default_filter(),
        }
    }
}

/// `queue.*` — layered on top of [`trakbridge_core::config::QueueConfig`] as the
/// default applied to every destination unless a destination overrides it.
pub type QueueDefaults = trakbridge_core::config::QueueConfig;

/// `transmission.*`.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct TransmissionConfig {
    #[serde(default = "TransmissionConfig::default_queue_check_interval_ms")]
    pub queue_check_interval_ms: u64,
}

impl TransmissionConfig {
    const fn default_queue_check_interval_ms() -> u64 {
        50
    }
}

impl Default for TransmissionConfig {
    fn default() -> Self {
        TransmissionConfig {
            queue_check_interval_ms: Self::default_queue_check_interval_ms(),
        }
    }
}

/// `monitoring.*`.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct MonitoringConfig {
    #[serde(default = "MonitoringConfig::default_log_queue_stats")]
    pub log_queue_stats: bool,
    #[serde(default = "MonitoringConfig::default_queue_warning_threshold")]
    pub queue_warning_threshold: usize,
}

impl MonitoringConfig {
    const fn default_log_queue_stats() -> bool {
        true
    }
    const fn default_queue_warning_threshold() -> usize {
        400
    }
}

impl Default for MonitoringConfig {
    fn default() -> Self {
        MonitoringConfig {
            log_queue_stats: Self::default_log_queue_stats(),
            queue_warning_threshold: Self::default_queue_warning_threshold(),
        }
    }
}

/// `parallel.*` — thresholds the Stream Worker uses to decide whether to build a
/// poll's CoT events serially or across a task pool.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct ParallelConfig {
    #[serde(default = "ParallelConfig::default_batch_size_threshold")]
    pub batch_size_threshold: usize,
    #[serde(default = "ParallelConfig::default_max_concurrent_tasks")]
    pub max_concurrent_tasks: usize,
    #[serde(default = "ParallelConfig::default_fallback_on_error")]
    pub fallback_on_error: bool,
}

impl ParallelConfig {
    const fn default_batch_size_threshold() -> usize {
        10
    }
    const fn default_max_concurrent_tasks() -> usize {
        50
    }
    const fn default_fallback_on_error() -> bool {
        true
    }
}

impl Default for ParallelConfig {
    fn default() -> Self {
        ParallelConfig {
            batch_size_threshold: Self::default_batch_size_threshold(),
            max_concurrent_tasks: Self::default_max_concurrent_tasks(),
            fallback_on_error: Self::default_fallback_on_error(),
        }
    }
}

/// `device_state.*` — tuning for the periodic device-state eviction sweep. Both fields are
/// optional; eviction is disabled unless both are set.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct DeviceStateConfig {
    #[serde(default)]
    pub eviction_interval_seconds: Option<u64>,
    #[serde(default)]
    pub eviction_horizon_seconds: Option<u64>,
}

/// The full application configuration, loaded from YAML and then overlaid with `TRAKBRIDGE_`
/// environment variables.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub queue: QueueDefaults,
    #[serde(default)]
    pub transmission: TransmissionConfig,
    #[serde(default)]
    pub monitoring: MonitoringConfig,
    #[serde(default)]
    pub parallel: ParallelConfig,
    #[serde(default)]
    pub device_state: DeviceStateConfig,
    /// How often the orchestrator re-reads the config repository and reconciles workers.
    #[serde(default = "AppConfig::default_reconcile_interval_seconds")]
    pub reconcile_interval_seconds: u64,
}

impl AppConfig {
    const fn default_reconcile_interval_seconds() -> u64 {
        30
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        AppConfig {
            logging: LoggingConfig::default(),
            queue: QueueDefaults::default(),
            transmission: TransmissionConfig::default(),
            monitoring: MonitoringConfig::default(),
            parallel: ParallelConfig::default(),
            device_state: DeviceStateConfig::default(),
            reconcile_interval_seconds: Self::default_reconcile_interval_seconds(),
        }
    }
}

/// Reads and parses `path`, then applies `TRAKBRIDGE_`-prefixed environment overrides.
pub fn load_config(path: &Path) -> Result<AppConfig, ConfigError> {
    let content = std::fs::read_to_string(path).map_err(|e| ConfigError::Read {
        path: path.display().to_string(),
        source: std::sync::Arc::new(e),
    })?;
    let mut config: AppConfig =
        serde_yaml::from_str(&content).map_err(|e| ConfigError::Parse(e.to_string()))?;
    apply_env_overrides(&mut config)?;
    validate(&config)?;
    Ok(config)
}

/// Overlays `TRAKBRIDGE_`-prefixed environment variables onto `config`. Dotted YAML keys map to
/// underscore-joined env var names, e.g. `queue.max_size` -> `TRAKBRIDGE_QUEUE_MAX_SIZE`.
fn apply_env_overrides(config: &mut AppConfig) -> Result<(), ConfigError> {
    if let Some(v) = env_usize("TRAKBRIDGE_QUEUE_MAX_SIZE") {
        config.queue.max_size = require_positive("queue.max_size", v)?;
    }
    if let Some(v) = env_usize("TRAKBRIDGE_QUEUE_BATCH_SIZE") {
        config.queue.batch_size = require_positive("queue.batch_size", v)?;
    }
    if let Some(v) = std::env::var("TRAKBRIDGE_QUEUE_OVERFLOW_STRATEGY").ok() {
        config.queue.overflow_strategy = parse_overflow_strategy(&v);
    }
    if let Some(v) = env_bool("TRAKBRIDGE_QUEUE_FLUSH_ON_CONFIG_CHANGE") {
        config.queue.flush_on_config_change = v;
    }
    if let Some(v) = env_u64("TRAKBRIDGE_TRANSMISSION_BATCH_TIMEOUT_MS") {
        config.queue.batch_timeout_ms = require_positive_u64("transmission.batch_timeout_ms", v)?;
    }
    if let Some(v) = env_u64("TRAKBRIDGE_TRANSMISSION_QUEUE_CHECK_INTERVAL_MS") {
        config.transmission.queue_check_interval_ms =
            require_positive_u64("transmission.queue_check_interval_ms", v)?;
    }
    if let Some(v) = env_bool("TRAKBRIDGE_MONITORING_LOG_QUEUE_STATS") {
        config.monitoring.log_queue_stats = v;
    }
    if let Some(v) = env_usize("TRAKBRIDGE_MONITORING_QUEUE_WARNING_THRESHOLD") {
        config.monitoring.queue_warning_threshold = v;
    }
    if let Some(v) = env_usize("TRAKBRIDGE_PARALLEL_BATCH_SIZE_THRESHOLD") {
        config.parallel.batch_size_threshold = v;
    }
    if let Some(v) = env_usize("TRAKBRIDGE_PARALLEL_MAX_CONCURRENT_TASKS") {
        config.parallel.max_concurrent_tasks = require_positive("parallel.max_concurrent_tasks", v)?;
    }
    if let Some(v) = env_bool("TRAKBRIDGE_PARALLEL_FALLBACK_ON_ERROR") {
        config.parallel.fallback_on_error = v;
    }
    Ok(())
}

fn env_usize(key: &str) -> Option<usize> {
    std::env::var(key).ok().and_then(|v| v.parse().ok())
}

fn env_u64(key: &str) -> Option<u64> {
    std::env::var(key).ok().and_then(|v| v.parse().ok())
}

fn env_bool(key: &str) -> Option<bool> {
    std::env::var(key).ok().and_then(|v| v.parse().ok())
}

fn require_positive(field: &str, value: usize) -> Result<usize, ConfigError> {
    if value == 0 {
        Err(ConfigError::InvalidValue {
            field: field.to_string(),
            message: "must be greater than zero".to_string(),
        })
    } else {
        Ok(value)
    }
}

fn require_positive_u64(field: &str, value: u64) -> Result<u64, ConfigError> {
    if value == 0 {
        Err(ConfigError::InvalidValue {
            field: field.to_string(),
            message: "must be greater than zero".to_string(),
        })
    } else {
        Ok(value)
    }
}

/// An unrecognized `overflow_strategy` value is corrected to the documented default with a
/// logged warning — it isn't a structurally-required-positive field, so it's not
/// a hard error.
fn parse_overflow_strategy(raw: &str) -> OverflowStrategy {
    match raw {
        "drop_oldest" => OverflowStrategy::DropOldest,
        "drop_newest" => OverflowStrategy::DropNewest,
        "block" => OverflowStrategy::Block,
        other => {
            warn!(value = other, "unrecognized queue.overflow_strategy, using default drop_oldest");
            OverflowStrategy::DropOldest
        }
    }
}

fn validate(config: &AppConfig) -> Result<(), ConfigError> {
    require_positive("queue.max_size", config.queue.max_size)?;
    require_positive("queue.batch_size", config.queue.batch_size)?;
    require_positive_u64("queue.batch_timeout_ms", config.queue.batch_timeout_ms)?;
    require_positive_u64(
        "reconcile_interval_seconds",
        config.reconcile_interval_seconds,
    )?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let config = AppConfig::default();
        assert_eq!(config.queue.max_size, 500);
        assert_eq!(config.queue.batch_size, 8);
        assert_eq!(config.queue.batch_timeout_ms, 100);
        assert_eq!(config.transmission.queue_check_interval_ms, 50);
        assert!(config.monitoring.log_queue_stats);
        assert_eq!(config.monitoring.queue_warning_threshold, 400);
        assert_eq!(config.parallel.batch_size_threshold, 10);
        assert_eq!(config.parallel.max_concurrent_tasks, 50);
        assert!(config.parallel.fallback_on_error);
    }

    #[test]
    fn unrecognized_overflow_strategy_falls_back_to_default() {
        assert_eq!(parse_overflow_strategy("bogus"), OverflowStrategy::DropOldest);
    }

    #[test]
    fn zero_is_rejected_for_positive_fields() {
        assert_matches::assert_matches!(
            require_positive("queue.max_size", 0),
            Err(ConfigError::InvalidValue { .. })
        );
    }

    #[test]
    fn yaml_parses_partial_overrides_with_remaining_defaults() {
        let yaml = r#"
queue:
  max_size: 200
"#;
        let config: AppConfig = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.queue.max_size, 200);
        assert_eq!(config.queue.batch_size, 8);
    }
}
