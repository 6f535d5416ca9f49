//! A synthetic position source used for examples and integration tests. It stands in for a real
//! provider (Traccar, Garmin InReach, SPOT, Deepstate, ...) without depending on any outside
//! service — those concrete parsers are out of scope for this repo.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use chrono::Utc;
use trakbridge_core::{error::FetchError, Position};

use crate::metadata::{FieldMetadata, FieldType, PluginConfigField, PluginMetadata};
use crate::plugin::{FetchContext, PluginConfig, ProviderPlugin};

const FIELD_DEVICE_COUNT: &str = "device_count";
const FIELD_CENTER_LAT: &str = "center_lat";
const FIELD_CENTER_LON: &str = "center_lon";
const FIELD_RADIUS_DEG: &str = "radius_deg";

/// Generates `device_count` positions orbiting `(center_lat, center_lon)` at `radius_deg`,
/// advancing one step in the orbit on every `fetch`. Deterministic given a starting tick, so
/// tests can assert on exact output.
pub struct DemoPositionPlugin {
    tick: AtomicU64,
}

impl DemoPositionPlugin {
    pub fn new() -> Self {
        DemoPositionPlugin {
            tick: AtomicU64::new(0),
        }
    }

    fn config_u64(config: &PluginConfig, key: &str, default: u64) -> u64 {
        config
            .get(key)
            .and_then(|v| v.as_u64())
            .unwrap_or(default)
    }

    fn config_f64(config: &PluginConfig, key: &str, default: f64) -> f64 {
        config
            .get(key)
            .and_then(|v| v.as_f64())
            .unwrap_or(default)
    }
}

impl Default for DemoPositionPlugin {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ProviderPlugin for DemoPositionPlugin {
    fn plugin_name(&self) -> &str {
        "demo"
    }

    fn plugin_metadata(&self) -> PluginMetadata {
        PluginMetadata {
            plugin_type: "demo".to_string(),
            display_name: "Demo Position Generator".to_string(),
            description: "Generates synthetic positions orbiting a configured center point; \
                useful for exercising the pipeline without a live provider."
                .to_string(),
            config_fields: vec![
                PluginConfigField {
                    name: FIELD_DEVICE_COUNT.to_string(),
                    label: "Device count".to_string(),
                    field_type: FieldType::Integer,
                    required: false,
                    sensitive: false,
                    help_text: Some("How many synthetic devices to generate".to_string()),
                    placeholder: None,
                    default_value: Some(serde_json::json!(3)),
                    min_value: Some(1.0),
                    max_value: Some(1000.0),
                },
                PluginConfigField {
                    name: FIELD_CENTER_LAT.to_string(),
                    label: "Center latitude".to_string(),
                    field_type: FieldType::Float,
                    required: false,
                    sensitive: false,
                    help_text: None,
                    placeholder: None,
                    default_value: Some(serde_json::json!(0.0)),
                    min_value: Some(-90.0),
                    max_value: Some(90.0),
                },
                PluginConfigField {
                    name: FIELD_CENTER_LON.to_string(),
                    label: "Center longitude".to_string(),
                    field_type: FieldType::Float,
                    required: false,
                    sensitive: false,
                    help_text: None,
                    placeholder: None,
                    default_value: Some(serde_json::json!(0.0)),
                    min_value: Some(-180.0),
                    max_value: Some(180.0),
                },
                PluginConfigField {
                    name: FIELD_RADIUS_DEG.to_string(),
                    label: "Orbit radius (degrees)".to_string(),
                    field_type: FieldType::Float,
                    required: false,
                    sensitive: false,
                    help_text: Some("Angular radius of the synthetic orbit".to_string()),
                    placeholder: None,
                    default_value: Some(serde_json::json!(0.05)),
                    min_value: Some(0.0),
                    max_value: None,
                },
            ],
        }
    }

    async fn fetch(&self, ctx: &FetchContext, config: &PluginConfig) -> Result<Vec<Position>, FetchError> {
        // Synthetic and instantaneous: there's no I/O to race against `ctx.cancellation` or
        // `ctx.deadline`, but an already-cancelled context is still honoured rather than ignored.
        if ctx.cancellation.is_cancelled() {
            return Err(FetchError::Unknown("fetch cancelled".to_string()));
        }
        let device_count = Self::config_u64(config, FIELD_DEVICE_COUNT, 3).max(1);
        let center_lat = Self::config_f64(config, FIELD_CENTER_LAT, 0.0);
        let center_lon = Self::config_f64(config, FIELD_CENTER_LON, 0.0);
        let radius = Self::config_f64(config, FIELD_RADIUS_DEG, 0.05);

        let tick = self.tick.fetch_add(1, Ordering::SeqCst) as f64;
        let now = Utc::now();

        let positions = (0..device_count)
            .map(|i| {
                let phase = (i as f64 / device_count as f64) * std::f64::consts::TAU
                    + tick * 0.1;
                let lat = (center_lat + radius * phase.sin()).clamp(-90.0, 90.0);
                let lon = (center_lon + radius * phase.cos()).clamp(-180.0, 180.0);
                let mut position = Position::new(
                    format!("demo-{i}"),
                    format!("Demo {i}"),
                    lat,
                    lon,
                    now,
                );
                position
                    .extra
                    .insert("serial".to_string(), serde_json::json!(format!("DEMO-{i:04}")));
                position
            })
            .collect();

        Ok(positions)
    }

    fn get_available_fields(&self) -> Vec<FieldMetadata> {
        vec![FieldMetadata {
            field_name: "serial".to_string(),
            display_name: "Synthetic serial number".to_string(),
            is_stable_identifier: true,
        }]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_util::sync::CancellationToken;

    fn ctx() -> FetchContext {
        FetchContext::new(CancellationToken::new(), std::time::Duration::from_secs(30))
    }

    #[tokio::test]
    async fn fetch_returns_configured_device_count() {
        let plugin = DemoPositionPlugin::new();
        let mut config = PluginConfig::new();
        config.insert(FIELD_DEVICE_COUNT.to_string(), serde_json::json!(5));
        let positions = plugin.fetch(&ctx(), &config).await.unwrap();
        assert_eq!(positions.len(), 5);
        for p in &positions {
            assert!(p.validate().is_ok());
        }
    }

    #[tokio::test]
    async fn defaults_apply_when_config_is_empty() {
        let plugin = DemoPositionPlugin::new();
        let positions = plugin.fetch(&ctx(), &PluginConfig::new()).await.unwrap();
        assert_eq!(positions.len(), 3);
    }

    #[tokio::test]
    async fn successive_fetches_advance_the_orbit() {
        let plugin = DemoPositionPlugin::new();
        let config = PluginConfig::new();
        let first = plugin.fetch(&ctx(), &config).await.unwrap();
        let second = plugin.fetch(&ctx(), &config).await.unwrap();
        assert_ne!(first[0].lat, second[0].lat);
    }

    #[tokio::test]
    async fn a_cancelled_context_is_honoured() {
        let plugin = DemoPositionPlugin::new();
        let cancelled = CancellationToken::new();
        cancelled.cancel();
        let result = plugin
            .fetch(&FetchContext::new(cancelled, std::time::Duration::from_secs(30)), &PluginConfig::new())
            .await;
        assert!(result.is_err());
    }

    #[test]
    fn validate_config_accepts_empty_config() {
        let plugin = DemoPositionPlugin::new();
        assert!(plugin.validate_config(&PluginConfig::new()).is_empty());
    }

    #[test]
    fn get_available_fields_flags_serial_as_stable() {
        let plugin = DemoPositionPlugin::new();
        let fields = plugin.get_available_fields();
        assert_eq!(fields.len(), 1);
        assert!(fields[0].is_stable_identifier);
    }
}
