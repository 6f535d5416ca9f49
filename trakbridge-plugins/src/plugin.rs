//! The Provider Plug-in interface: the seam between a tracking provider's API
//! and the normalized [`Position`] records the rest of the pipeline consumes.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use trakbridge_core::{error::FetchError, Position};

use crate::metadata::{ConnectionTestResult, FieldMetadata, PluginMetadata};

/// Raw plug-in configuration as stored: untyped JSON
/// values keyed by the field names the plug-in's [`PluginMetadata::config_fields`] declare.
pub type PluginConfig = HashMap<String, serde_json::Value>;

/// The cancellable, deadline-bound context a Stream Worker hands to `fetch` (spec §4.1, §6.3):
/// `cancellation` is cancelled when the worker is shutting down, and `deadline` is the caller's
/// upper bound on how long the call may run (≤ the stream's poll interval). A plug-in that makes
/// its own network calls should race them against `cancellation` and bound them by `deadline`
/// rather than relying solely on the caller's own `tokio::time::timeout` around the whole call.
#[derive(Clone)]
pub struct FetchContext {
    pub cancellation: CancellationToken,
    pub deadline: Duration,
}

impl FetchContext {
    pub fn new(cancellation: CancellationToken, deadline: Duration) -> Self {
        FetchContext {
            cancellation,
            deadline,
        }
    }
}

/// Implemented by every tracking-provider integration. A plug-in is stateless across polls: the
/// Stream Worker (C2) owns the poll loop and calls `fetch` once per interval.
///
/// `fetch` MUST NOT retain references to the `Position`s it returns past the call —
/// each poll starts from a clean slate, so implementations should build a fresh `Vec` rather than
/// caching and mutating one across calls. `fetch` MUST honour `ctx.cancellation` and
/// `ctx.deadline`: the caller also enforces both from the outside, but a well-behaved plug-in
/// doing its own I/O should still race it against `ctx.cancellation` so a slow provider can be
/// abandoned promptly rather than merely having its result discarded late.
#[async_trait]
pub trait ProviderPlugin: Send + Sync {
    /// The stable identifier stream configs reference in `plugin_type`. Lowercase,
    /// stable across releases; used as the registry key.
    fn plugin_name(&self) -> &str;

    /// Static self-description: display name, help text, and expected config fields.
    fn plugin_metadata(&self) -> PluginMetadata;

    /// Validates a stream's `plugin_config` against this plug-in's declared fields, returning
    /// one message per problem found. An empty result means the configuration is usable.
    fn validate_config(&self, config: &PluginConfig) -> Vec<String> {
        let mut problems = Vec::new();
        for field in self.plugin_metadata().config_fields {
            if field.required && !config.contains_key(&field.name) {
                problems.push(format!("missing required field '{}'", field.name));
            }
        }
        problems
    }

    /// Polls the provider and returns the positions observed since the last call.
    /// Implementations translate provider-specific transient failures into the [`FetchError`]
    /// taxonomy so the Stream Worker can decide whether and how long to back off.
    async fn fetch(&self, ctx: &FetchContext, config: &PluginConfig) -> Result<Vec<Position>, FetchError>;

    /// Probes the provider with the given configuration without fetching positions, for use by
    /// a config-time "test connection" action. Default implementation calls `fetch` with a fresh,
    /// short-lived context and reports success/failure; plug-ins with a cheaper health-check
    /// endpoint should override.
    async fn test_connection(&self, config: &PluginConfig) -> ConnectionTestResult {
        let ctx = FetchContext::new(CancellationToken::new(), Duration::from_secs(30));
        match self.fetch(&ctx, config).await {
            Ok(positions) => {
                ConnectionTestResult::ok(format!("fetched {} position(s)", positions.len()))
            }
            Err(err) => ConnectionTestResult::failed(err.to_string()),
        }
    }

    /// Optional capability: fields in the plug-in's raw response suitable as a callsign-mapping
    /// identifier. Plug-ins that don't support callsign mapping return an empty list,
    /// which is also this trait's default.
    fn get_available_fields(&self) -> Vec<FieldMetadata> {
        Vec::new()
    }

    /// Optional capability: applies a callsign mapping keyed by `identifier_field` to `positions`
    /// in place. The default implementation reads `identifier_field` out
    /// of each position's `extra` map, looks it up in `mappings`, and overwrites
    /// `name`/`cot_type_hint` from matching, enabled entries. A position whose mapped entry has
    /// `enabled=false` is dropped from the batch entirely, which is why this takes the owning `Vec`
    /// rather than a slice. Plug-ins whose identifier lives somewhere other than `extra` should
    /// override this.
    fn apply_callsign_mapping(
        &self,
        positions: &mut Vec<Position>,
        identifier_field: &str,
        mappings: &HashMap<String, crate::CallsignMapping>,
    ) {
        positions.retain_mut(|position| {
            let Some(identifier) = position
                .extra
                .get(identifier_field)
                .and_then(|v| v.as_str())
                .map(str::to_string)
            else {
                return true;
            };
            let Some(mapping) = mappings.get(&identifier) else {
                return true;
            };
            if !mapping.enabled {
                return false;
            }
            position.name = mapping.callsign.clone();
            if let Some(cot_type) = &mapping.cot_type_override {
                position.cot_type_hint = Some(cot_type.clone());
            }
            true
        });
    }
}
