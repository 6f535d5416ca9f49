//! Plug-in self-description types: configuration field schema, available
//! callsign-identifier fields, and connection-test results.

use serde::{Deserialize, Serialize};

/// A single configuration field a plug-in expects in its `plugin_config` map, used to render
/// a config form and to validate values before `fetch` is ever called.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PluginConfigField {
    pub name: String,
    pub label: String,
    pub field_type: FieldType,
    #[serde(default)]
    pub required: bool,
    #[serde(default)]
    pub sensitive: bool,
    #[serde(default)]
    pub help_text: Option<String>,
    #[serde(default)]
    pub placeholder: Option<String>,
    #[serde(default)]
    pub default_value: Option<serde_json::Value>,
    #[serde(default)]
    pub min_value: Option<f64>,
    #[serde(default)]
    pub max_value: Option<f64>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldType {
    String,
    Integer,
    Float,
    Boolean,
    Url,
}

/// Static, non-secret description of a plug-in: what it's called, what it fetches, and what
/// configuration it needs.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PluginMetadata {
    pub plugin_type: String,
    pub display_name: String,
    pub description: String,
    pub config_fields: Vec<PluginConfigField>,
}

/// A field in the plug-in's raw response that could serve as the stable identifier callsign
/// mappings key on. Plug-ins should prefer hardware-stable
/// identifiers (e.g. an IMEI or serial number) over fields a user can edit, since callsign
/// mappings are keyed by this value and a changing identifier orphans the mapping.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FieldMetadata {
    pub field_name: String,
    pub display_name: String,
    pub is_stable_identifier: bool,
}

/// Outcome of a plug-in's `test_connection` probe, used by the config UI/API this spec treats
/// as an external collaborator — the plug-in only needs to report the verdict.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ConnectionTestResult {
    pub success: bool,
    pub message: String,
    #[serde(default)]
    pub detail: Option<String>,
}

impl ConnectionTestResult {
    pub fn ok(message: impl Into<String>) -> Self {
        ConnectionTestResult {
            success: true,
            message: message.into(),
            detail: None,
        }
    }

    pub fn failed(message: impl Into<String>) -> Self {
        ConnectionTestResult {
            success: false,
            message: message.into(),
            detail: None,
        }
    }
}
