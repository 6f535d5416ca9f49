//! Plug-in registry: maps a `StreamConfig::plugin_type` string to the [`ProviderPlugin`]
//! implementation that serves it.

use std::collections::HashMap;
use std::sync::Arc;

use crate::plugin::ProviderPlugin;

/// Holds every known plug-in, keyed by [`ProviderPlugin::plugin_name`]. Built once at startup
/// and shared (via `Arc`) across Stream Workers — registration is not expected at runtime.
#[derive(Clone, Default)]
pub struct PluginRegistry {
    plugins: HashMap<String, Arc<dyn ProviderPlugin>>,
}

/// No plug-in is registered under the requested `plugin_type`.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("no plug-in registered for plugin_type '{0}'")]
pub struct UnknownPluginError(pub String);

impl PluginRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, plugin: Arc<dyn ProviderPlugin>) {
        self.plugins.insert(plugin.plugin_name().to_string(), plugin);
    }

    pub fn get(&self, plugin_type: &str) -> Result<Arc<dyn ProviderPlugin>, UnknownPluginError> {
        self.plugins
            .get(plugin_type)
            .cloned()
            .ok_or_else(|| UnknownPluginError(plugin_type.to_string()))
    }

    pub fn plugin_types(&self) -> Vec<&str> {
        self.plugins.keys().map(String::as_str).collect()
    }
}
