//! The Provider Plug-in interface and a registry to look implementations up
//! by `plugin_type`. Concrete provider integrations (Traccar, Garmin, SPOT, Deepstate, ...) are
//! out of scope here; [`demo::DemoPositionPlugin`] is a synthetic stand-in used by
//! tests and examples.

pub mod demo;
pub mod metadata;
pub mod plugin;
pub mod registry;

pub use demo::DemoPositionPlugin;
pub use metadata::{ConnectionTestResult, FieldMetadata, FieldType, PluginConfigField, PluginMetadata};
pub use plugin::{FetchContext, PluginConfig, ProviderPlugin};
pub use registry::{PluginRegistry, UnknownPluginError};

pub use trakbridge_core::CallsignMapping;
