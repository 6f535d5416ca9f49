//! Installs the global `tracing` subscriber: an `EnvFilter` directive plus a choice of
//! human-readable or JSON output.

use tracing_subscriber::EnvFilter;

use crate::config::{LogFormat, LoggingConfig};

/// Installs a global `tracing` subscriber built from `config`. Returns an error only if a
/// subscriber has already been installed (e.g. called twice), which is itself a programming
/// error rather than something callers should retry.
pub fn install(config: &LoggingConfig) -> anyhow::Result<()> {
    let filter = EnvFilter::try_new(&config.filter).unwrap_or_else(|_| EnvFilter::new("info"));

    let subscriber = tracing_subscriber::fmt().with_env_filter(filter);
    match config.format {
        LogFormat::Pretty => subscriber.pretty().try_init(),
        LogFormat::Json => subscriber.json().try_init(),
    }
    .map_err(|e| anyhow::anyhow!("failed to install tracing subscriber: {e}"))
}
