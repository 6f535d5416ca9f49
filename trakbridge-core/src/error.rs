//! Error taxonomy for the event pipeline.

use thiserror::Error;

/// Errors a [`Position`](crate::position::Position) can fail validation with.
#[derive(Debug, Clone, Copy, PartialEq, Error)]
pub enum PositionError {
    #[error("position is missing a uid")]
    MissingUid,
    #[error("latitude {0} out of range [-90, 90]")]
    InvalidLatitude(f64),
    #[error("longitude {0} out of range [-180, 180]")]
    InvalidLongitude(f64),
    #[error("altitude {0} is not a finite number")]
    InvalidAltitude(f64),
}

/// Errors building a CoT XML event from a [`Position`](crate::position::Position).
#[derive(Debug, Clone, PartialEq, Error)]
pub enum CotBuildError {
    #[error("invalid position: {0}")]
    InvalidPosition(#[from] PositionError),
    #[error("stale_seconds must be greater than zero")]
    NonPositiveStale,
}

/// The error taxonomy a provider plug-in's `fetch` returns.
#[derive(Debug, Clone, Error)]
pub enum FetchError {
    #[error("authentication failed: {0}")]
    Auth(String),
    #[error("resource not found: {0}")]
    NotFound(String),
    #[error("rate limited: {0}")]
    RateLimited(String),
    #[error("request timed out: {0}")]
    Timeout(String),
    #[error("network error: {0}")]
    Network(String),
    #[error("failed to parse provider response: {0}")]
    Parse(String),
    #[error("unknown provider error: {0}")]
    Unknown(String),
}

impl FetchError {
    /// A provider-suggested or default backoff to delay the stream's next poll by, for
    /// timeout/rate-limit errors.
    pub fn suggested_backoff(&self) -> Option<std::time::Duration> {
        match self {
            FetchError::RateLimited(_) => Some(std::time::Duration::from_secs(30)),
            FetchError::Timeout(_) => Some(std::time::Duration::from_secs(5)),
            _ => None,
        }
    }
}

/// Errors from the Queue Manager (C3).
#[derive(Debug, Clone, PartialEq, Error)]
pub enum QueueError {
    #[error("no queue exists for destination {0}")]
    UnknownDestination(String),
    #[error("queue is full and overflow strategy is drop_newest")]
    Full,
    #[error("producer was cancelled while waiting for queue space")]
    Cancelled,
}

/// Errors from the Transmission Worker (C5) transport layer.
#[derive(Debug, Error)]
pub enum TransmitError {
    #[error("connection error: {0}")]
    Connection(#[from] std::io::Error),
    #[error("TLS error: {0}")]
    Tls(String),
    #[error("write deadline exceeded")]
    WriteTimeout,
}

/// Errors loading or validating configuration.
#[derive(Debug, Clone, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::sync::Arc<std::io::Error>,
    },
    #[error("failed to parse config: {0}")]
    Parse(String),
    #[error("invalid value for {field}: {message}")]
    InvalidValue { field: String, message: String },
}
