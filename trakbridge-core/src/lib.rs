//! Core event-pipeline types for TrakBridge: the normalized position record, the CoT XML
//! builder, per-destination queueing with device-state deduplication, and the shared
//! configuration data model. No network or filesystem I/O lives in this crate — see
//! `trakbridge-plugins` for provider I/O and `trakbridge-transport` for the TAK connection.

pub mod config;
pub mod cot;
pub mod error;
pub mod position;
pub mod queue;
pub mod tracker;

pub use config::{
    CallsignMapping, CotTypeMode, OverflowStrategy, QueueConfig, StreamConfig, StreamConfigError,
    TakProtocol, TakServerConfig, TlsMaterial,
};
pub use cot::{CotBuildOptions, CotEvent, TeamMember};
pub use error::{CotBuildError, FetchError, PositionError, QueueError, TransmitError};
pub use position::Position;
pub use queue::{QueueEntry, QueueManager, QueueStats};
pub use tracker::{DeviceState, DeviceStateTracker};
