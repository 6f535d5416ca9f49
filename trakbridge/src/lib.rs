//! TrakBridge's binary-crate internals, exposed as a library so integration tests under
//! `tests/` can exercise the orchestrator and Stream Worker directly rather than shelling out to
//! the compiled binary. `src/main.rs` is a thin entry point over this crate.

pub mod cli;
pub mod config;
pub mod metrics;
pub mod orchestrator;
pub mod repository;
pub mod stream_worker;
pub mod tracing_setup;
