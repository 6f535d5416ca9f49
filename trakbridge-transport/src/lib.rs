//! The TAK server transport layer: a TCP/TLS connection state machine and the
//! Transmission Worker that drains a destination's queue onto it with exponential backoff
//! reconnect.

pub mod connection;
pub mod state;
pub mod tls;
pub mod worker;

pub use connection::Connection;
pub use state::ConnectionState;
pub use worker::TransmissionWorker;
