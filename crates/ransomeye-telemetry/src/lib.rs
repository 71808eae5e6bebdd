//! RansomEye Telemetry - the integrity chain from agent to ingest
//!
//! Per component instance, envelopes carry a strictly monotonic sequence
//! and a hash chain (`prev_hash_sha256` = predecessor's `hash_sha256`).
//! The builder persists its chain head before an envelope leaves the
//! process; the verifier rebuilds canonical bytes and checks signature,
//! identity binding, and embedded hash.
//!
//! Buffering follows the agent collector model: one bounded in-memory
//! queue with JSONL disk spillover, drained by a single transmission loop
//! in batches of at most 500 with a flush interval of at least 5 seconds.

pub mod buffer;
pub mod builder;
pub mod sender;
pub mod verifier;

pub use buffer::*;
pub use builder::*;
pub use sender::*;
pub use verifier::*;

use thiserror::Error;

/// Telemetry plane errors
#[derive(Debug, Error)]
pub enum TelemetryError {
    #[error("Crypto error: {0}")]
    Crypto(#[from] ransomeye_crypto::CryptoError),

    #[error("State persistence error: {0}")]
    State(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Transmission failed: {0}")]
    Transmission(String),
}

pub type Result<T> = std::result::Result<T, TelemetryError>;
