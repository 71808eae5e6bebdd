//! RansomEye Common - shared safety kernel
//!
//! Everything a RansomEye service needs before it can be trusted to run:
//!
//! - Typed configuration loading (required variables fail startup)
//! - Secret handling and pattern-based log redaction
//! - Graceful shutdown with the frozen exit-code set
//! - The supervision contract (orchestrator, core token, parent pid)
//! - Fatal-invariant escalation (marker file + SIGUSR1, no retries)
//! - Systemd watchdog notifications
//! - Disk-space and safe-write resource guards

pub mod config;
pub mod fatal;
pub mod redaction;
pub mod resource;
pub mod secrets;
pub mod shutdown;
pub mod status;
pub mod supervision;
pub mod watchdog;

pub use config::*;
pub use fatal::*;
pub use redaction::*;
pub use resource::*;
pub use secrets::*;
pub use shutdown::*;
pub use status::*;
pub use supervision::*;
pub use watchdog::*;

use thiserror::Error;

/// Errors raised by the safety kernel
#[derive(Debug, Error)]
pub enum CommonError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Weak credential rejected: {0}")]
    WeakCredential(String),

    #[error("Supervision contract violated: {0}")]
    Supervision(String),

    #[error("Resource error: {0}")]
    Resource(String),

    #[error("Secret detected in log content: {context}")]
    SecretInLog { context: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type CommonResult<T> = Result<T, CommonError>;
