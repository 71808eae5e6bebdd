//! RansomEye Agent - the trust boundary on a managed host
//!
//! The command gate is the single intake point. Default DENY, no trust in
//! network or UI: a command is executed only after ten sequential checks
//! pass, and every outcome lands in the local JSONL audit log.
//!
//! When the Core is unreachable the agent enforces its cached policy
//! fail-closed: no cached policy means no actions at all.

pub mod audit;
pub mod executor;
pub mod gate;
pub mod policy_cache;
pub mod probe;
pub mod rollback;

pub use audit::*;
pub use executor::*;
pub use gate::*;
pub use policy_cache::*;
pub use probe::*;
pub use rollback::*;

use thiserror::Error;

/// Agent-side errors. Command rejections are [`GateRejection`] values,
/// not errors.
#[derive(Debug, Error)]
pub enum AgentError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Crypto error: {0}")]
    Crypto(#[from] ransomeye_crypto::CryptoError),

    #[error("Audit log write failed: {0}")]
    Audit(String),

    #[error("Execution failed: {0}")]
    Execution(String),

    #[error("Rollback artifact not found: {token}")]
    ArtifactNotFound { token: String },
}

pub type Result<T> = std::result::Result<T, AgentError>;
