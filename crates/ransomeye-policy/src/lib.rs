//! RansomEye Policy - deterministic rules over incidents
//!
//! Runs read-only over unresolved incidents and produces signed command
//! recommendations. **Simulation-first**: the engine writes signed
//! commands to a decision store but never dispatches one. Enforcement is
//! TRE's job, and it is off by default.

pub mod engine;
pub mod rules;
pub mod store;

pub use engine::*;
pub use rules::*;
pub use store::*;

use thiserror::Error;

/// Policy engine errors
#[derive(Debug, Error)]
pub enum PolicyError {
    #[error("Decision store error: {0}")]
    Store(String),

    #[error("Crypto error: {0}")]
    Crypto(#[from] ransomeye_crypto::CryptoError),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

pub type Result<T> = std::result::Result<T, PolicyError>;
