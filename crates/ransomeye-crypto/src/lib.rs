//! RansomEye Crypto - Cryptographic authority for the trust core
//!
//! This crate provides:
//! - Key generation and fingerprint-derived key ids
//! - Digital signatures (Ed25519, detached, base64 on the wire)
//! - Hashing (SHA-256) and canonical JSON for signing/verification
//! - A persistent encrypted vault (PBKDF2-HMAC-SHA256 + ChaCha20-Poly1305)
//! - A key registry with status lifecycle and revocation list
//!
//! # Security Invariants
//!
//! **Ephemeral signing keys are forbidden**: every signing key is persisted
//! in the encrypted vault and registered before first use. Private keys are
//! held in memory only between decrypt and use.

pub mod canonical;
pub mod commands;
pub mod hash;
pub mod keys;
pub mod registry;
pub mod signature;
pub mod vault;

pub use canonical::*;
pub use commands::*;
pub use hash::*;
pub use keys::*;
pub use registry::*;
pub use signature::*;
pub use vault::*;

use thiserror::Error;

/// Cryptographic errors
#[derive(Debug, Error)]
pub enum CryptoError {
    #[error("Key generation failed: {0}")]
    KeyGenerationFailed(String),

    #[error("Signing failed: {0}")]
    SigningFailed(String),

    #[error("Verification failed: {0}")]
    VerificationFailed(String),

    #[error("Invalid key format: {0}")]
    InvalidKeyFormat(String),

    #[error("Vault error: {0}")]
    VaultError(String),

    #[error("Key not found: {key_id}")]
    KeyNotFound { key_id: String },

    #[error("Key {key_id} is not active (status: {status})")]
    KeyNotActive { key_id: String, status: String },

    #[error("Key {key_id} is revoked")]
    KeyRevoked { key_id: String },

    #[error("Key fingerprint mismatch: expected {expected}, computed {computed}")]
    FingerprintMismatch { expected: String, computed: String },

    #[error("Registry error: {0}")]
    RegistryError(String),

    #[error("Canonicalization failed: {0}")]
    Canonicalization(String),
}

pub type CryptoResult<T> = Result<T, CryptoError>;
