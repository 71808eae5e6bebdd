//! RansomEye Ledger - append-only audit ledger
//!
//! The ledger is:
//! - Append-only (entries are never modified or removed)
//! - Hash-chained (`prev_hash` = previous entry's `hash`)
//! - Per-entry signed (detached ed25519 over the entry hash)
//! - Single-writer (exclusive file lock for the process lifetime)
//! - Readable lock-free (readers take a snapshot of the JSONL file)
//!
//! # Invariants
//!
//! 1. A chain break discovered by the verifier is a fatal condition
//! 2. Disk-full on the ledger path refuses the append (caller escalates)
//! 3. Every authorization decision in the system lands here via
//!    [`DecisionSink`]

pub mod emit;
pub mod entry;
pub mod store;

pub use emit::*;
pub use entry::*;
pub use store::*;

use thiserror::Error;

/// Ledger operation errors
#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Crypto error: {0}")]
    Crypto(#[from] ransomeye_crypto::CryptoError),

    #[error("Ledger file is locked by another writer: {0}")]
    Locked(String),

    #[error("Disk space below floor for ledger path: {0}")]
    DiskFull(String),

    #[error("Chain broken at entry {index}: {reason}")]
    ChainBroken { index: usize, reason: String },

    #[error("Signature invalid at entry {index}")]
    SignatureInvalid { index: usize },
}

pub type Result<T> = std::result::Result<T, LedgerError>;
