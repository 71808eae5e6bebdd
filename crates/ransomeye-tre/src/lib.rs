//! RansomEye TRE - the Threat Response Engine
//!
//! The decision boundary between a policy recommendation and any effect on
//! a host. The pipeline order is mandatory, fail-fast, default DENY:
//!
//! 1. Incident execution guard (emergency path requires SUPER_ADMIN)
//! 2. RBAC check (`tre:execute`, plus the per-action destructive grant)
//! 3. Mode gate (DRY_RUN simulates, GUARDED_EXEC blocks destructive,
//!    FULL_ENFORCE requires HAF for destructive)
//! 4. Action classification (frozen, from the type system)
//! 5. Rate limits (non-configurable, evaluated before HAF consumes an
//!    approval)
//! 6. HAF approval lifecycle (PENDING rows expire after 24 h)
//! 7. Blast-radius validation (scope vs resolved target cardinality)
//! 8. Sign and dispatch (1 h expiry, rollback token, TRE key)
//! 9. Attestation requirement for destructive executions
//! 10. Incident freeze (rollback only; reopen is SUPER_ADMIN + justification)
//!
//! Every step emits a dedicated audit-ledger entry. Denials carry the
//! exact failing rule.

pub mod actions;
pub mod approvals;
pub mod attest;
pub mod blast;
pub mod dispatch;
pub mod guard;
pub mod mode;
pub mod pipeline;
pub mod rate_limit;

pub use actions::*;
pub use approvals::*;
pub use attest::*;
pub use blast::*;
pub use dispatch::*;
pub use guard::*;
pub use mode::*;
pub use pipeline::*;
pub use rate_limit::*;

use thiserror::Error;

/// TRE errors. Denials are [`ransomeye_types::DecisionOutcome`] values,
/// not errors.
#[derive(Debug, Error)]
pub enum TreError {
    #[error("Store error: {0}")]
    Store(String),

    #[error("RBAC error: {0}")]
    Rbac(#[from] ransomeye_rbac::RbacError),

    #[error("Audit emission failed: {0}")]
    Audit(#[from] ransomeye_ledger::LedgerError),

    #[error("Crypto error: {0}")]
    Crypto(#[from] ransomeye_crypto::CryptoError),

    #[error("Dispatch failed: {0}")]
    Dispatch(String),

    #[error("Fatal invariant violation: {0}")]
    FatalInvariant(String),
}

pub type Result<T> = std::result::Result<T, TreError>;

/// Component name used in ledger entries
pub const COMPONENT: &str = "threat-response-engine";
