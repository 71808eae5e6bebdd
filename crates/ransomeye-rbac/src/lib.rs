//! RansomEye RBAC - server-side permission enforcement
//!
//! All permission checks are server-side enforced, default DENY. Every
//! check emits an `rbac_permission_check` ledger entry with the decision,
//! so the audit trail shows denials as well as grants.

pub mod checker;
pub mod permissions;
pub mod store;

pub use checker::*;
pub use permissions::*;
pub use store::*;

use thiserror::Error;

/// RBAC errors. A `Deny` is not an error: it is a [`DecisionOutcome`]
/// value; these errors mean the check itself could not run.
#[derive(Debug, Error)]
pub enum RbacError {
    #[error("Invalid permission: {0}")]
    InvalidPermission(String),

    #[error("Role store error: {0}")]
    Store(String),

    #[error("Audit emission failed: {0}")]
    Audit(#[from] ransomeye_ledger::LedgerError),
}

pub type Result<T> = std::result::Result<T, RbacError>;
