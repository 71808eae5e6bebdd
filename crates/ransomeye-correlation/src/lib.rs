//! RansomEye Correlation - deterministic incident creation
//!
//! A pure batch function over un-linked VALID events, ordered by
//! `(component_instance_id, sequence)`. Every persisted timestamp derives
//! from event `observed_at` values, never a wall clock, so re-runs over
//! the same event log produce byte-identical state.
//!
//! # Invariants
//!
//! 1. Stage is a monotone threshold function of confidence until a
//!    contradiction decays it
//! 2. Contradictions block forward stage escalation but never downgrade
//! 3. An `event_id` links to at most one incident; a second link attempt
//!    is a fatal invariant violation
//! 4. `first_observed_at <= last_observed_at` always

pub mod engine;
pub mod rules;
pub mod state_machine;

pub use engine::*;
pub use rules::*;
pub use state_machine::*;

use thiserror::Error;

/// Correlation errors
#[derive(Debug, Error)]
pub enum CorrelationError {
    #[error("Store error: {0}")]
    Store(String),

    #[error("Fatal invariant violation: {0}")]
    FatalInvariant(String),
}

pub type Result<T> = std::result::Result<T, CorrelationError>;
