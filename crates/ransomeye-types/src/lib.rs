//! RansomEye Types - Canonical domain types for the trust core
//!
//! This crate contains all foundational types for RansomEye with zero
//! dependencies on other ransomeye crates. It defines the complete type
//! system for:
//!
//! - Identity types (EventId, IncidentId, CommandId, etc.)
//! - Telemetry envelopes and the hash-chain integrity block
//! - Signed response commands and the frozen action-type set
//! - Incidents, evidence, and stage transitions
//! - Response actions, HAF approvals, attestations, rollback artifacts
//! - The `DecisionOutcome` sum type used by every authorization seam
//!
//! # Architectural Invariants
//!
//! These types support the core RansomEye security invariants:
//!
//! 1. No response action executes without a verifiable signature chain
//! 2. Every decision is either `Allow` or `Deny { reason, rule_id }` -
//!    exceptions are reserved for invariant violations
//! 3. Action classification (SAFE / DESTRUCTIVE) is frozen at the type level
//! 4. Timestamps inside business logic derive from events, never wall clock

pub mod command;
pub mod decision;
pub mod envelope;
pub mod error;
pub mod identity;
pub mod incident;
pub mod response;

pub use command::*;
pub use decision::*;
pub use envelope::*;
pub use error::*;
pub use identity::*;
pub use incident::*;
pub use response::*;

/// Version of the RansomEye wire schema
pub const SCHEMA_VERSION: &str = "1.0";
