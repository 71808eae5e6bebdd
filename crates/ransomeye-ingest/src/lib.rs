//! RansomEye Ingest - the telemetry ingest gateway
//!
//! One operation: `ingest(envelope) -> {event_id, status}`. Validation is
//! ordered and fail-fast:
//!
//! 1. Service-to-service auth (HTTP middleware)
//! 2. Envelope signature verification
//! 3. Component-identity binding
//! 4. Schema validation
//! 5. Timestamp window (-5 s future, +30 d age)
//! 6. Hash integrity
//! 7. Duplicate `event_id` (idempotency, HTTP 409)
//! 8. Hash-chain continuity per component instance
//! 9. Sequence monotonicity (strict successor within a boot)
//!
//! Every failure writes a validation-log row whose timestamp is the
//! envelope's own `observed_at`, so reprocessing the same input produces
//! byte-identical logs.

pub mod http;
pub mod metrics;
pub mod pipeline;
pub mod store;

pub use http::*;
pub use metrics::*;
pub use pipeline::*;
pub use store::*;

use thiserror::Error;

/// Ingest errors. Validation failures are not errors: they are
/// [`IngestOutcome`] values; these are infrastructure failures.
#[derive(Debug, Error)]
pub enum IngestError {
    #[error("Store error: {0}")]
    Store(String),

    #[error("Fatal store invariant: {0}")]
    FatalStore(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

pub type Result<T> = std::result::Result<T, IngestError>;
