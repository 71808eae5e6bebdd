//! The ordered validation pipeline


use ransomeye_types::{
    EventEnvelope, EventId, RawEvent, ValidationLogEntry, ValidationStatus,
};
use serde_json::{json, Value};
use std::sync::Arc;

use ransomeye_crypto::is_sha256_hex;
use ransomeye_telemetry::EnvelopeVerifier;

use crate::{EventStore, Result};

/// Future tolerance: ingested_at may trail observed_at by at most 5 s
const FUTURE_TOLERANCE_SECS: i64 = 5;
/// Age limit: events older than 30 days are refused
const MAX_AGE_SECS: i64 = 30 * 24 * 3600;
/// Events later than an hour are flagged, not refused
const LATE_ARRIVAL_SECS: i64 = 3600;

/// Outcome of one ingest call
#[derive(Debug, Clone, PartialEq)]
pub enum IngestOutcome {
    Accepted {
        event_id: EventId,
    },
    Rejected {
        event_id: EventId,
        /// Wire error code (`INTEGRITY_CHAIN_BROKEN`, `TIMESTAMP_TOO_OLD`, ...)
        error_code: String,
        /// Status recorded in the validation log
        validation_status: ValidationStatus,
        /// HTTP status the gateway should answer with
        http_status: u16,
        details: Option<Value>,
    },
}

impl IngestOutcome {
    pub fn is_accepted(&self) -> bool {
        matches!(self, IngestOutcome::Accepted { .. })
    }
}

/// The ingest gateway pipeline (everything after the auth middleware)
pub struct IngestPipeline {
    verifier: EnvelopeVerifier,
    store: Arc<dyn EventStore>,
}

struct Rejection {
    error_code: &'static str,
    validation_status: ValidationStatus,
    http_status: u16,
    details: Option<Value>,
}

impl Rejection {
    fn new(error_code: &'static str, status: ValidationStatus, http: u16) -> Self {
        Self {
            error_code,
            validation_status: status,
            http_status: http,
            details: None,
        }
    }

    fn with_details(mut self, details: Value) -> Self {
        self.details = Some(details);
        self
    }
}

impl IngestPipeline {
    pub fn new(verifier: EnvelopeVerifier, store: Arc<dyn EventStore>) -> Self {
        Self { verifier, store }
    }

    pub fn store(&self) -> &Arc<dyn EventStore> {
        &self.store
    }

    /// Run checks 2-9 over one envelope. Fail-fast: the first failing
    /// check decides the outcome, and every outcome lands in the
    /// validation log with the envelope's own `observed_at`.
    pub async fn ingest(&self, envelope: EventEnvelope) -> Result<IngestOutcome> {
        if let Some(rejection) = self.validate(&envelope).await? {
            let outcome = IngestOutcome::Rejected {
                event_id: envelope.event_id,
                error_code: rejection.error_code.to_string(),
                validation_status: rejection.validation_status,
                http_status: rejection.http_status,
                details: rejection.details.clone(),
            };
            self.store
                .record_validation_failure(ValidationLogEntry {
                    event_id: envelope.event_id,
                    validation_status: rejection.validation_status,
                    validation_timestamp: envelope.observed_at,
                    details: rejection.details,
                })
                .await?;
            tracing::info!(
                event_id = %envelope.event_id,
                error_code = rejection.error_code,
                "envelope rejected"
            );
            return Ok(outcome);
        }

        let latency = envelope.arrival_latency_seconds();
        let late_arrival = latency > LATE_ARRIVAL_SECS;
        let raw = RawEvent {
            validation_status: ValidationStatus::Valid,
            late_arrival,
            arrival_latency_seconds: late_arrival.then_some(latency),
            envelope,
        };
        let log = ValidationLogEntry {
            event_id: raw.envelope.event_id,
            validation_status: ValidationStatus::Valid,
            validation_timestamp: raw.envelope.observed_at,
            details: None,
        };
        let event_id = raw.envelope.event_id;
        self.store.commit_valid_event(raw, log).await?;

        Ok(IngestOutcome::Accepted { event_id })
    }

    async fn validate(&self, envelope: &EventEnvelope) -> Result<Option<Rejection>> {
        // 2. signature
        let (ok, reason) = self.verifier.verify_envelope(envelope);
        if !ok {
            return Ok(Some(
                Rejection::new(
                    "SIGNATURE_VERIFICATION_FAILED",
                    ValidationStatus::Rejected,
                    401,
                )
                .with_details(json!({"reason": reason})),
            ));
        }

        // 3. component identity binding
        let (ok, reason) = self.verifier.verify_component_identity(envelope);
        if !ok {
            return Ok(Some(
                Rejection::new(
                    "COMPONENT_IDENTITY_VERIFICATION_FAILED",
                    ValidationStatus::Rejected,
                    403,
                )
                .with_details(json!({"reason": reason})),
            ));
        }

        // 4. schema (field-level checks the typed parse cannot express)
        if let Some(problem) = schema_problem(envelope) {
            return Ok(Some(
                Rejection::new(
                    "SCHEMA_VALIDATION_FAILED",
                    ValidationStatus::SchemaValidationFailed,
                    400,
                )
                .with_details(json!({"reason": problem})),
            ));
        }

        // 5. timestamp window
        let diff = envelope.arrival_latency_seconds();
        if diff < -FUTURE_TOLERANCE_SECS {
            return Ok(Some(
                Rejection::new(
                    "TIMESTAMP_FUTURE_BEYOND_TOLERANCE",
                    ValidationStatus::TimestampValidationFailed,
                    400,
                )
                .with_details(json!({
                    "time_diff_seconds": diff,
                    "max_tolerance": -FUTURE_TOLERANCE_SECS,
                })),
            ));
        }
        if diff > MAX_AGE_SECS {
            return Ok(Some(
                Rejection::new(
                    "TIMESTAMP_TOO_OLD",
                    ValidationStatus::TimestampValidationFailed,
                    400,
                )
                .with_details(json!({
                    "time_diff_seconds": diff,
                    "max_age_seconds": MAX_AGE_SECS,
                })),
            ));
        }

        // 6. hash integrity (recompute must match the embedded hash)
        match ransomeye_crypto::envelope_hash(envelope) {
            Ok(computed) if computed == envelope.integrity.hash_sha256 => {}
            Ok(_) => {
                return Ok(Some(Rejection::new(
                    "INTEGRITY_VIOLATION",
                    ValidationStatus::Rejected,
                    400,
                )));
            }
            Err(e) => {
                return Ok(Some(
                    Rejection::new(
                        "INTEGRITY_VIOLATION",
                        ValidationStatus::Rejected,
                        400,
                    )
                    .with_details(json!({"reason": e.to_string()})),
                ));
            }
        }

        // 7. duplicate event_id (idempotency)
        if self.store.is_duplicate(&envelope.event_id).await? {
            return Ok(Some(Rejection::new(
                "DUPLICATE_EVENT_ID",
                ValidationStatus::DuplicateRejected,
                409,
            )));
        }

        // 8 + 9. chain continuity and sequence monotonicity
        let state = self.store.chain_state(&envelope.component_instance_id).await?;
        match state {
            None => {
                // first event for this instance must start a chain
                if envelope.integrity.prev_hash_sha256.is_some() {
                    return Ok(Some(
                        Rejection::new(
                            "INTEGRITY_CHAIN_BROKEN",
                            ValidationStatus::IntegrityChainBroken,
                            400,
                        )
                        .with_details(json!({
                            "reason": "prev_hash present for unknown instance"
                        })),
                    ));
                }
            }
            Some(state) if state.boot_id == envelope.identity.boot_id => {
                if envelope.integrity.prev_hash_sha256.as_deref()
                    != Some(state.last_hash_sha256.as_str())
                {
                    return Ok(Some(
                        Rejection::new(
                            "INTEGRITY_CHAIN_BROKEN",
                            ValidationStatus::IntegrityChainBroken,
                            400,
                        )
                        .with_details(json!({
                            "reason": "prev_hash does not match stored chain head",
                            "expected": state.last_hash_sha256,
                        })),
                    ));
                }
                if envelope.sequence != state.last_sequence + 1 {
                    return Ok(Some(
                        Rejection::new(
                            "INTEGRITY_CHAIN_BROKEN",
                            ValidationStatus::IntegrityChainBroken,
                            400,
                        )
                        .with_details(json!({
                            "reason": "sequence is not the strict successor",
                            "expected": state.last_sequence + 1,
                            "got": envelope.sequence,
                        })),
                    ));
                }
            }
            Some(state) => {
                // boot change: chain resets, sequence space does not
                if envelope.integrity.prev_hash_sha256.is_some() {
                    return Ok(Some(
                        Rejection::new(
                            "INTEGRITY_CHAIN_BROKEN",
                            ValidationStatus::IntegrityChainBroken,
                            400,
                        )
                        .with_details(json!({
                            "reason": "prev_hash present across boot change"
                        })),
                    ));
                }
                if envelope.sequence <= state.last_sequence {
                    return Ok(Some(
                        Rejection::new(
                            "INTEGRITY_CHAIN_BROKEN",
                            ValidationStatus::IntegrityChainBroken,
                            400,
                        )
                        .with_details(json!({
                            "reason": "sequence regressed across boot change",
                            "last_sequence": state.last_sequence,
                            "got": envelope.sequence,
                        })),
                    ));
                }
            }
        }

        Ok(None)
    }
}

fn schema_problem(envelope: &EventEnvelope) -> Option<String> {
    if envelope.machine_id.is_empty() {
        return Some("machine_id must be non-empty".to_string());
    }
    if envelope.component.is_empty() {
        return Some("component must be non-empty".to_string());
    }
    if envelope.component_instance_id.is_empty() {
        return Some("component_instance_id must be non-empty".to_string());
    }
    if envelope.identity.hostname.is_empty() {
        return Some("identity.hostname must be non-empty".to_string());
    }
    if envelope.identity.boot_id.is_empty() {
        return Some("identity.boot_id must be non-empty".to_string());
    }
    if envelope.identity.agent_version.is_empty() {
        return Some("identity.agent_version must be non-empty".to_string());
    }
    if !is_sha256_hex(&envelope.integrity.hash_sha256) {
        return Some("integrity.hash_sha256 must be a 64-char hex digest".to_string());
    }
    if let Some(prev) = &envelope.integrity.prev_hash_sha256 {
        if !is_sha256_hex(prev) {
            return Some("integrity.prev_hash_sha256 must be a 64-char hex digest".to_string());
        }
    }
    if envelope.sequence == 0 {
        return Some("sequence must be positive".to_string());
    }
    if !envelope.payload.is_object() {
        return Some("payload must be a JSON object".to_string());
    }
    None
}
