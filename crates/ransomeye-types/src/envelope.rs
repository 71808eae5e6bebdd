//! Telemetry event envelopes
//!
//! The envelope is the telemetry atom: per-instance hash-chained, ed25519
//! signed, strictly sequenced. Unknown fields are rejected at the schema
//! level so a tampered envelope cannot smuggle data past the signature.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{BootId, ComponentInstanceId, EventId, KeyId, MachineId};

/// Identity metadata binding an envelope to the emitting host and process
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EventIdentity {
    pub hostname: String,
    pub boot_id: BootId,
    pub agent_version: String,
}

/// Integrity chain block
///
/// `prev_hash_sha256` is null only for the first event of a sequence space.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EventIntegrity {
    /// SHA-256 over the canonical envelope with signature fields blanked
    pub hash_sha256: String,
    /// Hash of the immediate predecessor within the same instance
    pub prev_hash_sha256: Option<String>,
}

/// The telemetry atom
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EventEnvelope {
    pub event_id: EventId,
    pub machine_id: MachineId,
    pub component: String,
    pub component_instance_id: ComponentInstanceId,
    pub observed_at: DateTime<Utc>,
    pub ingested_at: DateTime<Utc>,
    pub sequence: u64,
    pub payload: Value,
    pub identity: EventIdentity,
    pub integrity: EventIntegrity,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub signature: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub signing_key_id: Option<KeyId>,
}

impl EventEnvelope {
    /// Whether the signature fields are populated
    pub fn is_signed(&self) -> bool {
        self.signature.is_some() && self.signing_key_id.is_some()
    }

    /// Seconds between observation and ingestion (negative = future-dated)
    pub fn arrival_latency_seconds(&self) -> i64 {
        (self.ingested_at - self.observed_at).num_seconds()
    }
}

/// Validation outcome recorded for every envelope presented to ingest
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ValidationStatus {
    Valid,
    DuplicateRejected,
    SchemaValidationFailed,
    TimestampValidationFailed,
    IntegrityChainBroken,
    Rejected,
}

impl ValidationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ValidationStatus::Valid => "VALID",
            ValidationStatus::DuplicateRejected => "DUPLICATE_REJECTED",
            ValidationStatus::SchemaValidationFailed => "SCHEMA_VALIDATION_FAILED",
            ValidationStatus::TimestampValidationFailed => "TIMESTAMP_VALIDATION_FAILED",
            ValidationStatus::IntegrityChainBroken => "INTEGRITY_CHAIN_BROKEN",
            ValidationStatus::Rejected => "REJECTED",
        }
    }
}

/// A persisted envelope plus its validation verdict
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawEvent {
    pub envelope: EventEnvelope,
    pub validation_status: ValidationStatus,
    pub late_arrival: bool,
    pub arrival_latency_seconds: Option<i64>,
}

/// A validation-log row; `validation_timestamp` is the envelope's own
/// `observed_at` so re-runs over the same input are byte-identical
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationLogEntry {
    pub event_id: EventId,
    pub validation_status: ValidationStatus,
    pub validation_timestamp: DateTime<Utc>,
    pub details: Option<Value>,
}
