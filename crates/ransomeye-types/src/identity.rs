//! Identity types for RansomEye
//!
//! All identity types are strongly typed wrappers to prevent accidental
//! mixing of different ID kinds. UUID-backed ids serialize as bare UUIDs
//! because they appear verbatim in signed wire payloads.

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Macro to generate UUID-backed ID types with common implementations
macro_rules! define_uuid_id {
    ($name:ident, $doc:literal) => {
        #[doc = $doc]
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub Uuid);

        impl $name {
            /// Create a new random ID
            pub fn new() -> Self {
                Self(Uuid::new_v4())
            }

            /// Create from an existing UUID
            pub fn from_uuid(uuid: Uuid) -> Self {
                Self(uuid)
            }

            /// Parse from a string
            pub fn parse(s: &str) -> Result<Self, uuid::Error> {
                Ok(Self(Uuid::parse_str(s)?))
            }

            /// Get the inner UUID
            pub fn as_uuid(&self) -> &Uuid {
                &self.0
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<Uuid> for $name {
            fn from(uuid: Uuid) -> Self {
                Self(uuid)
            }
        }
    };
}

/// Macro to generate string-backed ID types (machine names, key
/// fingerprints) that must round-trip byte-for-byte through signed JSON
macro_rules! define_string_id {
    ($name:ident, $doc:literal) => {
        #[doc = $doc]
        #[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub String);

        impl $name {
            pub fn new(value: impl Into<String>) -> Self {
                Self(value.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }

            pub fn is_empty(&self) -> bool {
                self.0.is_empty()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<String> for $name {
            fn from(value: String) -> Self {
                Self(value)
            }
        }

        impl From<&str> for $name {
            fn from(value: &str) -> Self {
                Self(value.to_string())
            }
        }
    };
}

define_uuid_id!(EventId, "Globally unique telemetry event id (idempotency key)");
define_uuid_id!(IncidentId, "Correlated incident id");
define_uuid_id!(CommandId, "Signed response command id (replay nonce)");
define_uuid_id!(ActionId, "Dispatched response action id");
define_uuid_id!(ApprovalId, "Human-authority approval id");
define_uuid_id!(AttestationId, "Post-incident attestation id");
define_uuid_id!(LedgerEntryId, "Audit ledger entry id");
define_uuid_id!(UserId, "Operator user id");
define_uuid_id!(PolicyId, "Policy rule-set id");

define_string_id!(MachineId, "Managed host identifier (hostname-derived)");
define_string_id!(ComponentInstanceId, "Per-process telemetry instance id");
define_string_id!(BootId, "Per-boot sequence-space partition id");
define_string_id!(KeyId, "SHA-256 fingerprint of an ed25519 public key");
