//! Canonical JSON for signing and verification
//!
//! Canonical form: sorted keys, UTF-8, compact separators. `serde_json`
//! objects are backed by a sorted map, so serializing a `Value` yields the
//! canonical byte sequence directly. Each signed entity defines which
//! signature-bearing fields are blanked or removed before hashing:
//!
//! - **Envelope**: `signature` and `signing_key_id` removed,
//!   `integrity.hash_sha256` set to `""`.
//! - **Command**: `signature`, `signing_key_id`, `signing_algorithm`,
//!   `signed_at` removed.
//! - **Generic records** (cached policy, rollback artifacts, ledger
//!   entries): the named hash field removed or cleared.

use serde::Serialize;
use serde_json::Value;

use crate::{sha256_hex, CryptoError, CryptoResult};

/// Fields removed from a command before hashing/signing
pub const COMMAND_SIGNATURE_FIELDS: [&str; 4] =
    ["signature", "signing_key_id", "signing_algorithm", "signed_at"];

/// Serialize any value to canonical JSON text
pub fn to_canonical_json<T: Serialize>(value: &T) -> CryptoResult<String> {
    let value = serde_json::to_value(value)
        .map_err(|e| CryptoError::Canonicalization(e.to_string()))?;
    serde_json::to_string(&value).map_err(|e| CryptoError::Canonicalization(e.to_string()))
}

fn to_object<T: Serialize>(value: &T) -> CryptoResult<serde_json::Map<String, Value>> {
    match serde_json::to_value(value)
        .map_err(|e| CryptoError::Canonicalization(e.to_string()))?
    {
        Value::Object(map) => Ok(map),
        other => Err(CryptoError::Canonicalization(format!(
            "expected JSON object, got {}",
            other
        ))),
    }
}

/// Canonical bytes of an envelope for hashing and signing: signature fields
/// removed, `integrity.hash_sha256` blanked
pub fn envelope_signing_bytes<T: Serialize>(envelope: &T) -> CryptoResult<Vec<u8>> {
    let mut map = to_object(envelope)?;
    map.remove("signature");
    map.remove("signing_key_id");
    if let Some(Value::Object(integrity)) = map.get_mut("integrity") {
        integrity.insert("hash_sha256".to_string(), Value::String(String::new()));
    }
    let text = serde_json::to_string(&Value::Object(map))
        .map_err(|e| CryptoError::Canonicalization(e.to_string()))?;
    Ok(text.into_bytes())
}

/// The envelope content hash: SHA-256 hex over the canonical signing bytes
pub fn envelope_hash<T: Serialize>(envelope: &T) -> CryptoResult<String> {
    Ok(sha256_hex(&envelope_signing_bytes(envelope)?))
}

/// Canonical bytes of a command for hashing and signing
pub fn command_signing_bytes<T: Serialize>(command: &T) -> CryptoResult<Vec<u8>> {
    let mut map = to_object(command)?;
    for field in COMMAND_SIGNATURE_FIELDS {
        map.remove(field);
    }
    let text = serde_json::to_string(&Value::Object(map))
        .map_err(|e| CryptoError::Canonicalization(e.to_string()))?;
    Ok(text.into_bytes())
}

/// SHA-256 hex of a record's canonical JSON with one field removed.
/// Used for cached-policy `integrity_hash` and similar embedded digests.
pub fn hash_with_field_removed<T: Serialize>(
    record: &T,
    field: &str,
) -> CryptoResult<String> {
    let mut map = to_object(record)?;
    map.remove(field);
    let text = serde_json::to_string(&Value::Object(map))
        .map_err(|e| CryptoError::Canonicalization(e.to_string()))?;
    Ok(sha256_hex(text.as_bytes()))
}

/// SHA-256 hex of a record's canonical JSON (no fields blanked).
/// Used for rollback tokens over artifacts that carry no hash field.
pub fn hash_canonical<T: Serialize>(record: &T) -> CryptoResult<String> {
    Ok(sha256_hex(to_canonical_json(record)?.as_bytes()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn canonical_json_sorts_keys() {
        let value = json!({"zeta": 1, "alpha": {"nested_z": 2, "nested_a": 3}});
        let text = to_canonical_json(&value).unwrap();
        assert_eq!(
            text,
            r#"{"alpha":{"nested_a":3,"nested_z":2},"zeta":1}"#
        );
    }

    #[test]
    fn envelope_hash_ignores_signature_fields() {
        let base = json!({
            "event_id": "e1",
            "integrity": {"hash_sha256": "", "prev_hash_sha256": null},
            "payload": {"k": "v"}
        });
        let mut signed = base.clone();
        signed["signature"] = json!("c2ln");
        signed["signing_key_id"] = json!("abc123");
        signed["integrity"]["hash_sha256"] = json!("deadbeef");

        assert_eq!(
            envelope_hash(&base).unwrap(),
            envelope_hash(&signed).unwrap()
        );
    }

    #[test]
    fn command_bytes_ignore_all_four_signature_fields() {
        let base = json!({"command_id": "c1", "action_type": "BLOCK_PROCESS"});
        let mut signed = base.clone();
        signed["signature"] = json!("sig");
        signed["signing_key_id"] = json!("key");
        signed["signing_algorithm"] = json!("ed25519");
        signed["signed_at"] = json!("2026-01-10T12:00:00Z");

        assert_eq!(
            command_signing_bytes(&base).unwrap(),
            command_signing_bytes(&signed).unwrap()
        );
    }

    #[test]
    fn hash_with_field_removed_matches_manual() {
        let record = json!({"a": 1, "integrity_hash": "xyz"});
        let expected = sha256_hex(br#"{"a":1}"#);
        assert_eq!(
            hash_with_field_removed(&record, "integrity_hash").unwrap(),
            expected
        );
    }

    #[test]
    fn non_object_is_rejected() {
        let result = envelope_signing_bytes(&json!([1, 2, 3]));
        assert!(result.is_err());
    }
}
