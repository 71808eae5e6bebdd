//! Pattern-based secret redaction
//!
//! No secret may appear in any log line. Redaction happens at emission:
//! map keys matching a secret pattern are replaced wholesale, and free-form
//! strings carrying `pattern=value` / `pattern: value` assignments are
//! replaced entirely rather than partially scrubbed.

use serde_json::Value;

use crate::{CommonError, CommonResult};

/// Key-name fragments that mark a value as secret
pub const SECRET_PATTERNS: [&str; 16] = [
    "password",
    "passwd",
    "passphrase",
    "pwd",
    "secret",
    "key",
    "token",
    "auth",
    "credential",
    "api_key",
    "access_token",
    "bearer_token",
    "authorization",
    "signing_key",
    "private_key",
    "hmac_key",
];

pub const REDACTION_STRING: &str = "[REDACTED]";

/// Keys that match a secret pattern but are public by construction
/// (fingerprints and identifiers, never key material)
const PUBLIC_EXCEPTIONS: [&str; 5] = [
    "signing_key_id",
    "key_id",
    "public_key",
    "public_key_fingerprint",
    "rollback_token",
];

fn key_is_secret(key: &str) -> bool {
    let lower = key.to_lowercase();
    if PUBLIC_EXCEPTIONS.iter().any(|e| lower == *e) {
        return false;
    }
    SECRET_PATTERNS.iter().any(|p| lower.contains(p))
}

/// Whether a free-form string carries an explicit secret assignment
pub fn contains_secret_assignment(text: &str) -> bool {
    let lower = text.to_lowercase();
    SECRET_PATTERNS.iter().any(|p| {
        lower.contains(&format!("{}=", p)) || lower.contains(&format!("{}: ", p))
    })
}

/// Recursively redact secret-keyed values inside a JSON structure
pub fn redact_secrets(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut out = serde_json::Map::new();
            for (key, inner) in map {
                if key_is_secret(key) {
                    out.insert(key.clone(), Value::String(REDACTION_STRING.to_string()));
                } else {
                    out.insert(key.clone(), redact_secrets(inner));
                }
            }
            Value::Object(out)
        }
        Value::Array(items) => Value::Array(items.iter().map(redact_secrets).collect()),
        Value::String(s) if contains_secret_assignment(s) => {
            Value::String(REDACTION_STRING.to_string())
        }
        other => other.clone(),
    }
}

/// Sanitize a free-form string before it reaches a log line
pub fn sanitize_for_logging(text: &str) -> String {
    if contains_secret_assignment(text) {
        REDACTION_STRING.to_string()
    } else {
        text.to_string()
    }
}

/// Sanitize a third-party error before logging. Library error strings can
/// embed connection URLs and credentials.
pub fn sanitize_error(error: &dyn std::error::Error) -> String {
    sanitize_for_logging(&error.to_string())
}

/// Assert that a value about to be logged carries no secret assignment.
/// A detected attempt is itself a fatal condition: the caller escalates.
pub fn validate_secret_not_logged(value: &str, context: &str) -> CommonResult<()> {
    if contains_secret_assignment(value) {
        return Err(CommonError::SecretInLog {
            context: context.to_string(),
        });
    }
    Ok(())
}

/// Produce a config dump safe for diagnostics output
pub fn redacted_config(config: &Value) -> Value {
    redact_secrets(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn redacts_secret_keys() {
        let config = json!({
            "db_host": "localhost",
            "db_password": "hunter2",
            "vault_passphrase": "s3cret",
            "api_token": "abc"
        });
        let redacted = redact_secrets(&config);
        assert_eq!(redacted["db_host"], "localhost");
        assert_eq!(redacted["db_password"], REDACTION_STRING);
        assert_eq!(redacted["vault_passphrase"], REDACTION_STRING);
        assert_eq!(redacted["api_token"], REDACTION_STRING);
    }

    #[test]
    fn fingerprints_are_not_secrets() {
        let envelope = json!({
            "signing_key_id": "abcd1234",
            "rollback_token": "ffff"
        });
        let redacted = redact_secrets(&envelope);
        assert_eq!(redacted["signing_key_id"], "abcd1234");
        assert_eq!(redacted["rollback_token"], "ffff");
    }

    #[test]
    fn redacts_assignment_strings() {
        assert_eq!(
            sanitize_for_logging("connect failed: password=hunter2 host=db"),
            REDACTION_STRING
        );
        assert_eq!(sanitize_for_logging("connect failed: timeout"), "connect failed: timeout");
    }

    #[test]
    fn nested_structures_are_walked() {
        let value = json!({"outer": [{"secret": "x"}, {"plain": "y"}]});
        let redacted = redact_secrets(&value);
        assert_eq!(redacted["outer"][0]["secret"], REDACTION_STRING);
        assert_eq!(redacted["outer"][1]["plain"], "y");
    }

    #[test]
    fn secret_in_log_is_an_error() {
        assert!(validate_secret_not_logged("token=deadbeef", "test").is_err());
        assert!(validate_secret_not_logged("incident created", "test").is_ok());
    }
}
