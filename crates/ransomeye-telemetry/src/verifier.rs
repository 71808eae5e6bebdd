//! Envelope verification
//!
//! Verification rebuilds the canonical JSON with signature fields blanked,
//! recomputes SHA-256, verifies the ed25519 signature against the public
//! key fetched by `signing_key_id`, and finally compares the embedded
//! hash. Failure reasons are strings because they land in validation logs,
//! not control flow.

use ransomeye_types::EventEnvelope;

use ransomeye_crypto::{envelope_hash, verify_detached, VerificationKeys};

/// Verifies envelope signatures and component identity bindings
pub struct EnvelopeVerifier {
    keys: VerificationKeys,
}

impl EnvelopeVerifier {
    pub fn new(keys: VerificationKeys) -> Self {
        Self { keys }
    }

    pub fn keys(&self) -> &VerificationKeys {
        &self.keys
    }

    /// Verify signature and embedded hash. Returns `(ok, error_reason)`.
    pub fn verify_envelope(&self, envelope: &EventEnvelope) -> (bool, Option<String>) {
        let Some(signature) = envelope.signature.as_deref() else {
            return (false, Some("missing signature field".to_string()));
        };
        let Some(signing_key_id) = envelope.signing_key_id.as_ref() else {
            return (false, Some("missing signing_key_id field".to_string()));
        };

        let verifying_key = match self.keys.verifying_key_for(signing_key_id) {
            Ok(key) => key,
            Err(e) => return (false, Some(format!("public key lookup failed: {}", e))),
        };

        let computed_hash = match envelope_hash(envelope) {
            Ok(hash) => hash,
            Err(e) => return (false, Some(format!("canonicalization failed: {}", e))),
        };

        match verify_detached(&verifying_key, computed_hash.as_bytes(), signature) {
            Ok(true) => {}
            Ok(false) => return (false, Some("signature verification failed".to_string())),
            Err(e) => return (false, Some(format!("signature verification error: {}", e))),
        }

        if envelope.integrity.hash_sha256 != computed_hash {
            return (
                false,
                Some("hash mismatch: computed hash does not match provided hash".to_string()),
            );
        }

        (true, None)
    }

    /// Verify that the envelope's `component` matches the signing key's
    /// authorized component.
    pub fn verify_component_identity(&self, envelope: &EventEnvelope) -> (bool, Option<String>) {
        let Some(signing_key_id) = envelope.signing_key_id.as_ref() else {
            return (false, Some("missing signing_key_id field".to_string()));
        };

        let authorized = match self.keys.registry().authorized_component(signing_key_id) {
            Ok(component) => component,
            Err(e) => return (false, Some(format!("registry lookup failed: {}", e))),
        };

        match authorized {
            Some(component) if component == envelope.component => (true, None),
            Some(component) => (
                false,
                Some(format!(
                    "key is authorized for component {}, envelope claims {}",
                    component, envelope.component
                )),
            ),
            None => (
                false,
                Some("signing key has no authorized component".to_string()),
            ),
        }
    }
}
