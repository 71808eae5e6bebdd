//! Detached Ed25519 signatures for RansomEye
//!
//! Signatures travel base64-encoded next to a `signing_key_id` fingerprint
//! so verifiers can fetch the right public key.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use chrono::{DateTime, Utc};
use ed25519_dalek::{Signature as Ed25519Signature, Verifier, VerifyingKey};
use ransomeye_types::KeyId;
use serde::{Deserialize, Serialize};

use crate::{CryptoError, CryptoResult, KeyPair};

/// Result of a signing operation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignedPayload {
    /// Base64-encoded detached signature
    pub signature: String,
    /// SHA-256 fingerprint of the signing public key
    pub signing_key_id: KeyId,
    pub signed_at: DateTime<Utc>,
}

/// Sign a message, producing a detached base64 signature
pub fn sign_detached(keypair: &KeyPair, message: &[u8]) -> CryptoResult<SignedPayload> {
    let signature = keypair.try_sign(message)?;

    Ok(SignedPayload {
        signature: BASE64.encode(signature.to_bytes()),
        signing_key_id: keypair.key_id(),
        signed_at: Utc::now(),
    })
}

/// Verify a detached base64 signature against a message.
/// Returns `Ok(false)` for a well-formed but invalid signature; malformed
/// encodings are errors.
pub fn verify_detached(
    verifying_key: &VerifyingKey,
    message: &[u8],
    signature_b64: &str,
) -> CryptoResult<bool> {
    let signature_bytes = BASE64
        .decode(signature_b64)
        .map_err(|e| CryptoError::VerificationFailed(format!("invalid encoding: {}", e)))?;

    if signature_bytes.len() != 64 {
        return Err(CryptoError::VerificationFailed(
            "Signature must be 64 bytes".to_string(),
        ));
    }

    let mut sig_array = [0u8; 64];
    sig_array.copy_from_slice(&signature_bytes);
    let signature = Ed25519Signature::from_bytes(&sig_array);

    match verifying_key.verify(message, &signature) {
        Ok(()) => Ok(true),
        Err(_) => Ok(false),
    }
}

/// A signing capability handed to components that must not hold key
/// material themselves. Implemented by in-memory keypairs and by the
/// vault-backed signer services construct at startup.
pub trait PayloadSigner: Send + Sync {
    fn key_id(&self) -> KeyId;
    fn sign(&self, message: &[u8]) -> CryptoResult<SignedPayload>;
}

/// Signer backed by an in-memory keypair
pub struct KeypairPayloadSigner {
    keypair: KeyPair,
}

impl KeypairPayloadSigner {
    pub fn new(keypair: KeyPair) -> Self {
        Self { keypair }
    }

    pub fn verifying_key(&self) -> ed25519_dalek::VerifyingKey {
        *self.keypair.verifying_key()
    }
}

impl PayloadSigner for KeypairPayloadSigner {
    fn key_id(&self) -> KeyId {
        self.keypair.key_id()
    }

    fn sign(&self, message: &[u8]) -> CryptoResult<SignedPayload> {
        sign_detached(&self.keypair, message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sign_and_verify() {
        let keypair = KeyPair::generate();
        let message = b"isolate host h-42";

        let signed = sign_detached(&keypair, message).unwrap();
        assert!(verify_detached(keypair.verifying_key(), message, &signed.signature).unwrap());
        assert_eq!(signed.signing_key_id, keypair.key_id());
    }

    #[test]
    fn test_wrong_message_fails() {
        let keypair = KeyPair::generate();
        let signed = sign_detached(&keypair, b"original").unwrap();

        assert!(!verify_detached(keypair.verifying_key(), b"tampered", &signed.signature)
            .unwrap());
    }

    #[test]
    fn test_wrong_key_fails() {
        let keypair1 = KeyPair::generate();
        let keypair2 = KeyPair::generate();
        let signed = sign_detached(&keypair1, b"message").unwrap();

        assert!(
            !verify_detached(keypair2.verifying_key(), b"message", &signed.signature).unwrap()
        );
    }

    #[test]
    fn test_malformed_encoding_is_error() {
        let keypair = KeyPair::generate();
        let result = verify_detached(keypair.verifying_key(), b"m", "not base64!!!");
        assert!(result.is_err());
    }
}
