//! Key material and fingerprint identities
//!
//! Every key in the trust hierarchy is addressed by its fingerprint: the
//! SHA-256 of the raw 32 verifying-key bytes. The fingerprint is computed
//! once, at construction, so a key pair can never disagree with its own
//! `KeyId`; registry entries, envelope `signing_key_id` fields, and the
//! agent gate's issuer check all compare against the same derivation.

use ed25519_dalek::{Signature as Ed25519Signature, Signer, SigningKey, VerifyingKey};
use rand::rngs::OsRng;
use ransomeye_types::KeyId;

use crate::{sha256_hex, CryptoError, CryptoResult};

fn fingerprint_of(verifying_key: &VerifyingKey) -> KeyId {
    KeyId::new(sha256_hex(verifying_key.as_bytes()))
}

/// A signing key pair with its precomputed fingerprint
#[derive(Clone)]
pub struct KeyPair {
    signing_key: SigningKey,
    verifying_key: VerifyingKey,
    key_id: KeyId,
}

impl KeyPair {
    fn from_signing_key(signing_key: SigningKey) -> Self {
        let verifying_key = signing_key.verifying_key();
        let key_id = fingerprint_of(&verifying_key);
        Self {
            signing_key,
            verifying_key,
            key_id,
        }
    }

    /// Generate a fresh key pair. Callers must register and vault it
    /// before first use; an unvaulted key is an ephemeral key.
    pub fn generate() -> Self {
        Self::from_signing_key(SigningKey::generate(&mut OsRng))
    }

    /// Reconstruct a key pair from its 32-byte seed (vault decryption).
    /// The derived fingerprint is identical to the one computed when the
    /// key was generated, which is what lets a reopened vault keep
    /// signing under the same `signing_key_id`.
    pub fn from_seed(seed: &[u8; 32]) -> Self {
        Self::from_signing_key(SigningKey::from_bytes(seed))
    }

    /// The 32-byte seed, for vault encryption only. Never log, persist
    /// unencrypted, or send this.
    pub(crate) fn seed(&self) -> [u8; 32] {
        self.signing_key.to_bytes()
    }

    /// Produce a raw detached signature over a message
    pub(crate) fn try_sign(&self, message: &[u8]) -> CryptoResult<Ed25519Signature> {
        self.signing_key
            .try_sign(message)
            .map_err(|e| CryptoError::SigningFailed(e.to_string()))
    }

    pub fn verifying_key(&self) -> &VerifyingKey {
        &self.verifying_key
    }

    /// The fingerprint this key signs under
    pub fn key_id(&self) -> KeyId {
        self.key_id.clone()
    }

    /// The shareable half of this pair
    pub fn public_key(&self) -> PublicKey {
        PublicKey {
            verifying_key: self.verifying_key,
            key_id: self.key_id.clone(),
        }
    }

    /// Hex encoding of the verifying key, as published to key directories
    pub fn public_key_hex(&self) -> String {
        hex::encode(self.verifying_key.as_bytes())
    }
}

/// A validated verifying key with its fingerprint (safe to share)
///
/// Construction always goes through curve-point validation, so holding a
/// `PublicKey` means the bytes decode to a usable ed25519 key and the
/// `KeyId` is its true fingerprint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublicKey {
    verifying_key: VerifyingKey,
    key_id: KeyId,
}

impl PublicKey {
    pub fn from_keypair(keypair: &KeyPair) -> Self {
        keypair.public_key()
    }

    /// Validate raw verifying-key bytes
    pub fn from_bytes(bytes: &[u8]) -> CryptoResult<Self> {
        let array: [u8; 32] = bytes.try_into().map_err(|_| {
            CryptoError::InvalidKeyFormat(format!(
                "public key must be 32 bytes, got {}",
                bytes.len()
            ))
        })?;
        let verifying_key = VerifyingKey::from_bytes(&array)
            .map_err(|e| CryptoError::InvalidKeyFormat(e.to_string()))?;
        Ok(Self {
            key_id: fingerprint_of(&verifying_key),
            verifying_key,
        })
    }

    /// Parse the hex form published in key directories and configuration
    pub fn from_hex(text: &str) -> CryptoResult<Self> {
        let bytes = hex::decode(text.trim())
            .map_err(|e| CryptoError::InvalidKeyFormat(e.to_string()))?;
        Self::from_bytes(&bytes)
    }

    pub fn verifying_key(&self) -> &VerifyingKey {
        &self.verifying_key
    }

    /// SHA-256 fingerprint of the raw key bytes
    pub fn key_id(&self) -> KeyId {
        self.key_id.clone()
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.verifying_key.as_bytes())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::is_sha256_hex;

    #[test]
    fn fingerprint_is_sha256_of_verifying_key_bytes() {
        let keypair = KeyPair::generate();
        let expected = sha256_hex(keypair.verifying_key().as_bytes());
        assert_eq!(keypair.key_id().as_str(), expected);
        assert!(is_sha256_hex(keypair.key_id().as_str()));
    }

    #[test]
    fn seed_reconstruction_keeps_the_signing_identity() {
        // the vault decrypts a seed and must end up signing under the
        // same signing_key_id the registry holds
        let original = KeyPair::generate();
        let reopened = KeyPair::from_seed(&original.seed());

        assert_eq!(original.key_id(), reopened.key_id());
        assert_eq!(original.verifying_key(), reopened.verifying_key());
    }

    #[test]
    fn hierarchy_keys_never_collide() {
        // root, vendor, and component keys are distinguished only by
        // fingerprint; three fresh keys must yield three distinct ids
        let root = KeyPair::generate();
        let vendor = KeyPair::generate();
        let component = KeyPair::generate();

        let mut ids = vec![root.key_id(), vendor.key_id(), component.key_id()];
        ids.sort_by(|a, b| a.as_str().cmp(b.as_str()));
        ids.dedup();
        assert_eq!(ids.len(), 3);
    }

    #[test]
    fn published_hex_round_trips_with_the_same_fingerprint() {
        // a key directory stores hex; the verifier side must recover the
        // identical fingerprint or the issuer check would break
        let keypair = KeyPair::generate();
        let published = keypair.public_key_hex();

        let resolved = PublicKey::from_hex(&published).unwrap();
        assert_eq!(resolved.key_id(), keypair.key_id());
        assert_eq!(resolved.verifying_key(), keypair.verifying_key());
        assert_eq!(resolved.to_hex(), published);
    }

    #[test]
    fn malformed_key_material_is_rejected() {
        assert!(matches!(
            PublicKey::from_bytes(&[0u8; 16]),
            Err(CryptoError::InvalidKeyFormat(_))
        ));
        assert!(PublicKey::from_hex("not hex at all").is_err());
        // 31 bytes of valid hex is still not a key
        assert!(PublicKey::from_hex(&"ab".repeat(31)).is_err());
    }

    #[test]
    fn public_half_signs_nothing_but_binds_the_issuer() {
        // the agent gate trusts a command only when the command's
        // signing_key_id equals the configured key's fingerprint; both
        // sides of that comparison come from the same pair
        let keypair = KeyPair::generate();
        let public = PublicKey::from_keypair(&keypair);
        assert_eq!(public.key_id(), keypair.key_id());
    }
}
