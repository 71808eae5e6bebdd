//! Persistent encrypted key vault
//!
//! **Security Invariant: ephemeral signing keys are forbidden.** Every key
//! is generated into the vault, encrypted at rest, and decrypted on demand
//! with a passphrase-derived key. Private key bytes live in memory only
//! between decrypt and use.
//!
//! At-rest format per key: PBKDF2-HMAC-SHA256 (100 000 iterations, 16-byte
//! salt) derives the AEAD key; ChaCha20-Poly1305 with a 12-byte random
//! nonce encrypts the 32 signing-key bytes; the record stores
//! `nonce || ciphertext` base64-encoded.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use chacha20poly1305::aead::{Aead, KeyInit};
use chacha20poly1305::{ChaCha20Poly1305, Key, Nonce};
use chrono::{DateTime, Utc};
use pbkdf2::pbkdf2_hmac;
use rand::rngs::OsRng;
use rand::RngCore;
use ransomeye_types::KeyId;
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use std::fs;
use std::path::{Path, PathBuf};

use crate::{
    sign_detached, CryptoError, CryptoResult, KeyPair, PublicKey, SignedPayload,
};

const PBKDF2_ITERATIONS: u32 = 100_000;
const SALT_LEN: usize = 16;
const NONCE_LEN: usize = 12;

/// Purpose of a vaulted key
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KeyPurpose {
    /// Signing telemetry envelopes
    EnvelopeSigning,
    /// Signing response commands (TRE / policy engine)
    CommandSigning,
    /// Signing audit-ledger entries
    LedgerSigning,
    /// General purpose
    General,
}

/// On-disk vault record for one key
#[derive(Debug, Clone, Serialize, Deserialize)]
struct VaultRecord {
    key_id: KeyId,
    public_key_hex: String,
    purpose: KeyPurpose,
    created_at: DateTime<Utc>,
    salt_hex: String,
    /// base64(nonce || ciphertext)
    encrypted_private_key: String,
}

/// A directory-backed encrypted key vault
pub struct KeyVault {
    root: PathBuf,
}

fn derive_key(passphrase: &str, salt: &[u8]) -> [u8; 32] {
    let mut key = [0u8; 32];
    pbkdf2_hmac::<Sha256>(passphrase.as_bytes(), salt, PBKDF2_ITERATIONS, &mut key);
    key
}

impl KeyVault {
    /// Open (creating if needed) a vault rooted at `root`
    pub fn open(root: impl AsRef<Path>) -> CryptoResult<Self> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(&root).map_err(|e| CryptoError::VaultError(e.to_string()))?;
        Ok(Self { root })
    }

    fn record_path(&self, key_id: &KeyId) -> PathBuf {
        self.root.join(format!("{}.vault.json", key_id))
    }

    fn read_record(&self, key_id: &KeyId) -> CryptoResult<VaultRecord> {
        let path = self.record_path(key_id);
        if !path.exists() {
            return Err(CryptoError::KeyNotFound {
                key_id: key_id.to_string(),
            });
        }
        let text =
            fs::read_to_string(&path).map_err(|e| CryptoError::VaultError(e.to_string()))?;
        serde_json::from_str(&text).map_err(|e| CryptoError::VaultError(e.to_string()))
    }

    fn encrypt_private_key(
        keypair: &KeyPair,
        passphrase: &str,
    ) -> CryptoResult<(String, String)> {
        let mut salt = [0u8; SALT_LEN];
        OsRng.fill_bytes(&mut salt);
        let key = derive_key(passphrase, &salt);

        let cipher = ChaCha20Poly1305::new(Key::from_slice(&key));
        let mut nonce = [0u8; NONCE_LEN];
        OsRng.fill_bytes(&mut nonce);

        let ciphertext = cipher
            .encrypt(Nonce::from_slice(&nonce), keypair.seed().as_ref())
            .map_err(|e| CryptoError::VaultError(format!("encryption failed: {}", e)))?;

        let mut combined = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        combined.extend_from_slice(&nonce);
        combined.extend_from_slice(&ciphertext);

        Ok((hex::encode(salt), BASE64.encode(combined)))
    }

    fn decrypt_private_key(record: &VaultRecord, passphrase: &str) -> CryptoResult<KeyPair> {
        let salt = hex::decode(&record.salt_hex)
            .map_err(|e| CryptoError::VaultError(format!("corrupt salt: {}", e)))?;
        let combined = BASE64
            .decode(&record.encrypted_private_key)
            .map_err(|e| CryptoError::VaultError(format!("corrupt ciphertext: {}", e)))?;
        if combined.len() <= NONCE_LEN {
            return Err(CryptoError::VaultError("ciphertext too short".to_string()));
        }

        let key = derive_key(passphrase, &salt);
        let cipher = ChaCha20Poly1305::new(Key::from_slice(&key));
        let (nonce, ciphertext) = combined.split_at(NONCE_LEN);

        let plaintext = cipher
            .decrypt(Nonce::from_slice(nonce), ciphertext)
            .map_err(|_| {
                CryptoError::VaultError("decryption failed (wrong passphrase?)".to_string())
            })?;

        if plaintext.len() != 32 {
            return Err(CryptoError::VaultError(
                "decrypted key has wrong length".to_string(),
            ));
        }
        let mut seed = [0u8; 32];
        seed.copy_from_slice(&plaintext);
        Ok(KeyPair::from_seed(&seed))
    }

    /// Generate a new key pair, encrypt it, and persist it
    pub fn generate_key(
        &self,
        passphrase: &str,
        purpose: KeyPurpose,
    ) -> CryptoResult<(KeyId, PublicKey)> {
        let keypair = KeyPair::generate();
        let public_key = PublicKey::from_keypair(&keypair);
        let key_id = keypair.key_id();

        let (salt_hex, encrypted_private_key) =
            Self::encrypt_private_key(&keypair, passphrase)?;

        let record = VaultRecord {
            key_id: key_id.clone(),
            public_key_hex: keypair.public_key_hex(),
            purpose,
            created_at: Utc::now(),
            salt_hex,
            encrypted_private_key,
        };

        let text = serde_json::to_string_pretty(&record)
            .map_err(|e| CryptoError::VaultError(e.to_string()))?;
        fs::write(self.record_path(&key_id), text)
            .map_err(|e| CryptoError::VaultError(e.to_string()))?;

        tracing::info!(key_id = %key_id, purpose = ?purpose, "generated vault key");
        Ok((key_id, public_key))
    }

    /// Get the public key for a key id (no passphrase required)
    pub fn public_key(&self, key_id: &KeyId) -> CryptoResult<PublicKey> {
        let record = self.read_record(key_id)?;
        PublicKey::from_hex(&record.public_key_hex)
    }

    /// Sign a message with a vaulted key. The private key is decrypted,
    /// used, and dropped within this call.
    pub fn sign(
        &self,
        key_id: &KeyId,
        passphrase: &str,
        message: &[u8],
    ) -> CryptoResult<SignedPayload> {
        let record = self.read_record(key_id)?;
        let keypair = Self::decrypt_private_key(&record, passphrase)?;
        sign_detached(&keypair, message)
    }

    /// Decrypt a vaulted key pair for a long-lived signing loop.
    ///
    /// Services that sign continuously (envelope builders, ledger
    /// writers) load their key once at startup instead of paying the KDF
    /// on every signature. The returned key pair must never be persisted
    /// or logged.
    pub fn load_keypair(&self, key_id: &KeyId, passphrase: &str) -> CryptoResult<KeyPair> {
        let record = self.read_record(key_id)?;
        Self::decrypt_private_key(&record, passphrase)
    }

    /// List all vaulted key ids with their purposes
    pub fn list_keys(&self) -> CryptoResult<Vec<(KeyId, KeyPurpose)>> {
        let mut keys = Vec::new();
        let entries =
            fs::read_dir(&self.root).map_err(|e| CryptoError::VaultError(e.to_string()))?;
        for entry in entries {
            let entry = entry.map_err(|e| CryptoError::VaultError(e.to_string()))?;
            let name = entry.file_name();
            let name = name.to_string_lossy();
            if !name.ends_with(".vault.json") {
                continue;
            }
            let text = fs::read_to_string(entry.path())
                .map_err(|e| CryptoError::VaultError(e.to_string()))?;
            let record: VaultRecord = serde_json::from_str(&text)
                .map_err(|e| CryptoError::VaultError(e.to_string()))?;
            keys.push((record.key_id, record.purpose));
        }
        Ok(keys)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::verify_detached;

    #[test]
    fn test_generate_and_sign() {
        let dir = tempfile::tempdir().unwrap();
        let vault = KeyVault::open(dir.path()).unwrap();

        let (key_id, public_key) = vault
            .generate_key("correct horse battery", KeyPurpose::CommandSigning)
            .unwrap();
        let message = b"block process 4242";

        let signed = vault.sign(&key_id, "correct horse battery", message).unwrap();
        assert!(
            verify_detached(public_key.verifying_key(), message, &signed.signature).unwrap()
        );
        assert_eq!(signed.signing_key_id, key_id);
    }

    #[test]
    fn test_wrong_passphrase_fails() {
        let dir = tempfile::tempdir().unwrap();
        let vault = KeyVault::open(dir.path()).unwrap();

        let (key_id, _) = vault
            .generate_key("right passphrase", KeyPurpose::General)
            .unwrap();

        let result = vault.sign(&key_id, "wrong passphrase", b"m");
        assert!(matches!(result, Err(CryptoError::VaultError(_))));
    }

    #[test]
    fn test_keys_survive_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let key_id = {
            let vault = KeyVault::open(dir.path()).unwrap();
            vault
                .generate_key("pass", KeyPurpose::EnvelopeSigning)
                .unwrap()
                .0
        };

        let vault = KeyVault::open(dir.path()).unwrap();
        let keys = vault.list_keys().unwrap();
        assert_eq!(keys.len(), 1);
        assert_eq!(keys[0].0, key_id);
        assert!(vault.sign(&key_id, "pass", b"m").is_ok());
    }

    #[test]
    fn test_missing_key_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let vault = KeyVault::open(dir.path()).unwrap();
        let result = vault.public_key(&KeyId::new("0".repeat(64)));
        assert!(matches!(result, Err(CryptoError::KeyNotFound { .. })));
    }
}
