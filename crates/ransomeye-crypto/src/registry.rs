//! Key registry and revocation list
//!
//! Three-tier hierarchy: an offline **root** key attests **vendor** signing
//! keys, which attest **component** keys used for envelopes and commands.
//! Every key is registered before first use; a revoked `key_id` blocks any
//! signature that verifies with it.

use chrono::{DateTime, Utc};
use ed25519_dalek::VerifyingKey;
use ransomeye_types::KeyId;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::RwLock;

use crate::{CryptoError, CryptoResult, PublicKey};

/// Key status lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum KeyStatus {
    Active,
    Revoked,
    Rotated,
    Compromised,
}

impl KeyStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            KeyStatus::Active => "active",
            KeyStatus::Revoked => "revoked",
            KeyStatus::Rotated => "rotated",
            KeyStatus::Compromised => "compromised",
        }
    }
}

/// Position of a key in the trust hierarchy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum KeyType {
    Root,
    Vendor,
    Component,
}

/// A registered key
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KeyEntry {
    pub key_id: KeyId,
    pub key_type: KeyType,
    /// SHA-256 of the raw public-key bytes; must equal `key_id`
    pub public_key_fingerprint: String,
    pub status: KeyStatus,
    pub generation_date: DateTime<Utc>,
    pub parent_key_id: Option<KeyId>,
    /// Component this key may sign envelopes for (identity binding)
    pub authorized_component: Option<String>,
    pub revoked_at: Option<DateTime<Utc>>,
    pub revocation_reason: Option<String>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct RegistryFile {
    keys: BTreeMap<String, KeyEntry>,
}

/// File-backed key registry with an in-memory view
pub struct KeyRegistry {
    path: PathBuf,
    state: RwLock<RegistryFile>,
}

impl KeyRegistry {
    /// Open (creating if needed) the registry file
    pub fn open(path: impl AsRef<Path>) -> CryptoResult<Self> {
        let path = path.as_ref().to_path_buf();
        let state = if path.exists() {
            let text = fs::read_to_string(&path)
                .map_err(|e| CryptoError::RegistryError(e.to_string()))?;
            serde_json::from_str(&text)
                .map_err(|e| CryptoError::RegistryError(format!("corrupt registry: {}", e)))?
        } else {
            if let Some(parent) = path.parent() {
                fs::create_dir_all(parent)
                    .map_err(|e| CryptoError::RegistryError(e.to_string()))?;
            }
            RegistryFile::default()
        };
        Ok(Self {
            path,
            state: RwLock::new(state),
        })
    }

    fn save(&self, state: &RegistryFile) -> CryptoResult<()> {
        let text = serde_json::to_string_pretty(state)
            .map_err(|e| CryptoError::RegistryError(e.to_string()))?;
        fs::write(&self.path, text).map_err(|e| CryptoError::RegistryError(e.to_string()))
    }

    /// Register a key. The fingerprint is recomputed from the public key
    /// and must equal the declared `key_id`.
    pub fn register_key(
        &self,
        public_key: &PublicKey,
        key_type: KeyType,
        parent_key_id: Option<KeyId>,
        authorized_component: Option<String>,
    ) -> CryptoResult<KeyEntry> {
        let fingerprint = public_key.key_id();

        let entry = KeyEntry {
            key_id: fingerprint.clone(),
            key_type,
            public_key_fingerprint: fingerprint.to_string(),
            status: KeyStatus::Active,
            generation_date: Utc::now(),
            parent_key_id,
            authorized_component,
            revoked_at: None,
            revocation_reason: None,
        };

        let mut state = self
            .state
            .write()
            .map_err(|e| CryptoError::RegistryError(e.to_string()))?;
        if state.keys.contains_key(fingerprint.as_str()) {
            return Err(CryptoError::RegistryError(format!(
                "key already registered: {}",
                fingerprint
            )));
        }
        state.keys.insert(fingerprint.to_string(), entry.clone());
        self.save(&state)?;

        tracing::info!(key_id = %fingerprint, key_type = ?key_type, "registered key");
        Ok(entry)
    }

    /// Look up a key entry
    pub fn get(&self, key_id: &KeyId) -> CryptoResult<Option<KeyEntry>> {
        let state = self
            .state
            .read()
            .map_err(|e| CryptoError::RegistryError(e.to_string()))?;
        Ok(state.keys.get(key_id.as_str()).cloned())
    }

    /// Whether a key exists and is ACTIVE
    pub fn is_key_active(&self, key_id: &KeyId) -> CryptoResult<bool> {
        Ok(self
            .get(key_id)?
            .map(|e| e.status == KeyStatus::Active)
            .unwrap_or(false))
    }

    /// Whether a key is on the revocation list
    pub fn is_revoked(&self, key_id: &KeyId) -> CryptoResult<bool> {
        Ok(self
            .get(key_id)?
            .map(|e| matches!(e.status, KeyStatus::Revoked | KeyStatus::Compromised))
            .unwrap_or(false))
    }

    fn set_status(
        &self,
        key_id: &KeyId,
        status: KeyStatus,
        reason: Option<String>,
    ) -> CryptoResult<()> {
        let mut state = self
            .state
            .write()
            .map_err(|e| CryptoError::RegistryError(e.to_string()))?;
        let entry = state
            .keys
            .get_mut(key_id.as_str())
            .ok_or_else(|| CryptoError::KeyNotFound {
                key_id: key_id.to_string(),
            })?;
        entry.status = status;
        if matches!(status, KeyStatus::Revoked | KeyStatus::Compromised) {
            entry.revoked_at = Some(Utc::now());
            entry.revocation_reason = reason;
        }
        self.save(&state)
    }

    /// Revoke a key
    pub fn revoke_key(&self, key_id: &KeyId, reason: impl Into<String>) -> CryptoResult<()> {
        tracing::warn!(key_id = %key_id, "revoking key");
        self.set_status(key_id, KeyStatus::Revoked, Some(reason.into()))
    }

    /// Mark a key compromised (revoked with prejudice)
    pub fn mark_compromised(
        &self,
        key_id: &KeyId,
        reason: impl Into<String>,
    ) -> CryptoResult<()> {
        tracing::error!(key_id = %key_id, "marking key compromised");
        self.set_status(key_id, KeyStatus::Compromised, Some(reason.into()))
    }

    /// Rotate: mark the old key ROTATED and register its replacement
    pub fn rotate_key(
        &self,
        old_key_id: &KeyId,
        new_public_key: &PublicKey,
        authorized_component: Option<String>,
    ) -> CryptoResult<KeyEntry> {
        let old = self.get(old_key_id)?.ok_or_else(|| CryptoError::KeyNotFound {
            key_id: old_key_id.to_string(),
        })?;
        self.set_status(old_key_id, KeyStatus::Rotated, None)?;
        self.register_key(
            new_public_key,
            old.key_type,
            Some(old_key_id.clone()),
            authorized_component,
        )
    }

    /// The persisted certificate-revocation list
    pub fn revocation_list(&self) -> CryptoResult<Vec<KeyEntry>> {
        let state = self
            .state
            .read()
            .map_err(|e| CryptoError::RegistryError(e.to_string()))?;
        Ok(state
            .keys
            .values()
            .filter(|e| matches!(e.status, KeyStatus::Revoked | KeyStatus::Compromised))
            .cloned()
            .collect())
    }

    /// Component a key is authorized to sign envelopes for
    pub fn authorized_component(&self, key_id: &KeyId) -> CryptoResult<Option<String>> {
        Ok(self.get(key_id)?.and_then(|e| e.authorized_component))
    }
}

/// Resolves `signing_key_id` fingerprints to verification keys.
///
/// Public keys live as `<key_id>.pub` hex files in a key directory; the
/// registry gates every lookup (key must exist, be ACTIVE, not revoked, and
/// its recomputed fingerprint must equal the file name).
pub struct VerificationKeys {
    key_dir: PathBuf,
    registry: KeyRegistry,
    cache: RwLock<BTreeMap<String, VerifyingKey>>,
}

impl VerificationKeys {
    pub fn new(key_dir: impl AsRef<Path>, registry: KeyRegistry) -> Self {
        Self {
            key_dir: key_dir.as_ref().to_path_buf(),
            registry,
            cache: RwLock::new(BTreeMap::new()),
        }
    }

    pub fn registry(&self) -> &KeyRegistry {
        &self.registry
    }

    /// Publish a public key file so verifiers can resolve it
    pub fn publish(&self, public_key: &PublicKey) -> CryptoResult<KeyId> {
        fs::create_dir_all(&self.key_dir)
            .map_err(|e| CryptoError::RegistryError(e.to_string()))?;
        let key_id = public_key.key_id();
        let path = self.key_dir.join(format!("{}.pub", key_id));
        fs::write(&path, public_key.to_hex())
            .map_err(|e| CryptoError::RegistryError(e.to_string()))?;
        Ok(key_id)
    }

    /// Resolve a verification key, enforcing registry status and the
    /// fingerprint binding
    pub fn verifying_key_for(&self, key_id: &KeyId) -> CryptoResult<VerifyingKey> {
        if let Some(cached) = self
            .cache
            .read()
            .map_err(|e| CryptoError::RegistryError(e.to_string()))?
            .get(key_id.as_str())
        {
            // Status can change after caching; re-check the registry
            self.check_status(key_id)?;
            return Ok(*cached);
        }

        self.check_status(key_id)?;

        let path = self.key_dir.join(format!("{}.pub", key_id));
        if !path.exists() {
            return Err(CryptoError::KeyNotFound {
                key_id: key_id.to_string(),
            });
        }
        let hex_text = fs::read_to_string(&path)
            .map_err(|e| CryptoError::RegistryError(e.to_string()))?;
        let public_key = PublicKey::from_hex(hex_text.trim())?;

        let computed = public_key.key_id();
        if &computed != key_id {
            return Err(CryptoError::FingerprintMismatch {
                expected: key_id.to_string(),
                computed: computed.to_string(),
            });
        }

        let verifying_key = *public_key.verifying_key();
        self.cache
            .write()
            .map_err(|e| CryptoError::RegistryError(e.to_string()))?
            .insert(key_id.to_string(), verifying_key);
        Ok(verifying_key)
    }

    fn check_status(&self, key_id: &KeyId) -> CryptoResult<()> {
        let entry = self.registry.get(key_id)?.ok_or_else(|| CryptoError::KeyNotFound {
            key_id: key_id.to_string(),
        })?;
        match entry.status {
            KeyStatus::Active => Ok(()),
            KeyStatus::Revoked | KeyStatus::Compromised => Err(CryptoError::KeyRevoked {
                key_id: key_id.to_string(),
            }),
            KeyStatus::Rotated => Err(CryptoError::KeyNotActive {
                key_id: key_id.to_string(),
                status: entry.status.as_str().to_string(),
            }),
        }
    }
}
