//! Ledger entries and the entry hash/signature algebra

use chrono::{DateTime, Utc};
use ed25519_dalek::VerifyingKey;
use ransomeye_types::{KeyId, LedgerEntryId};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use ransomeye_crypto::{
    sha256_hex, sign_detached, verify_detached, CryptoResult, KeyPair,
};

use crate::{LedgerError, Result};

/// One audit-ledger entry
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub ledger_entry_id: LedgerEntryId,
    /// Emitting component (`threat-response-engine`, `rbac`, ...)
    pub component: String,
    /// Audit event name (`tre_action_executed`, `rbac_permission_check`, ...)
    pub action_type: String,
    /// What the decision was about
    pub subject: Value,
    /// Who made or triggered the decision
    pub actor: Value,
    pub payload: Value,
    pub appended_at: DateTime<Utc>,
    /// Previous entry's hash; null only at genesis
    pub prev_hash: Option<String>,
    /// SHA-256 over the canonical entry with `hash`/`signature` cleared
    pub hash: String,
    /// Detached ed25519 over the ASCII hex hash, base64
    pub signature: String,
    pub signing_key_id: KeyId,
}

impl LedgerEntry {
    /// Recompute this entry's content hash
    pub fn compute_hash(&self) -> Result<String> {
        let mut value = serde_json::to_value(self)
            .map_err(|e| LedgerError::Serialization(e.to_string()))?;
        let map = value
            .as_object_mut()
            .ok_or_else(|| LedgerError::Serialization("entry is not an object".into()))?;
        map.insert("hash".to_string(), Value::String(String::new()));
        map.remove("signature");
        let text = serde_json::to_string(&value)
            .map_err(|e| LedgerError::Serialization(e.to_string()))?;
        Ok(sha256_hex(text.as_bytes()))
    }

    /// Verify the embedded hash and signature
    pub fn verify(&self, verifying_key: &VerifyingKey) -> Result<bool> {
        if self.compute_hash()? != self.hash {
            return Ok(false);
        }
        Ok(verify_detached(
            verifying_key,
            self.hash.as_bytes(),
            &self.signature,
        )?)
    }
}

/// Signs entry hashes. The ledger never sees private key material; it holds
/// a signer capability instead.
pub trait EntrySigner: Send + Sync {
    fn key_id(&self) -> KeyId;
    /// Sign the ASCII hex hash, returning a base64 signature
    fn sign_hash(&self, hash_hex: &str) -> CryptoResult<String>;
}

/// Signer backed by an in-memory key pair (services load theirs from the
/// vault at startup)
pub struct KeypairSigner {
    keypair: KeyPair,
}

impl KeypairSigner {
    pub fn new(keypair: KeyPair) -> Self {
        Self { keypair }
    }

    pub fn verifying_key(&self) -> VerifyingKey {
        *self.keypair.verifying_key()
    }
}

impl EntrySigner for KeypairSigner {
    fn key_id(&self) -> KeyId {
        self.keypair.key_id()
    }

    fn sign_hash(&self, hash_hex: &str) -> CryptoResult<String> {
        Ok(sign_detached(&self.keypair, hash_hex.as_bytes())?.signature)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample_entry(signer: &KeypairSigner) -> LedgerEntry {
        let mut entry = LedgerEntry {
            ledger_entry_id: LedgerEntryId::new(),
            component: "threat-response-engine".to_string(),
            action_type: "tre_action_executed".to_string(),
            subject: json!({"type": "tre_action", "id": "a-1"}),
            actor: json!({"type": "user", "identifier": "u-1"}),
            payload: json!({"action_type": "BLOCK_PROCESS"}),
            appended_at: Utc::now(),
            prev_hash: None,
            hash: String::new(),
            signature: String::new(),
            signing_key_id: signer.key_id(),
        };
        entry.hash = entry.compute_hash().unwrap();
        entry.signature = signer.sign_hash(&entry.hash).unwrap();
        entry
    }

    #[test]
    fn hash_ignores_hash_and_signature_fields() {
        let signer = KeypairSigner::new(KeyPair::generate());
        let entry = sample_entry(&signer);
        let mut tampered = entry.clone();
        tampered.signature = "different".to_string();
        assert_eq!(entry.compute_hash().unwrap(), tampered.compute_hash().unwrap());
    }

    #[test]
    fn verify_detects_payload_tampering() {
        let signer = KeypairSigner::new(KeyPair::generate());
        let entry = sample_entry(&signer);
        assert!(entry.verify(&signer.verifying_key()).unwrap());

        let mut tampered = entry.clone();
        tampered.payload = json!({"action_type": "ISOLATE_HOST"});
        assert!(!tampered.verify(&signer.verifying_key()).unwrap());
    }
}
