//! The file-backed ledger writer and chain verifier

use chrono::Utc;
use ed25519_dalek::VerifyingKey;
use fs2::FileExt;
use ransomeye_types::{KeyId, LedgerEntryId};
use serde_json::Value;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use ransomeye_common::{check_disk_space, MIN_FREE_BYTES};

use crate::{EntrySigner, LedgerEntry, LedgerError, Result};

/// Receipt returned for every append
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppendReceipt {
    pub ledger_entry_id: LedgerEntryId,
    pub hash: String,
}

struct WriterState {
    file: File,
    last_hash: Option<String>,
    entry_count: u64,
}

/// The append-only audit ledger
///
/// One exclusive writer per process; the OS file lock is held for the
/// ledger's lifetime. Appends are serialized through an internal mutex.
pub struct AuditLedger {
    path: PathBuf,
    signer: Arc<dyn EntrySigner>,
    state: Mutex<WriterState>,
}

impl AuditLedger {
    /// Open the ledger file, acquire the exclusive writer lock, and recover
    /// the chain head from existing entries.
    pub fn open(path: impl AsRef<Path>, signer: Arc<dyn EntrySigner>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .read(true)
            .open(&path)?;
        file.try_lock_exclusive()
            .map_err(|e| LedgerError::Locked(e.to_string()))?;

        let existing = read_entries(&path)?;
        let last_hash = existing.last().map(|e| e.hash.clone());
        let entry_count = existing.len() as u64;

        tracing::info!(
            path = %path.display(),
            entries = entry_count,
            "audit ledger opened"
        );

        Ok(Self {
            path,
            signer,
            state: Mutex::new(WriterState {
                file,
                last_hash,
                entry_count,
            }),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn entry_count(&self) -> u64 {
        self.state.lock().map(|s| s.entry_count).unwrap_or(0)
    }

    /// Append one entry. The write is refused when disk space is below the
    /// floor; the caller escalates that as fatal.
    pub fn append(
        &self,
        component: &str,
        action_type: &str,
        subject: Value,
        actor: Value,
        payload: Value,
    ) -> Result<AppendReceipt> {
        let parent = self
            .path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));
        check_disk_space(&parent, MIN_FREE_BYTES)
            .map_err(|e| LedgerError::DiskFull(e.to_string()))?;

        let mut state = self
            .state
            .lock()
            .map_err(|e| LedgerError::Serialization(format!("writer poisoned: {}", e)))?;

        let mut entry = LedgerEntry {
            ledger_entry_id: LedgerEntryId::new(),
            component: component.to_string(),
            action_type: action_type.to_string(),
            subject,
            actor,
            payload,
            appended_at: Utc::now(),
            prev_hash: state.last_hash.clone(),
            hash: String::new(),
            signature: String::new(),
            signing_key_id: self.signer.key_id(),
        };
        entry.hash = entry.compute_hash()?;
        entry.signature = self.signer.sign_hash(&entry.hash)?;

        let line = serde_json::to_string(&entry)
            .map_err(|e| LedgerError::Serialization(e.to_string()))?;
        writeln!(state.file, "{}", line)?;
        state.file.flush()?;

        state.last_hash = Some(entry.hash.clone());
        state.entry_count += 1;

        Ok(AppendReceipt {
            ledger_entry_id: entry.ledger_entry_id,
            hash: entry.hash,
        })
    }
}

/// Read all entries from a ledger file. Readers do not take the writer
/// lock; they see a consistent prefix because entries are whole lines.
pub fn read_entries(path: &Path) -> Result<Vec<LedgerEntry>> {
    if !path.exists() {
        return Ok(Vec::new());
    }
    let text = std::fs::read_to_string(path)?;
    let mut entries = Vec::new();
    for (index, line) in text.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        let entry: LedgerEntry = serde_json::from_str(line).map_err(|e| {
            LedgerError::ChainBroken {
                index,
                reason: format!("unparseable entry: {}", e),
            }
        })?;
        entries.push(entry);
    }
    Ok(entries)
}

/// Walk the chain from genesis, verifying links, hashes, and signatures.
/// Any mismatch is an error the caller treats as fatal.
pub fn verify_chain(
    entries: &[LedgerEntry],
    resolve_key: &dyn Fn(&KeyId) -> Option<VerifyingKey>,
) -> Result<()> {
    let mut prev_hash: Option<&str> = None;

    for (index, entry) in entries.iter().enumerate() {
        match (&entry.prev_hash, prev_hash) {
            (None, None) => {}
            (Some(declared), Some(actual)) if declared == actual => {}
            (declared, actual) => {
                return Err(LedgerError::ChainBroken {
                    index,
                    reason: format!(
                        "prev_hash mismatch: declared {:?}, actual {:?}",
                        declared, actual
                    ),
                });
            }
        }

        if entry.compute_hash()? != entry.hash {
            return Err(LedgerError::ChainBroken {
                index,
                reason: "content hash mismatch".to_string(),
            });
        }

        let verifying_key = resolve_key(&entry.signing_key_id).ok_or_else(|| {
            LedgerError::ChainBroken {
                index,
                reason: format!("unknown signing key {}", entry.signing_key_id),
            }
        })?;
        if !entry.verify(&verifying_key)? {
            return Err(LedgerError::SignatureInvalid { index });
        }

        prev_hash = Some(entry.hash.as_str());
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::KeypairSigner;
    use ransomeye_crypto::KeyPair;
    use serde_json::json;

    fn test_ledger(dir: &Path) -> (AuditLedger, VerifyingKey, KeyId) {
        let signer = KeypairSigner::new(KeyPair::generate());
        let verifying = signer.verifying_key();
        let key_id = signer.key_id();
        let ledger = AuditLedger::open(dir.join("audit.ledger"), Arc::new(signer)).unwrap();
        (ledger, verifying, key_id)
    }

    #[test]
    fn append_links_the_chain() {
        let dir = tempfile::tempdir().unwrap();
        let (ledger, verifying, key_id) = test_ledger(dir.path());

        let first = ledger
            .append(
                "rbac",
                "rbac_permission_check",
                json!({"id": "a-1"}),
                json!({"user": "u-1"}),
                json!({"decision": "ALLOW"}),
            )
            .unwrap();
        let second = ledger
            .append(
                "threat-response-engine",
                "tre_action_executed",
                json!({"id": "a-1"}),
                json!({"user": "u-1"}),
                json!({"status": "SUCCEEDED"}),
            )
            .unwrap();
        assert_ne!(first.hash, second.hash);

        let entries = read_entries(ledger.path()).unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].prev_hash, None);
        assert_eq!(entries[1].prev_hash.as_deref(), Some(first.hash.as_str()));

        let resolve = move |id: &KeyId| {
            if id == &key_id {
                Some(verifying)
            } else {
                None
            }
        };
        verify_chain(&entries, &resolve).unwrap();
    }

    #[test]
    fn chain_head_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let signer = Arc::new(KeypairSigner::new(KeyPair::generate()));
        let path = dir.path().join("audit.ledger");

        let first_hash = {
            let ledger = AuditLedger::open(&path, signer.clone()).unwrap();
            ledger
                .append("rbac", "rbac_permission_check", json!({}), json!({}), json!({}))
                .unwrap()
                .hash
        };

        let ledger = AuditLedger::open(&path, signer).unwrap();
        let receipt = ledger
            .append("rbac", "rbac_permission_check", json!({}), json!({}), json!({}))
            .unwrap();
        assert_ne!(receipt.hash, first_hash);

        let entries = read_entries(&path).unwrap();
        assert_eq!(entries[1].prev_hash.as_deref(), Some(first_hash.as_str()));
    }

    #[test]
    fn verifier_detects_tampering() {
        let dir = tempfile::tempdir().unwrap();
        let (ledger, verifying, key_id) = test_ledger(dir.path());
        for i in 0..3 {
            ledger
                .append("tre", "tre_action_executed", json!({"i": i}), json!({}), json!({}))
                .unwrap();
        }

        let mut entries = read_entries(ledger.path()).unwrap();
        entries[1].payload = json!({"i": 99});

        let resolve = move |id: &KeyId| {
            if id == &key_id {
                Some(verifying)
            } else {
                None
            }
        };
        let result = verify_chain(&entries, &resolve);
        assert!(matches!(result, Err(LedgerError::ChainBroken { index: 1, .. })));
    }

    #[test]
    fn second_writer_is_locked_out() {
        let dir = tempfile::tempdir().unwrap();
        let signer: Arc<dyn EntrySigner> =
            Arc::new(KeypairSigner::new(KeyPair::generate()));
        let path = dir.path().join("audit.ledger");

        let _first = AuditLedger::open(&path, signer.clone()).unwrap();
        let second = AuditLedger::open(&path, signer);
        assert!(matches!(second, Err(LedgerError::Locked(_))));
    }
}
