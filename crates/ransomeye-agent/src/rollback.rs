//! Rollback artifacts and idempotent replay
//!
//! Artifacts are stored at `<store>/<rollback_token>.json`, captured
//! before execution. Replay loads the artifact, applies the reverse
//! operation, and marks the token replayed; a second replay on the same
//! token is a no-op success. A missing artifact fails that rollback only,
//! never the process.

use chrono::{DateTime, Utc};
use ransomeye_types::RollbackArtifact;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use ransomeye_crypto::hash_canonical;

use crate::{ActionExecutor, AgentError, Result};

/// On-disk artifact record
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredArtifact {
    pub rollback_token: String,
    pub artifact: RollbackArtifact,
    /// Content digest of the canonical artifact JSON
    pub artifact_sha256: String,
    pub captured_at: DateTime<Utc>,
    pub replayed_at: Option<DateTime<Utc>>,
}

/// Directory-backed artifact store keyed by rollback token
pub struct ArtifactStore {
    dir: PathBuf,
}

impl ArtifactStore {
    pub fn open(dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        std::fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    fn path_for(&self, token: &str) -> PathBuf {
        self.dir.join(format!("{}.json", token))
    }

    /// Persist a freshly captured artifact
    pub fn save(&self, token: &str, artifact: &RollbackArtifact) -> Result<()> {
        let record = StoredArtifact {
            rollback_token: token.to_string(),
            artifact: artifact.clone(),
            artifact_sha256: hash_canonical(artifact)?,
            captured_at: Utc::now(),
            replayed_at: None,
        };
        let text = serde_json::to_string_pretty(&record)
            .map_err(|e| AgentError::Serialization(e.to_string()))?;
        std::fs::write(self.path_for(token), text)?;
        Ok(())
    }

    /// Load an artifact record, verifying its content digest
    pub fn load(&self, token: &str) -> Result<StoredArtifact> {
        let path = self.path_for(token);
        if !path.exists() {
            return Err(AgentError::ArtifactNotFound {
                token: token.to_string(),
            });
        }
        let text = std::fs::read_to_string(&path)?;
        let record: StoredArtifact = serde_json::from_str(&text)
            .map_err(|e| AgentError::Serialization(e.to_string()))?;

        let computed = hash_canonical(&record.artifact)?;
        if computed != record.artifact_sha256 {
            return Err(AgentError::Execution(format!(
                "artifact {} failed its content digest check",
                token
            )));
        }
        Ok(record)
    }

    fn mark_replayed(&self, mut record: StoredArtifact) -> Result<()> {
        record.replayed_at = Some(Utc::now());
        let text = serde_json::to_string_pretty(&record)
            .map_err(|e| AgentError::Serialization(e.to_string()))?;
        std::fs::write(self.path_for(&record.rollback_token), text)?;
        Ok(())
    }
}

/// Outcome of one rollback invocation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RollbackOutcome {
    /// The reverse operation was applied
    Reverted,
    /// Already replayed earlier; nothing was done
    AlreadyReplayed,
}

/// Applies reverse operations from stored artifacts
pub struct RollbackEngine {
    store: ArtifactStore,
    executor: Arc<dyn ActionExecutor>,
}

impl RollbackEngine {
    pub fn new(store: ArtifactStore, executor: Arc<dyn ActionExecutor>) -> Self {
        Self { store, executor }
    }

    pub fn store(&self) -> &ArtifactStore {
        &self.store
    }

    /// Replay a rollback token. Idempotent: a token already replayed
    /// returns [`RollbackOutcome::AlreadyReplayed`] with no host effect.
    pub fn execute_rollback(&self, token: &str) -> Result<RollbackOutcome> {
        let record = self.store.load(token)?;

        if record.replayed_at.is_some() {
            tracing::info!(token, "rollback already replayed; no-op");
            return Ok(RollbackOutcome::AlreadyReplayed);
        }

        self.executor.revert(&record.artifact)?;
        self.store.mark_replayed(record)?;
        tracing::info!(token, "rollback applied");
        Ok(RollbackOutcome::Reverted)
    }
}
