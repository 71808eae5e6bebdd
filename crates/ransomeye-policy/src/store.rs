//! Decision storage: the simulation-first boundary
//!
//! Signed commands produced by the policy engine land here and nowhere
//! else. TRE reads pending decisions; the policy engine never dispatches.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use ransomeye_types::{IncidentId, SignedCommand};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tokio::sync::RwLock;

use ransomeye_common::safe_write_file;

use crate::{PolicyError, PolicyRecommendation, Result};

/// A stored policy decision
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PolicyDecision {
    pub incident_id: IncidentId,
    pub rule_id: String,
    pub reason: String,
    pub signed_command: SignedCommand,
    pub decided_at: DateTime<Utc>,
}

impl PolicyDecision {
    pub fn new(
        incident_id: IncidentId,
        recommendation: &PolicyRecommendation,
        signed_command: SignedCommand,
        decided_at: DateTime<Utc>,
    ) -> Self {
        Self {
            incident_id,
            rule_id: recommendation.rule_id.clone(),
            reason: recommendation.reason.clone(),
            signed_command,
            decided_at,
        }
    }
}

/// Storage for policy decisions, keyed by incident (one evaluation per
/// incident, ever: the idempotency marker)
#[async_trait]
pub trait DecisionStore: Send + Sync {
    async fn is_evaluated(&self, incident_id: &IncidentId) -> Result<bool>;
    async fn store_decision(&self, decision: PolicyDecision) -> Result<()>;
    async fn pending_decisions(&self) -> Result<Vec<PolicyDecision>>;
}

/// File-backed decision store: one JSON file per incident under the
/// decision directory
pub struct FileDecisionStore {
    dir: PathBuf,
}

impl FileDecisionStore {
    pub fn open(dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        std::fs::create_dir_all(&dir).map_err(|e| PolicyError::Store(e.to_string()))?;
        Ok(Self { dir })
    }

    fn decision_path(&self, incident_id: &IncidentId) -> PathBuf {
        self.dir.join(format!("policy_decision_{}.json", incident_id))
    }
}

#[async_trait]
impl DecisionStore for FileDecisionStore {
    async fn is_evaluated(&self, incident_id: &IncidentId) -> Result<bool> {
        Ok(self.decision_path(incident_id).exists())
    }

    async fn store_decision(&self, decision: PolicyDecision) -> Result<()> {
        let path = self.decision_path(&decision.incident_id);
        let text = serde_json::to_string_pretty(&decision)
            .map_err(|e| PolicyError::Serialization(e.to_string()))?;
        safe_write_file(&path, text.as_bytes())
            .map_err(|e| PolicyError::Store(e.to_string()))?;
        Ok(())
    }

    async fn pending_decisions(&self) -> Result<Vec<PolicyDecision>> {
        let mut decisions = Vec::new();
        let entries =
            std::fs::read_dir(&self.dir).map_err(|e| PolicyError::Store(e.to_string()))?;
        for entry in entries {
            let entry = entry.map_err(|e| PolicyError::Store(e.to_string()))?;
            let name = entry.file_name();
            let name = name.to_string_lossy();
            if !name.starts_with("policy_decision_") || !name.ends_with(".json") {
                continue;
            }
            let text = std::fs::read_to_string(entry.path())
                .map_err(|e| PolicyError::Store(e.to_string()))?;
            let decision: PolicyDecision = serde_json::from_str(&text)
                .map_err(|e| PolicyError::Serialization(e.to_string()))?;
            decisions.push(decision);
        }
        decisions.sort_by_key(|d| d.incident_id.to_string());
        Ok(decisions)
    }
}

/// In-memory decision store for tests
#[derive(Default)]
pub struct MemoryDecisionStore {
    decisions: RwLock<HashMap<IncidentId, PolicyDecision>>,
}

impl MemoryDecisionStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl DecisionStore for MemoryDecisionStore {
    async fn is_evaluated(&self, incident_id: &IncidentId) -> Result<bool> {
        Ok(self.decisions.read().await.contains_key(incident_id))
    }

    async fn store_decision(&self, decision: PolicyDecision) -> Result<()> {
        self.decisions.write().await.insert(decision.incident_id, decision);
        Ok(())
    }

    async fn pending_decisions(&self) -> Result<Vec<PolicyDecision>> {
        let mut decisions: Vec<PolicyDecision> =
            self.decisions.read().await.values().cloned().collect();
        decisions.sort_by_key(|d| d.incident_id.to_string());
        Ok(decisions)
    }
}
