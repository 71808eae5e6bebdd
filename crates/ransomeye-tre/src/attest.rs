//! Post-incident attestation
//!
//! Every destructive execution creates a pending attestation with executor
//! and approver slots. Incident closure stays blocked until both humans
//! have attested.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use ransomeye_types::{
    ActionId, AttestationId, DecisionOutcome, IncidentAttestation, IncidentId, UserId,
};
use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

use ransomeye_ledger::DecisionSink;

use crate::{Result, TreError, COMPONENT};

/// Attestation storage
#[async_trait]
pub trait AttestationStore: Send + Sync {
    async fn insert(&self, attestation: IncidentAttestation) -> Result<()>;
    async fn get(&self, attestation_id: &AttestationId) -> Result<Option<IncidentAttestation>>;
    async fn update(&self, attestation: IncidentAttestation) -> Result<()>;
    async fn for_incident(&self, incident_id: &IncidentId) -> Result<Vec<IncidentAttestation>>;
}

/// In-memory attestation store
#[derive(Default)]
pub struct MemoryAttestationStore {
    rows: RwLock<HashMap<AttestationId, IncidentAttestation>>,
}

impl MemoryAttestationStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl AttestationStore for MemoryAttestationStore {
    async fn insert(&self, attestation: IncidentAttestation) -> Result<()> {
        self.rows
            .write()
            .await
            .insert(attestation.attestation_id, attestation);
        Ok(())
    }

    async fn get(
        &self,
        attestation_id: &AttestationId,
    ) -> Result<Option<IncidentAttestation>> {
        Ok(self.rows.read().await.get(attestation_id).cloned())
    }

    async fn update(&self, attestation: IncidentAttestation) -> Result<()> {
        let mut rows = self.rows.write().await;
        if !rows.contains_key(&attestation.attestation_id) {
            return Err(TreError::Store(format!(
                "attestation {} not found",
                attestation.attestation_id
            )));
        }
        rows.insert(attestation.attestation_id, attestation);
        Ok(())
    }

    async fn for_incident(
        &self,
        incident_id: &IncidentId,
    ) -> Result<Vec<IncidentAttestation>> {
        let mut rows: Vec<IncidentAttestation> = self
            .rows
            .read()
            .await
            .values()
            .filter(|a| &a.incident_id == incident_id)
            .cloned()
            .collect();
        rows.sort_by_key(|a| a.attestation_id.to_string());
        Ok(rows)
    }
}

/// The attestation workflow
pub struct AttestationManager {
    store: Arc<dyn AttestationStore>,
    sink: Arc<dyn DecisionSink>,
}

impl AttestationManager {
    pub fn new(store: Arc<dyn AttestationStore>, sink: Arc<dyn DecisionSink>) -> Self {
        Self { store, sink }
    }

    pub fn store(&self) -> &Arc<dyn AttestationStore> {
        &self.store
    }

    /// Create the pending attestation for a destructive execution
    pub async fn create_pending(
        &self,
        incident_id: IncidentId,
        action_id: ActionId,
        executor_user_id: UserId,
        approver_user_id: UserId,
    ) -> Result<IncidentAttestation> {
        let attestation = IncidentAttestation {
            attestation_id: AttestationId::new(),
            incident_id,
            action_id,
            executor_user_id,
            approver_user_id,
            executor_attested_at: None,
            approver_attested_at: None,
        };
        self.store.insert(attestation.clone()).await?;
        Ok(attestation)
    }

    /// Submit one attestation slot. Only the named executor or approver
    /// may attest, each exactly once.
    pub async fn attest(
        &self,
        attestation_id: &AttestationId,
        user_id: &UserId,
        now: DateTime<Utc>,
    ) -> Result<DecisionOutcome> {
        let Some(mut attestation) = self.store.get(attestation_id).await? else {
            return Ok(DecisionOutcome::deny(
                "attest.unknown",
                format!("attestation {} does not exist", attestation_id),
            ));
        };

        let slot = if user_id == &attestation.executor_user_id {
            &mut attestation.executor_attested_at
        } else if user_id == &attestation.approver_user_id {
            &mut attestation.approver_attested_at
        } else {
            return Ok(DecisionOutcome::deny(
                "attest.not_a_party",
                "only the executor or approver may attest",
            ));
        };

        if slot.is_some() {
            return Ok(DecisionOutcome::deny(
                "attest.already_attested",
                "this slot is already attested",
            ));
        }
        *slot = Some(now);

        let complete = attestation.is_complete();
        self.store.update(attestation.clone()).await?;

        self.sink.emit(
            COMPONENT,
            "post_incident_attested",
            json!({"type": "attestation", "id": attestation_id.to_string()}),
            json!({"type": "user", "identifier": user_id.to_string()}),
            json!({
                "incident_id": attestation.incident_id.to_string(),
                "action_id": attestation.action_id.to_string(),
                "complete": complete,
            }),
        )?;

        Ok(DecisionOutcome::Allow)
    }

    /// Whether incident closure is blocked by incomplete attestations
    pub async fn closure_blocked(&self, incident_id: &IncidentId) -> Result<bool> {
        let attestations = self.store.for_incident(incident_id).await?;
        Ok(attestations.iter().any(|a| !a.is_complete()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ransomeye_ledger::MemorySink;

    fn now() -> DateTime<Utc> {
        "2026-01-10T12:00:00Z".parse().unwrap()
    }

    async fn manager() -> (AttestationManager, Arc<MemorySink>) {
        let sink = MemorySink::new();
        (
            AttestationManager::new(Arc::new(MemoryAttestationStore::new()), sink.clone()),
            sink,
        )
    }

    #[tokio::test]
    async fn closure_blocked_until_both_attest() {
        let (manager, sink) = manager().await;
        let incident_id = IncidentId::new();
        let executor = UserId::new();
        let approver = UserId::new();

        let attestation = manager
            .create_pending(incident_id, ActionId::new(), executor, approver)
            .await
            .unwrap();
        assert!(manager.closure_blocked(&incident_id).await.unwrap());

        manager
            .attest(&attestation.attestation_id, &executor, now())
            .await
            .unwrap();
        assert!(manager.closure_blocked(&incident_id).await.unwrap());

        manager
            .attest(&attestation.attestation_id, &approver, now())
            .await
            .unwrap();
        assert!(!manager.closure_blocked(&incident_id).await.unwrap());
        assert_eq!(sink.records_of("post_incident_attested").len(), 2);
    }

    #[tokio::test]
    async fn third_parties_cannot_attest() {
        let (manager, _) = manager().await;
        let attestation = manager
            .create_pending(IncidentId::new(), ActionId::new(), UserId::new(), UserId::new())
            .await
            .unwrap();

        let outsider = UserId::new();
        let decision = manager
            .attest(&attestation.attestation_id, &outsider, now())
            .await
            .unwrap();
        assert_eq!(decision.rule_id(), Some("attest.not_a_party"));
    }

    #[tokio::test]
    async fn double_attestation_is_denied() {
        let (manager, _) = manager().await;
        let executor = UserId::new();
        let attestation = manager
            .create_pending(IncidentId::new(), ActionId::new(), executor, UserId::new())
            .await
            .unwrap();

        manager
            .attest(&attestation.attestation_id, &executor, now())
            .await
            .unwrap();
        let second = manager
            .attest(&attestation.attestation_id, &executor, now())
            .await
            .unwrap();
        assert_eq!(second.rule_id(), Some("attest.already_attested"));
    }
}
