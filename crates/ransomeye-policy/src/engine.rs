//! The policy engine pass

use chrono::{Duration, Utc};
use ransomeye_types::{
    CommandId, CommandTarget, Incident, IssuingAuthority, PolicyId, Role, SignedCommand,
    TreMode, UserId,
};
use std::sync::Arc;

use ransomeye_crypto::{sha256_hex, sign_command, PayloadSigner};

use crate::{evaluate_incident, DecisionStore, PolicyDecision, Result};

/// Recommended commands expire an hour after issue
const COMMAND_TTL_HOURS: i64 = 1;

/// Counters for one policy pass
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct PolicyReport {
    pub incidents_examined: usize,
    pub recommendations_stored: usize,
    pub incidents_skipped: usize,
}

/// The policy engine. Read-only over incidents; writes only to the
/// decision store.
pub struct PolicyEngine {
    signer: Arc<dyn PayloadSigner>,
    store: Arc<dyn DecisionStore>,
    policy_id: PolicyId,
    policy_version: String,
    /// Service identity embedded in issued commands
    service_user_id: UserId,
}

impl PolicyEngine {
    pub fn new(
        signer: Arc<dyn PayloadSigner>,
        store: Arc<dyn DecisionStore>,
        policy_id: PolicyId,
        policy_version: impl Into<String>,
        service_user_id: UserId,
    ) -> Self {
        Self {
            signer,
            store,
            policy_id,
            policy_version: policy_version.into(),
            service_user_id,
        }
    }

    pub fn store(&self) -> &Arc<dyn DecisionStore> {
        &self.store
    }

    fn target_for(incident: &Incident) -> CommandTarget {
        // dedup keys look like `machine` or `machine:pid`
        if let Some(dedup_key) = &incident.dedup_key {
            if let Some((machine, pid)) = dedup_key.rsplit_once(':') {
                if let Ok(pid) = pid.parse::<u32>() {
                    return CommandTarget::process(machine, pid);
                }
            }
        }
        CommandTarget::host(incident.machine_id.as_str())
    }

    /// Evaluate one pass over unresolved incidents. Each incident is
    /// evaluated at most once, ever (the decision store is the marker).
    pub async fn evaluate_pending(
        &self,
        incidents: &[Incident],
        mode: TreMode,
    ) -> Result<PolicyReport> {
        let mut report = PolicyReport::default();

        for incident in incidents {
            report.incidents_examined += 1;

            if self.store.is_evaluated(&incident.incident_id).await? {
                report.incidents_skipped += 1;
                continue;
            }

            let Some(recommendation) = evaluate_incident(incident) else {
                report.incidents_skipped += 1;
                continue;
            };

            let command_id = CommandId::new();
            let issued_at = Utc::now();
            let mut command = SignedCommand {
                command_id,
                action_type: recommendation.action_type,
                target: Self::target_for(incident),
                incident_id: Some(incident.incident_id),
                tre_mode: mode,
                issued_by_user_id: self.service_user_id,
                issued_by_role: Role::PolicyManager,
                approval_id: None,
                issued_at,
                expires_at: issued_at + Duration::hours(COMMAND_TTL_HOURS),
                rollback_token: sha256_hex(
                    format!("{}:{}", command_id, recommendation.action_type).as_bytes(),
                ),
                policy_id: self.policy_id,
                policy_version: self.policy_version.clone(),
                issuing_authority: IssuingAuthority::PolicyEngine,
                signature: None,
                signing_key_id: None,
                signing_algorithm: None,
                signed_at: None,
            };
            sign_command(&mut command, self.signer.as_ref())?;

            tracing::info!(
                incident_id = %incident.incident_id,
                action = %recommendation.action_type,
                rule = %recommendation.rule_id,
                "policy recommendation stored (simulation only)"
            );

            self.store
                .store_decision(PolicyDecision::new(
                    incident.incident_id,
                    &recommendation,
                    command,
                    issued_at,
                ))
                .await?;
            report.recommendations_stored += 1;
        }

        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{FileDecisionStore, MemoryDecisionStore};
    use chrono::DateTime;
    use ransomeye_crypto::{verify_command, KeyPair, KeypairPayloadSigner};
    use ransomeye_types::{ActionType, IncidentId, IncidentStage, IncidentStatus, MachineId};

    fn incident(stage: IncidentStage, confidence: f64) -> Incident {
        let at: DateTime<Utc> = "2026-01-10T12:00:00Z".parse().unwrap();
        Incident {
            incident_id: IncidentId::new(),
            machine_id: MachineId::new("host-1"),
            current_stage: stage,
            confidence_score: confidence,
            first_observed_at: at,
            last_observed_at: at,
            total_evidence_count: 2,
            status: IncidentStatus::Open,
            resolved: false,
            dedup_key: Some("host-1:4242".to_string()),
        }
    }

    fn engine_with(store: Arc<dyn DecisionStore>) -> (PolicyEngine, KeyPair) {
        let keypair = KeyPair::generate();
        let engine = PolicyEngine::new(
            Arc::new(KeypairPayloadSigner::new(keypair.clone())),
            store,
            PolicyId::new(),
            "1.0",
            UserId::new(),
        );
        (engine, keypair)
    }

    #[tokio::test]
    async fn recommendation_is_signed_and_stored_not_dispatched() {
        let store = Arc::new(MemoryDecisionStore::new());
        let (engine, keypair) = engine_with(store.clone());

        let report = engine
            .evaluate_pending(&[incident(IncidentStage::Suspicious, 25.0)], TreMode::FullEnforce)
            .await
            .unwrap();
        assert_eq!(report.recommendations_stored, 1);

        let decisions = store.pending_decisions().await.unwrap();
        assert_eq!(decisions.len(), 1);
        let command = &decisions[0].signed_command;
        assert_eq!(command.action_type, ActionType::BlockProcess);
        assert_eq!(command.issuing_authority, IssuingAuthority::PolicyEngine);
        assert_eq!(command.target.process_id, Some(4242));
        assert!(verify_command(command, keypair.verifying_key()).unwrap());
    }

    #[tokio::test]
    async fn incidents_are_evaluated_once() {
        let store = Arc::new(MemoryDecisionStore::new());
        let (engine, _) = engine_with(store.clone());
        let i = incident(IncidentStage::Confirmed, 80.0);

        let first = engine
            .evaluate_pending(std::slice::from_ref(&i), TreMode::DryRun)
            .await
            .unwrap();
        assert_eq!(first.recommendations_stored, 1);

        let second = engine
            .evaluate_pending(std::slice::from_ref(&i), TreMode::DryRun)
            .await
            .unwrap();
        assert_eq!(second.recommendations_stored, 0);
        assert_eq!(second.incidents_skipped, 1);
        assert_eq!(store.pending_decisions().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn file_store_round_trips_decisions() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(FileDecisionStore::open(dir.path()).unwrap());
        let (engine, keypair) = engine_with(store.clone());

        engine
            .evaluate_pending(&[incident(IncidentStage::Confirmed, 90.0)], TreMode::FullEnforce)
            .await
            .unwrap();

        let reopened = FileDecisionStore::open(dir.path()).unwrap();
        let decisions = reopened.pending_decisions().await.unwrap();
        assert_eq!(decisions.len(), 1);
        assert_eq!(decisions[0].signed_command.action_type, ActionType::IsolateHost);
        // signature survives the file round-trip byte-for-byte
        assert!(verify_command(&decisions[0].signed_command, keypair.verifying_key()).unwrap());
    }

    #[tokio::test]
    async fn rollback_token_binds_command_and_action() {
        let store = Arc::new(MemoryDecisionStore::new());
        let (engine, _) = engine_with(store.clone());

        engine
            .evaluate_pending(&[incident(IncidentStage::Probable, 60.0)], TreMode::GuardedExec)
            .await
            .unwrap();

        let decision = &store.pending_decisions().await.unwrap()[0];
        let command = &decision.signed_command;
        let expected = sha256_hex(
            format!("{}:{}", command.command_id, command.action_type).as_bytes(),
        );
        assert_eq!(command.rollback_token, expected);
    }
}
