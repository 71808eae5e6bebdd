//! The enforcement pipeline

use chrono::{Duration, Utc};
use ransomeye_types::{
    ActionId, ApprovalId, ApprovalStatus, BlastScope, CommandId, CommandTarget,
    DecisionOutcome, ExecutionStatus, IncidentId, IssuingAuthority, PolicyId,
    ResponseAction, Role, SignedCommand, TreMode, UserId,
};
use serde_json::json;
use std::sync::Arc;

use ransomeye_crypto::{sha256_hex, sign_command, PayloadSigner};
use ransomeye_ledger::DecisionSink;
use ransomeye_rbac::PermissionChecker;

use crate::{
    effective_status, mode_behavior, pending_approval, validate_blast_radius,
    ActionStore, AgentTransport, ApprovalStore, AttestationManager, BlastRadiusResolver,
    IncidentGuard, ModeStore, RateLimiter, Result, COMPONENT,
};

/// Commands expire an hour after issue
const COMMAND_TTL_HOURS: i64 = 1;

/// A request to take a response action
#[derive(Debug, Clone)]
pub struct ActionRequest {
    /// Present when retrying an action that is waiting on approval; a
    /// fresh id is minted otherwise
    pub action_id: Option<ActionId>,
    pub action_type: ransomeye_types::ActionType,
    pub incident_id: Option<IncidentId>,
    pub target: CommandTarget,
    pub blast_scope: BlastScope,
    pub emergency: bool,
    pub user_id: UserId,
    pub user_role: Role,
    pub policy_id: PolicyId,
    pub policy_version: String,
}

/// Outcome of one pipeline run
#[derive(Debug, Clone)]
pub struct PipelineResult {
    pub action_id: ActionId,
    pub decision: DecisionOutcome,
    pub executed: bool,
    pub simulated: bool,
    pub approval_id: Option<ApprovalId>,
    pub execution_status: Option<ExecutionStatus>,
    pub command_id: Option<CommandId>,
}

impl PipelineResult {
    fn denied(action_id: ActionId, decision: DecisionOutcome) -> Self {
        Self {
            action_id,
            decision,
            executed: false,
            simulated: false,
            approval_id: None,
            execution_status: None,
            command_id: None,
        }
    }
}

/// The TRE enforcement pipeline. Construction wires every dependency
/// explicitly; there are no globals to reach for.
pub struct EnforcementPipeline {
    guard: IncidentGuard,
    rbac: Arc<PermissionChecker>,
    mode_store: Arc<dyn ModeStore>,
    approvals: Arc<dyn ApprovalStore>,
    rate_limiter: RateLimiter,
    blast_resolver: Arc<dyn BlastRadiusResolver>,
    actions: Arc<dyn ActionStore>,
    attestations: AttestationManager,
    transport: Arc<dyn AgentTransport>,
    signer: Arc<dyn PayloadSigner>,
    sink: Arc<dyn DecisionSink>,
}

impl EnforcementPipeline {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        guard: IncidentGuard,
        rbac: Arc<PermissionChecker>,
        mode_store: Arc<dyn ModeStore>,
        approvals: Arc<dyn ApprovalStore>,
        rate_limiter: RateLimiter,
        blast_resolver: Arc<dyn BlastRadiusResolver>,
        actions: Arc<dyn ActionStore>,
        attestations: AttestationManager,
        transport: Arc<dyn AgentTransport>,
        signer: Arc<dyn PayloadSigner>,
        sink: Arc<dyn DecisionSink>,
    ) -> Self {
        Self {
            guard,
            rbac,
            mode_store,
            approvals,
            rate_limiter,
            blast_resolver,
            actions,
            attestations,
            transport,
            signer,
            sink,
        }
    }

    pub fn approvals(&self) -> &Arc<dyn ApprovalStore> {
        &self.approvals
    }

    pub fn actions(&self) -> &Arc<dyn ActionStore> {
        &self.actions
    }

    pub fn attestations(&self) -> &AttestationManager {
        &self.attestations
    }

    fn emit_blocked(
        &self,
        event: &str,
        action_id: &ActionId,
        request: &ActionRequest,
        decision: &DecisionOutcome,
    ) -> Result<()> {
        let (rule_id, reason) = match decision {
            DecisionOutcome::Deny { rule_id, reason } => (rule_id.clone(), reason.clone()),
            DecisionOutcome::Allow => return Ok(()),
        };
        self.sink.emit(
            COMPONENT,
            event,
            json!({"type": "tre_action", "id": action_id.to_string()}),
            json!({"type": "user", "identifier": request.user_id.to_string()}),
            json!({
                "action_type": request.action_type.as_str(),
                "incident_id": request.incident_id.map(|i| i.to_string()),
                "rule_id": rule_id,
                "reason": reason,
            }),
        )?;
        Ok(())
    }

    /// Run the full pipeline for one action request. Default DENY: the
    /// request executes only if every step explicitly allows it, and every
    /// denial names the failing rule in the ledger.
    pub async fn execute(&self, request: ActionRequest) -> Result<PipelineResult> {
        let action_id = request.action_id.unwrap_or_default();
        let classification = request.action_type.classification();
        let host = request
            .target
            .machine_id
            .clone()
            .unwrap_or_else(|| "unknown".to_string());

        // 1. incident execution guard
        let decision = self
            .guard
            .guard_execution(
                request.incident_id.as_ref(),
                request.emergency,
                request.user_role,
                false,
            )
            .await?;
        if decision.is_deny() {
            self.emit_blocked("tre_action_blocked", &action_id, &request, &decision)?;
            return Ok(PipelineResult::denied(action_id, decision));
        }

        // 2. RBAC (mandatory before anything touches mode or approvals)
        let decision = if request.action_type.is_destructive() {
            self.rbac
                .check_execute_destructive(
                    &request.user_id,
                    request.action_type,
                    request.incident_id.as_ref(),
                )
                .await?
        } else {
            self.rbac
                .check_execute_safe(&request.user_id, request.incident_id.as_ref())
                .await?
        };
        if decision.is_deny() {
            self.emit_blocked("rbac_user_action_denied", &action_id, &request, &decision)?;
            return Ok(PipelineResult::denied(action_id, decision));
        }

        // 3 + 4. mode gate over the frozen classification
        let mode = self.mode_store.active_mode().await?;
        let behavior = mode_behavior(mode, classification);
        if behavior.blocked {
            let decision = DecisionOutcome::deny(
                "mode.blocked",
                format!(
                    "action {} blocked by mode {}",
                    request.action_type, mode
                ),
            );
            self.emit_blocked("tre_action_blocked", &action_id, &request, &decision)?;
            return Ok(PipelineResult::denied(action_id, decision));
        }

        // 5. rate limits, before any approval is consumed
        let decision = self
            .rate_limiter
            .acquire(
                &request.user_id,
                request.incident_id.as_ref(),
                &host,
                request.emergency,
                Utc::now(),
            )
            .await?;
        if decision.is_deny() {
            return Ok(PipelineResult::denied(action_id, decision));
        }

        // 6. blast radius
        let blast = validate_blast_radius(
            self.blast_resolver.as_ref(),
            request.blast_scope,
            &request.target,
        )
        .await?;
        if blast.decision.is_deny() {
            self.emit_blocked("tre_action_blocked", &action_id, &request, &blast.decision)?;
            return Ok(PipelineResult::denied(action_id, blast.decision));
        }

        // dry run: record the simulation and stop; nothing leaves TRE
        if behavior.simulate {
            let command = self.build_command(&request, mode, None);
            self.actions
                .insert(ResponseAction {
                    action_id,
                    command: command.clone(),
                    execution_status: ExecutionStatus::Simulated,
                    rollback_capable: false,
                    executed_at: None,
                    ledger_entry_id: None,
                })
                .await?;
            self.sink.emit(
                COMPONENT,
                "tre_action_simulated",
                json!({"type": "tre_action", "id": action_id.to_string()}),
                json!({"type": "user", "identifier": request.user_id.to_string()}),
                json!({
                    "action_type": request.action_type.as_str(),
                    "incident_id": request.incident_id.map(|i| i.to_string()),
                    "mode": mode.as_str(),
                }),
            )?;
            return Ok(PipelineResult {
                action_id,
                decision: DecisionOutcome::Allow,
                executed: false,
                simulated: true,
                approval_id: None,
                execution_status: Some(ExecutionStatus::Simulated),
                command_id: Some(command.command_id),
            });
        }

        // 7. HAF approval (destructive in FULL_ENFORCE, or wide blast scope)
        let mut approval_id = None;
        let mut approver_user_id = None;
        if behavior.haf_required || blast.requires_haf {
            let now = Utc::now();
            match self.approvals.latest_for_action(&action_id).await? {
                None => {
                    let pending = pending_approval(
                        action_id,
                        request.user_id,
                        request.user_role,
                        now,
                    );
                    let pending_id = pending.approval_id;
                    self.approvals.insert(pending).await?;
                    self.sink.emit(
                        COMPONENT,
                        "tre_action_requested",
                        json!({"type": "tre_action", "id": action_id.to_string()}),
                        json!({"type": "user", "identifier": request.user_id.to_string()}),
                        json!({
                            "action_type": request.action_type.as_str(),
                            "approval_id": pending_id.to_string(),
                            "incident_id": request.incident_id.map(|i| i.to_string()),
                        }),
                    )?;
                    let decision = DecisionOutcome::deny(
                        "haf.approval_pending_created",
                        format!("approval required; request {} created", pending_id),
                    );
                    self.emit_blocked("tre_haf_deny", &action_id, &request, &decision)?;
                    return Ok(PipelineResult {
                        approval_id: Some(pending_id),
                        ..PipelineResult::denied(action_id, decision)
                    });
                }
                Some(approval) => match effective_status(&approval, now) {
                    ApprovalStatus::Approved if approval.is_valid_at(now) => {
                        approval_id = Some(approval.approval_id);
                        approver_user_id = approval.approver_user_id;
                    }
                    ApprovalStatus::Pending => {
                        let decision = DecisionOutcome::deny(
                            "haf.approval_pending",
                            format!("approval {} is still pending", approval.approval_id),
                        );
                        self.emit_blocked("tre_haf_deny", &action_id, &request, &decision)?;
                        return Ok(PipelineResult {
                            approval_id: Some(approval.approval_id),
                            ..PipelineResult::denied(action_id, decision)
                        });
                    }
                    ApprovalStatus::Rejected => {
                        let decision = DecisionOutcome::deny(
                            "haf.approval_rejected",
                            format!("approval {} was rejected", approval.approval_id),
                        );
                        self.emit_blocked("tre_haf_deny", &action_id, &request, &decision)?;
                        return Ok(PipelineResult::denied(action_id, decision));
                    }
                    _ => {
                        let decision = DecisionOutcome::deny(
                            "haf.approval_expired",
                            format!("approval {} has expired", approval.approval_id),
                        );
                        self.emit_blocked("tre_haf_deny", &action_id, &request, &decision)?;
                        return Ok(PipelineResult::denied(action_id, decision));
                    }
                },
            }
        }

        // 8. sign and dispatch
        let mut command = self.build_command(&request, mode, approval_id);
        sign_command(&mut command, self.signer.as_ref())?;

        self.actions
            .insert(ResponseAction {
                action_id,
                command: command.clone(),
                execution_status: ExecutionStatus::Pending,
                rollback_capable: rollback_capable(request.action_type),
                executed_at: None,
                ledger_entry_id: None,
            })
            .await?;

        let delivered = self.transport.deliver(&command).await;
        let now = Utc::now();
        let (status, event) = match delivered {
            Ok(true) => (ExecutionStatus::Succeeded, "tre_action_executed"),
            Ok(false) => (ExecutionStatus::Failed, "tre_action_failed"),
            Err(ref e) => {
                tracing::warn!(action_id = %action_id, error = %e, "dispatch failed");
                (ExecutionStatus::Failed, "tre_action_failed")
            }
        };
        self.actions.transition(&action_id, status, now).await?;

        self.sink.emit(
            COMPONENT,
            event,
            json!({"type": "tre_action", "id": action_id.to_string()}),
            json!({"type": "user", "identifier": request.user_id.to_string()}),
            json!({
                "action_type": request.action_type.as_str(),
                "command_id": command.command_id.to_string(),
                "incident_id": request.incident_id.map(|i| i.to_string()),
                "approval_id": approval_id.map(|a| a.to_string()),
                "execution_status": status,
            }),
        )?;

        // 9. attestation for destructive executions
        if request.action_type.is_destructive() && status == ExecutionStatus::Succeeded {
            if let Some(incident_id) = request.incident_id {
                self.attestations
                    .create_pending(
                        incident_id,
                        action_id,
                        request.user_id,
                        approver_user_id.unwrap_or(request.user_id),
                    )
                    .await?;
            }
        }

        Ok(PipelineResult {
            action_id,
            decision: DecisionOutcome::Allow,
            executed: status == ExecutionStatus::Succeeded,
            simulated: false,
            approval_id,
            execution_status: Some(status),
            command_id: Some(command.command_id),
        })
    }

    fn build_command(
        &self,
        request: &ActionRequest,
        mode: TreMode,
        approval_id: Option<ApprovalId>,
    ) -> SignedCommand {
        let command_id = CommandId::new();
        let issued_at = Utc::now();
        SignedCommand {
            command_id,
            action_type: request.action_type,
            target: request.target.clone(),
            incident_id: request.incident_id,
            tre_mode: mode,
            issued_by_user_id: request.user_id,
            issued_by_role: request.user_role,
            approval_id,
            issued_at,
            expires_at: issued_at + Duration::hours(COMMAND_TTL_HOURS),
            rollback_token: sha256_hex(
                format!("{}:{}", command_id, request.action_type).as_bytes(),
            ),
            policy_id: request.policy_id,
            policy_version: request.policy_version.clone(),
            issuing_authority: IssuingAuthority::ThreatResponseEngine,
            signature: None,
            signing_key_id: None,
            signing_algorithm: None,
            signed_at: None,
        }
    }

    /// Roll back an executed action. Allowed on frozen incidents; requires
    /// `tre:execute` + `tre:rollback`. Idempotent: rolling back an action
    /// already ROLLED_BACK is a no-op success.
    pub async fn rollback(
        &self,
        action_id: &ActionId,
        user_id: &UserId,
        _user_role: Role,
    ) -> Result<PipelineResult> {
        let decision = self.rbac.check_rollback(user_id, None).await?;
        if decision.is_deny() {
            return Ok(PipelineResult::denied(*action_id, decision));
        }

        let Some(action) = self.actions.get(action_id).await? else {
            return Ok(PipelineResult::denied(
                *action_id,
                DecisionOutcome::deny("rollback.unknown_action", "no such response action"),
            ));
        };

        if action.execution_status == ExecutionStatus::RolledBack {
            // idempotent replay: one ROLLED_BACK state, no further effect
            return Ok(PipelineResult {
                action_id: *action_id,
                decision: DecisionOutcome::Allow,
                executed: false,
                simulated: false,
                approval_id: None,
                execution_status: Some(ExecutionStatus::RolledBack),
                command_id: Some(action.command.command_id),
            });
        }

        if !action.rollback_capable {
            return Ok(PipelineResult::denied(
                *action_id,
                DecisionOutcome::deny(
                    "rollback.not_capable",
                    format!("{} has no rollback artifact shape", action.command.action_type),
                ),
            ));
        }
        if !matches!(
            action.execution_status,
            ExecutionStatus::Succeeded | ExecutionStatus::Failed
        ) {
            return Ok(PipelineResult::denied(
                *action_id,
                DecisionOutcome::deny(
                    "rollback.wrong_state",
                    format!("cannot roll back from {:?}", action.execution_status),
                ),
            ));
        }

        // the rollback command reuses the original rollback token so the
        // agent can resolve its artifact
        let mut command = action.command.clone();
        command.command_id = CommandId::new();
        command.issued_at = Utc::now();
        command.expires_at = command.issued_at + Duration::hours(COMMAND_TTL_HOURS);
        sign_command(&mut command, self.signer.as_ref())?;

        let delivered = self.transport.deliver(&command).await?;
        if !delivered {
            return Ok(PipelineResult::denied(
                *action_id,
                DecisionOutcome::deny("rollback.agent_rejected", "agent refused the rollback"),
            ));
        }

        let updated = self
            .actions
            .transition(action_id, ExecutionStatus::RolledBack, Utc::now())
            .await?;

        self.sink.emit(
            COMPONENT,
            "tre_rollback_executed",
            json!({"type": "tre_action", "id": action_id.to_string()}),
            json!({"type": "user", "identifier": user_id.to_string()}),
            json!({
                "action_type": updated.command.action_type.as_str(),
                "rollback_token": updated.command.rollback_token,
            }),
        )?;

        Ok(PipelineResult {
            action_id: *action_id,
            decision: DecisionOutcome::Allow,
            executed: true,
            simulated: false,
            approval_id: None,
            execution_status: Some(ExecutionStatus::RolledBack),
            command_id: Some(command.command_id),
        })
    }
}

fn rollback_capable(action_type: ransomeye_types::ActionType) -> bool {
    use ransomeye_types::ActionType::*;
    matches!(
        action_type,
        BlockProcess | BlockNetworkConnection | QuarantineFile | IsolateHost
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        EmptyResolver, MemoryActionStore, MemoryApprovalStore, MemoryAttestationStore,
        MemoryIncidentDirectory, MemoryModeStore, MemoryTransport,
    };
    use ransomeye_crypto::{verify_command, KeyPair, KeypairPayloadSigner};
    use ransomeye_ledger::MemorySink;
    use ransomeye_rbac::MemoryRoleStore;
    use ransomeye_types::{ActionType, IncidentStatus};

    struct Harness {
        pipeline: EnforcementPipeline,
        sink: Arc<MemorySink>,
        transport: Arc<MemoryTransport>,
        actions: Arc<MemoryActionStore>,
        approvals: Arc<MemoryApprovalStore>,
        incident_id: IncidentId,
        analyst: UserId,
        admin: UserId,
        keypair: KeyPair,
    }

    async fn harness(mode: TreMode) -> Harness {
        let sink = MemorySink::new();

        let roles = Arc::new(MemoryRoleStore::new());
        let analyst = UserId::new();
        let admin = UserId::new();
        roles.assign(analyst, Role::SecurityAnalyst).await;
        roles.assign(admin, Role::SuperAdmin).await;
        let rbac = Arc::new(PermissionChecker::new(roles, sink.clone()));

        let directory = Arc::new(MemoryIncidentDirectory::new());
        let incident_id = IncidentId::new();
        directory.register(incident_id, IncidentStatus::Open).await;

        let keypair = KeyPair::generate();
        let transport = Arc::new(MemoryTransport::accepting());
        let actions = Arc::new(MemoryActionStore::new());
        let approvals = Arc::new(MemoryApprovalStore::new());

        let pipeline = EnforcementPipeline::new(
            IncidentGuard::new(directory, sink.clone()),
            rbac,
            Arc::new(MemoryModeStore::with_mode(mode)),
            approvals.clone(),
            RateLimiter::new(sink.clone()),
            Arc::new(EmptyResolver),
            actions.clone(),
            AttestationManager::new(Arc::new(MemoryAttestationStore::new()), sink.clone()),
            transport.clone(),
            Arc::new(KeypairPayloadSigner::new(keypair.clone())),
            sink.clone(),
        );

        Harness {
            pipeline,
            sink,
            transport,
            actions,
            approvals,
            incident_id,
            analyst,
            admin,
            keypair,
        }
    }

    fn request(h: &Harness, user: UserId, role: Role, action_type: ActionType) -> ActionRequest {
        ActionRequest {
            action_id: None,
            action_type,
            incident_id: Some(h.incident_id),
            target: CommandTarget::process("host-1", 4242),
            blast_scope: BlastScope::Host,
            emergency: false,
            user_id: user,
            user_role: role,
            policy_id: PolicyId::new(),
            policy_version: "1.0".to_string(),
        }
    }

    #[tokio::test]
    async fn safe_action_executes_in_full_enforce() {
        let h = harness(TreMode::FullEnforce).await;
        let result = h
            .pipeline
            .execute(request(&h, h.analyst, Role::SecurityAnalyst, ActionType::BlockProcess))
            .await
            .unwrap();

        assert!(result.executed);
        assert_eq!(result.execution_status, Some(ExecutionStatus::Succeeded));

        // exactly one command left TRE, signed by the TRE key
        let delivered = h.transport.delivered().await;
        assert_eq!(delivered.len(), 1);
        assert!(verify_command(&delivered[0], h.keypair.verifying_key()).unwrap());
        assert_eq!(delivered[0].issuing_authority, IssuingAuthority::ThreatResponseEngine);

        assert_eq!(h.sink.records_of("tre_action_executed").len(), 1);
    }

    #[tokio::test]
    async fn destructive_without_approval_creates_pending_and_denies() {
        let h = harness(TreMode::FullEnforce).await;
        let result = h
            .pipeline
            .execute(request(&h, h.admin, Role::SuperAdmin, ActionType::IsolateHost))
            .await
            .unwrap();

        assert!(!result.executed);
        assert_eq!(result.decision.rule_id(), Some("haf.approval_pending_created"));
        let approval_id = result.approval_id.expect("pending approval created");

        // the PENDING row exists and nothing reached the agent
        let approval = h
            .approvals
            .latest_for_action(&result.action_id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(approval.approval_id, approval_id);
        assert_eq!(approval.approval_status, ApprovalStatus::Pending);
        assert!(h.transport.delivered().await.is_empty());
        assert_eq!(h.sink.records_of("tre_haf_deny").len(), 1);
    }

    #[tokio::test]
    async fn approved_destructive_executes_and_requires_attestation() {
        let h = harness(TreMode::FullEnforce).await;

        // first run creates the pending approval
        let first = h
            .pipeline
            .execute(request(&h, h.admin, Role::SuperAdmin, ActionType::IsolateHost))
            .await
            .unwrap();
        let approval_id = first.approval_id.unwrap();

        // a human approves
        let approver = UserId::new();
        crate::decide_approval(
            h.approvals.as_ref(),
            &approval_id,
            &first.action_id,
            approver,
            Role::SuperAdmin,
            true,
            Utc::now(),
        )
        .await
        .unwrap();

        // retry with the same action id executes
        let mut retry = request(&h, h.admin, Role::SuperAdmin, ActionType::IsolateHost);
        retry.action_id = Some(first.action_id);
        let result = h.pipeline.execute(retry).await.unwrap();

        assert!(result.executed);
        assert_eq!(result.approval_id, Some(approval_id));
        let delivered = h.transport.delivered().await;
        assert_eq!(delivered.len(), 1);
        assert_eq!(delivered[0].approval_id, Some(approval_id));

        // attestation now blocks incident closure
        assert!(h
            .pipeline
            .attestations()
            .closure_blocked(&h.incident_id)
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn dry_run_simulates_without_dispatch() {
        let h = harness(TreMode::DryRun).await;
        let result = h
            .pipeline
            .execute(request(&h, h.analyst, Role::SecurityAnalyst, ActionType::BlockProcess))
            .await
            .unwrap();

        assert!(result.simulated);
        assert!(!result.executed);
        assert_eq!(result.execution_status, Some(ExecutionStatus::Simulated));
        assert!(h.transport.delivered().await.is_empty());
        assert_eq!(h.sink.records_of("tre_action_simulated").len(), 1);
    }

    #[tokio::test]
    async fn guarded_exec_blocks_destructive() {
        let h = harness(TreMode::GuardedExec).await;
        let result = h
            .pipeline
            .execute(request(&h, h.admin, Role::SuperAdmin, ActionType::MassProcessKill))
            .await
            .unwrap();

        assert_eq!(result.decision.rule_id(), Some("mode.blocked"));
        assert!(h.transport.delivered().await.is_empty());
        assert_eq!(h.sink.records_of("tre_action_blocked").len(), 1);
    }

    #[tokio::test]
    async fn analyst_cannot_isolate_hosts() {
        let h = harness(TreMode::FullEnforce).await;
        let result = h
            .pipeline
            .execute(request(&h, h.analyst, Role::SecurityAnalyst, ActionType::IsolateHost))
            .await
            .unwrap();

        assert_eq!(result.decision.rule_id(), Some("rbac.role_lacks_permission"));
        assert_eq!(h.sink.records_of("rbac_user_action_denied").len(), 1);
        assert!(h.transport.delivered().await.is_empty());
    }

    #[tokio::test]
    async fn missing_incident_denies_non_emergency() {
        let h = harness(TreMode::FullEnforce).await;
        let mut req = request(&h, h.analyst, Role::SecurityAnalyst, ActionType::BlockProcess);
        req.incident_id = None;
        let result = h.pipeline.execute(req).await.unwrap();

        assert_eq!(result.decision.rule_id(), Some("guard.incident_required"));
        assert!(h.transport.delivered().await.is_empty());
    }

    #[tokio::test]
    async fn rollback_is_idempotent() {
        let h = harness(TreMode::FullEnforce).await;
        let executed = h
            .pipeline
            .execute(request(&h, h.analyst, Role::SecurityAnalyst, ActionType::BlockProcess))
            .await
            .unwrap();
        assert!(executed.executed);

        let first = h
            .pipeline
            .rollback(&executed.action_id, &h.analyst, Role::SecurityAnalyst)
            .await
            .unwrap();
        assert!(first.executed);
        assert_eq!(first.execution_status, Some(ExecutionStatus::RolledBack));
        assert_eq!(h.sink.records_of("tre_rollback_executed").len(), 1);

        // replay: no further effect, still one rollback in the ledger
        let second = h
            .pipeline
            .rollback(&executed.action_id, &h.analyst, Role::SecurityAnalyst)
            .await
            .unwrap();
        assert!(second.decision.is_allow());
        assert!(!second.executed);
        assert_eq!(h.sink.records_of("tre_rollback_executed").len(), 1);

        let action = h.actions.get(&executed.action_id).await.unwrap().unwrap();
        assert_eq!(action.execution_status, ExecutionStatus::RolledBack);
    }

    #[tokio::test]
    async fn failed_dispatch_marks_action_failed() {
        let mut h = harness(TreMode::FullEnforce).await;
        // swap in a rejecting transport
        let transport = Arc::new(MemoryTransport::rejecting());
        h.pipeline.transport = transport.clone();

        let result = h
            .pipeline
            .execute(request(&h, h.analyst, Role::SecurityAnalyst, ActionType::BlockProcess))
            .await
            .unwrap();

        assert!(!result.executed);
        assert_eq!(result.execution_status, Some(ExecutionStatus::Failed));
        assert_eq!(h.sink.records_of("tre_action_failed").len(), 1);
    }
}
