//! End-to-end enforcement flow over the in-memory stores:
//! telemetry -> ingest -> correlation -> policy -> TRE -> agent gate.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::json;
use tokio::sync::Mutex;

use ransomeye_agent::{
    AgentAuditLog, ArtifactStore, CachedPolicyStore, CommandGate, CommandRunner,
    GateRejection, LinuxHostExecutor, StaticProbe,
};
use ransomeye_correlation::{CorrelationEngine, MemoryCorrelationStore};
use ransomeye_crypto::{
    verify_command, KeyPair, KeypairPayloadSigner, KeyRegistry, KeyType, PublicKey,
    VerificationKeys,
};
use ransomeye_ingest::{IngestPipeline, MemoryEventStore};
use ransomeye_ledger::MemorySink;
use ransomeye_policy::{DecisionStore, MemoryDecisionStore, PolicyEngine};
use ransomeye_rbac::{MemoryRoleStore, PermissionChecker};
use ransomeye_telemetry::{BuilderIdentity, EnvelopeBuilder, EnvelopeVerifier};
use ransomeye_tre::{
    ActionRequest, ActionStore, AgentTransport, AttestationManager, EmptyResolver,
    EnforcementPipeline, IncidentGuard, MemoryActionStore, MemoryApprovalStore,
    MemoryAttestationStore, MemoryIncidentDirectory, MemoryModeStore, RateLimiter,
};
use ransomeye_types::{
    ActionType, BlastScope, BootId, CommandTarget, ComponentInstanceId, ExecutionStatus,
    IncidentStage, IncidentStatus, MachineId, PolicyId, Role, SignedCommand, TreMode,
    UserId,
};

/// Transport that forwards dispatched commands straight into a real agent
/// gate and executor, the way the wire would
struct GateTransport {
    gate: CommandGate,
    runner: CommandRunner,
    rejections: Mutex<Vec<GateRejection>>,
    delivered: Mutex<Vec<SignedCommand>>,
}

#[async_trait]
impl AgentTransport for GateTransport {
    async fn deliver(&self, command: &SignedCommand) -> ransomeye_tre::Result<bool> {
        let wire = serde_json::to_value(command)
            .map_err(|e| ransomeye_tre::TreError::Dispatch(e.to_string()))?;
        let outcome = self
            .gate
            .receive_command(wire)
            .await
            .map_err(|e| ransomeye_tre::TreError::Dispatch(e.to_string()))?;
        match outcome {
            Ok(accepted) => {
                self.runner
                    .run(&accepted)
                    .map_err(|e| ransomeye_tre::TreError::Dispatch(e.to_string()))?;
                self.delivered.lock().await.push(accepted);
                Ok(true)
            }
            Err(rejection) => {
                self.rejections.lock().await.push(rejection);
                Ok(false)
            }
        }
    }
}

struct World {
    ingest: IngestPipeline,
    event_store: Arc<MemoryEventStore>,
    correlation_store: Arc<MemoryCorrelationStore>,
    correlation: CorrelationEngine,
    policy: PolicyEngine,
    decisions: Arc<MemoryDecisionStore>,
    pipeline: EnforcementPipeline,
    transport: Arc<GateTransport>,
    actions: Arc<MemoryActionStore>,
    sink: Arc<MemorySink>,
    directory: Arc<MemoryIncidentDirectory>,
    builder: EnvelopeBuilder,
    tre_keypair: KeyPair,
    analyst: UserId,
    admin: UserId,
    _dir: tempfile::TempDir,
}

async fn world(mode: TreMode) -> World {
    let dir = tempfile::tempdir().unwrap();
    let sink = MemorySink::new();

    // agent envelope key, registered and published for the verifier
    let agent_keypair = KeyPair::generate();
    let registry = KeyRegistry::open(dir.path().join("registry.json")).unwrap();
    let agent_public = PublicKey::from_keypair(&agent_keypair);
    registry
        .register_key(&agent_public, KeyType::Component, None, Some("linux_agent".into()))
        .unwrap();
    let keys = VerificationKeys::new(dir.path().join("keys"), registry);
    keys.publish(&agent_public).unwrap();

    let builder = EnvelopeBuilder::open(
        BuilderIdentity {
            machine_id: MachineId::new("host-1"),
            component: "linux_agent".to_string(),
            component_instance_id: ComponentInstanceId::new("a-1"),
            hostname: "host-1".to_string(),
            boot_id: BootId::new("boot-1"),
            agent_version: "1.0.0".to_string(),
        },
        agent_keypair,
        dir.path().join("chain-state.json"),
    )
    .unwrap();

    let event_store = Arc::new(MemoryEventStore::new());
    let ingest = IngestPipeline::new(EnvelopeVerifier::new(keys), event_store.clone());

    let correlation_store = Arc::new(MemoryCorrelationStore::new());
    let correlation = CorrelationEngine::new(correlation_store.clone());

    // TRE signing key, trusted by the agent gate
    let tre_keypair = KeyPair::generate();
    let decisions = Arc::new(MemoryDecisionStore::new());
    let policy = PolicyEngine::new(
        Arc::new(KeypairPayloadSigner::new(tre_keypair.clone())),
        decisions.clone(),
        PolicyId::new(),
        "1.0",
        UserId::new(),
    );

    let executor: Arc<dyn ransomeye_agent::ActionExecutor> = Arc::new(LinuxHostExecutor::new(
        dir.path().join("enforce"),
        dir.path().join("quarantine"),
        "host-1",
    ));
    let gate = CommandGate::new(
        *tre_keypair.verifying_key(),
        tre_keypair.key_id(),
        CachedPolicyStore::new(dir.path().join("cached-policy.json")),
        Arc::new(StaticProbe(true)),
        AgentAuditLog::open(dir.path().join("audit.jsonl")).unwrap(),
    );
    let transport = Arc::new(GateTransport {
        gate,
        runner: CommandRunner::new(
            executor,
            ArtifactStore::open(dir.path().join("artifacts")).unwrap(),
        ),
        rejections: Mutex::new(Vec::new()),
        delivered: Mutex::new(Vec::new()),
    });

    let roles = Arc::new(MemoryRoleStore::new());
    let analyst = UserId::new();
    let admin = UserId::new();
    roles.assign(analyst, Role::SecurityAnalyst).await;
    roles.assign(admin, Role::SuperAdmin).await;

    let directory = Arc::new(MemoryIncidentDirectory::new());
    let actions = Arc::new(MemoryActionStore::new());
    let pipeline = EnforcementPipeline::new(
        IncidentGuard::new(directory.clone(), sink.clone()),
        Arc::new(PermissionChecker::new(roles, sink.clone())),
        Arc::new(MemoryModeStore::with_mode(mode)),
        Arc::new(MemoryApprovalStore::new()),
        RateLimiter::new(sink.clone()),
        Arc::new(EmptyResolver),
        actions.clone(),
        AttestationManager::new(Arc::new(MemoryAttestationStore::new()), sink.clone()),
        transport.clone(),
        Arc::new(KeypairPayloadSigner::new(tre_keypair.clone())),
        sink.clone(),
    );

    World {
        ingest,
        event_store,
        correlation_store,
        correlation,
        policy,
        decisions,
        pipeline,
        transport,
        actions,
        sink,
        directory,
        builder,
        tre_keypair,
        analyst,
        admin,
        _dir: dir,
    }
}

fn observed(n: i64) -> chrono::DateTime<chrono::Utc> {
    "2026-01-10T12:00:00Z"
        .parse::<chrono::DateTime<chrono::Utc>>()
        .unwrap()
        + chrono::Duration::seconds(n)
}

#[tokio::test]
async fn happy_path_safe_action_executes_end_to_end() {
    let mut w = world(TreMode::FullEnforce).await;

    // three chained envelopes from instance a-1; only the suspicious
    // child contributes evidence
    let payloads = [
        json!({"kind": "process_start"}),
        json!({"kind": "suspicious_child", "process_id": 4242, "parent_pid": 7}),
        json!({"kind": "file_write"}),
    ];
    for (n, payload) in payloads.into_iter().enumerate() {
        let envelope = w.builder.build(payload, observed(n as i64 * 5)).unwrap();
        let outcome = w.ingest.ingest(envelope).await.unwrap();
        assert!(outcome.is_accepted(), "envelope {} rejected: {:?}", n, outcome);
    }

    // correlation over the stored VALID events
    let raw = w.event_store.raw_events().await;
    w.correlation_store
        .seed_events(raw.into_iter().map(|r| r.envelope).collect())
        .await;
    let report = w.correlation.correlate_pending().await.unwrap();
    assert_eq!(report.incidents_created, 1);

    let incident = &w.correlation_store.incidents().await[0];
    assert_eq!(incident.current_stage, IncidentStage::Suspicious);
    assert_eq!(incident.confidence_score, 25.0);

    // policy recommends BLOCK_PROCESS, signed but never dispatched
    let policy_report = w
        .policy
        .evaluate_pending(&[incident.clone()], TreMode::FullEnforce)
        .await
        .unwrap();
    assert_eq!(policy_report.recommendations_stored, 1);
    let decision = &w.decisions.pending_decisions().await.unwrap()[0];
    assert_eq!(decision.signed_command.action_type, ActionType::BlockProcess);
    assert!(w.transport.delivered.lock().await.is_empty());

    // TRE executes the recommendation through the real agent gate
    w.directory
        .register(incident.incident_id, IncidentStatus::Open)
        .await;
    let result = w
        .pipeline
        .execute(ActionRequest {
            action_id: None,
            action_type: decision.signed_command.action_type,
            incident_id: Some(incident.incident_id),
            target: CommandTarget::process("host-1", 4242),
            blast_scope: BlastScope::Host,
            emergency: false,
            user_id: w.analyst,
            user_role: Role::SecurityAnalyst,
            policy_id: decision.signed_command.policy_id,
            policy_version: decision.signed_command.policy_version.clone(),
        })
        .await
        .unwrap();

    assert!(result.executed, "pipeline result: {:?}", result);
    let action = w.actions.get(&result.action_id).await.unwrap().unwrap();
    assert_eq!(action.execution_status, ExecutionStatus::Succeeded);

    // the agent accepted exactly one command, signed by the TRE key
    let delivered = w.transport.delivered.lock().await;
    assert_eq!(delivered.len(), 1);
    assert!(verify_command(&delivered[0], w.tre_keypair.verifying_key()).unwrap());

    // one tre_action_executed ledger entry references the action
    let executed = w.sink.records_of("tre_action_executed");
    assert_eq!(executed.len(), 1);
    assert_eq!(
        executed[0].subject["id"],
        result.action_id.to_string()
    );
}

#[tokio::test]
async fn destructive_blocked_without_haf_approval() {
    let mut w = world(TreMode::FullEnforce).await;

    // escalate an incident to CONFIRMED: 25 + 50 = 75
    for (n, payload) in [
        json!({"kind": "suspicious_child", "process_id": 7, "parent_pid": 1}),
        json!({"kind": "shadow_copy_delete"}),
    ]
    .into_iter()
    .enumerate()
    {
        let envelope = w.builder.build(payload, observed(n as i64)).unwrap();
        assert!(w.ingest.ingest(envelope).await.unwrap().is_accepted());
    }
    let raw = w.event_store.raw_events().await;
    w.correlation_store
        .seed_events(raw.into_iter().map(|r| r.envelope).collect())
        .await;
    w.correlation.correlate_pending().await.unwrap();

    let incident = &w.correlation_store.incidents().await[0];
    assert_eq!(incident.current_stage, IncidentStage::Confirmed);

    let policy_report = w
        .policy
        .evaluate_pending(&[incident.clone()], TreMode::FullEnforce)
        .await
        .unwrap();
    assert_eq!(policy_report.recommendations_stored, 1);
    let decision = &w.decisions.pending_decisions().await.unwrap()[0];
    assert_eq!(decision.signed_command.action_type, ActionType::IsolateHost);

    w.directory
        .register(incident.incident_id, IncidentStatus::Open)
        .await;
    let result = w
        .pipeline
        .execute(ActionRequest {
            action_id: None,
            action_type: ActionType::IsolateHost,
            incident_id: Some(incident.incident_id),
            target: CommandTarget::host("host-1"),
            blast_scope: BlastScope::Host,
            emergency: false,
            user_id: w.admin,
            user_role: Role::SuperAdmin,
            policy_id: decision.signed_command.policy_id,
            policy_version: "1.0".to_string(),
        })
        .await
        .unwrap();

    // no command leaves TRE: a PENDING approval exists, tre_haf_deny logged
    assert!(!result.executed);
    assert!(result.approval_id.is_some());
    assert!(w.transport.delivered.lock().await.is_empty());
    assert_eq!(w.sink.records_of("tre_haf_deny").len(), 1);
}

#[tokio::test]
async fn replayed_command_is_rejected_at_the_gate() {
    let w = world(TreMode::FullEnforce).await;

    // a signed command delivered twice: second delivery must be refused
    let signer = KeypairPayloadSigner::new(w.tre_keypair.clone());
    let now = chrono::Utc::now();
    let command_id = ransomeye_types::CommandId::new();
    let mut command = SignedCommand {
        command_id,
        action_type: ActionType::BlockProcess,
        target: CommandTarget::process("host-1", 4242),
        incident_id: Some(ransomeye_types::IncidentId::new()),
        tre_mode: TreMode::FullEnforce,
        issued_by_user_id: w.analyst,
        issued_by_role: Role::SecurityAnalyst,
        approval_id: None,
        issued_at: now,
        expires_at: now + chrono::Duration::hours(1),
        rollback_token: ransomeye_crypto::sha256_hex(
            format!("{}:{}", command_id, ActionType::BlockProcess).as_bytes(),
        ),
        policy_id: PolicyId::new(),
        policy_version: "1.0".to_string(),
        issuing_authority: ransomeye_types::IssuingAuthority::ThreatResponseEngine,
        signature: None,
        signing_key_id: None,
        signing_algorithm: None,
        signed_at: None,
    };
    ransomeye_crypto::sign_command(&mut command, &signer).unwrap();

    assert!(w.transport.deliver(&command).await.unwrap());
    assert!(!w.transport.deliver(&command).await.unwrap());

    let rejections = w.transport.rejections.lock().await;
    assert_eq!(rejections.len(), 1);
    assert_eq!(rejections[0].reason, "replay");

    // both outcomes are on the agent's local audit trail
    let lines = w.transport.gate.audit().read_all().unwrap();
    assert_eq!(lines.len(), 2);
    assert_eq!(lines[0].outcome, "SUCCESS");
    assert_eq!(lines[1].outcome, "REJECTED");
    assert_eq!(lines[1].reason.as_deref(), Some("replay"));
}
