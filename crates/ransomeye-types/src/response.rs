//! Response actions, approvals, attestations, rollback artifacts, and the
//! agent's cached offline policy

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{
    ActionId, ActionType, ApprovalId, AttestationId, IncidentId, LedgerEntryId, Role,
    SignedCommand, UserId,
};

/// Execution lifecycle of a dispatched command.
/// Transitions: PENDING -> SUCCEEDED | FAILED -> ROLLED_BACK.
/// SIMULATED is terminal and only produced in DRY_RUN mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ExecutionStatus {
    Pending,
    Succeeded,
    Failed,
    RolledBack,
    Simulated,
}

impl ExecutionStatus {
    /// Legal explicit status transitions
    pub fn can_transition_to(&self, next: ExecutionStatus) -> bool {
        matches!(
            (self, next),
            (ExecutionStatus::Pending, ExecutionStatus::Succeeded)
                | (ExecutionStatus::Pending, ExecutionStatus::Failed)
                | (ExecutionStatus::Succeeded, ExecutionStatus::RolledBack)
                | (ExecutionStatus::Failed, ExecutionStatus::RolledBack)
        )
    }
}

/// Persisted record of a dispatched command
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResponseAction {
    pub action_id: ActionId,
    pub command: SignedCommand,
    pub execution_status: ExecutionStatus,
    pub rollback_capable: bool,
    pub executed_at: Option<DateTime<Utc>>,
    pub ledger_entry_id: Option<LedgerEntryId>,
}

/// Human-authority approval lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ApprovalStatus {
    Pending,
    Approved,
    Rejected,
    Expired,
}

/// A human-authority approval row for a destructive action
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HafApproval {
    pub approval_id: ApprovalId,
    pub action_id: ActionId,
    pub requested_by_user_id: UserId,
    pub requested_by_role: Role,
    pub approver_user_id: Option<UserId>,
    pub approver_role: Option<Role>,
    pub approval_status: ApprovalStatus,
    pub created_at: DateTime<Utc>,
    pub approved_at: Option<DateTime<Utc>>,
    pub expires_at: DateTime<Utc>,
    pub ledger_entry_id: Option<LedgerEntryId>,
}

impl HafApproval {
    /// An approval is usable only while APPROVED and unexpired
    pub fn is_valid_at(&self, at: DateTime<Utc>) -> bool {
        self.approval_status == ApprovalStatus::Approved && at <= self.expires_at
    }
}

/// Attestation slot state for a destructive execution
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IncidentAttestation {
    pub attestation_id: AttestationId,
    pub incident_id: IncidentId,
    pub action_id: ActionId,
    pub executor_user_id: UserId,
    pub approver_user_id: UserId,
    pub executor_attested_at: Option<DateTime<Utc>>,
    pub approver_attested_at: Option<DateTime<Utc>>,
}

impl IncidentAttestation {
    /// Incident closure is blocked until both slots are filled
    pub fn is_complete(&self) -> bool {
        self.executor_attested_at.is_some() && self.approver_attested_at.is_some()
    }
}

/// Typed pre-execution snapshot captured before a command runs.
/// Keyed by `rollback_token` = SHA-256 of the canonical artifact JSON.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "artifact_type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RollbackArtifact {
    ProcessBlock {
        machine_id: String,
        process_id: u32,
        cmdline: String,
        state: String,
        cgroup_path: String,
    },
    NetworkBlock {
        machine_id: String,
        rule_text: String,
        rule_id: String,
    },
    FileQuarantine {
        machine_id: String,
        original_path: String,
        quarantine_path: String,
        sha256: String,
    },
    HostIsolation {
        machine_id: String,
        namespace_id: String,
        namespace_state: String,
    },
}

impl RollbackArtifact {
    /// The action type this artifact can reverse
    pub fn action_type(&self) -> ActionType {
        match self {
            RollbackArtifact::ProcessBlock { .. } => ActionType::BlockProcess,
            RollbackArtifact::NetworkBlock { .. } => ActionType::BlockNetworkConnection,
            RollbackArtifact::FileQuarantine { .. } => ActionType::QuarantineFile,
            RollbackArtifact::HostIsolation { .. } => ActionType::IsolateHost,
        }
    }
}

/// A persisted rollback record
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RollbackRecord {
    pub rollback_token: String,
    pub action_id: ActionId,
    pub artifact: RollbackArtifact,
    pub captured_at: DateTime<Utc>,
    pub replayed_at: Option<DateTime<Utc>>,
}

/// The agent's last known allow/deny lists, enforced fail-closed when the
/// Core is unreachable. `integrity_hash` covers the canonical JSON with the
/// hash field cleared.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CachedPolicy {
    pub version: String,
    pub prohibited_actions: Vec<ActionType>,
    pub allowed_actions: Vec<ActionType>,
    pub last_updated: Option<DateTime<Utc>>,
    pub integrity_hash: Option<String>,
}

impl CachedPolicy {
    /// The fail-closed default: everything prohibited, nothing allowed
    pub fn default_deny() -> Self {
        Self {
            version: "1.0".to_string(),
            prohibited_actions: ActionType::ALL.to_vec(),
            allowed_actions: Vec::new(),
            last_updated: None,
            integrity_hash: None,
        }
    }
}

/// TRE mode row; exactly one is active at any time
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TreModeRecord {
    pub mode: crate::TreMode,
    pub is_active: bool,
    pub changed_by_user_id: UserId,
    pub changed_at: DateTime<Utc>,
    pub reason: Option<String>,
}

/// Free-form audit payload attached to ledger entries
pub type AuditPayload = Value;

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn execution_status_transitions() {
        assert!(ExecutionStatus::Pending.can_transition_to(ExecutionStatus::Succeeded));
        assert!(ExecutionStatus::Pending.can_transition_to(ExecutionStatus::Failed));
        assert!(ExecutionStatus::Succeeded.can_transition_to(ExecutionStatus::RolledBack));
        assert!(!ExecutionStatus::RolledBack.can_transition_to(ExecutionStatus::Pending));
        assert!(!ExecutionStatus::Simulated.can_transition_to(ExecutionStatus::Succeeded));
    }

    #[test]
    fn approval_validity_window() {
        let now = Utc::now();
        let approval = HafApproval {
            approval_id: ApprovalId::new(),
            action_id: ActionId::new(),
            requested_by_user_id: UserId::new(),
            requested_by_role: Role::SecurityAnalyst,
            approver_user_id: Some(UserId::new()),
            approver_role: Some(Role::SuperAdmin),
            approval_status: ApprovalStatus::Approved,
            created_at: now,
            approved_at: Some(now),
            expires_at: now + Duration::hours(24),
            ledger_entry_id: None,
        };
        assert!(approval.is_valid_at(now + Duration::hours(1)));
        assert!(!approval.is_valid_at(now + Duration::hours(25)));

        let rejected = HafApproval {
            approval_status: ApprovalStatus::Rejected,
            ..approval
        };
        assert!(!rejected.is_valid_at(now));
    }

    #[test]
    fn attestation_completeness() {
        let mut attestation = IncidentAttestation {
            attestation_id: AttestationId::new(),
            incident_id: IncidentId::new(),
            action_id: ActionId::new(),
            executor_user_id: UserId::new(),
            approver_user_id: UserId::new(),
            executor_attested_at: Some(Utc::now()),
            approver_attested_at: None,
        };
        assert!(!attestation.is_complete());
        attestation.approver_attested_at = Some(Utc::now());
        assert!(attestation.is_complete());
    }

    #[test]
    fn artifact_tags_are_wire_stable() {
        let artifact = RollbackArtifact::FileQuarantine {
            machine_id: "host-1".to_string(),
            original_path: "/tmp/evil.bin".to_string(),
            quarantine_path: "/var/lib/ransomeye/quarantine/evil.bin".to_string(),
            sha256: "ab".repeat(32),
        };
        let value = serde_json::to_value(&artifact).unwrap();
        assert_eq!(value["artifact_type"], "FILE_QUARANTINE");
        assert_eq!(artifact.action_type(), ActionType::QuarantineFile);
    }

    #[test]
    fn default_deny_policy_prohibits_everything() {
        let policy = CachedPolicy::default_deny();
        assert_eq!(policy.prohibited_actions.len(), ActionType::ALL.len());
        assert!(policy.allowed_actions.is_empty());
    }
}
