//! Signed response commands and the frozen action vocabulary

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::{ApprovalId, CommandId, IncidentId, KeyId, PolicyId, TypeError, UserId};

/// The frozen set of response actions. Adding a variant is a schema change
/// that must be coordinated across TRE, agents, and cached policies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ActionType {
    BlockProcess,
    BlockNetworkConnection,
    TemporaryFirewallRule,
    QuarantineFile,
    IsolateHost,
    LockUser,
    DisableService,
    MassProcessKill,
    NetworkSegmentIsolation,
}

/// Frozen classification determining whether human authority is required
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ActionClassification {
    Safe,
    Destructive,
}

impl ActionType {
    pub const ALL: [ActionType; 9] = [
        ActionType::BlockProcess,
        ActionType::BlockNetworkConnection,
        ActionType::TemporaryFirewallRule,
        ActionType::QuarantineFile,
        ActionType::IsolateHost,
        ActionType::LockUser,
        ActionType::DisableService,
        ActionType::MassProcessKill,
        ActionType::NetworkSegmentIsolation,
    ];

    /// Classification lookup. Frozen: SAFE actions are reversible scoped
    /// containment; everything else is DESTRUCTIVE.
    pub fn classification(&self) -> ActionClassification {
        match self {
            ActionType::BlockProcess
            | ActionType::BlockNetworkConnection
            | ActionType::TemporaryFirewallRule
            | ActionType::QuarantineFile => ActionClassification::Safe,
            ActionType::IsolateHost
            | ActionType::LockUser
            | ActionType::DisableService
            | ActionType::MassProcessKill
            | ActionType::NetworkSegmentIsolation => ActionClassification::Destructive,
        }
    }

    pub fn is_destructive(&self) -> bool {
        self.classification() == ActionClassification::Destructive
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ActionType::BlockProcess => "BLOCK_PROCESS",
            ActionType::BlockNetworkConnection => "BLOCK_NETWORK_CONNECTION",
            ActionType::TemporaryFirewallRule => "TEMPORARY_FIREWALL_RULE",
            ActionType::QuarantineFile => "QUARANTINE_FILE",
            ActionType::IsolateHost => "ISOLATE_HOST",
            ActionType::LockUser => "LOCK_USER",
            ActionType::DisableService => "DISABLE_SERVICE",
            ActionType::MassProcessKill => "MASS_PROCESS_KILL",
            ActionType::NetworkSegmentIsolation => "NETWORK_SEGMENT_ISOLATION",
        }
    }
}

impl fmt::Display for ActionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ActionType {
    type Err = TypeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ActionType::ALL
            .iter()
            .copied()
            .find(|a| a.as_str() == s)
            .ok_or_else(|| TypeError::UnknownEnumValue {
                enum_name: "ActionType",
                value: s.to_string(),
            })
    }
}

/// TRE execution mode. Exactly one is active at any time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TreMode {
    DryRun,
    GuardedExec,
    FullEnforce,
}

impl TreMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            TreMode::DryRun => "DRY_RUN",
            TreMode::GuardedExec => "GUARDED_EXEC",
            TreMode::FullEnforce => "FULL_ENFORCE",
        }
    }
}

impl fmt::Display for TreMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The frozen operator role set
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Role {
    SuperAdmin,
    SecurityAnalyst,
    PolicyManager,
    ItAdmin,
    Auditor,
}

impl Role {
    pub const ALL: [Role; 5] = [
        Role::SuperAdmin,
        Role::SecurityAnalyst,
        Role::PolicyManager,
        Role::ItAdmin,
        Role::Auditor,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Role::SuperAdmin => "SUPER_ADMIN",
            Role::SecurityAnalyst => "SECURITY_ANALYST",
            Role::PolicyManager => "POLICY_MANAGER",
            Role::ItAdmin => "IT_ADMIN",
            Role::Auditor => "AUDITOR",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Authorities allowed to issue commands
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum IssuingAuthority {
    #[serde(rename = "policy-engine")]
    PolicyEngine,
    #[serde(rename = "threat-response-engine")]
    ThreatResponseEngine,
    #[serde(rename = "human-authority")]
    HumanAuthority,
}

impl IssuingAuthority {
    pub fn as_str(&self) -> &'static str {
        match self {
            IssuingAuthority::PolicyEngine => "policy-engine",
            IssuingAuthority::ThreatResponseEngine => "threat-response-engine",
            IssuingAuthority::HumanAuthority => "human-authority",
        }
    }
}

/// Declared blast scope of a requested action
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BlastScope {
    Host,
    Group,
    Network,
    Global,
}

impl BlastScope {
    /// GROUP / NETWORK / GLOBAL always require human authority
    pub fn requires_approval(&self) -> bool {
        !matches!(self, BlastScope::Host)
    }
}

/// Target descriptor carried inside a command
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CommandTarget {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub machine_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub process_id: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub connection: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file_path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub service_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub network_cidr: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub group_id: Option<String>,
}

impl CommandTarget {
    pub fn host(machine_id: impl Into<String>) -> Self {
        Self {
            machine_id: Some(machine_id.into()),
            ..Self::default()
        }
    }

    pub fn process(machine_id: impl Into<String>, process_id: u32) -> Self {
        Self {
            machine_id: Some(machine_id.into()),
            process_id: Some(process_id),
            ..Self::default()
        }
    }
}

/// The response atom: a signed, expiring, replay-protected command
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SignedCommand {
    pub command_id: CommandId,
    pub action_type: ActionType,
    pub target: CommandTarget,
    pub incident_id: Option<IncidentId>,
    pub tre_mode: TreMode,
    pub issued_by_user_id: UserId,
    pub issued_by_role: Role,
    pub approval_id: Option<ApprovalId>,
    pub issued_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    /// SHA-256 key into the rollback-artifact store
    pub rollback_token: String,
    pub policy_id: PolicyId,
    pub policy_version: String,
    pub issuing_authority: IssuingAuthority,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub signature: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub signing_key_id: Option<KeyId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub signing_algorithm: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub signed_at: Option<DateTime<Utc>>,
}

impl SignedCommand {
    pub fn is_signed(&self) -> bool {
        self.signature.is_some() && self.signing_key_id.is_some()
    }

    /// An emergency command bypasses the incident binding (SUPER_ADMIN only)
    pub fn is_emergency(&self) -> bool {
        self.incident_id.is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classification_is_frozen() {
        assert_eq!(
            ActionType::BlockProcess.classification(),
            ActionClassification::Safe
        );
        assert_eq!(
            ActionType::QuarantineFile.classification(),
            ActionClassification::Safe
        );
        assert!(ActionType::IsolateHost.is_destructive());
        assert!(ActionType::MassProcessKill.is_destructive());
        let destructive = ActionType::ALL.iter().filter(|a| a.is_destructive()).count();
        assert_eq!(destructive, 5);
    }

    #[test]
    fn action_type_wire_names_roundtrip() {
        for action in ActionType::ALL {
            let parsed: ActionType = action.as_str().parse().unwrap();
            assert_eq!(parsed, action);
            let json = serde_json::to_string(&action).unwrap();
            assert_eq!(json, format!("\"{}\"", action.as_str()));
        }
    }

    #[test]
    fn unknown_action_type_is_rejected() {
        assert!("FORMAT_DISK".parse::<ActionType>().is_err());
    }

    #[test]
    fn issuing_authority_uses_kebab_names() {
        assert_eq!(
            serde_json::to_string(&IssuingAuthority::PolicyEngine).unwrap(),
            "\"policy-engine\""
        );
        let parsed: IssuingAuthority =
            serde_json::from_str("\"human-authority\"").unwrap();
        assert_eq!(parsed, IssuingAuthority::HumanAuthority);
    }

    #[test]
    fn blast_scope_approval_rule() {
        assert!(!BlastScope::Host.requires_approval());
        assert!(BlastScope::Group.requires_approval());
        assert!(BlastScope::Network.requires_approval());
        assert!(BlastScope::Global.requires_approval());
    }

    #[test]
    fn command_with_unknown_field_is_rejected() {
        let command = SignedCommand {
            command_id: CommandId::new(),
            action_type: ActionType::BlockProcess,
            target: CommandTarget::process("host-1", 4242),
            incident_id: Some(IncidentId::new()),
            tre_mode: TreMode::FullEnforce,
            issued_by_user_id: UserId::new(),
            issued_by_role: Role::SecurityAnalyst,
            approval_id: None,
            issued_at: Utc::now(),
            expires_at: Utc::now(),
            rollback_token: "0".repeat(64),
            policy_id: PolicyId::new(),
            policy_version: "1.0".to_string(),
            issuing_authority: IssuingAuthority::PolicyEngine,
            signature: None,
            signing_key_id: None,
            signing_algorithm: None,
            signed_at: None,
        };
        let mut value = serde_json::to_value(&command).unwrap();
        value["blast_override"] = serde_json::json!(true);
        let result: Result<SignedCommand, _> = serde_json::from_value(value);
        assert!(result.is_err());
    }
}
