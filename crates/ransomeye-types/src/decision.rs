//! The `DecisionOutcome` sum type
//!
//! Every authorization seam (RBAC, mode gate, HAF, rate limits, blast
//! radius, agent gate) returns a value of this type instead of raising.
//! Process-terminating failures stay reserved for invariant violations.

use serde::{Deserialize, Serialize};

/// Outcome of a single authorization rule
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DecisionOutcome {
    Allow,
    Deny {
        reason: String,
        /// Identifier of the exact rule that failed, for the audit trail
        rule_id: String,
    },
}

impl DecisionOutcome {
    pub fn deny(rule_id: impl Into<String>, reason: impl Into<String>) -> Self {
        DecisionOutcome::Deny {
            reason: reason.into(),
            rule_id: rule_id.into(),
        }
    }

    pub fn is_allow(&self) -> bool {
        matches!(self, DecisionOutcome::Allow)
    }

    pub fn is_deny(&self) -> bool {
        !self.is_allow()
    }

    /// The failing rule id, if denied
    pub fn rule_id(&self) -> Option<&str> {
        match self {
            DecisionOutcome::Allow => None,
            DecisionOutcome::Deny { rule_id, .. } => Some(rule_id),
        }
    }
}
