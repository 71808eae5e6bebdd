//! Blast-radius declaration and enforcement
//!
//! The declared scope must be matched by a resolved target set of equal
//! cardinality. A mismatch is a rejection, never an assumption. GROUP,
//! NETWORK, and GLOBAL scopes always require human authority on top of
//! whatever the action classification demands.

use async_trait::async_trait;
use ransomeye_types::{BlastScope, CommandTarget, DecisionOutcome};

use crate::Result;

/// Resolves scope declarations to concrete target sets
#[async_trait]
pub trait BlastRadiusResolver: Send + Sync {
    async fn group_members(&self, group_id: &str) -> Result<Vec<String>>;
    async fn network_hosts(&self, network_cidr: &str) -> Result<Vec<String>>;
    async fn all_hosts(&self) -> Result<Vec<String>>;
}

/// A resolver for deployments that have not populated host groups yet:
/// wide scopes resolve to nothing and therefore always reject.
pub struct EmptyResolver;

#[async_trait]
impl BlastRadiusResolver for EmptyResolver {
    async fn group_members(&self, _group_id: &str) -> Result<Vec<String>> {
        Ok(Vec::new())
    }

    async fn network_hosts(&self, _network_cidr: &str) -> Result<Vec<String>> {
        Ok(Vec::new())
    }

    async fn all_hosts(&self) -> Result<Vec<String>> {
        Ok(Vec::new())
    }
}

/// Outcome of blast-radius validation
#[derive(Debug, Clone, PartialEq)]
pub struct BlastValidation {
    pub decision: DecisionOutcome,
    pub resolved_targets: Vec<String>,
    /// Wide scopes require human authority regardless of classification
    pub requires_haf: bool,
}

/// Validate a declared scope against the command target
pub async fn validate_blast_radius(
    resolver: &dyn BlastRadiusResolver,
    scope: BlastScope,
    target: &CommandTarget,
) -> Result<BlastValidation> {
    let deny = |rule: &str, reason: String| BlastValidation {
        decision: DecisionOutcome::deny(rule, reason),
        resolved_targets: Vec::new(),
        requires_haf: scope.requires_approval(),
    };

    let resolved = match scope {
        BlastScope::Host => match &target.machine_id {
            Some(machine_id) if !machine_id.is_empty() => vec![machine_id.clone()],
            _ => {
                return Ok(deny(
                    "blast.missing_machine_id",
                    "HOST scope requires target.machine_id".to_string(),
                ))
            }
        },
        BlastScope::Group => match &target.group_id {
            Some(group_id) => resolver.group_members(group_id).await?,
            None => {
                return Ok(deny(
                    "blast.missing_group_id",
                    "GROUP scope requires target.group_id".to_string(),
                ))
            }
        },
        BlastScope::Network => match &target.network_cidr {
            Some(cidr) => resolver.network_hosts(cidr).await?,
            None => {
                return Ok(deny(
                    "blast.missing_network_cidr",
                    "NETWORK scope requires target.network_cidr".to_string(),
                ))
            }
        },
        BlastScope::Global => resolver.all_hosts().await?,
    };

    // declared cardinality check: HOST means exactly one target, wider
    // scopes must resolve to at least one
    let valid = match scope {
        BlastScope::Host => resolved.len() == 1,
        _ => !resolved.is_empty(),
    };
    if !valid {
        return Ok(deny(
            "blast.cardinality_mismatch",
            format!(
                "scope {:?} resolved to {} targets",
                scope,
                resolved.len()
            ),
        ));
    }

    Ok(BlastValidation {
        decision: DecisionOutcome::Allow,
        resolved_targets: resolved,
        requires_haf: scope.requires_approval(),
    })
}
