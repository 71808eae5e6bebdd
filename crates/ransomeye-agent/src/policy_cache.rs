//! Cached-policy fail-closed enforcement
//!
//! The agent's last known allow/deny lists, used autonomously when the
//! Core is unreachable:
//!
//! 1. Action in `prohibited_actions` -> reject
//! 2. Non-empty `allowed_actions` without the action -> reject
//! 3. Empty `allowed_actions` -> reject (default deny)
//! 4. Action explicitly allowed -> allow, logged as autonomous
//!
//! No cached policy, or a failed integrity check, means rule 3 for
//! everything.

use ransomeye_types::{ActionType, CachedPolicy, DecisionOutcome};
use std::path::{Path, PathBuf};

use ransomeye_common::safe_write_file;
use ransomeye_crypto::hash_with_field_removed;

use crate::{AgentError, Result};

/// File-backed cached policy with integrity hashing
pub struct CachedPolicyStore {
    path: PathBuf,
}

impl CachedPolicyStore {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Integrity hash over the canonical JSON with `integrity_hash` removed
    pub fn compute_integrity_hash(policy: &CachedPolicy) -> Result<String> {
        Ok(hash_with_field_removed(policy, "integrity_hash")?)
    }

    /// Verify a loaded policy's embedded hash. A policy without a hash
    /// fails verification: only the default-deny policy may be hashless,
    /// and that one is never loaded from disk.
    pub fn verify_integrity(policy: &CachedPolicy) -> bool {
        match &policy.integrity_hash {
            Some(embedded) => match Self::compute_integrity_hash(policy) {
                Ok(computed) => &computed == embedded,
                Err(_) => false,
            },
            None => false,
        }
    }

    /// Load the cached policy. Any failure - missing file, parse error,
    /// integrity mismatch - yields the default-deny policy.
    pub fn load(&self) -> CachedPolicy {
        if !self.path.exists() {
            tracing::warn!(
                "no cached policy on disk; default deny will be enforced while offline"
            );
            return CachedPolicy::default_deny();
        }

        let text = match std::fs::read_to_string(&self.path) {
            Ok(text) => text,
            Err(e) => {
                tracing::error!(error = %e, "cached policy unreadable; default deny enforced");
                return CachedPolicy::default_deny();
            }
        };
        let policy: CachedPolicy = match serde_json::from_str(&text) {
            Ok(policy) => policy,
            Err(e) => {
                tracing::error!(error = %e, "cached policy unparseable; default deny enforced");
                return CachedPolicy::default_deny();
            }
        };

        if !Self::verify_integrity(&policy) {
            tracing::error!(
                "cached policy integrity check failed; default deny enforced"
            );
            return CachedPolicy::default_deny();
        }

        policy
    }

    /// Replace the cached policy atomically, recomputing the integrity
    /// hash before the write.
    pub fn update(&self, mut policy: CachedPolicy) -> Result<CachedPolicy> {
        policy.integrity_hash = None;
        policy.integrity_hash = Some(Self::compute_integrity_hash(&policy)?);

        let text = serde_json::to_string_pretty(&policy)
            .map_err(|e| AgentError::Serialization(e.to_string()))?;
        safe_write_file(&self.path, text.as_bytes())
            .map_err(|e| AgentError::Execution(e.to_string()))?;
        Ok(policy)
    }
}

/// Apply the fail-closed rules to one action
pub fn check_cached_policy(policy: &CachedPolicy, action: ActionType) -> DecisionOutcome {
    if policy.prohibited_actions.contains(&action) {
        return DecisionOutcome::deny(
            "cached_policy.prohibited",
            format!("action {} is prohibited by cached policy", action),
        );
    }

    if policy.allowed_actions.is_empty() {
        return DecisionOutcome::deny(
            "cached_policy.default_deny",
            "no allow-list in cached policy; default deny enforced",
        );
    }

    if !policy.allowed_actions.contains(&action) {
        return DecisionOutcome::deny(
            "cached_policy.not_allowed",
            format!("action {} is not in the cached allow-list", action),
        );
    }

    DecisionOutcome::Allow
}
