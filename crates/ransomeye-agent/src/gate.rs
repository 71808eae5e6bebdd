//! The agent command gate
//!
//! Single intake point on a managed host; default DENY. Ten sequential
//! checks, fail-fast, each rejection naming its reason:
//!
//! 1. Schema (typed parse, frozen enums, unknown fields rejected)
//! 2. Freshness (`expires_at > now`, issue skew <= 60 s)
//! 3. Ed25519 signature over the canonical command
//! 4. Issuer trust (`signing_key_id` == configured TRE key)
//! 5. RBAC assertion fields
//! 6. Policy authority binding
//! 7. HAF approval presence (destructive + FULL_ENFORCE)
//! 8. Idempotency (bounded nonce cache, LRU-evicted)
//! 9. Local rate limit (100 commands/min)
//! 10. Cached-policy fail-closed when the Core is unreachable

use chrono::{DateTime, Duration, Utc};
use ed25519_dalek::VerifyingKey;
use lru::LruCache;
use ransomeye_types::{CommandId, KeyId, SignedCommand, TreMode};
use serde_json::Value;
use std::num::NonZeroUsize;
use std::sync::Arc;
use std::sync::Mutex;

use ransomeye_crypto::{is_sha256_hex, verify_command};

use crate::{check_cached_policy, AgentAuditLog, CachedPolicyStore, CoreProbe, Result};

/// Maximum allowed clock skew on `issued_at`
pub const CLOCK_SKEW_TOLERANCE_SECS: i64 = 60;
/// Local command rate limit
pub const COMMANDS_PER_MINUTE: usize = 100;
/// Bounded replay cache size
pub const NONCE_CACHE_SIZE: usize = 10_000;

/// A command rejection with its wire reason
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GateRejection {
    pub reason: &'static str,
    pub detail: String,
}

impl GateRejection {
    fn new(reason: &'static str, detail: impl Into<String>) -> Self {
        Self {
            reason,
            detail: detail.into(),
        }
    }
}

/// Outcome of one gate pass
pub type GateOutcome = std::result::Result<SignedCommand, GateRejection>;

/// The command acceptance gate
pub struct CommandGate {
    tre_key: VerifyingKey,
    tre_key_id: KeyId,
    nonce_cache: Mutex<LruCache<CommandId, ()>>,
    rate_window: Mutex<Vec<DateTime<Utc>>>,
    policy_store: CachedPolicyStore,
    probe: Arc<dyn CoreProbe>,
    audit: AgentAuditLog,
}

impl CommandGate {
    pub fn new(
        tre_key: VerifyingKey,
        tre_key_id: KeyId,
        policy_store: CachedPolicyStore,
        probe: Arc<dyn CoreProbe>,
        audit: AgentAuditLog,
    ) -> Self {
        Self {
            tre_key,
            tre_key_id,
            nonce_cache: Mutex::new(LruCache::new(
                NonZeroUsize::new(NONCE_CACHE_SIZE).expect("cache size is nonzero"),
            )),
            rate_window: Mutex::new(Vec::new()),
            policy_store,
            probe,
            audit,
        }
    }

    pub fn audit(&self) -> &AgentAuditLog {
        &self.audit
    }

    pub fn policy_store(&self) -> &CachedPolicyStore {
        &self.policy_store
    }

    /// Run the full acceptance sequence over one wire command.
    /// Every outcome is appended to the local audit log.
    pub async fn receive_command(&self, wire: Value) -> Result<GateOutcome> {
        let command_id_hint = wire
            .get("command_id")
            .and_then(Value::as_str)
            .unwrap_or("unknown")
            .to_string();

        match self.validate(wire).await {
            Ok(command) => {
                self.audit.append(
                    "command_received",
                    &command.command_id.to_string(),
                    "SUCCESS",
                    None,
                )?;
                Ok(Ok(command))
            }
            Err(rejection) => {
                self.audit.append(
                    "command_rejected",
                    &command_id_hint,
                    "REJECTED",
                    Some(rejection.reason),
                )?;
                tracing::warn!(
                    command_id = %command_id_hint,
                    reason = rejection.reason,
                    detail = %rejection.detail,
                    "command rejected at gate"
                );
                Ok(Err(rejection))
            }
        }
    }

    async fn validate(&self, wire: Value) -> std::result::Result<SignedCommand, GateRejection> {
        // 1. schema: typed parse enforces required fields, frozen enums,
        // UUID formats, RFC-3339 timestamps, and rejects unknown fields
        let command: SignedCommand = serde_json::from_value(wire)
            .map_err(|e| GateRejection::new("schema_invalid", e.to_string()))?;
        if !is_sha256_hex(&command.rollback_token) {
            return Err(GateRejection::new(
                "schema_invalid",
                "rollback_token must be a SHA-256 hex digest",
            ));
        }

        // 2. freshness
        let now = Utc::now();
        if command.expires_at <= now {
            return Err(GateRejection::new(
                "expired",
                format!("expires_at={} now={}", command.expires_at, now),
            ));
        }
        let skew = (command.issued_at - now).num_seconds().abs();
        if skew > CLOCK_SKEW_TOLERANCE_SECS {
            return Err(GateRejection::new(
                "clock_skew",
                format!("issued_at skew {}s exceeds {}s", skew, CLOCK_SKEW_TOLERANCE_SECS),
            ));
        }

        // 3. signature over canonical JSON with signature fields blanked
        match verify_command(&command, &self.tre_key) {
            Ok(true) => {}
            Ok(false) => {
                return Err(GateRejection::new(
                    "signature_mismatch",
                    "ed25519 verification failed",
                ))
            }
            Err(e) => return Err(GateRejection::new("signature_mismatch", e.to_string())),
        }

        // 4. issuer trust
        match &command.signing_key_id {
            Some(key_id) if key_id == &self.tre_key_id => {}
            Some(key_id) => {
                return Err(GateRejection::new(
                    "issuer_untrusted",
                    format!("expected {}, got {}", self.tre_key_id, key_id),
                ))
            }
            None => {
                return Err(GateRejection::new(
                    "issuer_untrusted",
                    "missing signing_key_id",
                ))
            }
        }

        // 5. RBAC assertion fields (the role enum is frozen by the type;
        // a nil user id means the assertion was fabricated)
        if command.issued_by_user_id.as_uuid().is_nil() {
            return Err(GateRejection::new(
                "rbac_field_missing",
                "issued_by_user_id is nil",
            ));
        }

        // 6. policy authority binding
        if command.policy_id.as_uuid().is_nil() {
            return Err(GateRejection::new(
                "policy_authority_missing",
                "policy_id is nil",
            ));
        }
        if command.policy_version.trim().is_empty() {
            return Err(GateRejection::new(
                "policy_authority_missing",
                "policy_version is empty",
            ));
        }

        // 7. HAF approval presence
        if command.action_type.is_destructive()
            && command.tre_mode == TreMode::FullEnforce
            && command.approval_id.is_none()
        {
            return Err(GateRejection::new(
                "approval_required",
                format!(
                    "destructive action {} in FULL_ENFORCE requires approval_id",
                    command.action_type
                ),
            ));
        }

        // 8. idempotency (replay protection)
        {
            let mut cache = self
                .nonce_cache
                .lock()
                .map_err(|e| GateRejection::new("replay", format!("nonce cache poisoned: {}", e)))?;
            if cache.contains(&command.command_id) {
                return Err(GateRejection::new(
                    "replay",
                    format!("command_id {} already seen", command.command_id),
                ));
            }
            cache.put(command.command_id, ());
        }

        // 9. local rate limit
        {
            let mut window = self
                .rate_window
                .lock()
                .map_err(|e| GateRejection::new("rate_limited", format!("window poisoned: {}", e)))?;
            window.retain(|t| now - *t < Duration::minutes(1));
            if window.len() >= COMMANDS_PER_MINUTE {
                return Err(GateRejection::new(
                    "rate_limited",
                    format!("{} commands in the last minute", window.len()),
                ));
            }
            window.push(now);
        }

        // 10. cached-policy fail-closed when the Core is unreachable
        if !self.probe.is_online().await {
            let policy = self.policy_store.load();
            let decision = check_cached_policy(&policy, command.action_type);
            if let ransomeye_types::DecisionOutcome::Deny { reason, rule_id } = decision {
                tracing::warn!(
                    action = %command.action_type,
                    rule_id = %rule_id,
                    "core offline: autonomous enforcement denied the action"
                );
                return Err(GateRejection::new("policy_denied", reason));
            }
            tracing::info!(
                action = %command.action_type,
                policy_version = %policy.version,
                "core offline: action allowed by cached policy"
            );
        }

        Ok(command)
    }
}
