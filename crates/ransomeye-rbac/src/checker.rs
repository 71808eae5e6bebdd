//! The server-side permission checker

use ransomeye_types::{ActionType, DecisionOutcome, IncidentId, UserId};
use serde_json::json;
use std::sync::Arc;

use ransomeye_ledger::DecisionSink;

use crate::{
    destructive_permission, is_known_permission, role_has_permission, RbacError, Result,
    RoleStore,
};

const COMPONENT: &str = "rbac";

/// Server-side permission checker (default DENY)
pub struct PermissionChecker {
    store: Arc<dyn RoleStore>,
    sink: Arc<dyn DecisionSink>,
}

impl PermissionChecker {
    pub fn new(store: Arc<dyn RoleStore>, sink: Arc<dyn DecisionSink>) -> Self {
        Self { store, sink }
    }

    fn emit_check(
        &self,
        user_id: &UserId,
        permission: &str,
        incident_id: Option<&IncidentId>,
        decision: &DecisionOutcome,
    ) -> Result<()> {
        let (verdict, reason) = match decision {
            DecisionOutcome::Allow => ("ALLOW", None),
            DecisionOutcome::Deny { reason, .. } => ("DENY", Some(reason.clone())),
        };
        self.sink.emit(
            COMPONENT,
            "rbac_permission_check",
            json!({
                "type": "permission",
                "id": incident_id.map(|i| i.to_string()).unwrap_or_else(|| "none".to_string()),
            }),
            json!({"type": "user", "identifier": user_id.to_string()}),
            json!({
                "permission": permission,
                "decision": verdict,
                "reason": reason,
            }),
        )?;
        Ok(())
    }

    /// Check one permission for one user. Unknown permissions are errors;
    /// unknown users are denials.
    pub async fn check_permission(
        &self,
        user_id: &UserId,
        permission: &str,
        incident_id: Option<&IncidentId>,
    ) -> Result<DecisionOutcome> {
        if !is_known_permission(permission) {
            return Err(RbacError::InvalidPermission(permission.to_string()));
        }

        let decision = match self.store.role_for_user(user_id).await? {
            None => DecisionOutcome::deny("rbac.no_role", "user has no role assigned"),
            Some(role) => {
                if role_has_permission(role, permission) {
                    DecisionOutcome::Allow
                } else {
                    DecisionOutcome::deny(
                        "rbac.role_lacks_permission",
                        format!("role {} lacks permission {}", role, permission),
                    )
                }
            }
        };

        self.emit_check(user_id, permission, incident_id, &decision)?;
        Ok(decision)
    }

    /// TRE execute check for a SAFE action: `tre:execute` alone
    pub async fn check_execute_safe(
        &self,
        user_id: &UserId,
        incident_id: Option<&IncidentId>,
    ) -> Result<DecisionOutcome> {
        self.check_permission(user_id, "tre:execute", incident_id).await
    }

    /// TRE execute check for a DESTRUCTIVE action: `tre:execute` plus the
    /// per-action destructive permission
    pub async fn check_execute_destructive(
        &self,
        user_id: &UserId,
        action: ActionType,
        incident_id: Option<&IncidentId>,
    ) -> Result<DecisionOutcome> {
        let base = self.check_permission(user_id, "tre:execute", incident_id).await?;
        if base.is_deny() {
            return Ok(base);
        }
        let Some(permission) = destructive_permission(action) else {
            return Ok(DecisionOutcome::Allow);
        };
        self.check_permission(user_id, permission, incident_id).await
    }

    /// Rollback requires `tre:execute` and `tre:rollback`
    pub async fn check_rollback(
        &self,
        user_id: &UserId,
        incident_id: Option<&IncidentId>,
    ) -> Result<DecisionOutcome> {
        let base = self.check_permission(user_id, "tre:execute", incident_id).await?;
        if base.is_deny() {
            return Ok(base);
        }
        self.check_permission(user_id, "tre:rollback", incident_id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::MemoryRoleStore;
    use ransomeye_ledger::MemorySink;
    use ransomeye_types::Role;

    async fn checker_with(
        role: Option<Role>,
    ) -> (PermissionChecker, Arc<MemorySink>, UserId) {
        let store = Arc::new(MemoryRoleStore::new());
        let user = UserId::new();
        if let Some(role) = role {
            store.assign(user, role).await;
        }
        let sink = MemorySink::new();
        (
            PermissionChecker::new(store, sink.clone()),
            sink,
            user,
        )
    }

    #[tokio::test]
    async fn user_without_role_is_denied() {
        let (checker, sink, user) = checker_with(None).await;
        let decision = checker.check_execute_safe(&user, None).await.unwrap();
        assert_eq!(decision.rule_id(), Some("rbac.no_role"));
        assert_eq!(sink.records_of("rbac_permission_check").len(), 1);
    }

    #[tokio::test]
    async fn analyst_safe_allowed_destructive_denied() {
        let (checker, _sink, user) = checker_with(Some(Role::SecurityAnalyst)).await;

        let safe = checker.check_execute_safe(&user, None).await.unwrap();
        assert!(safe.is_allow());

        let destructive = checker
            .check_execute_destructive(&user, ActionType::IsolateHost, None)
            .await
            .unwrap();
        assert_eq!(destructive.rule_id(), Some("rbac.role_lacks_permission"));
    }

    #[tokio::test]
    async fn super_admin_may_destroy() {
        let (checker, _sink, user) = checker_with(Some(Role::SuperAdmin)).await;
        let decision = checker
            .check_execute_destructive(&user, ActionType::MassProcessKill, None)
            .await
            .unwrap();
        assert!(decision.is_allow());
    }

    #[tokio::test]
    async fn unknown_permission_is_an_error() {
        let (checker, _sink, user) = checker_with(Some(Role::SuperAdmin)).await;
        let result = checker.check_permission(&user, "tre:launch_missiles", None).await;
        assert!(matches!(result, Err(RbacError::InvalidPermission(_))));
    }

    #[tokio::test]
    async fn every_check_is_audited() {
        let (checker, sink, user) = checker_with(Some(Role::SecurityAnalyst)).await;
        checker.check_rollback(&user, None).await.unwrap();
        // tre:execute + tre:rollback = two entries
        assert_eq!(sink.records_of("rbac_permission_check").len(), 2);
    }
}
