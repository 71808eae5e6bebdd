//! Incident execution guard, freeze, and reopen

use async_trait::async_trait;
use ransomeye_types::{
    DecisionOutcome, IncidentId, IncidentStatus, Role, UserId,
};
use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

use ransomeye_ledger::DecisionSink;

use crate::{Result, TreError, COMPONENT};

/// Minimum justification length for reopening a frozen incident
pub const MIN_REOPEN_JUSTIFICATION: usize = 10;

/// Read/write access to incident lifecycle status as TRE sees it
#[async_trait]
pub trait IncidentDirectory: Send + Sync {
    async fn status(&self, incident_id: &IncidentId) -> Result<Option<IncidentStatus>>;
    async fn set_status(&self, incident_id: &IncidentId, status: IncidentStatus)
        -> Result<()>;
}

/// In-memory incident directory
#[derive(Default)]
pub struct MemoryIncidentDirectory {
    statuses: RwLock<HashMap<IncidentId, IncidentStatus>>,
}

impl MemoryIncidentDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn register(&self, incident_id: IncidentId, status: IncidentStatus) {
        self.statuses.write().await.insert(incident_id, status);
    }
}

#[async_trait]
impl IncidentDirectory for MemoryIncidentDirectory {
    async fn status(&self, incident_id: &IncidentId) -> Result<Option<IncidentStatus>> {
        Ok(self.statuses.read().await.get(incident_id).copied())
    }

    async fn set_status(
        &self,
        incident_id: &IncidentId,
        status: IncidentStatus,
    ) -> Result<()> {
        let mut statuses = self.statuses.write().await;
        if !statuses.contains_key(incident_id) {
            return Err(TreError::Store(format!("unknown incident {}", incident_id)));
        }
        statuses.insert(*incident_id, status);
        Ok(())
    }
}

/// The incident execution guard (pipeline step 1)
pub struct IncidentGuard {
    directory: Arc<dyn IncidentDirectory>,
    sink: Arc<dyn DecisionSink>,
}

impl IncidentGuard {
    pub fn new(directory: Arc<dyn IncidentDirectory>, sink: Arc<dyn DecisionSink>) -> Self {
        Self { directory, sink }
    }

    pub fn directory(&self) -> &Arc<dyn IncidentDirectory> {
        &self.directory
    }

    /// Non-emergency actions require an open incident; the emergency path
    /// requires SUPER_ADMIN.
    pub async fn guard_execution(
        &self,
        incident_id: Option<&IncidentId>,
        emergency: bool,
        role: Role,
        rollback: bool,
    ) -> Result<DecisionOutcome> {
        if emergency {
            if role != Role::SuperAdmin {
                return Ok(DecisionOutcome::deny(
                    "guard.emergency_requires_super_admin",
                    format!("emergency path denied for role {}", role),
                ));
            }
            return Ok(DecisionOutcome::Allow);
        }

        let Some(incident_id) = incident_id else {
            return Ok(DecisionOutcome::deny(
                "guard.incident_required",
                "non-emergency actions require an incident_id",
            ));
        };

        match self.directory.status(incident_id).await? {
            None => Ok(DecisionOutcome::deny(
                "guard.incident_unknown",
                format!("incident {} does not exist", incident_id),
            )),
            Some(status) if status.is_frozen() => {
                if rollback {
                    // frozen incidents still allow rollback
                    Ok(DecisionOutcome::Allow)
                } else {
                    Ok(DecisionOutcome::deny(
                        "guard.incident_frozen",
                        format!("incident {} is frozen ({:?})", incident_id, status),
                    ))
                }
            }
            Some(_) => Ok(DecisionOutcome::Allow),
        }
    }

    /// Reopen a frozen incident. SUPER_ADMIN only, with a justification of
    /// at least ten characters; the reopen lands in the ledger.
    pub async fn reopen_incident(
        &self,
        incident_id: &IncidentId,
        user_id: &UserId,
        role: Role,
        justification: &str,
    ) -> Result<DecisionOutcome> {
        if role != Role::SuperAdmin {
            return Ok(DecisionOutcome::deny(
                "guard.reopen_requires_super_admin",
                format!("reopen denied for role {}", role),
            ));
        }
        if justification.trim().len() < MIN_REOPEN_JUSTIFICATION {
            return Ok(DecisionOutcome::deny(
                "guard.reopen_justification_too_short",
                format!(
                    "justification must be at least {} characters",
                    MIN_REOPEN_JUSTIFICATION
                ),
            ));
        }

        match self.directory.status(incident_id).await? {
            None => Ok(DecisionOutcome::deny(
                "guard.incident_unknown",
                format!("incident {} does not exist", incident_id),
            )),
            Some(status) if !status.is_frozen() => Ok(DecisionOutcome::deny(
                "guard.incident_not_frozen",
                format!("incident {} is already open", incident_id),
            )),
            Some(_) => {
                self.directory.set_status(incident_id, IncidentStatus::Open).await?;
                self.sink.emit(
                    COMPONENT,
                    "incident_reopened",
                    json!({"type": "incident", "id": incident_id.to_string()}),
                    json!({"type": "user", "identifier": user_id.to_string()}),
                    json!({"justification": justification}),
                )?;
                Ok(DecisionOutcome::Allow)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ransomeye_ledger::MemorySink;

    async fn guard_with(status: Option<IncidentStatus>) -> (IncidentGuard, IncidentId, Arc<MemorySink>) {
        let directory = Arc::new(MemoryIncidentDirectory::new());
        let incident_id = IncidentId::new();
        if let Some(status) = status {
            directory.register(incident_id, status).await;
        }
        let sink = MemorySink::new();
        (IncidentGuard::new(directory, sink.clone()), incident_id, sink)
    }

    #[tokio::test]
    async fn open_incident_allows_execution() {
        let (guard, incident_id, _) = guard_with(Some(IncidentStatus::Open)).await;
        let decision = guard
            .guard_execution(Some(&incident_id), false, Role::SecurityAnalyst, false)
            .await
            .unwrap();
        assert!(decision.is_allow());
    }

    #[tokio::test]
    async fn missing_incident_denies() {
        let (guard, _, _) = guard_with(None).await;
        let decision = guard
            .guard_execution(None, false, Role::SecurityAnalyst, false)
            .await
            .unwrap();
        assert_eq!(decision.rule_id(), Some("guard.incident_required"));
    }

    #[tokio::test]
    async fn frozen_incident_allows_only_rollback() {
        let (guard, incident_id, _) =
            guard_with(Some(IncidentStatus::ResolvedWithActions)).await;

        let execute = guard
            .guard_execution(Some(&incident_id), false, Role::SecurityAnalyst, false)
            .await
            .unwrap();
        assert_eq!(execute.rule_id(), Some("guard.incident_frozen"));

        let rollback = guard
            .guard_execution(Some(&incident_id), false, Role::SecurityAnalyst, true)
            .await
            .unwrap();
        assert!(rollback.is_allow());
    }

    #[tokio::test]
    async fn emergency_needs_super_admin() {
        let (guard, _, _) = guard_with(None).await;

        let denied = guard
            .guard_execution(None, true, Role::SecurityAnalyst, false)
            .await
            .unwrap();
        assert_eq!(denied.rule_id(), Some("guard.emergency_requires_super_admin"));

        let allowed = guard
            .guard_execution(None, true, Role::SuperAdmin, false)
            .await
            .unwrap();
        assert!(allowed.is_allow());
    }

    #[tokio::test]
    async fn reopen_rules() {
        let (guard, incident_id, sink) = guard_with(Some(IncidentStatus::Closed)).await;
        let admin = UserId::new();

        let short = guard
            .reopen_incident(&incident_id, &admin, Role::SuperAdmin, "because")
            .await
            .unwrap();
        assert_eq!(short.rule_id(), Some("guard.reopen_justification_too_short"));

        let wrong_role = guard
            .reopen_incident(
                &incident_id,
                &admin,
                Role::SecurityAnalyst,
                "legitimate reopen justification",
            )
            .await
            .unwrap();
        assert_eq!(wrong_role.rule_id(), Some("guard.reopen_requires_super_admin"));

        let reopened = guard
            .reopen_incident(
                &incident_id,
                &admin,
                Role::SuperAdmin,
                "follow-up forensics required",
            )
            .await
            .unwrap();
        assert!(reopened.is_allow());
        assert_eq!(sink.records_of("incident_reopened").len(), 1);
        assert_eq!(
            guard.directory().status(&incident_id).await.unwrap(),
            Some(IncidentStatus::Open)
        );
    }
}
