//! Response-action records and their status discipline

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use ransomeye_types::{ActionId, ExecutionStatus, ResponseAction};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::{Result, TreError};

/// Storage for dispatched response actions. TRE is the only writer.
#[async_trait]
pub trait ActionStore: Send + Sync {
    async fn insert(&self, action: ResponseAction) -> Result<()>;
    async fn get(&self, action_id: &ActionId) -> Result<Option<ResponseAction>>;
    /// Transition an action's status. Illegal transitions are fatal: they
    /// mean the pipeline's state machine was bypassed.
    async fn transition(
        &self,
        action_id: &ActionId,
        next: ExecutionStatus,
        at: DateTime<Utc>,
    ) -> Result<ResponseAction>;
}

/// In-memory action store
#[derive(Default)]
pub struct MemoryActionStore {
    rows: RwLock<HashMap<ActionId, ResponseAction>>,
}

impl MemoryActionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn shared() -> Arc<Self> {
        Arc::new(Self::new())
    }

    pub async fn all(&self) -> Vec<ResponseAction> {
        let mut rows: Vec<ResponseAction> =
            self.rows.read().await.values().cloned().collect();
        rows.sort_by_key(|a| a.action_id.to_string());
        rows
    }
}

#[async_trait]
impl ActionStore for MemoryActionStore {
    async fn insert(&self, action: ResponseAction) -> Result<()> {
        let mut rows = self.rows.write().await;
        if rows.contains_key(&action.action_id) {
            return Err(TreError::FatalInvariant(format!(
                "duplicate response action {}",
                action.action_id
            )));
        }
        rows.insert(action.action_id, action);
        Ok(())
    }

    async fn get(&self, action_id: &ActionId) -> Result<Option<ResponseAction>> {
        Ok(self.rows.read().await.get(action_id).cloned())
    }

    async fn transition(
        &self,
        action_id: &ActionId,
        next: ExecutionStatus,
        at: DateTime<Utc>,
    ) -> Result<ResponseAction> {
        let mut rows = self.rows.write().await;
        let action = rows.get_mut(action_id).ok_or_else(|| {
            TreError::Store(format!("response action {} not found", action_id))
        })?;

        if !action.execution_status.can_transition_to(next) {
            return Err(TreError::FatalInvariant(format!(
                "illegal status transition {:?} -> {:?} for action {}",
                action.execution_status, next, action_id
            )));
        }

        action.execution_status = next;
        action.executed_at = Some(at);
        Ok(action.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ransomeye_types::{
        ActionType, CommandId, CommandTarget, IncidentId, IssuingAuthority, PolicyId, Role,
        SignedCommand, TreMode, UserId,
    };

    fn action(status: ExecutionStatus) -> ResponseAction {
        let now = Utc::now();
        ResponseAction {
            action_id: ActionId::new(),
            command: SignedCommand {
                command_id: CommandId::new(),
                action_type: ActionType::BlockProcess,
                target: CommandTarget::process("host-1", 42),
                incident_id: Some(IncidentId::new()),
                tre_mode: TreMode::FullEnforce,
                issued_by_user_id: UserId::new(),
                issued_by_role: Role::SecurityAnalyst,
                approval_id: None,
                issued_at: now,
                expires_at: now + chrono::Duration::hours(1),
                rollback_token: "0".repeat(64),
                policy_id: PolicyId::new(),
                policy_version: "1.0".to_string(),
                issuing_authority: IssuingAuthority::ThreatResponseEngine,
                signature: None,
                signing_key_id: None,
                signing_algorithm: None,
                signed_at: None,
            },
            execution_status: status,
            rollback_capable: true,
            executed_at: None,
            ledger_entry_id: None,
        }
    }

    #[tokio::test]
    async fn legal_lifecycle() {
        let store = MemoryActionStore::new();
        let pending = action(ExecutionStatus::Pending);
        let action_id = pending.action_id;
        store.insert(pending).await.unwrap();

        let succeeded = store
            .transition(&action_id, ExecutionStatus::Succeeded, Utc::now())
            .await
            .unwrap();
        assert_eq!(succeeded.execution_status, ExecutionStatus::Succeeded);

        let rolled_back = store
            .transition(&action_id, ExecutionStatus::RolledBack, Utc::now())
            .await
            .unwrap();
        assert_eq!(rolled_back.execution_status, ExecutionStatus::RolledBack);
    }

    #[tokio::test]
    async fn illegal_transition_is_fatal() {
        let store = MemoryActionStore::new();
        let simulated = action(ExecutionStatus::Simulated);
        let action_id = simulated.action_id;
        store.insert(simulated).await.unwrap();

        let result = store
            .transition(&action_id, ExecutionStatus::Succeeded, Utc::now())
            .await;
        assert!(matches!(result, Err(TreError::FatalInvariant(_))));
    }

    #[tokio::test]
    async fn duplicate_insert_is_fatal() {
        let store = MemoryActionStore::new();
        let row = action(ExecutionStatus::Pending);
        store.insert(row.clone()).await.unwrap();
        assert!(matches!(
            store.insert(row).await,
            Err(TreError::FatalInvariant(_))
        ));
    }
}
