//! HAF approval lifecycle
//!
//! A destructive action in FULL_ENFORCE needs an APPROVED row. When none
//! exists the pipeline creates a PENDING row (24 h expiry) and returns
//! without dispatching. REJECTED and EXPIRED rows block.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use ransomeye_types::{
    ActionId, ApprovalId, ApprovalStatus, HafApproval, Role, UserId,
};
use std::collections::HashMap;
use tokio::sync::RwLock;

use crate::{Result, TreError};

/// Approvals expire 24 hours after the request
pub const APPROVAL_TTL_HOURS: i64 = 24;

/// Storage for HAF approvals
#[async_trait]
pub trait ApprovalStore: Send + Sync {
    /// The most recent approval row for an action
    async fn latest_for_action(&self, action_id: &ActionId) -> Result<Option<HafApproval>>;

    async fn insert(&self, approval: HafApproval) -> Result<()>;

    async fn update(&self, approval: HafApproval) -> Result<()>;
}

/// Create a new PENDING approval request
pub fn pending_approval(
    action_id: ActionId,
    requested_by: UserId,
    requested_by_role: Role,
    now: DateTime<Utc>,
) -> HafApproval {
    HafApproval {
        approval_id: ApprovalId::new(),
        action_id,
        requested_by_user_id: requested_by,
        requested_by_role,
        approver_user_id: None,
        approver_role: None,
        approval_status: ApprovalStatus::Pending,
        created_at: now,
        approved_at: None,
        expires_at: now + Duration::hours(APPROVAL_TTL_HOURS),
        ledger_entry_id: None,
    }
}

/// Resolve the effective status at `now`: a PENDING or APPROVED row past
/// its expiry reads as EXPIRED.
pub fn effective_status(approval: &HafApproval, now: DateTime<Utc>) -> ApprovalStatus {
    match approval.approval_status {
        ApprovalStatus::Pending | ApprovalStatus::Approved if now > approval.expires_at => {
            ApprovalStatus::Expired
        }
        status => status,
    }
}

/// Record a human decision on a pending approval
pub async fn decide_approval(
    store: &dyn ApprovalStore,
    approval_id: &ApprovalId,
    action_id: &ActionId,
    approver: UserId,
    approver_role: Role,
    approve: bool,
    now: DateTime<Utc>,
) -> Result<HafApproval> {
    let Some(mut approval) = store.latest_for_action(action_id).await? else {
        return Err(TreError::Store(format!(
            "no approval row for action {}",
            action_id
        )));
    };
    if &approval.approval_id != approval_id {
        return Err(TreError::Store(format!(
            "approval {} is not the latest for action {}",
            approval_id, action_id
        )));
    }
    if effective_status(&approval, now) != ApprovalStatus::Pending {
        return Err(TreError::Store(format!(
            "approval {} is not pending",
            approval_id
        )));
    }

    approval.approver_user_id = Some(approver);
    approval.approver_role = Some(approver_role);
    approval.approval_status = if approve {
        ApprovalStatus::Approved
    } else {
        ApprovalStatus::Rejected
    };
    approval.approved_at = Some(now);
    store.update(approval.clone()).await?;
    Ok(approval)
}

/// In-memory approval store
#[derive(Default)]
pub struct MemoryApprovalStore {
    by_action: RwLock<HashMap<ActionId, Vec<HafApproval>>>,
}

impl MemoryApprovalStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ApprovalStore for MemoryApprovalStore {
    async fn latest_for_action(&self, action_id: &ActionId) -> Result<Option<HafApproval>> {
        Ok(self
            .by_action
            .read()
            .await
            .get(action_id)
            .and_then(|rows| rows.last().cloned()))
    }

    async fn insert(&self, approval: HafApproval) -> Result<()> {
        self.by_action
            .write()
            .await
            .entry(approval.action_id)
            .or_default()
            .push(approval);
        Ok(())
    }

    async fn update(&self, approval: HafApproval) -> Result<()> {
        let mut map = self.by_action.write().await;
        let rows = map.entry(approval.action_id).or_default();
        match rows.iter_mut().find(|r| r.approval_id == approval.approval_id) {
            Some(row) => {
                *row = approval;
                Ok(())
            }
            None => Err(TreError::Store(format!(
                "approval {} not found",
                approval.approval_id
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn now() -> DateTime<Utc> {
        "2026-01-10T12:00:00Z".parse().unwrap()
    }

    #[tokio::test]
    async fn approve_flow() {
        let store = MemoryApprovalStore::new();
        let action_id = ActionId::new();
        let pending = pending_approval(action_id, UserId::new(), Role::SecurityAnalyst, now());
        store.insert(pending.clone()).await.unwrap();

        let approved = decide_approval(
            &store,
            &pending.approval_id,
            &action_id,
            UserId::new(),
            Role::SuperAdmin,
            true,
            now() + Duration::hours(1),
        )
        .await
        .unwrap();

        assert_eq!(approved.approval_status, ApprovalStatus::Approved);
        assert!(approved.is_valid_at(now() + Duration::hours(2)));
        assert!(!approved.is_valid_at(now() + Duration::hours(25)));
    }

    #[tokio::test]
    async fn pending_rows_expire() {
        let pending =
            pending_approval(ActionId::new(), UserId::new(), Role::SecurityAnalyst, now());
        assert_eq!(effective_status(&pending, now()), ApprovalStatus::Pending);
        assert_eq!(
            effective_status(&pending, now() + Duration::hours(25)),
            ApprovalStatus::Expired
        );
    }

    #[tokio::test]
    async fn deciding_an_expired_row_fails() {
        let store = MemoryApprovalStore::new();
        let action_id = ActionId::new();
        let pending = pending_approval(action_id, UserId::new(), Role::SecurityAnalyst, now());
        store.insert(pending.clone()).await.unwrap();

        let result = decide_approval(
            &store,
            &pending.approval_id,
            &action_id,
            UserId::new(),
            Role::SuperAdmin,
            true,
            now() + Duration::hours(30),
        )
        .await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn rejection_sticks() {
        let store = MemoryApprovalStore::new();
        let action_id = ActionId::new();
        let pending = pending_approval(action_id, UserId::new(), Role::SecurityAnalyst, now());
        store.insert(pending.clone()).await.unwrap();

        decide_approval(
            &store,
            &pending.approval_id,
            &action_id,
            UserId::new(),
            Role::SuperAdmin,
            false,
            now(),
        )
        .await
        .unwrap();

        let latest = store.latest_for_action(&action_id).await.unwrap().unwrap();
        assert_eq!(latest.approval_status, ApprovalStatus::Rejected);
    }
}
