//! TRE execution modes
//!
//! Exactly one mode row is active at any time. Mode changes require
//! `tre:manage_mode` and land in the ledger.

use async_trait::async_trait;
use chrono::Utc;
use ransomeye_types::{
    ActionClassification, DecisionOutcome, TreMode, TreModeRecord, UserId,
};
use serde_json::json;
use std::sync::Arc;
use tokio::sync::RwLock;

use ransomeye_ledger::DecisionSink;
use ransomeye_rbac::PermissionChecker;

use crate::{Result, TreError, COMPONENT};

/// What the active mode permits for a given classification
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ModeBehavior {
    /// Dispatch to the agent at all
    pub execute: bool,
    /// Record a SIMULATED action instead of dispatching
    pub simulate: bool,
    /// A valid HAF approval is mandatory
    pub haf_required: bool,
    /// Blocked outright by the mode
    pub blocked: bool,
}

/// The frozen mode table
pub fn mode_behavior(mode: TreMode, classification: ActionClassification) -> ModeBehavior {
    match (mode, classification) {
        (TreMode::DryRun, _) => ModeBehavior {
            execute: false,
            simulate: true,
            haf_required: false,
            blocked: false,
        },
        (TreMode::GuardedExec, ActionClassification::Safe) => ModeBehavior {
            execute: true,
            simulate: false,
            haf_required: false,
            blocked: false,
        },
        (TreMode::GuardedExec, ActionClassification::Destructive) => ModeBehavior {
            execute: false,
            simulate: false,
            haf_required: false,
            blocked: true,
        },
        (TreMode::FullEnforce, ActionClassification::Safe) => ModeBehavior {
            execute: true,
            simulate: false,
            haf_required: false,
            blocked: false,
        },
        (TreMode::FullEnforce, ActionClassification::Destructive) => ModeBehavior {
            execute: true,
            simulate: false,
            haf_required: true,
            blocked: false,
        },
    }
}

/// Storage for the single active mode row
#[async_trait]
pub trait ModeStore: Send + Sync {
    /// The active mode; a system with no row yet runs DRY_RUN
    async fn active_mode(&self) -> Result<TreMode>;
    async fn set_active_mode(&self, record: TreModeRecord) -> Result<()>;
}

/// In-memory mode store
pub struct MemoryModeStore {
    active: RwLock<Option<TreModeRecord>>,
}

impl MemoryModeStore {
    pub fn new() -> Self {
        Self {
            active: RwLock::new(None),
        }
    }

    pub fn with_mode(mode: TreMode) -> Self {
        Self {
            active: RwLock::new(Some(TreModeRecord {
                mode,
                is_active: true,
                changed_by_user_id: UserId::new(),
                changed_at: Utc::now(),
                reason: None,
            })),
        }
    }
}

impl Default for MemoryModeStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ModeStore for MemoryModeStore {
    async fn active_mode(&self) -> Result<TreMode> {
        Ok(self
            .active
            .read()
            .await
            .as_ref()
            .map(|r| r.mode)
            .unwrap_or(TreMode::DryRun))
    }

    async fn set_active_mode(&self, record: TreModeRecord) -> Result<()> {
        if !record.is_active {
            return Err(TreError::Store(
                "refusing to install an inactive mode row".to_string(),
            ));
        }
        *self.active.write().await = Some(record);
        Ok(())
    }
}

/// Mode management surface
pub struct ModeManager {
    store: Arc<dyn ModeStore>,
    rbac: Arc<PermissionChecker>,
    sink: Arc<dyn DecisionSink>,
}

impl ModeManager {
    pub fn new(
        store: Arc<dyn ModeStore>,
        rbac: Arc<PermissionChecker>,
        sink: Arc<dyn DecisionSink>,
    ) -> Self {
        Self { store, rbac, sink }
    }

    /// Change the active mode. Requires `tre:manage_mode`.
    pub async fn change_mode(
        &self,
        user_id: &UserId,
        mode: TreMode,
        reason: Option<String>,
    ) -> Result<DecisionOutcome> {
        let decision = self.rbac.check_permission(user_id, "tre:manage_mode", None).await?;
        if decision.is_deny() {
            return Ok(decision);
        }

        self.store
            .set_active_mode(TreModeRecord {
                mode,
                is_active: true,
                changed_by_user_id: *user_id,
                changed_at: Utc::now(),
                reason: reason.clone(),
            })
            .await?;

        self.sink.emit(
            COMPONENT,
            "tre_mode_changed",
            json!({"type": "tre_mode", "id": mode.as_str()}),
            json!({"type": "user", "identifier": user_id.to_string()}),
            json!({"mode": mode.as_str(), "reason": reason}),
        )?;

        Ok(DecisionOutcome::Allow)
    }
}
