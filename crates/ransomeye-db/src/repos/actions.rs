//! Response-action, approval, and mode persistence for TRE

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use ransomeye_tre::{ActionStore, ApprovalStore, ModeStore, TreError};
use ransomeye_types::{
    ActionId, ApprovalId, ExecutionStatus, HafApproval, ResponseAction, Role, TreMode,
    TreModeRecord, UserId,
};
use sqlx::{PgPool, Row};

use crate::{classify, DbError};
use crate::repos::{enum_from_text, enum_to_text};

fn map_err(error: DbError) -> TreError {
    match error {
        DbError::Fatal(m) => TreError::FatalInvariant(m),
        other => TreError::Store(other.to_string()),
    }
}

fn map_sqlx(error: sqlx::Error) -> TreError {
    map_err(classify(error))
}

/// PostgreSQL-backed response-action store
pub struct PgActionStore {
    pool: PgPool,
}

impl PgActionStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn action_from_row(row: &sqlx::postgres::PgRow) -> Result<ResponseAction, DbError> {
    let command: serde_json::Value = row.try_get("command")?;
    Ok(ResponseAction {
        action_id: ActionId::from_uuid(row.try_get("action_id")?),
        command: serde_json::from_value(command)
            .map_err(|e| DbError::Serialization(e.to_string()))?,
        execution_status: enum_from_text(&row.try_get::<String, _>("execution_status")?)?,
        rollback_capable: row.try_get("rollback_capable")?,
        executed_at: row.try_get("executed_at")?,
        ledger_entry_id: row
            .try_get::<Option<uuid::Uuid>, _>("ledger_entry_id")?
            .map(ransomeye_types::LedgerEntryId::from_uuid),
    })
}

#[async_trait]
impl ActionStore for PgActionStore {
    async fn insert(&self, action: ResponseAction) -> ransomeye_tre::Result<()> {
        let status = enum_to_text(&action.execution_status).map_err(map_err)?;
        let command = serde_json::to_value(&action.command)
            .map_err(|e| TreError::Store(e.to_string()))?;

        sqlx::query(
            "INSERT INTO response_actions \
                (action_id, command, execution_status, rollback_capable, \
                 executed_at, ledger_entry_id) \
             VALUES ($1, $2, $3, $4, $5, $6)",
        )
        .bind(action.action_id.as_uuid())
        .bind(&command)
        .bind(&status)
        .bind(action.rollback_capable)
        .bind(action.executed_at)
        .bind(action.ledger_entry_id.map(|l| *l.as_uuid()))
        .execute(&self.pool)
        .await
        .map_err(map_sqlx)?;
        Ok(())
    }

    async fn get(&self, action_id: &ActionId) -> ransomeye_tre::Result<Option<ResponseAction>> {
        let row = sqlx::query("SELECT * FROM response_actions WHERE action_id = $1")
            .bind(action_id.as_uuid())
            .fetch_optional(&self.pool)
            .await
            .map_err(map_sqlx)?;
        row.map(|r| action_from_row(&r).map_err(map_err)).transpose()
    }

    async fn transition(
        &self,
        action_id: &ActionId,
        next: ExecutionStatus,
        at: DateTime<Utc>,
    ) -> ransomeye_tre::Result<ResponseAction> {
        let mut tx = self.pool.begin().await.map_err(map_sqlx)?;

        let row = sqlx::query(
            "SELECT * FROM response_actions WHERE action_id = $1 FOR UPDATE",
        )
        .bind(action_id.as_uuid())
        .fetch_optional(&mut *tx)
        .await
        .map_err(map_sqlx)?
        .ok_or_else(|| TreError::Store(format!("response action {} not found", action_id)))?;

        let action = action_from_row(&row).map_err(map_err)?;
        if !action.execution_status.can_transition_to(next) {
            return Err(TreError::FatalInvariant(format!(
                "illegal status transition {:?} -> {:?} for action {}",
                action.execution_status, next, action_id
            )));
        }

        let status = enum_to_text(&next).map_err(map_err)?;
        sqlx::query(
            "UPDATE response_actions SET execution_status = $2, executed_at = $3 \
             WHERE action_id = $1",
        )
        .bind(action_id.as_uuid())
        .bind(&status)
        .bind(at)
        .execute(&mut *tx)
        .await
        .map_err(map_sqlx)?;

        tx.commit().await.map_err(map_sqlx)?;

        let mut updated = action;
        updated.execution_status = next;
        updated.executed_at = Some(at);
        Ok(updated)
    }
}

/// PostgreSQL-backed HAF approval store
pub struct PgApprovalStore {
    pool: PgPool,
}

impl PgApprovalStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn approval_from_row(row: &sqlx::postgres::PgRow) -> Result<HafApproval, DbError> {
    Ok(HafApproval {
        approval_id: ApprovalId::from_uuid(row.try_get("approval_id")?),
        action_id: ActionId::from_uuid(row.try_get("action_id")?),
        requested_by_user_id: UserId::from_uuid(row.try_get("requested_by_user_id")?),
        requested_by_role: enum_from_text(
            &row.try_get::<String, _>("requested_by_role")?,
        )?,
        approver_user_id: row
            .try_get::<Option<uuid::Uuid>, _>("approver_user_id")?
            .map(UserId::from_uuid),
        approver_role: row
            .try_get::<Option<String>, _>("approver_role")?
            .as_deref()
            .map(enum_from_text::<Role>)
            .transpose()?,
        approval_status: enum_from_text(&row.try_get::<String, _>("approval_status")?)?,
        created_at: row.try_get("created_at")?,
        approved_at: row.try_get("approved_at")?,
        expires_at: row.try_get("expires_at")?,
        ledger_entry_id: row
            .try_get::<Option<uuid::Uuid>, _>("ledger_entry_id")?
            .map(ransomeye_types::LedgerEntryId::from_uuid),
    })
}

#[async_trait]
impl ApprovalStore for PgApprovalStore {
    async fn latest_for_action(
        &self,
        action_id: &ActionId,
    ) -> ransomeye_tre::Result<Option<HafApproval>> {
        let row = sqlx::query(
            "SELECT * FROM tre_action_approvals WHERE action_id = $1 \
             ORDER BY created_at DESC LIMIT 1",
        )
        .bind(action_id.as_uuid())
        .fetch_optional(&self.pool)
        .await
        .map_err(map_sqlx)?;
        row.map(|r| approval_from_row(&r).map_err(map_err)).transpose()
    }

    async fn insert(&self, approval: HafApproval) -> ransomeye_tre::Result<()> {
        let requested_role = enum_to_text(&approval.requested_by_role).map_err(map_err)?;
        let status = enum_to_text(&approval.approval_status).map_err(map_err)?;
        let approver_role = approval
            .approver_role
            .as_ref()
            .map(enum_to_text)
            .transpose()
            .map_err(map_err)?;

        sqlx::query(
            "INSERT INTO tre_action_approvals ( \
                approval_id, action_id, requested_by_user_id, requested_by_role, \
                approver_user_id, approver_role, approval_status, \
                created_at, approved_at, expires_at, ledger_entry_id \
             ) VALUES ($1,$2,$3,$4,$5,$6,$7,$8,$9,$10,$11)",
        )
        .bind(approval.approval_id.as_uuid())
        .bind(approval.action_id.as_uuid())
        .bind(approval.requested_by_user_id.as_uuid())
        .bind(&requested_role)
        .bind(approval.approver_user_id.map(|u| *u.as_uuid()))
        .bind(&approver_role)
        .bind(&status)
        .bind(approval.created_at)
        .bind(approval.approved_at)
        .bind(approval.expires_at)
        .bind(approval.ledger_entry_id.map(|l| *l.as_uuid()))
        .execute(&self.pool)
        .await
        .map_err(map_sqlx)?;
        Ok(())
    }

    async fn update(&self, approval: HafApproval) -> ransomeye_tre::Result<()> {
        let status = enum_to_text(&approval.approval_status).map_err(map_err)?;
        let approver_role = approval
            .approver_role
            .as_ref()
            .map(enum_to_text)
            .transpose()
            .map_err(map_err)?;

        let result = sqlx::query(
            "UPDATE tre_action_approvals SET \
                approver_user_id = $2, approver_role = $3, approval_status = $4, \
                approved_at = $5 \
             WHERE approval_id = $1",
        )
        .bind(approval.approval_id.as_uuid())
        .bind(approval.approver_user_id.map(|u| *u.as_uuid()))
        .bind(&approver_role)
        .bind(&status)
        .bind(approval.approved_at)
        .execute(&self.pool)
        .await
        .map_err(map_sqlx)?;

        if result.rows_affected() == 0 {
            return Err(TreError::Store(format!(
                "approval {} not found",
                approval.approval_id
            )));
        }
        Ok(())
    }
}

/// PostgreSQL-backed mode store (exactly one active row)
pub struct PgModeStore {
    pool: PgPool,
}

impl PgModeStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ModeStore for PgModeStore {
    async fn active_mode(&self) -> ransomeye_tre::Result<TreMode> {
        let row = sqlx::query(
            "SELECT mode FROM tre_execution_modes WHERE is_active = TRUE \
             ORDER BY changed_at DESC LIMIT 1",
        )
        .fetch_optional(&self.pool)
        .await
        .map_err(map_sqlx)?;

        match row {
            None => Ok(TreMode::DryRun),
            Some(row) => {
                let mode: String = row.try_get("mode").map_err(map_sqlx)?;
                enum_from_text(&mode).map_err(map_err)
            }
        }
    }

    async fn set_active_mode(&self, record: TreModeRecord) -> ransomeye_tre::Result<()> {
        let mode = enum_to_text(&record.mode).map_err(map_err)?;

        let mut tx = self.pool.begin().await.map_err(map_sqlx)?;
        sqlx::query("UPDATE tre_execution_modes SET is_active = FALSE WHERE is_active = TRUE")
            .execute(&mut *tx)
            .await
            .map_err(map_sqlx)?;
        sqlx::query(
            "INSERT INTO tre_execution_modes \
                (mode, is_active, changed_by_user_id, changed_at, reason) \
             VALUES ($1, TRUE, $2, $3, $4)",
        )
        .bind(&mode)
        .bind(record.changed_by_user_id.as_uuid())
        .bind(record.changed_at)
        .bind(&record.reason)
        .execute(&mut *tx)
        .await
        .map_err(map_sqlx)?;
        tx.commit().await.map_err(map_sqlx)?;
        Ok(())
    }
}

/// PostgreSQL-backed attestation store
pub struct PgAttestationStore {
    pool: PgPool,
}

impl PgAttestationStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn attestation_from_row(
    row: &sqlx::postgres::PgRow,
) -> Result<ransomeye_types::IncidentAttestation, DbError> {
    Ok(ransomeye_types::IncidentAttestation {
        attestation_id: ransomeye_types::AttestationId::from_uuid(
            row.try_get("attestation_id")?,
        ),
        incident_id: ransomeye_types::IncidentId::from_uuid(row.try_get("incident_id")?),
        action_id: ActionId::from_uuid(row.try_get("action_id")?),
        executor_user_id: UserId::from_uuid(row.try_get("executor_user_id")?),
        approver_user_id: UserId::from_uuid(row.try_get("approver_user_id")?),
        executor_attested_at: row.try_get("executor_attested_at")?,
        approver_attested_at: row.try_get("approver_attested_at")?,
    })
}

#[async_trait]
impl ransomeye_tre::AttestationStore for PgAttestationStore {
    async fn insert(
        &self,
        attestation: ransomeye_types::IncidentAttestation,
    ) -> ransomeye_tre::Result<()> {
        sqlx::query(
            "INSERT INTO incident_attestations ( \
                attestation_id, incident_id, action_id, executor_user_id, \
                approver_user_id, executor_attested_at, approver_attested_at \
             ) VALUES ($1,$2,$3,$4,$5,$6,$7)",
        )
        .bind(attestation.attestation_id.as_uuid())
        .bind(attestation.incident_id.as_uuid())
        .bind(attestation.action_id.as_uuid())
        .bind(attestation.executor_user_id.as_uuid())
        .bind(attestation.approver_user_id.as_uuid())
        .bind(attestation.executor_attested_at)
        .bind(attestation.approver_attested_at)
        .execute(&self.pool)
        .await
        .map_err(map_sqlx)?;
        Ok(())
    }

    async fn get(
        &self,
        attestation_id: &ransomeye_types::AttestationId,
    ) -> ransomeye_tre::Result<Option<ransomeye_types::IncidentAttestation>> {
        let row = sqlx::query(
            "SELECT * FROM incident_attestations WHERE attestation_id = $1",
        )
        .bind(attestation_id.as_uuid())
        .fetch_optional(&self.pool)
        .await
        .map_err(map_sqlx)?;
        row.map(|r| attestation_from_row(&r).map_err(map_err)).transpose()
    }

    async fn update(
        &self,
        attestation: ransomeye_types::IncidentAttestation,
    ) -> ransomeye_tre::Result<()> {
        let result = sqlx::query(
            "UPDATE incident_attestations SET \
                executor_attested_at = $2, approver_attested_at = $3 \
             WHERE attestation_id = $1",
        )
        .bind(attestation.attestation_id.as_uuid())
        .bind(attestation.executor_attested_at)
        .bind(attestation.approver_attested_at)
        .execute(&self.pool)
        .await
        .map_err(map_sqlx)?;
        if result.rows_affected() == 0 {
            return Err(TreError::Store(format!(
                "attestation {} not found",
                attestation.attestation_id
            )));
        }
        Ok(())
    }

    async fn for_incident(
        &self,
        incident_id: &ransomeye_types::IncidentId,
    ) -> ransomeye_tre::Result<Vec<ransomeye_types::IncidentAttestation>> {
        let rows = sqlx::query(
            "SELECT * FROM incident_attestations WHERE incident_id = $1 \
             ORDER BY attestation_id",
        )
        .bind(incident_id.as_uuid())
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx)?;
        rows.iter()
            .map(|row| attestation_from_row(row).map_err(map_err))
            .collect()
    }
}
