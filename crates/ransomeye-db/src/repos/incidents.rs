//! Incident, evidence, and stage-transition persistence for the
//! correlation engine, plus the TRE incident directory

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use ransomeye_correlation::{
    CorrelationError, CorrelationStore, EvidenceContext, DEDUPLICATION_WINDOW_SECS,
};
use ransomeye_tre::{IncidentDirectory, TreError};
use ransomeye_types::{
    BootId, ComponentInstanceId, EventEnvelope, EventId, EventIdentity, EventIntegrity,
    Evidence, Incident, IncidentId, IncidentStatus, KeyId, MachineId, StageTransition,
};
use sqlx::{PgPool, Row};

use crate::{classify, DbError};
use crate::repos::{enum_from_text, enum_to_text};

/// PostgreSQL-backed incident repository
pub struct PgIncidentRepo {
    pool: PgPool,
}

impl PgIncidentRepo {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn map_err(error: DbError) -> CorrelationError {
    match error {
        DbError::Fatal(m) => CorrelationError::FatalInvariant(m),
        other => CorrelationError::Store(other.to_string()),
    }
}

fn map_sqlx(error: sqlx::Error) -> CorrelationError {
    map_err(classify(error))
}

fn incident_from_row(row: &sqlx::postgres::PgRow) -> Result<Incident, DbError> {
    Ok(Incident {
        incident_id: IncidentId::from_uuid(row.try_get("incident_id")?),
        machine_id: MachineId::new(row.try_get::<String, _>("machine_id")?),
        current_stage: enum_from_text(&row.try_get::<String, _>("current_stage")?)?,
        confidence_score: row.try_get("confidence_score")?,
        first_observed_at: row.try_get("first_observed_at")?,
        last_observed_at: row.try_get("last_observed_at")?,
        total_evidence_count: row.try_get::<i64, _>("total_evidence_count")? as u64,
        status: enum_from_text(&row.try_get::<String, _>("status")?)?,
        resolved: row.try_get("resolved")?,
        dedup_key: row.try_get("dedup_key")?,
    })
}

fn envelope_from_row(row: &sqlx::postgres::PgRow) -> Result<EventEnvelope, DbError> {
    Ok(EventEnvelope {
        event_id: EventId::from_uuid(row.try_get("event_id")?),
        machine_id: MachineId::new(row.try_get::<String, _>("machine_id")?),
        component: row.try_get("component")?,
        component_instance_id: ComponentInstanceId::new(
            row.try_get::<String, _>("component_instance_id")?,
        ),
        observed_at: row.try_get("observed_at")?,
        ingested_at: row.try_get("ingested_at")?,
        sequence: row.try_get::<i64, _>("sequence")? as u64,
        payload: row.try_get("payload")?,
        identity: EventIdentity {
            hostname: row.try_get("hostname")?,
            boot_id: BootId::new(row.try_get::<String, _>("boot_id")?),
            agent_version: row.try_get("agent_version")?,
        },
        integrity: EventIntegrity {
            hash_sha256: row.try_get("hash_sha256")?,
            prev_hash_sha256: row.try_get("prev_hash_sha256")?,
        },
        signature: row.try_get("signature")?,
        signing_key_id: row
            .try_get::<Option<String>, _>("signing_key_id")?
            .map(KeyId::new),
    })
}

#[async_trait]
impl CorrelationStore for PgIncidentRepo {
    async fn unprocessed_events(
        &self,
    ) -> ransomeye_correlation::Result<Vec<EventEnvelope>> {
        let rows = sqlx::query(
            "SELECT * FROM raw_events \
             WHERE validation_status = 'VALID' AND correlated = FALSE \
             ORDER BY component_instance_id, sequence",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx)?;

        rows.iter()
            .map(|row| envelope_from_row(row).map_err(map_err))
            .collect()
    }

    async fn mark_processed(&self, event_id: &EventId) -> ransomeye_correlation::Result<()> {
        sqlx::query("UPDATE raw_events SET correlated = TRUE WHERE event_id = $1")
            .bind(event_id.as_uuid())
            .execute(&self.pool)
            .await
            .map_err(map_sqlx)?;
        Ok(())
    }

    async fn linked_incident(
        &self,
        event_id: &EventId,
    ) -> ransomeye_correlation::Result<Option<IncidentId>> {
        let row = sqlx::query("SELECT incident_id FROM evidence WHERE event_id = $1")
            .bind(event_id.as_uuid())
            .fetch_optional(&self.pool)
            .await
            .map_err(map_sqlx)?;
        Ok(row.map(|r| IncidentId::from_uuid(r.get("incident_id"))))
    }

    async fn find_joinable_incident(
        &self,
        machine_id: &MachineId,
        event_time: DateTime<Utc>,
    ) -> ransomeye_correlation::Result<Option<Incident>> {
        let window = Duration::seconds(DEDUPLICATION_WINDOW_SECS);
        let row = sqlx::query(
            "SELECT * FROM incidents \
             WHERE machine_id = $1 AND resolved = FALSE AND status = 'OPEN' \
               AND first_observed_at BETWEEN $2 AND $3 \
             ORDER BY first_observed_at, incident_id LIMIT 1",
        )
        .bind(machine_id.as_str())
        .bind(event_time - window)
        .bind(event_time + window)
        .fetch_optional(&self.pool)
        .await
        .map_err(map_sqlx)?;

        row.map(|r| incident_from_row(&r).map_err(map_err)).transpose()
    }

    async fn evidence_context(
        &self,
        incident_id: &IncidentId,
    ) -> ransomeye_correlation::Result<Vec<EvidenceContext>> {
        let rows = sqlx::query(
            "SELECT e.event_id, e.observed_at, re.payload \
             FROM evidence e \
             LEFT JOIN raw_events re ON e.event_id = re.event_id \
             WHERE e.incident_id = $1 \
             ORDER BY e.observed_at",
        )
        .bind(incident_id.as_uuid())
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx)?;

        rows.iter()
            .map(|row| {
                Ok(EvidenceContext {
                    event_id: EventId::from_uuid(
                        row.try_get("event_id").map_err(map_sqlx)?,
                    ),
                    observed_at: row.try_get("observed_at").map_err(map_sqlx)?,
                    payload: row
                        .try_get::<Option<serde_json::Value>, _>("payload")
                        .map_err(map_sqlx)?
                        .unwrap_or_default(),
                })
            })
            .collect()
    }

    async fn create_incident(
        &self,
        incident: Incident,
        evidence: Evidence,
    ) -> ransomeye_correlation::Result<()> {
        let stage = enum_to_text(&incident.current_stage).map_err(map_err)?;
        let status = enum_to_text(&incident.status).map_err(map_err)?;
        let level = enum_to_text(&evidence.confidence_level).map_err(map_err)?;

        let mut tx = self.pool.begin().await.map_err(map_sqlx)?;

        let linked = sqlx::query("SELECT incident_id FROM evidence WHERE event_id = $1")
            .bind(evidence.event_id.as_uuid())
            .fetch_optional(&mut *tx)
            .await
            .map_err(map_sqlx)?;
        if linked.is_some() {
            return Err(CorrelationError::FatalInvariant(format!(
                "event {} already linked to an incident",
                evidence.event_id
            )));
        }

        sqlx::query(
            "INSERT INTO incidents ( \
                incident_id, machine_id, current_stage, confidence_score, \
                first_observed_at, last_observed_at, total_evidence_count, \
                status, resolved, dedup_key \
             ) VALUES ($1,$2,$3,$4,$5,$6,$7,$8,$9,$10)",
        )
        .bind(incident.incident_id.as_uuid())
        .bind(incident.machine_id.as_str())
        .bind(&stage)
        .bind(incident.confidence_score)
        .bind(incident.first_observed_at)
        .bind(incident.last_observed_at)
        .bind(incident.total_evidence_count as i64)
        .bind(&status)
        .bind(incident.resolved)
        .bind(&incident.dedup_key)
        .execute(&mut *tx)
        .await
        .map_err(map_sqlx)?;

        sqlx::query(
            "INSERT INTO evidence ( \
                incident_id, event_id, evidence_type, confidence_level, \
                confidence_score, observed_at \
             ) VALUES ($1,$2,$3,$4,$5,$6)",
        )
        .bind(evidence.incident_id.as_uuid())
        .bind(evidence.event_id.as_uuid())
        .bind(&evidence.evidence_type)
        .bind(&level)
        .bind(evidence.confidence_score)
        .bind(evidence.observed_at)
        .execute(&mut *tx)
        .await
        .map_err(map_sqlx)?;

        tx.commit().await.map_err(map_sqlx)?;
        Ok(())
    }

    async fn update_incident(
        &self,
        incident: Incident,
        evidence: Evidence,
        transition: Option<StageTransition>,
    ) -> ransomeye_correlation::Result<()> {
        let stage = enum_to_text(&incident.current_stage).map_err(map_err)?;
        let level = enum_to_text(&evidence.confidence_level).map_err(map_err)?;

        let mut tx = self.pool.begin().await.map_err(map_sqlx)?;

        let linked = sqlx::query("SELECT incident_id FROM evidence WHERE event_id = $1")
            .bind(evidence.event_id.as_uuid())
            .fetch_optional(&mut *tx)
            .await
            .map_err(map_sqlx)?;
        if linked.is_some() {
            return Err(CorrelationError::FatalInvariant(format!(
                "event {} already linked to an incident",
                evidence.event_id
            )));
        }

        sqlx::query(
            "UPDATE incidents SET \
                current_stage = $2, confidence_score = $3, \
                total_evidence_count = $4, last_observed_at = $5 \
             WHERE incident_id = $1",
        )
        .bind(incident.incident_id.as_uuid())
        .bind(&stage)
        .bind(incident.confidence_score)
        .bind(incident.total_evidence_count as i64)
        .bind(incident.last_observed_at)
        .execute(&mut *tx)
        .await
        .map_err(map_sqlx)?;

        sqlx::query(
            "INSERT INTO evidence ( \
                incident_id, event_id, evidence_type, confidence_level, \
                confidence_score, observed_at \
             ) VALUES ($1,$2,$3,$4,$5,$6)",
        )
        .bind(evidence.incident_id.as_uuid())
        .bind(evidence.event_id.as_uuid())
        .bind(&evidence.evidence_type)
        .bind(&level)
        .bind(evidence.confidence_score)
        .bind(evidence.observed_at)
        .execute(&mut *tx)
        .await
        .map_err(map_sqlx)?;

        if let Some(transition) = transition {
            let from = enum_to_text(&transition.from_stage).map_err(map_err)?;
            let to = enum_to_text(&transition.to_stage).map_err(map_err)?;
            sqlx::query(
                "INSERT INTO incident_stages ( \
                    incident_id, from_stage, to_stage, transitioned_at, \
                    evidence_count_at_transition, confidence_score_at_transition \
                 ) VALUES ($1,$2,$3,$4,$5,$6)",
            )
            .bind(transition.incident_id.as_uuid())
            .bind(&from)
            .bind(&to)
            .bind(transition.transitioned_at)
            .bind(transition.evidence_count_at_transition as i64)
            .bind(transition.confidence_score_at_transition)
            .execute(&mut *tx)
            .await
            .map_err(map_sqlx)?;
        }

        tx.commit().await.map_err(map_sqlx)?;
        Ok(())
    }

    async fn unresolved_incidents(&self) -> ransomeye_correlation::Result<Vec<Incident>> {
        let rows = sqlx::query(
            "SELECT * FROM incidents WHERE resolved = FALSE ORDER BY incident_id",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx)?;
        rows.iter()
            .map(|row| incident_from_row(row).map_err(map_err))
            .collect()
    }

    async fn stage_transitions(
        &self,
        incident_id: &IncidentId,
    ) -> ransomeye_correlation::Result<Vec<StageTransition>> {
        let rows = sqlx::query(
            "SELECT * FROM incident_stages WHERE incident_id = $1 ORDER BY transitioned_at",
        )
        .bind(incident_id.as_uuid())
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx)?;

        rows.iter()
            .map(|row| {
                Ok(StageTransition {
                    incident_id: IncidentId::from_uuid(
                        row.try_get("incident_id").map_err(map_sqlx)?,
                    ),
                    from_stage: enum_from_text(
                        &row.try_get::<String, _>("from_stage").map_err(map_sqlx)?,
                    )
                    .map_err(map_err)?,
                    to_stage: enum_from_text(
                        &row.try_get::<String, _>("to_stage").map_err(map_sqlx)?,
                    )
                    .map_err(map_err)?,
                    transitioned_at: row.try_get("transitioned_at").map_err(map_sqlx)?,
                    evidence_count_at_transition: row
                        .try_get::<i64, _>("evidence_count_at_transition")
                        .map_err(map_sqlx)? as u64,
                    confidence_score_at_transition: row
                        .try_get("confidence_score_at_transition")
                        .map_err(map_sqlx)?,
                })
            })
            .collect()
    }
}

#[async_trait]
impl IncidentDirectory for PgIncidentRepo {
    async fn status(
        &self,
        incident_id: &IncidentId,
    ) -> ransomeye_tre::Result<Option<IncidentStatus>> {
        let row = sqlx::query("SELECT status FROM incidents WHERE incident_id = $1")
            .bind(incident_id.as_uuid())
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| TreError::Store(e.to_string()))?;
        match row {
            None => Ok(None),
            Some(row) => {
                let status: String = row
                    .try_get("status")
                    .map_err(|e| TreError::Store(e.to_string()))?;
                Ok(Some(enum_from_text(&status).map_err(|e| {
                    TreError::Store(e.to_string())
                })?))
            }
        }
    }

    async fn set_status(
        &self,
        incident_id: &IncidentId,
        status: IncidentStatus,
    ) -> ransomeye_tre::Result<()> {
        let text = enum_to_text(&status).map_err(|e| TreError::Store(e.to_string()))?;
        let result = sqlx::query("UPDATE incidents SET status = $2 WHERE incident_id = $1")
            .bind(incident_id.as_uuid())
            .bind(&text)
            .execute(&self.pool)
            .await
            .map_err(|e| TreError::Store(e.to_string()))?;
        if result.rows_affected() == 0 {
            return Err(TreError::Store(format!("unknown incident {}", incident_id)));
        }
        Ok(())
    }
}
