//! Raw-event, machine, and instance persistence for the ingest gateway

use async_trait::async_trait;
use ransomeye_ingest::{EventStore, IngestError, InstanceChainState};
use ransomeye_types::{
    BootId, ComponentInstanceId, EventId, RawEvent, ValidationLogEntry,
};
use sqlx::{PgPool, Row};

use crate::{classify, DbError};
use crate::repos::enum_to_text;

/// PostgreSQL-backed event store
pub struct PgEventStore {
    pool: PgPool,
}

impl PgEventStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn map_err(error: DbError) -> IngestError {
    match error {
        DbError::Fatal(m) => IngestError::FatalStore(m),
        other => IngestError::Store(other.to_string()),
    }
}

fn map_sqlx(error: sqlx::Error) -> IngestError {
    map_err(classify(error))
}

#[async_trait]
impl EventStore for PgEventStore {
    async fn is_duplicate(&self, event_id: &EventId) -> ransomeye_ingest::Result<bool> {
        let row = sqlx::query("SELECT 1 FROM raw_events WHERE event_id = $1")
            .bind(event_id.as_uuid())
            .fetch_optional(&self.pool)
            .await
            .map_err(map_sqlx)?;
        Ok(row.is_some())
    }

    async fn chain_state(
        &self,
        instance: &ComponentInstanceId,
    ) -> ransomeye_ingest::Result<Option<InstanceChainState>> {
        let row = sqlx::query(
            "SELECT boot_id, last_sequence, last_hash_sha256 \
             FROM component_instances WHERE component_instance_id = $1",
        )
        .bind(instance.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(map_sqlx)?;

        match row {
            None => Ok(None),
            Some(row) => {
                let boot_id: String = row.try_get("boot_id").map_err(map_sqlx)?;
                let last_sequence: i64 = row.try_get("last_sequence").map_err(map_sqlx)?;
                let last_hash: String =
                    row.try_get("last_hash_sha256").map_err(map_sqlx)?;
                Ok(Some(InstanceChainState {
                    boot_id: BootId::new(boot_id),
                    last_sequence: last_sequence as u64,
                    last_hash_sha256: last_hash,
                }))
            }
        }
    }

    async fn commit_valid_event(
        &self,
        raw: RawEvent,
        log: ValidationLogEntry,
    ) -> ransomeye_ingest::Result<()> {
        let envelope = &raw.envelope;
        let status =
            enum_to_text(&raw.validation_status).map_err(map_err)?;
        let log_status =
            enum_to_text(&log.validation_status).map_err(map_err)?;

        let mut tx = self.pool.begin().await.map_err(map_sqlx)?;
        sqlx::query("SET TRANSACTION ISOLATION LEVEL READ COMMITTED")
            .execute(&mut *tx)
            .await
            .map_err(map_sqlx)?;

        sqlx::query(
            "INSERT INTO raw_events ( \
                event_id, machine_id, component, component_instance_id, \
                observed_at, ingested_at, sequence, payload, \
                hostname, boot_id, agent_version, \
                hash_sha256, prev_hash_sha256, signature, signing_key_id, \
                validation_status, late_arrival, arrival_latency_seconds \
             ) VALUES ($1,$2,$3,$4,$5,$6,$7,$8,$9,$10,$11,$12,$13,$14,$15,$16,$17,$18)",
        )
        .bind(envelope.event_id.as_uuid())
        .bind(envelope.machine_id.as_str())
        .bind(&envelope.component)
        .bind(envelope.component_instance_id.as_str())
        .bind(envelope.observed_at)
        .bind(envelope.ingested_at)
        .bind(envelope.sequence as i64)
        .bind(&envelope.payload)
        .bind(&envelope.identity.hostname)
        .bind(envelope.identity.boot_id.as_str())
        .bind(&envelope.identity.agent_version)
        .bind(&envelope.integrity.hash_sha256)
        .bind(&envelope.integrity.prev_hash_sha256)
        .bind(&envelope.signature)
        .bind(envelope.signing_key_id.as_ref().map(|k| k.as_str()))
        .bind(&status)
        .bind(raw.late_arrival)
        .bind(raw.arrival_latency_seconds)
        .execute(&mut *tx)
        .await
        .map_err(map_sqlx)?;

        sqlx::query(
            "INSERT INTO machines (machine_id, hostname, first_seen_at, last_seen_at) \
             VALUES ($1, $2, $3, $3) \
             ON CONFLICT (machine_id) DO UPDATE \
             SET last_seen_at = GREATEST(machines.last_seen_at, EXCLUDED.last_seen_at)",
        )
        .bind(envelope.machine_id.as_str())
        .bind(&envelope.identity.hostname)
        .bind(envelope.observed_at)
        .execute(&mut *tx)
        .await
        .map_err(map_sqlx)?;

        sqlx::query(
            "INSERT INTO component_instances \
                (component_instance_id, machine_id, component, boot_id, \
                 last_sequence, last_hash_sha256) \
             VALUES ($1, $2, $3, $4, $5, $6) \
             ON CONFLICT (component_instance_id) DO UPDATE \
             SET boot_id = EXCLUDED.boot_id, \
                 last_sequence = EXCLUDED.last_sequence, \
                 last_hash_sha256 = EXCLUDED.last_hash_sha256",
        )
        .bind(envelope.component_instance_id.as_str())
        .bind(envelope.machine_id.as_str())
        .bind(&envelope.component)
        .bind(envelope.identity.boot_id.as_str())
        .bind(envelope.sequence as i64)
        .bind(&envelope.integrity.hash_sha256)
        .execute(&mut *tx)
        .await
        .map_err(map_sqlx)?;

        sqlx::query(
            "INSERT INTO event_validation_log \
                (event_id, validation_status, validation_timestamp, details) \
             VALUES ($1, $2, $3, $4)",
        )
        .bind(log.event_id.as_uuid())
        .bind(&log_status)
        .bind(log.validation_timestamp)
        .bind(&log.details)
        .execute(&mut *tx)
        .await
        .map_err(map_sqlx)?;

        tx.commit().await.map_err(map_sqlx)?;
        Ok(())
    }

    async fn record_validation_failure(
        &self,
        log: ValidationLogEntry,
    ) -> ransomeye_ingest::Result<()> {
        let status = enum_to_text(&log.validation_status).map_err(map_err)?;
        sqlx::query(
            "INSERT INTO event_validation_log \
                (event_id, validation_status, validation_timestamp, details) \
             VALUES ($1, $2, $3, $4)",
        )
        .bind(log.event_id.as_uuid())
        .bind(&status)
        .bind(log.validation_timestamp)
        .bind(&log.details)
        .execute(&self.pool)
        .await
        .map_err(map_sqlx)?;
        Ok(())
    }
}
