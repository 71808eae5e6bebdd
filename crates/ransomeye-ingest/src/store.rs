//! Event storage traits and the in-memory implementation
//!
//! The ingest gateway exclusively writes raw events, machine/instance
//! rows, and the validation log. The commit of a VALID event is one
//! transaction: raw event insert, instance chain-state advance, and the
//! validation-log row land together or not at all.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use ransomeye_types::{
    BootId, ComponentInstanceId, EventId, MachineId, RawEvent, ValidationLogEntry,
};
use std::collections::HashMap;
use tokio::sync::RwLock;

use crate::{IngestError, Result};

/// Chain head tracked per component instance
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstanceChainState {
    pub boot_id: BootId,
    pub last_sequence: u64,
    pub last_hash_sha256: String,
}

/// Machine row advanced on every accepted event
#[derive(Debug, Clone)]
pub struct MachineRecord {
    pub machine_id: MachineId,
    pub hostname: String,
    pub first_seen_at: DateTime<Utc>,
    pub last_seen_at: DateTime<Utc>,
}

/// Storage owned by the ingest gateway
#[async_trait]
pub trait EventStore: Send + Sync {
    /// Whether an event id is already persisted (idempotency)
    async fn is_duplicate(&self, event_id: &EventId) -> Result<bool>;

    /// Current chain head for an instance, if any events were accepted
    async fn chain_state(
        &self,
        instance: &ComponentInstanceId,
    ) -> Result<Option<InstanceChainState>>;

    /// Commit a VALID event: raw event, machine upsert, instance chain
    /// advance, and validation-log row, atomically.
    async fn commit_valid_event(
        &self,
        raw: RawEvent,
        log: ValidationLogEntry,
    ) -> Result<()>;

    /// Record a validation failure (no raw event is written)
    async fn record_validation_failure(&self, log: ValidationLogEntry) -> Result<()>;
}

/// In-memory event store for tests and single-process deployments
#[derive(Default)]
pub struct MemoryEventStore {
    inner: RwLock<MemoryInner>,
}

#[derive(Default)]
struct MemoryInner {
    raw_events: Vec<RawEvent>,
    event_ids: HashMap<EventId, usize>,
    instances: HashMap<ComponentInstanceId, InstanceChainState>,
    machines: HashMap<MachineId, MachineRecord>,
    validation_log: Vec<ValidationLogEntry>,
}

impl MemoryEventStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn raw_events(&self) -> Vec<RawEvent> {
        self.inner.read().await.raw_events.clone()
    }

    pub async fn validation_log(&self) -> Vec<ValidationLogEntry> {
        self.inner.read().await.validation_log.clone()
    }

    pub async fn machine(&self, machine_id: &MachineId) -> Option<MachineRecord> {
        self.inner.read().await.machines.get(machine_id).cloned()
    }
}

#[async_trait]
impl EventStore for MemoryEventStore {
    async fn is_duplicate(&self, event_id: &EventId) -> Result<bool> {
        Ok(self.inner.read().await.event_ids.contains_key(event_id))
    }

    async fn chain_state(
        &self,
        instance: &ComponentInstanceId,
    ) -> Result<Option<InstanceChainState>> {
        Ok(self.inner.read().await.instances.get(instance).cloned())
    }

    async fn commit_valid_event(
        &self,
        raw: RawEvent,
        log: ValidationLogEntry,
    ) -> Result<()> {
        let mut inner = self.inner.write().await;
        let envelope = &raw.envelope;

        // duplicate insert is an integrity violation the pipeline should
        // have caught; treat it as fatal, not recoverable
        if inner.event_ids.contains_key(&envelope.event_id) {
            return Err(IngestError::FatalStore(format!(
                "duplicate raw-event insert for {}",
                envelope.event_id
            )));
        }

        let index = inner.raw_events.len();
        inner.event_ids.insert(envelope.event_id, index);

        inner
            .machines
            .entry(envelope.machine_id.clone())
            .and_modify(|m| {
                if envelope.observed_at > m.last_seen_at {
                    m.last_seen_at = envelope.observed_at;
                }
            })
            .or_insert_with(|| MachineRecord {
                machine_id: envelope.machine_id.clone(),
                hostname: envelope.identity.hostname.clone(),
                first_seen_at: envelope.observed_at,
                last_seen_at: envelope.observed_at,
            });

        inner.instances.insert(
            envelope.component_instance_id.clone(),
            InstanceChainState {
                boot_id: envelope.identity.boot_id.clone(),
                last_sequence: envelope.sequence,
                last_hash_sha256: envelope.integrity.hash_sha256.clone(),
            },
        );

        inner.raw_events.push(raw);
        inner.validation_log.push(log);
        Ok(())
    }

    async fn record_validation_failure(&self, log: ValidationLogEntry) -> Result<()> {
        self.inner.write().await.validation_log.push(log);
        Ok(())
    }
}
