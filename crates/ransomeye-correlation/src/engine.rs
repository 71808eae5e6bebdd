//! The batch correlator and its storage seam

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use ransomeye_types::{
    ConfidenceLevel, EventEnvelope, EventId, Evidence, Incident, IncidentId, IncidentStage,
    IncidentStatus, MachineId, StageTransition,
};
use sha2::{Digest, Sha256};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::{
    accumulate_confidence, apply_contradiction_decay, deduplication_key,
    detect_contradiction, evaluate_event, should_transition, stage_for_confidence,
    within_deduplication_window, CorrelationError, EvidenceContext, Result,
};

/// Incident ids derive from the triggering event id, so repeated runs over
/// the same event log produce identical incident rows.
pub fn derive_incident_id(event_id: &EventId) -> IncidentId {
    let digest = Sha256::digest(event_id.as_uuid().as_bytes());
    let mut bytes = [0u8; 16];
    bytes.copy_from_slice(&digest[..16]);
    IncidentId::from_uuid(Uuid::from_bytes(bytes))
}

/// Storage owned exclusively by the correlation engine
#[async_trait]
pub trait CorrelationStore: Send + Sync {
    /// VALID events not yet examined, in arbitrary order (the engine sorts)
    async fn unprocessed_events(&self) -> Result<Vec<EventEnvelope>>;

    async fn mark_processed(&self, event_id: &EventId) -> Result<()>;

    /// The incident an event is linked to, if any
    async fn linked_incident(&self, event_id: &EventId) -> Result<Option<IncidentId>>;

    /// An unresolved incident on the machine whose first observation is
    /// within the join window of `event_time`
    async fn find_joinable_incident(
        &self,
        machine_id: &MachineId,
        event_time: DateTime<Utc>,
    ) -> Result<Option<Incident>>;

    async fn evidence_context(&self, incident_id: &IncidentId)
        -> Result<Vec<EvidenceContext>>;

    /// Create an incident with its first evidence row. A second link for
    /// an already-linked event is a fatal invariant violation.
    async fn create_incident(&self, incident: Incident, evidence: Evidence) -> Result<()>;

    /// Apply an update produced by evidence accumulation
    async fn update_incident(
        &self,
        incident: Incident,
        evidence: Evidence,
        transition: Option<StageTransition>,
    ) -> Result<()>;

    async fn unresolved_incidents(&self) -> Result<Vec<Incident>>;

    async fn stage_transitions(&self, incident_id: &IncidentId)
        -> Result<Vec<StageTransition>>;
}

/// Counters for one correlation pass
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct BatchReport {
    pub events_examined: usize,
    pub incidents_created: usize,
    pub evidence_linked: usize,
    pub contradictions_applied: usize,
    pub events_skipped: usize,
}

/// The deterministic batch correlator
pub struct CorrelationEngine {
    store: Arc<dyn CorrelationStore>,
}

impl CorrelationEngine {
    pub fn new(store: Arc<dyn CorrelationStore>) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &Arc<dyn CorrelationStore> {
        &self.store
    }

    /// One pass over all unprocessed events, ordered by
    /// `(component_instance_id, sequence)`
    pub async fn correlate_pending(&self) -> Result<BatchReport> {
        let mut events = self.store.unprocessed_events().await?;
        events.sort_by(|a, b| {
            (a.component_instance_id.as_str(), a.sequence)
                .cmp(&(b.component_instance_id.as_str(), b.sequence))
        });

        let mut report = BatchReport::default();
        for event in events {
            self.process_event(event, &mut report).await?;
        }
        Ok(report)
    }

    async fn process_event(
        &self,
        event: EventEnvelope,
        report: &mut BatchReport,
    ) -> Result<()> {
        report.events_examined += 1;

        // idempotency: an already-linked event is never re-scored
        if self.store.linked_incident(&event.event_id).await?.is_some() {
            self.store.mark_processed(&event.event_id).await?;
            report.events_skipped += 1;
            return Ok(());
        }

        let Some(outcome) = evaluate_event(&event) else {
            self.store.mark_processed(&event.event_id).await?;
            report.events_skipped += 1;
            return Ok(());
        };

        let dedup_key = deduplication_key(&event.machine_id, &event.payload);
        let joinable = self
            .store
            .find_joinable_incident(&event.machine_id, event.observed_at)
            .await?;

        match joinable {
            Some(incident) => {
                let existing = self.store.evidence_context(&incident.incident_id).await?;
                let contradiction = detect_contradiction(&event, &existing);

                let mut new_confidence = accumulate_confidence(
                    incident.confidence_score,
                    outcome.confidence_contribution,
                );
                let mut transition = None;
                let new_stage;

                if let Some(contradiction_type) = contradiction {
                    // decay applies after accumulation; escalation is
                    // blocked but the stage never downgrades
                    new_confidence = apply_contradiction_decay(new_confidence);
                    new_stage = incident.current_stage;
                    report.contradictions_applied += 1;
                    tracing::info!(
                        incident_id = %incident.incident_id,
                        contradiction_type,
                        confidence = new_confidence,
                        "contradiction decay applied"
                    );
                } else {
                    let proposed = stage_for_confidence(new_confidence);
                    if should_transition(incident.current_stage, proposed) {
                        transition = Some(StageTransition {
                            incident_id: incident.incident_id,
                            from_stage: incident.current_stage,
                            to_stage: proposed,
                            transitioned_at: event.observed_at,
                            evidence_count_at_transition: incident.total_evidence_count + 1,
                            confidence_score_at_transition: new_confidence,
                        });
                        new_stage = proposed;
                    } else {
                        new_stage = incident.current_stage;
                    }
                }

                let evidence = Evidence {
                    incident_id: incident.incident_id,
                    event_id: event.event_id,
                    evidence_type: outcome.evidence_type,
                    confidence_level: ConfidenceLevel::from_score(
                        outcome.confidence_contribution,
                    ),
                    confidence_score: outcome.confidence_contribution,
                    observed_at: event.observed_at,
                };

                let mut updated = incident.clone();
                updated.confidence_score = new_confidence;
                updated.current_stage = new_stage;
                updated.total_evidence_count += 1;
                if event.observed_at > updated.last_observed_at {
                    updated.last_observed_at = event.observed_at;
                }

                self.store.update_incident(updated, evidence, transition).await?;
                report.evidence_linked += 1;
            }
            None => {
                let incident_id = derive_incident_id(&event.event_id);
                let incident = Incident {
                    incident_id,
                    machine_id: event.machine_id.clone(),
                    current_stage: outcome.stage,
                    confidence_score: outcome.confidence_contribution,
                    first_observed_at: event.observed_at,
                    last_observed_at: event.observed_at,
                    total_evidence_count: 1,
                    status: IncidentStatus::Open,
                    resolved: false,
                    dedup_key: Some(dedup_key),
                };
                let evidence = Evidence {
                    incident_id,
                    event_id: event.event_id,
                    evidence_type: outcome.evidence_type,
                    confidence_level: ConfidenceLevel::from_score(
                        outcome.confidence_contribution,
                    ),
                    confidence_score: outcome.confidence_contribution,
                    observed_at: event.observed_at,
                };

                self.store.create_incident(incident, evidence).await?;
                report.incidents_created += 1;
                report.evidence_linked += 1;
            }
        }

        self.store.mark_processed(&event.event_id).await?;
        Ok(())
    }
}

/// In-memory correlation store
#[derive(Default)]
pub struct MemoryCorrelationStore {
    inner: RwLock<MemoryInner>,
}

#[derive(Default)]
struct MemoryInner {
    pending_events: Vec<EventEnvelope>,
    processed: HashSet<EventId>,
    incidents: HashMap<IncidentId, Incident>,
    evidence: Vec<Evidence>,
    evidence_by_event: HashMap<EventId, IncidentId>,
    evidence_payloads: HashMap<EventId, serde_json::Value>,
    transitions: Vec<StageTransition>,
}

impl MemoryCorrelationStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed VALID events awaiting correlation
    pub async fn seed_events(&self, events: Vec<EventEnvelope>) {
        self.inner.write().await.pending_events.extend(events);
    }

    pub async fn incidents(&self) -> Vec<Incident> {
        let mut incidents: Vec<Incident> =
            self.inner.read().await.incidents.values().cloned().collect();
        incidents.sort_by_key(|i| i.incident_id.to_string());
        incidents
    }

    pub async fn evidence(&self) -> Vec<Evidence> {
        self.inner.read().await.evidence.clone()
    }

    pub async fn transitions(&self) -> Vec<StageTransition> {
        self.inner.read().await.transitions.clone()
    }
}

#[async_trait]
impl CorrelationStore for MemoryCorrelationStore {
    async fn unprocessed_events(&self) -> Result<Vec<EventEnvelope>> {
        let inner = self.inner.read().await;
        Ok(inner
            .pending_events
            .iter()
            .filter(|e| !inner.processed.contains(&e.event_id))
            .cloned()
            .collect())
    }

    async fn mark_processed(&self, event_id: &EventId) -> Result<()> {
        self.inner.write().await.processed.insert(*event_id);
        Ok(())
    }

    async fn linked_incident(&self, event_id: &EventId) -> Result<Option<IncidentId>> {
        Ok(self.inner.read().await.evidence_by_event.get(event_id).copied())
    }

    async fn find_joinable_incident(
        &self,
        machine_id: &MachineId,
        event_time: DateTime<Utc>,
    ) -> Result<Option<Incident>> {
        let inner = self.inner.read().await;
        let mut candidates: Vec<&Incident> = inner
            .incidents
            .values()
            .filter(|i| {
                !i.resolved
                    && i.status == IncidentStatus::Open
                    && &i.machine_id == machine_id
                    && within_deduplication_window(i.first_observed_at, event_time)
            })
            .collect();
        // deterministic choice: earliest first observation, then id
        candidates.sort_by(|a, b| {
            (a.first_observed_at, a.incident_id.to_string())
                .cmp(&(b.first_observed_at, b.incident_id.to_string()))
        });
        Ok(candidates.first().map(|i| (*i).clone()))
    }

    async fn evidence_context(
        &self,
        incident_id: &IncidentId,
    ) -> Result<Vec<EvidenceContext>> {
        let inner = self.inner.read().await;
        Ok(inner
            .evidence
            .iter()
            .filter(|e| &e.incident_id == incident_id)
            .map(|e| EvidenceContext {
                event_id: e.event_id,
                observed_at: e.observed_at,
                payload: inner
                    .evidence_payloads
                    .get(&e.event_id)
                    .cloned()
                    .unwrap_or_default(),
            })
            .collect())
    }

    async fn create_incident(&self, incident: Incident, evidence: Evidence) -> Result<()> {
        let mut inner = self.inner.write().await;
        if let Some(existing) = inner.evidence_by_event.get(&evidence.event_id) {
            return Err(CorrelationError::FatalInvariant(format!(
                "event {} already linked to incident {}",
                evidence.event_id, existing
            )));
        }
        if inner.incidents.contains_key(&incident.incident_id) {
            return Err(CorrelationError::FatalInvariant(format!(
                "duplicate incident creation: {}",
                incident.incident_id
            )));
        }

        let payload = inner
            .pending_events
            .iter()
            .find(|e| e.event_id == evidence.event_id)
            .map(|e| e.payload.clone())
            .unwrap_or_default();

        inner.evidence_by_event.insert(evidence.event_id, incident.incident_id);
        inner.evidence_payloads.insert(evidence.event_id, payload);
        inner.incidents.insert(incident.incident_id, incident);
        inner.evidence.push(evidence);
        Ok(())
    }

    async fn update_incident(
        &self,
        incident: Incident,
        evidence: Evidence,
        transition: Option<StageTransition>,
    ) -> Result<()> {
        let mut inner = self.inner.write().await;
        if let Some(existing) = inner.evidence_by_event.get(&evidence.event_id) {
            return Err(CorrelationError::FatalInvariant(format!(
                "event {} already linked to incident {}",
                evidence.event_id, existing
            )));
        }

        let payload = inner
            .pending_events
            .iter()
            .find(|e| e.event_id == evidence.event_id)
            .map(|e| e.payload.clone())
            .unwrap_or_default();

        inner.evidence_by_event.insert(evidence.event_id, incident.incident_id);
        inner.evidence_payloads.insert(evidence.event_id, payload);
        inner.incidents.insert(incident.incident_id, incident);
        inner.evidence.push(evidence);
        if let Some(transition) = transition {
            inner.transitions.push(transition);
        }
        Ok(())
    }

    async fn unresolved_incidents(&self) -> Result<Vec<Incident>> {
        let inner = self.inner.read().await;
        let mut incidents: Vec<Incident> = inner
            .incidents
            .values()
            .filter(|i| !i.resolved)
            .cloned()
            .collect();
        incidents.sort_by_key(|i| i.incident_id.to_string());
        Ok(incidents)
    }

    async fn stage_transitions(
        &self,
        incident_id: &IncidentId,
    ) -> Result<Vec<StageTransition>> {
        Ok(self
            .inner
            .read()
            .await
            .transitions
            .iter()
            .filter(|t| &t.incident_id == incident_id)
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ransomeye_types::{BootId, ComponentInstanceId, EventIdentity, EventIntegrity};
    use serde_json::{json, Value};

    fn event(
        instance: &str,
        sequence: u64,
        at: &str,
        payload: Value,
    ) -> EventEnvelope {
        EventEnvelope {
            event_id: EventId::new(),
            machine_id: MachineId::new("host-1"),
            component: "linux_agent".to_string(),
            component_instance_id: ComponentInstanceId::new(instance),
            observed_at: at.parse().unwrap(),
            ingested_at: at.parse().unwrap(),
            sequence,
            payload,
            identity: EventIdentity {
                hostname: "host-1".to_string(),
                boot_id: BootId::new("boot-1"),
                agent_version: "1.0.0".to_string(),
            },
            integrity: EventIntegrity {
                hash_sha256: "0".repeat(64),
                prev_hash_sha256: None,
            },
            signature: None,
            signing_key_id: None,
        }
    }

    async fn run(events: Vec<EventEnvelope>) -> (Arc<MemoryCorrelationStore>, BatchReport) {
        let store = Arc::new(MemoryCorrelationStore::new());
        store.seed_events(events).await;
        let engine = CorrelationEngine::new(store.clone());
        let report = engine.correlate_pending().await.unwrap();
        (store, report)
    }

    #[tokio::test]
    async fn happy_path_creates_suspicious_incident() {
        // process start, suspicious child, file write: only the child scores
        let events = vec![
            event("a-1", 1, "2026-01-10T12:00:00Z", json!({"kind": "process_start"})),
            event(
                "a-1",
                2,
                "2026-01-10T12:00:05Z",
                json!({"kind": "suspicious_child", "process_id": 42, "parent_pid": 7}),
            ),
            event("a-1", 3, "2026-01-10T12:00:10Z", json!({"kind": "file_write"})),
        ];
        let (store, report) = run(events).await;

        assert_eq!(report.incidents_created, 1);
        let incidents = store.incidents().await;
        assert_eq!(incidents.len(), 1);
        let incident = &incidents[0];
        assert_eq!(incident.current_stage, IncidentStage::Suspicious);
        assert_eq!(incident.confidence_score, 25.0);
        assert_eq!(incident.total_evidence_count, 1);
        assert_eq!(
            incident.first_observed_at,
            "2026-01-10T12:00:05Z".parse::<DateTime<Utc>>().unwrap()
        );
    }

    #[tokio::test]
    async fn accumulation_escalates_with_event_derived_timestamps() {
        let events = vec![
            event(
                "a-1",
                1,
                "2026-01-10T12:00:00Z",
                json!({"kind": "suspicious_child", "process_id": 42, "parent_pid": 7}),
            ),
            event(
                "a-1",
                2,
                "2026-01-10T12:05:00Z",
                json!({"kind": "entropy_spike", "process_id": 42, "parent_pid": 7}),
            ),
        ];
        let (store, _) = run(events).await;

        let incidents = store.incidents().await;
        assert_eq!(incidents.len(), 1);
        let incident = &incidents[0];
        // 25 + 35 = 60 => PROBABLE
        assert_eq!(incident.confidence_score, 60.0);
        assert_eq!(incident.current_stage, IncidentStage::Probable);

        let transitions = store.transitions().await;
        assert_eq!(transitions.len(), 1);
        assert_eq!(transitions[0].to_stage, IncidentStage::Probable);
        assert_eq!(
            transitions[0].transitioned_at,
            "2026-01-10T12:05:00Z".parse::<DateTime<Utc>>().unwrap()
        );
    }

    #[tokio::test]
    async fn contradiction_blocks_escalation() {
        // 25 + 35 = 60 (PROBABLE), then +35 would hit 95 (CONFIRMED), but
        // the third event contradicts the first (same pid, other parent)
        let events = vec![
            event(
                "a-1",
                1,
                "2026-01-10T12:00:00Z",
                json!({"kind": "suspicious_child", "process_id": 42, "parent_pid": 7}),
            ),
            event(
                "a-1",
                2,
                "2026-01-10T12:01:00Z",
                json!({"kind": "entropy_spike", "process_id": 99}),
            ),
            event(
                "a-1",
                3,
                "2026-01-10T12:02:00Z",
                json!({"kind": "entropy_spike", "process_id": 42, "parent_pid": 9}),
            ),
        ];
        let (store, report) = run(events).await;

        assert_eq!(report.contradictions_applied, 1);
        let incident = &store.incidents().await[0];
        let expected = (60.0f64 + 35.0) * crate::CONTRADICTION_DECAY_MULTIPLIER;
        assert!((incident.confidence_score - expected).abs() < 1e-9);
        // post-decay 80.75 is above the CONFIRMED threshold, yet the stage
        // must not advance on a contradicting event
        assert_eq!(incident.current_stage, IncidentStage::Probable);
    }

    #[tokio::test]
    async fn events_outside_window_open_new_incidents() {
        let events = vec![
            event(
                "a-1",
                1,
                "2026-01-10T12:00:00Z",
                json!({"kind": "suspicious_child", "process_id": 1}),
            ),
            event(
                "a-1",
                2,
                "2026-01-10T15:00:00Z",
                json!({"kind": "suspicious_child", "process_id": 2}),
            ),
        ];
        let (store, report) = run(events).await;
        assert_eq!(report.incidents_created, 2);
        assert_eq!(store.incidents().await.len(), 2);
    }

    #[tokio::test]
    async fn correlation_is_deterministic() {
        let make_events = || {
            vec![
                event(
                    "a-1",
                    1,
                    "2026-01-10T12:00:00Z",
                    json!({"kind": "suspicious_child", "process_id": 42, "parent_pid": 7}),
                ),
                event(
                    "a-1",
                    2,
                    "2026-01-10T12:01:00Z",
                    json!({"kind": "shadow_copy_delete"}),
                ),
            ]
        };
        // same event ids in both runs
        let batch_a = make_events();
        let mut batch_b = batch_a.clone();
        batch_b.reverse();

        let (store_a, _) = run(batch_a).await;
        let (store_b, _) = run(batch_b).await;

        let a = serde_json::to_string(&store_a.incidents().await).unwrap();
        let b = serde_json::to_string(&store_b.incidents().await).unwrap();
        assert_eq!(a, b);

        let ta = serde_json::to_string(&store_a.transitions().await).unwrap();
        let tb = serde_json::to_string(&store_b.transitions().await).unwrap();
        assert_eq!(ta, tb);
    }

    #[tokio::test]
    async fn rerun_over_processed_events_changes_nothing() {
        let events = vec![event(
            "a-1",
            1,
            "2026-01-10T12:00:00Z",
            json!({"kind": "suspicious_child", "process_id": 42}),
        )];
        let store = Arc::new(MemoryCorrelationStore::new());
        store.seed_events(events).await;
        let engine = CorrelationEngine::new(store.clone());

        engine.correlate_pending().await.unwrap();
        let first = serde_json::to_string(&store.incidents().await).unwrap();

        let report = engine.correlate_pending().await.unwrap();
        assert_eq!(report.incidents_created, 0);
        assert_eq!(report.evidence_linked, 0);
        let second = serde_json::to_string(&store.incidents().await).unwrap();
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn double_link_is_fatal() {
        let evt = event(
            "a-1",
            1,
            "2026-01-10T12:00:00Z",
            json!({"kind": "suspicious_child", "process_id": 42}),
        );
        let store = MemoryCorrelationStore::new();
        store.seed_events(vec![evt.clone()]).await;

        let incident_id = derive_incident_id(&evt.event_id);
        let incident = Incident {
            incident_id,
            machine_id: evt.machine_id.clone(),
            current_stage: IncidentStage::Suspicious,
            confidence_score: 25.0,
            first_observed_at: evt.observed_at,
            last_observed_at: evt.observed_at,
            total_evidence_count: 1,
            status: IncidentStatus::Open,
            resolved: false,
            dedup_key: None,
        };
        let evidence = Evidence {
            incident_id,
            event_id: evt.event_id,
            evidence_type: "suspicious_process_tree".to_string(),
            confidence_level: ConfidenceLevel::Medium,
            confidence_score: 25.0,
            observed_at: evt.observed_at,
        };
        store.create_incident(incident.clone(), evidence.clone()).await.unwrap();

        // a second incident for the same event must refuse fatally
        let mut duplicate = incident;
        duplicate.incident_id = IncidentId::new();
        let result = store.create_incident(duplicate, evidence).await;
        assert!(matches!(result, Err(CorrelationError::FatalInvariant(_))));
    }
}
