//! Stage thresholds, confidence arithmetic, and contradiction detection

use chrono::{DateTime, Utc};
use ransomeye_types::{EventEnvelope, IncidentStage, MachineId};
use serde_json::Value;

/// Confidence thresholds: [0,40) SUSPICIOUS, [40,75) PROBABLE,
/// [75,100] CONFIRMED
pub const PROBABLE_THRESHOLD: f64 = 40.0;
pub const CONFIRMED_THRESHOLD: f64 = 75.0;

/// Deterministic contradiction decay. The upstream system referenced a
/// multiplier without defining it; it is fixed here as a constant.
pub const CONTRADICTION_DECAY_MULTIPLIER: f64 = 0.85;

/// Window within which a new evidence event joins an existing unresolved
/// incident on the same machine
pub const DEDUPLICATION_WINDOW_SECS: i64 = 3600;

/// Window within which conflicting process observations count as a
/// contradiction rather than process-id reuse
pub const CONTRADICTION_WINDOW_SECS: i64 = 300;

/// Stage as a monotone threshold function of confidence
pub fn stage_for_confidence(confidence: f64) -> IncidentStage {
    if confidence >= CONFIRMED_THRESHOLD {
        IncidentStage::Confirmed
    } else if confidence >= PROBABLE_THRESHOLD {
        IncidentStage::Probable
    } else {
        IncidentStage::Suspicious
    }
}

/// Accumulate a contribution, clamped to [0, 100]
pub fn accumulate_confidence(current: f64, contribution: f64) -> f64 {
    (current + contribution).clamp(0.0, 100.0)
}

/// Apply the contradiction decay
pub fn apply_contradiction_decay(confidence: f64) -> f64 {
    (confidence * CONTRADICTION_DECAY_MULTIPLIER).clamp(0.0, 100.0)
}

/// Only forward transitions are recorded
pub fn should_transition(current: IncidentStage, proposed: IncidentStage) -> bool {
    proposed > current
}

/// Deduplication key: `machine_id:process_id` when the event names a
/// process, else the machine alone
pub fn deduplication_key(machine_id: &MachineId, payload: &Value) -> String {
    match payload.get("process_id").and_then(Value::as_u64) {
        Some(pid) => format!("{}:{}", machine_id, pid),
        None => machine_id.to_string(),
    }
}

/// Whether an event falls inside the incident-join window around the
/// incident's first observation
pub fn within_deduplication_window(
    first_observed_at: DateTime<Utc>,
    event_time: DateTime<Utc>,
) -> bool {
    (event_time - first_observed_at).num_seconds().abs() <= DEDUPLICATION_WINDOW_SECS
}

/// An existing evidence row with enough context for contradiction checks
#[derive(Debug, Clone)]
pub struct EvidenceContext {
    pub event_id: ransomeye_types::EventId,
    pub observed_at: DateTime<Utc>,
    pub payload: Value,
}

/// Detect a tagged semantic contradiction between a candidate event and
/// the incident's existing evidence.
///
/// Contradictions are explicit, not heuristic: the same process observed
/// with conflicting parent pids, or conflicting lifecycle states, inside
/// a tight window.
pub fn detect_contradiction(
    event: &EventEnvelope,
    existing: &[EvidenceContext],
) -> Option<&'static str> {
    let candidate_pid = event.payload.get("process_id").and_then(Value::as_u64)?;

    for evidence in existing {
        let Some(pid) = evidence.payload.get("process_id").and_then(Value::as_u64) else {
            continue;
        };
        if pid != candidate_pid {
            continue;
        }
        let delta = (event.observed_at - evidence.observed_at).num_seconds().abs();
        if delta > CONTRADICTION_WINDOW_SECS {
            continue;
        }

        let candidate_parent = event.payload.get("parent_pid").and_then(Value::as_u64);
        let existing_parent = evidence.payload.get("parent_pid").and_then(Value::as_u64);
        if let (Some(a), Some(b)) = (candidate_parent, existing_parent) {
            if a != b {
                return Some("conflicting_parent_pid");
            }
        }

        let candidate_state = event.payload.get("state").and_then(Value::as_str);
        let existing_state = evidence.payload.get("state").and_then(Value::as_str);
        if let (Some(a), Some(b)) = (candidate_state, existing_state) {
            if (a == "exited" && b == "running" || a == "running" && b == "exited")
                && delta == 0
            {
                return Some("conflicting_process_state");
            }
        }
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use ransomeye_types::{
        BootId, ComponentInstanceId, EventId, EventIdentity, EventIntegrity,
    };
    use serde_json::json;

    #[test]
    fn thresholds_are_monotone() {
        assert_eq!(stage_for_confidence(0.0), IncidentStage::Suspicious);
        assert_eq!(stage_for_confidence(39.9), IncidentStage::Suspicious);
        assert_eq!(stage_for_confidence(40.0), IncidentStage::Probable);
        assert_eq!(stage_for_confidence(74.9), IncidentStage::Probable);
        assert_eq!(stage_for_confidence(75.0), IncidentStage::Confirmed);
        assert_eq!(stage_for_confidence(100.0), IncidentStage::Confirmed);
    }

    #[test]
    fn accumulation_clamps() {
        assert_eq!(accumulate_confidence(90.0, 25.0), 100.0);
        assert_eq!(accumulate_confidence(10.0, -50.0), 0.0);
        assert_eq!(accumulate_confidence(25.0, 25.0), 50.0);
    }

    #[test]
    fn decay_is_multiplicative() {
        let decayed = apply_contradiction_decay(76.0);
        assert!((decayed - 76.0 * CONTRADICTION_DECAY_MULTIPLIER).abs() < f64::EPSILON);
    }

    #[test]
    fn only_forward_transitions() {
        assert!(should_transition(IncidentStage::Suspicious, IncidentStage::Probable));
        assert!(!should_transition(IncidentStage::Probable, IncidentStage::Probable));
        assert!(!should_transition(IncidentStage::Confirmed, IncidentStage::Probable));
    }

    #[test]
    fn dedup_key_prefers_process() {
        let machine = MachineId::new("host-1");
        assert_eq!(
            deduplication_key(&machine, &json!({"process_id": 42})),
            "host-1:42"
        );
        assert_eq!(deduplication_key(&machine, &json!({"kind": "x"})), "host-1");
    }

    fn event_with(payload: Value, at: &str) -> EventEnvelope {
        EventEnvelope {
            event_id: EventId::new(),
            machine_id: MachineId::new("host-1"),
            component: "linux_agent".to_string(),
            component_instance_id: ComponentInstanceId::new("a-1"),
            observed_at: at.parse().unwrap(),
            ingested_at: at.parse().unwrap(),
            sequence: 1,
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

    #[test]
    fn conflicting_parent_pid_is_a_contradiction() {
        let event = event_with(
            json!({"process_id": 42, "parent_pid": 7}),
            "2026-01-10T12:01:00Z",
        );
        let existing = vec![EvidenceContext {
            event_id: EventId::new(),
            observed_at: "2026-01-10T12:00:00Z".parse().unwrap(),
            payload: json!({"process_id": 42, "parent_pid": 9}),
        }];
        assert_eq!(
            detect_contradiction(&event, &existing),
            Some("conflicting_parent_pid")
        );
    }

    #[test]
    fn distant_observations_are_not_contradictions() {
        let event = event_with(
            json!({"process_id": 42, "parent_pid": 7}),
            "2026-01-10T13:00:00Z",
        );
        let existing = vec![EvidenceContext {
            event_id: EventId::new(),
            observed_at: "2026-01-10T12:00:00Z".parse().unwrap(),
            payload: json!({"process_id": 42, "parent_pid": 9}),
        }];
        assert_eq!(detect_contradiction(&event, &existing), None);
    }

    #[test]
    fn different_processes_never_contradict() {
        let event = event_with(
            json!({"process_id": 43, "parent_pid": 7}),
            "2026-01-10T12:00:30Z",
        );
        let existing = vec![EvidenceContext {
            event_id: EventId::new(),
            observed_at: "2026-01-10T12:00:00Z".parse().unwrap(),
            payload: json!({"process_id": 42, "parent_pid": 9}),
        }];
        assert_eq!(detect_contradiction(&event, &existing), None);
    }
}
