//! Deterministic correlation rules
//!
//! Rules are explicit pattern matches over event payloads; there is no ML
//! here. Each rule names its evidence type and a fixed confidence
//! contribution, so a given event log always scores identically.

use ransomeye_types::{EventEnvelope, IncidentStage};
use serde_json::Value;

use crate::stage_for_confidence;

/// Outcome of rule evaluation for one event
#[derive(Debug, Clone, PartialEq)]
pub struct RuleOutcome {
    pub stage: IncidentStage,
    pub confidence_contribution: f64,
    pub evidence_type: String,
}

struct Rule {
    kind: &'static str,
    evidence_type: &'static str,
    contribution: f64,
    /// Extra payload predicate beyond the kind match
    predicate: Option<fn(&Value) -> bool>,
}

/// The rule table. Order matters only for readability; kinds are disjoint.
const RULES: [Rule; 6] = [
    Rule {
        kind: "process_start",
        evidence_type: "suspicious_process",
        contribution: 25.0,
        predicate: Some(|payload| {
            payload.get("suspicious").and_then(Value::as_bool).unwrap_or(false)
        }),
    },
    Rule {
        kind: "suspicious_child",
        evidence_type: "suspicious_process_tree",
        contribution: 25.0,
        predicate: None,
    },
    Rule {
        kind: "mass_file_write",
        evidence_type: "mass_file_modification",
        contribution: 30.0,
        predicate: None,
    },
    Rule {
        kind: "entropy_spike",
        evidence_type: "encryption_indicator",
        contribution: 35.0,
        predicate: None,
    },
    Rule {
        kind: "shadow_copy_delete",
        evidence_type: "shadow_copy_tampering",
        contribution: 50.0,
        predicate: None,
    },
    Rule {
        kind: "network_beacon",
        evidence_type: "c2_beaconing",
        contribution: 15.0,
        predicate: None,
    },
];

/// Evaluate one event against the rule table. `None` means the event
/// contributes no evidence.
pub fn evaluate_event(event: &EventEnvelope) -> Option<RuleOutcome> {
    let kind = event.payload.get("kind").and_then(Value::as_str)?;

    for rule in &RULES {
        if rule.kind != kind {
            continue;
        }
        if let Some(predicate) = rule.predicate {
            if !predicate(&event.payload) {
                return None;
            }
        }
        return Some(RuleOutcome {
            stage: stage_for_confidence(rule.contribution),
            confidence_contribution: rule.contribution,
            evidence_type: rule.evidence_type.to_string(),
        });
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use ransomeye_types::{
        BootId, ComponentInstanceId, EventId, EventIdentity, EventIntegrity, MachineId,
    };
    use serde_json::json;

    fn event(payload: Value) -> EventEnvelope {
        let observed = "2026-01-10T12:00:00Z".parse().unwrap();
        EventEnvelope {
            event_id: EventId::new(),
            machine_id: MachineId::new("host-1"),
            component: "linux_agent".to_string(),
            component_instance_id: ComponentInstanceId::new("a-1"),
            observed_at: observed,
            ingested_at: observed,
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
    fn plain_process_start_contributes_nothing() {
        assert_eq!(evaluate_event(&event(json!({"kind": "process_start"}))), None);
    }

    #[test]
    fn suspicious_process_start_scores_25() {
        let outcome = evaluate_event(&event(
            json!({"kind": "process_start", "suspicious": true, "process_id": 42}),
        ))
        .unwrap();
        assert_eq!(outcome.confidence_contribution, 25.0);
        assert_eq!(outcome.evidence_type, "suspicious_process");
        assert_eq!(outcome.stage, IncidentStage::Suspicious);
    }

    #[test]
    fn shadow_copy_delete_lands_probable() {
        let outcome =
            evaluate_event(&event(json!({"kind": "shadow_copy_delete"}))).unwrap();
        assert_eq!(outcome.confidence_contribution, 50.0);
        assert_eq!(outcome.stage, IncidentStage::Probable);
    }

    #[test]
    fn unknown_kinds_are_ignored() {
        assert_eq!(evaluate_event(&event(json!({"kind": "heartbeat"}))), None);
        assert_eq!(evaluate_event(&event(json!({"no_kind": true}))), None);
    }

    #[test]
    fn evaluation_is_deterministic() {
        let e = event(json!({"kind": "entropy_spike", "process_id": 7}));
        assert_eq!(evaluate_event(&e), evaluate_event(&e));
    }
}
