//! Deterministic policy rules over incidents

use ransomeye_types::{ActionType, Incident, IncidentStage};

/// A recommendation produced by rule evaluation
#[derive(Debug, Clone, PartialEq)]
pub struct PolicyRecommendation {
    pub action_type: ActionType,
    pub rule_id: String,
    pub reason: String,
}

/// Minimum confidence before any action is recommended at all
pub const MIN_ACTIONABLE_CONFIDENCE: f64 = 25.0;

/// Evaluate one incident. Deterministic: the same incident row always
/// yields the same recommendation.
pub fn evaluate_incident(incident: &Incident) -> Option<PolicyRecommendation> {
    if incident.resolved {
        return None;
    }
    if incident.confidence_score < MIN_ACTIONABLE_CONFIDENCE {
        return None;
    }

    match incident.current_stage {
        IncidentStage::Confirmed => Some(PolicyRecommendation {
            action_type: ActionType::IsolateHost,
            rule_id: "policy.confirmed_isolate".to_string(),
            reason: format!(
                "incident confirmed at confidence {:.0}; containing the host",
                incident.confidence_score
            ),
        }),
        IncidentStage::Probable | IncidentStage::Suspicious => {
            // a process-scoped incident gets a process-scoped response
            Some(PolicyRecommendation {
                action_type: ActionType::BlockProcess,
                rule_id: "policy.block_offending_process".to_string(),
                reason: format!(
                    "stage {} at confidence {:.0}; blocking the offending process",
                    incident.current_stage, incident.confidence_score
                ),
            })
        }
    }
}
