//! Incidents, evidence, and stage transitions
//!
//! All timestamps on these types derive from event `observed_at` values.
//! The correlation engine is the only writer.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::{EventId, IncidentId, MachineId};

/// Discrete incident stage derived from accumulated confidence
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum IncidentStage {
    Suspicious,
    Probable,
    Confirmed,
}

impl IncidentStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            IncidentStage::Suspicious => "SUSPICIOUS",
            IncidentStage::Probable => "PROBABLE",
            IncidentStage::Confirmed => "CONFIRMED",
        }
    }
}

impl fmt::Display for IncidentStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Incident lifecycle status as seen by TRE
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum IncidentStatus {
    Open,
    Closed,
    Archived,
    ResolvedWithActions,
}

impl IncidentStatus {
    /// Frozen incidents accept rollback only
    pub fn is_frozen(&self) -> bool {
        !matches!(self, IncidentStatus::Open)
    }
}

/// A correlated incident
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Incident {
    pub incident_id: IncidentId,
    pub machine_id: MachineId,
    pub current_stage: IncidentStage,
    /// Clamped to [0, 100]
    pub confidence_score: f64,
    pub first_observed_at: DateTime<Utc>,
    pub last_observed_at: DateTime<Utc>,
    pub total_evidence_count: u64,
    pub status: IncidentStatus,
    pub resolved: bool,
    /// Deduplication key: `machine_id:process_id` when available
    pub dedup_key: Option<String>,
}

/// Coarse confidence bucket for a single evidence contribution
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ConfidenceLevel {
    Low,
    Medium,
    High,
}

impl ConfidenceLevel {
    /// Bucket boundaries: >= 50 HIGH, >= 25 MEDIUM, else LOW
    pub fn from_score(score: f64) -> Self {
        if score >= 50.0 {
            ConfidenceLevel::High
        } else if score >= 25.0 {
            ConfidenceLevel::Medium
        } else {
            ConfidenceLevel::Low
        }
    }
}

/// An `(incident, event)` evidence link
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Evidence {
    pub incident_id: IncidentId,
    pub event_id: EventId,
    pub evidence_type: String,
    pub confidence_level: ConfidenceLevel,
    /// Contribution of this evidence to the incident's confidence
    pub confidence_score: f64,
    pub observed_at: DateTime<Utc>,
}

/// Append-only record of a forward stage change
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageTransition {
    pub incident_id: IncidentId,
    pub from_stage: IncidentStage,
    pub to_stage: IncidentStage,
    /// Equal to the triggering event's `observed_at`
    pub transitioned_at: DateTime<Utc>,
    pub evidence_count_at_transition: u64,
    pub confidence_score_at_transition: f64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stages_are_ordered() {
        assert!(IncidentStage::Suspicious < IncidentStage::Probable);
        assert!(IncidentStage::Probable < IncidentStage::Confirmed);
    }

    #[test]
    fn confidence_level_buckets() {
        assert_eq!(ConfidenceLevel::from_score(10.0), ConfidenceLevel::Low);
        assert_eq!(ConfidenceLevel::from_score(25.0), ConfidenceLevel::Medium);
        assert_eq!(ConfidenceLevel::from_score(49.9), ConfidenceLevel::Medium);
        assert_eq!(ConfidenceLevel::from_score(50.0), ConfidenceLevel::High);
    }

    #[test]
    fn frozen_statuses() {
        assert!(!IncidentStatus::Open.is_frozen());
        assert!(IncidentStatus::Closed.is_frozen());
        assert!(IncidentStatus::ResolvedWithActions.is_frozen());
        assert!(IncidentStatus::Archived.is_frozen());
    }
}
