//! Daemon cycle status files
//!
//! Batch daemons write a small JSON status after every pass so operators
//! and the orchestrator can distinguish "idle" from "wedged".

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::{safe_write_file, CommonResult};

/// Daemon liveness state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DaemonState {
    Starting,
    Running,
    Degraded,
    Stopped,
}

/// One cycle-status record
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CycleStatus {
    pub component: String,
    pub state: DaemonState,
    pub last_successful_cycle: Option<DateTime<Utc>>,
    pub failure_reason: Option<String>,
    pub written_at: DateTime<Utc>,
}

impl CycleStatus {
    pub fn running(component: &str, last_successful_cycle: Option<DateTime<Utc>>) -> Self {
        Self {
            component: component.to_string(),
            state: DaemonState::Running,
            last_successful_cycle,
            failure_reason: None,
            written_at: Utc::now(),
        }
    }

    pub fn degraded(component: &str, reason: &str) -> Self {
        Self {
            component: component.to_string(),
            state: DaemonState::Degraded,
            last_successful_cycle: None,
            failure_reason: Some(reason.to_string()),
            written_at: Utc::now(),
        }
    }
}

/// Atomically write a status file
pub fn write_status(path: &Path, status: &CycleStatus) -> CommonResult<()> {
    let text = serde_json::to_string_pretty(status)
        .map_err(|e| crate::CommonError::Resource(e.to_string()))?;
    safe_write_file(path, text.as_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("status.json");

        let status = CycleStatus::running("correlation-engine", Some(Utc::now()));
        write_status(&path, &status).unwrap();

        let read: CycleStatus =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(read.state, DaemonState::Running);
        assert_eq!(read.component, "correlation-engine");
    }
}
