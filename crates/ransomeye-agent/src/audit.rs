//! Local JSONL audit log
//!
//! Every command outcome is appended locally, online or not. A failing
//! audit write is an error the caller must treat as fatal; an agent that
//! cannot record its decisions must not take actions.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use crate::{AgentError, Result};

/// One audit line
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditLine {
    pub event_type: String,
    pub command_id: String,
    pub outcome: String,
    pub reason: Option<String>,
    pub timestamp: String,
}

/// Append-only local audit log
pub struct AgentAuditLog {
    path: PathBuf,
    writer: Mutex<()>,
}

impl AgentAuditLog {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        Ok(Self {
            path,
            writer: Mutex::new(()),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append one line. Serialized through an internal lock so concurrent
    /// callers cannot interleave partial lines.
    pub fn append(
        &self,
        event_type: &str,
        command_id: &str,
        outcome: &str,
        reason: Option<&str>,
    ) -> Result<()> {
        let line = json!({
            "event_type": event_type,
            "command_id": command_id,
            "outcome": outcome,
            "reason": reason,
            "timestamp": Utc::now().to_rfc3339(),
        });

        let _guard = self
            .writer
            .lock()
            .map_err(|e| AgentError::Audit(format!("audit lock poisoned: {}", e)))?;
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(|e| AgentError::Audit(e.to_string()))?;
        writeln!(file, "{}", line).map_err(|e| AgentError::Audit(e.to_string()))?;
        Ok(())
    }

    /// Read back all lines (verification and tests)
    pub fn read_all(&self) -> Result<Vec<AuditLine>> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }
        let text = std::fs::read_to_string(&self.path)?;
        let mut lines = Vec::new();
        for line in text.lines() {
            if line.trim().is_empty() {
                continue;
            }
            lines.push(
                serde_json::from_str(line)
                    .map_err(|e| AgentError::Serialization(e.to_string()))?,
            );
        }
        Ok(lines)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn append_and_read_back() {
        let dir = tempfile::tempdir().unwrap();
        let log = AgentAuditLog::open(dir.path().join("audit.jsonl")).unwrap();

        log.append("command_received", "c-1", "SUCCESS", None).unwrap();
        log.append("command_rejected", "c-2", "REJECTED", Some("replay")).unwrap();

        let lines = log.read_all().unwrap();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0].outcome, "SUCCESS");
        assert_eq!(lines[1].reason.as_deref(), Some("replay"));
    }
}
