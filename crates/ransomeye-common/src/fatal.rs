//! Fatal-invariant escalation
//!
//! When internal state is no longer trustworthy (duplicate incident
//! creation, hash-chain break, sequence regression, read-only write
//! attempt, ledger disk-full, missing signing key at verify time) the
//! policy is: log FATAL, drop a marker file, signal the Core orchestrator
//! with SIGUSR1, and exit. No retries, no silent degradation.

use chrono::Utc;
use serde_json::json;
use std::path::PathBuf;

use crate::{core_pid, ExitCode};

pub const STATE_DIR_VAR: &str = "RANSOMEYE_STATE_DIR";
const DEFAULT_STATE_DIR: &str = "/var/lib/ransomeye";

fn state_dir() -> PathBuf {
    std::env::var(STATE_DIR_VAR)
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from(DEFAULT_STATE_DIR))
}

/// Write the fatal marker file. Best effort: a failing marker write cannot
/// be allowed to mask the exit itself.
fn write_marker(component: &str, reason: &str) {
    let dir = state_dir().join("fatal");
    if std::fs::create_dir_all(&dir).is_err() {
        return;
    }
    let marker = json!({
        "component": component,
        "reason": reason,
        "pid": std::process::id(),
        "occurred_at": Utc::now().to_rfc3339(),
    });
    let path = dir.join(format!("{}.json", component));
    let _ = std::fs::write(path, marker.to_string());
}

/// Signal the Core orchestrator that a fatal condition occurred
fn signal_orchestrator() {
    if let Some(pid) = core_pid() {
        unsafe {
            libc::kill(pid, libc::SIGUSR1);
        }
    }
}

/// Escalate a fatal invariant violation and exit with code 4.
pub fn escalate_fatal(component: &str, reason: &str) -> ! {
    tracing::error!(component = component, reason = reason, "FATAL invariant violation");
    eprintln!("FATAL: {}: {}", component, reason);
    write_marker(component, reason);
    signal_orchestrator();
    std::process::exit(ExitCode::FatalError.code());
}

/// Escalate an unrecoverable runtime error and exit with code 3.
pub fn escalate_runtime_error(component: &str, reason: &str) -> ! {
    tracing::error!(component = component, reason = reason, "unrecoverable runtime error");
    eprintln!("RUNTIME_ERROR: {}: {}", component, reason);
    write_marker(component, reason);
    signal_orchestrator();
    std::process::exit(ExitCode::RuntimeError.code());
}
