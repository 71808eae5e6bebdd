//! Supervision contract
//!
//! RansomEye components refuse to start unless launched by an approved
//! orchestrator. This is not tamper-proofing; it prevents accidental
//! unsupervised runs of processes that can take destructive actions.

use uuid::Uuid;

use crate::{CommonError, CommonResult};

pub const ORCHESTRATOR_VAR: &str = "RANSOMEYE_ORCHESTRATOR";
pub const CORE_TOKEN_VAR: &str = "RANSOMEYE_CORE_TOKEN";
pub const CORE_PID_VAR: &str = "RANSOMEYE_CORE_PID";

/// Orchestrator values accepted by the contract
pub const APPROVED_ORCHESTRATORS: [&str; 2] = ["systemd", "unified-core"];

/// Assert the basic supervision contract: an approved orchestrator value
/// must be present.
pub fn assert_supervised() -> CommonResult<()> {
    let orchestrator = std::env::var(ORCHESTRATOR_VAR).map_err(|_| {
        CommonError::Supervision(format!(
            "{} is not set; refusing to start unsupervised",
            ORCHESTRATOR_VAR
        ))
    })?;

    if !APPROVED_ORCHESTRATORS.contains(&orchestrator.as_str()) {
        return Err(CommonError::Supervision(format!(
            "{}={} is not an approved orchestrator",
            ORCHESTRATOR_VAR, orchestrator
        )));
    }

    Ok(())
}

/// Assert the full contract for components launched by the unified core:
/// the core token must parse as a UUID and the parent pid must match
/// `RANSOMEYE_CORE_PID`.
pub fn assert_core_supervised() -> CommonResult<()> {
    assert_supervised()?;

    let token = std::env::var(CORE_TOKEN_VAR).map_err(|_| {
        CommonError::Supervision(format!("{} is not set", CORE_TOKEN_VAR))
    })?;
    Uuid::parse_str(&token).map_err(|_| {
        CommonError::Supervision(format!("{} does not parse as a UUID", CORE_TOKEN_VAR))
    })?;

    let declared_pid: i32 = std::env::var(CORE_PID_VAR)
        .map_err(|_| CommonError::Supervision(format!("{} is not set", CORE_PID_VAR)))?
        .parse()
        .map_err(|_| {
            CommonError::Supervision(format!("{} is not a valid pid", CORE_PID_VAR))
        })?;

    let parent_pid = unsafe { libc::getppid() };
    if parent_pid != declared_pid {
        return Err(CommonError::Supervision(format!(
            "parent pid {} does not match {}={}",
            parent_pid, CORE_PID_VAR, declared_pid
        )));
    }

    Ok(())
}

/// The orchestrator pid to escalate fatal conditions to, if declared
pub fn core_pid() -> Option<i32> {
    std::env::var(CORE_PID_VAR).ok()?.parse().ok()
}
