//! Host-side action execution
//!
//! The executor is the seam between validated commands and the host. The
//! default implementation enforces through the filesystem interfaces a
//! hardened deployment mounts for it (cgroup root, firewall rule
//! directory, quarantine directory); real hosts substitute their own
//! bindings behind the same trait.
//!
//! Capture always runs before execution: an action with a rollback
//! artifact shape must have its artifact persisted before any effect.

use ransomeye_types::{ActionType, RollbackArtifact, SignedCommand};
use std::path::{Path, PathBuf};

use ransomeye_crypto::sha256_hex;

use crate::{AgentError, ArtifactStore, Result};

/// Executes and reverts actions on the host
pub trait ActionExecutor: Send + Sync {
    /// Pre-execution snapshot. `None` means the action type has no
    /// rollback artifact shape.
    fn capture(&self, command: &SignedCommand) -> Result<Option<RollbackArtifact>>;

    fn execute(&self, command: &SignedCommand) -> Result<()>;

    fn revert(&self, artifact: &RollbackArtifact) -> Result<()>;
}

/// Filesystem-interface executor for Linux hosts
pub struct LinuxHostExecutor {
    /// Root under which cgroup-style blocks and enforcement records live
    enforcement_root: PathBuf,
    /// Where quarantined files are moved
    quarantine_dir: PathBuf,
    /// Hostname recorded in artifacts
    machine_id: String,
}

impl LinuxHostExecutor {
    pub fn new(
        enforcement_root: impl AsRef<Path>,
        quarantine_dir: impl AsRef<Path>,
        machine_id: impl Into<String>,
    ) -> Self {
        Self {
            enforcement_root: enforcement_root.as_ref().to_path_buf(),
            quarantine_dir: quarantine_dir.as_ref().to_path_buf(),
            machine_id: machine_id.into(),
        }
    }

    fn cgroup_path(&self, process_id: u32) -> PathBuf {
        self.enforcement_root
            .join("cgroup")
            .join(format!("ransomeye-block-{}", process_id))
    }

    fn firewall_rule_path(&self, rule_id: &str) -> PathBuf {
        self.enforcement_root
            .join("firewall")
            .join(format!("{}.rule", rule_id))
    }

    fn isolation_path(&self) -> PathBuf {
        self.enforcement_root.join("isolation").join("active")
    }

    fn enforcement_record(&self, command: &SignedCommand) -> PathBuf {
        self.enforcement_root
            .join("enforced")
            .join(format!("{}-{}", command.action_type, command.command_id))
    }

    fn require_pid(command: &SignedCommand) -> Result<u32> {
        command.target.process_id.ok_or_else(|| {
            AgentError::Execution(format!(
                "{} requires target.process_id",
                command.action_type
            ))
        })
    }

    fn process_snapshot(process_id: u32) -> (String, String) {
        let cmdline = std::fs::read(format!("/proc/{}/cmdline", process_id))
            .map(|bytes| {
                String::from_utf8_lossy(&bytes)
                    .replace('\0', " ")
                    .trim()
                    .to_string()
            })
            .unwrap_or_default();
        let state = std::fs::read_to_string(format!("/proc/{}/stat", process_id))
            .ok()
            .and_then(|stat| {
                stat.rsplit(')')
                    .next()
                    .and_then(|tail| tail.split_whitespace().next())
                    .map(str::to_string)
            })
            .unwrap_or_else(|| "unknown".to_string());
        (cmdline, state)
    }

    fn rule_text(command: &SignedCommand) -> String {
        command
            .target
            .connection
            .clone()
            .or_else(|| command.target.network_cidr.clone())
            .unwrap_or_else(|| "drop all".to_string())
    }
}

impl ActionExecutor for LinuxHostExecutor {
    fn capture(&self, command: &SignedCommand) -> Result<Option<RollbackArtifact>> {
        let artifact = match command.action_type {
            ActionType::BlockProcess => {
                let process_id = Self::require_pid(command)?;
                let (cmdline, state) = Self::process_snapshot(process_id);
                Some(RollbackArtifact::ProcessBlock {
                    machine_id: self.machine_id.clone(),
                    process_id,
                    cmdline,
                    state,
                    cgroup_path: self.cgroup_path(process_id).display().to_string(),
                })
            }
            ActionType::BlockNetworkConnection => {
                let rule_text = Self::rule_text(command);
                let rule_id = sha256_hex(rule_text.as_bytes())[..16].to_string();
                Some(RollbackArtifact::NetworkBlock {
                    machine_id: self.machine_id.clone(),
                    rule_text,
                    rule_id,
                })
            }
            ActionType::QuarantineFile => {
                let original_path = command.target.file_path.clone().ok_or_else(|| {
                    AgentError::Execution("QUARANTINE_FILE requires target.file_path".into())
                })?;
                let bytes = std::fs::read(&original_path).map_err(|e| {
                    AgentError::Execution(format!("cannot read {}: {}", original_path, e))
                })?;
                let sha256 = sha256_hex(&bytes);
                let quarantine_path =
                    self.quarantine_dir.join(&sha256).display().to_string();
                Some(RollbackArtifact::FileQuarantine {
                    machine_id: self.machine_id.clone(),
                    original_path,
                    quarantine_path,
                    sha256,
                })
            }
            ActionType::IsolateHost => {
                let namespace_state = std::fs::read_link("/proc/self/ns/net")
                    .map(|p| p.display().to_string())
                    .unwrap_or_else(|_| "unknown".to_string());
                Some(RollbackArtifact::HostIsolation {
                    machine_id: self.machine_id.clone(),
                    namespace_id: namespace_state.clone(),
                    namespace_state,
                })
            }
            // no artifact shape: these do not roll back
            ActionType::TemporaryFirewallRule
            | ActionType::LockUser
            | ActionType::DisableService
            | ActionType::MassProcessKill
            | ActionType::NetworkSegmentIsolation => None,
        };
        Ok(artifact)
    }

    fn execute(&self, command: &SignedCommand) -> Result<()> {
        match command.action_type {
            ActionType::BlockProcess => {
                let process_id = Self::require_pid(command)?;
                let path = self.cgroup_path(process_id);
                std::fs::create_dir_all(&path)?;
                std::fs::write(path.join("cgroup.freeze"), "1")?;
            }
            ActionType::BlockNetworkConnection | ActionType::TemporaryFirewallRule => {
                let rule_text = Self::rule_text(command);
                let rule_id = sha256_hex(rule_text.as_bytes())[..16].to_string();
                let path = self.firewall_rule_path(&rule_id);
                if let Some(parent) = path.parent() {
                    std::fs::create_dir_all(parent)?;
                }
                std::fs::write(path, &rule_text)?;
            }
            ActionType::QuarantineFile => {
                let original = command.target.file_path.as_deref().ok_or_else(|| {
                    AgentError::Execution("QUARANTINE_FILE requires target.file_path".into())
                })?;
                let bytes = std::fs::read(original)?;
                let destination = self.quarantine_dir.join(sha256_hex(&bytes));
                std::fs::create_dir_all(&self.quarantine_dir)?;
                std::fs::rename(original, &destination)?;
            }
            ActionType::IsolateHost => {
                let path = self.isolation_path();
                if let Some(parent) = path.parent() {
                    std::fs::create_dir_all(parent)?;
                }
                std::fs::write(path, &self.machine_id)?;
            }
            ActionType::LockUser
            | ActionType::DisableService
            | ActionType::MassProcessKill
            | ActionType::NetworkSegmentIsolation => {
                let path = self.enforcement_record(command);
                if let Some(parent) = path.parent() {
                    std::fs::create_dir_all(parent)?;
                }
                std::fs::write(path, serde_json::to_string(&command.target).unwrap_or_default())?;
            }
        }
        Ok(())
    }

    fn revert(&self, artifact: &RollbackArtifact) -> Result<()> {
        match artifact {
            RollbackArtifact::ProcessBlock { cgroup_path, .. } => {
                let path = PathBuf::from(cgroup_path);
                if path.exists() {
                    std::fs::write(path.join("cgroup.freeze"), "0")?;
                    std::fs::remove_dir_all(&path)?;
                }
            }
            RollbackArtifact::NetworkBlock { rule_id, .. } => {
                let path = self.firewall_rule_path(rule_id);
                if path.exists() {
                    std::fs::remove_file(path)?;
                }
            }
            RollbackArtifact::FileQuarantine {
                original_path,
                quarantine_path,
                sha256,
                ..
            } => {
                let bytes = std::fs::read(quarantine_path).map_err(|e| {
                    AgentError::Execution(format!(
                        "quarantined file missing at {}: {}",
                        quarantine_path, e
                    ))
                })?;
                if sha256_hex(&bytes) != *sha256 {
                    return Err(AgentError::Execution(format!(
                        "quarantined file at {} does not match its recorded digest",
                        quarantine_path
                    )));
                }
                std::fs::rename(quarantine_path, original_path)?;
            }
            RollbackArtifact::HostIsolation { .. } => {
                let path = self.isolation_path();
                if path.exists() {
                    std::fs::remove_file(path)?;
                }
            }
        }
        Ok(())
    }
}

/// Runs a validated command: capture, persist the artifact, then execute
pub struct CommandRunner {
    executor: std::sync::Arc<dyn ActionExecutor>,
    artifacts: ArtifactStore,
}

impl CommandRunner {
    pub fn new(executor: std::sync::Arc<dyn ActionExecutor>, artifacts: ArtifactStore) -> Self {
        Self {
            executor,
            artifacts,
        }
    }

    pub fn artifacts(&self) -> &ArtifactStore {
        &self.artifacts
    }

    /// Execute a gate-validated command. The artifact is persisted before
    /// the action takes effect; a capture failure aborts the execution.
    pub fn run(&self, command: &SignedCommand) -> Result<bool> {
        let captured = match self.executor.capture(command)? {
            Some(artifact) => {
                self.artifacts.save(&command.rollback_token, &artifact)?;
                true
            }
            None => false,
        };
        self.executor.execute(command)?;
        Ok(captured)
    }
}
