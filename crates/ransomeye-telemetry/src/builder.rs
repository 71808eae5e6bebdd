//! Envelope construction with persistent chain state

use chrono::{DateTime, Utc};
use ransomeye_types::{
    BootId, ComponentInstanceId, EventEnvelope, EventId, EventIdentity, EventIntegrity,
    MachineId,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::{Path, PathBuf};

use ransomeye_common::safe_write_file;
use ransomeye_crypto::{envelope_hash, sign_detached, KeyPair};

use crate::{Result, TelemetryError};

/// Persisted chain head for one component instance.
/// The sequence is never reused across restarts; a boot change resets the
/// hash chain but the sequence keeps climbing.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct ChainState {
    boot_id: BootId,
    last_sequence: u64,
    last_hash: Option<String>,
}

/// Static identity of the emitting instance
#[derive(Debug, Clone)]
pub struct BuilderIdentity {
    pub machine_id: MachineId,
    pub component: String,
    pub component_instance_id: ComponentInstanceId,
    pub hostname: String,
    pub boot_id: BootId,
    pub agent_version: String,
}

/// Builds signed, chained envelopes for one component instance
pub struct EnvelopeBuilder {
    identity: BuilderIdentity,
    keypair: KeyPair,
    state_path: PathBuf,
    last_sequence: u64,
    last_hash: Option<String>,
}

impl EnvelopeBuilder {
    /// Open the builder, reseeding sequence state from the persisted file.
    /// A boot-id change resets `last_hash` but continues the sequence.
    pub fn open(
        identity: BuilderIdentity,
        keypair: KeyPair,
        state_path: impl AsRef<Path>,
    ) -> Result<Self> {
        let state_path = state_path.as_ref().to_path_buf();
        let (last_sequence, last_hash) = if state_path.exists() {
            let text = std::fs::read_to_string(&state_path)?;
            let state: ChainState = serde_json::from_str(&text)
                .map_err(|e| TelemetryError::State(format!("corrupt chain state: {}", e)))?;
            if state.boot_id == identity.boot_id {
                (state.last_sequence, state.last_hash)
            } else {
                tracing::info!(
                    instance = %identity.component_instance_id,
                    old_boot = %state.boot_id,
                    new_boot = %identity.boot_id,
                    "boot change: hash chain reset, sequence continues"
                );
                (state.last_sequence, None)
            }
        } else {
            (0, None)
        };

        Ok(Self {
            identity,
            keypair,
            state_path,
            last_sequence,
            last_hash,
        })
    }

    pub fn last_sequence(&self) -> u64 {
        self.last_sequence
    }

    fn persist_state(&self) -> Result<()> {
        let state = ChainState {
            boot_id: self.identity.boot_id.clone(),
            last_sequence: self.last_sequence,
            last_hash: self.last_hash.clone(),
        };
        let text = serde_json::to_string(&state)
            .map_err(|e| TelemetryError::State(e.to_string()))?;
        safe_write_file(&self.state_path, text.as_bytes())
            .map_err(|e| TelemetryError::State(e.to_string()))?;
        Ok(())
    }

    /// Build, hash, sign, and chain one envelope.
    ///
    /// The chain head is persisted before the envelope is returned, so a
    /// crash after `build` cannot produce a duplicate sequence number.
    pub fn build(&mut self, payload: Value, observed_at: DateTime<Utc>) -> Result<EventEnvelope> {
        let sequence = self.last_sequence + 1;

        let mut envelope = EventEnvelope {
            event_id: EventId::new(),
            machine_id: self.identity.machine_id.clone(),
            component: self.identity.component.clone(),
            component_instance_id: self.identity.component_instance_id.clone(),
            observed_at,
            ingested_at: observed_at,
            sequence,
            payload,
            identity: EventIdentity {
                hostname: self.identity.hostname.clone(),
                boot_id: self.identity.boot_id.clone(),
                agent_version: self.identity.agent_version.clone(),
            },
            integrity: EventIntegrity {
                hash_sha256: String::new(),
                prev_hash_sha256: self.last_hash.clone(),
            },
            signature: None,
            signing_key_id: None,
        };

        let hash = envelope_hash(&envelope)?;
        envelope.integrity.hash_sha256 = hash.clone();

        // the signature covers the ASCII hex hash, not the raw bytes
        let signed = sign_detached(&self.keypair, hash.as_bytes())?;
        envelope.signature = Some(signed.signature);
        envelope.signing_key_id = Some(signed.signing_key_id);

        self.last_sequence = sequence;
        self.last_hash = Some(hash);
        self.persist_state()?;

        Ok(envelope)
    }
}

/// Read the current boot id from the kernel
pub fn system_boot_id() -> Result<BootId> {
    let text = std::fs::read_to_string("/proc/sys/kernel/random/boot_id")?;
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return Err(TelemetryError::State("boot_id is empty".to_string()));
    }
    Ok(BootId::new(trimmed))
}
