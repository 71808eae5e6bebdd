//! Bounded telemetry buffer with disk spillover
//!
//! One collector thread pushes, one transmission loop drains. When the
//! in-memory queue is full the oldest envelopes spill to a JSONL file so
//! a slow or offline ingest never drops telemetry on the floor.

use ransomeye_types::EventEnvelope;
use std::collections::VecDeque;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};

use crate::{Result, TelemetryError};

pub const DEFAULT_BUFFER_CAPACITY: usize = 10_000;

/// Bounded in-memory queue with JSONL spillover
pub struct TelemetryBuffer {
    capacity: usize,
    queue: VecDeque<EventEnvelope>,
    spill_path: PathBuf,
    spilled_total: u64,
}

impl TelemetryBuffer {
    pub fn new(capacity: usize, spill_path: impl AsRef<Path>) -> Self {
        Self {
            capacity: capacity.max(1),
            queue: VecDeque::new(),
            spill_path: spill_path.as_ref().to_path_buf(),
            spilled_total: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty() && !self.spill_path.exists()
    }

    pub fn spilled_total(&self) -> u64 {
        self.spilled_total
    }

    /// Push an envelope, spilling the oldest entry to disk when full
    pub fn push(&mut self, envelope: EventEnvelope) -> Result<()> {
        if self.queue.len() >= self.capacity {
            if let Some(oldest) = self.queue.pop_front() {
                self.spill(&oldest)?;
            }
        }
        self.queue.push_back(envelope);
        Ok(())
    }

    fn spill(&mut self, envelope: &EventEnvelope) -> Result<()> {
        if let Some(parent) = self.spill_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.spill_path)?;
        let line = serde_json::to_string(envelope)
            .map_err(|e| TelemetryError::Serialization(e.to_string()))?;
        writeln!(file, "{}", line)?;
        self.spilled_total += 1;
        Ok(())
    }

    /// Drain up to `max` envelopes, spillover first (oldest data first)
    pub fn drain(&mut self, max: usize) -> Result<Vec<EventEnvelope>> {
        let mut batch = Vec::with_capacity(max.min(self.queue.len()));

        if self.spill_path.exists() {
            let text = std::fs::read_to_string(&self.spill_path)?;
            let mut remaining_lines = Vec::new();
            for line in text.lines() {
                if line.trim().is_empty() {
                    continue;
                }
                if batch.len() < max {
                    let envelope: EventEnvelope = serde_json::from_str(line)
                        .map_err(|e| TelemetryError::Serialization(e.to_string()))?;
                    batch.push(envelope);
                } else {
                    remaining_lines.push(line.to_string());
                }
            }
            if remaining_lines.is_empty() {
                std::fs::remove_file(&self.spill_path)?;
            } else {
                std::fs::write(&self.spill_path, remaining_lines.join("\n") + "\n")?;
            }
        }

        while batch.len() < max {
            match self.queue.pop_front() {
                Some(envelope) => batch.push(envelope),
                None => break,
            }
        }

        Ok(batch)
    }
}
