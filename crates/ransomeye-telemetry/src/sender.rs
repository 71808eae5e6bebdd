//! Batched envelope transmission
//!
//! One transmission loop drains the buffer in batches of at most 500 with
//! a flush interval of at least 5 seconds. One attempt per envelope, 30 s
//! HTTP timeout, no retries: a failed send goes back through the buffer's
//! spillover on the next collector pass, and the ingest gateway's
//! idempotency makes redelivery safe.

use ransomeye_types::EventEnvelope;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

use crate::{Result, TelemetryBuffer, TelemetryError};

pub const MAX_BATCH_SIZE: usize = 500;
pub const MIN_FLUSH_INTERVAL: Duration = Duration::from_secs(5);
pub const SEND_TIMEOUT: Duration = Duration::from_secs(30);

/// Outcome of one batch transmission
#[derive(Debug, Default, Clone, Copy)]
pub struct SendReport {
    pub accepted: usize,
    pub rejected: usize,
}

/// Posts envelopes to the ingest gateway
pub struct TelemetrySender {
    client: reqwest::Client,
    ingest_url: String,
    auth_token: String,
}

impl TelemetrySender {
    pub fn new(ingest_url: impl Into<String>, auth_token: impl Into<String>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(SEND_TIMEOUT)
            .build()
            .map_err(|e| TelemetryError::Transmission(e.to_string()))?;
        Ok(Self {
            client,
            ingest_url: ingest_url.into(),
            auth_token: auth_token.into(),
        })
    }

    /// Send one envelope; one attempt, no retry
    pub async fn send_one(&self, envelope: &EventEnvelope) -> Result<bool> {
        let response = self
            .client
            .post(&self.ingest_url)
            .bearer_auth(&self.auth_token)
            .json(envelope)
            .send()
            .await
            .map_err(|e| TelemetryError::Transmission(e.to_string()))?;
        Ok(response.status().is_success())
    }

    /// Send a batch envelope-by-envelope. A duplicate rejection (409) is
    /// counted as accepted: the gateway already holds the event.
    pub async fn send_batch(&self, envelopes: &[EventEnvelope]) -> Result<SendReport> {
        let mut report = SendReport::default();
        for envelope in envelopes.iter().take(MAX_BATCH_SIZE) {
            let response = self
                .client
                .post(&self.ingest_url)
                .bearer_auth(&self.auth_token)
                .json(envelope)
                .send()
                .await
                .map_err(|e| TelemetryError::Transmission(e.to_string()))?;

            if response.status().is_success()
                || response.status() == reqwest::StatusCode::CONFLICT
            {
                report.accepted += 1;
            } else {
                report.rejected += 1;
                tracing::warn!(
                    event_id = %envelope.event_id,
                    status = %response.status(),
                    "ingest rejected envelope"
                );
            }
        }
        Ok(report)
    }
}

/// The transmission loop: drain, send, sleep, until shutdown.
/// Errors are logged and the loop continues; the loop only exits on the
/// shutdown flag.
pub async fn run_transmission_loop(
    sender: TelemetrySender,
    buffer: Arc<Mutex<TelemetryBuffer>>,
    shutdown: Arc<AtomicBool>,
    flush_interval: Duration,
) {
    let interval = flush_interval.max(MIN_FLUSH_INTERVAL);
    tracing::info!(interval_secs = interval.as_secs(), "transmission loop started");

    while !shutdown.load(Ordering::SeqCst) {
        let batch = {
            let mut buffer = buffer.lock().await;
            match buffer.drain(MAX_BATCH_SIZE) {
                Ok(batch) => batch,
                Err(e) => {
                    tracing::error!(error = %e, "buffer drain failed");
                    Vec::new()
                }
            }
        };

        if !batch.is_empty() {
            match sender.send_batch(&batch).await {
                Ok(report) => {
                    tracing::debug!(
                        accepted = report.accepted,
                        rejected = report.rejected,
                        "batch transmitted"
                    );
                }
                Err(e) => {
                    tracing::warn!(error = %e, "batch transmission failed");
                }
            }
        }

        tokio::time::sleep(interval).await;
    }

    tracing::info!("transmission loop stopped");
}
