//! Operational health telemetry for the ingest gateway
//!
//! The health surface exposes aggregate numbers only: no tenant
//! identifiers, hostnames, IPs, or payload samples.

use serde::Serialize;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::time::Instant;

/// Aggregate system status derived from the counters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SystemStatus {
    Healthy,
    Degraded,
    Critical,
}

/// Snapshot returned by `GET /health/metrics`
#[derive(Debug, Clone, Serialize)]
pub struct MetricsSnapshot {
    pub system_status: SystemStatus,
    pub ingest_rate_eps: f64,
    pub db_write_latency_ms: u64,
    pub queue_depth: u64,
    pub agent_heartbeat_lag_sec: i64,
    pub events_accepted_total: u64,
    pub events_rejected_total: u64,
}

/// Lock-free ingest counters
pub struct IngestMetrics {
    started: Instant,
    accepted: AtomicU64,
    rejected: AtomicU64,
    store_errors: AtomicU64,
    last_write_latency_ms: AtomicU64,
    queue_depth: AtomicU64,
    heartbeat_lag_sec: AtomicI64,
}

impl Default for IngestMetrics {
    fn default() -> Self {
        Self {
            started: Instant::now(),
            accepted: AtomicU64::new(0),
            rejected: AtomicU64::new(0),
            store_errors: AtomicU64::new(0),
            last_write_latency_ms: AtomicU64::new(0),
            queue_depth: AtomicU64::new(0),
            heartbeat_lag_sec: AtomicI64::new(0),
        }
    }
}

impl IngestMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_accepted(&self, write_latency_ms: u64) {
        self.accepted.fetch_add(1, Ordering::Relaxed);
        self.last_write_latency_ms
            .store(write_latency_ms, Ordering::Relaxed);
    }

    pub fn record_rejected(&self) {
        self.rejected.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_store_error(&self) {
        self.store_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn set_queue_depth(&self, depth: u64) {
        self.queue_depth.store(depth, Ordering::Relaxed);
    }

    pub fn set_heartbeat_lag(&self, lag_sec: i64) {
        self.heartbeat_lag_sec.store(lag_sec, Ordering::Relaxed);
    }

    fn status(&self) -> SystemStatus {
        if self.store_errors.load(Ordering::Relaxed) > 0 {
            return SystemStatus::Critical;
        }
        let accepted = self.accepted.load(Ordering::Relaxed);
        let rejected = self.rejected.load(Ordering::Relaxed);
        let total = accepted + rejected;
        if total >= 20 && rejected * 2 > total {
            return SystemStatus::Degraded;
        }
        SystemStatus::Healthy
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        let accepted = self.accepted.load(Ordering::Relaxed);
        let elapsed = self.started.elapsed().as_secs_f64().max(1.0);
        MetricsSnapshot {
            system_status: self.status(),
            ingest_rate_eps: accepted as f64 / elapsed,
            db_write_latency_ms: self.last_write_latency_ms.load(Ordering::Relaxed),
            queue_depth: self.queue_depth.load(Ordering::Relaxed),
            agent_heartbeat_lag_sec: self.heartbeat_lag_sec.load(Ordering::Relaxed),
            events_accepted_total: accepted,
            events_rejected_total: self.rejected.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn healthy_by_default() {
        let metrics = IngestMetrics::new();
        assert_eq!(metrics.snapshot().system_status, SystemStatus::Healthy);
    }

    #[test]
    fn store_error_is_critical() {
        let metrics = IngestMetrics::new();
        metrics.record_store_error();
        assert_eq!(metrics.snapshot().system_status, SystemStatus::Critical);
    }

    #[test]
    fn high_rejection_ratio_degrades() {
        let metrics = IngestMetrics::new();
        for _ in 0..5 {
            metrics.record_accepted(1);
        }
        for _ in 0..25 {
            metrics.record_rejected();
        }
        assert_eq!(metrics.snapshot().system_status, SystemStatus::Degraded);
    }

    #[test]
    fn snapshot_carries_no_identifiers() {
        let metrics = IngestMetrics::new();
        metrics.record_accepted(3);
        let text = serde_json::to_string(&metrics.snapshot()).unwrap();
        // the surface is numbers and an enum only
        assert!(!text.contains("hostname"));
        assert!(!text.contains("machine_id"));
        assert!(!text.contains("payload"));
    }
}
