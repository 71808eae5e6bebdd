//! Hard rate limits for response actions
//!
//! NON-CONFIGURABLE and server-side. These bound *how often* actions run
//! regardless of who asks; they are unrelated to the agents' offline
//! policy, which bounds *what* an agent may do.

use chrono::{DateTime, Duration, Utc};
use ransomeye_types::{DecisionOutcome, IncidentId, UserId};
use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;

use ransomeye_ledger::DecisionSink;

use crate::{Result, COMPONENT};

pub const PER_USER_PER_MINUTE: usize = 10;
pub const PER_INCIDENT_TOTAL: usize = 25;
pub const EMERGENCY_PER_INCIDENT: usize = 2;
pub const PER_HOST_PER_10_MINUTES: usize = 5;

#[derive(Default)]
struct LimiterState {
    user_events: HashMap<UserId, Vec<DateTime<Utc>>>,
    incident_regular: HashMap<IncidentId, usize>,
    incident_emergency: HashMap<IncidentId, usize>,
    host_events: HashMap<String, Vec<DateTime<Utc>>>,
}

/// Server-side action rate limiter
pub struct RateLimiter {
    state: Mutex<LimiterState>,
    sink: Arc<dyn DecisionSink>,
}

impl RateLimiter {
    pub fn new(sink: Arc<dyn DecisionSink>) -> Self {
        Self {
            state: Mutex::new(LimiterState::default()),
            sink,
        }
    }

    fn emit_hit(
        &self,
        event: &str,
        user_id: &UserId,
        limit_type: &str,
        detail: String,
    ) -> Result<()> {
        self.sink.emit(
            COMPONENT,
            event,
            json!({"type": "rate_limit", "id": limit_type}),
            json!({"type": "user", "identifier": user_id.to_string()}),
            json!({"limit_type": limit_type, "detail": detail}),
        )?;
        Ok(())
    }

    /// Check all limits and, when within them, record the action. The
    /// check and the recording are one atomic step.
    pub async fn acquire(
        &self,
        user_id: &UserId,
        incident_id: Option<&IncidentId>,
        host: &str,
        emergency: bool,
        now: DateTime<Utc>,
    ) -> Result<DecisionOutcome> {
        let mut state = self.state.lock().await;

        // per user, sliding minute
        let user_window = state.user_events.entry(*user_id).or_default();
        user_window.retain(|t| now - *t < Duration::minutes(1));
        if user_window.len() >= PER_USER_PER_MINUTE {
            let detail = format!(
                "{} actions in the last minute (max {})",
                user_window.len(),
                PER_USER_PER_MINUTE
            );
            drop(state);
            self.emit_hit("action_rate_limit_hit", user_id, "per_user_per_minute", detail.clone())?;
            return Ok(DecisionOutcome::deny("rate.per_user_per_minute", detail));
        }

        // per incident, lifetime totals
        if let Some(incident_id) = incident_id {
            if emergency {
                let count = state.incident_emergency.get(incident_id).copied().unwrap_or(0);
                if count >= EMERGENCY_PER_INCIDENT {
                    let detail = format!(
                        "{} emergency overrides for incident (max {})",
                        count, EMERGENCY_PER_INCIDENT
                    );
                    drop(state);
                    self.emit_hit("emergency_limit_hit", user_id, "emergency_per_incident", detail.clone())?;
                    return Ok(DecisionOutcome::deny("rate.emergency_per_incident", detail));
                }
            } else {
                let count = state.incident_regular.get(incident_id).copied().unwrap_or(0);
                if count >= PER_INCIDENT_TOTAL {
                    let detail = format!(
                        "{} actions for incident (max {})",
                        count, PER_INCIDENT_TOTAL
                    );
                    drop(state);
                    self.emit_hit("action_rate_limit_hit", user_id, "per_incident_total", detail.clone())?;
                    return Ok(DecisionOutcome::deny("rate.per_incident_total", detail));
                }
            }
        }

        // per host, sliding 10 minutes
        let host_window = state.host_events.entry(host.to_string()).or_default();
        host_window.retain(|t| now - *t < Duration::minutes(10));
        if host_window.len() >= PER_HOST_PER_10_MINUTES {
            let detail = format!(
                "{} actions for host in 10 minutes (max {})",
                host_window.len(),
                PER_HOST_PER_10_MINUTES
            );
            drop(state);
            self.emit_hit("action_rate_limit_hit", user_id, "per_host_per_10_minutes", detail.clone())?;
            return Ok(DecisionOutcome::deny("rate.per_host_per_10_minutes", detail));
        }

        // within limits: record
        state.user_events.entry(*user_id).or_default().push(now);
        state.host_events.entry(host.to_string()).or_default().push(now);
        if let Some(incident_id) = incident_id {
            if emergency {
                *state.incident_emergency.entry(*incident_id).or_default() += 1;
            } else {
                *state.incident_regular.entry(*incident_id).or_default() += 1;
            }
        }

        Ok(DecisionOutcome::Allow)
    }
}
