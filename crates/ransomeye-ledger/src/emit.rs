//! The decision-emit capability
//!
//! RBAC and TRE must write audit entries without depending on the ledger's
//! writer internals (the original system had a dependency cycle here).
//! They receive a [`DecisionSink`] at construction instead.

use serde_json::Value;
use std::sync::{Arc, Mutex};

use crate::{AppendReceipt, AuditLedger, Result};

/// Capability to record an authorization decision
pub trait DecisionSink: Send + Sync {
    fn emit(
        &self,
        component: &str,
        action_type: &str,
        subject: Value,
        actor: Value,
        payload: Value,
    ) -> Result<AppendReceipt>;
}

impl DecisionSink for AuditLedger {
    fn emit(
        &self,
        component: &str,
        action_type: &str,
        subject: Value,
        actor: Value,
        payload: Value,
    ) -> Result<AppendReceipt> {
        self.append(component, action_type, subject, actor, payload)
    }
}

/// A recorded decision (test sink)
#[derive(Debug, Clone)]
pub struct RecordedDecision {
    pub component: String,
    pub action_type: String,
    pub subject: Value,
    pub actor: Value,
    pub payload: Value,
}

/// In-memory sink for unit tests
#[derive(Default)]
pub struct MemorySink {
    records: Mutex<Vec<RecordedDecision>>,
}

impl MemorySink {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn records(&self) -> Vec<RecordedDecision> {
        self.records.lock().map(|r| r.clone()).unwrap_or_default()
    }

    /// Records with a given audit event name
    pub fn records_of(&self, action_type: &str) -> Vec<RecordedDecision> {
        self.records()
            .into_iter()
            .filter(|r| r.action_type == action_type)
            .collect()
    }
}

impl DecisionSink for MemorySink {
    fn emit(
        &self,
        component: &str,
        action_type: &str,
        subject: Value,
        actor: Value,
        payload: Value,
    ) -> Result<AppendReceipt> {
        let receipt = AppendReceipt {
            ledger_entry_id: ransomeye_types::LedgerEntryId::new(),
            hash: format!("mem-{}", self.records.lock().map(|r| r.len()).unwrap_or(0)),
        };
        if let Ok(mut records) = self.records.lock() {
            records.push(RecordedDecision {
                component: component.to_string(),
                action_type: action_type.to_string(),
                subject,
                actor,
                payload,
            });
        }
        Ok(receipt)
    }
}
