//! Audit sink: append-only record of every state-changing onboarding call.

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::onboarding::model::AuditEntry;

/// Receives audit entries after they are durably stored on the aggregate.
#[async_trait]
pub trait AuditSink: Send + Sync {
    async fn record(&self, employee_id: &str, entry: &AuditEntry);
}

/// Emits each entry as a structured tracing event.
#[derive(Debug, Default)]
pub struct TracingAuditSink;

#[async_trait]
impl AuditSink for TracingAuditSink {
    async fn record(&self, employee_id: &str, entry: &AuditEntry) {
        let detail = serde_json::to_string(&entry.action).unwrap_or_default();
        tracing::info!(
            target: "onboarding::audit",
            employee_id = %employee_id,
            actor = %entry.actor,
            action = entry.action.name(),
            version = entry.version,
            entry_id = %entry.id,
            detail = %detail,
            "Audit"
        );
    }
}

/// Keeps entries in memory. Useful for tests and embedding.
#[derive(Debug, Default)]
pub struct MemoryAuditSink {
    entries: RwLock<Vec<(String, AuditEntry)>>,
}

impl MemoryAuditSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn entries(&self) -> Vec<(String, AuditEntry)> {
        self.entries.read().await.clone()
    }

    /// Action names recorded for one employee, oldest first.
    pub async fn actions_for(&self, employee_id: &str) -> Vec<&'static str> {
        self.entries
            .read()
            .await
            .iter()
            .filter(|(id, _)| id == employee_id)
            .map(|(_, e)| e.action.name())
            .collect()
    }
}

#[async_trait]
impl AuditSink for MemoryAuditSink {
    async fn record(&self, employee_id: &str, entry: &AuditEntry) {
        self.entries
            .write()
            .await
            .push((employee_id.to_string(), entry.clone()));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::onboarding::model::{AuditAction, ProgressAggregate};

    #[tokio::test]
    async fn memory_sink_filters_by_employee() {
        let sink = MemoryAuditSink::new();
        let mut a = ProgressAggregate::new("emp-1", "Alice");
        let mut b = ProgressAggregate::new("emp-2", "Bob");

        sink.record("emp-1", &a.record("emp-1", AuditAction::NdaSigned)).await;
        sink.record("emp-2", &b.record("emp-2", AuditAction::VideoEnded)).await;
        sink.record("emp-1", &a.record("mgr-1", AuditAction::Reset)).await;

        assert_eq!(sink.entries().await.len(), 3);
        assert_eq!(sink.actions_for("emp-1").await, vec!["nda_signed", "reset"]);
    }

    #[tokio::test]
    async fn tracing_sink_accepts_entries() {
        let mut p = ProgressAggregate::new("emp-1", "Alice");
        let entry = p.record("emp-1", AuditAction::Completed);
        TracingAuditSink.record("emp-1", &entry).await;
    }
}
