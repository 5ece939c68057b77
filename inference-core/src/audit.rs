//! # Audit Sink
//!
//! Every terminal outcome emits exactly one audit event. No teacher
//! analogue (the teacher has no audit concept); built in the teacher's
//! structured-logging idiom (`tracing::info!` with typed fields), matching
//! how `ultrafast-gateway/src/metrics.rs` shapes its records. Persistence is
//! an injected collaborator per §1 — this crate ships only the trait and an
//! in-memory/tracing reference implementation.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Mutex;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AuditEventKind {
    InferenceStarted,
    InferenceCompleted,
    InferenceFailed,
    InferenceCancelled,
    StreamStarted,
    StreamCompleted,
    StreamFailed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEvent {
    pub kind: AuditEventKind,
    pub run_id: String,
    pub tenant_id: String,
    pub model: String,
    pub provider_id: Option<String>,
    pub duration_ms: u64,
    pub tokens_used: Option<u32>,
    pub error_kind: Option<crate::error::ErrorKind>,
    pub timestamp: chrono::DateTime<chrono::Utc>,
}

/// Append-only typed event stream. Concrete transports (Kafka, a database)
/// are external collaborators; the orchestrator only ever calls `record`.
#[async_trait]
pub trait AuditSink: Send + Sync {
    async fn record(&self, event: AuditEvent);
}

/// Emits each event as a structured `tracing` record. The default sink when
/// the embedding application injects none.
pub struct TracingAuditSink;

#[async_trait]
impl AuditSink for TracingAuditSink {
    async fn record(&self, event: AuditEvent) {
        tracing::info!(
            kind = ?event.kind,
            run_id = %event.run_id,
            tenant_id = %event.tenant_id,
            model = %event.model,
            provider_id = ?event.provider_id,
            duration_ms = event.duration_ms,
            tokens_used = ?event.tokens_used,
            error_kind = ?event.error_kind,
            "audit event"
        );
    }
}

/// In-memory sink for tests and single-process deployments with no external
/// audit store configured.
#[derive(Default)]
pub struct InMemoryAuditSink {
    events: Mutex<Vec<AuditEvent>>,
}

impl InMemoryAuditSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<AuditEvent> {
        self.events.lock().unwrap().clone()
    }

    /// Count of events for `run_id` whose kind is a terminal outcome
    /// (`*_COMPLETED`/`*_FAILED`/`*_CANCELLED`). Used to check the invariant
    /// that at most one terminal event is emitted per request.
    pub fn terminal_count_for(&self, run_id: &str) -> usize {
        self.events
            .lock()
            .unwrap()
            .iter()
            .filter(|e| e.run_id == run_id)
            .filter(|e| {
                matches!(
                    e.kind,
                    AuditEventKind::InferenceCompleted
                        | AuditEventKind::InferenceFailed
                        | AuditEventKind::InferenceCancelled
                        | AuditEventKind::StreamCompleted
                        | AuditEventKind::StreamFailed
                )
            })
            .count()
    }
}

#[async_trait]
impl AuditSink for InMemoryAuditSink {
    async fn record(&self, event: AuditEvent) {
        self.events.lock().unwrap().push(event);
    }
}
