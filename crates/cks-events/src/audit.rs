//! In-memory audit trail of settled tool calls.
//!
//! [`AuditTrail`] is a synchronous subscriber: register it on the bus and it
//! records one [`AuditEntry`] for every call that reaches `success`, `error`
//! or `denied`. Entries keep the risk, the decision and the duration so a
//! reviewer can tell who allowed what and how long it ran.

use cks_core::{ApprovalDecision, RequestId, RiskLevel, SessionId, Timestamp, ToolRunStatus};
use serde::{Deserialize, Serialize};
use std::sync::{Mutex, MutexGuard};
use tracing::warn;

use crate::event::GateEvent;
use crate::subscriber::EventSubscriber;

/// One settled tool call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditEntry {
    /// When the call settled.
    pub timestamp: Timestamp,
    /// Owning session.
    pub session_id: SessionId,
    /// Request identifier.
    pub request_id: RequestId,
    /// Tool name.
    pub tool: String,
    /// Risk tier at classification.
    pub risk: RiskLevel,
    /// Display detail shown to the human.
    pub detail: String,
    /// How the gate settled the approval.
    pub decision: ApprovalDecision,
    /// Terminal status.
    pub status: ToolRunStatus,
    /// Run time, for calls that ran.
    pub duration_ms: Option<u64>,
    /// Denial or error reason.
    pub message: Option<String>,
}

/// Subscriber that records terminal tool-call events.
#[derive(Debug, Default)]
pub struct AuditTrail {
    entries: Mutex<Vec<AuditEntry>>,
}

impl AuditTrail {
    /// Create an empty trail.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Vec<AuditEntry>> {
        self.entries.lock().unwrap_or_else(|e| {
            warn!("Audit trail lock poisoned, recovering");
            e.into_inner()
        })
    }

    /// All entries in settlement order.
    #[must_use]
    pub fn entries(&self) -> Vec<AuditEntry> {
        self.lock().clone()
    }

    /// Entries of one session.
    #[must_use]
    pub fn entries_for(&self, session_id: &SessionId) -> Vec<AuditEntry> {
        self.lock()
            .iter()
            .filter(|e| &e.session_id == session_id)
            .cloned()
            .collect()
    }

    /// Number of recorded entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// Whether nothing has been recorded.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }
}

impl EventSubscriber for AuditTrail {
    fn on_event(&self, event: &GateEvent) {
        let Some(call) = event.as_tool_call() else {
            return;
        };
        self.lock().push(AuditEntry {
            timestamp: call.ended_at.unwrap_or_else(Timestamp::now),
            session_id: call.session_id().clone(),
            request_id: call.request_id().clone(),
            tool: call.tool().to_owned(),
            risk: call.risk(),
            detail: call.classification.detail.clone(),
            decision: call.decision,
            status: call.status,
            duration_ms: call.duration_ms,
            message: call.message.clone(),
        });
    }

    fn accepts(&self, event: &GateEvent) -> bool {
        event.is_terminal()
    }

    #[allow(clippy::unnecessary_literal_bound)]
    fn name(&self) -> &str {
        "audit_trail"
    }
}
