//! Error types shared by every crate of the gate.

use thiserror::Error;

use crate::status::ToolRunStatus;
use crate::tool::ClassificationError;
use crate::types::{RequestId, SessionId};

/// Errors raised while gating a tool call.
///
/// Every variant is local to a single request. Callers record it on that
/// request and keep processing the others.
#[derive(Debug, Error)]
pub enum GateError {
    /// Malformed arguments for a known tool.
    #[error("classification error: {0}")]
    Classification(#[from] ClassificationError),

    /// The grant store could not be consulted or written.
    #[error("grant store unavailable: {0}")]
    GrantStore(String),

    /// A decision targeted a request that is not awaiting approval.
    #[error("request {request_id} is not pending approval")]
    QueueConflict {
        /// The targeted request.
        request_id: RequestId,
    },

    /// The executor reported a failure.
    #[error("execution failed: {0}")]
    Execution(String),

    /// No live request carries this identifier.
    #[error("unknown request: {request_id}")]
    UnknownRequest {
        /// The unknown identifier.
        request_id: RequestId,
    },

    /// A status change that the run-state machine forbids.
    #[error("invalid transition for {request_id}: {from} -> {to}")]
    InvalidTransition {
        /// The request being moved.
        request_id: RequestId,
        /// Current status.
        from: ToolRunStatus,
        /// Rejected target status.
        to: ToolRunStatus,
    },

    /// A live request already carries this identifier.
    #[error("duplicate request id: {request_id}")]
    DuplicateRequest {
        /// The reused identifier.
        request_id: RequestId,
    },

    /// The session was closed and accepts no new requests.
    #[error("session closed: {session_id}")]
    SessionClosed {
        /// The closed session.
        session_id: SessionId,
    },

    /// Internal error.
    #[error("internal error: {0}")]
    Internal(String),
}

impl GateError {
    /// Whether the caller can treat this error as a harmless no-op.
    #[must_use]
    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::QueueConflict { .. } | Self::UnknownRequest { .. })
    }
}

/// Result type for gate operations.
pub type GateResult<T> = Result<T, GateError>;
