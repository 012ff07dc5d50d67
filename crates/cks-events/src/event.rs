//! Event types for the gate's event bus.

use chrono::{DateTime, Utc};
use cks_core::{GrantScope, SessionId, ToolCall, ToolRunStatus};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Metadata attached to every event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventMetadata {
    /// Unique event identifier.
    pub event_id: Uuid,
    /// When the event was created.
    pub timestamp: DateTime<Utc>,
    /// Session the event concerns.
    pub session_id: Option<SessionId>,
    /// Source component that generated the event.
    pub source: String,
}

impl EventMetadata {
    /// Create new event metadata.
    #[must_use]
    pub fn new(source: impl Into<String>) -> Self {
        Self {
            event_id: Uuid::new_v4(),
            timestamp: Utc::now(),
            session_id: None,
            source: source.into(),
        }
    }

    /// Set session ID.
    #[must_use]
    pub fn with_session_id(mut self, id: SessionId) -> Self {
        self.session_id = Some(id);
        self
    }
}

impl Default for EventMetadata {
    fn default() -> Self {
        Self::new("unknown")
    }
}

/// Everything the gate reports to observers.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum GateEvent {
    /// A tool call changed status. Carries the full updated snapshot.
    ToolCall {
        /// Event metadata.
        metadata: EventMetadata,
        /// The call after the transition.
        call: Box<ToolCall>,
    },

    /// A session grant was added.
    GrantAdded {
        /// Event metadata.
        metadata: EventMetadata,
        /// The new scope.
        scope: GrantScope,
    },

    /// A session was aborted: pending calls denied, running calls flagged.
    SessionCancelled {
        /// Event metadata.
        metadata: EventMetadata,
        /// Number of pending calls that were denied.
        denied: usize,
        /// Number of running calls flagged for cancellation.
        flagged: usize,
    },

    /// A session ended and its grants were cleared.
    SessionClosed {
        /// Event metadata.
        metadata: EventMetadata,
    },
}

impl GateEvent {
    /// Event for a tool-call transition.
    #[must_use]
    pub fn tool_call(source: &str, call: ToolCall) -> Self {
        Self::ToolCall {
            metadata: EventMetadata::new(source).with_session_id(call.session_id().clone()),
            call: Box::new(call),
        }
    }

    /// Get the event metadata.
    #[must_use]
    pub fn metadata(&self) -> &EventMetadata {
        match self {
            Self::ToolCall { metadata, .. }
            | Self::GrantAdded { metadata, .. }
            | Self::SessionCancelled { metadata, .. }
            | Self::SessionClosed { metadata } => metadata,
        }
    }

    /// Get the event type as a string.
    #[must_use]
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::ToolCall { .. } => "tool_call",
            Self::GrantAdded { .. } => "grant_added",
            Self::SessionCancelled { .. } => "session_cancelled",
            Self::SessionClosed { .. } => "session_closed",
        }
    }

    /// Session the event concerns.
    #[must_use]
    pub fn session_id(&self) -> Option<&SessionId> {
        self.metadata().session_id.as_ref()
    }

    /// The tool-call snapshot, for transition events.
    #[must_use]
    pub fn as_tool_call(&self) -> Option<&ToolCall> {
        match self {
            Self::ToolCall { call, .. } => Some(call.as_ref()),
            _ => None,
        }
    }

    /// Status the call moved to, for transition events.
    #[must_use]
    pub fn status(&self) -> Option<ToolRunStatus> {
        self.as_tool_call().map(|c| c.status)
    }

    /// Whether this event reports a call reaching a terminal status.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        self.as_tool_call().is_some_and(ToolCall::is_terminal)
    }
}
