//! Run statuses, approval decisions and the tool-call snapshot.
//!
//! [`ToolCall`] is the unit every lifecycle event carries: the immutable
//! request, its classification and the current run state. The run-state
//! machine itself is enforced here by [`ToolCall::advance`], so no component
//! can move a request backwards or out of a terminal state.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{GateError, GateResult};
use crate::tool::ToolCallRequest;
use crate::types::{RequestId, RiskLevel, SessionId, Timestamp};

/// Run state of a tool call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolRunStatus {
    /// Waiting for a human decision.
    PendingApproval,
    /// Handed to the executor.
    Running,
    /// Executor reported success.
    Success,
    /// Executor reported a failure, or the gate failed the request.
    Error,
    /// Refused by the human, by expiry or by session cancellation.
    Denied,
}

impl ToolRunStatus {
    /// Whether no further transition is possible.
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Success | Self::Error | Self::Denied)
    }

    /// Whether a freshly classified request may start in this status.
    #[must_use]
    pub fn is_initial(self) -> bool {
        matches!(self, Self::PendingApproval | Self::Running)
    }

    /// Whether the run-state machine allows moving from `self` to `next`.
    #[must_use]
    pub fn can_transition_to(self, next: Self) -> bool {
        matches!(
            (self, next),
            (
                Self::PendingApproval,
                Self::Running | Self::Denied | Self::Error
            ) | (Self::Running, Self::Success | Self::Error)
        )
    }
}

impl fmt::Display for ToolRunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::PendingApproval => "pending_approval",
            Self::Running => "running",
            Self::Success => "success",
            Self::Error => "error",
            Self::Denied => "denied",
        };
        f.write_str(s)
    }
}

/// How the approval gate settled a request.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalDecision {
    /// No decision yet.
    #[default]
    Pending,
    /// Approved once.
    Approved,
    /// Approved together with every other request of the session.
    ApprovedAll,
    /// Approved together with every request of the same tool in the session.
    ApprovedTool,
    /// Low risk or covered by a session grant; never prompted.
    AutoApproved,
    /// Refused.
    Denied,
    /// Nobody decided before the approval timeout.
    Expired,
}

impl ApprovalDecision {
    /// Whether the request is allowed to run.
    #[must_use]
    pub fn is_approved(self) -> bool {
        matches!(
            self,
            Self::Approved | Self::ApprovedAll | Self::ApprovedTool | Self::AutoApproved
        )
    }

    /// Whether the decision has been made.
    #[must_use]
    pub fn is_settled(self) -> bool {
        !matches!(self, Self::Pending)
    }
}

impl fmt::Display for ApprovalDecision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Pending => "pending",
            Self::Approved => "approved",
            Self::ApprovedAll => "approved_all",
            Self::ApprovedTool => "approved_tool",
            Self::AutoApproved => "auto_approved",
            Self::Denied => "denied",
            Self::Expired => "expired",
        };
        f.write_str(s)
    }
}

/// Result of classifying a tool call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Classification {
    /// Risk tier.
    pub risk: RiskLevel,
    /// One-line summary for the approval prompt.
    pub description: String,
    /// Display-only detail (command text, path, or argument dump).
    pub detail: String,
}

/// Outcome reported by the executor for a running request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "outcome")]
pub enum ExecutionOutcome {
    /// The action completed.
    Success {
        /// Text output shown to the agent.
        output: String,
    },
    /// The action failed.
    Error {
        /// Failure reason, recorded verbatim.
        message: String,
    },
}

impl ExecutionOutcome {
    /// Successful outcome.
    #[must_use]
    pub fn success(output: impl Into<String>) -> Self {
        Self::Success {
            output: output.into(),
        }
    }

    /// Failed outcome.
    #[must_use]
    pub fn error(message: impl Into<String>) -> Self {
        Self::Error {
            message: message.into(),
        }
    }

    /// Whether the action completed.
    #[must_use]
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success { .. })
    }
}

/// Full snapshot of one tool call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    /// The request as the agent sent it.
    pub request: ToolCallRequest,
    /// Classification computed at submission.
    pub classification: Classification,
    /// Current run state.
    pub status: ToolRunStatus,
    /// Approval decision.
    pub decision: ApprovalDecision,
    /// Human-readable reason for denials and errors.
    pub message: Option<String>,
    /// Executor output on success.
    pub output: Option<String>,
    /// When the call entered `running`.
    pub started_at: Option<Timestamp>,
    /// When the call reached a terminal status.
    pub ended_at: Option<Timestamp>,
    /// `ended_at - started_at`, for calls that ran.
    pub duration_ms: Option<u64>,
    /// The session asked the executor to stop this call.
    pub cancel_requested: bool,
}

impl ToolCall {
    /// Snapshot of a freshly classified request.
    ///
    /// # Errors
    ///
    /// Returns [`GateError::InvalidTransition`] if `status` is not a valid initial status.
    pub fn new(
        request: ToolCallRequest,
        classification: Classification,
        status: ToolRunStatus,
    ) -> GateResult<Self> {
        if !status.is_initial() {
            return Err(GateError::InvalidTransition {
                request_id: request.request_id,
                from: ToolRunStatus::PendingApproval,
                to: status,
            });
        }
        let now = Timestamp::now();
        let mut call = Self {
            request,
            classification,
            status,
            decision: ApprovalDecision::Pending,
            message: None,
            output: None,
            started_at: None,
            ended_at: None,
            duration_ms: None,
            cancel_requested: false,
        };
        if status == ToolRunStatus::Running {
            call.started_at = Some(now);
        }
        Ok(call)
    }

    /// Request identifier.
    #[must_use]
    pub fn request_id(&self) -> &RequestId {
        &self.request.request_id
    }

    /// Owning session.
    #[must_use]
    pub fn session_id(&self) -> &SessionId {
        &self.request.session_id
    }

    /// Tool name.
    #[must_use]
    pub fn tool(&self) -> &str {
        &self.request.tool
    }

    /// Risk tier.
    #[must_use]
    pub fn risk(&self) -> RiskLevel {
        self.classification.risk
    }

    /// Whether the call reached a terminal status.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Move the call to `next`, stamping `started_at`, `ended_at` and
    /// `duration_ms` as appropriate.
    ///
    /// # Errors
    ///
    /// Returns [`GateError::InvalidTransition`] if the run-state machine forbids the move.
    pub fn advance(&mut self, next: ToolRunStatus, at: Timestamp) -> GateResult<()> {
        if !self.status.can_transition_to(next) {
            return Err(GateError::InvalidTransition {
                request_id: self.request.request_id.clone(),
                from: self.status,
                to: next,
            });
        }
        self.status = next;
        if next == ToolRunStatus::Running {
            self.started_at = Some(at);
        }
        if next.is_terminal() {
            self.ended_at = Some(at);
            self.duration_ms = self.started_at.map(|start| at.millis_since(&start));
        }
        Ok(())
    }
}
