//! Prelude module - commonly used types for convenient import.
//!
//! Use `use cks_core::prelude::*;` to import all essential types.

// Errors
pub use crate::{GateError, GateResult};

// Identifiers and time
pub use crate::{RequestId, RiskLevel, SessionId, Timestamp};

// Requests
pub use crate::{ClassificationError, ToolArguments, ToolCallRequest, ToolInput};

// Grants
pub use crate::{ApprovalGrant, GrantScope};

// Lifecycle
pub use crate::{ApprovalDecision, Classification, ExecutionOutcome, ToolCall, ToolRunStatus};
