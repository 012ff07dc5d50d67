//! CKS Core - Foundation types for the CKS tool-call gate.
//!
//! This crate provides:
//! - Identifiers for sessions and tool-call requests
//! - The [`ToolCallRequest`] data model and its typed [`ToolInput`] view
//! - Risk tiers, run statuses and approval decisions
//! - Session grant scopes
//! - The [`ToolCall`] snapshot carried by lifecycle events
//! - The shared [`GateError`] taxonomy
//!
//! Everything here is plain data. Classification, approval and execution
//! live in `cks-approval` and `cks-desktop`.

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![deny(clippy::all)]
#![warn(unreachable_pub)]
#![deny(clippy::unwrap_used)]
#![cfg_attr(test, allow(clippy::unwrap_used))]

pub mod prelude;

pub mod error;
pub mod grant;
pub mod status;
pub mod tool;
pub mod types;

pub use error::{GateError, GateResult};
pub use grant::{ApprovalGrant, GrantScope};
pub use status::{ApprovalDecision, Classification, ExecutionOutcome, ToolCall, ToolRunStatus};
pub use tool::{ClassificationError, ToolArguments, ToolCallRequest, ToolInput};
pub use types::{RequestId, RiskLevel, SessionId, Timestamp};
