//! CKS Approval - Risk classification and the tool-call approval gate.
//!
//! Every tool call the agent requests passes through this crate before it
//! touches the machine:
//!
//! - [`RiskClassifier`] assigns a risk tier, a description and a display
//!   detail from the tool name and arguments
//! - [`GrantStore`] remembers what a human already allowed for the session
//!   ("approve all", "always allow this tool")
//! - [`ApprovalQueue`] holds the requests that need a human, one FIFO per
//!   session, and hands out an [`ApprovalHandle`] per request
//! - [`ToolCallEngine`] ties them together, drives each call through the
//!   run-state machine and publishes one event per transition
//!
//! Approved calls leave the engine on the dispatch channel as [`Dispatch`]
//! items; a [`ToolExecutor`] performs them and reports back through
//! [`ToolCallEngine::complete`].
//!
//! # Risk rules
//!
//! | Risk   | Auto-approved when                          |
//! |--------|---------------------------------------------|
//! | low    | always                                      |
//! | medium | the session holds an `all` or tool grant    |
//! | high   | the session holds a grant for exactly the tool |
//!
//! # Example
//!
//! ```
//! use cks_approval::{Decision, EngineConfig, ToolCallEngine};
//! use cks_core::{ExecutionOutcome, SessionId, ToolCallRequest, ToolRunStatus};
//! use serde_json::json;
//!
//! let engine = ToolCallEngine::new(EngineConfig::default());
//! let session = SessionId::from("chat-1");
//!
//! let read = json!({"path": "README.md"});
//! let request = ToolCallRequest::new(
//!     session.clone(),
//!     "read_file",
//!     read.as_object().cloned().unwrap_or_default(),
//! );
//! let submission = engine.submit(request).unwrap();
//! assert_eq!(submission.call().status, ToolRunStatus::Running);
//!
//! let done = engine
//!     .complete(submission.call().request_id(), ExecutionOutcome::success("# Readme"))
//!     .unwrap();
//! assert_eq!(done.status, ToolRunStatus::Success);
//! ```

#![deny(unsafe_code)]
#![deny(missing_docs)]
#![deny(clippy::all)]
#![warn(unreachable_pub)]
#![deny(clippy::unwrap_used)]
#![cfg_attr(test, allow(clippy::unwrap_used))]

pub mod prelude;

pub mod classifier;
pub mod dispatch;
pub mod engine;
/// Error types for grant storage and the approval queue.
pub mod error;
pub mod grant;
pub mod queue;

pub use classifier::{ClassifierConfig, DetailSource, RECURSIVE_MARKER, RiskClassifier, ToolRule};
pub use dispatch::{Dispatch, ToolExecutor};
pub use engine::{Decision, EngineConfig, Submission, ToolCallEngine};
pub use error::{GrantStoreError, QueueConflict};
pub use grant::{GrantStore, InMemoryGrantStore, satisfies};
pub use queue::{ApprovalHandle, ApprovalQueue, Resolved};
