//! Hand-off between the engine and whatever executes approved calls.

use async_trait::async_trait;
use cks_core::{ExecutionOutcome, ToolCallRequest};
use tokio_util::sync::CancellationToken;

/// A request that entered `running` and is ready to execute.
///
/// Only sent after the request's running event has been published.
#[derive(Debug, Clone)]
pub struct Dispatch {
    /// The approved request.
    pub request: ToolCallRequest,
    /// Fires when the owning session is cancelled.
    pub cancel: CancellationToken,
}

/// Performs approved tool calls.
///
/// Implementations turn every failure into [`ExecutionOutcome::Error`]; the
/// outcome is recorded on the request verbatim.
#[async_trait]
pub trait ToolExecutor: Send + Sync {
    /// Execute `request`, giving up early if `cancel` fires.
    async fn execute(&self, request: &ToolCallRequest, cancel: CancellationToken)
    -> ExecutionOutcome;
}
