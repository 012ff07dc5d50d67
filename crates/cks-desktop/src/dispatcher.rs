//! Dispatch loop connecting the engine to an executor.

use std::sync::Arc;

use cks_approval::{Dispatch, ToolCallEngine, ToolExecutor};
use cks_core::ExecutionOutcome;
use tokio::sync::mpsc;
use tokio::task::{JoinHandle, JoinSet};
use tracing::{debug, error, warn};

/// Drain `receiver`, executing each dispatched call on its own task and
/// reporting the outcome through [`ToolCallEngine::complete`].
///
/// Returns once the channel is closed and every started execution has been
/// reported, with the number of executions reported.
pub async fn run_dispatcher(
    engine: ToolCallEngine,
    mut receiver: mpsc::UnboundedReceiver<Dispatch>,
    executor: Arc<dyn ToolExecutor>,
) -> usize {
    let mut tasks = JoinSet::new();
    let mut reported = 0usize;

    loop {
        tokio::select! {
            dispatch = receiver.recv() => {
                let Some(dispatch) = dispatch else {
                    break;
                };
                let engine = engine.clone();
                let executor = Arc::clone(&executor);
                tasks.spawn(async move { execute(&engine, executor, dispatch).await });
            },
            Some(done) = tasks.join_next(), if !tasks.is_empty() => {
                reported = reported.saturating_add(count(done));
            },
        }
    }

    while let Some(done) = tasks.join_next().await {
        reported = reported.saturating_add(count(done));
    }
    debug!(reported, "dispatch channel closed");
    reported
}

/// Take the engine's dispatch receiver and run [`run_dispatcher`] on a new
/// task. Returns `None` if the receiver was already taken.
///
/// The task holds a clone of the engine, which keeps the channel open; it
/// runs until the returned handle is aborted.
#[must_use]
pub fn spawn_dispatcher(
    engine: &ToolCallEngine,
    executor: Arc<dyn ToolExecutor>,
) -> Option<JoinHandle<usize>> {
    let receiver = engine.take_dispatch()?;
    Some(tokio::spawn(run_dispatcher(engine.clone(), receiver, executor)))
}

/// Message recorded when the executor panics instead of returning an outcome.
const PANIC_MESSAGE: &str = "executor panicked";

async fn execute(engine: &ToolCallEngine, executor: Arc<dyn ToolExecutor>, dispatch: Dispatch) -> bool {
    let Dispatch { request, cancel } = dispatch;
    let request_id = request.request_id.clone();

    // Run on a separate task so a panic still reaches the engine as an error.
    let run = tokio::spawn(async move { executor.execute(&request, cancel).await });
    let outcome = match run.await {
        Ok(outcome) => outcome,
        Err(e) => {
            error!(request_id = %request_id, error = %e, "executor task failed");
            let message = if e.is_panic() {
                PANIC_MESSAGE
            } else {
                "execution aborted"
            };
            ExecutionOutcome::error(message)
        },
    };

    match engine.complete(&request_id, outcome) {
        Ok(_) => true,
        Err(e) => {
            warn!(request_id = %request_id, error = %e, "failed to report execution outcome");
            false
        },
    }
}

fn count(done: Result<bool, tokio::task::JoinError>) -> usize {
    match done {
        Ok(true) => 1,
        Ok(false) => 0,
        Err(e) => {
            warn!(error = %e, "execution task failed");
            0
        },
    }
}
