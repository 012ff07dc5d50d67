use std::path::PathBuf;

use thiserror::Error;

use crate::policy::PolicyMode;

/// Errors raised while executing a desktop tool.
///
/// The display text of every variant is what the agent sees as the
/// execution error of the call.
#[derive(Debug, Error)]
pub enum DesktopError {
    /// The terminal policy refused the command.
    #[error(
        "Command blocked by terminal policy (mode: {mode}). Use an allowed single command \
         prefix or switch CKS_TERMINAL_POLICY=legacy for compatibility."
    )]
    PolicyBlocked {
        /// Active policy mode.
        mode: PolicyMode,
    },

    /// A filesystem operation failed.
    #[error("Failed to {action} '{}': {source}", .path.display())]
    Io {
        /// What was attempted, e.g. `read file`.
        action: &'static str,
        /// Path involved.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },

    /// The shell could not be started.
    #[error("Failed to spawn command: {0}")]
    Spawn(#[source] std::io::Error),

    /// The command ran and reported failure.
    #[error("{0}")]
    CommandFailed(String),

    /// The command exceeded its time limit.
    #[error("Command timed out after {0}s")]
    Timeout(u64),

    /// Execution was cancelled through the request's token.
    #[error("cancelled")]
    Cancelled,

    /// The request arguments could not be used.
    #[error("{0}")]
    InvalidInput(String),

    /// The executor has no implementation for the tool.
    #[error("Unknown tool: {0}")]
    UnknownTool(String),
}

impl DesktopError {
    pub(crate) fn io(action: &'static str, path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            action,
            path: path.into(),
            source,
        }
    }
}

/// Result type for desktop tool execution.
pub type DesktopResult<T> = Result<T, DesktopError>;
