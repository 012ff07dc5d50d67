//! Tool-call requests and their typed input.
//!
//! The agent backend sends each request as a tool name plus a loosely-typed
//! argument map. [`ToolCallRequest`] keeps that map verbatim (in insertion
//! order) so it can be audited exactly as received, and [`ToolInput`] gives
//! the well-known desktop tools a typed view over it.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

use crate::types::{RequestId, SessionId, Timestamp};

/// Insertion-ordered argument map of a tool call.
pub type ToolArguments = serde_json::Map<String, Value>;

/// Names of the desktop tools the gate knows about.
pub mod names {
    /// Execute a terminal command.
    pub const RUN_COMMAND: &str = "run_command";
    /// Read a file as text.
    pub const READ_FILE: &str = "read_file";
    /// Write text to a file.
    pub const WRITE_FILE: &str = "write_file";
    /// Delete a file or directory tree.
    pub const DELETE_FILE: &str = "delete_file";
    /// List a directory.
    pub const LIST_DIRECTORY: &str = "list_directory";
    /// Stat a path.
    pub const GET_FILE_INFO: &str = "get_file_info";
}

/// A single tool call requested by the agent.
///
/// Immutable once created: the engine only ever clones it into snapshots.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCallRequest {
    /// Unique request identifier.
    pub request_id: RequestId,
    /// Tool name (e.g. `run_command`).
    pub tool: String,
    /// Named arguments, in the order the agent sent them.
    pub arguments: ToolArguments,
    /// Owning chat session.
    pub session_id: SessionId,
    /// When the request was created.
    pub created_at: Timestamp,
}

impl ToolCallRequest {
    /// Create a request with a fresh identifier.
    #[must_use]
    pub fn new(session_id: SessionId, tool: impl Into<String>, arguments: ToolArguments) -> Self {
        Self {
            request_id: RequestId::new(),
            tool: tool.into(),
            arguments,
            session_id,
            created_at: Timestamp::now(),
        }
    }

    /// Use the identifier supplied by the agent backend.
    #[must_use]
    pub fn with_request_id(mut self, request_id: impl Into<RequestId>) -> Self {
        self.request_id = request_id.into();
        self
    }

    /// Parse the typed view of the arguments.
    ///
    /// # Errors
    ///
    /// Returns a [`ClassificationError`] when a known tool is missing a
    /// required argument or an argument has the wrong type.
    pub fn input(&self) -> Result<ToolInput, ClassificationError> {
        ToolInput::parse(&self.tool, &self.arguments)
    }
}

impl fmt::Display for ToolCallRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} ({})", self.request_id, self.tool, self.session_id)
    }
}

/// Typed view over the arguments of a tool call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "tool")]
pub enum ToolInput {
    /// `run_command`.
    RunCommand {
        /// Command line as typed.
        command: String,
        /// Working directory, if the agent chose one.
        cwd: Option<String>,
        /// Timeout override in seconds.
        timeout_secs: Option<u64>,
    },
    /// `read_file`.
    ReadFile {
        /// File path.
        path: String,
    },
    /// `write_file`.
    WriteFile {
        /// File path.
        path: String,
        /// Text to write.
        content: String,
    },
    /// `delete_file`.
    DeleteFile {
        /// File or directory path.
        path: String,
        /// Remove a directory tree.
        recursive: bool,
    },
    /// `list_directory`.
    ListDirectory {
        /// Directory path.
        path: String,
    },
    /// `get_file_info`.
    GetFileInfo {
        /// Path to stat.
        path: String,
    },
    /// Any tool the gate has no typed model for.
    Other {
        /// Tool name.
        name: String,
        /// Opaque arguments.
        args: ToolArguments,
    },
}

impl ToolInput {
    /// Parse the argument map of `tool` into its typed form.
    ///
    /// Unknown tools always parse, as [`ToolInput::Other`].
    ///
    /// # Errors
    ///
    /// Returns a [`ClassificationError`] when a known tool's arguments are malformed.
    pub fn parse(tool: &str, args: &ToolArguments) -> Result<Self, ClassificationError> {
        let input = match tool {
            names::RUN_COMMAND => Self::RunCommand {
                command: required_str(tool, args, "command")?,
                cwd: optional_str(tool, args, "cwd")?,
                timeout_secs: optional_u64(tool, args, "timeout_secs")?,
            },
            names::READ_FILE => Self::ReadFile {
                path: required_str(tool, args, "path")?,
            },
            names::WRITE_FILE => Self::WriteFile {
                path: required_str(tool, args, "path")?,
                content: required_str(tool, args, "content")?,
            },
            names::DELETE_FILE => Self::DeleteFile {
                path: required_str(tool, args, "path")?,
                recursive: optional_bool(tool, args, "recursive")?.unwrap_or(false),
            },
            names::LIST_DIRECTORY => Self::ListDirectory {
                path: required_str(tool, args, "path")?,
            },
            names::GET_FILE_INFO => Self::GetFileInfo {
                path: required_str(tool, args, "path")?,
            },
            other => Self::Other {
                name: other.to_owned(),
                args: args.clone(),
            },
        };
        Ok(input)
    }

    /// Name of the tool this input belongs to.
    #[must_use]
    pub fn tool_name(&self) -> &str {
        match self {
            Self::RunCommand { .. } => names::RUN_COMMAND,
            Self::ReadFile { .. } => names::READ_FILE,
            Self::WriteFile { .. } => names::WRITE_FILE,
            Self::DeleteFile { .. } => names::DELETE_FILE,
            Self::ListDirectory { .. } => names::LIST_DIRECTORY,
            Self::GetFileInfo { .. } => names::GET_FILE_INFO,
            Self::Other { name, .. } => name,
        }
    }

    /// The path argument of file tools.
    #[must_use]
    pub fn path(&self) -> Option<&str> {
        match self {
            Self::ReadFile { path }
            | Self::WriteFile { path, .. }
            | Self::DeleteFile { path, .. }
            | Self::ListDirectory { path }
            | Self::GetFileInfo { path } => Some(path),
            Self::RunCommand { .. } | Self::Other { .. } => None,
        }
    }
}

/// Malformed arguments for a known tool.
///
/// Never fails a request: the classifier downgrades such calls to medium
/// risk and shows whatever it can.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ClassificationError {
    /// A required argument is absent.
    #[error("{tool}: missing argument '{field}'")]
    MissingField {
        /// Tool name.
        tool: String,
        /// Argument name.
        field: String,
    },

    /// An argument has the wrong JSON type.
    #[error("{tool}: argument '{field}' must be {expected}")]
    InvalidField {
        /// Tool name.
        tool: String,
        /// Argument name.
        field: String,
        /// Expected JSON type.
        expected: &'static str,
    },
}

fn invalid(tool: &str, field: &str, expected: &'static str) -> ClassificationError {
    ClassificationError::InvalidField {
        tool: tool.to_owned(),
        field: field.to_owned(),
        expected,
    }
}

fn required_str(tool: &str, args: &ToolArguments, field: &str) -> Result<String, ClassificationError> {
    optional_str(tool, args, field)?.ok_or_else(|| ClassificationError::MissingField {
        tool: tool.to_owned(),
        field: field.to_owned(),
    })
}

fn optional_str(
    tool: &str,
    args: &ToolArguments,
    field: &str,
) -> Result<Option<String>, ClassificationError> {
    match args.get(field) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) => Ok(Some(s.clone())),
        Some(_) => Err(invalid(tool, field, "a string")),
    }
}

fn optional_u64(
    tool: &str,
    args: &ToolArguments,
    field: &str,
) -> Result<Option<u64>, ClassificationError> {
    match args.get(field) {
        None | Some(Value::Null) => Ok(None),
        Some(v) => v
            .as_u64()
            .map(Some)
            .ok_or_else(|| invalid(tool, field, "a non-negative integer")),
    }
}

fn optional_bool(
    tool: &str,
    args: &ToolArguments,
    field: &str,
) -> Result<Option<bool>, ClassificationError> {
    match args.get(field) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Bool(b)) => Ok(Some(*b)),
        Some(_) => Err(invalid(tool, field, "a boolean")),
    }
}
