//! Desktop tool executor.
//!
//! Runs approved tool calls against the local machine: terminal commands via
//! the platform shell and file operations via `tokio::fs`. Every failure is
//! reported as an [`ExecutionOutcome::Error`] carrying the display text of a
//! [`DesktopError`]; nothing here panics or retries.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::{Duration, UNIX_EPOCH};

use async_trait::async_trait;
use cks_approval::ToolExecutor;
use cks_core::{ExecutionOutcome, ToolCallRequest, ToolInput};
use serde::Serialize;
use tokio::process::Command;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::{DesktopError, DesktopResult};
use crate::policy::CommandPolicy;

/// Timeout for commands that do not carry their own.
pub const DEFAULT_COMMAND_TIMEOUT: Duration = Duration::from_secs(30);

/// Environment hints so child processes emit UTF-8.
const UTF8_ENV: &[(&str, &str)] = &[
    ("PYTHONIOENCODING", "utf-8"),
    ("PYTHONUTF8", "1"),
    ("LANG", "en_US.UTF-8"),
];

/// Metadata reported by `get_file_info`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FileInfo {
    /// Whether the path exists.
    pub exists: bool,
    /// Whether it is a directory.
    pub is_dir: bool,
    /// Whether it is a regular file.
    pub is_file: bool,
    /// Size in bytes.
    pub size: u64,
    /// Last modification, seconds since the Unix epoch.
    pub modified: Option<u64>,
    /// Path as requested.
    pub path: String,
}

/// One entry of a directory listing.
#[derive(Debug, Clone, PartialEq, Eq)]
struct DirEntry {
    name: String,
    is_dir: bool,
    size: u64,
}

/// Captured result of a finished command.
#[derive(Debug)]
struct CommandOutput {
    stdout: String,
    stderr: String,
    code: Option<i32>,
}

impl CommandOutput {
    fn into_result(self) -> DesktopResult<String> {
        if self.code == Some(0) {
            let mut sections = Vec::new();
            if !self.stdout.is_empty() {
                sections.push(format!("[stdout]\n{}", self.stdout));
            }
            if !self.stderr.is_empty() {
                sections.push(format!("[stderr]\n{}", self.stderr));
            }
            if sections.is_empty() {
                return Ok("(no output)".to_owned());
            }
            return Ok(sections.join("\n"));
        }
        if !self.stderr.is_empty() {
            return Err(DesktopError::CommandFailed(self.stderr));
        }
        let code = self
            .code
            .map_or_else(|| "unknown".to_owned(), |c| c.to_string());
        Err(DesktopError::CommandFailed(format!(
            "Command failed with exit code {code}"
        )))
    }
}

/// Executes the desktop tools on the local machine.
#[derive(Debug, Clone)]
pub struct DesktopExecutor {
    policy: CommandPolicy,
    default_timeout: Duration,
    work_dir: Option<PathBuf>,
}

impl Default for DesktopExecutor {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(feature = "config")]
impl From<&cks_config::TerminalSection> for DesktopExecutor {
    fn from(section: &cks_config::TerminalSection) -> Self {
        Self::new()
            .with_policy(CommandPolicy::from(section))
            .with_default_timeout(Duration::from_secs(section.default_timeout_secs))
    }
}

impl DesktopExecutor {
    /// Executor with the default policy and timeout.
    #[must_use]
    pub fn new() -> Self {
        Self {
            policy: CommandPolicy::default(),
            default_timeout: DEFAULT_COMMAND_TIMEOUT,
            work_dir: None,
        }
    }

    /// Use `policy` for terminal commands.
    #[must_use]
    pub fn with_policy(mut self, policy: CommandPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Timeout for commands without their own.
    #[must_use]
    pub fn with_default_timeout(mut self, timeout: Duration) -> Self {
        self.default_timeout = timeout;
        self
    }

    /// Base directory for commands and relative paths.
    #[must_use]
    pub fn with_work_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.work_dir = Some(dir.into());
        self
    }

    /// The terminal policy.
    #[must_use]
    pub fn policy(&self) -> &CommandPolicy {
        &self.policy
    }

    /// Run one typed input to completion.
    ///
    /// # Errors
    ///
    /// Returns a [`DesktopError`] describing why the action failed.
    pub async fn run(&self, input: ToolInput) -> DesktopResult<String> {
        match input {
            ToolInput::RunCommand {
                command,
                cwd,
                timeout_secs,
            } => {
                let dir = cwd.map_or_else(|| self.work_dir(), |c| self.resolve(&c));
                let timeout = timeout_secs.map_or(self.default_timeout, Duration::from_secs);
                self.run_command(&command, &dir, timeout).await
            },
            ToolInput::ReadFile { path } => {
                let full = self.resolve(&path);
                tokio::fs::read_to_string(&full)
                    .await
                    .map_err(|e| DesktopError::io("read file", path, e))
            },
            ToolInput::WriteFile { path, content } => {
                self.write_file(&path, &content).await?;
                Ok(format!("File written: {path}"))
            },
            ToolInput::DeleteFile { path, recursive } => self.delete(&path, recursive).await,
            ToolInput::ListDirectory { path } => {
                let entries = self.list_directory(&path).await?;
                Ok(render_listing(&entries))
            },
            ToolInput::GetFileInfo { path } => {
                let info = self.file_info(&path).await;
                serde_json::to_string_pretty(&info)
                    .map_err(|e| DesktopError::InvalidInput(e.to_string()))
            },
            ToolInput::Other { name, .. } => Err(DesktopError::UnknownTool(name)),
        }
    }

    /// Working directory for commands: the configured one, else the process
    /// directory, else the home directory, else the filesystem root.
    fn work_dir(&self) -> PathBuf {
        if let Some(dir) = &self.work_dir {
            return dir.clone();
        }
        std::env::current_dir()
            .ok()
            .or_else(|| directories::BaseDirs::new().map(|d| d.home_dir().to_path_buf()))
            .unwrap_or_else(|| PathBuf::from(if cfg!(windows) { "C:\\" } else { "/" }))
    }

    fn resolve(&self, path: &str) -> PathBuf {
        let path = Path::new(path);
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.work_dir().join(path)
        }
    }

    async fn run_command(
        &self,
        command: &str,
        dir: &Path,
        timeout: Duration,
    ) -> DesktopResult<String> {
        self.policy.check(command, dir)?;

        let mut cmd = shell_command(command);
        cmd.current_dir(dir)
            .envs(UTF8_ENV.iter().copied())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        debug!(command, dir = %dir.display(), timeout_secs = timeout.as_secs(), "spawning command");
        let child = cmd.spawn().map_err(DesktopError::Spawn)?;
        let output = tokio::time::timeout(timeout, child.wait_with_output())
            .await
            .map_err(|_| DesktopError::Timeout(timeout.as_secs()))?
            .map_err(DesktopError::Spawn)?;

        CommandOutput {
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            code: output.status.code(),
        }
        .into_result()
    }

    async fn write_file(&self, path: &str, content: &str) -> DesktopResult<()> {
        let full = self.resolve(path);
        if let Some(parent) = full.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| DesktopError::io("create directories", parent, e))?;
        }
        tokio::fs::write(&full, content)
            .await
            .map_err(|e| DesktopError::io("write file", path, e))
    }

    async fn delete(&self, path: &str, recursive: bool) -> DesktopResult<String> {
        let full = self.resolve(path);
        let meta = tokio::fs::metadata(&full)
            .await
            .map_err(|e| DesktopError::io("delete", path, e))?;
        if meta.is_dir() {
            let result = if recursive {
                tokio::fs::remove_dir_all(&full).await
            } else {
                tokio::fs::remove_dir(&full).await
            };
            result.map_err(|e| DesktopError::io("delete directory", path, e))?;
            Ok(format!("Directory deleted: {path}"))
        } else {
            tokio::fs::remove_file(&full)
                .await
                .map_err(|e| DesktopError::io("delete file", path, e))?;
            Ok(format!("File deleted: {path}"))
        }
    }

    async fn list_directory(&self, path: &str) -> DesktopResult<Vec<DirEntry>> {
        let full = self.resolve(path);
        let read_err = |e| DesktopError::io("read directory", path, e);
        let mut dir = tokio::fs::read_dir(&full).await.map_err(read_err)?;

        let mut entries = Vec::new();
        while let Some(entry) = dir.next_entry().await.map_err(read_err)? {
            // Entries that vanish between listing and stat are skipped.
            let Ok(meta) = entry.metadata().await else {
                continue;
            };
            entries.push(DirEntry {
                name: entry.file_name().to_string_lossy().into_owned(),
                is_dir: meta.is_dir(),
                size: meta.len(),
            });
        }
        entries.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(entries)
    }

    async fn file_info(&self, path: &str) -> FileInfo {
        let full = self.resolve(path);
        match tokio::fs::metadata(&full).await {
            Ok(meta) => FileInfo {
                exists: true,
                is_dir: meta.is_dir(),
                is_file: meta.is_file(),
                size: meta.len(),
                modified: meta
                    .modified()
                    .ok()
                    .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
                    .map(|d| d.as_secs()),
                path: path.to_owned(),
            },
            Err(_) => FileInfo {
                exists: false,
                is_dir: false,
                is_file: false,
                size: 0,
                modified: None,
                path: path.to_owned(),
            },
        }
    }
}

#[async_trait]
impl ToolExecutor for DesktopExecutor {
    async fn execute(&self, request: &ToolCallRequest, cancel: CancellationToken) -> ExecutionOutcome {
        let result = match request.input() {
            Ok(input) => {
                tokio::select! {
                    biased;
                    () = cancel.cancelled() => Err(DesktopError::Cancelled),
                    result = self.run(input) => result,
                }
            },
            Err(e) => Err(DesktopError::InvalidInput(e.to_string())),
        };

        match result {
            Ok(output) => {
                info!(request_id = %request.request_id, tool = %request.tool, "tool executed");
                ExecutionOutcome::success(output)
            },
            Err(e) => {
                warn!(
                    request_id = %request.request_id,
                    tool = %request.tool,
                    error = %e,
                    "tool execution failed"
                );
                ExecutionOutcome::error(e.to_string())
            },
        }
    }
}

#[cfg(windows)]
fn shell_command(command: &str) -> Command {
    let mut cmd = Command::new("cmd");
    cmd.args(["/S", "/C", command]);
    cmd
}

#[cfg(not(windows))]
fn shell_command(command: &str) -> Command {
    let mut cmd = Command::new("sh");
    cmd.args(["-lc", command]);
    cmd
}

fn render_listing(entries: &[DirEntry]) -> String {
    if entries.is_empty() {
        return "(empty directory)".to_owned();
    }
    entries
        .iter()
        .map(|e| {
            let kind = if e.is_dir { "[DIR]" } else { "[FILE]" };
            format!("{kind} {} ({} bytes)", e.name, e.size)
        })
        .collect::<Vec<_>>()
        .join("\n")
}

#[cfg(test)]
#[path = "executor_tests.rs"]
mod tests;
