//! Terminal command policy.
//!
//! Every `run_command` passes through [`CommandPolicy::check`] before a shell
//! is spawned. Blocked substrings refuse a command in every mode. In
//! whitelist mode a command must additionally be a single invocation of an
//! allowlisted program, with interpreters restricted to scripts inside the
//! working directory and package managers restricted to version/help
//! queries.

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{DesktopError, DesktopResult};

const SHELL_OPERATORS: &[&str] = &["&&", "||", ";", "|", ">", "<"];
const PYTHON_INLINE_FLAGS: &[&str] = &["-c", "-m", "-i"];
const NODE_INLINE_FLAGS: &[&str] = &["-e", "--eval", "-p", "--print"];
const PACKAGE_MANAGERS: &[&str] = &["npm", "pnpm", "pip", "uv"];
const PACKAGE_QUERY_FLAGS: &[&str] = &["--version", "-v", "help", "--help"];

/// How strictly commands are filtered.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PolicyMode {
    /// Allowlisted single commands only.
    #[default]
    Whitelist,
    /// Blocked substrings only.
    Legacy,
}

impl fmt::Display for PolicyMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Whitelist => write!(f, "whitelist"),
            Self::Legacy => write!(f, "legacy"),
        }
    }
}

impl FromStr for PolicyMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "whitelist" => Ok(Self::Whitelist),
            "legacy" => Ok(Self::Legacy),
            other => Err(format!("unknown terminal policy: {other}")),
        }
    }
}

/// Rules applied to terminal commands.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandPolicy {
    /// Active mode.
    pub mode: PolicyMode,
    /// First tokens a command may start with (lowercase).
    pub allowed_commands: Vec<String>,
    /// Substrings that refuse a command in every mode (lowercase).
    pub blocked_commands: Vec<String>,
    /// `git` subcommands allowed in whitelist mode (lowercase).
    pub git_read_subcommands: Vec<String>,
}

impl Default for CommandPolicy {
    fn default() -> Self {
        let owned = |items: &[&str]| items.iter().map(|s| (*s).to_owned()).collect();
        Self {
            mode: PolicyMode::Whitelist,
            allowed_commands: owned(&[
                "dir", "ls", "pwd", "echo", "type", "cat", "where", "whoami", "tasklist",
                "python", "py", "node", "npm", "pnpm", "pip", "uv", "git",
            ]),
            blocked_commands: owned(&[
                "format",
                "del /s /q c:",
                "rm -rf /",
                "rmdir /s /q c:",
                "shutdown",
                "reg delete",
                "bcdedit",
                "diskpart",
            ]),
            git_read_subcommands: owned(&[
                "status", "log", "diff", "show", "branch", "rev-parse", "ls-files",
            ]),
        }
    }
}

#[cfg(feature = "config")]
impl From<&cks_config::TerminalSection> for CommandPolicy {
    fn from(section: &cks_config::TerminalSection) -> Self {
        let lowered = |items: &[String]| -> Vec<String> {
            items
                .iter()
                .map(|s| s.trim().to_lowercase())
                .filter(|s| !s.is_empty())
                .collect()
        };
        let mode = section.policy.parse().unwrap_or_else(|e| {
            tracing::warn!(error = %e, "falling back to whitelist terminal policy");
            PolicyMode::Whitelist
        });
        Self {
            mode,
            allowed_commands: lowered(&section.allowed_commands),
            blocked_commands: lowered(&section.blocked_commands),
            git_read_subcommands: lowered(&section.git_read_subcommands),
        }
    }
}

impl CommandPolicy {
    /// Policy with the default lists in `mode`.
    #[must_use]
    pub fn with_mode(mode: PolicyMode) -> Self {
        Self {
            mode,
            ..Self::default()
        }
    }

    /// Check `command` as it would run in `work_dir`.
    ///
    /// # Errors
    ///
    /// Returns [`DesktopError::PolicyBlocked`] when the command is refused.
    pub fn check(&self, command: &str, work_dir: &Path) -> DesktopResult<()> {
        if self.is_allowed(command, work_dir) {
            Ok(())
        } else {
            debug!(mode = %self.mode, command, "command refused by terminal policy");
            Err(DesktopError::PolicyBlocked { mode: self.mode })
        }
    }

    /// Whether `command` may run in `work_dir`.
    #[must_use]
    pub fn is_allowed(&self, command: &str, work_dir: &Path) -> bool {
        let lowered = command.to_lowercase();
        if self
            .blocked_commands
            .iter()
            .any(|blocked| lowered.contains(blocked.as_str()))
        {
            return false;
        }
        if self.mode == PolicyMode::Legacy {
            return true;
        }
        if has_shell_chaining(command) {
            return false;
        }

        let tokens = tokenize(command);
        let Some(program) = tokens.first().map(|t| t.to_ascii_lowercase()) else {
            return false;
        };
        if !self.allowed_commands.iter().any(|c| c == &program) {
            return false;
        }
        if has_forbidden_args(&program, &tokens, work_dir) {
            return false;
        }
        self.is_allowed_subcommand(&program, &tokens)
    }

    fn is_allowed_subcommand(&self, program: &str, tokens: &[String]) -> bool {
        if program == "git" {
            return tokens.get(1).is_some_and(|sub| {
                let sub = sub.to_ascii_lowercase();
                self.git_read_subcommands.iter().any(|s| s == &sub)
            });
        }
        if PACKAGE_MANAGERS.contains(&program) {
            return tokens
                .iter()
                .skip(1)
                .any(|t| PACKAGE_QUERY_FLAGS.contains(&t.to_ascii_lowercase().as_str()));
        }
        true
    }
}

/// Whether `command` contains a shell operator that chains or redirects.
#[must_use]
pub fn has_shell_chaining(command: &str) -> bool {
    SHELL_OPERATORS.iter().any(|op| command.contains(op))
}

/// Split a command line on whitespace, honouring single and double quotes.
///
/// Quotes are removed; a quote of the other kind inside a quoted run is kept
/// literally.
#[must_use]
pub fn tokenize(command: &str) -> Vec<String> {
    let mut tokens = Vec::new();
    let mut current = String::new();
    let mut quote: Option<char> = None;
    let mut in_token = false;

    for ch in command.chars() {
        match (quote, ch) {
            (Some(q), c) if c == q => quote = None,
            (Some(_), c) => current.push(c),
            (None, '"' | '\'') => {
                quote = Some(ch);
                in_token = true;
            },
            (None, c) if c.is_whitespace() => {
                if in_token {
                    tokens.push(std::mem::take(&mut current));
                    in_token = false;
                }
            },
            (None, c) => {
                current.push(c);
                in_token = true;
            },
        }
    }
    if in_token {
        tokens.push(current);
    }
    tokens
}

fn has_forbidden_args(program: &str, tokens: &[String], work_dir: &Path) -> bool {
    let inline_flags = match program {
        "python" | "py" => PYTHON_INLINE_FLAGS,
        "node" => NODE_INLINE_FLAGS,
        _ => return false,
    };
    let args = tokens.get(1..).unwrap_or_default();
    if args
        .iter()
        .any(|t| inline_flags.contains(&t.to_ascii_lowercase().as_str()))
    {
        return true;
    }

    for arg in args {
        if arg == "-" {
            return true;
        }
        if arg.starts_with('-') {
            continue;
        }
        return !is_inside(work_dir, arg);
    }
    false
}

fn is_inside(work_dir: &Path, script: &str) -> bool {
    let candidate = Path::new(script);
    let candidate: PathBuf = if candidate.is_absolute() {
        candidate.to_path_buf()
    } else {
        work_dir.join(candidate)
    };
    match (candidate.canonicalize(), work_dir.canonicalize()) {
        (Ok(script), Ok(root)) => script.starts_with(root),
        _ => false,
    }
}
