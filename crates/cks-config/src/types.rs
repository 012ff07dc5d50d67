//! Configuration struct definitions.
//!
//! Every section derives `Default` with the same values as the embedded
//! `defaults.toml`, so a partially written file deserializes cleanly.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Approval gate behaviour.
    pub approval: ApprovalSection,
    /// Risk classification rules.
    pub classifier: ClassifierSection,
    /// Terminal command policy for the desktop executor.
    pub terminal: TerminalSection,
    /// Logging and tracing.
    pub logging: LoggingSection,
}

// ---------------------------------------------------------------------------
// ApprovalSection
// ---------------------------------------------------------------------------

/// Approval gate settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ApprovalSection {
    /// Seconds an approval prompt may stay unanswered. `None` disables expiry.
    pub timeout_secs: Option<u64>,
    /// Capacity of the lifecycle event broadcast channel.
    pub event_capacity: usize,
}

impl Default for ApprovalSection {
    fn default() -> Self {
        Self {
            timeout_secs: None,
            event_capacity: 1024,
        }
    }
}

// ---------------------------------------------------------------------------
// ClassifierSection
// ---------------------------------------------------------------------------

/// Risk classifier settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClassifierSection {
    /// Substrings that escalate `run_command` to high risk (case-insensitive).
    pub high_risk_patterns: Vec<String>,
    /// Tool name to risk tier (`"low"`, `"medium"`, `"high"`).
    pub tool_overrides: BTreeMap<String, String>,
}

impl Default for ClassifierSection {
    fn default() -> Self {
        Self {
            high_risk_patterns: [
                "del ",
                "rm ",
                "rmdir",
                "format",
                "shutdown",
                "reg delete",
                "bcdedit",
                "diskpart",
            ]
            .into_iter()
            .map(str::to_owned)
            .collect(),
            tool_overrides: BTreeMap::new(),
        }
    }
}

// ---------------------------------------------------------------------------
// TerminalSection
// ---------------------------------------------------------------------------

/// Terminal command policy settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TerminalSection {
    /// `"whitelist"` (default) or `"legacy"` (blocked substrings only).
    pub policy: String,
    /// Command timeout when the call does not carry one.
    pub default_timeout_secs: u64,
    /// First tokens a command may start with in whitelist mode.
    pub allowed_commands: Vec<String>,
    /// Substrings that refuse a command in every mode.
    pub blocked_commands: Vec<String>,
    /// `git` subcommands allowed in whitelist mode.
    pub git_read_subcommands: Vec<String>,
}

impl Default for TerminalSection {
    fn default() -> Self {
        let owned = |items: &[&str]| items.iter().map(|s| (*s).to_owned()).collect();
        Self {
            policy: "whitelist".to_owned(),
            default_timeout_secs: 30,
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

// ---------------------------------------------------------------------------
// LoggingSection
// ---------------------------------------------------------------------------

/// Logging and tracing configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingSection {
    /// Global log level filter (`"trace"`, `"debug"`, `"info"`, `"warn"`,
    /// `"error"`).
    pub level: String,
    /// Output format: `"pretty"`, `"compact"`, `"json"` or `"full"`.
    pub format: String,
    /// Per-crate tracing directives (e.g. `["cks_approval=debug"]`).
    pub directives: Vec<String>,
}

impl Default for LoggingSection {
    fn default() -> Self {
        Self {
            level: "info".to_owned(),
            format: "compact".to_owned(),
            directives: Vec::new(),
        }
    }
}
