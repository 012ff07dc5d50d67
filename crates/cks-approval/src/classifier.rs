//! Risk classification of tool calls.
//!
//! Classification is a pure function of the tool name and its arguments,
//! driven by a per-tool rule table. It never fails: malformed arguments for a
//! known tool fall back to medium risk, and tools outside the table are
//! medium risk with their arguments dumped as the detail.

use std::collections::HashMap;

use cks_core::tool::names;
use cks_core::{Classification, RiskLevel, ToolArguments, ToolCallRequest, ToolInput};
use serde_json::Value;
use tracing::{debug, warn};

/// Appended to the detail of a recursive delete.
pub const RECURSIVE_MARKER: &str = "（递归删除）";

/// Rendered in descriptions when the subject argument is missing or empty.
const UNKNOWN_SUBJECT: &str = "(unknown)";

/// Where a tool's display detail comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DetailSource {
    /// The `command` argument.
    Command,
    /// The `path` argument.
    Path,
    /// The `path` argument, marked when `recursive` is set.
    PathRecursive,
    /// A compact JSON dump of every argument.
    Arguments,
}

impl DetailSource {
    fn key(self) -> Option<&'static str> {
        match self {
            Self::Command => Some("command"),
            Self::Path | Self::PathRecursive => Some("path"),
            Self::Arguments => None,
        }
    }
}

/// Classification rule for one tool.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolRule {
    /// Base risk tier.
    pub risk: RiskLevel,
    /// Verb phrase used in the description, e.g. `read file`.
    pub verb: Option<&'static str>,
    /// Where the detail comes from.
    pub detail: DetailSource,
    /// Whether high-risk command patterns escalate this tool to high.
    pub escalates: bool,
}

impl ToolRule {
    const fn new(risk: RiskLevel, verb: &'static str, detail: DetailSource) -> Self {
        Self {
            risk,
            verb: Some(verb),
            detail,
            escalates: false,
        }
    }
}

fn default_rules() -> HashMap<String, ToolRule> {
    let mut run_command = ToolRule::new(RiskLevel::Medium, "run command", DetailSource::Command);
    run_command.escalates = true;

    [
        (names::RUN_COMMAND, run_command),
        (
            names::READ_FILE,
            ToolRule::new(RiskLevel::Low, "read file", DetailSource::Path),
        ),
        (
            names::WRITE_FILE,
            ToolRule::new(RiskLevel::Medium, "write file", DetailSource::Path),
        ),
        (
            names::DELETE_FILE,
            ToolRule::new(RiskLevel::High, "delete file", DetailSource::PathRecursive),
        ),
        (
            names::LIST_DIRECTORY,
            ToolRule::new(RiskLevel::Low, "list directory", DetailSource::Path),
        ),
        (
            names::GET_FILE_INFO,
            ToolRule::new(RiskLevel::Low, "get file info", DetailSource::Path),
        ),
    ]
    .into_iter()
    .map(|(name, rule)| (name.to_owned(), rule))
    .collect()
}

/// Classifier settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClassifierConfig {
    /// Command substrings that escalate `run_command` to high risk.
    /// Matched case-insensitively.
    pub high_risk_patterns: Vec<String>,
    /// Per-tool risk tier overrides.
    pub tool_overrides: HashMap<String, RiskLevel>,
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            high_risk_patterns: ["del ", "rm ", "rmdir", "format", "shutdown", "reg delete"]
                .into_iter()
                .map(str::to_owned)
                .collect(),
            tool_overrides: HashMap::new(),
        }
    }
}

#[cfg(feature = "config")]
impl From<&cks_config::ClassifierSection> for ClassifierConfig {
    fn from(section: &cks_config::ClassifierSection) -> Self {
        let tool_overrides = section
            .tool_overrides
            .iter()
            .filter_map(|(tool, risk)| match risk.parse::<RiskLevel>() {
                Ok(level) => Some((tool.clone(), level)),
                Err(e) => {
                    warn!(tool = %tool, error = %e, "ignoring risk override");
                    None
                },
            })
            .collect();
        Self {
            high_risk_patterns: section.high_risk_patterns.clone(),
            tool_overrides,
        }
    }
}

/// Maps a tool call to a risk tier, a description and a display detail.
#[derive(Debug, Clone)]
pub struct RiskClassifier {
    rules: HashMap<String, ToolRule>,
    /// Lowercased, non-empty.
    patterns: Vec<String>,
}

impl Default for RiskClassifier {
    fn default() -> Self {
        Self::new(ClassifierConfig::default())
    }
}

impl RiskClassifier {
    /// Build a classifier from the built-in rule table plus `config`.
    ///
    /// An override for a tool without a built-in rule cannot lower it below
    /// medium; unknown actions are never low risk.
    #[must_use]
    pub fn new(config: ClassifierConfig) -> Self {
        let mut rules = default_rules();
        for (tool, risk) in config.tool_overrides {
            if let Some(rule) = rules.get_mut(&tool) {
                rule.risk = risk;
                continue;
            }
            let risk = if risk == RiskLevel::Low {
                warn!(tool = %tool, "unknown tool cannot be overridden to low risk, using medium");
                RiskLevel::Medium
            } else {
                risk
            };
            rules.insert(
                tool,
                ToolRule {
                    risk,
                    verb: None,
                    detail: DetailSource::Arguments,
                    escalates: false,
                },
            );
        }

        let patterns = config
            .high_risk_patterns
            .iter()
            .map(|p| p.to_lowercase())
            .filter(|p| !p.trim().is_empty())
            .collect();

        Self { rules, patterns }
    }

    /// The rule applied to `tool`, if it has one.
    #[must_use]
    pub fn rule(&self, tool: &str) -> Option<&ToolRule> {
        self.rules.get(tool)
    }

    /// Classify a request.
    #[must_use]
    pub fn classify_request(&self, request: &ToolCallRequest) -> Classification {
        self.classify(&request.tool, &request.arguments)
    }

    /// Classify a tool call. Total over every input.
    #[must_use]
    pub fn classify(&self, tool: &str, args: &ToolArguments) -> Classification {
        let Some(rule) = self.rules.get(tool) else {
            return Classification {
                risk: RiskLevel::Medium,
                description: format!("perform action: {tool}"),
                detail: dump(args),
            };
        };

        let classification = match ToolInput::parse(tool, args) {
            Ok(input) => self.classify_input(tool, rule, &input),
            Err(err) => {
                warn!(tool, error = %err, "malformed tool arguments, classifying as at least medium risk");
                let subject = rule
                    .detail
                    .key()
                    .and_then(|key| args.get(key))
                    .and_then(Value::as_str);
                // A readable command still escalates when its siblings are malformed.
                let escalated = rule.escalates
                    && args
                        .get("command")
                        .and_then(Value::as_str)
                        .is_some_and(|command| self.is_high_risk_command(command));
                Classification {
                    risk: if escalated {
                        RiskLevel::High
                    } else {
                        RiskLevel::Medium
                    },
                    description: describe(tool, rule, subject.unwrap_or_default()),
                    detail: subject.map_or_else(|| dump(args), str::to_owned),
                }
            },
        };

        debug!(tool, risk = %classification.risk, "classified tool call");
        classification
    }

    fn classify_input(&self, tool: &str, rule: &ToolRule, input: &ToolInput) -> Classification {
        let (subject, detail, risk) = match input {
            ToolInput::RunCommand { command, .. } => {
                let risk = if rule.escalates && self.is_high_risk_command(command) {
                    RiskLevel::High
                } else {
                    rule.risk
                };
                (command.as_str(), command.clone(), risk)
            },
            ToolInput::DeleteFile { path, recursive } => {
                let detail = if *recursive {
                    format!("{path}{RECURSIVE_MARKER}")
                } else {
                    path.clone()
                };
                (path.as_str(), detail, rule.risk)
            },
            ToolInput::Other { args, .. } => ("", dump(args), rule.risk),
            other => {
                let path = other.path().unwrap_or_default();
                (path, path.to_owned(), rule.risk)
            },
        };

        Classification {
            risk,
            description: describe(tool, rule, subject),
            detail,
        }
    }

    /// Whether `command` contains any high-risk pattern, ignoring case.
    #[must_use]
    pub fn is_high_risk_command(&self, command: &str) -> bool {
        let lowered = command.to_lowercase();
        self.patterns.iter().any(|p| lowered.contains(p.as_str()))
    }
}

fn describe(tool: &str, rule: &ToolRule, subject: &str) -> String {
    match rule.verb {
        Some(verb) => {
            let subject = if subject.is_empty() {
                UNKNOWN_SUBJECT
            } else {
                subject
            };
            format!("{verb}: {subject}")
        },
        None => format!("perform action: {tool}"),
    }
}

fn dump(args: &ToolArguments) -> String {
    serde_json::to_string(args).unwrap_or_default()
}
