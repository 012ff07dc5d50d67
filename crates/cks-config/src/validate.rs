//! Post-merge configuration validation.

use crate::error::{ConfigError, ConfigResult};
use crate::types::Config;

/// Validate a fully-merged and deserialized configuration.
///
/// # Errors
///
/// Returns the first validation error found.
pub fn validate(config: &Config) -> ConfigResult<()> {
    validate_approval(config)?;
    validate_classifier(config)?;
    validate_terminal(config)?;
    validate_logging(config)?;
    Ok(())
}

fn invalid(field: &str, message: impl Into<String>) -> ConfigError {
    ConfigError::Invalid {
        field: field.to_owned(),
        message: message.into(),
    }
}

fn validate_approval(config: &Config) -> ConfigResult<()> {
    let a = &config.approval;

    if a.event_capacity == 0 {
        return Err(invalid(
            "approval.event_capacity",
            "event_capacity must be greater than 0",
        ));
    }

    if a.timeout_secs == Some(0) {
        return Err(invalid(
            "approval.timeout_secs",
            "timeout_secs must be greater than 0; omit it to disable expiry",
        ));
    }

    Ok(())
}

fn validate_classifier(config: &Config) -> ConfigResult<()> {
    let c = &config.classifier;

    if c.high_risk_patterns.iter().any(|p| p.trim().is_empty()) {
        return Err(invalid(
            "classifier.high_risk_patterns",
            "patterns must be non-empty strings",
        ));
    }

    for (tool, risk) in &c.tool_overrides {
        if !matches!(risk.as_str(), "low" | "medium" | "high") {
            return Err(invalid(
                &format!("classifier.tool_overrides.{tool}"),
                format!("unknown risk '{risk}'; expected one of: low, medium, high"),
            ));
        }
    }

    Ok(())
}

fn validate_terminal(config: &Config) -> ConfigResult<()> {
    let t = &config.terminal;

    if !matches!(t.policy.as_str(), "whitelist" | "legacy") {
        return Err(invalid(
            "terminal.policy",
            format!(
                "unsupported policy '{}'; expected one of: whitelist, legacy",
                t.policy
            ),
        ));
    }

    if t.default_timeout_secs == 0 {
        return Err(invalid(
            "terminal.default_timeout_secs",
            "default_timeout_secs must be greater than 0",
        ));
    }

    if t.blocked_commands.iter().any(|p| p.trim().is_empty()) {
        return Err(invalid(
            "terminal.blocked_commands",
            "blocked commands must be non-empty strings",
        ));
    }

    Ok(())
}

fn validate_logging(config: &Config) -> ConfigResult<()> {
    let l = &config.logging;

    if !matches!(
        l.level.to_lowercase().as_str(),
        "trace" | "debug" | "info" | "warn" | "error"
    ) {
        return Err(invalid(
            "logging.level",
            format!(
                "unknown level '{}'; expected one of: trace, debug, info, warn, error",
                l.level
            ),
        ));
    }

    if !matches!(l.format.as_str(), "pretty" | "compact" | "json" | "full") {
        return Err(invalid(
            "logging.format",
            format!(
                "unknown format '{}'; expected one of: pretty, compact, json, full",
                l.format
            ),
        ));
    }

    Ok(())
}
