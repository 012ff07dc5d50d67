//! Environment variable overrides.
//!
//! Env vars only win over the embedded defaults. A value written in a user
//! or workspace config file is never replaced by the environment.

use std::collections::HashMap;

use tracing::debug;

use crate::error::{ConfigError, ConfigResult};
use crate::merge::{ConfigLayer, FieldSources};

/// Mapping from environment variable name to config field path.
struct EnvMapping {
    var_name: &'static str,
    field_path: &'static str,
    kind: ValueKind,
}

#[derive(Clone, Copy)]
enum ValueKind {
    Str,
    Int,
}

/// All supported `CKS_*` env var mappings.
const ENV_MAPPINGS: &[EnvMapping] = &[
    EnvMapping {
        var_name: "CKS_TERMINAL_POLICY",
        field_path: "terminal.policy",
        kind: ValueKind::Str,
    },
    EnvMapping {
        var_name: "CKS_APPROVAL_TIMEOUT_SECS",
        field_path: "approval.timeout_secs",
        kind: ValueKind::Int,
    },
    EnvMapping {
        var_name: "CKS_LOG_LEVEL",
        field_path: "logging.level",
        kind: ValueKind::Str,
    },
];

/// Apply environment variables to fields no config file has set.
///
/// Returns the number of env vars applied.
///
/// # Errors
///
/// Returns [`ConfigError::Env`] if a numeric variable does not parse.
pub fn apply_env_overrides<S: ::std::hash::BuildHasher>(
    merged: &mut toml::Value,
    sources: &mut FieldSources,
    env_vars: &HashMap<String, String, S>,
) -> ConfigResult<usize> {
    let mut count: usize = 0;

    for mapping in ENV_MAPPINGS {
        let set_by_file = sources
            .get(mapping.field_path)
            .is_some_and(|layer| *layer != ConfigLayer::Defaults);
        if set_by_file {
            continue;
        }

        let Some(raw) = env_vars.get(mapping.var_name) else {
            continue;
        };
        let raw = raw.trim();
        if raw.is_empty() {
            continue;
        }

        let value = match mapping.kind {
            ValueKind::Str => toml::Value::String(raw.to_owned()),
            ValueKind::Int => {
                let parsed = raw.parse::<i64>().map_err(|_| ConfigError::Env {
                    var_name: mapping.var_name.to_owned(),
                    message: format!("expected an integer, got '{raw}'"),
                })?;
                toml::Value::Integer(parsed)
            },
        };

        debug!(
            var = mapping.var_name,
            field = mapping.field_path,
            "applying env var override"
        );
        set_field(merged, mapping.field_path, value);
        sources.insert(mapping.field_path.to_owned(), ConfigLayer::Environment);
        count = count.saturating_add(1);
    }

    Ok(count)
}

/// Set a dotted field in the TOML tree, creating intermediate tables.
fn set_field(root: &mut toml::Value, path: &str, value: toml::Value) {
    let mut segments: Vec<&str> = path.split('.').collect();
    let Some(leaf) = segments.pop() else {
        return;
    };

    let mut current = root;
    for segment in segments {
        let Some(table) = current.as_table_mut() else {
            return;
        };
        current = table
            .entry(segment.to_owned())
            .or_insert_with(|| toml::Value::Table(toml::map::Map::new()));
    }

    if let Some(table) = current.as_table_mut() {
        table.insert(leaf.to_owned(), value);
    }
}

/// Collect all current environment variables into a map.
#[must_use]
pub fn collect_env_vars() -> HashMap<String, String> {
    std::env::vars().collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_env(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| ((*k).to_owned(), (*v).to_owned()))
            .collect()
    }

    #[test]
    fn test_env_overrides_default() {
        let mut merged: toml::Value = toml::from_str("[terminal]\npolicy = \"whitelist\"").unwrap();
        let mut sources = FieldSources::new();
        sources.insert("terminal.policy".into(), ConfigLayer::Defaults);

        let env = make_env(&[("CKS_TERMINAL_POLICY", "legacy")]);
        let count = apply_env_overrides(&mut merged, &mut sources, &env).unwrap();

        assert_eq!(count, 1);
        assert_eq!(merged["terminal"]["policy"].as_str(), Some("legacy"));
        assert_eq!(
            sources.get("terminal.policy"),
            Some(&ConfigLayer::Environment)
        );
    }

    #[test]
    fn test_env_skips_file_values() {
        let mut merged: toml::Value = toml::from_str("[logging]\nlevel = \"warn\"").unwrap();
        let mut sources = FieldSources::new();
        sources.insert("logging.level".into(), ConfigLayer::User);

        let env = make_env(&[("CKS_LOG_LEVEL", "trace")]);
        let count = apply_env_overrides(&mut merged, &mut sources, &env).unwrap();

        assert_eq!(count, 0);
        assert_eq!(merged["logging"]["level"].as_str(), Some("warn"));
    }

    #[test]
    fn test_env_integer_creates_field() {
        let mut merged: toml::Value = toml::from_str("[approval]\nevent_capacity = 8").unwrap();
        let mut sources = FieldSources::new();

        let env = make_env(&[("CKS_APPROVAL_TIMEOUT_SECS", "120")]);
        apply_env_overrides(&mut merged, &mut sources, &env).unwrap();

        assert_eq!(merged["approval"]["timeout_secs"].as_integer(), Some(120));
    }

    #[test]
    fn test_env_integer_rejects_garbage() {
        let mut merged: toml::Value = toml::from_str("").unwrap();
        let mut sources = FieldSources::new();

        let env = make_env(&[("CKS_APPROVAL_TIMEOUT_SECS", "soon")]);
        let err = apply_env_overrides(&mut merged, &mut sources, &env).unwrap_err();

        assert!(matches!(err, ConfigError::Env { ref var_name, .. } if var_name == "CKS_APPROVAL_TIMEOUT_SECS"));
    }

    #[test]
    fn test_blank_env_is_ignored() {
        let mut merged: toml::Value = toml::from_str("").unwrap();
        let mut sources = FieldSources::new();

        let env = make_env(&[("CKS_TERMINAL_POLICY", "  ")]);
        assert_eq!(apply_env_overrides(&mut merged, &mut sources, &env).unwrap(), 0);
    }
}
