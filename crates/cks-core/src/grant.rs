//! Session-scoped approval grants.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::types::{SessionId, Timestamp};

/// What a session grant authorizes.
///
/// Serialized as `all` or `tool:<name>`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub enum GrantScope {
    /// Every call of one tool.
    Tool(String),
    /// Every tool.
    All,
}

impl GrantScope {
    /// Scope for a single tool.
    #[must_use]
    pub fn tool(name: impl Into<String>) -> Self {
        Self::Tool(name.into())
    }

    /// Whether this scope covers calls of `tool`.
    #[must_use]
    pub fn matches(&self, tool: &str) -> bool {
        match self {
            Self::All => true,
            Self::Tool(name) => name == tool,
        }
    }
}

impl fmt::Display for GrantScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::All => f.write_str("all"),
            Self::Tool(name) => write!(f, "tool:{name}"),
        }
    }
}

impl From<GrantScope> for String {
    fn from(scope: GrantScope) -> Self {
        scope.to_string()
    }
}

impl TryFrom<String> for GrantScope {
    type Error = String;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        if s == "all" {
            return Ok(Self::All);
        }
        match s.strip_prefix("tool:") {
            Some(name) if !name.is_empty() => Ok(Self::Tool(name.to_owned())),
            _ => Err(format!("invalid grant scope: {s}")),
        }
    }
}

/// A blanket approval given by the human for the rest of a session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApprovalGrant {
    /// Session the grant belongs to.
    pub session_id: SessionId,
    /// What the grant covers.
    pub scope: GrantScope,
    /// When the grant was first given.
    pub granted_at: Timestamp,
}

impl ApprovalGrant {
    /// Create a grant stamped now.
    #[must_use]
    pub fn new(session_id: SessionId, scope: GrantScope) -> Self {
        Self {
            session_id,
            scope,
            granted_at: Timestamp::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scope_matching() {
        assert!(GrantScope::All.matches("delete_file"));
        assert!(GrantScope::tool("run_command").matches("run_command"));
        assert!(!GrantScope::tool("run_command").matches("run_commands"));
    }

    #[test]
    fn test_scope_serde() {
        assert_eq!(serde_json::to_string(&GrantScope::All).unwrap(), "\"all\"");
        assert_eq!(
            serde_json::to_string(&GrantScope::tool("write_file")).unwrap(),
            "\"tool:write_file\""
        );
        let parsed: GrantScope = serde_json::from_str("\"tool:read_file\"").unwrap();
        assert_eq!(parsed, GrantScope::tool("read_file"));
        assert!(serde_json::from_str::<GrantScope>("\"tool:\"").is_err());
        assert!(serde_json::from_str::<GrantScope>("\"everything\"").is_err());
    }
}
