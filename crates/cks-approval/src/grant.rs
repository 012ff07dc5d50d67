//! Session-scoped approval grants.
//!
//! A grant is created when a human answers "approve all" or "always allow
//! this tool" and lives until the session is closed. Grants only widen: the
//! store offers no way to revoke a single grant.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::RwLock;

use cks_core::{ApprovalGrant, GrantScope, RiskLevel, SessionId, Timestamp};
use tracing::debug;

use crate::error::GrantStoreError;

/// Whether a grant of `scope` lets a call of `tool` at `risk` run unprompted.
///
/// Low risk never needs a grant. An `all` grant covers medium risk only; a
/// high-risk call needs a grant for exactly its tool.
#[must_use]
pub fn satisfies(scope: &GrantScope, tool: &str, risk: RiskLevel) -> bool {
    match risk {
        RiskLevel::Low => true,
        RiskLevel::Medium => scope.matches(tool),
        RiskLevel::High => matches!(scope, GrantScope::Tool(name) if name == tool),
    }
}

/// Backend for session grants.
///
/// Implementations must be safe to call from any thread. Errors are reported,
/// never swallowed; the engine decides how to fail.
pub trait GrantStore: Send + Sync + fmt::Debug {
    /// Whether `tool` is covered by an `all` grant or a grant for that tool.
    ///
    /// # Errors
    ///
    /// Returns [`GrantStoreError`] if the backend cannot be read.
    fn has_grant(&self, session_id: &SessionId, tool: &str) -> Result<bool, GrantStoreError>;

    /// Whether exactly `scope` has been granted.
    ///
    /// # Errors
    ///
    /// Returns [`GrantStoreError`] if the backend cannot be read.
    fn has_scope(&self, session_id: &SessionId, scope: &GrantScope)
    -> Result<bool, GrantStoreError>;

    /// Record a grant. Idempotent; returns `true` when the grant is new.
    ///
    /// # Errors
    ///
    /// Returns [`GrantStoreError`] if the backend cannot be written.
    fn grant(&self, session_id: &SessionId, scope: GrantScope) -> Result<bool, GrantStoreError>;

    /// Every grant held by a session.
    ///
    /// # Errors
    ///
    /// Returns [`GrantStoreError`] if the backend cannot be read.
    fn grants(&self, session_id: &SessionId) -> Result<Vec<ApprovalGrant>, GrantStoreError>;

    /// Drop every grant of a session. Returns how many were dropped.
    ///
    /// # Errors
    ///
    /// Returns [`GrantStoreError`] if the backend cannot be written.
    fn clear(&self, session_id: &SessionId) -> Result<usize, GrantStoreError>;
}

type SessionGrants = BTreeMap<GrantScope, ApprovalGrant>;

/// In-memory grant store.
///
/// Thread-safe via an internal [`RwLock`]. A poisoned lock is reported as a
/// [`GrantStoreError`] so callers fail closed.
///
/// # Example
///
/// ```
/// use cks_approval::{GrantStore, InMemoryGrantStore};
/// use cks_core::{GrantScope, SessionId};
///
/// let store = InMemoryGrantStore::new();
/// let session = SessionId::from("s1");
/// store.grant(&session, GrantScope::tool("write_file")).unwrap();
/// assert!(store.has_grant(&session, "write_file").unwrap());
/// assert!(!store.has_grant(&session, "run_command").unwrap());
/// ```
#[derive(Default)]
pub struct InMemoryGrantStore {
    sessions: RwLock<HashMap<SessionId, SessionGrants>>,
}

impl InMemoryGrantStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of sessions holding at least one grant.
    #[must_use]
    pub fn session_count(&self) -> usize {
        self.sessions.read().map_or(0, |s| s.len())
    }
}

fn poisoned(err: impl fmt::Display) -> GrantStoreError {
    GrantStoreError(format!("lock poisoned: {err}"))
}

impl GrantStore for InMemoryGrantStore {
    fn has_grant(&self, session_id: &SessionId, tool: &str) -> Result<bool, GrantStoreError> {
        let sessions = self.sessions.read().map_err(poisoned)?;
        Ok(sessions
            .get(session_id)
            .is_some_and(|grants| grants.keys().any(|scope| scope.matches(tool))))
    }

    fn has_scope(
        &self,
        session_id: &SessionId,
        scope: &GrantScope,
    ) -> Result<bool, GrantStoreError> {
        let sessions = self.sessions.read().map_err(poisoned)?;
        Ok(sessions
            .get(session_id)
            .is_some_and(|grants| grants.contains_key(scope)))
    }

    fn grant(&self, session_id: &SessionId, scope: GrantScope) -> Result<bool, GrantStoreError> {
        let mut sessions = self.sessions.write().map_err(poisoned)?;
        let grants = sessions.entry(session_id.clone()).or_default();
        if grants.contains_key(&scope) {
            return Ok(false);
        }
        debug!(session_id = %session_id, scope = %scope, "session grant added");
        grants.insert(
            scope.clone(),
            ApprovalGrant {
                session_id: session_id.clone(),
                scope,
                granted_at: Timestamp::now(),
            },
        );
        Ok(true)
    }

    fn grants(&self, session_id: &SessionId) -> Result<Vec<ApprovalGrant>, GrantStoreError> {
        let sessions = self.sessions.read().map_err(poisoned)?;
        Ok(sessions
            .get(session_id)
            .map(|grants| grants.values().cloned().collect())
            .unwrap_or_default())
    }

    fn clear(&self, session_id: &SessionId) -> Result<usize, GrantStoreError> {
        let mut sessions = self.sessions.write().map_err(poisoned)?;
        Ok(sessions.remove(session_id).map_or(0, |grants| grants.len()))
    }
}

impl fmt::Debug for InMemoryGrantStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InMemoryGrantStore")
            .field("sessions", &self.session_count())
            .finish()
    }
}
