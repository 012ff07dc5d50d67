//! Tool-call lifecycle engine.
//!
//! The engine owns every live tool call. It classifies each submission,
//! auto-approves what the session's grants allow, queues the rest for a human
//! and moves each call through the run-state machine:
//!
//! ```text
//! submit ──► pending_approval ──► running ──► success
//!   │              │    │            └──────► error
//!   │              │    └──► denied (deny, expiry, session cancel)
//!   │              └───────► error  (grant could not be recorded)
//!   └──────────────────────► running (low risk or covered by a grant)
//! ```
//!
//! Every transition publishes exactly one [`GateEvent::ToolCall`] carrying the
//! full snapshot. All transitions of a session happen under that session's
//! lock, so events of one request are published in transition order and a
//! call is only handed to the executor after its running event is out.
//!
//! Synchronous event subscribers run under the session lock and must not
//! call back into the engine.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::Duration;

use cks_core::{
    ApprovalDecision, Classification, ExecutionOutcome, GateError, GateResult, GrantScope,
    RequestId, RiskLevel, SessionId, Timestamp, ToolCall, ToolCallRequest, ToolRunStatus,
};
use cks_events::{DEFAULT_CHANNEL_CAPACITY, EventBus, EventMetadata, EventReceiver, GateEvent};
use dashmap::{DashMap, DashSet};
use dashmap::mapref::entry::Entry;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

use crate::classifier::{ClassifierConfig, RiskClassifier};
use crate::dispatch::Dispatch;
use crate::grant::{GrantStore, InMemoryGrantStore, satisfies};
use crate::queue::{ApprovalHandle, ApprovalQueue};

/// Event source name for everything the engine publishes.
const SOURCE: &str = "cks-approval";

const DENIED_BY_USER: &str = "denied by user";
const SESSION_CANCELLED: &str = "session cancelled";
const NO_EXECUTOR: &str = "no executor attached";

/// A human's answer to an approval prompt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Decision {
    /// Run this request once.
    Approve,
    /// Run this request and trust the session for every medium-risk call.
    ApproveAll,
    /// Run this request and trust the session for this tool.
    ApproveTool,
    /// Refuse this request.
    Deny,
}

impl fmt::Display for Decision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Approve => "approve",
            Self::ApproveAll => "approve_all",
            Self::ApproveTool => "approve_tool",
            Self::Deny => "deny",
        };
        f.write_str(s)
    }
}

/// What happened to a submitted request.
#[derive(Debug)]
pub enum Submission {
    /// The call went straight to `running`.
    AutoApproved(ToolCall),
    /// The call waits for a human.
    Queued {
        /// Snapshot in `pending_approval`.
        call: ToolCall,
        /// Resolves once the human (or expiry) decides.
        handle: ApprovalHandle,
    },
}

impl Submission {
    /// Snapshot taken at submission.
    #[must_use]
    pub fn call(&self) -> &ToolCall {
        match self {
            Self::AutoApproved(call) | Self::Queued { call, .. } => call,
        }
    }

    /// Whether the call waits for a human.
    #[must_use]
    pub fn is_queued(&self) -> bool {
        matches!(self, Self::Queued { .. })
    }

    /// The approval handle of a queued call.
    #[must_use]
    pub fn into_handle(self) -> Option<ApprovalHandle> {
        match self {
            Self::Queued { handle, .. } => Some(handle),
            Self::AutoApproved(_) => None,
        }
    }
}

/// Engine settings.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Risk classifier rules.
    pub classifier: ClassifierConfig,
    /// How long a request may wait for a decision. `None` waits forever.
    pub approval_timeout: Option<Duration>,
    /// Capacity of the lifecycle event channel.
    pub event_capacity: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            classifier: ClassifierConfig::default(),
            approval_timeout: None,
            event_capacity: DEFAULT_CHANNEL_CAPACITY,
        }
    }
}

impl EngineConfig {
    /// Expire requests nobody decided within `timeout`.
    #[must_use]
    pub fn with_approval_timeout(mut self, timeout: Duration) -> Self {
        self.approval_timeout = Some(timeout);
        self
    }

    /// Use `classifier` rules.
    #[must_use]
    pub fn with_classifier(mut self, classifier: ClassifierConfig) -> Self {
        self.classifier = classifier;
        self
    }
}

#[cfg(feature = "config")]
impl From<&cks_config::Config> for EngineConfig {
    fn from(config: &cks_config::Config) -> Self {
        Self {
            classifier: ClassifierConfig::from(&config.classifier),
            approval_timeout: config.approval.timeout_secs.map(Duration::from_secs),
            event_capacity: config.approval.event_capacity,
        }
    }
}

struct LiveCall {
    call: ToolCall,
    cancel: CancellationToken,
    /// Set while the call waits for a decision.
    queued_at: Option<Instant>,
}

#[derive(Default)]
struct SessionLedger {
    calls: HashMap<RequestId, LiveCall>,
    /// Dropped from the session map once idle; lockers fetch a fresh one.
    retired: bool,
}

type SharedLedger = Arc<Mutex<SessionLedger>>;

struct EngineInner {
    classifier: RiskClassifier,
    grants: Arc<dyn GrantStore>,
    queue: ApprovalQueue,
    bus: EventBus,
    /// Ledgers of sessions with live calls.
    sessions: DashMap<SessionId, SharedLedger>,
    /// Sessions that refuse new submissions.
    closed: DashSet<SessionId>,
    /// Live (non-terminal) request to its session.
    requests: DashMap<RequestId, SessionId>,
    dispatch_tx: mpsc::UnboundedSender<Dispatch>,
    dispatch_rx: Mutex<Option<mpsc::UnboundedReceiver<Dispatch>>>,
    approval_timeout: Option<Duration>,
}

/// Drives every tool call from submission to a terminal status.
///
/// Cheap to clone; clones share state.
///
/// # Example
///
/// ```
/// use cks_approval::{Decision, EngineConfig, ToolCallEngine};
/// use cks_core::{SessionId, ToolCallRequest, ToolRunStatus};
/// use serde_json::json;
///
/// let engine = ToolCallEngine::new(EngineConfig::default());
/// let args = json!({"path": "notes.txt", "content": "hi"});
/// let request = ToolCallRequest::new(
///     SessionId::from("s1"),
///     "write_file",
///     args.as_object().cloned().unwrap_or_default(),
/// );
///
/// let submission = engine.submit(request).unwrap();
/// assert!(submission.is_queued());
///
/// let id = submission.call().request_id().clone();
/// let calls = engine.decide(&id, Decision::Approve).unwrap();
/// assert_eq!(calls[0].status, ToolRunStatus::Running);
/// ```
#[derive(Clone)]
pub struct ToolCallEngine {
    inner: Arc<EngineInner>,
}

fn lock(ledger: &Mutex<SessionLedger>) -> MutexGuard<'_, SessionLedger> {
    ledger.lock().unwrap_or_else(|e| {
        warn!("session ledger lock poisoned, recovering");
        e.into_inner()
    })
}

impl ToolCallEngine {
    /// Engine with an in-memory grant store and its own event bus.
    #[must_use]
    pub fn new(config: EngineConfig) -> Self {
        let bus = EventBus::with_capacity(config.event_capacity);
        Self::with_components(config, Arc::new(InMemoryGrantStore::new()), bus)
    }

    /// Engine over an existing grant store and event bus.
    #[must_use]
    pub fn with_components(
        config: EngineConfig,
        grants: Arc<dyn GrantStore>,
        bus: EventBus,
    ) -> Self {
        let (dispatch_tx, dispatch_rx) = mpsc::unbounded_channel();
        Self {
            inner: Arc::new(EngineInner {
                classifier: RiskClassifier::new(config.classifier),
                grants,
                queue: ApprovalQueue::new(),
                bus,
                sessions: DashMap::new(),
                closed: DashSet::new(),
                requests: DashMap::new(),
                dispatch_tx,
                dispatch_rx: Mutex::new(Some(dispatch_rx)),
                approval_timeout: config.approval_timeout,
            }),
        }
    }

    /// The lifecycle event bus.
    #[must_use]
    pub fn bus(&self) -> &EventBus {
        &self.inner.bus
    }

    /// Subscribe to every lifecycle event.
    #[must_use]
    pub fn subscribe(&self) -> EventReceiver {
        self.inner.bus.subscribe()
    }

    /// Subscribe to the lifecycle events of one session.
    #[must_use]
    pub fn subscribe_session(&self, session_id: SessionId) -> EventReceiver {
        self.inner.bus.subscribe_session(session_id)
    }

    /// The classifier applied to submissions.
    #[must_use]
    pub fn classifier(&self) -> &RiskClassifier {
        &self.inner.classifier
    }

    /// The session grant store.
    #[must_use]
    pub fn grant_store(&self) -> &dyn GrantStore {
        self.inner.grants.as_ref()
    }

    /// Take the receiving end of the dispatch channel. Only the first call
    /// gets it.
    #[must_use]
    pub fn take_dispatch(&self) -> Option<mpsc::UnboundedReceiver<Dispatch>> {
        self.inner
            .dispatch_rx
            .lock()
            .unwrap_or_else(|e| {
                warn!("dispatch receiver lock poisoned, recovering");
                e.into_inner()
            })
            .take()
    }

    /// Submit a new request.
    ///
    /// Low-risk calls and calls covered by a session grant go straight to
    /// `running`. Everything else waits in the session's approval queue. A
    /// grant lookup that fails counts as no grant.
    ///
    /// # Errors
    ///
    /// Returns [`GateError::SessionClosed`] if the session was closed and
    /// [`GateError::DuplicateRequest`] if a live request has the same id.
    pub fn submit(&self, request: ToolCallRequest) -> GateResult<Submission> {
        let classification = self.inner.classifier.classify_request(&request);
        let session_id = request.session_id.clone();

        loop {
            let shared = self.ledger(&session_id);
            let mut ledger = lock(&shared);
            if ledger.retired {
                continue;
            }
            let result = self.submit_locked(&mut ledger, request, classification);
            // A rejected submission leaves no empty ledger behind.
            self.retire_if_idle(&mut ledger, &session_id);
            return result;
        }
    }

    fn submit_locked(
        &self,
        ledger: &mut SessionLedger,
        request: ToolCallRequest,
        classification: Classification,
    ) -> GateResult<Submission> {
        let risk = classification.risk;
        let session_id = request.session_id.clone();
        let request_id = request.request_id.clone();

        if self.inner.closed.contains(&session_id) {
            return Err(GateError::SessionClosed { session_id });
        }

        let auto = self.is_auto_approved(&session_id, &request.tool, risk);
        let status = if auto {
            ToolRunStatus::Running
        } else {
            ToolRunStatus::PendingApproval
        };
        let mut call = ToolCall::new(request, classification, status)?;
        if auto {
            call.decision = ApprovalDecision::AutoApproved;
        }

        match self.inner.requests.entry(request_id.clone()) {
            Entry::Occupied(_) => return Err(GateError::DuplicateRequest { request_id }),
            Entry::Vacant(slot) => {
                slot.insert(session_id.clone());
            },
        }

        let outcome = if auto {
            "auto-approved"
        } else {
            "awaiting approval"
        };
        info!(
            request_id = %request_id,
            session_id = %session_id,
            tool = %call.tool(),
            risk = %risk,
            "tool call {outcome}"
        );

        let handle = (!auto).then(|| self.inner.queue.enqueue(call.request.clone(), risk));
        ledger.calls.insert(
            request_id.clone(),
            LiveCall {
                call,
                cancel: CancellationToken::new(),
                queued_at: (!auto).then(Instant::now),
            },
        );
        let call = self.commit(ledger, &request_id)?;

        match handle {
            Some(handle) => {
                self.schedule_expiry(&request_id);
                Ok(Submission::Queued { call, handle })
            },
            None => Ok(Submission::AutoApproved(call)),
        }
    }

    /// Apply a human decision to a pending request.
    ///
    /// Returns every call the decision moved, in arrival order. `approve_all`
    /// and `approve_tool` also release the other queued requests of the
    /// session that the new grant covers. If the grant cannot be recorded the
    /// target fails with `error` and nothing else moves.
    ///
    /// # Errors
    ///
    /// Returns [`GateError::UnknownRequest`] if no live request has this id and
    /// [`GateError::QueueConflict`] if it is not awaiting approval.
    pub fn decide(&self, request_id: &RequestId, decision: Decision) -> GateResult<Vec<ToolCall>> {
        let shared = self.ledger_for(request_id)?;
        let mut ledger = lock(&shared);
        let live = ledger
            .calls
            .get(request_id)
            .ok_or_else(|| GateError::UnknownRequest {
                request_id: request_id.clone(),
            })?;
        if live.call.status != ToolRunStatus::PendingApproval {
            return Err(GateError::QueueConflict {
                request_id: request_id.clone(),
            });
        }
        let session_id = live.call.session_id().clone();
        let tool = live.call.tool().to_owned();

        info!(
            request_id = %request_id,
            session_id = %session_id,
            decision = %decision,
            "approval decision"
        );

        let (scope, recorded) = match decision {
            Decision::Deny => {
                self.inner
                    .queue
                    .resolve(request_id, ApprovalDecision::Denied)?;
                let call = self.transition(&mut ledger, request_id, ToolRunStatus::Denied, |c| {
                    c.decision = ApprovalDecision::Denied;
                    c.message = Some(DENIED_BY_USER.to_owned());
                })?;
                return Ok(vec![call]);
            },
            Decision::Approve => {
                let resolved = self
                    .inner
                    .queue
                    .resolve(request_id, ApprovalDecision::Approved)?;
                let call = self.transition(&mut ledger, request_id, ToolRunStatus::Running, |c| {
                    c.decision = resolved.decision;
                })?;
                return Ok(vec![call]);
            },
            Decision::ApproveAll => (GrantScope::All, ApprovalDecision::ApprovedAll),
            Decision::ApproveTool => (GrantScope::tool(tool), ApprovalDecision::ApprovedTool),
        };

        match self.inner.grants.grant(&session_id, scope.clone()) {
            Ok(true) => {
                self.inner.bus.publish(GateEvent::GrantAdded {
                    metadata: EventMetadata::new(SOURCE).with_session_id(session_id.clone()),
                    scope: scope.clone(),
                });
            },
            Ok(false) => {},
            Err(e) => {
                error!(
                    request_id = %request_id,
                    session_id = %session_id,
                    scope = %scope,
                    error = %e,
                    "failed to record session grant"
                );
                self.inner.queue.remove(request_id);
                let call = self.transition(&mut ledger, request_id, ToolRunStatus::Error, |c| {
                    c.decision = recorded;
                    c.message = Some(e.to_string());
                })?;
                return Ok(vec![call]);
            },
        }

        let resolved = self
            .inner
            .queue
            .resolve_with(request_id, recorded, |request, risk| {
                satisfies(&scope, &request.tool, risk)
            })?;
        resolved
            .into_iter()
            .map(|r| {
                self.transition(&mut ledger, &r.request.request_id, ToolRunStatus::Running, |c| {
                    c.decision = r.decision;
                })
            })
            .collect()
    }

    /// Record the executor's outcome for a running request.
    ///
    /// # Errors
    ///
    /// Returns [`GateError::UnknownRequest`] if no live request has this id
    /// and [`GateError::InvalidTransition`] if it is not running.
    pub fn complete(&self, request_id: &RequestId, outcome: ExecutionOutcome) -> GateResult<ToolCall> {
        let shared = self.ledger_for(request_id)?;
        let mut ledger = lock(&shared);
        let next = if outcome.is_success() {
            ToolRunStatus::Success
        } else {
            ToolRunStatus::Error
        };
        let status = ledger
            .calls
            .get(request_id)
            .map(|live| live.call.status)
            .ok_or_else(|| GateError::UnknownRequest {
                request_id: request_id.clone(),
            })?;
        if status != ToolRunStatus::Running {
            return Err(GateError::InvalidTransition {
                request_id: request_id.clone(),
                from: status,
                to: next,
            });
        }

        self.transition(&mut ledger, request_id, next, |c| match outcome {
            ExecutionOutcome::Success { output } => c.output = Some(output),
            ExecutionOutcome::Error { message } => c.message = Some(message),
        })
    }

    /// Abort a session's in-flight work.
    ///
    /// Every queued request is denied. Running requests are flagged
    /// `cancel_requested` and their cancellation tokens fire; they still end
    /// with whatever the executor reports. Returns the number denied.
    pub fn cancel_session(&self, session_id: &SessionId) -> usize {
        let Some(shared) = self.existing_ledger(session_id) else {
            return 0;
        };
        let mut ledger = lock(&shared);
        if ledger.retired {
            return 0;
        }
        self.cancel_locked(&mut ledger, session_id)
    }

    /// End a session: cancel it, drop its grants and refuse new submissions.
    /// Returns the number of requests denied.
    pub fn close_session(&self, session_id: &SessionId) -> usize {
        if !self.inner.closed.insert(session_id.clone()) {
            return 0;
        }
        // Submissions check the closed set under the ledger lock, so nothing
        // lands after this cancel.
        let denied = match self.existing_ledger(session_id) {
            Some(shared) => self.cancel_locked(&mut lock(&shared), session_id),
            None => self.cancel_locked(&mut SessionLedger::default(), session_id),
        };

        match self.inner.grants.clear(session_id) {
            Ok(count) => debug!(session_id = %session_id, count, "session grants cleared"),
            Err(e) => warn!(session_id = %session_id, error = %e, "failed to clear session grants"),
        }

        info!(session_id = %session_id, "session closed");
        self.inner.bus.publish(GateEvent::SessionClosed {
            metadata: EventMetadata::new(SOURCE).with_session_id(session_id.clone()),
        });
        denied
    }

    /// Deny a request that is still waiting for a decision, recording
    /// decision `expired`. Returns `None` if it no longer waits.
    ///
    /// # Errors
    ///
    /// Returns an error if the queue and the ledger disagree about the request.
    pub fn expire(&self, request_id: &RequestId) -> GateResult<Option<ToolCall>> {
        let Ok(shared) = self.ledger_for(request_id) else {
            return Ok(None);
        };
        let mut ledger = lock(&shared);
        let waiting = ledger
            .calls
            .get(request_id)
            .is_some_and(|live| live.call.status == ToolRunStatus::PendingApproval);
        if !waiting {
            return Ok(None);
        }

        self.inner
            .queue
            .resolve(request_id, ApprovalDecision::Expired)?;
        let message = match self.inner.approval_timeout {
            Some(timeout) => format!("approval expired after {}s", timeout.as_secs()),
            None => "approval expired".to_owned(),
        };
        info!(request_id = %request_id, "approval expired");
        let call = self.transition(&mut ledger, request_id, ToolRunStatus::Denied, |c| {
            c.decision = ApprovalDecision::Expired;
            c.message = Some(message);
        })?;
        Ok(Some(call))
    }

    /// Expire every request that has waited longer than the approval timeout.
    /// Returns the number expired; always zero without a timeout.
    pub fn expire_idle(&self) -> usize {
        let Some(timeout) = self.inner.approval_timeout else {
            return 0;
        };
        let now = Instant::now();
        let ledgers: Vec<SharedLedger> = self
            .inner
            .sessions
            .iter()
            .map(|entry| Arc::clone(entry.value()))
            .collect();

        let mut stale = Vec::new();
        for shared in ledgers {
            let ledger = lock(&shared);
            stale.extend(
                ledger
                    .calls
                    .values()
                    .filter(|live| {
                        live.queued_at
                            .is_some_and(|at| now.saturating_duration_since(at) >= timeout)
                    })
                    .map(|live| live.call.request_id().clone()),
            );
        }

        stale
            .iter()
            .filter(|id| matches!(self.expire(id), Ok(Some(_))))
            .count()
    }

    /// The request currently shown to the human for a session.
    #[must_use]
    pub fn current(&self, session_id: &SessionId) -> Option<ToolCallRequest> {
        self.inner.queue.current(session_id)
    }

    /// Requests of a session awaiting a decision, in arrival order.
    #[must_use]
    pub fn pending(&self, session_id: &SessionId) -> Vec<ToolCallRequest> {
        self.inner.queue.pending(session_id)
    }

    /// Latest snapshot of a live request.
    #[must_use]
    pub fn snapshot(&self, request_id: &RequestId) -> Option<ToolCall> {
        let shared = self.ledger_for(request_id).ok()?;
        let ledger = lock(&shared);
        ledger.calls.get(request_id).map(|live| live.call.clone())
    }

    /// Live requests of a session.
    #[must_use]
    pub fn live_calls(&self, session_id: &SessionId) -> Vec<ToolCall> {
        let Some(shared) = self.existing_ledger(session_id) else {
            return Vec::new();
        };
        let ledger = lock(&shared);
        let mut calls: Vec<ToolCall> = ledger.calls.values().map(|live| live.call.clone()).collect();
        calls.sort_by(|a, b| a.request.created_at.cmp(&b.request.created_at));
        calls
    }

    /// Whether a session was closed.
    #[must_use]
    pub fn is_closed(&self, session_id: &SessionId) -> bool {
        self.inner.closed.contains(session_id)
    }

    fn is_auto_approved(&self, session_id: &SessionId, tool: &str, risk: RiskLevel) -> bool {
        let lookup = match risk {
            RiskLevel::Low => return true,
            RiskLevel::Medium => self.inner.grants.has_grant(session_id, tool),
            RiskLevel::High => self
                .inner
                .grants
                .has_scope(session_id, &GrantScope::tool(tool)),
        };
        lookup.unwrap_or_else(|e| {
            warn!(
                session_id = %session_id,
                tool,
                error = %e,
                "grant lookup failed, requiring approval"
            );
            false
        })
    }

    fn cancel_locked(&self, ledger: &mut SessionLedger, session_id: &SessionId) -> usize {
        let mut denied: usize = 0;
        for resolved in self.inner.queue.cancel_session(session_id) {
            let id = &resolved.request.request_id;
            match self.transition(ledger, id, ToolRunStatus::Denied, |c| {
                c.decision = ApprovalDecision::Denied;
                c.message = Some(SESSION_CANCELLED.to_owned());
            }) {
                Ok(_) => denied = denied.saturating_add(1),
                Err(e) => warn!(request_id = %id, error = %e, "failed to deny queued request"),
            }
        }

        let mut flagged: usize = 0;
        for live in ledger.calls.values_mut() {
            if live.call.status == ToolRunStatus::Running && !live.call.cancel_requested {
                live.call.cancel_requested = true;
                live.cancel.cancel();
                flagged = flagged.saturating_add(1);
            }
        }

        info!(session_id = %session_id, denied, flagged, "session cancelled");
        self.inner.bus.publish(GateEvent::SessionCancelled {
            metadata: EventMetadata::new(SOURCE).with_session_id(session_id.clone()),
            denied,
            flagged,
        });
        denied
    }

    /// Move a live call to `next` and apply `update`, then [`commit`](Self::commit).
    fn transition<F>(
        &self,
        ledger: &mut SessionLedger,
        request_id: &RequestId,
        next: ToolRunStatus,
        update: F,
    ) -> GateResult<ToolCall>
    where
        F: FnOnce(&mut ToolCall),
    {
        let live = ledger
            .calls
            .get_mut(request_id)
            .ok_or_else(|| GateError::UnknownRequest {
                request_id: request_id.clone(),
            })?;
        live.call.advance(next, Timestamp::now())?;
        update(&mut live.call);
        live.queued_at = None;
        self.commit(ledger, request_id)
    }

    /// Publish the current snapshot of a live call and hand it to the
    /// executor if it is running. Terminal calls leave the ledger.
    fn commit(&self, ledger: &mut SessionLedger, request_id: &RequestId) -> GateResult<ToolCall> {
        let live = ledger
            .calls
            .get_mut(request_id)
            .ok_or_else(|| GateError::UnknownRequest {
                request_id: request_id.clone(),
            })?;
        let call = live.call.clone();

        debug!(
            request_id = %request_id,
            session_id = %call.session_id(),
            tool = %call.tool(),
            status = %call.status,
            "tool call transition"
        );
        self.publish(&call);

        if call.is_terminal() {
            ledger.calls.remove(request_id);
            self.inner.requests.remove(request_id);
            self.retire_if_idle(ledger, call.session_id());
        } else if call.status == ToolRunStatus::Running
            && !self.dispatch(&call, live.cancel.clone())
        {
            live.call.advance(ToolRunStatus::Error, Timestamp::now())?;
            live.call.message = Some(NO_EXECUTOR.to_owned());
            return self.commit(ledger, request_id);
        }
        Ok(call)
    }

    /// Drop an idle ledger from the session map. The map entry for a
    /// session is always its one unretired ledger.
    fn retire_if_idle(&self, ledger: &mut SessionLedger, session_id: &SessionId) {
        if ledger.retired || !ledger.calls.is_empty() {
            return;
        }
        ledger.retired = true;
        self.inner.sessions.remove(session_id);
        trace!(session_id = %session_id, "session ledger released");
    }

    fn publish(&self, call: &ToolCall) {
        self.inner
            .bus
            .publish(GateEvent::tool_call(SOURCE, call.clone()));
    }

    /// Queue a running call for execution. `false` if nobody can receive it.
    fn dispatch(&self, call: &ToolCall, cancel: CancellationToken) -> bool {
        let sent = self.inner.dispatch_tx.send(Dispatch {
            request: call.request.clone(),
            cancel,
        });
        if sent.is_err() {
            warn!(request_id = %call.request_id(), "dispatch channel closed");
        }
        sent.is_ok()
    }

    fn schedule_expiry(&self, request_id: &RequestId) {
        let Some(timeout) = self.inner.approval_timeout else {
            return;
        };
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            debug!(request_id = %request_id, "no runtime for expiry timer, relying on expire_idle");
            return;
        };
        let weak: Weak<EngineInner> = Arc::downgrade(&self.inner);
        let request_id = request_id.clone();
        runtime.spawn(async move {
            tokio::time::sleep(timeout).await;
            let Some(inner) = weak.upgrade() else {
                return;
            };
            let engine = ToolCallEngine { inner };
            if let Err(e) = engine.expire(&request_id) {
                warn!(request_id = %request_id, error = %e, "approval expiry failed");
            }
        });
    }

    fn ledger(&self, session_id: &SessionId) -> SharedLedger {
        Arc::clone(
            self.inner
                .sessions
                .entry(session_id.clone())
                .or_default()
                .value(),
        )
    }

    fn existing_ledger(&self, session_id: &SessionId) -> Option<SharedLedger> {
        self.inner
            .sessions
            .get(session_id)
            .map(|entry| Arc::clone(entry.value()))
    }

    fn ledger_for(&self, request_id: &RequestId) -> GateResult<SharedLedger> {
        let unknown = || GateError::UnknownRequest {
            request_id: request_id.clone(),
        };
        let session_id = self
            .inner
            .requests
            .get(request_id)
            .map(|entry| entry.value().clone())
            .ok_or_else(unknown)?;
        self.existing_ledger(&session_id).ok_or_else(unknown)
    }
}

impl fmt::Debug for ToolCallEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ToolCallEngine")
            .field("sessions", &self.inner.sessions.len())
            .field("closed_sessions", &self.inner.closed.len())
            .field("live_requests", &self.inner.requests.len())
            .field("queue", &self.inner.queue)
            .field("approval_timeout", &self.inner.approval_timeout)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
#[path = "engine_tests.rs"]
mod tests;
