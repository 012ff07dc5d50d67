//! Per-session FIFO of requests awaiting a human decision.
//!
//! Only the head of a session's queue is shown to the human. Sessions never
//! block each other: each has its own queue.

use std::collections::VecDeque;
use std::fmt;

use cks_core::{ApprovalDecision, RequestId, RiskLevel, SessionId, ToolCallRequest};
use dashmap::DashMap;
use tokio::sync::oneshot;
use tracing::{debug, trace};

use crate::error::QueueConflict;

/// Awaitable decision for one queued request.
///
/// Resolves to the final [`ApprovalDecision`]. If the request leaves the queue
/// without a decision (it failed, or the queue was dropped) the handle
/// resolves to [`ApprovalDecision::Denied`].
#[derive(Debug)]
pub struct ApprovalHandle {
    request_id: RequestId,
    receiver: oneshot::Receiver<ApprovalDecision>,
}

impl ApprovalHandle {
    /// The queued request.
    #[must_use]
    pub fn request_id(&self) -> &RequestId {
        &self.request_id
    }

    /// Wait for the decision.
    pub async fn wait(self) -> ApprovalDecision {
        self.receiver.await.unwrap_or(ApprovalDecision::Denied)
    }

    /// The decision, if one has been made.
    pub fn try_decision(&mut self) -> Option<ApprovalDecision> {
        match self.receiver.try_recv() {
            Ok(decision) => Some(decision),
            Err(oneshot::error::TryRecvError::Empty) => None,
            Err(oneshot::error::TryRecvError::Closed) => Some(ApprovalDecision::Denied),
        }
    }
}

/// A request that left the queue with a decision.
#[derive(Debug, Clone, PartialEq)]
pub struct Resolved {
    /// The request.
    pub request: ToolCallRequest,
    /// Decision delivered to its handle.
    pub decision: ApprovalDecision,
}

struct QueueEntry {
    request: ToolCallRequest,
    risk: RiskLevel,
    responder: Option<oneshot::Sender<ApprovalDecision>>,
}

impl QueueEntry {
    fn settle(mut self, decision: ApprovalDecision) -> Resolved {
        if let Some(responder) = self.responder.take() {
            // The handle may have been dropped; nobody is waiting then.
            let _ = responder.send(decision);
        }
        Resolved {
            request: self.request,
            decision,
        }
    }
}

/// Approval queue for every session.
#[derive(Default)]
pub struct ApprovalQueue {
    sessions: DashMap<SessionId, VecDeque<QueueEntry>>,
    index: DashMap<RequestId, SessionId>,
}

impl ApprovalQueue {
    /// Create an empty queue.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a request to the tail of its session's queue.
    ///
    /// Request identifiers must be unique among queued requests.
    pub fn enqueue(&self, request: ToolCallRequest, risk: RiskLevel) -> ApprovalHandle {
        let (tx, rx) = oneshot::channel();
        let request_id = request.request_id.clone();
        let session_id = request.session_id.clone();

        self.sessions
            .entry(session_id.clone())
            .or_default()
            .push_back(QueueEntry {
                request,
                risk,
                responder: Some(tx),
            });
        self.index.insert(request_id.clone(), session_id.clone());

        trace!(request_id = %request_id, session_id = %session_id, "request queued");
        ApprovalHandle {
            request_id,
            receiver: rx,
        }
    }

    /// Head of a session's queue: the one request currently shown.
    #[must_use]
    pub fn current(&self, session_id: &SessionId) -> Option<ToolCallRequest> {
        self.sessions
            .get(session_id)
            .and_then(|entries| entries.front().map(|e| e.request.clone()))
    }

    /// Every queued request of a session, in arrival order.
    #[must_use]
    pub fn pending(&self, session_id: &SessionId) -> Vec<ToolCallRequest> {
        self.sessions
            .get(session_id)
            .map(|entries| entries.iter().map(|e| e.request.clone()).collect())
            .unwrap_or_default()
    }

    /// Whether `request_id` is queued.
    #[must_use]
    pub fn contains(&self, request_id: &RequestId) -> bool {
        self.index.contains_key(request_id)
    }

    /// Total number of queued requests.
    #[must_use]
    pub fn len(&self) -> usize {
        self.index.len()
    }

    /// Whether nothing is queued.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    /// Resolve one request with `decision`.
    ///
    /// # Errors
    ///
    /// Returns [`QueueConflict`] if the request is not queued.
    pub fn resolve(
        &self,
        request_id: &RequestId,
        decision: ApprovalDecision,
    ) -> Result<Resolved, QueueConflict> {
        let resolved = self.resolve_with(request_id, decision, |_, _| false)?;
        resolved
            .into_iter()
            .next()
            .ok_or_else(|| QueueConflict {
                request_id: request_id.clone(),
            })
    }

    /// Resolve a request with `decision`, and every other request of its
    /// session for which `covers(request, risk)` holds with
    /// [`ApprovalDecision::Approved`].
    ///
    /// Returns the resolved requests in arrival order; the rest keep their
    /// relative order.
    ///
    /// # Errors
    ///
    /// Returns [`QueueConflict`] if the request is not queued.
    pub fn resolve_with<F>(
        &self,
        request_id: &RequestId,
        decision: ApprovalDecision,
        covers: F,
    ) -> Result<Vec<Resolved>, QueueConflict>
    where
        F: Fn(&ToolCallRequest, RiskLevel) -> bool,
    {
        let conflict = || QueueConflict {
            request_id: request_id.clone(),
        };
        let session_id = self
            .index
            .get(request_id)
            .map(|e| e.value().clone())
            .ok_or_else(conflict)?;

        let taken = {
            let mut entries = self.sessions.get_mut(&session_id).ok_or_else(conflict)?;
            if !entries.iter().any(|e| &e.request.request_id == request_id) {
                return Err(conflict());
            }
            let (taken, kept): (VecDeque<_>, VecDeque<_>) = entries
                .drain(..)
                .partition(|e| &e.request.request_id == request_id || covers(&e.request, e.risk));
            *entries = kept;
            taken
        };
        self.sessions.remove_if(&session_id, |_, entries| entries.is_empty());

        let resolved: Vec<Resolved> = taken
            .into_iter()
            .map(|entry| {
                self.index.remove(&entry.request.request_id);
                let d = if &entry.request.request_id == request_id {
                    decision
                } else {
                    ApprovalDecision::Approved
                };
                entry.settle(d)
            })
            .collect();

        debug!(
            request_id = %request_id,
            session_id = %session_id,
            decision = %decision,
            resolved = resolved.len(),
            "queue resolved"
        );
        Ok(resolved)
    }

    /// Take a request out of the queue without a decision. Its handle
    /// resolves to denied.
    pub fn remove(&self, request_id: &RequestId) -> Option<ToolCallRequest> {
        let (_, session_id) = self.index.remove(request_id)?;
        let entry = {
            let mut entries = self.sessions.get_mut(&session_id)?;
            let pos = entries
                .iter()
                .position(|e| &e.request.request_id == request_id)?;
            entries.remove(pos)
        };
        self.sessions.remove_if(&session_id, |_, entries| entries.is_empty());
        entry.map(|e| e.request)
    }

    /// Deny every queued request of a session, in arrival order.
    pub fn cancel_session(&self, session_id: &SessionId) -> Vec<Resolved> {
        let Some((_, entries)) = self.sessions.remove(session_id) else {
            return Vec::new();
        };
        entries
            .into_iter()
            .map(|entry| {
                self.index.remove(&entry.request.request_id);
                entry.settle(ApprovalDecision::Denied)
            })
            .collect()
    }
}

impl fmt::Debug for ApprovalQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ApprovalQueue")
            .field("sessions", &self.sessions.len())
            .field("queued", &self.index.len())
            .finish()
    }
}

#[cfg(test)]
#[path = "queue_tests.rs"]
mod tests;
