use super::*;
use crate::error::GrantStoreError;
use cks_core::ApprovalGrant;
use serde_json::{Value, json};

fn args(value: Value) -> cks_core::ToolArguments {
    match value {
        Value::Object(map) => map,
        _ => panic!("expected an object"),
    }
}

fn request(session: &str, id: &str, tool: &str, arguments: Value) -> ToolCallRequest {
    ToolCallRequest::new(SessionId::from(session), tool, args(arguments)).with_request_id(id)
}

fn read(session: &str, id: &str) -> ToolCallRequest {
    request(session, id, "read_file", json!({"path": "/tmp/a.txt"}))
}

fn write(session: &str, id: &str) -> ToolCallRequest {
    request(
        session,
        id,
        "write_file",
        json!({"path": "/tmp/out.txt", "content": "x"}),
    )
}

fn delete(session: &str, id: &str) -> ToolCallRequest {
    request(session, id, "delete_file", json!({"path": "/tmp/old"}))
}

fn engine() -> ToolCallEngine {
    ToolCallEngine::new(EngineConfig::default())
}

fn rid(id: &str) -> RequestId {
    RequestId::from(id)
}

fn transitions(receiver: &mut EventReceiver) -> Vec<(String, ToolRunStatus)> {
    receiver
        .drain()
        .iter()
        .filter_map(|event| {
            event
                .as_tool_call()
                .map(|call| (call.request_id().to_string(), call.status))
        })
        .collect()
}

#[derive(Debug, Default)]
struct BrokenGrantStore {
    fail_reads: bool,
    fail_writes: bool,
    inner: InMemoryGrantStore,
}

impl BrokenGrantStore {
    fn check(fail: bool) -> Result<(), GrantStoreError> {
        if fail {
            Err(GrantStoreError("backend offline".into()))
        } else {
            Ok(())
        }
    }
}

impl GrantStore for BrokenGrantStore {
    fn has_grant(&self, session_id: &SessionId, tool: &str) -> Result<bool, GrantStoreError> {
        Self::check(self.fail_reads)?;
        self.inner.has_grant(session_id, tool)
    }

    fn has_scope(
        &self,
        session_id: &SessionId,
        scope: &GrantScope,
    ) -> Result<bool, GrantStoreError> {
        Self::check(self.fail_reads)?;
        self.inner.has_scope(session_id, scope)
    }

    fn grant(&self, session_id: &SessionId, scope: GrantScope) -> Result<bool, GrantStoreError> {
        Self::check(self.fail_writes)?;
        self.inner.grant(session_id, scope)
    }

    fn grants(&self, session_id: &SessionId) -> Result<Vec<ApprovalGrant>, GrantStoreError> {
        self.inner.grants(session_id)
    }

    fn clear(&self, session_id: &SessionId) -> Result<usize, GrantStoreError> {
        self.inner.clear(session_id)
    }
}

fn engine_with_store(store: BrokenGrantStore) -> ToolCallEngine {
    ToolCallEngine::with_components(EngineConfig::default(), Arc::new(store), EventBus::new())
}

#[test]
fn test_low_risk_runs_immediately() {
    let engine = engine();
    let mut events = engine.subscribe();
    let mut dispatch = engine.take_dispatch().unwrap();

    let submission = engine.submit(read("s1", "r1")).unwrap();
    assert!(!submission.is_queued());
    let call = submission.call();
    assert_eq!(call.status, ToolRunStatus::Running);
    assert_eq!(call.decision, ApprovalDecision::AutoApproved);
    assert!(call.started_at.is_some());

    assert_eq!(
        transitions(&mut events),
        vec![("r1".to_owned(), ToolRunStatus::Running)]
    );
    let job = dispatch.try_recv().unwrap();
    assert_eq!(job.request.request_id.as_str(), "r1");
    assert!(engine.current(&SessionId::from("s1")).is_none());
}

#[test]
fn test_medium_risk_waits_for_approval() {
    let engine = engine();
    let mut dispatch = engine.take_dispatch().unwrap();

    let submission = engine.submit(write("s1", "r1")).unwrap();
    assert!(submission.is_queued());
    assert_eq!(submission.call().status, ToolRunStatus::PendingApproval);
    assert!(dispatch.try_recv().is_err());
    assert_eq!(
        engine
            .current(&SessionId::from("s1"))
            .unwrap()
            .request_id
            .as_str(),
        "r1"
    );

    let moved = engine.decide(&rid("r1"), Decision::Approve).unwrap();
    assert_eq!(moved.len(), 1);
    assert_eq!(moved[0].status, ToolRunStatus::Running);
    assert_eq!(moved[0].decision, ApprovalDecision::Approved);
    assert_eq!(dispatch.try_recv().unwrap().request.request_id.as_str(), "r1");
    assert!(engine.current(&SessionId::from("s1")).is_none());
}

#[tokio::test]
async fn test_deny_settles_request_and_handle() {
    let engine = engine();
    let mut events = engine.subscribe();
    let handle = engine
        .submit(delete("s1", "r1"))
        .unwrap()
        .into_handle()
        .unwrap();

    let moved = engine.decide(&rid("r1"), Decision::Deny).unwrap();
    assert_eq!(moved[0].status, ToolRunStatus::Denied);
    assert_eq!(moved[0].message.as_deref(), Some("denied by user"));
    assert!(moved[0].duration_ms.is_none());
    assert_eq!(handle.wait().await, ApprovalDecision::Denied);

    assert_eq!(
        transitions(&mut events),
        vec![
            ("r1".to_owned(), ToolRunStatus::PendingApproval),
            ("r1".to_owned(), ToolRunStatus::Denied),
        ]
    );
    assert!(engine.snapshot(&rid("r1")).is_none());
}

#[test]
fn test_approve_all_releases_queue_in_arrival_order() {
    let engine = engine();
    let mut events = engine.subscribe();
    for id in ["r1", "r2", "r3"] {
        engine.submit(write("s1", id)).unwrap();
    }
    events.drain();

    let moved = engine.decide(&rid("r2"), Decision::ApproveAll).unwrap();
    let order: Vec<_> = moved
        .iter()
        .map(|c| (c.request_id().as_str(), c.decision))
        .collect();
    assert_eq!(
        order,
        vec![
            ("r1", ApprovalDecision::Approved),
            ("r2", ApprovalDecision::ApprovedAll),
            ("r3", ApprovalDecision::Approved),
        ]
    );

    let published: Vec<_> = events.drain().iter().map(|e| e.event_type()).collect();
    assert_eq!(
        published,
        vec!["grant_added", "tool_call", "tool_call", "tool_call"]
    );

    // A fourth medium-risk request is covered by the grant.
    let fourth = engine.submit(write("s1", "r4")).unwrap();
    assert_eq!(fourth.call().decision, ApprovalDecision::AutoApproved);
}

#[test]
fn test_all_grant_never_covers_high_risk() {
    let engine = engine();
    engine.submit(write("s1", "r1")).unwrap();
    engine.submit(delete("s1", "r2")).unwrap();

    let moved = engine.decide(&rid("r1"), Decision::ApproveAll).unwrap();
    assert_eq!(moved.len(), 1);
    assert_eq!(
        engine
            .current(&SessionId::from("s1"))
            .unwrap()
            .request_id
            .as_str(),
        "r2"
    );

    let later = engine.submit(delete("s1", "r3")).unwrap();
    assert!(later.is_queued());
}

#[test]
fn test_all_grant_does_not_cover_malformed_destructive_command() {
    let engine = engine();
    engine.submit(write("s1", "r1")).unwrap();
    engine.decide(&rid("r1"), Decision::ApproveAll).unwrap();

    let submission = engine
        .submit(request(
            "s1",
            "r2",
            "run_command",
            json!({"command": "rm -rf /home/user", "timeout_secs": "30"}),
        ))
        .unwrap();
    assert!(submission.is_queued());
    assert_eq!(submission.call().risk(), RiskLevel::High);
    assert_eq!(submission.call().status, ToolRunStatus::PendingApproval);
}

#[test]
fn test_approve_all_can_target_high_risk_request() {
    let engine = engine();
    engine.submit(delete("s1", "r1")).unwrap();
    engine.submit(delete("s1", "r2")).unwrap();
    engine.submit(write("s1", "r3")).unwrap();

    let moved = engine.decide(&rid("r1"), Decision::ApproveAll).unwrap();
    let ids: Vec<_> = moved.iter().map(|c| c.request_id().as_str()).collect();
    assert_eq!(ids, vec!["r1", "r3"]);
    assert_eq!(engine.pending(&SessionId::from("s1")).len(), 1);
}

#[test]
fn test_approve_tool_covers_high_risk_of_that_tool() {
    let engine = engine();
    engine.submit(delete("s1", "r1")).unwrap();
    engine.submit(write("s1", "r2")).unwrap();
    engine.submit(delete("s1", "r3")).unwrap();

    let moved = engine.decide(&rid("r1"), Decision::ApproveTool).unwrap();
    let order: Vec<_> = moved
        .iter()
        .map(|c| (c.request_id().as_str(), c.decision))
        .collect();
    assert_eq!(
        order,
        vec![
            ("r1", ApprovalDecision::ApprovedTool),
            ("r3", ApprovalDecision::Approved),
        ]
    );
    assert_eq!(
        engine
            .current(&SessionId::from("s1"))
            .unwrap()
            .request_id
            .as_str(),
        "r2"
    );

    let later = engine.submit(delete("s1", "r4")).unwrap();
    assert_eq!(later.call().status, ToolRunStatus::Running);
}

#[test]
fn test_repeated_grant_is_idempotent() {
    let engine = engine();
    let mut events = engine.subscribe();
    engine.submit(write("s1", "r1")).unwrap();
    engine.decide(&rid("r1"), Decision::ApproveAll).unwrap();
    engine.submit(delete("s1", "r2")).unwrap();
    engine.decide(&rid("r2"), Decision::ApproveAll).unwrap();

    let grants = engine
        .grant_store()
        .grants(&SessionId::from("s1"))
        .unwrap();
    assert_eq!(grants.len(), 1);
    let grant_events = events
        .drain()
        .iter()
        .filter(|e| e.event_type() == "grant_added")
        .count();
    assert_eq!(grant_events, 1);
}

#[test]
fn test_grants_do_not_cross_sessions() {
    let engine = engine();
    engine.submit(write("a", "a1")).unwrap();
    engine.submit(write("b", "b1")).unwrap();
    engine.decide(&rid("a1"), Decision::ApproveAll).unwrap();

    assert!(engine.current(&SessionId::from("b")).is_some());
    let b2 = engine.submit(write("b", "b2")).unwrap();
    assert!(b2.is_queued());
}

#[test]
fn test_second_decision_is_a_conflict() {
    let engine = engine();
    engine.submit(write("s1", "r1")).unwrap();
    engine.decide(&rid("r1"), Decision::Approve).unwrap();

    let err = engine.decide(&rid("r1"), Decision::Deny).unwrap_err();
    assert!(matches!(err, GateError::QueueConflict { .. }));
    assert_eq!(
        engine.snapshot(&rid("r1")).unwrap().status,
        ToolRunStatus::Running
    );

    let err = engine.decide(&rid("missing"), Decision::Approve).unwrap_err();
    assert!(matches!(err, GateError::UnknownRequest { .. }));
}

#[test]
fn test_complete_records_outcome() {
    let engine = engine();
    let mut events = engine.subscribe();
    engine.submit(read("s1", "r1")).unwrap();
    engine.submit(read("s1", "r2")).unwrap();

    let done = engine
        .complete(&rid("r1"), ExecutionOutcome::success("hello"))
        .unwrap();
    assert_eq!(done.status, ToolRunStatus::Success);
    assert_eq!(done.output.as_deref(), Some("hello"));
    assert!(done.duration_ms.is_some());

    let failed = engine
        .complete(&rid("r2"), ExecutionOutcome::error("Command failed with exit code 2"))
        .unwrap();
    assert_eq!(failed.status, ToolRunStatus::Error);
    assert_eq!(
        failed.message.as_deref(),
        Some("Command failed with exit code 2")
    );

    let terminal = events.drain().iter().filter(|e| e.is_terminal()).count();
    assert_eq!(terminal, 2);

    let err = engine
        .complete(&rid("r1"), ExecutionOutcome::success("again"))
        .unwrap_err();
    assert!(matches!(err, GateError::UnknownRequest { .. }));
}

#[test]
fn test_live_calls_drop_terminal_requests() {
    let engine = engine();
    engine.submit(read("s1", "r1")).unwrap();
    engine.submit(write("s1", "r2")).unwrap();
    engine.submit(read("s2", "r3")).unwrap();

    let mut live: Vec<(String, ToolRunStatus)> = engine
        .live_calls(&SessionId::from("s1"))
        .iter()
        .map(|c| (c.request_id().to_string(), c.status))
        .collect();
    live.sort_by(|a, b| a.0.cmp(&b.0));
    assert_eq!(
        live,
        vec![
            ("r1".to_owned(), ToolRunStatus::Running),
            ("r2".to_owned(), ToolRunStatus::PendingApproval),
        ]
    );

    engine
        .complete(&rid("r1"), ExecutionOutcome::success("ok"))
        .unwrap();
    let live = engine.live_calls(&SessionId::from("s1"));
    assert_eq!(live.len(), 1);
    assert_eq!(live[0].request_id().as_str(), "r2");
    assert!(engine.snapshot(&rid("r1")).is_none());
    assert!(engine.live_calls(&SessionId::from("unknown")).is_empty());
}

#[test]
fn test_complete_requires_running() {
    let engine = engine();
    engine.submit(write("s1", "r1")).unwrap();

    let err = engine
        .complete(&rid("r1"), ExecutionOutcome::error("boom"))
        .unwrap_err();
    assert!(matches!(
        err,
        GateError::InvalidTransition {
            from: ToolRunStatus::PendingApproval,
            ..
        }
    ));
    assert!(engine.current(&SessionId::from("s1")).is_some());
}

#[test]
fn test_cancel_session_denies_pending_and_flags_running() {
    let engine = engine();
    let mut dispatch = engine.take_dispatch().unwrap();
    let mut events = engine.subscribe_session(SessionId::from("s1"));

    engine.submit(read("s1", "r1")).unwrap();
    engine.submit(write("s1", "r2")).unwrap();
    engine.submit(delete("s1", "r3")).unwrap();
    engine.submit(write("s2", "x1")).unwrap();
    let job = dispatch.try_recv().unwrap();
    events.drain();

    let denied = engine.cancel_session(&SessionId::from("s1"));
    assert_eq!(denied, 2);
    assert!(job.cancel.is_cancelled());

    let running = engine.snapshot(&rid("r1")).unwrap();
    assert!(running.cancel_requested);
    assert_eq!(running.status, ToolRunStatus::Running);

    let published = events.drain();
    let denied_events = published
        .iter()
        .filter(|e| e.status() == Some(ToolRunStatus::Denied))
        .count();
    assert_eq!(denied_events, 2);
    assert_eq!(
        published.last().map(|e| e.event_type()),
        Some("session_cancelled")
    );

    // Other sessions are untouched; the running call still completes.
    assert!(engine.current(&SessionId::from("s2")).is_some());
    let done = engine
        .complete(&rid("r1"), ExecutionOutcome::error("cancelled"))
        .unwrap();
    assert!(done.cancel_requested);
    assert_eq!(done.status, ToolRunStatus::Error);

    // The session keeps accepting work after an abort.
    assert!(engine.submit(write("s1", "r5")).unwrap().is_queued());
}

#[test]
fn test_close_session_clears_grants_and_refuses_new_work() {
    let engine = engine();
    engine.submit(write("s1", "r1")).unwrap();
    engine.decide(&rid("r1"), Decision::ApproveAll).unwrap();
    engine.submit(write("s1", "r2")).unwrap();

    engine.close_session(&SessionId::from("s1"));
    assert!(engine.is_closed(&SessionId::from("s1")));
    assert!(
        engine
            .grant_store()
            .grants(&SessionId::from("s1"))
            .unwrap()
            .is_empty()
    );

    let err = engine.submit(write("s1", "r3")).unwrap_err();
    assert!(matches!(err, GateError::SessionClosed { .. }));
    assert_eq!(engine.close_session(&SessionId::from("s1")), 0);
}

#[test]
fn test_idle_sessions_release_their_ledger() {
    let engine = engine();
    let s1 = SessionId::from("s1");
    engine.submit(read("s1", "r1")).unwrap();
    engine.submit(write("s1", "r2")).unwrap();
    assert_eq!(engine.inner.sessions.len(), 1);

    engine
        .complete(&rid("r1"), ExecutionOutcome::success("ok"))
        .unwrap();
    assert_eq!(engine.inner.sessions.len(), 1, "r2 is still queued");

    engine.decide(&rid("r2"), Decision::Deny).unwrap();
    assert_eq!(engine.inner.sessions.len(), 0);
    assert_eq!(engine.cancel_session(&s1), 0);
    assert_eq!(engine.inner.sessions.len(), 0);

    // The session picks up again with a fresh ledger.
    assert!(engine.submit(write("s1", "r3")).unwrap().is_queued());
    assert_eq!(engine.live_calls(&s1).len(), 1);

    assert_eq!(engine.close_session(&s1), 1);
    assert_eq!(engine.inner.sessions.len(), 0);
    assert!(engine.is_closed(&s1));

    // Refused work and closing unknown sessions leave no ledger behind.
    assert!(engine.submit(write("s1", "r4")).is_err());
    engine.close_session(&SessionId::from("never-used"));
    assert_eq!(engine.inner.sessions.len(), 0);
    assert_eq!(engine.inner.closed.len(), 2);
    assert!(engine.inner.requests.is_empty());
}

#[test]
fn test_failed_grant_lookup_requires_approval() {
    let engine = engine_with_store(BrokenGrantStore {
        fail_reads: true,
        ..Default::default()
    });
    let submission = engine.submit(write("s1", "r1")).unwrap();
    assert!(submission.is_queued());

    // Low risk never consults the store.
    let low = engine.submit(read("s1", "r2")).unwrap();
    assert_eq!(low.call().status, ToolRunStatus::Running);
}

#[test]
fn test_failed_grant_write_fails_only_the_target() {
    let engine = engine_with_store(BrokenGrantStore {
        fail_writes: true,
        ..Default::default()
    });
    engine.submit(write("s1", "r1")).unwrap();
    engine.submit(write("s1", "r2")).unwrap();

    let moved = engine.decide(&rid("r1"), Decision::ApproveAll).unwrap();
    assert_eq!(moved.len(), 1);
    assert_eq!(moved[0].status, ToolRunStatus::Error);
    assert_eq!(
        moved[0].message.as_deref(),
        Some("grant store unavailable: backend offline")
    );
    assert_eq!(engine.pending(&SessionId::from("s1")).len(), 1);
    assert_eq!(
        engine
            .current(&SessionId::from("s1"))
            .unwrap()
            .request_id
            .as_str(),
        "r2"
    );
}

#[test]
fn test_duplicate_request_id_rejected() {
    let engine = engine();
    engine.submit(write("s1", "r1")).unwrap();
    let err = engine.submit(write("s2", "r1")).unwrap_err();
    assert!(matches!(err, GateError::DuplicateRequest { .. }));
    assert!(engine.current(&SessionId::from("s2")).is_none());
}

#[test]
fn test_running_call_fails_without_executor() {
    let engine = engine();
    drop(engine.take_dispatch());
    assert!(engine.take_dispatch().is_none());

    let submission = engine.submit(read("s1", "r1")).unwrap();
    assert_eq!(submission.call().status, ToolRunStatus::Error);
    assert_eq!(
        submission.call().message.as_deref(),
        Some("no executor attached")
    );
    assert!(engine.snapshot(&rid("r1")).is_none());
}

#[test]
fn test_event_sequence_for_approved_call() {
    let engine = engine();
    let mut events = engine.subscribe_session(SessionId::from("s1"));
    engine.submit(write("s1", "r1")).unwrap();
    engine.decide(&rid("r1"), Decision::Approve).unwrap();
    engine
        .complete(&rid("r1"), ExecutionOutcome::success("File written: /tmp/out.txt"))
        .unwrap();

    let statuses: Vec<_> = transitions(&mut events).into_iter().map(|(_, s)| s).collect();
    assert_eq!(
        statuses,
        vec![
            ToolRunStatus::PendingApproval,
            ToolRunStatus::Running,
            ToolRunStatus::Success,
        ]
    );
}

#[tokio::test(start_paused = true)]
async fn test_unanswered_request_expires() {
    let engine = ToolCallEngine::new(
        EngineConfig::default().with_approval_timeout(Duration::from_secs(5)),
    );
    let mut events = engine.subscribe();
    let handle = engine
        .submit(write("s1", "r1"))
        .unwrap()
        .into_handle()
        .unwrap();

    assert_eq!(handle.wait().await, ApprovalDecision::Expired);

    let last = transitions(&mut events).pop().unwrap();
    assert_eq!(last, ("r1".to_owned(), ToolRunStatus::Denied));
    assert!(engine.current(&SessionId::from("s1")).is_none());
    let err = engine.decide(&rid("r1"), Decision::Approve).unwrap_err();
    assert!(err.is_conflict());
}

#[tokio::test(start_paused = true)]
async fn test_decision_before_timeout_wins() {
    let engine = ToolCallEngine::new(
        EngineConfig::default().with_approval_timeout(Duration::from_secs(5)),
    );
    let handle = engine
        .submit(write("s1", "r1"))
        .unwrap()
        .into_handle()
        .unwrap();
    engine.decide(&rid("r1"), Decision::Approve).unwrap();

    tokio::time::sleep(Duration::from_secs(10)).await;
    assert_eq!(handle.wait().await, ApprovalDecision::Approved);
    assert_eq!(
        engine.snapshot(&rid("r1")).unwrap().status,
        ToolRunStatus::Running
    );
}

#[test]
fn test_expire_idle_sweeps_without_runtime() {
    let engine =
        ToolCallEngine::new(EngineConfig::default().with_approval_timeout(Duration::ZERO));
    let mut events = engine.subscribe();
    engine.submit(write("s1", "r1")).unwrap();
    engine.submit(read("s1", "r2")).unwrap();
    events.drain();

    assert_eq!(engine.expire_idle(), 1);
    let event = events.drain().pop().unwrap();
    let call = event.as_tool_call().unwrap();
    assert_eq!(call.decision, ApprovalDecision::Expired);
    assert_eq!(call.message.as_deref(), Some("approval expired after 0s"));
    assert_eq!(engine.expire_idle(), 0);
}

#[test]
fn test_expire_idle_is_noop_without_timeout() {
    let engine = engine();
    engine.submit(write("s1", "r1")).unwrap();
    assert_eq!(engine.expire_idle(), 0);
    assert!(engine.expire(&rid("nope")).unwrap().is_none());
}
