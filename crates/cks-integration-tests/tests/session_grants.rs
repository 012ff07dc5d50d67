//! Integration tests for session-scoped grants: "approve all" and "always
//! allow this tool" release covered queued requests in arrival order and
//! auto-approve later ones, without leaking across sessions.

mod common;

use cks_approval::{Decision, GrantStore};
use cks_core::{ApprovalDecision, GateError, GrantScope, RiskLevel, ToolRunStatus};
use common::{GateHarness, request, request_id, session};
use serde_json::json;

fn write(session: &str, id: &str) -> cks_core::ToolCallRequest {
    request(session, id, "write_file", json!({"path": id, "content": "x"}))
}

fn delete(session: &str, id: &str) -> cks_core::ToolCallRequest {
    request(session, id, "delete_file", json!({"path": id}))
}

#[tokio::test]
async fn test_approve_all_releases_covered_requests_in_order() {
    let mut harness = GateHarness::new();
    harness.submit(write("s1", "r1"));
    harness.submit(request("s1", "r2", "run_command", json!({"command": "git status"})));
    harness.submit(delete("s1", "r3"));
    harness.submit(write("s1", "r4"));
    harness.drain();

    let moved = harness
        .engine
        .decide(&request_id("r2"), Decision::ApproveAll)
        .unwrap();
    let order: Vec<_> = moved
        .iter()
        .map(|c| (c.request_id().as_str().to_owned(), c.decision))
        .collect();
    assert_eq!(
        order,
        vec![
            ("r1".to_owned(), ApprovalDecision::Approved),
            ("r2".to_owned(), ApprovalDecision::ApprovedAll),
            ("r4".to_owned(), ApprovalDecision::Approved),
        ]
    );
    assert!(moved.iter().all(|c| c.status == ToolRunStatus::Running));

    // The high-risk delete still needs its own answer.
    assert_eq!(
        harness.engine.current(&session("s1")).unwrap().request_id,
        request_id("r3")
    );

    let events = harness.drain();
    let kinds: Vec<_> = events.iter().map(|e| e.event_type()).collect();
    assert_eq!(kinds, vec!["grant_added", "tool_call", "tool_call", "tool_call"]);

    // Later medium requests no longer prompt.
    let later = harness.submit(write("s1", "r5"));
    assert!(!later.is_queued());
    assert_eq!(later.call().decision, ApprovalDecision::AutoApproved);
}

#[tokio::test]
async fn test_all_grant_never_covers_high_risk() {
    let harness = GateHarness::new();
    harness.submit(write("s1", "r1"));
    harness.engine.decide(&request_id("r1"), Decision::ApproveAll).unwrap();

    let submission = harness.submit(delete("s1", "r2"));
    assert_eq!(submission.call().risk(), RiskLevel::High);
    assert!(submission.is_queued());
}

#[tokio::test]
async fn test_approve_tool_covers_same_tool_at_high_risk() {
    let harness = GateHarness::new();
    harness.submit(delete("s1", "r1"));
    harness.submit(write("s1", "r2"));
    harness.submit(delete("s1", "r3"));

    let moved = harness
        .engine
        .decide(&request_id("r1"), Decision::ApproveTool)
        .unwrap();
    let ids: Vec<_> = moved.iter().map(|c| c.request_id().as_str()).collect();
    assert_eq!(ids, vec!["r1", "r3"]);
    assert_eq!(moved[0].decision, ApprovalDecision::ApprovedTool);

    assert_eq!(
        harness.engine.pending(&session("s1"))[0].request_id,
        request_id("r2")
    );
    assert!(!harness.submit(delete("s1", "r4")).is_queued());
    assert!(harness.submit(write("s1", "r5")).is_queued());

    let grants = harness.engine.grant_store().grants(&session("s1")).unwrap();
    assert_eq!(grants.len(), 1);
    assert_eq!(grants[0].scope, GrantScope::tool("delete_file"));
}

#[tokio::test]
async fn test_repeated_grant_is_announced_once() {
    let mut harness = GateHarness::new();
    harness.submit(write("s1", "r1"));
    harness.engine.decide(&request_id("r1"), Decision::ApproveAll).unwrap();
    harness.submit(delete("s1", "r2"));
    harness.engine.decide(&request_id("r2"), Decision::ApproveAll).unwrap();

    let grants_added = harness
        .drain()
        .iter()
        .filter(|e| e.event_type() == "grant_added")
        .count();
    assert_eq!(grants_added, 1);
    assert_eq!(
        harness.engine.grant_store().grants(&session("s1")).unwrap().len(),
        1
    );
}

#[tokio::test]
async fn test_grants_do_not_leak_between_sessions() {
    let harness = GateHarness::new();
    harness.submit(write("a", "a1"));
    harness.submit(write("b", "b1"));
    harness.engine.decide(&request_id("a1"), Decision::ApproveAll).unwrap();

    assert_eq!(
        harness.engine.current(&session("b")).unwrap().request_id,
        request_id("b1")
    );
    assert!(harness.submit(write("b", "b2")).is_queued());
    assert!(!harness.submit(write("a", "a2")).is_queued());
}

#[tokio::test]
async fn test_closed_session_drops_grants_and_refuses_work() {
    let harness = GateHarness::new();
    harness.submit(write("s1", "r1"));
    harness.engine.decide(&request_id("r1"), Decision::ApproveAll).unwrap();
    harness.submit(write("s1", "r2"));

    harness.engine.close_session(&session("s1"));
    assert!(harness.engine.is_closed(&session("s1")));
    assert!(
        harness
            .engine
            .grant_store()
            .grants(&session("s1"))
            .unwrap()
            .is_empty()
    );

    let err = harness.engine.submit(write("s1", "r3")).unwrap_err();
    assert!(matches!(err, GateError::SessionClosed { .. }));
    assert_eq!(harness.engine.close_session(&session("s1")), 0);
}
