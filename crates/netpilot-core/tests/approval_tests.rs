//! Approval gate and session lifecycle through the orchestrator: at most one
//! mutation per request, replays are no-ops, timeouts and cancellation
//! reject, and sessions survive a restart.

mod common;

use common::{diagnose, fast, params, Lab};
use netpilot_shared::{ApprovalDecision, NetpilotError, OutcomeStatus, Resolution};
use serde_json::json;
use std::time::{Duration, Instant};

fn set_neighbor(lab: &Lab) {
    lab.classifier
        .push(fast("bgp_neighbor_set", json!({"hostname": "R1", "neighbor": "10.0.0.9"})));
    lab.adapter.respond("bgp_neighbor_set", None, json!({"status": "ok"}));
}

// ============================================================================
// Approve
// ============================================================================

/// Approval issues the mutation once; replaying approve does nothing
#[tokio::test]
async fn test_approve_applies_once() {
    let lab = Lab::new();
    set_neighbor(&lab);
    let outcome = lab.orchestrator.query("set bgp neighbor on R1 to 10.0.0.9", vec![]).await.unwrap();
    let session = outcome.session_id.clone().unwrap();
    assert_eq!(lab.adapter.calls("bgp_neighbor_set"), 0);

    let applied = lab.orchestrator.resume(&session, None, ApprovalDecision::Approve).await.unwrap();
    assert_eq!(applied.status, OutcomeStatus::Answered);
    assert!(applied.answer.starts_with("Applied bgp_neighbor_set"));
    assert_eq!(lab.adapter.calls("bgp_neighbor_set"), 1);

    let replay = lab.orchestrator.resume(&session, None, ApprovalDecision::Approve).await.unwrap();
    assert!(replay.answer.contains("already applied"));
    assert_eq!(lab.adapter.calls("bgp_neighbor_set"), 1);
    assert_eq!(lab.orchestrator.registry().mutations_issued(), 1);
}

/// A request suspended in one process is applied from the next, exactly once
#[tokio::test]
async fn test_resume_after_restart() {
    let lab = Lab::new();
    set_neighbor(&lab);
    let outcome = lab.orchestrator.query("set bgp neighbor on R1 to 10.0.0.9", vec![]).await.unwrap();
    let session = outcome.session_id.clone().unwrap();
    let request_id = outcome.pending_approval.unwrap().id;

    let second = lab.restart();
    let applied = second.resume(&session, Some(&request_id), ApprovalDecision::Approve).await.unwrap();
    assert_eq!(applied.status, OutcomeStatus::Answered);
    assert_eq!(lab.adapter.calls("bgp_neighbor_set"), 1);

    let third = lab.restart();
    let replay = third.resume(&session, Some(&request_id), ApprovalDecision::Approve).await.unwrap();
    assert!(replay.answer.contains("already applied"));
    assert_eq!(lab.adapter.calls("bgp_neighbor_set"), 1);

    let state = third.session(&session).await.unwrap().unwrap();
    assert!(state.pending.is_none());
    assert!(state.resolution_of(&request_id).unwrap().applied);
}

/// Edited parameters are re-validated; a bad edit keeps the request pending
#[tokio::test]
async fn test_edit_is_revalidated() {
    let lab = Lab::new();
    set_neighbor(&lab);
    let outcome = lab.orchestrator.query("set bgp neighbor on R1 to 10.0.0.9", vec![]).await.unwrap();
    let session = outcome.session_id.clone().unwrap();

    let err = lab
        .orchestrator
        .resume(&session, None, ApprovalDecision::Edit { params: params(json!({"hostname": "R1"})) })
        .await
        .unwrap_err();
    assert!(matches!(err, NetpilotError::SchemaViolation { .. }));
    assert_eq!(err.exit_code(), 3);
    assert_eq!(lab.adapter.calls("bgp_neighbor_set"), 0);
    assert!(lab.orchestrator.session(&session).await.unwrap().unwrap().pending.is_some());

    let edited = params(json!({"hostname": "R1", "neighbor": "10.0.0.99"}));
    let applied = lab
        .orchestrator
        .resume(&session, None, ApprovalDecision::Edit { params: edited })
        .await
        .unwrap();
    assert_eq!(applied.status, OutcomeStatus::Answered);
    let call = lab.adapter.invocations().into_iter().find(|i| i.tool == "bgp_neighbor_set").unwrap();
    assert_eq!(call.params.get("neighbor"), Some(&json!("10.0.0.99")));
}

/// Approving a diagnosis remediation applies it and carries the conclusion
#[tokio::test]
async fn test_remediation_approval_applies_fix() {
    let lab = Lab::new();
    lab.classifier.push(diagnose(&["R1"]));
    lab.adapter.respond("bgp_cached", Some("R1"), json!([{"state": "Idle"}]));
    lab.adapter.respond("link_cached", Some("R1"), json!([{"oper": "up"}]));
    lab.adapter.respond("bgp_live", Some("R1"), json!([{"state": "Active"}]));
    lab.adapter.respond("bgp_neighbor_fix", None, json!({"status": "ok"}));

    let outcome = lab.orchestrator.chat_turn("s-remediate", "bgp to R1 keeps flapping").await.unwrap();
    assert_eq!(outcome.status, OutcomeStatus::AwaitingApproval);

    let applied = lab.orchestrator.chat_turn("s-remediate", "approve").await.unwrap();
    assert_eq!(applied.status, OutcomeStatus::Answered);
    assert!(applied.conclusion.is_some());
    assert_eq!(lab.adapter.calls("bgp_neighbor_fix"), 1);
}

// ============================================================================
// Reject, timeout, cancel
// ============================================================================

/// An unanswered request past its timeout counts as rejected
#[tokio::test]
async fn test_timeout_is_rejection() {
    let lab = Lab::with_config(|c| c.approval.timeout_secs = 0);
    set_neighbor(&lab);
    let outcome = lab.orchestrator.query("set bgp neighbor on R1 to 10.0.0.9", vec![]).await.unwrap();
    let session = outcome.session_id.clone().unwrap();

    let late = lab.orchestrator.resume(&session, None, ApprovalDecision::Approve).await.unwrap();
    assert_eq!(late.status, OutcomeStatus::Aborted);
    assert_eq!(late.exit_code(), 2);
    assert!(late.answer.contains("timed out"));
    assert_eq!(lab.adapter.calls("bgp_neighbor_set"), 0);
}

/// Waiting in-process ends with a timeout resolution recorded in the session
#[tokio::test]
async fn test_wait_for_decision_times_out() {
    let lab = Lab::with_config(|c| c.approval.timeout_secs = 0);
    set_neighbor(&lab);
    let outcome = lab.orchestrator.chat_turn("s-wait", "set bgp neighbor on R1 to 10.0.0.9").await.unwrap();
    let request_id = outcome.pending_approval.unwrap().id;

    let resolution = lab.orchestrator.wait_for_decision("s-wait", &request_id).await.unwrap();
    assert_eq!(resolution, Resolution::TimedOut);
    let state = lab.orchestrator.session("s-wait").await.unwrap().unwrap();
    assert!(state.pending.is_none());
    assert_eq!(lab.adapter.calls("bgp_neighbor_set"), 0);
}

/// Cancelling a session rejects its pending request; a later approve is a no-op
#[tokio::test]
async fn test_cancel_rejects_pending() {
    let lab = Lab::new();
    set_neighbor(&lab);
    let outcome = lab.orchestrator.chat_turn("s-cancel", "set bgp neighbor on R1 to 10.0.0.9").await.unwrap();
    assert_eq!(outcome.status, OutcomeStatus::AwaitingApproval);

    assert_eq!(lab.orchestrator.cancel_session("s-cancel").await.unwrap(), 1);
    let after = lab.orchestrator.resume("s-cancel", None, ApprovalDecision::Approve).await.unwrap();
    assert_eq!(after.status, OutcomeStatus::Aborted);
    assert_eq!(lab.adapter.calls("bgp_neighbor_set"), 0);
    assert!(lab.orchestrator.pending_approvals(Some("s-cancel")).await.is_empty());
}

/// Cancellation reaches in-flight probes; the diagnosis ends aborted
#[tokio::test]
async fn test_cancel_aborts_running_diagnosis() {
    let lab = Lab::with_config(|c| c.diagnosis.probe_timeout_ms = 10_000);
    lab.classifier.push(diagnose(&["R1"]));
    lab.adapter.respond("bgp_cached", Some("R1"), json!([{"state": "Idle"}]));
    lab.adapter.respond("link_cached", Some("R1"), json!([{"oper": "up"}]));
    lab.adapter
        .respond("bgp_live", Some("R1"), json!([{"state": "Idle"}]))
        .delay("bgp_live", Some("R1"), Duration::from_secs(5));

    let started = Instant::now();
    let (outcome, _) = tokio::join!(lab.orchestrator.chat_turn("s-live", "bgp on R1 is down"), async {
        tokio::time::sleep(Duration::from_millis(100)).await;
        lab.orchestrator.cancel_session("s-live").await
    });
    let outcome = outcome.unwrap();

    assert!(started.elapsed() < Duration::from_secs(3));
    assert_eq!(outcome.status, OutcomeStatus::Aborted);
    assert!(outcome.conclusion.unwrap().is_aborted());
    assert_eq!(lab.orchestrator.registry().mutations_issued(), 0);
}

// ============================================================================
// Sessions
// ============================================================================

/// History and the pending request survive a restart
#[tokio::test]
async fn test_session_round_trip() {
    let lab = Lab::new();
    lab.classifier.push(fast("bgp_peers", json!({"hostname": "R1"})));
    lab.adapter.respond("bgp_peers", None, json!([{"state": "Established"}]));
    set_neighbor(&lab);

    lab.orchestrator.chat_turn("s-history", "show bgp peers on R1").await.unwrap();
    lab.orchestrator.chat_turn("s-history", "set bgp neighbor on R1 to 10.0.0.9").await.unwrap();

    let restarted = lab.restart();
    let state = restarted.session("s-history").await.unwrap().unwrap();
    assert_eq!(state.history.len(), 4);
    assert_eq!(state.pending.as_ref().map(|p| p.plan.tool.as_str()), Some("bgp_neighbor_set"));

    let listed = restarted.sessions().await.unwrap();
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].id, "s-history");
    assert!(listed[0].pending.is_some());
}

/// Resuming a session that was never created is a session error
#[tokio::test]
async fn test_unknown_session() {
    let lab = Lab::new();
    let err = lab
        .orchestrator
        .resume("s-missing", None, ApprovalDecision::Approve)
        .await
        .unwrap_err();
    assert!(matches!(err, NetpilotError::Session(_)));
}
