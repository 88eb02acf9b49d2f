//! Approval workflow scenarios.

use std::collections::HashMap;

use fleetmind_approval::{ApprovalAction, ApprovalFlow, ApprovalState};
use fleetmind_core::{CoreError, IntentTag, Interpretation};
use uuid::Uuid;

fn interpretation(request: serde_json::Value) -> Interpretation {
    Interpretation {
        id: Uuid::new_v4(),
        input_text: "Reserve vehicle RES-1234 tomorrow from 14:00 to 16:00".to_string(),
        intent: IntentTag::ResourceReservation,
        entities: HashMap::new(),
        template_name: "create_reservation".to_string(),
        request,
        intent_confidence: Some(0.87),
        entity_confidence: Some(0.8),
    }
}

fn valid_request() -> serde_json::Value {
    serde_json::json!({
        "resource_id": "RES-1234",
        "start_time": "2024-05-03T14:00:00",
        "end_time": "2024-05-03T16:00:00",
    })
}

#[test]
fn test_approve_happy_path_writes_audit() {
    let mut flow = ApprovalFlow::new();
    flow.load(interpretation(valid_request()));
    assert_eq!(flow.state(), Some(ApprovalState::Pending));

    flow.approve("alice").unwrap();
    assert_eq!(flow.state(), Some(ApprovalState::Approved));

    let audit = flow.audit_log();
    assert_eq!(audit.len(), 1);
    assert_eq!(audit[0].action, ApprovalAction::Approve);
    assert_eq!(audit[0].user_id, "alice");
    assert!(audit[0].modified_request.is_none());
}

#[test]
fn test_end_before_start_blocks_until_edited() {
    let mut flow = ApprovalFlow::new();
    flow.load(interpretation(serde_json::json!({
        "resource_id": "RES-1234",
        "start_time": "2024-05-03T14:00:00",
        "end_time": "2024-05-03T10:00:00",
    })));

    // Approve is blocked with the end_time finding.
    match flow.approve("alice") {
        Err(CoreError::ValidationBlocked { findings }) => {
            assert!(findings
                .iter()
                .any(|f| f.field == "end_time" && f.message == "end before start"));
        }
        other => panic!("expected validation block, got {other:?}"),
    }

    // An edit that fixes the window clears the errors.
    let findings = flow
        .edit(|request| {
            request["end_time"] = serde_json::json!("2024-05-03T16:00:00");
        })
        .unwrap();
    assert!(!findings.iter().any(|f| f.is_blocking()));

    flow.approve("alice").unwrap();
    assert_eq!(flow.state(), Some(ApprovalState::Approved));

    let audit = flow.audit_log();
    assert_eq!(audit.len(), 1);
    assert_eq!(audit[0].action, ApprovalAction::EditApprove);
    assert!(audit[0].modified_request.is_some());
}

#[test]
fn test_reject_with_feedback() {
    let mut flow = ApprovalFlow::new();
    flow.load(interpretation(valid_request()));

    flow.reject("bob", Some("wrong vehicle")).unwrap();
    assert_eq!(flow.state(), Some(ApprovalState::Rejected));

    let audit = flow.audit_log();
    assert_eq!(audit[0].action, ApprovalAction::Reject);
    assert_eq!(audit[0].feedback.as_deref(), Some("wrong vehicle"));
}

#[test]
fn test_regenerate_returns_retry_text_and_closes() {
    let mut flow = ApprovalFlow::new();
    flow.load(interpretation(valid_request()));

    let retry = flow.regenerate("bob", "use VAN-002 instead").unwrap();
    assert_eq!(
        retry,
        "Reserve vehicle RES-1234 tomorrow from 14:00 to 16:00 use VAN-002 instead"
    );
    assert_eq!(flow.state(), None);
    assert_eq!(flow.audit_log()[0].action, ApprovalAction::Regenerate);
}

#[test]
fn test_execute_only_after_approval() {
    let mut flow = ApprovalFlow::new();
    flow.load(interpretation(valid_request()));

    assert!(flow.mark_executed(true).is_err());

    flow.approve("alice").unwrap();
    flow.mark_executed(true).unwrap();
    assert_eq!(flow.state(), Some(ApprovalState::Executed { success: true }));
}

#[test]
fn test_double_approve_rejected() {
    let mut flow = ApprovalFlow::new();
    flow.load(interpretation(valid_request()));
    flow.approve("alice").unwrap();
    assert!(flow.approve("alice").is_err());
}

#[test]
fn test_audit_ring_trims_on_overflow() {
    let mut flow = ApprovalFlow::new();
    for _ in 0..120 {
        flow.load(interpretation(valid_request()));
        flow.approve("alice").unwrap();
    }
    // Capacity 100, trimmed to 50 on overflow.
    let len = flow.audit_log().len();
    assert!(len <= 100, "audit ring exceeded capacity: {len}");
    assert!(len >= 50, "audit ring over-trimmed: {len}");
}

#[test]
fn test_audit_export_is_json_array() {
    let mut flow = ApprovalFlow::new();
    flow.load(interpretation(valid_request()));
    flow.approve("alice").unwrap();

    let json = flow.export_audit_json().unwrap();
    let parsed: serde_json::Value = serde_json::from_str(&json).unwrap();
    assert!(parsed.is_array());
    assert_eq!(parsed[0]["action"], "approve");
}

#[test]
fn test_stats_aggregation() {
    let mut flow = ApprovalFlow::new();
    flow.load(interpretation(valid_request()));
    flow.approve("alice").unwrap();
    flow.load(interpretation(valid_request()));
    flow.reject("bob", None).unwrap();

    let stats = flow.stats();
    assert_eq!(stats.total, 2);
    assert_eq!(stats.by_action["approve"], 1);
    assert_eq!(stats.by_action["reject"], 1);
    assert!((stats.approval_rate - 0.5).abs() < f64::EPSILON);
}
