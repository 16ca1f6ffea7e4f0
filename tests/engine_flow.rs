//! End-to-end transition behaviour over the software workflow

mod common;

use common::Harness;
use issue_workflow::config::EngineConfig;
use issue_workflow::constants::{error_codes, events};
use issue_workflow::models::{
    AssigneeTarget, FieldValue, IssueTypeId, NewTransition, NotificationRecipient,
    PostFunctionKind, ProjectId, UserId, ValidatorKind,
};
use issue_workflow::state_machine::{TransitionContext, WorkflowEvent};
use issue_workflow::IssueStore;
use serde_json::json;
use tokio_test::assert_ok;
use uuid::Uuid;

fn codes(errors: &[issue_workflow::ErrorDetail]) -> Vec<&str> {
    errors.iter().map(|e| e.code.as_str()).collect()
}

#[tokio::test]
async fn test_finish_requires_resolution_for_done_category() {
    let h = Harness::new().await;
    let issue_id = h.create_issue();
    assert_eq!(h.status_of(issue_id), h.flow.todo);

    let started = h
        .engine
        .transition_issue(issue_id, h.flow.start, h.developer, TransitionContext::default())
        .await;
    assert_eq!(started.new_status(), Some(h.flow.in_progress));

    let available = assert_ok!(h.engine.list_available_transitions(issue_id, h.developer).await);
    assert_eq!(available.len(), 1);
    assert_eq!(available[0].transition_id, h.flow.finish);
    assert_eq!(available[0].to_status, h.flow.done);

    let rejected = h
        .engine
        .transition_issue(issue_id, h.flow.finish, h.developer, TransitionContext::default())
        .await;
    assert!(!rejected.is_success());
    assert_eq!(codes(rejected.errors()), vec![error_codes::RESOLUTION_REQUIRED]);
    assert_eq!(h.status_of(issue_id), h.flow.in_progress);

    let finished = h
        .engine
        .transition_issue(
            issue_id,
            h.flow.finish,
            h.developer,
            TransitionContext::default().with_resolution("fixed"),
        )
        .await;
    assert_eq!(finished.new_status(), Some(h.flow.done));

    let issue = h.issue(issue_id);
    assert_eq!(issue.current_status, h.flow.done);
    assert_eq!(issue.resolution.as_deref(), Some("fixed"));
    assert_eq!(h.recorder.count(events::ISSUE_TRANSITIONED), 2);
}

#[tokio::test]
async fn test_approve_is_gated_by_project_role() {
    let h = Harness::new().await;
    let issue_id = h.create_issue();

    let developer_view = h
        .engine
        .list_available_transitions(issue_id, h.developer)
        .await
        .unwrap();
    assert_eq!(
        developer_view.iter().map(|t| t.name.as_str()).collect::<Vec<_>>(),
        vec!["Start"]
    );

    let admin_view = h
        .engine
        .list_available_transitions(issue_id, h.admin)
        .await
        .unwrap();
    assert_eq!(
        admin_view.iter().map(|t| t.name.as_str()).collect::<Vec<_>>(),
        vec!["Start", "Approve"]
    );

    let denied = h
        .engine
        .transition_issue(issue_id, h.flow.approve, h.developer, TransitionContext::default())
        .await;
    assert_eq!(codes(denied.errors()), vec![error_codes::CONDITIONS_NOT_MET]);
    assert_eq!(h.status_of(issue_id), h.flow.todo);

    let approved = h
        .engine
        .transition_issue(issue_id, h.flow.approve, h.admin, TransitionContext::default())
        .await;
    assert_eq!(approved.new_status(), Some(h.flow.done));
    assert_eq!(h.issue(issue_id).resolution.as_deref(), Some("approved"));
}

#[tokio::test]
async fn test_rejected_attempts_change_nothing() {
    let h = Harness::new().await;
    let issue_id = h.create_issue_in(h.flow.in_progress);
    let before = h.issue(issue_id);

    let first = h
        .engine
        .transition_issue(issue_id, h.flow.finish, h.developer, TransitionContext::default())
        .await;
    let second = h
        .engine
        .transition_issue(issue_id, h.flow.finish, h.developer, TransitionContext::default())
        .await;

    assert!(!first.is_success());
    assert_eq!(first, second);
    assert_eq!(h.issue(issue_id), before);
    assert!(h.recorder.events().is_empty());
}

#[tokio::test]
async fn test_transition_from_other_status_is_invalid() {
    let h = Harness::new().await;
    let issue_id = h.create_issue();

    let outcome = h
        .engine
        .transition_issue(
            issue_id,
            h.flow.finish,
            h.developer,
            TransitionContext::default().with_resolution("fixed"),
        )
        .await;

    assert_eq!(codes(outcome.errors()), vec![error_codes::INVALID_TRANSITION]);
    assert_eq!(h.status_of(issue_id), h.flow.todo);
}

#[tokio::test]
async fn test_membership_requirement() {
    let outsider = UserId::new();

    let h = Harness::new().await;
    let issue_id = h.create_issue();
    let outcome = h
        .engine
        .transition_issue(issue_id, h.flow.start, outsider, TransitionContext::default())
        .await;
    assert_eq!(codes(outcome.errors()), vec![error_codes::NOT_PROJECT_MEMBER]);

    let relaxed = Harness::builder()
        .with_config(EngineConfig {
            require_project_membership: false,
            ..EngineConfig::default()
        })
        .build()
        .await;
    let issue_id = relaxed.create_issue();
    let outcome = relaxed
        .engine
        .transition_issue(issue_id, relaxed.flow.start, outsider, TransitionContext::default())
        .await;
    assert_eq!(outcome.new_status(), Some(relaxed.flow.in_progress));
}

#[tokio::test]
async fn test_validators_report_every_failure() {
    let h = Harness::new().await;
    assert_ok!(
        h.service
            .attach_validator(h.admin, h.flow.start, ValidatorKind::CommentRequired {})
            .await
    );
    assert_ok!(
        h.service
            .attach_validator(
                h.admin,
                h.flow.start,
                ValidatorKind::RequiredField {
                    field: "priority".to_string()
                }
            )
            .await
    );

    let issue_id = h.create_issue();
    let outcome = h
        .engine
        .transition_issue(issue_id, h.flow.start, h.developer, TransitionContext::default())
        .await;
    assert_eq!(
        codes(outcome.errors()),
        vec![error_codes::COMMENT_REQUIRED, error_codes::FIELD_REQUIRED]
    );

    let outcome = h
        .engine
        .transition_issue(
            issue_id,
            h.flow.start,
            h.developer,
            TransitionContext::default()
                .with_comment("Picking this up")
                .with_field("priority", json!("high")),
        )
        .await;
    assert!(outcome.is_success());
}

#[tokio::test]
async fn test_post_functions_run_in_declared_order() {
    let h = Harness::new().await;
    h.service
        .attach_post_function(
            h.admin,
            h.flow.start,
            PostFunctionKind::AssignToUser {
                target: AssigneeTarget::CurrentUser,
            },
        )
        .await
        .unwrap();
    h.service
        .attach_post_function(
            h.admin,
            h.flow.start,
            PostFunctionKind::EnqueueNotification {
                template: "issue_started".to_string(),
                recipients: vec![NotificationRecipient::Assignee, NotificationRecipient::Reporter],
            },
        )
        .await
        .unwrap();

    let issue_id = h.create_issue();
    let outcome = h
        .engine
        .transition_issue(issue_id, h.flow.start, h.developer, TransitionContext::default())
        .await;
    assert!(outcome.is_success());
    assert_eq!(h.issue(issue_id).assignee, Some(h.developer));

    let notification = h
        .recorder
        .events()
        .into_iter()
        .find_map(|event| match event {
            WorkflowEvent::NotificationRequested { recipients, .. } => Some(recipients),
            _ => None,
        })
        .expect("notification dispatched");
    assert_eq!(notification, vec![h.developer, h.reporter]);
}

#[tokio::test]
async fn test_audit_event_records_comment_and_correlation() {
    let h = Harness::new().await;
    let issue_id = h.create_issue();
    let correlation_id = Uuid::new_v4();

    let outcome = h
        .engine
        .transition_issue(
            issue_id,
            h.flow.start,
            h.developer,
            TransitionContext::default()
                .with_comment("Starting work")
                .with_correlation_id(correlation_id),
        )
        .await;
    assert!(outcome.is_success());

    match h.recorder.events().last() {
        Some(WorkflowEvent::IssueTransitioned {
            from_status,
            to_status,
            actor,
            comment,
            correlation_id: recorded,
            ..
        }) => {
            assert_eq!(*from_status, h.flow.todo);
            assert_eq!(*to_status, h.flow.in_progress);
            assert_eq!(*actor, h.developer);
            assert_eq!(comment.as_deref(), Some("Starting work"));
            assert_eq!(*recorded, Some(correlation_id));
        }
        other => panic!("expected audit event, got {other:?}"),
    }
}

#[tokio::test]
async fn test_scheme_routes_issue_types() {
    let h = Harness::new().await;
    assert_eq!(
        h.engine
            .initial_status_for(h.project, h.issue_type)
            .unwrap()
            .id,
        h.flow.todo
    );

    let bug = IssueTypeId::new();
    let bug_flow = h
        .service
        .clone_workflow(h.admin, h.flow.workflow_id, "Bugs")
        .await
        .unwrap();
    h.service
        .set_workflow_for_issue_type(h.admin, h.project, bug, bug_flow)
        .await
        .unwrap();

    let bug_initial = h.engine.initial_status_for(h.project, bug).unwrap();
    assert_ne!(bug_initial.id, h.flow.todo);
    assert_eq!(bug_initial.name, "To Do");

    h.service
        .remove_workflow_for_issue_type(h.admin, h.project, bug)
        .await
        .unwrap();
    assert_eq!(
        h.engine.initial_status_for(h.project, bug).unwrap().id,
        h.flow.todo
    );

    let unknown = h.engine.initial_status_for(ProjectId::new(), bug);
    assert_eq!(
        unknown.unwrap_err().code(),
        error_codes::SCHEME_RESOLUTION_FAILED
    );
}

#[tokio::test]
async fn test_deactivated_workflow_keeps_moving_existing_issues() {
    let h = Harness::new().await;
    let bug = IssueTypeId::new();
    let bug_flow = h
        .service
        .clone_workflow(h.admin, h.flow.workflow_id, "Bugs")
        .await
        .unwrap();
    h.service
        .set_workflow_for_issue_type(h.admin, h.project, bug, bug_flow)
        .await
        .unwrap();

    let issue_id = h.create_issue_of(bug);
    let bug_start = h
        .service
        .get_workflow(bug_flow)
        .unwrap()
        .transitions()
        .iter()
        .find(|t| t.name == "Start")
        .map(|t| t.id)
        .unwrap();

    h.service
        .deactivate_workflow(h.admin, bug_flow)
        .await
        .unwrap();

    let available = h
        .engine
        .list_available_transitions(issue_id, h.developer)
        .await
        .unwrap();
    assert_eq!(available.len(), 1);
    assert_eq!(available[0].transition_id, bug_start);

    let outcome = h
        .engine
        .transition_issue(issue_id, bug_start, h.developer, TransitionContext::default())
        .await;
    assert!(outcome.is_success());

    // no new issues enter an inactive workflow
    assert_eq!(
        h.engine
            .initial_status_for(h.project, bug)
            .unwrap_err()
            .code(),
        error_codes::SCHEME_RESOLUTION_FAILED
    );
}

#[tokio::test]
async fn test_required_field_sees_issue_values() {
    let h = Harness::new().await;
    for field in ["assignee", "fix_version"] {
        h.service
            .attach_validator(
                h.admin,
                h.flow.start,
                ValidatorKind::RequiredField {
                    field: field.to_string(),
                },
            )
            .await
            .unwrap();
    }

    let issue_id = h.create_issue();
    let outcome = h
        .engine
        .transition_issue(issue_id, h.flow.start, h.developer, TransitionContext::default())
        .await;
    assert_eq!(
        codes(outcome.errors()),
        vec![error_codes::FIELD_REQUIRED, error_codes::FIELD_REQUIRED]
    );

    // built-in attributes count, and a blank submission does not hide a stored value
    h.store.assign(issue_id, Some(h.developer)).await.unwrap();
    h.store
        .apply_field_update(issue_id, "fix_version", json!("4.2"))
        .await
        .unwrap();
    let outcome = h
        .engine
        .transition_issue(
            issue_id,
            h.flow.start,
            h.developer,
            TransitionContext::default().with_field("fix_version", json!("")),
        )
        .await;
    assert_eq!(outcome.new_status(), Some(h.flow.in_progress));
}

#[tokio::test]
async fn test_self_loop_keeps_status_and_runs_post_functions() {
    let h = Harness::new().await;
    let log_work = h
        .service
        .add_transition(
            h.admin,
            h.flow.workflow_id,
            NewTransition::new("Log work", h.flow.in_progress, h.flow.in_progress),
        )
        .await
        .unwrap();
    h.service
        .attach_post_function(
            h.admin,
            log_work,
            PostFunctionKind::UpdateField {
                field: "time_spent".to_string(),
                value: FieldValue::FromContext("time_spent".to_string()),
            },
        )
        .await
        .unwrap();

    let issue_id = h.create_issue_in(h.flow.in_progress);
    let available = h
        .engine
        .list_available_transitions(issue_id, h.developer)
        .await
        .unwrap();
    assert!(available.iter().any(|t| t.transition_id == log_work));

    let executed = h
        .engine
        .execute_transition(
            issue_id,
            log_work,
            h.developer,
            &TransitionContext::default().with_field("time_spent", json!("2h")),
        )
        .await
        .unwrap();

    assert_eq!(executed.new_status, h.flow.in_progress);
    assert!(executed.post_function_failures.is_empty());
    let issue = h.issue(issue_id);
    assert_eq!(issue.current_status, h.flow.in_progress);
    assert_eq!(issue.fields.get("time_spent"), Some(&json!("2h")));

    match h.recorder.events().last() {
        Some(WorkflowEvent::IssueTransitioned {
            from_status,
            to_status,
            ..
        }) => assert_eq!(from_status, to_status),
        other => panic!("expected audit event, got {other:?}"),
    }
}
