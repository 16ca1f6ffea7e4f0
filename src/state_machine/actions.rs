//! Post-function execution.
//!
//! Post-functions run in declared order after the status change has been
//! written. Data-mutating entries write through the [`IssueStore`]; hand-off
//! entries only stage a [`WorkflowEvent`] which the engine dispatches once the
//! transition is final. Whether a failure reverts the transition is decided by
//! the configured [`PostFunctionFailurePolicy`].

use super::context::TransitionContext;
use super::errors::{
    missing_value, DispatchError, FailedPostFunction, PostFunctionError, PostFunctionResult,
};
use super::events::WorkflowEvent;
use super::persistence::IssueStore;
use crate::config::PostFunctionFailurePolicy;
use crate::events::OutboundDispatcher;
use crate::models::{
    is_blank, Actor, AssigneeTarget, FieldValue, IssueSnapshot, NotificationRecipient,
    PostFunctionKind, StatusId, Transition, UserId,
};
use crate::services::MembershipDirectory;
use async_trait::async_trait;
use chrono::Utc;
use serde_json::Value;
use std::time::Duration;
use tracing::{debug, warn};

/// Collaborators and request data available to every post-function
pub struct ActionScope<'a> {
    pub transition: &'a Transition,
    pub from_status: StatusId,
    pub actor: &'a Actor,
    pub context: &'a TransitionContext,
    pub store: &'a dyn IssueStore,
    pub directory: &'a dyn MembershipDirectory,
    pub external_call_timeout: Duration,
}

/// Hand-off message waiting for the transition to become final
#[derive(Debug, Clone, PartialEq)]
pub struct StagedHandOff {
    /// Position of the staging post-function in the pipeline
    pub index: usize,
    pub kind: &'static str,
    pub event: WorkflowEvent,
}

/// Trait for implementing post-transition actions
#[async_trait]
pub trait TransitionAction {
    /// Execute the action against the working view of the issue.
    /// Writes go to the store first, then to `issue`.
    async fn execute(
        &self,
        issue: &mut IssueSnapshot,
        scope: &ActionScope<'_>,
    ) -> PostFunctionResult<Option<WorkflowEvent>>;

    /// Get a description of this action for logging
    fn description(&self) -> &'static str;
}

#[async_trait]
impl TransitionAction for PostFunctionKind {
    async fn execute(
        &self,
        issue: &mut IssueSnapshot,
        scope: &ActionScope<'_>,
    ) -> PostFunctionResult<Option<WorkflowEvent>> {
        match self {
            PostFunctionKind::AssignToUser { target } => {
                let assignee = resolve_assignee(target, issue, scope).await?;
                scope.store.assign(issue.id, assignee).await?;
                issue.assignee = assignee;
                Ok(None)
            }
            PostFunctionKind::UpdateField { field, value } => {
                let value = resolve_field_value(value, issue, scope)?;
                scope
                    .store
                    .apply_field_update(issue.id, field, value.clone())
                    .await?;
                if field == "resolution" {
                    issue.resolution = value.as_str().map(str::to_string);
                } else {
                    issue.fields.insert(field.clone(), value);
                }
                Ok(None)
            }
            PostFunctionKind::SetResolution { resolution } => {
                let resolution = resolution
                    .clone()
                    .filter(|r| !r.trim().is_empty())
                    .or_else(|| scope.context.supplied_resolution().map(str::to_string))
                    .ok_or_else(|| missing_value("resolution"))?;
                scope
                    .store
                    .set_resolution(issue.id, Some(resolution.clone()))
                    .await?;
                issue.resolution = Some(resolution);
                Ok(None)
            }
            PostFunctionKind::EnqueueNotification {
                template,
                recipients,
            } => {
                if template.trim().is_empty() {
                    return Err(missing_value("notification template"));
                }
                let recipients = resolve_recipients(recipients, issue, scope.actor);
                if recipients.is_empty() {
                    return Err(PostFunctionError::Unresolvable {
                        what: "notification recipients".to_string(),
                        reason: "no recipient could be resolved".to_string(),
                    });
                }
                Ok(Some(WorkflowEvent::NotificationRequested {
                    issue_id: issue.id,
                    transition_id: scope.transition.id,
                    template: template.clone(),
                    recipients,
                    actor: scope.actor.user_id,
                }))
            }
            PostFunctionKind::EnqueueWebhookEvent { event } => {
                if event.trim().is_empty() {
                    return Err(missing_value("webhook event name"));
                }
                Ok(Some(WorkflowEvent::WebhookRequested {
                    issue_id: issue.id,
                    transition_id: scope.transition.id,
                    event: event.clone(),
                    from_status: scope.from_status,
                    to_status: scope.transition.to_status,
                    actor: scope.actor.user_id,
                }))
            }
        }
    }

    fn description(&self) -> &'static str {
        self.kind_name()
    }
}

async fn resolve_assignee(
    target: &AssigneeTarget,
    issue: &IssueSnapshot,
    scope: &ActionScope<'_>,
) -> PostFunctionResult<Option<UserId>> {
    match target {
        AssigneeTarget::User { user_id } => Ok(Some(*user_id)),
        AssigneeTarget::CurrentUser => Ok(Some(scope.actor.user_id)),
        AssigneeTarget::Reporter => issue
            .reporter
            .map(Some)
            .ok_or_else(|| missing_value("reporter")),
        AssigneeTarget::ProjectLead => {
            let lookup = tokio::time::timeout(
                scope.external_call_timeout,
                scope.directory.project_lead(issue.project_id),
            )
            .await;
            match lookup {
                Ok(Ok(Some(lead))) => Ok(Some(lead)),
                Ok(Ok(None)) => Err(missing_value("project lead")),
                Ok(Err(err)) => Err(PostFunctionError::Unresolvable {
                    what: "project lead".to_string(),
                    reason: err.to_string(),
                }),
                Err(_) => Err(PostFunctionError::Unresolvable {
                    what: "project lead".to_string(),
                    reason: format!(
                        "directory lookup timed out after {}ms",
                        scope.external_call_timeout.as_millis()
                    ),
                }),
            }
        }
        AssigneeTarget::Unassigned => Ok(None),
    }
}

fn resolve_field_value(
    value: &FieldValue,
    issue: &IssueSnapshot,
    scope: &ActionScope<'_>,
) -> PostFunctionResult<Value> {
    match value {
        FieldValue::Literal(value) => Ok(value.clone()),
        FieldValue::CurrentUser => Ok(Value::String(scope.actor.user_id.to_string())),
        FieldValue::Now => Ok(Value::String(Utc::now().to_rfc3339())),
        FieldValue::CopyFrom(source) => issue
            .field_value(source)
            .or_else(|| issue.custom_field(source).cloned())
            .filter(|v| !is_blank(v))
            .ok_or_else(|| missing_value(format!("field '{source}'"))),
        FieldValue::FromContext(key) => scope
            .context
            .value(key)
            .filter(|v| !is_blank(v))
            .ok_or_else(|| missing_value(format!("context value '{key}'"))),
    }
}

/// Resolve recipients against the working issue, dropping unset roles and
/// duplicates while keeping declared order
fn resolve_recipients(
    recipients: &[NotificationRecipient],
    issue: &IssueSnapshot,
    actor: &Actor,
) -> Vec<UserId> {
    let mut resolved: Vec<UserId> = Vec::with_capacity(recipients.len());
    for recipient in recipients {
        let user = match recipient {
            NotificationRecipient::Assignee => issue.assignee,
            NotificationRecipient::Reporter => issue.reporter,
            NotificationRecipient::Actor => Some(actor.user_id),
            NotificationRecipient::User(user_id) => Some(*user_id),
        };
        if let Some(user) = user {
            if !resolved.contains(&user) {
                resolved.push(user);
            }
        }
    }
    resolved
}

/// Result of running a post-function pipeline
#[derive(Debug, Clone, PartialEq)]
pub struct PipelineOutcome {
    /// Issue as left by the pipeline
    pub issue: IssueSnapshot,
    pub failures: Vec<FailedPostFunction>,
    /// A failure the policy treats as fatal occurred; the caller must restore
    /// the pre-transition snapshot
    pub rollback_required: bool,
    pub staged: Vec<StagedHandOff>,
}

/// Run post-functions in declared order under `policy`.
///
/// Stops at the first failure that requires rollback. Otherwise failures are
/// recorded and the remaining entries still run.
pub async fn run_post_functions(
    issue: IssueSnapshot,
    scope: &ActionScope<'_>,
    policy: PostFunctionFailurePolicy,
) -> PipelineOutcome {
    let mut outcome = PipelineOutcome {
        issue,
        failures: Vec::new(),
        rollback_required: false,
        staged: Vec::new(),
    };

    for (index, post_function) in scope.transition.post_functions.iter().enumerate() {
        match post_function.execute(&mut outcome.issue, scope).await {
            Ok(staged) => {
                debug!(
                    issue_id = %outcome.issue.id,
                    index,
                    post_function = post_function.description(),
                    "Post-function completed"
                );
                if let Some(event) = staged {
                    outcome.staged.push(StagedHandOff {
                        index,
                        kind: post_function.kind_name(),
                        event,
                    });
                }
            }
            Err(err) => {
                let rolls_back = policy.rolls_back(post_function);
                warn!(
                    issue_id = %outcome.issue.id,
                    index,
                    post_function = post_function.description(),
                    error = %err,
                    policy = %policy,
                    rolls_back,
                    "Post-function failed"
                );
                outcome.failures.push(FailedPostFunction {
                    index,
                    kind: post_function.kind_name().to_string(),
                    message: err.to_string(),
                });
                if rolls_back {
                    outcome.rollback_required = true;
                    break;
                }
            }
        }
    }

    outcome
}

/// Dispatch staged hand-offs after the transition is final.
///
/// The status change is already committed at this point, so dispatch failures
/// are reported and never undo it.
pub async fn dispatch_staged(
    dispatcher: &dyn OutboundDispatcher,
    staged: &[StagedHandOff],
    timeout: Duration,
) -> Vec<FailedPostFunction> {
    let mut failures = Vec::new();
    for hand_off in staged {
        let result = match tokio::time::timeout(timeout, dispatcher.dispatch(&hand_off.event)).await
        {
            Ok(result) => result,
            Err(_) => Err(DispatchError::Timeout {
                timeout_ms: timeout.as_millis() as u64,
            }),
        };

        if let Err(err) = result {
            warn!(
                issue_id = %hand_off.event.issue_id(),
                index = hand_off.index,
                event = hand_off.event.event_type(),
                error = %err,
                "Hand-off dispatch failed"
            );
            failures.push(FailedPostFunction {
                index: hand_off.index,
                kind: hand_off.kind.to_string(),
                message: PostFunctionError::from(err).to_string(),
            });
        }
    }
    failures
}
