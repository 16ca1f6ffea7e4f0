//! Conditions and validators.
//!
//! Conditions are pure visibility gates over `(issue, actor)`: they are
//! evaluated in declared order and stop at the first failure. Validators run
//! only when a transition is attempted and accumulate every failure so the
//! caller gets the complete list back. Neither stage mutates anything.

use super::context::TransitionContext;
use super::errors::{ExternalCheckError, ValidationResult};
use crate::constants::error_codes;
use crate::models::{is_blank, Actor, ConditionKind, IssueSnapshot, Status, ValidatorKind};
use crate::registry::RuleRegistry;
use async_trait::async_trait;
use std::time::Duration;
use tracing::{debug, warn};

/// Named predicate referenced by `ConditionKind::CustomPredicate`
pub trait CustomPredicate: Send + Sync {
    fn evaluate(&self, issue: &IssueSnapshot, actor: &Actor) -> bool;

    /// Get a description of this predicate for logging
    fn description(&self) -> &'static str {
        "custom predicate"
    }
}

/// Check delegated to an external service, referenced by
/// `ValidatorKind::ExternalCheck`. `Err` carries the reason shown to the actor.
#[async_trait]
pub trait ExternalCheck: Send + Sync {
    async fn check(
        &self,
        issue: &IssueSnapshot,
        actor: &Actor,
        context: &TransitionContext,
    ) -> Result<(), String>;

    fn description(&self) -> &'static str {
        "external check"
    }
}

/// Everything a condition may look at
#[derive(Clone, Copy)]
pub struct GuardScope<'a> {
    pub issue: &'a IssueSnapshot,
    pub actor: &'a Actor,
    pub rules: &'a RuleRegistry,
}

/// Trait for implementing transition guards
pub trait TransitionGuard {
    /// Check if the guarded transition is visible to the actor
    fn check(&self, scope: &GuardScope<'_>) -> bool;

    /// Get a description of this guard for logging
    fn description(&self) -> &'static str;
}

impl TransitionGuard for ConditionKind {
    fn check(&self, scope: &GuardScope<'_>) -> bool {
        let GuardScope {
            issue,
            actor,
            rules,
        } = *scope;

        match self {
            ConditionKind::ActorHasRoleInProject { role } => actor.has_role(role),
            ConditionKind::ActorIsAssignee {} => issue.assignee == Some(actor.user_id),
            ConditionKind::ActorIsReporter {} => issue.reporter == Some(actor.user_id),
            ConditionKind::FieldEquals { field, value } => {
                issue.field_value(field).as_ref() == Some(value)
            }
            ConditionKind::FieldNotEmpty { field } => issue
                .field_value(field)
                .or_else(|| issue.custom_field(field).cloned())
                .map(|v| !is_blank(&v))
                .unwrap_or(false),
            ConditionKind::IssueTypeIn { issue_types } => issue_types.contains(&issue.issue_type),
            ConditionKind::CustomPredicate { name } => match rules.predicate(name) {
                Some(predicate) => predicate.evaluate(issue, actor),
                None => {
                    warn!(predicate = %name, "Custom predicate not registered; condition fails");
                    false
                }
            },
        }
    }

    fn description(&self) -> &'static str {
        self.kind_name()
    }
}

/// Evaluate conditions in declared order, stopping at the first failure
pub fn conditions_pass(conditions: &[ConditionKind], scope: &GuardScope<'_>) -> bool {
    conditions.iter().all(|condition| {
        let passed = condition.check(scope);
        if !passed {
            debug!(
                issue_id = %scope.issue.id,
                condition = condition.description(),
                "Condition failed"
            );
        }
        passed
    })
}

/// Everything a validator may look at
#[derive(Clone, Copy)]
pub struct ValidationScope<'a> {
    pub issue: &'a IssueSnapshot,
    pub actor: &'a Actor,
    pub context: &'a TransitionContext,
    pub target_status: &'a Status,
    pub rules: &'a RuleRegistry,
    pub external_call_timeout: Duration,
}

impl ValidationScope<'_> {
    fn has_resolution(&self) -> bool {
        self.context.supplied_resolution().is_some() || self.issue.has_resolution()
    }

    /// A field counts as present if the actor supplied a value or the issue
    /// holds one, built-in attributes included
    fn field_present(&self, field: &str) -> bool {
        self.supplied(field)
            || self
                .issue
                .field_value(field)
                .is_some_and(|v| !is_blank(&v))
    }

    fn custom_field_present(&self, field: &str) -> bool {
        self.supplied(field) || self.issue.custom_field(field).is_some_and(|v| !is_blank(v))
    }

    fn supplied(&self, field: &str) -> bool {
        self.context.fields.get(field).is_some_and(|v| !is_blank(v))
    }
}

/// Run every validator in declared order and collect all failures
pub async fn run_validators(
    validators: &[ValidatorKind],
    scope: &ValidationScope<'_>,
) -> ValidationResult {
    let mut result = ValidationResult::valid();

    for validator in validators {
        match validator {
            ValidatorKind::RequiredField { field } => {
                if !scope.field_present(field) {
                    result.push(
                        error_codes::FIELD_REQUIRED,
                        format!("Field '{field}' is required"),
                    );
                }
            }
            ValidatorKind::ResolutionRequiredIfDone {} => {
                if scope.target_status.category.is_done() && !scope.has_resolution() {
                    result.push(
                        error_codes::RESOLUTION_REQUIRED,
                        format!(
                            "Resolution is required to move to '{}'",
                            scope.target_status.name
                        ),
                    );
                }
            }
            ValidatorKind::ResolutionRequired {} => {
                if !scope.has_resolution() {
                    result.push(error_codes::RESOLUTION_REQUIRED, "Resolution is required");
                }
            }
            ValidatorKind::CommentRequired {} => {
                if !scope.context.has_comment() {
                    result.push(error_codes::COMMENT_REQUIRED, "Comment is required");
                }
            }
            ValidatorKind::CustomFieldRequired { field } => {
                if !scope.custom_field_present(field) {
                    result.push(
                        error_codes::CUSTOM_FIELD_REQUIRED,
                        format!("Custom field '{field}' is required"),
                    );
                }
            }
            ValidatorKind::ExternalCheck { name } => {
                if let Err(err) = run_external_check(name, scope).await {
                    warn!(
                        issue_id = %scope.issue.id,
                        check = %name,
                        error = %err,
                        "External check did not pass"
                    );
                    result.push(err.code(), err.to_string());
                }
            }
        }
    }

    result
}

/// Run one registered external check under the configured timeout
async fn run_external_check(
    name: &str,
    scope: &ValidationScope<'_>,
) -> Result<(), ExternalCheckError> {
    let check = scope
        .rules
        .external_check(name)
        .ok_or_else(|| ExternalCheckError::NotRegistered {
            name: name.to_string(),
        })?;

    let outcome = tokio::time::timeout(
        scope.external_call_timeout,
        check.check(scope.issue, scope.actor, scope.context),
    )
    .await;

    match outcome {
        Ok(Ok(())) => Ok(()),
        Ok(Err(reason)) => Err(ExternalCheckError::Failed {
            name: name.to_string(),
            reason,
        }),
        Err(_) => Err(ExternalCheckError::Timeout {
            name: name.to_string(),
            timeout_ms: scope.external_call_timeout.as_millis() as u64,
        }),
    }
}
