//! # Workflow Engine
//!
//! Data-driven state machine over issues. An issue's state is its
//! `current_status` inside the workflow its project scheme resolves to; the
//! edges out of that status are the transitions an actor may take, filtered
//! by their conditions.
//!
//! Execution order for one transition:
//!
//! 1. Acquire the per-issue lock (bounded wait, `IssueBusy` on timeout)
//! 2. Re-read the issue and take one workflow snapshot for the whole call
//! 3. Validate: edge check, conditions, membership, every validator
//! 4. Compare-and-set the status to the target
//! 5. Run post-functions in declared order under the failure policy
//! 6. Restore the pre-transition snapshot, or dispatch staged hand-offs and
//!    the `issue.transitioned` audit event

use super::actions::{dispatch_staged, run_post_functions, ActionScope};
use super::context::TransitionContext;
use super::errors::{FailedPostFunction, PostFunctionFailure, ValidationResult};
use super::events::WorkflowEvent;
use super::guards::{conditions_pass, run_validators, GuardScope, ValidationScope};
use super::persistence::IssueStore;
use crate::config::EngineConfig;
use crate::constants::error_codes;
use crate::error::{ErrorDetail, Result, WorkflowError};
use crate::events::OutboundDispatcher;
use crate::logging::{log_error, log_transition_operation};
use crate::models::{
    Actor, IssueId, IssueSnapshot, IssueTypeId, ProjectId, SchemeResolutionError, Status,
    StatusId, Transition, TransitionId, UserId, Workflow, WorkflowId,
};
use crate::registry::{RuleRegistry, WorkflowRegistry};
use crate::services::directory::{DirectoryError, MembershipDirectory};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{debug, info, instrument, warn};

/// Entry returned by `list_available_transitions`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AvailableTransition {
    pub transition_id: TransitionId,
    pub name: String,
    pub to_status: StatusId,
}

impl From<&Transition> for AvailableTransition {
    fn from(transition: &Transition) -> Self {
        Self {
            transition_id: transition.id,
            name: transition.name.clone(),
            to_status: transition.to_status,
        }
    }
}

/// A committed transition
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionResult {
    pub issue_id: IssueId,
    pub transition_id: TransitionId,
    pub workflow_id: WorkflowId,
    /// Workflow version the transition executed against
    pub workflow_version: u64,
    pub from_status: StatusId,
    pub new_status: StatusId,
    /// Failures the policy let through without reverting the transition
    pub post_function_failures: Vec<FailedPostFunction>,
}

/// Boundary result of `transition_issue`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum TransitionOutcome {
    Success {
        new_status: StatusId,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        post_function_failures: Vec<FailedPostFunction>,
    },
    Failed {
        errors: Vec<ErrorDetail>,
        /// Retrying with fresh issue state may succeed
        retryable: bool,
    },
}

impl TransitionOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success { .. })
    }

    pub fn new_status(&self) -> Option<StatusId> {
        match self {
            Self::Success { new_status, .. } => Some(*new_status),
            Self::Failed { .. } => None,
        }
    }

    pub fn errors(&self) -> &[ErrorDetail] {
        match self {
            Self::Success { .. } => &[],
            Self::Failed { errors, .. } => errors,
        }
    }
}

impl From<Result<ExecutionResult>> for TransitionOutcome {
    fn from(result: Result<ExecutionResult>) -> Self {
        match result {
            Ok(executed) => Self::Success {
                new_status: executed.new_status,
                post_function_failures: executed.post_function_failures,
            },
            Err(err) => Self::Failed {
                errors: err.details(),
                retryable: err.is_retryable(),
            },
        }
    }
}

pub struct WorkflowEngine {
    registry: Arc<WorkflowRegistry>,
    rules: Arc<RuleRegistry>,
    store: Arc<dyn IssueStore>,
    directory: Arc<dyn MembershipDirectory>,
    dispatcher: Arc<dyn OutboundDispatcher>,
    config: EngineConfig,
    issue_locks: DashMap<IssueId, Arc<Mutex<()>>>,
}

impl std::fmt::Debug for WorkflowEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkflowEngine")
            .field("config", &self.config)
            .field("rules", &self.rules)
            .field("locked_issues", &self.issue_locks.len())
            .finish()
    }
}

impl WorkflowEngine {
    pub fn new(
        registry: Arc<WorkflowRegistry>,
        store: Arc<dyn IssueStore>,
        directory: Arc<dyn MembershipDirectory>,
        dispatcher: Arc<dyn OutboundDispatcher>,
        config: EngineConfig,
    ) -> Self {
        Self {
            registry,
            rules: Arc::new(RuleRegistry::new()),
            store,
            directory,
            dispatcher,
            config,
            issue_locks: DashMap::new(),
        }
    }

    /// Use a shared rule registry for custom predicates and external checks
    #[must_use]
    pub fn with_rule_registry(mut self, rules: Arc<RuleRegistry>) -> Self {
        self.rules = rules;
        self
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn rules(&self) -> &RuleRegistry {
        &self.rules
    }

    /// Issues with an execution in flight or waiting for one
    pub fn in_flight_issues(&self) -> usize {
        self.issue_locks.len()
    }

    pub fn registry(&self) -> &WorkflowRegistry {
        &self.registry
    }

    // ---------------------------------------------------------------------
    // Core operations over a resolved workflow snapshot
    // ---------------------------------------------------------------------

    /// Active outgoing transitions of the issue's current status whose
    /// conditions all pass for `actor`. Evaluated fresh on every call.
    pub fn available_transitions<'w>(
        &self,
        workflow: &'w Workflow,
        issue: &IssueSnapshot,
        actor: &Actor,
    ) -> Vec<&'w Transition> {
        let scope = GuardScope {
            issue,
            actor,
            rules: &self.rules,
        };
        workflow
            .outgoing_transitions(issue.current_status)
            .into_iter()
            .filter(|t| conditions_pass(&t.conditions, &scope))
            .collect()
    }

    /// Check whether `actor` may take `transition_id` right now.
    ///
    /// Fails with `InvalidTransition` when the transition is not an active
    /// edge out of the issue's current status. Otherwise returns the full
    /// list of reasons the attempt would be rejected; failed conditions or
    /// missing membership short-circuit the validators.
    pub async fn validate_transition(
        &self,
        workflow: &Workflow,
        issue: &IssueSnapshot,
        transition_id: TransitionId,
        actor: &Actor,
        context: &TransitionContext,
    ) -> Result<ValidationResult> {
        let transition = outgoing_edge(workflow, issue, transition_id)?;
        let target_status = workflow.status(transition.to_status).ok_or(
            crate::models::GraphIntegrityError::ForeignStatus {
                workflow_id: workflow.id,
                status_id: transition.to_status,
            },
        )?;

        let mut result = ValidationResult::valid();

        let guard_scope = GuardScope {
            issue,
            actor,
            rules: &self.rules,
        };
        if !conditions_pass(&transition.conditions, &guard_scope) {
            result.push(
                error_codes::CONDITIONS_NOT_MET,
                format!(
                    "Transition '{}' is not available to this user",
                    transition.name
                ),
            );
            return Ok(result);
        }

        if self.config.require_project_membership && !actor.is_project_member {
            result.push(
                error_codes::NOT_PROJECT_MEMBER,
                "Only project members can transition issues",
            );
            return Ok(result);
        }

        let validation_scope = ValidationScope {
            issue,
            actor,
            context,
            target_status,
            rules: &self.rules,
            external_call_timeout: self.config.external_call_timeout(),
        };
        Ok(run_validators(&transition.validators, &validation_scope).await)
    }

    /// Validate and apply a transition, then run its post-functions.
    ///
    /// At most one execution per issue is in flight; a second caller waits up
    /// to `lock_timeout_ms` and then gets `IssueBusy`.
    #[instrument(skip_all, fields(issue_id = %issue_id, transition_id = %transition_id))]
    pub async fn execute_transition(
        &self,
        issue_id: IssueId,
        transition_id: TransitionId,
        actor_id: UserId,
        context: &TransitionContext,
    ) -> Result<ExecutionResult> {
        let _lock = self.acquire_issue_lock(issue_id).await?;
        self.execute_locked(issue_id, transition_id, actor_id, context)
            .await
    }

    async fn execute_locked(
        &self,
        issue_id: IssueId,
        transition_id: TransitionId,
        actor_id: UserId,
        context: &TransitionContext,
    ) -> Result<ExecutionResult> {
        // Fresh read under the lock; never trust a status read before it
        let issue = self.store.get_issue(issue_id).await?;
        let workflow = self.registry.resolve(issue.project_id, issue.issue_type)?;
        let actor = self.load_actor(issue.project_id, actor_id).await?;

        let validation = self
            .validate_transition(&workflow, &issue, transition_id, &actor, context)
            .await?;
        validation.into_result()?;

        let transition = outgoing_edge(&workflow, &issue, transition_id)?;
        let from_status = issue.current_status;
        let to_status = transition.to_status;

        self.store
            .set_current_status(issue_id, from_status, to_status)
            .await?;
        debug!(
            issue_id = %issue_id,
            from_status = %from_status,
            to_status = %to_status,
            workflow_version = workflow.version,
            "Status written"
        );

        let before = issue.clone();
        let mut working = issue;
        working.current_status = to_status;

        let scope = ActionScope {
            transition,
            from_status,
            actor: &actor,
            context,
            store: self.store.as_ref(),
            directory: self.directory.as_ref(),
            external_call_timeout: self.config.external_call_timeout(),
        };
        let policy = self.config.post_function_failure_policy;
        let outcome = run_post_functions(working, &scope, policy).await;

        if outcome.rollback_required {
            return Err(self.roll_back(&before, to_status, outcome.failures).await);
        }

        let mut failures = outcome.failures;
        failures.extend(
            dispatch_staged(
                self.dispatcher.as_ref(),
                &outcome.staged,
                self.config.external_call_timeout(),
            )
            .await,
        );

        self.publish_audit_event(issue_id, &workflow, transition, from_status, &actor, context)
            .await;

        if failures.is_empty() {
            info!(
                issue_id = %issue_id,
                transition = %transition.name,
                to_status = %to_status,
                "Transition executed"
            );
        } else {
            warn!(
                issue_id = %issue_id,
                transition = %transition.name,
                failures = failures.len(),
                policy = %policy,
                "Transition committed with post-function failures"
            );
        }

        Ok(ExecutionResult {
            issue_id,
            transition_id,
            workflow_id: workflow.id,
            workflow_version: workflow.version,
            from_status,
            new_status: to_status,
            post_function_failures: failures,
        })
    }

    /// Restore the pre-transition snapshot and build the error for the caller
    async fn roll_back(
        &self,
        before: &IssueSnapshot,
        to_status: StatusId,
        failures: Vec<FailedPostFunction>,
    ) -> WorkflowError {
        match self.store.restore(before).await {
            Ok(()) => {
                warn!(
                    issue_id = %before.id,
                    restored_status = %before.current_status,
                    "Transition rolled back after post-function failure"
                );
                PostFunctionFailure {
                    issue_id: before.id,
                    failures,
                    rolled_back: true,
                    status: before.current_status,
                }
                .into()
            }
            Err(err) => {
                log_error(
                    "workflow_engine",
                    "roll_back",
                    &err.to_string(),
                    Some(&format!("issue_id={}", before.id)),
                );
                PostFunctionFailure {
                    issue_id: before.id,
                    failures,
                    rolled_back: false,
                    status: to_status,
                }
                .into()
            }
        }
    }

    /// Hand the audit record of a committed transition to the dispatcher.
    /// The status change is final; a dispatch failure is only logged.
    async fn publish_audit_event(
        &self,
        issue_id: IssueId,
        workflow: &Workflow,
        transition: &Transition,
        from_status: StatusId,
        actor: &Actor,
        context: &TransitionContext,
    ) {
        let event = WorkflowEvent::IssueTransitioned {
            issue_id,
            workflow_id: workflow.id,
            workflow_version: workflow.version,
            transition_id: transition.id,
            from_status,
            to_status: transition.to_status,
            actor: actor.user_id,
            comment: context.comment.clone().filter(|_| context.has_comment()),
            correlation_id: context.correlation_id,
        };

        let dispatched = tokio::time::timeout(
            self.config.external_call_timeout(),
            self.dispatcher.dispatch(&event),
        )
        .await;
        match dispatched {
            Ok(Ok(())) => {}
            Ok(Err(err)) => warn!(issue_id = %issue_id, error = %err, "Audit event dispatch failed"),
            Err(_) => warn!(issue_id = %issue_id, "Audit event dispatch timed out"),
        }
    }

    // ---------------------------------------------------------------------
    // Boundary calls
    // ---------------------------------------------------------------------

    /// Transitions the actor can take on the issue right now
    #[instrument(skip_all, fields(issue_id = %issue_id))]
    pub async fn list_available_transitions(
        &self,
        issue_id: IssueId,
        actor_id: UserId,
    ) -> Result<Vec<AvailableTransition>> {
        let issue = self.store.get_issue(issue_id).await?;
        let workflow = self.registry.resolve(issue.project_id, issue.issue_type)?;
        let actor = self.load_actor(issue.project_id, actor_id).await?;

        Ok(self
            .available_transitions(&workflow, &issue, &actor)
            .into_iter()
            .map(AvailableTransition::from)
            .collect())
    }

    /// Execute a transition and report the outcome as data.
    /// Every failure is folded into `{code, message}` entries.
    pub async fn transition_issue(
        &self,
        issue_id: IssueId,
        transition_id: TransitionId,
        actor_id: UserId,
        context: TransitionContext,
    ) -> TransitionOutcome {
        let result = self
            .execute_transition(issue_id, transition_id, actor_id, &context)
            .await;

        match &result {
            Ok(executed) => log_transition_operation(
                "transition_issue",
                &issue_id.to_string(),
                Some(&transition_id.to_string()),
                Some(executed.workflow_version),
                "committed",
                None,
            ),
            Err(err) => log_transition_operation(
                "transition_issue",
                &issue_id.to_string(),
                Some(&transition_id.to_string()),
                None,
                err.code(),
                Some(&err.to_string()),
            ),
        }

        TransitionOutcome::from(result)
    }

    /// Entry status for a new issue of `issue_type` in `project_id`.
    /// An inactive workflow accepts no new issues.
    pub fn initial_status_for(
        &self,
        project_id: ProjectId,
        issue_type: IssueTypeId,
    ) -> Result<Status> {
        let workflow = self.registry.resolve(project_id, issue_type)?;
        if !workflow.is_active {
            return Err(SchemeResolutionError::WorkflowUnavailable {
                workflow_id: workflow.id,
                issue_type,
            }
            .into());
        }
        Ok(workflow.initial_status()?.clone())
    }

    // ---------------------------------------------------------------------
    // Helpers
    // ---------------------------------------------------------------------

    /// Load the membership facts conditions need, once per call
    async fn load_actor(&self, project_id: ProjectId, user_id: UserId) -> Result<Actor> {
        let project_role = self
            .directory_call(self.directory.project_role(project_id, user_id))
            .await?;
        let is_member = self
            .directory_call(self.directory.is_project_member(project_id, user_id))
            .await?;

        Ok(Actor {
            user_id,
            is_project_member: is_member || project_role.is_some(),
            project_role,
        })
    }

    async fn directory_call<T>(
        &self,
        call: impl Future<Output = std::result::Result<T, DirectoryError>>,
    ) -> Result<T> {
        let timeout = self.config.external_call_timeout();
        match tokio::time::timeout(timeout, call).await {
            Ok(result) => Ok(result?),
            Err(_) => Err(DirectoryError::Timeout {
                timeout_ms: self.config.external_call_timeout_ms,
            }
            .into()),
        }
    }

    async fn acquire_issue_lock(&self, issue_id: IssueId) -> Result<IssueLock<'_>> {
        let mutex = self
            .issue_locks
            .entry(issue_id)
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        let mut lock = IssueLock {
            locks: &self.issue_locks,
            issue_id,
            mutex: Some(Arc::clone(&mutex)),
            guard: None,
        };

        match tokio::time::timeout(self.config.lock_timeout(), mutex.lock_owned()).await {
            Ok(guard) => {
                lock.guard = Some(guard);
                Ok(lock)
            }
            Err(_) => {
                warn!(
                    issue_id = %issue_id,
                    lock_timeout_ms = self.config.lock_timeout_ms,
                    "Timed out waiting for in-flight transition"
                );
                Err(WorkflowError::IssueBusy { issue_id })
            }
        }
    }
}

/// A caller's claim on one issue's lock, from the first wait to the end of
/// its execution.
///
/// Dropping it, on completion, timeout or when the caller's future is
/// cancelled, unlocks the issue and removes the map entry once nobody else
/// holds or waits on it.
struct IssueLock<'e> {
    locks: &'e DashMap<IssueId, Arc<Mutex<()>>>,
    issue_id: IssueId,
    mutex: Option<Arc<Mutex<()>>>,
    guard: Option<OwnedMutexGuard<()>>,
}

impl Drop for IssueLock<'_> {
    fn drop(&mut self) {
        // both the guard and our handle count as references to the mutex
        drop(self.guard.take());
        drop(self.mutex.take());
        self.locks
            .remove_if(&self.issue_id, |_, lock| Arc::strong_count(lock) == 1);
    }
}

/// The active edge `transition_id` out of the issue's current status
fn outgoing_edge<'w>(
    workflow: &'w Workflow,
    issue: &IssueSnapshot,
    transition_id: TransitionId,
) -> Result<&'w Transition> {
    workflow
        .transition(transition_id)
        .filter(|t| t.is_active && t.from_status == issue.current_status)
        .ok_or(WorkflowError::InvalidTransition {
            transition_id,
            current_status: issue.current_status,
        })
}
