use serde_json::json;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, instrument, warn};

use crate::config::EngineConfig;
use crate::constants::{events, system};
use crate::error::{Result, WorkflowError};
use crate::events::EventPublisher;
use crate::logging::log_configuration_operation;
use crate::models::{
    ConditionKind, GraphIntegrityError, IssueTypeId, NewStatus, NewTransition, OrganizationId,
    PipelineStage, PostFunctionKind, ProjectId, Status, StatusId, StatusUpdate, Transition,
    TransitionId, TransitionUpdate, UserId, ValidatorKind, Workflow, WorkflowId, WorkflowScheme,
    WorkflowUpdate,
};
use crate::registry::WorkflowRegistry;
use crate::services::directory::{DirectoryError, MembershipDirectory};
use crate::state_machine::errors::StoreError;
use crate::state_machine::persistence::IssueStore;

/// Administrative operations that build and modify workflow graphs.
///
/// Every write goes through [`WorkflowRegistry::update`], so each call
/// publishes a complete, validated workflow version or nothing at all. Calls
/// that change configuration are restricted to organization owners and
/// admins. Transitions already executing keep the snapshot they started with.
pub struct TransitionConfigurationService {
    registry: Arc<WorkflowRegistry>,
    store: Arc<dyn IssueStore>,
    directory: Arc<dyn MembershipDirectory>,
    publisher: EventPublisher,
    call_timeout: Duration,
}

impl std::fmt::Debug for TransitionConfigurationService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransitionConfigurationService")
            .field("call_timeout", &self.call_timeout)
            .field("subscribers", &self.publisher.subscriber_count())
            .finish()
    }
}

impl TransitionConfigurationService {
    pub fn new(
        registry: Arc<WorkflowRegistry>,
        store: Arc<dyn IssueStore>,
        directory: Arc<dyn MembershipDirectory>,
    ) -> Self {
        Self {
            registry,
            store,
            directory,
            publisher: EventPublisher::default(),
            call_timeout: Duration::from_millis(system::DEFAULT_EXTERNAL_CALL_TIMEOUT_MS),
        }
    }

    /// Size the publisher and bound lookups from engine settings
    #[must_use]
    pub fn with_config(mut self, config: &EngineConfig) -> Self {
        self.publisher = EventPublisher::from_config(config);
        self.call_timeout = config.external_call_timeout();
        self
    }

    /// Publish `workflow.published` events on a shared publisher
    #[must_use]
    pub fn with_publisher(mut self, publisher: EventPublisher) -> Self {
        self.publisher = publisher;
        self
    }

    /// Bound for directory and store lookups
    #[must_use]
    pub fn with_call_timeout(mut self, timeout: Duration) -> Self {
        self.call_timeout = timeout;
        self
    }

    pub fn publisher(&self) -> &EventPublisher {
        &self.publisher
    }

    // ---------------------------------------------------------------------
    // Workflows
    // ---------------------------------------------------------------------

    pub fn get_workflow(&self, workflow_id: WorkflowId) -> Result<Arc<Workflow>> {
        self.registry.require(workflow_id)
    }

    pub fn list_workflows(&self, organization_id: OrganizationId) -> Vec<Arc<Workflow>> {
        self.registry.list(organization_id)
    }

    #[instrument(skip_all, fields(organization_id = %organization_id))]
    pub async fn create_workflow(
        &self,
        actor_id: UserId,
        organization_id: OrganizationId,
        name: impl Into<String>,
        description: impl Into<String>,
        initial: NewStatus,
    ) -> Result<Arc<Workflow>> {
        self.authorize(organization_id, actor_id).await?;

        let workflow = Workflow::new(organization_id, name, description, initial);
        let result = self.registry.insert(workflow);
        self.record("create_workflow", actor_id, None, result.as_ref().ok(), &result);
        result
    }

    /// Change name, description or the default flag. Marking a workflow as
    /// default clears the flag on every other workflow of the organization.
    #[instrument(skip_all, fields(workflow_id = %workflow_id))]
    pub async fn update_workflow(
        &self,
        actor_id: UserId,
        workflow_id: WorkflowId,
        update: WorkflowUpdate,
    ) -> Result<Arc<Workflow>> {
        let becomes_default = update.is_default == Some(true);
        let snapshot = self
            .mutate_workflow("update_workflow", actor_id, workflow_id, move |w| {
                w.update_metadata(update);
                Ok(())
            })
            .await?
            .0;

        if becomes_default {
            for other in self.registry.list(snapshot.organization_id) {
                if other.id != workflow_id && other.is_default {
                    self.registry.update(other.id, |w| {
                        w.is_default = false;
                        Ok(())
                    })?;
                    debug!(workflow_id = %other.id, "Cleared default flag");
                }
            }
        }

        Ok(snapshot)
    }

    /// Inactive workflows are skipped by scheme resolution
    pub async fn deactivate_workflow(
        &self,
        actor_id: UserId,
        workflow_id: WorkflowId,
    ) -> Result<Arc<Workflow>> {
        self.set_workflow_active("deactivate_workflow", actor_id, workflow_id, false)
            .await
    }

    pub async fn activate_workflow(
        &self,
        actor_id: UserId,
        workflow_id: WorkflowId,
    ) -> Result<Arc<Workflow>> {
        self.set_workflow_active("activate_workflow", actor_id, workflow_id, true)
            .await
    }

    async fn set_workflow_active(
        &self,
        operation: &str,
        actor_id: UserId,
        workflow_id: WorkflowId,
        is_active: bool,
    ) -> Result<Arc<Workflow>> {
        Ok(self
            .mutate_workflow(operation, actor_id, workflow_id, move |w| {
                w.is_active = is_active;
                Ok(())
            })
            .await?
            .0)
    }

    /// Delete a workflow no active scheme points at
    #[instrument(skip_all, fields(workflow_id = %workflow_id))]
    pub async fn delete_workflow(&self, actor_id: UserId, workflow_id: WorkflowId) -> Result<()> {
        let workflow = self.registry.require(workflow_id)?;
        self.authorize(workflow.organization_id, actor_id).await?;

        let referencing = self.registry.active_schemes_referencing(workflow_id);
        let result = if referencing.is_empty() {
            self.registry.remove(workflow_id);
            Ok(())
        } else {
            Err(GraphIntegrityError::WorkflowInUse {
                workflow_id,
                scheme_count: referencing.len(),
            }
            .into())
        };

        self.record("delete_workflow", actor_id, Some(workflow_id), None, &result);
        result
    }

    /// Deep copy under a new name; the copy shares no identifiers with the source
    #[instrument(skip_all, fields(workflow_id = %workflow_id))]
    pub async fn clone_workflow(
        &self,
        actor_id: UserId,
        workflow_id: WorkflowId,
        new_name: impl Into<String>,
    ) -> Result<WorkflowId> {
        let source = self.registry.require(workflow_id)?;
        self.authorize(source.organization_id, actor_id).await?;

        let result = self.registry.insert(source.deep_clone(new_name));
        self.record("clone_workflow", actor_id, Some(workflow_id), result.as_ref().ok(), &result);

        let clone = result?;
        info!(
            source_workflow_id = %workflow_id,
            workflow_id = %clone.id,
            statuses = clone.statuses().len(),
            transitions = clone.transitions().len(),
            "Cloned workflow"
        );
        Ok(clone.id)
    }

    // ---------------------------------------------------------------------
    // Statuses
    // ---------------------------------------------------------------------

    pub async fn add_status(
        &self,
        actor_id: UserId,
        workflow_id: WorkflowId,
        new_status: NewStatus,
    ) -> Result<StatusId> {
        Ok(self
            .mutate_workflow("add_status", actor_id, workflow_id, move |w| {
                Ok(w.add_status(new_status)?)
            })
            .await?
            .1)
    }

    pub async fn update_status(
        &self,
        actor_id: UserId,
        status_id: StatusId,
        update: StatusUpdate,
    ) -> Result<()> {
        let workflow_id = self.workflow_of_status(status_id)?;
        self.mutate_workflow("update_status", actor_id, workflow_id, move |w| {
            Ok(w.update_status(status_id, update)?)
        })
        .await?;
        Ok(())
    }

    /// Make `status_id` the single entry status of its workflow
    pub async fn set_initial_status(&self, actor_id: UserId, status_id: StatusId) -> Result<()> {
        let workflow_id = self.workflow_of_status(status_id)?;
        self.mutate_workflow("set_initial_status", actor_id, workflow_id, move |w| {
            Ok(w.set_initial_status(status_id)?)
        })
        .await?;
        Ok(())
    }

    /// Remove a status that no transition references and no issue occupies
    pub async fn remove_status(&self, actor_id: UserId, status_id: StatusId) -> Result<Status> {
        let workflow_id = self.workflow_of_status(status_id)?;
        let workflow = self.registry.require(workflow_id)?;
        self.authorize(workflow.organization_id, actor_id).await?;

        let occupied_by = self
            .bounded(self.store.count_issues_in_status(status_id), |timeout_ms| {
                StoreError::Unavailable(format!("issue count timed out after {timeout_ms}ms"))
            })
            .await?;

        Ok(self
            .mutate_workflow("remove_status", actor_id, workflow_id, move |w| {
                Ok(w.remove_status(status_id, occupied_by)?)
            })
            .await?
            .1)
    }

    // ---------------------------------------------------------------------
    // Transitions
    // ---------------------------------------------------------------------

    pub async fn add_transition(
        &self,
        actor_id: UserId,
        workflow_id: WorkflowId,
        new_transition: NewTransition,
    ) -> Result<TransitionId> {
        Ok(self
            .mutate_workflow("add_transition", actor_id, workflow_id, move |w| {
                Ok(w.add_transition(new_transition)?)
            })
            .await?
            .1)
    }

    /// Add several transitions as one version. If any is rejected none are kept.
    pub async fn bulk_add_transitions(
        &self,
        actor_id: UserId,
        workflow_id: WorkflowId,
        new_transitions: Vec<NewTransition>,
    ) -> Result<Vec<TransitionId>> {
        Ok(self
            .mutate_workflow("bulk_add_transitions", actor_id, workflow_id, move |w| {
                new_transitions
                    .into_iter()
                    .map(|t| w.add_transition(t).map_err(WorkflowError::from))
                    .collect::<Result<Vec<_>>>()
            })
            .await?
            .1)
    }

    pub async fn update_transition(
        &self,
        actor_id: UserId,
        transition_id: TransitionId,
        update: TransitionUpdate,
    ) -> Result<()> {
        let workflow_id = self.workflow_of_transition(transition_id)?;
        self.mutate_workflow("update_transition", actor_id, workflow_id, move |w| {
            Ok(w.update_transition(transition_id, update)?)
        })
        .await?;
        Ok(())
    }

    pub async fn remove_transition(
        &self,
        actor_id: UserId,
        transition_id: TransitionId,
    ) -> Result<Transition> {
        let workflow_id = self.workflow_of_transition(transition_id)?;
        Ok(self
            .mutate_workflow("remove_transition", actor_id, workflow_id, move |w| {
                Ok(w.remove_transition(transition_id)?)
            })
            .await?
            .1)
    }

    /// Assign positions in the given order. Ids outside the workflow are
    /// skipped and returned.
    pub async fn reorder_transitions(
        &self,
        actor_id: UserId,
        workflow_id: WorkflowId,
        ordered_ids: Vec<TransitionId>,
    ) -> Result<Vec<TransitionId>> {
        let skipped = self
            .mutate_workflow("reorder_transitions", actor_id, workflow_id, move |w| {
                Ok(w.reorder_transitions(&ordered_ids))
            })
            .await?
            .1;

        if !skipped.is_empty() {
            warn!(
                workflow_id = %workflow_id,
                skipped = skipped.len(),
                "Reorder listed transitions outside the workflow"
            );
        }
        Ok(skipped)
    }

    // ---------------------------------------------------------------------
    // Pipelines
    // ---------------------------------------------------------------------

    /// Append a condition; returns its index in the pipeline
    pub async fn attach_condition(
        &self,
        actor_id: UserId,
        transition_id: TransitionId,
        condition: ConditionKind,
    ) -> Result<usize> {
        let workflow_id = self.workflow_of_transition(transition_id)?;
        Ok(self
            .mutate_workflow("attach_condition", actor_id, workflow_id, move |w| {
                Ok(w.attach_condition(transition_id, condition)?)
            })
            .await?
            .1)
    }

    pub async fn attach_validator(
        &self,
        actor_id: UserId,
        transition_id: TransitionId,
        validator: ValidatorKind,
    ) -> Result<usize> {
        let workflow_id = self.workflow_of_transition(transition_id)?;
        Ok(self
            .mutate_workflow("attach_validator", actor_id, workflow_id, move |w| {
                Ok(w.attach_validator(transition_id, validator)?)
            })
            .await?
            .1)
    }

    pub async fn attach_post_function(
        &self,
        actor_id: UserId,
        transition_id: TransitionId,
        post_function: PostFunctionKind,
    ) -> Result<usize> {
        let workflow_id = self.workflow_of_transition(transition_id)?;
        Ok(self
            .mutate_workflow("attach_post_function", actor_id, workflow_id, move |w| {
                Ok(w.attach_post_function(transition_id, post_function)?)
            })
            .await?
            .1)
    }

    pub async fn remove_pipeline_entry(
        &self,
        actor_id: UserId,
        transition_id: TransitionId,
        stage: PipelineStage,
        index: usize,
    ) -> Result<()> {
        let workflow_id = self.workflow_of_transition(transition_id)?;
        self.mutate_workflow("remove_pipeline_entry", actor_id, workflow_id, move |w| {
            Ok(w.remove_pipeline_entry(transition_id, stage, index)?)
        })
        .await?;
        Ok(())
    }

    /// `order[i]` is the current index of the entry that moves to position `i`
    pub async fn reorder_pipeline(
        &self,
        actor_id: UserId,
        transition_id: TransitionId,
        stage: PipelineStage,
        order: Vec<usize>,
    ) -> Result<()> {
        let workflow_id = self.workflow_of_transition(transition_id)?;
        self.mutate_workflow("reorder_pipeline", actor_id, workflow_id, move |w| {
            Ok(w.reorder_pipeline(transition_id, stage, &order)?)
        })
        .await?;
        Ok(())
    }

    // ---------------------------------------------------------------------
    // Schemes
    // ---------------------------------------------------------------------

    pub fn get_scheme(&self, project_id: ProjectId) -> Option<Arc<WorkflowScheme>> {
        self.registry.scheme(project_id)
    }

    /// Create or replace the scheme of a project
    #[instrument(skip_all, fields(project_id = %project_id))]
    pub async fn create_scheme(
        &self,
        actor_id: UserId,
        project_id: ProjectId,
        name: impl Into<String>,
        default_workflow: WorkflowId,
    ) -> Result<Arc<WorkflowScheme>> {
        let workflow = self.registry.require(default_workflow)?;
        self.authorize(workflow.organization_id, actor_id).await?;

        let scheme = self
            .registry
            .put_scheme(WorkflowScheme::new(project_id, name, default_workflow));
        log_configuration_operation(
            "create_scheme",
            Some(&default_workflow.to_string()),
            None,
            &actor_id.to_string(),
            "ok",
            Some(&format!("project {project_id}")),
        );
        Ok(scheme)
    }

    /// Map an issue type to a workflow of the same organization as the
    /// scheme. Returns the previously mapped workflow.
    pub async fn set_workflow_for_issue_type(
        &self,
        actor_id: UserId,
        project_id: ProjectId,
        issue_type: IssueTypeId,
        workflow_id: WorkflowId,
    ) -> Result<Option<WorkflowId>> {
        let organization_id = self.scheme_organization(project_id)?;
        self.authorize(organization_id, actor_id).await?;

        let workflow = self.registry.require(workflow_id)?;
        if workflow.organization_id != organization_id {
            return Err(GraphIntegrityError::ForeignOrganization {
                workflow_id,
                organization_id,
            }
            .into());
        }

        let (_, previous) = self.registry.update_scheme(project_id, |scheme| {
            Ok(scheme.set_workflow_for_issue_type(issue_type, workflow_id))
        })?;
        log_configuration_operation(
            "set_workflow_for_issue_type",
            Some(&workflow_id.to_string()),
            Some(workflow.version),
            &actor_id.to_string(),
            "ok",
            Some(&format!("project {project_id} issue type {issue_type}")),
        );
        Ok(previous)
    }

    /// Drop an explicit mapping so the issue type falls back to the default
    pub async fn remove_workflow_for_issue_type(
        &self,
        actor_id: UserId,
        project_id: ProjectId,
        issue_type: IssueTypeId,
    ) -> Result<Option<WorkflowId>> {
        let organization_id = self.scheme_organization(project_id)?;
        self.authorize(organization_id, actor_id).await?;

        let (_, removed) = self.registry.update_scheme(project_id, |scheme| {
            Ok(scheme.remove_workflow_for_issue_type(issue_type))
        })?;
        log_configuration_operation(
            "remove_workflow_for_issue_type",
            removed.map(|id| id.to_string()).as_deref(),
            None,
            &actor_id.to_string(),
            "ok",
            Some(&format!("project {project_id} issue type {issue_type}")),
        );
        Ok(removed)
    }

    /// Projects with an inactive scheme cannot resolve workflows
    pub async fn deactivate_scheme(
        &self,
        actor_id: UserId,
        project_id: ProjectId,
    ) -> Result<Arc<WorkflowScheme>> {
        let organization_id = self.scheme_organization(project_id)?;
        self.authorize(organization_id, actor_id).await?;

        let (scheme, _) = self.registry.update_scheme(project_id, |scheme| {
            scheme.is_active = false;
            Ok(())
        })?;
        log_configuration_operation(
            "deactivate_scheme",
            None,
            None,
            &actor_id.to_string(),
            "ok",
            Some(&format!("project {project_id}")),
        );
        Ok(scheme)
    }

    // ---------------------------------------------------------------------
    // Helpers
    // ---------------------------------------------------------------------

    /// Authorize, then publish the next version of a workflow
    async fn mutate_workflow<R>(
        &self,
        operation: &str,
        actor_id: UserId,
        workflow_id: WorkflowId,
        mutate: impl FnOnce(&mut Workflow) -> Result<R> + Send,
    ) -> Result<(Arc<Workflow>, R)> {
        let current = self.registry.require(workflow_id)?;
        self.authorize(current.organization_id, actor_id).await?;

        let result = self.registry.update(workflow_id, mutate);
        self.record(
            operation,
            actor_id,
            Some(workflow_id),
            result.as_ref().ok().map(|(snapshot, _)| snapshot),
            &result,
        );
        result
    }

    /// Owners and admins of the organization may change its workflows
    async fn authorize(&self, organization_id: OrganizationId, actor_id: UserId) -> Result<()> {
        let role = self
            .bounded(
                self.directory.organization_role(organization_id, actor_id),
                |timeout_ms| DirectoryError::Timeout { timeout_ms },
            )
            .await?;

        match role {
            Some(role) if role.can_administer_workflows() => Ok(()),
            _ => {
                warn!(
                    organization_id = %organization_id,
                    actor_id = %actor_id,
                    role = ?role,
                    "Rejected workflow configuration change"
                );
                Err(WorkflowError::PermissionDenied(format!(
                    "User {actor_id} cannot administer workflows of organization {organization_id}"
                )))
            }
        }
    }

    /// Run a collaborator call under the configured timeout
    async fn bounded<T, E>(
        &self,
        call: impl Future<Output = std::result::Result<T, E>>,
        timed_out: impl FnOnce(u64) -> E,
    ) -> Result<T>
    where
        WorkflowError: From<E>,
    {
        let timeout_ms = self.call_timeout.as_millis() as u64;
        match tokio::time::timeout(self.call_timeout, call).await {
            Ok(result) => Ok(result?),
            Err(_) => Err(timed_out(timeout_ms).into()),
        }
    }

    /// Log the outcome and announce a newly published version
    fn record<T>(
        &self,
        operation: &str,
        actor_id: UserId,
        workflow_id: Option<WorkflowId>,
        published: Option<&Arc<Workflow>>,
        result: &Result<T>,
    ) {
        let workflow_id = published.map(|w| w.id).or(workflow_id);
        let workflow_label = workflow_id.map(|id| id.to_string());
        let actor = actor_id.to_string();

        match result {
            Ok(_) => {
                log_configuration_operation(
                    operation,
                    workflow_label.as_deref(),
                    published.map(|w| w.version),
                    &actor,
                    "ok",
                    None,
                );
                if let Some(snapshot) = published {
                    self.publisher.publish(
                        events::WORKFLOW_PUBLISHED,
                        json!({
                            "workflow_id": snapshot.id,
                            "organization_id": snapshot.organization_id,
                            "version": snapshot.version,
                            "operation": operation,
                            "actor": actor_id,
                        }),
                    );
                }
            }
            Err(err) => log_configuration_operation(
                operation,
                workflow_label.as_deref(),
                None,
                &actor,
                err.code(),
                Some(&err.to_string()),
            ),
        }
    }

    fn workflow_of_status(&self, status_id: StatusId) -> Result<WorkflowId> {
        self.registry
            .containing_status(status_id)
            .map(|w| w.id)
            .ok_or_else(|| WorkflowError::not_found("Status", status_id))
    }

    fn workflow_of_transition(&self, transition_id: TransitionId) -> Result<WorkflowId> {
        self.registry
            .containing_transition(transition_id)
            .map(|w| w.id)
            .ok_or_else(|| WorkflowError::not_found("Transition", transition_id))
    }

    /// Organization that owns a project's scheme, taken from its workflows
    fn scheme_organization(&self, project_id: ProjectId) -> Result<OrganizationId> {
        let scheme = self
            .registry
            .scheme(project_id)
            .ok_or_else(|| WorkflowError::not_found("WorkflowScheme", project_id))?;

        scheme
            .default_workflow
            .into_iter()
            .chain(scheme.mappings.values().copied())
            .find_map(|id| self.registry.get(id))
            .map(|w| w.organization_id)
            .ok_or_else(|| WorkflowError::not_found("Workflow", format!("for project {project_id}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{IssueSnapshot, StatusCategory};
    use crate::services::directory::{InMemoryDirectory, OrganizationRole};
    use crate::state_machine::persistence::InMemoryIssueStore;

    struct Fixture {
        service: TransitionConfigurationService,
        store: Arc<InMemoryIssueStore>,
        directory: Arc<InMemoryDirectory>,
        org: OrganizationId,
        admin: UserId,
    }

    fn fixture() -> Fixture {
        let store = Arc::new(InMemoryIssueStore::new());
        let directory = Arc::new(InMemoryDirectory::new());
        let org = OrganizationId::new();
        let admin = UserId::new();
        directory.grant_organization_role(org, admin, OrganizationRole::Admin);

        let service = TransitionConfigurationService::new(
            Arc::new(WorkflowRegistry::new()),
            store.clone(),
            directory.clone(),
        );
        Fixture {
            service,
            store,
            directory,
            org,
            admin,
        }
    }

    async fn software_workflow(f: &Fixture) -> (Arc<Workflow>, StatusId, StatusId) {
        let workflow = f
            .service
            .create_workflow(
                f.admin,
                f.org,
                "Software",
                "",
                NewStatus::new("To Do", StatusCategory::ToDo),
            )
            .await
            .unwrap();
        let todo = workflow.initial_status().unwrap().id;
        let done = f
            .service
            .add_status(f.admin, workflow.id, NewStatus::new("Done", StatusCategory::Done))
            .await
            .unwrap();
        (workflow, todo, done)
    }

    #[tokio::test]
    async fn test_members_cannot_change_configuration() {
        let f = fixture();
        let member = UserId::new();
        f.directory
            .grant_organization_role(f.org, member, OrganizationRole::Member);

        let result = f
            .service
            .create_workflow(member, f.org, "Software", "", NewStatus::new("Open", StatusCategory::ToDo))
            .await;
        assert!(matches!(result, Err(WorkflowError::PermissionDenied(_))));

        let stranger = UserId::new();
        let (workflow, _, _) = software_workflow(&f).await;
        let result = f
            .service
            .add_status(stranger, workflow.id, NewStatus::new("Review", StatusCategory::InProgress))
            .await;
        assert!(matches!(result, Err(WorkflowError::PermissionDenied(_))));
    }

    #[tokio::test]
    async fn test_each_change_publishes_a_version() {
        let f = fixture();
        let mut events = f.service.publisher().subscribe();
        let (workflow, todo, done) = software_workflow(&f).await;

        f.service
            .add_transition(f.admin, workflow.id, NewTransition::new("Finish", todo, done))
            .await
            .unwrap();

        let latest = f.service.get_workflow(workflow.id).unwrap();
        assert_eq!(latest.version, 3);

        let mut versions = Vec::new();
        while let Ok(event) = events.try_recv() {
            assert_eq!(event.name, events::WORKFLOW_PUBLISHED);
            versions.push(event.payload["version"].as_u64().unwrap());
        }
        assert_eq!(versions, vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn test_configured_channel_capacity() {
        let f = fixture();
        let service = f.service.with_config(&EngineConfig {
            event_channel_capacity: 1,
            external_call_timeout_ms: 250,
            ..EngineConfig::default()
        });
        assert_eq!(service.call_timeout, Duration::from_millis(250));

        let mut events = service.publisher().subscribe();
        service
            .create_workflow(f.admin, f.org, "Software", "", NewStatus::new("Open", StatusCategory::ToDo))
            .await
            .unwrap();
        service
            .create_workflow(f.admin, f.org, "Support", "", NewStatus::new("Open", StatusCategory::ToDo))
            .await
            .unwrap();

        assert!(matches!(
            events.try_recv(),
            Err(tokio::sync::broadcast::error::TryRecvError::Lagged(1))
        ));
    }

    #[tokio::test]
    async fn test_bulk_add_is_all_or_nothing() {
        let f = fixture();
        let (workflow, todo, done) = software_workflow(&f).await;
        let foreign = StatusId::new();

        let result = f
            .service
            .bulk_add_transitions(
                f.admin,
                workflow.id,
                vec![
                    NewTransition::new("Finish", todo, done),
                    NewTransition::new("Broken", todo, foreign),
                ],
            )
            .await;
        assert!(matches!(
            result,
            Err(WorkflowError::GraphIntegrity(GraphIntegrityError::ForeignStatus { .. }))
        ));
        assert!(f.service.get_workflow(workflow.id).unwrap().transitions().is_empty());

        let ids = f
            .service
            .bulk_add_transitions(
                f.admin,
                workflow.id,
                vec![
                    NewTransition::new("Finish", todo, done),
                    NewTransition::new("Reopen", done, todo),
                ],
            )
            .await
            .unwrap();
        assert_eq!(ids.len(), 2);
    }

    #[tokio::test]
    async fn test_remove_status_checks_occupancy() {
        let f = fixture();
        let (workflow, _, done) = software_workflow(&f).await;

        let issue = IssueSnapshot::new(ProjectId::new(), IssueTypeId::new(), done);
        let issue_id = f.store.insert(issue);

        let result = f.service.remove_status(f.admin, done).await;
        assert!(matches!(
            result,
            Err(WorkflowError::GraphIntegrity(GraphIntegrityError::StatusOccupied { count: 1, .. }))
        ));

        f.store.remove(issue_id);
        let removed = f.service.remove_status(f.admin, done).await.unwrap();
        assert_eq!(removed.name, "Done");
        assert!(!f.service.get_workflow(workflow.id).unwrap().contains_status(done));
    }

    #[tokio::test]
    async fn test_pipeline_operations_by_transition() {
        let f = fixture();
        let (workflow, todo, done) = software_workflow(&f).await;
        let transition_id = f
            .service
            .add_transition(f.admin, workflow.id, NewTransition::new("Finish", todo, done))
            .await
            .unwrap();

        assert_eq!(
            f.service
                .attach_validator(f.admin, transition_id, ValidatorKind::CommentRequired {})
                .await
                .unwrap(),
            0
        );
        assert_eq!(
            f.service
                .attach_validator(f.admin, transition_id, ValidatorKind::ResolutionRequired {})
                .await
                .unwrap(),
            1
        );
        f.service
            .reorder_pipeline(f.admin, transition_id, PipelineStage::Validators, vec![1, 0])
            .await
            .unwrap();

        let latest = f.service.get_workflow(workflow.id).unwrap();
        assert_eq!(
            latest.transition(transition_id).unwrap().validators,
            vec![ValidatorKind::ResolutionRequired {}, ValidatorKind::CommentRequired {}]
        );

        let result = f
            .service
            .remove_pipeline_entry(f.admin, transition_id, PipelineStage::Conditions, 0)
            .await;
        assert!(matches!(
            result,
            Err(WorkflowError::GraphIntegrity(
                GraphIntegrityError::PipelineIndexOutOfRange { .. }
            ))
        ));
    }

    #[tokio::test]
    async fn test_default_flag_is_exclusive_per_organization() {
        let f = fixture();
        let (first, _, _) = software_workflow(&f).await;
        let second = f
            .service
            .clone_workflow(f.admin, first.id, "Software copy")
            .await
            .unwrap();

        for id in [first.id, second] {
            f.service
                .update_workflow(
                    f.admin,
                    id,
                    WorkflowUpdate {
                        is_default: Some(true),
                        ..WorkflowUpdate::default()
                    },
                )
                .await
                .unwrap();
        }

        assert!(!f.service.get_workflow(first.id).unwrap().is_default);
        assert!(f.service.get_workflow(second).unwrap().is_default);
    }

    #[tokio::test]
    async fn test_workflow_in_use_cannot_be_deleted() {
        let f = fixture();
        let (workflow, _, _) = software_workflow(&f).await;
        let project = ProjectId::new();
        f.service
            .create_scheme(f.admin, project, "Scheme", workflow.id)
            .await
            .unwrap();

        let result = f.service.delete_workflow(f.admin, workflow.id).await;
        assert!(matches!(
            result,
            Err(WorkflowError::GraphIntegrity(GraphIntegrityError::WorkflowInUse {
                scheme_count: 1,
                ..
            }))
        ));

        f.service.deactivate_scheme(f.admin, project).await.unwrap();
        f.service.delete_workflow(f.admin, workflow.id).await.unwrap();
        assert!(f.service.get_workflow(workflow.id).is_err());
    }

    #[tokio::test]
    async fn test_scheme_mapping_rejects_foreign_workflow() {
        let f = fixture();
        let (workflow, _, _) = software_workflow(&f).await;
        let project = ProjectId::new();
        f.service
            .create_scheme(f.admin, project, "Scheme", workflow.id)
            .await
            .unwrap();

        let other_org = OrganizationId::new();
        f.directory
            .grant_organization_role(other_org, f.admin, OrganizationRole::Owner);
        let foreign = f
            .service
            .create_workflow(
                f.admin,
                other_org,
                "Elsewhere",
                "",
                NewStatus::new("Open", StatusCategory::ToDo),
            )
            .await
            .unwrap();

        let bug = IssueTypeId::new();
        let result = f
            .service
            .set_workflow_for_issue_type(f.admin, project, bug, foreign.id)
            .await;
        assert!(matches!(
            result,
            Err(WorkflowError::GraphIntegrity(
                GraphIntegrityError::ForeignOrganization { .. }
            ))
        ));

        let bug_flow = f
            .service
            .clone_workflow(f.admin, workflow.id, "Bugs")
            .await
            .unwrap();
        assert_eq!(
            f.service
                .set_workflow_for_issue_type(f.admin, project, bug, bug_flow)
                .await
                .unwrap(),
            None
        );
        assert_eq!(
            f.service
                .remove_workflow_for_issue_type(f.admin, project, bug)
                .await
                .unwrap(),
            Some(bug_flow)
        );
    }

    #[tokio::test]
    async fn test_reorder_reports_foreign_ids() {
        let f = fixture();
        let (workflow, todo, done) = software_workflow(&f).await;
        let finish = f
            .service
            .add_transition(f.admin, workflow.id, NewTransition::new("Finish", todo, done))
            .await
            .unwrap();
        let stray = TransitionId::new();

        let skipped = f
            .service
            .reorder_transitions(f.admin, workflow.id, vec![stray, finish])
            .await
            .unwrap();
        assert_eq!(skipped, vec![stray]);
        assert_eq!(
            f.service
                .get_workflow(workflow.id)
                .unwrap()
                .transition(finish)
                .unwrap()
                .position,
            1
        );
    }
}
