//! # Workflow Registry
//!
//! Versioned snapshot store for published workflows and project schemes.
//!
//! Each workflow is held as an immutable `Arc<Workflow>`. A configuration
//! write copies the current snapshot, applies the mutation, validates the
//! whole graph and swaps the new version in under the write lock. Readers
//! that already hold an `Arc` keep seeing the version they started with, so a
//! reorder or edit never changes a transition that is already executing.

use crate::error::{Result, WorkflowError};
use crate::models::{
    GraphIntegrityError, IssueTypeId, OrganizationId, ProjectId, SchemeResolutionError,
    StatusId, TransitionId, Workflow, WorkflowId, WorkflowScheme,
};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

#[derive(Debug, Default)]
pub struct WorkflowRegistry {
    workflows: RwLock<HashMap<WorkflowId, Arc<Workflow>>>,
    schemes: RwLock<HashMap<ProjectId, Arc<WorkflowScheme>>>,
}

impl WorkflowRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, workflow_id: WorkflowId) -> Option<Arc<Workflow>> {
        self.workflows.read().get(&workflow_id).cloned()
    }

    pub fn require(&self, workflow_id: WorkflowId) -> Result<Arc<Workflow>> {
        self.get(workflow_id)
            .ok_or_else(|| WorkflowError::not_found("Workflow", workflow_id))
    }

    /// Workflows of an organization, ordered by name
    pub fn list(&self, organization_id: OrganizationId) -> Vec<Arc<Workflow>> {
        let mut workflows: Vec<Arc<Workflow>> = self
            .workflows
            .read()
            .values()
            .filter(|w| w.organization_id == organization_id)
            .cloned()
            .collect();
        workflows.sort_by(|a, b| a.name.cmp(&b.name));
        workflows
    }

    /// Workflow whose registry holds `status_id`
    pub fn containing_status(&self, status_id: StatusId) -> Option<Arc<Workflow>> {
        self.workflows
            .read()
            .values()
            .find(|w| w.contains_status(status_id))
            .cloned()
    }

    /// Workflow whose graph holds `transition_id`
    pub fn containing_transition(&self, transition_id: TransitionId) -> Option<Arc<Workflow>> {
        self.workflows
            .read()
            .values()
            .find(|w| w.contains_transition(transition_id))
            .cloned()
    }

    /// Publish a brand-new workflow
    pub fn insert(&self, workflow: Workflow) -> Result<Arc<Workflow>> {
        workflow.validate()?;

        let mut workflows = self.workflows.write();
        ensure_unique_name(&workflows, &workflow)?;

        let snapshot = Arc::new(workflow);
        workflows.insert(snapshot.id, Arc::clone(&snapshot));
        debug!(
            workflow_id = %snapshot.id,
            version = snapshot.version,
            "Published new workflow"
        );
        Ok(snapshot)
    }

    /// Copy, mutate, validate and publish the next version of a workflow.
    ///
    /// Nothing is published when `mutate` or validation fails.
    pub fn update<R>(
        &self,
        workflow_id: WorkflowId,
        mutate: impl FnOnce(&mut Workflow) -> Result<R>,
    ) -> Result<(Arc<Workflow>, R)> {
        let mut workflows = self.workflows.write();
        let current = workflows
            .get(&workflow_id)
            .ok_or_else(|| WorkflowError::not_found("Workflow", workflow_id))?;

        let mut next = Workflow::clone(current);
        let output = mutate(&mut next)?;
        next.validate()?;
        ensure_unique_name(&workflows, &next)?;
        next.mark_published(current.version + 1);

        let snapshot = Arc::new(next);
        workflows.insert(workflow_id, Arc::clone(&snapshot));
        debug!(
            workflow_id = %workflow_id,
            version = snapshot.version,
            "Published workflow version"
        );
        Ok((snapshot, output))
    }

    pub fn remove(&self, workflow_id: WorkflowId) -> Option<Arc<Workflow>> {
        self.workflows.write().remove(&workflow_id)
    }

    pub fn scheme(&self, project_id: ProjectId) -> Option<Arc<WorkflowScheme>> {
        self.schemes.read().get(&project_id).cloned()
    }

    /// Store the scheme for its project, replacing any previous one
    pub fn put_scheme(&self, scheme: WorkflowScheme) -> Arc<WorkflowScheme> {
        let snapshot = Arc::new(scheme);
        self.schemes
            .write()
            .insert(snapshot.project_id, Arc::clone(&snapshot));
        snapshot
    }

    /// Copy, mutate and swap the scheme of a project
    pub fn update_scheme<R>(
        &self,
        project_id: ProjectId,
        mutate: impl FnOnce(&mut WorkflowScheme) -> Result<R>,
    ) -> Result<(Arc<WorkflowScheme>, R)> {
        let mut schemes = self.schemes.write();
        let current = schemes
            .get(&project_id)
            .ok_or_else(|| WorkflowError::not_found("WorkflowScheme", project_id))?;

        let mut next = WorkflowScheme::clone(current);
        let output = mutate(&mut next)?;

        let snapshot = Arc::new(next);
        schemes.insert(project_id, Arc::clone(&snapshot));
        Ok((snapshot, output))
    }

    /// Active schemes that point at `workflow_id`
    pub fn active_schemes_referencing(&self, workflow_id: WorkflowId) -> Vec<Arc<WorkflowScheme>> {
        self.schemes
            .read()
            .values()
            .filter(|s| s.is_active && s.references(workflow_id))
            .cloned()
            .collect()
    }

    /// Resolve the workflow governing `(project, issue_type)`.
    ///
    /// A mapping to a workflow that no longer exists falls back to the
    /// scheme default. Inactive workflows still resolve so issues already in
    /// their statuses keep moving.
    pub fn resolve(
        &self,
        project_id: ProjectId,
        issue_type: IssueTypeId,
    ) -> std::result::Result<Arc<Workflow>, SchemeResolutionError> {
        let scheme = self
            .scheme(project_id)
            .filter(|s| s.is_active)
            .ok_or(SchemeResolutionError::NoScheme { project_id })?;

        if let Some(mapped) = scheme.mapped_workflow(issue_type) {
            if let Some(workflow) = self.get(mapped) {
                return Ok(workflow);
            }
            debug!(
                project_id = %project_id,
                issue_type = %issue_type,
                workflow_id = %mapped,
                "Mapped workflow missing, falling back to scheme default"
            );
        }

        let default_id = scheme
            .default_workflow
            .ok_or(SchemeResolutionError::NoWorkflow { issue_type })?;

        self.get(default_id)
            .ok_or(SchemeResolutionError::WorkflowUnavailable {
                workflow_id: default_id,
                issue_type,
            })
    }
}

fn ensure_unique_name(
    workflows: &HashMap<WorkflowId, Arc<Workflow>>,
    candidate: &Workflow,
) -> Result<()> {
    let taken = workflows.values().any(|w| {
        w.id != candidate.id
            && w.organization_id == candidate.organization_id
            && w.name == candidate.name
    });
    if taken {
        return Err(GraphIntegrityError::DuplicateWorkflowName {
            organization_id: candidate.organization_id,
            name: candidate.name.clone(),
        }
        .into());
    }
    Ok(())
}
