use super::ids::{IssueTypeId, OrganizationId, ProjectId, StatusId, TransitionId, WorkflowId};
use thiserror::Error;

/// Invariant violations raised while authoring a workflow graph.
/// Always rejected synchronously at configuration time.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GraphIntegrityError {
    #[error("Workflow {workflow_id} already has initial status {existing}")]
    DuplicateInitialStatus {
        workflow_id: WorkflowId,
        existing: StatusId,
    },

    #[error("Workflow {workflow_id} has no initial status")]
    MissingInitialStatus { workflow_id: WorkflowId },

    #[error("Status {status_id} does not belong to workflow {workflow_id}")]
    ForeignStatus {
        workflow_id: WorkflowId,
        status_id: StatusId,
    },

    #[error("Transition {transition_id} does not belong to workflow {workflow_id}")]
    ForeignTransition {
        workflow_id: WorkflowId,
        transition_id: TransitionId,
    },

    #[error("Status name '{name}' already exists in workflow {workflow_id}")]
    DuplicateStatusName { workflow_id: WorkflowId, name: String },

    #[error("Status {status_id} is referenced by {count} transition(s)")]
    StatusReferenced { status_id: StatusId, count: usize },

    #[error("Status {status_id} is occupied by {count} issue(s)")]
    StatusOccupied { status_id: StatusId, count: usize },

    #[error("Initial status {status_id} cannot be removed or deactivated")]
    InitialStatusRemoval { status_id: StatusId },

    #[error("Cannot delete the last status of workflow {workflow_id}")]
    LastStatus { workflow_id: WorkflowId },

    #[error("Pipeline {stage} of transition {transition_id} has no entry at index {index}")]
    PipelineIndexOutOfRange {
        transition_id: TransitionId,
        stage: String,
        index: usize,
    },

    #[error("Workflow name '{name}' already exists in organization {organization_id}")]
    DuplicateWorkflowName {
        organization_id: OrganizationId,
        name: String,
    },

    #[error("Workflow {workflow_id} is used by {scheme_count} active scheme(s)")]
    WorkflowInUse {
        workflow_id: WorkflowId,
        scheme_count: usize,
    },

    #[error("Workflow {workflow_id} belongs to another organization than {organization_id}")]
    ForeignOrganization {
        workflow_id: WorkflowId,
        organization_id: OrganizationId,
    },

    #[error("Reorder of pipeline {stage} on transition {transition_id} is not a permutation")]
    InvalidPipelineOrder {
        transition_id: TransitionId,
        stage: String,
    },
}

/// No workflow resolvable for an issue type. Fatal configuration error,
/// surfaced to the caller and never retried.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SchemeResolutionError {
    #[error("Project {project_id} has no active workflow scheme")]
    NoScheme { project_id: ProjectId },

    #[error("No workflow mapped for issue type {issue_type} and scheme has no default")]
    NoWorkflow { issue_type: IssueTypeId },

    #[error("Workflow {workflow_id} resolved for issue type {issue_type} is not available")]
    WorkflowUnavailable {
        workflow_id: WorkflowId,
        issue_type: IssueTypeId,
    },
}

pub type GraphResult<T> = Result<T, GraphIntegrityError>;
