use super::errors::SchemeResolutionError;
use super::ids::{IssueTypeId, ProjectId, SchemeId, WorkflowId};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Per-project mapping from issue type to the workflow governing it.
///
/// Unmapped issue types fall back to `default_workflow`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkflowScheme {
    pub id: SchemeId,
    pub project_id: ProjectId,
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub default_workflow: Option<WorkflowId>,
    #[serde(default)]
    pub mappings: BTreeMap<IssueTypeId, WorkflowId>,
    pub is_active: bool,
}

impl WorkflowScheme {
    pub fn new(project_id: ProjectId, name: impl Into<String>, default_workflow: WorkflowId) -> Self {
        Self {
            id: SchemeId::new(),
            project_id,
            name: name.into(),
            description: String::new(),
            default_workflow: Some(default_workflow),
            mappings: BTreeMap::new(),
            is_active: true,
        }
    }

    /// Explicit mapping if present, otherwise the default workflow
    pub fn get_workflow_for_issue_type(
        &self,
        issue_type: IssueTypeId,
    ) -> Result<WorkflowId, SchemeResolutionError> {
        self.mappings
            .get(&issue_type)
            .copied()
            .or(self.default_workflow)
            .ok_or(SchemeResolutionError::NoWorkflow { issue_type })
    }

    pub fn mapped_workflow(&self, issue_type: IssueTypeId) -> Option<WorkflowId> {
        self.mappings.get(&issue_type).copied()
    }

    /// Returns the workflow previously mapped for the issue type, if any
    pub fn set_workflow_for_issue_type(
        &mut self,
        issue_type: IssueTypeId,
        workflow_id: WorkflowId,
    ) -> Option<WorkflowId> {
        self.mappings.insert(issue_type, workflow_id)
    }

    /// Drop the explicit mapping so the issue type falls back to the default
    pub fn remove_workflow_for_issue_type(&mut self, issue_type: IssueTypeId) -> Option<WorkflowId> {
        self.mappings.remove(&issue_type)
    }

    /// Whether this scheme points at `workflow_id`, as default or mapping
    pub fn references(&self, workflow_id: WorkflowId) -> bool {
        self.default_workflow == Some(workflow_id)
            || self.mappings.values().any(|w| *w == workflow_id)
    }
}
