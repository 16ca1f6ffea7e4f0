//! # Workflow graph
//!
//! A `Workflow` owns an arena of statuses (the status registry) and an arena of
//! transitions (the transition graph). Transitions reference statuses by
//! `StatusId`; every mutation checks that those ids live in this workflow's own
//! arena, which is how cross-workflow wiring is rejected. The same check, plus
//! the single-initial-status rule, is re-run by [`Workflow::validate`] before a
//! new version is published.
//!
//! Published workflows are immutable values shared through `Arc`; authoring
//! works on a copy (`Clone`) and publishes it as the next version. The
//! domain-level clone that regenerates every identifier is
//! [`Workflow::deep_clone`].

use super::errors::{GraphIntegrityError, GraphResult};
use super::ids::{OrganizationId, StatusId, TransitionId, WorkflowId};
use super::status::{NewStatus, Status, StatusCategory, StatusUpdate};
use super::transition::{
    ConditionKind, NewTransition, PipelineStage, PostFunctionKind, Transition, TransitionUpdate,
    ValidatorKind,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Workflow {
    pub id: WorkflowId,
    pub organization_id: OrganizationId,
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub is_active: bool,
    pub is_default: bool,
    /// Incremented every time a modified copy is published
    pub version: u64,
    statuses: Vec<Status>,
    transitions: Vec<Transition>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Partial update for workflow metadata; `None` leaves the field unchanged
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WorkflowUpdate {
    pub name: Option<String>,
    pub description: Option<String>,
    pub is_default: Option<bool>,
}

impl Workflow {
    /// Create a workflow with its entry status. A workflow can never exist
    /// without exactly one initial status, so one is required up front.
    pub fn new(
        organization_id: OrganizationId,
        name: impl Into<String>,
        description: impl Into<String>,
        initial: NewStatus,
    ) -> Self {
        let now = Utc::now();
        let mut initial = initial.into_status();
        initial.is_initial = true;

        Self {
            id: WorkflowId::new(),
            organization_id,
            name: name.into(),
            description: description.into(),
            is_active: true,
            is_default: false,
            version: 1,
            statuses: vec![initial],
            transitions: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }

    pub fn statuses(&self) -> &[Status] {
        &self.statuses
    }

    pub fn transitions(&self) -> &[Transition] {
        &self.transitions
    }

    pub fn status(&self, status_id: StatusId) -> Option<&Status> {
        self.statuses.iter().find(|s| s.id == status_id)
    }

    pub fn status_by_name(&self, name: &str) -> Option<&Status> {
        self.statuses.iter().find(|s| s.name == name)
    }

    pub fn transition(&self, transition_id: TransitionId) -> Option<&Transition> {
        self.transitions.iter().find(|t| t.id == transition_id)
    }

    pub fn contains_status(&self, status_id: StatusId) -> bool {
        self.status(status_id).is_some()
    }

    pub fn contains_transition(&self, transition_id: TransitionId) -> bool {
        self.transition(transition_id).is_some()
    }

    /// The workflow's entry state
    pub fn initial_status(&self) -> GraphResult<&Status> {
        self.statuses
            .iter()
            .find(|s| s.is_initial)
            .ok_or(GraphIntegrityError::MissingInitialStatus {
                workflow_id: self.id,
            })
    }

    /// Active transitions leaving `status_id`, in display order
    pub fn outgoing_transitions(&self, status_id: StatusId) -> Vec<&Transition> {
        self.ordered_transitions(|t| t.from_status == status_id)
    }

    /// Active transitions entering `status_id`, in display order
    pub fn incoming_transitions(&self, status_id: StatusId) -> Vec<&Transition> {
        self.ordered_transitions(|t| t.to_status == status_id)
    }

    fn ordered_transitions(&self, predicate: impl Fn(&Transition) -> bool) -> Vec<&Transition> {
        let mut found: Vec<&Transition> = self
            .transitions
            .iter()
            .filter(|t| t.is_active && predicate(t))
            .collect();
        found.sort_by(|a, b| a.position.cmp(&b.position).then_with(|| a.name.cmp(&b.name)));
        found
    }

    /// Active statuses in a category, in display order
    pub fn statuses_by_category(&self, category: StatusCategory) -> Vec<&Status> {
        let mut found: Vec<&Status> = self
            .statuses
            .iter()
            .filter(|s| s.is_active && s.category == category)
            .collect();
        found.sort_by(|a, b| a.position.cmp(&b.position).then_with(|| a.name.cmp(&b.name)));
        found
    }

    /// Number of transitions (active or not) whose endpoints include `status_id`
    pub fn transitions_referencing(&self, status_id: StatusId) -> usize {
        self.transitions
            .iter()
            .filter(|t| t.from_status == status_id || t.to_status == status_id)
            .count()
    }

    // ---------------------------------------------------------------------
    // Status registry mutations
    // ---------------------------------------------------------------------

    pub fn add_status(&mut self, new_status: NewStatus) -> GraphResult<StatusId> {
        self.ensure_unique_name(&new_status.name, None)?;
        if new_status.is_initial {
            let existing = self.initial_status()?.id;
            return Err(GraphIntegrityError::DuplicateInitialStatus {
                workflow_id: self.id,
                existing,
            });
        }

        let status = new_status.into_status();
        let id = status.id;
        self.statuses.push(status);
        Ok(id)
    }

    pub fn update_status(&mut self, status_id: StatusId, update: StatusUpdate) -> GraphResult<()> {
        if let Some(name) = &update.name {
            self.ensure_unique_name(name, Some(status_id))?;
        }
        let status = self.status_mut(status_id)?;

        if update.is_active == Some(false) && status.is_initial {
            return Err(GraphIntegrityError::InitialStatusRemoval { status_id });
        }

        if let Some(name) = update.name {
            status.name = name;
        }
        if let Some(description) = update.description {
            status.description = description;
        }
        if let Some(category) = update.category {
            status.category = category;
        }
        if let Some(is_active) = update.is_active {
            status.is_active = is_active;
        }
        if let Some(position) = update.position {
            status.position = position;
        }
        Ok(())
    }

    /// Move the initial flag to `status_id`, clearing it everywhere else
    pub fn set_initial_status(&mut self, status_id: StatusId) -> GraphResult<()> {
        let target = self.status_mut(status_id)?;
        target.is_active = true;
        for status in &mut self.statuses {
            status.is_initial = status.id == status_id;
        }
        Ok(())
    }

    /// Remove a status. `occupied_by` is the number of issues currently in it,
    /// as reported by the issue collaborator.
    pub fn remove_status(&mut self, status_id: StatusId, occupied_by: usize) -> GraphResult<Status> {
        let status = self
            .status(status_id)
            .ok_or(GraphIntegrityError::ForeignStatus {
                workflow_id: self.id,
                status_id,
            })?;

        if status.is_initial {
            return Err(GraphIntegrityError::InitialStatusRemoval { status_id });
        }
        if self.statuses.len() <= 1 {
            return Err(GraphIntegrityError::LastStatus {
                workflow_id: self.id,
            });
        }
        let referenced = self.transitions_referencing(status_id);
        if referenced > 0 {
            return Err(GraphIntegrityError::StatusReferenced {
                status_id,
                count: referenced,
            });
        }
        if occupied_by > 0 {
            return Err(GraphIntegrityError::StatusOccupied {
                status_id,
                count: occupied_by,
            });
        }

        let index = self
            .statuses
            .iter()
            .position(|s| s.id == status_id)
            .ok_or(GraphIntegrityError::ForeignStatus {
                workflow_id: self.id,
                status_id,
            })?;
        Ok(self.statuses.remove(index))
    }

    fn status_mut(&mut self, status_id: StatusId) -> GraphResult<&mut Status> {
        let workflow_id = self.id;
        self.statuses
            .iter_mut()
            .find(|s| s.id == status_id)
            .ok_or(GraphIntegrityError::ForeignStatus {
                workflow_id,
                status_id,
            })
    }

    fn ensure_unique_name(&self, name: &str, except: Option<StatusId>) -> GraphResult<()> {
        let clash = self
            .statuses
            .iter()
            .any(|s| s.name == name && Some(s.id) != except);
        if clash {
            return Err(GraphIntegrityError::DuplicateStatusName {
                workflow_id: self.id,
                name: name.to_string(),
            });
        }
        Ok(())
    }

    fn ensure_owned_status(&self, status_id: StatusId) -> GraphResult<()> {
        if self.contains_status(status_id) {
            Ok(())
        } else {
            Err(GraphIntegrityError::ForeignStatus {
                workflow_id: self.id,
                status_id,
            })
        }
    }

    // ---------------------------------------------------------------------
    // Transition graph mutations
    // ---------------------------------------------------------------------

    pub fn add_transition(&mut self, new_transition: NewTransition) -> GraphResult<TransitionId> {
        self.ensure_owned_status(new_transition.from_status)?;
        self.ensure_owned_status(new_transition.to_status)?;

        let transition = new_transition.into_transition();
        let id = transition.id;
        self.transitions.push(transition);
        Ok(id)
    }

    pub fn update_transition(
        &mut self,
        transition_id: TransitionId,
        update: TransitionUpdate,
    ) -> GraphResult<()> {
        if let Some(from) = update.from_status {
            self.ensure_owned_status(from)?;
        }
        if let Some(to) = update.to_status {
            self.ensure_owned_status(to)?;
        }

        let transition = self.transition_mut(transition_id)?;
        if let Some(name) = update.name {
            transition.name = name;
        }
        if let Some(description) = update.description {
            transition.description = description;
        }
        if let Some(from) = update.from_status {
            transition.from_status = from;
        }
        if let Some(to) = update.to_status {
            transition.to_status = to;
        }
        if let Some(is_active) = update.is_active {
            transition.is_active = is_active;
        }
        if let Some(position) = update.position {
            transition.position = position;
        }
        Ok(())
    }

    pub fn remove_transition(&mut self, transition_id: TransitionId) -> GraphResult<Transition> {
        let index = self
            .transitions
            .iter()
            .position(|t| t.id == transition_id)
            .ok_or(GraphIntegrityError::ForeignTransition {
                workflow_id: self.id,
                transition_id,
            })?;
        Ok(self.transitions.remove(index))
    }

    /// Assign positions in the order given. Ids that do not belong to this
    /// workflow are skipped and returned; unlisted transitions keep their
    /// current position.
    pub fn reorder_transitions(&mut self, ordered_ids: &[TransitionId]) -> Vec<TransitionId> {
        let mut skipped = Vec::new();
        for (position, transition_id) in ordered_ids.iter().enumerate() {
            match self.transitions.iter_mut().find(|t| t.id == *transition_id) {
                Some(transition) => transition.position = position as i32,
                None => skipped.push(*transition_id),
            }
        }
        skipped
    }

    pub fn attach_condition(
        &mut self,
        transition_id: TransitionId,
        condition: ConditionKind,
    ) -> GraphResult<usize> {
        let transition = self.transition_mut(transition_id)?;
        transition.conditions.push(condition);
        Ok(transition.conditions.len() - 1)
    }

    pub fn attach_validator(
        &mut self,
        transition_id: TransitionId,
        validator: ValidatorKind,
    ) -> GraphResult<usize> {
        let transition = self.transition_mut(transition_id)?;
        transition.validators.push(validator);
        Ok(transition.validators.len() - 1)
    }

    pub fn attach_post_function(
        &mut self,
        transition_id: TransitionId,
        post_function: PostFunctionKind,
    ) -> GraphResult<usize> {
        let transition = self.transition_mut(transition_id)?;
        transition.post_functions.push(post_function);
        Ok(transition.post_functions.len() - 1)
    }

    pub fn remove_pipeline_entry(
        &mut self,
        transition_id: TransitionId,
        stage: PipelineStage,
        index: usize,
    ) -> GraphResult<()> {
        let transition = self.transition_mut(transition_id)?;
        if index >= transition.stage_len(stage) {
            return Err(GraphIntegrityError::PipelineIndexOutOfRange {
                transition_id,
                stage: stage.to_string(),
                index,
            });
        }
        match stage {
            PipelineStage::Conditions => {
                transition.conditions.remove(index);
            }
            PipelineStage::Validators => {
                transition.validators.remove(index);
            }
            PipelineStage::PostFunctions => {
                transition.post_functions.remove(index);
            }
        }
        Ok(())
    }

    /// Reorder one pipeline. `order[i]` is the current index of the entry that
    /// should end up at position `i`; it must be a permutation.
    pub fn reorder_pipeline(
        &mut self,
        transition_id: TransitionId,
        stage: PipelineStage,
        order: &[usize],
    ) -> GraphResult<()> {
        let transition = self.transition_mut(transition_id)?;
        let applied = match stage {
            PipelineStage::Conditions => apply_permutation(&mut transition.conditions, order),
            PipelineStage::Validators => apply_permutation(&mut transition.validators, order),
            PipelineStage::PostFunctions => {
                apply_permutation(&mut transition.post_functions, order)
            }
        };
        if applied {
            Ok(())
        } else {
            Err(GraphIntegrityError::InvalidPipelineOrder {
                transition_id,
                stage: stage.to_string(),
            })
        }
    }

    fn transition_mut(&mut self, transition_id: TransitionId) -> GraphResult<&mut Transition> {
        let workflow_id = self.id;
        self.transitions
            .iter_mut()
            .find(|t| t.id == transition_id)
            .ok_or(GraphIntegrityError::ForeignTransition {
                workflow_id,
                transition_id,
            })
    }

    // ---------------------------------------------------------------------
    // Integrity, versioning and cloning
    // ---------------------------------------------------------------------

    /// Full integrity check run before every publish
    pub fn validate(&self) -> GraphResult<()> {
        let initials: Vec<&Status> = self.statuses.iter().filter(|s| s.is_initial).collect();
        match initials.len() {
            0 => {
                return Err(GraphIntegrityError::MissingInitialStatus {
                    workflow_id: self.id,
                })
            }
            1 => {}
            _ => {
                return Err(GraphIntegrityError::DuplicateInitialStatus {
                    workflow_id: self.id,
                    existing: initials[0].id,
                })
            }
        }

        let mut names = HashSet::new();
        for status in &self.statuses {
            if !names.insert(status.name.as_str()) {
                return Err(GraphIntegrityError::DuplicateStatusName {
                    workflow_id: self.id,
                    name: status.name.clone(),
                });
            }
        }

        for transition in &self.transitions {
            self.ensure_owned_status(transition.from_status)?;
            self.ensure_owned_status(transition.to_status)?;
        }
        Ok(())
    }

    pub(crate) fn mark_published(&mut self, version: u64) {
        self.version = version;
        self.updated_at = Utc::now();
    }

    pub fn update_metadata(&mut self, update: WorkflowUpdate) {
        if let Some(name) = update.name {
            self.name = name;
        }
        if let Some(description) = update.description {
            self.description = description;
        }
        if let Some(is_default) = update.is_default {
            self.is_default = is_default;
        }
    }

    /// Deep copy with regenerated identifiers and preserved topology.
    ///
    /// Status ids are remapped in a single pass over the registry; transitions
    /// are then rebuilt with their endpoints rewritten through that map, so the
    /// clone never points back into the source.
    pub fn deep_clone(&self, new_name: impl Into<String>) -> Workflow {
        let now = Utc::now();
        let mut status_map: HashMap<StatusId, StatusId> = HashMap::with_capacity(self.statuses.len());

        let statuses: Vec<Status> = self
            .statuses
            .iter()
            .map(|status| {
                let new_id = StatusId::new();
                status_map.insert(status.id, new_id);
                Status {
                    id: new_id,
                    ..status.clone()
                }
            })
            .collect();

        let transitions: Vec<Transition> = self
            .transitions
            .iter()
            .map(|transition| Transition {
                id: TransitionId::new(),
                from_status: status_map[&transition.from_status],
                to_status: status_map[&transition.to_status],
                ..transition.clone()
            })
            .collect();

        Workflow {
            id: WorkflowId::new(),
            organization_id: self.organization_id,
            name: new_name.into(),
            description: format!("Cloned from {}", self.name),
            is_active: true,
            is_default: false,
            version: 1,
            statuses,
            transitions,
            created_at: now,
            updated_at: now,
        }
    }
}

fn apply_permutation<T: Clone>(items: &mut Vec<T>, order: &[usize]) -> bool {
    if order.len() != items.len() {
        return false;
    }
    let mut seen = vec![false; items.len()];
    for &index in order {
        if index >= items.len() || seen[index] {
            return false;
        }
        seen[index] = true;
    }
    let reordered: Vec<T> = order.iter().map(|&i| items[i].clone()).collect();
    *items = reordered;
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::transition::NewTransition;

    fn simple_workflow() -> (Workflow, StatusId, StatusId, StatusId) {
        let mut workflow = Workflow::new(
            OrganizationId::new(),
            "Simple",
            "",
            NewStatus::new("To Do", StatusCategory::ToDo),
        );
        let todo = workflow.initial_status().unwrap().id;
        let doing = workflow
            .add_status(NewStatus::new("In Progress", StatusCategory::InProgress).at_position(1))
            .unwrap();
        let done = workflow
            .add_status(NewStatus::new("Done", StatusCategory::Done).at_position(2))
            .unwrap();
        (workflow, todo, doing, done)
    }

    #[test]
    fn test_single_initial_status_enforced() {
        let (mut workflow, todo, doing, _) = simple_workflow();

        let err = workflow
            .add_status(NewStatus::new("Backlog", StatusCategory::ToDo).initial())
            .unwrap_err();
        assert_eq!(
            err,
            GraphIntegrityError::DuplicateInitialStatus {
                workflow_id: workflow.id,
                existing: todo,
            }
        );

        workflow.set_initial_status(doing).unwrap();
        assert_eq!(workflow.initial_status().unwrap().id, doing);
        assert_eq!(workflow.statuses().iter().filter(|s| s.is_initial).count(), 1);
        assert!(workflow.validate().is_ok());
    }

    #[test]
    fn test_cross_workflow_edges_rejected() {
        let (mut workflow, todo, _, _) = simple_workflow();
        let (other, other_todo, _, _) = simple_workflow();

        let err = workflow
            .add_transition(NewTransition::new("Jump", todo, other_todo))
            .unwrap_err();
        assert!(matches!(err, GraphIntegrityError::ForeignStatus { status_id, .. } if status_id == other_todo));
        assert!(workflow.transitions().is_empty());
        assert!(other.validate().is_ok());
    }

    #[test]
    fn test_graph_queries_follow_position_order() {
        let (mut workflow, todo, doing, done) = simple_workflow();
        let start = workflow
            .add_transition(NewTransition::new("Start", todo, doing).at_position(2))
            .unwrap();
        let close = workflow
            .add_transition(NewTransition::new("Close", todo, done).at_position(1))
            .unwrap();
        workflow
            .add_transition(NewTransition::new("Finish", doing, done))
            .unwrap();

        let outgoing: Vec<TransitionId> =
            workflow.outgoing_transitions(todo).iter().map(|t| t.id).collect();
        assert_eq!(outgoing, vec![close, start]);
        assert_eq!(workflow.incoming_transitions(done).len(), 2);

        let skipped = workflow.reorder_transitions(&[start, close, TransitionId::new()]);
        assert_eq!(skipped.len(), 1);
        let outgoing: Vec<TransitionId> =
            workflow.outgoing_transitions(todo).iter().map(|t| t.id).collect();
        assert_eq!(outgoing, vec![start, close]);
    }

    #[test]
    fn test_inactive_transitions_are_hidden() {
        let (mut workflow, todo, doing, _) = simple_workflow();
        let start = workflow
            .add_transition(NewTransition::new("Start", todo, doing))
            .unwrap();
        workflow
            .update_transition(
                start,
                TransitionUpdate {
                    is_active: Some(false),
                    ..Default::default()
                },
            )
            .unwrap();
        assert!(workflow.outgoing_transitions(todo).is_empty());
    }

    #[test]
    fn test_status_removal_rules() {
        let (mut workflow, todo, doing, done) = simple_workflow();
        workflow
            .add_transition(NewTransition::new("Start", todo, doing))
            .unwrap();

        assert!(matches!(
            workflow.remove_status(todo, 0),
            Err(GraphIntegrityError::InitialStatusRemoval { .. })
        ));
        assert!(matches!(
            workflow.remove_status(doing, 0),
            Err(GraphIntegrityError::StatusReferenced { count: 1, .. })
        ));
        assert!(matches!(
            workflow.remove_status(done, 4),
            Err(GraphIntegrityError::StatusOccupied { count: 4, .. })
        ));
        assert_eq!(workflow.remove_status(done, 0).unwrap().id, done);
    }

    #[test]
    fn test_statuses_by_category() {
        let (workflow, _, doing, _) = simple_workflow();
        let in_progress = workflow.statuses_by_category(StatusCategory::InProgress);
        assert_eq!(in_progress.len(), 1);
        assert_eq!(in_progress[0].id, doing);
    }

    #[test]
    fn test_deep_clone_remaps_all_identifiers() {
        let (mut workflow, todo, doing, done) = simple_workflow();
        workflow
            .add_transition(
                NewTransition::new("Start", todo, doing).with_condition(ConditionKind::ActorIsAssignee {}),
            )
            .unwrap();
        workflow
            .add_transition(
                NewTransition::new("Finish", doing, done)
                    .with_validator(ValidatorKind::ResolutionRequiredIfDone {}),
            )
            .unwrap();

        let copy = workflow.deep_clone("Simple (copy)");
        assert_ne!(copy.id, workflow.id);
        assert_eq!(copy.statuses().len(), 3);
        assert_eq!(copy.transitions().len(), 2);
        assert!(copy.validate().is_ok());
        assert_eq!(copy.description, "Cloned from Simple");

        for transition in copy.transitions() {
            assert!(copy.contains_status(transition.from_status));
            assert!(!workflow.contains_status(transition.from_status));
            assert!(!workflow.contains_transition(transition.id));
        }

        let original_finish = &workflow.transitions()[1];
        let cloned_finish = &copy.transitions()[1];
        assert_eq!(original_finish.validators, cloned_finish.validators);
        assert_eq!(
            copy.status(cloned_finish.to_status).unwrap().name,
            workflow.status(original_finish.to_status).unwrap().name
        );
    }

    #[test]
    fn test_reorder_pipeline_requires_permutation() {
        let (mut workflow, todo, doing, _) = simple_workflow();
        let start = workflow
            .add_transition(NewTransition::new("Start", todo, doing))
            .unwrap();
        workflow
            .attach_validator(start, ValidatorKind::CommentRequired {})
            .unwrap();
        workflow
            .attach_validator(start, ValidatorKind::ResolutionRequired {})
            .unwrap();

        assert!(workflow
            .reorder_pipeline(start, PipelineStage::Validators, &[0, 0])
            .is_err());
        workflow
            .reorder_pipeline(start, PipelineStage::Validators, &[1, 0])
            .unwrap();
        assert_eq!(
            workflow.transition(start).unwrap().validators[0],
            ValidatorKind::ResolutionRequired {}
        );

        workflow
            .remove_pipeline_entry(start, PipelineStage::Validators, 0)
            .unwrap();
        assert!(workflow
            .remove_pipeline_entry(start, PipelineStage::Validators, 5)
            .is_err());
    }
}
