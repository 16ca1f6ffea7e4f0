use proptest::prelude::*;
use serde_json::json;

use issue_workflow::models::{
    ConditionKind, NewStatus, NewTransition, OrganizationId, PostFunctionKind, StatusCategory,
    StatusId, ValidatorKind, Workflow,
};

/// Shape of a generated workflow graph: status categories plus edges given
/// as indices into the status list
#[derive(Debug, Clone)]
pub struct GraphShape {
    pub categories: Vec<StatusCategory>,
    pub edges: Vec<(usize, usize, usize)>,
}

impl GraphShape {
    /// Build the workflow this shape describes. The first status is initial;
    /// the third edge component picks a pipeline preset.
    pub fn build(&self, name: &str) -> Workflow {
        let mut workflow = Workflow::new(
            OrganizationId::new(),
            name,
            "",
            NewStatus::new("Status 0", self.categories[0]),
        );
        let mut ids: Vec<StatusId> = vec![workflow.statuses()[0].id];
        for (i, category) in self.categories.iter().enumerate().skip(1) {
            let id = workflow
                .add_status(NewStatus::new(format!("Status {i}"), *category).at_position(i as i32))
                .expect("generated status names are unique");
            ids.push(id);
        }

        for (n, (from, to, preset)) in self.edges.iter().enumerate() {
            let transition = with_pipeline_preset(
                NewTransition::new(format!("Edge {n}"), ids[*from], ids[*to]).at_position(n as i32),
                *preset,
            );
            workflow
                .add_transition(transition)
                .expect("generated edges stay inside the workflow");
        }
        workflow
    }
}

fn with_pipeline_preset(transition: NewTransition, preset: usize) -> NewTransition {
    match preset % 4 {
        0 => transition,
        1 => transition.with_condition(ConditionKind::ActorHasRoleInProject {
            role: "admin".to_string(),
        }),
        2 => transition
            .with_validator(ValidatorKind::ResolutionRequiredIfDone {})
            .with_post_function(PostFunctionKind::SetResolution { resolution: None }),
        _ => transition
            .with_condition(ConditionKind::FieldEquals {
                field: "priority".to_string(),
                value: json!("high"),
            })
            .with_validator(ValidatorKind::CommentRequired {})
            .with_post_function(PostFunctionKind::EnqueueWebhookEvent {
                event: "issue.escalated".to_string(),
            }),
    }
}

pub fn status_category_strategy() -> impl Strategy<Value = StatusCategory> {
    prop_oneof![
        Just(StatusCategory::ToDo),
        Just(StatusCategory::InProgress),
        Just(StatusCategory::Done),
    ]
}

/// Graphs with 1 to 8 statuses and up to 16 edges, self-loops included
pub fn graph_shape_strategy() -> impl Strategy<Value = GraphShape> {
    prop::collection::vec(status_category_strategy(), 1..8).prop_flat_map(|categories| {
        let n = categories.len();
        let edges = prop::collection::vec((0..n, 0..n, 0usize..4), 0..16);
        (Just(categories), edges).prop_map(|(categories, edges)| GraphShape { categories, edges })
    })
}

/// Sequence of indices naming statuses to promote to initial
pub fn initial_promotions_strategy() -> impl Strategy<Value = Vec<usize>> {
    prop::collection::vec(0usize..8, 1..10)
}
