//! # Transitions and their rule pipelines
//!
//! A transition is a directed edge between two statuses of the same workflow.
//! It carries three ordered pipelines, each a closed set of tagged variants with
//! typed parameters. Entries serialize as `{"kind": ..., "params": {...}}` and
//! are stored as ordered lists so execution order survives persistence.

use super::ids::{IssueTypeId, StatusId, TransitionId, UserId};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// Visibility gate evaluated against `(issue, actor)`; pure, never mutates state
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "params", rename_all = "snake_case")]
pub enum ConditionKind {
    ActorHasRoleInProject { role: String },
    ActorIsAssignee {},
    ActorIsReporter {},
    FieldEquals { field: String, value: Value },
    FieldNotEmpty { field: String },
    IssueTypeIn { issue_types: Vec<IssueTypeId> },
    /// Delegates to a predicate registered under `name`
    CustomPredicate { name: String },
}

impl ConditionKind {
    pub fn kind_name(&self) -> &'static str {
        match self {
            Self::ActorHasRoleInProject { .. } => "actor_has_role_in_project",
            Self::ActorIsAssignee {} => "actor_is_assignee",
            Self::ActorIsReporter {} => "actor_is_reporter",
            Self::FieldEquals { .. } => "field_equals",
            Self::FieldNotEmpty { .. } => "field_not_empty",
            Self::IssueTypeIn { .. } => "issue_type_in",
            Self::CustomPredicate { .. } => "custom_predicate",
        }
    }
}

/// Blocking precondition evaluated only when a transition is attempted
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "params", rename_all = "snake_case")]
pub enum ValidatorKind {
    RequiredField { field: String },
    /// Resolution must be present when the target status is in the Done category
    ResolutionRequiredIfDone {},
    ResolutionRequired {},
    CommentRequired {},
    CustomFieldRequired { field: String },
    /// Check performed by an external service registered under `name`.
    /// Bounded by the engine's external call timeout.
    ExternalCheck { name: String },
}

impl ValidatorKind {
    pub fn kind_name(&self) -> &'static str {
        match self {
            Self::RequiredField { .. } => "required_field",
            Self::ResolutionRequiredIfDone {} => "resolution_required_if_done",
            Self::ResolutionRequired {} => "resolution_required",
            Self::CommentRequired {} => "comment_required",
            Self::CustomFieldRequired { .. } => "custom_field_required",
            Self::ExternalCheck { .. } => "external_check",
        }
    }
}

/// Who an `AssignToUser` post-function assigns the issue to
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AssigneeTarget {
    User { user_id: UserId },
    CurrentUser,
    Reporter,
    ProjectLead,
    Unassigned,
}

/// Value written by an `UpdateField` post-function
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum FieldValue {
    Literal(Value),
    /// Id of the acting user
    CurrentUser,
    /// RFC 3339 timestamp at execution time
    Now,
    /// Copy the current value of another issue field
    CopyFrom(String),
    /// Value supplied by the actor in the transition context
    FromContext(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationRecipient {
    Assignee,
    Reporter,
    Actor,
    User(UserId),
}

/// Side effect run after the status change commits, in declared order
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "params", rename_all = "snake_case")]
pub enum PostFunctionKind {
    AssignToUser { target: AssigneeTarget },
    UpdateField { field: String, value: FieldValue },
    /// `None` takes the resolution from the transition context
    SetResolution { resolution: Option<String> },
    EnqueueNotification {
        template: String,
        recipients: Vec<NotificationRecipient>,
    },
    EnqueueWebhookEvent { event: String },
}

impl PostFunctionKind {
    pub fn kind_name(&self) -> &'static str {
        match self {
            Self::AssignToUser { .. } => "assign_to_user",
            Self::UpdateField { .. } => "update_field",
            Self::SetResolution { .. } => "set_resolution",
            Self::EnqueueNotification { .. } => "enqueue_notification",
            Self::EnqueueWebhookEvent { .. } => "enqueue_webhook_event",
        }
    }

    /// Hand-offs to asynchronous external systems (notification, webhook)
    /// as opposed to writes against the issue record
    pub fn is_hand_off(&self) -> bool {
        matches!(
            self,
            Self::EnqueueNotification { .. } | Self::EnqueueWebhookEvent { .. }
        )
    }
}

/// Selects one of a transition's three pipelines
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineStage {
    Conditions,
    Validators,
    PostFunctions,
}

impl fmt::Display for PipelineStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Conditions => write!(f, "conditions"),
            Self::Validators => write!(f, "validators"),
            Self::PostFunctions => write!(f, "post_functions"),
        }
    }
}

/// A directed edge between two statuses of the same workflow
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transition {
    pub id: TransitionId,
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub from_status: StatusId,
    pub to_status: StatusId,
    #[serde(default)]
    pub conditions: Vec<ConditionKind>,
    #[serde(default)]
    pub validators: Vec<ValidatorKind>,
    #[serde(default)]
    pub post_functions: Vec<PostFunctionKind>,
    pub is_active: bool,
    pub position: i32,
}

impl Transition {
    /// Self-loops model "edit while in place" transitions
    pub fn is_self_loop(&self) -> bool {
        self.from_status == self.to_status
    }

    pub fn stage_len(&self, stage: PipelineStage) -> usize {
        match stage {
            PipelineStage::Conditions => self.conditions.len(),
            PipelineStage::Validators => self.validators.len(),
            PipelineStage::PostFunctions => self.post_functions.len(),
        }
    }
}

/// New Transition for creation (without generated fields)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewTransition {
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub from_status: StatusId,
    pub to_status: StatusId,
    #[serde(default)]
    pub conditions: Vec<ConditionKind>,
    #[serde(default)]
    pub validators: Vec<ValidatorKind>,
    #[serde(default)]
    pub post_functions: Vec<PostFunctionKind>,
    #[serde(default)]
    pub position: i32,
}

impl NewTransition {
    pub fn new(name: impl Into<String>, from_status: StatusId, to_status: StatusId) -> Self {
        Self {
            name: name.into(),
            description: String::new(),
            from_status,
            to_status,
            conditions: Vec::new(),
            validators: Vec::new(),
            post_functions: Vec::new(),
            position: 0,
        }
    }

    pub fn with_condition(mut self, condition: ConditionKind) -> Self {
        self.conditions.push(condition);
        self
    }

    pub fn with_validator(mut self, validator: ValidatorKind) -> Self {
        self.validators.push(validator);
        self
    }

    pub fn with_post_function(mut self, post_function: PostFunctionKind) -> Self {
        self.post_functions.push(post_function);
        self
    }

    pub fn at_position(mut self, position: i32) -> Self {
        self.position = position;
        self
    }

    pub(crate) fn into_transition(self) -> Transition {
        Transition {
            id: TransitionId::new(),
            name: self.name,
            description: self.description,
            from_status: self.from_status,
            to_status: self.to_status,
            conditions: self.conditions,
            validators: self.validators,
            post_functions: self.post_functions,
            is_active: true,
            position: self.position,
        }
    }
}

/// Partial update for an existing transition; `None` leaves the field unchanged
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TransitionUpdate {
    pub name: Option<String>,
    pub description: Option<String>,
    pub from_status: Option<StatusId>,
    pub to_status: Option<StatusId>,
    pub is_active: Option<bool>,
    pub position: Option<i32>,
}
