pub mod errors;
pub mod ids;
pub mod issue;
pub mod scheme;
pub mod status;
pub mod transition;
pub mod workflow;

// Re-export core models for easy access
pub use errors::{GraphIntegrityError, GraphResult, SchemeResolutionError};
pub use ids::{
    IssueId, IssueTypeId, OrganizationId, ProjectId, SchemeId, StatusId, TransitionId, UserId,
    WorkflowId,
};
pub use issue::{is_blank, Actor, IssueSnapshot};
pub use scheme::WorkflowScheme;
pub use status::{NewStatus, Status, StatusCategory, StatusUpdate};
pub use transition::{
    AssigneeTarget, ConditionKind, FieldValue, NewTransition, NotificationRecipient,
    PipelineStage, PostFunctionKind, Transition, TransitionUpdate, ValidatorKind,
};
pub use workflow::{Workflow, WorkflowUpdate};
