// State machine module for issue workflows
//
// The engine interprets a workflow graph at runtime: conditions gate which
// transitions are visible, validators gate execution, and post-functions run
// once the status change is written.

pub mod actions;
pub mod context;
pub mod engine;
pub mod errors;
pub mod events;
pub mod guards;
pub mod persistence;

// Re-export main types for convenient access
pub use context::TransitionContext;
pub use engine::{AvailableTransition, ExecutionResult, TransitionOutcome, WorkflowEngine};
pub use errors::{
    DispatchError, ExternalCheckError, FailedPostFunction, PostFunctionError,
    PostFunctionFailure, StoreError, ValidationFailure, ValidationResult,
};
pub use events::WorkflowEvent;
pub use persistence::{InMemoryIssueStore, IssueStore};

// Common traits and utilities
pub use actions::TransitionAction;
pub use guards::{CustomPredicate, ExternalCheck, TransitionGuard};
