use crate::constants::error_codes;
use crate::models::{
    GraphIntegrityError, IssueId, SchemeResolutionError, StatusId, TransitionId,
};
use crate::state_machine::errors::{PostFunctionFailure, StoreError, ValidationFailure};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Structured, user-facing error entry: `{code, message}`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorDetail {
    pub code: String,
    pub message: String,
}

impl ErrorDetail {
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum WorkflowError {
    #[error("Graph integrity error: {0}")]
    GraphIntegrity(#[from] GraphIntegrityError),

    #[error("Scheme resolution error: {0}")]
    SchemeResolution(#[from] SchemeResolutionError),

    #[error("Transition {transition_id} is not available from status {current_status}")]
    InvalidTransition {
        transition_id: TransitionId,
        current_status: StatusId,
    },

    #[error("{0}")]
    ValidationFailed(#[from] ValidationFailure),

    #[error("{0}")]
    PostFunctionFailed(#[from] PostFunctionFailure),

    #[error("Issue {issue_id} has a transition in flight")]
    IssueBusy { issue_id: IssueId },

    #[error("Issue {issue_id} changed status while the transition was applied")]
    ConcurrentModification { issue_id: IssueId },

    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: String },

    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    #[error("Issue store error: {0}")]
    Store(StoreError),

    #[error("Membership directory error: {0}")]
    Directory(String),

    #[error("Configuration error: {0}")]
    Configuration(String),
}

impl WorkflowError {
    /// Stable machine-readable code for the boundary
    pub fn code(&self) -> &'static str {
        match self {
            Self::GraphIntegrity(_) => error_codes::GRAPH_INTEGRITY,
            Self::SchemeResolution(_) => error_codes::SCHEME_RESOLUTION_FAILED,
            Self::InvalidTransition { .. } => error_codes::INVALID_TRANSITION,
            Self::ValidationFailed(_) => error_codes::VALIDATION_FAILED,
            Self::PostFunctionFailed(_) => error_codes::POST_FUNCTION_FAILED,
            Self::IssueBusy { .. } => error_codes::ISSUE_BUSY,
            Self::ConcurrentModification { .. } => error_codes::CONCURRENT_MODIFICATION,
            Self::NotFound { .. } => error_codes::NOT_FOUND,
            Self::PermissionDenied(_) => error_codes::PERMISSION_DENIED,
            Self::Store(_) => error_codes::STORE_ERROR,
            Self::Directory(_) => error_codes::DIRECTORY_ERROR,
            Self::Configuration(_) => error_codes::CONFIGURATION_ERROR,
        }
    }

    /// Flatten into the `{code, message}` list returned to callers.
    /// Validation failures expand to one entry per failed validator.
    pub fn details(&self) -> Vec<ErrorDetail> {
        match self {
            Self::ValidationFailed(failure) => failure.errors.clone(),
            Self::PostFunctionFailed(failure) => failure
                .failures
                .iter()
                .map(|f| {
                    ErrorDetail::new(
                        error_codes::POST_FUNCTION_FAILED,
                        format!("{} (#{}) failed: {}", f.kind, f.index, f.message),
                    )
                })
                .collect(),
            other => vec![ErrorDetail::new(other.code(), other.to_string())],
        }
    }

    /// Whether the caller may retry after refreshing issue state
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::IssueBusy { .. } | Self::ConcurrentModification { .. }
        )
    }

    pub fn not_found(entity: &'static str, id: impl ToString) -> Self {
        Self::NotFound {
            entity,
            id: id.to_string(),
        }
    }
}

impl From<StoreError> for WorkflowError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::IssueNotFound { issue_id } => Self::not_found("Issue", issue_id),
            StoreError::StatusMismatch { issue_id, .. } => Self::ConcurrentModification { issue_id },
            other => Self::Store(other),
        }
    }
}

pub type Result<T> = std::result::Result<T, WorkflowError>;
