use crate::constants::error_codes;
use crate::error::ErrorDetail;
use crate::models::{IssueId, StatusId};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors raised by the issue-management collaborator
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("Issue {issue_id} not found")]
    IssueNotFound { issue_id: IssueId },

    #[error("Issue {issue_id} is in status {actual}, expected {expected}")]
    StatusMismatch {
        issue_id: IssueId,
        expected: StatusId,
        actual: StatusId,
    },

    #[error("Field '{field}' rejected: {reason}")]
    FieldRejected { field: String, reason: String },

    #[error("Issue store unavailable: {0}")]
    Unavailable(String),
}

/// Errors raised while handing a message to the external dispatcher
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DispatchError {
    #[error("Dispatch channel is closed")]
    ChannelClosed,

    #[error("Dispatch timed out after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },

    #[error("Dispatcher rejected message: {0}")]
    Rejected(String),
}

/// Errors raised by an external check used as a validator
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ExternalCheckError {
    #[error("No external check registered under '{name}'")]
    NotRegistered { name: String },

    #[error("External check '{name}' failed: {reason}")]
    Failed { name: String, reason: String },

    #[error("External check '{name}' timed out after {timeout_ms}ms")]
    Timeout { name: String, timeout_ms: u64 },
}

impl ExternalCheckError {
    pub fn code(&self) -> &'static str {
        match self {
            Self::Timeout { .. } => error_codes::EXTERNAL_CHECK_TIMEOUT,
            _ => error_codes::EXTERNAL_CHECK_FAILED,
        }
    }
}

/// Error from a single post-function entry
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PostFunctionError {
    #[error("Issue store error: {0}")]
    Store(#[from] StoreError),

    #[error("Dispatch error: {0}")]
    Dispatch(#[from] DispatchError),

    #[error("No value available for {what}")]
    MissingValue { what: String },

    #[error("Could not resolve {what}: {reason}")]
    Unresolvable { what: String, reason: String },
}

/// Outcome of running validators against a chosen transition.
///
/// Accumulates every failure in the pipeline so the caller can present the
/// complete list in one round trip.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationResult {
    pub errors: Vec<ErrorDetail>,
}

impl ValidationResult {
    pub fn valid() -> Self {
        Self::default()
    }

    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn push(&mut self, code: impl Into<String>, message: impl Into<String>) {
        self.errors.push(ErrorDetail::new(code, message));
    }

    pub fn has_code(&self, code: &str) -> bool {
        self.errors.iter().any(|e| e.code == code)
    }

    pub fn into_result(self) -> Result<(), ValidationFailure> {
        if self.is_valid() {
            Ok(())
        } else {
            Err(ValidationFailure {
                errors: self.errors,
            })
        }
    }
}

/// One or more validators failed; recoverable by supplying the missing input
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[error("Transition validation failed: {}", summarize(.errors))]
pub struct ValidationFailure {
    pub errors: Vec<ErrorDetail>,
}

impl ValidationFailure {
    pub fn has_code(&self, code: &str) -> bool {
        self.errors.iter().any(|e| e.code == code)
    }
}

/// A post-function that failed during execution
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailedPostFunction {
    /// Position of the entry in the transition's post-function pipeline
    pub index: usize,
    pub kind: String,
    pub message: String,
}

/// Post-function failure after the status change was applied.
///
/// `rolled_back` tells the caller whether the status change (and any field
/// writes from this execution) were reverted.
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[error("Post-function failure (rolled_back: {rolled_back}): {}", summarize_failed(.failures))]
pub struct PostFunctionFailure {
    pub issue_id: IssueId,
    pub failures: Vec<FailedPostFunction>,
    pub rolled_back: bool,
    /// Status the issue is left in
    pub status: StatusId,
}

fn summarize(errors: &[ErrorDetail]) -> String {
    errors
        .iter()
        .map(|e| e.message.as_str())
        .collect::<Vec<_>>()
        .join("; ")
}

fn summarize_failed(failures: &[FailedPostFunction]) -> String {
    failures
        .iter()
        .map(|f| format!("#{} {}: {}", f.index, f.kind, f.message))
        .collect::<Vec<_>>()
        .join("; ")
}

pub type StoreResult<T> = Result<T, StoreError>;
pub type DispatchResult<T> = Result<T, DispatchError>;
pub type PostFunctionResult<T> = Result<T, PostFunctionError>;

/// Helper function to create a missing value error
pub fn missing_value(what: impl Into<String>) -> PostFunctionError {
    PostFunctionError::MissingValue { what: what.into() }
}
