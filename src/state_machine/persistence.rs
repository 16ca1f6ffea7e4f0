use super::errors::{StoreError, StoreResult};
use crate::models::{IssueId, IssueSnapshot, StatusId, UserId};
use async_trait::async_trait;
use dashmap::DashMap;
use serde_json::Value;

/// Issue-management collaborator.
///
/// The engine never owns issue records; it reads snapshots and writes the
/// status and post-function effects through this trait.
#[async_trait]
pub trait IssueStore: Send + Sync {
    async fn get_issue(&self, issue_id: IssueId) -> StoreResult<IssueSnapshot>;

    async fn get_current_status(&self, issue_id: IssueId) -> StoreResult<StatusId> {
        Ok(self.get_issue(issue_id).await?.current_status)
    }

    /// Compare-and-set: fails with `StatusMismatch` unless the issue is
    /// currently in `expected`
    async fn set_current_status(
        &self,
        issue_id: IssueId,
        expected: StatusId,
        status_id: StatusId,
    ) -> StoreResult<()>;

    async fn apply_field_update(&self, issue_id: IssueId, field: &str, value: Value)
        -> StoreResult<()>;

    async fn assign(&self, issue_id: IssueId, user_id: Option<UserId>) -> StoreResult<()>;

    async fn set_resolution(&self, issue_id: IssueId, resolution: Option<String>)
        -> StoreResult<()>;

    /// Put the issue back exactly as captured in `snapshot`
    async fn restore(&self, snapshot: &IssueSnapshot) -> StoreResult<()>;

    /// Number of issues currently sitting in `status_id`
    async fn count_issues_in_status(&self, status_id: StatusId) -> StoreResult<usize>;
}

/// Fields that have dedicated store operations and cannot be written through
/// `apply_field_update`
const RESERVED_FIELDS: &[&str] = &["status", "current_status", "issue_type", "assignee", "reporter"];

/// `DashMap`-backed store for embedding and tests
#[derive(Debug, Default)]
pub struct InMemoryIssueStore {
    issues: DashMap<IssueId, IssueSnapshot>,
    rejected_fields: DashMap<String, String>,
}

impl InMemoryIssueStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, issue: IssueSnapshot) -> IssueId {
        let issue_id = issue.id;
        self.issues.insert(issue_id, issue);
        issue_id
    }

    pub fn remove(&self, issue_id: IssueId) -> Option<IssueSnapshot> {
        self.issues.remove(&issue_id).map(|(_, issue)| issue)
    }

    /// Make every subsequent write to `field` fail with `FieldRejected`
    pub fn reject_field(&self, field: impl Into<String>, reason: impl Into<String>) {
        self.rejected_fields.insert(field.into(), reason.into());
    }

    pub fn snapshot(&self, issue_id: IssueId) -> Option<IssueSnapshot> {
        self.issues.get(&issue_id).map(|entry| entry.clone())
    }

    pub fn len(&self) -> usize {
        self.issues.len()
    }

    pub fn is_empty(&self) -> bool {
        self.issues.is_empty()
    }

    fn with_issue<R>(
        &self,
        issue_id: IssueId,
        f: impl FnOnce(&mut IssueSnapshot) -> StoreResult<R>,
    ) -> StoreResult<R> {
        let mut entry = self
            .issues
            .get_mut(&issue_id)
            .ok_or(StoreError::IssueNotFound { issue_id })?;
        f(entry.value_mut())
    }

    fn check_writable(&self, field: &str) -> StoreResult<()> {
        if let Some(reason) = self.rejected_fields.get(field) {
            return Err(StoreError::FieldRejected {
                field: field.to_string(),
                reason: reason.value().clone(),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl IssueStore for InMemoryIssueStore {
    async fn get_issue(&self, issue_id: IssueId) -> StoreResult<IssueSnapshot> {
        self.snapshot(issue_id)
            .ok_or(StoreError::IssueNotFound { issue_id })
    }

    async fn set_current_status(
        &self,
        issue_id: IssueId,
        expected: StatusId,
        status_id: StatusId,
    ) -> StoreResult<()> {
        self.with_issue(issue_id, |issue| {
            if issue.current_status != expected {
                return Err(StoreError::StatusMismatch {
                    issue_id,
                    expected,
                    actual: issue.current_status,
                });
            }
            issue.current_status = status_id;
            Ok(())
        })
    }

    async fn apply_field_update(
        &self,
        issue_id: IssueId,
        field: &str,
        value: Value,
    ) -> StoreResult<()> {
        if RESERVED_FIELDS.contains(&field) {
            return Err(StoreError::FieldRejected {
                field: field.to_string(),
                reason: "field is managed by a dedicated operation".to_string(),
            });
        }
        self.check_writable(field)?;
        if field == "resolution" {
            let resolution = match value {
                Value::Null => None,
                Value::String(resolution) => Some(resolution),
                other => {
                    return Err(StoreError::FieldRejected {
                        field: field.to_string(),
                        reason: format!("resolution must be a string, got {other}"),
                    })
                }
            };
            return self.with_issue(issue_id, |issue| {
                issue.resolution = resolution;
                Ok(())
            });
        }
        self.with_issue(issue_id, |issue| {
            issue.fields.insert(field.to_string(), value);
            Ok(())
        })
    }

    async fn assign(&self, issue_id: IssueId, user_id: Option<UserId>) -> StoreResult<()> {
        self.check_writable("assignee")?;
        self.with_issue(issue_id, |issue| {
            issue.assignee = user_id;
            Ok(())
        })
    }

    async fn set_resolution(
        &self,
        issue_id: IssueId,
        resolution: Option<String>,
    ) -> StoreResult<()> {
        self.check_writable("resolution")?;
        self.with_issue(issue_id, |issue| {
            issue.resolution = resolution;
            Ok(())
        })
    }

    async fn restore(&self, snapshot: &IssueSnapshot) -> StoreResult<()> {
        self.with_issue(snapshot.id, |issue| {
            *issue = snapshot.clone();
            Ok(())
        })
    }

    async fn count_issues_in_status(&self, status_id: StatusId) -> StoreResult<usize> {
        Ok(self
            .issues
            .iter()
            .filter(|entry| entry.current_status == status_id)
            .count())
    }
}
