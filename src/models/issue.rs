//! Issue and actor views used by the engine.
//!
//! The issue record is owned by the issue-management collaborator; the engine
//! only ever sees a snapshot read through [`IssueStore`](crate::state_machine::IssueStore).

use super::ids::{IssueId, IssueTypeId, ProjectId, StatusId, UserId};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// Point-in-time view of an issue
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IssueSnapshot {
    pub id: IssueId,
    pub project_id: ProjectId,
    pub issue_type: IssueTypeId,
    pub current_status: StatusId,
    pub assignee: Option<UserId>,
    pub reporter: Option<UserId>,
    pub resolution: Option<String>,
    #[serde(default)]
    pub fields: BTreeMap<String, Value>,
    #[serde(default)]
    pub custom_fields: BTreeMap<String, Value>,
}

impl IssueSnapshot {
    pub fn new(
        project_id: ProjectId,
        issue_type: IssueTypeId,
        current_status: StatusId,
    ) -> Self {
        Self {
            id: IssueId::new(),
            project_id,
            issue_type,
            current_status,
            assignee: None,
            reporter: None,
            resolution: None,
            fields: BTreeMap::new(),
            custom_fields: BTreeMap::new(),
        }
    }

    /// Resolve a field by name. Built-in attributes shadow entries in `fields`.
    pub fn field_value(&self, field: &str) -> Option<Value> {
        match field {
            "assignee" => self.assignee.map(|u| Value::String(u.to_string())),
            "reporter" => self.reporter.map(|u| Value::String(u.to_string())),
            "resolution" => self.resolution.clone().map(Value::String),
            "status" | "current_status" => Some(Value::String(self.current_status.to_string())),
            "issue_type" => Some(Value::String(self.issue_type.to_string())),
            other => self.fields.get(other).cloned(),
        }
    }

    pub fn custom_field(&self, key: &str) -> Option<&Value> {
        self.custom_fields.get(key)
    }

    pub fn has_resolution(&self) -> bool {
        self.resolution
            .as_deref()
            .map(|r| !r.trim().is_empty())
            .unwrap_or(false)
    }
}

/// `null`, blank strings and empty collections count as "no value".
/// `false` and `0` are values.
pub fn is_blank(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::String(s) => s.trim().is_empty(),
        Value::Array(items) => items.is_empty(),
        Value::Object(map) => map.is_empty(),
        Value::Bool(_) | Value::Number(_) => false,
    }
}

/// The acting user together with the membership facts conditions need.
///
/// Facts are loaded once per engine call so condition evaluation stays pure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Actor {
    pub user_id: UserId,
    pub project_role: Option<String>,
    pub is_project_member: bool,
}

impl Actor {
    pub fn new(user_id: UserId) -> Self {
        Self {
            user_id,
            project_role: None,
            is_project_member: false,
        }
    }

    /// Member of the project with the given role
    pub fn with_role(user_id: UserId, role: impl Into<String>) -> Self {
        Self {
            user_id,
            project_role: Some(role.into()),
            is_project_member: true,
        }
    }

    pub fn has_role(&self, role: &str) -> bool {
        self.project_role.as_deref() == Some(role)
    }
}
