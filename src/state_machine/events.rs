use crate::constants::events;
use crate::models::{IssueId, StatusId, TransitionId, UserId, WorkflowId};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Messages handed to external systems after a transition commits
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum WorkflowEvent {
    /// Notification job for the notification service
    NotificationRequested {
        issue_id: IssueId,
        transition_id: TransitionId,
        template: String,
        recipients: Vec<UserId>,
        actor: UserId,
    },
    /// Named event for the webhook dispatcher
    WebhookRequested {
        issue_id: IssueId,
        transition_id: TransitionId,
        event: String,
        from_status: StatusId,
        to_status: StatusId,
        actor: UserId,
    },
    /// Audit record of a committed status change
    IssueTransitioned {
        issue_id: IssueId,
        workflow_id: WorkflowId,
        workflow_version: u64,
        transition_id: TransitionId,
        from_status: StatusId,
        to_status: StatusId,
        actor: UserId,
        #[serde(skip_serializing_if = "Option::is_none")]
        comment: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        correlation_id: Option<Uuid>,
    },
}

impl WorkflowEvent {
    /// Get the published event name
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::NotificationRequested { .. } => events::NOTIFICATION_REQUESTED,
            Self::WebhookRequested { .. } => events::WEBHOOK_REQUESTED,
            Self::IssueTransitioned { .. } => events::ISSUE_TRANSITIONED,
        }
    }

    pub fn issue_id(&self) -> IssueId {
        match self {
            Self::NotificationRequested { issue_id, .. }
            | Self::WebhookRequested { issue_id, .. }
            | Self::IssueTransitioned { issue_id, .. } => *issue_id,
        }
    }

    /// JSON body published alongside the event name
    pub fn to_payload(&self) -> Value {
        match serde_json::to_value(self) {
            Ok(Value::Object(mut map)) => map.remove("data").unwrap_or(Value::Null),
            _ => Value::Null,
        }
    }
}
