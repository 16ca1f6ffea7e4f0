//! # Transition Context
//!
//! Input the actor supplies alongside a transition request.
//!
//! Validators read from it (a resolution, a comment, required field values),
//! post-functions can draw values from it (`FieldValue::FromContext`,
//! `SetResolution { resolution: None }`), and its comment and correlation id
//! are recorded on the `issue.transitioned` event.
//!
//! ```rust
//! use issue_workflow::state_machine::TransitionContext;
//! use serde_json::json;
//!
//! let context = TransitionContext::default()
//!     .with_resolution("fixed")
//!     .with_comment("Deployed in 4.2")
//!     .with_field("fix_version", json!("4.2"));
//!
//! assert_eq!(context.resolution.as_deref(), Some("fixed"));
//! assert!(context.has_comment());
//! ```

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use uuid::Uuid;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TransitionContext {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resolution: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,

    /// Field values submitted with the transition screen
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub fields: BTreeMap<String, Value>,

    /// Correlation ID for distributed tracing.
    /// Links this transition to the original request across service boundaries.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<Uuid>,
}

impl TransitionContext {
    #[must_use]
    pub fn with_resolution(mut self, resolution: impl Into<String>) -> Self {
        self.resolution = Some(resolution.into());
        self
    }

    #[must_use]
    pub fn with_comment(mut self, comment: impl Into<String>) -> Self {
        self.comment = Some(comment.into());
        self
    }

    #[must_use]
    pub fn with_field(mut self, field: impl Into<String>, value: Value) -> Self {
        self.fields.insert(field.into(), value);
        self
    }

    #[must_use]
    pub fn with_correlation_id(mut self, correlation_id: Uuid) -> Self {
        self.correlation_id = Some(correlation_id);
        self
    }

    /// Resolution supplied by the actor, ignoring blank input
    pub fn supplied_resolution(&self) -> Option<&str> {
        self.resolution.as_deref().filter(|r| !r.trim().is_empty())
    }

    pub fn has_comment(&self) -> bool {
        self.comment
            .as_deref()
            .map(|c| !c.trim().is_empty())
            .unwrap_or(false)
    }

    /// Look up a submitted value; `resolution` and `comment` are addressable
    /// by name as well
    pub fn value(&self, key: &str) -> Option<Value> {
        match key {
            "resolution" => self.supplied_resolution().map(|r| Value::String(r.to_string())),
            "comment" => self.comment.clone().map(Value::String),
            other => self.fields.get(other).cloned(),
        }
    }
}
