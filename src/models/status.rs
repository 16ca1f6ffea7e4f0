use super::ids::StatusId;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Coarse grouping used by boards and reports to classify issues
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StatusCategory {
    ToDo,
    InProgress,
    Done,
}

impl StatusCategory {
    /// Check if statuses in this category close out an issue
    pub fn is_done(&self) -> bool {
        matches!(self, Self::Done)
    }
}

impl Default for StatusCategory {
    fn default() -> Self {
        Self::ToDo
    }
}

impl fmt::Display for StatusCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ToDo => write!(f, "todo"),
            Self::InProgress => write!(f, "in_progress"),
            Self::Done => write!(f, "done"),
        }
    }
}

impl std::str::FromStr for StatusCategory {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "todo" => Ok(Self::ToDo),
            "in_progress" => Ok(Self::InProgress),
            "done" => Ok(Self::Done),
            _ => Err(format!("Invalid status category: {s}")),
        }
    }
}

/// A named state an issue can occupy within one workflow
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Status {
    pub id: StatusId,
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub category: StatusCategory,
    pub is_initial: bool,
    #[serde(default = "default_true")]
    pub is_active: bool,
    /// Display order within the workflow
    pub position: i32,
}

fn default_true() -> bool {
    true
}

/// New Status for creation (without generated fields)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewStatus {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub category: StatusCategory,
    #[serde(default)]
    pub is_initial: bool,
    #[serde(default)]
    pub position: i32,
}

impl NewStatus {
    pub fn new(name: impl Into<String>, category: StatusCategory) -> Self {
        Self {
            name: name.into(),
            description: String::new(),
            category,
            is_initial: false,
            position: 0,
        }
    }

    /// Mark this status as the workflow's entry state
    pub fn initial(mut self) -> Self {
        self.is_initial = true;
        self
    }

    pub fn at_position(mut self, position: i32) -> Self {
        self.position = position;
        self
    }

    pub(crate) fn into_status(self) -> Status {
        Status {
            id: StatusId::new(),
            name: self.name,
            description: self.description,
            category: self.category,
            is_initial: self.is_initial,
            is_active: true,
            position: self.position,
        }
    }
}

/// Partial update for an existing status; `None` leaves the field unchanged
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StatusUpdate {
    pub name: Option<String>,
    pub description: Option<String>,
    pub category: Option<StatusCategory>,
    pub is_active: Option<bool>,
    pub position: Option<i32>,
}
