//! Strongly typed identifiers.
//!
//! Every entity the engine touches is keyed by a UUID wrapped in its own
//! newtype so a `StatusId` can never be passed where a `TransitionId` is
//! expected.

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

macro_rules! define_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub Uuid);

        impl $name {
            /// Generate a fresh random identifier
            pub fn new() -> Self {
                Self(Uuid::new_v4())
            }

            pub fn as_uuid(&self) -> Uuid {
                self.0
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<Uuid> for $name {
            fn from(value: Uuid) -> Self {
                Self(value)
            }
        }
    };
}

define_id!(
    /// Organization owning workflows
    OrganizationId
);
define_id!(
    /// Project owning a workflow scheme
    ProjectId
);
define_id!(WorkflowId);
define_id!(StatusId);
define_id!(TransitionId);
define_id!(SchemeId);
define_id!(
    /// Issue type (bug, story, ...) as defined by the project collaborator
    IssueTypeId
);
define_id!(IssueId);
define_id!(UserId);
