//! # Membership Directory
//!
//! Read-only view of project roles, project membership, project leads and
//! organization roles. The engine loads these facts once per call into an
//! [`Actor`](crate::models::Actor), so condition evaluation never waits on
//! the directory.

use crate::error::WorkflowError;
use crate::models::{OrganizationId, ProjectId, UserId};
use async_trait::async_trait;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DirectoryError {
    #[error("Membership directory unavailable: {0}")]
    Unavailable(String),

    #[error("Membership lookup timed out after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },
}

impl From<DirectoryError> for WorkflowError {
    fn from(err: DirectoryError) -> Self {
        WorkflowError::Directory(err.to_string())
    }
}

pub type DirectoryResult<T> = Result<T, DirectoryError>;

/// Role a user holds in an organization
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrganizationRole {
    Owner,
    Admin,
    Member,
}

impl OrganizationRole {
    /// Owners and admins may change workflow configuration
    pub fn can_administer_workflows(&self) -> bool {
        matches!(self, Self::Owner | Self::Admin)
    }
}

impl fmt::Display for OrganizationRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Owner => write!(f, "owner"),
            Self::Admin => write!(f, "admin"),
            Self::Member => write!(f, "member"),
        }
    }
}

impl FromStr for OrganizationRole {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "owner" => Ok(Self::Owner),
            "admin" => Ok(Self::Admin),
            "member" => Ok(Self::Member),
            _ => Err(format!("Invalid organization role: {s}")),
        }
    }
}

#[async_trait]
pub trait MembershipDirectory: Send + Sync {
    /// Role name the user holds in the project, if any
    async fn project_role(
        &self,
        project_id: ProjectId,
        user_id: UserId,
    ) -> DirectoryResult<Option<String>>;

    async fn is_project_member(&self, project_id: ProjectId, user_id: UserId)
        -> DirectoryResult<bool>;

    async fn project_lead(&self, project_id: ProjectId) -> DirectoryResult<Option<UserId>>;

    async fn organization_role(
        &self,
        organization_id: OrganizationId,
        user_id: UserId,
    ) -> DirectoryResult<Option<OrganizationRole>>;
}

/// In-memory directory for embedding and tests
#[derive(Debug, Default)]
pub struct InMemoryDirectory {
    project_roles: DashMap<(ProjectId, UserId), String>,
    project_members: DashMap<(ProjectId, UserId), ()>,
    project_leads: DashMap<ProjectId, UserId>,
    organization_roles: DashMap<(OrganizationId, UserId), OrganizationRole>,
}

impl InMemoryDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add `user_id` to the project without a role
    pub fn add_member(&self, project_id: ProjectId, user_id: UserId) {
        self.project_members.insert((project_id, user_id), ());
    }

    /// Grant a project role; implies membership
    pub fn grant_project_role(&self, project_id: ProjectId, user_id: UserId, role: impl Into<String>) {
        self.add_member(project_id, user_id);
        self.project_roles.insert((project_id, user_id), role.into());
    }

    pub fn remove_member(&self, project_id: ProjectId, user_id: UserId) {
        self.project_members.remove(&(project_id, user_id));
        self.project_roles.remove(&(project_id, user_id));
    }

    pub fn set_project_lead(&self, project_id: ProjectId, user_id: UserId) {
        self.project_leads.insert(project_id, user_id);
    }

    pub fn grant_organization_role(
        &self,
        organization_id: OrganizationId,
        user_id: UserId,
        role: OrganizationRole,
    ) {
        self.organization_roles.insert((organization_id, user_id), role);
    }
}

#[async_trait]
impl MembershipDirectory for InMemoryDirectory {
    async fn project_role(
        &self,
        project_id: ProjectId,
        user_id: UserId,
    ) -> DirectoryResult<Option<String>> {
        Ok(self
            .project_roles
            .get(&(project_id, user_id))
            .map(|role| role.value().clone()))
    }

    async fn is_project_member(
        &self,
        project_id: ProjectId,
        user_id: UserId,
    ) -> DirectoryResult<bool> {
        Ok(self.project_members.contains_key(&(project_id, user_id)))
    }

    async fn project_lead(&self, project_id: ProjectId) -> DirectoryResult<Option<UserId>> {
        Ok(self.project_leads.get(&project_id).map(|lead| *lead.value()))
    }

    async fn organization_role(
        &self,
        organization_id: OrganizationId,
        user_id: UserId,
    ) -> DirectoryResult<Option<OrganizationRole>> {
        Ok(self
            .organization_roles
            .get(&(organization_id, user_id))
            .map(|role| *role.value()))
    }
}
