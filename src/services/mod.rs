pub mod configuration_service;
pub mod directory;

pub use configuration_service::TransitionConfigurationService;
pub use directory::{
    DirectoryError, DirectoryResult, InMemoryDirectory, MembershipDirectory, OrganizationRole,
};
