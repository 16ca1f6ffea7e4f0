#![allow(clippy::missing_errors_doc)] // Allow public functions without # Errors sections
#![allow(clippy::must_use_candidate)] // Allow methods without must_use when context is clear

//! # Issue Workflow Core
//!
//! Configurable, per-organization workflow engine for issue tracking.
//!
//! ## Overview
//!
//! Administrators model how issues move through a lifecycle as a directed
//! graph of **statuses** joined by **transitions**. Each transition carries
//! three ordered pipelines:
//!
//! - **Conditions** decide whether the transition is offered to an actor
//! - **Validators** block execution until the request is complete
//! - **Post-functions** run after the status change: assignment, field
//!   updates, resolution, notification and webhook hand-offs
//!
//! Projects pick a workflow per issue type through a **workflow scheme**.
//!
//! ## Module Organization
//!
//! - [`models`] - Statuses, transitions, workflows, schemes and issue snapshots
//! - [`state_machine`] - Runtime engine: guards, actions, persistence seam, events
//! - [`services`] - Configuration service and membership directory
//! - [`registry`] - Versioned workflow snapshots and named rule extensions
//! - [`events`] - Outbound dispatch and broadcast publisher
//! - [`config`] - Layered engine configuration
//! - [`logging`] - Structured logging setup
//! - [`error`] - Crate error type with stable boundary codes
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use issue_workflow::config::EngineConfig;
//! use issue_workflow::events::EventPublisher;
//! use issue_workflow::models::{
//!     IssueSnapshot, IssueTypeId, NewStatus, NewTransition, OrganizationId, ProjectId,
//!     StatusCategory, UserId,
//! };
//! use issue_workflow::registry::WorkflowRegistry;
//! use issue_workflow::services::{InMemoryDirectory, OrganizationRole, TransitionConfigurationService};
//! use issue_workflow::state_machine::{InMemoryIssueStore, TransitionContext, WorkflowEngine};
//! use std::sync::Arc;
//!
//! # async fn example() -> Result<(), issue_workflow::WorkflowError> {
//! let registry = Arc::new(WorkflowRegistry::new());
//! let store = Arc::new(InMemoryIssueStore::new());
//! let directory = Arc::new(InMemoryDirectory::new());
//!
//! let org = OrganizationId::new();
//! let admin = UserId::new();
//! directory.grant_organization_role(org, admin, OrganizationRole::Owner);
//!
//! let config = EngineConfig::default();
//! let service = TransitionConfigurationService::new(registry.clone(), store.clone(), directory.clone())
//!     .with_config(&config);
//! let workflow = service
//!     .create_workflow(admin, org, "Software", "", NewStatus::new("To Do", StatusCategory::ToDo))
//!     .await?;
//! let todo = workflow.initial_status()?.id;
//! let done = service
//!     .add_status(admin, workflow.id, NewStatus::new("Done", StatusCategory::Done))
//!     .await?;
//! let finish = service
//!     .add_transition(admin, workflow.id, NewTransition::new("Finish", todo, done))
//!     .await?;
//!
//! let project = ProjectId::new();
//! let bug = IssueTypeId::new();
//! service.create_scheme(admin, project, "Default", workflow.id).await?;
//! directory.add_member(project, admin);
//!
//! let engine = WorkflowEngine::new(
//!     registry,
//!     store.clone(),
//!     directory,
//!     Arc::new(EventPublisher::from_config(&config)),
//!     config,
//! );
//! let issue_id = store.insert(IssueSnapshot::new(project, bug, todo));
//! let outcome = engine
//!     .transition_issue(issue_id, finish, admin, TransitionContext::default())
//!     .await;
//! assert_eq!(outcome.new_status(), Some(done));
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod constants;
pub mod error;
pub mod events;
pub mod logging;
pub mod models;
pub mod registry;
pub mod services;
pub mod state_machine;

pub use config::{ConfigManager, EngineConfig, PostFunctionFailurePolicy, WorkflowConfig};
pub use error::{ErrorDetail, Result, WorkflowError};
pub use models::{
    GraphIntegrityError, IssueSnapshot, SchemeResolutionError, Status, Transition, Workflow,
    WorkflowScheme,
};
pub use registry::{RuleRegistry, WorkflowRegistry};
pub use services::{MembershipDirectory, TransitionConfigurationService};
pub use state_machine::{
    IssueStore, TransitionContext, TransitionOutcome, WorkflowEngine, WorkflowEvent,
};
