//! # Registry Infrastructure
//!
//! Shared lookup tables the engine and the configuration service read from.
//!
//! ## Available Registries
//!
//! - **WorkflowRegistry**: versioned snapshots of published workflows and project schemes
//! - **RuleRegistry**: named custom predicates and external checks referenced by pipelines
//!
//! ## Architecture
//!
//! ```text
//! Registry Infrastructure
//! ├── WorkflowRegistry    (Arc snapshots swapped on publish)
//! └── RuleRegistry        (Extension points resolved at evaluation time)
//! ```

pub mod rule_registry;
pub mod workflow_registry;

pub use rule_registry::{RuleRegistry, RuleRegistryStats};
pub use workflow_registry::WorkflowRegistry;
