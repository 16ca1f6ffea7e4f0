//! # Rule Registry
//!
//! Named extension points referenced from transition pipelines: custom
//! predicates used as conditions and external checks used as validators.
//! Pipelines only store the name; lookups happen at evaluation time, so a
//! missing registration makes the rule fail instead of the configuration.

use crate::state_machine::guards::{CustomPredicate, ExternalCheck};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tracing::info;

#[derive(Default)]
pub struct RuleRegistry {
    predicates: RwLock<HashMap<String, Arc<dyn CustomPredicate>>>,
    external_checks: RwLock<HashMap<String, Arc<dyn ExternalCheck>>>,
}

/// Registry statistics
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuleRegistryStats {
    pub predicates: usize,
    pub external_checks: usize,
}

impl RuleRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register (or replace) a predicate under `name`
    pub fn register_predicate(&self, name: impl Into<String>, predicate: Arc<dyn CustomPredicate>) {
        let name = name.into();
        info!(
            predicate = %name,
            description = predicate.description(),
            "Registered custom predicate"
        );
        self.predicates.write().insert(name, predicate);
    }

    /// Register (or replace) an external check under `name`
    pub fn register_external_check(&self, name: impl Into<String>, check: Arc<dyn ExternalCheck>) {
        let name = name.into();
        info!(
            check = %name,
            description = check.description(),
            "Registered external check"
        );
        self.external_checks.write().insert(name, check);
    }

    pub fn unregister_predicate(&self, name: &str) -> bool {
        self.predicates.write().remove(name).is_some()
    }

    pub fn unregister_external_check(&self, name: &str) -> bool {
        self.external_checks.write().remove(name).is_some()
    }

    pub fn predicate(&self, name: &str) -> Option<Arc<dyn CustomPredicate>> {
        self.predicates.read().get(name).cloned()
    }

    pub fn external_check(&self, name: &str) -> Option<Arc<dyn ExternalCheck>> {
        self.external_checks.read().get(name).cloned()
    }

    pub fn stats(&self) -> RuleRegistryStats {
        RuleRegistryStats {
            predicates: self.predicates.read().len(),
            external_checks: self.external_checks.read().len(),
        }
    }
}

impl fmt::Debug for RuleRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut predicates: Vec<String> = self.predicates.read().keys().cloned().collect();
        let mut checks: Vec<String> = self.external_checks.read().keys().cloned().collect();
        predicates.sort();
        checks.sort();
        f.debug_struct("RuleRegistry")
            .field("predicates", &predicates)
            .field("external_checks", &checks)
            .finish()
    }
}
