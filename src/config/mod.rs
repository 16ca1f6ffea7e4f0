//! # Engine Configuration
//!
//! Operational settings for the workflow engine: lock and external call
//! timeouts, the post-function failure policy, the membership requirement
//! for executing transitions, and logging output.
//!
//! Every field has a default, so an absent configuration file yields a
//! working engine. Values are layered by [`ConfigManager`]:
//!
//! 1. `config/workflow-engine.toml`
//! 2. `config/workflow-engine.{environment}.toml`
//! 3. `ISSUE_WORKFLOW__SECTION__KEY` environment variables
//!
//! ## Usage
//!
//! ```rust,no_run
//! use issue_workflow::config::ConfigManager;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let manager = ConfigManager::load()?;
//! let lock_timeout = manager.config().engine.lock_timeout();
//! # Ok(())
//! # }
//! ```

pub mod error;
pub mod loader;

use crate::constants::system;
use crate::models::PostFunctionKind;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

pub use error::{ConfigResult, ConfigurationError};
pub use loader::ConfigManager;

/// Root configuration structure mirroring `workflow-engine.toml`
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct WorkflowConfig {
    pub engine: EngineConfig,
    pub logging: LoggingConfig,
}

impl WorkflowConfig {
    /// Validate configuration after loading
    pub fn validate(&self) -> ConfigResult<()> {
        self.engine.validate()?;
        self.logging.validate()
    }
}

/// What happens to a committed status change when a post-function fails
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PostFunctionFailurePolicy {
    /// Data-mutating post-functions roll back; hand-offs fail forward
    #[default]
    ByKind,
    /// Any failure rolls back
    Strict,
    /// Nothing rolls back; remaining post-functions still run
    FailForward,
}

impl PostFunctionFailurePolicy {
    /// Whether a failure of `post_function` reverts the transition
    pub fn rolls_back(&self, post_function: &PostFunctionKind) -> bool {
        match self {
            Self::ByKind => !post_function.is_hand_off(),
            Self::Strict => true,
            Self::FailForward => false,
        }
    }
}

impl fmt::Display for PostFunctionFailurePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ByKind => write!(f, "by_kind"),
            Self::Strict => write!(f, "strict"),
            Self::FailForward => write!(f, "fail_forward"),
        }
    }
}

/// Runtime behaviour of the engine
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct EngineConfig {
    /// How long `transition_issue` waits for another in-flight transition on
    /// the same issue
    pub lock_timeout_ms: u64,
    /// Bound for external checks, directory lookups and hand-off dispatch
    pub external_call_timeout_ms: u64,
    pub post_function_failure_policy: PostFunctionFailurePolicy,
    /// Only project members may execute transitions
    pub require_project_membership: bool,
    pub event_channel_capacity: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            lock_timeout_ms: system::DEFAULT_LOCK_TIMEOUT_MS,
            external_call_timeout_ms: system::DEFAULT_EXTERNAL_CALL_TIMEOUT_MS,
            post_function_failure_policy: PostFunctionFailurePolicy::default(),
            require_project_membership: true,
            event_channel_capacity: system::DEFAULT_EVENT_CHANNEL_CAPACITY,
        }
    }
}

impl EngineConfig {
    pub fn lock_timeout(&self) -> Duration {
        Duration::from_millis(self.lock_timeout_ms)
    }

    pub fn external_call_timeout(&self) -> Duration {
        Duration::from_millis(self.external_call_timeout_ms)
    }

    pub fn validate(&self) -> ConfigResult<()> {
        if self.lock_timeout_ms == 0 {
            return Err(ConfigurationError::invalid_value(
                "engine.lock_timeout_ms",
                "0",
                "lock timeout must be greater than 0",
            ));
        }

        if self.external_call_timeout_ms == 0 {
            return Err(ConfigurationError::invalid_value(
                "engine.external_call_timeout_ms",
                "0",
                "external call timeout must be greater than 0",
            ));
        }

        if self.event_channel_capacity == 0 {
            return Err(ConfigurationError::invalid_value(
                "engine.event_channel_capacity",
                "0",
                "event channel capacity must be greater than 0",
            ));
        }

        Ok(())
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub format: LogFormat,
    /// Default filter directive when `RUST_LOG` is unset; empty picks one
    /// from the environment
    pub level: String,
}

impl LoggingConfig {
    pub fn validate(&self) -> ConfigResult<()> {
        const LEVELS: &[&str] = &["", "trace", "debug", "info", "warn", "error"];
        if !LEVELS.contains(&self.level.to_lowercase().as_str()) {
            return Err(ConfigurationError::invalid_value(
                "logging.level",
                self.level.clone(),
                "expected one of trace, debug, info, warn, error",
            ));
        }
        Ok(())
    }
}
