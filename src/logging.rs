//! # Structured Logging Module
//!
//! Environment-aware structured logging for transition execution and
//! configuration changes. Console output is human readable by default;
//! `logging.format = "json"` switches to one JSON object per line.

use crate::config::{LogFormat, LoggingConfig};
use chrono::Utc;
use std::sync::OnceLock;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

static LOGGER_INITIALIZED: OnceLock<()> = OnceLock::new();

/// Initialize structured logging with environment-specific defaults
pub fn init_structured_logging() {
    init_with_config(&LoggingConfig::default());
}

/// Initialize structured logging from loaded configuration.
/// Only the first call in a process has any effect.
pub fn init_with_config(config: &LoggingConfig) {
    LOGGER_INITIALIZED.get_or_init(|| {
        let environment = get_environment();
        let log_level = if config.level.is_empty() {
            get_log_level(&environment).to_string()
        } else {
            config.level.to_lowercase()
        };

        // RUST_LOG wins over configured level
        let filter =
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&log_level));

        let (pretty, json) = match config.format {
            LogFormat::Pretty => (
                Some(
                    fmt::layer()
                        .with_target(true)
                        .with_thread_ids(true)
                        .with_level(true),
                ),
                None,
            ),
            LogFormat::Json => (
                None,
                Some(
                    fmt::layer()
                        .with_target(true)
                        .with_thread_ids(true)
                        .with_level(true)
                        .with_ansi(false)
                        .json(),
                ),
            ),
        };

        // Use try_init to avoid panic if a global subscriber is already set
        if tracing_subscriber::registry()
            .with(filter)
            .with(pretty)
            .with(json)
            .try_init()
            .is_err()
        {
            tracing::debug!("Global tracing subscriber already initialized - continuing with existing subscriber");
        }

        tracing::info!(
            environment = %environment,
            level = %log_level,
            format = ?config.format,
            "Structured logging initialized"
        );
    });
}

/// Get current environment from environment variables
fn get_environment() -> String {
    std::env::var("ISSUE_WORKFLOW_ENV")
        .or_else(|_| std::env::var("APP_ENV"))
        .unwrap_or_else(|_| "development".to_string())
}

/// Get log level based on environment
fn get_log_level(environment: &str) -> &'static str {
    match environment {
        "production" => "info",
        _ => "debug",
    }
}

/// Log structured data for transition execution
pub fn log_transition_operation(
    operation: &str,
    issue_id: &str,
    transition_id: Option<&str>,
    workflow_version: Option<u64>,
    status: &str,
    details: Option<&str>,
) {
    tracing::info!(
        operation = %operation,
        issue_id = %issue_id,
        transition_id = transition_id,
        workflow_version = workflow_version,
        status = %status,
        details = details,
        timestamp = %Utc::now().to_rfc3339(),
        "TRANSITION_OPERATION"
    );
}

/// Log structured data for configuration service operations
pub fn log_configuration_operation(
    operation: &str,
    workflow_id: Option<&str>,
    version: Option<u64>,
    actor: &str,
    status: &str,
    details: Option<&str>,
) {
    tracing::info!(
        operation = %operation,
        workflow_id = workflow_id,
        version = version,
        actor = %actor,
        status = %status,
        details = details,
        timestamp = %Utc::now().to_rfc3339(),
        "CONFIGURATION_OPERATION"
    );
}

/// Log error with full context
pub fn log_error(component: &str, operation: &str, error: &str, context: Option<&str>) {
    tracing::error!(
        component = %component,
        operation = %operation,
        error = %error,
        context = context,
        timestamp = %Utc::now().to_rfc3339(),
        "ERROR"
    );
}
