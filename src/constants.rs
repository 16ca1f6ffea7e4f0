//! # System Constants
//!
//! Stable identifiers shared between the engine and its callers: error codes
//! that cross the external boundary, event names handed to the dispatcher, and
//! the operational defaults used when no configuration file is present.

/// Error codes carried in `{code, message}` pairs at the boundary
pub mod error_codes {
    pub const INVALID_TRANSITION: &str = "invalid_transition";
    pub const VALIDATION_FAILED: &str = "validation_failed";
    pub const CONDITIONS_NOT_MET: &str = "conditions_not_met";
    pub const NOT_PROJECT_MEMBER: &str = "not_project_member";
    pub const FIELD_REQUIRED: &str = "field_required";
    pub const RESOLUTION_REQUIRED: &str = "resolution_required";
    pub const COMMENT_REQUIRED: &str = "comment_required";
    pub const CUSTOM_FIELD_REQUIRED: &str = "custom_field_required";
    pub const EXTERNAL_CHECK_FAILED: &str = "external_check_failed";
    pub const EXTERNAL_CHECK_TIMEOUT: &str = "external_check_timeout";
    pub const POST_FUNCTION_FAILED: &str = "post_function_failed";
    pub const SCHEME_RESOLUTION_FAILED: &str = "scheme_resolution_failed";
    pub const GRAPH_INTEGRITY: &str = "graph_integrity";
    pub const ISSUE_BUSY: &str = "issue_busy";
    pub const CONCURRENT_MODIFICATION: &str = "concurrent_modification";
    pub const NOT_FOUND: &str = "not_found";
    pub const PERMISSION_DENIED: &str = "permission_denied";
    pub const STORE_ERROR: &str = "store_error";
    pub const DIRECTORY_ERROR: &str = "directory_error";
    pub const CONFIGURATION_ERROR: &str = "configuration_error";
}

/// Event names published through the event publisher
pub mod events {
    pub const ISSUE_TRANSITIONED: &str = "issue.transitioned";
    pub const NOTIFICATION_REQUESTED: &str = "notification.requested";
    pub const WEBHOOK_REQUESTED: &str = "webhook.requested";
    pub const WORKFLOW_PUBLISHED: &str = "workflow.published";
}

/// System-wide defaults
pub mod system {
    pub const ISSUE_WORKFLOW_VERSION: &str = env!("CARGO_PKG_VERSION");

    /// How long a transition request waits for another in-flight transition
    /// on the same issue before giving up
    pub const DEFAULT_LOCK_TIMEOUT_MS: u64 = 5_000;

    /// Upper bound for external checks, directory lookups and hand-off dispatch
    pub const DEFAULT_EXTERNAL_CALL_TIMEOUT_MS: u64 = 2_000;

    pub const DEFAULT_EVENT_CHANNEL_CAPACITY: usize = 1_000;

    /// Name of the config file looked up in the config directory
    pub const CONFIG_FILE_STEM: &str = "workflow-engine";

    /// Prefix for environment variable overrides (`ISSUE_WORKFLOW__ENGINE__LOCK_TIMEOUT_MS`)
    pub const ENV_PREFIX: &str = "ISSUE_WORKFLOW";
}
