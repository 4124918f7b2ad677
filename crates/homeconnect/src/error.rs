//! CLI error types with miette diagnostics.
//!
//! Maps `CoreError` and `ConfigError` into user-facing errors with
//! actionable help text.

use miette::Diagnostic;
use thiserror::Error;

use homeconnect_config::ConfigError;
use homeconnect_core::CoreError;

/// Process exit codes.
pub mod exit_code {
    pub const GENERAL: i32 = 1;
    pub const USAGE: i32 = 2;
    pub const AUTH: i32 = 3;
    pub const NOT_FOUND: i32 = 4;
    pub const PERMISSION: i32 = 5;
    pub const PRECONDITION: i32 = 6;
    pub const CONNECTION: i32 = 7;
    pub const TIMEOUT: i32 = 8;
}

#[derive(Debug, Error, Diagnostic)]
pub enum CliError {
    // ── Connection ───────────────────────────────────────────────────
    #[error("Could not reach Home Connect at {url}")]
    #[diagnostic(
        code(homeconnect::connection_failed),
        help("Check your network connection.\n{reason}")
    )]
    ConnectionFailed { url: String, reason: String },

    #[error("Rate limited by Home Connect")]
    #[diagnostic(
        code(homeconnect::rate_limited),
        help("Retry in {retry_after_secs}s. The API allows roughly 1000 calls per day.")
    )]
    RateLimited { retry_after_secs: u64 },

    // ── Authentication ───────────────────────────────────────────────
    #[error("Authentication failed: {message}")]
    #[diagnostic(
        code(homeconnect::auth_failed),
        help("Stored tokens were rejected. Run: homeconnect auth login --profile {profile}")
    )]
    AuthFailed { profile: String, message: String },

    #[error("No tokens stored for profile '{profile}'")]
    #[diagnostic(
        code(homeconnect::not_logged_in),
        help("Run: homeconnect auth login --profile {profile}")
    )]
    NotLoggedIn { profile: String },

    #[error("OAuth client is misconfigured: {message}")]
    #[diagnostic(code(homeconnect::client_misconfigured), help("{help}"))]
    ClientMisconfigured { message: String, help: String },

    #[error("Authorisation was not completed within {seconds}s")]
    #[diagnostic(
        code(homeconnect::login_timeout),
        help("Run the login again and approve access before the code expires.")
    )]
    LoginTimeout { seconds: u64 },

    // ── Appliances ───────────────────────────────────────────────────
    #[error("{resource_type} '{identifier}' not found")]
    #[diagnostic(
        code(homeconnect::not_found),
        help("Run: homeconnect {list_command} to see what is available")
    )]
    NotFound {
        resource_type: String,
        identifier: String,
        list_command: String,
    },

    #[error("Scope '{scope}' has not been granted for {ha_id}")]
    #[diagnostic(
        code(homeconnect::scope),
        help("Add the scope to the profile's `scopes`, then run: homeconnect auth login")
    )]
    ScopeMissing { ha_id: String, scope: String },

    #[error("{message}")]
    #[diagnostic(code(homeconnect::precondition), help("{help}"))]
    Precondition { message: String, help: String },

    // ── API ──────────────────────────────────────────────────────────
    #[error("API error ({code}): {message}")]
    #[diagnostic(code(homeconnect::api_error))]
    ApiError { code: String, message: String },

    // ── Validation ───────────────────────────────────────────────────
    #[error("Invalid value for {field}: {reason}")]
    #[diagnostic(code(homeconnect::validation))]
    Validation { field: String, reason: String },

    // ── Configuration ────────────────────────────────────────────────
    #[error("Profile '{name}' not found in configuration")]
    #[diagnostic(
        code(homeconnect::profile_not_found),
        help(
            "Available profiles: {available}\n\
             Create one with: homeconnect config init --client-id <ID>"
        )
    )]
    ProfileNotFound { name: String, available: String },

    #[error("No client id configured for profile '{profile}'")]
    #[diagnostic(
        code(homeconnect::no_config),
        help(
            "Create a profile with: homeconnect config init --client-id <ID>\n\
             Expected at: {path}"
        )
    )]
    NoConfig { profile: String, path: String },

    #[error("Configuration error: {0}")]
    #[diagnostic(code(homeconnect::config))]
    Config(String),

    // ── Timeout ──────────────────────────────────────────────────────
    #[error("Timed out after {seconds}s")]
    #[diagnostic(
        code(homeconnect::timeout),
        help("Increase the limit with --timeout or --discovery-timeout.")
    )]
    Timeout { seconds: u64 },

    // ── IO / Serialization ────────────────────────────────────────────
    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("Invalid JSON: {0}")]
    #[diagnostic(code(homeconnect::json))]
    Json(#[from] serde_json::Error),
}

impl CliError {
    /// Map this error to an exit code for process termination.
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::ConnectionFailed { .. } | Self::RateLimited { .. } => exit_code::CONNECTION,
            Self::AuthFailed { .. }
            | Self::NotLoggedIn { .. }
            | Self::ClientMisconfigured { .. }
            | Self::LoginTimeout { .. } => exit_code::AUTH,
            Self::NotFound { .. } => exit_code::NOT_FOUND,
            Self::ScopeMissing { .. } => exit_code::PERMISSION,
            Self::Precondition { .. } => exit_code::PRECONDITION,
            Self::Timeout { .. } => exit_code::TIMEOUT,
            Self::Validation { .. } => exit_code::USAGE,
            _ => exit_code::GENERAL,
        }
    }
}

// ── CoreError → CliError mapping ─────────────────────────────────────

impl From<CoreError> for CliError {
    fn from(err: CoreError) -> Self {
        let message = err.to_string();
        match err {
            CoreError::ConnectionFailed { url, reason } => CliError::ConnectionFailed { url, reason },

            CoreError::AuthenticationFailed { message } => CliError::AuthFailed {
                profile: "current".into(),
                message,
            },

            CoreError::NotAuthorised => CliError::NotLoggedIn {
                profile: "current".into(),
            },

            CoreError::RateLimited { retry_after_secs } => {
                CliError::RateLimited { retry_after_secs }
            }

            CoreError::ClientMisconfigured { message, help } => {
                CliError::ClientMisconfigured { message, help }
            }

            CoreError::Timeout { timeout_secs } => CliError::Timeout {
                seconds: timeout_secs,
            },

            CoreError::ScopeNotAuthorised { ha_id, scope } => {
                CliError::ScopeMissing { ha_id, scope }
            }

            CoreError::Disconnected { .. } => CliError::Precondition {
                message,
                help: "Check that the appliance is powered and online.".into(),
            },

            CoreError::LocalControlActive { .. } => CliError::Precondition {
                message,
                help: "Someone is using the appliance's own controls; try again later.".into(),
            },

            CoreError::RemoteControlDisabled { .. } | CoreError::RemoteStartDisabled { .. } => {
                CliError::Precondition {
                    message,
                    help: "Enable remote control or remote start on the appliance itself.".into(),
                }
            }

            CoreError::NoProgramSelected { ha_id } => CliError::Precondition {
                message,
                help: format!("Select one with: homeconnect programs select {ha_id} <PROGRAM>"),
            },

            CoreError::NoProgramActive { .. } => CliError::Precondition {
                message,
                help: "Nothing is running.".into(),
            },

            CoreError::ApplianceNotFound { ha_id } => CliError::NotFound {
                resource_type: "appliance".into(),
                identifier: ha_id,
                list_command: "appliances".into(),
            },

            CoreError::Api { message, code, .. } => CliError::ApiError {
                code: code.unwrap_or_else(|| "unknown".into()),
                message,
            },

            CoreError::Config { message } | CoreError::Storage { message } => {
                CliError::Config(message)
            }

            CoreError::Internal(message) => CliError::ApiError {
                code: "internal".into(),
                message,
            },
        }
    }
}

// ── ConfigError → CliError mapping ───────────────────────────────────

impl From<ConfigError> for CliError {
    fn from(err: ConfigError) -> Self {
        match err {
            ConfigError::Validation { field, reason } => CliError::Validation { field, reason },
            ConfigError::UnknownProfile { profile } => CliError::ProfileNotFound {
                name: profile,
                available: String::new(),
            },
            ConfigError::NoClientId { profile } => CliError::NoConfig {
                profile,
                path: homeconnect_config::config_path().display().to_string(),
            },
            ConfigError::Io(e) => CliError::Io(e),
            other => CliError::Config(other.to_string()),
        }
    }
}
