//! CLI error types with miette diagnostics.
//!
//! Maps `CoreError` and `ConfigError` into user-facing errors with
//! actionable help text.

use miette::Diagnostic;
use thiserror::Error;

use mielelink_config::ConfigError;
use mielelink_core::CoreError;

/// Process exit codes.
pub mod exit_code {
    pub const GENERAL: i32 = 1;
    pub const USAGE: i32 = 2;
    pub const AUTH: i32 = 3;
    pub const NOT_FOUND: i32 = 4;
    pub const RATE_LIMITED: i32 = 5;
    pub const CONNECTION: i32 = 7;
}

#[derive(Debug, Error, Diagnostic)]
pub enum CliError {
    // ── Connection ───────────────────────────────────────────────────

    #[error("Could not reach the Miele cloud: {message}")]
    #[diagnostic(
        code(mielelink::connection_failed),
        help("Check network access to the API base URL, or set base_url in your profile.")
    )]
    ConnectionFailed { message: String },

    #[error("The cloud API answered {status}: {message}")]
    #[diagnostic(code(mielelink::api_error))]
    ApiError { status: u16, message: String },

    #[error("The cloud API is rate limiting this account")]
    #[diagnostic(
        code(mielelink::rate_limited),
        help("Wait a few minutes, or switch to polling with a longer --poll-interval.")
    )]
    RateLimited,

    #[error("The service stopped: {reason}")]
    #[diagnostic(code(mielelink::service_failed))]
    ServiceFailed { reason: String },

    // ── Authentication ───────────────────────────────────────────────

    #[error("Authentication failed: {message}")]
    #[diagnostic(
        code(mielelink::auth_failed),
        help(
            "Verify account, client id and country of the profile.\n\
             Store fresh secrets with: mielelink config set-secret password"
        )
    )]
    AuthFailed { message: String },

    #[error("No {secret} configured for profile '{profile}'")]
    #[diagnostic(
        code(mielelink::no_credentials),
        help(
            "Store it with: mielelink config set-secret <password|client-secret> --profile {profile}\n\
             Or set MIELELINK_PASSWORD / MIELELINK_CLIENT_SECRET."
        )
    )]
    NoCredentials { profile: String, secret: String },

    // ── Resources ────────────────────────────────────────────────────

    #[error("Device or action '{identifier}' not found")]
    #[diagnostic(code(mielelink::not_found))]
    NotFound { identifier: String },

    // ── Validation ───────────────────────────────────────────────────

    #[error("Invalid value for {field}: {reason}")]
    #[diagnostic(code(mielelink::validation))]
    Validation { field: String, reason: String },

    // ── Configuration ────────────────────────────────────────────────

    #[error("Profile '{name}' not found in configuration")]
    #[diagnostic(
        code(mielelink::profile_not_found),
        help(
            "Available profiles: {available}\n\
             Add a [profiles.{name}] table to {path}"
        )
    )]
    ProfileNotFound {
        name: String,
        available: String,
        path: String,
    },

    #[error("Configuration error: {message}")]
    #[diagnostic(code(mielelink::config))]
    Config { message: String },

    #[error("Keyring access failed: {message}")]
    #[diagnostic(code(mielelink::keyring))]
    Keyring { message: String },

    // ── IO / Serialization ───────────────────────────────────────────

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("Invalid replay file {path}: {source}")]
    #[diagnostic(
        code(mielelink::replay_file),
        help("Expected {{\"event\": \"devices\"|\"actions\", \"data\": {{...}}}} or an array of them.")
    )]
    ReplayFile {
        path: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("Internal error: {0}")]
    #[diagnostic(code(mielelink::internal))]
    Internal(String),
}

impl CliError {
    /// Map this error to an exit code for process termination.
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::ConnectionFailed { .. } | Self::ServiceFailed { .. } => exit_code::CONNECTION,
            Self::AuthFailed { .. } | Self::NoCredentials { .. } => exit_code::AUTH,
            Self::NotFound { .. } => exit_code::NOT_FOUND,
            Self::RateLimited => exit_code::RATE_LIMITED,
            Self::Validation { .. }
            | Self::ProfileNotFound { .. }
            | Self::Config { .. }
            | Self::ReplayFile { .. } => exit_code::USAGE,
            _ => exit_code::GENERAL,
        }
    }
}

// ── CoreError → CliError mapping ─────────────────────────────────────

impl From<CoreError> for CliError {
    fn from(err: CoreError) -> Self {
        match err {
            CoreError::AuthError { message } => Self::AuthFailed { message },
            CoreError::RateLimited => Self::RateLimited,
            CoreError::ServerError { status, message } | CoreError::Rejected { status, message } => {
                Self::ApiError { status, message }
            }
            CoreError::NotFoundDeviceOrAction { identifier } => Self::NotFound { identifier },
            CoreError::TransportError { message } => Self::ConnectionFailed { message },
            CoreError::InvalidCommand { message } => Self::Validation {
                field: "command".into(),
                reason: message,
            },
            CoreError::Config { message } => Self::Config { message },
            other @ (CoreError::NotRunning | CoreError::Cancelled) => Self::ServiceFailed {
                reason: other.to_string(),
            },
            CoreError::Internal(message) => Self::Internal(message),
        }
    }
}

// ── ConfigError → CliError mapping ───────────────────────────────────

impl From<ConfigError> for CliError {
    fn from(err: ConfigError) -> Self {
        match err {
            ConfigError::Validation { field, reason } => Self::Validation { field, reason },
            ConfigError::NoCredentials { profile, secret } => {
                Self::NoCredentials { profile, secret }
            }
            ConfigError::ProfileNotFound { name, available } => Self::ProfileNotFound {
                name,
                available,
                path: mielelink_config::config_path().display().to_string(),
            },
            ConfigError::Keyring(e) => Self::Keyring {
                message: e.to_string(),
            },
            ConfigError::Io(e) => Self::Io(e),
            other @ (ConfigError::Serialization(_) | ConfigError::Figment(_)) => Self::Config {
                message: other.to_string(),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn auth_failures_exit_with_auth_code() {
        let err = CliError::from(CoreError::AuthError {
            message: "invalid_grant".into(),
        });
        assert_eq!(err.exit_code(), exit_code::AUTH);
    }

    #[test]
    fn missing_profile_is_a_usage_error() {
        let err = CliError::from(ConfigError::ProfileNotFound {
            name: "home".into(),
            available: "none".into(),
        });
        assert_eq!(err.exit_code(), exit_code::USAGE);
    }
}
