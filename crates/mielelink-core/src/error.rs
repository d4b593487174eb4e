// ── Core error types ──
//
// Domain errors from mielelink-core. Consumers never see reqwest errors
// or raw JSON failures directly: the `From<mielelink_api::Error>` impl
// folds transport-layer failures into the taxonomy below.

use thiserror::Error;

/// Unified error type for the core crate.
#[derive(Debug, Error)]
pub enum CoreError {
    // ── Session errors ───────────────────────────────────────────────
    /// Credentials or tokens were refused. Fatal: the supervisor stops.
    #[error("Authentication failed: {message}")]
    AuthError { message: String },

    // ── Remote errors ────────────────────────────────────────────────
    #[error("Rate limited -- endpoint currently not available")]
    RateLimited,

    #[error("{message}")]
    ServerError { status: u16, message: String },

    #[error("Device or action not found: {identifier}")]
    NotFoundDeviceOrAction { identifier: String },

    #[error("Transport error: {message}")]
    TransportError { message: String },

    /// The cloud refused a request; `message` is its own explanation.
    #[error("{message}")]
    Rejected { status: u16, message: String },

    // ── Local errors ─────────────────────────────────────────────────
    #[error("Invalid command: {message}")]
    InvalidCommand { message: String },

    #[error("Configuration error: {message}")]
    Config { message: String },

    #[error("Service is not running")]
    NotRunning,

    #[error("Service is shutting down")]
    Cancelled,

    #[error("Internal error: {0}")]
    Internal(String),
}

impl CoreError {
    /// `true` for failures that end the service.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::AuthError { .. } | Self::Config { .. })
    }
}

// ── Conversion from transport-layer errors ───────────────────────────

impl From<mielelink_api::Error> for CoreError {
    fn from(err: mielelink_api::Error) -> Self {
        use mielelink_api::Error as Api;

        match err {
            Api::Authentication { message } => CoreError::AuthError { message },
            Api::RateLimited => CoreError::RateLimited,
            Api::Server { status, message } => CoreError::ServerError { status, message },
            Api::NotFound { path } => CoreError::NotFoundDeviceOrAction { identifier: path },
            Api::Rejected { status, message } => CoreError::Rejected { status, message },
            Api::Transport(e) => CoreError::TransportError {
                message: e.to_string(),
            },
            Api::EventStream(message) => CoreError::TransportError { message },
            Api::InvalidUrl(e) => CoreError::Config {
                message: format!("Invalid URL: {e}"),
            },
            Api::Tls(message) => CoreError::Config { message },
            Api::Deserialization { message, .. } => CoreError::Internal(format!(
                "unexpected response shape: {message}"
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn api_rejection_keeps_server_message_verbatim() {
        let err: CoreError = mielelink_api::Error::Rejected {
            status: 400,
            message: "busy".into(),
        }
        .into();
        assert_eq!(err.to_string(), "busy");
        assert!(!err.is_fatal());
    }

    #[test]
    fn api_auth_failure_is_fatal() {
        let err: CoreError = mielelink_api::Error::Authentication {
            message: "invalid_grant".into(),
        }
        .into();
        assert!(matches!(err, CoreError::AuthError { .. }));
        assert!(err.is_fatal());
    }
}
