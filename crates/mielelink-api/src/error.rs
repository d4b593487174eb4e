use thiserror::Error;

/// Top-level error type for the `mielelink-api` crate.
///
/// Covers every failure mode of the cloud API surface: OAuth token
/// exchange, REST calls, and the server-sent event stream.
/// `mielelink-core` maps these into its own domain taxonomy.
#[derive(Debug, Error)]
pub enum Error {
    // ── Authentication ──────────────────────────────────────────────
    /// The token endpoint or a resource endpoint answered 401.
    #[error("Authentication failed: {message}")]
    Authentication { message: String },

    // ── Cloud ───────────────────────────────────────────────────────
    /// HTTP 429 -- the endpoint is temporarily unavailable.
    #[error("Rate limited -- endpoint currently not available")]
    RateLimited,

    /// HTTP 5xx from the cloud.
    #[error("{message}")]
    Server { status: u16, message: String },

    /// HTTP 404 -- unknown device or resource.
    #[error("Not found: {path}")]
    NotFound { path: String },

    /// Any other non-success status. `message` is the server's own
    /// `message` field when present.
    #[error("{message}")]
    Rejected { status: u16, message: String },

    // ── Transport ───────────────────────────────────────────────────
    /// HTTP transport error (connection refused, DNS failure, timeout).
    #[error("HTTP transport error: {0}")]
    Transport(#[from] reqwest::Error),

    /// URL parsing error.
    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    /// TLS setup or client construction error.
    #[error("TLS error: {0}")]
    Tls(String),

    // ── Event stream ────────────────────────────────────────────────
    /// The event stream handshake failed or the stream broke mid-read.
    #[error("Event stream error: {0}")]
    EventStream(String),

    // ── Data ────────────────────────────────────────────────────────
    /// JSON deserialization failed, with the raw body for debugging.
    #[error("Deserialization error: {message}")]
    Deserialization { message: String, body: String },
}

impl Error {
    /// Returns `true` for failures that re-authenticating cannot fix
    /// because the credentials themselves were refused.
    pub fn is_auth(&self) -> bool {
        matches!(self, Self::Authentication { .. })
    }

    /// Returns `true` if this is a "not found" error.
    pub fn is_not_found(&self) -> bool {
        match self {
            Self::NotFound { .. } => true,
            Self::Transport(e) => e.status() == Some(reqwest::StatusCode::NOT_FOUND),
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn server_error_displays_its_message() {
        let err = Error::Server {
            status: 504,
            message: "Error 504: Gateway timeout".into(),
        };
        assert!(!err.is_auth());
        assert_eq!(err.to_string(), "Error 504: Gateway timeout");
    }

    #[test]
    fn rejected_is_not_auth() {
        let err = Error::Rejected {
            status: 400,
            message: "busy".into(),
        };
        assert!(!err.is_auth());
        assert!(!err.is_not_found());
        assert_eq!(err.to_string(), "busy");
    }

    #[test]
    fn not_found_is_detected() {
        let err = Error::NotFound {
            path: "/v1/devices/1/actions".into(),
        };
        assert!(err.is_not_found());
        assert!(!Error::RateLimited.is_not_found());
    }
}
