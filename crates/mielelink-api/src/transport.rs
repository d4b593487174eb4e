// Shared transport configuration for building reqwest::Client instances.
//
// The REST client and the event stream share TLS, timeout, and user agent
// settings through this module. The event stream gets its own client
// without a total request timeout, since the response body never ends.

use std::path::PathBuf;
use std::time::Duration;

use crate::error::Error;

/// User agent sent with every request unless overridden.
pub const DEFAULT_USER_AGENT: &str = concat!("mielelink/", env!("CARGO_PKG_VERSION"));

/// TLS verification mode.
#[derive(Debug, Clone, Default)]
pub enum TlsMode {
    /// Use the bundled webpki roots.
    #[default]
    System,
    /// Additionally trust a CA certificate from the given PEM file.
    CustomCa(PathBuf),
}

/// Shared transport configuration for building HTTP clients.
#[derive(Debug, Clone)]
pub struct TransportConfig {
    pub tls: TlsMode,
    /// Total timeout for ordinary request/response exchanges.
    pub timeout: Duration,
    /// Timeout for establishing a TCP/TLS connection (also used by the
    /// event stream, which has no total timeout).
    pub connect_timeout: Duration,
    pub user_agent: String,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            tls: TlsMode::System,
            timeout: Duration::from_secs(30),
            connect_timeout: Duration::from_secs(10),
            user_agent: DEFAULT_USER_AGENT.to_owned(),
        }
    }
}

impl TransportConfig {
    /// Build a `reqwest::Client` for request/response calls.
    pub fn build_client(&self) -> Result<reqwest::Client, Error> {
        let builder = self.base_builder().timeout(self.timeout);
        self.finish(builder)
    }

    /// Build a `reqwest::Client` for long-lived streaming responses.
    ///
    /// Only the connect phase is bounded; liveness of an open stream is
    /// judged by the caller's heartbeat watchdog.
    pub fn build_stream_client(&self) -> Result<reqwest::Client, Error> {
        let builder = self.base_builder();
        self.finish(builder)
    }

    fn base_builder(&self) -> reqwest::ClientBuilder {
        reqwest::Client::builder()
            .connect_timeout(self.connect_timeout)
            .user_agent(self.user_agent.clone())
    }

    fn finish(&self, mut builder: reqwest::ClientBuilder) -> Result<reqwest::Client, Error> {
        if let TlsMode::CustomCa(path) = &self.tls {
            let cert_pem = std::fs::read(path)
                .map_err(|e| Error::Tls(format!("failed to read CA cert: {e}")))?;
            let cert = reqwest::Certificate::from_pem(&cert_pem)
                .map_err(|e| Error::Tls(format!("invalid CA cert: {e}")))?;
            builder = builder.add_root_certificate(cert);
        }

        builder
            .build()
            .map_err(|e| Error::Tls(format!("failed to build HTTP client: {e}")))
    }
}
