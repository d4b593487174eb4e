// ── Runtime service configuration ──
//
// These types describe how to talk to the cloud and how the background
// machinery is tuned. They carry credential data but never touch disk.
// The binary builds a `ServiceConfig` and hands it to the `Controller`.

use std::time::Duration;

use mielelink_api::OAuthCredentials;
use strum::{Display, EnumString};
use url::Url;

/// TLS verification strategy.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum TlsVerification {
    /// Bundled webpki roots.
    #[default]
    SystemDefaults,
    /// Additionally trust a custom CA certificate file.
    CustomCa(std::path::PathBuf),
}

/// Where device updates come from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeedMode {
    /// Server-sent events, with the watchdog as a safety net.
    EventStream,
    /// Periodic REST polling at the given cadence.
    Polling { interval: Duration },
}

/// How debounced device updates are coalesced.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Display, EnumString)]
#[strum(serialize_all = "kebab-case")]
pub enum DebounceScope {
    /// One pending slot for the whole service: a burst from any device
    /// replaces the payload waiting for any other device.
    #[default]
    Global,
    /// One pending slot per device.
    PerDevice,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DebounceConfig {
    pub enabled: bool,
    pub window: Duration,
    pub scope: DebounceScope,
}

impl Default for DebounceConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            window: Duration::from_secs(1),
            scope: DebounceScope::Global,
        }
    }
}

/// Session lifecycle timings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionTiming {
    /// Base delay between login/refresh retries.
    pub restart_delay: Duration,
    /// How often the token expiry is checked.
    pub auth_check_interval: Duration,
    /// A token expiring within this margin is refreshed.
    pub expiry_margin: Duration,
}

impl Default for SessionTiming {
    fn default() -> Self {
        Self {
            restart_delay: Duration::from_secs(10),
            auth_check_interval: Duration::from_secs(12 * 60 * 60),
            expiry_margin: Duration::from_secs(24 * 60 * 60),
        }
    }
}

/// Stream watchdog timings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WatchdogConfig {
    /// How often liveness is checked.
    pub interval: Duration,
    /// Silence at or beyond this duration forces a reconnect.
    pub threshold: Duration,
}

impl Default for WatchdogConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(5 * 60),
            threshold: Duration::from_secs(60),
        }
    }
}

/// Everything the [`Controller`](crate::Controller) needs to run.
///
/// Built by the binary; core never reads config files.
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    /// Cloud API base URL.
    pub base_url: Url,
    pub credentials: OAuthCredentials,
    /// Language requested for localized values (`de`, `en`, ...).
    pub locale: String,
    pub tls: TlsVerification,
    /// Request timeout for REST calls.
    pub timeout: Duration,
    pub feed: FeedMode,
    pub debounce: DebounceConfig,
    pub session: SessionTiming,
    pub watchdog: WatchdogConfig,
    /// When `false`, a failed or empty program fetch is cached and never
    /// retried. When `true`, a failure leaves the device eligible for the
    /// next power-on transition.
    pub retry_failed_program_loads: bool,
}

impl ServiceConfig {
    /// A config with default tuning for the given credentials.
    pub fn new(base_url: Url, credentials: OAuthCredentials, locale: impl Into<String>) -> Self {
        Self {
            base_url,
            credentials,
            locale: locale.into(),
            tls: TlsVerification::default(),
            timeout: Duration::from_secs(30),
            feed: FeedMode::EventStream,
            debounce: DebounceConfig::default(),
            session: SessionTiming::default(),
            watchdog: WatchdogConfig::default(),
            retry_failed_program_loads: false,
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn debounce_scope_parses_kebab_case() {
        assert_eq!("global".parse::<DebounceScope>().unwrap(), DebounceScope::Global);
        assert_eq!("per-device".parse::<DebounceScope>().unwrap(), DebounceScope::PerDevice);
        assert_eq!(DebounceScope::PerDevice.to_string(), "per-device");
    }

    #[test]
    fn session_defaults_match_cloud_cadence() {
        let timing = SessionTiming::default();
        assert_eq!(timing.auth_check_interval, Duration::from_secs(43_200));
        assert_eq!(timing.expiry_margin, Duration::from_secs(86_400));
    }
}
