//! Configuration for the mielelink binary.
//!
//! TOML profiles, credential resolution (env + keyring + plaintext), and
//! translation to `mielelink_core::ServiceConfig`. Core never reads files;
//! it receives a pre-built `ServiceConfig`.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use directories::ProjectDirs;
use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use mielelink_api::{DEFAULT_BASE_URL, OAuthCredentials};
use mielelink_core::{
    DebounceConfig, DebounceScope, FeedMode, ServiceConfig, SessionTiming, TlsVerification,
    WatchdogConfig,
};

/// Keyring service name for stored secrets.
pub const KEYRING_SERVICE: &str = "mielelink";

/// Prefix of configuration environment variables.
pub const ENV_PREFIX: &str = "MIELELINK_";

// ── Error ───────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid {field}: {reason}")]
    Validation { field: String, reason: String },

    #[error("no {secret} configured for profile '{profile}'")]
    NoCredentials { profile: String, secret: String },

    #[error("profile '{name}' not found (available: {available})")]
    ProfileNotFound { name: String, available: String },

    #[error("failed to serialize config: {0}")]
    Serialization(#[from] toml::ser::Error),

    #[error("config loading failed: {0}")]
    Figment(Box<figment::Error>),

    #[error("keyring error: {0}")]
    Keyring(#[from] keyring::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<figment::Error> for ConfigError {
    fn from(err: figment::Error) -> Self {
        Self::Figment(Box::new(err))
    }
}

// ── TOML config structs ─────────────────────────────────────────────

/// Top-level TOML configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    /// Profile used when none is selected.
    pub default_profile: Option<String>,

    #[serde(default)]
    pub defaults: Defaults,

    /// Named account profiles.
    #[serde(default)]
    pub profiles: HashMap<String, Profile>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            default_profile: Some("default".into()),
            defaults: Defaults::default(),
            profiles: HashMap::new(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Defaults {
    #[serde(default = "default_locale")]
    pub locale: String,

    #[serde(default = "default_timeout")]
    pub timeout: u64,
}

impl Default for Defaults {
    fn default() -> Self {
        Self {
            locale: default_locale(),
            timeout: default_timeout(),
        }
    }
}

fn default_locale() -> String {
    "de".into()
}
fn default_timeout() -> u64 {
    30
}

/// How a profile receives device updates.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum UpdateMode {
    /// Server-sent events.
    #[default]
    Stream,
    /// Periodic polling.
    Poll,
}

/// One cloud account.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Profile {
    /// Account e-mail address.
    #[serde(default)]
    pub account: String,

    /// Account password (plaintext; prefer keyring or env var).
    pub password: Option<String>,

    /// Application client id.
    #[serde(default)]
    pub client_id: String,

    /// Application client secret (plaintext; prefer keyring or env var).
    pub client_secret: Option<String>,

    /// Country of the account, e.g. `de-DE`.
    #[serde(default)]
    pub country: String,

    /// Language of localized values. Falls back to `defaults.locale`.
    pub locale: Option<String>,

    /// API base URL override.
    pub base_url: Option<String>,

    #[serde(default)]
    pub mode: UpdateMode,

    /// Poll cadence is `poll_interval * poll_unit` seconds.
    #[serde(default = "default_poll_interval")]
    pub poll_interval: u64,

    #[serde(default = "default_poll_unit")]
    pub poll_unit: u64,

    /// Coalesce bursts of device updates.
    #[serde(default)]
    pub debounce: bool,

    #[serde(default = "default_debounce_window_ms")]
    pub debounce_window_ms: u64,

    /// `global` or `per-device`.
    #[serde(default = "default_debounce_scope")]
    pub debounce_scope: String,

    #[serde(default = "default_watchdog_interval")]
    pub watchdog_interval_secs: u64,

    #[serde(default = "default_watchdog_threshold")]
    pub watchdog_threshold_secs: u64,

    /// Base delay between login retries.
    #[serde(default = "default_restart_delay")]
    pub restart_delay_secs: u64,

    /// Override request timeout.
    pub timeout: Option<u64>,

    /// Path to a custom CA certificate.
    pub ca_cert: Option<PathBuf>,

    /// Retry program list loads that failed or came back empty.
    #[serde(default)]
    pub retry_failed_program_loads: bool,
}

fn default_poll_interval() -> u64 {
    5
}
fn default_poll_unit() -> u64 {
    60
}
fn default_debounce_window_ms() -> u64 {
    1000
}
fn default_debounce_scope() -> String {
    "global".into()
}
fn default_watchdog_interval() -> u64 {
    300
}
fn default_watchdog_threshold() -> u64 {
    60
}
fn default_restart_delay() -> u64 {
    10
}

// ── Config file path ────────────────────────────────────────────────

/// Resolve the config file path via platform conventions.
pub fn config_path() -> PathBuf {
    ProjectDirs::from("com", "mielelink", "mielelink").map_or_else(
        || {
            let mut p = dirs_fallback();
            p.push("config.toml");
            p
        },
        |dirs| dirs.config_dir().join("config.toml"),
    )
}

fn dirs_fallback() -> PathBuf {
    let mut p = PathBuf::from(std::env::var("HOME").unwrap_or_else(|_| ".".into()));
    p.push(".config");
    p.push("mielelink");
    p
}

// ── Config loading ──────────────────────────────────────────────────

/// Load the full Config from the default file + environment.
pub fn load_config() -> Result<Config, ConfigError> {
    load_config_from(&config_path())
}

/// Load from `path` + environment. A missing file yields the defaults.
///
/// Environment keys nest with a double underscore, e.g.
/// `MIELELINK_PROFILES__HOME__LOCALE=en`.
pub fn load_config_from(path: &Path) -> Result<Config, ConfigError> {
    let figment = Figment::new()
        .merge(Serialized::defaults(Config::default()))
        .merge(Toml::file(path))
        .merge(Env::prefixed(ENV_PREFIX).split("__"));

    let config: Config = figment.extract()?;
    Ok(config)
}

/// Parse a TOML document on top of the defaults, without environment.
pub fn parse_config(toml: &str) -> Result<Config, ConfigError> {
    let config = Figment::new()
        .merge(Serialized::defaults(Config::default()))
        .merge(Toml::string(toml))
        .extract()?;
    Ok(config)
}

/// Serialize config to TOML and write it to `path`.
pub fn save_config_to(cfg: &Config, path: &Path) -> Result<(), ConfigError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let toml_str = toml::to_string_pretty(cfg)?;
    std::fs::write(path, toml_str)?;
    Ok(())
}

/// Serialize config to TOML and write it to the canonical config path.
pub fn save_config(cfg: &Config) -> Result<(), ConfigError> {
    save_config_to(cfg, &config_path())
}

impl Config {
    /// `requested`, else `default_profile`, else `"default"`.
    pub fn active_profile_name(&self, requested: Option<&str>) -> String {
        requested
            .map(str::to_owned)
            .or_else(|| self.default_profile.clone())
            .unwrap_or_else(|| "default".into())
    }

    pub fn profile(&self, name: &str) -> Result<&Profile, ConfigError> {
        self.profiles.get(name).ok_or_else(|| {
            let mut names: Vec<&str> = self.profiles.keys().map(String::as_str).collect();
            names.sort_unstable();
            ConfigError::ProfileNotFound {
                name: name.into(),
                available: if names.is_empty() {
                    "none".into()
                } else {
                    names.join(", ")
                },
            }
        })
    }
}

// ── Credential resolution ───────────────────────────────────────────

/// Which secret of a profile to resolve.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SecretKind {
    Password,
    ClientSecret,
}

impl SecretKind {
    /// Environment variable checked first.
    pub fn env_var(self) -> &'static str {
        match self {
            Self::Password => "MIELELINK_PASSWORD",
            Self::ClientSecret => "MIELELINK_CLIENT_SECRET",
        }
    }

    /// Keyring entry name below the profile.
    pub fn keyring_user(self, profile_name: &str) -> String {
        match self {
            Self::Password => format!("{profile_name}/password"),
            Self::ClientSecret => format!("{profile_name}/client-secret"),
        }
    }

    fn label(self) -> &'static str {
        match self {
            Self::Password => "password",
            Self::ClientSecret => "client secret",
        }
    }

    fn plaintext(self, profile: &Profile) -> Option<&str> {
        match self {
            Self::Password => profile.password.as_deref(),
            Self::ClientSecret => profile.client_secret.as_deref(),
        }
    }
}

/// Resolve a secret: env var, then system keyring, then plaintext config.
pub fn resolve_secret(
    profile: &Profile,
    profile_name: &str,
    kind: SecretKind,
) -> Result<SecretString, ConfigError> {
    // 1. Env var
    if let Ok(value) = std::env::var(kind.env_var()) {
        if !value.is_empty() {
            return Ok(SecretString::from(value));
        }
    }

    // 2. System keyring
    if let Ok(entry) = keyring::Entry::new(KEYRING_SERVICE, &kind.keyring_user(profile_name)) {
        if let Ok(secret) = entry.get_password() {
            return Ok(SecretString::from(secret));
        }
    }

    // 3. Plaintext in config
    if let Some(value) = kind.plaintext(profile).filter(|v| !v.is_empty()) {
        return Ok(SecretString::from(value.to_owned()));
    }

    Err(ConfigError::NoCredentials {
        profile: profile_name.into(),
        secret: kind.label().into(),
    })
}

/// Store a secret in the system keyring.
pub fn store_secret(
    profile_name: &str,
    kind: SecretKind,
    secret: &SecretString,
) -> Result<(), ConfigError> {
    let entry = keyring::Entry::new(KEYRING_SERVICE, &kind.keyring_user(profile_name))?;
    entry.set_password(secret.expose_secret())?;
    Ok(())
}

// ── Validation ──────────────────────────────────────────────────────

fn require(field: &str, value: &str) -> Result<(), ConfigError> {
    if value.trim().is_empty() {
        return Err(ConfigError::Validation {
            field: field.into(),
            reason: "must not be empty".into(),
        });
    }
    Ok(())
}

/// Check the plain fields of a profile before any login attempt.
/// Secrets are checked when they are resolved.
pub fn validate(profile: &Profile, defaults: &Defaults) -> Result<(), ConfigError> {
    require("account", &profile.account)?;
    require("client_id", &profile.client_id)?;
    require("country", &profile.country)?;
    require(
        "locale",
        profile.locale.as_deref().unwrap_or(&defaults.locale),
    )?;
    let poll_secs = profile.poll_interval.saturating_mul(profile.poll_unit);
    if profile.mode == UpdateMode::Poll && poll_secs == 0 {
        return Err(ConfigError::Validation {
            field: "poll_interval".into(),
            reason: "poll_interval * poll_unit must be at least one second".into(),
        });
    }
    if profile.watchdog_interval_secs == 0 {
        return Err(ConfigError::Validation {
            field: "watchdog_interval_secs".into(),
            reason: "must be positive".into(),
        });
    }
    Ok(())
}

// ── Translation ─────────────────────────────────────────────────────

/// Build a `ServiceConfig` from a profile and pre-resolved secrets.
pub fn build_service_config(
    profile: &Profile,
    defaults: &Defaults,
    password: SecretString,
    client_secret: SecretString,
) -> Result<ServiceConfig, ConfigError> {
    validate(profile, defaults)?;
    require("password", password.expose_secret())?;
    require("client_secret", client_secret.expose_secret())?;

    let raw_url = profile.base_url.as_deref().unwrap_or(DEFAULT_BASE_URL);
    let base_url: url::Url = raw_url.parse().map_err(|_| ConfigError::Validation {
        field: "base_url".into(),
        reason: format!("invalid URL: {raw_url}"),
    })?;

    let debounce_scope: DebounceScope =
        profile.debounce_scope.parse().map_err(|_| ConfigError::Validation {
            field: "debounce_scope".into(),
            reason: format!(
                "expected 'global' or 'per-device', got '{}'",
                profile.debounce_scope
            ),
        })?;

    let credentials = OAuthCredentials {
        client_id: profile.client_id.clone(),
        client_secret,
        username: profile.account.clone(),
        password,
        country: profile.country.clone(),
    };

    let locale = profile
        .locale
        .clone()
        .unwrap_or_else(|| defaults.locale.clone());
    let mut config = ServiceConfig::new(base_url, credentials, locale);

    config.timeout = Duration::from_secs(profile.timeout.unwrap_or(defaults.timeout));
    config.tls = profile
        .ca_cert
        .clone()
        .map_or(TlsVerification::SystemDefaults, TlsVerification::CustomCa);
    config.feed = match profile.mode {
        UpdateMode::Stream => FeedMode::EventStream,
        UpdateMode::Poll => FeedMode::Polling {
            interval: Duration::from_secs(profile.poll_interval.saturating_mul(profile.poll_unit)),
        },
    };
    config.debounce = DebounceConfig {
        enabled: profile.debounce,
        window: Duration::from_millis(profile.debounce_window_ms),
        scope: debounce_scope,
    };
    config.session = SessionTiming {
        restart_delay: Duration::from_secs(profile.restart_delay_secs),
        ..SessionTiming::default()
    };
    config.watchdog = WatchdogConfig {
        interval: Duration::from_secs(profile.watchdog_interval_secs),
        threshold: Duration::from_secs(profile.watchdog_threshold_secs),
    };
    config.retry_failed_program_loads = profile.retry_failed_program_loads;
    Ok(config)
}

/// Build a `ServiceConfig` from a profile, resolving both secrets.
pub fn profile_to_service_config(
    profile: &Profile,
    profile_name: &str,
    defaults: &Defaults,
) -> Result<ServiceConfig, ConfigError> {
    validate(profile, defaults)?;
    let password = resolve_secret(profile, profile_name, SecretKind::Password)?;
    let client_secret = resolve_secret(profile, profile_name, SecretKind::ClientSecret)?;
    build_service_config(profile, defaults, password, client_secret)
}
