// ── Session manager ──
//
// Owns the OAuth2 token pair: initial login with unbounded retry, periodic
// expiry checks, refresh, liveness bookkeeping, and logout. Every other
// component reads the current session through a lock-free snapshot.

use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwapOption;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rand::Rng;
use secrecy::SecretString;
use tokio::sync::{mpsc, watch};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use mielelink_api::{CloudClient, OAuthCredentials, TokenResponse};

use crate::config::SessionTiming;
use crate::error::CoreError;

// ── Session ──────────────────────────────────────────────────────

/// A live token pair plus its bookkeeping timestamps.
#[derive(Debug, Clone)]
pub struct Session {
    pub access_token: SecretString,
    pub refresh_token: SecretString,
    pub token_type: String,
    pub expiry_time: DateTime<Utc>,
    /// Last liveness signal (stream heartbeat or successful poll).
    pub last_ping_time: DateTime<Utc>,
}

impl Session {
    fn from_token(token: TokenResponse, now: DateTime<Utc>) -> Self {
        Self {
            access_token: SecretString::from(token.access_token),
            refresh_token: SecretString::from(token.refresh_token),
            token_type: token.token_type,
            expiry_time: now + chrono::Duration::seconds(token.expires_in),
            last_ping_time: now,
        }
    }

    /// `true` when the token expires within `margin` of `now` (inclusive).
    pub fn is_expiring_soon(&self, now: DateTime<Utc>, margin: Duration) -> bool {
        let margin = chrono::Duration::from_std(margin).unwrap_or(chrono::Duration::MAX);
        self.expiry_time - now <= margin
    }
}

// ── Token endpoint seam ──────────────────────────────────────────

/// The three token operations the session manager needs.
///
/// Implemented by [`CloudClient`]; tests substitute scripted fakes.
#[async_trait]
pub trait TokenEndpoint: Send + Sync + 'static {
    async fn password_grant(
        &self,
        creds: &OAuthCredentials,
    ) -> Result<TokenResponse, mielelink_api::Error>;

    async fn refresh_grant(
        &self,
        creds: &OAuthCredentials,
        refresh_token: &SecretString,
    ) -> Result<TokenResponse, mielelink_api::Error>;

    async fn logout(&self, token: &SecretString) -> Result<(), mielelink_api::Error>;
}

#[async_trait]
impl TokenEndpoint for CloudClient {
    async fn password_grant(
        &self,
        creds: &OAuthCredentials,
    ) -> Result<TokenResponse, mielelink_api::Error> {
        CloudClient::password_grant(self, creds).await
    }

    async fn refresh_grant(
        &self,
        creds: &OAuthCredentials,
        refresh_token: &SecretString,
    ) -> Result<TokenResponse, mielelink_api::Error> {
        CloudClient::refresh_grant(self, creds, refresh_token).await
    }

    async fn logout(&self, token: &SecretString) -> Result<(), mielelink_api::Error> {
        CloudClient::logout(self, token).await.map(|_| ())
    }
}

// ── Retry delays ─────────────────────────────────────────────────

/// Delay before login attempt `attempt + 1`:
/// `restart_delay + attempt * 1s + jitter_ms`.
pub fn login_retry_delay(restart_delay: Duration, attempt: u32, jitter_ms: u64) -> Duration {
    restart_delay + Duration::from_secs(u64::from(attempt)) + Duration::from_millis(jitter_ms)
}

/// Uniform jitter in `0..1000` milliseconds.
pub(crate) fn jitter_ms() -> u64 {
    rand::thread_rng().gen_range(0..1000)
}

// ── SessionManager ───────────────────────────────────────────────

/// Acquires, refreshes, and invalidates the cloud session.
///
/// All waits race against `cancel`, so shutdown never blocks on a backoff.
pub struct SessionManager {
    tokens: Arc<dyn TokenEndpoint>,
    credentials: OAuthCredentials,
    timing: SessionTiming,
    current: ArcSwapOption<Session>,
    /// Monotonic twin of `Session::last_ping_time`, used by the watchdog.
    last_ping: watch::Sender<Instant>,
    cancel: CancellationToken,
}

impl SessionManager {
    pub fn new(
        tokens: Arc<dyn TokenEndpoint>,
        credentials: OAuthCredentials,
        timing: SessionTiming,
        cancel: CancellationToken,
    ) -> Self {
        let (last_ping, _) = watch::channel(Instant::now());
        Self {
            tokens,
            credentials,
            timing,
            current: ArcSwapOption::empty(),
            last_ping,
            cancel,
        }
    }

    /// The current session snapshot, if logged in.
    pub fn current(&self) -> Option<Arc<Session>> {
        self.current.load_full()
    }

    /// The current bearer token.
    pub fn access_token(&self) -> Result<SecretString, CoreError> {
        self.current()
            .map(|s| s.access_token.clone())
            .ok_or_else(|| CoreError::AuthError {
                message: "no active session".into(),
            })
    }

    /// When the last liveness signal arrived (monotonic clock).
    pub fn last_ping(&self) -> Instant {
        *self.last_ping.borrow()
    }

    // ── Acquisition ──────────────────────────────────────────────

    /// Log in with the password grant, retrying until it succeeds.
    ///
    /// A 401 aborts immediately with [`CoreError::AuthError`]. Anything else
    /// is retried after [`login_retry_delay`], with the attempt counter
    /// growing without bound.
    pub async fn acquire(&self) -> Result<Arc<Session>, CoreError> {
        let mut attempt: u32 = 1;

        loop {
            info!(attempt, "login attempt");
            match self.tokens.password_grant(&self.credentials).await {
                Ok(token) => {
                    let session = self.install(token);
                    info!(expires = %session.expiry_time, "access token acquired");
                    return Ok(session);
                }
                Err(e) if e.is_auth() => {
                    error!(
                        username = %self.credentials.username,
                        country = %self.credentials.country,
                        "credentials were refused, check account, password, client id and secret"
                    );
                    return Err(e.into());
                }
                Err(e) => {
                    let delay = login_retry_delay(self.timing.restart_delay, attempt, jitter_ms());
                    warn!(
                        error = %e,
                        attempt,
                        delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                        "login attempt failed, retrying"
                    );
                    self.sleep(delay).await?;
                    attempt = attempt.saturating_add(1);
                }
            }
        }
    }

    // ── Refresh ──────────────────────────────────────────────────

    /// Renew the token pair, retrying every `restart_delay` until it works.
    ///
    /// A 401 is fatal. Without a current session this falls back to a
    /// full [`acquire`](Self::acquire).
    pub async fn refresh(&self) -> Result<Arc<Session>, CoreError> {
        let Some(current) = self.current() else {
            return self.acquire().await;
        };

        info!("access token expires soon, refreshing");
        loop {
            match self
                .tokens
                .refresh_grant(&self.credentials, &current.refresh_token)
                .await
            {
                Ok(token) => {
                    let session = self.install(token);
                    info!(expires = %session.expiry_time, "access token refreshed");
                    return Ok(session);
                }
                Err(e) if e.is_auth() => {
                    error!("refresh token was refused");
                    return Err(e.into());
                }
                Err(e) => {
                    warn!(
                        error = %e,
                        retry_secs = self.timing.restart_delay.as_secs(),
                        "token refresh failed, retrying"
                    );
                    self.sleep(self.timing.restart_delay).await?;
                }
            }
        }
    }

    /// Refresh only when the token is inside the expiry margin.
    pub async fn refresh_if_needed(&self) -> Result<(), CoreError> {
        match self.current() {
            Some(s) if !s.is_expiring_soon(Utc::now(), self.timing.expiry_margin) => {
                debug!(expires = %s.expiry_time, "access token still valid");
                Ok(())
            }
            _ => self.refresh().await.map(|_| ()),
        }
    }

    // ── Liveness ─────────────────────────────────────────────────

    /// Record a liveness signal.
    pub fn record_ping(&self) {
        let now = Utc::now();
        self.current.rcu(|current| {
            current.as_ref().map(|s| {
                Arc::new(Session {
                    last_ping_time: now,
                    ..Session::clone(s)
                })
            })
        });
        self.last_ping.send_replace(Instant::now());
    }

    // ── Logout ───────────────────────────────────────────────────

    /// Invalidate the access token on the server and forget the session.
    /// Errors are logged and swallowed.
    pub async fn logout(&self) {
        let Some(session) = self.current.swap(None) else {
            return;
        };
        match self.tokens.logout(&session.access_token).await {
            Ok(()) => debug!("access token invalidated"),
            Err(e) => warn!(error = %e, "logout failed (non-fatal)"),
        }
    }

    // ── Internals ────────────────────────────────────────────────

    fn install(&self, token: TokenResponse) -> Arc<Session> {
        let session = Arc::new(Session::from_token(token, Utc::now()));
        self.current.store(Some(Arc::clone(&session)));
        self.last_ping.send_replace(Instant::now());
        session
    }

    async fn sleep(&self, delay: Duration) -> Result<(), CoreError> {
        tokio::select! {
            biased;
            () = self.cancel.cancelled() => Err(CoreError::Cancelled),
            () = tokio::time::sleep(delay) => Ok(()),
        }
    }
}

/// Periodic expiry check. Fatal refresh failures go to `fatal_tx`.
pub(crate) async fn refresh_cadence_task(
    session: Arc<SessionManager>,
    fatal_tx: mpsc::UnboundedSender<CoreError>,
    cancel: CancellationToken,
) {
    let mut interval = tokio::time::interval(session.timing.auth_check_interval);
    interval.tick().await; // consume the immediate first tick

    loop {
        tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            _ = interval.tick() => {
                debug!("checking access token expiry");
                match session.refresh_if_needed().await {
                    Ok(()) | Err(CoreError::Cancelled) => {}
                    Err(e) => {
                        let _ = fatal_tx.send(e);
                        break;
                    }
                }
            }
        }
    }
}
