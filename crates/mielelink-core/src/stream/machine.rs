// ── Connection state machine ──
//
// Pure transition logic for the event stream. The connector task feeds it
// observations and executes the returned directive; no I/O happens here.

use std::time::Duration;

use strum::Display;
use tokio::time::Instant;
use tracing::{debug, warn};

/// Lifecycle of the single event-stream connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum ConnectionState {
    Connecting,
    Open,
    Closed,
    ErrorRecovering,
}

/// What the connector must do after a transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Directive {
    /// Nothing to do.
    None,
    /// Drop the current stream and open a new one right away.
    ReconnectNow,
    /// Drop the current stream and open a new one after `delay`.
    ReconnectAfter(Duration),
    /// Open the stream now (a scheduled reconnect came due).
    Open,
}

/// Backoff before reconnect attempt after `error_count` errors:
/// `error_count² seconds + jitter_ms`.
pub fn backoff_delay(error_count: u32, jitter_ms: u64) -> Duration {
    let n = u64::from(error_count);
    Duration::from_millis(n.saturating_mul(n).saturating_mul(1000).saturating_add(jitter_ms))
}

/// `true` when the stream has been silent for at least `threshold`.
pub fn watchdog_expired(last_ping: Instant, now: Instant, threshold: Duration) -> bool {
    now.saturating_duration_since(last_ping) >= threshold
}

/// Connection state plus the recovery guard.
///
/// The guard (`recovery_pending`) admits one recovery sequence at a time:
/// while a reconnect is scheduled, further error triggers only bump the
/// counter.
#[derive(Debug)]
pub struct ConnectionMachine {
    state: ConnectionState,
    error_count: u32,
    recovery_pending: bool,
}

impl Default for ConnectionMachine {
    fn default() -> Self {
        Self::new()
    }
}

impl ConnectionMachine {
    pub fn new() -> Self {
        Self {
            state: ConnectionState::Connecting,
            error_count: 0,
            recovery_pending: false,
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn error_count(&self) -> u32 {
        self.error_count
    }

    pub fn recovery_pending(&self) -> bool {
        self.recovery_pending
    }

    /// Handshake succeeded.
    pub fn on_open(&mut self) -> Directive {
        self.transition(ConnectionState::Open);
        self.error_count = 0;
        self.recovery_pending = false;
        Directive::None
    }

    /// The server sent an `error` event.
    pub fn on_error_event(&mut self, jitter_ms: u64) -> Directive {
        self.begin_recovery("error event", jitter_ms)
    }

    /// The handshake failed or did not complete in time.
    pub fn on_handshake_failed(&mut self, jitter_ms: u64) -> Directive {
        self.begin_recovery("handshake failure", jitter_ms)
    }

    /// The transport ended the stream or a read failed.
    pub fn on_transport_closed(&mut self) -> Directive {
        if self.recovery_pending {
            debug!("stream closed while recovery is pending, ignoring");
            return Directive::None;
        }
        self.transition(ConnectionState::Closed);
        Directive::ReconnectNow
    }

    /// The watchdog found the stream silent for too long.
    pub fn on_watchdog_expired(&mut self) -> Directive {
        if self.recovery_pending {
            debug!("watchdog expired while recovery is pending, ignoring");
            return Directive::None;
        }
        self.transition(ConnectionState::Closed);
        Directive::ReconnectNow
    }

    /// A scheduled reconnect came due, or an immediate one is being executed.
    pub fn on_reconnect(&mut self) -> Directive {
        self.recovery_pending = false;
        self.transition(ConnectionState::Connecting);
        Directive::Open
    }

    fn begin_recovery(&mut self, cause: &'static str, jitter_ms: u64) -> Directive {
        self.error_count = self.error_count.saturating_add(1);
        if self.recovery_pending {
            warn!(
                cause,
                error_count = self.error_count,
                "recovery already in progress, dropping trigger"
            );
            return Directive::None;
        }
        self.recovery_pending = true;
        self.transition(ConnectionState::ErrorRecovering);
        let delay = backoff_delay(self.error_count, jitter_ms);
        warn!(
            cause,
            error_count = self.error_count,
            delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
            "stream error, scheduling reconnect"
        );
        Directive::ReconnectAfter(delay)
    }

    fn transition(&mut self, next: ConnectionState) {
        if self.state != next {
            debug!(from = %self.state, to = %next, "stream state");
            self.state = next;
        }
    }
}
