// ── Event stream connector ──
//
// Owns the one server-sent event connection. A single task drives the
// `ConnectionMachine`: it opens the stream, forwards device and action
// batches to the reconciler, records heartbeats, and executes the
// machine's reconnect directives. The watchdog runs inside the same
// `select!`, so every transition is serialized.

use std::sync::Arc;
use std::time::Duration;

use futures_util::StreamExt;
use tokio::sync::{mpsc, watch};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use mielelink_api::{EventStream, SseFrame};

use super::machine::{watchdog_expired, ConnectionMachine, ConnectionState, Directive};
use crate::api::CloudApi;
use crate::config::WatchdogConfig;
use crate::error::CoreError;
use crate::feed::{self, FeedEvent};
use crate::session::{jitter_ms, SessionManager};

/// Upper bound on the SSE handshake before it counts as stuck.
const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(30);

pub(crate) struct StreamConnector {
    api: Arc<dyn CloudApi>,
    session: Arc<SessionManager>,
    feed_tx: mpsc::Sender<FeedEvent>,
    fatal_tx: mpsc::UnboundedSender<CoreError>,
    state_tx: watch::Sender<ConnectionState>,
    watchdog: WatchdogConfig,
    machine: ConnectionMachine,
    stream: Option<EventStream>,
    reconnect_at: Option<Instant>,
    open_now: bool,
    live: bool,
}

/// Why the connector loop stopped.
enum Stop {
    Cancelled,
    FeedClosed,
    Fatal(CoreError),
}

impl StreamConnector {
    pub(crate) fn new(
        api: Arc<dyn CloudApi>,
        session: Arc<SessionManager>,
        feed_tx: mpsc::Sender<FeedEvent>,
        fatal_tx: mpsc::UnboundedSender<CoreError>,
        state_tx: watch::Sender<ConnectionState>,
        watchdog: WatchdogConfig,
    ) -> Self {
        Self {
            api,
            session,
            feed_tx,
            fatal_tx,
            state_tx,
            watchdog,
            machine: ConnectionMachine::new(),
            stream: None,
            reconnect_at: None,
            open_now: true,
            live: false,
        }
    }

    /// Run until cancelled. The stream is dropped before this returns.
    pub(crate) async fn run(mut self, cancel: CancellationToken) {
        let mut watchdog = tokio::time::interval(self.watchdog.interval);
        watchdog.tick().await; // first tick is immediate

        let stop = loop {
            if self.open_now {
                self.open_now = false;
                if let Err(stop) = self.open(&cancel).await {
                    break stop;
                }
                continue;
            }

            let step = tokio::select! {
                biased;
                () = cancel.cancelled() => Err(Stop::Cancelled),
                () = sleep_until(self.reconnect_at), if self.reconnect_at.is_some() => {
                    self.reconnect_at = None;
                    let directive = self.machine.on_reconnect();
                    self.apply(directive).await
                }
                frame = next_frame(&mut self.stream), if self.stream.is_some() => {
                    self.on_frame(frame).await
                }
                _ = watchdog.tick() => self.check_watchdog().await,
            };

            if let Err(stop) = step {
                break stop;
            }
        };

        self.stream = None;
        match stop {
            Stop::Cancelled => debug!("stream connector cancelled"),
            Stop::FeedClosed => debug!("reconciler gone, stream connector exiting"),
            Stop::Fatal(e) => {
                let _ = self.fatal_tx.send(e);
            }
        }
    }

    // ── Handshake ────────────────────────────────────────────────

    async fn open(&mut self, cancel: &CancellationToken) -> Result<(), Stop> {
        self.publish_state();
        debug!("opening event stream");

        let attempt = tokio::select! {
            biased;
            () = cancel.cancelled() => return Err(Stop::Cancelled),
            result = tokio::time::timeout(HANDSHAKE_TIMEOUT, self.api.open_events()) => result,
        };

        match attempt {
            Ok(Ok(stream)) => {
                self.stream = Some(stream);
                self.machine.on_open();
                self.publish_state();
                self.session.record_ping();
                info!("event stream open");
                self.set_live(true).await
            }
            Ok(Err(CoreError::AuthError { message })) => {
                warn!(%message, "event stream refused the access token, refreshing");
                match self.session.refresh().await {
                    Ok(_) => {}
                    Err(CoreError::Cancelled) => return Err(Stop::Cancelled),
                    Err(e) => return Err(Stop::Fatal(e)),
                }
                let directive = self.machine.on_handshake_failed(jitter_ms());
                self.apply(directive).await
            }
            Ok(Err(e)) => {
                warn!(error = %e, "event stream handshake failed");
                let directive = self.machine.on_handshake_failed(jitter_ms());
                self.apply(directive).await
            }
            Err(_) => {
                warn!(
                    timeout_secs = HANDSHAKE_TIMEOUT.as_secs(),
                    "event stream stuck connecting, forcing close"
                );
                let directive = self.machine.on_handshake_failed(jitter_ms());
                self.apply(directive).await
            }
        }
    }

    // ── Inbound frames ───────────────────────────────────────────

    async fn on_frame(
        &mut self,
        frame: Option<Result<SseFrame, mielelink_api::Error>>,
    ) -> Result<(), Stop> {
        let frame = match frame {
            Some(Ok(frame)) => frame,
            Some(Err(e)) => {
                warn!(error = %e, "event stream read failed");
                self.stream = None;
                let directive = self.machine.on_transport_closed();
                return self.apply(directive).await;
            }
            None => {
                info!("event stream closed by server");
                self.stream = None;
                let directive = self.machine.on_transport_closed();
                return self.apply(directive).await;
            }
        };

        match frame.event.as_str() {
            "ping" => {
                self.session.record_ping();
                self.forward(FeedEvent::Heartbeat).await
            }
            "devices" | "actions" => {
                match feed::from_stream_event(&frame.event, &frame.data) {
                    Some(event) => self.forward(event).await,
                    None => Ok(()),
                }
            }
            "error" => {
                debug!(data = %frame.data, "error event received");
                let directive = self.machine.on_error_event(jitter_ms());
                let count = self.machine.error_count();
                self.forward(FeedEvent::StreamError { count }).await?;
                self.apply(directive).await
            }
            other => {
                warn!(event = other, "unrecognized stream event");
                Ok(())
            }
        }
    }

    async fn check_watchdog(&mut self) -> Result<(), Stop> {
        let last_ping = self.session.last_ping();
        if !watchdog_expired(last_ping, Instant::now(), self.watchdog.threshold) {
            debug!("watchdog: stream alive");
            return Ok(());
        }
        warn!(
            silent_secs = last_ping.elapsed().as_secs(),
            "watchdog: no heartbeat, restarting event stream"
        );
        let directive = self.machine.on_watchdog_expired();
        self.apply(directive).await
    }

    // ── Directives ───────────────────────────────────────────────

    async fn apply(&mut self, directive: Directive) -> Result<(), Stop> {
        self.publish_state();
        match directive {
            Directive::None => Ok(()),
            Directive::ReconnectNow => {
                self.stream = None;
                self.set_live(false).await?;
                let next = self.machine.on_reconnect();
                debug_assert_eq!(next, Directive::Open);
                self.open_now = true;
                Ok(())
            }
            // The old stream stays readable until the reconnect fires, so
            // further error events reach the recovery guard.
            Directive::ReconnectAfter(delay) => {
                self.reconnect_at = Some(Instant::now() + delay);
                self.set_live(false).await
            }
            Directive::Open => {
                self.stream = None;
                self.open_now = true;
                Ok(())
            }
        }
    }

    async fn set_live(&mut self, live: bool) -> Result<(), Stop> {
        if self.live == live {
            return Ok(());
        }
        self.live = live;
        self.forward(FeedEvent::Connection(live)).await
    }

    async fn forward(&mut self, event: FeedEvent) -> Result<(), Stop> {
        self.feed_tx.send(event).await.map_err(|_| Stop::FeedClosed)
    }

    fn publish_state(&self) {
        self.state_tx.send_if_modified(|current| {
            let next = self.machine.state();
            let changed = *current != next;
            *current = next;
            changed
        });
    }
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(at) => tokio::time::sleep_until(at).await,
        None => std::future::pending().await,
    }
}

async fn next_frame(
    stream: &mut Option<EventStream>,
) -> Option<Result<SseFrame, mielelink_api::Error>> {
    match stream.as_mut() {
        Some(s) => s.next().await,
        None => std::future::pending().await,
    }
}
