// ── Service supervisor ──
//
// Owns every long-lived component of a run: the session, the feed source
// (event stream or poller), the reconciler, and the command processor.
// `connect()` logs in and spawns the tasks; `shutdown()` tears them down
// in order.

use std::sync::Arc;

use serde_json::Value;
use tokio::sync::{Mutex, mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use mielelink_api::{CloudClient, TlsMode, TransportConfig};

use crate::api::{CloudApi, CloudGateway};
use crate::command::{Command, CommandDispatcher, CommandEnvelope, CommandOutcome};
use crate::config::{FeedMode, ServiceConfig, TlsVerification};
use crate::error::CoreError;
use crate::feed::FeedEvent;
use crate::poller::Poller;
use crate::presentation::StateSink;
use crate::session::{SessionManager, refresh_cadence_task};
use crate::store::{DeviceCache, DeviceStore, reconcile_task};
use crate::stream::{ConnectionState, StreamConnector};

const COMMAND_CHANNEL_SIZE: usize = 64;
const FEED_CHANNEL_SIZE: usize = 256;

// ── ServiceStatus ────────────────────────────────────────────────

/// Lifecycle of the supervisor, observable by consumers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServiceStatus {
    Stopped,
    Starting,
    Running,
    /// A fatal error ended the run. The tasks are cancelled; call
    /// [`Controller::shutdown`] to finish the teardown.
    Failed(String),
}

impl std::fmt::Display for ServiceStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Stopped => f.write_str("Stopped"),
            Self::Starting => f.write_str("Starting"),
            Self::Running => f.write_str("Running"),
            Self::Failed(reason) => write!(f, "Failed: {reason}"),
        }
    }
}

// ── Controller ───────────────────────────────────────────────────

/// The main entry point for consumers.
///
/// Cheaply cloneable via `Arc<ControllerInner>`.
#[derive(Clone)]
pub struct Controller {
    inner: Arc<ControllerInner>,
}

struct ControllerInner {
    config: ServiceConfig,
    sink: Arc<dyn StateSink>,
    store: Arc<DeviceStore>,
    status: watch::Sender<ServiceStatus>,
    stream_state: watch::Sender<ConnectionState>,
    command_tx: mpsc::Sender<CommandEnvelope>,
    command_rx: Mutex<Option<mpsc::Receiver<CommandEnvelope>>>,
    cancel: CancellationToken,
    session: Mutex<Option<Arc<SessionManager>>>,
    task_handles: Mutex<Vec<JoinHandle<()>>>,
}

impl Controller {
    /// Create a controller. Does NOT connect -- call
    /// [`connect()`](Self::connect) to log in and start the background tasks.
    pub fn new(config: ServiceConfig, sink: Arc<dyn StateSink>) -> Self {
        let (status, _) = watch::channel(ServiceStatus::Stopped);
        let (stream_state, _) = watch::channel(ConnectionState::Closed);
        let (command_tx, command_rx) = mpsc::channel(COMMAND_CHANNEL_SIZE);

        Self {
            inner: Arc::new(ControllerInner {
                config,
                sink,
                store: Arc::new(DeviceStore::new()),
                status,
                stream_state,
                command_tx,
                command_rx: Mutex::new(Some(command_rx)),
                cancel: CancellationToken::new(),
                session: Mutex::new(None),
                task_handles: Mutex::new(Vec::new()),
            }),
        }
    }

    pub fn config(&self) -> &ServiceConfig {
        &self.inner.config
    }

    /// The device records of this run.
    pub fn store(&self) -> &Arc<DeviceStore> {
        &self.inner.store
    }

    // ── Lifecycle ────────────────────────────────────────────────

    /// Log in and start the feed, reconciler, refresh cadence, and
    /// command processor.
    ///
    /// Transient login failures are retried inside; this returns an error
    /// only for refused credentials, a bad configuration, or cancellation.
    pub async fn connect(&self) -> Result<(), CoreError> {
        self.inner.status.send_replace(ServiceStatus::Starting);
        self.publish_connection(false).await;

        match self.start().await {
            Ok(()) => {
                self.inner.status.send_replace(ServiceStatus::Running);
                info!("service running");
                Ok(())
            }
            Err(e) => {
                self.inner
                    .status
                    .send_replace(ServiceStatus::Failed(e.to_string()));
                Err(e)
            }
        }
    }

    async fn start(&self) -> Result<(), CoreError> {
        let config = &self.inner.config;
        let cancel = &self.inner.cancel;
        let client = CloudClient::new(
            config.base_url.clone(),
            &config.locale,
            &build_transport(config),
        )?;

        let session = Arc::new(SessionManager::new(
            Arc::new(client.clone()),
            config.credentials.clone(),
            config.session,
            cancel.clone(),
        ));
        session.acquire().await?;
        *self.inner.session.lock().await = Some(Arc::clone(&session));

        let api: Arc<dyn CloudApi> = Arc::new(CloudGateway::new(client, Arc::clone(&session)));
        let cache = Arc::new(DeviceCache::new(
            Arc::clone(&self.inner.store),
            Arc::clone(&self.inner.sink),
            Arc::clone(&api),
            config.debounce,
            config.retry_failed_program_loads,
        ));
        let dispatcher = Arc::new(CommandDispatcher::new(Arc::clone(&api), Arc::clone(&cache)));

        let (feed_tx, feed_rx) = mpsc::channel(FEED_CHANNEL_SIZE);
        let (fatal_tx, fatal_rx) = mpsc::unbounded_channel();

        let mut handles = self.inner.task_handles.lock().await;

        handles.push(tokio::spawn(reconcile_task(cache, feed_rx, cancel.clone())));
        handles.push(tokio::spawn(refresh_cadence_task(
            Arc::clone(&session),
            fatal_tx.clone(),
            cancel.clone(),
        )));

        match config.feed {
            FeedMode::EventStream => {
                let connector = StreamConnector::new(
                    api,
                    session,
                    feed_tx,
                    fatal_tx,
                    self.inner.stream_state.clone(),
                    config.watchdog,
                );
                handles.push(tokio::spawn(connector.run(cancel.clone())));
            }
            FeedMode::Polling { interval } => {
                let poller = Poller::new(
                    api,
                    session,
                    Arc::clone(&self.inner.store),
                    feed_tx,
                    fatal_tx,
                    interval,
                );
                handles.push(tokio::spawn(poller.run(cancel.clone())));
            }
        }

        self.register_command_handler();
        if let Some(rx) = self.inner.command_rx.lock().await.take() {
            handles.push(tokio::spawn(command_processor_task(
                dispatcher,
                rx,
                cancel.clone(),
            )));
        }

        handles.push(tokio::spawn(fatal_monitor_task(self.clone(), fatal_rx)));
        Ok(())
    }

    /// Stop everything: cancel timers and tasks, wait for them, release the
    /// stream, invalidate the token, and report the connection as down.
    pub async fn shutdown(&self) {
        self.inner.cancel.cancel();

        // Join all background tasks. The connector drops its stream on exit.
        let mut handles = self.inner.task_handles.lock().await;
        for handle in handles.drain(..) {
            let _ = handle.await;
        }
        drop(handles);

        if let Some(session) = self.inner.session.lock().await.take() {
            session.logout().await;
        }

        self.publish_connection(false).await;
        self.inner.status.send_if_modified(|status| {
            if matches!(status, ServiceStatus::Failed(_)) {
                false
            } else {
                *status = ServiceStatus::Stopped;
                true
            }
        });
        debug!("service stopped");
    }

    /// Route host writes on the sink into the command processor. The
    /// outcome is recorded on the device's `LastActionResult` node.
    fn register_command_handler(&self) {
        let commands = self.inner.command_tx.clone();
        let status = self.inner.status.subscribe();
        self.inner.sink.on_command(Box::new(move |path, value| {
            if matches!(*status.borrow(), ServiceStatus::Stopped | ServiceStatus::Failed(_)) {
                debug!(%path, "service not running, write dropped");
                return;
            }
            let command = match Command::from_path(&path, value) {
                Ok(command) => command,
                Err(e) => {
                    warn!(%path, error = %e, "ignoring write");
                    return;
                }
            };
            let (response_tx, _) = oneshot::channel();
            if commands
                .try_send(CommandEnvelope {
                    command,
                    response_tx,
                })
                .is_err()
            {
                warn!(%path, "command queue full, write dropped");
            }
        }));
    }

    async fn publish_connection(&self, connected: bool) {
        if let Err(e) = self.inner.sink.notify_connection(connected).await {
            warn!(error = %e, "could not publish connection state");
        }
    }

    // ── Commands ─────────────────────────────────────────────────

    /// Execute a write intent against one device field.
    pub async fn dispatch(
        &self,
        device_id: &str,
        field: &str,
        value: Value,
    ) -> Result<CommandOutcome, CoreError> {
        self.execute(Command::new(device_id, field, value)).await
    }

    /// Send a command through the command processor and await its outcome.
    pub async fn execute(&self, command: Command) -> Result<CommandOutcome, CoreError> {
        if *self.inner.status.borrow() != ServiceStatus::Running {
            return Err(CoreError::NotRunning);
        }

        let (tx, rx) = oneshot::channel();
        self.inner
            .command_tx
            .send(CommandEnvelope {
                command,
                response_tx: tx,
            })
            .await
            .map_err(|_| CoreError::NotRunning)?;

        rx.await.map_err(|_| CoreError::NotRunning)?
    }

    // ── State observation ────────────────────────────────────────

    pub fn status(&self) -> watch::Receiver<ServiceStatus> {
        self.inner.status.subscribe()
    }

    /// State of the event stream connection. Stays `Closed` in polling mode.
    pub fn stream_state(&self) -> watch::Receiver<ConnectionState> {
        self.inner.stream_state.subscribe()
    }
}

// ── Background tasks ─────────────────────────────────────────────

/// Run commands one at a time, in arrival order.
async fn command_processor_task(
    dispatcher: Arc<CommandDispatcher>,
    mut rx: mpsc::Receiver<CommandEnvelope>,
    cancel: CancellationToken,
) {
    loop {
        tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            envelope = rx.recv() => {
                let Some(envelope) = envelope else { break };
                let result = dispatcher.execute(&envelope.command).await;
                let _ = envelope.response_tx.send(result);
            }
        }
    }
}

/// Turn the first fatal error into `Failed` and stop the other tasks.
async fn fatal_monitor_task(
    controller: Controller,
    mut fatal_rx: mpsc::UnboundedReceiver<CoreError>,
) {
    let cancel = controller.inner.cancel.clone();
    tokio::select! {
        biased;
        () = cancel.cancelled() => {}
        Some(e) = fatal_rx.recv() => {
            error!(error = %e, "fatal error, stopping service");
            controller
                .inner
                .status
                .send_replace(ServiceStatus::Failed(e.to_string()));
            cancel.cancel();
        }
    }
}

// ── Helpers ──────────────────────────────────────────────────────

/// Build a [`TransportConfig`] from the service configuration.
fn build_transport(config: &ServiceConfig) -> TransportConfig {
    TransportConfig {
        tls: tls_to_transport(&config.tls),
        timeout: config.timeout,
        ..TransportConfig::default()
    }
}

fn tls_to_transport(tls: &TlsVerification) -> TlsMode {
    match tls {
        TlsVerification::SystemDefaults => TlsMode::System,
        TlsVerification::CustomCa(path) => TlsMode::CustomCa(path.clone()),
    }
}

/// Apply `events` to a fresh device cache without contacting the cloud.
///
/// Program lists cannot be fetched offline and are cached as empty.
pub async fn replay(
    sink: Arc<dyn StateSink>,
    config: &ServiceConfig,
    events: Vec<FeedEvent>,
) -> Arc<DeviceStore> {
    let store = Arc::new(DeviceStore::new());
    let cache = DeviceCache::new(
        Arc::clone(&store),
        sink,
        Arc::new(crate::api::OfflineCloud),
        config.debounce,
        false,
    );
    for event in events {
        cache.handle(event).await;
    }
    if config.debounce.enabled {
        let settle = tokio::time::Instant::now() + config.debounce.window;
        cache.flush_due(settle).await;
    }
    store
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::time::Duration;

    use serde_json::json;

    use super::*;
    use crate::presentation::MemoryStateTree;
    use crate::test_support::{credentials, device_batch};

    fn config() -> ServiceConfig {
        ServiceConfig::new(
            url::Url::parse("http://127.0.0.1:9/").unwrap(),
            credentials(),
            "en",
        )
    }

    #[test]
    fn custom_ca_reaches_the_transport() {
        let mut config = config();
        config.tls = TlsVerification::CustomCa("/etc/ca.pem".into());
        config.timeout = Duration::from_secs(5);

        let transport = build_transport(&config);

        assert!(matches!(transport.tls, TlsMode::CustomCa(ref p) if p.ends_with("ca.pem")));
        assert_eq!(transport.timeout, Duration::from_secs(5));
    }

    #[tokio::test]
    async fn commands_require_a_running_service() {
        let controller = Controller::new(config(), Arc::new(MemoryStateTree::new()));

        let err = controller.dispatch("D1", "Power", json!(true)).await.unwrap_err();

        assert!(matches!(err, CoreError::NotRunning));
        assert_eq!(*controller.status().borrow(), ServiceStatus::Stopped);
    }

    #[tokio::test]
    async fn replay_projects_without_network() {
        let tree = Arc::new(MemoryStateTree::new());
        let events = vec![FeedEvent::Devices(device_batch(json!({
            "D1": {
                "ident": { "type": { "value_raw": 1, "value_localized": "Washing machine" } },
                "state": { "status": { "value_raw": 5, "value_localized": "In use" } },
            }
        })))];

        let store = replay(Arc::clone(&tree) as Arc<dyn StateSink>, &config(), events).await;

        assert_eq!(store.known_ids(), vec!["D1".to_string()]);
        assert_eq!(tree.value("D1.Status"), Some(json!("In use")));
    }

    #[test]
    fn failed_status_displays_its_reason() {
        let status = ServiceStatus::Failed("Authentication failed: invalid_grant".into());
        assert_eq!(status.to_string(), "Failed: Authentication failed: invalid_grant");
    }
}
