// ── Polling fallback ──
//
// Pull-mode replacement for the event stream: on every tick fetch the
// device list, then, after a short pause, the actions of every known
// device. A failed fetch means "no update this cycle" and is never retried
// outside the cadence.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use mielelink_api::models::ActionBatch;
use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::api::CloudApi;
use crate::error::CoreError;
use crate::feed::FeedEvent;
use crate::session::SessionManager;
use crate::store::DeviceStore;

/// Pause between the device fetch and the action fetches of one cycle.
const ACTIONS_DELAY: Duration = Duration::from_secs(1);

pub(crate) struct Poller {
    api: Arc<dyn CloudApi>,
    session: Arc<SessionManager>,
    store: Arc<DeviceStore>,
    feed_tx: mpsc::Sender<FeedEvent>,
    fatal_tx: mpsc::UnboundedSender<CoreError>,
    interval: Duration,
    live: Option<bool>,
}

/// Why a cycle ended early.
#[derive(Debug)]
enum Halt {
    Cancelled,
    FeedClosed,
}

impl Poller {
    pub(crate) fn new(
        api: Arc<dyn CloudApi>,
        session: Arc<SessionManager>,
        store: Arc<DeviceStore>,
        feed_tx: mpsc::Sender<FeedEvent>,
        fatal_tx: mpsc::UnboundedSender<CoreError>,
        interval: Duration,
    ) -> Self {
        Self {
            api,
            session,
            store,
            feed_tx,
            fatal_tx,
            interval,
            live: None,
        }
    }

    /// Poll until cancelled. The first cycle runs immediately.
    pub(crate) async fn run(mut self, cancel: CancellationToken) {
        info!(interval_secs = self.interval.as_secs(), "polling for device updates");
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                () = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    match self.poll_once(&cancel).await {
                        Ok(()) => {}
                        Err(Halt::Cancelled) => break,
                        Err(Halt::FeedClosed) => {
                            debug!("reconciler gone, poller exiting");
                            return;
                        }
                    }
                }
            }
        }
        debug!("poller cancelled");
    }

    async fn poll_once(&mut self, cancel: &CancellationToken) -> Result<(), Halt> {
        let batch = match self.api.fetch_devices().await {
            Ok(batch) => batch,
            Err(CoreError::AuthError { message }) => {
                warn!(%message, "device poll refused the access token, refreshing");
                if let Err(e) = self.session.refresh().await {
                    if e.is_fatal() {
                        let _ = self.fatal_tx.send(e);
                    }
                }
                return self.set_live(false).await;
            }
            Err(e) => {
                warn!(error = %e, "device poll failed, skipping this cycle");
                return self.set_live(false).await;
            }
        };

        let mut ids: BTreeSet<String> = batch.keys().cloned().collect();
        debug!(devices = batch.len(), "device poll succeeded");
        self.send(FeedEvent::Devices(batch)).await?;
        self.session.record_ping();
        self.set_live(true).await?;

        tokio::select! {
            biased;
            () = cancel.cancelled() => return Err(Halt::Cancelled),
            () = tokio::time::sleep(ACTIONS_DELAY) => {}
        }

        ids.extend(self.store.known_ids());
        for id in ids {
            match self.api.fetch_actions(&id).await {
                Ok(actions) => {
                    let mut batch = ActionBatch::new();
                    batch.insert(id, actions);
                    self.send(FeedEvent::Actions(batch)).await?;
                }
                Err(e) => warn!(device = %id, error = %e, "action poll failed"),
            }
        }
        Ok(())
    }

    async fn set_live(&mut self, live: bool) -> Result<(), Halt> {
        if self.live == Some(live) {
            return Ok(());
        }
        self.live = Some(live);
        self.send(FeedEvent::Connection(live)).await
    }

    async fn send(&self, event: FeedEvent) -> Result<(), Halt> {
        self.feed_tx.send(event).await.map_err(|_| Halt::FeedClosed)
    }
}
