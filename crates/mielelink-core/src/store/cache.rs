// ── Device cache & reconciler ──
//
// Merges device and action batches from either feed into the record
// store, applies the debounce policy, loads program lists lazily, and
// publishes the resulting nodes to the state sink. A single reconcile
// task consumes the feed channel, so updates to one device are applied
// in ingest order.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use chrono::Local;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use mielelink_api::models::{ActionBatch, Device, DeviceBatch};

use super::collection::DeviceStore;
use super::projection;
use super::record::{DeviceRecord, ProgramList};
use crate::api::CloudApi;
use crate::config::{DebounceConfig, DebounceScope};
use crate::feed::FeedEvent;
use crate::presentation::{NodeUpdate, StateSink};

/// Key of a debounce slot.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum SlotKey {
    Global,
    Device(String),
}

/// A coalesced device update waiting for its window to pass.
#[derive(Debug, Clone)]
struct PendingUpdate {
    device_id: String,
    device: Device,
    deadline: Instant,
}

/// Owner of all [`DeviceRecord`]s.
pub struct DeviceCache {
    store: Arc<DeviceStore>,
    sink: Arc<dyn StateSink>,
    api: Arc<dyn CloudApi>,
    debounce: DebounceConfig,
    retry_failed_program_loads: bool,
    pending: Mutex<HashMap<SlotKey, PendingUpdate>>,
}

impl DeviceCache {
    pub fn new(
        store: Arc<DeviceStore>,
        sink: Arc<dyn StateSink>,
        api: Arc<dyn CloudApi>,
        debounce: DebounceConfig,
        retry_failed_program_loads: bool,
    ) -> Self {
        Self {
            store,
            sink,
            api,
            debounce,
            retry_failed_program_loads,
            pending: Mutex::new(HashMap::new()),
        }
    }

    pub fn store(&self) -> &Arc<DeviceStore> {
        &self.store
    }

    // ── Device batches ───────────────────────────────────────────

    /// Create unseen devices, then apply or stash each snapshot.
    pub async fn ingest_device_batch(&self, batch: DeviceBatch) {
        for (id, device) in batch {
            let now = Instant::now();
            if self.store.insert_new(DeviceRecord::new(&id, &device, now)) {
                info!(device = %id, "new device registered");
                if let Some(record) = self.store.get(&id) {
                    self.publish(vec![projection::device_node(&record)]).await;
                }
            }

            if !self.debounce.enabled {
                self.apply_device(&id, &device, now).await;
                continue;
            }

            let last = self
                .store
                .get(&id)
                .map_or(now, |r| r.last_message_time);
            if now.saturating_duration_since(last) < self.debounce.window {
                debug!(device = %id, "burst within debounce window, deferring update");
                self.stash(id, device, now + self.debounce.window);
            } else {
                self.apply_device(&id, &device, now).await;
            }
        }
    }

    fn stash(&self, device_id: String, device: Device, deadline: Instant) {
        let key = match self.debounce.scope {
            DebounceScope::Global => SlotKey::Global,
            DebounceScope::PerDevice => SlotKey::Device(device_id.clone()),
        };
        let mut pending = self.pending.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        pending.insert(
            key,
            PendingUpdate {
                device_id,
                device,
                deadline,
            },
        );
    }

    /// Earliest pending flush, if any.
    pub fn next_deadline(&self) -> Option<Instant> {
        let pending = self.pending.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        pending.values().map(|p| p.deadline).min()
    }

    /// Apply every stashed update whose window has passed.
    pub async fn flush_due(&self, now: Instant) {
        let due: Vec<PendingUpdate> = {
            let mut pending =
                self.pending.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
            let keys: Vec<SlotKey> = pending
                .iter()
                .filter(|(_, p)| p.deadline <= now)
                .map(|(k, _)| k.clone())
                .collect();
            keys.iter().filter_map(|k| pending.remove(k)).collect()
        };

        for update in due {
            debug!(device = %update.device_id, "flushing deferred update");
            self.apply_device(&update.device_id, &update.device, now).await;
        }
    }

    async fn apply_device(&self, id: &str, device: &Device, now: Instant) {
        let nodes = self.store.modify(id, |record| {
            record.merge(device);
            record.touch(now);
            projection::project_device(record, Local::now())
        });
        if let Some(nodes) = nodes {
            self.publish(nodes).await;
        }
    }

    // ── Action batches ───────────────────────────────────────────

    /// Merge action snapshots of known devices. Unknown ids are skipped.
    pub async fn ingest_action_batch(&self, batch: ActionBatch) {
        for (id, actions) in batch {
            let powered_on = actions.is_powered_on();
            let applied = self.store.modify(&id, |record| {
                record.actions = Some(actions);
                (projection::project_actions(record), record.type_code)
            });
            let Some((nodes, type_code)) = applied else {
                debug!(device = %id, "actions for unknown device, skipping");
                continue;
            };
            self.publish(nodes).await;

            if powered_on && projection::offers_power(type_code) {
                self.ensure_programs_loaded(&id).await;
            }
        }
    }

    // ── Programs ─────────────────────────────────────────────────

    /// Fetch and cache the program list once. A load in flight counts as
    /// present; so does an empty list cached after a failure, unless
    /// failed loads are configured to be retried.
    pub async fn ensure_programs_loaded(&self, id: &str) {
        let claimed = self.store.modify(id, |record| {
            if record.programs.is_absent() {
                record.programs = ProgramList::Loading;
                true
            } else {
                false
            }
        });
        match claimed {
            None => {
                debug!(device = %id, "cannot load programs of unknown device");
                return;
            }
            Some(false) => {
                debug!(device = %id, "programs already registered, skipping query");
                return;
            }
            Some(true) => {}
        }

        let programs = match self.api.fetch_programs(id).await {
            Ok(list) if !list.is_empty() => {
                debug!(device = %id, count = list.len(), "programs loaded");
                ProgramList::Loaded(list)
            }
            Ok(_) => {
                info!(device = %id, "no programs returned for device");
                self.failed_program_load()
            }
            Err(e) => {
                info!(device = %id, error = %e, "could not load programs");
                self.failed_program_load()
            }
        };

        let nodes = self.store.modify(id, |record| {
            record.programs = programs;
            projection::program_nodes(record)
        });
        if let Some(nodes) = nodes {
            self.publish(nodes).await;
        }
    }

    fn failed_program_load(&self) -> ProgramList {
        if self.retry_failed_program_loads {
            ProgramList::Absent
        } else {
            ProgramList::Loaded(Vec::new())
        }
    }

    // ── Command results ──────────────────────────────────────────

    /// Record the outcome of a write on the device and its result node.
    pub async fn record_action_result(&self, id: &str, text: &str) {
        self.store
            .modify(id, |record| record.last_action_result = Some(text.to_owned()));
        self.publish(vec![projection::last_action_result_node(id, text)])
            .await;
    }

    // ── Feed ─────────────────────────────────────────────────────

    pub async fn handle(&self, event: FeedEvent) {
        match event {
            FeedEvent::Devices(batch) => self.ingest_device_batch(batch).await,
            FeedEvent::Actions(batch) => self.ingest_action_batch(batch).await,
            FeedEvent::Heartbeat => debug!("heartbeat"),
            FeedEvent::StreamError { count } => debug!(count, "stream error reported"),
            FeedEvent::Connection(connected) => {
                if let Err(e) = self.sink.notify_connection(connected).await {
                    warn!(error = %e, "could not publish connection state");
                }
            }
        }
    }

    async fn publish(&self, nodes: Vec<NodeUpdate>) {
        for node in nodes {
            let path = node.path.clone();
            if let Err(e) = self.sink.upsert_node(node).await {
                warn!(%path, error = %e, "state sink rejected node");
            }
        }
    }
}

/// The reconcile task: consumes the feed and fires debounce flushes.
pub(crate) async fn reconcile_task(
    cache: Arc<DeviceCache>,
    mut feed_rx: mpsc::Receiver<FeedEvent>,
    cancel: CancellationToken,
) {
    loop {
        let deadline = cache.next_deadline();
        tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            () = sleep_until(deadline), if deadline.is_some() => {
                cache.flush_due(Instant::now()).await;
            }
            event = feed_rx.recv() => {
                let Some(event) = event else { break };
                cache.handle(event).await;
            }
        }
    }
    debug!("reconcile task stopped");
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(at) => tokio::time::sleep_until(at).await,
        None => std::future::pending().await,
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::sync::atomic::Ordering;
    use std::time::Duration;

    use mielelink_api::models::Program;
    use serde_json::json;

    use super::*;
    use crate::test_support::{action_batch, device_batch, FakeCloud, RecordingSink};

    fn cache(
        cloud: &Arc<FakeCloud>,
        sink: &Arc<RecordingSink>,
        debounce: DebounceConfig,
    ) -> DeviceCache {
        DeviceCache::new(
            Arc::new(DeviceStore::new()),
            Arc::clone(sink) as Arc<dyn StateSink>,
            Arc::clone(cloud) as Arc<dyn CloudApi>,
            debounce,
            false,
        )
    }

    fn washer(id: &str, status: &str) -> DeviceBatch {
        device_batch(json!({
            id: {
                "ident": { "type": { "value_raw": 1, "value_localized": "Washing machine" } },
                "state": { "status": { "value_raw": 5, "value_localized": status } },
            }
        }))
    }

    fn debounced(scope: DebounceScope) -> DebounceConfig {
        DebounceConfig {
            enabled: true,
            window: Duration::from_secs(1),
            scope,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn unseen_device_is_created_once() {
        let (cloud, sink) = (FakeCloud::new(), RecordingSink::new());
        let cache = cache(&cloud, &sink, DebounceConfig::default());

        cache.ingest_device_batch(washer("D1", "Off")).await;
        cache.ingest_device_batch(washer("D1", "On")).await;

        assert_eq!(sink.count("D1"), 1);
        assert_eq!(sink.values("D1.Status"), vec![json!("Off"), json!("On")]);
        let record = cache.store().get("D1").unwrap();
        assert_eq!(record.display_name, "Washing machine");
    }

    #[tokio::test(start_paused = true)]
    async fn burst_within_window_applies_second_payload_once() {
        let (cloud, sink) = (FakeCloud::new(), RecordingSink::new());
        let cache = cache(&cloud, &sink, debounced(DebounceScope::Global));

        cache.ingest_device_batch(washer("D1", "first")).await;
        tokio::time::advance(Duration::from_millis(200)).await;
        cache.ingest_device_batch(washer("D1", "second")).await;
        assert_eq!(sink.count("D1.Status"), 0);

        tokio::time::advance(Duration::from_millis(999)).await;
        cache.flush_due(Instant::now()).await;
        assert_eq!(sink.count("D1.Status"), 0);

        tokio::time::advance(Duration::from_millis(1)).await;
        cache.flush_due(Instant::now()).await;
        assert_eq!(sink.values("D1.Status"), vec![json!("second")]);
        assert!(cache.next_deadline().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn global_scope_keeps_only_the_latest_device() {
        let (cloud, sink) = (FakeCloud::new(), RecordingSink::new());
        let cache = cache(&cloud, &sink, debounced(DebounceScope::Global));

        cache.ingest_device_batch(washer("D1", "a")).await;
        cache.ingest_device_batch(washer("D2", "b")).await;
        tokio::time::advance(Duration::from_secs(1)).await;
        cache.flush_due(Instant::now()).await;

        assert_eq!(sink.count("D1.Status"), 0);
        assert_eq!(sink.values("D2.Status"), vec![json!("b")]);
    }

    #[tokio::test(start_paused = true)]
    async fn per_device_scope_flushes_every_device() {
        let (cloud, sink) = (FakeCloud::new(), RecordingSink::new());
        let cache = cache(&cloud, &sink, debounced(DebounceScope::PerDevice));

        cache.ingest_device_batch(washer("D1", "a")).await;
        cache.ingest_device_batch(washer("D2", "b")).await;
        tokio::time::advance(Duration::from_secs(1)).await;
        cache.flush_due(Instant::now()).await;

        assert_eq!(sink.values("D1.Status"), vec![json!("a")]);
        assert_eq!(sink.values("D2.Status"), vec![json!("b")]);
    }

    #[tokio::test(start_paused = true)]
    async fn quiet_device_is_applied_immediately() {
        let (cloud, sink) = (FakeCloud::new(), RecordingSink::new());
        let cache = cache(&cloud, &sink, debounced(DebounceScope::Global));

        cache.ingest_device_batch(washer("D1", "a")).await;
        tokio::time::advance(Duration::from_secs(1)).await;
        cache.flush_due(Instant::now()).await;
        tokio::time::advance(Duration::from_secs(5)).await;
        cache.ingest_device_batch(washer("D1", "b")).await;

        assert_eq!(sink.values("D1.Status"), vec![json!("a"), json!("b")]);
    }

    #[tokio::test(start_paused = true)]
    async fn actions_for_unknown_devices_are_skipped() {
        let (cloud, sink) = (FakeCloud::new(), RecordingSink::new());
        let cache = cache(&cloud, &sink, DebounceConfig::default());

        cache
            .ingest_action_batch(action_batch(json!({ "ghost": { "powerOff": true } })))
            .await;

        assert!(cache.store().known_ids().is_empty());
        assert!(sink.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn power_on_loads_programs_exactly_once() {
        let (cloud, sink) = (FakeCloud::new(), RecordingSink::new());
        *cloud.programs.lock().unwrap() = Some(vec![Program {
            program_id: 13,
            program: "Cottons".into(),
        }]);
        let cache = cache(&cloud, &sink, DebounceConfig::default());
        cache.ingest_device_batch(washer("D1", "On")).await;

        let on = action_batch(json!({ "D1": { "powerOff": true } }));
        cache.ingest_action_batch(on.clone()).await;
        cache.ingest_action_batch(on).await;

        assert_eq!(cloud.program_fetches.load(Ordering::SeqCst), 1);
        assert_eq!(sink.values("D1.ACTIONS.Power"), vec![json!(true), json!(true)]);
        assert_eq!(sink.count("D1.ACTIONS.13"), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn concurrent_program_loads_fetch_once() {
        let (cloud, sink) = (FakeCloud::new(), RecordingSink::new());
        *cloud.programs.lock().unwrap() = Some(vec![]);
        *cloud.program_latency.lock().unwrap() = Duration::from_millis(500);
        let cache = cache(&cloud, &sink, DebounceConfig::default());
        cache.ingest_device_batch(washer("D1", "On")).await;

        tokio::join!(
            cache.ensure_programs_loaded("D1"),
            cache.ensure_programs_loaded("D1")
        );

        assert_eq!(cloud.program_fetches.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn failed_program_load_is_terminal_by_default() {
        let (cloud, sink) = (FakeCloud::new(), RecordingSink::new());
        let cache = cache(&cloud, &sink, DebounceConfig::default());
        cache.ingest_device_batch(washer("D1", "On")).await;

        cache.ensure_programs_loaded("D1").await;
        cache.ensure_programs_loaded("D1").await;

        assert_eq!(cloud.program_fetches.load(Ordering::SeqCst), 1);
        let record = cache.store().get("D1").unwrap();
        assert_eq!(record.programs, ProgramList::Loaded(Vec::new()));
    }

    #[tokio::test(start_paused = true)]
    async fn failed_program_load_can_be_retried() {
        let (cloud, sink) = (FakeCloud::new(), RecordingSink::new());
        let cache = DeviceCache::new(
            Arc::new(DeviceStore::new()),
            Arc::clone(&sink) as Arc<dyn StateSink>,
            Arc::clone(&cloud) as Arc<dyn CloudApi>,
            DebounceConfig::default(),
            true,
        );
        cache.ingest_device_batch(washer("D1", "On")).await;

        cache.ensure_programs_loaded("D1").await;
        cache.ensure_programs_loaded("D1").await;

        assert_eq!(cloud.program_fetches.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn reconcile_task_flushes_on_its_own() {
        let (cloud, sink) = (FakeCloud::new(), RecordingSink::new());
        let cache = Arc::new(cache(&cloud, &sink, debounced(DebounceScope::Global)));
        let (tx, rx) = mpsc::channel(8);
        let cancel = CancellationToken::new();
        let handle = tokio::spawn(reconcile_task(Arc::clone(&cache), rx, cancel.clone()));

        tx.send(FeedEvent::Devices(washer("D1", "x"))).await.unwrap();
        tx.send(FeedEvent::Connection(true)).await.unwrap();
        tokio::time::sleep(Duration::from_secs(2)).await;

        assert_eq!(sink.values("D1.Status"), vec![json!("x")]);
        assert_eq!(*sink.connection.lock().unwrap(), vec![true]);

        cancel.cancel();
        handle.await.unwrap();
    }
}
