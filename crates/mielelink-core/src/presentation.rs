// ── Presentation interface ──
//
// The reconciler and dispatcher publish through `StateSink`, a narrow
// create/update interface over the host's hierarchical state tree. Host
// writes flow back through the registered `CommandHandler`.
// `MemoryStateTree` is the in-process implementation used by the binary
// and the tests.

use std::collections::BTreeMap;
use std::sync::Arc;

use arc_swap::ArcSwapOption;
use async_trait::async_trait;
use dashmap::DashMap;
use serde::Serialize;
use strum::Display;
use tokio::sync::{broadcast, watch};

use crate::error::CoreError;

const CHANGE_CHANNEL_SIZE: usize = 1024;

/// Path of the connection indicator node.
pub const CONNECTION_NODE: &str = "info.connection";

// ── Node metadata ────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Display)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum NodeKind {
    /// Root node of one appliance.
    Device,
    /// Grouping node (`IDENT`, `ACTIONS`, ...).
    Channel,
    /// Leaf carrying a value.
    State,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Display)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum ValueType {
    Boolean,
    Number,
    String,
}

/// Describes a node. Two metas compare equal when the node needs no
/// metadata update.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NodeMeta {
    pub kind: NodeKind,
    pub name: String,
    pub role: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value_type: Option<ValueType>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub unit: Option<String>,
    pub writable: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub min: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max: Option<f64>,
    /// Value labels for enumerated states.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub states: Option<BTreeMap<String, String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub icon: Option<String>,
}

impl NodeMeta {
    pub fn device(name: impl Into<String>, icon: impl Into<String>) -> Self {
        Self {
            icon: Some(icon.into()),
            ..Self::bare(NodeKind::Device, name, "device")
        }
    }

    pub fn channel(name: impl Into<String>) -> Self {
        Self::bare(NodeKind::Channel, name, "channel")
    }

    /// A read-only state.
    pub fn state(name: impl Into<String>, role: &str, value_type: ValueType) -> Self {
        Self {
            value_type: Some(value_type),
            ..Self::bare(NodeKind::State, name, role)
        }
    }

    #[must_use]
    pub fn writable(mut self) -> Self {
        self.writable = true;
        self
    }

    #[must_use]
    pub fn unit(mut self, unit: impl Into<String>) -> Self {
        self.unit = Some(unit.into());
        self
    }

    #[must_use]
    pub fn range(mut self, min: f64, max: f64) -> Self {
        self.min = Some(min);
        self.max = Some(max);
        self
    }

    #[must_use]
    pub fn states<K: ToString, V: Into<String>>(
        mut self,
        states: impl IntoIterator<Item = (K, V)>,
    ) -> Self {
        self.states = Some(
            states
                .into_iter()
                .map(|(k, v)| (k.to_string(), v.into()))
                .collect(),
        );
        self
    }

    fn bare(kind: NodeKind, name: impl Into<String>, role: &str) -> Self {
        Self {
            kind,
            name: name.into(),
            role: role.to_owned(),
            value_type: None,
            unit: None,
            writable: false,
            min: None,
            max: None,
            states: None,
            icon: None,
        }
    }
}

/// One create-or-update request.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NodeUpdate {
    pub path: String,
    pub meta: NodeMeta,
    /// `None` for device and channel nodes.
    pub value: Option<serde_json::Value>,
}

impl NodeUpdate {
    pub fn new(path: impl Into<String>, meta: NodeMeta, value: serde_json::Value) -> Self {
        Self {
            path: path.into(),
            meta,
            value: Some(value),
        }
    }

    /// A node without a value.
    pub fn structural(path: impl Into<String>, meta: NodeMeta) -> Self {
        Self {
            path: path.into(),
            meta,
            value: None,
        }
    }
}

// ── StateSink ────────────────────────────────────────────────────

/// Receives `(path, value)` for every host write to a writable node.
pub type CommandHandler = Box<dyn Fn(String, serde_json::Value) + Send + Sync>;

/// Where reconciled state goes.
#[async_trait]
pub trait StateSink: Send + Sync + 'static {
    /// Idempotent upsert: if the node exists with equal metadata only the
    /// value is written, otherwise the metadata is replaced first.
    async fn upsert_node(&self, update: NodeUpdate) -> Result<(), CoreError>;

    /// Report upstream connectivity.
    async fn notify_connection(&self, connected: bool) -> Result<(), CoreError>;

    /// Register the receiver of host writes, replacing any earlier one.
    fn on_command(&self, handler: CommandHandler);
}

// ── MemoryStateTree ──────────────────────────────────────────────

/// A value change observed on the tree.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NodeChange {
    pub path: String,
    pub value: serde_json::Value,
}

#[derive(Debug, Clone)]
struct Node {
    meta: NodeMeta,
    value: Option<serde_json::Value>,
}

/// In-memory [`StateSink`].
///
/// Broadcasts a [`NodeChange`] whenever a value is created or differs
/// from the stored one. [`write`](Self::write) is the host side: it hands
/// the value to the registered [`CommandHandler`] without storing it.
pub struct MemoryStateTree {
    nodes: DashMap<String, Node>,
    connected: watch::Sender<bool>,
    changes: broadcast::Sender<NodeChange>,
    command_handler: ArcSwapOption<CommandHandler>,
}

impl Default for MemoryStateTree {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStateTree {
    pub fn new() -> Self {
        let (connected, _) = watch::channel(false);
        let (changes, _) = broadcast::channel(CHANGE_CHANNEL_SIZE);
        Self {
            nodes: DashMap::new(),
            connected,
            changes,
            command_handler: ArcSwapOption::empty(),
        }
    }

    /// Write `value` to the node at `path` as the host would.
    ///
    /// Only writable nodes accept writes. The stored value is left alone;
    /// the device reports the new state on its own.
    pub fn write(&self, path: &str, value: serde_json::Value) -> Result<(), CoreError> {
        let writable = self.nodes.get(path).map(|n| n.meta.writable);
        match writable {
            None => Err(CoreError::InvalidCommand {
                message: format!("no node at '{path}'"),
            }),
            Some(false) => Err(CoreError::InvalidCommand {
                message: format!("'{path}' is read-only"),
            }),
            Some(true) => {
                let guard = self.command_handler.load();
                let handler = (*guard).as_deref().ok_or(CoreError::NotRunning)?;
                handler(path.to_owned(), value);
                Ok(())
            }
        }
    }

    pub fn value(&self, path: &str) -> Option<serde_json::Value> {
        self.nodes.get(path).and_then(|n| n.value.clone())
    }

    pub fn meta(&self, path: &str) -> Option<NodeMeta> {
        self.nodes.get(path).map(|n| n.meta.clone())
    }

    pub fn contains(&self, path: &str) -> bool {
        self.nodes.contains_key(path)
    }

    /// All node paths, sorted.
    pub fn paths(&self) -> Vec<String> {
        let mut paths: Vec<String> = self.nodes.iter().map(|e| e.key().clone()).collect();
        paths.sort();
        paths
    }

    /// Paths below `prefix.`, sorted.
    pub fn children(&self, prefix: &str) -> Vec<String> {
        let prefix = format!("{prefix}.");
        let mut paths: Vec<String> = self
            .nodes
            .iter()
            .filter(|e| e.key().starts_with(&prefix))
            .map(|e| e.key().clone())
            .collect();
        paths.sort();
        paths
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn is_connected(&self) -> bool {
        *self.connected.borrow()
    }

    pub fn watch_connection(&self) -> watch::Receiver<bool> {
        self.connected.subscribe()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<NodeChange> {
        self.changes.subscribe()
    }

    fn store(&self, update: NodeUpdate) {
        let NodeUpdate { path, meta, value } = update;
        let changed = {
            let mut node = self.nodes.entry(path.clone()).or_insert_with(|| Node {
                meta: meta.clone(),
                value: None,
            });
            if node.meta != meta {
                node.meta = meta;
            }
            match value {
                Some(v) if node.value.as_ref() != Some(&v) => {
                    node.value = Some(v.clone());
                    Some(v)
                }
                _ => None,
            }
        };
        if let Some(value) = changed {
            // No receivers is fine.
            let _ = self.changes.send(NodeChange { path, value });
        }
    }
}

#[async_trait]
impl StateSink for MemoryStateTree {
    async fn upsert_node(&self, update: NodeUpdate) -> Result<(), CoreError> {
        self.store(update);
        Ok(())
    }

    async fn notify_connection(&self, connected: bool) -> Result<(), CoreError> {
        self.connected.send_replace(connected);
        self.store(NodeUpdate::new(
            CONNECTION_NODE,
            NodeMeta::state("Cloud connection", "indicator.connected", ValueType::Boolean),
            serde_json::Value::Bool(connected),
        ));
        Ok(())
    }

    fn on_command(&self, handler: CommandHandler) {
        self.command_handler.store(Some(Arc::new(handler)));
    }
}
