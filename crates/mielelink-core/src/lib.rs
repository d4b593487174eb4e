//! Runtime layer between `mielelink-api` and a host state tree.
//!
//! - **[`Controller`]**: supervisor for one run. [`connect()`](Controller::connect)
//!   logs in, then spawns the feed (event stream or poller), the reconciler,
//!   the token refresh cadence, and the command processor.
//!   [`shutdown()`](Controller::shutdown) tears them down in order.
//!
//! - **[`SessionManager`]**: OAuth2 token lifecycle with unbounded login
//!   retry, expiry-driven refresh, and liveness bookkeeping.
//!
//! - **Stream connector** ([`stream`]): the SSE connection state machine,
//!   with quadratic backoff, a single-recovery guard, and a heartbeat
//!   watchdog.
//!
//! - **[`DeviceCache`]**: merges device and action batches into
//!   per-device records, debounces bursts, loads program lists lazily,
//!   and publishes nodes through a [`StateSink`].
//!
//! - **[`CommandDispatcher`]**: turns node writes into action or program
//!   requests and records the outcome as the device's last action result.

pub mod api;
pub mod command;
pub mod config;
pub mod controller;
pub mod error;
pub mod feed;
mod poller;
pub mod presentation;
pub mod session;
pub mod store;
pub mod stream;

#[cfg(test)]
mod test_support;

// ── Primary re-exports ──────────────────────────────────────────────
pub use api::{CloudApi, CloudGateway, OfflineCloud};
pub use command::{Command, CommandDispatcher, CommandOutcome, Translation};
pub use config::{
    DebounceConfig, DebounceScope, FeedMode, ServiceConfig, SessionTiming, TlsVerification,
    WatchdogConfig,
};
pub use controller::{Controller, ServiceStatus, replay};
pub use error::CoreError;
pub use feed::FeedEvent;
pub use presentation::{
    CommandHandler, MemoryStateTree, NodeChange, NodeKind, NodeMeta, NodeUpdate, StateSink,
    ValueType,
};
pub use session::{Session, SessionManager, TokenEndpoint};
pub use store::{DeviceCache, DeviceRecord, DeviceStore, ProgramList};
pub use stream::ConnectionState;
