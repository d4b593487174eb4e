// ── Event stream ──
//
// The push-mode data source: a pure connection state machine and the
// task that drives it against the cloud's server-sent event endpoint.

mod connector;
mod machine;

pub(crate) use connector::StreamConnector;
pub use machine::{backoff_delay, watchdog_expired, ConnectionMachine, ConnectionState, Directive};
