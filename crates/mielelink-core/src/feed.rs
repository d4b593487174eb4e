// ── Feed events ──
//
// What the stream connector and the poller hand to the reconciler.

use mielelink_api::models::{ActionBatch, DeviceBatch};
use serde::de::DeserializeOwned;
use tracing::warn;

/// One unit of work for the reconcile task.
#[derive(Debug, Clone)]
pub enum FeedEvent {
    /// Device snapshots, from a `devices` event or a poll.
    Devices(DeviceBatch),
    /// Supported actions, from an `actions` event or a poll.
    Actions(ActionBatch),
    /// A `ping` arrived. Liveness only, never changes connection state.
    Heartbeat,
    /// The stream reported an error; `count` is the connector's error counter.
    StreamError { count: u32 },
    /// Upstream connectivity changed.
    Connection(bool),
}

/// Parse an event payload, logging and dropping malformed ones.
pub(crate) fn parse_payload<T: DeserializeOwned>(event: &str, data: &str) -> Option<T> {
    match serde_json::from_str(data) {
        Ok(parsed) => Some(parsed),
        Err(e) => {
            warn!(event, error = %e, "dropping malformed event payload");
            None
        }
    }
}

/// Turn a named stream event into a feed event. `None` for anything that
/// is not a device or action batch.
pub(crate) fn from_stream_event(event: &str, data: &str) -> Option<FeedEvent> {
    match event {
        "devices" => parse_payload(event, data).map(FeedEvent::Devices),
        "actions" => parse_payload(event, data).map(FeedEvent::Actions),
        _ => None,
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn devices_event_becomes_device_batch() {
        let data = r#"{"000123":{"ident":{"type":{"value_raw":1}},"state":{}}}"#;
        let Some(FeedEvent::Devices(batch)) = from_stream_event("devices", data) else {
            panic!("expected a device batch");
        };
        assert_eq!(batch.len(), 1);
        assert_eq!(batch["000123"].ident.type_code(), Some(1));
    }

    #[test]
    fn actions_event_becomes_action_batch() {
        let data = r#"{"000123":{"processAction":[1],"powerOff":true}}"#;
        let Some(FeedEvent::Actions(batch)) = from_stream_event("actions", data) else {
            panic!("expected an action batch");
        };
        assert_eq!(batch["000123"].process_action, vec![1]);
    }

    #[test]
    fn malformed_or_unknown_events_are_dropped() {
        assert!(from_stream_event("devices", "{not json").is_none());
        assert!(from_stream_event("ping", "").is_none());
    }
}
