// ── Device record ──

use mielelink_api::models::{Device, DeviceActions, DeviceIdent, DeviceState, Program};
use tokio::time::Instant;

/// Lazy program list of one device.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum ProgramList {
    /// Never requested.
    #[default]
    Absent,
    /// A fetch is in flight. Counts as present.
    Loading,
    /// Fetched, possibly empty.
    Loaded(Vec<Program>),
}

impl ProgramList {
    pub fn is_absent(&self) -> bool {
        matches!(self, Self::Absent)
    }
}

/// The cached, authoritative snapshot of one appliance.
#[derive(Debug, Clone)]
pub struct DeviceRecord {
    /// Stable API id (the fabrication number).
    pub id: String,
    pub display_name: String,
    pub type_code: Option<i64>,
    pub icon_ref: String,
    /// Only moves forward.
    pub last_message_time: Instant,
    pub ident: DeviceIdent,
    pub state: DeviceState,
    pub actions: Option<DeviceActions>,
    pub programs: ProgramList,
    pub last_action_result: Option<String>,
}

impl DeviceRecord {
    pub(crate) fn new(id: &str, device: &Device, now: Instant) -> Self {
        let type_code = device.ident.type_code();
        Self {
            id: id.to_owned(),
            display_name: display_name(&device.ident),
            type_code,
            icon_ref: format!("icons/{}.svg", type_code.unwrap_or(0)),
            last_message_time: now,
            ident: device.ident.clone(),
            state: device.state.clone(),
            actions: None,
            programs: ProgramList::Absent,
            last_action_result: None,
        }
    }

    /// Merge a fresh ident+state snapshot.
    pub(crate) fn merge(&mut self, device: &Device) {
        self.ident = device.ident.clone();
        self.state = device.state.clone();
        self.display_name = display_name(&device.ident);
        if let Some(code) = device.ident.type_code() {
            self.type_code = Some(code);
        }
    }

    pub(crate) fn touch(&mut self, now: Instant) {
        if now > self.last_message_time {
            self.last_message_time = now;
        }
    }
}

/// The user-assigned nickname, falling back to the localized type name.
fn display_name(ident: &DeviceIdent) -> String {
    if ident.device_name.is_empty() {
        ident.device_type.localized_text()
    } else {
        ident.device_name.clone()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::time::Duration;

    use serde_json::json;

    use super::*;

    fn device(name: &str) -> Device {
        serde_json::from_value(json!({
            "ident": {
                "type": { "value_raw": 12, "value_localized": "Oven" },
                "deviceName": name,
            }
        }))
        .unwrap()
    }

    #[test]
    fn display_name_falls_back_to_type() {
        let now = Instant::now();
        assert_eq!(DeviceRecord::new("D1", &device(""), now).display_name, "Oven");

        let record = DeviceRecord::new("D1", &device("Kitchen"), now);
        assert_eq!(record.display_name, "Kitchen");
        assert_eq!(record.icon_ref, "icons/12.svg");
        assert_eq!(record.type_code, Some(12));
    }

    #[test]
    fn last_message_time_never_moves_back() {
        let now = Instant::now();
        let mut record = DeviceRecord::new("D1", &device(""), now + Duration::from_secs(5));
        record.touch(now);
        assert_eq!(record.last_message_time, now + Duration::from_secs(5));
    }
}
