// Wire types for the cloud API.
//
// Every struct is lenient: absent fields fall back to defaults so a device
// family that omits a block never fails the whole batch.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

/// Raw sentinel the cloud uses for "no temperature reading".
pub const TEMPERATURE_UNSET: i64 = -32768;

/// `light` action value that switches the light on.
pub const LIGHT_ON: u8 = 1;
/// `light` action value that switches the light off.
pub const LIGHT_OFF: u8 = 2;

/// A device batch: API device id -> device snapshot, in server order.
pub type DeviceBatch = IndexMap<String, Device>;

/// An action batch: API device id -> supported actions.
pub type ActionBatch = IndexMap<String, DeviceActions>;

// ── Devices ─────────────────────────────────────────────────────────

/// One device as returned by `GET v1/devices` and the `devices` event.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Device {
    #[serde(default)]
    pub ident: DeviceIdent,
    #[serde(default)]
    pub state: DeviceState,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceIdent {
    #[serde(default, rename = "type")]
    pub device_type: LocalizedValue,
    #[serde(default)]
    pub device_name: String,
    #[serde(default)]
    pub protocol_version: Option<i64>,
    #[serde(default)]
    pub device_ident_label: DeviceIdentLabel,
    #[serde(default)]
    pub xkm_ident_label: XkmIdentLabel,
}

impl DeviceIdent {
    /// Numeric device type code (`1` = washing machine, `12` = oven, ...).
    pub fn type_code(&self) -> Option<i64> {
        self.device_type.value_raw
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceIdentLabel {
    #[serde(default)]
    pub fab_number: String,
    #[serde(default)]
    pub fab_index: String,
    #[serde(default)]
    pub tech_type: String,
    #[serde(default)]
    pub mat_number: String,
}

/// Communication module identification.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct XkmIdentLabel {
    #[serde(default)]
    pub tech_type: String,
    #[serde(default)]
    pub release_version: String,
}

/// The `{value_raw, value_localized, key_localized}` triple the cloud
/// uses for every enumerated value.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LocalizedValue {
    #[serde(default)]
    pub value_raw: Option<i64>,
    /// Usually a string, occasionally a number.
    #[serde(default)]
    pub value_localized: Option<serde_json::Value>,
    #[serde(default)]
    pub key_localized: Option<String>,
    #[serde(default)]
    pub unit: Option<String>,
}

impl LocalizedValue {
    /// The localized value rendered as text (empty when absent).
    pub fn localized_text(&self) -> String {
        match &self.value_localized {
            Some(serde_json::Value::String(s)) => s.clone(),
            Some(serde_json::Value::Null) | None => String::new(),
            Some(other) => other.to_string(),
        }
    }
}

/// A temperature reading or target for one zone.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Temperature {
    #[serde(default)]
    pub value_raw: Option<i64>,
    #[serde(default)]
    pub value_localized: Option<f64>,
    #[serde(default)]
    pub unit: Option<String>,
}

impl Temperature {
    /// `true` when the cloud reported an actual reading for this zone.
    pub fn is_set(&self) -> bool {
        matches!(self.value_raw, Some(raw) if raw != TEMPERATURE_UNSET)
    }

    /// Display unit symbol.
    pub fn unit_symbol(&self) -> &'static str {
        if self.unit.as_deref() == Some("Celsius") {
            "°C"
        } else {
            "°F"
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteEnable {
    #[serde(default)]
    pub full_remote_control: bool,
    #[serde(default)]
    pub smart_grid: bool,
    #[serde(default)]
    pub mobile_start: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Consumption {
    #[serde(default)]
    pub unit: Option<String>,
    #[serde(default)]
    pub value: Option<f64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EcoFeedback {
    #[serde(default)]
    pub current_water_consumption: Option<Consumption>,
    #[serde(default)]
    pub current_energy_consumption: Option<Consumption>,
    #[serde(default)]
    pub water_forecast: Option<f64>,
    #[serde(default)]
    pub energy_forecast: Option<f64>,
}

/// Live state block of a device.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceState {
    #[serde(default, rename = "ProgramID")]
    pub program_id: LocalizedValue,
    #[serde(default)]
    pub status: LocalizedValue,
    #[serde(default)]
    pub program_type: LocalizedValue,
    #[serde(default)]
    pub program_phase: LocalizedValue,
    /// `[hours, minutes]`
    #[serde(default)]
    pub remaining_time: Vec<u32>,
    #[serde(default)]
    pub start_time: Vec<u32>,
    #[serde(default)]
    pub elapsed_time: Vec<u32>,
    #[serde(default)]
    pub target_temperature: Vec<Temperature>,
    #[serde(default)]
    pub temperature: Vec<Temperature>,
    #[serde(default)]
    pub signal_info: bool,
    #[serde(default)]
    pub signal_failure: bool,
    #[serde(default)]
    pub signal_door: bool,
    #[serde(default)]
    pub remote_enable: RemoteEnable,
    #[serde(default)]
    pub light: Option<i64>,
    #[serde(default)]
    pub spinning_speed: LocalizedValue,
    #[serde(default)]
    pub drying_step: LocalizedValue,
    #[serde(default)]
    pub ventilation_step: LocalizedValue,
    #[serde(default)]
    pub plate_step: Vec<LocalizedValue>,
    #[serde(default)]
    pub eco_feedback: Option<EcoFeedback>,
    #[serde(default)]
    pub battery_level: Option<i64>,
}

// ── Actions ─────────────────────────────────────────────────────────

/// Allowed temperature range for one zone.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TemperatureRange {
    pub zone: u8,
    #[serde(default)]
    pub min: Option<i64>,
    #[serde(default)]
    pub max: Option<i64>,
}

/// Actions a device currently accepts (`GET v1/devices/{id}/actions`).
///
/// The default value is the "all actions disabled" shape.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DeviceActions {
    pub process_action: Vec<u8>,
    pub light: Vec<u8>,
    pub ambient_light: Vec<u8>,
    pub start_time: Vec<Vec<u32>>,
    pub ventilation_step: Vec<u8>,
    pub program_id: Vec<u32>,
    pub target_temperature: Vec<TemperatureRange>,
    pub device_name: bool,
    pub power_on: bool,
    pub power_off: bool,
    pub colors: Vec<String>,
    pub modes: Vec<u8>,
}

impl DeviceActions {
    /// Every action disabled. Used when the cloud does not know the device.
    pub fn all_disabled() -> Self {
        Self::default()
    }

    /// The device does not offer powering on, i.e. it is already on.
    pub fn is_powered_on(&self) -> bool {
        !self.power_on
    }

    /// The light is on when switching it off is offered.
    pub fn is_light_on(&self) -> bool {
        self.light.contains(&LIGHT_OFF)
    }
}

// ── Programs ────────────────────────────────────────────────────────

/// One entry of `GET v1/devices/{id}/programs`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Program {
    pub program_id: u32,
    #[serde(default)]
    pub program: String,
}

// ── Requests ────────────────────────────────────────────────────────

/// Target temperature for a single zone in an action request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ZoneTemperature {
    pub zone: u8,
    pub value: f64,
}

/// Body of `PUT v1/devices/{id}/actions`. Only set fields are sent.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ActionRequest {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub process_action: Option<u8>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub light: Option<u8>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ventilation_step: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target_temperature: Option<Vec<ZoneTemperature>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub device_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub power_on: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub power_off: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub colors: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub modes: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub start_time: Option<[u32; 2]>,
}

/// Body of `PUT v1/devices/{id}/programs`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgramRequest {
    pub program_id: u32,
}

// ── Responses ───────────────────────────────────────────────────────

/// How the cloud acknowledged a write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Acknowledgement {
    /// HTTP 202.
    Accepted,
    /// HTTP 204.
    NoContent,
    /// A body carrying a `message` field.
    Message(String),
    /// Any other success.
    Ok,
}

impl std::fmt::Display for Acknowledgement {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Accepted => f.write_str("Accepted, processing has not been completed."),
            Self::NoContent => f.write_str("OK, no content."),
            Self::Message(m) => f.write_str(m),
            Self::Ok => f.write_str("OK"),
        }
    }
}

/// Error body shape: `{"message": "..."}`.
#[derive(Debug, Deserialize)]
pub(crate) struct MessageBody {
    pub message: Option<String>,
}
