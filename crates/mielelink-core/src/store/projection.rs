// ── Field projection ──
//
// Maps a device record onto presentation nodes. Which state fields and
// which action controls a device exposes is decided by two lookup tables
// keyed by the device type code; the builders below never branch on the
// type themselves.

use chrono::{DateTime, Local};
use serde_json::{json, Value};

use mielelink_api::models::{DeviceIdent, DeviceState, EcoFeedback, Temperature};

use super::record::{DeviceRecord, ProgramList};
use crate::presentation::{NodeMeta, NodeUpdate, ValueType};

/// `processAction` value offered while super freezing is running.
const STOP_SUPERFREEZING: u8 = 5;
/// `processAction` value offered while super cooling is running.
const STOP_SUPERCOOLING: u8 = 7;

/// Raw status meaning "off".
const STATUS_OFF: i64 = 1;
/// Raw status meaning "not connected".
const STATUS_NOT_CONNECTED: i64 = 255;

const COLORS: [&str; 9] = [
    "white", "blue", "red", "yellow", "orange", "green", "pink", "purple", "turquoise",
];

// ── Tables ───────────────────────────────────────────────────────

/// Type-dependent state fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StateField {
    ProgramId,
    ProgramType,
    ProgramPhase,
    RemainingTime,
    StartTime,
    ElapsedTime,
    EstimatedEndTime,
    SignalInfo,
    SignalDoor,
    RemoteEnable,
    SpinningSpeed,
    DryingStep,
    EcoEnergy,
    EcoWater,
    Temperature,
    TargetTemperature,
    VentilationStep,
    PlateStep,
    BatteryLevel,
}

/// Type-dependent action controls.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActionControl {
    Power,
    Start,
    Stop,
    Pause,
    Light,
    TargetTemperature,
    SuperCooling,
    SuperFreezing,
    Color,
    Mode,
    ProgramId,
}

use ActionControl as A;
use StateField as S;

/// Device type codes -> state fields.
#[rustfmt::skip]
static STATE_TABLE: &[(&[i64], &[StateField])] = &[
    // washing machine
    (
        &[1],
        &[
            S::ProgramId, S::ProgramType, S::ProgramPhase, S::RemainingTime, S::StartTime,
            S::SignalInfo, S::SignalDoor, S::RemoteEnable, S::EstimatedEndTime, S::ElapsedTime,
            S::SpinningSpeed, S::EcoEnergy, S::EcoWater, S::TargetTemperature,
        ],
    ),
    // tumble dryer
    (
        &[2],
        &[
            S::ProgramId, S::ProgramType, S::ProgramPhase, S::RemainingTime, S::StartTime,
            S::SignalInfo, S::SignalDoor, S::RemoteEnable, S::EstimatedEndTime, S::ElapsedTime,
            S::DryingStep, S::EcoEnergy, S::TargetTemperature,
        ],
    ),
    // washer dryer
    (
        &[24],
        &[
            S::ProgramId, S::ProgramType, S::ProgramPhase, S::RemainingTime, S::StartTime,
            S::SignalInfo, S::SignalDoor, S::RemoteEnable, S::EstimatedEndTime, S::ElapsedTime,
            S::SpinningSpeed, S::DryingStep, S::EcoEnergy, S::EcoWater, S::TargetTemperature,
        ],
    ),
    // dishwashers
    (
        &[7, 8],
        &[
            S::ProgramId, S::ProgramType, S::ProgramPhase, S::RemainingTime, S::StartTime,
            S::SignalInfo, S::SignalDoor, S::RemoteEnable, S::EstimatedEndTime, S::ElapsedTime,
            S::EcoEnergy, S::EcoWater,
        ],
    ),
    // ovens, steam ovens, microwaves
    (
        &[12, 13, 15, 16, 31, 45, 67],
        &[
            S::ProgramId, S::ProgramType, S::ProgramPhase, S::RemainingTime, S::StartTime,
            S::SignalInfo, S::SignalDoor, S::RemoteEnable, S::EstimatedEndTime, S::ElapsedTime,
            S::Temperature, S::TargetTemperature,
        ],
    ),
    // hobs
    (&[14, 27], &[S::PlateStep]),
    // coffee system
    (&[17], &[S::ProgramId, S::ProgramPhase, S::SignalInfo, S::RemoteEnable]),
    // hood
    (&[18], &[S::SignalInfo, S::RemoteEnable, S::VentilationStep]),
    // fridges, freezers, wine cabinets
    (
        &[19, 20, 21, 32, 33, 34],
        &[S::SignalInfo, S::SignalDoor, S::RemoteEnable, S::Temperature, S::TargetTemperature],
    ),
    // wine cabinet freezer combination
    (&[68], &[S::SignalInfo, S::RemoteEnable, S::Temperature, S::TargetTemperature]),
    // robot vacuum
    (&[23], &[S::BatteryLevel]),
    // dish warmer
    (
        &[25],
        &[
            S::ProgramId, S::ProgramPhase, S::RemainingTime, S::TargetTemperature, S::SignalDoor,
            S::Temperature, S::SignalInfo,
        ],
    ),
    // hob with vapour extraction
    (&[74], &[S::PlateStep, S::RemoteEnable, S::VentilationStep]),
];

/// Device type codes -> action controls.
static ACTION_TABLE: &[(&[i64], &[ActionControl])] = &[
    (&[1, 2, 24], &[A::Power, A::Start, A::Stop, A::Light, A::TargetTemperature]),
    (&[7, 8], &[A::Power, A::Start, A::Stop, A::Pause, A::Light]),
    (&[12], &[A::Stop, A::Light, A::TargetTemperature]),
    (&[13, 15, 16, 31, 45, 67], &[A::Power, A::Stop, A::Light, A::TargetTemperature]),
    (&[17], &[A::Power, A::Light]),
    (&[18], &[A::Power, A::Stop, A::Light, A::Color]),
    (&[19], &[A::SuperCooling, A::TargetTemperature]),
    (&[20], &[A::SuperFreezing, A::TargetTemperature]),
    (&[21], &[A::SuperCooling, A::SuperFreezing, A::TargetTemperature]),
    (&[32, 33, 34], &[A::Light, A::TargetTemperature]),
    (&[68], &[A::SuperFreezing, A::Light, A::Mode, A::TargetTemperature]),
    (&[23], &[A::ProgramId, A::Start, A::Stop, A::Pause]),
    (&[25], &[A::ProgramId, A::TargetTemperature]),
];

fn lookup<T>(table: &'static [(&'static [i64], &'static [T])], code: Option<i64>) -> &'static [T] {
    code.and_then(|code| table.iter().find(|(codes, _)| codes.contains(&code)))
        .map_or(&[] as &[T], |(_, entries)| *entries)
}

pub fn state_fields(type_code: Option<i64>) -> &'static [StateField] {
    lookup(STATE_TABLE, type_code)
}

pub fn action_controls(type_code: Option<i64>) -> &'static [ActionControl] {
    lookup(ACTION_TABLE, type_code)
}

/// `true` when the device type exposes a power switch.
pub fn offers_power(type_code: Option<i64>) -> bool {
    action_controls(type_code).contains(&A::Power)
}

// ── Formatting ───────────────────────────────────────────────────

/// `[h, m]` as `h:mm`. Missing parts count as zero.
pub fn format_clock(parts: &[u32]) -> String {
    let hours = parts.first().copied().unwrap_or(0);
    let minutes = parts.get(1).copied().unwrap_or(0);
    format!("{hours}:{minutes:02}")
}

/// Local wall-clock time at which the running program ends, as `HH:MM`.
/// Empty when the device is idle, nothing remains, or the remaining time
/// runs past the representable calendar.
pub fn estimated_end_time(state: &DeviceState, now: DateTime<Local>) -> String {
    let hours = state.remaining_time.first().copied().unwrap_or(0);
    let minutes = state.remaining_time.get(1).copied().unwrap_or(0);
    let idle = state.status.value_raw.unwrap_or(0) < 2;
    if idle || (hours == 0 && minutes == 0) {
        return String::new();
    }
    i64::from(hours)
        .checked_mul(60)
        .and_then(|h| h.checked_add(i64::from(minutes)))
        .and_then(chrono::TimeDelta::try_minutes)
        .and_then(|remaining| now.checked_add_signed(remaining))
        .map(|end| end.format("%H:%M").to_string())
        .unwrap_or_default()
}

// ── Node builder ─────────────────────────────────────────────────

struct Nodes<'a> {
    id: &'a str,
    out: Vec<NodeUpdate>,
}

impl<'a> Nodes<'a> {
    fn new(id: &'a str) -> Self {
        Self { id, out: Vec::new() }
    }

    fn path(&self, rel: &str) -> String {
        format!("{}.{rel}", self.id)
    }

    fn value(&mut self, rel: &str, meta: NodeMeta, value: Value) {
        self.out.push(NodeUpdate::new(self.path(rel), meta, value));
    }

    fn channel(&mut self, rel: &str, name: &str) {
        self.out
            .push(NodeUpdate::structural(self.path(rel), NodeMeta::channel(name)));
    }

    fn text(&mut self, rel: &str, name: &str, value: impl Into<String>) {
        let meta = NodeMeta::state(name, "text", ValueType::String);
        self.value(rel, meta, Value::String(value.into()));
    }

    fn indicator(&mut self, rel: &str, name: &str, role: &str, value: bool) {
        let meta = NodeMeta::state(name, role, ValueType::Boolean);
        self.value(rel, meta, Value::Bool(value));
    }

    fn number(&mut self, rel: &str, name: &str, value: Option<i64>) {
        if let Some(v) = value {
            let meta = NodeMeta::state(name, "value", ValueType::Number);
            self.value(rel, meta, json!(v));
        }
    }

    fn measure(&mut self, rel: &str, name: &str, role: &str, unit: &str, value: f64) {
        let meta = NodeMeta::state(name, role, ValueType::Number).unit(unit);
        self.value(rel, meta, json!(value));
    }

    fn localized(&mut self, rel: &str, name: &str, value: &mielelink_api::models::LocalizedValue) {
        self.text(rel, name, value.localized_text());
        self.number(&format!("{rel}_raw"), &format!("{name} (raw value)"), value.value_raw);
    }

    fn finish(self) -> Vec<NodeUpdate> {
        self.out
    }
}

// ── Device projection ────────────────────────────────────────────

/// The root node of a device. Emitted once, on first sighting.
pub fn device_node(record: &DeviceRecord) -> NodeUpdate {
    NodeUpdate::structural(
        record.id.clone(),
        NodeMeta::device(record.display_name.clone(), record.icon_ref.clone()),
    )
}

/// Ident tree, status indicators, and the type-dependent state fields.
pub fn project_device(record: &DeviceRecord, now: DateTime<Local>) -> Vec<NodeUpdate> {
    let mut nodes = Nodes::new(&record.id);
    ident_nodes(&mut nodes, &record.ident);

    let state = &record.state;
    nodes.localized("Status", "Main state of the device", &state.status);
    nodes.indicator(
        "signalFailure",
        "A failure message is active",
        "indicator",
        state.signal_failure,
    );
    let status = state.status.value_raw;
    nodes.indicator(
        "Connected",
        "Connected to WLAN or gateway",
        "indicator.reachable",
        status != Some(STATUS_NOT_CONNECTED),
    );
    nodes.indicator(
        "signalInUse",
        "In use or switched on",
        "indicator",
        status != Some(STATUS_OFF),
    );
    nodes.channel("ACTIONS", "Available actions for this device");
    nodes.value(
        "ACTIONS.Nickname",
        NodeMeta::state("Nickname of the device", "text", ValueType::String).writable(),
        Value::String(record.display_name.clone()),
    );

    for field in state_fields(record.type_code) {
        project_state_field(&mut nodes, record, *field, now);
    }
    nodes.finish()
}

fn ident_nodes(nodes: &mut Nodes<'_>, ident: &DeviceIdent) {
    nodes.channel("IDENT", "Ident information for this device");
    nodes.text(
        "IDENT.ComModFirmware",
        "Release version of the communication module",
        ident.xkm_ident_label.release_version.clone(),
    );
    nodes.text(
        "IDENT.ComModTechType",
        "Technical type of the communication module",
        ident.xkm_ident_label.tech_type.clone(),
    );
    nodes.text(
        "IDENT.DeviceSerial",
        "Serial number of the device",
        ident.device_ident_label.fab_number.clone(),
    );
    nodes.text(
        "IDENT.DeviceTechType",
        "Technical type of the device",
        ident.device_ident_label.tech_type.clone(),
    );
    nodes.localized("IDENT.DeviceType", "Device type", &ident.device_type);
    nodes.text(
        "IDENT.DeviceMatNumber",
        "Material number of the device",
        ident.device_ident_label.mat_number.clone(),
    );
}

fn project_state_field(
    nodes: &mut Nodes<'_>,
    record: &DeviceRecord,
    field: StateField,
    now: DateTime<Local>,
) {
    let state = &record.state;
    match field {
        S::ProgramId => nodes.localized("ProgramID", "Running program", &state.program_id),
        S::ProgramType => nodes.localized("programType", "Program type", &state.program_type),
        S::ProgramPhase => nodes.localized("programPhase", "Program phase", &state.program_phase),
        S::RemainingTime => nodes.text(
            "remainingTime",
            "Remaining time of the running program",
            format_clock(&state.remaining_time),
        ),
        S::StartTime => nodes.value(
            "ACTIONS.startTime",
            NodeMeta::state("Relative start time", "value", ValueType::String).writable(),
            Value::String(format_clock(&state.start_time)),
        ),
        S::ElapsedTime => nodes.text(
            "elapsedTime",
            "Elapsed time since program start",
            format_clock(&state.elapsed_time),
        ),
        S::EstimatedEndTime => nodes.text(
            "estimatedEndTime",
            "Estimated end of the running program",
            estimated_end_time(state, now),
        ),
        S::SignalInfo => nodes.indicator(
            "signalInfo",
            "A notification is active",
            "indicator",
            state.signal_info,
        ),
        S::SignalDoor => nodes.indicator(
            "signalDoor",
            "A door-open message is active",
            "indicator",
            state.signal_door,
        ),
        S::RemoteEnable => {
            let remote = &state.remote_enable;
            nodes.indicator(
                "fullRemoteControl",
                "Can be controlled remotely",
                "indicator",
                remote.full_remote_control,
            );
            nodes.indicator("smartGrid", "Smart grid mode", "indicator", remote.smart_grid);
            nodes.indicator(
                "mobileStart",
                "Supports mobile start",
                "indicator",
                remote.mobile_start,
            );
        }
        S::SpinningSpeed => {
            let speed = &state.spinning_speed;
            nodes.text("spinningSpeed", "Spinning speed", speed.localized_text());
            if let Some(raw) = speed.value_raw {
                let meta = NodeMeta::state("Spinning speed (raw value)", "value", ValueType::Number)
                    .unit(speed.unit.clone().unwrap_or_default());
                nodes.value("spinningSpeed_raw", meta, json!(raw));
            }
        }
        S::DryingStep => nodes.localized("dryingStep", "Drying step", &state.drying_step),
        S::EcoEnergy => eco_energy(nodes, state.eco_feedback.as_ref()),
        S::EcoWater => eco_water(nodes, state.eco_feedback.as_ref()),
        S::Temperature => {
            for (zone, reading) in set_zones(&state.temperature) {
                if let Some(value) = reading.value_localized {
                    let meta = NodeMeta::state(
                        format!("Current temperature of zone {zone}"),
                        "value.temperature",
                        ValueType::Number,
                    )
                    .unit(reading.unit_symbol());
                    nodes.value(&format!("temperatureZone-{zone}"), meta, json!(value));
                }
            }
        }
        S::TargetTemperature => {
            for (zone, reading) in set_zones(&state.target_temperature) {
                if let Some(value) = reading.value_localized {
                    let meta = target_temperature_meta(record, zone, reading.unit_symbol());
                    nodes.value(
                        &format!("ACTIONS.targetTemperatureZone-{zone}"),
                        meta,
                        json!(value),
                    );
                }
            }
        }
        S::VentilationStep => {
            let meta = NodeMeta::state("Ventilation step", "level", ValueType::Number)
                .writable()
                .states([
                    (0, "Off"),
                    (1, "Level 1"),
                    (2, "Level 2"),
                    (3, "Level 3"),
                    (4, "Level 4"),
                ]);
            let step = state.ventilation_step.value_raw.unwrap_or(0);
            nodes.value("ACTIONS.VentilationStep", meta, json!(step));
        }
        S::PlateStep => {
            for (index, step) in state.plate_step.iter().enumerate() {
                let rel = format!("PlateStepZone-{index}");
                nodes.text(&rel, "Cooking zone level", step.localized_text());
                nodes.number(
                    &format!("{rel}_raw"),
                    "Cooking zone level (raw value)",
                    step.value_raw,
                );
            }
        }
        S::BatteryLevel => {
            let level = state.battery_level.unwrap_or(0);
            let meta = NodeMeta::state("Battery charge", "value", ValueType::Number).unit("%");
            nodes.value("batteryLevel", meta, json!(level));
        }
    }
}

/// Zones with a reading, numbered from 1, up to the first unset one.
fn set_zones(readings: &[Temperature]) -> impl Iterator<Item = (usize, &Temperature)> {
    readings
        .iter()
        .take_while(|t| t.is_set())
        .enumerate()
        .map(|(i, t)| (i + 1, t))
}

/// Target temperature metadata, with the allowed range when the device
/// reported one in its actions.
#[allow(clippy::cast_precision_loss)]
fn target_temperature_meta(record: &DeviceRecord, zone: usize, unit: &str) -> NodeMeta {
    let range = record.actions.as_ref().and_then(|actions| {
        actions
            .target_temperature
            .iter()
            .find(|r| usize::from(r.zone) == zone)
    });
    let base = |name: String| {
        NodeMeta::state(name, "value.temperature", ValueType::Number)
            .unit(unit)
            .writable()
    };
    match range {
        Some(r) => {
            let min = r.min.unwrap_or_default();
            let max = r.max.unwrap_or_default();
            base(format!("Target temperature of zone {zone} ({min} to {max})"))
                .range(min as f64, max as f64)
        }
        None => base(format!("Target temperature of zone {zone}")),
    }
}

fn eco_energy(nodes: &mut Nodes<'_>, eco: Option<&EcoFeedback>) {
    nodes.channel("EcoFeedback", "Eco feedback for this device");
    let consumption = eco.and_then(|e| e.current_energy_consumption.as_ref());
    nodes.measure(
        "EcoFeedback.currentEnergyConsumption",
        "Energy used by the running program so far",
        "value.power.consumption",
        consumption.and_then(|c| c.unit.as_deref()).unwrap_or("kWh"),
        consumption.and_then(|c| c.value).unwrap_or(0.0),
    );
    nodes.measure(
        "EcoFeedback.EnergyForecast",
        "Relative energy usage of the selected program",
        "value",
        "%",
        eco.and_then(|e| e.energy_forecast).unwrap_or(0.0) * 100.0,
    );
}

fn eco_water(nodes: &mut Nodes<'_>, eco: Option<&EcoFeedback>) {
    nodes.channel("EcoFeedback", "Eco feedback for this device");
    let consumption = eco.and_then(|e| e.current_water_consumption.as_ref());
    nodes.measure(
        "EcoFeedback.currentWaterConsumption",
        "Water used by the running program so far",
        "value",
        consumption.and_then(|c| c.unit.as_deref()).unwrap_or("l"),
        consumption.and_then(|c| c.value).unwrap_or(0.0),
    );
    nodes.measure(
        "EcoFeedback.waterForecast",
        "Relative water usage of the selected program",
        "value",
        "%",
        eco.and_then(|e| e.water_forecast).unwrap_or(0.0) * 100.0,
    );
}

// ── Action projection ────────────────────────────────────────────

/// The `ACTIONS` channel and the type-dependent controls. Empty when the
/// record has no action snapshot yet.
pub fn project_actions(record: &DeviceRecord) -> Vec<NodeUpdate> {
    let Some(actions) = record.actions.as_ref() else {
        return Vec::new();
    };
    let mut nodes = Nodes::new(&record.id);
    nodes.channel("ACTIONS", "Available actions for this device");
    nodes.out.push(last_action_result_node(
        &record.id,
        record.last_action_result.as_deref().unwrap_or_default(),
    ));

    for control in action_controls(record.type_code) {
        match control {
            A::Power => nodes.value(
                "ACTIONS.Power",
                NodeMeta::state("Main power switch", "switch.power", ValueType::Boolean).writable(),
                Value::Bool(actions.is_powered_on()),
            ),
            A::Start => button(&mut nodes, "Start", "Starts the device if possible"),
            A::Stop => button(&mut nodes, "Stop", "Stops the device if possible"),
            A::Pause => button(&mut nodes, "Pause", "Pauses the device if possible"),
            A::Light => nodes.value(
                "ACTIONS.Light",
                NodeMeta::state("Light switch", "switch", ValueType::Boolean).writable(),
                Value::Bool(actions.is_light_on()),
            ),
            A::SuperCooling => nodes.value(
                "ACTIONS.SuperCooling",
                NodeMeta::state("SuperCooling switch", "switch", ValueType::Boolean).writable(),
                Value::Bool(actions.process_action.contains(&STOP_SUPERCOOLING)),
            ),
            A::SuperFreezing => nodes.value(
                "ACTIONS.SuperFreezing",
                NodeMeta::state("SuperFreezing switch", "switch", ValueType::Boolean).writable(),
                Value::Bool(actions.process_action.contains(&STOP_SUPERFREEZING)),
            ),
            A::Color => nodes.value(
                "ACTIONS.Color",
                NodeMeta::state("Ambient light color", "switch", ValueType::String)
                    .writable()
                    .states(COLORS.iter().map(|c| (*c, *c))),
                json!("white"),
            ),
            A::Mode => nodes.value(
                "ACTIONS.Mode",
                NodeMeta::state("Mode switch", "switch", ValueType::Number)
                    .writable()
                    .states([(0, "Normal"), (1, "Sabbath")]),
                json!(0),
            ),
            A::ProgramId => nodes.value(
                "ACTIONS.programId",
                NodeMeta::state("Select a program by id", "switch", ValueType::Number).writable(),
                json!(0),
            ),
            A::TargetTemperature => {
                for (zone, reading) in set_zones(&record.state.target_temperature) {
                    if let Some(value) = reading.value_localized {
                        let meta = target_temperature_meta(record, zone, reading.unit_symbol());
                        nodes.value(
                            &format!("ACTIONS.targetTemperatureZone-{zone}"),
                            meta,
                            json!(value),
                        );
                    }
                }
            }
        }
    }
    nodes.finish()
}

fn button(nodes: &mut Nodes<'_>, name: &str, description: &str) {
    nodes.value(
        &format!("ACTIONS.{name}"),
        NodeMeta::state(description, "button", ValueType::Boolean).writable(),
        Value::Bool(true),
    );
}

/// One button per loaded program, at `ACTIONS.<programId>`.
pub fn program_nodes(record: &DeviceRecord) -> Vec<NodeUpdate> {
    let ProgramList::Loaded(programs) = &record.programs else {
        return Vec::new();
    };
    let mut nodes = Nodes::new(&record.id);
    for program in programs {
        nodes.value(
            &format!("ACTIONS.{}", program.program_id),
            NodeMeta::state(program.program.clone(), "button", ValueType::Boolean).writable(),
            Value::Bool(true),
        );
    }
    nodes.finish()
}

/// `<id>.ACTIONS.LastActionResult`.
pub fn last_action_result_node(device_id: &str, text: &str) -> NodeUpdate {
    NodeUpdate::new(
        format!("{device_id}.ACTIONS.LastActionResult"),
        NodeMeta::state(
            "Result of the last action",
            "text",
            ValueType::String,
        ),
        Value::String(text.to_owned()),
    )
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use chrono::TimeZone;
    use mielelink_api::models::{Device, DeviceActions, Program};
    use pretty_assertions::assert_eq;
    use tokio::time::Instant;

    use super::*;

    fn record(json: serde_json::Value) -> DeviceRecord {
        let device: Device = serde_json::from_value(json).unwrap();
        DeviceRecord::new("D1", &device, Instant::now())
    }

    fn value_at<'a>(nodes: &'a [NodeUpdate], path: &str) -> Option<&'a Value> {
        nodes
            .iter()
            .find(|n| n.path == path)
            .and_then(|n| n.value.as_ref())
    }

    fn noon() -> DateTime<Local> {
        Local.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap()
    }

    #[test]
    fn lookup_tables_resolve_type_codes() {
        assert_eq!(state_fields(Some(14)), &[S::PlateStep]);
        assert_eq!(action_controls(Some(14)), &[] as &[ActionControl]);
        assert_eq!(action_controls(Some(21)).len(), 3);
        assert!(state_fields(Some(999)).is_empty());
        assert!(state_fields(None).is_empty());
        assert!(state_fields(Some(1)).contains(&S::SpinningSpeed));
        assert!(offers_power(Some(1)));
        assert!(!offers_power(Some(19)));
    }

    #[test]
    fn clock_and_end_time_formatting() {
        assert_eq!(format_clock(&[1, 5]), "1:05");
        assert_eq!(format_clock(&[]), "0:00");

        let running: DeviceState = serde_json::from_value(json!({
            "status": { "value_raw": 5 },
            "remainingTime": [1, 30],
        }))
        .unwrap();
        assert_eq!(estimated_end_time(&running, noon()), "13:30");

        let idle: DeviceState = serde_json::from_value(json!({
            "status": { "value_raw": 1 },
            "remainingTime": [1, 30],
        }))
        .unwrap();
        assert_eq!(estimated_end_time(&idle, noon()), "");
    }

    #[test]
    fn absurd_remaining_time_yields_no_end_time() {
        let state: DeviceState = serde_json::from_value(json!({
            "status": { "value_raw": 5 },
            "remainingTime": [u32::MAX, u32::MAX],
        }))
        .unwrap();
        assert_eq!(estimated_end_time(&state, noon()), "");
    }

    #[test]
    fn washer_projects_common_and_specific_fields() {
        let record = record(json!({
            "ident": {
                "type": { "value_raw": 1, "value_localized": "Washing machine" },
                "deviceIdentLabel": { "fabNumber": "D1", "techType": "WCI870" },
                "xkmIdentLabel": { "releaseVersion": "08.32" },
            },
            "state": {
                "status": { "value_raw": 5, "value_localized": "In use" },
                "spinningSpeed": { "value_raw": 1400, "value_localized": "1400", "unit": "rpm" },
                "remainingTime": [0, 45],
                "targetTemperature": [
                    { "value_raw": 4000, "value_localized": 40.0, "unit": "Celsius" },
                    { "value_raw": -32768, "value_localized": null, "unit": "Celsius" },
                ],
            }
        }));
        let nodes = project_device(&record, noon());

        assert_eq!(value_at(&nodes, "D1.Status"), Some(&json!("In use")));
        assert_eq!(value_at(&nodes, "D1.Status_raw"), Some(&json!(5)));
        assert_eq!(value_at(&nodes, "D1.Connected"), Some(&json!(true)));
        assert_eq!(value_at(&nodes, "D1.signalInUse"), Some(&json!(true)));
        assert_eq!(value_at(&nodes, "D1.IDENT.ComModFirmware"), Some(&json!("08.32")));
        assert_eq!(value_at(&nodes, "D1.spinningSpeed_raw"), Some(&json!(1400)));
        assert_eq!(value_at(&nodes, "D1.remainingTime"), Some(&json!("0:45")));
        assert_eq!(value_at(&nodes, "D1.estimatedEndTime"), Some(&json!("12:45")));
        assert_eq!(
            value_at(&nodes, "D1.ACTIONS.targetTemperatureZone-1"),
            Some(&json!(40.0))
        );
        assert!(value_at(&nodes, "D1.ACTIONS.targetTemperatureZone-2").is_none());
        assert_eq!(
            value_at(&nodes, "D1.EcoFeedback.currentEnergyConsumption"),
            Some(&json!(0.0))
        );
        assert!(value_at(&nodes, "D1.temperatureZone-1").is_none());
    }

    #[test]
    fn fridge_actions_reflect_process_action() {
        let mut record = record(json!({ "ident": { "type": { "value_raw": 21 } } }));
        record.actions = Some(DeviceActions {
            process_action: vec![4, 7],
            ..DeviceActions::default()
        });
        let nodes = project_actions(&record);

        assert_eq!(value_at(&nodes, "D1.ACTIONS.SuperCooling"), Some(&json!(true)));
        assert_eq!(value_at(&nodes, "D1.ACTIONS.SuperFreezing"), Some(&json!(false)));
        assert_eq!(value_at(&nodes, "D1.ACTIONS.LastActionResult"), Some(&json!("")));
        assert!(value_at(&nodes, "D1.ACTIONS.Power").is_none());
    }

    #[test]
    fn power_and_light_follow_actions() {
        let mut record = record(json!({ "ident": { "type": { "value_raw": 7 } } }));
        record.actions = Some(DeviceActions {
            power_off: true,
            light: vec![2],
            ..DeviceActions::default()
        });
        let nodes = project_actions(&record);

        assert_eq!(value_at(&nodes, "D1.ACTIONS.Power"), Some(&json!(true)));
        assert_eq!(value_at(&nodes, "D1.ACTIONS.Light"), Some(&json!(true)));
        assert_eq!(value_at(&nodes, "D1.ACTIONS.Pause"), Some(&json!(true)));
    }

    #[test]
    fn programs_become_buttons() {
        let mut record = record(json!({ "ident": { "type": { "value_raw": 1 } } }));
        record.programs = ProgramList::Loaded(vec![Program {
            program_id: 13,
            program: "Cottons".into(),
        }]);
        let nodes = program_nodes(&record);
        assert_eq!(nodes.len(), 1);
        assert_eq!(nodes[0].path, "D1.ACTIONS.13");
        assert_eq!(nodes[0].meta.name, "Cottons");
    }
}
