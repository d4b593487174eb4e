// ── Command dispatch ──
//
// Write intents arrive as (device id, field, value) triples, the same
// shape the presentation tree uses for writable nodes. Each one is
// translated into a PUT against the actions or programs endpoint, and the
// outcome is written back as the device's last action result.

use std::sync::Arc;

use serde_json::Value;
use tokio::sync::oneshot;
use tracing::{debug, info, warn};

use mielelink_api::models::{ActionRequest, ProgramRequest, ZoneTemperature};

use crate::api::CloudApi;
use crate::error::CoreError;
use crate::store::DeviceCache;

/// Text recorded after a successful write.
pub const SUCCESS_TEXT: &str = "Okay!";

const TARGET_TEMPERATURE_PREFIX: &str = "targetTemperatureZone-";

// ── Command ──────────────────────────────────────────────────────

/// A write intent against one field of one device.
#[derive(Debug, Clone, PartialEq)]
pub struct Command {
    pub device_id: String,
    /// Node name below `ACTIONS`, e.g. `Power` or `targetTemperatureZone-1`.
    pub field: String,
    pub value: Value,
}

impl Command {
    pub fn new(device_id: impl Into<String>, field: impl Into<String>, value: Value) -> Self {
        Self {
            device_id: device_id.into(),
            field: field.into(),
            value,
        }
    }

    /// Build a command from a node path such as `000123.ACTIONS.Power`.
    /// The `ACTIONS.` segment is optional.
    pub fn from_path(path: &str, value: Value) -> Result<Self, CoreError> {
        let (device_id, rest) = path.split_once('.').ok_or_else(|| CoreError::InvalidCommand {
            message: format!("'{path}' does not name a device field"),
        })?;
        let field = rest.strip_prefix("ACTIONS.").unwrap_or(rest);
        if field.is_empty() {
            return Err(CoreError::InvalidCommand {
                message: format!("'{path}' does not name a device field"),
            });
        }
        Ok(Self::new(device_id, field, value))
    }
}

/// A command envelope sent through the command channel.
pub(crate) struct CommandEnvelope {
    pub command: Command,
    pub response_tx: oneshot::Sender<Result<CommandOutcome, CoreError>>,
}

/// What became of a dispatched command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandOutcome {
    /// The cloud accepted the write; `ack` is its acknowledgement text.
    Applied { ack: String },
    /// The cloud refused the write; `message` was recorded verbatim.
    Failed { message: String },
    /// The field is local only; nothing was sent.
    Ignored,
}

// ── Translation ──────────────────────────────────────────────────

/// The request a command turns into.
#[derive(Debug, Clone, PartialEq)]
pub enum Translation {
    Action(ActionRequest),
    Program(ProgramRequest),
    /// No API call.
    Ignored,
}

/// Translate a field/value pair into a request body.
pub fn translate(field: &str, value: &Value) -> Result<Translation, CoreError> {
    let action = |request: ActionRequest| -> Result<Translation, CoreError> {
        Ok(Translation::Action(request))
    };

    match field {
        "LastActionResult" => Ok(Translation::Ignored),
        "Start" => action(process(1)),
        "Stop" => action(process(2)),
        "Pause" => action(process(3)),
        "SuperFreezing" => action(process(if flag(field, value)? { 4 } else { 5 })),
        "SuperCooling" => action(process(if flag(field, value)? { 6 } else { 7 })),
        "Nickname" => action(ActionRequest {
            device_name: Some(text(field, value)?),
            ..ActionRequest::default()
        }),
        "startTime" => action(ActionRequest {
            start_time: Some(clock(field, value)?),
            ..ActionRequest::default()
        }),
        "VentilationStep" => action(ActionRequest {
            ventilation_step: Some(integer(field, value)?),
            ..ActionRequest::default()
        }),
        "Color" => action(ActionRequest {
            colors: Some(text(field, value)?),
            ..ActionRequest::default()
        }),
        "Mode" => action(ActionRequest {
            modes: Some(integer(field, value)?),
            ..ActionRequest::default()
        }),
        "Light" => action(ActionRequest {
            light: Some(if flag(field, value)? { 1 } else { 2 }),
            ..ActionRequest::default()
        }),
        "Power" => {
            let on = flag(field, value)?;
            action(ActionRequest {
                power_on: on.then_some(true),
                power_off: (!on).then_some(true),
                ..ActionRequest::default()
            })
        }
        "programId" => program(field, &integer(field, value)?.to_string()),
        _ => {
            if let Some(zone) = field.strip_prefix(TARGET_TEMPERATURE_PREFIX) {
                let zone = zone.parse::<u8>().map_err(|_| invalid(field, "zone must be a number"))?;
                let value = value
                    .as_f64()
                    .or_else(|| value.as_str().and_then(|s| s.trim().parse().ok()))
                    .ok_or_else(|| invalid(field, "expected a temperature"))?;
                return action(ActionRequest {
                    target_temperature: Some(vec![ZoneTemperature { zone, value }]),
                    ..ActionRequest::default()
                });
            }
            program(field, field)
        }
    }
}

fn process(code: u8) -> ActionRequest {
    ActionRequest {
        process_action: Some(code),
        ..ActionRequest::default()
    }
}

/// Any other field names a program id.
fn program(field: &str, id: &str) -> Result<Translation, CoreError> {
    let program_id = id
        .parse::<u32>()
        .map_err(|_| invalid(field, "unknown field and not a program id"))?;
    Ok(Translation::Program(ProgramRequest { program_id }))
}

fn invalid(field: &str, reason: &str) -> CoreError {
    CoreError::InvalidCommand {
        message: format!("{field}: {reason}"),
    }
}

fn flag(field: &str, value: &Value) -> Result<bool, CoreError> {
    match value {
        Value::Bool(b) => Ok(*b),
        Value::Number(n) => Ok(n.as_f64().is_some_and(|n| n != 0.0)),
        Value::String(s) => match s.trim() {
            "true" | "1" | "on" => Ok(true),
            "false" | "0" | "off" => Ok(false),
            _ => Err(invalid(field, "expected a boolean")),
        },
        _ => Err(invalid(field, "expected a boolean")),
    }
}

fn integer(field: &str, value: &Value) -> Result<i64, CoreError> {
    value
        .as_i64()
        .or_else(|| value.as_str().and_then(|s| s.trim().parse().ok()))
        .ok_or_else(|| invalid(field, "expected an integer"))
}

fn text(field: &str, value: &Value) -> Result<String, CoreError> {
    match value {
        Value::String(s) => Ok(s.clone()),
        Value::Number(n) => Ok(n.to_string()),
        _ => Err(invalid(field, "expected a string")),
    }
}

/// `"h:mm"` into `[h, m]`.
fn clock(field: &str, value: &Value) -> Result<[u32; 2], CoreError> {
    let raw = value.as_str().ok_or_else(|| invalid(field, "expected HH:MM"))?;
    let (h, m) = raw.split_once(':').ok_or_else(|| invalid(field, "expected HH:MM"))?;
    let hours = h.trim().parse().map_err(|_| invalid(field, "expected HH:MM"))?;
    let minutes = m.trim().parse().map_err(|_| invalid(field, "expected HH:MM"))?;
    Ok([hours, minutes])
}

// ── Dispatcher ───────────────────────────────────────────────────

/// Sends translated commands and records their outcome.
pub struct CommandDispatcher {
    api: Arc<dyn CloudApi>,
    cache: Arc<DeviceCache>,
}

impl CommandDispatcher {
    pub fn new(api: Arc<dyn CloudApi>, cache: Arc<DeviceCache>) -> Self {
        Self { api, cache }
    }

    /// Execute one write intent.
    ///
    /// Caller errors (empty id, untranslatable value) are returned as
    /// [`CoreError::InvalidCommand`]. Remote failures are not errors here:
    /// they are recorded as the last action result and reported as
    /// [`CommandOutcome::Failed`].
    pub async fn dispatch(
        &self,
        device_id: &str,
        field: &str,
        value: &Value,
    ) -> Result<CommandOutcome, CoreError> {
        if device_id.is_empty() {
            return Err(CoreError::InvalidCommand {
                message: "device id must not be empty".into(),
            });
        }

        let result = match translate(field, value)? {
            Translation::Ignored => {
                debug!(device = %device_id, field, "local-only field, nothing to send");
                return Ok(CommandOutcome::Ignored);
            }
            Translation::Action(request) => {
                debug!(device = %device_id, field, ?request, "sending action");
                self.api.put_action(device_id, &request).await
            }
            Translation::Program(request) => {
                debug!(device = %device_id, program = request.program_id, "starting program");
                self.api.put_program(device_id, &request).await
            }
        };

        match result {
            Ok(ack) => {
                info!(device = %device_id, field, %ack, "command accepted");
                self.cache.record_action_result(device_id, SUCCESS_TEXT).await;
                Ok(CommandOutcome::Applied {
                    ack: ack.to_string(),
                })
            }
            Err(e) => {
                let message = e.to_string();
                warn!(device = %device_id, field, error = %message, "command failed");
                self.cache.record_action_result(device_id, &message).await;
                Ok(CommandOutcome::Failed { message })
            }
        }
    }

    pub async fn execute(&self, command: &Command) -> Result<CommandOutcome, CoreError> {
        self.dispatch(&command.device_id, &command.field, &command.value)
            .await
    }
}
