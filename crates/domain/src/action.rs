//! Action compiler: turns stored event action metadata into the command a
//! device agent understands.
//!
//! Actuator kinds map to a serial line the grow controller firmware parses
//! (`Spray 1000`, `FillL 0.60`, `TabON`, …). Simple switches take the
//! `turn_on` / `turn_off` kinds verbatim.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use crate::event::EventAction;
use crate::id::DeviceId;

/// Command type the agent forwards line-by-line to the controller's serial port.
pub const SERIAL_COMMAND: &str = "serial_command";

/// Assumed fill valve throughput used to estimate volume from run time.
pub const FILL_RATE_LITERS_PER_MINUTE: f64 = 6.0;

/// The closed set of action kinds the compiler understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionKind {
    SprayPump,
    FillValve,
    Pump,
    Valve,
    Light,
    Fan,
    TurnOn,
    TurnOff,
}

impl ActionKind {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::SprayPump => "spray_pump",
            Self::FillValve => "fill_valve",
            Self::Pump => "pump",
            Self::Valve => "valve",
            Self::Light => "light",
            Self::Fan => "fan",
            Self::TurnOn => "turn_on",
            Self::TurnOff => "turn_off",
        }
    }

    /// Run time used when the action does not specify one.
    #[must_use]
    pub fn default_duration_ms(self) -> u64 {
        match self {
            Self::FillValve | Self::Fan => 5000,
            _ => 1000,
        }
    }
}

impl fmt::Display for ActionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ActionKind {
    type Err = NoAction;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "spray_pump" => Ok(Self::SprayPump),
            "fill_valve" => Ok(Self::FillValve),
            "pump" => Ok(Self::Pump),
            "valve" => Ok(Self::Valve),
            "light" => Ok(Self::Light),
            "fan" => Ok(Self::Fan),
            "turn_on" => Ok(Self::TurnOn),
            "turn_off" => Ok(Self::TurnOff),
            other => Err(NoAction::UnknownKind(other.to_string())),
        }
    }
}

/// Why an action compiled to nothing. Not a failure: there is simply no
/// command to send.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum NoAction {
    #[error("action has no kind")]
    MissingKind,
    #[error("unsupported action kind {0:?}")]
    UnknownKind(String),
    #[error("action has no target device")]
    MissingDevice,
}

/// A ready-to-enqueue device command.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandPayload {
    pub device_id: DeviceId,
    pub command_type: String,
    pub params: Value,
}

impl CommandPayload {
    /// The serial line, for `serial_command` payloads.
    #[must_use]
    pub fn serial_line(&self) -> Option<&str> {
        if self.command_type != SERIAL_COMMAND {
            return None;
        }
        self.params.get("command").and_then(Value::as_str)
    }
}

/// Compile one action into a command for its device.
///
/// `fallback_device` is the event's linked device, used when the action
/// does not name its own.
///
/// # Errors
///
/// Returns [`NoAction`] when the action has no kind, an unsupported kind,
/// or no device to target.
pub fn compile(
    action: &EventAction,
    fallback_device: Option<DeviceId>,
) -> Result<CommandPayload, NoAction> {
    let kind: ActionKind = action
        .kind
        .as_deref()
        .map(str::trim)
        .filter(|k| !k.is_empty())
        .ok_or(NoAction::MissingKind)?
        .parse()?;
    let device_id = action
        .device_id
        .or(fallback_device)
        .ok_or(NoAction::MissingDevice)?;

    let (command_type, params) = match kind {
        ActionKind::TurnOn | ActionKind::TurnOff => {
            (kind.as_str().to_string(), Value::Object(action.params.clone()))
        }
        _ => (
            SERIAL_COMMAND.to_string(),
            json!({ "command": serial_line(kind, action) }),
        ),
    };

    Ok(CommandPayload {
        device_id,
        command_type,
        params,
    })
}

fn serial_line(kind: ActionKind, action: &EventAction) -> String {
    let duration_ms = duration_ms(kind, action);
    match kind {
        ActionKind::SprayPump | ActionKind::Pump => format!("Spray {duration_ms}"),
        ActionKind::Fan => format!("Fan {duration_ms}"),
        ActionKind::FillValve => match action.params.get("target_liters") {
            Some(Value::Number(liters)) => format!("FillL {liters}"),
            Some(Value::String(liters)) if !liters.is_empty() => format!("FillL {liters}"),
            _ => format!("FillL {:.2}", estimated_liters(duration_ms)),
        },
        ActionKind::Valve => on_off(action, "TabON", "TabOFF").to_string(),
        ActionKind::Light => on_off(action, "LightON", "LightOFF").to_string(),
        ActionKind::TurnOn | ActionKind::TurnOff => kind.as_str().to_string(),
    }
}

/// Volume a fill valve delivers in `duration_ms` at the nominal flow rate.
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn estimated_liters(duration_ms: u64) -> f64 {
    (duration_ms as f64 / 1000.0 / 60.0) * FILL_RATE_LITERS_PER_MINUTE
}

fn duration_ms(kind: ActionKind, action: &EventAction) -> u64 {
    action
        .duration_ms
        .or_else(|| action.params.get("duration_ms").and_then(as_millis))
        .unwrap_or_else(|| kind.default_duration_ms())
}

/// Reads a duration stored as an integer, a float or a numeric string.
/// Fractions are truncated; negative or non-numeric values yield `None`.
pub(crate) fn as_millis(value: &Value) -> Option<u64> {
    match value {
        Value::Number(n) => n.as_u64().or_else(|| n.as_f64().and_then(truncate_millis)),
        Value::String(s) => {
            let s = s.trim();
            s.parse()
                .ok()
                .or_else(|| s.parse::<f64>().ok().and_then(truncate_millis))
        }
        _ => None,
    }
}

#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn truncate_millis(value: f64) -> Option<u64> {
    (value.is_finite() && value >= 0.0).then(|| value.trunc() as u64)
}

fn on_off(action: &EventAction, on: &'static str, off: &'static str) -> &'static str {
    let state = action
        .params
        .get("state")
        .and_then(Value::as_str)
        .unwrap_or("on");
    if state.eq_ignore_ascii_case("on") {
        on
    } else {
        off
    }
}
