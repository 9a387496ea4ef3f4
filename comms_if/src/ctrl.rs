//! # Override channel messages
//!
//! The override channel lets a remote client take over the trike's steering, motor and head
//! demands, and adjust the calibration and limits used by the control loop. Each request is a
//! partial update, and every response carries the full post-validation snapshot.

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use chrono::{DateTime, Utc};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use thiserror::Error;

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

/// A partial update sent by an override client.
///
/// Every field is optional, a request with no fields is a poll and only returns the snapshot.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
pub struct CtrlRequest {
    /// Enable or disable the override.
    #[serde(rename = "override", default, skip_serializing_if = "Option::is_none")]
    pub override_active: Option<bool>,

    /// Override steering demand.
    ///
    /// Units: normalised, -1 (left) to +1 (right)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub steering: Option<f64>,

    /// Override motor demand.
    ///
    /// Units: normalised, -1 (full reverse) to +1 (full forward)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub motor: Option<f64>,

    /// Override head demand.
    ///
    /// Units: normalised, -1 (left) to +1 (right)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub head: Option<f64>,

    /// New forward and/or reverse motor limits.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub motor_limits: Option<MotorLimitsUpdate>,

    /// New steering angle calibration.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub steering_angles: Option<SteeringAngles>,

    /// New steering pulse calibration.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub steering_pulses: Option<SteeringPulses>,

    /// Shell command run when the gamepad disconnects. An empty string clears it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub disconnect_command: Option<String>,

    /// Actions to assign to gamepad buttons, keyed by button name (e.g. `KEY_304`). Buttons not
    /// named keep their current action.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub button_actions: Option<BTreeMap<String, ButtonAction>>,
}

/// Forward and reverse motor output caps.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq)]
pub struct MotorLimits {
    /// Maximum forward output, 0 to 1.
    pub forward: f64,

    /// Maximum reverse output magnitude, 0 to 1.
    pub reverse: f64,
}

/// A partial update to the [`MotorLimits`].
#[derive(Serialize, Deserialize, Debug, Clone, Copy, Default, PartialEq)]
pub struct MotorLimitsUpdate {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub forward: Option<f64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reverse: Option<f64>,
}

/// Steering servo angles for the full left, centre and full right positions.
///
/// Units: degrees of servo travel
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq)]
pub struct SteeringAngles {
    pub left_deg: f64,
    pub mid_deg: f64,
    pub right_deg: f64,
}

/// Steering servo pulse widths for the full left, centre and full right positions.
///
/// Units: microseconds
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq)]
pub struct SteeringPulses {
    pub left_us: f64,
    pub mid_us: f64,
    pub right_us: f64,
}

/// Which actuators have passed their arming sequence.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, Default, PartialEq)]
pub struct ArmedStatus {
    pub steering: bool,
    pub motor: bool,
}

/// The most recent physical outputs of the control loop.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, Default, PartialEq)]
pub struct OutputStatus {
    /// Steering servo position.
    ///
    /// Units: degrees
    pub steering_deg: f64,

    /// Motor output, -1 to +1.
    pub motor_speed: f64,

    /// Head servo position.
    ///
    /// Units: degrees
    pub head_deg: f64,
}

/// Battery status as reported by the telemetry source.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct BatteryStatus {
    pub state: BatteryState,

    /// Units: volts
    pub voltage: Option<f64>,

    /// Units: amps
    pub current: Option<f64>,

    /// Units: watts
    pub power: Option<f64>,

    /// State of charge, 0 to 100.
    pub percent: Option<f64>,

    pub charging: bool,

    /// Time of the sample.
    pub timestamp: Option<DateTime<Utc>>,
}

/// The full state of the override channel, returned in response to every request.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct CtrlSnapshot {
    #[serde(rename = "override")]
    pub override_active: bool,

    pub steering: f64,
    pub motor: f64,
    pub head: f64,

    pub motor_limits: MotorLimits,
    pub steering_angles: SteeringAngles,
    pub steering_pulses: SteeringPulses,

    pub disconnect_command: Option<String>,

    /// Buttons which currently have an action assigned.
    #[serde(default)]
    pub button_actions: BTreeMap<String, ButtonAction>,

    /// Time of the last accepted request, `None` if no request has been made.
    pub last_update: Option<DateTime<Utc>>,

    pub connection: ConnectionStatus,
    pub armed: ArmedStatus,
    pub outputs: OutputStatus,
    pub battery: BatteryStatus,

    /// Names of the request fields that were rejected during validation.
    pub rejected: Vec<String>,
}

// ------------------------------------------------------------------------------------------------
// ENUMS
// ------------------------------------------------------------------------------------------------

/// Response from the control server.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub enum CtrlResponse {
    /// The request was processed, the snapshot reflects the merged state.
    Snapshot(CtrlSnapshot),

    /// The request could not be parsed and was ignored.
    Invalid(String),
}

/// Action run when a gamepad button is pressed.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(tag = "mode", content = "value", rename_all = "snake_case")]
pub enum ButtonAction {
    /// Clear the button's action.
    None,

    /// Run a shell command.
    Command(String),
}

/// State of the gamepad connection.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum ConnectionStatus {
    Searching,
    Connected { device: String },
    Disconnected,
}

/// Battery monitor state.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum BatteryState {
    Unavailable,
    Initializing,
    Charging,
    Discharging,
    Idle,
    Error,
}

/// Errors which occur while parsing a request.
#[derive(Debug, Error)]
pub enum CtrlParseError {
    #[error("Request contains invalid JSON: {0}")]
    InvalidJson(serde_json::Error),

    #[error("Request must be a JSON object")]
    NotAnObject,
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl CtrlRequest {
    /// Parse a request from JSON, dropping fields that do not have the expected shape.
    ///
    /// The names of the dropped fields are returned alongside the request, so that one bad field
    /// does not cause the rest of the request to be discarded. Unknown fields are ignored. An empty
    /// string is treated as an empty (poll) request.
    pub fn from_json_lenient(s: &str) -> Result<(Self, Vec<String>), CtrlParseError> {
        if s.trim().is_empty() {
            return Ok((Self::default(), Vec::new()));
        }

        let value: Value = serde_json::from_str(s).map_err(CtrlParseError::InvalidJson)?;

        let mut obj = match value {
            Value::Object(o) => o,
            _ => return Err(CtrlParseError::NotAnObject),
        };

        let mut rejected = Vec::new();

        let req = Self {
            override_active: take_field(&mut obj, "override", &mut rejected),
            steering: take_field(&mut obj, "steering", &mut rejected),
            motor: take_field(&mut obj, "motor", &mut rejected),
            head: take_field(&mut obj, "head", &mut rejected),
            motor_limits: take_field(&mut obj, "motor_limits", &mut rejected),
            steering_angles: take_field(&mut obj, "steering_angles", &mut rejected),
            steering_pulses: take_field(&mut obj, "steering_pulses", &mut rejected),
            disconnect_command: take_field(&mut obj, "disconnect_command", &mut rejected),
            button_actions: take_map_field(&mut obj, "button_actions", &mut rejected),
        };

        Ok((req, rejected))
    }

    /// Returns true if the request contains no fields.
    pub fn is_poll(&self) -> bool {
        *self == Self::default()
    }
}

impl Default for BatteryStatus {
    fn default() -> Self {
        Self {
            state: BatteryState::Unavailable,
            voltage: None,
            current: None,
            power: None,
            percent: None,
            charging: false,
            timestamp: None,
        }
    }
}

impl Default for ConnectionStatus {
    fn default() -> Self {
        ConnectionStatus::Searching
    }
}

// ------------------------------------------------------------------------------------------------
// PRIVATE FUNCTIONS
// ------------------------------------------------------------------------------------------------

/// Remove `key` from the object and deserialize it, recording the key in `rejected` if the value
/// has the wrong shape. `null` is treated as absent.
fn take_field<T>(obj: &mut Map<String, Value>, key: &str, rejected: &mut Vec<String>) -> Option<T>
where
    T: DeserializeOwned,
{
    let value = obj.remove(key)?;

    if value.is_null() {
        return None;
    }

    match serde_json::from_value(value) {
        Ok(v) => Some(v),
        Err(_) => {
            rejected.push(key.to_string());
            None
        }
    }
}

/// Remove the object `key` and deserialize each of its entries on its own. Bad entries are
/// recorded as `key.entry`.
fn take_map_field<T>(
    obj: &mut Map<String, Value>,
    key: &str,
    rejected: &mut Vec<String>,
) -> Option<BTreeMap<String, T>>
where
    T: DeserializeOwned,
{
    let entries = match obj.remove(key)? {
        Value::Null => return None,
        Value::Object(m) => m,
        _ => {
            rejected.push(key.to_string());
            return None;
        }
    };

    let mut map = BTreeMap::new();
    for (name, value) in entries {
        match serde_json::from_value(value) {
            Ok(v) => {
                map.insert(name, v);
            }
            Err(_) => rejected.push(format!("{}.{}", key, name)),
        }
    }

    Some(map)
}

// ------------------------------------------------------------------------------------------------
// TESTS
// ------------------------------------------------------------------------------------------------
