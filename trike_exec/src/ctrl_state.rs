//! # Shared control state
//!
//! State shared between the control loop and the override server. The override server merges
//! validated requests into it, the control loop takes one snapshot of it per tick and publishes
//! its own status back through a separate lock.

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use chrono::{DateTime, Utc};
use comms_if::ctrl::{
    ArmedStatus, ButtonAction, ConnectionStatus, CtrlRequest, CtrlSnapshot, MotorLimits,
    MotorLimitsUpdate, OutputStatus,
};
use log::{info, warn};
use std::{
    collections::BTreeMap,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
};

use crate::{
    buttons::{button_name, parse_button_name},
    calib::{CalibError, ServoParams, SteeringAngleCalibration, SteeringPulseCalibration},
    settings::{PersistedSettings, SettingsStore},
    telemetry::TelemetrySource,
};
use util::maths::{clamp, quantize, round_dp};

// ------------------------------------------------------------------------------------------------
// CONSTANTS
// ------------------------------------------------------------------------------------------------

/// Resolution of motor limits.
pub const MOTOR_LIMIT_STEP: f64 = 0.01;

/// Maximum length of the disconnect command.
///
/// Units: characters
pub const MAX_COMMAND_LEN: usize = 1024;

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

/// The override demands and tunables read by the control loop each tick.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ControlOverride {
    pub active: bool,

    /// Override demands, -1 to +1.
    pub steering: f64,
    pub motor: f64,
    pub head: f64,

    pub motor_limits: MotorLimits,
    pub steering_angles: SteeringAngleCalibration,
    pub steering_pulses: SteeringPulseCalibration,
}

/// Status published by the control loop.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LoopStatus {
    pub connection: ConnectionStatus,
    pub armed: ArmedStatus,
    pub outputs: OutputStatus,
}

pub struct SharedControlState {
    inner: Mutex<Inner>,

    status: Mutex<LoopStatus>,

    servo: ServoParams,

    store: Option<Box<dyn SettingsStore>>,

    telemetry: Option<Arc<dyn TelemetrySource>>,
}

struct Inner {
    ctrl: ControlOverride,

    disconnect_command: Option<String>,

    /// Commands assigned to buttons, by key code.
    button_actions: BTreeMap<u16, String>,

    last_update: Option<DateTime<Utc>>,
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl ControlOverride {
    /// Override disabled, demands at neutral.
    pub fn new(
        motor_limits: MotorLimits,
        steering_angles: SteeringAngleCalibration,
        steering_pulses: SteeringPulseCalibration,
    ) -> Self {
        Self {
            active: false,
            steering: 0.0,
            motor: 0.0,
            head: 0.0,
            motor_limits,
            steering_angles,
            steering_pulses,
        }
    }
}

impl SharedControlState {
    pub fn new(initial: ControlOverride, servo: ServoParams) -> Self {
        Self {
            inner: Mutex::new(Inner {
                ctrl: initial,
                disconnect_command: None,
                button_actions: BTreeMap::new(),
                last_update: None,
            }),
            status: Mutex::new(LoopStatus::default()),
            servo,
            store: None,
            telemetry: None,
        }
    }

    /// Persist calibration and command changes to the given store.
    pub fn with_store(mut self, store: Box<dyn SettingsStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn with_telemetry(mut self, telemetry: Arc<dyn TelemetrySource>) -> Self {
        self.telemetry = Some(telemetry);
        self
    }

    fn lock(&self) -> MutexGuard<Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_status(&self) -> MutexGuard<LoopStatus> {
        self.status.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Consistent copy of the override state.
    pub fn snapshot(&self) -> ControlOverride {
        self.lock().ctrl
    }

    pub fn disconnect_command(&self) -> Option<String> {
        self.lock().disconnect_command.clone()
    }

    /// Command assigned to the button with the given key code.
    pub fn button_command(&self, code: u16) -> Option<String> {
        self.lock().button_actions.get(&code).cloned()
    }

    /// Restore persisted settings, applying the same validation as override requests.
    ///
    /// Returns the names of the fields that were rejected.
    pub fn restore(&self, settings: &PersistedSettings) -> Vec<String> {
        let req = CtrlRequest {
            motor_limits: settings.motor_limits.map(|l| MotorLimitsUpdate {
                forward: Some(l.forward),
                reverse: Some(l.reverse),
            }),
            steering_angles: settings.steering_angles,
            steering_pulses: settings.steering_pulses,
            disconnect_command: settings.disconnect_command.clone(),
            button_actions: settings.button_actions.as_ref().map(|actions| {
                actions
                    .iter()
                    .map(|(name, cmd)| (name.clone(), ButtonAction::Command(cmd.clone())))
                    .collect()
            }),
            ..Default::default()
        };

        let mut rejected = Vec::new();
        let mut inner = self.lock();
        self.merge(&mut inner, &req, &mut rejected);

        rejected
    }

    /// Load and restore settings from the configured store, if any.
    pub fn restore_from_store(&self) {
        let store = match &self.store {
            Some(s) => s,
            None => return,
        };

        match store.load() {
            Ok(settings) => {
                let rejected = self.restore(&settings);
                if !rejected.is_empty() {
                    warn!("Persisted settings rejected: {}", rejected.join(", "));
                }
                info!("Settings restored");
            }
            Err(e) => warn!("Could not load persisted settings, using defaults: {}", e),
        }
    }

    /// Merge a partial update.
    ///
    /// Each field is validated on its own, invalid fields are dropped and listed in the returned
    /// snapshot's `rejected` along with `pre_rejected`. Settings changes are persisted after the
    /// lock is released.
    pub fn update(&self, req: &CtrlRequest, pre_rejected: Vec<String>) -> CtrlSnapshot {
        let mut rejected = pre_rejected;

        let (ctrl, command, button_actions, last_update, to_persist) = {
            let mut inner = self.lock();
            let persist = self.merge(&mut inner, req, &mut rejected);

            if !req.is_poll() {
                inner.last_update = Some(Utc::now());
            }

            let to_persist = match persist {
                true => Some(PersistedSettings {
                    motor_limits: Some(inner.ctrl.motor_limits),
                    steering_angles: Some(inner.ctrl.steering_angles.into()),
                    steering_pulses: Some(inner.ctrl.steering_pulses.into()),
                    disconnect_command: inner.disconnect_command.clone(),
                    button_actions: match inner.button_actions.is_empty() {
                        true => None,
                        false => Some(named_buttons(&inner.button_actions).collect()),
                    },
                }),
                false => None,
            };

            let buttons: BTreeMap<String, ButtonAction> = named_buttons(&inner.button_actions)
                .map(|(name, cmd)| (name, ButtonAction::Command(cmd)))
                .collect();

            (
                inner.ctrl,
                inner.disconnect_command.clone(),
                buttons,
                inner.last_update,
                to_persist,
            )
        };

        if let (Some(settings), Some(store)) = (to_persist, &self.store) {
            if let Err(e) = store.save(&settings) {
                warn!("Settings not persisted: {}", e);
            }
        }

        if !rejected.is_empty() {
            warn!("Override request fields rejected: {}", rejected.join(", "));
        }

        let status = self.lock_status().clone();
        let battery = self
            .telemetry
            .as_ref()
            .map(|t| t.battery())
            .unwrap_or_default();

        CtrlSnapshot {
            override_active: ctrl.active,
            steering: ctrl.steering,
            motor: ctrl.motor,
            head: ctrl.head,
            motor_limits: ctrl.motor_limits,
            steering_angles: ctrl.steering_angles.into(),
            steering_pulses: ctrl.steering_pulses.into(),
            disconnect_command: command,
            button_actions,
            last_update,
            connection: status.connection,
            armed: status.armed,
            outputs: status.outputs,
            battery,
            rejected,
        }
    }

    /// Full snapshot without changing anything.
    pub fn ctrl_snapshot(&self) -> CtrlSnapshot {
        self.update(&CtrlRequest::default(), Vec::new())
    }

    /// Modify the published loop status.
    pub fn with_status<F: FnOnce(&mut LoopStatus)>(&self, f: F) {
        f(&mut self.lock_status())
    }

    pub fn status(&self) -> LoopStatus {
        self.lock_status().clone()
    }

    /// Merge the request fields into the state. Returns true if a persisted setting changed.
    fn merge(&self, inner: &mut Inner, req: &CtrlRequest, rejected: &mut Vec<String>) -> bool {
        let mut persist = false;
        let ctrl = &mut inner.ctrl;

        if let Some(active) = req.override_active {
            if active != ctrl.active {
                info!("Override {}", if active { "enabled" } else { "disabled" });
            }
            ctrl.active = active;
        }

        let demands = [
            ("steering", req.steering, &mut ctrl.steering),
            ("motor", req.motor, &mut ctrl.motor),
            ("head", req.head, &mut ctrl.head),
        ];
        for (name, value, field) in demands {
            if let Some(v) = value {
                match sanitize_demand(v) {
                    Some(v) => *field = v,
                    None => rejected.push(name.to_string()),
                }
            }
        }

        if let Some(update) = req.motor_limits {
            let limits = [
                ("motor_limits.forward", update.forward, &mut ctrl.motor_limits.forward),
                ("motor_limits.reverse", update.reverse, &mut ctrl.motor_limits.reverse),
            ];
            for (name, value, field) in limits {
                if let Some(v) = value {
                    match sanitize_limit(v) {
                        Some(v) => {
                            *field = v;
                            persist = true;
                        }
                        None => rejected.push(name.to_string()),
                    }
                }
            }
        }

        if let Some(angles) = req.steering_angles {
            match SteeringAngleCalibration::sanitize(&angles, &self.servo) {
                Ok(a) => {
                    ctrl.steering_angles = a;
                    persist = true;
                }
                Err(e) => reject_calib("steering_angles", e, rejected),
            }
        }

        if let Some(pulses) = req.steering_pulses {
            match SteeringPulseCalibration::sanitize(&pulses, &self.servo) {
                Ok(p) => {
                    ctrl.steering_pulses = p;
                    persist = true;
                }
                Err(e) => reject_calib("steering_pulses", e, rejected),
            }
        }

        if let Some(command) = &req.disconnect_command {
            inner.disconnect_command = sanitize_command(command);
            persist = true;
        }

        for (name, action) in req.button_actions.iter().flatten() {
            let code = match parse_button_name(name) {
                Some(c) => c,
                None => {
                    rejected.push(format!("button_actions.{}", name));
                    continue;
                }
            };

            let command = match action {
                ButtonAction::Command(c) => sanitize_command(c),
                ButtonAction::None => None,
            };
            let changed = match command {
                Some(c) => inner.button_actions.insert(code, c.clone()) != Some(c),
                None => inner.button_actions.remove(&code).is_some(),
            };
            persist |= changed;
        }

        persist
    }
}

// ------------------------------------------------------------------------------------------------
// PUBLIC FUNCTIONS
// ------------------------------------------------------------------------------------------------

/// Clamp an override demand into `[-1, 1]`. Non-finite values are rejected.
pub fn sanitize_demand(value: f64) -> Option<f64> {
    if value.is_finite() {
        Some(clamp(&value, &-1.0, &1.0))
    } else {
        None
    }
}

/// Clamp a motor limit to `[0, 1]` and quantise it to [`MOTOR_LIMIT_STEP`]. Non-finite values are
/// rejected.
pub fn sanitize_limit(value: f64) -> Option<f64> {
    if value.is_finite() {
        Some(round_dp(
            quantize(clamp(&value, &0.0, &1.0), MOTOR_LIMIT_STEP),
            4,
        ))
    } else {
        None
    }
}

/// Single line, trimmed, length-limited command. An empty command clears it.
pub fn sanitize_command(command: &str) -> Option<String> {
    let line: String = command
        .chars()
        .map(|c| if c == '\r' || c == '\n' { ' ' } else { c })
        .collect();

    let trimmed: String = line.trim().chars().take(MAX_COMMAND_LEN).collect();

    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed)
    }
}

// ------------------------------------------------------------------------------------------------
// PRIVATE FUNCTIONS
// ------------------------------------------------------------------------------------------------

fn named_buttons(
    actions: &BTreeMap<u16, String>,
) -> impl Iterator<Item = (String, String)> + '_ {
    actions
        .iter()
        .map(|(code, cmd)| (button_name(*code), cmd.clone()))
}

fn reject_calib(name: &str, err: CalibError, rejected: &mut Vec<String>) {
    warn!("Rejected {}: {}", name, err);
    rejected.push(name.to_string());
}

// ------------------------------------------------------------------------------------------------
// TESTS
// ------------------------------------------------------------------------------------------------
