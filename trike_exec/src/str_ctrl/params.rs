//! Parameters structure for StrCtrl

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

use serde::{Deserialize, Serialize};

use super::StrCtrlError;
use crate::{
    arming::ArmingParams,
    axis_shaper::DeadzoneConfig,
    calib::{ServoParams, SteeringAngleCalibration, SteeringPulseCalibration},
    hw::{codes, Pin},
};

// ---------------------------------------------------------------------------
// DATA STRUCTURES
// ---------------------------------------------------------------------------

/// Parameters for steering control.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Params {
    // ---- HARDWARE ----
    /// GPIO pin of the steering servo.
    pub pin: Pin,

    /// Absolute axis code of the steering input.
    pub axis_code: u16,

    /// Invert the steering direction. Applies to the gamepad axis and to the override demand.
    pub invert: bool,

    // ---- SHAPING ----
    pub deadzone: DeadzoneConfig,

    /// Expo factor applied to the live axis, 0 (linear) to 1 (cubic).
    pub expo: f64,

    pub arming: ArmingParams,

    // ---- MOTION ----
    /// Low pass factor applied to the target each tick.
    pub smooth_alpha: f64,

    /// Maximum slew rate.
    ///
    /// Units: degrees/second
    pub rate_deg_s: f64,

    /// Smallest position change emitted in one tick.
    ///
    /// Units: degrees
    pub min_step_deg: f64,

    /// Time without active input after which the steering recentres.
    ///
    /// Units: seconds
    pub neutral_hold_s: f64,

    /// Distance from centre within which the position snaps to centre.
    ///
    /// Units: degrees
    pub center_snap_deg: f64,

    /// Time the axis must be held in the deadzone before the position snaps to centre.
    ///
    /// Units: seconds
    pub neutral_snap_s: f64,

    // ---- CALIBRATION ----
    /// Angle calibration used until one is restored from the settings file.
    pub angles: SteeringAngleCalibration,

    /// Pulse calibration used until one is restored from the settings file. If not given the
    /// servo's linear map at the calibrated angles is used.
    pub pulses: Option<SteeringPulseCalibration>,
}

// ---------------------------------------------------------------------------
// IMPLEMENTATIONS
// ---------------------------------------------------------------------------

impl Params {
    /// Initial pulse calibration.
    pub fn initial_pulses(&self, servo: &ServoParams) -> SteeringPulseCalibration {
        self.pulses
            .unwrap_or_else(|| SteeringPulseCalibration::from_angles(&self.angles, servo))
    }

    pub fn validate(&self, servo: &ServoParams) -> Result<(), StrCtrlError> {
        if !self.angles.is_ordered(servo.range_deg) {
            return Err(StrCtrlError::InvalidParams(format!(
                "steering angles {:?} must be ordered and within 0..{} degrees",
                self.angles, servo.range_deg
            )));
        }

        if let Some(p) = self.pulses {
            if !p.is_monotonic() || p.left_us.min(p.right_us) < servo.us_min
                || p.left_us.max(p.right_us) > servo.us_max
            {
                return Err(StrCtrlError::InvalidParams(format!(
                    "steering pulses {:?} must be monotonic and within {}..{} us",
                    p, servo.us_min, servo.us_max
                )));
            }
        }

        if !self.deadzone.is_valid() {
            return Err(StrCtrlError::InvalidParams(format!(
                "deadzone {:?} must have 0 <= enter < exit < 1",
                self.deadzone
            )));
        }

        if self.arming.arm_neutral_ms <= 0.0 {
            return Err(StrCtrlError::InvalidParams(
                "arm_neutral_ms must be positive".into(),
            ));
        }

        if !(self.smooth_alpha > 0.0 && self.smooth_alpha <= 1.0) {
            return Err(StrCtrlError::InvalidParams(
                "smooth_alpha must be in (0, 1]".into(),
            ));
        }

        if !(0.0..=1.0).contains(&self.expo) || self.rate_deg_s <= 0.0 || self.min_step_deg < 0.0
        {
            return Err(StrCtrlError::InvalidParams(
                "expo must be in [0, 1], rate_deg_s positive and min_step_deg non-negative".into(),
            ));
        }

        Ok(())
    }
}

impl Default for Params {
    fn default() -> Self {
        Self {
            pin: 17,
            axis_code: codes::ABS_Z,
            invert: true,
            deadzone: DeadzoneConfig {
                enter: 0.10,
                exit: 0.12,
            },
            expo: 0.30,
            arming: ArmingParams {
                safe_start_s: 0.8,
                arm_neutral_ms: 400.0,
                neutral_thresh: 0.08,
            },
            smooth_alpha: 0.20,
            rate_deg_s: 150.0,
            min_step_deg: 0.02,
            neutral_hold_s: 2.0,
            center_snap_deg: 0.6,
            neutral_snap_s: 0.15,
            angles: SteeringAngleCalibration::default(),
            pulses: None,
        }
    }
}
