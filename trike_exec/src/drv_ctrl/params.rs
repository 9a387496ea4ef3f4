//! Parameters structure for DrvCtrl

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

use comms_if::ctrl::MotorLimits;
use serde::{Deserialize, Serialize};

use super::DrvCtrlError;
use crate::{
    arming::ArmingParams,
    axis_shaper::DeadzoneConfig,
    hw::{codes, Pin},
};

// ---------------------------------------------------------------------------
// DATA STRUCTURES
// ---------------------------------------------------------------------------

/// One motor driver channel. All channels are driven in lock-step.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MotorChannel {
    pub pwm_pin: Pin,
    pub dir_pin: Pin,

    /// Level of the direction pin that drives the motor forwards.
    pub forward_is_high: bool,
}

/// Parameters for drive control.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Params {
    // ---- HARDWARE ----
    pub channels: Vec<MotorChannel>,

    /// Units: hertz
    pub pwm_freq_hz: f64,

    /// Time the outputs are held at zero duty before a direction pin changes.
    ///
    /// Units: seconds
    pub dead_time_s: f64,

    // ---- INPUTS ----
    /// Absolute axis code of the centred throttle stick. Not used if the device lacks it.
    pub throttle_axis_code: u16,

    /// Invert the centred throttle stick.
    pub invert_throttle: bool,

    /// Absolute axis code of the gas trigger. Not used if the device lacks it.
    pub gas_axis_code: u16,

    /// Absolute axis code of the brake trigger. Not used if the device lacks it.
    pub brake_axis_code: u16,

    // ---- SHAPING ----
    pub deadzone: DeadzoneConfig,

    /// Expo factor applied to the demand after the deadzone is removed.
    pub expo: f64,

    pub arming: ArmingParams,

    /// Brake trigger value at or above which the brake latch engages.
    pub brake_latch_threshold: f64,

    /// Forward demand above which a released brake latch clears.
    pub brake_rearm_threshold: f64,

    // ---- MOTION ----
    /// Low pass factor applied to the shaped demand each tick.
    pub filter_alpha: f64,

    /// Largest increase in speed magnitude.
    ///
    /// Units: 1/second
    pub accel_rate: f64,

    /// Largest decrease in speed magnitude.
    ///
    /// Units: 1/second
    pub decel_rate: f64,

    /// Caps used until limits are restored from the settings file.
    pub default_limits: MotorLimits,
}

// ---------------------------------------------------------------------------
// IMPLEMENTATIONS
// ---------------------------------------------------------------------------

impl Params {
    pub fn validate(&self) -> Result<(), DrvCtrlError> {
        if self.channels.is_empty() {
            return Err(DrvCtrlError::InvalidParams(
                "at least one motor channel is required".into(),
            ));
        }

        if !self.deadzone.is_valid() {
            return Err(DrvCtrlError::InvalidParams(format!(
                "deadzone {:?} must have 0 <= enter < exit < 1",
                self.deadzone
            )));
        }

        let unit = 0.0..=1.0;
        if !unit.contains(&self.default_limits.forward)
            || !unit.contains(&self.default_limits.reverse)
        {
            return Err(DrvCtrlError::InvalidParams(format!(
                "motor limits {:?} must be within 0..1",
                self.default_limits
            )));
        }

        if self.arming.arm_neutral_ms <= 0.0 {
            return Err(DrvCtrlError::InvalidParams(
                "arm_neutral_ms must be positive".into(),
            ));
        }

        if self.brake_rearm_threshold < self.brake_latch_threshold {
            return Err(DrvCtrlError::InvalidParams(
                "brake_rearm_threshold must not be below brake_latch_threshold".into(),
            ));
        }

        if !(self.filter_alpha > 0.0 && self.filter_alpha <= 1.0)
            || self.accel_rate <= 0.0
            || self.decel_rate <= 0.0
            || self.pwm_freq_hz <= 0.0
            || self.dead_time_s < 0.0
        {
            return Err(DrvCtrlError::InvalidParams(
                "filter_alpha must be in (0, 1], rates and PWM frequency positive, dead time \
                 non-negative"
                    .into(),
            ));
        }

        Ok(())
    }
}

impl Default for Params {
    fn default() -> Self {
        Self {
            channels: vec![MotorChannel {
                pwm_pin: 18,
                dir_pin: 27,
                forward_is_high: true,
            }],
            pwm_freq_hz: 20_000.0,
            dead_time_s: 0.005,
            throttle_axis_code: codes::ABS_Y,
            invert_throttle: true,
            gas_axis_code: codes::ABS_GAS,
            brake_axis_code: codes::ABS_BRAKE,
            deadzone: DeadzoneConfig {
                enter: 0.10,
                exit: 0.12,
            },
            expo: 0.25,
            arming: ArmingParams {
                safe_start_s: 1.0,
                arm_neutral_ms: 500.0,
                neutral_thresh: 0.08,
            },
            brake_latch_threshold: 0.05,
            brake_rearm_threshold: 0.10,
            filter_alpha: 0.25,
            accel_rate: 3.0,
            decel_rate: 5.0,
            default_limits: MotorLimits {
                forward: 0.60,
                reverse: 0.50,
            },
        }
    }
}
