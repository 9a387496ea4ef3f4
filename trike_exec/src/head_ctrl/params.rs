//! Parameters structure for HeadCtrl

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

use serde::{Deserialize, Serialize};

use super::HeadCtrlError;
use crate::{
    calib::HeadGeometry,
    hw::{codes, Pin},
};

// ---------------------------------------------------------------------------
// DATA STRUCTURES
// ---------------------------------------------------------------------------

/// Parameters for head control.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Params {
    /// GPIO pin of the head servo.
    pub pin: Pin,

    /// Event code of the horizontal D-pad hat.
    pub hat_x_code: u16,

    /// Event code of the vertical D-pad hat.
    pub hat_y_code: u16,

    pub geometry: HeadGeometry,

    /// Length of the window after a (re)connection during which D-pad commands are ignored and
    /// the head is held at centre.
    ///
    /// Units: seconds
    pub safe_start_s: f64,

    /// Low pass factor applied to the latched target each tick.
    pub smooth_alpha: f64,

    /// Travel rate used to size easing segments. A value of zero or less makes every segment
    /// a single tick long.
    ///
    /// Units: degrees/second
    pub rate_deg_s: f64,

    /// Minimum movement since the last emitted pulse before a new pulse is emitted.
    ///
    /// Units: degrees
    pub update_hysteresis_deg: f64,
}

// ---------------------------------------------------------------------------
// IMPLEMENTATIONS
// ---------------------------------------------------------------------------

impl Params {
    pub fn validate(&self, range_deg: f64) -> Result<(), HeadCtrlError> {
        if !self.geometry.is_valid(range_deg) {
            return Err(HeadCtrlError::InvalidParams(format!(
                "head geometry {:?} must satisfy 0 <= min <= left, center, right <= max <= {}",
                self.geometry, range_deg
            )));
        }

        if !(self.smooth_alpha > 0.0 && self.smooth_alpha <= 1.0) {
            return Err(HeadCtrlError::InvalidParams(
                "smooth_alpha must be in (0, 1]".into(),
            ));
        }

        if self.safe_start_s < 0.0 || self.update_hysteresis_deg < 0.0 {
            return Err(HeadCtrlError::InvalidParams(
                "safe_start_s and update_hysteresis_deg must be non-negative".into(),
            ));
        }

        Ok(())
    }
}

impl Default for Params {
    fn default() -> Self {
        Self {
            pin: 24,
            hat_x_code: codes::ABS_HAT0X,
            hat_y_code: codes::ABS_HAT0Y,
            geometry: HeadGeometry::default(),
            safe_start_s: 0.8,
            smooth_alpha: 0.8,
            rate_deg_s: 100.0,
            update_hysteresis_deg: 0.2,
        }
    }
}
