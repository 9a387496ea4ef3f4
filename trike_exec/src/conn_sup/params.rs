//! Parameters structure for the connection supervisor

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

use serde::{Deserialize, Serialize};

use super::ConnSupError;

// ---------------------------------------------------------------------------
// DATA STRUCTURES
// ---------------------------------------------------------------------------

/// Parameters for the connection supervisor.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Params {
    /// Exact name of the preferred gamepad.
    pub device_name: String,

    /// Substring matched against device names if no exact match is found.
    pub fallback_name: String,

    /// Units: seconds
    pub rescan_interval_s: f64,

    /// Time to wait for the gamepad at start up before giving up.
    ///
    /// Units: seconds
    pub wait_for_device_s: f64,

    /// Time to wait for the gamepad after a disconnection before giving up.
    ///
    /// Units: seconds
    pub reconnect_timeout_s: f64,

    /// Pause after a disconnection before searching again.
    ///
    /// Units: seconds
    pub reconnect_cooldown_s: f64,

    /// Number of consecutive missing steering reads treated as a disconnection.
    pub max_missing_reads: u32,
}

// ---------------------------------------------------------------------------
// IMPLEMENTATIONS
// ---------------------------------------------------------------------------

impl Params {
    pub fn validate(&self) -> Result<(), ConnSupError> {
        if self.device_name.is_empty() && self.fallback_name.is_empty() {
            return Err(ConnSupError::InvalidParams(
                "one of device_name or fallback_name must be given".into(),
            ));
        }

        if self.rescan_interval_s <= 0.0 || self.max_missing_reads == 0 {
            return Err(ConnSupError::InvalidParams(
                "rescan_interval_s and max_missing_reads must be positive".into(),
            ));
        }

        if self.wait_for_device_s <= 0.0 || self.reconnect_timeout_s <= 0.0 {
            return Err(ConnSupError::InvalidParams(
                "wait_for_device_s and reconnect_timeout_s must be positive".into(),
            ));
        }

        Ok(())
    }
}

impl Default for Params {
    fn default() -> Self {
        Self {
            device_name: "8BitDo Ultimate C 2.4G Wireless Controller".into(),
            fallback_name: "8BitDo".into(),
            rescan_interval_s: 0.5,
            wait_for_device_s: 5.0,
            reconnect_timeout_s: 60.0,
            reconnect_cooldown_s: 0.5,
            max_missing_reads: 25,
        }
    }
}
