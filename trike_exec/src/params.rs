//! # Trike Executable Parameters
//!
//! This module provides the parameters for the trike executable, loaded from `trike_exec.toml`.

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{calib::ServoParams, conn_sup, drv_ctrl, head_ctrl, str_ctrl};
use util::logger::LogParams;

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TrikeExecParams {
    /// Target period of one control cycle.
    ///
    /// Units: seconds
    pub tick_period_s: f64,

    /// Period of the status log line.
    ///
    /// Units: seconds
    pub status_log_period_s: f64,

    /// Endpoint the override server binds to.
    pub ctrl_endpoint: String,

    /// Receive timeout of the override server socket, which sets how quickly it notices a stop.
    ///
    /// Units: milliseconds
    pub ctrl_recv_timeout_ms: i32,

    /// Settings file, relative to the software root.
    pub settings_file: String,

    /// Terminal and session log file levels.
    pub log: LogParams,

    /// Pulse range and travel shared by the steering and head servos.
    pub servo: ServoParams,

    pub str_ctrl: str_ctrl::Params,

    pub head_ctrl: head_ctrl::Params,

    pub drv_ctrl: drv_ctrl::Params,

    pub conn_sup: conn_sup::Params,
}

// ------------------------------------------------------------------------------------------------
// ENUMS
// ------------------------------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum ParamsError {
    #[error("Servo parameters invalid: {0}")]
    Servo(#[from] crate::calib::CalibError),

    #[error(transparent)]
    StrCtrl(#[from] str_ctrl::StrCtrlError),

    #[error(transparent)]
    HeadCtrl(#[from] head_ctrl::HeadCtrlError),

    #[error(transparent)]
    DrvCtrl(#[from] drv_ctrl::DrvCtrlError),

    #[error(transparent)]
    ConnSup(#[from] conn_sup::ConnSupError),

    #[error("tick_period_s must be positive, found {0}")]
    TickPeriod(f64),
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl TrikeExecParams {
    /// Check the start up invariants of every module.
    pub fn validate(&self) -> Result<(), ParamsError> {
        if self.tick_period_s <= 0.0 {
            return Err(ParamsError::TickPeriod(self.tick_period_s));
        }

        self.servo.validate()?;
        self.str_ctrl.validate(&self.servo)?;
        self.head_ctrl.validate(self.servo.range_deg)?;
        self.drv_ctrl.validate()?;
        self.conn_sup.validate()?;

        Ok(())
    }
}

impl Default for TrikeExecParams {
    fn default() -> Self {
        Self {
            tick_period_s: 0.02,
            status_log_period_s: 0.3,
            ctrl_endpoint: "tcp://*:5020".into(),
            ctrl_recv_timeout_ms: 100,
            settings_file: "data/settings.json".into(),
            log: LogParams::default(),
            servo: ServoParams::default(),
            str_ctrl: str_ctrl::Params::default(),
            head_ctrl: head_ctrl::Params::default(),
            drv_ctrl: drv_ctrl::Params::default(),
            conn_sup: conn_sup::Params::default(),
        }
    }
}

// ------------------------------------------------------------------------------------------------
// TESTS
// ------------------------------------------------------------------------------------------------
