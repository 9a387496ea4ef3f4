//! # Telemetry
//!
//! Battery telemetry is sampled outside the control loop. The override channel reads the latest
//! status through [`TelemetrySource`] when it builds a snapshot.

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use comms_if::ctrl::BatteryStatus;
use std::sync::{Mutex, PoisonError};

// ------------------------------------------------------------------------------------------------
// TRAITS
// ------------------------------------------------------------------------------------------------

pub trait TelemetrySource: Send + Sync {
    /// Latest battery status.
    fn battery(&self) -> BatteryStatus;
}

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

/// No battery monitor fitted, always reports unavailable.
pub struct NoTelemetry;

/// Telemetry published by an external sampler.
#[derive(Default)]
pub struct SharedTelemetry {
    battery: Mutex<BatteryStatus>,
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl TelemetrySource for NoTelemetry {
    fn battery(&self) -> BatteryStatus {
        BatteryStatus::default()
    }
}

impl SharedTelemetry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn publish(&self, status: BatteryStatus) {
        *self.battery.lock().unwrap_or_else(PoisonError::into_inner) = status;
    }
}

impl TelemetrySource for SharedTelemetry {
    fn battery(&self) -> BatteryStatus {
        self.battery
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

// ------------------------------------------------------------------------------------------------
// TESTS
// ------------------------------------------------------------------------------------------------
