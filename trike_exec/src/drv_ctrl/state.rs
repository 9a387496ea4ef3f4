//! Implementations for the DrvCtrl state structure

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

// External
use comms_if::ctrl::MotorLimits;
use log::{debug, trace};
use serde::Serialize;
use std::time::Instant;

// Internal
use super::{DrvCtrlError, Params};
use crate::{
    arming::{ArmingGate, ArmingState},
    axis_shaper::{expo, rescale, Deadzone},
};
use util::{maths::clamp, module::State};

// ---------------------------------------------------------------------------
// DATA STRUCTURES
// ---------------------------------------------------------------------------

/// Drive control module state
pub struct DrvCtrl {
    params: Params,

    gate: ArmingGate,

    deadzone: Deadzone,

    /// Current motor speed, -1 to +1.
    speed: f64,

    /// Shaped demand the speed is moving towards.
    target: f64,

    brake_latched: bool,
}

/// Normalised throttle axes read from the gamepad this cycle. Axes the device does not have, or
/// that could not be read, are `None`.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct MotorDemand {
    /// Centred throttle stick, -1 to +1, before inversion.
    pub throttle: Option<f64>,

    /// Gas trigger, 0 to 1.
    pub gas: Option<f64>,

    /// Brake trigger, 0 to 1.
    pub brake: Option<f64>,
}

/// Input data to drive control.
pub struct InputData {
    pub now: Instant,

    /// Units: seconds
    pub dt: f64,

    pub demand: Option<MotorDemand>,

    /// Override motor demand, `Some` only when the override is active.
    pub override_demand: Option<f64>,

    pub limits: MotorLimits,
}

/// Output command from DrvCtrl.
#[derive(Clone, Copy, Serialize, Debug)]
pub struct OutputData {
    /// Motor speed to emit, -1 to +1.
    pub speed: f64,

    /// Shaped demand.
    pub target: f64,

    /// Raw combined demand before arming and shaping.
    pub demand: f64,
}

/// Status report for DrvCtrl processing.
#[derive(Clone, Copy, Serialize, Debug)]
pub struct StatusReport {
    pub arming: ArmingState,
    pub brake_latched: bool,
    pub deadzone_holding: bool,
    pub rate_limited: bool,
    pub capped: bool,
}

// ---------------------------------------------------------------------------
// IMPLEMENTATIONS
// ---------------------------------------------------------------------------

impl DrvCtrl {
    pub fn new(params: Params, now: Instant) -> Self {
        let gate = ArmingGate::new(params.arming, now);
        let deadzone = Deadzone::new(params.deadzone);

        Self {
            params,
            gate,
            deadzone,
            speed: 0.0,
            target: 0.0,
            brake_latched: false,
        }
    }

    pub fn params(&self) -> &Params {
        &self.params
    }

    pub fn speed(&self) -> f64 {
        self.speed
    }

    pub fn is_armed(&self) -> bool {
        self.gate.is_armed()
    }

    pub fn is_brake_latched(&self) -> bool {
        self.brake_latched
    }

    /// Combine the gamepad axes into a single demand, applying the brake latch.
    fn device_demand(&mut self, d: &MotorDemand) -> f64 {
        let throttle = d
            .throttle
            .map(|t| if self.params.invert_throttle { -t } else { t })
            .unwrap_or(0.0);
        let gas = d.gas.unwrap_or(0.0);
        let brake = d.brake.unwrap_or(0.0);

        if brake >= self.params.brake_latch_threshold {
            if !self.brake_latched {
                debug!("Brake latch engaged");
            }
            self.brake_latched = true;
        } else if self.brake_latched {
            let forward_intent = throttle.max(0.0).max(gas);

            if forward_intent > self.params.brake_rearm_threshold {
                debug!("Brake latch cleared");
                self.brake_latched = false;
            }
        }

        let y = clamp(&(throttle + gas - brake), &-1.0, &1.0);

        if self.brake_latched {
            y.min(0.0)
        } else {
            y
        }
    }
}

impl State for DrvCtrl {
    type InitData = Instant;
    type InitError = DrvCtrlError;

    type InputData = InputData;
    type OutputData = OutputData;
    type StatusReport = StatusReport;
    type ProcError = DrvCtrlError;

    /// Stop the motor and restart the arming sequence from the given instant.
    fn init(&mut self, now: Self::InitData) -> Result<(), Self::InitError> {
        self.gate.reset(now);
        self.deadzone.reset();
        self.speed = 0.0;
        self.target = 0.0;
        self.brake_latched = false;

        Ok(())
    }

    /// Perform cyclic processing of drive control.
    fn proc(
        &mut self,
        input_data: &Self::InputData,
    ) -> Result<(Self::OutputData, Self::StatusReport), Self::ProcError> {
        let now = input_data.now;
        let mut rate_limited = false;
        let mut capped = false;

        let demand = match (input_data.override_demand, input_data.demand) {
            (Some(o), _) => clamp(&o, &-1.0, &1.0),
            (None, Some(d)) => self.device_demand(&d),
            (None, None) => 0.0,
        };

        self.gate.update(demand, now);
        if input_data.override_demand.is_some() {
            self.gate.force_arm(now);
        }

        self.target = if self.gate.is_live(now) {
            match self.deadzone.update(demand, now) {
                true => 0.0,
                false => expo(
                    rescale(demand, self.params.deadzone.enter),
                    self.params.expo,
                ),
            }
        } else {
            0.0
        };

        if self.gate.in_safe_start(now) {
            self.speed = 0.0;
            self.target = 0.0;
        } else {
            let filtered = self.speed + (self.target - self.speed) * self.params.filter_alpha;

            // Positive steps are bounded by the accel rate, negative ones by the decel rate
            let max_up = self.params.accel_rate * input_data.dt;
            let max_down = self.params.decel_rate * input_data.dt;

            let delta = filtered - self.speed;
            rate_limited = delta > max_up || delta < -max_down;
            self.speed += clamp(&delta, &-max_down, &max_up);

            let limits = input_data.limits;
            let limited = clamp(&self.speed, &-limits.reverse, &limits.forward);
            capped = limited != self.speed;
            self.speed = limited;
        }

        trace!(
            "DrvCtrl: demand {:.3}, target {:.3}, speed {:.3}",
            demand,
            self.target,
            self.speed
        );

        Ok((
            OutputData {
                speed: self.speed,
                target: self.target,
                demand,
            },
            StatusReport {
                arming: self.gate.state(now),
                brake_latched: self.brake_latched,
                deadzone_holding: self.deadzone.is_holding(),
                rate_limited,
                capped,
            },
        ))
    }
}

// ---------------------------------------------------------------------------
// TESTS
// ---------------------------------------------------------------------------
