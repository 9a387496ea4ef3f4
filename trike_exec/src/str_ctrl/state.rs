//! Implementations for the StrCtrl state structure

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

// External
use log::trace;
use serde::Serialize;
use std::time::Instant;

// Internal
use super::{Params, StrCtrlError, ACTIVE_INPUT_THRESH};
use crate::{
    arming::{ArmingGate, ArmingState},
    axis_shaper::{expo, Deadzone},
    calib::{AxisKind, ServoParams, SteeringAngleCalibration, SteeringPulseCalibration},
};
use util::{maths::clamp, module::State, time::secs_between};

// ---------------------------------------------------------------------------
// DATA STRUCTURES
// ---------------------------------------------------------------------------

/// Steering control module state
pub struct StrCtrl {
    params: Params,

    servo: ServoParams,

    gate: ArmingGate,

    deadzone: Deadzone,

    /// Current commanded steering angle.
    ///
    /// Units: degrees
    current_deg: f64,

    /// Steering angle being moved towards.
    ///
    /// Units: degrees
    target_deg: f64,

    /// Last shaped axis value, -1 to +1.
    shaped: f64,

    /// Last time the steering was actively used.
    last_active: Instant,

    report: StatusReport,
}

/// (Re)initialisation data, given at start up and after every reconnection.
pub struct InitData {
    pub now: Instant,
    pub angles: SteeringAngleCalibration,
}

/// Input data to steering control.
pub struct InputData {
    pub now: Instant,

    /// Time since the previous cycle.
    ///
    /// Units: seconds
    pub dt: f64,

    /// Normalised steering axis sample, or `None` if the read was missing this cycle.
    pub axis: Option<f64>,

    /// Override steering demand, `Some` only when the override is active.
    pub override_demand: Option<f64>,

    pub angles: SteeringAngleCalibration,

    pub pulses: SteeringPulseCalibration,
}

/// Output command from StrCtrl.
#[derive(Clone, Copy, Serialize, Debug)]
pub struct OutputData {
    /// Units: degrees
    pub pos_deg: f64,

    /// Units: degrees
    pub target_deg: f64,

    /// Pulse width to send to the servo.
    ///
    /// Units: microseconds
    pub pulse_us: f64,

    /// Shaped axis value, -1 to +1.
    pub shaped: f64,
}

/// Status report for StrCtrl processing.
#[derive(Clone, Copy, Serialize, Debug)]
pub struct StatusReport {
    pub arming: ArmingState,
    pub deadzone_holding: bool,
    pub rate_limited: bool,
    pub snapped: bool,
    pub recentred: bool,
}

// ---------------------------------------------------------------------------
// IMPLEMENTATIONS
// ---------------------------------------------------------------------------

impl StrCtrl {
    /// Create a new steering controller at rest in the centre, with the safe-start window opening
    /// at `now`.
    pub fn new(params: Params, servo: ServoParams, now: Instant) -> Self {
        let gate = ArmingGate::new(params.arming, now);
        let deadzone = Deadzone::new(params.deadzone);
        let neutral = params.angles.mid_deg;

        Self {
            params,
            servo,
            gate,
            deadzone,
            current_deg: neutral,
            target_deg: neutral,
            shaped: 0.0,
            last_active: now,
            report: StatusReport {
                arming: ArmingState::SafeStart,
                deadzone_holding: true,
                rate_limited: false,
                snapped: false,
                recentred: false,
            },
        }
    }

    pub fn params(&self) -> &Params {
        &self.params
    }

    pub fn is_armed(&self) -> bool {
        self.gate.is_armed()
    }

    pub fn current_deg(&self) -> f64 {
        self.current_deg
    }

    /// The pulse width that holds the steering at the calibrated centre.
    pub fn neutral_pulse_us(
        &self,
        angles: &SteeringAngleCalibration,
        pulses: &SteeringPulseCalibration,
    ) -> f64 {
        pulses.deg_to_us(angles.mid_deg, angles, &self.servo)
    }

    /// Move the target towards the demanded angle for the current input.
    fn update_target(&mut self, input: &InputData) {
        let now = input.now;
        let axis_kind = AxisKind::Steering(input.angles);
        let neutral = axis_kind.neutral();

        if let Some(raw) = input.axis {
            let x = if self.params.invert { -raw } else { raw };

            self.gate.update(x, now);

            if !self.gate.is_live(now) {
                self.shaped = 0.0;
                self.target_deg = neutral;
            } else {
                self.shaped = match self.deadzone.update(x, now) {
                    true => 0.0,
                    false => clamp(&expo(x, self.params.expo), &-1.0, &1.0),
                };
                self.target_deg = axis_kind.axis_to_deg(self.shaped);

                if self.shaped.abs() > ACTIVE_INPUT_THRESH {
                    self.last_active = now;
                }
            }
        }

        if let Some(demand) = input.override_demand {
            self.gate.force_arm(now);

            if self.gate.is_live(now) {
                let mut ax = clamp(&demand, &-1.0, &1.0);
                if self.params.invert {
                    ax = -ax;
                }
                self.shaped = ax;
                self.target_deg = axis_kind.axis_to_deg(ax);
            } else {
                self.shaped = 0.0;
                self.target_deg = neutral;
            }

            self.last_active = now;
            self.deadzone.release();
        }

        // Recentre after a period of inactivity
        if secs_between(self.last_active, now) > self.params.neutral_hold_s {
            self.target_deg = neutral;
            self.report.recentred = true;
        }
    }

    /// Advance the position one cycle towards the target.
    fn update_position(&mut self, input: &InputData) {
        let neutral = input.angles.mid_deg;
        let max_step = self.params.rate_deg_s * input.dt;

        // Snap onto the centre when resting there, at no more than the slew rate
        if self.target_deg == neutral && self.current_deg != neutral {
            let held = match self.deadzone.zero_since() {
                Some(t) => secs_between(t, input.now) >= self.params.neutral_snap_s,
                None => false,
            };
            let near = (self.current_deg - neutral).abs() <= self.params.center_snap_deg;

            if held || near {
                let delta = clamp(&(neutral - self.current_deg), &-max_step, &max_step);
                self.current_deg += delta;
                if (self.current_deg - neutral).abs() < 1e-9 {
                    self.current_deg = neutral;
                }
                self.report.snapped = true;
                return;
            }
        }

        let error = self.target_deg - self.current_deg;
        let filtered_delta = error * self.params.smooth_alpha;

        let mut delta = clamp(&filtered_delta, &-max_step, &max_step);
        self.report.rate_limited = filtered_delta.abs() > max_step;

        // Minimum step floor, never past the target nor faster than the slew rate
        if delta != 0.0 && delta.abs() < self.params.min_step_deg {
            let floor = self
                .params
                .min_step_deg
                .min(max_step)
                .min(error.abs());
            delta = floor.copysign(delta);
        }

        if self.current_deg != neutral || self.target_deg != neutral {
            self.current_deg += delta;
        }
    }
}

impl State for StrCtrl {
    type InitData = InitData;
    type InitError = StrCtrlError;

    type InputData = InputData;
    type OutputData = OutputData;
    type StatusReport = StatusReport;
    type ProcError = StrCtrlError;

    /// Reset the controller for a new connection: centred, disarmed and in safe start.
    fn init(&mut self, init_data: Self::InitData) -> Result<(), Self::InitError> {
        let neutral = init_data.angles.mid_deg;

        self.gate.reset(init_data.now);
        self.deadzone.reset();
        self.current_deg = neutral;
        self.target_deg = neutral;
        self.shaped = 0.0;
        self.last_active = init_data.now;

        Ok(())
    }

    /// Perform cyclic processing of steering control.
    fn proc(
        &mut self,
        input_data: &Self::InputData,
    ) -> Result<(Self::OutputData, Self::StatusReport), Self::ProcError> {
        self.report.rate_limited = false;
        self.report.snapped = false;
        self.report.recentred = false;

        self.update_target(input_data);
        self.update_position(input_data);

        self.report.arming = self.gate.state(input_data.now);
        self.report.deadzone_holding = self.deadzone.is_holding();

        let output = OutputData {
            pos_deg: self.current_deg,
            target_deg: self.target_deg,
            pulse_us: input_data.pulses.deg_to_us(
                self.current_deg,
                &input_data.angles,
                &self.servo,
            ),
            shaped: self.shaped,
        };

        trace!(
            "StrCtrl output: pos {:.2} deg, target {:.2} deg, {:.0} us",
            output.pos_deg,
            output.target_deg,
            output.pulse_us
        );

        Ok((output, self.report))
    }
}

// ---------------------------------------------------------------------------
// TESTS
// ---------------------------------------------------------------------------

#[cfg(test)]
mod test {
    use super::*;
    use std::time::Duration;

    const DT: f64 = 0.02;

    fn input(now: Instant, axis: Option<f64>, override_demand: Option<f64>) -> InputData {
        InputData {
            now,
            dt: DT,
            axis,
            override_demand,
            angles: SteeringAngleCalibration::default(),
            pulses: SteeringPulseCalibration::default(),
        }
    }

    fn non_inverted() -> Params {
        Params {
            invert: false,
            ..Default::default()
        }
    }

    /// Run the controller with a neutral axis until armed, returning the next cycle time.
    fn arm(ctrl: &mut StrCtrl, t0: Instant) -> Instant {
        let mut t = t0;
        for _ in 0..60 {
            ctrl.proc(&input(t, Some(0.0), None)).unwrap();
            t += Duration::from_millis(20);
        }
        assert!(ctrl.is_armed());
        t
    }

    #[test]
    fn test_target_from_axis() {
        let t0 = Instant::now();
        let mut ctrl = StrCtrl::new(non_inverted(), ServoParams::default(), t0);
        let mut t = arm(&mut ctrl, t0);

        // Full deflection maps onto the right calibration angle
        let (out, rpt) = ctrl.proc(&input(t, Some(1.0), None)).unwrap();
        assert_eq!(out.target_deg, 200.0);
        assert_eq!(rpt.arming, ArmingState::Armed);
        assert!(!rpt.deadzone_holding);

        // Eventually reaches it
        for _ in 0..200 {
            t += Duration::from_millis(20);
            ctrl.proc(&input(t, Some(1.0), None)).unwrap();
        }
        assert!((ctrl.current_deg() - 200.0).abs() < 1e-6);
    }

    #[test]
    fn test_rate_limit_holds_for_any_jump() {
        let t0 = Instant::now();
        let mut ctrl = StrCtrl::new(non_inverted(), ServoParams::default(), t0);
        let mut t = arm(&mut ctrl, t0);
        let max_step = 150.0 * DT;

        let demands = [1.0, -1.0, 0.5, -0.3, 1.0, 0.0, -1.0, 0.2];
        let mut last = ctrl.current_deg();

        for d in demands.iter() {
            for _ in 0..15 {
                t += Duration::from_millis(20);
                let (out, _) = ctrl.proc(&input(t, Some(*d), None)).unwrap();
                assert!(
                    (out.pos_deg - last).abs() <= max_step + 1e-9,
                    "step of {} exceeds {}",
                    (out.pos_deg - last).abs(),
                    max_step
                );
                last = out.pos_deg;
            }
        }
    }

    #[test]
    fn test_unarmed_holds_centre() {
        let t0 = Instant::now();
        let mut ctrl = StrCtrl::new(non_inverted(), ServoParams::default(), t0);

        // Deflected from connection, never arms
        for i in 0..100 {
            let t = t0 + Duration::from_millis(i * 20);
            let (out, rpt) = ctrl.proc(&input(t, Some(0.9), None)).unwrap();
            assert_eq!(out.pos_deg, 150.0);
            assert_eq!(out.pulse_us, 1600.0);
            assert_ne!(rpt.arming, ArmingState::Armed);
        }
    }

    #[test]
    fn test_override_and_inversion() {
        let t0 = Instant::now();
        let mut ctrl = StrCtrl::new(Params::default(), ServoParams::default(), t0);

        // During safe start the override is held at centre
        let (out, _) = ctrl
            .proc(&input(t0 + Duration::from_millis(100), None, Some(1.0)))
            .unwrap();
        assert_eq!(out.target_deg, 150.0);

        // Afterwards it arms the gate and, being inverted, +1 steers to the left angle
        let (out, rpt) = ctrl
            .proc(&input(t0 + Duration::from_millis(900), None, Some(1.0)))
            .unwrap();
        assert_eq!(out.target_deg, 100.0);
        assert_eq!(rpt.arming, ArmingState::Armed);
    }

    #[test]
    fn test_centre_snap_and_recentre() {
        let t0 = Instant::now();
        let mut ctrl = StrCtrl::new(non_inverted(), ServoParams::default(), t0);
        let mut t = arm(&mut ctrl, t0);

        for _ in 0..20 {
            t += Duration::from_millis(20);
            ctrl.proc(&input(t, Some(0.5), None)).unwrap();
        }
        assert!(ctrl.current_deg() > 160.0);

        // Release into the deadzone, the position returns exactly to centre
        let mut snapped = false;
        for _ in 0..100 {
            t += Duration::from_millis(20);
            let (_, rpt) = ctrl.proc(&input(t, Some(0.0), None)).unwrap();
            snapped |= rpt.snapped;
        }
        assert!(snapped);
        assert_eq!(ctrl.current_deg(), 150.0);

        // A held input that is too small to be active times out and recentres
        let mut ctrl = StrCtrl::new(non_inverted(), ServoParams::default(), t0);
        let mut t = arm(&mut ctrl, t0);
        let mut recentred = false;
        for _ in 0..200 {
            t += Duration::from_millis(20);
            let (out, rpt) = ctrl.proc(&input(t, None, None)).unwrap();
            recentred |= rpt.recentred;
            assert_eq!(out.target_deg, 150.0);
        }
        assert!(recentred);
    }

    #[test]
    fn test_init_resets() {
        let t0 = Instant::now();
        let mut ctrl = StrCtrl::new(non_inverted(), ServoParams::default(), t0);
        let t = arm(&mut ctrl, t0);

        ctrl.init(InitData {
            now: t,
            angles: SteeringAngleCalibration {
                left_deg: 110.0,
                mid_deg: 140.0,
                right_deg: 190.0,
            },
        })
        .unwrap();

        assert!(!ctrl.is_armed());
        assert_eq!(ctrl.current_deg(), 140.0);
    }
}
