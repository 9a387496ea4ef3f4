//! Implementations for the HeadCtrl state structure

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

// External
use log::debug;
use serde::Serialize;
use std::time::Instant;

// Internal
use super::{HeadCmd, HeadCtrlError, Params, SEGMENT_RESTART_DEG};
use crate::calib::{AxisKind, ServoParams};
use util::{
    maths::smoothstep,
    module::State,
    time::{secs_between, secs_to_duration},
};

// ---------------------------------------------------------------------------
// DATA STRUCTURES
// ---------------------------------------------------------------------------

/// Head control module state
pub struct HeadCtrl {
    params: Params,

    servo: ServoParams,

    /// End of the head safe-start window.
    safe_start_until: Instant,

    /// Latched target.
    ///
    /// Units: degrees
    target_deg: f64,

    /// Low pass filtered target.
    ///
    /// Units: degrees
    filtered_deg: f64,

    /// Eased position.
    ///
    /// Units: degrees
    pos_deg: f64,

    segment: Option<HeadMotionSegment>,

    /// Position at which the last pulse was emitted.
    last_emitted_deg: Option<f64>,
}

/// One eased move of the head.
#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
pub struct HeadMotionSegment {
    pub start_deg: f64,
    pub end_deg: f64,

    #[serde(skip)]
    pub start_ts: Instant,

    /// Units: seconds
    pub duration: f64,
}

/// Input data to head control.
pub struct InputData {
    pub now: Instant,

    /// Units: seconds
    pub dt: f64,

    /// Latest D-pad command received this cycle, if any.
    pub cmd: Option<HeadCmd>,

    /// Override head demand, `Some` only when the override is active.
    pub override_demand: Option<f64>,
}

/// Output command from HeadCtrl.
#[derive(Clone, Copy, Serialize, Debug)]
pub struct OutputData {
    /// Units: degrees
    pub pos_deg: f64,

    /// Units: degrees
    pub target_deg: f64,

    /// Pulse width to send to the servo, `None` if the position has not moved far enough since
    /// the last emission.
    ///
    /// Units: microseconds
    pub pulse_us: Option<f64>,
}

/// Status report for HeadCtrl processing.
#[derive(Clone, Copy, Serialize, Debug, Default)]
pub struct StatusReport {
    pub safe_start: bool,
    pub moving: bool,
    pub cmd_ignored: bool,
}

// ---------------------------------------------------------------------------
// IMPLEMENTATIONS
// ---------------------------------------------------------------------------

impl HeadCtrl {
    /// Create a new head controller at rest in the centre, with the safe-start window opening at
    /// `now`.
    pub fn new(params: Params, servo: ServoParams, now: Instant) -> Self {
        let center = params.geometry.center_deg;
        let safe_start_until = now + secs_to_duration(params.safe_start_s);

        Self {
            params,
            servo,
            safe_start_until,
            target_deg: center,
            filtered_deg: center,
            pos_deg: center,
            segment: None,
            last_emitted_deg: None,
        }
    }

    pub fn params(&self) -> &Params {
        &self.params
    }

    pub fn pos_deg(&self) -> f64 {
        self.pos_deg
    }

    pub fn target_deg(&self) -> f64 {
        self.target_deg
    }

    pub fn segment(&self) -> Option<&HeadMotionSegment> {
        self.segment.as_ref()
    }

    pub fn in_safe_start(&self, now: Instant) -> bool {
        now < self.safe_start_until
    }

    /// Pulse width that holds the head at its centre position.
    pub fn center_pulse_us(&self) -> f64 {
        self.servo.deg_to_us(self.params.geometry.center_deg)
    }

    fn latch(&mut self, cmd: HeadCmd) {
        let g = &self.params.geometry;

        self.target_deg = match cmd {
            HeadCmd::Left => g.left_deg,
            HeadCmd::Center => g.center_deg,
            HeadCmd::Right => g.right_deg,
        };

        debug!("Head latched {:?} ({:.1} deg)", cmd, self.target_deg);
    }

    /// Advance the easing by one cycle.
    fn ease(&mut self, now: Instant, dt: f64) {
        let g = self.params.geometry;

        let target = g.clamp_deg(self.target_deg);
        self.filtered_deg += (target - self.filtered_deg) * self.params.smooth_alpha;

        let seg_end = self.segment.map(|s| s.end_deg).unwrap_or(self.pos_deg);

        if (self.filtered_deg - seg_end).abs() > SEGMENT_RESTART_DEG {
            let distance = (self.filtered_deg - self.pos_deg).abs();
            let duration = if self.params.rate_deg_s > 0.0 {
                (distance / self.params.rate_deg_s).max(dt)
            } else {
                0.0
            };

            self.segment = Some(HeadMotionSegment {
                start_deg: self.pos_deg,
                end_deg: self.filtered_deg,
                start_ts: now,
                duration,
            });
        }

        if let Some(seg) = self.segment {
            let t = if seg.duration > 0.0 {
                secs_between(seg.start_ts, now) / seg.duration
            } else {
                1.0
            };

            if t >= 1.0 {
                self.pos_deg = seg.end_deg;
                self.segment = None;
            } else {
                self.pos_deg = seg.start_deg + (seg.end_deg - seg.start_deg) * smoothstep(t);
            }
        }
    }
}

impl State for HeadCtrl {
    type InitData = Instant;
    type InitError = HeadCtrlError;

    type InputData = InputData;
    type OutputData = OutputData;
    type StatusReport = StatusReport;
    type ProcError = HeadCtrlError;

    /// Recentre the head and restart its safe-start window from the given instant.
    fn init(&mut self, now: Self::InitData) -> Result<(), Self::InitError> {
        let center = self.params.geometry.center_deg;

        self.safe_start_until = now + secs_to_duration(self.params.safe_start_s);
        self.target_deg = center;
        self.filtered_deg = center;
        self.pos_deg = center;
        self.segment = None;
        self.last_emitted_deg = None;

        Ok(())
    }

    /// Perform cyclic processing of head control.
    fn proc(
        &mut self,
        input_data: &Self::InputData,
    ) -> Result<(Self::OutputData, Self::StatusReport), Self::ProcError> {
        let now = input_data.now;
        let mut report = StatusReport {
            safe_start: self.in_safe_start(now),
            ..Default::default()
        };

        if let Some(cmd) = input_data.cmd {
            if report.safe_start {
                report.cmd_ignored = true;
            } else {
                self.latch(cmd);
            }
        }

        if let Some(demand) = input_data.override_demand {
            self.target_deg = if report.safe_start {
                self.params.geometry.center_deg
            } else {
                AxisKind::Head(self.params.geometry).axis_to_deg(demand)
            };
        }

        self.ease(now, input_data.dt);
        report.moving = self.segment.is_some();

        let pulse_us = match self.last_emitted_deg {
            Some(last) if (self.pos_deg - last).abs() < self.params.update_hysteresis_deg => None,
            _ => {
                self.last_emitted_deg = Some(self.pos_deg);
                Some(self.servo.deg_to_us(self.pos_deg))
            }
        };

        Ok((
            OutputData {
                pos_deg: self.pos_deg,
                target_deg: self.target_deg,
                pulse_us,
            },
            report,
        ))
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

    fn step(ctrl: &mut HeadCtrl, t: Instant, cmd: Option<HeadCmd>) -> (OutputData, StatusReport) {
        ctrl.proc(&InputData {
            now: t,
            dt: DT,
            cmd,
            override_demand: None,
        })
        .unwrap()
    }

    #[test]
    fn test_commands_ignored_in_safe_start() {
        let t0 = Instant::now();
        let mut ctrl = HeadCtrl::new(Params::default(), ServoParams::default(), t0);

        let (out, rpt) = step(&mut ctrl, t0 + Duration::from_millis(100), Some(HeadCmd::Left));
        assert!(rpt.safe_start);
        assert!(rpt.cmd_ignored);
        assert_eq!(out.target_deg, 90.0);

        // First cycle always emits
        assert_eq!(out.pulse_us, Some(ServoParams::default().deg_to_us(90.0)));

        // Holding still emits nothing more
        let (out, _) = step(&mut ctrl, t0 + Duration::from_millis(120), None);
        assert_eq!(out.pulse_us, None);
    }

    #[test]
    fn test_latch_and_ease() {
        let t0 = Instant::now();
        let mut ctrl = HeadCtrl::new(Params::default(), ServoParams::default(), t0);
        let mut t = t0 + Duration::from_secs(1);

        let (out, _) = step(&mut ctrl, t, Some(HeadCmd::Right));
        assert_eq!(out.target_deg, 150.0);

        // The position moves monotonically towards the target and settles on it
        let mut last = 90.0;
        for _ in 0..200 {
            t += Duration::from_millis(20);
            let (out, _) = step(&mut ctrl, t, None);
            assert!(out.pos_deg >= last - 1e-9);
            assert!(out.pos_deg <= 150.0 + 1e-9);
            if let Some(us) = out.pulse_us {
                assert!(us >= 600.0 && us <= 2400.0);
            }
            last = out.pos_deg;
        }
        assert!((ctrl.pos_deg() - 150.0).abs() < 1e-3);

        step(&mut ctrl, t, Some(HeadCmd::Center));
        assert_eq!(ctrl.target_deg(), 90.0);
    }

    #[test]
    fn test_emission_hysteresis() {
        let t0 = Instant::now();
        let mut ctrl = HeadCtrl::new(Params::default(), ServoParams::default(), t0);
        let mut t = t0 + Duration::from_secs(1);

        step(&mut ctrl, t, None);
        step(&mut ctrl, t, Some(HeadCmd::Left));

        let mut emitted = Vec::new();
        for _ in 0..200 {
            t += Duration::from_millis(20);
            let (out, _) = step(&mut ctrl, t, None);
            if out.pulse_us.is_some() {
                emitted.push(out.pos_deg);
            }
        }

        assert!(!emitted.is_empty());
        for pair in emitted.windows(2) {
            assert!((pair[0] - pair[1]).abs() >= 0.2);
        }
    }

    #[test]
    fn test_zero_rate_single_tick_segments() {
        let t0 = Instant::now();
        let params = Params {
            rate_deg_s: 0.0,
            smooth_alpha: 1.0,
            ..Default::default()
        };
        let mut ctrl = HeadCtrl::new(params, ServoParams::default(), t0);

        let (out, rpt) = step(&mut ctrl, t0 + Duration::from_secs(1), Some(HeadCmd::Left));
        assert_eq!(out.pos_deg, 30.0);
        assert!(!rpt.moving);
    }

    #[test]
    fn test_override_maps_through_geometry() {
        let t0 = Instant::now();
        let mut ctrl = HeadCtrl::new(Params::default(), ServoParams::default(), t0);

        let (out, _) = ctrl
            .proc(&InputData {
                now: t0 + Duration::from_millis(100),
                dt: DT,
                cmd: None,
                override_demand: Some(-1.0),
            })
            .unwrap();
        assert_eq!(out.target_deg, 90.0);

        let (out, _) = ctrl
            .proc(&InputData {
                now: t0 + Duration::from_secs(1),
                dt: DT,
                cmd: None,
                override_demand: Some(0.5),
            })
            .unwrap();
        assert_eq!(out.target_deg, 120.0);

        ctrl.init(t0 + Duration::from_secs(2)).unwrap();
        assert_eq!(ctrl.pos_deg(), 90.0);
        assert!(ctrl.in_safe_start(t0 + Duration::from_secs(2)));
    }
}
