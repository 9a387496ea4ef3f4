//! # Calibration
//!
//! Servo geometry and the steering calibrations. Two independent three point calibrations are
//! used for steering: the angle calibration (left/mid/right degrees) sets how far the steering
//! travels, and the pulse calibration (left/mid/right microseconds) corrects asymmetric servo
//! response at the hardware boundary.

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use comms_if::ctrl::{SteeringAngles, SteeringPulses};
use serde::{Deserialize, Serialize};
use util::maths::{clamp, lin_map, quantize, round_dp};

// ------------------------------------------------------------------------------------------------
// CONSTANTS
// ------------------------------------------------------------------------------------------------

/// Resolution of steering angle calibration values.
///
/// Units: degrees
pub const STEERING_STEP_DEG: f64 = 0.5;

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

/// Pulse range and travel shared by the trike's servos.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ServoParams {
    /// Pulse width at 0 degrees.
    ///
    /// Units: microseconds
    pub us_min: f64,

    /// Pulse width at full travel.
    ///
    /// Units: microseconds
    pub us_max: f64,

    /// Full travel of the servo.
    ///
    /// Units: degrees
    pub range_deg: f64,
}

/// Steering angles at full left, centre and full right.
///
/// Units: degrees
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SteeringAngleCalibration {
    pub left_deg: f64,
    pub mid_deg: f64,
    pub right_deg: f64,
}

/// Steering pulse widths at the left, mid and right calibration angles.
///
/// Units: microseconds
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SteeringPulseCalibration {
    pub left_us: f64,
    pub mid_us: f64,
    pub right_us: f64,
}

/// Head servo travel limits and latch positions.
///
/// Units: degrees
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct HeadGeometry {
    pub min_deg: f64,
    pub max_deg: f64,
    pub left_deg: f64,
    pub center_deg: f64,
    pub right_deg: f64,
}

// ------------------------------------------------------------------------------------------------
// ENUMS
// ------------------------------------------------------------------------------------------------

/// The geometry used to turn a normalised demand into a servo angle.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum AxisKind {
    Steering(SteeringAngleCalibration),
    Head(HeadGeometry),
}

/// Reasons a calibration update is rejected.
#[derive(Debug, thiserror::Error, PartialEq)]
pub enum CalibError {
    #[error("Calibration value {0} is not a finite number")]
    NonFinite(&'static str),

    #[error("Steering angles must satisfy 0 <= left <= mid <= right <= {0}")]
    UnorderedAngles(f64),

    #[error("Steering pulses must be all non-decreasing or all non-increasing")]
    NonMonotonicPulses,

    #[error("Servo pulse range is empty (us_min {0} >= us_max {1})")]
    EmptyPulseRange(f64, f64),
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl ServoParams {
    pub fn validate(&self) -> Result<(), CalibError> {
        if self.us_min < self.us_max && self.range_deg > 0.0 {
            Ok(())
        } else {
            Err(CalibError::EmptyPulseRange(self.us_min, self.us_max))
        }
    }

    /// Linear map from servo angle to pulse width over the whole travel. The angle is clamped to
    /// the travel first.
    pub fn deg_to_us(&self, deg: f64) -> f64 {
        let d = clamp(&deg, &0.0, &self.range_deg);
        lin_map((0.0, self.range_deg), (self.us_min, self.us_max), d)
    }

    pub fn clamp_us(&self, us: f64) -> f64 {
        clamp(&us, &self.us_min, &self.us_max)
    }
}

impl Default for ServoParams {
    fn default() -> Self {
        Self {
            us_min: 600.0,
            us_max: 2400.0,
            range_deg: 270.0,
        }
    }
}

impl SteeringAngleCalibration {
    /// Validate and normalise a requested angle calibration.
    ///
    /// Each angle is clamped into the servo travel and quantised to [`STEERING_STEP_DEG`]. The
    /// three must then be ordered.
    pub fn sanitize(raw: &SteeringAngles, servo: &ServoParams) -> Result<Self, CalibError> {
        let calib = Self {
            left_deg: sanitize_angle(raw.left_deg, servo.range_deg, "left_deg")?,
            mid_deg: sanitize_angle(raw.mid_deg, servo.range_deg, "mid_deg")?,
            right_deg: sanitize_angle(raw.right_deg, servo.range_deg, "right_deg")?,
        };

        if calib.is_ordered(servo.range_deg) {
            Ok(calib)
        } else {
            Err(CalibError::UnorderedAngles(servo.range_deg))
        }
    }

    pub fn is_ordered(&self, range_deg: f64) -> bool {
        0.0 <= self.left_deg
            && self.left_deg <= self.mid_deg
            && self.mid_deg <= self.right_deg
            && self.right_deg <= range_deg
    }

    /// Map a normalised steering demand onto the calibrated angles.
    pub fn axis_to_deg(&self, ax: f64) -> f64 {
        let ax = clamp(&ax, &-1.0, &1.0);

        let span = if ax >= 0.0 {
            self.right_deg - self.mid_deg
        } else {
            self.mid_deg - self.left_deg
        };

        clamp(&(self.mid_deg + ax * span), &self.left_deg, &self.right_deg)
    }
}

impl Default for SteeringAngleCalibration {
    fn default() -> Self {
        Self {
            left_deg: 100.0,
            mid_deg: 150.0,
            right_deg: 200.0,
        }
    }
}

impl From<SteeringAngleCalibration> for SteeringAngles {
    fn from(c: SteeringAngleCalibration) -> Self {
        Self {
            left_deg: c.left_deg,
            mid_deg: c.mid_deg,
            right_deg: c.right_deg,
        }
    }
}

impl SteeringPulseCalibration {
    /// Validate and normalise a requested pulse calibration.
    ///
    /// Each pulse is clamped into the servo's pulse range and rounded to the nearest microsecond.
    /// The triple must then be monotonic.
    pub fn sanitize(raw: &SteeringPulses, servo: &ServoParams) -> Result<Self, CalibError> {
        let calib = Self {
            left_us: sanitize_pulse(raw.left_us, servo, "left_us")?,
            mid_us: sanitize_pulse(raw.mid_us, servo, "mid_us")?,
            right_us: sanitize_pulse(raw.right_us, servo, "right_us")?,
        };

        if calib.is_monotonic() {
            Ok(calib)
        } else {
            Err(CalibError::NonMonotonicPulses)
        }
    }

    /// Default pulses, the servo's linear map evaluated at the given angles.
    pub fn from_angles(angles: &SteeringAngleCalibration, servo: &ServoParams) -> Self {
        Self {
            left_us: servo.deg_to_us(angles.left_deg).round(),
            mid_us: servo.deg_to_us(angles.mid_deg).round(),
            right_us: servo.deg_to_us(angles.right_deg).round(),
        }
    }

    pub fn is_monotonic(&self) -> bool {
        let increasing = self.left_us <= self.mid_us && self.mid_us <= self.right_us;
        let decreasing = self.left_us >= self.mid_us && self.mid_us >= self.right_us;

        increasing || decreasing
    }

    /// Piecewise linear map from steering angle to pulse width through the three calibration
    /// points.
    ///
    /// The angle is clamped to the calibrated travel. A degenerate half (zero width in degrees)
    /// resolves to the mid pulse. The result is always within the servo's pulse range.
    pub fn deg_to_us(
        &self,
        deg: f64,
        angles: &SteeringAngleCalibration,
        servo: &ServoParams,
    ) -> f64 {
        let deg = clamp(&deg, &angles.left_deg, &angles.right_deg);

        let us = if deg <= angles.mid_deg {
            if angles.mid_deg - angles.left_deg <= 0.0 {
                self.mid_us
            } else {
                lin_map(
                    (angles.left_deg, angles.mid_deg),
                    (self.left_us, self.mid_us),
                    deg,
                )
            }
        } else if angles.right_deg - angles.mid_deg <= 0.0 {
            self.mid_us
        } else {
            lin_map(
                (angles.mid_deg, angles.right_deg),
                (self.mid_us, self.right_us),
                deg,
            )
        };

        servo.clamp_us(us)
    }
}

impl Default for SteeringPulseCalibration {
    fn default() -> Self {
        Self::from_angles(&SteeringAngleCalibration::default(), &ServoParams::default())
    }
}

impl From<SteeringPulseCalibration> for SteeringPulses {
    fn from(c: SteeringPulseCalibration) -> Self {
        Self {
            left_us: c.left_us,
            mid_us: c.mid_us,
            right_us: c.right_us,
        }
    }
}

impl HeadGeometry {
    /// Check the geometry is within the servo's travel and the latch positions are in limits.
    pub fn is_valid(&self, range_deg: f64) -> bool {
        let in_limits = |d: f64| self.min_deg <= d && d <= self.max_deg;

        self.min_deg >= 0.0
            && self.max_deg <= range_deg
            && self.min_deg <= self.max_deg
            && in_limits(self.left_deg)
            && in_limits(self.center_deg)
            && in_limits(self.right_deg)
    }

    /// Map a normalised head demand onto the latch positions, -1 is left and +1 is right.
    pub fn axis_to_deg(&self, ax: f64) -> f64 {
        let ax = clamp(&ax, &-1.0, &1.0);

        let span = if ax >= 0.0 {
            self.right_deg - self.center_deg
        } else {
            self.center_deg - self.left_deg
        };

        self.clamp_deg(self.center_deg + ax * span)
    }

    pub fn clamp_deg(&self, deg: f64) -> f64 {
        clamp(&deg, &self.min_deg, &self.max_deg)
    }
}

impl Default for HeadGeometry {
    fn default() -> Self {
        Self {
            min_deg: 30.0,
            max_deg: 150.0,
            left_deg: 30.0,
            center_deg: 90.0,
            right_deg: 150.0,
        }
    }
}

impl AxisKind {
    /// Travel limits of the axis.
    pub fn range(&self) -> (f64, f64) {
        match self {
            AxisKind::Steering(a) => (a.left_deg, a.right_deg),
            AxisKind::Head(h) => (h.min_deg, h.max_deg),
        }
    }

    /// Resting angle of the axis.
    pub fn neutral(&self) -> f64 {
        match self {
            AxisKind::Steering(a) => a.mid_deg,
            AxisKind::Head(h) => h.center_deg,
        }
    }

    /// Map a normalised demand in `[-1, 1]` onto the axis.
    pub fn axis_to_deg(&self, ax: f64) -> f64 {
        match self {
            AxisKind::Steering(a) => a.axis_to_deg(ax),
            AxisKind::Head(h) => h.axis_to_deg(ax),
        }
    }
}

// ------------------------------------------------------------------------------------------------
// PRIVATE FUNCTIONS
// ------------------------------------------------------------------------------------------------

fn sanitize_angle(value: f64, range_deg: f64, name: &'static str) -> Result<f64, CalibError> {
    if !value.is_finite() {
        return Err(CalibError::NonFinite(name));
    }

    let limited = clamp(&value, &0.0, &range_deg);

    Ok(round_dp(quantize(limited, STEERING_STEP_DEG), 3))
}

fn sanitize_pulse(value: f64, servo: &ServoParams, name: &'static str) -> Result<f64, CalibError> {
    if !value.is_finite() {
        return Err(CalibError::NonFinite(name));
    }

    Ok(servo.clamp_us(value).round())
}

// ------------------------------------------------------------------------------------------------
// TESTS
// ------------------------------------------------------------------------------------------------

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_axis_to_deg_steering() {
        let angles = SteeringAngleCalibration::default();

        assert_eq!(angles.axis_to_deg(0.5), 175.0);
        assert_eq!(angles.axis_to_deg(-0.5), 125.0);
        assert_eq!(angles.axis_to_deg(0.0), 150.0);
        assert_eq!(angles.axis_to_deg(3.0), 200.0);

        let asym = SteeringAngleCalibration {
            left_deg: 90.0,
            mid_deg: 150.0,
            right_deg: 180.0,
        };
        assert_eq!(asym.axis_to_deg(-1.0), 90.0);
        assert_eq!(asym.axis_to_deg(1.0), 180.0);
        assert_eq!(AxisKind::Steering(asym).range(), (90.0, 180.0));
    }

    #[test]
    fn test_axis_to_deg_head() {
        let head = HeadGeometry::default();
        let kind = AxisKind::Head(head);

        assert_eq!(kind.axis_to_deg(-1.0), 30.0);
        assert_eq!(kind.axis_to_deg(0.0), 90.0);
        assert_eq!(kind.axis_to_deg(0.5), 120.0);
        assert_eq!(kind.neutral(), 90.0);
        assert!(head.is_valid(270.0));
    }

    #[test]
    fn test_default_pulses() {
        let p = SteeringPulseCalibration::default();

        assert_eq!(p.left_us, 1267.0);
        assert_eq!(p.mid_us, 1600.0);
        assert_eq!(p.right_us, 1933.0);
    }

    #[test]
    fn test_pulse_mapping_bounded_and_monotonic() {
        let servo = ServoParams::default();
        let angles = SteeringAngleCalibration::default();

        let calibs = [
            SteeringPulseCalibration::default(),
            SteeringPulseCalibration {
                left_us: 2000.0,
                mid_us: 1500.0,
                right_us: 1100.0,
            },
            SteeringPulseCalibration {
                left_us: 500.0,
                mid_us: 1500.0,
                right_us: 2600.0,
            },
        ];

        for c in calibs.iter() {
            let increasing = c.right_us >= c.left_us;
            let mut last = c.deg_to_us(0.0, &angles, &servo);

            for i in 0..=270 {
                let us = c.deg_to_us(i as f64, &angles, &servo);
                assert!(us >= servo.us_min && us <= servo.us_max);
                if increasing {
                    assert!(us >= last);
                } else {
                    assert!(us <= last);
                }
                last = us;
            }
        }
    }

    #[test]
    fn test_pulse_mapping_points_and_degenerate() {
        let servo = ServoParams::default();
        let pulses = SteeringPulseCalibration {
            left_us: 1200.0,
            mid_us: 1500.0,
            right_us: 2000.0,
        };
        let angles = SteeringAngleCalibration::default();

        assert_eq!(pulses.deg_to_us(100.0, &angles, &servo), 1200.0);
        assert_eq!(pulses.deg_to_us(150.0, &angles, &servo), 1500.0);
        assert_eq!(pulses.deg_to_us(175.0, &angles, &servo), 1750.0);
        assert_eq!(pulses.deg_to_us(200.0, &angles, &servo), 2000.0);

        let flat = SteeringAngleCalibration {
            left_deg: 150.0,
            mid_deg: 150.0,
            right_deg: 150.0,
        };
        assert_eq!(pulses.deg_to_us(120.0, &flat, &servo), 1500.0);
        assert_eq!(pulses.deg_to_us(180.0, &flat, &servo), 1500.0);
    }

    #[test]
    fn test_sanitize_angles() {
        let servo = ServoParams::default();

        let ok = SteeringAngleCalibration::sanitize(
            &SteeringAngles {
                left_deg: 99.8,
                mid_deg: 150.1,
                right_deg: 300.0,
            },
            &servo,
        )
        .unwrap();
        assert_eq!(ok.left_deg, 100.0);
        assert_eq!(ok.mid_deg, 150.0);
        assert_eq!(ok.right_deg, 270.0);

        assert_eq!(
            SteeringAngleCalibration::sanitize(
                &SteeringAngles {
                    left_deg: 160.0,
                    mid_deg: 150.0,
                    right_deg: 200.0,
                },
                &servo,
            ),
            Err(CalibError::UnorderedAngles(270.0))
        );

        assert_eq!(
            SteeringAngleCalibration::sanitize(
                &SteeringAngles {
                    left_deg: f64::NAN,
                    mid_deg: 150.0,
                    right_deg: 200.0,
                },
                &servo,
            ),
            Err(CalibError::NonFinite("left_deg"))
        );
    }

    #[test]
    fn test_sanitize_pulses() {
        let servo = ServoParams::default();

        let ok = SteeringPulseCalibration::sanitize(
            &SteeringPulses {
                left_us: 500.0,
                mid_us: 1500.4,
                right_us: 2100.6,
            },
            &servo,
        )
        .unwrap();
        assert_eq!(ok.left_us, 600.0);
        assert_eq!(ok.mid_us, 1500.0);
        assert_eq!(ok.right_us, 2101.0);

        assert_eq!(
            SteeringPulseCalibration::sanitize(
                &SteeringPulses {
                    left_us: 1500.0,
                    mid_us: 1200.0,
                    right_us: 1800.0,
                },
                &servo,
            ),
            Err(CalibError::NonMonotonicPulses)
        );
    }
}
