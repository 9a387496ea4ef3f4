//! # Axis Shaper
//!
//! Normalises raw gamepad axis samples and shapes them with a deadzone (with hysteresis) and an
//! expo response curve.

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use serde::{Deserialize, Serialize};
use std::time::Instant;
use util::maths::clamp;

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

/// Raw bounds reported by the input device for one absolute axis.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AxisCalibration {
    pub lo: i32,
    pub hi: i32,
}

/// Deadzone thresholds.
///
/// The output is held at zero until the input magnitude reaches `exit`, and is then live until the
/// magnitude falls to `enter` or below. `enter` must be less than `exit`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DeadzoneConfig {
    pub enter: f64,
    pub exit: f64,
}

/// Deadzone with hysteresis.
#[derive(Debug, Clone)]
pub struct Deadzone {
    config: DeadzoneConfig,

    /// True while the output is held at zero.
    holding: bool,

    /// Instant at which the output was first held at zero, cleared when the input goes live.
    zero_since: Option<Instant>,
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl AxisCalibration {
    pub fn normalize_centered(&self, raw: i32) -> f64 {
        normalize_centered(raw, self.lo, self.hi)
    }

    pub fn normalize_trigger(&self, raw: i32) -> f64 {
        normalize_trigger(raw, self.lo, self.hi)
    }
}

impl DeadzoneConfig {
    /// Check the thresholds are non-negative and ordered.
    pub fn is_valid(&self) -> bool {
        self.enter >= 0.0 && self.exit >= 0.0 && self.enter < self.exit && self.exit < 1.0
    }
}

impl Deadzone {
    /// Create a new deadzone, initially holding.
    pub fn new(config: DeadzoneConfig) -> Self {
        Self {
            config,
            holding: true,
            zero_since: None,
        }
    }

    /// Return to the holding state, forgetting when zero was entered.
    pub fn reset(&mut self) {
        self.holding = true;
        self.zero_since = None;
    }

    /// Force the live state, used when an external demand replaces the device input.
    pub fn release(&mut self) {
        self.holding = false;
        self.zero_since = None;
    }

    /// Update the hysteresis state with a new sample.
    ///
    /// Returns `true` if the output is held at zero.
    pub fn update(&mut self, x: f64, now: Instant) -> bool {
        let mag = x.abs();

        if self.holding {
            if mag >= self.config.exit {
                self.holding = false;
            }
        } else if mag <= self.config.enter {
            self.holding = true;
        }

        if self.holding {
            if self.zero_since.is_none() {
                self.zero_since = Some(now);
            }
        } else {
            self.zero_since = None;
        }

        self.holding
    }

    pub fn is_holding(&self) -> bool {
        self.holding
    }

    /// Instant at which the output was first held at zero, if it is currently held.
    pub fn zero_since(&self) -> Option<Instant> {
        self.zero_since
    }

    pub fn config(&self) -> &DeadzoneConfig {
        &self.config
    }
}

// ------------------------------------------------------------------------------------------------
// PUBLIC FUNCTIONS
// ------------------------------------------------------------------------------------------------

/// Map a raw centred axis sample into `[-1, 1]` about the midpoint of `lo..hi`.
///
/// Returns 0 if the range is degenerate.
pub fn normalize_centered(raw: i32, lo: i32, hi: i32) -> f64 {
    if hi == lo {
        return 0.0;
    }

    let lo = lo as f64;
    let hi = hi as f64;
    let mid = (hi + lo) / 2.0;
    let half_span = (hi - lo) / 2.0;

    (raw as f64 - mid) / half_span
}

/// Map a raw trigger sample into `[0, 1]`.
///
/// Returns 0 if the range is degenerate.
pub fn normalize_trigger(raw: i32, lo: i32, hi: i32) -> f64 {
    if hi == lo {
        return 0.0;
    }

    let v = (raw as f64 - lo as f64) / (hi as f64 - lo as f64);

    clamp(&v, &0.0, &1.0)
}

/// Cubic expo curve `(1 - k) x + k x³`.
pub fn expo(x: f64, k: f64) -> f64 {
    (1.0 - k) * x + k * x * x * x
}

/// Remove a deadzone of width `threshold` from `x` and stretch the remainder back over `[0, 1]`,
/// preserving sign.
pub fn rescale(x: f64, threshold: f64) -> f64 {
    if threshold >= 1.0 {
        return 0.0;
    }

    let mag = ((x.abs() - threshold) / (1.0 - threshold)).max(0.0);

    mag.copysign(x)
}

// ------------------------------------------------------------------------------------------------
// TESTS
// ------------------------------------------------------------------------------------------------
