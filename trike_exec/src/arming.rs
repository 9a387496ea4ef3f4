//! # Arming Gate
//!
//! Per actuator safety gate. After a (re)connection the actuator is held at neutral for a fixed
//! safe-start window, and then until the input has been held within the neutral threshold
//! continuously for the arming duration. Once armed the gate stays armed until it is reset.

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};
use util::time::{secs_between, secs_to_duration};

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

/// Arming parameters for one actuator.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ArmingParams {
    /// Length of the safe-start window after a (re)connection.
    ///
    /// Units: seconds
    pub safe_start_s: f64,

    /// How long the input must remain neutral before the gate arms.
    ///
    /// Units: milliseconds
    pub arm_neutral_ms: f64,

    /// Largest input magnitude considered neutral.
    ///
    /// Units: normalised
    pub neutral_thresh: f64,
}

#[derive(Debug, Clone)]
pub struct ArmingGate {
    params: ArmingParams,

    safe_start_until: Instant,

    neutral_since: Option<Instant>,

    armed: bool,
}

// ------------------------------------------------------------------------------------------------
// ENUMS
// ------------------------------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ArmingState {
    /// Within the safe-start window, output forced to neutral.
    SafeStart,

    /// Waiting for the input to be held neutral, output forced to neutral.
    WaitNeutral,

    /// Input passed through.
    Armed,
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl ArmingGate {
    /// Create a new gate whose safe-start window begins at `now`.
    pub fn new(params: ArmingParams, now: Instant) -> Self {
        let mut gate = Self {
            params,
            safe_start_until: now,
            neutral_since: None,
            armed: false,
        };
        gate.reset(now);
        gate
    }

    /// Disarm and restart the safe-start window from `now`.
    pub fn reset(&mut self, now: Instant) {
        self.safe_start_until = now + secs_to_duration(self.params.safe_start_s);
        self.neutral_since = None;
        self.armed = false;
    }

    /// Feed a new input sample into the gate.
    ///
    /// Neutral time is accumulated during the safe-start window as well, so an input that has been
    /// left at rest arms as soon as the window closes.
    pub fn update(&mut self, x: f64, now: Instant) -> ArmingState {
        if x.abs() <= self.params.neutral_thresh {
            match self.neutral_since {
                None => self.neutral_since = Some(now),
                Some(since) => {
                    if secs_between(since, now) * 1000.0 >= self.params.arm_neutral_ms {
                        self.armed = true;
                    }
                }
            }
        } else {
            self.neutral_since = None;
        }

        self.state(now)
    }

    /// Arm the gate directly, as the override does. Has no effect during the safe-start window.
    pub fn force_arm(&mut self, now: Instant) -> bool {
        if !self.in_safe_start(now) {
            self.armed = true;
        }

        self.armed
    }

    pub fn in_safe_start(&self, now: Instant) -> bool {
        now < self.safe_start_until
    }

    pub fn is_armed(&self) -> bool {
        self.armed
    }

    /// Returns true if the input should be passed through.
    pub fn is_live(&self, now: Instant) -> bool {
        self.state(now) == ArmingState::Armed
    }

    pub fn state(&self, now: Instant) -> ArmingState {
        if self.in_safe_start(now) {
            ArmingState::SafeStart
        } else if !self.armed {
            ArmingState::WaitNeutral
        } else {
            ArmingState::Armed
        }
    }

    /// Time remaining in the safe-start window.
    pub fn safe_start_remaining(&self, now: Instant) -> Duration {
        self.safe_start_until.saturating_duration_since(now)
    }
}

// ------------------------------------------------------------------------------------------------
// TESTS
// ------------------------------------------------------------------------------------------------
