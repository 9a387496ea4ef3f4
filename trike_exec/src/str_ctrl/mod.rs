//! Steering control module
//!
//! Turns the steering axis (or the override demand) into a smoothed, rate limited steering servo
//! angle and pulse width.

// ---------------------------------------------------------------------------
// MODULES
// ---------------------------------------------------------------------------

mod params;
mod state;

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

pub use params::*;
pub use state::*;

// ---------------------------------------------------------------------------
// CONSTANTS
// ---------------------------------------------------------------------------

/// Shaped input magnitude above which the steering counts as actively used.
///
/// Units: normalised
pub const ACTIVE_INPUT_THRESH: f64 = 0.01;

// ---------------------------------------------------------------------------
// ENUMERATIONS
// ---------------------------------------------------------------------------

/// Possible errors that can occur during StrCtrl operation.
#[derive(Debug, thiserror::Error)]
pub enum StrCtrlError {
    #[error("Invalid steering parameters: {0}")]
    InvalidParams(String),
}
