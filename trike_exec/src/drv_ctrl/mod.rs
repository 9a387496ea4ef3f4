//! Drive control module
//!
//! Turns the throttle axes (or the override demand) into a motor speed, applying the brake latch,
//! arming, shaping, rate limits and the forward/reverse caps, and emits that speed to one or more
//! motor driver channels.

// ---------------------------------------------------------------------------
// MODULES
// ---------------------------------------------------------------------------

mod emit;
mod params;
mod state;

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

pub use emit::*;
pub use params::*;
pub use state::*;

// ---------------------------------------------------------------------------
// CONSTANTS
// ---------------------------------------------------------------------------

/// Speeds with a magnitude below this are output as a stop.
pub const MIN_SPEED: f64 = 1e-3;

// ---------------------------------------------------------------------------
// ENUMERATIONS
// ---------------------------------------------------------------------------

/// Possible errors that can occur during DrvCtrl operation.
#[derive(Debug, thiserror::Error)]
pub enum DrvCtrlError {
    #[error("Invalid drive parameters: {0}")]
    InvalidParams(String),
}
