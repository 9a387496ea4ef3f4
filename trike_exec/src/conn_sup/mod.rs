//! Connection supervisor module
//!
//! Finds the gamepad, takes exclusive hold of it, and decides when the link to it has been lost.

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
// ENUMERATIONS
// ---------------------------------------------------------------------------

/// Possible errors that can occur during connection supervision.
#[derive(Debug, thiserror::Error)]
pub enum ConnSupError {
    #[error("No gamepad matching \"{0}\" found after {1:.1} s")]
    DeviceNotFound(String, f64),

    #[error("Invalid connection parameters: {0}")]
    InvalidParams(String),
}

/// Reasons the link to the gamepad is considered lost.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum LinkLoss {
    #[error("device node vanished")]
    PathVanished,

    #[error("event read failed: {0}")]
    ReadError(String),

    #[error("{0} consecutive steering reads missing")]
    StaleAxisRead(u32),
}
