//! Head control module
//!
//! The head is a latching servo: the D-pad selects one of three positions (left, centre, right)
//! and the head eases between them along smoothstep segments.

// ---------------------------------------------------------------------------
// MODULES
// ---------------------------------------------------------------------------

mod cmd;
mod params;
mod state;

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

pub use cmd::*;
pub use params::*;
pub use state::*;

// ---------------------------------------------------------------------------
// CONSTANTS
// ---------------------------------------------------------------------------

/// Minimum difference between the filtered target and the current segment end before a new
/// segment is started.
///
/// Units: degrees
pub const SEGMENT_RESTART_DEG: f64 = 1e-4;

// ---------------------------------------------------------------------------
// ENUMERATIONS
// ---------------------------------------------------------------------------

/// Possible errors that can occur during HeadCtrl operation.
#[derive(Debug, thiserror::Error)]
pub enum HeadCtrlError {
    #[error("Invalid head parameters: {0}")]
    InvalidParams(String),
}
