//! # Communications interface crate.
//!
//! Provides the override channel's message definitions and the networking abstractions shared by
//! the trike executable and its clients.

// ------------------------------------------------------------------------------------------------
// MODULES
// ------------------------------------------------------------------------------------------------

/// Override channel requests, responses and snapshots
pub mod ctrl;

/// Network module
pub mod net;
