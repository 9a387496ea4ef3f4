//! # Trike library.
//!
//! This library allows the executable, the integration tests and other crates in the workspace to
//! access the control modules of the trike.

// ------------------------------------------------------------------------------------------------
// MODULES
// ------------------------------------------------------------------------------------------------

/// Arming gate - holds an output at neutral until its input has rested at neutral
pub mod arming;

/// Axis shaper - normalisation, deadzone with hysteresis and expo
pub mod axis_shaper;

/// Gamepad buttons which can be assigned a command
pub mod buttons;

/// Servo and steering calibrations
pub mod calib;

/// Connection supervisor - finds, grabs and monitors the gamepad
pub mod conn_sup;

/// Control loop - the only user of the actuator driver
pub mod ctrl_loop;

/// Override server - serves the override channel on its own thread
pub mod ctrl_server;

/// State shared between the control loop and the override server
pub mod ctrl_state;

/// Drive control module - brake latch, caps and rate limits for the motor
pub mod drv_ctrl;

/// Head control module - latched positions reached by eased motion
pub mod head_ctrl;

/// Shell command hooks for disconnection and button presses
pub mod hook;

/// Hardware interfaces and backends
pub mod hw;

/// Executable parameters
pub mod params;

/// Persisted override settings
pub mod settings;

/// Steering control module - shaped, rate limited and smoothed steering
pub mod str_ctrl;

/// Battery telemetry source
pub mod telemetry;
