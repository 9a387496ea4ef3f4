//! # Hardware interfaces
//!
//! The control loop only talks to hardware through the traits in this module. The actuator
//! driver owns the GPIO/PWM outputs, and the input backend discovers and opens gamepads.
//!
//! Backends:
//! - [`sim`] - recording driver and scriptable gamepads, used by the tests and `--sim` mode.
//! - `evdev_input` - gamepads through the Linux event interface.
//! - `rpi` - Raspberry Pi GPIO and PWM.

// ------------------------------------------------------------------------------------------------
// MODULES
// ------------------------------------------------------------------------------------------------

pub mod sim;

#[cfg(target_os = "linux")]
pub mod evdev_input;

#[cfg(all(target_os = "linux", any(target_arch = "arm", target_arch = "aarch64")))]
pub mod rpi;

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::axis_shaper::AxisCalibration;

// ------------------------------------------------------------------------------------------------
// TYPES
// ------------------------------------------------------------------------------------------------

/// A BCM GPIO pin number.
pub type Pin = u8;

/// Linux input event codes used by the trike.
pub mod codes {
    pub const ABS_Y: u16 = 0x01;
    pub const ABS_Z: u16 = 0x02;
    pub const ABS_GAS: u16 = 0x09;
    pub const ABS_BRAKE: u16 = 0x0a;
    pub const ABS_HAT0X: u16 = 0x10;
    pub const ABS_HAT0Y: u16 = 0x11;
}

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

/// Summary of an input device found during enumeration.
#[derive(Debug, Clone, PartialEq)]
pub struct DeviceInfo {
    pub path: PathBuf,
    pub name: String,

    /// True if the device reports key (button) capability. Only such devices are gamepads.
    pub has_keys: bool,
}

/// A single input event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InputEvent {
    pub kind: EventKind,
    pub code: u16,
    pub value: i32,
}

// ------------------------------------------------------------------------------------------------
// ENUMS
// ------------------------------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    Absolute,
    Key,
    Other,
}

/// Errors raised by hardware backends.
#[derive(Debug, Error)]
pub enum HardwareError {
    #[error("Could not access pin {0}: {1}")]
    PinUnavailable(Pin, String),

    #[error("Write to pin {0} failed: {1}")]
    WriteFailed(Pin, String),

    #[error("Could not open input device {0:?}: {1}")]
    OpenFailed(PathBuf, String),

    #[error("Could not grab input device: {0}")]
    GrabFailed(String),

    #[error("Input device read failed: {0}")]
    ReadFailed(String),
}

// ------------------------------------------------------------------------------------------------
// TRAITS
// ------------------------------------------------------------------------------------------------

/// Low level actuator outputs.
pub trait ActuatorDriver: Send {
    /// Output a servo pulse of the given width on a pin.
    fn set_pulse_width_us(&mut self, pin: Pin, us: f64) -> Result<(), HardwareError>;

    /// Output a PWM signal with the given duty cycle (0 to 1) on a pin.
    fn set_duty_cycle(&mut self, pin: Pin, freq_hz: f64, duty: f64) -> Result<(), HardwareError>;

    fn write_digital(&mut self, pin: Pin, high: bool) -> Result<(), HardwareError>;

    /// Stop driving a pin, leaving a servo limp.
    fn release(&mut self, pin: Pin) -> Result<(), HardwareError>;
}

/// Discovers and opens input devices.
pub trait InputBackend {
    type Device: InputDevice;

    fn enumerate(&mut self) -> Vec<DeviceInfo>;

    fn open(&mut self, path: &Path) -> Result<Self::Device, HardwareError>;
}

/// An open input device.
pub trait InputDevice {
    fn name(&self) -> &str;

    fn path(&self) -> &Path;

    /// Take exclusive access to the device.
    fn grab(&mut self) -> Result<(), HardwareError>;

    /// Returns false once the device node has gone away.
    fn path_exists(&self) -> bool;

    /// Raw bounds of an absolute axis, `None` if the device does not have it.
    fn axis_range(&self, code: u16) -> Option<AxisCalibration>;

    /// Current raw value of an absolute axis, `None` if it could not be read.
    fn read_axis(&mut self, code: u16) -> Option<i32>;

    /// Next pending event, without blocking.
    fn poll_event(&mut self) -> Result<Option<InputEvent>, HardwareError>;
}
