//! # Simulated hardware
//!
//! A recording actuator driver and scriptable gamepads. Handles share their state with the
//! objects given to the control loop, so a test can keep a handle, drive the inputs and inspect
//! the outputs while the loop runs.

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use std::{
    collections::{HashMap, HashSet, VecDeque},
    path::{Path, PathBuf},
    sync::{Arc, Mutex, MutexGuard, PoisonError},
};

use super::{
    ActuatorDriver, DeviceInfo, EventKind, HardwareError, InputBackend, InputDevice, InputEvent,
    Pin,
};
use crate::axis_shaper::AxisCalibration;

// ------------------------------------------------------------------------------------------------
// CONSTANTS
// ------------------------------------------------------------------------------------------------

/// Number of driver calls kept by the [`SimDriver`], older calls are dropped.
pub const MAX_RECORDED_CALLS: usize = 10_000;

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

/// Actuator driver which records every call.
#[derive(Clone, Default)]
pub struct SimDriver {
    inner: Arc<Mutex<SimDriverState>>,
}

#[derive(Default)]
struct SimDriverState {
    calls: VecDeque<DriverCall>,
    pulses: HashMap<Pin, f64>,
    duties: HashMap<Pin, f64>,
    levels: HashMap<Pin, bool>,
    released: HashSet<Pin>,
    fail_pins: HashSet<Pin>,
}

/// Input backend over a shared set of simulated gamepads.
#[derive(Clone, Default)]
pub struct SimInputBackend {
    world: Arc<Mutex<SimWorld>>,
}

/// Test-side handle to one simulated gamepad.
#[derive(Clone)]
pub struct SimGamepad {
    world: Arc<Mutex<SimWorld>>,
    index: usize,
}

/// Simulated gamepad as opened by the backend.
pub struct SimDevice {
    world: Arc<Mutex<SimWorld>>,
    index: usize,
    name: String,
    path: PathBuf,
}

#[derive(Default)]
struct SimWorld {
    devices: Vec<SimDeviceState>,
}

struct SimDeviceState {
    path: PathBuf,
    name: String,
    has_keys: bool,
    present: bool,
    grabbed: bool,
    ranges: HashMap<u16, AxisCalibration>,
    values: HashMap<u16, i32>,
    events: VecDeque<Result<InputEvent, String>>,
}

// ------------------------------------------------------------------------------------------------
// ENUMS
// ------------------------------------------------------------------------------------------------

/// A call made on the [`SimDriver`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum DriverCall {
    Pulse(Pin, f64),
    Duty(Pin, f64, f64),
    Digital(Pin, bool),
    Release(Pin),
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl SimDriver {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<SimDriverState> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Make every subsequent write to `pin` fail.
    pub fn fail_pin(&self, pin: Pin) {
        self.lock().fail_pins.insert(pin);
    }

    pub fn calls(&self) -> Vec<DriverCall> {
        self.lock().calls.iter().copied().collect()
    }

    pub fn clear_calls(&self) {
        self.lock().calls.clear();
    }

    pub fn last_pulse(&self, pin: Pin) -> Option<f64> {
        self.lock().pulses.get(&pin).copied()
    }

    pub fn last_duty(&self, pin: Pin) -> Option<f64> {
        self.lock().duties.get(&pin).copied()
    }

    pub fn level(&self, pin: Pin) -> Option<bool> {
        self.lock().levels.get(&pin).copied()
    }

    pub fn is_released(&self, pin: Pin) -> bool {
        self.lock().released.contains(&pin)
    }

    fn record(&self, pin: Pin, call: DriverCall) -> Result<(), HardwareError> {
        let mut state = self.lock();

        if state.fail_pins.contains(&pin) {
            return Err(HardwareError::WriteFailed(pin, "simulated failure".into()));
        }

        if state.calls.len() >= MAX_RECORDED_CALLS {
            state.calls.pop_front();
        }
        state.calls.push_back(call);
        match call {
            DriverCall::Pulse(p, us) => {
                state.pulses.insert(p, us);
                state.released.remove(&p);
            }
            DriverCall::Duty(p, _, duty) => {
                state.duties.insert(p, duty);
            }
            DriverCall::Digital(p, high) => {
                state.levels.insert(p, high);
            }
            DriverCall::Release(p) => {
                state.released.insert(p);
            }
        }

        Ok(())
    }
}

impl ActuatorDriver for SimDriver {
    fn set_pulse_width_us(&mut self, pin: Pin, us: f64) -> Result<(), HardwareError> {
        self.record(pin, DriverCall::Pulse(pin, us))
    }

    fn set_duty_cycle(&mut self, pin: Pin, freq_hz: f64, duty: f64) -> Result<(), HardwareError> {
        self.record(pin, DriverCall::Duty(pin, freq_hz, duty))
    }

    fn write_digital(&mut self, pin: Pin, high: bool) -> Result<(), HardwareError> {
        self.record(pin, DriverCall::Digital(pin, high))
    }

    fn release(&mut self, pin: Pin) -> Result<(), HardwareError> {
        self.record(pin, DriverCall::Release(pin))
    }
}

impl SimInputBackend {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<SimWorld> {
        self.world.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Add a gamepad to the simulated world. It starts plugged in with no axes.
    pub fn add_gamepad(&self, name: &str, has_keys: bool) -> SimGamepad {
        let mut world = self.lock();
        let index = world.devices.len();

        world.devices.push(SimDeviceState {
            path: PathBuf::from(format!("/dev/input/sim{}", index)),
            name: name.to_string(),
            has_keys,
            present: true,
            grabbed: false,
            ranges: HashMap::new(),
            values: HashMap::new(),
            events: VecDeque::new(),
        });

        SimGamepad {
            world: self.world.clone(),
            index,
        }
    }
}

impl InputBackend for SimInputBackend {
    type Device = SimDevice;

    fn enumerate(&mut self) -> Vec<DeviceInfo> {
        self.lock()
            .devices
            .iter()
            .filter(|d| d.present)
            .map(|d| DeviceInfo {
                path: d.path.clone(),
                name: d.name.clone(),
                has_keys: d.has_keys,
            })
            .collect()
    }

    fn open(&mut self, path: &Path) -> Result<Self::Device, HardwareError> {
        let world = self.lock();

        let (index, dev) = world
            .devices
            .iter()
            .enumerate()
            .find(|(_, d)| d.present && d.path == path)
            .ok_or_else(|| HardwareError::OpenFailed(path.to_path_buf(), "no such device".into()))?;

        Ok(SimDevice {
            world: self.world.clone(),
            index,
            name: dev.name.clone(),
            path: dev.path.clone(),
        })
    }
}

impl SimGamepad {
    fn with<R>(&self, f: impl FnOnce(&mut SimDeviceState) -> R) -> R {
        let mut world = self.world.lock().unwrap_or_else(PoisonError::into_inner);
        f(&mut world.devices[self.index])
    }

    /// Give the gamepad an absolute axis with the given bounds, resting at its midpoint.
    pub fn add_axis(&self, code: u16, lo: i32, hi: i32) {
        self.with(|d| {
            d.ranges.insert(code, AxisCalibration { lo, hi });
            d.values.insert(code, lo + (hi - lo) / 2);
        });
    }

    pub fn set_axis(&self, code: u16, value: i32) {
        self.with(|d| {
            d.values.insert(code, value);
        });
    }

    /// Make reads of the axis fail until it is set again.
    pub fn clear_axis(&self, code: u16) {
        self.with(|d| {
            d.values.remove(&code);
        });
    }

    pub fn push_event(&self, kind: EventKind, code: u16, value: i32) {
        self.with(|d| d.events.push_back(Ok(InputEvent { kind, code, value })));
    }

    /// Queue an event read failure.
    pub fn push_read_error(&self) {
        self.with(|d| d.events.push_back(Err("simulated read failure".into())));
    }

    /// Remove the device node. The device disappears from enumeration and open handles see the
    /// path vanish.
    pub fn unplug(&self) {
        self.with(|d| {
            d.present = false;
            d.grabbed = false;
            d.events.clear();
        });
    }

    pub fn plug(&self) {
        self.with(|d| d.present = true);
    }

    pub fn is_grabbed(&self) -> bool {
        self.with(|d| d.grabbed)
    }
}

impl SimDevice {
    fn with<R>(&self, f: impl FnOnce(&mut SimDeviceState) -> R) -> R {
        let mut world = self.world.lock().unwrap_or_else(PoisonError::into_inner);
        f(&mut world.devices[self.index])
    }
}

impl InputDevice for SimDevice {
    fn name(&self) -> &str {
        &self.name
    }

    fn path(&self) -> &Path {
        &self.path
    }

    fn grab(&mut self) -> Result<(), HardwareError> {
        self.with(|d| {
            if d.present {
                d.grabbed = true;
                Ok(())
            } else {
                Err(HardwareError::GrabFailed("device not present".into()))
            }
        })
    }

    fn path_exists(&self) -> bool {
        self.with(|d| d.present)
    }

    fn axis_range(&self, code: u16) -> Option<AxisCalibration> {
        self.with(|d| d.ranges.get(&code).copied())
    }

    fn read_axis(&mut self, code: u16) -> Option<i32> {
        self.with(|d| match d.present {
            true => d.values.get(&code).copied(),
            false => None,
        })
    }

    fn poll_event(&mut self) -> Result<Option<InputEvent>, HardwareError> {
        self.with(|d| match d.events.pop_front() {
            Some(Ok(ev)) => Ok(Some(ev)),
            Some(Err(e)) => Err(HardwareError::ReadFailed(e)),
            None => Ok(None),
        })
    }
}

// ------------------------------------------------------------------------------------------------
// TESTS
// ------------------------------------------------------------------------------------------------

#[cfg(test)]
mod test {
    use super::*;
    use crate::hw::codes;

    #[test]
    fn test_sim_driver_records() {
        let sim = SimDriver::new();
        let mut driver = sim.clone();

        driver.set_pulse_width_us(17, 1500.0).unwrap();
        driver.write_digital(27, true).unwrap();
        driver.set_duty_cycle(18, 20_000.0, 0.4).unwrap();
        driver.release(17).unwrap();

        assert_eq!(sim.last_pulse(17), Some(1500.0));
        assert_eq!(sim.level(27), Some(true));
        assert_eq!(sim.last_duty(18), Some(0.4));
        assert!(sim.is_released(17));
        assert_eq!(sim.calls().len(), 4);

        sim.fail_pin(18);
        assert!(driver.set_duty_cycle(18, 20_000.0, 0.0).is_err());
        assert_eq!(sim.calls().len(), 4);
    }

    #[test]
    fn test_sim_gamepad() {
        let mut backend = SimInputBackend::new();
        let pad = backend.add_gamepad("Test Pad", true);
        pad.add_axis(codes::ABS_Z, 0, 255);

        let infos = backend.enumerate();
        assert_eq!(infos.len(), 1);
        assert_eq!(infos[0].name, "Test Pad");

        let mut dev = backend.open(&infos[0].path).unwrap();
        dev.grab().unwrap();
        assert!(pad.is_grabbed());
        assert_eq!(dev.read_axis(codes::ABS_Z), Some(127));
        assert_eq!(dev.read_axis(codes::ABS_Y), None);

        pad.push_event(EventKind::Absolute, codes::ABS_HAT0X, 1);
        pad.push_read_error();
        assert_eq!(
            dev.poll_event().unwrap(),
            Some(InputEvent {
                kind: EventKind::Absolute,
                code: codes::ABS_HAT0X,
                value: 1
            })
        );
        assert!(dev.poll_event().is_err());
        assert_eq!(dev.poll_event().unwrap(), None);

        pad.unplug();
        assert!(!dev.path_exists());
        assert_eq!(dev.read_axis(codes::ABS_Z), None);
        assert!(backend.enumerate().is_empty());
    }
}
