//! Implementation of the connection supervisor

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

use log::{debug, info, warn};
use std::{
    sync::atomic::{AtomicBool, Ordering},
    thread,
    time::Instant,
};

use super::{ConnSupError, LinkLoss, Params};
use crate::hw::{DeviceInfo, InputBackend, InputDevice};
use util::time::{secs_between, secs_to_duration};

// ---------------------------------------------------------------------------
// DATA STRUCTURES
// ---------------------------------------------------------------------------

/// Discovers and acquires the gamepad.
pub struct ConnSup<B: InputBackend> {
    params: Params,

    backend: B,
}

/// Counts consecutive missing axis reads.
#[derive(Debug, Clone)]
pub struct StaleReadCounter {
    missing: u32,

    max: u32,
}

// ---------------------------------------------------------------------------
// IMPLEMENTATIONS
// ---------------------------------------------------------------------------

impl<B: InputBackend> ConnSup<B> {
    pub fn new(params: Params, backend: B) -> Self {
        Self { params, backend }
    }

    pub fn params(&self) -> &Params {
        &self.params
    }

    /// Pick the device to connect to. Only devices with keys are considered, an exact name match
    /// is preferred over a fallback substring match.
    pub fn find_candidate(&mut self) -> Option<DeviceInfo> {
        let devices: Vec<DeviceInfo> = self
            .backend
            .enumerate()
            .into_iter()
            .filter(|d| d.has_keys)
            .collect();

        let exact = devices
            .iter()
            .find(|d| !self.params.device_name.is_empty() && d.name == self.params.device_name);

        let fallback = || {
            devices.iter().find(|d| {
                !self.params.fallback_name.is_empty() && d.name.contains(&self.params.fallback_name)
            })
        };

        exact.or_else(fallback).cloned()
    }

    /// Make one attempt to open and grab the gamepad.
    pub fn try_acquire(&mut self) -> Option<B::Device> {
        let info = self.find_candidate()?;

        let mut dev = match self.backend.open(&info.path) {
            Ok(d) => d,
            Err(e) => {
                warn!("Could not open {:?}: {}", info.path, e);
                return None;
            }
        };

        if let Err(e) = dev.grab() {
            warn!("Could not grab {}: {}", info.name, e);
            return None;
        }

        info!("Gamepad connected: {} ({:?})", info.name, info.path);
        Some(dev)
    }

    /// Search for the gamepad until it is found, `stop` is set, or `timeout_s` elapses.
    ///
    /// Returns `Ok(None)` if stopped.
    pub fn acquire(
        &mut self,
        stop: &AtomicBool,
        timeout_s: f64,
    ) -> Result<Option<B::Device>, ConnSupError> {
        let start = Instant::now();
        debug!("Searching for gamepad \"{}\"", self.params.device_name);

        loop {
            if stop.load(Ordering::Relaxed) {
                return Ok(None);
            }

            if let Some(dev) = self.try_acquire() {
                return Ok(Some(dev));
            }

            let waited = secs_between(start, Instant::now());
            if waited >= timeout_s {
                return Err(ConnSupError::DeviceNotFound(
                    self.params.device_name.clone(),
                    waited,
                ));
            }

            thread::sleep(secs_to_duration(self.params.rescan_interval_s));
        }
    }

    /// Acquire the gamepad at start up.
    pub fn first_connect(&mut self, stop: &AtomicBool) -> Result<Option<B::Device>, ConnSupError> {
        let timeout = self.params.wait_for_device_s;
        self.acquire(stop, timeout)
    }

    /// Wait out the cooldown then acquire the gamepad again.
    pub fn reconnect(&mut self, stop: &AtomicBool) -> Result<Option<B::Device>, ConnSupError> {
        thread::sleep(secs_to_duration(self.params.reconnect_cooldown_s));

        let timeout = self.params.reconnect_timeout_s;
        self.acquire(stop, timeout)
    }
}

impl StaleReadCounter {
    pub fn new(max: u32) -> Self {
        Self { missing: 0, max }
    }

    /// Record the outcome of one read.
    pub fn record<T>(&mut self, read: &Option<T>) -> Result<(), LinkLoss> {
        match read {
            Some(_) => self.missing = 0,
            None => {
                self.missing += 1;
                if self.missing >= self.max {
                    return Err(LinkLoss::StaleAxisRead(self.missing));
                }
            }
        }

        Ok(())
    }

    pub fn missing(&self) -> u32 {
        self.missing
    }

    pub fn reset(&mut self) {
        self.missing = 0;
    }
}

// ---------------------------------------------------------------------------
// TESTS
// ---------------------------------------------------------------------------

#[cfg(test)]
mod test {
    use super::*;
    use crate::hw::sim::SimInputBackend;

    fn fast_params() -> Params {
        Params {
            rescan_interval_s: 0.01,
            wait_for_device_s: 0.05,
            reconnect_cooldown_s: 0.0,
            ..Default::default()
        }
    }

    #[test]
    fn test_candidate_preference() {
        let backend = SimInputBackend::new();
        backend.add_gamepad("8BitDo Keyboard Thing", false);
        backend.add_gamepad("8BitDo Pro 2", true);
        let exact = backend.add_gamepad("8BitDo Ultimate C 2.4G Wireless Controller", true);

        let mut sup = ConnSup::new(fast_params(), backend.clone());
        assert_eq!(
            sup.find_candidate().map(|d| d.name),
            Some("8BitDo Ultimate C 2.4G Wireless Controller".to_string())
        );

        // Without the exact match the fallback substring is used, but never a keyless device
        exact.unplug();
        assert_eq!(
            sup.find_candidate().map(|d| d.name),
            Some("8BitDo Pro 2".to_string())
        );
    }

    #[test]
    fn test_acquire_grabs() {
        let backend = SimInputBackend::new();
        let pad = backend.add_gamepad("8BitDo Ultimate C 2.4G Wireless Controller", true);
        let mut sup = ConnSup::new(fast_params(), backend);

        let stop = AtomicBool::new(false);
        let dev = sup.first_connect(&stop).unwrap();
        assert!(dev.is_some());
        assert!(pad.is_grabbed());
    }

    #[test]
    fn test_first_connect_timeout_and_stop() {
        let backend = SimInputBackend::new();
        backend.add_gamepad("Some Keyboard", true);
        let mut sup = ConnSup::new(fast_params(), backend);

        let stop = AtomicBool::new(false);
        assert!(matches!(
            sup.first_connect(&stop),
            Err(ConnSupError::DeviceNotFound(_, _))
        ));
    }

    #[test]
    fn test_reconnect_timeout_and_stop() {
        let backend = SimInputBackend::new();
        let pad = backend.add_gamepad("8BitDo Ultimate C 2.4G Wireless Controller", true);
        let mut sup = ConnSup::new(
            Params {
                reconnect_timeout_s: 0.05,
                ..fast_params()
            },
            backend,
        );

        let stop = AtomicBool::new(false);
        let dev = sup.first_connect(&stop).unwrap();
        assert!(dev.is_some());
        drop(dev);

        // Gamepad never comes back, giving up is fatal
        pad.unplug();
        assert!(matches!(
            sup.reconnect(&stop),
            Err(ConnSupError::DeviceNotFound(_, _))
        ));

        stop.store(true, Ordering::Relaxed);
        assert!(matches!(sup.reconnect(&stop), Ok(None)));
    }

    #[test]
    fn test_stale_read_counter() {
        let mut counter = StaleReadCounter::new(25);

        for _ in 0..24 {
            assert!(counter.record::<i32>(&None).is_ok());
        }
        counter.record(&Some(3)).unwrap();
        assert_eq!(counter.missing(), 0);

        for _ in 0..24 {
            assert!(counter.record::<i32>(&None).is_ok());
        }
        assert_eq!(
            counter.record::<i32>(&None),
            Err(LinkLoss::StaleAxisRead(25))
        );
    }
}
