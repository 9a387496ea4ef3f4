//! Motor output emission
//!
//! Direction changes are made with the channel's duty at zero, after the dead time has elapsed,
//! so that the driver's bridge is never switched under load.

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

use log::trace;
use std::time::Duration;

use super::{MotorChannel, MIN_SPEED};
use crate::hw::{ActuatorDriver, HardwareError};
use util::time::secs_to_duration;

// ---------------------------------------------------------------------------
// DATA STRUCTURES
// ---------------------------------------------------------------------------

/// Drives a set of motor channels in lock-step.
pub struct MotorOutput {
    channels: Vec<MotorChannel>,

    /// Direction level last written to each channel, `None` while stopped.
    last_dir: Vec<Option<bool>>,

    freq_hz: f64,

    dead_time: Duration,
}

// ---------------------------------------------------------------------------
// IMPLEMENTATIONS
// ---------------------------------------------------------------------------

impl MotorOutput {
    pub fn new(channels: Vec<MotorChannel>, freq_hz: f64, dead_time_s: f64) -> Self {
        let last_dir = vec![None; channels.len()];

        Self {
            channels,
            last_dir,
            freq_hz,
            dead_time: secs_to_duration(dead_time_s),
        }
    }

    pub fn channels(&self) -> &[MotorChannel] {
        &self.channels
    }

    /// Direction level last written to each channel.
    pub fn last_dir(&self) -> &[Option<bool>] {
        &self.last_dir
    }

    /// Emit a speed to every channel.
    ///
    /// `sleep` is called at most once, for the dead time, when at least one channel reverses.
    ///
    /// Every channel is written even if an earlier one fails, and the first failure is returned.
    /// A channel whose duty could not be zeroed keeps its direction.
    pub fn emit<D, S>(&mut self, driver: &mut D, speed: f64, mut sleep: S) -> Result<(), HardwareError>
    where
        D: ActuatorDriver + ?Sized,
        S: FnMut(Duration),
    {
        let mut first_err = None;
        let mut note = |res: Result<(), HardwareError>| match res {
            Ok(()) => true,
            Err(e) => {
                first_err.get_or_insert(e);
                false
            }
        };

        if speed.abs() < MIN_SPEED {
            for (ch, dir) in self.channels.iter().zip(self.last_dir.iter_mut()) {
                if note(driver.set_duty_cycle(ch.pwm_pin, self.freq_hz, 0.0)) {
                    *dir = None;
                }
            }
            return first_err.map_or(Ok(()), Err);
        }

        let forward = speed > 0.0;
        let levels: Vec<bool> = self
            .channels
            .iter()
            .map(|ch| forward == ch.forward_is_high)
            .collect();

        // Stop every channel that is about to reverse, then wait once for all of them
        let mut reversing = false;
        let mut stalled = vec![false; self.channels.len()];
        for (i, ch) in self.channels.iter().enumerate() {
            if matches!(self.last_dir[i], Some(d) if d != levels[i]) {
                if note(driver.set_duty_cycle(ch.pwm_pin, self.freq_hz, 0.0)) {
                    reversing = true;
                } else {
                    stalled[i] = true;
                }
            }
        }
        if reversing {
            trace!("Motor reversing, waiting {:?}", self.dead_time);
            sleep(self.dead_time);
        }

        let duty = speed.abs().min(1.0);
        for (i, ch) in self.channels.iter().enumerate() {
            if stalled[i] {
                continue;
            }
            if self.last_dir[i] != Some(levels[i]) {
                if !note(driver.write_digital(ch.dir_pin, levels[i])) {
                    continue;
                }
                self.last_dir[i] = Some(levels[i]);
            }
            note(driver.set_duty_cycle(ch.pwm_pin, self.freq_hz, duty));
        }

        first_err.map_or(Ok(()), Err)
    }

    /// Forget the direction state, so the next emission rewrites every direction pin.
    pub fn reset(&mut self) {
        self.last_dir.iter_mut().for_each(|d| *d = None);
    }
}

// ---------------------------------------------------------------------------
// TESTS
// ---------------------------------------------------------------------------

#[cfg(test)]
mod test {
    use super::*;
    use crate::hw::sim::{DriverCall, SimDriver};

    fn two_channels() -> Vec<MotorChannel> {
        vec![
            MotorChannel {
                pwm_pin: 18,
                dir_pin: 27,
                forward_is_high: true,
            },
            MotorChannel {
                pwm_pin: 19,
                dir_pin: 22,
                forward_is_high: false,
            },
        ]
    }

    #[test]
    fn test_reversal_dead_time() {
        let sim = SimDriver::new();
        let mut driver = sim.clone();
        let mut out = MotorOutput::new(two_channels(), 20_000.0, 0.005);
        let mut sleeps = Vec::new();

        out.emit(&mut driver, 0.4, |d| sleeps.push(d)).unwrap();
        assert!(sleeps.is_empty());
        assert_eq!(sim.level(27), Some(true));
        assert_eq!(sim.level(22), Some(false));
        assert_eq!(sim.last_duty(18), Some(0.4));
        assert_eq!(sim.last_duty(19), Some(0.4));

        sim.clear_calls();
        out.emit(&mut driver, -0.3, |d| sleeps.push(d)).unwrap();
        assert_eq!(sleeps, vec![Duration::from_millis(5)]);

        // Both duties zeroed before either direction pin changes
        let calls = sim.calls();
        assert_eq!(calls[0], DriverCall::Duty(18, 20_000.0, 0.0));
        assert_eq!(calls[1], DriverCall::Duty(19, 20_000.0, 0.0));
        assert_eq!(calls[2], DriverCall::Digital(27, false));
        assert_eq!(sim.level(22), Some(true));
        assert_eq!(sim.last_duty(18), Some(0.3));
    }

    #[test]
    fn test_stop_clears_direction() {
        let sim = SimDriver::new();
        let mut driver = sim.clone();
        let mut out = MotorOutput::new(two_channels(), 20_000.0, 0.005);
        let mut sleeps = 0;

        out.emit(&mut driver, 0.5, |_| sleeps += 1).unwrap();
        out.emit(&mut driver, 0.0005, |_| sleeps += 1).unwrap();
        assert_eq!(out.last_dir(), &[None, None]);
        assert_eq!(sim.last_duty(18), Some(0.0));

        // Starting in reverse from a stop needs no dead time
        out.emit(&mut driver, -0.5, |_| sleeps += 1).unwrap();
        assert_eq!(sleeps, 0);
        assert_eq!(sim.level(27), Some(false));
    }

    #[test]
    fn test_stop_reaches_every_channel() {
        let sim = SimDriver::new();
        let mut driver = sim.clone();
        let mut out = MotorOutput::new(two_channels(), 20_000.0, 0.005);

        out.emit(&mut driver, 0.5, |_| ()).unwrap();
        sim.fail_pin(18);

        assert!(matches!(
            out.emit(&mut driver, 0.0, |_| ()),
            Err(HardwareError::WriteFailed(18, _))
        ));
        assert_eq!(sim.last_duty(19), Some(0.0));
        assert_eq!(out.last_dir(), &[Some(true), None]);
    }

    #[test]
    fn test_failed_channel_keeps_direction() {
        let sim = SimDriver::new();
        let mut driver = sim.clone();
        let mut out = MotorOutput::new(two_channels(), 20_000.0, 0.005);

        out.emit(&mut driver, 0.5, |_| ()).unwrap();
        sim.fail_pin(18);

        // The first channel cannot be stopped so its direction pin is left alone, the second
        // still reverses
        assert!(out.emit(&mut driver, -0.4, |_| ()).is_err());
        assert_eq!(sim.level(27), Some(true));
        assert_eq!(sim.level(22), Some(true));
        assert_eq!(sim.last_duty(19), Some(0.4));
        assert_eq!(out.last_dir(), &[Some(true), Some(true)]);
    }
}
