//! # Raspberry Pi actuator driver
//!
//! Servo pulses are generated with software PWM on any GPIO pin. Duty cycle outputs use the
//! hardware PWM peripheral when the pin is routed to one of its channels (BCM 12, 13, 18, 19),
//! otherwise they fall back to software PWM.

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use log::{debug, warn};
use rppal::{
    gpio::{Gpio, OutputPin},
    pwm::{Channel, Polarity, Pwm},
};
use std::{
    collections::{HashMap, HashSet},
    time::Duration,
};

use super::{ActuatorDriver, HardwareError, Pin};

// ------------------------------------------------------------------------------------------------
// CONSTANTS
// ------------------------------------------------------------------------------------------------

/// Servo frame period.
const SERVO_PERIOD: Duration = Duration::from_millis(20);

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

pub struct RpiDriver {
    gpio: Gpio,

    outputs: HashMap<Pin, OutputPin>,

    pwms: HashMap<Pin, Pwm>,

    /// Pins whose hardware PWM channel could not be opened.
    soft_pwm_pins: HashSet<Pin>,
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl RpiDriver {
    pub fn new() -> Result<Self, HardwareError> {
        let gpio = Gpio::new().map_err(|e| HardwareError::PinUnavailable(0, e.to_string()))?;

        Ok(Self {
            gpio,
            outputs: HashMap::new(),
            pwms: HashMap::new(),
            soft_pwm_pins: HashSet::new(),
        })
    }

    fn output(&mut self, pin: Pin) -> Result<&mut OutputPin, HardwareError> {
        if !self.outputs.contains_key(&pin) {
            let out = self
                .gpio
                .get(pin)
                .map_err(|e| HardwareError::PinUnavailable(pin, e.to_string()))?
                .into_output();
            self.outputs.insert(pin, out);
        }

        self.outputs
            .get_mut(&pin)
            .ok_or_else(|| HardwareError::PinUnavailable(pin, "output not registered".into()))
    }

    /// Hardware PWM channel routed to the pin, if any.
    fn pwm_channel(pin: Pin) -> Option<Channel> {
        match pin {
            12 | 18 => Some(Channel::Pwm0),
            13 | 19 => Some(Channel::Pwm1),
            _ => None,
        }
    }

    fn set_hw_duty(
        &mut self,
        pin: Pin,
        channel: Channel,
        freq_hz: f64,
        duty: f64,
    ) -> Result<(), HardwareError> {
        if let Some(pwm) = self.pwms.get(&pin) {
            return pwm
                .set_frequency(freq_hz, duty)
                .map_err(|e| HardwareError::WriteFailed(pin, e.to_string()));
        }

        let pwm = Pwm::with_frequency(channel, freq_hz, duty, Polarity::Normal, true)
            .map_err(|e| HardwareError::PinUnavailable(pin, e.to_string()))?;
        debug!("Hardware PWM enabled on pin {} at {} Hz", pin, freq_hz);
        self.pwms.insert(pin, pwm);

        Ok(())
    }
}

impl ActuatorDriver for RpiDriver {
    fn set_pulse_width_us(&mut self, pin: Pin, us: f64) -> Result<(), HardwareError> {
        let pulse = Duration::from_secs_f64(us.max(0.0) / 1e6);

        self.output(pin)?
            .set_pwm(SERVO_PERIOD, pulse)
            .map_err(|e| HardwareError::WriteFailed(pin, e.to_string()))
    }

    fn set_duty_cycle(&mut self, pin: Pin, freq_hz: f64, duty: f64) -> Result<(), HardwareError> {
        let duty = duty.max(0.0).min(1.0);

        if let Some(channel) = Self::pwm_channel(pin) {
            if !self.soft_pwm_pins.contains(&pin) {
                match self.set_hw_duty(pin, channel, freq_hz, duty) {
                    Ok(()) => return Ok(()),
                    // PWM overlay not loaded
                    Err(HardwareError::PinUnavailable(_, e)) => {
                        warn!(
                            "Hardware PWM unavailable on pin {} ({}), using software PWM",
                            pin, e
                        );
                        self.soft_pwm_pins.insert(pin);
                    }
                    Err(e) => return Err(e),
                }
            }
        }

        self.output(pin)?
            .set_pwm_frequency(freq_hz, duty)
            .map_err(|e| HardwareError::WriteFailed(pin, e.to_string()))
    }

    fn write_digital(&mut self, pin: Pin, high: bool) -> Result<(), HardwareError> {
        let out = self.output(pin)?;

        if high {
            out.set_high();
        } else {
            out.set_low();
        }

        Ok(())
    }

    fn release(&mut self, pin: Pin) -> Result<(), HardwareError> {
        if let Some(pwm) = self.pwms.remove(&pin) {
            pwm.disable()
                .map_err(|e| HardwareError::WriteFailed(pin, e.to_string()))?;
        }

        if let Some(mut out) = self.outputs.remove(&pin) {
            out.clear_pwm()
                .map_err(|e| HardwareError::WriteFailed(pin, e.to_string()))?;
            out.set_low();
        }

        Ok(())
    }
}
