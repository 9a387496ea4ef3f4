//! # Control loop
//!
//! The control loop is the only user of the actuator driver. Each tick it:
//!
//! - Checks the gamepad link
//! - Takes one snapshot of the shared override state
//! - Drains the gamepad's pending events (head latch commands, button presses)
//! - Reads the steering and throttle axes
//! - Runs steering, drive and head control
//! - Emits the resulting pulses and duty cycles
//! - Publishes its status for the override channel
//!
//! On link loss every actuator is neutralised, the disconnect hook is fired once, and the
//! supervisor searches for the gamepad again.

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use comms_if::ctrl::{ArmedStatus, ConnectionStatus, OutputStatus};
use log::{debug, info, trace, warn};
use std::{
    collections::HashSet,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    thread,
    time::Instant,
};
use thiserror::Error;

use crate::{
    axis_shaper::AxisCalibration,
    buttons::{self, KEY_PRESSED},
    calib::ServoParams,
    conn_sup::{ConnSup, ConnSupError, LinkLoss, StaleReadCounter},
    ctrl_state::SharedControlState,
    drv_ctrl::{self, DrvCtrl, MotorDemand, MotorOutput},
    head_ctrl::{self, HeadCmd, HeadCtrl},
    hook::{CommandHook, ShellHook},
    hw::{ActuatorDriver, EventKind, HardwareError, InputBackend, InputDevice},
    params::TrikeExecParams,
    str_ctrl::{self, StrCtrl},
};
use util::{
    maths::clamp,
    module::State,
    time::{secs_between, secs_to_duration},
};

// ------------------------------------------------------------------------------------------------
// CONSTANTS
// ------------------------------------------------------------------------------------------------

/// Bounds on the measured tick interval.
///
/// Units: seconds
pub const DT_MIN_S: f64 = 0.001;
pub const DT_MAX_S: f64 = 0.05;

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

pub struct ControlLoop<D: ActuatorDriver> {
    driver: D,

    shared: Arc<SharedControlState>,

    hook: Box<dyn CommandHook>,

    /// Runs the commands assigned to buttons.
    button_hook: Box<dyn CommandHook>,

    servo: ServoParams,

    str_ctrl: StrCtrl,

    head_ctrl: HeadCtrl,

    drv_ctrl: DrvCtrl,

    motor_out: MotorOutput,

    /// Axis bounds of the connected gamepad, `None` while disconnected.
    axes: Option<ConnectedAxes>,

    stale: StaleReadCounter,

    last_tick: Option<Instant>,

    tick_period_s: f64,

    status_log_period_s: f64,

    last_status_log: Option<Instant>,

    /// Actuators whose last hardware write failed.
    faulted: HashSet<&'static str>,
}

/// Bounds of the axes the connected gamepad provides.
#[derive(Debug, Clone, Copy)]
struct ConnectedAxes {
    steering: AxisCalibration,
    throttle: Option<AxisCalibration>,
    gas: Option<AxisCalibration>,
    brake: Option<AxisCalibration>,
}

/// Outputs of one tick.
#[derive(Debug, Clone, Copy)]
pub struct TickOutput {
    pub steering: str_ctrl::OutputData,
    pub motor: drv_ctrl::OutputData,
    pub head: head_ctrl::OutputData,
}

// ------------------------------------------------------------------------------------------------
// ENUMS
// ------------------------------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum LoopError {
    #[error("Gamepad {0} has no steering axis (code {1:#x})")]
    MissingSteeringAxis(String, u16),

    #[error(transparent)]
    ConnSup(#[from] ConnSupError),
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl<D: ActuatorDriver> ControlLoop<D> {
    pub fn new(
        params: &TrikeExecParams,
        driver: D,
        shared: Arc<SharedControlState>,
        hook: Box<dyn CommandHook>,
        now: Instant,
    ) -> Self {
        let drv = &params.drv_ctrl;

        Self {
            driver,
            shared,
            hook,
            button_hook: Box::new(ShellHook::new("button")),
            servo: params.servo,
            str_ctrl: StrCtrl::new(params.str_ctrl.clone(), params.servo, now),
            head_ctrl: HeadCtrl::new(params.head_ctrl.clone(), params.servo, now),
            drv_ctrl: DrvCtrl::new(drv.clone(), now),
            motor_out: MotorOutput::new(drv.channels.clone(), drv.pwm_freq_hz, drv.dead_time_s),
            axes: None,
            stale: StaleReadCounter::new(params.conn_sup.max_missing_reads),
            last_tick: None,
            tick_period_s: params.tick_period_s,
            status_log_period_s: params.status_log_period_s,
            last_status_log: None,
            faulted: HashSet::new(),
        }
    }

    /// Replace the hook which runs button commands.
    pub fn with_button_hook(mut self, hook: Box<dyn CommandHook>) -> Self {
        self.button_hook = hook;
        self
    }

    pub fn driver(&self) -> &D {
        &self.driver
    }

    pub fn is_connected(&self) -> bool {
        self.axes.is_some()
    }

    /// Start controlling a newly acquired gamepad.
    ///
    /// All controllers restart their safe-start windows from `now`.
    pub fn on_connect<I: InputDevice>(&mut self, dev: &I, now: Instant) -> Result<(), LoopError> {
        let str_code = self.str_ctrl.params().axis_code;
        let drv = self.drv_ctrl.params();

        let steering = dev
            .axis_range(str_code)
            .ok_or_else(|| LoopError::MissingSteeringAxis(dev.name().to_string(), str_code))?;

        let axes = ConnectedAxes {
            steering,
            throttle: dev.axis_range(drv.throttle_axis_code),
            gas: dev.axis_range(drv.gas_axis_code),
            brake: dev.axis_range(drv.brake_axis_code),
        };
        debug!("Gamepad axes: {:?}", axes);

        self.reset_controllers(now);
        self.motor_out.reset();
        self.stale.reset();
        self.last_tick = None;
        self.axes = Some(axes);

        let name = dev.name().to_string();
        self.shared.with_status(|s| {
            s.connection = ConnectionStatus::Connected { device: name };
            s.armed = ArmedStatus::default();
        });

        Ok(())
    }

    /// Run one control cycle.
    ///
    /// Returns the reason if the gamepad link has been lost, in which case nothing has been
    /// emitted and [`ControlLoop::on_disconnect`] should be called.
    pub fn tick<I: InputDevice>(&mut self, dev: &mut I, now: Instant) -> Result<TickOutput, LinkLoss> {
        let dt = match self.last_tick {
            Some(last) => clamp(&secs_between(last, now), &DT_MIN_S, &DT_MAX_S),
            None => clamp(&self.tick_period_s, &DT_MIN_S, &DT_MAX_S),
        };
        self.last_tick = Some(now);

        // ---- LINK CHECK ----
        if !dev.path_exists() {
            return Err(LinkLoss::PathVanished);
        }

        let snap = self.shared.snapshot();

        // ---- INPUT ACQUISITION ----
        let head_params = self.head_ctrl.params();
        let (hat_x, hat_y) = (head_params.hat_x_code, head_params.hat_y_code);
        let mut head_cmd = None;

        loop {
            match dev.poll_event() {
                Ok(Some(ev)) if ev.kind == EventKind::Absolute => {
                    if let Some(cmd) = HeadCmd::from_hat(hat_x, hat_y, ev.code, ev.value) {
                        head_cmd = Some(cmd);
                    }
                }
                Ok(Some(ev)) if ev.kind == EventKind::Key && ev.value == KEY_PRESSED => {
                    self.button_pressed(ev.code)
                }
                Ok(Some(_)) => (),
                Ok(None) => break,
                Err(e) => return Err(LinkLoss::ReadError(e.to_string())),
            }
        }

        let axes = match self.axes {
            Some(a) => a,
            None => return Err(LinkLoss::PathVanished),
        };

        let raw_steering = dev.read_axis(self.str_ctrl.params().axis_code);
        self.stale.record(&raw_steering)?;
        let steering_axis = raw_steering.map(|r| axes.steering.normalize_centered(r));

        let drv = self.drv_ctrl.params();
        let (throttle_code, gas_code, brake_code) =
            (drv.throttle_axis_code, drv.gas_axis_code, drv.brake_axis_code);
        let mut read = |cal: Option<AxisCalibration>, code: u16, trigger: bool| {
            let cal = cal?;
            let raw = dev.read_axis(code)?;
            Some(match trigger {
                true => cal.normalize_trigger(raw),
                false => cal.normalize_centered(raw),
            })
        };
        let demand = MotorDemand {
            throttle: read(axes.throttle, throttle_code, false),
            gas: read(axes.gas, gas_code, true),
            brake: read(axes.brake, brake_code, true),
        };

        let over = |v: f64| if snap.active { Some(v) } else { None };

        // ---- CONTROL PROCESSING ----
        let str_input = str_ctrl::InputData {
            now,
            dt,
            axis: steering_axis,
            override_demand: over(snap.steering),
            angles: snap.steering_angles,
            pulses: snap.steering_pulses,
        };
        let steering = match self.str_ctrl.proc(&str_input) {
            Ok((o, _)) => o,
            Err(e) => {
                warn!("Error during StrCtrl processing: {}", e);
                self.neutral_steering(&str_input)
            }
        };

        let drv_input = drv_ctrl::InputData {
            now,
            dt,
            demand: Some(demand),
            override_demand: over(snap.motor),
            limits: snap.motor_limits,
        };
        let motor = match self.drv_ctrl.proc(&drv_input) {
            Ok((o, _)) => o,
            Err(e) => {
                warn!("Error during DrvCtrl processing: {}", e);
                drv_ctrl::OutputData {
                    speed: 0.0,
                    target: 0.0,
                    demand: 0.0,
                }
            }
        };

        let head_input = head_ctrl::InputData {
            now,
            dt,
            cmd: head_cmd,
            override_demand: over(snap.head),
        };
        let head = match self.head_ctrl.proc(&head_input) {
            Ok((o, _)) => o,
            Err(e) => {
                warn!("Error during HeadCtrl processing: {}", e);
                head_ctrl::OutputData {
                    pos_deg: self.head_ctrl.pos_deg(),
                    target_deg: self.head_ctrl.target_deg(),
                    pulse_us: None,
                }
            }
        };

        // ---- OUTPUT ----
        let res = self
            .driver
            .set_pulse_width_us(self.str_ctrl.params().pin, steering.pulse_us);
        self.check_hw("steering", res);

        let res = self.motor_out.emit(&mut self.driver, motor.speed, thread::sleep);
        self.check_hw("motor", res);

        if let Some(us) = head.pulse_us {
            let res = self.driver.set_pulse_width_us(self.head_ctrl.params().pin, us);
            self.check_hw("head", res);
        }

        // ---- STATUS ----
        let armed = ArmedStatus {
            steering: self.str_ctrl.is_armed(),
            motor: self.drv_ctrl.is_armed(),
        };
        self.shared.with_status(|s| {
            s.armed = armed;
            s.outputs = OutputStatus {
                steering_deg: steering.pos_deg,
                motor_speed: motor.speed,
                head_deg: head.pos_deg,
            };
        });

        let log_due = self
            .last_status_log
            .map(|t| secs_between(t, now) >= self.status_log_period_s)
            .unwrap_or(true);
        if log_due {
            self.last_status_log = Some(now);
            debug!(
                "armed S:{} M:{} | steer x={:+.2} tgt={:.1} pos={:.1} | motor tgt={:+.2} out={:+.2} | \
                 head tgt={:.1} pos={:.1}",
                armed.steering as u8,
                armed.motor as u8,
                steering_axis.unwrap_or(0.0),
                steering.target_deg,
                steering.pos_deg,
                motor.target,
                motor.speed,
                head.target_deg,
                head.pos_deg
            );
        }

        Ok(TickOutput {
            steering,
            motor,
            head,
        })
    }

    /// Handle loss of the gamepad link: neutralise every actuator, fire the disconnect hook and
    /// restart the safe-start sequences.
    pub fn on_disconnect(&mut self, loss: &LinkLoss, now: Instant) {
        warn!("Gamepad link lost: {}", loss);

        self.neutralise();

        let command = self.shared.disconnect_command();
        self.hook.fire(command.as_deref());

        self.reset_controllers(now);
        self.axes = None;
        self.last_tick = None;
        self.stale.reset();

        self.shared.with_status(|s| {
            s.connection = ConnectionStatus::Disconnected;
            s.armed = ArmedStatus::default();
            s.outputs.motor_speed = 0.0;
        });
    }

    /// Stop the motor and release the servos.
    pub fn shutdown(&mut self) {
        info!("Shutting down actuators");

        let res = self.motor_out.emit(&mut self.driver, 0.0, thread::sleep);
        self.check_hw("motor", res);

        for (name, pin) in [
            ("steering", self.str_ctrl.params().pin),
            ("head", self.head_ctrl.params().pin),
        ] {
            let res = self.driver.release(pin);
            self.check_hw(name, res);
        }

        self.shared.with_status(|s| {
            s.armed = ArmedStatus::default();
            s.outputs.motor_speed = 0.0;
        });
    }

    /// Command every actuator to its neutral position.
    fn neutralise(&mut self) {
        let snap = self.shared.snapshot();

        let res = self.motor_out.emit(&mut self.driver, 0.0, thread::sleep);
        self.check_hw("motor", res);

        let steer_us = self
            .str_ctrl
            .neutral_pulse_us(&snap.steering_angles, &snap.steering_pulses);
        let res = self
            .driver
            .set_pulse_width_us(self.str_ctrl.params().pin, steer_us);
        self.check_hw("steering", res);

        let head_us = self.head_ctrl.center_pulse_us();
        let res = self
            .driver
            .set_pulse_width_us(self.head_ctrl.params().pin, head_us);
        self.check_hw("head", res);
    }

    /// Run the command assigned to a pressed button, if any.
    fn button_pressed(&mut self, code: u16) {
        if !buttons::is_assignable(code) {
            return;
        }

        let command = self.shared.button_command(code);
        trace!(
            "{} pressed, command: {:?}",
            buttons::button_name(code),
            command
        );

        if command.is_some() {
            self.button_hook.fire(command.as_deref());
        }
    }

    fn reset_controllers(&mut self, now: Instant) {
        let angles = self.shared.snapshot().steering_angles;

        let results = [
            self.str_ctrl
                .init(str_ctrl::InitData { now, angles })
                .map_err(|e| e.to_string()),
            self.drv_ctrl.init(now).map_err(|e| e.to_string()),
            self.head_ctrl.init(now).map_err(|e| e.to_string()),
        ];

        for e in results.iter().filter_map(|r| r.as_ref().err()) {
            warn!("Controller reset failed: {}", e);
        }
    }

    fn neutral_steering(&self, input: &str_ctrl::InputData) -> str_ctrl::OutputData {
        let mid = input.angles.mid_deg;

        str_ctrl::OutputData {
            pos_deg: mid,
            target_deg: mid,
            pulse_us: input.pulses.deg_to_us(mid, &input.angles, &self.servo),
            shaped: 0.0,
        }
    }

    /// Log hardware failures once per actuator until the actuator recovers.
    fn check_hw(&mut self, actuator: &'static str, res: Result<(), HardwareError>) {
        match res {
            Ok(()) => {
                if self.faulted.remove(actuator) {
                    info!("{} output recovered", actuator);
                }
            }
            Err(e) => {
                if self.faulted.insert(actuator) {
                    warn!("{} output failed: {}", actuator, e);
                } else {
                    trace!("{} output failed: {}", actuator, e);
                }
            }
        }
    }
}

// ------------------------------------------------------------------------------------------------
// PUBLIC FUNCTIONS
// ------------------------------------------------------------------------------------------------

/// Run the control loop at a fixed cadence until `stop` is set.
///
/// The actuators are shut down before returning, whether the loop stopped or failed.
pub fn run<B, D>(
    tick_period_s: f64,
    conn_sup: &mut ConnSup<B>,
    ctrl_loop: &mut ControlLoop<D>,
    stop: &AtomicBool,
) -> Result<(), LoopError>
where
    B: InputBackend,
    D: ActuatorDriver,
{
    let result = run_cycles(tick_period_s, conn_sup, ctrl_loop, stop);

    ctrl_loop.shutdown();

    result
}

fn run_cycles<B, D>(
    tick_period_s: f64,
    conn_sup: &mut ConnSup<B>,
    ctrl_loop: &mut ControlLoop<D>,
    stop: &AtomicBool,
) -> Result<(), LoopError>
where
    B: InputBackend,
    D: ActuatorDriver,
{
    let period = secs_to_duration(tick_period_s);

    let mut dev = match conn_sup.first_connect(stop)? {
        Some(d) => d,
        None => return Ok(()),
    };
    ctrl_loop.on_connect(&dev, Instant::now())?;

    info!("Beginning control loop");

    while !stop.load(Ordering::Relaxed) {
        let cycle_start = Instant::now();

        if let Err(loss) = ctrl_loop.tick(&mut dev, cycle_start) {
            ctrl_loop.on_disconnect(&loss, cycle_start);
            drop(dev);

            dev = match conn_sup.reconnect(stop)? {
                Some(d) => d,
                None => break,
            };
            ctrl_loop.on_connect(&dev, Instant::now())?;
            continue;
        }

        // ---- CYCLE MANAGEMENT ----
        let cycle_dur = Instant::now() - cycle_start;
        match period.checked_sub(cycle_dur) {
            Some(d) => thread::sleep(d),
            None => trace!(
                "Cycle overran by {:.06} s",
                (cycle_dur - period).as_secs_f64()
            ),
        }
    }

    info!("Control loop stopped");

    Ok(())
}
