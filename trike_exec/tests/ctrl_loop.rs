//! # Control loop tests
//!
//! Drive the whole loop against a simulated gamepad and actuator driver, stepping time by hand.

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use comms_if::ctrl::{ConnectionStatus, CtrlRequest, CtrlResponse};
use std::{
    sync::{atomic::AtomicBool, Arc, Mutex},
    time::{Duration, Instant},
};

use trike_lib::{
    conn_sup::{ConnSup, ConnSupError, LinkLoss},
    ctrl_loop::{self, ControlLoop, LoopError, TickOutput},
    ctrl_server::handle_request,
    ctrl_state::{ControlOverride, SharedControlState},
    drv_ctrl::MotorChannel,
    hw::{
        codes,
        sim::{SimDevice, SimDriver, SimGamepad, SimInputBackend},
        EventKind,
    },
    params::TrikeExecParams,
};

// ------------------------------------------------------------------------------------------------
// CONSTANTS
// ------------------------------------------------------------------------------------------------

const TICK: Duration = Duration::from_millis(20);

const STEER_PIN: u8 = 17;
const MOTOR_PWM_PIN: u8 = 18;
const HEAD_PIN: u8 = 24;

/// Neutral steering pulse for the default calibration.
const STEER_NEUTRAL_US: f64 = 1600.0;

/// Head centre pulse, 90 degrees on a 600..2400 us, 270 degree servo.
const HEAD_CENTER_US: f64 = 1200.0;

// ------------------------------------------------------------------------------------------------
// HELPERS
// ------------------------------------------------------------------------------------------------

struct Rig {
    params: TrikeExecParams,
    pad: SimGamepad,
    sim: SimDriver,
    shared: Arc<SharedControlState>,
    fired: Arc<Mutex<Vec<Option<String>>>>,
    button_commands: Arc<Mutex<Vec<String>>>,
    conn_sup: ConnSup<SimInputBackend>,
    ctrl_loop: ControlLoop<SimDriver>,
    dev: SimDevice,
    now: Instant,
}

/// Default parameters with short safe-start and arming windows.
fn fast_params() -> TrikeExecParams {
    let mut p = TrikeExecParams::default();

    p.str_ctrl.arming.safe_start_s = 0.1;
    p.str_ctrl.arming.arm_neutral_ms = 100.0;
    p.drv_ctrl.arming.safe_start_s = 0.1;
    p.drv_ctrl.arming.arm_neutral_ms = 100.0;
    p.drv_ctrl.dead_time_s = 0.0;
    p.head_ctrl.safe_start_s = 0.1;

    p.conn_sup.rescan_interval_s = 0.01;
    p.conn_sup.wait_for_device_s = 0.05;
    p.conn_sup.reconnect_cooldown_s = 0.0;
    p.conn_sup.reconnect_timeout_s = 0.05;

    p
}

fn add_standard_axes(pad: &SimGamepad, params: &TrikeExecParams) {
    pad.add_axis(params.str_ctrl.axis_code, -32768, 32767);
    pad.add_axis(params.drv_ctrl.throttle_axis_code, -32768, 32767);
    pad.add_axis(params.drv_ctrl.gas_axis_code, 0, 1023);
    pad.add_axis(params.drv_ctrl.brake_axis_code, 0, 1023);
    pad.set_axis(params.drv_ctrl.gas_axis_code, 0);
    pad.set_axis(params.drv_ctrl.brake_axis_code, 0);
}

/// Raw value of a -32768..32767 axis at the given normalised position.
fn centered_raw(x: f64) -> i32 {
    (-0.5 + x * 32767.5).round() as i32
}

impl Rig {
    fn new(params: TrikeExecParams) -> Self {
        let backend = SimInputBackend::new();
        let pad = backend.add_gamepad(&params.conn_sup.device_name, true);
        add_standard_axes(&pad, &params);

        let mut conn_sup = ConnSup::new(params.conn_sup.clone(), backend);
        let dev = conn_sup.try_acquire().expect("gamepad not acquired");

        let shared = Arc::new(SharedControlState::new(
            ControlOverride::new(
                params.drv_ctrl.default_limits,
                params.str_ctrl.angles,
                params.str_ctrl.initial_pulses(&params.servo),
            ),
            params.servo,
        ));

        let fired = Arc::new(Mutex::new(Vec::new()));
        let hook_fired = fired.clone();
        let hook = move |cmd: Option<&str>| {
            hook_fired.lock().unwrap().push(cmd.map(String::from));
        };

        let button_commands = Arc::new(Mutex::new(Vec::new()));
        let button_fired = button_commands.clone();
        let button_hook = move |cmd: Option<&str>| {
            if let Some(c) = cmd {
                button_fired.lock().unwrap().push(c.to_string());
            }
        };

        let sim = SimDriver::new();
        let now = Instant::now();
        let mut ctrl_loop =
            ControlLoop::new(&params, sim.clone(), shared.clone(), Box::new(hook), now)
                .with_button_hook(Box::new(button_hook));
        ctrl_loop.on_connect(&dev, now).unwrap();

        Self {
            params,
            pad,
            sim,
            shared,
            fired,
            button_commands,
            conn_sup,
            ctrl_loop,
            dev,
            now,
        }
    }

    fn tick(&mut self) -> Result<TickOutput, LinkLoss> {
        self.now += TICK;
        self.ctrl_loop.tick(&mut self.dev, self.now)
    }

    /// Run `n` ticks which must all succeed, returning the last output.
    fn run(&mut self, n: usize) -> TickOutput {
        let mut out = None;
        for _ in 0..n {
            out = Some(self.tick().expect("unexpected link loss"));
        }
        out.expect("no ticks run")
    }

    /// Run with the sticks at rest until both steering and motor are armed.
    fn arm(&mut self) {
        self.run(20);
        let status = self.shared.status();
        assert!(status.armed.steering);
        assert!(status.armed.motor);
    }

    fn set_steering(&self, x: f64) {
        self.pad
            .set_axis(self.params.str_ctrl.axis_code, centered_raw(x));
    }

    /// Set the throttle stick to a forward demand, the stick reads negative when pushed forward.
    fn set_throttle(&self, forward: f64) {
        self.pad
            .set_axis(self.params.drv_ctrl.throttle_axis_code, centered_raw(-forward));
    }

    fn set_brake(&self, brake: f64) {
        self.pad.set_axis(
            self.params.drv_ctrl.brake_axis_code,
            (brake * 1023.0).round() as i32,
        );
    }

    fn request(&self, json: &str) {
        match handle_request(&self.shared, json) {
            CtrlResponse::Snapshot(s) => assert!(s.rejected.is_empty(), "{:?}", s.rejected),
            r => panic!("Unexpected response {:?}", r),
        }
    }

    fn fired(&self) -> Vec<Option<String>> {
        self.fired.lock().unwrap().clone()
    }

    fn button_commands(&self) -> Vec<String> {
        self.button_commands.lock().unwrap().clone()
    }
}

// ------------------------------------------------------------------------------------------------
// TESTS
// ------------------------------------------------------------------------------------------------

#[test]
fn test_stale_reads_disconnect_and_neutralise() {
    let mut rig = Rig::new(fast_params());
    rig.request(r#"{"disconnect_command": "echo lost"}"#);
    rig.arm();

    // Steer hard and drive forward
    rig.set_steering(0.8);
    rig.set_throttle(0.8);
    let out = rig.run(10);
    assert!((out.steering.pos_deg - 150.0).abs() > 1.0);
    assert!(rig.sim.last_duty(MOTOR_PWM_PIN).unwrap() > 0.0);

    // 25 consecutive missing steering reads, 0.5 s at 20 ms
    rig.pad.clear_axis(rig.params.str_ctrl.axis_code);
    for _ in 0..24 {
        rig.tick().unwrap();
    }
    let loss = rig.tick().unwrap_err();
    assert_eq!(loss, LinkLoss::StaleAxisRead(25));

    let now = rig.now;
    rig.ctrl_loop.on_disconnect(&loss, now);

    let status = rig.shared.status();
    assert_eq!(status.connection, ConnectionStatus::Disconnected);
    assert!(!status.armed.steering);
    assert!(!status.armed.motor);
    assert!(!rig.ctrl_loop.is_connected());

    assert_eq!(rig.sim.last_duty(MOTOR_PWM_PIN), Some(0.0));
    assert_eq!(rig.sim.last_pulse(STEER_PIN), Some(STEER_NEUTRAL_US));
    assert_eq!(rig.sim.last_pulse(HEAD_PIN), Some(HEAD_CENTER_US));

    assert_eq!(rig.fired(), vec![Some("echo lost".to_string())]);
}

#[test]
fn test_path_vanish_then_reconnect_restarts_safe_start() {
    let mut rig = Rig::new(fast_params());
    rig.arm();

    rig.pad.unplug();
    let loss = rig.tick().unwrap_err();
    assert_eq!(loss, LinkLoss::PathVanished);

    let now = rig.now;
    rig.ctrl_loop.on_disconnect(&loss, now);
    assert_eq!(rig.fired(), vec![None]);

    // The stick is deflected when the gamepad comes back
    rig.set_steering(0.8);
    rig.pad.plug();

    let stop = AtomicBool::new(false);
    rig.dev = rig.conn_sup.reconnect(&stop).unwrap().expect("gamepad not found");
    let now = rig.now;
    rig.ctrl_loop.on_connect(&rig.dev, now).unwrap();

    assert!(rig.pad.is_grabbed());
    assert!(matches!(
        rig.shared.status().connection,
        ConnectionStatus::Connected { .. }
    ));

    // Steering stays at neutral until the stick has been released
    let out = rig.run(30);
    assert_eq!(out.steering.pos_deg, 150.0);
    assert_eq!(out.steering.pulse_us, STEER_NEUTRAL_US);
    assert!(!rig.shared.status().armed.steering);

    rig.set_steering(0.0);
    rig.run(10);
    rig.set_steering(0.8);
    let out = rig.run(10);
    assert!(out.steering.pos_deg < 150.0);

    // Hook fired only for the one disconnection
    assert_eq!(rig.fired().len(), 1);
}

#[test]
fn test_read_error_is_link_loss() {
    let mut rig = Rig::new(fast_params());
    rig.run(3);

    rig.pad.push_read_error();
    assert!(matches!(rig.tick(), Err(LinkLoss::ReadError(_))));
}

#[test]
fn test_override_steering_clamped_and_rate_limited() {
    let mut rig = Rig::new(fast_params());
    rig.arm();

    rig.request(r#"{"override": true, "steering": 2.0}"#);
    let snap = rig.shared.snapshot();
    assert!(snap.active);
    assert_eq!(snap.steering, 1.0);
    assert_eq!(snap.motor, 0.0);

    let max_step = rig.params.str_ctrl.rate_deg_s * TICK.as_secs_f64() + 1e-9;
    let mut prev = 150.0;
    let mut out = None;
    for _ in 0..100 {
        let o = rig.tick().unwrap();
        assert!((o.steering.pos_deg - prev).abs() <= max_step);
        prev = o.steering.pos_deg;
        out = Some(o);
    }
    let out = out.unwrap();

    // Steering is inverted by default, so full positive demand is full left
    assert_eq!(out.steering.target_deg, 100.0);
    assert!((out.steering.pos_deg - 100.0).abs() < 0.5);

    // Disabling the override hands control back to the resting stick
    rig.request(r#"{"override": false}"#);
    let out = rig.run(100);
    assert_eq!(out.steering.target_deg, 150.0);
    assert!((out.steering.pos_deg - 150.0).abs() < 0.5);
}

#[test]
fn test_half_right_steers_to_175_degrees() {
    let mut params = fast_params();
    params.str_ctrl.invert = false;
    params.str_ctrl.expo = 0.0;

    let mut rig = Rig::new(params);
    rig.arm();

    rig.set_steering(0.5);
    let out = rig.run(100);

    assert!((out.steering.target_deg - 175.0).abs() < 0.01);
    assert!((out.steering.pos_deg - 175.0).abs() < 0.1);

    // Default pulses are 1267, 1600 and 1933 us
    let servo = rig.params.servo;
    assert!(out.steering.pulse_us >= servo.us_min && out.steering.pulse_us <= servo.us_max);
    assert!((out.steering.pulse_us - 1766.5).abs() < 1.0);
    assert_eq!(rig.sim.last_pulse(STEER_PIN), Some(out.steering.pulse_us));
}

#[test]
fn test_brake_latch_through_loop() {
    let mut rig = Rig::new(fast_params());
    rig.arm();

    rig.set_brake(0.2);
    let out = rig.tick().unwrap();
    assert!(out.motor.demand <= 0.0);

    // A small forward demand does not clear the latch
    rig.set_brake(0.0);
    rig.set_throttle(0.05);
    let out = rig.run(5);
    assert_eq!(out.motor.demand, 0.0);
    assert!(out.motor.speed <= 0.0);

    // A clear forward demand does
    rig.set_throttle(0.15);
    let out = rig.tick().unwrap();
    assert!(out.motor.demand > 0.1);

    let out = rig.run(20);
    assert!(out.motor.speed > 0.0);
    assert!(rig.sim.last_duty(MOTOR_PWM_PIN).unwrap() > 0.0);
}

#[test]
fn test_motor_capped_by_limits() {
    let mut rig = Rig::new(fast_params());
    rig.arm();

    rig.request(r#"{"motor_limits": {"forward": 0.3}}"#);
    rig.set_throttle(1.0);
    let out = rig.run(100);

    assert!((out.motor.speed - 0.3).abs() < 1e-9);
    assert!((rig.sim.last_duty(MOTOR_PWM_PIN).unwrap() - 0.3).abs() < 1e-9);
}

#[test]
fn test_head_latches_from_hat() {
    let mut rig = Rig::new(fast_params());
    rig.run(10);

    rig.pad
        .push_event(EventKind::Absolute, codes::ABS_HAT0X, -1);
    let out = rig.tick().unwrap();
    assert_eq!(out.head.target_deg, 30.0);

    // Releasing the hat keeps the latched position
    rig.pad.push_event(EventKind::Absolute, codes::ABS_HAT0X, 0);
    let out = rig.run(100);
    assert_eq!(out.head.target_deg, 30.0);
    assert!((out.head.pos_deg - 30.0).abs() < 0.5);
}

#[test]
fn test_hardware_failure_does_not_stop_loop() {
    let mut rig = Rig::new(fast_params());
    rig.sim.fail_pin(STEER_PIN);
    rig.arm();

    rig.set_throttle(0.8);
    let out = rig.run(20);

    assert!(out.motor.speed > 0.0);
    assert!(rig.sim.last_duty(MOTOR_PWM_PIN).unwrap() > 0.0);
    assert_eq!(rig.sim.last_pulse(STEER_PIN), None);
}

#[test]
fn test_run_shuts_down_when_stopped() {
    let params = fast_params();
    let backend = SimInputBackend::new();
    let pad = backend.add_gamepad(&params.conn_sup.device_name, true);
    add_standard_axes(&pad, &params);

    let sim = SimDriver::new();
    let shared = Arc::new(SharedControlState::new(
        ControlOverride::new(
            params.drv_ctrl.default_limits,
            params.str_ctrl.angles,
            params.str_ctrl.initial_pulses(&params.servo),
        ),
        params.servo,
    ));

    let mut conn_sup = ConnSup::new(params.conn_sup.clone(), backend);
    let mut ctrl_loop = ControlLoop::new(
        &params,
        sim.clone(),
        shared,
        Box::new(|_: Option<&str>| ()),
        Instant::now(),
    );

    let stop = AtomicBool::new(true);
    ctrl_loop::run(params.tick_period_s, &mut conn_sup, &mut ctrl_loop, &stop).unwrap();

    assert_eq!(sim.last_duty(MOTOR_PWM_PIN), Some(0.0));
    assert!(sim.is_released(STEER_PIN));
    assert!(sim.is_released(HEAD_PIN));
}

#[test]
fn test_run_fails_without_gamepad() {
    let params = fast_params();
    let sim = SimDriver::new();
    let shared = Arc::new(SharedControlState::new(
        ControlOverride::new(
            params.drv_ctrl.default_limits,
            params.str_ctrl.angles,
            params.str_ctrl.initial_pulses(&params.servo),
        ),
        params.servo,
    ));

    let mut conn_sup = ConnSup::new(params.conn_sup.clone(), SimInputBackend::new());
    let mut ctrl_loop = ControlLoop::new(
        &params,
        sim.clone(),
        shared,
        Box::new(|_: Option<&str>| ()),
        Instant::now(),
    );

    let stop = AtomicBool::new(false);
    let res = ctrl_loop::run(params.tick_period_s, &mut conn_sup, &mut ctrl_loop, &stop);

    assert!(matches!(
        res,
        Err(LoopError::ConnSup(ConnSupError::DeviceNotFound(_, _)))
    ));
    assert!(sim.is_released(STEER_PIN));
}

#[test]
fn test_missing_steering_axis_rejected() {
    let params = fast_params();
    let mut backend = SimInputBackend::new();
    backend.add_gamepad(&params.conn_sup.device_name, true);

    let info = trike_lib::hw::InputBackend::enumerate(&mut backend).remove(0);
    let dev = trike_lib::hw::InputBackend::open(&mut backend, &info.path).unwrap();

    let shared = Arc::new(SharedControlState::new(
        ControlOverride::new(
            params.drv_ctrl.default_limits,
            params.str_ctrl.angles,
            params.str_ctrl.initial_pulses(&params.servo),
        ),
        params.servo,
    ));
    let mut ctrl_loop = ControlLoop::new(
        &params,
        SimDriver::new(),
        shared,
        Box::new(|_: Option<&str>| ()),
        Instant::now(),
    );

    assert!(matches!(
        ctrl_loop.on_connect(&dev, Instant::now()),
        Err(LoopError::MissingSteeringAxis(_, _))
    ));
}

#[test]
fn test_unused_request_fields_leave_state() {
    let rig = Rig::new(fast_params());
    let before = rig.shared.snapshot();

    let snap = rig.shared.update(&CtrlRequest::default(), Vec::new());
    assert_eq!(rig.shared.snapshot(), before);
    assert_eq!(snap.last_update, None);
}

#[test]
fn test_tick_gap_bounds_steering_step() {
    let mut rig = Rig::new(fast_params());
    rig.arm();
    let before = rig.run(1).steering.pos_deg;

    // A full deflection held across a one second stall moves at most one clamped interval
    rig.set_steering(1.0);
    rig.now += Duration::from_secs(1);
    let out = rig.tick().unwrap();

    let step = (out.steering.pos_deg - before).abs();
    let max_step = rig.params.str_ctrl.rate_deg_s * ctrl_loop::DT_MAX_S;
    assert!(step > 0.0);
    assert!(step <= max_step + 1e-9, "step {} > {}", step, max_step);
}

#[test]
fn test_disconnect_stops_every_motor_channel() {
    let mut params = fast_params();
    params.drv_ctrl.channels.push(MotorChannel {
        pwm_pin: 13,
        dir_pin: 6,
        forward_is_high: false,
    });
    let mut rig = Rig::new(params);
    rig.arm();

    rig.set_throttle(0.8);
    rig.run(30);
    assert!(rig.sim.last_duty(13).unwrap() > 0.0);

    // The first channel's driver fails, the second must still be stopped
    rig.sim.fail_pin(MOTOR_PWM_PIN);
    rig.pad.unplug();
    let loss = rig.tick().unwrap_err();
    let now = rig.now;
    rig.ctrl_loop.on_disconnect(&loss, now);

    assert_eq!(rig.sim.last_duty(13), Some(0.0));
    assert_eq!(rig.sim.last_pulse(STEER_PIN), Some(STEER_NEUTRAL_US));
}

#[test]
fn test_button_press_runs_assigned_command() {
    let mut rig = Rig::new(fast_params());
    rig.request(r#"{"button_actions": {"KEY_304": {"mode": "command", "value": "aplay horn.wav"}}}"#);
    rig.arm();

    // Press, auto-repeat and release fire once
    rig.pad.push_event(EventKind::Key, 304, 1);
    rig.pad.push_event(EventKind::Key, 304, 2);
    rig.pad.push_event(EventKind::Key, 304, 0);
    rig.tick().unwrap();
    assert_eq!(rig.button_commands(), vec!["aplay horn.wav".to_string()]);

    // Unassigned and unknown buttons do nothing
    rig.pad.push_event(EventKind::Key, 305, 1);
    rig.pad.push_event(EventKind::Key, 306, 1);
    rig.tick().unwrap();
    assert_eq!(rig.button_commands().len(), 1);

    // Cleared buttons do nothing either
    rig.request(r#"{"button_actions": {"KEY_304": {"mode": "none"}}}"#);
    rig.pad.push_event(EventKind::Key, 304, 1);
    rig.tick().unwrap();
    assert_eq!(rig.button_commands().len(), 1);
}
