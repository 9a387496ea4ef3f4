//! Main trike executable entry point.
//!
//! # Architecture
//!
//! The executable runs two threads:
//!
//!     - The control loop, on the main thread:
//!         - Gamepad acquisition and link supervision
//!         - Input acquisition
//!         - Steering, drive and head control processing
//!         - Actuator output
//!     - The override server, which merges override requests into the shared control state
//!
//! On Ctrl-C the control loop stops and releases the actuators, then the override server is
//! stopped.

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

// External
use color_eyre::{eyre::WrapErr, Result};
use comms_if::net::zmq;
use log::{info, warn};
use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::Instant,
};
use structopt::StructOpt;

// Internal
use trike_lib::{
    conn_sup::ConnSup,
    ctrl_loop::{self, ControlLoop},
    ctrl_server::CtrlServer,
    ctrl_state::{ControlOverride, SharedControlState},
    hook::ShellHook,
    hw::{
        sim::{SimDriver, SimInputBackend},
        ActuatorDriver, InputBackend,
    },
    params::TrikeExecParams,
    settings::JsonFileStore,
    telemetry::NoTelemetry,
};
use util::{host, logger::logger_init, session::Session};

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

#[derive(Debug, StructOpt)]
#[structopt(name = "trike_exec", about = "Trike actuator control executable")]
struct Opts {
    /// Parameter file, relative to the params directory.
    #[structopt(short, long, default_value = "trike_exec.toml")]
    params: String,

    /// Run against a simulated gamepad and actuator driver.
    #[structopt(long)]
    sim: bool,
}

// ------------------------------------------------------------------------------------------------
// MAIN
// ------------------------------------------------------------------------------------------------

fn main() -> Result<()> {
    color_eyre::install()?;

    let opts = Opts::from_args();

    // ---- EARLY INITIALISATION ----

    // Parameters first, they carry the log levels
    let params: TrikeExecParams =
        util::params::load(&opts.params).wrap_err("Could not load trike_exec params")?;

    // Initialise session
    let session = Session::new("trike_exec", "sessions").wrap_err("Failed to create the session")?;

    // Initialise logger
    logger_init(&params.log, &session).wrap_err("Failed to initialise logging")?;

    // Log information on this execution.
    info!("Trike Executable\n");
    info!("Session directory: {:?}\n", session.session_root);

    // ---- VALIDATE PARAMETERS ----

    params.validate().wrap_err("Invalid trike_exec params")?;

    info!("Exec parameters loaded from {}", opts.params);

    // ---- SHARED STATE ----

    let settings_path = host::get_sw_root()
        .wrap_err("Could not find the software root")?
        .join(&params.settings_file);

    let initial = ControlOverride::new(
        params.drv_ctrl.default_limits,
        params.str_ctrl.angles,
        params.str_ctrl.initial_pulses(&params.servo),
    );
    let shared = SharedControlState::new(initial, params.servo)
        .with_store(Box::new(JsonFileStore::new(&settings_path)))
        .with_telemetry(Arc::new(NoTelemetry));
    shared.restore_from_store();
    let shared = Arc::new(shared);

    info!("Shared state initialised, settings in {:?}", settings_path);

    // ---- SIGNAL HANDLING ----

    let stop = Arc::new(AtomicBool::new(false));
    let handler_stop = stop.clone();
    ctrlc::set_handler(move || {
        info!("Received shutdown signal");
        handler_stop.store(true, Ordering::Relaxed);
    })
    .wrap_err("Could not install the signal handler")?;

    // ---- OVERRIDE SERVER ----

    let zmq_ctx = zmq::Context::new();
    let server_stop = Arc::new(AtomicBool::new(false));
    let server = CtrlServer::spawn(
        &zmq_ctx,
        &params.ctrl_endpoint,
        params.ctrl_recv_timeout_ms,
        shared.clone(),
        server_stop,
    )
    .wrap_err("Failed to start the override server")?;

    // ---- CONTROL LOOP ----

    let result = match opts.sim {
        true => run_sim(&params, shared, &stop),
        false => run_hw(&params, shared, &stop),
    };

    // The loop has already released the hardware, the server goes last
    server.stop();

    result
}

// ------------------------------------------------------------------------------------------------
// FUNCTIONS
// ------------------------------------------------------------------------------------------------

/// Run the control loop until stopped.
fn run<B, D>(
    params: &TrikeExecParams,
    backend: B,
    driver: D,
    shared: Arc<SharedControlState>,
    stop: &AtomicBool,
) -> Result<()>
where
    B: InputBackend,
    D: ActuatorDriver,
{
    let mut conn_sup = ConnSup::new(params.conn_sup.clone(), backend);
    let mut ctrl_loop = ControlLoop::new(
        params,
        driver,
        shared,
        Box::new(ShellHook::default()),
        Instant::now(),
    );

    ctrl_loop::run(params.tick_period_s, &mut conn_sup, &mut ctrl_loop, stop)
        .wrap_err("Control loop failed")
}

/// Run against a simulated gamepad resting at neutral.
fn run_sim(params: &TrikeExecParams, shared: Arc<SharedControlState>, stop: &AtomicBool) -> Result<()> {
    warn!("Running in simulation mode, no hardware will be driven");

    let backend = SimInputBackend::new();
    let pad = backend.add_gamepad(&params.conn_sup.device_name, true);

    pad.add_axis(params.str_ctrl.axis_code, -32768, 32767);
    pad.add_axis(params.drv_ctrl.throttle_axis_code, -32768, 32767);
    pad.add_axis(params.drv_ctrl.gas_axis_code, 0, 1023);
    pad.add_axis(params.drv_ctrl.brake_axis_code, 0, 1023);
    pad.add_axis(params.head_ctrl.hat_x_code, -1, 1);
    pad.add_axis(params.head_ctrl.hat_y_code, -1, 1);

    // Triggers rest released
    pad.set_axis(params.drv_ctrl.gas_axis_code, 0);
    pad.set_axis(params.drv_ctrl.brake_axis_code, 0);

    run(params, backend, SimDriver::new(), shared, stop)
}

#[cfg(all(
    target_os = "linux",
    any(target_arch = "arm", target_arch = "aarch64")
))]
fn run_hw(params: &TrikeExecParams, shared: Arc<SharedControlState>, stop: &AtomicBool) -> Result<()> {
    use trike_lib::hw::{evdev_input::EvdevBackend, rpi::RpiDriver};

    let driver = RpiDriver::new().wrap_err("Could not open the GPIO")?;

    run(params, EvdevBackend::new(), driver, shared, stop)
}

#[cfg(not(all(
    target_os = "linux",
    any(target_arch = "arm", target_arch = "aarch64")
)))]
fn run_hw(
    _params: &TrikeExecParams,
    _shared: Arc<SharedControlState>,
    _stop: &AtomicBool,
) -> Result<()> {
    Err(color_eyre::eyre::eyre!(
        "No actuator driver is available on this target, run with --sim"
    ))
}
