//! # Override channel client
//!
//! Sends a single request to the trike executable's control server and prints the returned
//! snapshot. With no options the request is a poll.

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use color_eyre::{
    eyre::{eyre, WrapErr},
    Result,
};
use comms_if::{
    ctrl::{
        ButtonAction, CtrlRequest, CtrlResponse, MotorLimitsUpdate, SteeringAngles, SteeringPulses,
    },
    net::{zmq, MonitoredSocket, SocketOptions},
};
use structopt::StructOpt;

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

#[derive(Debug, StructOpt)]
#[structopt(name = "ctrl_client", about = "Send override requests to the trike")]
struct Opts {
    /// Control server endpoint.
    #[structopt(short, long, default_value = "tcp://localhost:5020")]
    endpoint: String,

    /// Time to wait for the server's response.
    #[structopt(long, default_value = "1000")]
    timeout_ms: i32,

    /// Enable (true) or disable (false) the override.
    #[structopt(long = "override")]
    override_active: Option<bool>,

    /// Steering demand, -1 to +1.
    #[structopt(long, allow_hyphen_values = true)]
    steering: Option<f64>,

    /// Motor demand, -1 to +1.
    #[structopt(long, allow_hyphen_values = true)]
    motor: Option<f64>,

    /// Head demand, -1 to +1.
    #[structopt(long, allow_hyphen_values = true)]
    head: Option<f64>,

    /// Forward motor limit, 0 to 1.
    #[structopt(long)]
    limit_forward: Option<f64>,

    /// Reverse motor limit, 0 to 1.
    #[structopt(long)]
    limit_reverse: Option<f64>,

    /// Steering angle calibration: LEFT MID RIGHT in degrees.
    #[structopt(long, number_of_values = 3)]
    angles: Option<Vec<f64>>,

    /// Steering pulse calibration: LEFT MID RIGHT in microseconds.
    #[structopt(long, number_of_values = 3)]
    pulses: Option<Vec<f64>>,

    /// Command run on gamepad disconnect, an empty string clears it.
    #[structopt(long)]
    disconnect_command: Option<String>,

    /// Assign a command to a button as BUTTON=COMMAND, e.g. KEY_304="aplay horn.wav". An empty
    /// command clears the button.
    #[structopt(long = "button", parse(try_from_str = parse_button))]
    buttons: Vec<(String, String)>,
}

// ------------------------------------------------------------------------------------------------
// MAIN
// ------------------------------------------------------------------------------------------------

fn main() -> Result<()> {
    color_eyre::install()?;

    let opts = Opts::from_args();

    let request = build_request(&opts);

    let ctx = zmq::Context::new();
    let socket = MonitoredSocket::new(
        &ctx,
        zmq::REQ,
        SocketOptions::client(opts.timeout_ms),
        &opts.endpoint,
    )
    .wrap_err("Could not create the client socket")?;

    let req_str = serde_json::to_string(&request).wrap_err("Could not serialize the request")?;

    socket
        .send(req_str.as_str(), 0)
        .wrap_err("Could not send the request")?;

    let rep_str = match socket.recv_string(0) {
        Ok(Ok(s)) => s,
        Ok(Err(_)) => return Err(eyre!("The server sent a non UTF-8 response")),
        Err(zmq::Error::EAGAIN) => {
            return Err(eyre!("No response from {} within {} ms", opts.endpoint, opts.timeout_ms))
        }
        Err(e) => return Err(e).wrap_err("Could not receive the response"),
    };

    let response: CtrlResponse =
        serde_json::from_str(&rep_str).wrap_err("Could not parse the response")?;

    match response {
        CtrlResponse::Snapshot(s) => {
            println!("{}", serde_json::to_string_pretty(&s)?);
            if !s.rejected.is_empty() {
                eprintln!("Rejected fields: {}", s.rejected.join(", "));
            }
            Ok(())
        }
        CtrlResponse::Invalid(reason) => Err(eyre!("Request rejected: {}", reason)),
    }
}

// ------------------------------------------------------------------------------------------------
// FUNCTIONS
// ------------------------------------------------------------------------------------------------

fn build_request(opts: &Opts) -> CtrlRequest {
    let motor_limits = match (opts.limit_forward, opts.limit_reverse) {
        (None, None) => None,
        (forward, reverse) => Some(MotorLimitsUpdate { forward, reverse }),
    };

    let button_actions = match opts.buttons.is_empty() {
        true => None,
        false => Some(
            opts.buttons
                .iter()
                .map(|(button, command)| {
                    let action = match command.trim().is_empty() {
                        true => ButtonAction::None,
                        false => ButtonAction::Command(command.clone()),
                    };
                    (button.clone(), action)
                })
                .collect(),
        ),
    };

    CtrlRequest {
        override_active: opts.override_active,
        steering: opts.steering,
        motor: opts.motor,
        head: opts.head,
        motor_limits,
        steering_angles: opts.angles.as_ref().map(|a| SteeringAngles {
            left_deg: a[0],
            mid_deg: a[1],
            right_deg: a[2],
        }),
        steering_pulses: opts.pulses.as_ref().map(|p| SteeringPulses {
            left_us: p[0],
            mid_us: p[1],
            right_us: p[2],
        }),
        disconnect_command: opts.disconnect_command.clone(),
        button_actions,
    }
}

fn parse_button(s: &str) -> Result<(String, String)> {
    match s.split_once('=') {
        Some((button, command)) => Ok((button.trim().to_string(), command.to_string())),
        None => Err(eyre!("Expected BUTTON=COMMAND, found \"{}\"", s)),
    }
}
