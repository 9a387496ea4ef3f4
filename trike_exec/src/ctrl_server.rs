//! # Override server
//!
//! Serves the override channel on its own thread. Each request is merged into the shared control
//! state and answered with a full snapshot. The server never touches the actuators.

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use comms_if::{
    ctrl::{CtrlRequest, CtrlResponse},
    net::{zmq, MonitoredSocket, MonitoredSocketError, SocketOptions},
};
use log::{debug, info, warn};
use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    thread,
};
use thiserror::Error;

use crate::ctrl_state::SharedControlState;

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

/// Handle to the running override server thread.
pub struct CtrlServer {
    join_handle: Option<thread::JoinHandle<()>>,

    stop: Arc<AtomicBool>,
}

// ------------------------------------------------------------------------------------------------
// ENUMS
// ------------------------------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum CtrlServerError {
    #[error("Socket error: {0}")]
    SocketError(MonitoredSocketError),

    #[error("Could not recieve a request: {0}")]
    RecvError(zmq::Error),

    #[error("Could not send the response: {0}")]
    SendError(zmq::Error),

    #[error("Could not serialize the response: {0}")]
    SerializationError(serde_json::Error),
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl CtrlServer {
    /// Bind the server socket and start serving requests.
    ///
    /// The socket is bound before this function returns, so a bad endpoint is reported here
    /// rather than on the server thread. The thread exits once `stop` is set, within one receive
    /// timeout.
    pub fn spawn(
        ctx: &zmq::Context,
        endpoint: &str,
        recv_timeout_ms: i32,
        shared: Arc<SharedControlState>,
        stop: Arc<AtomicBool>,
    ) -> Result<Self, CtrlServerError> {
        let socket = MonitoredSocket::new(
            ctx,
            zmq::REP,
            SocketOptions::server(recv_timeout_ms),
            endpoint,
        )
        .map_err(CtrlServerError::SocketError)?;

        info!("Override server listening on {}", endpoint);

        let thread_stop = stop.clone();
        let join_handle = thread::spawn(move || serve(socket, shared, thread_stop));

        Ok(Self {
            join_handle: Some(join_handle),
            stop,
        })
    }

    /// Signal the server to stop and wait for its thread to exit.
    pub fn stop(mut self) {
        self.stop.store(true, Ordering::Relaxed);

        if let Some(jh) = self.join_handle.take() {
            if jh.join().is_err() {
                warn!("Override server thread panicked");
            }
        }

        info!("Override server stopped");
    }
}

// ------------------------------------------------------------------------------------------------
// PUBLIC FUNCTIONS
// ------------------------------------------------------------------------------------------------

/// Process one raw request against the shared state.
///
/// Unparseable requests leave the state untouched and produce [`CtrlResponse::Invalid`]. Fields
/// with the wrong shape are dropped and reported in the snapshot's `rejected` list.
pub fn handle_request(shared: &SharedControlState, request: &str) -> CtrlResponse {
    match CtrlRequest::from_json_lenient(request) {
        Ok((req, rejected)) => CtrlResponse::Snapshot(shared.update(&req, rejected)),
        Err(e) => {
            warn!("Invalid override request: {}", e);
            CtrlResponse::Invalid(e.to_string())
        }
    }
}

// ------------------------------------------------------------------------------------------------
// PRIVATE FUNCTIONS
// ------------------------------------------------------------------------------------------------

fn serve(socket: MonitoredSocket, shared: Arc<SharedControlState>, stop: Arc<AtomicBool>) {
    while !stop.load(Ordering::Relaxed) {
        if let Err(e) = serve_one(&socket, &shared) {
            warn!("Override server error: {}", e);
        }
    }
}

/// Receive and answer at most one request.
fn serve_one(socket: &MonitoredSocket, shared: &SharedControlState) -> Result<(), CtrlServerError> {
    let response = match socket.recv_string(0) {
        Ok(Ok(s)) => {
            debug!("Override request: {}", s);
            handle_request(shared, &s)
        }
        // Non UTF-8 message
        Ok(Err(_)) => CtrlResponse::Invalid("request is not valid UTF-8".into()),
        // No message in timeout
        Err(zmq::Error::EAGAIN) => return Ok(()),
        // No response is sent if we could not recieve
        Err(e) => return Err(CtrlServerError::RecvError(e)),
    };

    send_response(socket, &response)
}

fn send_response(socket: &MonitoredSocket, response: &CtrlResponse) -> Result<(), CtrlServerError> {
    let rep_str = serde_json::to_string(response).map_err(CtrlServerError::SerializationError)?;

    socket
        .send(rep_str.as_str(), 0)
        .map_err(CtrlServerError::SendError)
}

// ------------------------------------------------------------------------------------------------
// TESTS
// ------------------------------------------------------------------------------------------------

#[cfg(test)]
mod test {
    use super::*;
    use crate::{
        calib::{ServoParams, SteeringAngleCalibration, SteeringPulseCalibration},
        ctrl_state::ControlOverride,
    };
    use comms_if::ctrl::MotorLimits;

    fn state() -> SharedControlState {
        SharedControlState::new(
            ControlOverride::new(
                MotorLimits {
                    forward: 0.6,
                    reverse: 0.5,
                },
                SteeringAngleCalibration::default(),
                SteeringPulseCalibration::default(),
            ),
            ServoParams::default(),
        )
    }

    #[test]
    fn test_handle_request() {
        let shared = state();

        match handle_request(&shared, r#"{"override": true, "steering": 2.0, "motor": "fast"}"#) {
            CtrlResponse::Snapshot(s) => {
                assert!(s.override_active);
                assert_eq!(s.steering, 1.0);
                assert_eq!(s.motor, 0.0);
                assert_eq!(s.rejected, vec!["motor"]);
            }
            r => panic!("Unexpected response {:?}", r),
        }

        // Polls leave the state alone
        match handle_request(&shared, "") {
            CtrlResponse::Snapshot(s) => {
                assert_eq!(s.steering, 1.0);
                assert!(s.rejected.is_empty());
            }
            r => panic!("Unexpected response {:?}", r),
        }
    }

    #[test]
    fn test_invalid_requests() {
        let shared = state();

        assert!(matches!(
            handle_request(&shared, "{not json"),
            CtrlResponse::Invalid(_)
        ));
        assert!(matches!(
            handle_request(&shared, "[1, 2]"),
            CtrlResponse::Invalid(_)
        ));
        assert!(!shared.snapshot().active);
    }
}
