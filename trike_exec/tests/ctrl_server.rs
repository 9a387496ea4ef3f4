//! # Override server tests
//!
//! Exchange requests with a running server over an in-process zmq transport.

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use comms_if::{
    ctrl::{CtrlResponse, MotorLimits},
    net::{zmq, MonitoredSocket, SocketOptions},
};
use std::sync::{atomic::AtomicBool, Arc};

use trike_lib::{
    calib::{ServoParams, SteeringAngleCalibration, SteeringPulseCalibration},
    ctrl_server::CtrlServer,
    ctrl_state::{ControlOverride, SharedControlState},
};

// ------------------------------------------------------------------------------------------------
// HELPERS
// ------------------------------------------------------------------------------------------------

fn shared() -> Arc<SharedControlState> {
    Arc::new(SharedControlState::new(
        ControlOverride::new(
            MotorLimits {
                forward: 0.6,
                reverse: 0.5,
            },
            SteeringAngleCalibration::default(),
            SteeringPulseCalibration::default(),
        ),
        ServoParams::default(),
    ))
}

fn exchange(client: &MonitoredSocket, msg: &[u8]) -> CtrlResponse {
    client.send(msg, 0).unwrap();
    let rep = client.recv_string(0).unwrap().unwrap();
    serde_json::from_str(&rep).unwrap()
}

// ------------------------------------------------------------------------------------------------
// TESTS
// ------------------------------------------------------------------------------------------------

#[test]
fn test_server_round_trip() {
    let endpoint = "inproc://ctrl_server_round_trip";
    let ctx = zmq::Context::new();
    let state = shared();

    let server = CtrlServer::spawn(
        &ctx,
        endpoint,
        20,
        state.clone(),
        Arc::new(AtomicBool::new(false)),
    )
    .unwrap();

    let client =
        MonitoredSocket::new(&ctx, zmq::REQ, SocketOptions::client(1000), endpoint).unwrap();

    // Valid request, one field of the wrong shape
    match exchange(&client, br#"{"override": true, "steering": 2.0, "head": "left"}"#) {
        CtrlResponse::Snapshot(s) => {
            assert!(s.override_active);
            assert_eq!(s.steering, 1.0);
            assert_eq!(s.rejected, vec!["head"]);
        }
        r => panic!("Unexpected response {:?}", r),
    }
    assert_eq!(state.snapshot().steering, 1.0);

    // Unparseable and non UTF-8 requests are answered and ignored
    assert!(matches!(
        exchange(&client, b"steering=1"),
        CtrlResponse::Invalid(_)
    ));
    assert!(matches!(
        exchange(&client, &[0xff, 0xfe, 0x00]),
        CtrlResponse::Invalid(_)
    ));

    // Poll
    match exchange(&client, b"") {
        CtrlResponse::Snapshot(s) => {
            assert!(s.override_active);
            assert!(s.rejected.is_empty());
        }
        r => panic!("Unexpected response {:?}", r),
    }

    server.stop();
}
