//! # Linux event interface gamepads

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use evdev::{Device, EventType};
use log::trace;
use std::{
    collections::{HashMap, VecDeque},
    io::ErrorKind,
    path::{Path, PathBuf},
};

use super::{DeviceInfo, EventKind, HardwareError, InputBackend, InputDevice, InputEvent};
use crate::axis_shaper::AxisCalibration;

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

#[derive(Default)]
pub struct EvdevBackend;

pub struct EvdevGamepad {
    device: Device,
    name: String,
    path: PathBuf,

    /// Axis bounds read once at open.
    ranges: HashMap<u16, AxisCalibration>,

    /// Events fetched from the device but not yet consumed.
    pending: VecDeque<InputEvent>,
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl EvdevBackend {
    pub fn new() -> Self {
        Self
    }
}

impl InputBackend for EvdevBackend {
    type Device = EvdevGamepad;

    fn enumerate(&mut self) -> Vec<DeviceInfo> {
        evdev::enumerate()
            .map(|(path, dev)| DeviceInfo {
                path,
                name: dev.name().unwrap_or("").to_string(),
                has_keys: dev
                    .supported_keys()
                    .map(|k| k.iter().next().is_some())
                    .unwrap_or(false),
            })
            .collect()
    }

    fn open(&mut self, path: &Path) -> Result<Self::Device, HardwareError> {
        let device = Device::open(path)
            .map_err(|e| HardwareError::OpenFailed(path.to_path_buf(), e.to_string()))?;

        device
            .set_nonblocking(true)
            .map_err(|e| HardwareError::OpenFailed(path.to_path_buf(), e.to_string()))?;

        let ranges = device
            .get_absinfo()
            .map(|infos| {
                infos
                    .map(|(code, info)| {
                        (
                            code.0,
                            AxisCalibration {
                                lo: info.minimum(),
                                hi: info.maximum(),
                            },
                        )
                    })
                    .collect()
            })
            .unwrap_or_default();

        Ok(EvdevGamepad {
            name: device.name().unwrap_or("").to_string(),
            path: path.to_path_buf(),
            device,
            ranges,
            pending: VecDeque::new(),
        })
    }
}

impl InputDevice for EvdevGamepad {
    fn name(&self) -> &str {
        &self.name
    }

    fn path(&self) -> &Path {
        &self.path
    }

    fn grab(&mut self) -> Result<(), HardwareError> {
        self.device
            .grab()
            .map_err(|e| HardwareError::GrabFailed(e.to_string()))
    }

    fn path_exists(&self) -> bool {
        self.path.exists()
    }

    fn axis_range(&self, code: u16) -> Option<AxisCalibration> {
        self.ranges.get(&code).copied()
    }

    fn read_axis(&mut self, code: u16) -> Option<i32> {
        self.device
            .get_absinfo()
            .ok()?
            .find(|(c, _)| c.0 == code)
            .map(|(_, info)| info.value())
    }

    fn poll_event(&mut self) -> Result<Option<InputEvent>, HardwareError> {
        if self.pending.is_empty() {
            match self.device.fetch_events() {
                Ok(events) => {
                    for ev in events {
                        let kind = if ev.event_type() == EventType::ABSOLUTE {
                            EventKind::Absolute
                        } else if ev.event_type() == EventType::KEY {
                            EventKind::Key
                        } else {
                            EventKind::Other
                        };

                        self.pending.push_back(InputEvent {
                            kind,
                            code: ev.code(),
                            value: ev.value(),
                        });
                    }
                }
                Err(e) if e.kind() == ErrorKind::WouldBlock => (),
                Err(e) => return Err(HardwareError::ReadFailed(e.to_string())),
            }
        }

        let ev = self.pending.pop_front();
        if let Some(ev) = ev {
            trace!("{}: {:?}", self.name, ev);
        }

        Ok(ev)
    }
}
