//! # Command hooks
//!
//! Shell commands fired by the control loop: the disconnect command, run once every time the
//! gamepad link is lost after the actuators have been neutralised, and the commands assigned to
//! gamepad buttons.

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use log::{info, warn};
use std::{
    process::{Command, Stdio},
    thread,
};

// ------------------------------------------------------------------------------------------------
// TRAITS
// ------------------------------------------------------------------------------------------------

pub trait CommandHook: Send {
    /// Fire the hook with the given command, `None` if nothing is configured. Must not block.
    fn fire(&mut self, command: Option<&str>);
}

impl<F> CommandHook for F
where
    F: FnMut(Option<&str>) + Send,
{
    fn fire(&mut self, command: Option<&str>) {
        self(command)
    }
}

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

/// Runs commands with `sh -c`, without waiting for them.
pub struct ShellHook {
    /// What the commands are for, used in log messages and the reaper thread name.
    purpose: &'static str,
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl ShellHook {
    pub fn new(purpose: &'static str) -> Self {
        Self { purpose }
    }
}

impl Default for ShellHook {
    fn default() -> Self {
        Self::new("disconnect")
    }
}

impl CommandHook for ShellHook {
    fn fire(&mut self, command: Option<&str>) {
        let command = match command {
            Some(c) => c,
            None => return,
        };

        let child = Command::new("sh")
            .arg("-c")
            .arg(command)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn();

        match child {
            Ok(mut child) => {
                info!("{} command started: {}", self.purpose, command);

                // Reap the child when it exits
                let spawned = thread::Builder::new()
                    .name(format!("{}_hook", self.purpose))
                    .spawn(move || child.wait());
                if let Err(e) = spawned {
                    warn!("Could not start {} command reaper: {}", self.purpose, e);
                }
            }
            Err(e) => warn!(
                "Could not run {} command \"{}\": {}",
                self.purpose, command, e
            ),
        }
    }
}

// ------------------------------------------------------------------------------------------------
// TESTS
// ------------------------------------------------------------------------------------------------
