//! Generic logger utility functions
//!
//! Messages go to the terminal and to the session log file, each with its own level. The control
//! loop's per-tick traces are usually only wanted in the file, or not at all.

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

// External imports
use colored::{ColoredString, Colorize};
use log::{self, info};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;

// Internal imports
use crate::session;

// Re-exports
pub use log::LevelFilter;

// ---------------------------------------------------------------------------
// DATA STRUCTURES
// ---------------------------------------------------------------------------

/// Logging parameters, normally the `[log]` table of an executable's parameter file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogParams {
    /// Level of messages printed to the terminal.
    pub stdout_level: LevelFilter,

    /// Level of messages written to the session log file, `info` or more verbose.
    pub file_level: LevelFilter,

    /// Per module levels applied to both outputs, e.g. `"trike_lib::ctrl_loop" = "trace"`.
    pub module_levels: BTreeMap<String, LevelFilter>,
}

// ---------------------------------------------------------------------------
// ENUMERATIONS
// ---------------------------------------------------------------------------

/// Errors associated with initialising the logger.
#[derive(Debug, Error)]
pub enum LoggerInitError {
    #[error("Expected a log file level of at least `INFO`, found `{0}`")]
    InvalidMinLogLevel(log::LevelFilter),

    #[error("Error initialising the log file: {0}")]
    LogFileInitError(std::io::Error),

    #[error("An error occured while setting up the logger: {0}")]
    FernInitError(log::SetLoggerError),
}

// ---------------------------------------------------------------------------
// IMPLEMENTATIONS
// ---------------------------------------------------------------------------

impl Default for LogParams {
    fn default() -> Self {
        Self {
            stdout_level: LevelFilter::Info,
            file_level: LevelFilter::Debug,
            module_levels: BTreeMap::new(),
        }
    }
}

impl LogParams {
    /// Level filter for one output, with the module overrides applied.
    fn sink(&self, level: LevelFilter) -> fern::Dispatch {
        self.module_levels.iter().fold(
            fern::Dispatch::new()
                .level(level)
                .level_for("zmq", LevelFilter::Info),
            |d, (module, l)| d.level_for(module.clone(), *l),
        )
    }
}

// ---------------------------------------------------------------------------
// PUBLIC FUNCTIONS
// ---------------------------------------------------------------------------

/// Initialise the logger for this execution.
///
/// # Notes
///
/// - The file level must be `Info` or more verbose, so the session log always has the start up
///   and link messages.
///
/// # Safety
///
/// - This function must only be called once to prevent corrupting logs.
pub fn logger_init(params: &LogParams, session: &session::Session) -> Result<(), LoggerInitError> {
    if params.file_level < log::Level::Info {
        return Err(LoggerInitError::InvalidMinLogLevel(params.file_level));
    }

    let log_file =
        fern::log_file(session.log_file_path.clone()).map_err(LoggerInitError::LogFileInitError)?;

    fern::Dispatch::new()
        .format(|out, message, record| {
            // If debug or trace include the target, otherwise don't include it
            if record.level() > log::Level::Info {
                out.finish(format_args!(
                    "[{:10.6} {}] {}: {}",
                    session::get_elapsed_seconds(),
                    level_to_str(record.level()),
                    record.target(),
                    message
                ))
            } else {
                out.finish(format_args!(
                    "[{:10.6} {}] {}",
                    session::get_elapsed_seconds(),
                    level_to_str(record.level()),
                    message
                ))
            }
        })
        .chain(params.sink(params.stdout_level).chain(std::io::stdout()))
        .chain(params.sink(params.file_level).chain(log_file))
        .apply()
        .map_err(LoggerInitError::FernInitError)?;

    info!("Logging initialised");
    if let Some(epoch) = session::get_epoch() {
        info!("    Session epoch: {}", epoch);
    }
    info!("    Terminal level: {:?}", params.stdout_level);
    info!("    File level: {:?}", params.file_level);
    for (module, level) in &params.module_levels {
        info!("    {}: {:?}", module, level);
    }
    info!("    Log file path: {:?}", session.log_file_path);

    Ok(())
}

// ---------------------------------------------------------------------------
// PRIVATE FUNCTIONS
// ---------------------------------------------------------------------------

/// Get the string representation of a log level
fn level_to_str(level: log::Level) -> ColoredString {
    match level {
        log::Level::Trace => "TRC".dimmed().italic(),
        log::Level::Debug => "DBG".dimmed(),
        log::Level::Info => "INF".normal(),
        log::Level::Warn => "WRN".yellow(),
        log::Level::Error => "ERR".red().bold(),
    }
}

// ---------------------------------------------------------------------------
// TESTS
// ---------------------------------------------------------------------------

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_log_params() {
        let p: LogParams = crate::params::from_str(
            r#"
            stdout_level = "warn"

            [module_levels]
            "trike_lib::ctrl_loop" = "trace"
            "#,
        )
        .unwrap();

        assert_eq!(p.stdout_level, LevelFilter::Warn);
        assert_eq!(p.file_level, LevelFilter::Debug);
        assert_eq!(
            p.module_levels.get("trike_lib::ctrl_loop"),
            Some(&LevelFilter::Trace)
        );
    }
}
