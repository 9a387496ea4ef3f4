//! # Persisted settings
//!
//! The calibration, motor limits, disconnect command and button commands set over the override
//! channel survive a restart. They are stored as JSON, written to a temporary file and renamed into place so a
//! crash mid-write never leaves a truncated file behind.

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use comms_if::ctrl::{MotorLimits, SteeringAngles, SteeringPulses};
use log::debug;
use serde::{Deserialize, Serialize};
use std::{
    collections::BTreeMap,
    fs,
    io::ErrorKind,
    path::{Path, PathBuf},
    sync::{Mutex, PoisonError},
};
use thiserror::Error;

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

/// Settings restored at start up. Every field is optional, missing fields keep the defaults from
/// the parameter file.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
#[serde(default)]
pub struct PersistedSettings {
    pub motor_limits: Option<MotorLimits>,
    pub steering_angles: Option<SteeringAngles>,
    pub steering_pulses: Option<SteeringPulses>,
    pub disconnect_command: Option<String>,

    /// Button commands keyed by button name.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub button_actions: Option<BTreeMap<String, String>>,
}

/// Store backed by a JSON file.
pub struct JsonFileStore {
    path: PathBuf,
}

/// Store held in memory, nothing survives a restart.
#[derive(Default)]
pub struct MemoryStore {
    saved: Mutex<Option<PersistedSettings>>,
}

// ------------------------------------------------------------------------------------------------
// ENUMS
// ------------------------------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("Could not access the settings file {0:?}: {1}")]
    Io(PathBuf, std::io::Error),

    #[error("Settings file {0:?} is not valid: {1}")]
    Format(PathBuf, serde_json::Error),
}

// ------------------------------------------------------------------------------------------------
// TRAITS
// ------------------------------------------------------------------------------------------------

pub trait SettingsStore: Send + Sync {
    fn load(&self) -> Result<PersistedSettings, SettingsError>;

    fn save(&self, settings: &PersistedSettings) -> Result<(), SettingsError>;
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl JsonFileStore {
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn tmp_path(&self) -> PathBuf {
        let mut name = self.path.file_name().unwrap_or_default().to_os_string();
        name.push(".tmp");
        self.path.with_file_name(name)
    }
}

impl SettingsStore for JsonFileStore {
    /// Load the settings. A missing file gives the default (empty) settings.
    fn load(&self) -> Result<PersistedSettings, SettingsError> {
        let s = match fs::read_to_string(&self.path) {
            Ok(s) => s,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                debug!("No settings file at {:?}", self.path);
                return Ok(PersistedSettings::default());
            }
            Err(e) => return Err(SettingsError::Io(self.path.clone(), e)),
        };

        serde_json::from_str(&s).map_err(|e| SettingsError::Format(self.path.clone(), e))
    }

    fn save(&self, settings: &PersistedSettings) -> Result<(), SettingsError> {
        if let Some(dir) = self.path.parent() {
            fs::create_dir_all(dir).map_err(|e| SettingsError::Io(dir.to_path_buf(), e))?;
        }

        let s = serde_json::to_string_pretty(settings)
            .map_err(|e| SettingsError::Format(self.path.clone(), e))?;

        let tmp = self.tmp_path();
        fs::write(&tmp, s).map_err(|e| SettingsError::Io(tmp.clone(), e))?;
        fs::rename(&tmp, &self.path).map_err(|e| SettingsError::Io(self.path.clone(), e))?;

        debug!("Settings saved to {:?}", self.path);

        Ok(())
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Last settings saved, if any.
    pub fn saved(&self) -> Option<PersistedSettings> {
        self.saved
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl SettingsStore for MemoryStore {
    fn load(&self) -> Result<PersistedSettings, SettingsError> {
        Ok(self.saved().unwrap_or_default())
    }

    fn save(&self, settings: &PersistedSettings) -> Result<(), SettingsError> {
        *self.saved.lock().unwrap_or_else(PoisonError::into_inner) = Some(settings.clone());
        Ok(())
    }
}

// ------------------------------------------------------------------------------------------------
// TESTS
// ------------------------------------------------------------------------------------------------
