use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::io::{IoError, Parity, SerialConfig};

const APP_DIR_NAME: &str = "nearfield";
const SETTINGS_FILE_NAME: &str = "config.toml";

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct Settings {
    #[serde(default)]
    pub port: String,
    #[serde(default = "default_baud_rate")]
    pub baud_rate: u32,
    #[serde(default = "default_data_bits")]
    pub data_bits: u8,
    #[serde(default = "default_stop_bits")]
    pub stop_bits: u8,
    #[serde(default)]
    pub parity: Parity,
    #[serde(default = "default_read_timeout_ms")]
    pub read_timeout_ms: u64, // port thread poll interval
    #[serde(default = "default_command_timeout_ms")]
    pub command_timeout_ms: u64, // 0 = wait forever
    #[serde(default = "default_echo_device_log")]
    pub echo_device_log: bool,
    #[serde(default)]
    pub log_dir: Option<PathBuf>,
}

fn default_baud_rate() -> u32 {
    115_200
}
fn default_data_bits() -> u8 {
    8
}
fn default_stop_bits() -> u8 {
    1
}
fn default_read_timeout_ms() -> u64 {
    50
}
fn default_command_timeout_ms() -> u64 {
    5_000
}
fn default_echo_device_log() -> bool {
    true
}

impl Default for Settings {
    fn default() -> Self {
        Settings {
            port: String::new(),
            baud_rate: default_baud_rate(),
            data_bits: default_data_bits(),
            stop_bits: default_stop_bits(),
            parity: Parity::default(),
            read_timeout_ms: default_read_timeout_ms(),
            command_timeout_ms: default_command_timeout_ms(),
            echo_device_log: default_echo_device_log(),
            log_dir: None,
        }
    }
}

impl Settings {
    /// Platform config location, e.g. `~/.config/nearfield/config.toml`
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join(APP_DIR_NAME).join(SETTINGS_FILE_NAME))
    }

    pub fn load(path: &Path) -> Result<Self, IoError> {
        let text = std::fs::read_to_string(path).map_err(|e| {
            IoError::configuration(format!("failed to read {}: {}", path.display(), e))
        })?;
        let settings: Settings = toml::from_str(&text).map_err(|e| {
            IoError::configuration(format!("failed to parse {}: {}", path.display(), e))
        })?;
        settings.validate()?;
        Ok(settings)
    }

    /// Load `path` if given, else the default location if it exists, else
    /// built-in defaults. An explicitly given path must exist.
    pub fn load_or_default(path: Option<&Path>) -> Result<Self, IoError> {
        if let Some(path) = path {
            return Self::load(path);
        }
        match Self::default_path() {
            Some(path) if path.exists() => Self::load(&path),
            _ => Ok(Settings::default()),
        }
    }

    pub fn save(&self, path: &Path) -> Result<(), IoError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                IoError::configuration(format!("failed to create {}: {}", parent.display(), e))
            })?;
        }
        std::fs::write(path, self.to_toml()?).map_err(|e| {
            IoError::configuration(format!("failed to write {}: {}", path.display(), e))
        })
    }

    pub fn to_toml(&self) -> Result<String, IoError> {
        toml::to_string_pretty(self)
            .map_err(|e| IoError::configuration(format!("failed to serialise settings: {}", e)))
    }

    /// Check the serial framing values. The port may still be empty here;
    /// `serial_config` requires it.
    pub fn validate(&self) -> Result<(), IoError> {
        if self.baud_rate == 0 {
            return Err(IoError::configuration("baud_rate must be greater than 0"));
        }
        if !(5..=8).contains(&self.data_bits) {
            return Err(IoError::configuration(format!(
                "data_bits must be 5-8, got {}",
                self.data_bits
            )));
        }
        if !(1..=2).contains(&self.stop_bits) {
            return Err(IoError::configuration(format!(
                "stop_bits must be 1 or 2, got {}",
                self.stop_bits
            )));
        }
        if self.read_timeout_ms == 0 {
            return Err(IoError::configuration("read_timeout_ms must be greater than 0"));
        }
        Ok(())
    }

    pub fn serial_config(&self) -> Result<SerialConfig, IoError> {
        self.validate()?;
        if self.port.trim().is_empty() {
            return Err(IoError::configuration("no serial port configured"));
        }
        Ok(SerialConfig {
            port: self.port.clone(),
            baud_rate: self.baud_rate,
            data_bits: self.data_bits,
            stop_bits: self.stop_bits,
            parity: self.parity,
            read_timeout: Duration::from_millis(self.read_timeout_ms),
        })
    }

    pub fn command_timeout(&self) -> Option<Duration> {
        match self.command_timeout_ms {
            0 => None,
            ms => Some(Duration::from_millis(ms)),
        }
    }
}
