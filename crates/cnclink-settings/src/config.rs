//! Application configuration
//!
//! Configuration file handling and validation. Files are JSON or TOML,
//! selected by extension, and live in the platform config directory by
//! default (`<config_dir>/cnclink/config.toml`).
//!
//! Sections:
//! - Connection settings (port, baud rate, controller tuning)
//! - Simulator settings (firmware flavour, boot state)
//! - Macro library location

use crate::error::{SettingsError, SettingsResult};
use cnclink_communication::{ControllerConfig, SimulatorConfig};
use cnclink_core::constants::{
    DEFAULT_BAUD_RATE, DEFAULT_EVENT_QUEUE_CAPACITY, DEFAULT_STATUS_POLL_MS, MAX_MISSED_STATUS,
    MAX_STATUS_POLL_MS, MIN_STATUS_POLL_MS, RX_BUFFER_SIZE,
};
use cnclink_core::Firmware;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

const APP_DIR: &str = "cnclink";

/// Connection settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectionSettings {
    /// Last used serial port; empty when none
    pub port: String,
    /// Baud rate for serial connections
    pub baud_rate: u32,
    /// Status poll interval in milliseconds (50-200)
    pub status_poll_ms: u64,
    /// Firmware RX buffer size in bytes
    pub rx_buffer_size: usize,
    /// Connect handshake timeout in milliseconds
    pub handshake_timeout_ms: u64,
    /// Consecutive missed status replies before disconnecting
    pub max_missed_status: u32,
    /// Bound of the controller event queue
    pub event_queue_capacity: usize,
    /// IO loop period in milliseconds
    pub io_tick_ms: u64,
}

impl Default for ConnectionSettings {
    fn default() -> Self {
        Self {
            port: String::new(),
            baud_rate: DEFAULT_BAUD_RATE,
            status_poll_ms: DEFAULT_STATUS_POLL_MS,
            rx_buffer_size: RX_BUFFER_SIZE,
            handshake_timeout_ms: 2500,
            max_missed_status: MAX_MISSED_STATUS,
            event_queue_capacity: DEFAULT_EVENT_QUEUE_CAPACITY,
            io_tick_ms: 5,
        }
    }
}

/// Simulator settings
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulatorSettings {
    /// Firmware family to imitate
    pub firmware: Firmware,
    /// Boot locked in alarm
    pub start_in_alarm: bool,
}

/// Macro library settings
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct MacroSettings {
    /// Macro store file; the config directory is used when unset
    #[serde(skip_serializing_if = "Option::is_none")]
    pub store_path: Option<PathBuf>,
}

impl MacroSettings {
    /// Resolved path of the macro JSON store
    pub fn resolve_store_path(&self) -> SettingsResult<PathBuf> {
        match &self.store_path {
            Some(path) => Ok(path.clone()),
            None => Ok(Config::config_dir()?.join("macros.json")),
        }
    }
}

/// Complete application configuration
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Connection settings
    pub connection: ConnectionSettings,
    /// Simulator settings
    pub simulator: SimulatorSettings,
    /// Macro library
    pub macros: MacroSettings,
}

impl Config {
    /// Create new config with defaults
    pub fn new() -> Self {
        Self::default()
    }

    /// `<config_dir>/cnclink`
    pub fn config_dir() -> SettingsResult<PathBuf> {
        dirs::config_dir()
            .map(|dir| dir.join(APP_DIR))
            .ok_or_else(|| {
                SettingsError::ConfigDirectory("no configuration directory on this platform".into())
            })
    }

    /// Default config file location
    pub fn default_path() -> SettingsResult<PathBuf> {
        Ok(Self::config_dir()?.join("config.toml"))
    }

    /// Load config from file (JSON or TOML)
    pub fn load_from_file(path: &Path) -> SettingsResult<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            SettingsError::LoadError(format!("{}: {}", path.display(), e))
        })?;

        let config: Self = match Format::of(path)? {
            Format::Json => serde_json::from_str(&content)?,
            Format::Toml => toml::from_str(&content)?,
        };

        config.validate()?;
        tracing::debug!("Loaded configuration from {}", path.display());
        Ok(config)
    }

    /// Load config from file, or defaults when the file does not exist
    pub fn load_or_default(path: &Path) -> SettingsResult<Self> {
        if path.exists() {
            Self::load_from_file(path)
        } else {
            tracing::info!("No configuration at {}, using defaults", path.display());
            Ok(Self::default())
        }
    }

    /// Save config to file (JSON or TOML), creating parent directories
    pub fn save_to_file(&self, path: &Path) -> SettingsResult<()> {
        self.validate()?;

        let content = match Format::of(path)? {
            Format::Json => serde_json::to_string_pretty(self)?,
            Format::Toml => toml::to_string_pretty(self)?,
        };

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| {
                SettingsError::ConfigDirectory(format!("{}: {}", parent.display(), e))
            })?;
        }
        std::fs::write(path, content)
            .map_err(|e| SettingsError::SaveError(format!("{}: {}", path.display(), e)))?;

        tracing::debug!("Saved configuration to {}", path.display());
        Ok(())
    }

    /// Validate configuration
    pub fn validate(&self) -> SettingsResult<()> {
        let connection = &self.connection;
        if connection.baud_rate == 0 {
            return Err(invalid("connection.baud_rate", "must be > 0"));
        }
        if !(MIN_STATUS_POLL_MS..=MAX_STATUS_POLL_MS).contains(&connection.status_poll_ms) {
            return Err(invalid(
                "connection.status_poll_ms",
                &format!("must be {}-{}", MIN_STATUS_POLL_MS, MAX_STATUS_POLL_MS),
            ));
        }
        if connection.rx_buffer_size == 0 {
            return Err(invalid("connection.rx_buffer_size", "must be > 0"));
        }
        if connection.handshake_timeout_ms == 0 {
            return Err(invalid("connection.handshake_timeout_ms", "must be > 0"));
        }
        if connection.max_missed_status == 0 {
            return Err(invalid("connection.max_missed_status", "must be > 0"));
        }
        if connection.event_queue_capacity == 0 {
            return Err(invalid("connection.event_queue_capacity", "must be > 0"));
        }
        if connection.io_tick_ms == 0 {
            return Err(invalid("connection.io_tick_ms", "must be > 0"));
        }
        Ok(())
    }

    /// Controller tuning taken from the connection section
    pub fn controller_config(&self) -> ControllerConfig {
        let connection = &self.connection;
        ControllerConfig {
            rx_buffer_size: connection.rx_buffer_size,
            status_poll_ms: connection.status_poll_ms,
            handshake_timeout_ms: connection.handshake_timeout_ms,
            max_missed_status: connection.max_missed_status,
            event_queue_capacity: connection.event_queue_capacity,
            io_tick_ms: connection.io_tick_ms,
        }
        .normalized()
    }

    /// Simulator settings, RX buffer shared with the connection section
    pub fn simulator_config(&self) -> SimulatorConfig {
        SimulatorConfig {
            firmware: self.simulator.firmware,
            start_in_alarm: self.simulator.start_in_alarm,
            rx_buffer_size: self.connection.rx_buffer_size,
            ..SimulatorConfig::default()
        }
    }
}

enum Format {
    Json,
    Toml,
}

impl Format {
    fn of(path: &Path) -> SettingsResult<Self> {
        match path.extension().and_then(|ext| ext.to_str()) {
            Some("json") => Ok(Format::Json),
            Some("toml") => Ok(Format::Toml),
            _ => Err(SettingsError::InvalidSetting {
                key: path.display().to_string(),
                reason: "config file must be .json or .toml".to_string(),
            }),
        }
    }
}

fn invalid(key: &str, reason: &str) -> SettingsError {
    SettingsError::InvalidSetting {
        key: key.to_string(),
        reason: reason.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_validate() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.connection.baud_rate, 115_200);
        assert_eq!(config.connection.max_missed_status, 10);
        assert_eq!(config.controller_config(), ControllerConfig::default());
    }

    #[test]
    fn test_poll_interval_out_of_range() {
        let mut config = Config::default();
        config.connection.status_poll_ms = 20;
        assert!(matches!(
            config.validate(),
            Err(SettingsError::InvalidSetting { key, .. }) if key == "connection.status_poll_ms"
        ));
    }

    #[test]
    fn test_partial_toml_fills_defaults() {
        let config: Config = toml::from_str(
            r#"
            [connection]
            port = "/dev/ttyUSB0"

            [simulator]
            firmware = "FluidNc"
            "#,
        )
        .unwrap();
        assert_eq!(config.connection.port, "/dev/ttyUSB0");
        assert_eq!(config.connection.baud_rate, 115_200);
        assert_eq!(config.simulator.firmware, Firmware::FluidNc);
        assert_eq!(config.simulator_config().firmware, Firmware::FluidNc);
    }

    #[test]
    fn test_unknown_extension_rejected() {
        let err = Config::default()
            .save_to_file(Path::new("settings.yaml"))
            .unwrap_err();
        assert!(matches!(err, SettingsError::InvalidSetting { .. }));
    }
}
