//! Error types for the settings crate.
//!
//! Configuration, firmware settings table and macro library errors.

use cnclink_core::{FirmwareError, GcodeError};
use std::io;
use thiserror::Error;

/// Errors from configuration and the settings table.
#[derive(Error, Debug)]
pub enum SettingsError {
    /// A file could not be loaded.
    #[error("Failed to load settings: {0}")]
    LoadError(String),

    /// A file could not be saved.
    #[error("Failed to save settings: {0}")]
    SaveError(String),

    /// A configuration value is invalid.
    #[error("Invalid setting '{key}': {reason}")]
    InvalidSetting { key: String, reason: String },

    /// The configuration directory could not be found or created.
    #[error("Config directory error: {0}")]
    ConfigDirectory(String),

    /// I/O error during file operations.
    #[error("I/O error: {0}")]
    IoError(#[from] io::Error),

    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),

    /// TOML deserialization error.
    #[error("TOML error: {0}")]
    TomlError(#[from] toml::de::Error),

    /// TOML serialization error.
    #[error("TOML error: {0}")]
    TomlSerError(#[from] toml::ser::Error),

    /// A firmware setting was rejected.
    #[error(transparent)]
    Firmware(#[from] FirmwareError),
}

/// Errors from the macro library.
#[derive(Error, Debug)]
pub enum MacroError {
    /// No macro with this id.
    #[error("Macro not found: {0}")]
    NotFound(String),

    /// Built-in macros cannot be deleted.
    #[error("Macro '{0}' is built in and cannot be deleted")]
    BuiltInProtected(String),

    /// Another macro already uses this name.
    #[error("A macro named '{0}' already exists")]
    DuplicateName(String),

    /// The macro data is invalid.
    #[error("Invalid macro: {0}")]
    InvalidMacro(String),

    /// Reference expansion failed.
    #[error(transparent)]
    Expansion(#[from] GcodeError),

    /// I/O error in the backing store.
    #[error("I/O error: {0}")]
    IoError(#[from] io::Error),

    /// JSON error in the backing store.
    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),
}

/// Result type alias for settings operations.
pub type SettingsResult<T> = Result<T, SettingsError>;

/// Result type alias for macro operations.
pub type MacroResult<T> = Result<T, MacroError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_settings_error_display() {
        let err = SettingsError::InvalidSetting {
            key: "connection.baud_rate".to_string(),
            reason: "must be positive".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "Invalid setting 'connection.baud_rate': must be positive"
        );

        let err = SettingsError::ConfigDirectory("permission denied".to_string());
        assert_eq!(err.to_string(), "Config directory error: permission denied");
    }

    #[test]
    fn test_macro_error_display() {
        let err = MacroError::BuiltInProtected("home".to_string());
        assert_eq!(
            err.to_string(),
            "Macro 'home' is built in and cannot be deleted"
        );

        let err: MacroError = GcodeError::MacroDepthExceeded { max_depth: 8 }.into();
        assert_eq!(err.to_string(), "Macro nesting exceeds maximum depth of 8");
    }

    #[test]
    fn test_error_conversion() {
        let io_err = io::Error::new(io::ErrorKind::NotFound, "file not found");
        let settings_err: SettingsError = io_err.into();
        assert!(matches!(settings_err, SettingsError::IoError(_)));

        let fw_err = FirmwareError::SettingNotAvailable {
            setting: "laser_mode".to_string(),
            firmware: "FluidNC".to_string(),
        };
        let settings_err: SettingsError = fw_err.into();
        assert!(matches!(settings_err, SettingsError::Firmware(_)));
    }
}
