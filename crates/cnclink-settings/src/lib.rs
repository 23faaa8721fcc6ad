//! # cnclink Settings
//!
//! Application configuration, the firmware-agnostic settings table and the
//! macro library.

pub mod config;
pub mod error;
pub mod macros;
pub mod unified;

pub use config::{Config, ConnectionSettings, MacroSettings, SimulatorSettings};
pub use error::{MacroError, MacroResult, SettingsError, SettingsResult};
pub use macros::{
    InMemoryMacroStore, JsonFileMacroStore, Macro, MacroManager, MacroStore, MAX_MACRO_DEPTH,
};
pub use unified::{SettingCategory, SettingDiff, SettingType, UnifiedSetting, UnifiedSettingsMap};
