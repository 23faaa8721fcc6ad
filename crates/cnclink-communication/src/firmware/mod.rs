//! Firmware protocol support
//!
//! Supported controllers:
//! - GRBL 1.1
//! - grblHAL
//! - FluidNC
//!
//! All three speak the GRBL line protocol; detection picks the family so
//! status aliases and the settings dialect can be selected.

pub mod firmware_detector;
pub mod grbl;
pub mod override_manager;
pub mod realtime;

pub use firmware_detector::{detect_firmware, info_from_banner, is_banner};
pub use override_manager::{
    override_sequence, validate_override, OverrideState, OverrideTarget, RapidOverrideLevel,
};
pub use realtime::RealtimeCommand;
