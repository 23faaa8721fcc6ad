//! Firmware family identification.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Supported firmware families
///
/// The family selects status-report aliases and the settings wire dialect.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum Firmware {
    /// Classic GRBL 1.1
    #[default]
    Grbl,
    /// grblHAL
    GrblHal,
    /// FluidNC (ESP32)
    FluidNc,
}

impl Firmware {
    /// All supported families
    pub const ALL: [Firmware; 3] = [Firmware::Grbl, Firmware::GrblHal, Firmware::FluidNc];

    /// Whether settings are addressed by path (`$/axes/x/...`) rather than number
    pub fn uses_path_settings(&self) -> bool {
        match self {
            Firmware::Grbl | Firmware::GrblHal => false,
            Firmware::FluidNc => true,
        }
    }

    /// Display name
    pub fn name(&self) -> &'static str {
        match self {
            Firmware::Grbl => "GRBL",
            Firmware::GrblHal => "grblHAL",
            Firmware::FluidNc => "FluidNC",
        }
    }
}

impl fmt::Display for Firmware {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl std::str::FromStr for Firmware {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "grbl" => Ok(Firmware::Grbl),
            "grblhal" => Ok(Firmware::GrblHal),
            "fluidnc" => Ok(Firmware::FluidNc),
            other => Err(format!("unknown firmware '{}'", other)),
        }
    }
}

/// What the connected firmware told us about itself
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct FirmwareInfo {
    /// Firmware family
    pub firmware: Firmware,
    /// Version string, such as `1.1h` or `3.7.10`
    pub version: String,
    /// Welcome banner as received
    pub banner: String,
    /// Build option letters from `[OPT:...]`
    pub options: String,
    /// RX buffer size reported by `[OPT:...]`
    pub rx_buffer: Option<usize>,
}

impl fmt::Display for FirmwareInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.firmware, self.version)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_firmware_from_str() {
        assert_eq!("fluidnc".parse::<Firmware>(), Ok(Firmware::FluidNc));
        assert_eq!("GrblHAL".parse::<Firmware>(), Ok(Firmware::GrblHal));
        assert!("marlin".parse::<Firmware>().is_err());
    }

    #[test]
    fn test_path_dialect() {
        assert!(Firmware::FluidNc.uses_path_settings());
        assert!(!Firmware::GrblHal.uses_path_settings());
    }
}
