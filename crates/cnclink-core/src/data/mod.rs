//! Data models for positions, machine state and status snapshots
//!
//! This module provides:
//! - Three-axis positions in machine or work coordinates
//! - The firmware-reported machine state machine
//! - Input pin flags decoded from status reports
//! - Immutable status snapshots published by the controller
//! - Stream progress and fault records
//! - Firmware family identification

pub mod firmware;
pub mod stream;

pub use firmware::{Firmware, FirmwareInfo};
pub use stream::{LineAck, StreamProgress, StreamingError};

use bitflags::bitflags;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Machine coordinate units (millimeters or inches)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum Units {
    /// Millimeters (metric), `G21`
    #[default]
    MM,
    /// Inches (imperial), `G20`
    INCH,
}

impl fmt::Display for Units {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Units::MM => write!(f, "mm"),
            Units::INCH => write!(f, "in"),
        }
    }
}

/// Position in 3D space
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Position {
    /// X-axis position
    pub x: f64,
    /// Y-axis position
    pub y: f64,
    /// Z-axis position
    pub z: f64,
}

impl Position {
    /// Create a new position with X, Y, Z coordinates
    pub const fn new(x: f64, y: f64, z: f64) -> Self {
        Self { x, y, z }
    }

    /// Calculate distance to another position
    pub fn distance_to(&self, other: &Position) -> f64 {
        let dx = self.x - other.x;
        let dy = self.y - other.y;
        let dz = self.z - other.z;
        (dx * dx + dy * dy + dz * dz).sqrt()
    }

    /// Add another position (component-wise)
    pub fn add(&self, other: &Position) -> Self {
        Self::new(self.x + other.x, self.y + other.y, self.z + other.z)
    }

    /// Subtract another position (component-wise)
    pub fn subtract(&self, other: &Position) -> Self {
        Self::new(self.x - other.x, self.y - other.y, self.z - other.z)
    }

    /// Coordinates as an array, X first
    pub fn as_array(&self) -> [f64; 3] {
        [self.x, self.y, self.z]
    }
}

impl fmt::Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "X:{:.3} Y:{:.3} Z:{:.3}", self.x, self.y, self.z)
    }
}

/// Machine state as reported by the firmware
///
/// Gates every motion-issuing operation. `Unknown` covers both the time
/// before the first status report and any state string that does not parse.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum MachineState {
    /// No report yet, or unparseable
    #[default]
    Unknown,
    /// Ready for commands
    Idle,
    /// Executing motion
    Run,
    /// Feed hold in effect
    Hold,
    /// Jogging
    Jog,
    /// Alarm lock; motion refused until unlock or homing
    Alarm,
    /// Safety door open
    Door,
    /// G-code check mode
    Check,
    /// Homing cycle
    Home,
    /// Sleep mode
    Sleep,
}

impl MachineState {
    /// Whether a program stream may start in this state
    pub fn allows_streaming(&self) -> bool {
        matches!(self, MachineState::Idle)
    }

    /// Whether a jog may be issued in this state
    pub fn allows_jog(&self) -> bool {
        matches!(self, MachineState::Idle | MachineState::Jog)
    }

    /// Whether homing may be started in this state
    pub fn allows_homing(&self) -> bool {
        matches!(self, MachineState::Idle | MachineState::Alarm)
    }

    /// Whether the machine is moving or about to move
    pub fn is_moving(&self) -> bool {
        matches!(
            self,
            MachineState::Run | MachineState::Jog | MachineState::Home
        )
    }

    /// Check if a transition from this state to `target` is expected.
    ///
    /// The device is authoritative, so an unexpected transition is still
    /// applied; callers only log it.
    ///
    /// - Unknown can enter Idle, Alarm, Home, Check or Sleep
    /// - Any state can fall into Alarm
    /// - Alarm leaves only towards Idle (unlock) or Home (homing)
    pub fn can_transition_to(&self, target: MachineState) -> bool {
        use MachineState::*;
        if *self == target {
            return true;
        }
        match (self, target) {
            (_, Alarm) => true,
            (_, Unknown) => true,
            (Unknown, Idle | Home | Check | Sleep) => true,
            (Unknown, _) => false,
            (Alarm, Idle | Home) => true,
            (Alarm, _) => false,
            (Idle, _) => true,
            (Run, Hold | Idle | Door | Check) => true,
            (Hold, Run | Idle | Door) => true,
            (Jog, Idle | Run | Hold | Door) => true,
            (Door, Hold | Idle | Run) => true,
            (Home, Idle) => true,
            (Check, Idle | Run) => true,
            (Sleep, Idle) => true,
            _ => false,
        }
    }

    /// Wire name as the firmware prints it
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Unknown => "Unknown",
            Self::Idle => "Idle",
            Self::Run => "Run",
            Self::Hold => "Hold",
            Self::Jog => "Jog",
            Self::Alarm => "Alarm",
            Self::Door => "Door",
            Self::Check => "Check",
            Self::Home => "Home",
            Self::Sleep => "Sleep",
        }
    }
}

impl fmt::Display for MachineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

bitflags! {
    /// Input pins reported in the `Pn:` field of a status report
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
    pub struct InputPins: u8 {
        /// `X`
        const X_LIMIT = 1 << 0;
        /// `Y`
        const Y_LIMIT = 1 << 1;
        /// `Z`
        const Z_LIMIT = 1 << 2;
        /// `P`
        const PROBE = 1 << 3;
        /// `D`
        const DOOR = 1 << 4;
        /// `H`
        const HOLD = 1 << 5;
        /// `R`
        const SOFT_RESET = 1 << 6;
        /// `S`
        const CYCLE_START = 1 << 7;
    }
}

impl InputPins {
    const LETTERS: [(char, InputPins); 8] = [
        ('X', InputPins::X_LIMIT),
        ('Y', InputPins::Y_LIMIT),
        ('Z', InputPins::Z_LIMIT),
        ('P', InputPins::PROBE),
        ('D', InputPins::DOOR),
        ('H', InputPins::HOLD),
        ('R', InputPins::SOFT_RESET),
        ('S', InputPins::CYCLE_START),
    ];

    /// Decode a `Pn:` field value. Unknown letters are ignored.
    pub fn from_letters(letters: &str) -> Self {
        letters
            .chars()
            .filter_map(|c| {
                Self::LETTERS
                    .iter()
                    .find(|(letter, _)| *letter == c.to_ascii_uppercase())
                    .map(|(_, pin)| *pin)
            })
            .fold(InputPins::empty(), |acc, pin| acc | pin)
    }

    /// Encode back to the letters the firmware would print
    pub fn to_letters(&self) -> String {
        Self::LETTERS
            .iter()
            .filter(|(_, pin)| self.contains(*pin))
            .map(|(letter, _)| *letter)
            .collect()
    }
}

/// Immutable machine status snapshot
///
/// Replaced wholesale on every status poll; never mutated in place once
/// published.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MachineStatus {
    /// Machine state
    pub state: MachineState,
    /// Sub-state code (`Hold:0`, `Door:1`), when reported
    pub sub_state: Option<u8>,
    /// Machine position
    pub machine_pos: Position,
    /// Work position
    pub work_pos: Position,
    /// Last known work coordinate offset
    pub work_offset: Option<Position>,
    /// Current feed rate
    pub feed_rate: f64,
    /// Current spindle speed
    pub spindle_speed: f64,
    /// Feed override percentage
    pub feed_override: u8,
    /// Rapid override percentage
    pub rapid_override: u8,
    /// Spindle override percentage
    pub spindle_override: u8,
    /// Active input pins
    pub pins: InputPins,
    /// Planner blocks available, when `Bf:` is reported
    pub planner_blocks_free: Option<u16>,
    /// RX bytes available, when `Bf:` is reported
    pub rx_bytes_free: Option<u16>,
}

impl Default for MachineStatus {
    fn default() -> Self {
        Self {
            state: MachineState::Unknown,
            sub_state: None,
            machine_pos: Position::default(),
            work_pos: Position::default(),
            work_offset: None,
            feed_rate: 0.0,
            spindle_speed: 0.0,
            feed_override: 100,
            rapid_override: 100,
            spindle_override: 100,
            pins: InputPins::empty(),
            planner_blocks_free: None,
            rx_bytes_free: None,
        }
    }
}

impl fmt::Display for MachineStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} MPos[{}] WPos[{}] F{:.0} S{:.0}",
            self.state, self.machine_pos, self.work_pos, self.feed_rate, self.spindle_speed
        )
    }
}

/// Entry of the work-offset table reported by `$#`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkOffset {
    /// Register name, such as `G54`, `G28` or `G92`
    pub name: String,
    /// Offset value
    pub offset: Position,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pin_letters() {
        let pins = InputPins::from_letters("XZP");
        assert!(pins.contains(InputPins::X_LIMIT));
        assert!(pins.contains(InputPins::Z_LIMIT));
        assert!(pins.contains(InputPins::PROBE));
        assert!(!pins.contains(InputPins::Y_LIMIT));
        assert!(!pins.contains(InputPins::DOOR));
        assert_eq!(pins.to_letters(), "XZP");
    }

    #[test]
    fn test_pin_letters_ignore_garbage() {
        assert_eq!(InputPins::from_letters("Q?7"), InputPins::empty());
    }

    #[test]
    fn test_alarm_transitions() {
        assert!(MachineState::Run.can_transition_to(MachineState::Alarm));
        assert!(MachineState::Alarm.can_transition_to(MachineState::Idle));
        assert!(MachineState::Alarm.can_transition_to(MachineState::Home));
        assert!(!MachineState::Alarm.can_transition_to(MachineState::Run));
        assert!(!MachineState::Unknown.can_transition_to(MachineState::Run));
    }

    #[test]
    fn test_state_gating() {
        assert!(MachineState::Idle.allows_streaming());
        assert!(!MachineState::Jog.allows_streaming());
        assert!(MachineState::Jog.allows_jog());
        assert!(!MachineState::Alarm.allows_jog());
        assert!(MachineState::Alarm.allows_homing());
    }

    #[test]
    fn test_default_overrides() {
        let status = MachineStatus::default();
        assert_eq!(status.state, MachineState::Unknown);
        assert_eq!(status.feed_override, 100);
        assert_eq!(status.rapid_override, 100);
        assert_eq!(status.spindle_override, 100);
    }
}
