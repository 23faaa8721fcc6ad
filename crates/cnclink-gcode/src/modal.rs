//! Modal-state scanning
//!
//! Replays the modal codes of a program prefix to find the registers in
//! effect immediately before a given line, and builds the preamble that
//! restores them when a program is resumed mid-way.
//!
//! Only modal registers are tracked; motion and arc geometry are ignored.
//! Unknown codes are skipped. `M2`/`M30` do not reset the registers here:
//! a program that continues after its end is replayed as written.

use cnclink_communication::firmware::grbl::utils::{format_number, words};
use cnclink_core::Units;
use serde::{Deserialize, Serialize};
use std::fmt;

/// `G90` / `G91`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum DistanceMode {
    /// `G90`
    #[default]
    Absolute,
    /// `G91`
    Incremental,
}

impl DistanceMode {
    /// The G-code selecting this mode
    pub fn code(&self) -> &'static str {
        match self {
            DistanceMode::Absolute => "G90",
            DistanceMode::Incremental => "G91",
        }
    }
}

/// Work coordinate system `G54`..`G59`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum CoordinateSystem {
    /// `G54`
    #[default]
    G54,
    /// `G55`
    G55,
    /// `G56`
    G56,
    /// `G57`
    G57,
    /// `G58`
    G58,
    /// `G59`
    G59,
}

impl CoordinateSystem {
    const ALL: [CoordinateSystem; 6] = [
        CoordinateSystem::G54,
        CoordinateSystem::G55,
        CoordinateSystem::G56,
        CoordinateSystem::G57,
        CoordinateSystem::G58,
        CoordinateSystem::G59,
    ];

    /// The G-code selecting this system
    pub fn code(&self) -> &'static str {
        match self {
            CoordinateSystem::G54 => "G54",
            CoordinateSystem::G55 => "G55",
            CoordinateSystem::G56 => "G56",
            CoordinateSystem::G57 => "G57",
            CoordinateSystem::G58 => "G58",
            CoordinateSystem::G59 => "G59",
        }
    }

    /// Look up by G number (54..=59)
    pub fn from_number(number: u32) -> Option<Self> {
        number
            .checked_sub(54)
            .and_then(|i| Self::ALL.get(i as usize).copied())
    }
}

impl fmt::Display for CoordinateSystem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

/// `M3` / `M4` / `M5`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum SpindleState {
    /// `M5`
    #[default]
    Off,
    /// `M3`
    Clockwise,
    /// `M4`
    CounterClockwise,
}

impl SpindleState {
    /// The M-code selecting this state
    pub fn code(&self) -> &'static str {
        match self {
            SpindleState::Off => "M5",
            SpindleState::Clockwise => "M3",
            SpindleState::CounterClockwise => "M4",
        }
    }
}

/// `M7` / `M8` / `M9`
///
/// One register: the last of `M7`, `M8` or `M9` wins.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum CoolantState {
    /// `M9`
    #[default]
    Off,
    /// `M7`
    Mist,
    /// `M8`
    Flood,
}

impl CoolantState {
    /// The M-code selecting this state
    pub fn code(&self) -> &'static str {
        match self {
            CoolantState::Off => "M9",
            CoolantState::Mist => "M7",
            CoolantState::Flood => "M8",
        }
    }
}

/// Modal registers in effect at a point in a program
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct ModalState {
    /// `G90` / `G91`
    pub distance_mode: DistanceMode,
    /// `G54`..`G59`
    pub coordinate_system: CoordinateSystem,
    /// `G21` / `G20`
    pub units: Units,
    /// `M3` / `M4` / `M5`
    pub spindle_state: SpindleState,
    /// `M7` / `M8` / `M9`
    pub coolant_state: CoolantState,
    /// Last `F` word, in program units
    pub feed_rate: f64,
    /// Last `S` word
    pub spindle_speed: f64,
}

impl ModalState {
    /// Apply the modal words of one line
    pub fn apply_line(&mut self, line: &str) {
        // `$J=G91 ...` and other system commands carry no program state
        if line.trim_start().starts_with('$') {
            return;
        }
        for word in words(line) {
            match word.letter {
                'G' => self.apply_g(word.value),
                'M' => self.apply_m(word.value),
                'F' if word.value >= 0.0 => self.feed_rate = word.value,
                'S' if word.value >= 0.0 => self.spindle_speed = word.value,
                _ => {}
            }
        }
    }

    fn apply_g(&mut self, value: f64) {
        let Some(code) = whole_code(value) else {
            return;
        };
        match code {
            20 => self.units = Units::INCH,
            21 => self.units = Units::MM,
            90 => self.distance_mode = DistanceMode::Absolute,
            91 => self.distance_mode = DistanceMode::Incremental,
            54..=59 => {
                if let Some(system) = CoordinateSystem::from_number(code) {
                    self.coordinate_system = system;
                }
            }
            _ => {}
        }
    }

    fn apply_m(&mut self, value: f64) {
        match whole_code(value) {
            Some(3) => self.spindle_state = SpindleState::Clockwise,
            Some(4) => self.spindle_state = SpindleState::CounterClockwise,
            Some(5) => self.spindle_state = SpindleState::Off,
            Some(7) => self.coolant_state = CoolantState::Mist,
            Some(8) => self.coolant_state = CoolantState::Flood,
            Some(9) => self.coolant_state = CoolantState::Off,
            _ => {}
        }
    }

    /// Lines that restore this state on a freshly reset machine
    ///
    /// Order: units, coordinate system, distance mode, feed (if > 0),
    /// spindle speed (if > 0), spindle state, coolant state.
    pub fn preamble(&self) -> Vec<String> {
        let mut lines = vec![
            match self.units {
                Units::MM => "G21".to_string(),
                Units::INCH => "G20".to_string(),
            },
            self.coordinate_system.code().to_string(),
            self.distance_mode.code().to_string(),
        ];
        if self.feed_rate > 0.0 {
            lines.push(format!("F{}", format_number(self.feed_rate)));
        }
        if self.spindle_speed > 0.0 {
            lines.push(format!("S{}", format_number(self.spindle_speed)));
        }
        lines.push(self.spindle_state.code().to_string());
        lines.push(self.coolant_state.code().to_string());
        lines
    }
}

/// Integer code, or `None` for decimal codes such as `G54.1`
fn whole_code(value: f64) -> Option<u32> {
    let tenths = (value * 10.0).round();
    if value < 0.0 || tenths % 10.0 != 0.0 {
        return None;
    }
    Some((tenths / 10.0) as u32)
}

/// Modal state in effect immediately before `line`
///
/// Replays `program[..line]`; a `line` past the end replays the whole
/// program.
pub fn scan<S: AsRef<str>>(program: &[S], line: usize) -> ModalState {
    let end = line.min(program.len());
    program[..end]
        .iter()
        .fold(ModalState::default(), |mut state, text| {
            state.apply_line(text.as_ref());
            state
        })
}

/// Preamble plus the program from `line` on
pub fn resume_program<S: AsRef<str>>(program: &[S], line: usize) -> Vec<String> {
    let state = scan(program, line);
    let start = line.min(program.len());
    tracing::info!(
        "Resuming at line {} with {} preamble lines",
        start,
        state.preamble().len()
    );
    state
        .preamble()
        .into_iter()
        .chain(program[start..].iter().map(|l| l.as_ref().to_string()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_line_zero_is_defaults() {
        let program = ["G20 G91 M3 S1000"];
        let state = scan(&program, 0);
        assert_eq!(state, ModalState::default());
        assert_eq!(state.preamble(), vec!["G21", "G54", "G90", "M5", "M9"]);
    }

    #[test]
    fn test_last_value_wins() {
        let program = ["G91 G90 G91", "M8", "M7", "F100 F250", "G55", "G56"];
        let state = scan(&program, program.len());
        assert_eq!(state.distance_mode, DistanceMode::Incremental);
        assert_eq!(state.coolant_state, CoolantState::Mist);
        assert_eq!(state.feed_rate, 250.0);
        assert_eq!(state.coordinate_system, CoordinateSystem::G56);
    }

    #[test]
    fn test_comments_are_ignored() {
        let program = ["G21 (G20 in a comment) M3 S500 ; G91 M8"];
        let state = scan(&program, 1);
        assert_eq!(state.units, Units::MM);
        assert_eq!(state.distance_mode, DistanceMode::Absolute);
        assert_eq!(state.coolant_state, CoolantState::Off);
        assert_eq!(state.spindle_state, SpindleState::Clockwise);
        assert_eq!(state.spindle_speed, 500.0);
    }

    #[test]
    fn test_past_end_equals_end() {
        let program = ["G20", "G91", "M4 S200"];
        assert_eq!(scan(&program, 3), scan(&program, 100));
    }

    #[test]
    fn test_unknown_and_decimal_codes_ignored() {
        let program = ["G54.1 P2", "G59.3", "M62 P1", "G38.2 Z-5", "$J=G91 X1 F100"];
        let state = scan(&program, program.len());
        assert_eq!(state.coordinate_system, CoordinateSystem::G54);
        assert_eq!(state.distance_mode, DistanceMode::Absolute);
        assert_eq!(state.feed_rate, 0.0);
    }

    #[test]
    fn test_program_end_keeps_registers() {
        let program = ["G91 M3 S100", "M30", "G0 X1"];
        let state = scan(&program, 3);
        assert_eq!(state.distance_mode, DistanceMode::Incremental);
        assert_eq!(state.spindle_state, SpindleState::Clockwise);
    }

    #[test]
    fn test_full_preamble_order() {
        let state = ModalState {
            distance_mode: DistanceMode::Incremental,
            coordinate_system: CoordinateSystem::G57,
            units: Units::INCH,
            spindle_state: SpindleState::CounterClockwise,
            coolant_state: CoolantState::Flood,
            feed_rate: 12.5,
            spindle_speed: 18000.0,
        };
        assert_eq!(
            state.preamble(),
            vec!["G20", "G57", "G91", "F12.5", "S18000", "M4", "M8"]
        );
    }

    #[test]
    fn test_resume_program() {
        let program = ["G21 G90", "M3 S8000", "G1 X10 F600", "G91", "G1 X5"];
        let resumed = resume_program(&program, 4);
        assert_eq!(
            resumed,
            vec!["G21", "G54", "G91", "F600", "S8000", "M3", "M9", "G1 X5"]
        );
    }
}
