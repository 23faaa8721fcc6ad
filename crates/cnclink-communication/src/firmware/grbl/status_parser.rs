//! Status report parsing
//!
//! Converts one `<State|Field:..|...>` line into a [`MachineStatus`]. Parsing
//! is pure and total: malformed or partial reports produce `Unknown` and
//! default values, never an error.
//!
//! GRBL reports either `MPos` or `WPos` (selected by `$10`) and only sends
//! `WCO` every few reports, so the missing coordinate space is derived from
//! the offset in this report or the last one the caller carried forward.

use cnclink_core::{Firmware, InputPins, MachineState, MachineStatus, Position};

/// Raw fields of one status report, before coordinate derivation
#[derive(Debug, Clone, PartialEq, Default)]
pub struct StatusFields {
    /// Parsed state
    pub state: MachineState,
    /// Sub-state code after `:` in the state word
    pub sub_state: Option<u8>,
    /// `MPos:` when reported
    pub mpos: Option<Position>,
    /// `WPos:` when reported
    pub wpos: Option<Position>,
    /// `WCO:` when reported
    pub wco: Option<Position>,
    /// Feed from `FS:` or `F:`
    pub feed_rate: Option<f64>,
    /// Spindle from `FS:`
    pub spindle_speed: Option<f64>,
    /// `Ov:feed,rapid,spindle`
    pub overrides: Option<(u8, u8, u8)>,
    /// `Bf:blocks,bytes`
    pub buffer: Option<(u16, u16)>,
    /// `Pn:` letters
    pub pins: InputPins,
}

impl StatusFields {
    /// Split a status line into fields
    ///
    /// A line that is not framed by `<` and `>` yields the defaults.
    pub fn parse(line: &str, firmware: Firmware) -> Self {
        let line = line.trim();
        let Some(body) = line.strip_prefix('<').and_then(|l| l.strip_suffix('>')) else {
            return Self::default();
        };

        let mut parts = body.split('|');
        let (state, sub_state) = parts
            .next()
            .map(|word| parse_state_word(word, firmware))
            .unwrap_or_default();

        let mut fields = Self {
            state,
            sub_state,
            ..Self::default()
        };

        for part in parts {
            let Some((name, value)) = part.split_once(':') else {
                continue;
            };
            match name.trim() {
                "MPos" => fields.mpos = parse_position(value),
                "WPos" => fields.wpos = parse_position(value),
                "WCO" => fields.wco = parse_position(value),
                "FS" => {
                    let mut values = value.split(',').map(|v| v.trim().parse::<f64>().ok());
                    fields.feed_rate = values.next().flatten();
                    fields.spindle_speed = values.next().flatten();
                }
                "F" => fields.feed_rate = value.trim().parse().ok(),
                "Ov" => fields.overrides = parse_overrides(value),
                "Bf" => fields.buffer = parse_buffer(value),
                "Pn" => fields.pins = InputPins::from_letters(value.trim()),
                _ => {}
            }
        }

        fields
    }

    /// Build a status snapshot
    ///
    /// `last_wco` is the offset from an earlier report, used when this one
    /// carries none.
    pub fn resolve(&self, last_wco: Option<Position>) -> MachineStatus {
        let wco = self.wco.or(last_wco);
        let (machine_pos, work_pos) = match (self.mpos, self.wpos, wco) {
            (Some(m), Some(w), _) => (m, w),
            (Some(m), None, Some(o)) => (m, m.subtract(&o)),
            (None, Some(w), Some(o)) => (w.add(&o), w),
            (Some(m), None, None) => (m, m),
            (None, Some(w), None) => (w, w),
            (None, None, _) => (Position::default(), Position::default()),
        };
        let (feed_override, rapid_override, spindle_override) =
            self.overrides.unwrap_or((100, 100, 100));

        MachineStatus {
            state: self.state,
            sub_state: self.sub_state,
            machine_pos,
            work_pos,
            work_offset: wco,
            feed_rate: self.feed_rate.unwrap_or(0.0),
            spindle_speed: self.spindle_speed.unwrap_or(0.0),
            feed_override,
            rapid_override,
            spindle_override,
            pins: self.pins,
            planner_blocks_free: self.buffer.map(|(blocks, _)| blocks),
            rx_bytes_free: self.buffer.map(|(_, bytes)| bytes),
        }
    }
}

/// Parse a status report for the given firmware family
pub fn parse_status_report_for(line: &str, firmware: Firmware) -> MachineStatus {
    StatusFields::parse(line, firmware).resolve(None)
}

/// Parse a status report using plain GRBL state names
pub fn parse_status_report(line: &str) -> MachineStatus {
    parse_status_report_for(line, Firmware::Grbl)
}

/// Extract the machine state for the given firmware family
///
/// Accepts either a full status line or a bare state word such as `Hold:1`.
pub fn parse_state_for(line: &str, firmware: Firmware) -> MachineState {
    let line = line.trim();
    let body = line.strip_prefix('<').unwrap_or(line);
    let body = body.strip_suffix('>').unwrap_or(body);
    let word = body.split('|').next().unwrap_or_default();
    parse_state_word(word, firmware).0
}

/// Extract the machine state using plain GRBL state names
pub fn parse_state(line: &str) -> MachineState {
    parse_state_for(line, Firmware::Grbl)
}

fn parse_state_word(word: &str, firmware: Firmware) -> (MachineState, Option<u8>) {
    let (name, sub) = match word.split_once(':') {
        Some((name, sub)) => (name.trim(), sub.trim().parse::<u8>().ok()),
        None => (word.trim(), None),
    };

    let state = match name {
        "Idle" => MachineState::Idle,
        "Run" => MachineState::Run,
        "Hold" => MachineState::Hold,
        "Jog" => MachineState::Jog,
        "Alarm" => MachineState::Alarm,
        "Door" => MachineState::Door,
        "Check" => MachineState::Check,
        "Home" => MachineState::Home,
        "Sleep" => MachineState::Sleep,
        "Tool" => match firmware {
            Firmware::GrblHal => MachineState::Hold,
            Firmware::Grbl | Firmware::FluidNc => MachineState::Unknown,
        },
        _ => MachineState::Unknown,
    };
    (state, sub)
}

fn parse_position(value: &str) -> Option<Position> {
    let mut coords = value.split(',').map(|v| v.trim().parse::<f64>());
    let x = coords.next()?.ok()?;
    let y = coords.next()?.ok()?;
    let z = coords.next()?.ok()?;
    if !(x.is_finite() && y.is_finite() && z.is_finite()) {
        return None;
    }
    Some(Position::new(x, y, z))
}

fn parse_overrides(value: &str) -> Option<(u8, u8, u8)> {
    let mut values = value.split(',').map(|v| v.trim().parse::<u8>());
    let feed = values.next()?.ok()?;
    let rapid = values.next()?.ok()?;
    let spindle = values.next()?.ok()?;
    Some((feed, rapid, spindle))
}

fn parse_buffer(value: &str) -> Option<(u16, u16)> {
    let (blocks, bytes) = value.split_once(',')?;
    Some((blocks.trim().parse().ok()?, bytes.trim().parse().ok()?))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hold_with_pins() {
        let status = parse_status_report("<Hold:0|MPos:0.000,0.000,0.000|Pn:XZP>");
        assert_eq!(status.state, MachineState::Hold);
        assert_eq!(status.sub_state, Some(0));
        assert!(status.pins.contains(InputPins::X_LIMIT));
        assert!(status.pins.contains(InputPins::Z_LIMIT));
        assert!(status.pins.contains(InputPins::PROBE));
        assert!(!status.pins.contains(InputPins::Y_LIMIT));
        assert!(!status.pins.contains(InputPins::DOOR));
    }

    #[test]
    fn test_full_report() {
        let status = parse_status_report(
            "<Run|MPos:10.000,5.000,-2.500|Bf:12,96|FS:1500,12000|Ov:120,50,80|WCO:1.000,1.000,0.000>",
        );
        assert_eq!(status.state, MachineState::Run);
        assert_eq!(status.machine_pos, Position::new(10.0, 5.0, -2.5));
        assert_eq!(status.work_pos, Position::new(9.0, 4.0, -2.5));
        assert_eq!(status.work_offset, Some(Position::new(1.0, 1.0, 0.0)));
        assert_eq!(status.feed_rate, 1500.0);
        assert_eq!(status.spindle_speed, 12000.0);
        assert_eq!(
            (status.feed_override, status.rapid_override, status.spindle_override),
            (120, 50, 80)
        );
        assert_eq!(status.planner_blocks_free, Some(12));
        assert_eq!(status.rx_bytes_free, Some(96));
    }

    #[test]
    fn test_wpos_only_derives_mpos() {
        let fields = StatusFields::parse("<Idle|WPos:1.000,2.000,3.000|FS:0,0>", Firmware::Grbl);
        let status = fields.resolve(Some(Position::new(10.0, 10.0, 10.0)));
        assert_eq!(status.machine_pos, Position::new(11.0, 12.0, 13.0));
        assert_eq!(status.work_pos, Position::new(1.0, 2.0, 3.0));
    }

    #[test]
    fn test_carried_offset() {
        let fields = StatusFields::parse("<Jog|MPos:5.000,5.000,5.000|FS:500,0>", Firmware::Grbl);
        assert_eq!(fields.wco, None);
        let status = fields.resolve(Some(Position::new(5.0, 0.0, 0.0)));
        assert_eq!(status.work_pos, Position::new(0.0, 5.0, 5.0));
    }

    #[test]
    fn test_malformed_yields_unknown() {
        assert_eq!(parse_status_report("garbage").state, MachineState::Unknown);
        assert_eq!(parse_status_report("<Bogus|MPos:1,2>").state, MachineState::Unknown);
        assert_eq!(parse_status_report("").state, MachineState::Unknown);
        let partial = parse_status_report("<Idle|MPos:1.0,abc,3.0>");
        assert_eq!(partial.state, MachineState::Idle);
        assert_eq!(partial.machine_pos, Position::default());
    }

    #[test]
    fn test_tool_state_alias() {
        assert_eq!(parse_state_for("<Tool|MPos:0,0,0>", Firmware::GrblHal), MachineState::Hold);
        assert_eq!(parse_state_for("<Tool|MPos:0,0,0>", Firmware::Grbl), MachineState::Unknown);
    }

    #[test]
    fn test_parse_bare_state() {
        assert_eq!(parse_state("Door:1"), MachineState::Door);
        assert_eq!(parse_state("Alarm"), MachineState::Alarm);
        assert_eq!(parse_state("idle"), MachineState::Unknown);
    }
}
