//! Simulated GRBL-family firmware
//!
//! A deterministic model of the controller side of the line protocol. Bytes
//! go in through [`Simulator::receive`], simulated time advances through
//! [`Simulator::step`], and replies come out of [`Simulator::take_output`].
//! Nothing here reads a clock, so tests can drive it tick by tick.
//!
//! The model covers what a sender can observe:
//! - a planner of fixed depth; lines that find it full wait in the RX buffer
//!   and their `ok` is withheld until space frees up
//! - real-time bytes acted on the moment they arrive
//! - modal G-code state, work offsets and the `$` command set
//! - alarms, feed hold, jogging, homing and check mode
//!
//! Arcs are executed as straight moves to their end point and acceleration
//! is ignored.

use super::settings::SimSettings;
use super::SimulatorConfig;
use crate::firmware::grbl::utils::{format_position, format_positions, strip_comments};
use crate::firmware::RealtimeCommand;
use cnclink_core::constants::{MAX_OVERRIDE_PERCENT, MIN_OVERRIDE_PERCENT};
use cnclink_core::{Firmware, InputPins, MachineState, Position, Units};
use std::collections::VecDeque;
use std::time::Duration;

/// Status reports between forced `WCO:`/`Ov:` refreshes
const REPORT_REFRESH: u32 = 10;

/// Alarm held after boot when homing is required
const HOMING_REQUIRED: u16 = 11;

const UNLOCK_HINT: &str = "[MSG:'$H'|'$X' to unlock]";
const HELP: &str = "[HLP:$$ $# $G $I $N $x=val $Nx=line $J=line $SLP $C $X $H ~ ! ? ctrl-x]";
const MM_PER_INCH: f64 = 25.4;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum MotionMode {
    Rapid,
    Linear,
    ArcCw,
    ArcCcw,
    Cancel,
}

impl MotionMode {
    fn code(self) -> &'static str {
        match self {
            Self::Rapid => "G0",
            Self::Linear => "G1",
            Self::ArcCw => "G2",
            Self::ArcCcw => "G3",
            Self::Cancel => "G80",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Spindle {
    Off,
    Cw,
    Ccw,
}

#[derive(Debug, Clone, PartialEq)]
struct Modal {
    motion: MotionMode,
    units: Units,
    absolute: bool,
    coord: usize,
    /// mm/min
    feed: f64,
    speed: f64,
    spindle: Spindle,
    mist: bool,
    flood: bool,
    tool: u32,
    next_tool: u32,
}

impl Default for Modal {
    fn default() -> Self {
        Self {
            motion: MotionMode::Rapid,
            units: Units::MM,
            absolute: true,
            coord: 0,
            feed: 0.0,
            speed: 0.0,
            spindle: Spindle::Off,
            mist: false,
            flood: false,
            tool: 0,
            next_tool: 0,
        }
    }
}

impl Modal {
    fn scale(units: Units) -> f64 {
        match units {
            Units::MM => 1.0,
            Units::INCH => MM_PER_INCH,
        }
    }

    /// `[GC:...]` line for `$G`
    fn report(&self) -> String {
        let units = match self.units {
            Units::MM => "G21",
            Units::INCH => "G20",
        };
        let distance = if self.absolute { "G90" } else { "G91" };
        let spindle = match self.spindle {
            Spindle::Off => "M5",
            Spindle::Cw => "M3",
            Spindle::Ccw => "M4",
        };
        let coolant = match (self.mist, self.flood) {
            (false, false) => "M9",
            (true, false) => "M7",
            (false, true) => "M8",
            (true, true) => "M7 M8",
        };
        format!(
            "[GC:{} G{} G17 {} {} G94 {} {} T{} F{:.0} S{:.0}]",
            self.motion.code(),
            54 + self.coord,
            units,
            distance,
            spindle,
            coolant,
            self.tool,
            self.feed / Self::scale(self.units),
            self.speed
        )
    }

    /// State after `M2`/`M30`
    fn program_end(&mut self) {
        self.motion = MotionMode::Linear;
        self.absolute = true;
        self.coord = 0;
        self.spindle = Spindle::Off;
        self.mist = false;
        self.flood = false;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BlockKind {
    Rapid,
    Feed,
    Jog,
    Homing,
    Dwell,
    Pause,
}

/// One planner entry
#[derive(Debug, Clone, Copy, PartialEq)]
struct Block {
    kind: BlockKind,
    target: Position,
    /// mm/min for feed and jog moves
    feed: f64,
    /// Remaining dwell time
    seconds: f64,
}

/// Reply to an executed line
enum Reply {
    Ok,
    /// `ok` is sent when the command completes
    Deferred,
}

type Outcome = Result<Reply, u16>;

#[derive(Debug, Clone, Copy)]
enum NonModal {
    Dwell,
    SetOffset,
    GoHome(usize),
    SetHome(usize),
    SetOrigin,
    ClearOrigin,
}

#[derive(Debug, Default)]
struct ParsedBlock {
    motion: Option<MotionMode>,
    non_modal: Option<NonModal>,
    machine_coords: bool,
    units: Option<Units>,
    absolute: Option<bool>,
    coord: Option<usize>,
    spindle: Option<Spindle>,
    mist: Option<bool>,
    flood: Option<bool>,
    tool_change: bool,
    pause: bool,
    end: bool,
    axes: [Option<f64>; 3],
    feed: Option<f64>,
    speed: Option<f64>,
    tool: Option<u32>,
    p: Option<f64>,
    l: Option<f64>,
}

impl ParsedBlock {
    fn has_axes(&self) -> bool {
        self.axes.iter().any(Option::is_some)
    }
}

/// Split a line into `(letter, value)` words, rejecting malformed input
fn parse_words(line: &str) -> Result<Vec<(char, f64)>, u16> {
    let cleaned: String = strip_comments(line)
        .chars()
        .filter(|c| !c.is_whitespace())
        .collect();
    let mut chars = cleaned.chars().peekable();
    let mut words = Vec::new();
    while let Some(c) = chars.next() {
        if !c.is_ascii_alphabetic() {
            return Err(1);
        }
        let mut number = String::new();
        while let Some(&next) = chars.peek() {
            if next.is_ascii_digit() || matches!(next, '.' | '-' | '+') {
                number.push(next);
                chars.next();
            } else {
                break;
            }
        }
        let value: f64 = number.parse().map_err(|_| 2u16)?;
        words.push((c.to_ascii_uppercase(), value));
    }
    Ok(words)
}

/// Code number scaled by ten, so `G28.1` is 281
fn code_of(value: f64) -> i32 {
    (value * 10.0).round() as i32
}

fn parse_block(line: &str) -> Result<ParsedBlock, u16> {
    let mut block = ParsedBlock::default();
    for (letter, value) in parse_words(line)? {
        match letter {
            'G' => match code_of(value) {
                0 => block.motion = Some(MotionMode::Rapid),
                10 => block.motion = Some(MotionMode::Linear),
                20 => block.motion = Some(MotionMode::ArcCw),
                30 => block.motion = Some(MotionMode::ArcCcw),
                800 => block.motion = Some(MotionMode::Cancel),
                40 => block.non_modal = Some(NonModal::Dwell),
                100 => block.non_modal = Some(NonModal::SetOffset),
                280 => block.non_modal = Some(NonModal::GoHome(0)),
                281 => block.non_modal = Some(NonModal::SetHome(0)),
                300 => block.non_modal = Some(NonModal::GoHome(1)),
                301 => block.non_modal = Some(NonModal::SetHome(1)),
                920 => block.non_modal = Some(NonModal::SetOrigin),
                921 => block.non_modal = Some(NonModal::ClearOrigin),
                530 => block.machine_coords = true,
                200 => block.units = Some(Units::INCH),
                210 => block.units = Some(Units::MM),
                900 => block.absolute = Some(true),
                910 => block.absolute = Some(false),
                540 | 550 | 560 | 570 | 580 | 590 => {
                    block.coord = Some(((code_of(value) - 540) / 10) as usize)
                }
                170 | 180 | 190 | 400 | 431 | 490 | 610 | 911 | 930 | 940 => {}
                _ => return Err(20),
            },
            'M' => match code_of(value) {
                0 | 10 => block.pause = true,
                20 | 300 => block.end = true,
                30 => block.spindle = Some(Spindle::Cw),
                40 => block.spindle = Some(Spindle::Ccw),
                50 => block.spindle = Some(Spindle::Off),
                60 => block.tool_change = true,
                70 => block.mist = Some(true),
                80 => block.flood = Some(true),
                90 => {
                    block.mist = Some(false);
                    block.flood = Some(false);
                }
                _ => return Err(20),
            },
            'X' => block.axes[0] = Some(value),
            'Y' => block.axes[1] = Some(value),
            'Z' => block.axes[2] = Some(value),
            'F' => block.feed = Some(value),
            'S' => block.speed = Some(value),
            'T' => {
                if value < 0.0 {
                    return Err(4);
                }
                block.tool = Some(value as u32)
            }
            'P' => block.p = Some(value),
            'L' => block.l = Some(value),
            'I' | 'J' | 'K' | 'R' | 'N' => {}
            _ => return Err(20),
        }
    }
    Ok(block)
}

/// Simulated firmware
#[derive(Debug, Clone)]
pub struct Simulator {
    firmware: Firmware,
    rx_buffer: usize,
    planner_blocks: usize,
    settings: SimSettings,
    modal: Modal,
    position: Position,
    /// Where the last queued block ends
    planned: Position,
    wcs: [Position; 6],
    homes: [Position; 2],
    origin: Position,
    planner: VecDeque<Block>,
    waiting: VecDeque<String>,
    partial: Vec<u8>,
    output: Vec<String>,
    alarm: Option<u16>,
    hold: bool,
    check_mode: bool,
    pins: InputPins,
    feed_override: u8,
    rapid_override: u8,
    spindle_override: u8,
    reports: u32,
    report_dirty: bool,
    homing_ok_pending: bool,
    rx_overflows: usize,
}

impl Simulator {
    /// Boot a simulator; the welcome banner is already queued for output
    pub fn new(config: &SimulatorConfig) -> Self {
        let mut sim = Self {
            firmware: config.firmware,
            rx_buffer: config.rx_buffer_size,
            planner_blocks: config.planner_blocks.max(1),
            settings: SimSettings::default(),
            modal: Modal::default(),
            position: Position::default(),
            planned: Position::default(),
            wcs: [Position::default(); 6],
            homes: [Position::default(); 2],
            origin: Position::default(),
            planner: VecDeque::new(),
            waiting: VecDeque::new(),
            partial: Vec::new(),
            output: Vec::new(),
            alarm: None,
            hold: false,
            check_mode: false,
            pins: InputPins::empty(),
            feed_override: 100,
            rapid_override: 100,
            spindle_override: 100,
            reports: 0,
            report_dirty: true,
            homing_ok_pending: false,
            rx_overflows: 0,
        };
        if config.start_in_alarm {
            sim.alarm = Some(HOMING_REQUIRED);
        }
        sim.boot_messages();
        sim
    }

    /// Firmware family being imitated
    pub fn firmware(&self) -> Firmware {
        self.firmware
    }

    /// Welcome banner for a firmware family
    pub fn banner(firmware: Firmware) -> &'static str {
        match firmware {
            Firmware::Grbl => "Grbl 1.1h ['$' for help]",
            Firmware::GrblHal => "GrblHAL 1.1f ['$' or '$HELP' for help]",
            Firmware::FluidNc => "Grbl 3.7.10 [FluidNC v3.7.10 (noradio) '$' for help]",
        }
    }

    fn boot_messages(&mut self) {
        self.output.push(Self::banner(self.firmware).to_string());
        if self.alarm.is_some() {
            self.output.push(UNLOCK_HINT.to_string());
        }
    }

    /// Feed bytes received from the host
    pub fn receive(&mut self, bytes: &[u8]) {
        for &byte in bytes {
            if RealtimeCommand::is_realtime_byte(byte) {
                self.realtime(byte);
                continue;
            }
            match byte {
                b'\n' => {
                    let line = String::from_utf8_lossy(&self.partial).trim().to_string();
                    self.partial.clear();
                    self.accept_line(line);
                }
                b'\r' => {}
                _ => self.partial.push(byte),
            }
        }
    }

    /// Advance simulated time
    pub fn step(&mut self, dt: Duration) {
        let mut budget = dt.as_secs_f64();
        while budget > 0.0 && self.can_move() {
            let Some(block) = self.planner.front().copied() else {
                break;
            };
            match block.kind {
                BlockKind::Pause => {
                    self.planner.pop_front();
                    self.hold = true;
                }
                BlockKind::Dwell => {
                    if block.seconds <= budget {
                        budget -= block.seconds;
                        self.planner.pop_front();
                    } else {
                        if let Some(front) = self.planner.front_mut() {
                            front.seconds -= budget;
                        }
                        budget = 0.0;
                    }
                }
                _ => {
                    let distance = self.position.distance_to(&block.target);
                    let speed = self.rate_for(&block) / 60.0;
                    if distance <= f64::EPSILON || speed <= 0.0 {
                        self.finish_block(block);
                        continue;
                    }
                    let reach = speed * budget;
                    if reach >= distance {
                        budget -= distance / speed;
                        self.finish_block(block);
                    } else {
                        let ratio = reach / distance;
                        let delta = block.target.subtract(&self.position);
                        self.position = self.position.add(&Position::new(
                            delta.x * ratio,
                            delta.y * ratio,
                            delta.z * ratio,
                        ));
                        budget = 0.0;
                    }
                }
            }
        }
        self.drain_waiting();
    }

    /// Replies produced since the last call
    pub fn take_output(&mut self) -> Vec<String> {
        std::mem::take(&mut self.output)
    }

    /// Current machine state as a status report would print it
    pub fn state(&self) -> MachineState {
        if self.alarm.is_some() {
            MachineState::Alarm
        } else if self.pins.contains(InputPins::DOOR) {
            MachineState::Door
        } else if self.hold {
            MachineState::Hold
        } else if self.check_mode {
            MachineState::Check
        } else {
            match self.planner.front().map(|b| b.kind) {
                Some(BlockKind::Homing) => MachineState::Home,
                Some(BlockKind::Jog) => MachineState::Jog,
                Some(_) => MachineState::Run,
                None => MachineState::Idle,
            }
        }
    }

    /// Machine position
    pub fn position(&self) -> Position {
        self.position
    }

    /// Work position
    pub fn work_position(&self) -> Position {
        self.position.subtract(&self.work_offset())
    }

    /// Blocks queued in the planner
    pub fn planner_len(&self) -> usize {
        self.planner.len()
    }

    /// Lines held in the RX buffer waiting for planner space
    pub fn waiting_len(&self) -> usize {
        self.waiting.len()
    }

    /// Times the host sent more than the RX buffer holds
    pub fn rx_overflows(&self) -> usize {
        self.rx_overflows
    }

    /// Current alarm code, if locked
    pub fn alarm(&self) -> Option<u16> {
        self.alarm
    }

    /// Drive the input pins
    pub fn set_pins(&mut self, pins: InputPins) {
        self.pins = pins;
    }

    /// Trip an alarm as a limit switch or fault would
    pub fn raise_alarm(&mut self, code: u16) {
        self.alarm = Some(code);
        self.planner.clear();
        self.waiting.clear();
        self.hold = false;
        self.homing_ok_pending = false;
        self.planned = self.position;
        self.output.push(format!("ALARM:{}", code));
    }

    fn can_move(&self) -> bool {
        self.alarm.is_none() && !self.hold && !self.pins.contains(InputPins::DOOR)
    }

    fn is_blocked(&self) -> bool {
        self.planner.len() >= self.planner_blocks || self.homing_ok_pending
    }

    fn waiting_bytes(&self) -> usize {
        self.waiting.iter().map(|l| l.len() + 1).sum::<usize>() + self.partial.len()
    }

    fn accept_line(&mut self, line: String) {
        if !self.waiting.is_empty() || self.is_blocked() {
            if self.waiting_bytes() + line.len() + 1 > self.rx_buffer {
                self.rx_overflows += 1;
                tracing::warn!("Simulator RX buffer overflow on '{}'", line);
            }
            self.waiting.push_back(line);
        } else {
            self.execute(&line);
        }
    }

    fn drain_waiting(&mut self) {
        while !self.is_blocked() {
            let Some(line) = self.waiting.pop_front() else {
                break;
            };
            self.execute(&line);
        }
    }

    fn execute(&mut self, line: &str) {
        let outcome = if line.is_empty() {
            Ok(Reply::Ok)
        } else if let Some(system) = line.strip_prefix('$') {
            self.system_command(system)
        } else {
            self.gcode_line(line)
        };
        match outcome {
            Ok(Reply::Ok) => self.output.push("ok".to_string()),
            Ok(Reply::Deferred) => {}
            Err(code) => self.output.push(format!("error:{}", code)),
        }
    }

    fn work_offset(&self) -> Position {
        self.wcs[self.modal.coord].add(&self.origin)
    }

    fn finish_block(&mut self, block: Block) {
        self.position = block.target;
        self.planner.pop_front();
        if block.kind == BlockKind::Homing {
            self.alarm = None;
            self.homing_ok_pending = false;
            self.output.push("ok".to_string());
        }
    }

    /// Traverse rate allowed by the per-axis maximums for a move
    fn max_rate(&self, target: &Position) -> f64 {
        let delta = target.subtract(&self.position).as_array();
        let distance = self.position.distance_to(target);
        [110u16, 111, 112]
            .iter()
            .zip(delta.iter())
            .filter(|(_, d)| d.abs() > f64::EPSILON)
            .map(|(id, d)| self.settings.value_f64(*id) * distance / d.abs())
            .fold(f64::INFINITY, f64::min)
    }

    /// Effective rate in mm/min
    fn rate_for(&self, block: &Block) -> f64 {
        let max = self.max_rate(&block.target);
        let max = if max.is_finite() { max } else { 0.0 };
        match block.kind {
            BlockKind::Rapid => max * f64::from(self.rapid_override) / 100.0,
            BlockKind::Feed => {
                (block.feed * f64::from(self.feed_override) / 100.0).min(max)
            }
            BlockKind::Jog => block.feed.min(max),
            BlockKind::Homing => self.settings.value_f64(25).min(max),
            BlockKind::Dwell | BlockKind::Pause => 0.0,
        }
    }

    fn queue(&mut self, kind: BlockKind, target: Position, feed: f64) {
        self.planner.push_back(Block {
            kind,
            target,
            feed,
            seconds: 0.0,
        });
        self.planned = target;
    }

    /// Resolve axis words to a machine-coordinate target
    fn target(&self, axes: &[Option<f64>; 3], scale: f64, absolute: bool, machine: bool) -> Position {
        let base = self.planned.as_array();
        let offset = self.work_offset().as_array();
        let mut target = base;
        for (i, value) in axes.iter().enumerate() {
            if let Some(v) = value {
                let v = v * scale;
                target[i] = if machine {
                    v
                } else if absolute {
                    v + offset[i]
                } else {
                    base[i] + v
                };
            }
        }
        Position::new(target[0], target[1], target[2])
    }

    // ---- real-time commands ----

    fn realtime(&mut self, byte: u8) {
        use RealtimeCommand::*;
        let Some(command) = RealtimeCommand::from_byte(byte) else {
            return;
        };
        match command {
            StatusReport => {
                let report = self.status_report();
                self.output.push(report);
            }
            FeedHold => {
                if self.state() == MachineState::Jog {
                    self.cancel_jog();
                } else if self.alarm.is_none() {
                    self.hold = true;
                }
            }
            CycleStart => {
                if !self.pins.contains(InputPins::DOOR) {
                    self.hold = false;
                }
            }
            Reset => self.soft_reset(),
            JogCancel => self.cancel_jog(),
            FeedOverrideReset => self.feed_override = 100,
            FeedOverridePlusTen => self.feed_override = step_override(self.feed_override, 10),
            FeedOverrideMinusTen => self.feed_override = step_override(self.feed_override, -10),
            FeedOverridePlusOne => self.feed_override = step_override(self.feed_override, 1),
            FeedOverrideMinusOne => self.feed_override = step_override(self.feed_override, -1),
            RapidOverrideReset => self.rapid_override = 100,
            RapidOverrideHalf => self.rapid_override = 50,
            RapidOverrideQuarter => self.rapid_override = 25,
            SpindleOverrideReset => self.spindle_override = 100,
            SpindleOverridePlusTen => {
                self.spindle_override = step_override(self.spindle_override, 10)
            }
            SpindleOverrideMinusTen => {
                self.spindle_override = step_override(self.spindle_override, -10)
            }
            SpindleOverridePlusOne => {
                self.spindle_override = step_override(self.spindle_override, 1)
            }
            SpindleOverrideMinusOne => {
                self.spindle_override = step_override(self.spindle_override, -1)
            }
        }
        if byte >= 0x90 {
            self.report_dirty = true;
        }
    }

    fn cancel_jog(&mut self) {
        self.planner.retain(|b| b.kind != BlockKind::Jog);
        self.planned = self
            .planner
            .back()
            .map(|b| b.target)
            .unwrap_or(self.position);
        self.drain_waiting();
    }

    fn soft_reset(&mut self) {
        let moving = self.can_move()
            && self.planner.iter().any(|b| {
                matches!(
                    b.kind,
                    BlockKind::Rapid | BlockKind::Feed | BlockKind::Jog | BlockKind::Homing
                )
            });
        let lost = if self.homing_ok_pending {
            Some(6)
        } else if moving {
            Some(3)
        } else {
            None
        };

        self.planner.clear();
        self.waiting.clear();
        self.partial.clear();
        self.hold = false;
        self.homing_ok_pending = false;
        self.check_mode = false;
        self.planned = self.position;
        self.feed_override = 100;
        self.rapid_override = 100;
        self.spindle_override = 100;
        let tool = self.modal.tool;
        self.modal = Modal {
            tool,
            ..Modal::default()
        };
        self.report_dirty = true;

        if let Some(code) = lost {
            self.alarm = Some(code);
            self.output.push(format!("ALARM:{}", code));
        }
        self.boot_messages();
    }

    fn status_report(&mut self) -> String {
        let state = self.state();
        let mut report = String::from("<");
        report.push_str(state.as_str());
        match state {
            MachineState::Hold => report.push_str(":0"),
            MachineState::Door => report.push_str(":1"),
            _ => {}
        }

        let mask = self.settings.value_f64(10) as u32;
        if mask & 1 == 1 {
            report.push_str(&format!("|MPos:{}", format_positions(&self.position)));
        } else {
            report.push_str(&format!("|WPos:{}", format_positions(&self.work_position())));
        }
        if mask & 2 == 2 {
            let planner_free = self.planner_blocks.saturating_sub(self.planner.len());
            let rx_free = self.rx_buffer.saturating_sub(self.waiting_bytes());
            report.push_str(&format!("|Bf:{},{}", planner_free, rx_free));
        }

        let feed = match self.planner.front() {
            Some(block) if self.can_move() => self.rate_for(block),
            _ => 0.0,
        };
        let speed = if self.modal.spindle == Spindle::Off {
            0.0
        } else {
            self.modal.speed * f64::from(self.spindle_override) / 100.0
        };
        report.push_str(&format!("|FS:{:.0},{:.0}", feed, speed));

        if !self.pins.is_empty() {
            report.push_str(&format!("|Pn:{}", self.pins.to_letters()));
        }

        if self.report_dirty || self.reports % REPORT_REFRESH == 0 {
            report.push_str(&format!("|WCO:{}", format_positions(&self.work_offset())));
            report.push_str(&format!(
                "|Ov:{},{},{}",
                self.feed_override, self.rapid_override, self.spindle_override
            ));
            let mut accessories = String::new();
            match self.modal.spindle {
                Spindle::Cw => accessories.push('S'),
                Spindle::Ccw => accessories.push('C'),
                Spindle::Off => {}
            }
            if self.modal.flood {
                accessories.push('F');
            }
            if self.modal.mist {
                accessories.push('M');
            }
            if !accessories.is_empty() {
                report.push_str(&format!("|A:{}", accessories));
            }
            self.report_dirty = false;
        }
        self.reports = self.reports.wrapping_add(1);

        report.push('>');
        report
    }

    // ---- `$` commands ----

    fn system_command(&mut self, command: &str) -> Outcome {
        let trimmed = command.trim();
        let upper = trimmed.to_ascii_uppercase();
        if let Some(jog) = upper.strip_prefix("J=") {
            return self.jog(jog);
        }
        match upper.as_str() {
            "" => {
                self.output.push(HELP.to_string());
                Ok(Reply::Ok)
            }
            "$" => {
                self.require_idle()?;
                let lines = self.settings.dump(self.firmware);
                self.output.extend(lines);
                Ok(Reply::Ok)
            }
            "#" => {
                self.require_idle()?;
                self.report_offsets();
                Ok(Reply::Ok)
            }
            "G" => {
                self.output.push(self.modal.report());
                Ok(Reply::Ok)
            }
            "I" => {
                self.require_idle()?;
                self.report_build_info();
                Ok(Reply::Ok)
            }
            "X" => {
                if self.alarm.take().is_some() {
                    self.output.push("[MSG:Caution: Unlocked]".to_string());
                }
                Ok(Reply::Ok)
            }
            "H" => self.home(),
            "C" => {
                self.require_idle()?;
                self.check_mode = !self.check_mode;
                if self.check_mode {
                    self.output.push("[MSG:Enabled]".to_string());
                } else {
                    self.modal = Modal::default();
                    self.output.push("[MSG:Disabled]".to_string());
                }
                Ok(Reply::Ok)
            }
            _ => self.setting_command(trimmed),
        }
    }

    fn require_idle(&self) -> Result<(), u16> {
        if self.planner.is_empty() {
            Ok(())
        } else {
            Err(8)
        }
    }

    fn report_offsets(&mut self) {
        for (i, offset) in self.wcs.iter().enumerate() {
            self.output
                .push(format!("[G{}:{}]", 54 + i, format_positions(offset)));
        }
        self.output
            .push(format!("[G28:{}]", format_positions(&self.homes[0])));
        self.output
            .push(format!("[G30:{}]", format_positions(&self.homes[1])));
        self.output
            .push(format!("[G92:{}]", format_positions(&self.origin)));
        self.output.push(format!("[TLO:{}]", format_position(0.0)));
        self.output.push(format!(
            "[PRB:{}:0]",
            format_positions(&Position::default())
        ));
    }

    fn report_build_info(&mut self) {
        let (version, options) = match self.firmware {
            Firmware::Grbl => ("1.1h.20190825:", "V"),
            Firmware::GrblHal => ("1.1f.20230507:", "VNMHS"),
            Firmware::FluidNc => ("3.7 FluidNC v3.7.10:", "PH"),
        };
        self.output.push(format!("[VER:{}]", version));
        self.output.push(format!(
            "[OPT:{},{},{}]",
            options, self.planner_blocks, self.rx_buffer
        ));
        if self.firmware == Firmware::GrblHal {
            self.output.push("[FIRMWARE:grblHAL]".to_string());
        }
    }

    fn home(&mut self) -> Outcome {
        if self.settings.value_f64(22) == 0.0 {
            return Err(5);
        }
        self.require_idle()?;
        self.alarm = None;
        self.queue(BlockKind::Homing, Position::default(), 0.0);
        self.homing_ok_pending = true;
        Ok(Reply::Deferred)
    }

    fn setting_command(&mut self, command: &str) -> Outcome {
        if let Some(path) = command.strip_prefix('/') {
            if self.firmware != Firmware::FluidNc {
                return Err(3);
            }
            self.require_idle()?;
            let path = format!("/{}", path);
            return match path.split_once('=') {
                Some((key, value)) => {
                    self.settings.set_by_path(key.trim(), value)?;
                    Ok(Reply::Ok)
                }
                None => {
                    let setting = self.settings.by_path(path.trim()).ok_or(3u16)?;
                    let line = format!("${}={}", path.trim(), setting.value);
                    self.output.push(line);
                    Ok(Reply::Ok)
                }
            };
        }

        let (key, value) = command.split_once('=').ok_or(3u16)?;
        let id: u16 = key.trim().parse().map_err(|_| 3u16)?;
        self.require_idle()?;
        self.settings.set_by_id(id, value)?;
        Ok(Reply::Ok)
    }

    fn jog(&mut self, body: &str) -> Outcome {
        if self.alarm.is_some() {
            return Err(9);
        }
        if !matches!(self.state(), MachineState::Idle | MachineState::Jog) {
            return Err(8);
        }

        let mut units = self.modal.units;
        let mut absolute = self.modal.absolute;
        let mut machine = false;
        let mut feed = None;
        let mut axes = [None; 3];
        for (letter, value) in parse_words(body)? {
            match letter {
                'G' => match code_of(value) {
                    200 => units = Units::INCH,
                    210 => units = Units::MM,
                    900 => absolute = true,
                    910 => absolute = false,
                    530 => machine = true,
                    _ => return Err(16),
                },
                'X' => axes[0] = Some(value),
                'Y' => axes[1] = Some(value),
                'Z' => axes[2] = Some(value),
                'F' => feed = Some(value),
                _ => return Err(16),
            }
        }
        let feed = feed.filter(|f| *f > 0.0).ok_or(22u16)?;
        if axes.iter().all(Option::is_none) {
            return Err(16);
        }

        let scale = Modal::scale(units);
        let target = self.target(&axes, scale, absolute, machine);
        if !self.check_mode {
            self.queue(BlockKind::Jog, target, feed * scale);
        }
        Ok(Reply::Ok)
    }

    // ---- G-code ----

    fn gcode_line(&mut self, line: &str) -> Outcome {
        if self.alarm.is_some() {
            return Err(9);
        }
        let block = parse_block(line)?;

        let units = block.units.unwrap_or(self.modal.units);
        let scale = Modal::scale(units);

        if let Some(feed) = block.feed {
            if feed < 0.0 {
                return Err(4);
            }
            self.modal.feed = feed * scale;
        }
        if let Some(speed) = block.speed {
            if speed < 0.0 {
                return Err(4);
            }
            self.modal.speed = speed;
        }
        if let Some(tool) = block.tool {
            self.modal.next_tool = tool;
        }
        if block.tool_change {
            self.modal.tool = self.modal.next_tool;
        }
        if let Some(spindle) = block.spindle {
            self.modal.spindle = spindle;
        }
        if let Some(mist) = block.mist {
            self.modal.mist = mist;
        }
        if let Some(flood) = block.flood {
            self.modal.flood = flood;
        }
        if matches!(block.non_modal, Some(NonModal::Dwell)) {
            let seconds = block.p.ok_or(28u16)?;
            if seconds < 0.0 {
                return Err(4);
            }
            if !self.check_mode {
                self.planner.push_back(Block {
                    kind: BlockKind::Dwell,
                    target: self.planned,
                    feed: 0.0,
                    seconds,
                });
            }
        }
        self.modal.units = units;
        if let Some(absolute) = block.absolute {
            self.modal.absolute = absolute;
        }
        if let Some(coord) = block.coord {
            if coord != self.modal.coord {
                self.report_dirty = true;
            }
            self.modal.coord = coord;
        }

        let axes_used = match block.non_modal {
            Some(NonModal::SetOffset) => {
                self.set_offset(&block, scale)?;
                true
            }
            Some(NonModal::GoHome(slot)) => {
                if block.has_axes() {
                    let via = self.target(&block.axes, scale, self.modal.absolute, false);
                    self.queue_motion(BlockKind::Rapid, via, 0.0);
                }
                let home = self.homes[slot];
                self.queue_motion(BlockKind::Rapid, home, 0.0);
                true
            }
            Some(NonModal::SetHome(slot)) => {
                self.homes[slot] = self.planned;
                false
            }
            Some(NonModal::SetOrigin) => {
                let offset = self.wcs[self.modal.coord].as_array();
                let planned = self.planned.as_array();
                let mut origin = self.origin.as_array();
                for (i, value) in block.axes.iter().enumerate() {
                    if let Some(v) = value {
                        origin[i] = planned[i] - offset[i] - v * scale;
                    }
                }
                self.origin = Position::new(origin[0], origin[1], origin[2]);
                self.report_dirty = true;
                true
            }
            Some(NonModal::ClearOrigin) => {
                self.origin = Position::default();
                self.report_dirty = true;
                false
            }
            Some(NonModal::Dwell) | None => false,
        };

        if let Some(motion) = block.motion {
            self.modal.motion = motion;
        }
        if block.has_axes() && !axes_used {
            let kind = match self.modal.motion {
                MotionMode::Rapid => Some(BlockKind::Rapid),
                MotionMode::Linear | MotionMode::ArcCw | MotionMode::ArcCcw => {
                    if self.modal.feed <= 0.0 {
                        return Err(22);
                    }
                    Some(BlockKind::Feed)
                }
                MotionMode::Cancel => None,
            };
            if let Some(kind) = kind {
                let absolute = self.modal.absolute || block.machine_coords;
                let target = self.target(&block.axes, scale, absolute, block.machine_coords);
                self.queue_motion(kind, target, self.modal.feed);
            }
        }

        if block.pause && !self.check_mode {
            self.planner.push_back(Block {
                kind: BlockKind::Pause,
                target: self.planned,
                feed: 0.0,
                seconds: 0.0,
            });
        }
        if block.end {
            self.modal.program_end();
            self.feed_override = 100;
            self.rapid_override = 100;
            self.spindle_override = 100;
            self.report_dirty = true;
        }
        Ok(Reply::Ok)
    }

    fn queue_motion(&mut self, kind: BlockKind, target: Position, feed: f64) {
        if !self.check_mode {
            self.queue(kind, target, feed);
        }
    }

    /// `G10 L2` and `G10 L20`
    fn set_offset(&mut self, block: &ParsedBlock, scale: f64) -> Result<(), u16> {
        let l = block.l.map(code_of).ok_or(28u16)?;
        let p = block.p.ok_or(28u16)?;
        if p < 0.0 || p > 6.0 || p.fract() != 0.0 {
            return Err(29);
        }
        let index = if p == 0.0 {
            self.modal.coord
        } else {
            p as usize - 1
        };
        let mut offset = self.wcs[index].as_array();
        let planned = self.planned.as_array();
        let origin = self.origin.as_array();
        for (i, value) in block.axes.iter().enumerate() {
            if let Some(v) = value {
                offset[i] = match l {
                    20 => v * scale,
                    200 => planned[i] - origin[i] - v * scale,
                    _ => return Err(20),
                };
            }
        }
        self.wcs[index] = Position::new(offset[0], offset[1], offset[2]);
        self.report_dirty = true;
        Ok(())
    }
}

fn step_override(current: u8, delta: i16) -> u8 {
    let next = i16::from(current) + delta;
    next.clamp(
        i16::from(MIN_OVERRIDE_PERCENT),
        i16::from(MAX_OVERRIDE_PERCENT),
    ) as u8
}
