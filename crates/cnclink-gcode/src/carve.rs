//! Lazy toolpath streaming
//!
//! [`CarveStreamer`] serialises an already planned multi-pass toolpath into
//! G-code one line per call, so a long carve never has to be materialised
//! as a program. Phases run in order:
//!
//! ```text
//! Preamble -> Clearing -> Finishing -> Postamble -> Complete
//! ```
//!
//! Empty passes are skipped. Every point of a pass yields exactly one line.

use cnclink_communication::firmware::grbl::utils::{format_number, format_position};
use cnclink_core::{LineSource, NextLine, Position, RealtimeControl};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

const PREAMBLE: [&str; 2] = ["G90", "G21"];
const POSTAMBLE_LINES: usize = 3;

/// One point of a planned pass
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ToolpathPoint {
    /// Target in work coordinates, mm
    pub position: Position,
    /// Reach it with a rapid move
    #[serde(default)]
    pub rapid: bool,
}

impl ToolpathPoint {
    /// Feed move to `position`
    pub fn feed(x: f64, y: f64, z: f64) -> Self {
        Self {
            position: Position::new(x, y, z),
            rapid: false,
        }
    }

    /// Rapid move to `position`
    pub fn rapid(x: f64, y: f64, z: f64) -> Self {
        Self {
            position: Position::new(x, y, z),
            rapid: true,
        }
    }
}

/// Clearing and finishing passes of a carve
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MultiPassToolpath {
    /// Roughing pass
    #[serde(default)]
    pub clearing: Vec<ToolpathPoint>,
    /// Finishing pass
    #[serde(default)]
    pub finishing: Vec<ToolpathPoint>,
}

/// Feeds and clearance for a carve
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ToolpathConfig {
    /// Retract height for the postamble, mm
    pub safe_z: f64,
    /// Cutting feed, mm/min
    pub feed_rate: f64,
    /// Feed for pure downward moves, mm/min
    pub plunge_rate: f64,
}

impl Default for ToolpathConfig {
    fn default() -> Self {
        Self {
            safe_z: 5.0,
            feed_rate: 1000.0,
            plunge_rate: 300.0,
        }
    }
}

/// Where the streamer is
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CarvePhase {
    /// `start` not called yet
    NotStarted,
    /// Absolute, metric
    Preamble,
    /// Roughing pass
    Clearing,
    /// Finishing pass
    Finishing,
    /// Retract, spindle stop, program end
    Postamble,
    /// Every line emitted
    Complete,
}

/// Line-at-a-time G-code generator over a [`MultiPassToolpath`]
pub struct CarveStreamer {
    toolpath: MultiPassToolpath,
    config: ToolpathConfig,
    phase: CarvePhase,
    index: usize,
    emitted: usize,
    total: usize,
    last_feed: Option<f64>,
    last_position: Option<Position>,
    control: CarveControl,
}

#[derive(Default)]
struct ControlState {
    paused: AtomicBool,
    aborted: AtomicBool,
    finished: AtomicBool,
    realtime: RwLock<Option<Arc<dyn RealtimeControl>>>,
}

/// Pause, resume and abort for a carve that is already streaming
///
/// Clones share state with the [`CarveStreamer`] they came from, so the
/// carve can be steered after it has been handed to the controller.
#[derive(Clone, Default)]
pub struct CarveControl {
    state: Arc<ControlState>,
}

impl CarveControl {
    pub fn is_paused(&self) -> bool {
        self.state.paused.load(Ordering::Acquire)
    }

    pub fn is_aborted(&self) -> bool {
        self.state.aborted.load(Ordering::Acquire)
    }

    /// Stop emitting and request a feed hold
    pub fn pause(&self) {
        if self.is_aborted() || self.state.finished.load(Ordering::Acquire) {
            return;
        }
        if self.state.paused.swap(true, Ordering::AcqRel) {
            return;
        }
        tracing::info!("Carve paused");
        self.forward(|realtime| realtime.feed_hold());
    }

    /// Continue emitting and request a cycle start
    pub fn resume(&self) {
        if self.is_aborted() || !self.state.paused.swap(false, Ordering::AcqRel) {
            return;
        }
        tracing::info!("Carve resumed");
        self.forward(|realtime| realtime.cycle_start());
    }

    /// Stop for good and request a soft reset
    pub fn abort(&self) {
        if self.state.aborted.swap(true, Ordering::AcqRel) {
            return;
        }
        self.state.paused.store(false, Ordering::Release);
        tracing::warn!("Carve aborted");
        self.forward(|realtime| realtime.soft_reset());
    }

    fn forward(&self, request: impl FnOnce(&dyn RealtimeControl)) {
        if let Some(realtime) = self.state.realtime.read().as_deref() {
            request(realtime);
        }
    }
}

impl CarveStreamer {
    /// Create a streamer; call [`start`](Self::start) before pulling lines
    pub fn new(toolpath: MultiPassToolpath, config: ToolpathConfig) -> Self {
        let total =
            PREAMBLE.len() + toolpath.clearing.len() + toolpath.finishing.len() + POSTAMBLE_LINES;
        Self {
            toolpath,
            config,
            phase: CarvePhase::NotStarted,
            index: 0,
            emitted: 0,
            total,
            last_feed: None,
            last_position: None,
            control: CarveControl::default(),
        }
    }

    /// Forward pause, resume and abort to the machine
    pub fn with_realtime(self, realtime: Arc<dyn RealtimeControl>) -> Self {
        *self.control.state.realtime.write() = Some(realtime);
        self
    }

    /// Handle that steers this carve from another thread
    pub fn control(&self) -> CarveControl {
        self.control.clone()
    }

    /// Current phase
    pub fn phase(&self) -> CarvePhase {
        self.phase
    }

    /// Lines the whole carve produces
    pub fn total_lines(&self) -> usize {
        self.total
    }

    /// Lines produced so far
    pub fn lines_emitted(&self) -> usize {
        self.emitted
    }

    pub fn is_paused(&self) -> bool {
        self.control.is_paused()
    }

    pub fn is_aborted(&self) -> bool {
        self.control.is_aborted()
    }

    /// Begin at the preamble
    ///
    /// Has no effect once started.
    pub fn start(&mut self) {
        if self.phase == CarvePhase::NotStarted && !self.is_aborted() {
            tracing::info!("Carve started: {} lines", self.total);
            self.enter(CarvePhase::Preamble);
        }
    }

    /// Produce the next line
    ///
    /// `None` while paused, after abort, once complete, or before `start`.
    pub fn next_line(&mut self) -> Option<String> {
        if self.is_paused() || self.is_aborted() {
            return None;
        }
        let line = match self.phase {
            CarvePhase::NotStarted | CarvePhase::Complete => return None,
            CarvePhase::Preamble => PREAMBLE[self.index].to_string(),
            CarvePhase::Clearing => {
                let point = self.toolpath.clearing[self.index];
                self.point_line(&point)
            }
            CarvePhase::Finishing => {
                let point = self.toolpath.finishing[self.index];
                self.point_line(&point)
            }
            CarvePhase::Postamble => self.postamble_line(self.index),
        };
        self.index += 1;
        self.emitted += 1;
        if self.index >= self.phase_len(self.phase) {
            self.enter(self.following(self.phase));
        }
        Some(line)
    }

    /// Fraction of lines emitted; 1.0 exactly once complete
    pub fn progress_fraction(&self) -> f64 {
        if self.phase == CarvePhase::Complete {
            return 1.0;
        }
        (self.emitted as f64 / self.total as f64).min(1.0)
    }

    /// Stop emitting and request a feed hold
    pub fn pause(&mut self) {
        if self.phase != CarvePhase::Complete {
            tracing::debug!("Pause at line {} of {}", self.emitted, self.total);
        }
        self.control.pause();
    }

    /// Continue emitting and request a cycle start
    pub fn resume(&mut self) {
        self.control.resume();
    }

    /// Stop for good and request a soft reset
    pub fn abort(&mut self) {
        if !self.is_aborted() {
            tracing::debug!("Abort at line {} of {}", self.emitted, self.total);
        }
        self.control.abort();
    }

    fn phase_len(&self, phase: CarvePhase) -> usize {
        match phase {
            CarvePhase::NotStarted | CarvePhase::Complete => 0,
            CarvePhase::Preamble => PREAMBLE.len(),
            CarvePhase::Clearing => self.toolpath.clearing.len(),
            CarvePhase::Finishing => self.toolpath.finishing.len(),
            CarvePhase::Postamble => POSTAMBLE_LINES,
        }
    }

    fn following(&self, phase: CarvePhase) -> CarvePhase {
        match phase {
            CarvePhase::NotStarted => CarvePhase::Preamble,
            CarvePhase::Preamble => CarvePhase::Clearing,
            CarvePhase::Clearing => CarvePhase::Finishing,
            CarvePhase::Finishing => CarvePhase::Postamble,
            CarvePhase::Postamble | CarvePhase::Complete => CarvePhase::Complete,
        }
    }

    /// Move to `phase`, skipping any that has no lines
    fn enter(&mut self, phase: CarvePhase) {
        let mut phase = phase;
        while phase != CarvePhase::Complete && self.phase_len(phase) == 0 {
            phase = self.following(phase);
        }
        tracing::debug!("Carve phase {:?} -> {:?}", self.phase, phase);
        self.phase = phase;
        self.index = 0;
        if phase == CarvePhase::Complete {
            self.control.state.finished.store(true, Ordering::Release);
            tracing::info!("Carve complete: {} lines", self.emitted);
        }
    }

    fn point_line(&mut self, point: &ToolpathPoint) -> String {
        let target = point.position;
        let axes = format!(
            "X{} Y{} Z{}",
            format_position(target.x),
            format_position(target.y),
            format_position(target.z)
        );
        let plunge = self
            .last_position
            .is_some_and(|from| is_plunge(&from, &target));
        self.last_position = Some(target);

        if point.rapid {
            return format!("G0 {}", axes);
        }
        let feed = if plunge {
            self.config.plunge_rate
        } else {
            self.config.feed_rate
        };
        if self.last_feed == Some(feed) {
            format!("G1 {}", axes)
        } else {
            self.last_feed = Some(feed);
            format!("G1 {} F{}", axes, format_number(feed))
        }
    }

    fn postamble_line(&self, index: usize) -> String {
        match index {
            0 => format!("G0 Z{}", format_position(self.config.safe_z)),
            1 => "M5".to_string(),
            _ => "M2".to_string(),
        }
    }
}

/// Straight down, no lateral travel
fn is_plunge(from: &Position, to: &Position) -> bool {
    const EPS: f64 = 1e-9;
    (to.x - from.x).abs() < EPS && (to.y - from.y).abs() < EPS && to.z < from.z - EPS
}

impl LineSource for CarveStreamer {
    fn next_line(&mut self) -> NextLine {
        match CarveStreamer::next_line(self) {
            Some(line) => NextLine::Line(line),
            None if self.is_aborted() || self.phase == CarvePhase::Complete => NextLine::Finished,
            None => NextLine::Pending,
        }
    }

    fn total_lines(&self) -> Option<usize> {
        Some(self.total)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    fn square() -> MultiPassToolpath {
        MultiPassToolpath {
            clearing: vec![
                ToolpathPoint::rapid(0.0, 0.0, 2.0),
                ToolpathPoint::feed(0.0, 0.0, -1.0),
                ToolpathPoint::feed(10.0, 0.0, -1.0),
                ToolpathPoint::feed(10.0, 10.0, -1.0),
            ],
            finishing: vec![ToolpathPoint::feed(0.0, 10.0, -1.0)],
        }
    }

    fn drain(streamer: &mut CarveStreamer) -> Vec<String> {
        std::iter::from_fn(|| streamer.next_line()).collect()
    }

    #[test]
    fn test_full_carve() {
        let mut streamer = CarveStreamer::new(square(), ToolpathConfig::default());
        assert_eq!(streamer.next_line(), None);
        streamer.start();
        let lines = drain(&mut streamer);
        assert_eq!(
            lines,
            vec![
                "G90",
                "G21",
                "G0 X0.000 Y0.000 Z2.000",
                "G1 X0.000 Y0.000 Z-1.000 F300",
                "G1 X10.000 Y0.000 Z-1.000 F1000",
                "G1 X10.000 Y10.000 Z-1.000",
                "G1 X0.000 Y10.000 Z-1.000",
                "G0 Z5.000",
                "M5",
                "M2",
            ]
        );
        assert_eq!(lines.len(), streamer.total_lines());
        assert_eq!(streamer.phase(), CarvePhase::Complete);
        assert_eq!(streamer.progress_fraction(), 1.0);
    }

    #[test]
    fn test_empty_passes_skipped() {
        let mut streamer = CarveStreamer::new(
            MultiPassToolpath {
                clearing: vec![],
                finishing: vec![ToolpathPoint::feed(1.0, 0.0, 0.0)],
            },
            ToolpathConfig::default(),
        );
        streamer.start();
        assert_eq!(streamer.next_line().as_deref(), Some("G90"));
        assert_eq!(streamer.next_line().as_deref(), Some("G21"));
        assert_eq!(streamer.phase(), CarvePhase::Finishing);

        let mut empty = CarveStreamer::new(MultiPassToolpath::default(), ToolpathConfig::default());
        empty.start();
        assert_eq!(drain(&mut empty), vec!["G90", "G21", "G0 Z5.000", "M5", "M2"]);
    }

    #[test]
    fn test_fraction_reaches_one_only_at_end() {
        let mut streamer = CarveStreamer::new(square(), ToolpathConfig::default());
        streamer.start();
        let mut last = streamer.progress_fraction();
        while streamer.next_line().is_some() {
            let now = streamer.progress_fraction();
            assert!(now >= last);
            assert_eq!(now == 1.0, streamer.phase() == CarvePhase::Complete);
            last = now;
        }
    }

    #[derive(Default)]
    struct Recorder(Mutex<Vec<&'static str>>);

    impl RealtimeControl for Recorder {
        fn feed_hold(&self) {
            self.0.lock().unwrap().push("hold");
        }
        fn cycle_start(&self) {
            self.0.lock().unwrap().push("start");
        }
        fn soft_reset(&self) {
            self.0.lock().unwrap().push("reset");
        }
    }

    #[test]
    fn test_pause_resume_abort() {
        let recorder = Arc::new(Recorder::default());
        let mut streamer = CarveStreamer::new(square(), ToolpathConfig::default())
            .with_realtime(recorder.clone());
        streamer.start();
        streamer.next_line();

        streamer.pause();
        streamer.pause();
        assert_eq!(streamer.next_line(), None);
        assert_eq!(LineSource::next_line(&mut streamer), NextLine::Pending);

        streamer.resume();
        assert_eq!(streamer.next_line().as_deref(), Some("G21"));

        streamer.abort();
        assert_eq!(streamer.next_line(), None);
        assert_eq!(LineSource::next_line(&mut streamer), NextLine::Finished);
        streamer.resume();
        assert_eq!(*recorder.0.lock().unwrap(), vec!["hold", "start", "reset"]);
    }

    #[test]
    fn test_control_handle_steers_boxed_streamer() {
        let recorder = Arc::new(Recorder::default());
        let streamer = CarveStreamer::new(square(), ToolpathConfig::default())
            .with_realtime(recorder.clone());
        let control = streamer.control();
        let mut source: Box<dyn LineSource + Send> = Box::new(streamer);
        assert_eq!(source.next_line(), NextLine::Pending);

        let mut started = CarveStreamer::new(square(), ToolpathConfig::default())
            .with_realtime(recorder.clone());
        let handle = started.control();
        started.start();
        let mut source: Box<dyn LineSource + Send> = Box::new(started);
        assert_eq!(source.next_line(), NextLine::Line("G90".to_string()));

        handle.pause();
        assert!(handle.is_paused());
        assert_eq!(source.next_line(), NextLine::Pending);
        handle.resume();
        assert_eq!(source.next_line(), NextLine::Line("G21".to_string()));
        handle.abort();
        assert_eq!(source.next_line(), NextLine::Finished);
        assert!(!control.is_aborted());
        assert_eq!(*recorder.0.lock().unwrap(), vec!["hold", "start", "reset"]);
    }

    #[test]
    fn test_pause_after_complete_is_ignored() {
        let recorder = Arc::new(Recorder::default());
        let mut streamer = CarveStreamer::new(MultiPassToolpath::default(), ToolpathConfig::default())
            .with_realtime(recorder.clone());
        let control = streamer.control();
        streamer.start();
        drain(&mut streamer);
        control.pause();
        assert!(!control.is_paused());
        assert!(recorder.0.lock().unwrap().is_empty());
    }

    #[test]
    fn test_fractional_feed_kept() {
        let path = MultiPassToolpath {
            clearing: vec![ToolpathPoint::feed(1.0, 0.0, 0.0)],
            finishing: vec![],
        };
        let config = ToolpathConfig {
            feed_rate: 12.5,
            ..ToolpathConfig::default()
        };
        let mut streamer = CarveStreamer::new(path, config);
        streamer.start();
        let lines = drain(&mut streamer);
        assert_eq!(lines[2], "G1 X1.000 Y0.000 Z0.000 F12.5");
    }

    #[test]
    fn test_toolpath_from_json() {
        let json = r#"{
            "clearing": [{"position": {"x": 1.0, "y": 2.0, "z": -0.5}}],
            "finishing": [{"position": {"x": 0.0, "y": 0.0, "z": 5.0}, "rapid": true}]
        }"#;
        let toolpath: MultiPassToolpath = serde_json::from_str(json).unwrap();
        assert!(!toolpath.clearing[0].rapid);
        assert!(toolpath.finishing[0].rapid);
    }
}
