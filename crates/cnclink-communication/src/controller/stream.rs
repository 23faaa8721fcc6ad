//! Character-counting stream engine
//!
//! Keeps the firmware's RX buffer as full as possible without overflowing
//! it. Every line sent is remembered in a FIFO with its byte length
//! (newline included); the firmware answers each line exactly once and in
//! order, so each `ok` or `error:N` retires the oldest entry.
//!
//! Manual commands share the FIFO with stream lines and are sent ahead of
//! them, which keeps acknowledgements aligned no matter who sent what.
//!
//! The engine does no IO. The IO context asks it what to send, writes the
//! lines, feeds responses back and publishes the events it produced.

use crate::firmware::grbl::utils::{is_tool_change, tool_number};
use crate::firmware::grbl::describe_error;
use cnclink_core::{
    ControllerEvent, LineAck, LineSource, NextLine, StreamProgress, StreamingError,
};
use std::collections::VecDeque;
use std::time::Instant;

use super::shared::Job;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Origin {
    Stream(usize),
    Manual,
}

#[derive(Debug, Clone)]
struct InFlight {
    origin: Origin,
    line: String,
    len: usize,
}

struct ActiveStream {
    source: Job,
    lookahead: Option<String>,
    next_index: usize,
    source_finished: bool,
    stopping: bool,
    error: Option<StreamingError>,
    tool_change: Option<u32>,
    last_tool: Option<u32>,
    progress: StreamProgress,
    started: Instant,
}

impl ActiveStream {
    fn is_blocked(&self) -> bool {
        self.error.is_some() || self.tool_change.is_some()
    }

    fn snapshot(&mut self, now: Instant) -> StreamProgress {
        self.progress.elapsed_seconds = now.duration_since(self.started).as_secs_f64();
        self.progress
    }
}

/// GRBL's code for a line over the receive limit
const LINE_TOO_LONG: u16 = 11;

/// Whether a line of `len` bytes may be sent now
fn fits(used: usize, capacity: usize, len: usize) -> bool {
    used + len <= capacity
}

/// Flow-control state of one connection
pub struct StreamEngine {
    rx_buffer_size: usize,
    in_flight: VecDeque<InFlight>,
    buffer_used: usize,
    manual: VecDeque<String>,
    stream: Option<ActiveStream>,
    last_progress: Option<StreamProgress>,
    events: Vec<ControllerEvent>,
}

impl StreamEngine {
    /// Create an engine for a firmware with `rx_buffer_size` bytes of RX buffer
    pub fn new(rx_buffer_size: usize) -> Self {
        Self {
            rx_buffer_size: rx_buffer_size.max(1),
            in_flight: VecDeque::new(),
            buffer_used: 0,
            manual: VecDeque::new(),
            stream: None,
            last_progress: None,
            events: Vec::new(),
        }
    }

    /// Bytes sent but not yet acknowledged
    pub fn buffer_used(&self) -> usize {
        self.buffer_used
    }

    /// Lines sent but not yet acknowledged
    pub fn in_flight(&self) -> usize {
        self.in_flight.len()
    }

    /// Whether a stream is active
    pub fn is_streaming(&self) -> bool {
        self.stream.is_some()
    }

    /// Progress of the active stream, or of the last one once it ended
    pub fn progress(&self) -> Option<StreamProgress> {
        self.stream
            .as_ref()
            .map(|s| s.progress)
            .or(self.last_progress)
    }

    /// Unacknowledged streaming error
    pub fn pending_error(&self) -> Option<&StreamingError> {
        self.stream.as_ref().and_then(|s| s.error.as_ref())
    }

    /// Tool awaiting a tool-change acknowledgement
    pub fn tool_change_pending(&self) -> Option<u32> {
        self.stream.as_ref().and_then(|s| s.tool_change)
    }

    /// Events produced since the last call
    pub fn take_events(&mut self) -> Vec<ControllerEvent> {
        std::mem::take(&mut self.events)
    }

    /// Begin streaming from `source`
    pub fn start(&mut self, source: Job, now: Instant) {
        let total_lines = source.total_lines();
        tracing::info!(
            "Stream started ({} lines)",
            total_lines.map_or_else(|| "unknown".to_string(), |n| n.to_string())
        );
        self.stream = Some(ActiveStream {
            source,
            lookahead: None,
            next_index: 0,
            source_finished: false,
            stopping: false,
            error: None,
            tool_change: None,
            last_tool: None,
            progress: StreamProgress {
                total_lines,
                ..StreamProgress::default()
            },
            started: now,
        });
    }

    /// Queue a manual command; it goes out ahead of stream lines
    pub fn push_manual(&mut self, line: String) {
        let line = line.trim().to_string();
        if !line.is_empty() {
            self.manual.push_back(line);
        }
    }

    /// Stop feeding the stream; lines already sent drain normally
    ///
    /// A pending error or tool change is dropped since nothing more will be
    /// sent past it.
    pub fn stop(&mut self) {
        if let Some(stream) = self.stream.as_mut() {
            tracing::info!("Stream stop requested");
            stream.stopping = true;
            stream.lookahead = None;
            stream.error = None;
            stream.tool_change = None;
        }
    }

    /// Clear a pending streaming error so the stream can continue
    pub fn acknowledge_error(&mut self) {
        if let Some(stream) = self.stream.as_mut() {
            if stream.error.take().is_some() {
                tracing::info!("Streaming error acknowledged");
            }
        }
    }

    /// Clear a pending tool change so the stream can continue
    pub fn acknowledge_tool_change(&mut self) {
        if let Some(stream) = self.stream.as_mut() {
            if let Some(tool) = stream.tool_change.take() {
                tracing::info!("Tool change to T{} acknowledged", tool);
            }
        }
    }

    /// Forget every line in flight; the firmware has been reset
    ///
    /// An active stream ends without `StreamCompleted`. Returns `true` if one
    /// was active.
    pub fn abort(&mut self, now: Instant) -> bool {
        self.in_flight.clear();
        self.buffer_used = 0;
        self.manual.clear();
        match self.stream.take() {
            Some(mut stream) => {
                tracing::warn!("Stream aborted after {} lines", stream.progress.acked_lines);
                let progress = stream.snapshot(now);
                self.last_progress = Some(progress);
                self.events.push(ControllerEvent::Progress(progress));
                true
            }
            None => false,
        }
    }

    /// Lines to write now, already accounted as in flight
    pub fn fill(&mut self) -> Vec<String> {
        let mut out = Vec::new();
        loop {
            if let Some(len) = self.manual.front().map(|l| l.len() + 1) {
                if len > self.rx_buffer_size {
                    if let Some(line) = self.manual.pop_front() {
                        self.reject_manual(line, len);
                    }
                    continue;
                }
                if !fits(self.buffer_used, self.rx_buffer_size, len) {
                    break;
                }
                if let Some(line) = self.manual.pop_front() {
                    self.track(Origin::Manual, &line, len);
                    out.push(line);
                }
                continue;
            }

            let Some(stream) = self.stream.as_mut() else {
                break;
            };
            if stream.is_blocked() || stream.stopping {
                break;
            }
            if stream.lookahead.is_none() && !stream.source_finished {
                match stream.source.next_line() {
                    NextLine::Line(line) => {
                        let line = line.trim();
                        if !line.is_empty() {
                            stream.lookahead = Some(line.to_string());
                        }
                        continue;
                    }
                    NextLine::Pending => break,
                    NextLine::Finished => {
                        stream.source_finished = true;
                        break;
                    }
                }
            }
            let Some(len) = stream.lookahead.as_ref().map(|l| l.len() + 1) else {
                break;
            };
            if len > self.rx_buffer_size {
                let Some(line) = stream.lookahead.take() else {
                    break;
                };
                let index = stream.next_index;
                stream.next_index += 1;
                let message = format!(
                    "line exceeds RX buffer ({} > {} bytes)",
                    len, self.rx_buffer_size
                );
                tracing::warn!("Line {} not sent: {}", index, message);
                let error = StreamingError {
                    line_index: index,
                    error_code: LINE_TOO_LONG,
                    error_message: message,
                    failed_line: line,
                    lines_in_flight: self.in_flight.len(),
                };
                stream.progress.acked_lines += 1;
                stream.progress.error_count += 1;
                stream.error = Some(error.clone());
                let progress = stream.progress;
                self.events.push(ControllerEvent::StreamingError(error));
                self.events.push(ControllerEvent::Progress(progress));
                break;
            }
            if !fits(self.buffer_used, self.rx_buffer_size, len) {
                break;
            }
            let Some(line) = stream.lookahead.take() else {
                break;
            };

            let index = stream.next_index;
            stream.next_index += 1;
            let line_tool = tool_number(&line);
            if is_tool_change(&line) {
                let tool = line_tool.or(stream.last_tool).unwrap_or(0);
                stream.tool_change = Some(tool);
                tracing::info!("Tool change to T{} requested; stream halted", tool);
                self.events.push(ControllerEvent::ToolChange(tool));
            }
            if line_tool.is_some() {
                stream.last_tool = line_tool;
            }

            self.in_flight.push_back(InFlight {
                origin: Origin::Stream(index),
                line: line.clone(),
                len,
            });
            self.buffer_used += len;
            out.push(line);
        }
        out
    }

    /// A manual line that can never fit is answered locally
    fn reject_manual(&mut self, line: String, len: usize) {
        let message = format!(
            "'{}' exceeds RX buffer ({} > {} bytes)",
            line, len, self.rx_buffer_size
        );
        tracing::warn!("{}", message);
        self.events.push(ControllerEvent::LineAcked(LineAck {
            line_index: None,
            line,
            ok: false,
            error_code: Some(LINE_TOO_LONG),
        }));
        self.events.push(ControllerEvent::Error(message));
    }

    fn track(&mut self, origin: Origin, line: &str, len: usize) {
        self.in_flight.push_back(InFlight {
            origin,
            line: line.to_string(),
            len,
        });
        self.buffer_used += len;
    }

    fn retire(&mut self) -> Option<InFlight> {
        let entry = self.in_flight.pop_front()?;
        self.buffer_used = self.buffer_used.saturating_sub(entry.len);
        Some(entry)
    }

    /// The firmware answered `ok`
    pub fn on_ok(&mut self, now: Instant) {
        let Some(entry) = self.retire() else {
            tracing::warn!("Received ok with nothing in flight");
            return;
        };
        let line_index = match entry.origin {
            Origin::Stream(index) => Some(index),
            Origin::Manual => None,
        };
        self.events.push(ControllerEvent::LineAcked(LineAck {
            line_index,
            line: entry.line,
            ok: true,
            error_code: None,
        }));
        if let (Some(_), Some(stream)) = (line_index, self.stream.as_mut()) {
            stream.progress.acked_lines += 1;
            let progress = stream.snapshot(now);
            self.events.push(ControllerEvent::Progress(progress));
        }
    }

    /// The firmware answered `error:N`
    pub fn on_error(&mut self, code: u16, now: Instant) {
        let lines_in_flight = self.in_flight.len();
        let Some(entry) = self.retire() else {
            tracing::warn!("Received error:{} with nothing in flight", code);
            return;
        };
        let message = describe_error(code);
        tracing::warn!("'{}' rejected: error:{} ({})", entry.line, code, message);
        let line_index = match entry.origin {
            Origin::Stream(index) => Some(index),
            Origin::Manual => None,
        };
        self.events.push(ControllerEvent::LineAcked(LineAck {
            line_index,
            line: entry.line.clone(),
            ok: false,
            error_code: Some(code),
        }));

        match (line_index, self.stream.as_mut()) {
            (Some(index), Some(stream)) => {
                stream.progress.acked_lines += 1;
                stream.progress.error_count += 1;
                let error = StreamingError {
                    line_index: index,
                    error_code: code,
                    error_message: message.to_string(),
                    failed_line: entry.line,
                    lines_in_flight,
                };
                stream.error = Some(error.clone());
                let progress = stream.snapshot(now);
                self.events.push(ControllerEvent::StreamingError(error));
                self.events.push(ControllerEvent::Progress(progress));
            }
            _ => {
                self.events.push(ControllerEvent::Error(format!(
                    "'{}' rejected: error:{} ({})",
                    entry.line, code, message
                )));
            }
        }
    }

    /// End the stream once it is drained
    ///
    /// A stream is done when its source is exhausted (or it was stopped), no
    /// stream line is in flight and nothing awaits acknowledgement. Returns
    /// `true` when the stream ended on this call.
    pub fn check_finished(&mut self, now: Instant) -> bool {
        let stream_in_flight = self
            .in_flight
            .iter()
            .any(|e| matches!(e.origin, Origin::Stream(_)));
        let Some(stream) = self.stream.as_mut() else {
            return false;
        };
        if stream_in_flight || stream.is_blocked() {
            return false;
        }
        let exhausted = stream.source_finished && stream.lookahead.is_none();
        if !(exhausted || stream.stopping) {
            return false;
        }

        let progress = stream.snapshot(now);
        if stream.stopping {
            tracing::info!("Stream stopped: {}", progress);
            self.events.push(ControllerEvent::Progress(progress));
        } else {
            tracing::info!("Stream complete: {}", progress);
            self.events.push(ControllerEvent::StreamCompleted(progress));
        }
        self.stream = None;
        self.last_progress = Some(progress);
        true
    }
}
