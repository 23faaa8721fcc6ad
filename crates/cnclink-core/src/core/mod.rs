//! Controller-facing seams: events, listeners, the UI context token, line
//! sources for streaming and real-time control.

pub mod context;
pub mod event;
pub mod listener;

pub use context::UiContext;
pub use event::{event_channel, ControllerEvent, ControllerEvents, EventDispatcher};
pub use listener::ControllerListener;

use std::collections::VecDeque;
use std::sync::Arc;

/// Result of asking a [`LineSource`] for its next line
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NextLine {
    /// A line to send
    Line(String),
    /// Nothing right now; ask again on a later tick
    Pending,
    /// The source is exhausted
    Finished,
}

/// Supplier of lines for a stream
///
/// Pulled lazily by the IO context so large programs and generated
/// toolpaths never need to be materialised.
pub trait LineSource {
    /// Produce the next line
    fn next_line(&mut self) -> NextLine;

    /// Total number of lines, if known
    fn total_lines(&self) -> Option<usize> {
        None
    }
}

/// In-memory line source over an owned program
#[derive(Debug, Clone, Default)]
pub struct VecLineSource {
    lines: VecDeque<String>,
    total: usize,
}

impl VecLineSource {
    /// Wrap a program; blank lines are kept out of the stream
    pub fn new(lines: Vec<String>) -> Self {
        let lines: VecDeque<String> = lines
            .into_iter()
            .map(|l| l.trim().to_string())
            .filter(|l| !l.is_empty())
            .collect();
        let total = lines.len();
        Self { lines, total }
    }
}

impl LineSource for VecLineSource {
    fn next_line(&mut self) -> NextLine {
        match self.lines.pop_front() {
            Some(line) => NextLine::Line(line),
            None => NextLine::Finished,
        }
    }

    fn total_lines(&self) -> Option<usize> {
        Some(self.total)
    }
}

impl<T: LineSource + ?Sized> LineSource for Box<T> {
    fn next_line(&mut self) -> NextLine {
        (**self).next_line()
    }

    fn total_lines(&self) -> Option<usize> {
        (**self).total_lines()
    }
}

/// Shared source: the UI keeps a handle (to pause, inspect progress) while
/// the IO context pulls lines.
impl<T: LineSource + ?Sized> LineSource for Arc<parking_lot::Mutex<T>> {
    fn next_line(&mut self) -> NextLine {
        self.lock().next_line()
    }

    fn total_lines(&self) -> Option<usize> {
        self.lock().total_lines()
    }
}

/// Single-byte real-time requests a stream producer may forward to the
/// controller
pub trait RealtimeControl: Send + Sync {
    /// Request feed hold (`!`)
    fn feed_hold(&self);

    /// Request cycle start / resume (`~`)
    fn cycle_start(&self);

    /// Request soft reset (0x18)
    fn soft_reset(&self);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_vec_source_skips_blank_lines() {
        let mut source = VecLineSource::new(vec![
            "G21".to_string(),
            "  ".to_string(),
            " G0 X1 ".to_string(),
        ]);
        assert_eq!(source.total_lines(), Some(2));
        assert_eq!(source.next_line(), NextLine::Line("G21".to_string()));
        assert_eq!(source.next_line(), NextLine::Line("G0 X1".to_string()));
        assert_eq!(source.next_line(), NextLine::Finished);
        assert_eq!(source.next_line(), NextLine::Finished);
    }

    #[test]
    fn test_shared_source() {
        let shared = Arc::new(parking_lot::Mutex::new(VecLineSource::new(vec![
            "M3 S1000".to_string(),
        ])));
        let mut puller = Arc::clone(&shared);
        assert_eq!(puller.total_lines(), Some(1));
        assert_eq!(puller.next_line(), NextLine::Line("M3 S1000".to_string()));
        assert_eq!(shared.lock().next_line(), NextLine::Finished);
    }
}
