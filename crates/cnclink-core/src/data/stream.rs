//! Stream progress, per-line acknowledgements and streaming faults.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Progress of the active stream
///
/// Every counter is monotonically non-decreasing for the lifetime of one
/// stream.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct StreamProgress {
    /// Total lines, when the source knows it up front
    pub total_lines: Option<usize>,
    /// Lines the firmware has acknowledged (ok or error)
    pub acked_lines: usize,
    /// Lines answered with `error:N`
    pub error_count: usize,
    /// Seconds since the stream started
    pub elapsed_seconds: f64,
}

impl StreamProgress {
    /// Fraction complete in `[0, 1]`, when the total is known
    pub fn fraction(&self) -> Option<f64> {
        match self.total_lines {
            Some(0) => Some(1.0),
            Some(total) => Some((self.acked_lines as f64 / total as f64).min(1.0)),
            None => None,
        }
    }
}

impl fmt::Display for StreamProgress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.total_lines {
            Some(total) => write!(f, "{}/{} lines", self.acked_lines, total)?,
            None => write!(f, "{} lines", self.acked_lines)?,
        }
        if self.error_count > 0 {
            write!(f, ", {} errors", self.error_count)?;
        }
        write!(f, " ({:.1}s)", self.elapsed_seconds)
    }
}

/// A streamed line the firmware rejected with `error:N`
///
/// The stream stays blocked until the operator acknowledges it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamingError {
    /// Zero-based index of the failed line in the stream
    pub line_index: usize,
    /// Firmware error code
    pub error_code: u16,
    /// Human-readable description of the code
    pub error_message: String,
    /// Text of the failed line
    pub failed_line: String,
    /// Lines in flight when the error arrived, the failed one included
    pub lines_in_flight: usize,
}

impl fmt::Display for StreamingError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "line {}: error:{} ({}) on '{}'",
            self.line_index + 1,
            self.error_code,
            self.error_message,
            self.failed_line
        )
    }
}

/// Acknowledgement of one line sent to the firmware
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LineAck {
    /// Stream index, `None` for manual commands
    pub line_index: Option<usize>,
    /// Text as sent, without the newline
    pub line: String,
    /// `true` for `ok`
    pub ok: bool,
    /// Code carried by `error:N`
    pub error_code: Option<u16>,
}
