//! Controller listener interface
//!
//! Defines the listener trait for controller events. Every method runs on the
//! UI context, in the order the IO context queued the events.

use crate::data::{LineAck, MachineStatus, StreamProgress, StreamingError};

/// Listener trait for controller events
///
/// Implement the methods you care about; the rest default to no-ops.
pub trait ControllerListener {
    /// Called when the connection opens or closes
    fn on_connection_changed(&mut self, _connected: bool, _version: Option<&str>) {}

    /// Called with each fresh status snapshot
    fn on_status(&mut self, _status: &MachineStatus) {}

    /// Called when a line is acknowledged
    fn on_line_acked(&mut self, _ack: &LineAck) {}

    /// Called when stream progress changes
    fn on_progress(&mut self, _progress: &StreamProgress) {}

    /// Called when an alarm occurs
    fn on_alarm(&mut self, _code: u16, _description: &str) {}

    /// Called when an error occurs
    fn on_error(&mut self, _message: &str) {}

    /// Called when a streamed line fails
    fn on_streaming_error(&mut self, _error: &StreamingError) {}

    /// Called for every line sent or received
    fn on_raw_line(&mut self, _line: &str, _sent: bool) {}

    /// Called when the stream halts for a tool change
    fn on_tool_change(&mut self, _tool: u32) {}

    /// Called when a stream completes
    fn on_stream_completed(&mut self, _progress: &StreamProgress) {}
}
