//! Terminal front end for controller events
//!
//! [`ConsoleListener`] prints what an operator needs to see and records the
//! rendezvous points (errors, tool changes, alarms) that the command loop has
//! to answer.

use cnclink_core::{ControllerListener, LineAck, MachineStatus, StreamProgress, StreamingError};

/// Listener used by every CLI command
#[derive(Debug, Default)]
pub struct ConsoleListener {
    /// Echo raw wire traffic
    pub verbose: bool,
    /// Lines received from the device, in order
    pub received: Vec<String>,
    /// Acknowledgements of manual commands
    pub manual_acks: Vec<LineAck>,
    /// Set once the stream has finished
    pub completed: Option<StreamProgress>,
    /// Streaming fault waiting for an answer
    pub streaming_error: Option<StreamingError>,
    /// Tool change waiting for an answer
    pub tool_change: Option<u32>,
    /// Alarm raised by the firmware
    pub alarm: Option<(u16, String)>,
    /// The link went down
    pub disconnected: bool,
    last_percent: Option<u32>,
    last_state: Option<String>,
}

impl ConsoleListener {
    pub fn new(verbose: bool) -> Self {
        Self {
            verbose,
            ..Self::default()
        }
    }

    /// Forget collected lines and acknowledgements
    pub fn clear_received(&mut self) {
        self.received.clear();
        self.manual_acks.clear();
    }
}

impl ControllerListener for ConsoleListener {
    fn on_connection_changed(&mut self, connected: bool, version: Option<&str>) {
        if connected {
            println!("Connected: {}", version.unwrap_or("unknown firmware"));
        } else {
            println!("Disconnected");
            self.disconnected = true;
        }
    }

    fn on_status(&mut self, status: &MachineStatus) {
        let state = status.state.to_string();
        if self.last_state.as_deref() != Some(state.as_str()) {
            if self.verbose {
                println!("{}", status);
            }
            self.last_state = Some(state);
        }
    }

    fn on_line_acked(&mut self, ack: &LineAck) {
        if ack.line_index.is_none() {
            self.manual_acks.push(ack.clone());
        }
    }

    fn on_progress(&mut self, progress: &StreamProgress) {
        let Some(fraction) = progress.fraction() else {
            return;
        };
        let percent = (fraction * 100.0).floor() as u32;
        if self.last_percent.is_none_or(|last| percent >= last + 5 || (percent == 100 && last < 100)) {
            self.last_percent = Some(percent);
            println!("{}", progress);
        }
    }

    fn on_alarm(&mut self, code: u16, description: &str) {
        eprintln!("ALARM:{} {}", code, description);
        self.alarm = Some((code, description.to_string()));
    }

    fn on_error(&mut self, message: &str) {
        eprintln!("error: {}", message);
    }

    fn on_streaming_error(&mut self, error: &StreamingError) {
        eprintln!("{}", error);
        self.streaming_error = Some(error.clone());
    }

    fn on_raw_line(&mut self, line: &str, sent: bool) {
        if self.verbose {
            println!("{} {}", if sent { ">>" } else { "<<" }, line);
        }
        if !sent {
            self.received.push(line.to_string());
        }
    }

    fn on_tool_change(&mut self, tool: u32) {
        println!("Tool change requested: T{}", tool);
        self.tool_change = Some(tool);
    }

    fn on_stream_completed(&mut self, progress: &StreamProgress) {
        println!("Stream complete: {}", progress);
        self.completed = Some(*progress);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cnclink_core::core::event::dispatch;
    use cnclink_core::ControllerEvent;

    #[test]
    fn test_records_rendezvous_points() {
        let mut listener = ConsoleListener::new(false);
        dispatch(&ControllerEvent::ToolChange(3), &mut listener);
        dispatch(
            &ControllerEvent::RawLine {
                line: "$110=3000.000".to_string(),
                sent: false,
            },
            &mut listener,
        );
        dispatch(
            &ControllerEvent::RawLine {
                line: "$$".to_string(),
                sent: true,
            },
            &mut listener,
        );
        dispatch(
            &ControllerEvent::ConnectionChanged {
                connected: false,
                version: None,
            },
            &mut listener,
        );
        assert_eq!(listener.tool_change, Some(3));
        assert_eq!(listener.received, vec!["$110=3000.000"]);
        assert!(listener.disconnected);
    }
}
