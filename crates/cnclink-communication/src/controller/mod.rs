//! Machine controller
//!
//! [`CncController`] is the UI-facing handle. It validates requests against
//! the latest snapshot and hands them to the IO context, which owns the
//! device on a dedicated thread. Nothing here waits on IO: requests are
//! queued and picked up on the next tick, and every getter reads a
//! snapshot the IO context publishes.

mod config;
mod handshake;
mod io;
mod shared;
mod stream;

pub use config::ControllerConfig;
pub use io::IoContext;
pub use stream::StreamEngine;

use crate::device::{Device, DeviceBackend, SerialDevice, SimulatedDevice, SimulatorConfig};
use crate::firmware::grbl::utils::{format_jog, is_motion_command};
use crate::firmware::{
    override_sequence, validate_override, OverrideTarget, RapidOverrideLevel,
};
use cnclink_core::{
    event_channel, ControllerError, ControllerEvents, ConnectionError, Error, EventDispatcher,
    FirmwareInfo, LineSource, MachineState, MachineStatus, Position, RealtimeControl, Result,
    StreamProgress, StreamingError, VecLineSource, WorkOffset,
};
use handshake::{handshake, Handshake};
use shared::{bits, Shared};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::thread::JoinHandle;

/// UI-facing controller handle
pub struct CncController {
    config: ControllerConfig,
    shared: Arc<Shared>,
    events: EventDispatcher,
    io_thread: Option<JoinHandle<()>>,
}

impl CncController {
    /// Create a disconnected controller and the receiver for its events
    pub fn new(config: ControllerConfig) -> (Self, ControllerEvents) {
        let config = config.normalized();
        let (events, receiver) = event_channel(config.event_queue_capacity);
        (
            Self {
                config,
                shared: Arc::new(Shared::default()),
                events,
                io_thread: None,
            },
            receiver,
        )
    }

    /// Configuration in effect
    pub fn config(&self) -> &ControllerConfig {
        &self.config
    }

    // ---- connection ----

    /// Open a serial port and start the IO thread
    ///
    /// On failure the port is closed again and the controller stays
    /// disconnected; no events are emitted.
    pub async fn connect(&mut self, port: &str, baud_rate: u32) -> Result<()> {
        self.ensure_disconnected()?;
        let port = port.to_string();
        let timeout = self.config.handshake_timeout();
        let (device, greeting) = tokio::task::spawn_blocking(move || -> Result<(Device, Handshake)> {
            let mut device = Device::from(SerialDevice::open(&port, baud_rate)?);
            open_with_handshake(&mut device, timeout).map(|greeting| (device, greeting))
        })
        .await
        .map_err(|e| Error::other(format!("connect task failed: {}", e)))??;
        self.start_io(device, greeting)
    }

    /// Connect to the built-in simulator with default settings
    pub async fn connect_simulator(&mut self) -> Result<()> {
        self.connect_simulator_with(SimulatorConfig::default()).await
    }

    /// Connect to the built-in simulator
    pub async fn connect_simulator_with(&mut self, config: SimulatorConfig) -> Result<()> {
        self.ensure_disconnected()?;
        let timeout = self.config.handshake_timeout();
        let (device, greeting) = tokio::task::spawn_blocking(move || -> Result<(Device, Handshake)> {
            let mut device = Device::from(SimulatedDevice::new(config));
            open_with_handshake(&mut device, timeout).map(|greeting| (device, greeting))
        })
        .await
        .map_err(|e| Error::other(format!("connect task failed: {}", e)))??;
        self.start_io(device, greeting)
    }

    /// Take over an already identified device without spawning a thread
    ///
    /// The caller drives the returned context with [`IoContext::tick`]. Used
    /// by tests and by hosts that run their own IO loop.
    pub fn attach<B: DeviceBackend>(
        &mut self,
        device: B,
        firmware: FirmwareInfo,
        status: Option<MachineStatus>,
    ) -> Result<IoContext<B>> {
        self.ensure_disconnected()?;
        let mut io = self.prepare(device, firmware, status);
        io.announce();
        Ok(io)
    }

    fn prepare<B: DeviceBackend>(
        &mut self,
        device: B,
        firmware: FirmwareInfo,
        status: Option<MachineStatus>,
    ) -> IoContext<B> {
        if let Some(stale) = self.io_thread.take() {
            // a thread that lost its link has already returned
            let _ = stale.join();
        }
        self.shared.reset();
        self.events.rearm();
        if let Some(status) = &status {
            *self.shared.status.write() = status.clone();
        }
        *self.shared.firmware.write() = Some(firmware.clone());
        self.shared.connected.store(true, Ordering::Release);
        IoContext::new(
            device,
            self.shared.clone(),
            self.events.clone(),
            self.config.clone(),
            firmware,
            status,
        )
    }

    fn start_io(&mut self, device: Device, greeting: Handshake) -> Result<()> {
        let description = device.describe();
        let io = self.prepare(device, greeting.firmware, greeting.status);
        let spawned = std::thread::Builder::new()
            .name("cnclink-io".to_string())
            .spawn(move || io.run());
        match spawned {
            Ok(handle) => {
                tracing::info!("Connected to {}", description);
                self.io_thread = Some(handle);
                Ok(())
            }
            Err(e) => {
                self.shared.connected.store(false, Ordering::Release);
                Err(ConnectionError::IoError {
                    reason: format!("failed to spawn IO thread: {}", e),
                }
                .into())
            }
        }
    }

    /// Stop the IO thread and close the device
    ///
    /// Safe to call when already disconnected. An attached context closes
    /// the device on its next tick.
    pub fn disconnect(&mut self) {
        self.shared.shutdown.store(true, Ordering::Release);
        if let Some(handle) = self.io_thread.take() {
            // the IO thread may be parked on a full event queue
            self.events.cancel();
            if handle.join().is_err() {
                tracing::error!("IO thread panicked");
            }
        }
    }

    fn ensure_disconnected(&self) -> Result<()> {
        if self.shared.is_connected() {
            return Err(ControllerError::AlreadyConnected.into());
        }
        Ok(())
    }

    fn ensure_connected(&self) -> Result<()> {
        if !self.shared.is_connected() {
            return Err(ControllerError::NotConnected.into());
        }
        Ok(())
    }

    fn ensure_state(
        &self,
        operation: &str,
        allowed: impl Fn(MachineState) -> bool,
    ) -> Result<()> {
        self.ensure_connected()?;
        let state = self.state();
        if allowed(state) {
            return Ok(());
        }
        if state == MachineState::Alarm {
            return Err(ControllerError::AlarmLocked.into());
        }
        Err(ControllerError::InvalidState {
            operation: operation.to_string(),
            state: state.to_string(),
        }
        .into())
    }

    // ---- snapshots ----

    /// Whether a device is connected
    pub fn is_connected(&self) -> bool {
        self.shared.is_connected()
    }

    /// Latest machine state
    pub fn state(&self) -> MachineState {
        self.shared.status.read().state
    }

    /// Latest status snapshot
    pub fn status(&self) -> MachineStatus {
        self.shared.status.read().clone()
    }

    /// Firmware identified at connect time
    pub fn firmware(&self) -> Option<FirmwareInfo> {
        self.shared.firmware.read().clone()
    }

    /// Progress of the current or last stream
    pub fn progress(&self) -> Option<StreamProgress> {
        *self.shared.progress.read()
    }

    /// Whether a stream is active
    pub fn is_streaming(&self) -> bool {
        self.shared.is_streaming()
    }

    /// Streaming error awaiting acknowledgement
    pub fn pending_error(&self) -> Option<StreamingError> {
        self.shared.pending_error.read().clone()
    }

    /// Tool awaiting a tool-change acknowledgement
    pub fn tool_change_pending(&self) -> Option<u32> {
        *self.shared.tool_change.read()
    }

    /// Bytes sent but not yet acknowledged
    pub fn buffer_used(&self) -> usize {
        self.shared.buffer_used.load(Ordering::Acquire)
    }

    /// Work offsets reported by the last `$#`
    pub fn work_offsets(&self) -> Vec<WorkOffset> {
        self.shared.work_offsets.read().clone()
    }

    /// Handle for real-time requests from other components
    pub fn realtime_handle(&self) -> RealtimeHandle {
        RealtimeHandle {
            shared: self.shared.clone(),
        }
    }

    // ---- streaming ----

    /// Stream an in-memory program
    pub fn start_stream(&self, lines: Vec<String>) -> Result<()> {
        self.start_stream_source(Box::new(VecLineSource::new(lines)))
    }

    /// Stream lines pulled lazily from `source`
    pub fn start_stream_source(&self, source: Box<dyn LineSource + Send>) -> Result<()> {
        self.ensure_connected()?;
        if self.shared.is_streaming() {
            return Err(ControllerError::StreamActive.into());
        }
        self.ensure_state("start a stream", |s| s.allows_streaming())?;
        if self
            .shared
            .streaming
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err(ControllerError::StreamActive.into());
        }
        *self.shared.progress.write() = Some(StreamProgress {
            total_lines: source.total_lines(),
            ..StreamProgress::default()
        });
        self.shared.set_job(source);
        Ok(())
    }

    /// Stop feeding the stream; lines already sent still complete
    pub fn stop_stream(&self) -> Result<()> {
        self.ensure_connected()?;
        if !self.shared.is_streaming() {
            return Err(ControllerError::NoActiveStream.into());
        }
        self.shared.stop_requested.store(true, Ordering::Release);
        Ok(())
    }

    /// Stop the stream and soft-reset the firmware
    pub fn abort(&self) -> Result<()> {
        self.ensure_connected()?;
        self.shared.stop_requested.store(true, Ordering::Release);
        self.shared.request(bits::RESET);
        Ok(())
    }

    /// Resume after a streaming error
    pub fn acknowledge_error(&self) {
        self.shared.ack_error.store(true, Ordering::Release);
    }

    /// Resume after a tool change
    pub fn acknowledge_tool_change(&self) {
        self.shared.ack_tool_change.store(true, Ordering::Release);
    }

    // ---- motion and commands ----

    /// Jog by a relative distance in millimetres
    pub fn jog(&self, delta: Position, feed_rate: f64) -> Result<()> {
        if !(feed_rate.is_finite() && feed_rate > 0.0) {
            return Err(ControllerError::InvalidArgument {
                name: "feed rate".to_string(),
                reason: format!("{} is not a positive rate", feed_rate),
            }
            .into());
        }
        self.ensure_state("jog", |s| s.allows_jog())?;
        let command = format_jog(&delta, feed_rate).ok_or_else(|| ControllerError::InvalidArgument {
            name: "jog distance".to_string(),
            reason: "every axis is zero".to_string(),
        })?;
        self.shared.push_command(command);
        Ok(())
    }

    /// Cancel the active jog
    pub fn jog_cancel(&self) -> Result<()> {
        self.ensure_connected()?;
        self.shared.request(bits::JOG_CANCEL);
        Ok(())
    }

    /// Run the homing cycle
    pub fn home(&self) -> Result<()> {
        self.ensure_state("home", |s| s.allows_homing())?;
        self.shared.push_command("$H".to_string());
        Ok(())
    }

    /// Clear the alarm lock
    pub fn unlock(&self) -> Result<()> {
        self.ensure_connected()?;
        self.shared.push_command("$X".to_string());
        Ok(())
    }

    /// Feed hold
    pub fn feed_hold(&self) -> Result<()> {
        self.ensure_connected()?;
        self.shared.request(bits::HOLD);
        Ok(())
    }

    /// Cycle start / resume
    pub fn cycle_start(&self) -> Result<()> {
        self.ensure_connected()?;
        self.shared.request(bits::CYCLE_START);
        Ok(())
    }

    /// Soft reset; clears all in-flight accounting
    pub fn soft_reset(&self) -> Result<()> {
        self.ensure_connected()?;
        self.shared.request(bits::RESET);
        Ok(())
    }

    /// Send a free-form line
    ///
    /// Motion is refused in alarm and while a stream is running.
    pub fn send_command(&self, line: &str) -> Result<()> {
        self.ensure_connected()?;
        let line = line.trim();
        if line.is_empty() {
            return Err(ControllerError::InvalidArgument {
                name: "command".to_string(),
                reason: "empty line".to_string(),
            }
            .into());
        }
        if is_motion_command(line) {
            if self.state() == MachineState::Alarm && !line.eq_ignore_ascii_case("$H") {
                return Err(ControllerError::AlarmLocked.into());
            }
            if self.shared.is_streaming() {
                return Err(ControllerError::StreamActive.into());
            }
        }
        self.shared.push_command(line.to_string());
        Ok(())
    }

    /// Request the settings dump (`$$`)
    pub fn query_settings(&self) -> Result<()> {
        self.send_command("$$")
    }

    /// Request the work-offset table (`$#`)
    pub fn query_work_offsets(&self) -> Result<()> {
        self.send_command("$#")
    }

    /// Request build info (`$I`)
    pub fn query_build_info(&self) -> Result<()> {
        self.send_command("$I")
    }

    /// Request the parser state (`$G`)
    pub fn query_parser_state(&self) -> Result<()> {
        self.send_command("$G")
    }

    // ---- overrides ----

    /// Set the feed override (10-200%)
    pub fn set_feed_override(&self, percent: u8) -> Result<()> {
        self.ensure_connected()?;
        let percent = validate_override(OverrideTarget::Feed, percent)?;
        self.shared
            .push_overrides(&override_sequence(OverrideTarget::Feed, percent));
        Ok(())
    }

    /// Set the spindle override (10-200%)
    pub fn set_spindle_override(&self, percent: u8) -> Result<()> {
        self.ensure_connected()?;
        let percent = validate_override(OverrideTarget::Spindle, percent)?;
        self.shared
            .push_overrides(&override_sequence(OverrideTarget::Spindle, percent));
        Ok(())
    }

    /// Set the rapid override; only 100, 50 and 25% exist
    pub fn set_rapid_override(&self, percent: u8) -> Result<()> {
        self.ensure_connected()?;
        let level = RapidOverrideLevel::from_percent(percent).ok_or_else(|| {
            ControllerError::InvalidArgument {
                name: "rapid override".to_string(),
                reason: format!("{}% is not one of 100, 50, 25", percent),
            }
        })?;
        self.shared.push_overrides(&[level.command().as_byte()]);
        Ok(())
    }
}

impl Drop for CncController {
    fn drop(&mut self) {
        self.disconnect();
    }
}

fn open_with_handshake(device: &mut Device, timeout: std::time::Duration) -> Result<Handshake> {
    handshake(device, timeout).inspect_err(|e| {
        tracing::warn!("Handshake failed: {}", e);
        device.close();
    })
}

/// Cloneable real-time request handle
///
/// Lets stream producers such as a carve job pause, resume or reset the
/// machine without holding the controller.
#[derive(Clone)]
pub struct RealtimeHandle {
    shared: Arc<Shared>,
}

impl RealtimeHandle {
    fn request(&self, bit: u8) {
        if self.shared.is_connected() {
            self.shared.request(bit);
        }
    }
}

impl RealtimeControl for RealtimeHandle {
    fn feed_hold(&self) {
        self.request(bits::HOLD);
    }

    fn cycle_start(&self) {
        self.request(bits::CYCLE_START);
    }

    fn soft_reset(&self) {
        self.request(bits::RESET);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::firmware::RealtimeCommand;
    use cnclink_core::ControllerEvent;
    use std::collections::VecDeque;
    use std::time::Instant;

    #[derive(Default)]
    struct Scripted {
        written: Vec<String>,
        realtime: Vec<u8>,
        replies: VecDeque<String>,
        closed: bool,
    }

    impl DeviceBackend for Scripted {
        fn write_line(&mut self, line: &str) -> Result<()> {
            self.written.push(line.to_string());
            Ok(())
        }

        fn write_realtime(&mut self, byte: u8) -> Result<()> {
            self.realtime.push(byte);
            Ok(())
        }

        fn poll(&mut self) -> Result<Vec<String>> {
            Ok(self.replies.drain(..).collect())
        }

        fn close(&mut self) {
            self.closed = true;
        }

        fn describe(&self) -> String {
            "scripted".to_string()
        }
    }

    fn grbl() -> FirmwareInfo {
        FirmwareInfo {
            version: "1.1h".to_string(),
            ..FirmwareInfo::default()
        }
    }

    fn in_state(state: MachineState) -> Option<MachineStatus> {
        Some(MachineStatus {
            state,
            ..MachineStatus::default()
        })
    }

    #[test]
    fn test_requests_need_a_connection() {
        let (controller, _events) = CncController::new(ControllerConfig::default());
        assert!(!controller.is_connected());
        let err = controller.start_stream(vec!["G0 X1".into()]).unwrap_err();
        assert!(matches!(err, Error::Controller(ControllerError::NotConnected)));
        assert!(controller.feed_hold().is_err());
        assert!(controller.set_feed_override(120).is_err());
    }

    #[test]
    fn test_attach_announces_connection() {
        let (mut controller, mut events) = CncController::new(ControllerConfig::default());
        let _io = controller
            .attach(Scripted::default(), grbl(), in_state(MachineState::Idle))
            .unwrap();
        assert!(controller.is_connected());
        assert_eq!(controller.firmware().map(|f| f.version), Some("1.1h".into()));
        assert_eq!(
            events.try_next(),
            Some(ControllerEvent::ConnectionChanged {
                connected: true,
                version: Some("GRBL 1.1h".into()),
            })
        );

        let err = controller
            .attach(Scripted::default(), grbl(), None)
            .unwrap_err();
        assert!(matches!(err, Error::Controller(ControllerError::AlreadyConnected)));
    }

    #[test]
    fn test_alarm_blocks_motion_but_not_unlock() {
        let (mut controller, _events) = CncController::new(ControllerConfig::default());
        let mut io = controller
            .attach(Scripted::default(), grbl(), in_state(MachineState::Alarm))
            .unwrap();

        assert!(controller.start_stream(vec!["G1 X1 F100".into()]).unwrap_err().is_alarm_lock());
        assert!(controller
            .jog(Position { x: 1.0, ..Position::default() }, 500.0)
            .unwrap_err()
            .is_alarm_lock());
        assert!(controller.send_command("G0 X5").unwrap_err().is_alarm_lock());
        assert!(!controller.is_streaming());

        controller.unlock().unwrap();
        controller.home().unwrap();
        io.tick(Instant::now());
        assert_eq!(io.device().written, vec!["$X", "$H"]);
    }

    #[test]
    fn test_second_stream_is_refused() {
        let (mut controller, _events) = CncController::new(ControllerConfig::default());
        let _io = controller
            .attach(Scripted::default(), grbl(), in_state(MachineState::Idle))
            .unwrap();
        controller.start_stream(vec!["G0 X1".into()]).unwrap();
        let err = controller.start_stream(vec!["G0 X2".into()]).unwrap_err();
        assert!(matches!(err, Error::Controller(ControllerError::StreamActive)));
        assert_eq!(controller.progress().and_then(|p| p.total_lines), Some(1));
    }

    #[test]
    fn test_stop_without_stream() {
        let (mut controller, _events) = CncController::new(ControllerConfig::default());
        let _io = controller
            .attach(Scripted::default(), grbl(), in_state(MachineState::Idle))
            .unwrap();
        let err = controller.stop_stream().unwrap_err();
        assert!(matches!(err, Error::Controller(ControllerError::NoActiveStream)));
    }

    #[test]
    fn test_override_requests() {
        let (mut controller, _events) = CncController::new(ControllerConfig::default());
        let mut io = controller
            .attach(Scripted::default(), grbl(), in_state(MachineState::Idle))
            .unwrap();

        assert!(controller.set_rapid_override(30).is_err());
        assert!(controller.set_feed_override(5).is_err());
        controller.set_rapid_override(50).unwrap();
        io.tick(Instant::now());
        assert!(io
            .device()
            .realtime
            .contains(&RealtimeCommand::RapidOverrideHalf.as_byte()));
    }

    #[test]
    fn test_jog_rejects_bad_arguments() {
        let (mut controller, _events) = CncController::new(ControllerConfig::default());
        let mut io = controller
            .attach(Scripted::default(), grbl(), in_state(MachineState::Idle))
            .unwrap();
        assert!(controller.jog(Position::default(), 500.0).is_err());
        assert!(controller
            .jog(Position { x: 1.0, ..Position::default() }, 0.0)
            .is_err());

        controller
            .jog(Position { x: -2.5, ..Position::default() }, 600.0)
            .unwrap();
        io.tick(Instant::now());
        assert_eq!(io.device().written, vec!["$J=G91 G21 X-2.500 F600"]);
    }

    #[test]
    fn test_disconnect_closes_attached_context() {
        let (mut controller, mut events) = CncController::new(ControllerConfig::default());
        let mut io = controller
            .attach(Scripted::default(), grbl(), in_state(MachineState::Idle))
            .unwrap();
        while events.try_next().is_some() {}

        controller.disconnect();
        assert!(!io.tick(Instant::now()));
        assert!(io.device().closed);
        assert!(!controller.is_connected());
        assert_eq!(
            events.try_next(),
            Some(ControllerEvent::ConnectionChanged {
                connected: false,
                version: None,
            })
        );
    }
}
