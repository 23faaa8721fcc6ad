//! IO context
//!
//! Owns the device and every piece of streaming and status state for one
//! connection. Runs on its own thread in production; tests construct it
//! through [`CncController::attach`](super::CncController::attach) and call
//! [`IoContext::tick`] with a controlled clock.
//!
//! One tick:
//! 1. real-time bits (reset, hold, jog cancel, cycle start)
//! 2. override bytes
//! 3. manual commands, new stream job, stop and acknowledgement flags
//! 4. status poll and dead-link detection
//! 5. received lines
//! 6. sends under character counting
//! 7. stream completion and snapshot publication

use super::config::ControllerConfig;
use super::shared::{bits, Shared};
use super::stream::StreamEngine;
use crate::device::DeviceBackend;
use crate::firmware::firmware_detector::{apply_options, apply_version, detect_firmware};
use crate::firmware::grbl::{describe_alarm, Feedback, GrblResponse, StatusFields};
use crate::firmware::RealtimeCommand;
use cnclink_core::{
    ConnectionError, ControllerEvent, EventDispatcher, FirmwareInfo, MachineState, MachineStatus, Position,
    Result, WorkOffset,
};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Instant;

/// Per-connection IO loop state
pub struct IoContext<B: DeviceBackend> {
    device: B,
    shared: Arc<Shared>,
    events: EventDispatcher,
    config: ControllerConfig,
    engine: StreamEngine,
    firmware: FirmwareInfo,
    status: MachineStatus,
    last_wco: Option<Position>,
    work_offsets: Vec<WorkOffset>,
    next_poll: Option<Instant>,
    status_outstanding: bool,
    missed_status: u32,
    alive: bool,
}

impl<B: DeviceBackend> std::fmt::Debug for IoContext<B> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IoContext")
            .field("config", &self.config)
            .field("firmware", &self.firmware)
            .field("status", &self.status)
            .field("alive", &self.alive)
            .finish_non_exhaustive()
    }
}

impl<B: DeviceBackend> IoContext<B> {
    pub(crate) fn new(
        device: B,
        shared: Arc<Shared>,
        events: EventDispatcher,
        config: ControllerConfig,
        firmware: FirmwareInfo,
        status: Option<MachineStatus>,
    ) -> Self {
        let rx_buffer = match firmware.rx_buffer {
            Some(reported) if reported > 0 => config.rx_buffer_size.min(reported),
            _ => config.rx_buffer_size,
        };
        tracing::debug!("Character counting against {} byte RX buffer", rx_buffer);
        let status = status.unwrap_or_default();
        Self {
            device,
            shared,
            events,
            engine: StreamEngine::new(rx_buffer),
            last_wco: status.work_offset,
            status,
            firmware,
            work_offsets: Vec::new(),
            next_poll: None,
            status_outstanding: false,
            missed_status: 0,
            alive: true,
            config,
        }
    }

    /// The device, for inspection
    pub fn device(&self) -> &B {
        &self.device
    }

    /// The device, for scripting responses
    pub fn device_mut(&mut self) -> &mut B {
        &mut self.device
    }

    /// Whether the link is still up
    pub fn is_alive(&self) -> bool {
        self.alive
    }

    /// Publish the initial snapshots and the connected event
    pub(crate) fn announce(&mut self) {
        self.publish_snapshots();
        *self.shared.firmware.write() = Some(self.firmware.clone());
        self.events.publish(ControllerEvent::ConnectionChanged {
            connected: true,
            version: Some(self.firmware.to_string()),
        });
        self.events
            .publish(ControllerEvent::Status(self.status.clone()));
    }

    /// Run until shutdown or link loss
    pub(crate) fn run(mut self) {
        tracing::info!("IO context started for {}", self.device.describe());
        self.announce();
        let period = self.config.io_tick();
        while self.tick(Instant::now()) {
            std::thread::sleep(period);
        }
        tracing::info!("IO context stopped");
    }

    /// Run one iteration of the IO loop
    ///
    /// Returns `false` once the connection is over.
    pub fn tick(&mut self, now: Instant) -> bool {
        if !self.alive {
            return false;
        }
        if self.shared.shutdown.load(Ordering::Acquire) {
            self.close();
            return false;
        }
        if let Err(e) = self.run_phases(now) {
            self.link_lost(&e.to_string(), now);
        }
        if self.alive {
            self.publish_snapshots();
        }
        self.alive
    }

    fn run_phases(&mut self, now: Instant) -> Result<()> {
        self.dispatch_realtime(now)?;
        for byte in self.shared.take_overrides() {
            self.device.write_realtime(byte)?;
        }
        for command in self.shared.take_commands() {
            self.engine.push_manual(command);
        }
        if let Some(job) = self.shared.take_job() {
            self.engine.start(job, now);
        }
        self.handle_flags();

        self.poll_status(now)?;
        if !self.alive {
            return Ok(());
        }
        self.read_responses(now)?;
        self.send_lines()?;

        if self.engine.check_finished(now) {
            self.shared.streaming.store(false, Ordering::Release);
        }
        self.flush_events();
        Ok(())
    }

    fn dispatch_realtime(&mut self, now: Instant) -> Result<()> {
        let requested = self.shared.take_realtime();
        if requested == 0 {
            return Ok(());
        }
        if requested & bits::RESET != 0 {
            tracing::info!("Soft reset");
            self.device
                .write_realtime(RealtimeCommand::Reset.as_byte())?;
            self.shared.take_job();
            Shared::take_flag(&self.shared.stop_requested);
            self.engine.abort(now);
            self.shared.streaming.store(false, Ordering::Release);
            self.status_outstanding = false;
            self.flush_events();
        }
        if requested & bits::HOLD != 0 {
            self.device
                .write_realtime(RealtimeCommand::FeedHold.as_byte())?;
        }
        if requested & bits::JOG_CANCEL != 0 {
            self.device
                .write_realtime(RealtimeCommand::JogCancel.as_byte())?;
        }
        if requested & bits::CYCLE_START != 0 {
            self.device
                .write_realtime(RealtimeCommand::CycleStart.as_byte())?;
        }
        Ok(())
    }

    fn handle_flags(&mut self) {
        if Shared::take_flag(&self.shared.stop_requested) {
            self.engine.stop();
        }
        if Shared::take_flag(&self.shared.ack_error) {
            self.engine.acknowledge_error();
        }
        if Shared::take_flag(&self.shared.ack_tool_change) {
            self.engine.acknowledge_tool_change();
        }
    }

    fn poll_status(&mut self, now: Instant) -> Result<()> {
        if matches!(self.next_poll, Some(due) if now < due) {
            return Ok(());
        }
        self.next_poll = Some(now + self.config.status_poll_interval());

        if self.status_outstanding {
            self.missed_status += 1;
            tracing::warn!(
                "Status report missing ({}/{})",
                self.missed_status,
                self.config.max_missed_status
            );
            if self.missed_status >= self.config.max_missed_status {
                let reason = format!(
                    "no status report after {} queries",
                    self.missed_status
                );
                self.link_lost(&reason, now);
                return Ok(());
            }
        }
        self.device
            .write_realtime(RealtimeCommand::StatusReport.as_byte())?;
        self.status_outstanding = true;
        Ok(())
    }

    fn read_responses(&mut self, now: Instant) -> Result<()> {
        for line in self.device.poll()? {
            let response = self.device.parse_response(&line);
            if !matches!(response, Some(GrblResponse::Status(_))) {
                tracing::debug!("<< {}", line);
                self.events.publish(ControllerEvent::RawLine {
                    line: line.clone(),
                    sent: false,
                });
            }
            match response {
                Some(GrblResponse::Ok) => self.engine.on_ok(now),
                Some(GrblResponse::Error(code)) => self.engine.on_error(code, now),
                Some(GrblResponse::Alarm(code)) => self.on_alarm(code, now),
                Some(GrblResponse::Status(text)) => self.on_status(&text),
                Some(GrblResponse::Banner { text, .. }) => self.on_banner(&text, now),
                Some(GrblResponse::Feedback(feedback)) => self.on_feedback(feedback),
                Some(GrblResponse::Setting { .. }) | Some(GrblResponse::Message(_)) | None => {}
            }
            self.flush_events();
        }
        Ok(())
    }

    fn send_lines(&mut self) -> Result<()> {
        for line in self.engine.fill() {
            self.device.write_line(&line)?;
            tracing::debug!(">> {}", line);
            self.events
                .publish(ControllerEvent::RawLine { line, sent: true });
        }
        self.flush_events();
        Ok(())
    }

    fn on_alarm(&mut self, code: u16, now: Instant) {
        let description = describe_alarm(code);
        tracing::error!("ALARM:{} ({})", code, description);
        self.status = MachineStatus {
            state: MachineState::Alarm,
            ..self.status.clone()
        };
        if self.engine.abort(now) {
            self.shared.streaming.store(false, Ordering::Release);
        }
        self.events.publish(ControllerEvent::Alarm {
            code,
            description: description.to_string(),
        });
    }

    fn on_status(&mut self, text: &str) {
        let fields = StatusFields::parse(text, self.firmware.firmware);
        if fields.wco.is_some() {
            self.last_wco = fields.wco;
        }
        let status = fields.resolve(self.last_wco);
        self.status_outstanding = false;
        self.missed_status = 0;

        if !self.status.state.can_transition_to(status.state) {
            tracing::warn!(
                "Unexpected state transition {} -> {}",
                self.status.state,
                status.state
            );
        }
        self.status = status.clone();
        self.events.publish(ControllerEvent::Status(status));
    }

    fn on_banner(&mut self, text: &str, now: Instant) {
        tracing::warn!("Firmware reset: {}", text);
        if self.engine.abort(now) {
            self.shared.streaming.store(false, Ordering::Release);
            self.events
                .publish(ControllerEvent::Error("Firmware reset during stream".to_string()));
        }
        self.status_outstanding = false;
        if let Some(firmware) = detect_firmware(text) {
            self.firmware.firmware = firmware;
        }
        self.firmware.banner = text.to_string();
        *self.shared.firmware.write() = Some(self.firmware.clone());
    }

    fn on_feedback(&mut self, feedback: Feedback) {
        match feedback {
            Feedback::WorkOffset(offset) => {
                match self.work_offsets.iter_mut().find(|o| o.name == offset.name) {
                    Some(existing) => *existing = offset,
                    None => self.work_offsets.push(offset),
                }
                *self.shared.work_offsets.write() = self.work_offsets.clone();
            }
            Feedback::Version(version) => {
                apply_version(&mut self.firmware, &version);
                *self.shared.firmware.write() = Some(self.firmware.clone());
            }
            Feedback::Options(options) => {
                apply_options(&mut self.firmware, &options);
                *self.shared.firmware.write() = Some(self.firmware.clone());
            }
            Feedback::Firmware(name) => {
                if let Some(firmware) = detect_firmware(&name) {
                    self.firmware.firmware = firmware;
                    *self.shared.firmware.write() = Some(self.firmware.clone());
                }
            }
            Feedback::Message(message) => tracing::info!("Firmware: {}", message),
            Feedback::ParserState(_) | Feedback::Other(_) => {}
        }
    }

    fn flush_events(&mut self) {
        for event in self.engine.take_events() {
            self.events.publish(event);
        }
    }

    fn publish_snapshots(&self) {
        let shared = &self.shared;
        shared
            .buffer_used
            .store(self.engine.buffer_used(), Ordering::Release);
        *shared.status.write() = self.status.clone();
        if let Some(progress) = self.engine.progress() {
            *shared.progress.write() = Some(progress);
        }
        *shared.pending_error.write() = self.engine.pending_error().cloned();
        *shared.tool_change.write() = self.engine.tool_change_pending();
    }

    fn link_lost(&mut self, reason: &str, now: Instant) {
        let error = ConnectionError::ConnectionLost {
            reason: reason.to_string(),
        };
        tracing::error!("{}", error);
        self.alive = false;
        self.engine.abort(now);
        self.engine.take_events();
        self.device.close();
        self.shared.streaming.store(false, Ordering::Release);
        self.shared.buffer_used.store(0, Ordering::Release);
        self.events.publish(ControllerEvent::Error(error.to_string()));
        if self.shared.connected.swap(false, Ordering::AcqRel) {
            self.events.publish(ControllerEvent::ConnectionChanged {
                connected: false,
                version: None,
            });
        }
    }

    /// Close the device after a shutdown request
    fn close(&mut self) {
        self.alive = false;
        self.device.close();
        self.shared.streaming.store(false, Ordering::Release);
        self.shared.buffer_used.store(0, Ordering::Release);
        if self.shared.connected.swap(false, Ordering::AcqRel) {
            tracing::info!("Disconnected from {}", self.device.describe());
            self.events.publish(ControllerEvent::ConnectionChanged {
                connected: false,
                version: None,
            });
        }
    }
}
