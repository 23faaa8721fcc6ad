//! Connect handshake
//!
//! Runs on a blocking task before the IO thread exists:
//! 1. wait for the welcome banner for half the timeout
//! 2. on silence, send a soft reset and `$I`, then wait for the rest
//! 3. ask `$I` for version and build options
//! 4. ask `?` once so the first snapshot reflects the real state

use crate::device::DeviceBackend;
use crate::firmware::firmware_detector::{apply_options, apply_version, detect_firmware, info_from_banner};
use crate::firmware::grbl::{Feedback, GrblResponse, StatusFields};
use crate::firmware::RealtimeCommand;
use cnclink_core::{ConnectionError, FirmwareInfo, MachineStatus, Result};
use std::time::{Duration, Instant};

const POLL_INTERVAL: Duration = Duration::from_millis(5);

/// What the handshake learned about the device
#[derive(Debug, Clone)]
pub(crate) struct Handshake {
    pub firmware: FirmwareInfo,
    pub status: Option<MachineStatus>,
}

struct Session<'a, B: DeviceBackend> {
    device: &'a mut B,
    info: Option<FirmwareInfo>,
    status: Option<MachineStatus>,
    pending_acks: usize,
}

impl<B: DeviceBackend> Session<'_, B> {
    fn absorb(&mut self) -> Result<()> {
        for line in self.device.poll()? {
            tracing::debug!("handshake << {}", line);
            match self.device.parse_response(&line) {
                Some(GrblResponse::Banner { .. }) => {
                    self.info = info_from_banner(&line);
                }
                Some(GrblResponse::Feedback(Feedback::Version(version))) => {
                    let info = self.info.get_or_insert_with(|| FirmwareInfo {
                        firmware: detect_firmware(&version).unwrap_or_default(),
                        ..FirmwareInfo::default()
                    });
                    apply_version(info, &version);
                }
                Some(GrblResponse::Feedback(Feedback::Options(options))) => {
                    if let Some(info) = self.info.as_mut() {
                        apply_options(info, &options);
                    }
                }
                Some(GrblResponse::Feedback(Feedback::Firmware(name))) => {
                    if let (Some(info), Some(firmware)) = (self.info.as_mut(), detect_firmware(&name)) {
                        info.firmware = firmware;
                    }
                }
                Some(GrblResponse::Ok) | Some(GrblResponse::Error(_)) => {
                    self.pending_acks = self.pending_acks.saturating_sub(1);
                }
                Some(GrblResponse::Status(text)) => {
                    let firmware = self
                        .info
                        .as_ref()
                        .map(|i| i.firmware)
                        .unwrap_or_default();
                    self.status = Some(StatusFields::parse(&text, firmware).resolve(None));
                }
                _ => {}
            }
        }
        Ok(())
    }

    fn wait_until(&mut self, deadline: Instant, done: impl Fn(&Self) -> bool) -> Result<bool> {
        loop {
            self.absorb()?;
            if done(self) {
                return Ok(true);
            }
            if Instant::now() >= deadline {
                return Ok(false);
            }
            std::thread::sleep(POLL_INTERVAL);
        }
    }

    fn query_build_info(&mut self) -> Result<()> {
        self.device.write_line("$I")?;
        self.pending_acks += 1;
        Ok(())
    }
}

/// Identify the firmware on a freshly opened device
pub(crate) fn handshake<B: DeviceBackend>(device: &mut B, timeout: Duration) -> Result<Handshake> {
    let started = Instant::now();
    let deadline = started + timeout;
    let port = device.describe();
    let mut session = Session {
        device,
        info: None,
        status: None,
        pending_acks: 0,
    };

    let has_banner = |s: &Session<'_, B>| s.info.is_some();
    if !session.wait_until(started + timeout / 2, has_banner)? {
        tracing::info!("No banner from {}; sending soft reset", port);
        session
            .device
            .write_realtime(RealtimeCommand::Reset.as_byte())?;
        session.query_build_info()?;
        if !session.wait_until(deadline, has_banner)? {
            return Err(ConnectionError::HandshakeFailed {
                port,
                timeout_ms: timeout.as_millis() as u64,
                reason: "no welcome banner".to_string(),
            }
            .into());
        }
    }

    session.query_build_info()?;
    let acked = session.wait_until(deadline, |s| s.pending_acks == 0)?;
    if !acked {
        tracing::warn!("No reply to $I from {}", port);
    }

    session
        .device
        .write_realtime(RealtimeCommand::StatusReport.as_byte())?;
    if !session.wait_until(deadline, |s| s.status.is_some())? {
        tracing::warn!("No status report from {} during handshake", port);
    }

    let Session { info, status, .. } = session;
    let firmware = info.ok_or_else(|| ConnectionError::HandshakeFailed {
        port: port.clone(),
        timeout_ms: timeout.as_millis() as u64,
        reason: "firmware not identified".to_string(),
    })?;
    tracing::info!(
        "Handshake with {} complete: {} in {:?}",
        port,
        firmware,
        started.elapsed()
    );
    Ok(Handshake { firmware, status })
}
