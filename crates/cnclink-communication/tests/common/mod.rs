#![allow(dead_code)]

use cnclink_communication::DeviceBackend;
use cnclink_core::{ConnectionError, FirmwareInfo, MachineState, MachineStatus, Result};
use std::collections::VecDeque;

/// Device that records what it is sent and replays scripted replies
#[derive(Debug, Default)]
pub struct ScriptedDevice {
    pub written: Vec<String>,
    pub realtime: Vec<u8>,
    pub replies: VecDeque<String>,
    pub fail_writes: bool,
    pub closed: bool,
}

impl ScriptedDevice {
    pub fn reply(&mut self, line: &str) {
        self.replies.push_back(line.to_string());
    }

    pub fn reply_n(&mut self, line: &str, count: usize) {
        for _ in 0..count {
            self.reply(line);
        }
    }

    pub fn status_queries(&self) -> usize {
        self.realtime.iter().filter(|&&b| b == b'?').count()
    }
}

impl DeviceBackend for ScriptedDevice {
    fn write_line(&mut self, line: &str) -> Result<()> {
        if self.fail_writes {
            return Err(ConnectionError::IoError {
                reason: "unplugged".to_string(),
            }
            .into());
        }
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
        "scripted device".to_string()
    }
}

pub fn grbl_info() -> FirmwareInfo {
    FirmwareInfo {
        version: "1.1h".to_string(),
        banner: "Grbl 1.1h ['$' for help]".to_string(),
        rx_buffer: Some(128),
        ..FirmwareInfo::default()
    }
}

pub fn status(state: MachineState) -> Option<MachineStatus> {
    Some(MachineStatus {
        state,
        ..MachineStatus::default()
    })
}
