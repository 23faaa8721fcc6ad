//! State shared between the UI-facing controller and the IO context
//!
//! Requests flow UI -> IO through an atomic real-time bitmask, two FIFO
//! queues, a job slot and acknowledgement flags. Snapshots flow IO -> UI
//! through atomics and read-mostly locks, so readers never wait on IO.

use cnclink_core::{
    FirmwareInfo, LineSource, MachineStatus, StreamProgress, StreamingError, WorkOffset,
};
use parking_lot::{Mutex, RwLock};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU8, AtomicUsize, Ordering};

/// Real-time request bits, drained in declaration order
pub(crate) mod bits {
    pub const RESET: u8 = 1 << 0;
    pub const HOLD: u8 = 1 << 1;
    pub const JOG_CANCEL: u8 = 1 << 2;
    pub const CYCLE_START: u8 = 1 << 3;
}

pub(crate) type Job = Box<dyn LineSource + Send>;

#[derive(Default)]
pub(crate) struct Shared {
    realtime: AtomicU8,
    overrides: Mutex<VecDeque<u8>>,
    commands: Mutex<VecDeque<String>>,
    job: Mutex<Option<Job>>,

    pub stop_requested: AtomicBool,
    pub ack_error: AtomicBool,
    pub ack_tool_change: AtomicBool,
    pub shutdown: AtomicBool,

    pub connected: AtomicBool,
    pub streaming: AtomicBool,
    pub buffer_used: AtomicUsize,
    pub status: RwLock<MachineStatus>,
    pub firmware: RwLock<Option<FirmwareInfo>>,
    pub progress: RwLock<Option<StreamProgress>>,
    pub pending_error: RwLock<Option<StreamingError>>,
    pub tool_change: RwLock<Option<u32>>,
    pub work_offsets: RwLock<Vec<WorkOffset>>,
}

impl Shared {
    pub fn request(&self, bit: u8) {
        self.realtime.fetch_or(bit, Ordering::AcqRel);
    }

    pub fn take_realtime(&self) -> u8 {
        self.realtime.swap(0, Ordering::AcqRel)
    }

    pub fn push_overrides(&self, bytes: &[u8]) {
        self.overrides.lock().extend(bytes.iter().copied());
    }

    pub fn take_overrides(&self) -> Vec<u8> {
        self.overrides.lock().drain(..).collect()
    }

    pub fn push_command(&self, line: String) {
        self.commands.lock().push_back(line);
    }

    pub fn take_commands(&self) -> Vec<String> {
        self.commands.lock().drain(..).collect()
    }

    pub fn set_job(&self, job: Job) {
        *self.job.lock() = Some(job);
    }

    pub fn take_job(&self) -> Option<Job> {
        self.job.lock().take()
    }

    pub fn take_flag(flag: &AtomicBool) -> bool {
        flag.swap(false, Ordering::AcqRel)
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }

    pub fn is_streaming(&self) -> bool {
        self.streaming.load(Ordering::Acquire)
    }

    /// Forget everything from a previous connection
    pub fn reset(&self) {
        self.realtime.store(0, Ordering::Release);
        self.overrides.lock().clear();
        self.commands.lock().clear();
        self.job.lock().take();
        for flag in [
            &self.stop_requested,
            &self.ack_error,
            &self.ack_tool_change,
            &self.shutdown,
            &self.streaming,
        ] {
            flag.store(false, Ordering::Release);
        }
        self.buffer_used.store(0, Ordering::Release);
        *self.status.write() = MachineStatus::default();
        *self.firmware.write() = None;
        *self.progress.write() = None;
        *self.pending_error.write() = None;
        *self.tool_change.write() = None;
        self.work_offsets.write().clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_realtime_bits_coalesce() {
        let shared = Shared::default();
        shared.request(bits::HOLD);
        shared.request(bits::HOLD);
        shared.request(bits::RESET);
        assert_eq!(shared.take_realtime(), bits::HOLD | bits::RESET);
        assert_eq!(shared.take_realtime(), 0);
    }

    #[test]
    fn test_queues_keep_order() {
        let shared = Shared::default();
        shared.push_command("$X".to_string());
        shared.push_command("G0 X1".to_string());
        shared.push_overrides(&[0x90, 0x91]);
        assert_eq!(shared.take_commands(), vec!["$X", "G0 X1"]);
        assert_eq!(shared.take_overrides(), vec![0x90, 0x91]);
        assert!(shared.take_commands().is_empty());
    }
}
