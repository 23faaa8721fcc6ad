//! Device backends
//!
//! A backend moves bytes between the controller and a firmware: a real serial
//! port or the in-process simulator. Both implement [`DeviceBackend`] and are
//! selected at connect time through the [`Device`] enum, so the controller
//! never branches on which one it is talking to.

pub mod serial;
pub mod simulator;

pub use serial::{list_ports, LineFramer, SerialDevice, SerialPortInfo};
pub use simulator::{SimulatedDevice, Simulator, SimulatorConfig};

use crate::firmware::grbl::{parse_response, GrblResponse};
use cnclink_core::Result;

/// Byte-stream contract every backend satisfies
pub trait DeviceBackend: Send {
    /// Send one line; the backend appends the newline
    fn write_line(&mut self, line: &str) -> Result<()>;

    /// Send one real-time byte
    fn write_realtime(&mut self, byte: u8) -> Result<()>;

    /// Complete lines received since the last poll, terminators removed
    fn poll(&mut self) -> Result<Vec<String>>;

    /// Release the transport; further calls may fail
    fn close(&mut self);

    /// Human-readable name for logs
    fn describe(&self) -> String;

    /// Classify a received line
    fn parse_response(&self, line: &str) -> Option<GrblResponse> {
        parse_response(line)
    }
}

/// Backend selected at connect time
#[derive(Debug)]
pub enum Device {
    /// Serial port
    Serial(SerialDevice),
    /// In-process simulator
    Simulator(SimulatedDevice),
}

impl DeviceBackend for Device {
    fn write_line(&mut self, line: &str) -> Result<()> {
        match self {
            Device::Serial(device) => device.write_line(line),
            Device::Simulator(device) => device.write_line(line),
        }
    }

    fn write_realtime(&mut self, byte: u8) -> Result<()> {
        match self {
            Device::Serial(device) => device.write_realtime(byte),
            Device::Simulator(device) => device.write_realtime(byte),
        }
    }

    fn poll(&mut self) -> Result<Vec<String>> {
        match self {
            Device::Serial(device) => device.poll(),
            Device::Simulator(device) => device.poll(),
        }
    }

    fn close(&mut self) {
        match self {
            Device::Serial(device) => device.close(),
            Device::Simulator(device) => device.close(),
        }
    }

    fn describe(&self) -> String {
        match self {
            Device::Serial(device) => device.describe(),
            Device::Simulator(device) => device.describe(),
        }
    }

    fn parse_response(&self, line: &str) -> Option<GrblResponse> {
        match self {
            Device::Serial(device) => device.parse_response(line),
            Device::Simulator(device) => device.parse_response(line),
        }
    }
}

impl From<SerialDevice> for Device {
    fn from(device: SerialDevice) -> Self {
        Device::Serial(device)
    }
}

impl From<SimulatedDevice> for Device {
    fn from(device: SimulatedDevice) -> Self {
        Device::Simulator(device)
    }
}
