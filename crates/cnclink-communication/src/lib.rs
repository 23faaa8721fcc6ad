//! # cnclink Communication
//!
//! Talks to GRBL-family motion controllers over a serial port or an
//! in-process simulator.
//!
//! - [`controller`]: the UI-facing [`CncController`] and its IO context
//! - [`device`]: serial and simulator backends behind [`DeviceBackend`]
//! - [`firmware`]: response parsing, status reports, real-time bytes and
//!   firmware detection for GRBL, grblHAL and FluidNC

pub mod controller;
pub mod device;
pub mod firmware;

pub use controller::{CncController, ControllerConfig, IoContext, RealtimeHandle, StreamEngine};
pub use device::{
    list_ports, Device, DeviceBackend, SerialDevice, SerialPortInfo, SimulatedDevice, Simulator,
    SimulatorConfig,
};
pub use firmware::{detect_firmware, RealtimeCommand};
