//! # cnclink Core
//!
//! Core types and traits for cnclink.
//! Provides the machine data model, the error taxonomy, controller events
//! and listeners, and the seams between stream producers and the controller.

pub mod constants;
pub mod core;
pub mod data;
pub mod error;

pub use core::{
    event::{event_channel, ControllerEvent, ControllerEvents, EventDispatcher},
    ControllerListener, LineSource, NextLine, RealtimeControl, UiContext, VecLineSource,
};

pub use data::{
    Firmware, FirmwareInfo, InputPins, LineAck, MachineState, MachineStatus, Position,
    StreamProgress, StreamingError, Units, WorkOffset,
};

pub use error::{ConnectionError, ControllerError, Error, FirmwareError, GcodeError, Result};
