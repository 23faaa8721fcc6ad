//! # cnclink G-Code
//!
//! G-code producers and consumers that sit beside the controller:
//! - [`modal`]: replays a program prefix to rebuild modal state and the
//!   preamble needed to resume mid-program
//! - [`carve`]: turns a planned multi-pass toolpath into G-code one line at
//!   a time, as a [`LineSource`](cnclink_core::LineSource) the controller
//!   can stream

pub mod carve;
pub mod modal;

pub use carve::{CarveControl, CarvePhase, CarveStreamer, MultiPassToolpath, ToolpathConfig, ToolpathPoint};
pub use modal::{
    resume_program, scan, CoolantState, CoordinateSystem, DistanceMode, ModalState, SpindleState,
};
