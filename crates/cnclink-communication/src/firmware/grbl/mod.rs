//! GRBL family protocol support
//!
//! GRBL, grblHAL and FluidNC share one line protocol; the differences the
//! controller cares about are handled by [`cnclink_core::Firmware`] branches
//! inside these parsers.

pub mod error_decoder;
pub mod response_parser;
pub mod status_parser;
pub mod utils;

pub use error_decoder::{describe_alarm, describe_error, format_alarm, format_error};
pub use response_parser::{parse_response, Feedback, GrblResponse};
pub use status_parser::{
    parse_state, parse_state_for, parse_status_report, parse_status_report_for, StatusFields,
};
