//! Error handling for cnclink
//!
//! Provides error types for every layer of the machine-control engine:
//! - Controller errors (state gating, streaming rendezvous, argument checks)
//! - Connection errors (port and handshake failures, dead links)
//! - Firmware errors (dialect and setting problems)
//! - G-Code errors (program input and macro expansion)
//!
//! Malformed wire lines are deliberately *not* represented here: they parse to
//! `Unknown`/default values instead of failing.

use thiserror::Error;

/// Controller error type
///
/// Raised by the UI-facing controller API when an operation is not allowed in
/// the current machine or stream state.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ControllerError {
    /// Controller is not connected
    #[error("Controller not connected")]
    NotConnected,

    /// Controller is already connected
    #[error("Controller already connected")]
    AlreadyConnected,

    /// Operation is not permitted in the current machine state
    #[error("Cannot {operation} while machine is {state}")]
    InvalidState {
        /// The operation that was refused.
        operation: String,
        /// The machine state at the time of the request.
        state: String,
    },

    /// Motion is locked out until the alarm is cleared
    #[error("Machine is in alarm; unlock or home before issuing motion")]
    AlarmLocked,

    /// A stream is already running on this controller
    #[error("A stream is already active")]
    StreamActive,

    /// No stream is running
    #[error("No stream is active")]
    NoActiveStream,

    /// Argument outside the accepted range
    #[error("Invalid argument for {name}: {reason}")]
    InvalidArgument {
        /// Argument name.
        name: String,
        /// Why it was rejected.
        reason: String,
    },
}

/// Connection error type
///
/// Connection faults never leave partial state behind: the caller may simply
/// retry.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConnectionError {
    /// Failed to open port
    #[error("Failed to open port {port}: {reason}")]
    FailedToOpen {
        /// The name of the port that failed to open.
        port: String,
        /// The reason the port failed to open.
        reason: String,
    },

    /// The device never produced a recognisable banner
    #[error("Handshake with {port} failed after {timeout_ms}ms: {reason}")]
    HandshakeFailed {
        /// Port or device description.
        port: String,
        /// Time spent waiting.
        timeout_ms: u64,
        /// What went wrong.
        reason: String,
    },

    /// The link stopped answering status queries
    #[error("Connection lost: {reason}")]
    ConnectionLost {
        /// The reason the connection was lost.
        reason: String,
    },

    /// I/O error on the transport
    #[error("I/O error: {reason}")]
    IoError {
        /// The reason for the I/O error.
        reason: String,
    },

    /// Invalid connection parameters
    #[error("Invalid connection parameters: {reason}")]
    InvalidParameters {
        /// The reason the parameters are invalid.
        reason: String,
    },
}

/// Firmware error type
#[derive(Error, Debug, Clone, PartialEq)]
pub enum FirmwareError {
    /// Setting has no identity in the requested dialect
    #[error("Setting {setting} is not available on {firmware}")]
    SettingNotAvailable {
        /// The setting key.
        setting: String,
        /// Firmware name.
        firmware: String,
    },

    /// Invalid setting value
    #[error("Invalid setting value for {setting}: {reason}")]
    InvalidSettingValue {
        /// The setting with the invalid value.
        setting: String,
        /// The reason the value is invalid.
        reason: String,
    },
}

/// G-Code error type
#[derive(Error, Debug, Clone, PartialEq)]
pub enum GcodeError {
    /// Macro references form a cycle
    #[error("Macro reference cycle: {chain}")]
    MacroCycle {
        /// The chain of macro names that closed the cycle.
        chain: String,
    },

    /// Macro references nest deeper than allowed
    #[error("Macro nesting exceeds maximum depth of {max_depth}")]
    MacroDepthExceeded {
        /// Configured maximum.
        max_depth: usize,
    },

    /// Referenced macro does not exist
    #[error("Unknown macro reference '{name}'")]
    UnknownMacro {
        /// Name used in the reference.
        name: String,
    },
}

/// Main error type for cnclink
///
/// A unified error type that can represent any error from all layers.
#[derive(Error, Debug)]
pub enum Error {
    /// Controller error
    #[error(transparent)]
    Controller(#[from] ControllerError),

    /// Connection error
    #[error(transparent)]
    Connection(#[from] ConnectionError),

    /// Firmware error
    #[error(transparent)]
    Firmware(#[from] FirmwareError),

    /// G-Code error
    #[error(transparent)]
    Gcode(#[from] GcodeError),

    /// Standard I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Generic error
    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Create an error from a string message
    pub fn other(msg: impl Into<String>) -> Self {
        Error::Other(msg.into())
    }

    /// Check if this is a connection error
    pub fn is_connection_error(&self) -> bool {
        matches!(self, Error::Connection(_))
    }

    /// Check if this is a controller error
    pub fn is_controller_error(&self) -> bool {
        matches!(self, Error::Controller(_))
    }

    /// Check if this error is the alarm lock-out
    pub fn is_alarm_lock(&self) -> bool {
        matches!(self, Error::Controller(ControllerError::AlarmLocked))
    }
}

/// Result type using Error
pub type Result<T> = std::result::Result<T, Error>;
