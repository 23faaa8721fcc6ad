//! Protocol-wide constants shared by every crate in the workspace.

/// Size of the firmware's serial receive buffer in bytes.
pub const RX_BUFFER_SIZE: usize = 128;

/// Default status poll interval.
pub const DEFAULT_STATUS_POLL_MS: u64 = 200;

/// Fastest allowed status poll interval.
pub const MIN_STATUS_POLL_MS: u64 = 50;

/// Slowest allowed status poll interval.
pub const MAX_STATUS_POLL_MS: u64 = 200;

/// Consecutive unanswered status queries before the link is declared dead.
pub const MAX_MISSED_STATUS: u32 = 10;

/// Default serial baud rate.
pub const DEFAULT_BAUD_RATE: u32 = 115_200;

/// Default bound of the IO → UI event queue.
pub const DEFAULT_EVENT_QUEUE_CAPACITY: usize = 1024;

/// Blocks the simulated planner accepts before withholding `ok`.
pub const PLANNER_BLOCKS: usize = 15;

/// Override percentage limits.
pub const MIN_OVERRIDE_PERCENT: u8 = 10;
/// Override percentage limits.
pub const MAX_OVERRIDE_PERCENT: u8 = 200;
