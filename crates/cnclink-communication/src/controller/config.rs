//! Controller tuning

use cnclink_core::constants::{
    DEFAULT_EVENT_QUEUE_CAPACITY, DEFAULT_STATUS_POLL_MS, MAX_MISSED_STATUS, MAX_STATUS_POLL_MS,
    MIN_STATUS_POLL_MS, RX_BUFFER_SIZE,
};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Controller configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ControllerConfig {
    /// Firmware RX buffer size in bytes; capped by what `$I` reports
    pub rx_buffer_size: usize,
    /// Status poll interval, clamped to 50-200 ms
    pub status_poll_ms: u64,
    /// Time allowed for the connect handshake
    pub handshake_timeout_ms: u64,
    /// Consecutive unanswered status queries before the link is dead
    pub max_missed_status: u32,
    /// Bound of the IO -> UI event queue
    pub event_queue_capacity: usize,
    /// IO loop period
    pub io_tick_ms: u64,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            rx_buffer_size: RX_BUFFER_SIZE,
            status_poll_ms: DEFAULT_STATUS_POLL_MS,
            handshake_timeout_ms: 2500,
            max_missed_status: MAX_MISSED_STATUS,
            event_queue_capacity: DEFAULT_EVENT_QUEUE_CAPACITY,
            io_tick_ms: 5,
        }
    }
}

impl ControllerConfig {
    /// Clamp every field into its working range
    pub fn normalized(mut self) -> Self {
        self.rx_buffer_size = self.rx_buffer_size.max(1);
        self.status_poll_ms = self
            .status_poll_ms
            .clamp(MIN_STATUS_POLL_MS, MAX_STATUS_POLL_MS);
        self.handshake_timeout_ms = self.handshake_timeout_ms.max(100);
        self.max_missed_status = self.max_missed_status.max(1);
        self.event_queue_capacity = self.event_queue_capacity.max(1);
        self.io_tick_ms = self.io_tick_ms.clamp(1, 50);
        self
    }

    /// Status poll interval
    pub fn status_poll_interval(&self) -> Duration {
        Duration::from_millis(
            self.status_poll_ms
                .clamp(MIN_STATUS_POLL_MS, MAX_STATUS_POLL_MS),
        )
    }

    /// Handshake timeout
    pub fn handshake_timeout(&self) -> Duration {
        Duration::from_millis(self.handshake_timeout_ms)
    }

    /// IO loop period
    pub fn io_tick(&self) -> Duration {
        Duration::from_millis(self.io_tick_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_poll_interval_clamped() {
        let fast = ControllerConfig {
            status_poll_ms: 10,
            ..Default::default()
        };
        assert_eq!(fast.status_poll_interval(), Duration::from_millis(50));

        let slow = ControllerConfig {
            status_poll_ms: 1000,
            ..Default::default()
        }
        .normalized();
        assert_eq!(slow.status_poll_ms, 200);
    }

    #[test]
    fn test_partial_json() {
        let config: ControllerConfig = serde_json::from_str(r#"{"rx_buffer_size": 256}"#).unwrap();
        assert_eq!(config.rx_buffer_size, 256);
        assert_eq!(config.status_poll_ms, 200);
    }
}
