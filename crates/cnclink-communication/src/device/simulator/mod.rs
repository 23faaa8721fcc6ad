//! In-process firmware simulator
//!
//! [`Simulator`] is the pure model; [`SimulatedDevice`] wraps it as a
//! [`DeviceBackend`] that advances simulated time by the wall-clock time
//! elapsed between polls.

mod machine;
mod settings;

pub use machine::Simulator;

use super::DeviceBackend;
use cnclink_core::constants::{PLANNER_BLOCKS, RX_BUFFER_SIZE};
use cnclink_core::{ConnectionError, Firmware, Result};
use serde::{Deserialize, Serialize};
use std::time::Instant;

/// Simulator configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulatorConfig {
    /// Firmware family to imitate
    pub firmware: Firmware,
    /// Boot locked in alarm, as with homing required
    pub start_in_alarm: bool,
    /// RX buffer size reported by `$I`
    pub rx_buffer_size: usize,
    /// Planner depth
    pub planner_blocks: usize,
}

impl Default for SimulatorConfig {
    fn default() -> Self {
        Self {
            firmware: Firmware::Grbl,
            start_in_alarm: false,
            rx_buffer_size: RX_BUFFER_SIZE,
            planner_blocks: PLANNER_BLOCKS,
        }
    }
}

/// Simulator driven by the wall clock
#[derive(Debug)]
pub struct SimulatedDevice {
    sim: Option<Simulator>,
    last_step: Instant,
}

impl SimulatedDevice {
    /// Boot a simulator
    pub fn new(config: SimulatorConfig) -> Self {
        tracing::info!("Starting {} simulator", config.firmware);
        Self {
            sim: Some(Simulator::new(&config)),
            last_step: Instant::now(),
        }
    }

    /// The simulated firmware, while open
    pub fn simulator(&self) -> Option<&Simulator> {
        self.sim.as_ref()
    }

    fn sim(&mut self) -> Result<&mut Simulator> {
        self.sim.as_mut().ok_or_else(|| {
            ConnectionError::IoError {
                reason: "simulator closed".to_string(),
            }
            .into()
        })
    }

    fn advance(&mut self) -> Result<&mut Simulator> {
        let now = Instant::now();
        let elapsed = now.duration_since(self.last_step);
        self.last_step = now;
        let sim = self.sim()?;
        sim.step(elapsed);
        Ok(sim)
    }
}

impl DeviceBackend for SimulatedDevice {
    fn write_line(&mut self, line: &str) -> Result<()> {
        let sim = self.advance()?;
        sim.receive(line.as_bytes());
        sim.receive(b"\n");
        Ok(())
    }

    fn write_realtime(&mut self, byte: u8) -> Result<()> {
        self.advance()?.receive(&[byte]);
        Ok(())
    }

    fn poll(&mut self) -> Result<Vec<String>> {
        Ok(self.advance()?.take_output())
    }

    fn close(&mut self) {
        if self.sim.take().is_some() {
            tracing::info!("Simulator stopped");
        }
    }

    fn describe(&self) -> String {
        match &self.sim {
            Some(sim) => format!("{} simulator", sim.firmware()),
            None => "simulator (closed)".to_string(),
        }
    }
}
