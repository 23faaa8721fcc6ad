//! Serial port backend
//!
//! Provides port enumeration and a line-framed [`DeviceBackend`] over the
//! `serialport` crate. Reads use a short timeout so the IO context can poll
//! without blocking.

use super::DeviceBackend;
use cnclink_core::{ConnectionError, Error, Result};
use std::fmt;
use std::io::{self, Read, Write};
use std::time::Duration;

const READ_TIMEOUT: Duration = Duration::from_millis(10);
const READ_CHUNK: usize = 256;

/// Information about an available serial port
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SerialPortInfo {
    /// Port name (e.g., "/dev/ttyUSB0", "COM3")
    pub port_name: String,

    /// Port description (e.g., "USB Serial Port")
    pub description: String,

    /// Manufacturer name if available
    pub manufacturer: Option<String>,

    /// USB vendor and product ID if applicable
    pub usb_ids: Option<(u16, u16)>,
}

/// List serial ports that look like CNC controllers
///
/// Filters to:
/// - Windows: COM* (e.g., COM1, COM3)
/// - Linux: /dev/ttyUSB*, /dev/ttyACM*
/// - macOS: /dev/cu.usbserial-*, /dev/cu.usbmodem*
pub fn list_ports() -> Result<Vec<SerialPortInfo>> {
    let ports = serialport::available_ports().map_err(|e| {
        tracing::error!("Failed to enumerate serial ports: {}", e);
        Error::other(format!("Failed to enumerate ports: {}", e))
    })?;

    Ok(ports
        .iter()
        .filter(|port| is_valid_cnc_port(&port.port_name))
        .map(|port| {
            let (manufacturer, usb_ids) = match &port.port_type {
                serialport::SerialPortType::UsbPort(usb) => {
                    (usb.manufacturer.clone(), Some((usb.vid, usb.pid)))
                }
                _ => (None, None),
            };
            SerialPortInfo {
                port_name: port.port_name.clone(),
                description: port_description(port),
                manufacturer,
                usb_ids,
            }
        })
        .collect())
}

fn is_valid_cnc_port(port_name: &str) -> bool {
    if let Some(number) = port_name.strip_prefix("COM") {
        return !number.is_empty() && number.chars().all(|c| c.is_ascii_digit());
    }

    port_name.starts_with("/dev/ttyUSB")
        || port_name.starts_with("/dev/ttyACM")
        || port_name.starts_with("/dev/cu.usbserial-")
        || port_name.starts_with("/dev/cu.usbmodem")
}

fn port_description(port: &serialport::SerialPortInfo) -> String {
    match &port.port_type {
        serialport::SerialPortType::UsbPort(usb_info) => format!(
            "USB {} {}",
            usb_info.manufacturer.as_deref().unwrap_or("Device"),
            usb_info.product.as_deref().unwrap_or("Serial Port")
        ),
        serialport::SerialPortType::BluetoothPort => "Bluetooth Serial".to_string(),
        serialport::SerialPortType::PciPort => "PCI Serial".to_string(),
        _ => "Serial Port".to_string(),
    }
}

/// Splits a byte stream into lines
///
/// `\r` is dropped, empty lines are skipped and invalid UTF-8 is replaced.
#[derive(Debug, Default, Clone)]
pub struct LineFramer {
    partial: Vec<u8>,
}

impl LineFramer {
    /// Create an empty framer
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed received bytes, returning every line they complete
    pub fn push(&mut self, bytes: &[u8]) -> Vec<String> {
        let mut lines = Vec::new();
        for &byte in bytes {
            match byte {
                b'\n' => {
                    let line = String::from_utf8_lossy(&self.partial).trim().to_string();
                    self.partial.clear();
                    if !line.is_empty() {
                        lines.push(line);
                    }
                }
                b'\r' => {}
                _ => self.partial.push(byte),
            }
        }
        lines
    }

    /// Drop any incomplete line
    pub fn clear(&mut self) {
        self.partial.clear();
    }
}

/// Serial port device
pub struct SerialDevice {
    port: Option<Box<dyn serialport::SerialPort>>,
    name: String,
    baud_rate: u32,
    framer: LineFramer,
}

impl fmt::Debug for SerialDevice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SerialDevice")
            .field("name", &self.name)
            .field("baud_rate", &self.baud_rate)
            .field("open", &self.port.is_some())
            .finish()
    }
}

impl SerialDevice {
    /// Open a port at 8N1 without flow control
    pub fn open(port_name: &str, baud_rate: u32) -> std::result::Result<Self, ConnectionError> {
        if baud_rate == 0 {
            return Err(ConnectionError::InvalidParameters {
                reason: "baud rate must be non-zero".to_string(),
            });
        }

        let port = serialport::new(port_name, baud_rate)
            .timeout(READ_TIMEOUT)
            .data_bits(serialport::DataBits::Eight)
            .stop_bits(serialport::StopBits::One)
            .parity(serialport::Parity::None)
            .flow_control(serialport::FlowControl::None)
            .open()
            .map_err(|e| {
                tracing::warn!("Failed to open serial port {}: {}", port_name, e);
                ConnectionError::FailedToOpen {
                    port: port_name.to_string(),
                    reason: e.to_string(),
                }
            })?;

        tracing::info!("Opened serial port {} at {} baud", port_name, baud_rate);
        Ok(Self {
            port: Some(port),
            name: port_name.to_string(),
            baud_rate,
            framer: LineFramer::new(),
        })
    }

    fn port(&mut self) -> Result<&mut Box<dyn serialport::SerialPort>> {
        self.port.as_mut().ok_or_else(|| {
            ConnectionError::IoError {
                reason: "port closed".to_string(),
            }
            .into()
        })
    }

    fn write_all(&mut self, bytes: &[u8]) -> Result<()> {
        let port = self.port()?;
        port.write_all(bytes).and_then(|_| port.flush()).map_err(|e| {
            ConnectionError::IoError {
                reason: e.to_string(),
            }
            .into()
        })
    }
}

impl DeviceBackend for SerialDevice {
    fn write_line(&mut self, line: &str) -> Result<()> {
        let mut bytes = Vec::with_capacity(line.len() + 1);
        bytes.extend_from_slice(line.as_bytes());
        bytes.push(b'\n');
        self.write_all(&bytes)
    }

    fn write_realtime(&mut self, byte: u8) -> Result<()> {
        self.write_all(&[byte])
    }

    fn poll(&mut self) -> Result<Vec<String>> {
        let mut received = Vec::new();
        let mut chunk = [0u8; READ_CHUNK];
        let port = self.port()?;
        loop {
            match port.read(&mut chunk) {
                Ok(0) => break,
                Ok(n) => {
                    received.extend_from_slice(&chunk[..n]);
                    if n < chunk.len() {
                        break;
                    }
                }
                Err(e) if e.kind() == io::ErrorKind::TimedOut => break,
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(e) => {
                    return Err(ConnectionError::IoError {
                        reason: e.to_string(),
                    }
                    .into())
                }
            }
        }
        Ok(self.framer.push(&received))
    }

    fn close(&mut self) {
        if self.port.take().is_some() {
            tracing::info!("Closed serial port {}", self.name);
        }
        self.framer.clear();
    }

    fn describe(&self) -> String {
        format!("{} @ {} baud", self.name, self.baud_rate)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_port_filter() {
        assert!(is_valid_cnc_port("COM3"));
        assert!(!is_valid_cnc_port("COM"));
        assert!(!is_valid_cnc_port("COMX"));
        assert!(is_valid_cnc_port("/dev/ttyUSB0"));
        assert!(is_valid_cnc_port("/dev/ttyACM1"));
        assert!(is_valid_cnc_port("/dev/cu.usbmodem1421"));
        assert!(!is_valid_cnc_port("/dev/ttyS0"));
    }

    #[test]
    fn test_framer_splits_lines() {
        let mut framer = LineFramer::new();
        assert!(framer.push(b"o").is_empty());
        assert_eq!(framer.push(b"k\r\n<Idle|MPos:0,0,0>\n\n"), vec![
            "ok".to_string(),
            "<Idle|MPos:0,0,0>".to_string()
        ]);
        assert_eq!(framer.push(b"error:2\n"), vec!["error:2".to_string()]);
    }

    #[test]
    fn test_open_missing_port_fails() {
        let result = SerialDevice::open("/dev/cnclink-does-not-exist", 115_200);
        assert!(matches!(result, Err(ConnectionError::FailedToOpen { .. })));
    }
}
