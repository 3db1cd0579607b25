//! Serial port abstraction.
//!
//! The probe and the bootloader trigger talk to a board through the [`Port`]
//! trait instead of a concrete serial handle, and obtain ports through a
//! [`PortOpener`]. This keeps the handshake logic independent of the
//! `serialport` crate and lets tests substitute scripted ports.
//!
//! ```text
//! +-------------+   +-------------+
//! | SerialProbe |   | ModeSwitch  |
//! +------+------+   +------+------+
//!        |                 |
//!        v                 v
//! +------+-----------------+------+
//! |  PortOpener -> Box<dyn Port>  |
//! +------+------------------------+
//!        |
//!        v
//! +------+------+
//! | NativePort  |
//! | (serialport)|
//! +-------------+
//! ```

#[cfg(feature = "native")]
pub mod native;

use std::io::{Read, Write};
use std::time::Duration;

use crate::error::Result;

/// Baud rate of the ArduPy REPL.
pub const REPL_BAUD: u32 = 115_200;

/// Baud rate that makes the board reset into its bootloader.
pub const BOOTLOADER_TOUCH_BAUD: u32 = 1_200;

/// Serial port configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SerialConfig {
    /// Port name/path (e.g., "/dev/ttyACM0", "COM3").
    pub port_name: String,
    /// Baud rate.
    pub baud_rate: u32,
    /// Read/write timeout.
    pub timeout: Duration,
}

impl Default for SerialConfig {
    fn default() -> Self {
        Self {
            port_name: String::new(),
            baud_rate: REPL_BAUD,
            timeout: Duration::from_millis(400),
        }
    }
}

impl SerialConfig {
    /// Create a new configuration with port name and baud rate.
    pub fn new(port_name: impl Into<String>, baud_rate: u32) -> Self {
        Self {
            port_name: port_name.into(),
            baud_rate,
            ..Default::default()
        }
    }

    /// Set the timeout.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

/// Serial port information.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortInfo {
    /// Port name/path.
    pub name: String,
    /// USB vendor ID (if available).
    pub vid: Option<u16>,
    /// USB product ID (if available).
    pub pid: Option<u16>,
    /// Manufacturer string (if available).
    pub manufacturer: Option<String>,
    /// Product string (if available).
    pub product: Option<String>,
    /// Serial number (if available).
    pub serial_number: Option<String>,
}

/// An open serial connection.
pub trait Port: Read + Write + Send {
    /// Set the read/write timeout.
    fn set_timeout(&mut self, timeout: Duration) -> Result<()>;

    /// Clear input/output buffers.
    fn clear_buffers(&mut self) -> Result<()>;

    /// Get the port name/path.
    fn name(&self) -> &str;

    /// Set DTR (Data Terminal Ready) pin state.
    fn set_dtr(&mut self, level: bool) -> Result<()>;

    /// Close the port and release resources.
    ///
    /// After calling this method, the port cannot be used for further I/O.
    /// Closing twice is a no-op.
    fn close(&mut self) -> Result<()>;

    /// Write all bytes, blocking until complete.
    fn write_all_bytes(&mut self, buf: &[u8]) -> Result<()> {
        std::io::Write::write_all(self, buf)?;
        std::io::Write::flush(self)?;
        Ok(())
    }
}

/// Factory for opening ports by name.
pub trait PortOpener: Send + Sync {
    /// Open a port with the given configuration.
    fn open(&self, config: &SerialConfig) -> Result<Box<dyn Port>>;
}

/// Trait for listing available serial ports.
pub trait PortEnumerator {
    /// List all available serial ports.
    fn list_ports() -> Result<Vec<PortInfo>>;
}

#[cfg(feature = "native")]
pub use native::{NativePort, NativePortEnumerator, NativePortOpener};
