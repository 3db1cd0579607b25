//! Error types for seeedflash.
//!
//! Each pipeline stage has its own error type so the orchestrator can decide
//! how to degrade. [`Error`] wraps all of them for callers that only need to
//! propagate.

use std::io;
use thiserror::Error;

/// Result type for seeedflash operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Error type for seeedflash operations.
#[derive(Debug, Error)]
pub enum Error {
    /// I/O error (serial port, file operations).
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Serial port error.
    #[cfg(feature = "native")]
    #[error("Serial port error: {0}")]
    Serial(#[from] serialport::Error),

    /// Board catalog could not be loaded.
    #[error(transparent)]
    Catalog(#[from] CatalogError),

    /// Remote resource could not be fetched.
    #[error(transparent)]
    Download(#[from] DownloadError),

    /// Board did not report a usable firmware version.
    #[error(transparent)]
    Probe(#[from] ProbeError),

    /// Board could not be switched into bootloader mode.
    #[error(transparent)]
    Switch(#[from] SwitchError),

    /// External flashing tool failed.
    #[error(transparent)]
    Flash(#[from] FlashError),

    /// Invalid metadata document.
    #[error("Invalid metadata: {0}")]
    Metadata(String),

    /// Library archive could not be extracted.
    #[error("Archive error: {0}")]
    Archive(String),

    /// No matching device found.
    #[error("Device not found")]
    DeviceNotFound,
}

/// Malformed or inconsistent board descriptor. Fatal at startup.
#[derive(Debug, Error)]
pub enum CatalogError {
    /// The descriptor is not valid JSON or misses required fields.
    #[error("Malformed board catalog: {0}")]
    Malformed(#[from] serde_json::Error),

    /// The same VID/PID pair is listed more than once.
    #[error("Duplicate board id {vid:#06x}:{pid:#06x} ({first} and {second})")]
    Duplicate {
        /// USB vendor ID.
        vid: u16,
        /// USB product ID.
        pid: u16,
        /// Board that registered the pair first.
        first: String,
        /// Board that tried to register it again.
        second: String,
    },

    /// The descriptor file could not be read.
    #[error("Cannot read board catalog: {0}")]
    Io(#[from] io::Error),
}

/// All download attempts failed.
#[derive(Debug, Error)]
#[error("Download of {url} failed after {attempts} attempt(s): {last_cause}")]
pub struct DownloadError {
    /// Remote URL that was requested.
    pub url: String,
    /// Number of attempts made.
    pub attempts: u32,
    /// Description of the last failure.
    pub last_cause: String,
}

/// Outcome of a probe that did not yield a version.
#[derive(Debug, Error)]
pub enum ProbeError {
    /// No response, no banner, or an unparseable version. The board is
    /// assumed to carry no usable firmware.
    #[error("No ArduPy firmware detected")]
    NoFirmware,

    /// The serial port could not be opened.
    #[error("Cannot open {port}: {cause}")]
    Port {
        /// Port name.
        port: String,
        /// Underlying cause.
        cause: String,
    },
}

/// Failure to trigger the bootloader.
#[derive(Debug, Error)]
#[error("Cannot switch {port} into bootloader mode: {cause}")]
pub struct SwitchError {
    /// Port name.
    pub port: String,
    /// Underlying cause.
    pub cause: String,
}

/// Failure of the external flashing tool.
#[derive(Debug, Error)]
pub enum FlashError {
    /// The tool ran and exited with a non-zero status.
    #[error("Flashing tool exited with {status}")]
    ToolFailed {
        /// Exit code, or `None` when killed by a signal.
        code: Option<i32>,
        /// Printable exit status.
        status: String,
    },

    /// The tool could not be started.
    #[error("Cannot start flashing tool {tool}: {source}")]
    Spawn {
        /// Tool path.
        tool: String,
        /// Spawn error.
        #[source]
        source: io::Error,
    },

    /// The tool is not installed.
    #[error("Flashing tool '{0}' not found")]
    ToolNotFound(String),

    /// The firmware image is missing from the local cache.
    #[error("Firmware image not found: {0}")]
    MissingImage(String),
}

impl ProbeError {
    /// Whether the board simply has no recognizable firmware.
    pub fn is_no_firmware(&self) -> bool {
        matches!(self, Self::NoFirmware)
    }
}
