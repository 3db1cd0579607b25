//! Bootloader entry by 1200-baud touch.
//!
//! SAMD boards reset into their bootloader when the host opens the CDC port at
//! 1200 baud and drops DTR. The board then re-enumerates under its boot-mode
//! product ID, which shows up as a new detection event.

use log::{debug, info};

use crate::error::SwitchError;
use crate::port::{BOOTLOADER_TOUCH_BAUD, PortOpener, SerialConfig};

/// Ask the board on `port_name` to reset into its bootloader.
///
/// One shot: a failure is reported, not retried.
pub fn enter_bootloader(opener: &dyn PortOpener, port_name: &str) -> Result<(), SwitchError> {
    let switch_error = |cause: String| SwitchError {
        port: port_name.to_string(),
        cause,
    };

    info!("Switching {port_name} into bootloader mode");
    let mut port = opener
        .open(&SerialConfig::new(port_name, BOOTLOADER_TOUCH_BAUD))
        .map_err(|e| switch_error(e.to_string()))?;

    let dtr = port.set_dtr(false);
    let closed = port.close();
    if let Err(e) = dtr {
        debug!("Dropping DTR on {port_name} failed: {e}");
    }
    closed.map_err(|e| switch_error(e.to_string()))
}
