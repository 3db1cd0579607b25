//! Device discovery and classification.
//!
//! Serial ports are enumerated with their USB VID/PID and resolved through
//! the [`BoardCatalog`]. A resolved port becomes a [`DetectionEvent`], the
//! input of the update orchestrator.

pub mod watcher;

use crate::catalog::{BoardCatalog, BoardIdentity, BoardMode};
use crate::port::PortInfo;

#[cfg(feature = "native")]
use log::{debug, trace};

pub use watcher::{DeviceWatcher, WatcherHandle};

/// A board that appeared on a serial port.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DetectionEvent {
    /// Catalog identity of the board.
    pub identity: BoardIdentity,
    /// Port the board is attached to.
    pub port_name: String,
}

/// Discovered serial port with its catalog classification.
#[derive(Debug, Clone)]
pub struct DetectedPort {
    /// Port name/path (e.g., "/dev/ttyACM0" or "COM3").
    pub name: String,
    /// USB Vendor ID (if available).
    pub vid: Option<u16>,
    /// USB Product ID (if available).
    pub pid: Option<u16>,
    /// Device manufacturer string (if available).
    pub manufacturer: Option<String>,
    /// Device product string (if available).
    pub product: Option<String>,
    /// Serial number (if available).
    pub serial: Option<String>,
    /// Catalog identity, when the VID/PID is a known board.
    pub board: Option<BoardIdentity>,
}

impl DetectedPort {
    /// Classify a port through the catalog.
    pub fn classify(info: PortInfo, catalog: &BoardCatalog) -> Self {
        let board = match (info.vid, info.pid) {
            (Some(vid), Some(pid)) => catalog.resolve(vid, pid),
            _ => None,
        };
        Self {
            name: info.name,
            vid: info.vid,
            pid: info.pid,
            manufacturer: info.manufacturer,
            product: info.product,
            serial: info.serial_number,
            board,
        }
    }

    /// Whether this port belongs to a catalog board.
    pub fn is_known_board(&self) -> bool {
        self.board
            .is_some()
    }

    /// Detection event for this port, when it is a known board.
    pub fn detection_event(&self) -> Option<DetectionEvent> {
        self.board
            .as_ref()
            .map(|identity| DetectionEvent {
                identity: identity.clone(),
                port_name: self.name.clone(),
            })
    }
}

/// Classify a list of ports.
pub fn classify_ports(ports: Vec<PortInfo>, catalog: &BoardCatalog) -> Vec<DetectedPort> {
    ports
        .into_iter()
        .map(|info| DetectedPort::classify(info, catalog))
        .collect()
}

/// Enumerate the host's serial ports.
#[cfg(feature = "native")]
pub fn list_port_infos() -> Vec<PortInfo> {
    use crate::port::{NativePortEnumerator, PortEnumerator};

    match NativePortEnumerator::list_ports() {
        Ok(ports) => {
            for port in &ports {
                if let (Some(vid), Some(pid)) = (port.vid, port.pid) {
                    trace!("Found USB port: {} (VID: {vid:04X}, PID: {pid:04X})", port.name);
                }
            }
            ports
        },
        Err(e) => {
            debug!("Failed to enumerate serial ports: {e}");
            Vec::new()
        },
    }
}

/// Enumerate and classify the host's serial ports.
#[cfg(feature = "native")]
pub fn detect_ports(catalog: &BoardCatalog) -> Vec<DetectedPort> {
    classify_ports(list_port_infos(), catalog)
}

/// Enumerate the ports carrying known boards.
#[cfg(feature = "native")]
pub fn detect_boards(catalog: &BoardCatalog) -> Vec<DetectionEvent> {
    detect_ports(catalog)
        .iter()
        .filter_map(DetectedPort::detection_event)
        .collect()
}

/// Format a list of detected ports for display.
pub fn format_port_list(ports: &[DetectedPort]) -> Vec<String> {
    ports
        .iter()
        .map(|port| {
            let device_info = match (&port.board, port.vid, port.pid) {
                (Some(board), _, _) => {
                    let mode = match board.mode {
                        BoardMode::Normal => "normal",
                        BoardMode::Bootloader => "bootloader",
                    };
                    format!(" [{} ({mode})]", board.name)
                },
                (None, Some(vid), Some(pid)) => format!(" [VID:{vid:04X} PID:{pid:04X}]"),
                _ => String::new(),
            };

            let product_info = port
                .product
                .as_ref()
                .map(|p| format!(" - {p}"))
                .unwrap_or_default();

            format!("{}{}{}", port.name, device_info, product_info)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn info(name: &str, vid: Option<u16>, pid: Option<u16>) -> PortInfo {
        PortInfo {
            name: name.to_string(),
            vid,
            pid,
            manufacturer: None,
            product: Some("Wio Terminal".to_string()),
            serial_number: None,
        }
    }

    #[test]
    fn test_classify_known_and_unknown() {
        let catalog = BoardCatalog::bundled().unwrap();
        let ports = classify_ports(
            vec![
                info("/dev/ttyACM0", Some(0x2886), Some(0x802D)),
                info("/dev/ttyUSB0", Some(0x1A86), Some(0x7523)),
                info("/dev/ttyS0", None, None),
            ],
            &catalog,
        );

        assert!(ports[0].is_known_board());
        assert!(!ports[1].is_known_board());
        assert!(!ports[2].is_known_board());

        let event = ports[0].detection_event().unwrap();
        assert_eq!(event.port_name, "/dev/ttyACM0");
        assert_eq!(event.identity.mode, BoardMode::Normal);
        assert!(ports[1].detection_event().is_none());
    }

    #[test]
    fn test_format_port_list() {
        let catalog = BoardCatalog::bundled().unwrap();
        let ports = classify_ports(
            vec![
                info("/dev/ttyACM0", Some(0x2886), Some(0x002D)),
                info("/dev/ttyUSB1", Some(0x1A86), Some(0x7523)),
            ],
            &catalog,
        );

        let formatted = format_port_list(&ports);
        assert_eq!(formatted.len(), 2);
        assert!(formatted[0].contains("wio_terminal (bootloader)"));
        assert!(formatted[0].contains("- Wio Terminal"));
        assert!(formatted[1].contains("VID:1A86 PID:7523"));
    }
}
