//! List serial ports.

use console::style;
use seeedflash::device::{self, DetectedPort};
use seeedflash::{BoardCatalog, BoardMode};

fn mode_str(mode: BoardMode) -> &'static str {
    match mode {
        BoardMode::Normal => "normal",
        BoardMode::Bootloader => "bootloader",
    }
}

fn port_json(port: &DetectedPort) -> serde_json::Value {
    serde_json::json!({
        "name": port.name,
        "vid": port.vid,
        "pid": port.pid,
        "manufacturer": port.manufacturer,
        "product": port.product,
        "serial": port.serial,
        "board": port.board.as_ref().map(|b| b.name.as_str()),
        "mode": port.board.as_ref().map(|b| mode_str(b.mode)),
    })
}

/// List ports command implementation.
pub(crate) fn cmd_list_ports(catalog: &BoardCatalog, json: bool) {
    let detected = device::detect_ports(catalog);

    if json {
        let ports: Vec<serde_json::Value> = detected.iter().map(port_json).collect();
        println!(
            "{}",
            serde_json::to_string_pretty(&ports).unwrap_or_default()
        );
        return;
    }

    eprintln!("{}", style("Available serial ports").bold().underlined());

    if detected.is_empty() {
        eprintln!("  {}", style("No serial ports found").dim());
        return;
    }

    for (port, line) in detected.iter().zip(device::format_port_list(&detected)) {
        let bullet = if port.is_known_board() {
            style("•").green()
        } else {
            style("•").dim()
        };
        eprintln!("  {bullet} {line}");
    }

    let boards = detected.iter().filter(|p| p.is_known_board()).count();
    if boards > 0 {
        eprintln!(
            "\n{} {boards} supported board(s) attached",
            style("→").green().bold()
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use seeedflash::PortInfo;

    #[test]
    fn test_port_json_known_board() {
        let catalog = BoardCatalog::bundled().unwrap();
        let port = DetectedPort::classify(
            PortInfo {
                name: "/dev/ttyACM0".into(),
                vid: Some(0x2886),
                pid: Some(0x002D),
                manufacturer: Some("Seeed".into()),
                product: Some("Wio Terminal".into()),
                serial_number: None,
            },
            &catalog,
        );
        let value = port_json(&port);
        assert_eq!(value["board"], "wio_terminal");
        assert_eq!(value["mode"], "bootloader");
        assert_eq!(value["vid"], 0x2886);
    }

    #[test]
    fn test_port_json_unknown_port() {
        let catalog = BoardCatalog::bundled().unwrap();
        let port = DetectedPort::classify(
            PortInfo {
                name: "/dev/ttyS0".into(),
                vid: None,
                pid: None,
                manufacturer: None,
                product: None,
                serial_number: None,
            },
            &catalog,
        );
        let value = port_json(&port);
        assert!(value["board"].is_null());
        assert!(value["mode"].is_null());
    }
}
