//! Board selection.
//!
//! Commands that talk to a single board resolve it here: an explicit
//! `--port` wins, a lone detected board is used as is, and several boards
//! are offered in a `dialoguer` menu unless running non-interactively.

use {
    crate::CliError,
    anyhow::Result,
    console::style,
    dialoguer::{Error as DialoguerError, Select, theme::ColorfulTheme},
    log::{debug, info},
    seeedflash::{BoardCatalog, BoardMode, DetectedPort, DetectionEvent, PortInfo, device},
    std::{cmp::Ordering, io::IsTerminal},
};

/// Options for board selection.
#[derive(Debug, Clone, Default)]
pub struct SerialOptions {
    /// Explicit port specified via CLI.
    pub port: Option<String>,
    /// Non-interactive mode (fail if several boards are attached).
    pub non_interactive: bool,
}

fn usage_err(message: impl Into<String>) -> anyhow::Error {
    CliError::Usage(message.into()).into()
}

/// Find a port by name among the enumerated ports.
///
/// A port that is not enumerated is returned as an unclassified placeholder,
/// since the user named it explicitly.
pub fn find_port_by_name(name: &str, catalog: &BoardCatalog) -> DetectedPort {
    let ports = device::detect_ports(catalog);

    if let Some(port) = ports
        .iter()
        .find(|p| p.name == name || p.name.eq_ignore_ascii_case(name))
    {
        return port.clone();
    }

    debug!("Port {name} not enumerated, using it unclassified");
    DetectedPort::classify(
        PortInfo {
            name: name.to_string(),
            vid: None,
            pid: None,
            manufacturer: None,
            product: None,
            serial_number: None,
        },
        catalog,
    )
}

fn select_non_interactive_board(boards: Vec<DetectionEvent>) -> Result<DetectionEvent> {
    match boards.len().cmp(&1) {
        Ordering::Equal => boards
            .into_iter()
            .next()
            .ok_or_else(|| usage_err("No supported board found")),
        Ordering::Greater => Err(usage_err(
            "Multiple boards found; use --port to choose one",
        )),
        Ordering::Less => Err(usage_err("No supported board found")),
    }
}

/// Select the board to work on.
///
/// `mode` restricts auto-detection to boards in that mode.
pub fn select_board(
    options: &SerialOptions,
    catalog: &BoardCatalog,
    mode: Option<BoardMode>,
) -> Result<DetectionEvent> {
    if let Some(port_name) = &options.port {
        let port = find_port_by_name(port_name, catalog);
        return port
            .detection_event()
            .ok_or_else(|| usage_err(format!("{port_name} is not a supported board")));
    }

    let boards: Vec<DetectionEvent> = device::detect_boards(catalog)
        .into_iter()
        .filter(|board| mode.is_none_or(|m| board.identity.mode == m))
        .collect();

    if options.non_interactive {
        return select_non_interactive_board(boards);
    }

    match boards.len().cmp(&1) {
        Ordering::Greater => {
            ensure_interactive_terminal()?;
            select_board_interactive(boards)
        },
        Ordering::Equal => {
            let board = select_non_interactive_board(boards)?;
            info!(
                "Auto-selected {} on {}",
                board.identity.name, board.port_name
            );
            Ok(board)
        },
        Ordering::Less => Err(usage_err("No supported board found")),
    }
}

fn ensure_interactive_terminal() -> Result<()> {
    if std::io::stdin().is_terminal() && std::io::stderr().is_terminal() {
        Ok(())
    } else {
        Err(usage_err(
            "Interactive selection requires a terminal; use --port",
        ))
    }
}

pub fn map_prompt_error(err: DialoguerError) -> anyhow::Error {
    match err {
        DialoguerError::IO(io_err) => {
            if io_err.kind() == std::io::ErrorKind::Interrupted {
                CliError::Cancelled("Selection cancelled".to_string()).into()
            } else {
                usage_err(format!("Prompt failed: {io_err}"))
            }
        },
    }
}

pub fn board_label(board: &DetectionEvent) -> String {
    let mode = match board.identity.mode {
        BoardMode::Normal => "normal",
        BoardMode::Bootloader => "bootloader",
    };
    format!(
        "{} [{} ({mode})]",
        board.port_name, board.identity.name
    )
}

fn select_board_interactive(boards: Vec<DetectionEvent>) -> Result<DetectionEvent> {
    eprintln!(
        "{} Found {} boards",
        style("ℹ").blue(),
        boards.len()
    );

    let labels: Vec<String> = boards.iter().map(board_label).collect();

    let selection = Select::with_theme(&ColorfulTheme::default())
        .with_prompt("Select a board")
        .items(&labels)
        .default(0)
        .interact_opt()
        .map_err(map_prompt_error)?;

    match selection {
        Some(index) => boards
            .into_iter()
            .nth(index)
            .ok_or_else(|| anyhow::anyhow!("Invalid board index: {index}")),
        None => Err(CliError::Cancelled("Selection cancelled".to_string()).into()),
    }
}
