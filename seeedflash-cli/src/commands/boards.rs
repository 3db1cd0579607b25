//! List supported boards.

use anyhow::Result;
use console::style;
use seeedflash::{BoardCatalog, BoardCatalogEntry, BoardMode, DeviceMode, SeeedMode};
use std::sync::Arc;

fn mode_str(mode: BoardMode) -> &'static str {
    match mode {
        BoardMode::Normal => "normal",
        BoardMode::Bootloader => "bootloader",
    }
}

fn entry_json(entry: &BoardCatalogEntry) -> serde_json::Value {
    let (vid, pid) = entry.identity;
    serde_json::json!({
        "name": entry.name,
        "vid": vid,
        "pid": pid,
        "mode": mode_str(entry.mode),
        "metadata_file": entry.metadata_file_name,
    })
}

fn catalog_json(mode: &SeeedMode) -> serde_json::Value {
    let catalog = mode.catalog();
    let boards: Vec<_> = catalog.entries().into_iter().map(entry_json).collect();
    let actions: Vec<_> = mode
        .actions()
        .iter()
        .map(|a| {
            serde_json::json!({
                "name": a.name,
                "display_name": a.display_name,
                "description": a.description,
                "shortcut": a.shortcut,
            })
        })
        .collect();

    serde_json::json!({
        "mode": mode.name(),
        "description": mode.description(),
        "boards": boards,
        "actions": actions,
        "libraries": catalog.libraries(),
    })
}

/// Boards command implementation.
pub(crate) fn cmd_boards(catalog: Arc<BoardCatalog>, json: bool) -> Result<()> {
    let mode = SeeedMode::new(catalog);

    if json {
        println!("{}", serde_json::to_string_pretty(&catalog_json(&mode))?);
        return Ok(());
    }

    eprintln!(
        "{} - {}",
        style(mode.name()).bold().underlined(),
        mode.description()
    );

    eprintln!("\n{}", style("Boards").bold());
    for entry in mode.catalog().entries() {
        let (vid, pid) = entry.identity;
        eprintln!(
            "  {} {} ({vid:04X}:{pid:04X}) {}",
            style("•").green(),
            style(&entry.name).cyan(),
            style(mode_str(entry.mode)).dim()
        );
    }

    eprintln!("\n{}", style("Actions").bold());
    for action in mode.actions() {
        eprintln!(
            "  {} {:<8} {:<14} {}",
            style("•").green(),
            action.display_name,
            style(action.shortcut).yellow(),
            style(action.description).dim()
        );
    }

    let libraries = mode.catalog().libraries();
    if !libraries.is_empty() {
        eprintln!("\n{}", style("Libraries").bold());
        for lib in libraries {
            eprintln!("  {} {} ({})", style("•").green(), lib.name, lib.version);
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_catalog_json_lists_both_modes() {
        let mode = SeeedMode::new(Arc::new(BoardCatalog::bundled().unwrap()));
        let value = catalog_json(&mode);

        let boards = value["boards"].as_array().unwrap();
        assert!(boards.iter().any(|b| b["name"] == "wio_terminal" && b["mode"] == "normal"));
        assert!(boards.iter().any(|b| b["name"] == "xiao" && b["mode"] == "bootloader"));
        assert!(
            boards
                .iter()
                .all(|b| b["metadata_file"].as_str().unwrap().starts_with("config-"))
        );

        let actions = value["actions"].as_array().unwrap();
        assert_eq!(actions.len(), 4);
        assert_eq!(actions[0]["shortcut"], "F5");
        assert_eq!(value["libraries"][0]["version"], "2020-03-01");
    }
}
