//! Sync the ArduPy library archives.

use anyhow::{Context, Result};
use console::style;
use log::info;
use seeedflash::{BoardCatalog, LibrarySync};

use crate::Cli;
use crate::config::Settings;

/// Libs command implementation.
pub(crate) fn cmd_libs(cli: &Cli, settings: &Settings, catalog: &BoardCatalog) -> Result<()> {
    let sync = LibrarySync::new(
        &settings.cache_dir,
        &settings.workspace_dir,
        super::http_downloader()?,
        catalog.libraries(),
    );
    let index_url = LibrarySync::index_url(&settings.remote_base);
    info!("Syncing libraries from {index_url}");

    let report = sync
        .sync(&index_url, |status| {
            if !cli.quiet {
                eprintln!("{} {status}", style("⏳").yellow());
            }
        })
        .context("Library sync failed")?;

    if cli.quiet {
        return Ok(());
    }

    for name in &report.extracted {
        eprintln!("{} Extracted {name}", style("✓").green());
    }
    for name in &report.updated {
        eprintln!("{} Updated {name}", style("✓").green());
    }
    if report.is_empty() {
        eprintln!("{} Libraries are up to date", style("✓").green());
    }
    eprintln!(
        "  Workspace: {}",
        style(settings.workspace_dir.display()).dim()
    );

    Ok(())
}
