//! Flash command implementation.

use anyhow::{Context, Result, bail};
use console::style;
use indicatif::{ProgressBar, ProgressStyle};
use log::{debug, info};
use seeedflash::{
    BoardCatalog, BoardMode, Bossac, NativePortOpener, device, enter_bootloader,
    flash_with_retries,
};
use std::path::Path;
use std::thread;
use std::time::{Duration, Instant};

use crate::config::Settings;
use crate::serial::{SerialOptions, find_port_by_name, select_board};
use crate::{Cli, CliError, use_fancy_output, was_interrupted};

/// How long a board may take to re-enumerate in its bootloader.
const BOOTLOADER_WAIT: Duration = Duration::from_secs(10);

const BOOTLOADER_POLL: Duration = Duration::from_millis(250);

fn ensure_not_interrupted() -> Result<()> {
    if was_interrupted() {
        Err(CliError::Cancelled("Interrupted".to_string()).into())
    } else {
        Ok(())
    }
}

/// Wait for `board` to re-appear in bootloader mode and return its port.
fn wait_for_bootloader(catalog: &BoardCatalog, board: &str) -> Result<String> {
    let deadline = Instant::now() + BOOTLOADER_WAIT;
    loop {
        ensure_not_interrupted()?;
        if let Some(found) = device::detect_boards(catalog)
            .into_iter()
            .find(|b| b.identity.name == board && b.identity.in_bootloader())
        {
            debug!("{board} re-appeared on {}", found.port_name);
            return Ok(found.port_name);
        }
        if Instant::now() >= deadline {
            bail!("{board} did not re-appear in bootloader mode");
        }
        thread::sleep(BOOTLOADER_POLL);
    }
}

/// Resolve the port to flash, switching a running board into its bootloader.
fn resolve_port(cli: &Cli, catalog: &BoardCatalog, port: Option<&str>) -> Result<String> {
    let board = match port {
        Some(name) => match find_port_by_name(name, catalog).detection_event() {
            Some(board) => board,
            // An unclassified port is flashed as given.
            None => return Ok(name.to_string()),
        },
        None => select_board(
            &SerialOptions {
                port: None,
                non_interactive: cli.non_interactive,
            },
            catalog,
            None,
        )?,
    };

    if board.identity.mode == BoardMode::Bootloader {
        return Ok(board.port_name);
    }

    if !cli.quiet {
        eprintln!(
            "{} Switching {} into bootloader mode",
            style("🔄").cyan(),
            board.identity.name
        );
    }
    enter_bootloader(&NativePortOpener, &board.port_name)?;
    wait_for_bootloader(catalog, &board.identity.name)
}

/// Flash command implementation.
pub(crate) fn cmd_flash(
    cli: &Cli,
    settings: &Settings,
    catalog: &BoardCatalog,
    image: &Path,
    port: Option<&str>,
    attempts: Option<u32>,
) -> Result<()> {
    if !image.is_file() {
        bail!("Firmware image not found: {}", image.display());
    }

    let tool = Bossac::locate(settings.flash_tool.as_deref(), settings.tools_dir.as_deref())
        .context("Cannot find the flashing tool")?;
    debug!("Using {}", tool.program().display());

    let port_name = resolve_port(cli, catalog, port)?;
    if !cli.quiet {
        eprintln!("{} Using port {port_name}", style("🔌").cyan());
    }

    let pb = if cli.quiet || !use_fancy_output() {
        ProgressBar::hidden()
    } else {
        let pb = ProgressBar::new_spinner();
        pb.set_style(
            ProgressStyle::with_template("{spinner:.green} [{elapsed_precise}] {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_spinner()),
        );
        pb.enable_steady_tick(Duration::from_millis(100));
        pb
    };

    let attempts = attempts.unwrap_or(settings.flash_attempts);
    let file_name = image
        .file_name()
        .map_or_else(|| image.display().to_string(), |n| n.to_string_lossy().into_owned());

    let result = flash_with_retries(&tool, image, &port_name, attempts, |attempt, of| {
        let message = format!("Flashing {file_name} (attempt {attempt}/{of})");
        if pb.is_hidden() {
            info!("{message}");
        }
        pb.set_message(message);
    });
    pb.finish_and_clear();
    ensure_not_interrupted()?;

    let used = result.with_context(|| format!("Failed to flash {file_name}"))?;
    if !cli.quiet {
        eprintln!(
            "\n{} Flashed {file_name} to {port_name} ({used} attempt(s))",
            style("🎉").green().bold()
        );
    }

    Ok(())
}
