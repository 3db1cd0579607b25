//! Compare a board's firmware with the latest release.

use anyhow::{Context, Result};
use console::style;
use seeedflash::{BoardCatalog, FirmwareVersion, NativePortOpener, SerialProbe, VersionStore};

use crate::config::Settings;
use crate::serial::{SerialOptions, board_label, select_board};
use crate::Cli;

/// What the board runs compared with the latest release.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Verdict {
    UpToDate,
    UpdateAvailable,
    /// No ArduPy banner, or the board sits in its bootloader.
    NoFirmware,
}

fn verdict(device: Option<FirmwareVersion>, latest: FirmwareVersion) -> Verdict {
    match device {
        Some(version) if latest.is_newer_than(&version) => Verdict::UpdateAvailable,
        Some(_) => Verdict::UpToDate,
        None => Verdict::NoFirmware,
    }
}

/// Check command implementation.
pub(crate) fn cmd_check(
    cli: &Cli,
    settings: &Settings,
    catalog: &BoardCatalog,
    port: Option<&str>,
    json: bool,
) -> Result<()> {
    let board = select_board(
        &SerialOptions {
            port: port.map(str::to_string),
            non_interactive: cli.non_interactive || json,
        },
        catalog,
        None,
    )?;
    let entry = catalog
        .entry_for(&board.identity)
        .with_context(|| format!("{} is not in the board catalog", board.identity.name))?;

    if !cli.quiet && !json {
        eprintln!("{} Checking {}", style("🔌").cyan(), board_label(&board));
    }

    let mut store = VersionStore::new(
        &settings.cache_dir,
        settings.remote_base.as_str(),
        super::http_downloader()?,
    );
    let latest = store
        .refresh(entry)
        .context("No cloud firmware found")?;

    let device_version = if board.identity.in_bootloader() {
        None
    } else {
        let probe = SerialProbe::new().with_timeout(settings.probe_timeout);
        match probe.probe_named(&NativePortOpener, &board.port_name) {
            Ok(version) => Some(version),
            Err(e) if e.is_no_firmware() => None,
            Err(e) => return Err(e.into()),
        }
    };
    let result = verdict(device_version, latest.version);

    if json {
        let value = serde_json::json!({
            "board": board.identity.name,
            "port": board.port_name,
            "bootloader": board.identity.in_bootloader(),
            "device_version": device_version.map(|v| v.to_string()),
            "latest_version": latest.version.to_string(),
            "update_available": result != Verdict::UpToDate,
            "image_cached": store.is_image_cached(&latest),
        });
        println!("{}", serde_json::to_string_pretty(&value)?);
        return Ok(());
    }

    let shown = device_version.map_or_else(|| "none".to_string(), |v| v.to_string());
    eprintln!("  Board firmware:  {shown}");
    eprintln!("  Latest firmware: {}", latest.version);

    match result {
        Verdict::UpToDate => {
            eprintln!("{} Firmware is up to date", style("✓").green().bold());
        },
        Verdict::UpdateAvailable => eprintln!(
            "{} Firmware {} is available; run `seeedflash watch` to update",
            style("↑").yellow().bold(),
            latest.version
        ),
        Verdict::NoFirmware if board.identity.in_bootloader() => eprintln!(
            "{} Board is in bootloader mode; firmware {} can be flashed",
            style("ℹ").blue(),
            latest.version
        ),
        Verdict::NoFirmware => eprintln!(
            "{} No ArduPy firmware on the board; firmware {} can be flashed",
            style("ℹ").blue(),
            latest.version
        ),
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn v(text: &str) -> FirmwareVersion {
        text.parse().unwrap()
    }

    #[test]
    fn test_verdict() {
        assert_eq!(verdict(Some(v("2020-03-01")), v("2021-01-01")), Verdict::UpdateAvailable);
        assert_eq!(verdict(Some(v("2021-01-01")), v("2021-01-01")), Verdict::UpToDate);
        // A board ahead of the release is left alone.
        assert_eq!(verdict(Some(v("2022-01-01")), v("2021-01-01")), Verdict::UpToDate);
        assert_eq!(verdict(None, v("2021-01-01")), Verdict::NoFirmware);
    }
}
