//! Watch for boards and run the updater.
//!
//! Three threads cooperate: the device watcher turns port arrivals into
//! detection events, the update worker runs one session at a time, and this
//! thread renders worker events and answers its confirmation requests.

use anyhow::{Context, Result, anyhow};
use console::style;
use dialoguer::{Confirm, theme::ColorfulTheme};
use indicatif::{ProgressBar, ProgressStyle};
use log::{debug, warn};
use seeedflash::{
    BoardCatalog, Bossac, ConfirmationGate, ConfirmationRequest, DetectionEvent, DeviceMode,
    DeviceWatcher, LibrarySync, NativePortOpener, SeeedMode, SerialProbe, UpdateEvent, UpdateOutcome,
    UpdaterConfig, VersionStore, WorkerParts,
};
use std::io::IsTerminal;
use std::sync::Arc;
use std::sync::mpsc::{self, RecvTimeoutError};
use std::time::Duration;

use crate::config::Settings;
use crate::serial::map_prompt_error;
use crate::{Cli, use_fancy_output, was_interrupted};

/// How often the UI loop checks for prompts and Ctrl-C.
const POLL_INTERVAL: Duration = Duration::from_millis(100);

const IDLE_MESSAGE: &str = "Waiting for boards...";

/// How update prompts get answered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum AnswerPolicy {
    Ask,
    Yes,
    No,
}

impl AnswerPolicy {
    fn from_cli(cli: &Cli) -> Self {
        if cli.yes {
            Self::Yes
        } else if cli.non_interactive {
            Self::No
        } else if std::io::stdin().is_terminal() && std::io::stderr().is_terminal() {
            Self::Ask
        } else {
            warn!("No terminal for prompts; updates will be declined (use --yes to accept)");
            Self::No
        }
    }
}

/// Prints above the spinner, or straight to stderr when it is hidden.
struct Console {
    pb: ProgressBar,
    quiet: bool,
}

impl Console {
    fn new(quiet: bool) -> Self {
        let pb = if quiet || !use_fancy_output() {
            ProgressBar::hidden()
        } else {
            let pb = ProgressBar::new_spinner();
            pb.set_style(
                ProgressStyle::with_template("{spinner:.green} {msg}")
                    .unwrap_or_else(|_| ProgressStyle::default_spinner()),
            );
            pb.enable_steady_tick(Duration::from_millis(100));
            pb.set_message(IDLE_MESSAGE);
            pb
        };
        Self { pb, quiet }
    }

    fn line(&self, text: &str) {
        if self.quiet {
            return;
        }
        if self.pb.is_hidden() {
            eprintln!("{text}");
        } else {
            self.pb.println(text);
        }
    }

    fn status(&self, message: String) {
        if self.pb.is_hidden() {
            self.line(&format!("{} {message}", style("ℹ").blue()));
        } else {
            self.pb.set_message(message);
        }
    }

    fn answer(&self, request: ConfirmationRequest, policy: AnswerPolicy) -> Result<()> {
        let accepted = match policy {
            AnswerPolicy::Yes => {
                self.line(&format!("{} {} yes", style("?").yellow(), request.prompt()));
                true
            },
            AnswerPolicy::No => {
                self.line(&format!("{} {} no", style("?").yellow(), request.prompt()));
                false
            },
            AnswerPolicy::Ask => self
                .pb
                .suspend(|| {
                    Confirm::with_theme(&ColorfulTheme::default())
                        .with_prompt(request.prompt())
                        .default(true)
                        .interact_opt()
                })
                .map_err(map_prompt_error)?
                .unwrap_or(false),
        };
        request.answer(accepted);
        Ok(())
    }

    fn missed(&self, event: &DetectionEvent) {
        self.line(&missed_line(event));
    }

    fn render(&self, event: UpdateEvent) {
        match event {
            UpdateEvent::State(state) => debug!("Updater state: {state}"),
            UpdateEvent::Status { message, .. } => self.status(message),
            UpdateEvent::ControlsEnabled(enabled) => debug!("Board controls enabled: {enabled}"),
            UpdateEvent::LibrariesSynced(names) => {
                if !names.is_empty() {
                    self.line(&format!(
                        "{} Updated libraries: {}",
                        style("✓").green(),
                        names.join(", ")
                    ));
                }
            },
            UpdateEvent::Finished(outcome) => {
                self.line(&outcome_line(&outcome));
                if !self.pb.is_hidden() {
                    self.pb.set_message(IDLE_MESSAGE);
                }
            },
        }
    }
}

fn outcome_line(outcome: &UpdateOutcome) -> String {
    match outcome {
        UpdateOutcome::Flashed(version) => format!(
            "{} Firmware {version} flashed",
            style("🎉").green().bold()
        ),
        UpdateOutcome::UpToDate => format!("{} Firmware is up to date", style("✓").green()),
        UpdateOutcome::Declined => format!("{} Update declined", style("•").dim()),
        UpdateOutcome::SwitchedToBootloader => format!(
            "{} Board switched to bootloader mode; waiting for it to re-appear",
            style("🔄").cyan()
        ),
        UpdateOutcome::Failed(reason) => {
            format!("{} Update failed: {reason}", style("✗").red().bold())
        },
    }
}

fn missed_line(event: &DetectionEvent) -> String {
    format!(
        "{} Updater busy; ignored {} on {} (re-plug it to retry)",
        style("⚠").yellow(),
        event.identity.name,
        event.port_name
    )
}

/// Watch command implementation.
pub(crate) fn cmd_watch(
    cli: &Cli,
    settings: &Settings,
    catalog: Arc<BoardCatalog>,
    sync_libraries: bool,
) -> Result<()> {
    let mode = SeeedMode::new(Arc::clone(&catalog));
    let flasher = Bossac::locate(settings.flash_tool.as_deref(), settings.tools_dir.as_deref())
        .context("Cannot find the flashing tool (install bossac or set flash.tool)")?;

    let store = VersionStore::new(
        &settings.cache_dir,
        settings.remote_base.as_str(),
        super::http_downloader()?,
    );
    let library_sync = if sync_libraries {
        Some((
            LibrarySync::new(
                &settings.cache_dir,
                &settings.workspace_dir,
                super::http_downloader()?,
                catalog.libraries(),
            ),
            LibrarySync::index_url(&settings.remote_base),
        ))
    } else {
        None
    };

    let (gate, inbox) = ConfirmationGate::channel();
    let (events_tx, events) = mpsc::channel();

    let updater = mode.start_update_worker(WorkerParts {
        store,
        opener: Arc::new(NativePortOpener),
        flasher: Arc::new(flasher),
        gate: gate.with_timeout(settings.confirm_timeout),
        events: events_tx,
        probe: SerialProbe::new().with_timeout(settings.probe_timeout),
        config: UpdaterConfig {
            flash_attempts: settings.flash_attempts,
            ..UpdaterConfig::default()
        },
        library_sync,
    })?;

    let notifier = updater.notifier();
    // Arrivals the worker queue had no room for. The watcher must not block
    // on a busy worker, or stopping it would wait on the session.
    let (missed_tx, missed) = mpsc::channel();
    let watcher = DeviceWatcher::native(Arc::clone(&catalog))
        .with_interval(settings.watch_interval)
        .spawn(move |event| {
            if !notifier.try_notify(event.clone()) {
                let _ = missed_tx.send(event);
            }
        })?;

    if !cli.quiet {
        eprintln!(
            "{} {} - press Ctrl-C to stop",
            style("📡").cyan(),
            mode.name()
        );
    }

    let console = Console::new(cli.quiet);
    let policy = AnswerPolicy::from_cli(cli);

    let result = loop {
        if was_interrupted() {
            break Ok(());
        }
        for event in missed.try_iter() {
            console.missed(&event);
        }
        if let Some(request) = inbox.try_recv() {
            if let Err(e) = console.answer(request, policy) {
                break Err(e);
            }
            continue;
        }
        match events.recv_timeout(POLL_INTERVAL) {
            Ok(event) => console.render(event),
            Err(RecvTimeoutError::Timeout) => {},
            Err(RecvTimeoutError::Disconnected) => {
                break Err(anyhow!("Update worker stopped unexpectedly"));
            },
        }
    };

    debug!("Stopping watcher and updater");
    watcher.stop();
    // Pending and future prompts resolve to "no" once the inbox is gone.
    drop(inbox);
    updater.shutdown();
    updater.join();
    for event in events.try_iter() {
        console.render(event);
    }
    console.pb.finish_and_clear();

    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use seeedflash::FirmwareVersion;

    #[test]
    fn test_outcome_lines() {
        let version: FirmwareVersion = "2021-06-01".parse().unwrap();
        assert!(outcome_line(&UpdateOutcome::Flashed(version)).contains("2021-06-01 flashed"));
        assert!(outcome_line(&UpdateOutcome::UpToDate).contains("up to date"));
        assert!(outcome_line(&UpdateOutcome::Declined).contains("declined"));
        assert!(outcome_line(&UpdateOutcome::SwitchedToBootloader).contains("bootloader"));
        assert!(
            outcome_line(&UpdateOutcome::Failed("no image".into()))
                .ends_with("Update failed: no image")
        );
    }

    #[test]
    fn test_missed_arrival_names_board_and_port() {
        let catalog = BoardCatalog::bundled().unwrap();
        let event = DetectionEvent {
            identity: catalog.resolve(0x2886, 0x802D).unwrap(),
            port_name: "/dev/ttyACM3".to_string(),
        };

        let line = missed_line(&event);
        assert!(line.contains("wio_terminal on /dev/ttyACM3"));
        assert!(line.contains("re-plug"));
    }

    #[test]
    fn test_hidden_console_answers_by_policy() {
        let console = Console {
            pb: ProgressBar::hidden(),
            quiet: true,
        };
        let (gate, inbox) = ConfirmationGate::channel();
        let worker = std::thread::spawn(move || (gate.ask("Flash?"), gate.ask("Flash again?")));

        console
            .answer(inbox.recv().unwrap(), AnswerPolicy::Yes)
            .unwrap();
        console
            .answer(inbox.recv().unwrap(), AnswerPolicy::No)
            .unwrap();
        assert_eq!(worker.join().unwrap(), (true, false));
    }
}
