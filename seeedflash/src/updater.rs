//! Firmware update orchestrator.
//!
//! One background worker handles detection events one at a time:
//!
//! ```text
//! Idle -> CheckingMetadata -> ProbingDevice -+-> Idle                    (up to date)
//!                                            +-> AwaitingConfirmation -+-> Idle (declined)
//!                                            |                         +-> SwitchingMode -> Idle
//!                                            |                         +-> Flashing
//!                                            +-> Flashing -> Reporting -> Idle
//! ```
//!
//! A board in normal mode is switched into its bootloader after the user
//! agrees; it re-enumerates under its boot-mode ID and the next session
//! flashes it without asking again. Progress goes to the host as
//! [`UpdateEvent`]s.

use std::collections::{HashSet, VecDeque};
use std::fmt;
use std::io;
use std::sync::Arc;
use std::sync::mpsc::{self, Receiver, Sender, SyncSender, TryRecvError, TrySendError};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use log::{debug, error, info, warn};

use crate::bootloader::enter_bootloader;
use crate::catalog::{BoardCatalog, BoardIdentity};
use crate::confirm::ConfirmationGate;
use crate::device::DetectionEvent;
use crate::error::ProbeError;
use crate::flasher::{DEFAULT_FLASH_ATTEMPTS, FlashTool, flash_with_retries};
use crate::library::LibrarySync;
use crate::port::PortOpener;
use crate::probe::SerialProbe;
use crate::store::{FirmwareMetadata, VersionStore};
use crate::version::FirmwareVersion;

/// How long transient status messages stay visible.
pub const SHORT_STATUS: Duration = Duration::from_secs(5);

/// Default capacity of the detection queue.
pub const DEFAULT_QUEUE_CAPACITY: usize = 8;

/// Pipeline state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UpdateState {
    /// Waiting for a detection event.
    Idle,
    /// Refreshing firmware metadata.
    CheckingMetadata,
    /// Reading the version from the board.
    ProbingDevice,
    /// Waiting for the user.
    AwaitingConfirmation,
    /// Resetting the board into its bootloader.
    SwitchingMode,
    /// Running the flashing tool.
    Flashing,
    /// Announcing the result of a flash.
    Reporting,
}

impl fmt::Display for UpdateState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Idle => "idle",
            Self::CheckingMetadata => "checking metadata",
            Self::ProbingDevice => "probing device",
            Self::AwaitingConfirmation => "awaiting confirmation",
            Self::SwitchingMode => "switching mode",
            Self::Flashing => "flashing",
            Self::Reporting => "reporting",
        };
        f.write_str(name)
    }
}

/// How a session ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpdateOutcome {
    /// The board now runs the given firmware.
    Flashed(FirmwareVersion),
    /// The board already runs the latest firmware.
    UpToDate,
    /// The user said no.
    Declined,
    /// The board was reset into its bootloader and will re-appear.
    SwitchedToBootloader,
    /// Something went wrong.
    Failed(String),
}

/// Message from the orchestrator to its host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpdateEvent {
    /// The pipeline entered a state.
    State(UpdateState),
    /// Human-readable status; `None` keeps it until replaced.
    Status {
        /// Text to show.
        message: String,
        /// How long to show it.
        duration: Option<Duration>,
    },
    /// Board-related controls should be enabled or disabled.
    ControlsEnabled(bool),
    /// A library sync finished; the value lists updated archives.
    LibrariesSynced(Vec<String>),
    /// A session ended.
    Finished(UpdateOutcome),
}

/// State carried through one session.
#[derive(Debug, Clone)]
pub struct UpdateSession {
    /// Board being handled.
    pub identity: BoardIdentity,
    /// Port the board is attached to.
    pub port_name: String,
    /// Latest known firmware for the board.
    pub metadata: Option<FirmwareMetadata>,
    /// Version reported by the board.
    pub device_version: Option<FirmwareVersion>,
    /// Whether the user must agree before anything is written.
    pub needs_confirmation: bool,
    /// Whether the board answered the probe with an ArduPy banner.
    pub board_has_existing_firmware: bool,
}

impl UpdateSession {
    fn new(event: &DetectionEvent) -> Self {
        Self {
            identity: event.identity.clone(),
            port_name: event.port_name.clone(),
            metadata: None,
            device_version: None,
            needs_confirmation: true,
            board_has_existing_firmware: false,
        }
    }

    fn prompt(&self, version: FirmwareVersion) -> String {
        if self.board_has_existing_firmware {
            format!("There is a new firmware ({version}) available. Update your board now?")
        } else if self.identity.in_bootloader() {
            format!("Your board is in bootloader mode. Flash firmware {version}?")
        } else {
            format!("There is no ArduPy firmware on your board. Flash firmware {version}?")
        }
    }
}

/// Orchestrator tuning.
#[derive(Debug, Clone)]
pub struct UpdaterConfig {
    /// Total flashing attempts.
    pub flash_attempts: u32,
    /// Capacity of the detection queue.
    pub queue_capacity: usize,
}

impl Default for UpdaterConfig {
    fn default() -> Self {
        Self {
            flash_attempts: DEFAULT_FLASH_ATTEMPTS,
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
        }
    }
}

enum Message {
    Detected(DetectionEvent),
    Shutdown,
}

/// Runs update sessions for detected boards.
pub struct UpdateOrchestrator {
    catalog: Arc<BoardCatalog>,
    store: VersionStore,
    opener: Arc<dyn PortOpener>,
    flasher: Arc<dyn FlashTool>,
    gate: ConfirmationGate,
    events: Sender<UpdateEvent>,
    probe: SerialProbe,
    config: UpdaterConfig,
    library_sync: Option<(LibrarySync, String)>,
    pre_cleared: HashSet<String>,
    state: UpdateState,
}

impl UpdateOrchestrator {
    /// Create an orchestrator. Progress is sent to `events`.
    pub fn new(
        catalog: Arc<BoardCatalog>,
        store: VersionStore,
        opener: Arc<dyn PortOpener>,
        flasher: Arc<dyn FlashTool>,
        gate: ConfirmationGate,
        events: Sender<UpdateEvent>,
    ) -> Self {
        Self {
            catalog,
            store,
            opener,
            flasher,
            gate,
            events,
            probe: SerialProbe::new(),
            config: UpdaterConfig::default(),
            library_sync: None,
            pre_cleared: HashSet::new(),
            state: UpdateState::Idle,
        }
    }

    /// Use a custom probe.
    #[must_use]
    pub fn with_probe(mut self, probe: SerialProbe) -> Self {
        self.probe = probe;
        self
    }

    /// Use a custom configuration.
    #[must_use]
    pub fn with_config(mut self, config: UpdaterConfig) -> Self {
        self.config = config;
        self
    }

    /// Sync libraries from `index_url` when the worker starts.
    #[must_use]
    pub fn with_library_sync(mut self, sync: LibrarySync, index_url: impl Into<String>) -> Self {
        self.library_sync = Some((sync, index_url.into()));
        self
    }

    /// Current pipeline state.
    pub fn state(&self) -> UpdateState {
        self.state
    }

    fn transition(&mut self, state: UpdateState) {
        debug!("Updater: {} -> {state}", self.state);
        self.state = state;
        self.emit(UpdateEvent::State(state));
    }

    fn emit(&self, event: UpdateEvent) {
        let _ = self.events.send(event);
    }

    fn status(&self, message: impl Into<String>, duration: Option<Duration>) {
        let message = message.into();
        debug!("Status: {message}");
        self.emit(UpdateEvent::Status { message, duration });
    }

    fn finish(&mut self, outcome: UpdateOutcome) -> UpdateOutcome {
        self.emit(UpdateEvent::Finished(outcome.clone()));
        self.transition(UpdateState::Idle);
        outcome
    }

    fn fail(&mut self, reason: String) -> UpdateOutcome {
        warn!("Update failed: {reason}");
        self.status(reason.clone(), Some(SHORT_STATUS));
        self.finish(UpdateOutcome::Failed(reason))
    }

    /// Run one session for a detected board, blocking until it ends.
    pub fn handle(&mut self, event: &DetectionEvent) -> UpdateOutcome {
        let mut session = UpdateSession::new(event);
        let board = session.identity.name.clone();
        info!(
            "Detected {board} on {} ({:?} mode)",
            session.port_name, session.identity.mode
        );

        self.transition(UpdateState::CheckingMetadata);
        if !session.identity.in_bootloader() && self.pre_cleared.remove(&board) {
            debug!("{board} came back in normal mode; confirmation required again");
        }

        let Some(entry) = self.catalog.entry_for(&session.identity).cloned() else {
            return self.fail(format!("{board} is not in the board catalog"));
        };
        let metadata = match self.store.refresh(&entry) {
            Ok(metadata) => metadata,
            Err(e) => return self.fail(format!("Cannot get firmware information: {e}")),
        };
        let latest = metadata.version;
        session.metadata = Some(metadata);

        self.transition(UpdateState::ProbingDevice);
        if !session.identity.in_bootloader() {
            match self
                .probe
                .probe_named(self.opener.as_ref(), &session.port_name)
            {
                Ok(version) => {
                    session.device_version = Some(version);
                    session.board_has_existing_firmware = true;
                    if !latest.is_newer_than(&version) {
                        self.status(
                            format!("Your board already runs the latest firmware ({version})."),
                            Some(SHORT_STATUS),
                        );
                        return self.finish(UpdateOutcome::UpToDate);
                    }
                    info!("Board runs {version}, latest is {latest}");
                },
                Err(ProbeError::NoFirmware) => info!("No ArduPy firmware on {board}"),
                Err(e) => return self.fail(e.to_string()),
            }
        }

        session.needs_confirmation =
            !(session.identity.in_bootloader() && self.pre_cleared.remove(&board));

        if session.needs_confirmation {
            self.transition(UpdateState::AwaitingConfirmation);
            if !self.gate.ask(&session.prompt(latest)) {
                self.status("Firmware update cancelled.", Some(SHORT_STATUS));
                return self.finish(UpdateOutcome::Declined);
            }
        }

        if session.identity.in_bootloader() {
            self.flash(&session)
        } else {
            self.switch_mode(&session)
        }
    }

    fn switch_mode(&mut self, session: &UpdateSession) -> UpdateOutcome {
        self.transition(UpdateState::SwitchingMode);
        self.emit(UpdateEvent::ControlsEnabled(false));

        let result = enter_bootloader(self.opener.as_ref(), &session.port_name);
        self.emit(UpdateEvent::ControlsEnabled(true));

        match result {
            Ok(()) => {
                self.pre_cleared.insert(session.identity.name.clone());
                self.status(
                    "Board is restarting into bootloader mode...",
                    None,
                );
                self.finish(UpdateOutcome::SwitchedToBootloader)
            },
            Err(e) => self.fail(e.to_string()),
        }
    }

    fn flash(&mut self, session: &UpdateSession) -> UpdateOutcome {
        let Some(metadata) = session.metadata.clone() else {
            return self.fail("No firmware metadata".to_string());
        };

        self.transition(UpdateState::Flashing);
        self.emit(UpdateEvent::ControlsEnabled(false));

        let result = match self.store.ensure_image(&metadata) {
            Ok(image) => {
                let flasher = Arc::clone(&self.flasher);
                let attempts = self.config.flash_attempts;
                flash_with_retries(
                    flasher.as_ref(),
                    &image,
                    &session.port_name,
                    attempts,
                    |attempt, attempts| {
                        // A retry re-enters Flashing.
                        if attempt > 1 {
                            self.transition(UpdateState::Flashing);
                        }
                        self.status(format!("Flashing... ({attempt}/{attempts})"), None);
                    },
                )
                .map_err(|e| e.to_string())
            },
            Err(e) => Err(e.to_string()),
        };

        self.transition(UpdateState::Reporting);
        self.emit(UpdateEvent::ControlsEnabled(true));
        match result {
            Ok(_) => {
                let version = metadata.version;
                self.status(
                    format!("Your board was updated to version {version} successfully!"),
                    Some(SHORT_STATUS),
                );
                self.finish(UpdateOutcome::Flashed(version))
            },
            Err(reason) => {
                error!("Flashing {} failed: {reason}", session.port_name);
                self.fail(format!("Flashing failed: {reason}"))
            },
        }
    }

    fn sync_libraries(&self) {
        let Some((sync, index_url)) = &self.library_sync else {
            return;
        };
        match sync.sync(index_url, |line| self.status(line, None)) {
            Ok(report) if report.updated.is_empty() => {
                self.emit(UpdateEvent::LibrariesSynced(Vec::new()));
            },
            Ok(report) => {
                self.status("Libraries updated successfully!", Some(SHORT_STATUS));
                self.emit(UpdateEvent::LibrariesSynced(report.updated));
            },
            Err(e) => {
                warn!("Library sync failed: {e}");
                self.status(
                    "Library update failed, please check your network.",
                    Some(SHORT_STATUS),
                );
            },
        }
    }

    /// Start the worker thread.
    pub fn spawn(mut self) -> io::Result<UpdaterHandle> {
        let (tx, rx) = mpsc::sync_channel(self.config.queue_capacity.max(1));
        let thread = thread::Builder::new()
            .name("seeedflash-updater".into())
            .spawn(move || {
                self.sync_libraries();
                self.run(&rx);
            })?;

        Ok(UpdaterHandle {
            notifier: UpdateNotifier { tx },
            thread: Some(thread),
        })
    }

    fn run(&mut self, rx: &Receiver<Message>) {
        let mut pending: VecDeque<DetectionEvent> = VecDeque::new();

        loop {
            if pending.is_empty() {
                match rx.recv() {
                    Ok(Message::Detected(event)) => pending.push_back(event),
                    Ok(Message::Shutdown) | Err(_) => break,
                }
            }
            if !drain_into(rx, &mut pending) {
                break;
            }
            let Some(event) = pending.pop_front() else {
                continue;
            };
            if crate::is_interrupted_requested() {
                break;
            }
            let outcome = self.handle(&event);
            debug!("Session on {} ended: {outcome:?}", event.port_name);
        }
        debug!("Updater stopped");
    }
}

/// Move queued events into `pending`, keeping only the newest event per
/// port. Returns `false` when shutdown was requested.
fn drain_into(rx: &Receiver<Message>, pending: &mut VecDeque<DetectionEvent>) -> bool {
    loop {
        match rx.try_recv() {
            Ok(Message::Detected(event)) => {
                pending.retain(|queued| queued.port_name != event.port_name);
                pending.push_back(event);
            },
            Ok(Message::Shutdown) => return false,
            Err(TryRecvError::Empty) => return true,
            Err(TryRecvError::Disconnected) => return !pending.is_empty(),
        }
    }
}

/// Cloneable sender of detection events.
#[derive(Clone)]
pub struct UpdateNotifier {
    tx: SyncSender<Message>,
}

impl UpdateNotifier {
    /// Queue a detection event, blocking while the queue is full. Returns
    /// `false` once the worker has stopped.
    pub fn notify(&self, event: DetectionEvent) -> bool {
        self.tx.send(Message::Detected(event)).is_ok()
    }

    /// Queue a detection event unless the queue is full.
    pub fn try_notify(&self, event: DetectionEvent) -> bool {
        match self.tx.try_send(Message::Detected(event)) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                warn!("Update queue full; dropping detection event");
                false
            },
            Err(TrySendError::Disconnected(_)) => false,
        }
    }
}

/// Handle to a running orchestrator.
pub struct UpdaterHandle {
    notifier: UpdateNotifier,
    thread: Option<JoinHandle<()>>,
}

impl UpdaterHandle {
    /// A sender for detection events, e.g. for a device watcher.
    pub fn notifier(&self) -> UpdateNotifier {
        self.notifier.clone()
    }

    /// See [`UpdateNotifier::notify`].
    pub fn notify(&self, event: DetectionEvent) -> bool {
        self.notifier.notify(event)
    }

    /// See [`UpdateNotifier::try_notify`].
    pub fn try_notify(&self, event: DetectionEvent) -> bool {
        self.notifier.try_notify(event)
    }

    /// Ask the worker to stop after the current session. Events still
    /// queued are dropped.
    pub fn shutdown(&self) {
        let _ = self.notifier.tx.send(Message::Shutdown);
    }

    /// Wait for the worker to exit.
    pub fn join(mut self) {
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

impl Drop for UpdaterHandle {
    fn drop(&mut self) {
        if let Some(thread) = self.thread.take() {
            let _ = self.notifier.tx.send(Message::Shutdown);
            let _ = thread.join();
        }
    }
}
