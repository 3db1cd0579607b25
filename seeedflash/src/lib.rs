//! # seeedflash
//!
//! A library for keeping ArduPy firmware on Seeed boards up to date.
//!
//! This crate provides the pieces of the firmware update pipeline:
//!
//! - Board catalog mapping USB VID/PID pairs to boards and metadata files
//! - Firmware metadata cache with retrying, atomic downloads
//! - Serial probe reading the firmware version from the ArduPy banner
//! - 1200-baud bootloader trigger and `bossac` flashing
//! - A background orchestrator running check, confirm, switch and flash
//! - ArduPy library archive sync
//!
//! ## Supported Boards
//!
//! - Wio Terminal
//! - Seeeduino XIAO
//!
//! ## Features
//!
//! - `native` (default): Native serial port support via the `serialport` crate
//!
//! ## Example
//!
//! ```rust,no_run
//! use std::sync::{Arc, mpsc};
//!
//! use seeedflash::{
//!     BoardCatalog, Bossac, ConfirmationGate, Downloader, ReqwestTransport, UpdateEvent,
//!     UpdateOrchestrator, VersionStore,
//! };
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let catalog = Arc::new(BoardCatalog::bundled()?);
//!     let downloader = Downloader::new(Arc::new(ReqwestTransport::new()?));
//!     let store = VersionStore::new("cache", seeedflash::DEFAULT_REMOTE_BASE, downloader);
//!     let (gate, inbox) = ConfirmationGate::channel();
//!     let (events_tx, events) = mpsc::channel();
//!
//!     #[cfg(feature = "native")]
//!     {
//!         let updater = UpdateOrchestrator::new(
//!             Arc::clone(&catalog),
//!             store,
//!             Arc::new(seeedflash::NativePortOpener),
//!             Arc::new(Bossac::locate(None, None)?),
//!             gate,
//!             events_tx,
//!         )
//!         .spawn()?;
//!
//!         for board in seeedflash::device::detect_boards(&catalog) {
//!             updater.notify(board);
//!         }
//!
//!         for event in events {
//!             if let Some(request) = inbox.try_recv() {
//!                 request.answer(true);
//!             }
//!             if let UpdateEvent::Finished(outcome) = event {
//!                 println!("{outcome:?}");
//!             }
//!         }
//!     }
//!
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

use std::sync::{Arc, OnceLock};

pub mod board;
pub mod bootloader;
pub mod catalog;
pub mod confirm;
pub mod device;
pub mod download;
pub mod error;
pub mod flasher;
pub mod library;
pub mod port;
pub mod probe;
pub mod store;
pub mod updater;
pub mod version;

static INTERRUPT_CHECKER: OnceLock<Arc<dyn Fn() -> bool + Send + Sync>> = OnceLock::new();

/// Register a global interruption checker used by long-running library loops.
///
/// The checker should return `true` when the current operation should stop
/// (for example after receiving Ctrl-C in CLI applications).
pub fn set_interrupt_checker<F>(checker: F)
where
    F: Fn() -> bool + Send + Sync + 'static,
{
    let _ = INTERRUPT_CHECKER.set(Arc::new(checker));
}

/// Returns whether interruption was requested by the embedding application.
#[must_use]
pub fn is_interrupted_requested() -> bool {
    INTERRUPT_CHECKER
        .get()
        .is_some_and(|checker| checker())
}

// Native-specific re-exports
#[cfg(feature = "native")]
pub use port::{NativePort, NativePortEnumerator, NativePortOpener};
pub use {
    board::{ActionDescriptor, DeviceMode, SeeedMode, WorkerParts},
    bootloader::enter_bootloader,
    catalog::{BoardCatalog, BoardCatalogEntry, BoardIdentity, BoardMode},
    confirm::{ConfirmationGate, ConfirmationInbox, ConfirmationRequest},
    device::{DetectedPort, DetectionEvent, DeviceWatcher, WatcherHandle},
    download::{DownloadJob, Downloader, HttpTransport, ReqwestTransport},
    error::{
        CatalogError, DownloadError, Error, FlashError, ProbeError, Result, SwitchError,
    },
    flasher::{Bossac, FlashTool, flash_with_retries},
    library::{LibraryEntry, LibrarySync, LibrarySyncReport},
    port::{Port, PortEnumerator, PortInfo, PortOpener, SerialConfig},
    probe::SerialProbe,
    store::{DEFAULT_REMOTE_BASE, FirmwareMetadata, VersionStore},
    updater::{
        UpdateEvent, UpdateNotifier, UpdateOrchestrator, UpdateOutcome, UpdateSession,
        UpdateState, UpdaterConfig, UpdaterHandle,
    },
    version::FirmwareVersion,
};
