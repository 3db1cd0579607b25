//! Board mode capabilities.
//!
//! A host application talks to a family of boards through [`DeviceMode`]:
//! find a supported board among the serial ports, start the background
//! updater, and list the actions the board supports. [`SeeedMode`] is the
//! implementation for Seeed's ArduPy boards.

use std::io;
use std::sync::Arc;
use std::sync::mpsc::Sender;

use crate::catalog::BoardCatalog;
use crate::confirm::ConfirmationGate;
use crate::device::{DetectionEvent, classify_ports};
use crate::flasher::FlashTool;
use crate::library::LibrarySync;
use crate::port::{PortInfo, PortOpener};
use crate::probe::SerialProbe;
use crate::store::VersionStore;
use crate::updater::{UpdateEvent, UpdateOrchestrator, UpdaterConfig, UpdaterHandle};

/// An action a host can offer for a board.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ActionDescriptor {
    /// Identifier, also used for the icon.
    pub name: &'static str,
    /// Label.
    pub display_name: &'static str,
    /// Tooltip.
    pub description: &'static str,
    /// Keyboard shortcut.
    pub shortcut: &'static str,
}

/// Everything the update worker needs from its host.
pub struct WorkerParts {
    /// Metadata cache.
    pub store: VersionStore,
    /// Serial port factory.
    pub opener: Arc<dyn PortOpener>,
    /// Flashing tool.
    pub flasher: Arc<dyn FlashTool>,
    /// Worker side of the confirmation rendezvous.
    pub gate: ConfirmationGate,
    /// Where progress goes.
    pub events: Sender<UpdateEvent>,
    /// Version probe settings.
    pub probe: SerialProbe,
    /// Orchestrator tuning.
    pub config: UpdaterConfig,
    /// Library sync to run when the worker starts, with its index URL.
    pub library_sync: Option<(LibrarySync, String)>,
}

/// Capabilities of a board family.
pub trait DeviceMode {
    /// Short name.
    fn name(&self) -> &str;

    /// One-line description.
    fn description(&self) -> &str;

    /// First supported board among `ports`.
    fn detect(&self, ports: &[PortInfo]) -> Option<DetectionEvent>;

    /// Start the background update worker.
    fn start_update_worker(&self, parts: WorkerParts) -> io::Result<UpdaterHandle>;

    /// Actions offered for the board, in display order.
    fn actions(&self) -> Vec<ActionDescriptor>;
}

/// Seeed ArduPy boards.
#[derive(Debug, Clone)]
pub struct SeeedMode {
    catalog: Arc<BoardCatalog>,
}

impl SeeedMode {
    /// Mode over the given catalog.
    pub fn new(catalog: Arc<BoardCatalog>) -> Self {
        Self { catalog }
    }

    /// Board catalog.
    pub fn catalog(&self) -> &Arc<BoardCatalog> {
        &self.catalog
    }
}

impl DeviceMode for SeeedMode {
    fn name(&self) -> &str {
        "Seeed ArduPy"
    }

    fn description(&self) -> &str {
        "Use ArduPy on Seeed's line of boards."
    }

    fn detect(&self, ports: &[PortInfo]) -> Option<DetectionEvent> {
        classify_ports(ports.to_vec(), &self.catalog)
            .iter()
            .find_map(|port| port.detection_event())
    }

    fn start_update_worker(&self, parts: WorkerParts) -> io::Result<UpdaterHandle> {
        let mut orchestrator = UpdateOrchestrator::new(
            Arc::clone(&self.catalog),
            parts.store,
            parts.opener,
            parts.flasher,
            parts.gate,
            parts.events,
        )
        .with_probe(parts.probe)
        .with_config(parts.config);

        if let Some((sync, index_url)) = parts.library_sync {
            orchestrator = orchestrator.with_library_sync(sync, index_url);
        }
        orchestrator.spawn()
    }

    fn actions(&self) -> Vec<ActionDescriptor> {
        vec![
            ActionDescriptor {
                name: "run",
                display_name: "Run",
                description: "Run your code directly on the board via the REPL.",
                shortcut: "F5",
            },
            ActionDescriptor {
                name: "files",
                display_name: "Files",
                description: "Access the file system on the board.",
                shortcut: "F4",
            },
            ActionDescriptor {
                name: "repl",
                display_name: "REPL",
                description: "Use the REPL to live-code on the board.",
                shortcut: "Ctrl+Shift+I",
            },
            ActionDescriptor {
                name: "plotter",
                display_name: "Plotter",
                description: "Plot incoming REPL data.",
                shortcut: "Ctrl+Shift+P",
            },
        ]
    }
}
