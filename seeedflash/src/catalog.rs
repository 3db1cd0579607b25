//! Board catalog.
//!
//! The catalog maps USB VID/PID pairs to ArduPy boards. Every board shows up
//! under two pairs: one while running firmware ("normal") and one while its
//! bootloader is waiting for an image ("boot"). Both pairs point at the same
//! metadata file, `config-<board>.json`.
//!
//! ## Descriptor format
//!
//! ```json
//! {
//!   "boot":   [{ "name": "wio_terminal", "pvid": [10374, 45] }],
//!   "normal": [{ "name": "wio_terminal", "pvid": [10374, 32813] }],
//!   "lib":    [{ "name": "Sensors.zip", "version": "2020-03-01", "path": "https://..." }]
//! }
//! ```

use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::Path;

use log::debug;
use serde::Deserialize;

use crate::error::CatalogError;
use crate::library::LibraryEntry;

/// Descriptor bundled with the crate.
const BUNDLED_DESCRIPTOR: &str = include_str!("../resources/boards.json");

/// Whether the board runs its firmware or waits in its bootloader.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BoardMode {
    /// Running firmware, reachable over the REPL.
    Normal,
    /// Bootloader waiting for a firmware image.
    Bootloader,
}

/// A detected board, resolved through the catalog.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BoardIdentity {
    /// USB vendor ID.
    pub vendor_id: u16,
    /// USB product ID.
    pub product_id: u16,
    /// Mode implied by the product ID.
    pub mode: BoardMode,
    /// Catalog board name (e.g. `wio_terminal`).
    pub name: String,
}

impl BoardIdentity {
    /// Whether the board is waiting in its bootloader.
    pub fn in_bootloader(&self) -> bool {
        self.mode == BoardMode::Bootloader
    }
}

/// One catalog row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BoardCatalogEntry {
    /// `(vendor_id, product_id)`.
    pub identity: (u16, u16),
    /// Board name.
    pub name: String,
    /// Mode this pair identifies.
    pub mode: BoardMode,
    /// Name of the board's metadata document.
    pub metadata_file_name: String,
}

#[derive(Debug, Deserialize)]
struct Descriptor {
    #[serde(default)]
    boot: Vec<DescriptorBoard>,
    #[serde(default)]
    normal: Vec<DescriptorBoard>,
    #[serde(default)]
    lib: Vec<LibraryEntry>,
}

#[derive(Debug, Deserialize)]
struct DescriptorBoard {
    name: String,
    pvid: (u16, u16),
}

/// Immutable VID/PID lookup table, loaded once at startup.
#[derive(Debug, Clone)]
pub struct BoardCatalog {
    identities: HashSet<(u16, u16)>,
    metadata_files: HashMap<String, BoardCatalogEntry>,
    libraries: Vec<LibraryEntry>,
}

/// Textual key of a VID/PID pair, e.g. `"(10374, 32813)"`.
pub fn pvid_key(vid: u16, pid: u16) -> String {
    format!("({vid}, {pid})")
}

/// Metadata file name for a board.
pub fn metadata_file_name(board: &str) -> String {
    format!("config-{board}.json")
}

impl BoardCatalog {
    /// Load the catalog bundled with the crate.
    pub fn bundled() -> Result<Self, CatalogError> {
        Self::from_json(BUNDLED_DESCRIPTOR)
    }

    /// Load a catalog descriptor from a file.
    pub fn from_path(path: &Path) -> Result<Self, CatalogError> {
        let text = fs::read_to_string(path)?;
        debug!("Loading board catalog from {}", path.display());
        Self::from_json(&text)
    }

    /// Parse a catalog descriptor.
    pub fn from_json(text: &str) -> Result<Self, CatalogError> {
        let descriptor: Descriptor = serde_json::from_str(text)?;

        let mut catalog = Self {
            identities: HashSet::new(),
            metadata_files: HashMap::new(),
            libraries: descriptor.lib,
        };

        let boot = descriptor
            .boot
            .into_iter()
            .map(|b| (b, BoardMode::Bootloader));
        let normal = descriptor
            .normal
            .into_iter()
            .map(|b| (b, BoardMode::Normal));

        for (board, mode) in boot.chain(normal) {
            catalog.insert(board, mode)?;
        }

        debug!("Board catalog holds {} VID/PID pairs", catalog.len());
        Ok(catalog)
    }

    fn insert(&mut self, board: DescriptorBoard, mode: BoardMode) -> Result<(), CatalogError> {
        let (vid, pid) = board.pvid;
        let key = pvid_key(vid, pid);

        if let Some(existing) = self.metadata_files.get(&key) {
            return Err(CatalogError::Duplicate {
                vid,
                pid,
                first: existing.name.clone(),
                second: board.name,
            });
        }

        self.identities.insert((vid, pid));
        self.metadata_files.insert(
            key,
            BoardCatalogEntry {
                identity: (vid, pid),
                metadata_file_name: metadata_file_name(&board.name),
                name: board.name,
                mode,
            },
        );
        Ok(())
    }

    /// Look up the catalog entry for a VID/PID pair.
    pub fn lookup(&self, vid: u16, pid: u16) -> Option<&BoardCatalogEntry> {
        self.metadata_files.get(&pvid_key(vid, pid))
    }

    /// Resolve a VID/PID pair into a board identity.
    pub fn resolve(&self, vid: u16, pid: u16) -> Option<BoardIdentity> {
        self.lookup(vid, pid).map(|entry| BoardIdentity {
            vendor_id: vid,
            product_id: pid,
            mode: entry.mode,
            name: entry.name.clone(),
        })
    }

    /// Catalog entry for a resolved identity.
    pub fn entry_for(&self, identity: &BoardIdentity) -> Option<&BoardCatalogEntry> {
        self.lookup(identity.vendor_id, identity.product_id)
    }

    /// Whether a VID/PID pair belongs to a known board.
    pub fn contains(&self, vid: u16, pid: u16) -> bool {
        self.identities.contains(&(vid, pid))
    }

    /// All entries, sorted by board name then mode.
    pub fn entries(&self) -> Vec<&BoardCatalogEntry> {
        let mut entries: Vec<_> = self.metadata_files.values().collect();
        entries.sort_by(|a, b| {
            a.name
                .cmp(&b.name)
                .then_with(|| a.identity.cmp(&b.identity))
        });
        entries
    }

    /// Libraries recorded in the descriptor.
    pub fn libraries(&self) -> &[LibraryEntry] {
        &self.libraries
    }

    /// Number of VID/PID pairs.
    pub fn len(&self) -> usize {
        self.identities.len()
    }

    /// Whether the catalog is empty.
    pub fn is_empty(&self) -> bool {
        self.identities.is_empty()
    }
}
