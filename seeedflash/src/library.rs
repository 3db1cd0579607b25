//! ArduPy library archives.
//!
//! Libraries are published as zip archives listed in a remote index
//! (`libaray.json`, the name used upstream). Each archive is extracted into
//! the user's workspace under its name without the `.zip` suffix. The
//! versions installed locally are kept in `libraries.json` in the cache
//! directory, seeded from the board catalog on first use.

use std::collections::HashMap;
use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};

use log::{debug, info, warn};
use serde::{Deserialize, Serialize};

use crate::download::{DEFAULT_MAX_ATTEMPTS, DEFAULT_TIMEOUT, Downloader, LARGE_FILE_TIMEOUT, temp_path};
use crate::error::{Error, Result};
use crate::store::remote_url;
use crate::version::FirmwareVersion;

/// File name of the remote library index.
pub const LIBRARY_INDEX: &str = "libaray.json";

/// Local record of installed library versions.
pub const LIBRARY_RECORD: &str = "libraries.json";

/// One library archive.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LibraryEntry {
    /// Archive file name, e.g. `Seeed_Arduino_ArduPy_Sensors.zip`.
    pub name: String,
    /// Release date.
    pub version: FirmwareVersion,
    /// Archive URL.
    pub path: String,
}

impl LibraryEntry {
    /// Directory the archive extracts into.
    pub fn dir_name(&self) -> &str {
        self.name
            .strip_suffix(".zip")
            .unwrap_or(&self.name)
    }

    fn validate(&self) -> Result<()> {
        if self.dir_name().is_empty()
            || self.name.contains(['/', '\\'])
            || self.name.starts_with('.')
        {
            return Err(Error::Metadata(format!("bad library name '{}'", self.name)));
        }
        Ok(())
    }
}

/// What a library sync changed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LibrarySyncReport {
    /// Libraries extracted from archives already in the cache.
    pub extracted: Vec<String>,
    /// Libraries downloaded and extracted from the index.
    pub updated: Vec<String>,
}

impl LibrarySyncReport {
    /// Whether nothing changed.
    pub fn is_empty(&self) -> bool {
        self.extracted.is_empty() && self.updated.is_empty()
    }
}

/// Extract `archive` into `dest`.
///
/// Returns `false` without touching anything when `dest` already exists. A
/// failed extraction removes the partially written directory.
pub fn extract_archive(archive: &Path, dest: &Path) -> Result<bool> {
    if dest.exists() {
        return Ok(false);
    }

    let result = unzip(archive, dest);
    if let Err(e) = &result {
        warn!("Extracting {} failed: {e}", archive.display());
        if dest.exists() {
            let _ = fs::remove_dir_all(dest);
        }
    }
    result.map(|()| true)
}

fn unzip(archive: &Path, dest: &Path) -> Result<()> {
    let file = File::open(archive)?;
    let mut zip = zip::ZipArchive::new(file).map_err(|e| Error::Archive(e.to_string()))?;
    fs::create_dir_all(dest)?;

    for i in 0..zip.len() {
        let mut entry = zip
            .by_index(i)
            .map_err(|e| Error::Archive(e.to_string()))?;
        let Some(relative) = entry.enclosed_name() else {
            return Err(Error::Archive(format!("unsafe path '{}'", entry.name())));
        };
        let out_path = dest.join(relative);

        if entry.is_dir() {
            fs::create_dir_all(&out_path)?;
        } else {
            if let Some(parent) = out_path.parent() {
                fs::create_dir_all(parent)?;
            }
            let mut out = File::create(&out_path)?;
            io::copy(&mut entry, &mut out)?;
        }
    }

    debug!("Extracted {} entries into {}", zip.len(), dest.display());
    Ok(())
}

/// Keeps the workspace's ArduPy libraries current.
pub struct LibrarySync {
    cache_dir: PathBuf,
    workspace_dir: PathBuf,
    downloader: Downloader,
    seed: Vec<LibraryEntry>,
}

impl LibrarySync {
    /// Create a sync over the given directories. `seed` is the record used
    /// before anything was synced.
    pub fn new(
        cache_dir: impl Into<PathBuf>,
        workspace_dir: impl Into<PathBuf>,
        downloader: Downloader,
        seed: &[LibraryEntry],
    ) -> Self {
        Self {
            cache_dir: cache_dir.into(),
            workspace_dir: workspace_dir.into(),
            downloader,
            seed: seed.to_vec(),
        }
    }

    /// Remote index URL under `base`.
    pub fn index_url(base: &str) -> String {
        remote_url(base, LIBRARY_INDEX)
    }

    fn record_path(&self) -> PathBuf {
        self.cache_dir.join(LIBRARY_RECORD)
    }

    fn archive_path(&self, entry: &LibraryEntry) -> PathBuf {
        self.cache_dir.join(&entry.name)
    }

    fn target_dir(&self, entry: &LibraryEntry) -> PathBuf {
        self.workspace_dir.join(entry.dir_name())
    }

    /// Libraries recorded as installed.
    pub fn recorded(&self) -> Vec<LibraryEntry> {
        match fs::read_to_string(self.record_path()) {
            Ok(text) => serde_json::from_str(&text).unwrap_or_else(|e| {
                warn!("Ignoring corrupt {LIBRARY_RECORD}: {e}");
                self.seed.clone()
            }),
            Err(_) => self.seed.clone(),
        }
    }

    /// Extract every recorded library whose archive is cached but whose
    /// workspace directory is missing.
    pub fn extract_known(&self) -> Vec<String> {
        let mut extracted = Vec::new();
        for entry in self.recorded() {
            if entry.validate().is_err() {
                continue;
            }
            let archive = self.archive_path(&entry);
            if !archive.is_file() {
                continue;
            }
            if let Ok(true) = extract_archive(&archive, &self.target_dir(&entry)) {
                extracted.push(entry.name);
            }
        }
        extracted
    }

    /// Bring the workspace up to date with the remote index.
    ///
    /// `on_status` receives a progress line per library.
    pub fn sync(&self, index_url: &str, mut on_status: impl FnMut(&str)) -> Result<LibrarySyncReport> {
        let mut report = LibrarySyncReport {
            extracted: self.extract_known(),
            ..Default::default()
        };

        let index_path = self.cache_dir.join(LIBRARY_INDEX);
        self.downloader
            .fetch_url(index_url, &index_path, DEFAULT_TIMEOUT, DEFAULT_MAX_ATTEMPTS)?;
        let index: Vec<LibraryEntry> = serde_json::from_str(&fs::read_to_string(&index_path)?)
            .map_err(|e| Error::Metadata(format!("{LIBRARY_INDEX}: {e}")))?;

        let installed: HashMap<String, FirmwareVersion> = self
            .recorded()
            .into_iter()
            .map(|e| (e.name, e.version))
            .collect();

        for entry in &index {
            entry.validate()?;
            let action = match installed.get(&entry.name) {
                None => "Downloading",
                Some(v) if entry.version.is_newer_than(v) => "Updating",
                Some(_) => continue,
            };
            on_status(&format!("{action} {}...", entry.name));

            let archive = self.archive_path(entry);
            self.downloader.fetch_url(
                &entry.path,
                &archive,
                LARGE_FILE_TIMEOUT,
                DEFAULT_MAX_ATTEMPTS,
            )?;

            on_status(&format!("Extracting {}...", entry.name));
            let target = self.target_dir(entry);
            if target.exists() {
                fs::remove_dir_all(&target)?;
            }
            extract_archive(&archive, &target)?;
            report.updated.push(entry.name.clone());
        }

        if !report.updated.is_empty() {
            self.write_record(&index)?;
            info!("Updated libraries: {}", report.updated.join(", "));
        }
        Ok(report)
    }

    fn write_record(&self, entries: &[LibraryEntry]) -> Result<()> {
        let path = self.record_path();
        let tmp = temp_path(&path);
        let json = serde_json::to_string_pretty(entries).map_err(|e| Error::Metadata(e.to_string()))?;
        fs::create_dir_all(&self.cache_dir)?;
        fs::write(&tmp, json)?;
        fs::rename(&tmp, &path)?;
        Ok(())
    }
}
