//! Firmware metadata cache.
//!
//! Each board has a small metadata document, `config-<board>.json`, published
//! next to its firmware images:
//!
//! ```json
//! { "firmware": { "version": "2021-06-01", "name": "ArduPy_wio_terminal.bin", "path": "https://..." } }
//! ```
//!
//! [`VersionStore`] keeps the last downloaded copy in the cache directory,
//! uses it as the baseline for "is there something newer", and fetches the
//! firmware image itself only when a newer release shows up.

use std::ffi::OsString;
use std::fs;
use std::path::{Path, PathBuf};

use log::{debug, info, warn};
use serde::{Deserialize, Serialize};

use crate::catalog::BoardCatalogEntry;
use crate::download::{DEFAULT_MAX_ATTEMPTS, DEFAULT_TIMEOUT, Downloader, LARGE_FILE_TIMEOUT};
use crate::error::{DownloadError, Error, Result};
use crate::version::FirmwareVersion;

/// Where ArduPy publishes board metadata, firmware and libraries.
pub const DEFAULT_REMOTE_BASE: &str = "https://seeed-studio.github.io/ArduPy/";

/// Firmware description for one board.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FirmwareMetadata {
    /// Release date of the firmware.
    pub version: FirmwareVersion,
    /// File name of the firmware image.
    pub firmware_name: String,
    /// URL of the firmware image.
    pub firmware_remote_path: String,
    /// URL the metadata document was fetched from.
    pub config_remote_path: String,
}

#[derive(Debug, Serialize, Deserialize)]
struct MetadataDocument {
    firmware: FirmwareSection,
}

#[derive(Debug, Serialize, Deserialize)]
struct FirmwareSection {
    version: FirmwareVersion,
    name: String,
    path: String,
}

impl FirmwareMetadata {
    /// Parse a metadata document.
    pub fn from_json(text: &str, config_remote_path: impl Into<String>) -> Result<Self> {
        let doc: MetadataDocument =
            serde_json::from_str(text).map_err(|e| Error::Metadata(e.to_string()))?;
        if doc.firmware.name.is_empty() || doc.firmware.name.contains(['/', '\\']) {
            return Err(Error::Metadata(format!(
                "bad firmware name '{}'",
                doc.firmware.name
            )));
        }
        Ok(Self {
            version: doc.firmware.version,
            firmware_name: doc.firmware.name,
            firmware_remote_path: doc.firmware.path,
            config_remote_path: config_remote_path.into(),
        })
    }
}

/// Join a base URL and a file name.
pub fn remote_url(base: &str, file_name: &str) -> String {
    format!("{}/{}", base.trim_end_matches('/'), file_name)
}

/// Loads and caches firmware metadata for catalog boards.
pub struct VersionStore {
    cache_dir: PathBuf,
    remote_base: String,
    downloader: Downloader,
    current: Option<FirmwareMetadata>,
    previous: FirmwareVersion,
}

impl VersionStore {
    /// Create a store caching into `cache_dir`.
    pub fn new(
        cache_dir: impl Into<PathBuf>,
        remote_base: impl Into<String>,
        downloader: Downloader,
    ) -> Self {
        Self {
            cache_dir: cache_dir.into(),
            remote_base: remote_base.into(),
            downloader,
            current: None,
            previous: FirmwareVersion::BASELINE,
        }
    }

    /// Cache directory.
    pub fn cache_dir(&self) -> &Path {
        &self.cache_dir
    }

    /// Local path of a board's metadata document.
    pub fn metadata_path(&self, entry: &BoardCatalogEntry) -> PathBuf {
        self.cache_dir.join(&entry.metadata_file_name)
    }

    /// Remote URL of a board's metadata document.
    pub fn metadata_url(&self, entry: &BoardCatalogEntry) -> String {
        remote_url(&self.remote_base, &entry.metadata_file_name)
    }

    /// Local path of a firmware image.
    pub fn local_firmware(&self, metadata: &FirmwareMetadata) -> PathBuf {
        self.cache_dir.join(&metadata.firmware_name)
    }

    /// Whether the firmware image is already cached.
    pub fn is_image_cached(&self, metadata: &FirmwareMetadata) -> bool {
        self.local_firmware(metadata).is_file()
    }

    /// Last successfully loaded metadata.
    pub fn current(&self) -> Option<&FirmwareMetadata> {
        self.current.as_ref()
    }

    /// Version cached before the last refresh, or the baseline.
    pub fn previous_version(&self) -> FirmwareVersion {
        self.previous
    }

    /// Read the cached metadata document, if present and valid.
    pub fn load_cached(&self, entry: &BoardCatalogEntry) -> Option<FirmwareMetadata> {
        let path = self.metadata_path(entry);
        let text = fs::read_to_string(&path).ok()?;
        match FirmwareMetadata::from_json(&text, self.metadata_url(entry)) {
            Ok(metadata) => Some(metadata),
            Err(e) => {
                warn!("Ignoring cached {}: {e}", path.display());
                None
            },
        }
    }

    /// Refresh a board's metadata from the remote source.
    ///
    /// When the download fails the cached copy is returned instead; the
    /// error surfaces only if nothing is cached. A newer firmware image is
    /// downloaded as a side effect unless it is already cached.
    pub fn refresh(
        &mut self,
        entry: &BoardCatalogEntry,
    ) -> std::result::Result<FirmwareMetadata, DownloadError> {
        let cached = self.load_cached(entry);
        self.previous = cached
            .as_ref()
            .map_or(FirmwareVersion::BASELINE, |m| m.version);
        debug!(
            "Cached {} version: {}",
            entry.metadata_file_name, self.previous
        );

        let fetched = self.fetch_metadata(entry);

        let metadata = match (fetched, cached) {
            (Ok(metadata), _) => metadata,
            (Err(e), Some(cached)) => {
                warn!("{e}; using cached metadata ({})", cached.version);
                self.current = Some(cached.clone());
                return Ok(cached);
            },
            (Err(e), None) => return Err(e),
        };

        info!(
            "Latest {} firmware: {}",
            entry.name, metadata.version
        );
        if metadata.version.is_newer_than(&self.previous) && !self.is_image_cached(&metadata) {
            self.fetch_image(&metadata);
        }

        self.current = Some(metadata.clone());
        Ok(metadata)
    }

    /// Download a board's metadata into a staging file and move it over the
    /// cached copy only once it parses.
    fn fetch_metadata(
        &self,
        entry: &BoardCatalogEntry,
    ) -> std::result::Result<FirmwareMetadata, DownloadError> {
        let url = self.metadata_url(entry);
        let path = self.metadata_path(entry);
        let staging = staging_path(&path);

        self.downloader
            .fetch_url(&url, &staging, DEFAULT_TIMEOUT, DEFAULT_MAX_ATTEMPTS)?;

        let invalid = |cause: String| DownloadError {
            url: url.clone(),
            attempts: 1,
            last_cause: cause,
        };
        let parsed = fs::read_to_string(&staging)
            .map_err(|e| invalid(e.to_string()))
            .and_then(|text| {
                FirmwareMetadata::from_json(&text, url.clone())
                    .map_err(|e| invalid(format!("invalid metadata document: {e}")))
            });

        match parsed {
            Ok(metadata) => {
                fs::rename(&staging, &path).map_err(|e| invalid(e.to_string()))?;
                Ok(metadata)
            },
            Err(e) => {
                let _ = fs::remove_file(&staging);
                Err(e)
            },
        }
    }

    /// Download the firmware image unless it is cached.
    pub fn ensure_image(&self, metadata: &FirmwareMetadata) -> std::result::Result<PathBuf, DownloadError> {
        let local = self.local_firmware(metadata);
        if !local.is_file() {
            self.downloader.fetch_url(
                &metadata.firmware_remote_path,
                &local,
                LARGE_FILE_TIMEOUT,
                DEFAULT_MAX_ATTEMPTS,
            )?;
        }
        Ok(local)
    }

    fn fetch_image(&self, metadata: &FirmwareMetadata) {
        info!("Downloading firmware {}", metadata.firmware_name);
        if let Err(e) = self.ensure_image(metadata) {
            warn!("Firmware download failed: {e}");
        }
    }
}

fn staging_path(path: &Path) -> PathBuf {
    let mut name = OsString::from(path.as_os_str());
    name.push(".download");
    PathBuf::from(name)
}
