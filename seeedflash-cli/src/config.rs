//! Configuration file support for seeedflash.
//!
//! Configuration is loaded from multiple sources with the following priority (highest first):
//! 1. Command-line arguments
//! 2. Environment variables (SEEEDFLASH_*)
//! 3. Local config file (./seeedflash.toml)
//! 4. Global config file (~/.config/seeedflash/config.toml)

use directories::ProjectDirs;
use log::{debug, warn};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use seeedflash::DEFAULT_REMOTE_BASE;
use seeedflash::flasher::DEFAULT_FLASH_ATTEMPTS;
use seeedflash::probe::DEFAULT_PROBE_TIMEOUT;

/// Name of the local configuration file.
pub const LOCAL_CONFIG_FILE: &str = "seeedflash.toml";

/// Default interval between port scans in `watch`.
const DEFAULT_WATCH_INTERVAL: Duration = Duration::from_secs(1);

/// Remote firmware repository.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RemoteConfig {
    /// Base URL metadata documents and images are fetched from.
    pub base_url: Option<String>,
}

/// Local directories.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PathsConfig {
    /// Metadata, image and archive cache.
    pub cache_dir: Option<PathBuf>,
    /// Where ArduPy libraries are extracted.
    pub workspace_dir: Option<PathBuf>,
    /// Directory holding `tools-<os>/bossac`.
    pub tools_dir: Option<PathBuf>,
}

/// Flashing settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FlashConfig {
    /// Explicit path to the flashing tool.
    pub tool: Option<PathBuf>,
    /// Total flashing attempts.
    pub attempts: Option<u32>,
}

/// Version probe settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProbeConfig {
    /// Read timeout per chunk, in milliseconds.
    pub timeout_ms: Option<u64>,
}

/// Confirmation prompt settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConfirmConfig {
    /// Seconds before an unanswered prompt counts as "no".
    pub timeout_secs: Option<u64>,
}

/// `watch` settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WatchConfig {
    /// Interval between port scans, in milliseconds.
    pub interval_ms: Option<u64>,
}

/// Board catalog settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CatalogConfig {
    /// Board descriptor to use instead of the bundled one.
    pub path: Option<PathBuf>,
}

/// Main configuration structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Remote repository.
    #[serde(default)]
    pub remote: RemoteConfig,
    /// Local directories.
    #[serde(default)]
    pub paths: PathsConfig,
    /// Flashing.
    #[serde(default)]
    pub flash: FlashConfig,
    /// Version probe.
    #[serde(default)]
    pub probe: ProbeConfig,
    /// Confirmation prompt.
    #[serde(default)]
    pub confirm: ConfirmConfig,
    /// Port watcher.
    #[serde(default)]
    pub watch: WatchConfig,
    /// Board catalog.
    #[serde(default)]
    pub catalog: CatalogConfig,
}

impl Config {
    /// Load configuration from all available sources.
    pub fn load() -> Self {
        let mut config = Self::default();

        if let Some(global_path) = Self::global_config_path() {
            if let Some(global_config) = Self::load_from_file(&global_path) {
                debug!("Loaded global config from {}", global_path.display());
                config.merge(global_config);
            }
        }

        // Local config overrides global
        if let Some(local_config) = Self::load_from_file(Path::new(LOCAL_CONFIG_FILE)) {
            debug!("Loaded local config from {LOCAL_CONFIG_FILE}");
            config.merge(local_config);
        }

        config
    }

    /// Load configuration from a specific file path (--config flag).
    pub fn load_from_path(path: &Path) -> Self {
        if let Some(config) = Self::load_from_file(path) {
            debug!("Loaded config from {}", path.display());
            config
        } else {
            warn!(
                "Could not load config from {}, using defaults",
                path.display()
            );
            Self::default()
        }
    }

    fn load_from_file(path: &Path) -> Option<Self> {
        if !path.exists() {
            return None;
        }

        match fs::read_to_string(path) {
            Ok(content) => match toml::from_str(&content) {
                Ok(config) => Some(config),
                Err(e) => {
                    warn!("Failed to parse config file {}: {}", path.display(), e);
                    None
                },
            },
            Err(e) => {
                warn!("Failed to read config file {}: {}", path.display(), e);
                None
            },
        }
    }

    fn project_dirs() -> Option<ProjectDirs> {
        ProjectDirs::from("", "", "seeedflash")
    }

    /// Get the global configuration directory.
    pub fn global_config_dir() -> Option<PathBuf> {
        Self::project_dirs().map(|dirs| dirs.config_dir().to_path_buf())
    }

    /// Get the global configuration file path.
    pub fn global_config_path() -> Option<PathBuf> {
        Self::global_config_dir().map(|dir| dir.join("config.toml"))
    }

    /// Merge another config into this one; set values in `other` win.
    fn merge(&mut self, other: Self) {
        fn take<T>(slot: &mut Option<T>, value: Option<T>) {
            if value.is_some() {
                *slot = value;
            }
        }

        take(&mut self.remote.base_url, other.remote.base_url);
        take(&mut self.paths.cache_dir, other.paths.cache_dir);
        take(&mut self.paths.workspace_dir, other.paths.workspace_dir);
        take(&mut self.paths.tools_dir, other.paths.tools_dir);
        take(&mut self.flash.tool, other.flash.tool);
        take(&mut self.flash.attempts, other.flash.attempts);
        take(&mut self.probe.timeout_ms, other.probe.timeout_ms);
        take(&mut self.confirm.timeout_secs, other.confirm.timeout_secs);
        take(&mut self.watch.interval_ms, other.watch.interval_ms);
        take(&mut self.catalog.path, other.catalog.path);
    }
}

/// Values given on the command line (or through their environment variables).
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub cache_dir: Option<PathBuf>,
    pub remote_base: Option<String>,
    pub catalog: Option<PathBuf>,
}

/// Effective settings after layering flags over the config files and defaults.
#[derive(Debug, Clone)]
pub struct Settings {
    pub remote_base: String,
    pub cache_dir: PathBuf,
    pub workspace_dir: PathBuf,
    pub tools_dir: Option<PathBuf>,
    pub flash_tool: Option<PathBuf>,
    pub flash_attempts: u32,
    pub probe_timeout: Duration,
    /// `None` waits for an answer indefinitely.
    pub confirm_timeout: Option<Duration>,
    pub watch_interval: Duration,
    pub catalog_path: Option<PathBuf>,
}

impl Settings {
    pub fn resolve(config: &Config, overrides: &Overrides) -> Self {
        let dirs = Config::project_dirs();
        let default_cache = dirs.as_ref().map_or_else(
            || PathBuf::from(".seeedflash").join("cache"),
            |d| d.cache_dir().to_path_buf(),
        );
        let default_workspace = dirs.as_ref().map_or_else(
            || PathBuf::from(".seeedflash").join("workspace"),
            |d| d.data_dir().join("workspace"),
        );

        Self {
            remote_base: overrides
                .remote_base
                .clone()
                .or_else(|| config.remote.base_url.clone())
                .unwrap_or_else(|| DEFAULT_REMOTE_BASE.to_string()),
            cache_dir: overrides
                .cache_dir
                .clone()
                .or_else(|| config.paths.cache_dir.clone())
                .unwrap_or(default_cache),
            workspace_dir: config
                .paths
                .workspace_dir
                .clone()
                .unwrap_or(default_workspace),
            tools_dir: config.paths.tools_dir.clone(),
            flash_tool: config.flash.tool.clone(),
            flash_attempts: config
                .flash
                .attempts
                .unwrap_or(DEFAULT_FLASH_ATTEMPTS)
                .max(1),
            probe_timeout: config
                .probe
                .timeout_ms
                .map_or(DEFAULT_PROBE_TIMEOUT, Duration::from_millis),
            confirm_timeout: config
                .confirm
                .timeout_secs
                .filter(|secs| *secs > 0)
                .map(Duration::from_secs),
            watch_interval: config
                .watch
                .interval_ms
                .map_or(DEFAULT_WATCH_INTERVAL, Duration::from_millis),
            catalog_path: overrides
                .catalog
                .clone()
                .or_else(|| config.catalog.path.clone()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert!(config.remote.base_url.is_none());
        assert!(config.paths.cache_dir.is_none());
        assert!(config.flash.attempts.is_none());
        assert!(config.catalog.path.is_none());
    }

    #[test]
    fn test_config_from_toml() {
        let toml_str = r#"
[remote]
base_url = "https://mirror.example.com/ArduPy/"

[paths]
cache_dir = "/tmp/seeed-cache"
workspace_dir = "/tmp/seeed-workspace"
tools_dir = "/opt/seeed"

[flash]
tool = "/usr/local/bin/bossac"
attempts = 5

[probe]
timeout_ms = 800

[confirm]
timeout_secs = 30

[watch]
interval_ms = 250

[catalog]
path = "boards.json"
"#;
        let config: Config = toml::from_str(toml_str).unwrap();
        assert_eq!(
            config.remote.base_url.as_deref(),
            Some("https://mirror.example.com/ArduPy/")
        );
        assert_eq!(config.paths.cache_dir, Some(PathBuf::from("/tmp/seeed-cache")));
        assert_eq!(config.flash.attempts, Some(5));
        assert_eq!(config.probe.timeout_ms, Some(800));
        assert_eq!(config.confirm.timeout_secs, Some(30));
        assert_eq!(config.watch.interval_ms, Some(250));
        assert_eq!(config.catalog.path, Some(PathBuf::from("boards.json")));
    }

    #[test]
    fn test_config_from_partial_toml() {
        let config: Config = toml::from_str("[flash]\nattempts = 1\n").unwrap();
        assert!(config.remote.base_url.is_none());
        assert_eq!(config.flash.attempts, Some(1));
    }

    #[test]
    fn test_merge_does_not_overwrite_with_none() {
        let mut base = Config::default();
        base.remote.base_url = Some("https://a.example/".into());
        base.flash.attempts = Some(2);

        let mut other = Config::default();
        other.flash.attempts = Some(4);
        base.merge(other);

        assert_eq!(base.remote.base_url.as_deref(), Some("https://a.example/"));
        assert_eq!(base.flash.attempts, Some(4));
    }

    #[test]
    fn test_settings_defaults() {
        let settings = Settings::resolve(&Config::default(), &Overrides::default());
        assert_eq!(settings.remote_base, DEFAULT_REMOTE_BASE);
        assert_eq!(settings.flash_attempts, DEFAULT_FLASH_ATTEMPTS);
        assert_eq!(settings.probe_timeout, DEFAULT_PROBE_TIMEOUT);
        assert_eq!(settings.watch_interval, DEFAULT_WATCH_INTERVAL);
        assert!(settings.confirm_timeout.is_none());
        assert!(settings.catalog_path.is_none());
    }

    #[test]
    fn test_settings_overrides_win() {
        let mut config = Config::default();
        config.remote.base_url = Some("https://file.example/".into());
        config.paths.cache_dir = Some("/from/file".into());
        config.confirm.timeout_secs = Some(0);
        config.flash.attempts = Some(0);

        let overrides = Overrides {
            cache_dir: Some("/from/flag".into()),
            remote_base: Some("https://flag.example/".into()),
            catalog: None,
        };
        let settings = Settings::resolve(&config, &overrides);
        assert_eq!(settings.remote_base, "https://flag.example/");
        assert_eq!(settings.cache_dir, PathBuf::from("/from/flag"));
        // Zero means "no timeout" and at least one attempt is always made.
        assert!(settings.confirm_timeout.is_none());
        assert_eq!(settings.flash_attempts, 1);
    }

    #[test]
    fn test_load_from_path_valid() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(&path, "[remote]\nbase_url = \"https://x.example/\"\n").unwrap();

        let config = Config::load_from_path(&path);
        assert_eq!(config.remote.base_url.as_deref(), Some("https://x.example/"));
    }

    #[test]
    fn test_load_from_path_invalid_falls_back() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(&path, "invalid toml [[[").unwrap();

        let config = Config::load_from_path(&path);
        assert!(config.remote.base_url.is_none());
    }

    #[test]
    fn test_load_from_path_nonexistent() {
        let config = Config::load_from_path(Path::new("/nonexistent/path/config.toml"));
        assert!(config.paths.cache_dir.is_none());
    }

    #[test]
    fn test_global_config_path() {
        if let Some(p) = Config::global_config_path() {
            assert!(p.to_string_lossy().contains("seeedflash"));
            assert!(p.to_string_lossy().ends_with("config.toml"));
        }
    }
}
