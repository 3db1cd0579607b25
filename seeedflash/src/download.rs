//! Remote resource download with retries and atomic replacement.
//!
//! Every download streams into a sibling `<name>.tmp` file which is renamed
//! over the destination only after the whole body has been written and
//! synced. A failed or interrupted attempt therefore never leaves a partial
//! file at the destination; the previous content (if any) stays intact.

use std::ffi::OsString;
use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use log::{debug, info, warn};
use thiserror::Error;

use crate::error::DownloadError;

/// Default number of attempts per download.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

/// Default per-attempt timeout for small documents.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

/// Per-attempt timeout for firmware images and library archives.
pub const LARGE_FILE_TIMEOUT: Duration = Duration::from_secs(16);

/// Delay between attempts.
const RETRY_DELAY: Duration = Duration::from_millis(500);

/// Failure of a single transfer attempt.
#[derive(Debug, Error)]
pub enum TransportError {
    /// Server answered with a non-2xx status.
    #[error("HTTP status {0}")]
    Status(u16),

    /// Request could not be completed (connect, TLS, timeout, ...).
    #[error("request failed: {0}")]
    Request(String),

    /// Writing the body failed.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

/// Blocking HTTP GET.
pub trait HttpTransport: Send + Sync {
    /// Stream the body of `url` into `sink`, returning the number of bytes.
    fn get(&self, url: &str, timeout: Duration, sink: &mut dyn Write) -> Result<u64, TransportError>;
}

/// [`HttpTransport`] backed by a blocking `reqwest` client.
pub struct ReqwestTransport {
    client: reqwest::blocking::Client,
}

impl ReqwestTransport {
    /// Create a transport with a default client.
    pub fn new() -> Result<Self, TransportError> {
        let client = reqwest::blocking::Client::builder()
            .user_agent(concat!("seeedflash/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| TransportError::Request(e.to_string()))?;
        Ok(Self { client })
    }
}

impl HttpTransport for ReqwestTransport {
    fn get(&self, url: &str, timeout: Duration, sink: &mut dyn Write) -> Result<u64, TransportError> {
        let mut response = self
            .client
            .get(url)
            .timeout(timeout)
            .send()
            .map_err(|e| TransportError::Request(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(TransportError::Status(status.as_u16()));
        }

        response
            .copy_to(sink)
            .map_err(|e| TransportError::Request(e.to_string()))
    }
}

/// One download request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadJob {
    /// Remote URL.
    pub remote_url: String,
    /// Destination path.
    pub local_path: PathBuf,
    /// Per-attempt timeout.
    pub timeout: Duration,
    /// Total number of attempts.
    pub max_attempts: u32,
}

impl DownloadJob {
    /// Create a job with the default timeout and attempt count.
    pub fn new(remote_url: impl Into<String>, local_path: impl Into<PathBuf>) -> Self {
        Self {
            remote_url: remote_url.into(),
            local_path: local_path.into(),
            timeout: DEFAULT_TIMEOUT,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
        }
    }

    /// Set the per-attempt timeout.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Set the number of attempts.
    #[must_use]
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }
}

/// Temporary sibling path used while downloading to `path`.
pub fn temp_path(path: &Path) -> PathBuf {
    let mut name = OsString::from(path.as_os_str());
    name.push(".tmp");
    PathBuf::from(name)
}

/// Fetches remote resources to local files.
#[derive(Clone)]
pub struct Downloader {
    transport: Arc<dyn HttpTransport>,
    retry_delay: Duration,
}

impl Downloader {
    /// Create a downloader over the given transport.
    pub fn new(transport: Arc<dyn HttpTransport>) -> Self {
        Self {
            transport,
            retry_delay: RETRY_DELAY,
        }
    }

    /// Set the delay between attempts.
    #[must_use]
    pub fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }

    /// Download `remote_url` to `local_path`.
    pub fn fetch_url(
        &self,
        remote_url: &str,
        local_path: &Path,
        timeout: Duration,
        max_attempts: u32,
    ) -> Result<(), DownloadError> {
        self.fetch(
            &DownloadJob::new(remote_url, local_path)
                .with_timeout(timeout)
                .with_max_attempts(max_attempts),
        )
    }

    /// Run a download job.
    pub fn fetch(&self, job: &DownloadJob) -> Result<(), DownloadError> {
        let tmp = temp_path(&job.local_path);
        let max_attempts = job.max_attempts.max(1);
        let mut last_cause = String::new();
        let mut attempts = 0;

        if let Some(parent) = job.local_path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).map_err(|e| DownloadError {
                    url: job.remote_url.clone(),
                    attempts: 0,
                    last_cause: format!("cannot create {}: {e}", parent.display()),
                })?;
            }
        }

        for attempt in 1..=max_attempts {
            if crate::is_interrupted_requested() {
                last_cause = "interrupted".to_string();
                break;
            }
            attempts = attempt;
            debug!(
                "GET {} -> {} (attempt {attempt}/{max_attempts})",
                job.remote_url,
                job.local_path.display()
            );

            match self.try_fetch(job, &tmp) {
                Ok(bytes) => {
                    info!("Downloaded {} ({bytes} bytes)", job.remote_url);
                    return Ok(());
                },
                Err(e) => {
                    let _ = fs::remove_file(&tmp);
                    warn!(
                        "Download of {} failed (attempt {attempt}/{max_attempts}): {e}",
                        job.remote_url
                    );
                    last_cause = e.to_string();
                    if attempt < max_attempts && !self.retry_delay.is_zero() {
                        thread::sleep(self.retry_delay);
                    }
                },
            }
        }

        Err(DownloadError {
            url: job.remote_url.clone(),
            attempts,
            last_cause,
        })
    }

    fn try_fetch(&self, job: &DownloadJob, tmp: &Path) -> Result<u64, TransportError> {
        if tmp.exists() {
            fs::remove_file(tmp)?;
        }

        let mut file = File::create(tmp)?;
        let bytes = self
            .transport
            .get(&job.remote_url, job.timeout, &mut file)?;
        file.flush()?;
        file.sync_all()?;
        drop(file);

        fs::rename(tmp, &job.local_path)?;
        Ok(bytes)
    }
}


#[cfg(test)]
mod tests {
    use super::mock::MockTransport;
    use super::*;

    const URL: &str = "https://example.invalid/config-wio_terminal.json";

    fn downloader(transport: MockTransport) -> (Downloader, Arc<MockTransport>) {
        let transport = Arc::new(transport);
        let dl = Downloader::new(transport.clone()).with_retry_delay(Duration::ZERO);
        (dl, transport)
    }

    #[test]
    fn test_fetch_writes_destination() {
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("cache").join("config.json");
        let mock = MockTransport::default();
        mock.serve(URL, b"{\"ok\":true}");
        let (dl, transport) = downloader(mock);

        dl.fetch_url(URL, &dest, DEFAULT_TIMEOUT, 3).unwrap();

        assert_eq!(fs::read(&dest).unwrap(), b"{\"ok\":true}");
        assert!(!temp_path(&dest).exists());
        assert_eq!(transport.request_count(URL), 1);
    }

    #[test]
    fn test_failure_mid_transfer_keeps_previous_content() {
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("firmware.bin");
        fs::write(&dest, b"old firmware").unwrap();

        let mock = MockTransport {
            fail_after: Some(4),
            ..Default::default()
        };
        mock.serve(URL, b"new firmware image");
        let (dl, _) = downloader(mock);

        let err = dl.fetch_url(URL, &dest, DEFAULT_TIMEOUT, 2).unwrap_err();
        assert_eq!(err.attempts, 2);
        assert_eq!(fs::read(&dest).unwrap(), b"old firmware");
        assert!(!temp_path(&dest).exists());
    }

    #[test]
    fn test_failure_mid_transfer_leaves_no_destination() {
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("firmware.bin");

        let mock = MockTransport {
            fail_after: Some(3),
            ..Default::default()
        };
        mock.serve(URL, b"abcdefgh");
        let (dl, _) = downloader(mock);

        assert!(dl.fetch_url(URL, &dest, DEFAULT_TIMEOUT, 1).is_err());
        assert!(!dest.exists());
        assert!(!temp_path(&dest).exists());
    }

    #[test]
    fn test_retries_exactly_max_attempts() {
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("missing.json");
        let (dl, transport) = downloader(MockTransport::default());

        let err = dl
            .fetch(&DownloadJob::new(URL, &dest).with_max_attempts(3))
            .unwrap_err();

        assert_eq!(err.attempts, 3);
        assert_eq!(transport.request_count(URL), 3);
        assert!(err.last_cause.contains("404"));
        assert!(err.to_string().contains(URL));
    }

    #[test]
    fn test_stale_temp_file_is_replaced() {
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("config.json");
        fs::write(temp_path(&dest), b"leftover from a crash").unwrap();

        let mock = MockTransport::default();
        mock.serve(URL, b"fresh");
        let (dl, _) = downloader(mock);

        dl.fetch_url(URL, &dest, DEFAULT_TIMEOUT, 1).unwrap();
        assert_eq!(fs::read(&dest).unwrap(), b"fresh");
        assert!(!temp_path(&dest).exists());
    }

    #[test]
    fn test_refetch_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("config.json");
        let mock = MockTransport::default();
        mock.serve(URL, b"v1");
        let (dl, transport) = downloader(mock);

        dl.fetch_url(URL, &dest, DEFAULT_TIMEOUT, 3).unwrap();
        dl.fetch_url(URL, &dest, DEFAULT_TIMEOUT, 3).unwrap();

        assert_eq!(fs::read(&dest).unwrap(), b"v1");
        assert_eq!(transport.request_count(URL), 2);
    }

    #[test]
    fn test_temp_path_is_sibling() {
        let p = Path::new("/cache/config-xiao.json");
        assert_eq!(temp_path(p), PathBuf::from("/cache/config-xiao.json.tmp"));
    }
}
