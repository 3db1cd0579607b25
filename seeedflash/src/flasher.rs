//! External flashing tool.
//!
//! Images are written by `bossac`, the SAM-BA flashing utility shipped with
//! the Arduino SAMD cores. The tool is looked up in an explicit location,
//! then in a bundled per-platform tools directory, then on `PATH`.

use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::Command;

use log::{debug, info, warn};

use crate::error::FlashError;

/// Default number of flashing attempts.
pub const DEFAULT_FLASH_ATTEMPTS: u32 = 3;

/// Writes a firmware image to a board.
pub trait FlashTool: Send + Sync {
    /// Flash `image` to the board on `port_name`, blocking until done.
    fn flash(&self, image: &Path, port_name: &str) -> Result<(), FlashError>;
}

/// Name of the bundled tools subdirectory for this platform.
pub fn tools_subdir() -> &'static str {
    if cfg!(target_os = "macos") {
        "tools-darwin"
    } else if cfg!(windows) {
        "tools-win"
    } else {
        "tools-linux"
    }
}

/// Port name as `bossac` expects it (`ttyACM0` rather than `/dev/ttyACM0`).
pub fn short_port_name(port_name: &str) -> &str {
    if cfg!(unix) {
        port_name
            .rsplit('/')
            .next()
            .unwrap_or(port_name)
    } else {
        port_name
    }
}

/// The `bossac` command-line tool.
#[derive(Debug, Clone)]
pub struct Bossac {
    program: PathBuf,
}

impl Bossac {
    /// Executable name on this platform.
    pub const PROGRAM: &'static str = if cfg!(windows) { "bossac.exe" } else { "bossac" };

    /// Use the given executable.
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
        }
    }

    /// Locate the tool.
    ///
    /// `configured` wins when given; otherwise `<tools_dir>/<tools-os>/bossac`
    /// is tried before searching `PATH`.
    pub fn locate(configured: Option<&Path>, tools_dir: Option<&Path>) -> Result<Self, FlashError> {
        if let Some(path) = configured {
            return if path.is_file() {
                Ok(Self::new(path))
            } else {
                which::which(path)
                    .map(Self::new)
                    .map_err(|_| FlashError::ToolNotFound(path.display().to_string()))
            };
        }

        if let Some(dir) = tools_dir {
            let bundled = dir.join(tools_subdir()).join(Self::PROGRAM);
            if bundled.is_file() {
                debug!("Using bundled {}", bundled.display());
                return Ok(Self::new(bundled));
            }
        }

        which::which(Self::PROGRAM)
            .map(Self::new)
            .map_err(|_| FlashError::ToolNotFound(Self::PROGRAM.to_string()))
    }

    /// Executable path.
    pub fn program(&self) -> &Path {
        &self.program
    }

    /// Command-line arguments for flashing `image` to `port_name`.
    pub fn args(image: &Path, port_name: &str) -> Vec<OsString> {
        let mut args: Vec<OsString> = ["-i", "-d"]
            .into_iter()
            .map(OsString::from)
            .collect();
        args.push(format!("--port={}", short_port_name(port_name)).into());
        args.extend(["-U", "true", "-i", "-e", "-w", "-v"].map(OsString::from));
        args.push(image.as_os_str().to_owned());
        args.push("-R".into());
        args
    }
}

impl FlashTool for Bossac {
    fn flash(&self, image: &Path, port_name: &str) -> Result<(), FlashError> {
        if !image.is_file() {
            return Err(FlashError::MissingImage(image.display().to_string()));
        }

        let args = Self::args(image, port_name);
        info!("Running {} {:?}", self.program.display(), args);

        let status = Command::new(&self.program)
            .args(&args)
            .status()
            .map_err(|source| FlashError::Spawn {
                tool: self.program.display().to_string(),
                source,
            })?;

        if status.success() {
            Ok(())
        } else {
            Err(FlashError::ToolFailed {
                code: status.code(),
                status: status.to_string(),
            })
        }
    }
}

/// Flash with bounded retries.
///
/// Only tool failures are retried; a missing image or tool fails at once.
/// `on_attempt(attempt, attempts)` runs before every try. Returns the number
/// of attempts used.
pub fn flash_with_retries(
    tool: &dyn FlashTool,
    image: &Path,
    port_name: &str,
    attempts: u32,
    mut on_attempt: impl FnMut(u32, u32),
) -> Result<u32, FlashError> {
    let attempts = attempts.max(1);
    let mut attempt = 1;
    loop {
        on_attempt(attempt, attempts);
        match tool.flash(image, port_name) {
            Ok(()) => return Ok(attempt),
            Err(e @ FlashError::ToolFailed { .. })
                if attempt < attempts && !crate::is_interrupted_requested() =>
            {
                warn!("Flashing failed (attempt {attempt}/{attempts}): {e}");
                attempt += 1;
            },
            Err(e) => return Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::sync::Mutex;

    struct ScriptedTool {
        results: Mutex<Vec<Result<(), FlashError>>>,
        calls: Mutex<u32>,
    }

    impl ScriptedTool {
        fn new(results: Vec<Result<(), FlashError>>) -> Self {
            Self {
                results: Mutex::new(results),
                calls: Mutex::new(0),
            }
        }
    }

    impl FlashTool for ScriptedTool {
        fn flash(&self, _image: &Path, _port_name: &str) -> Result<(), FlashError> {
            *self.calls.lock().unwrap() += 1;
            self.results.lock().unwrap().remove(0)
        }
    }

    fn failed() -> Result<(), FlashError> {
        Err(FlashError::ToolFailed {
            code: Some(1),
            status: "exit status: 1".into(),
        })
    }

    #[test]
    #[cfg(unix)]
    fn test_bossac_args() {
        let args = Bossac::args(Path::new("/cache/ArduPy_wio_terminal.bin"), "/dev/ttyACM0");
        let args: Vec<_> = args.iter().map(|a| a.to_string_lossy().into_owned()).collect();
        assert_eq!(
            args,
            [
                "-i",
                "-d",
                "--port=ttyACM0",
                "-U",
                "true",
                "-i",
                "-e",
                "-w",
                "-v",
                "/cache/ArduPy_wio_terminal.bin",
                "-R"
            ]
        );
    }

    #[test]
    #[cfg(unix)]
    fn test_short_port_name() {
        assert_eq!(short_port_name("/dev/ttyACM0"), "ttyACM0");
        assert_eq!(short_port_name("/dev/cu.usbmodem14101"), "cu.usbmodem14101");
        assert_eq!(short_port_name("ttyACM1"), "ttyACM1");
    }

    #[test]
    fn test_locate_prefers_bundled_tools_dir() {
        let dir = tempfile::tempdir().unwrap();
        let bundled = dir.path().join(tools_subdir());
        fs::create_dir_all(&bundled).unwrap();
        fs::write(bundled.join(Bossac::PROGRAM), b"").unwrap();

        let tool = Bossac::locate(None, Some(dir.path())).unwrap();
        assert_eq!(tool.program(), bundled.join(Bossac::PROGRAM));
    }

    #[test]
    fn test_locate_configured_missing() {
        let err = Bossac::locate(Some(Path::new("/nonexistent/bossac-xyz")), None).unwrap_err();
        assert!(matches!(err, FlashError::ToolNotFound(_)));
    }

    #[test]
    fn test_missing_image() {
        let tool = Bossac::new("bossac");
        let err = tool
            .flash(Path::new("/nonexistent/firmware.bin"), "/dev/ttyACM0")
            .unwrap_err();
        assert!(matches!(err, FlashError::MissingImage(_)));
    }

    #[test]
    #[cfg(unix)]
    fn test_exit_status_decides_outcome() {
        let dir = tempfile::tempdir().unwrap();
        let image = dir.path().join("firmware.bin");
        fs::write(&image, b"image").unwrap();

        Bossac::new("true").flash(&image, "/dev/ttyACM0").unwrap();

        match Bossac::new("false").flash(&image, "/dev/ttyACM0") {
            Err(FlashError::ToolFailed { code, .. }) => assert_eq!(code, Some(1)),
            other => panic!("expected tool failure, got {other:?}"),
        }
    }

    #[test]
    fn test_spawn_failure() {
        let dir = tempfile::tempdir().unwrap();
        let image = dir.path().join("firmware.bin");
        fs::write(&image, b"image").unwrap();

        let err = Bossac::new(dir.path().join("no-such-tool"))
            .flash(&image, "/dev/ttyACM0")
            .unwrap_err();
        assert!(matches!(err, FlashError::Spawn { .. }));
    }

    #[test]
    fn test_retries_tool_failures() {
        let tool = ScriptedTool::new(vec![failed(), failed(), Ok(())]);
        let mut seen = Vec::new();
        let used = flash_with_retries(&tool, Path::new("fw.bin"), "/dev/ttyACM0", 3, |n, of| {
            seen.push((n, of));
        })
        .unwrap();
        assert_eq!(used, 3);
        assert_eq!(seen, [(1, 3), (2, 3), (3, 3)]);
        assert_eq!(*tool.calls.lock().unwrap(), 3);
    }

    #[test]
    fn test_retries_exhausted() {
        let tool = ScriptedTool::new(vec![failed(), failed(), failed()]);
        assert!(flash_with_retries(&tool, Path::new("fw.bin"), "/dev/ttyACM0", 3, |_, _| {}).is_err());
        assert_eq!(*tool.calls.lock().unwrap(), 3);
    }

    #[test]
    fn test_missing_image_not_retried() {
        let tool = ScriptedTool::new(vec![Err(FlashError::MissingImage("fw.bin".into()))]);
        assert!(flash_with_retries(&tool, Path::new("fw.bin"), "/dev/ttyACM0", 3, |_, _| {}).is_err());
        assert_eq!(*tool.calls.lock().unwrap(), 1);
    }
}
