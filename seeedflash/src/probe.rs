//! Firmware version probe.
//!
//! ArduPy prints a banner such as
//! `ArduPy 2021-06-01; Ardupy with seeed` when its REPL is interrupted and
//! switched to raw mode. The probe sends Ctrl-C, Ctrl-C, Ctrl-B at 115200
//! baud, collects a bounded amount of output and reads the date in front of
//! the banner marker.
//!
//! Anything unexpected (silence, a different banner, garbage) means the board
//! carries no usable ArduPy firmware and yields [`ProbeError::NoFirmware`].

use std::io::{ErrorKind, Read};
use std::thread;
use std::time::{Duration, Instant};

use log::{debug, trace, warn};

use crate::error::ProbeError;
use crate::port::{Port, PortOpener, REPL_BAUD, SerialConfig};
use crate::version::{FirmwareVersion, VERSION_LEN};

/// Interrupt twice, then enter the raw REPL.
pub const PROBE_SEQUENCE: [u8; 3] = [0x03, 0x03, 0x02];

/// Banner text following the version date.
pub const BANNER_MARKER: &str = "; Ardupy with seeed";

/// Maximum number of bytes collected from the board.
pub const READ_BUDGET: usize = 200;

/// Default time to wait for each chunk of output.
pub const DEFAULT_PROBE_TIMEOUT: Duration = Duration::from_millis(400);

/// Upper bound of a whole probe, in multiples of the read timeout.
const DEADLINE_FACTOR: u32 = 5;

/// Default number of attempts to open the port.
pub const DEFAULT_OPEN_ATTEMPTS: u32 = 3;

/// Default delay between open attempts.
pub const DEFAULT_OPEN_RETRY_DELAY: Duration = Duration::from_secs(5);

/// Probe an open port for the ArduPy firmware version.
///
/// The port is closed before returning, whatever the outcome.
pub fn probe(port: &mut dyn Port, timeout: Duration) -> Result<FirmwareVersion, ProbeError> {
    let result = read_banner(port, timeout).and_then(|output| parse_banner(&output));
    if let Err(e) = port.close() {
        debug!("Closing {} failed: {e}", port.name());
    }
    result
}

fn read_banner(port: &mut dyn Port, timeout: Duration) -> Result<Vec<u8>, ProbeError> {
    port.set_timeout(timeout)
        .map_err(|_| ProbeError::NoFirmware)?;
    let _ = port.clear_buffers();

    trace!("Probe -> {:02X?}", PROBE_SEQUENCE);
    if let Err(e) = port.write_all_bytes(&PROBE_SEQUENCE) {
        debug!("Probe write to {} failed: {e}", port.name());
        return Err(ProbeError::NoFirmware);
    }

    let deadline = Instant::now() + timeout * DEADLINE_FACTOR;
    let mut output = Vec::with_capacity(READ_BUDGET);
    let mut chunk = [0u8; 64];

    while output.len() < READ_BUDGET && Instant::now() < deadline {
        let want = chunk.len().min(READ_BUDGET - output.len());
        match port.read(&mut chunk[..want]) {
            Ok(0) => break,
            Ok(n) => {
                trace!("Probe <- {n} bytes");
                output.extend_from_slice(&chunk[..n]);
                if contains_marker(&output) {
                    break;
                }
            },
            Err(e) if e.kind() == ErrorKind::TimedOut => break,
            Err(e) => {
                debug!("Probe read from {} failed: {e}", port.name());
                break;
            },
        }
    }

    Ok(output)
}

fn contains_marker(output: &[u8]) -> bool {
    output
        .windows(BANNER_MARKER.len())
        .any(|w| w == BANNER_MARKER.as_bytes())
}

/// Extract the firmware version from probe output.
pub fn parse_banner(output: &[u8]) -> Result<FirmwareVersion, ProbeError> {
    let text = String::from_utf8_lossy(output);
    let marker = text.find(BANNER_MARKER).ok_or(ProbeError::NoFirmware)?;
    let start = marker
        .checked_sub(VERSION_LEN)
        .ok_or(ProbeError::NoFirmware)?;
    let date = text
        .get(start..marker)
        .ok_or(ProbeError::NoFirmware)?;

    FirmwareVersion::parse(date).map_err(|e| {
        debug!("Unparseable firmware version '{date}': {e}");
        ProbeError::NoFirmware
    })
}

/// Opens a board's port and probes it.
#[derive(Debug, Clone)]
pub struct SerialProbe {
    timeout: Duration,
    open_attempts: u32,
    open_retry_delay: Duration,
}

impl Default for SerialProbe {
    fn default() -> Self {
        Self {
            timeout: DEFAULT_PROBE_TIMEOUT,
            open_attempts: DEFAULT_OPEN_ATTEMPTS,
            open_retry_delay: DEFAULT_OPEN_RETRY_DELAY,
        }
    }
}

impl SerialProbe {
    /// Probe with default timing.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the per-read timeout.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Set how often and how patiently the port is re-opened.
    #[must_use]
    pub fn with_open_retry(mut self, attempts: u32, delay: Duration) -> Self {
        self.open_attempts = attempts.max(1);
        self.open_retry_delay = delay;
        self
    }

    /// Per-read timeout.
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Probe an already open port.
    pub fn probe(&self, port: &mut dyn Port) -> Result<FirmwareVersion, ProbeError> {
        probe(port, self.timeout)
    }

    /// Open `port_name` at 115200 baud and probe it.
    ///
    /// A freshly enumerated port may not be ready yet, so opening is retried.
    pub fn probe_named(
        &self,
        opener: &dyn PortOpener,
        port_name: &str,
    ) -> Result<FirmwareVersion, ProbeError> {
        let config = SerialConfig::new(port_name, REPL_BAUD).with_timeout(self.timeout);
        let mut last_cause = String::new();

        for attempt in 1..=self.open_attempts {
            match opener.open(&config) {
                Ok(mut port) => return self.probe(port.as_mut()),
                Err(e) => {
                    warn!(
                        "Cannot open {port_name} (attempt {attempt}/{}): {e}",
                        self.open_attempts
                    );
                    last_cause = e.to_string();
                    if attempt < self.open_attempts && !crate::is_interrupted_requested() {
                        thread::sleep(self.open_retry_delay);
                    }
                },
            }
        }

        Err(ProbeError::Port {
            port: port_name.to_string(),
            cause: last_cause,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::port::mock::{MockLog, MockOpener, MockPort};
    use std::sync::{Arc, Mutex};

    fn port(response: &[u8]) -> (MockPort, Arc<Mutex<MockLog>>) {
        let log = Arc::new(Mutex::new(MockLog::default()));
        (MockPort::new("/dev/ttyACM0", response, Arc::clone(&log)), log)
    }

    #[test]
    fn test_probe_reads_version() {
        let (mut port, log) = port(b"\r\nraw REPL; CTRL-B to exit\r\nArduPy 2021-06-01; Ardupy with seeed\r\n>");

        let version = probe(&mut port, Duration::from_millis(50)).unwrap();

        assert_eq!(version, FirmwareVersion::from_ymd(2021, 6, 1).unwrap());
        let log = log.lock().unwrap();
        assert_eq!(log.written, PROBE_SEQUENCE);
        assert!(log.closed);
    }

    #[test]
    fn test_probe_silent_board_is_no_firmware() {
        let (mut port, log) = port(b"");
        let timeout = Duration::from_millis(100);

        let start = Instant::now();
        let err = probe(&mut port, timeout).unwrap_err();

        assert!(err.is_no_firmware());
        assert!(start.elapsed() < timeout * DEADLINE_FACTOR);
        assert!(log.lock().unwrap().closed);
    }

    #[test]
    fn test_probe_other_firmware_is_no_firmware() {
        let (mut port, log) = port(b"MicroPython v1.12 on 2020-01-01; Adafruit board\r\n>>> ");
        assert!(probe(&mut port, Duration::from_millis(20)).unwrap_err().is_no_firmware());
        assert!(log.lock().unwrap().closed);
    }

    #[test]
    fn test_probe_respects_read_budget() {
        let mut noise = vec![b'x'; 400];
        noise.extend_from_slice(b"2021-06-01; Ardupy with seeed");
        let (mut port, _) = port(&noise);

        assert!(probe(&mut port, Duration::from_millis(20)).unwrap_err().is_no_firmware());
    }

    #[test]
    fn test_parse_banner_edge_cases() {
        assert!(parse_banner(b"; Ardupy with seeed").is_err());
        assert!(parse_banner(b"2021-13-01; Ardupy with seeed").is_err());
        assert!(parse_banner(b"garbage").is_err());
        assert_eq!(
            parse_banner(b"xx2020-02-29; Ardupy with seeed").unwrap(),
            FirmwareVersion::from_ymd(2020, 2, 29).unwrap()
        );
    }

    #[test]
    fn test_probe_named_opens_at_repl_baud() {
        let opener = MockOpener::replying(b"2021-06-01; Ardupy with seeed");
        let probe = SerialProbe::new().with_timeout(Duration::from_millis(20));

        let version = probe.probe_named(&opener, "/dev/ttyACM0").unwrap();

        assert_eq!(version.to_string(), "2021-06-01");
        let log = opener.log.lock().unwrap();
        assert_eq!(log.opened.len(), 1);
        assert_eq!(log.opened[0].baud_rate, REPL_BAUD);
        assert!(log.closed);
    }

    #[test]
    fn test_probe_named_retries_open() {
        let opener = MockOpener::failing();
        let probe = SerialProbe::new().with_open_retry(3, Duration::ZERO);

        match probe.probe_named(&opener, "/dev/ttyACM9") {
            Err(ProbeError::Port { port, .. }) => assert_eq!(port, "/dev/ttyACM9"),
            other => panic!("expected port error, got {other:?}"),
        }
        assert_eq!(opener.log.lock().unwrap().opened.len(), 3);
    }
}
