//! Port arrival watcher.
//!
//! `serialport` has no hot-plug notifications, so the watcher enumerates
//! ports on an interval and reports every known board that was not present in
//! the previous scan. Between scans it blocks on its stop channel, so
//! shutting it down takes effect immediately.

use std::collections::HashSet;
use std::sync::Arc;
use std::sync::mpsc::{self, RecvTimeoutError, Sender};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use log::{debug, info};

use crate::catalog::BoardCatalog;
use crate::device::{DetectionEvent, classify_ports};
use crate::port::PortInfo;

/// Default interval between port scans.
pub const DEFAULT_SCAN_INTERVAL: Duration = Duration::from_secs(1);

type PortLister = Box<dyn Fn() -> Vec<PortInfo> + Send>;

/// Turns port arrivals into [`DetectionEvent`]s on a background thread.
pub struct DeviceWatcher {
    catalog: Arc<BoardCatalog>,
    lister: PortLister,
    interval: Duration,
}

/// Handle to a running watcher.
pub struct WatcherHandle {
    stop_tx: Sender<()>,
    thread: Option<JoinHandle<()>>,
}

impl DeviceWatcher {
    /// Watch the host's serial ports.
    #[cfg(feature = "native")]
    pub fn native(catalog: Arc<BoardCatalog>) -> Self {
        Self::with_lister(catalog, crate::device::list_port_infos)
    }

    /// Watch ports reported by a custom lister.
    pub fn with_lister<F>(catalog: Arc<BoardCatalog>, lister: F) -> Self
    where
        F: Fn() -> Vec<PortInfo> + Send + 'static,
    {
        Self {
            catalog,
            lister: Box::new(lister),
            interval: DEFAULT_SCAN_INTERVAL,
        }
    }

    /// Set the scan interval.
    #[must_use]
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// Start watching. `on_arrival` runs on the watcher thread.
    pub fn spawn<F>(self, mut on_arrival: F) -> std::io::Result<WatcherHandle>
    where
        F: FnMut(DetectionEvent) + Send + 'static,
    {
        let (stop_tx, stop_rx) = mpsc::channel::<()>();

        let thread = thread::Builder::new()
            .name("seeedflash-watcher".into())
            .spawn(move || {
                let mut present: HashSet<(String, u16, u16)> = HashSet::new();
                info!("Watching for boards every {:?}", self.interval);

                loop {
                    let ports = classify_ports((self.lister)(), &self.catalog);
                    let mut seen = HashSet::new();

                    for port in &ports {
                        let Some(event) = port.detection_event() else {
                            continue;
                        };
                        let key = (
                            event.port_name.clone(),
                            event.identity.vendor_id,
                            event.identity.product_id,
                        );
                        if !present.contains(&key) {
                            debug!(
                                "Board {} arrived on {} ({:?})",
                                event.identity.name, event.port_name, event.identity.mode
                            );
                            on_arrival(event);
                        }
                        seen.insert(key);
                    }
                    present = seen;

                    if crate::is_interrupted_requested() {
                        break;
                    }
                    match stop_rx.recv_timeout(self.interval) {
                        Err(RecvTimeoutError::Timeout) => {},
                        Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                    }
                }
                debug!("Device watcher stopped");
            })?;

        Ok(WatcherHandle {
            stop_tx,
            thread: Some(thread),
        })
    }
}

impl WatcherHandle {
    /// Stop the watcher and wait for its thread to exit.
    pub fn stop(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        let _ = self.stop_tx.send(());
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

impl Drop for WatcherHandle {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    fn wio(pid: u16) -> PortInfo {
        PortInfo {
            name: "/dev/ttyACM0".to_string(),
            vid: Some(0x2886),
            pid: Some(pid),
            manufacturer: None,
            product: None,
            serial_number: None,
        }
    }

    #[test]
    fn test_reports_each_arrival_once() {
        let catalog = Arc::new(BoardCatalog::bundled().unwrap());
        let scans = Arc::new(Mutex::new(vec![
            vec![],
            vec![wio(0x802D)],
            vec![wio(0x802D)],
            vec![],
            vec![wio(0x002D)],
        ]));
        let feed = Arc::clone(&scans);
        let lister = move || {
            let mut scans = feed.lock().unwrap();
            if scans.is_empty() { Vec::new() } else { scans.remove(0) }
        };

        let (tx, rx) = mpsc::channel();
        let handle = DeviceWatcher::with_lister(catalog, lister)
            .with_interval(Duration::from_millis(5))
            .spawn(move |event| {
                let _ = tx.send(event);
            })
            .unwrap();

        let first = rx.recv_timeout(Duration::from_secs(2)).unwrap();
        assert_eq!(first.identity.product_id, 0x802D);
        let second = rx.recv_timeout(Duration::from_secs(2)).unwrap();
        assert_eq!(second.identity.product_id, 0x002D);
        assert!(second.identity.in_bootloader());

        handle.stop();
        assert!(rx.try_recv().is_err());
    }
}
