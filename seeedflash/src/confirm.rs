//! Yes/no rendezvous between the update worker and the host's UI thread.
//!
//! The worker calls [`ConfirmationGate::ask`], which hands a
//! [`ConfirmationRequest`] to the host through a single-slot channel and
//! blocks until the host answers it. The UI thread never blocks: it picks up
//! requests from its [`ConfirmationInbox`] whenever convenient. A request the
//! worker stopped waiting for is cancelled and never handed out again.
//!
//! ```rust
//! use seeedflash::confirm::ConfirmationGate;
//! use std::thread;
//!
//! let (gate, inbox) = ConfirmationGate::channel();
//! let worker = thread::spawn(move || gate.ask("Flash new firmware?"));
//!
//! let request = inbox.recv().expect("worker asked");
//! assert_eq!(request.prompt(), "Flash new firmware?");
//! request.answer(true);
//!
//! assert!(worker.join().unwrap());
//! ```

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, SyncSender, TryRecvError, TrySendError};
use std::thread;
use std::time::{Duration, Instant};

use log::{debug, warn};

/// How often a timed `ask` retries handing its request over while the slot
/// is still occupied.
const SEND_RETRY: Duration = Duration::from_millis(10);

/// A pending yes/no question. Answering consumes it.
#[derive(Debug)]
pub struct ConfirmationRequest {
    prompt: String,
    reply: SyncSender<bool>,
    cancelled: Arc<AtomicBool>,
}

impl ConfirmationRequest {
    /// Question to show to the user.
    pub fn prompt(&self) -> &str {
        &self.prompt
    }

    /// Whether the worker gave up waiting for this answer.
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }

    /// Answer the question, waking the worker.
    pub fn answer(self, accepted: bool) {
        if self.is_cancelled() {
            warn!("Ignoring answer to expired prompt: {}", self.prompt);
            return;
        }
        debug!("Confirmation answered: {accepted}");
        let _ = self.reply.send(accepted);
    }
}

/// Worker side of the rendezvous.
#[derive(Debug, Clone)]
pub struct ConfirmationGate {
    requests: SyncSender<ConfirmationRequest>,
    timeout: Option<Duration>,
}

/// UI side of the rendezvous.
#[derive(Debug)]
pub struct ConfirmationInbox {
    requests: Receiver<ConfirmationRequest>,
}

impl ConfirmationGate {
    /// Create a connected gate and inbox.
    pub fn channel() -> (Self, ConfirmationInbox) {
        let (tx, rx) = mpsc::sync_channel(1);
        (
            Self {
                requests: tx,
                timeout: None,
            },
            ConfirmationInbox { requests: rx },
        )
    }

    /// Give up waiting after `timeout`, treating silence as "no".
    #[must_use]
    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    /// Ask the host and block until it answers.
    ///
    /// Returns `false` when the host drops the request or its inbox, or when
    /// the optional timeout expires.
    pub fn ask(&self, prompt: &str) -> bool {
        let (reply_tx, reply_rx) = mpsc::sync_channel(1);
        let cancelled = Arc::new(AtomicBool::new(false));
        let request = ConfirmationRequest {
            prompt: prompt.to_string(),
            reply: reply_tx,
            cancelled: Arc::clone(&cancelled),
        };

        debug!("Asking: {prompt}");
        let Some(timeout) = self.timeout else {
            if self.requests.send(request).is_err() {
                warn!("No one is listening for confirmations");
                return false;
            }
            return reply_rx.recv().unwrap_or(false);
        };

        let deadline = Instant::now() + timeout;
        if !self.send_before(request, deadline) {
            return false;
        }

        let remaining = deadline.saturating_duration_since(Instant::now());
        match reply_rx.recv_timeout(remaining) {
            Ok(accepted) => accepted,
            Err(RecvTimeoutError::Timeout) => {
                cancelled.store(true, Ordering::Release);
                // The answer may have raced the cancellation.
                if let Ok(accepted) = reply_rx.try_recv() {
                    return accepted;
                }
                warn!("Confirmation timed out after {timeout:?}");
                false
            },
            Err(RecvTimeoutError::Disconnected) => false,
        }
    }

    /// Hand `request` to the inbox, giving up at `deadline`.
    ///
    /// The slot can still hold an expired request the UI has not drained yet.
    fn send_before(&self, mut request: ConfirmationRequest, deadline: Instant) -> bool {
        loop {
            match self.requests.try_send(request) {
                Ok(()) => return true,
                Err(TrySendError::Disconnected(_)) => {
                    warn!("No one is listening for confirmations");
                    return false;
                },
                Err(TrySendError::Full(pending)) => {
                    if Instant::now() >= deadline {
                        warn!("Confirmation timed out waiting for the inbox");
                        return false;
                    }
                    request = pending;
                    thread::sleep(SEND_RETRY);
                },
            }
        }
    }
}

fn live(request: ConfirmationRequest) -> Option<ConfirmationRequest> {
    if request.is_cancelled() {
        debug!("Dropping expired prompt: {}", request.prompt);
        None
    } else {
        Some(request)
    }
}

impl ConfirmationInbox {
    /// Wait for the next live request. `None` once the gate is gone.
    pub fn recv(&self) -> Option<ConfirmationRequest> {
        loop {
            let request = self.requests.recv().ok()?;
            if let Some(request) = live(request) {
                return Some(request);
            }
        }
    }

    /// Wait up to `timeout` for the next live request.
    pub fn recv_timeout(&self, timeout: Duration) -> Option<ConfirmationRequest> {
        let deadline = Instant::now() + timeout;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            let request = self.requests.recv_timeout(remaining).ok()?;
            if let Some(request) = live(request) {
                return Some(request);
            }
        }
    }

    /// Take a pending live request without blocking.
    pub fn try_recv(&self) -> Option<ConfirmationRequest> {
        loop {
            match self.requests.try_recv() {
                Ok(request) => {
                    if let Some(request) = live(request) {
                        return Some(request);
                    }
                },
                Err(TryRecvError::Empty | TryRecvError::Disconnected) => return None,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn test_answer_reaches_worker() {
        let (gate, inbox) = ConfirmationGate::channel();
        let worker = thread::spawn(move || (gate.ask("first?"), gate.ask("second?")));

        let first = inbox.recv().unwrap();
        assert_eq!(first.prompt(), "first?");
        first.answer(true);

        let second = inbox.recv().unwrap();
        assert_eq!(second.prompt(), "second?");
        second.answer(false);

        assert_eq!(worker.join().unwrap(), (true, false));
    }

    #[test]
    fn test_dropped_request_declines() {
        let (gate, inbox) = ConfirmationGate::channel();
        let worker = thread::spawn(move || gate.ask("flash?"));

        drop(inbox.recv().unwrap());

        assert!(!worker.join().unwrap());
    }

    #[test]
    fn test_dropped_inbox_declines() {
        let (gate, inbox) = ConfirmationGate::channel();
        drop(inbox);
        assert!(!gate.ask("flash?"));
    }

    #[test]
    fn test_timeout_declines_and_expires_prompt() {
        let (gate, inbox) = ConfirmationGate::channel();
        let gate = gate.with_timeout(Some(Duration::from_millis(20)));

        assert!(!gate.ask("flash?"));
        assert!(inbox.try_recv().is_none());
    }

    #[test]
    fn test_late_ui_never_sees_expired_prompt() {
        let (gate, inbox) = ConfirmationGate::channel();
        let gate = gate.with_timeout(Some(Duration::from_millis(20)));
        let worker = thread::spawn(move || {
            let first = gate.ask("session 1: flash?");
            // Stays under the timeout only if the expired prompt does not
            // keep the slot busy.
            let second = gate.with_timeout(None).ask("session 2: flash?");
            (first, second)
        });

        thread::sleep(Duration::from_millis(100));
        let request = inbox.recv().unwrap();
        assert_eq!(request.prompt(), "session 2: flash?");
        request.answer(true);

        assert_eq!(worker.join().unwrap(), (false, true));
    }

    #[test]
    fn test_answer_to_cancelled_request_is_ignored() {
        let (reply, replies) = mpsc::sync_channel(1);
        let request = ConfirmationRequest {
            prompt: "flash?".into(),
            reply,
            cancelled: Arc::new(AtomicBool::new(true)),
        };

        assert!(request.is_cancelled());
        request.answer(true);
        assert!(replies.try_recv().is_err());
    }

    #[test]
    fn test_try_recv_empty() {
        let (_gate, inbox) = ConfirmationGate::channel();
        assert!(inbox.try_recv().is_none());
        assert!(inbox.recv_timeout(Duration::from_millis(5)).is_none());
    }
}
