//! Session cancellation
//!
//! One signal stops a session: an atomic flag for cheap polling plus a
//! channel that is disconnected on cancel, so workers blocked in
//! `select!` wake immediately.

use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Owner side of the cancellation signal
#[derive(Debug)]
pub struct CancelSource {
    flag: Arc<AtomicBool>,
    trigger: Mutex<Option<Sender<()>>>,
    wake: Receiver<()>,
}

/// Worker side of the cancellation signal
#[derive(Debug, Clone)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
    wake: Receiver<()>,
}

impl CancelSource {
    /// Create an untriggered signal
    pub fn new() -> Self {
        let (trigger, wake) = bounded(0);
        Self {
            flag: Arc::new(AtomicBool::new(false)),
            trigger: Mutex::new(Some(trigger)),
            wake,
        }
    }

    /// Token for a worker
    pub fn token(&self) -> CancelToken {
        CancelToken {
            flag: Arc::clone(&self.flag),
            wake: self.wake.clone(),
        }
    }

    /// Fire the signal. Idempotent.
    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
        self.trigger.lock().take();
    }

    /// Whether the signal fired
    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }
}

impl Default for CancelSource {
    fn default() -> Self {
        Self::new()
    }
}

impl CancelToken {
    /// Whether the signal fired
    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }

    /// Channel that disconnects on cancel, for use in `select!`
    pub fn wake(&self) -> &Receiver<()> {
        &self.wake
    }

    /// Sleep for `timeout` unless cancelled first. Returns `true` if cancelled.
    pub fn sleep(&self, timeout: Duration) -> bool {
        match self.wake.recv_timeout(timeout) {
            Err(RecvTimeoutError::Timeout) => self.is_cancelled(),
            _ => true,
        }
    }
}
