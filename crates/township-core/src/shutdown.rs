//! Cooperative stop signal shared by the tick loop and whoever wants it to
//! end (the Ctrl-C handler, tests).
//!
//! Requesting a stop never interrupts a tick that is already running: the
//! loop checks the flag before each tick and races it against the pacing
//! sleep, so the in-flight barrier always completes.

use std::pin::pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tokio::sync::Notify;

#[derive(Debug, Default)]
struct Signal {
    /// Whether a stop has been requested.
    requested: AtomicBool,
    /// Wakes tasks waiting in [`Shutdown::wait`].
    notify: Notify,
}

/// Cloneable handle to one stop signal.
#[derive(Debug, Clone, Default)]
pub struct Shutdown {
    signal: Arc<Signal>,
}

impl Shutdown {
    /// Create a signal that has not been triggered.
    pub fn new() -> Self {
        Self::default()
    }

    /// Request a stop and wake everyone waiting.
    pub fn request(&self) {
        self.signal.requested.store(true, Ordering::Release);
        self.signal.notify.notify_waiters();
    }

    /// Whether a stop has been requested.
    pub fn is_requested(&self) -> bool {
        self.signal.requested.load(Ordering::Acquire)
    }

    /// Wait until a stop is requested. Returns immediately if it already
    /// was.
    pub async fn wait(&self) {
        loop {
            let mut notified = pin!(self.signal.notify.notified());
            notified.as_mut().enable();
            if self.is_requested() {
                return;
            }
            notified.await;
        }
    }

    /// Sleep for `duration` unless a stop is requested first. Returns
    /// `true` if the sleep was cut short.
    pub async fn sleep(&self, duration: Duration) -> bool {
        tokio::select! {
            () = tokio::time::sleep(duration) => false,
            () = self.wait() => true,
        }
    }
}
