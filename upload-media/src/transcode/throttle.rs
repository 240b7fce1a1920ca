//! Global slot for heavyweight transcode steps.
//!
//! Video, audio, GIF conversion, muting and image optimization share one
//! slot. Waiters are served strictly in arrival order (tokio's semaphore is
//! fair), so a deferred item always makes progress once the slot frees up.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::{debug, info};

use crate::{Error, Result};

struct Shared {
    waiting: AtomicUsize,
}

/// The transcode throttle.
#[derive(Clone)]
pub struct TranscodeThrottle {
    semaphore: Arc<Semaphore>,
    shared: Arc<Shared>,
}

impl TranscodeThrottle {
    pub fn new() -> Self {
        Self {
            semaphore: Arc::new(Semaphore::new(1)),
            shared: Arc::new(Shared {
                waiting: AtomicUsize::new(0),
            }),
        }
    }

    /// Whether the slot is taken.
    pub fn is_busy(&self) -> bool {
        self.semaphore.available_permits() == 0
    }

    /// Number of holders queued for the slot.
    pub fn waiting(&self) -> usize {
        self.shared.waiting.load(Ordering::SeqCst)
    }

    /// Wait for the slot. Dropping the future leaves the wait-list.
    pub async fn acquire(&self, holder: impl Into<String>) -> Result<ThrottlePermit> {
        let holder = holder.into();
        let waiting = WaitGuard::enter(&self.shared);
        if self.is_busy() {
            debug!(holder = %holder, waiting = self.waiting(), "Waiting for transcode slot");
        }

        let permit = self
            .semaphore
            .clone()
            .acquire_owned()
            .await
            .map_err(|e| Error::Other(format!("Transcode slot unavailable: {e}")))?;
        drop(waiting);

        Ok(self.granted(holder, permit))
    }

    /// Take the slot only if it is free right now.
    ///
    /// Lets the host reserve the slot for heavy work of its own; queued
    /// items wait in `PendingTranscoding` until the permit is dropped.
    pub fn try_acquire(&self, holder: impl Into<String>) -> Option<ThrottlePermit> {
        let permit = self.semaphore.clone().try_acquire_owned().ok()?;
        Some(self.granted(holder.into(), permit))
    }

    fn granted(&self, holder: String, permit: OwnedSemaphorePermit) -> ThrottlePermit {
        info!(holder = %holder, waiting = self.waiting(), "Transcode slot acquired");
        ThrottlePermit {
            holder,
            _permit: permit,
        }
    }
}

impl Default for TranscodeThrottle {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for TranscodeThrottle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TranscodeThrottle")
            .field("busy", &self.is_busy())
            .field("waiting", &self.waiting())
            .finish()
    }
}

/// Holds the slot until dropped.
pub struct ThrottlePermit {
    holder: String,
    _permit: OwnedSemaphorePermit,
}

impl ThrottlePermit {
    pub fn holder(&self) -> &str {
        &self.holder
    }
}

impl Drop for ThrottlePermit {
    fn drop(&mut self) {
        debug!(holder = %self.holder, "Transcode slot released");
    }
}

struct WaitGuard<'a>(&'a Shared);

impl<'a> WaitGuard<'a> {
    fn enter(shared: &'a Shared) -> Self {
        shared.waiting.fetch_add(1, Ordering::SeqCst);
        Self(shared)
    }
}

impl Drop for WaitGuard<'_> {
    fn drop(&mut self) {
        self.0.waiting.fetch_sub(1, Ordering::SeqCst);
    }
}
