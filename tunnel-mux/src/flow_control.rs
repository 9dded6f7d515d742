//! Per-stream flow control.
//!
//! Each stream has an independent send window so a slow local service on
//! one stream cannot force unbounded buffering on the others. The window is
//! a count of bytes the sender may still emit; it is consumed by `DATA`
//! writes and replenished by `WINDOW_UPDATE` frames from the receiver.

use std::sync::Arc;

use tokio::sync::Semaphore;

/// Default per-stream window: 256 KiB.
pub const DEFAULT_WINDOW: u32 = 256 * 1024;

/// A single stream's send window, backed by a counting semaphore: each
/// permit is one byte of budget. Acquiring `n` permits before a write
/// blocks the writer exactly the way a byte-counter-plus-condvar would,
/// but gets the async wake-on-release behavior for free.
#[derive(Clone)]
pub struct Window {
    semaphore: Arc<Semaphore>,
}

impl Window {
    pub fn new(initial: u32) -> Self {
        Self {
            semaphore: Arc::new(Semaphore::new(initial as usize)),
        }
    }

    /// A clone of the underlying semaphore handle, for use with
    /// `acquire_many_owned` in a stored (poll-resumable) future.
    pub fn semaphore(&self) -> Arc<Semaphore> {
        self.semaphore.clone()
    }

    /// Replenish the window by `n` bytes (a `WINDOW_UPDATE` arrived).
    pub fn release(&self, n: u32) {
        if n > 0 {
            self.semaphore.add_permits(n as usize);
        }
    }

    pub fn available(&self) -> usize {
        self.semaphore.available_permits()
    }
}
