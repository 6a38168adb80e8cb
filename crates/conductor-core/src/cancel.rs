//! Persistent stop flag for long-running background loops.
//!
//! The health monitor checks the token between probe cycles and on every
//! slice of its inter-cycle sleep, so shutdown latency is bounded by one
//! slice rather than one full interval.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// A cancellation token for cooperative shutdown.
///
/// Clones share state: calling `cancel()` on any clone is observed by all.
///
/// # Example
///
/// ```
/// use conductor_core::cancel::CancellationToken;
///
/// let token = CancellationToken::new();
/// let monitor_token = token.clone();
///
/// token.cancel();
/// assert!(monitor_token.is_cancelled());
/// ```
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    cancelled: Arc<AtomicBool>,
}

impl CancellationToken {
    /// Create a new cancellation token.
    pub fn new() -> Self {
        Self {
            cancelled: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Request cancellation.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    /// Check if cancellation has been requested.
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// Sleep for `total`, waking every `slice` to check for cancellation.
    ///
    /// Returns `true` if the sleep was cut short by cancellation.
    pub async fn sleep_sliced(&self, total: Duration, slice: Duration) -> bool {
        let slice = slice.max(Duration::from_millis(1));
        let mut remaining = total;

        while !remaining.is_zero() {
            if self.is_cancelled() {
                return true;
            }
            let step = remaining.min(slice);
            tokio::time::sleep(step).await;
            remaining = remaining.saturating_sub(step);
        }

        self.is_cancelled()
    }
}
