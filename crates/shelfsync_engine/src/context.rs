//! Per-call cancellation.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Cancellation handle and optional deadline for one sync call.
///
/// Clones share the same flag, so a clone handed to another thread can
/// cancel a running cycle. A passed deadline counts as cancellation.
#[derive(Debug, Clone, Default)]
pub struct SyncContext {
    cancelled: Arc<AtomicBool>,
    deadline: Option<Instant>,
}

impl SyncContext {
    /// Creates a context with no deadline.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets a deadline relative to now.
    pub fn with_timeout(self, timeout: Duration) -> Self {
        self.with_deadline(Instant::now() + timeout)
    }

    /// Sets an absolute deadline.
    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(deadline);
        self
    }

    /// Requests cancellation.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    /// Returns true once cancelled or past the deadline.
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
            || self.deadline.is_some_and(|d| Instant::now() >= d)
    }

    /// Returns the deadline, if any.
    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clones_share_cancellation() {
        let ctx = SyncContext::new();
        let handle = ctx.clone();
        assert!(!ctx.is_cancelled());

        handle.cancel();
        assert!(ctx.is_cancelled());
    }

    #[test]
    fn expired_deadline_cancels() {
        let ctx = SyncContext::new().with_deadline(Instant::now() - Duration::from_millis(1));
        assert!(ctx.is_cancelled());

        let ctx = SyncContext::new().with_timeout(Duration::from_secs(3600));
        assert!(!ctx.is_cancelled());
        assert!(ctx.deadline().is_some());
    }
}
