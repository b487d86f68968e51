//! Cancellation tokens for decode tasks
//!
//! Cancellation is cooperative. The registry flips a task's token when the
//! task is superseded or stopped, and the worker observes it at its next
//! liveness check.

use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

/// Shared cancellation flag for one decode task
///
/// Clones observe the same state.
///
/// # Example
///
/// ```
/// use docview_scheduler::CancellationToken;
///
/// let token = CancellationToken::new();
/// let worker_token = token.clone();
///
/// assert!(token.cancel());
/// assert!(worker_token.is_cancelled());
/// assert!(!token.cancel());
/// ```
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    cancelled: Arc<AtomicBool>,
}

impl CancellationToken {
    /// Create a token in the non-cancelled state
    pub fn new() -> Self {
        Self::default()
    }

    /// Cancel this token and every clone of it.
    ///
    /// Returns `true` if this call did the cancelling, `false` if the token was
    /// already cancelled.
    pub fn cancel(&self) -> bool {
        !self.cancelled.swap(true, Ordering::AcqRel)
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }
}
