//! Cooperative cancellation and deadlines.
//!
//! The three long-running operations named in the design — IFC extraction,
//! rule evaluation over a graph, and training — must all be cancellable and
//! bounded by an optional deadline. This module provides one shared
//! primitive for that, ported from the same cooperative-cancellation
//! pattern the teacher codebase used for query timeouts: an atomic flag
//! checked periodically by the long-running loop, plus a `CancelHandle` that
//! can be held by another thread.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::error::CoreError;

/// Cooperative cancellation + deadline controller.
///
/// Cloning is cheap (shares the underlying flag); pass a clone into each
/// worker and call `check` between units of work (between rules, between
/// mini-batches, between entities).
#[derive(Clone)]
pub struct CancellationToken {
    cancelled: Arc<AtomicBool>,
    start_time: Instant,
    deadline: Option<Duration>,
}

impl CancellationToken {
    /// A token with no deadline that can still be cancelled explicitly.
    pub fn new() -> Self {
        CancellationToken { cancelled: Arc::new(AtomicBool::new(false)), start_time: Instant::now(), deadline: None }
    }

    /// A token that self-cancels once `deadline` has elapsed.
    pub fn with_deadline(deadline: Duration) -> Self {
        CancellationToken { cancelled: Arc::new(AtomicBool::new(false)), start_time: Instant::now(), deadline: Some(deadline) }
    }

    /// Check whether the operation named `operation` should stop now.
    /// Missing deadline behaves as "no deadline"; an *expired* deadline
    /// behaves exactly like an explicit cancellation, per the design's
    /// "missing deadline -> operation aborts as if cancelled" is about a
    /// caller-required deadline being absent from the call, not this case —
    /// here the deadline is simply optional.
    pub fn check(&self, operation: &str) -> Result<(), CoreError> {
        if self.cancelled.load(Ordering::Relaxed) {
            return Err(CoreError::Cancelled { operation: operation.to_string() });
        }
        if let Some(deadline) = self.deadline {
            if self.start_time.elapsed() > deadline {
                self.cancelled.store(true, Ordering::Relaxed);
                return Err(CoreError::Cancelled { operation: operation.to_string() });
            }
        }
        Ok(())
    }

    /// Explicitly cancel. Idempotent.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Relaxed)
    }

    pub fn elapsed(&self) -> Duration {
        self.start_time.elapsed()
    }

    /// A handle that can cancel this token from another thread without
    /// needing to hold the token itself.
    pub fn handle(&self) -> CancelHandle {
        CancelHandle { cancelled: Arc::clone(&self.cancelled) }
    }
}

impl Default for CancellationToken {
    fn default() -> Self {
        Self::new()
    }
}

/// A detached handle that can cancel an in-flight operation.
#[derive(Clone)]
pub struct CancelHandle {
    cancelled: Arc<AtomicBool>,
}

impl CancelHandle {
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn uncancelled_token_checks_ok() {
        let token = CancellationToken::new();
        assert!(token.check("evaluate").is_ok());
    }

    #[test]
    fn explicit_cancel_is_observed() {
        let token = CancellationToken::new();
        token.cancel();
        assert!(token.check("train").is_err());
    }

    #[test]
    fn deadline_expiry_cancels() {
        let token = CancellationToken::with_deadline(Duration::from_millis(5));
        std::thread::sleep(Duration::from_millis(20));
        assert!(token.check("extract").is_err());
        assert!(token.is_cancelled());
    }

    #[test]
    fn handle_cancels_original_token() {
        let token = CancellationToken::new();
        let handle = token.handle();
        handle.cancel();
        assert!(token.is_cancelled());
    }
}
