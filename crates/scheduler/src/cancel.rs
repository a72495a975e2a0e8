//! Cancellation tokens for page rasterization
//!
//! A viewing session hands a token to the rasterizer, which checks it between
//! pages. Tearing the session down cancels the token so an abandoned load stops
//! at the next page boundary instead of running to completion.

use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

/// Returned by [`CancellationToken::check`] once the token has been cancelled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("operation cancelled")]
pub struct Cancelled;

/// Cancellation token for cooperative cancellation
///
/// Clones share the same underlying state, so cancelling any clone is
/// observed by all of them.
///
/// # Example
///
/// ```
/// use flipbook_scheduler::CancellationToken;
///
/// let token = CancellationToken::new();
/// let worker_token = token.clone();
///
/// token.cancel();
/// assert!(worker_token.is_cancelled());
/// assert!(worker_token.check().is_err());
/// ```
#[derive(Clone, Debug)]
pub struct CancellationToken {
    cancelled: Arc<AtomicBool>,
}

impl CancellationToken {
    /// Create a new token in the non-cancelled state.
    pub fn new() -> Self {
        Self { cancelled: Arc::new(AtomicBool::new(false)) }
    }

    /// Cancel this token and every clone of it. Idempotent.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }

    /// `Err(Cancelled)` once the token has been cancelled.
    pub fn check(&self) -> Result<(), Cancelled> {
        if self.is_cancelled() {
            Err(Cancelled)
        } else {
            Ok(())
        }
    }

    /// Wrap the token in a guard that cancels it when dropped.
    pub fn cancel_on_drop(self) -> CancelOnDrop {
        CancelOnDrop { token: self, armed: true }
    }
}

impl Default for CancellationToken {
    fn default() -> Self {
        Self::new()
    }
}

/// Cancels its token when dropped.
///
/// Owned by whatever holds the lifetime of a load (a viewer session), so the
/// load is cancelled deterministically when that owner goes away.
#[derive(Debug)]
pub struct CancelOnDrop {
    token: CancellationToken,
    armed: bool,
}

impl CancelOnDrop {
    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    /// Give the token back without cancelling it.
    pub fn disarm(mut self) -> CancellationToken {
        self.armed = false;
        self.token.clone()
    }
}

impl Drop for CancelOnDrop {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        if !self.token.is_cancelled() {
            log::debug!("cancelling load on drop");
        }
        self.token.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cancellation_token_basic() {
        let token = CancellationToken::new();
        assert!(!token.is_cancelled());
        assert_eq!(token.check(), Ok(()));

        token.cancel();
        assert!(token.is_cancelled());
        assert_eq!(token.check(), Err(Cancelled));
    }

    #[test]
    fn test_cancellation_token_clone() {
        let token1 = CancellationToken::new();
        let token2 = token1.clone();

        token1.cancel();
        assert!(token2.is_cancelled());
    }

    #[test]
    fn test_cancellation_token_idempotent() {
        let token = CancellationToken::default();

        token.cancel();
        token.cancel();
        assert!(token.is_cancelled());
    }

    #[test]
    fn test_guard_cancels_on_drop() {
        let token = CancellationToken::new();
        let observer = token.clone();

        let guard = token.cancel_on_drop();
        assert!(!guard.token().is_cancelled());

        drop(guard);
        assert!(observer.is_cancelled());
    }

    #[test]
    fn test_disarmed_guard_leaves_token_alone() {
        let token = CancellationToken::new();
        let observer = token.clone();

        let returned = token.cancel_on_drop().disarm();
        assert!(!observer.is_cancelled());
        assert!(!returned.is_cancelled());
    }
}
