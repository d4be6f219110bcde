//! Cancellation tokens
//!
//! Streams are stopped cooperatively: the caller flips a token and the stream
//! worker observes it at its next guard check.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::Notify;

/// Token for cooperative cancellation of a stream
///
/// Clones share the same flag, so the orchestrator can keep one copy in its
/// active-stream registry while the worker polls another.
#[derive(Debug, Clone)]
pub struct CancellationToken {
    inner: Arc<CancellationTokenInner>,
}

#[derive(Debug)]
struct CancellationTokenInner {
    cancelled: AtomicBool,
    notify: Notify,
}

impl CancellationToken {
    /// Create a new cancellation token
    ///
    /// # Examples
    /// ```
    /// use relay_core::CancellationToken;
    ///
    /// let token = CancellationToken::new();
    /// assert!(!token.is_cancelled());
    /// ```
    pub fn new() -> Self {
        Self {
            inner: Arc::new(CancellationTokenInner {
                cancelled: AtomicBool::new(false),
                notify: Notify::new(),
            }),
        }
    }

    /// Check if the token has been cancelled
    pub fn is_cancelled(&self) -> bool {
        self.inner.cancelled.load(Ordering::Acquire)
    }

    /// Cancel the token
    ///
    /// Returns `true` if this call flipped the flag, `false` if it was already set.
    ///
    /// # Examples
    /// ```
    /// use relay_core::CancellationToken;
    ///
    /// let token = CancellationToken::new();
    /// assert!(token.cancel());
    /// assert!(!token.cancel());
    /// assert!(token.is_cancelled());
    /// ```
    pub fn cancel(&self) -> bool {
        let flipped = !self.inner.cancelled.swap(true, Ordering::AcqRel);
        if flipped {
            self.inner.notify.notify_waiters();
        }
        flipped
    }

    /// Wait for the token to be cancelled
    ///
    /// # Examples
    /// ```
    /// use relay_core::CancellationToken;
    ///
    /// # tokio_test::block_on(async {
    /// let token = CancellationToken::new();
    /// let waiter = token.clone();
    /// token.cancel();
    /// waiter.wait_for_cancellation().await;
    /// # });
    /// ```
    pub async fn wait_for_cancellation(&self) {
        let notified = self.inner.notify.notified();
        tokio::pin!(notified);
        notified.as_mut().enable();
        if self.is_cancelled() {
            return;
        }
        notified.await;
    }
}

impl Default for CancellationToken {
    fn default() -> Self {
        Self::new()
    }
}
