//! Cancellation token for cooperative cancellation
//!
//! Jobs and futures check their token and exit gracefully; nothing is ever
//! aborted preemptively. Tokens can be linked to form parent-child
//! relationships, and clones share state.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use crate::error::{ErrorCode, ErrorInfo, TaskResult};

type Waker = Box<dyn Fn() + Send + Sync>;

/// Token for checking and triggering cancellation
///
/// A token is a shared flag plus a list of wakers. `cancel()` sets the
/// flag once and runs every registered waker so blocked consumers (for
/// example a thread parked in `JobFuture::get`) re-check promptly.
///
/// Tokens can have parents, allowing cancellation to propagate from a
/// pool-level token down to individual jobs.
#[derive(Clone)]
pub struct CancelToken {
    inner: Arc<CancelInner>,
}

struct CancelInner {
    /// Cancellation flag
    cancelled: AtomicBool,

    /// Parent token (if any)
    parent: Option<CancelToken>,

    /// Callbacks run once when cancellation fires
    wakers: Mutex<Vec<Waker>>,
}

impl CancelToken {
    /// Create a new independent cancellation token
    pub fn new() -> Self {
        Self {
            inner: Arc::new(CancelInner {
                cancelled: AtomicBool::new(false),
                parent: None,
                wakers: Mutex::new(Vec::new()),
            }),
        }
    }

    /// Create a child token linked to this one
    ///
    /// If this token is cancelled, checking the child also returns
    /// cancelled. Cancelling the child does not affect the parent.
    pub fn child(&self) -> Self {
        Self {
            inner: Arc::new(CancelInner {
                cancelled: AtomicBool::new(false),
                parent: Some(self.clone()),
                wakers: Mutex::new(Vec::new()),
            }),
        }
    }

    /// Check if cancellation was requested
    ///
    /// Also checks parent tokens recursively.
    #[inline]
    pub fn is_cancelled(&self) -> bool {
        if self.inner.cancelled.load(Ordering::Acquire) {
            return true;
        }
        if let Some(ref parent) = self.inner.parent {
            return parent.is_cancelled();
        }
        false
    }

    /// Request cancellation
    ///
    /// Idempotent: the first caller flips the flag and runs the wakers,
    /// later calls are no-ops. Only this token's flag is set; children
    /// observe it through the parent chain.
    pub fn cancel(&self) {
        if self.inner.cancelled.swap(true, Ordering::AcqRel) {
            return;
        }
        let wakers = {
            let mut guard = self.inner.wakers.lock().unwrap();
            std::mem::take(&mut *guard)
        };
        for waker in wakers {
            waker();
        }
    }

    /// Register a waker to run when this token is cancelled
    ///
    /// If the token is already cancelled the waker runs immediately on
    /// the calling thread. Parent cancellation does not run wakers
    /// registered on the child; the child's consumers must register on
    /// the token they actually block on.
    pub fn on_cancel<F>(&self, waker: F)
    where
        F: Fn() + Send + Sync + 'static,
    {
        if self.is_cancelled() {
            waker();
            return;
        }
        let mut guard = self.inner.wakers.lock().unwrap();
        // Re-check under the lock so a racing cancel() cannot strand us.
        if self.inner.cancelled.load(Ordering::Acquire) {
            drop(guard);
            waker();
            return;
        }
        guard.push(Box::new(waker));
    }

    /// Check if cancelled and return an error if so
    ///
    /// Typical usage inside a job body:
    /// ```ignore
    /// fn run(token: &CancelToken) -> TaskResult<()> {
    ///     loop {
    ///         token.check()?;
    ///         // ... do a bounded chunk of work ...
    ///     }
    /// }
    /// ```
    #[inline]
    pub fn check(&self) -> TaskResult<()> {
        if self.is_cancelled() {
            Err(ErrorInfo::new(ErrorCode::OperationCancelled))
        } else {
            Ok(())
        }
    }
}

impl Default for CancelToken {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for CancelToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CancelToken")
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}
