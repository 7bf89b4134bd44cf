//! One-shot result futures
//!
//! A `Promise`/`JobFuture` pair is the only channel between a running job
//! and its submitter. The job side writes the slot exactly once; the
//! consumer blocks in `get` (or polls with `get_for`). Dropping a future
//! does NOT cancel the job; call `cancel()` explicitly. Dropping an
//! unfulfilled `Promise` resolves the future with `OperationCancelled`,
//! which is how immediate shutdown avoids hung consumers.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex, Weak};
use std::time::{Duration, Instant};

use crate::cancel::CancelToken;
use crate::error::{ErrorCode, ErrorInfo, TaskResult};

struct Shared<T> {
    /// Write-once result slot
    slot: Mutex<Option<TaskResult<T>>>,

    /// Wakes consumers on completion or cancellation
    cv: Condvar,

    /// Completion flag, flipped after the slot is written
    ready: AtomicBool,

    /// Cancellation observed by `get`
    token: CancelToken,
}

/// Consumer half of the one-shot channel
pub struct JobFuture<T> {
    shared: Arc<Shared<T>>,
}

/// Producer half; fulfilled by the worker that ran the job
pub struct Promise<T> {
    shared: Option<Arc<Shared<T>>>,
}

/// Create a connected promise/future pair sharing `token`
pub fn future_pair<T: Send + 'static>(token: CancelToken) -> (Promise<T>, JobFuture<T>) {
    let shared = Arc::new(Shared {
        slot: Mutex::new(None),
        cv: Condvar::new(),
        ready: AtomicBool::new(false),
        token,
    });

    // Wake parked consumers when the token fires. Registered through a
    // Weak so a long-lived token does not keep dead futures alive.
    let weak: Weak<Shared<T>> = Arc::downgrade(&shared);
    shared.token.on_cancel(move || {
        if let Some(shared) = weak.upgrade() {
            let _guard = shared.slot.lock().unwrap();
            shared.cv.notify_all();
        }
    });

    (
        Promise {
            shared: Some(Arc::clone(&shared)),
        },
        JobFuture { shared },
    )
}

impl<T> Promise<T> {
    /// Fulfil the future. A second call on the same channel is a no-op.
    pub fn complete(mut self, result: TaskResult<T>) {
        if let Some(shared) = self.shared.take() {
            Self::fill(&shared, result);
        }
    }

    fn fill(shared: &Shared<T>, result: TaskResult<T>) {
        let mut slot = shared.slot.lock().unwrap();
        if shared.ready.load(Ordering::Acquire) {
            return;
        }
        *slot = Some(result);
        shared.ready.store(true, Ordering::Release);
        shared.cv.notify_all();
    }
}

impl<T> Drop for Promise<T> {
    fn drop(&mut self) {
        // A promise dropped without completing means the job was discarded
        // (immediate shutdown, queue clear). The consumer must not hang.
        if let Some(shared) = self.shared.take() {
            Self::fill(
                &shared,
                Err(ErrorInfo::with_message(
                    ErrorCode::OperationCancelled,
                    "job dropped before execution",
                )),
            );
        }
    }
}

impl<T> JobFuture<T> {
    /// Non-blocking readiness check
    #[inline]
    pub fn is_ready(&self) -> bool {
        self.shared.ready.load(Ordering::Acquire)
    }

    /// Request cancellation of the associated job (cooperative)
    pub fn cancel(&self) {
        self.shared.token.cancel();
    }

    /// The token shared with the job
    pub fn cancel_token(&self) -> &CancelToken {
        &self.shared.token
    }

    /// Block until the result is available or the token is cancelled
    ///
    /// Returns `OperationCancelled` when cancelled before completion.
    pub fn get(self) -> TaskResult<T> {
        let mut slot = self.shared.slot.lock().unwrap();
        loop {
            if self.shared.ready.load(Ordering::Acquire) {
                return slot
                    .take()
                    .expect("ready future with empty slot");
            }
            if self.shared.token.is_cancelled() {
                return Err(ErrorInfo::new(ErrorCode::OperationCancelled));
            }
            slot = self.shared.cv.wait(slot).unwrap();
        }
    }

    /// Block until the result is ready without consuming it
    ///
    /// Errors with `Timeout` when `timeout` elapses first and
    /// `OperationCancelled` when the token fires.
    pub fn wait_ready(&self, timeout: Duration) -> TaskResult<()> {
        let deadline = Instant::now() + timeout;
        let mut slot = self.shared.slot.lock().unwrap();
        loop {
            if self.shared.ready.load(Ordering::Acquire) {
                return Ok(());
            }
            if self.shared.token.is_cancelled() {
                return Err(ErrorInfo::new(ErrorCode::OperationCancelled));
            }
            let now = Instant::now();
            if now >= deadline {
                return Err(ErrorInfo::new(ErrorCode::Timeout));
            }
            let (guard, _) = self
                .shared
                .cv
                .wait_timeout(slot, deadline - now)
                .unwrap();
            slot = guard;
        }
    }

    /// Block for at most `timeout`
    ///
    /// `None` means the timeout elapsed with no result and nothing was
    /// consumed; the future can be waited on again.
    pub fn get_for(&self, timeout: Duration) -> Option<TaskResult<T>> {
        let deadline = Instant::now() + timeout;
        let mut slot = self.shared.slot.lock().unwrap();
        loop {
            if self.shared.ready.load(Ordering::Acquire) {
                return Some(slot.take().unwrap_or_else(|| {
                    Err(ErrorInfo::with_message(
                        ErrorCode::InvalidArgument,
                        "result already taken",
                    ))
                }));
            }
            if self.shared.token.is_cancelled() {
                return Some(Err(ErrorInfo::new(ErrorCode::OperationCancelled)));
            }
            let now = Instant::now();
            if now >= deadline {
                return None;
            }
            let (guard, _timed_out) = self
                .shared
                .cv
                .wait_timeout(slot, deadline - now)
                .unwrap();
            slot = guard;
        }
    }
}

impl<T> std::fmt::Debug for JobFuture<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobFuture")
            .field("ready", &self.is_ready())
            .field("cancelled", &self.shared.token.is_cancelled())
            .finish()
    }
}

/// Future bundled with its own cancellation token
///
/// Convenience wrapper for callers that want to hand out cancel
/// authority together with the pending result.
pub struct CancellableFuture<T> {
    future: JobFuture<T>,
}

impl<T> CancellableFuture<T> {
    pub fn new(future: JobFuture<T>) -> Self {
        Self { future }
    }

    /// Cancel the job and wake any waiter
    pub fn cancel(&self) {
        self.future.cancel();
    }

    #[inline]
    pub fn is_ready(&self) -> bool {
        self.future.is_ready()
    }

    pub fn get(self) -> TaskResult<T> {
        self.future.get()
    }

    pub fn get_for(&self, timeout: Duration) -> Option<TaskResult<T>> {
        self.future.get_for(timeout)
    }

    /// Unwrap back to the plain future
    pub fn into_inner(self) -> JobFuture<T> {
        self.future
    }
}

/// Wait for every future; fails fast on the first error
///
/// Results are returned in submission order.
pub fn when_all<T>(futures: Vec<JobFuture<T>>) -> TaskResult<Vec<T>> {
    let mut out = Vec::with_capacity(futures.len());
    for future in futures {
        out.push(future.get()?);
    }
    Ok(out)
}

/// Wait until any future resolves and return its result
///
/// The remaining futures are dropped unconsumed (their jobs keep
/// running; dropping a future does not cancel).
pub fn when_any<T>(futures: Vec<JobFuture<T>>) -> TaskResult<T> {
    if futures.is_empty() {
        return Err(ErrorInfo::with_message(
            ErrorCode::InvalidArgument,
            "when_any on empty set",
        ));
    }
    loop {
        for future in &futures {
            if future.is_ready() {
                if let Some(result) = future.get_for(Duration::ZERO) {
                    return result;
                }
            }
        }
        std::thread::park_timeout(Duration::from_micros(200));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn test_complete_then_get() {
        let (promise, future) = future_pair::<u32>(CancelToken::new());
        promise.complete(Ok(7));
        assert!(future.is_ready());
        assert_eq!(future.get().unwrap(), 7);
    }

    #[test]
    fn test_get_blocks_until_complete() {
        let (promise, future) = future_pair::<&'static str>(CancelToken::new());
        let producer = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            promise.complete(Ok("done"));
        });
        assert_eq!(future.get().unwrap(), "done");
        producer.join().unwrap();
    }

    #[test]
    fn test_get_for_times_out_without_consuming() {
        let (promise, future) = future_pair::<u32>(CancelToken::new());
        assert!(future.get_for(Duration::from_millis(10)).is_none());

        promise.complete(Ok(1));
        assert_eq!(future.get_for(Duration::from_millis(10)).unwrap().unwrap(), 1);
    }

    #[test]
    fn test_wait_ready_reports_timeout() {
        let (promise, future) = future_pair::<u32>(CancelToken::new());
        let err = future.wait_ready(Duration::from_millis(10)).unwrap_err();
        assert_eq!(err.code(), ErrorCode::Timeout);

        promise.complete(Ok(9));
        assert!(future.wait_ready(Duration::from_millis(10)).is_ok());
        assert_eq!(future.get().unwrap(), 9);
    }

    #[test]
    fn test_cancel_unblocks_get() {
        let (_promise, future) = future_pair::<u32>(CancelToken::new());
        future.cancel();
        let err = future.get().unwrap_err();
        assert_eq!(err.code(), ErrorCode::OperationCancelled);
    }

    #[test]
    fn test_cancel_from_other_thread_wakes_waiter() {
        let token = CancelToken::new();
        let (_promise, future) = future_pair::<u32>(token.clone());
        let canceller = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            token.cancel();
        });
        let err = future.get().unwrap_err();
        assert_eq!(err.code(), ErrorCode::OperationCancelled);
        canceller.join().unwrap();
    }

    #[test]
    fn test_dropped_promise_resolves_future() {
        let (promise, future) = future_pair::<u32>(CancelToken::new());
        drop(promise);
        let err = future.get().unwrap_err();
        assert_eq!(err.code(), ErrorCode::OperationCancelled);
    }

    #[test]
    fn test_completed_result_survives_cancel() {
        let (promise, future) = future_pair::<u32>(CancelToken::new());
        promise.complete(Ok(5));
        future.cancel();
        // Result was written before cancellation; it is still delivered.
        assert_eq!(future.get().unwrap(), 5);
    }

    #[test]
    fn test_when_all_preserves_order() {
        let pairs: Vec<_> = (0..4u32).map(|_| future_pair::<u32>(CancelToken::new())).collect();
        let mut futures = Vec::new();
        let mut promises = Vec::new();
        for (p, f) in pairs {
            promises.push(p);
            futures.push(f);
        }
        // Complete out of order
        for (i, promise) in promises.into_iter().enumerate().rev() {
            promise.complete(Ok(i as u32 * 10));
        }
        assert_eq!(when_all(futures).unwrap(), vec![0, 10, 20, 30]);
    }

    #[test]
    fn test_when_any_returns_first_ready() {
        let (p1, f1) = future_pair::<u32>(CancelToken::new());
        let (_p2, f2) = future_pair::<u32>(CancelToken::new());
        p1.complete(Ok(42));
        assert_eq!(when_any(vec![f1, f2]).unwrap(), 42);
    }

    #[test]
    fn test_when_any_empty_is_invalid() {
        let err = when_any::<u32>(vec![]).unwrap_err();
        assert_eq!(err.code(), ErrorCode::InvalidArgument);
    }
}
