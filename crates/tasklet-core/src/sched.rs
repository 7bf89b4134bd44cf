//! Scheduler contract shared by every queue implementation

use std::time::Duration;

use crate::error::TaskResult;
use crate::job::BoxedJob;

/// Runtime-queryable description of a queue implementation
///
/// Lets callers adapt: `size()` is only trustworthy when `exact_size`
/// holds, lock-free queues trade exactness for contention behaviour.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueCapabilities {
    /// size() returns an exact value (approximate for lock-free queues)
    pub exact_size: bool,

    /// empty() check is atomic and consistent
    pub atomic_empty_check: bool,

    /// Implementation uses lock-free algorithms
    pub lock_free: bool,

    /// Implementation uses wait-free algorithms (stronger than lock-free)
    pub wait_free: bool,

    /// Supports batch enqueue
    pub supports_batch: bool,

    /// Supports blocking dequeue with wait
    pub supports_blocking_wait: bool,

    /// Supports stop() shutdown signalling
    pub supports_stop: bool,
}

impl QueueCapabilities {
    /// Capabilities of the mutex-based queues
    pub const fn mutex() -> Self {
        Self {
            exact_size: true,
            atomic_empty_check: true,
            lock_free: false,
            wait_free: false,
            supports_batch: true,
            supports_blocking_wait: true,
            supports_stop: true,
        }
    }

    /// Capabilities of the Michael-Scott queue
    pub const fn lock_free() -> Self {
        Self {
            exact_size: false,
            atomic_empty_check: false,
            lock_free: true,
            wait_free: false,
            supports_batch: true,
            supports_blocking_wait: true,
            supports_stop: true,
        }
    }
}

impl Default for QueueCapabilities {
    fn default() -> Self {
        Self::mutex()
    }
}

/// FIFO of job-owning handles, shared by producers and workers
///
/// Contract:
/// - `schedule` fails iff the queue is stopped or over capacity (and the
///   overflow policy forbids acceptance).
/// - `next_job` on an empty, non-stopped queue blocks until a job
///   arrives, the queue stops, or the timeout variant elapses.
/// - After `stop()`, pending dequeues return `QueueEmpty` and subsequent
///   enqueues return `QueueStopped`. `stop()` is idempotent.
pub trait Scheduler: Send + Sync {
    /// Enqueue a job; thread-safe
    fn schedule(&self, job: BoxedJob) -> TaskResult<()>;

    /// Enqueue a batch; empty batches are `InvalidArgument`
    ///
    /// Atomicity depends on the implementation's overflow policy; the
    /// default loops over `schedule` and stops at the first error.
    fn schedule_batch(&self, jobs: Vec<BoxedJob>) -> TaskResult<()> {
        use crate::error::{ErrorCode, ErrorInfo};
        if jobs.is_empty() {
            return Err(ErrorInfo::with_message(
                ErrorCode::InvalidArgument,
                "empty batch",
            ));
        }
        for job in jobs {
            self.schedule(job)?;
        }
        Ok(())
    }

    /// Dequeue, blocking until work arrives or the queue stops
    fn next_job(&self) -> TaskResult<BoxedJob>;

    /// Dequeue, blocking for at most `timeout`
    fn next_job_for(&self, timeout: Duration) -> TaskResult<BoxedJob>;

    /// Non-blocking dequeue
    fn try_next_job(&self) -> TaskResult<BoxedJob>;

    /// Park until work may be available, the queue stops, or `timeout`
    /// elapses. True means "worth retrying a dequeue".
    fn wait_for_work(&self, timeout: Duration) -> bool;

    /// True when no jobs are queued (approximate for lock-free queues)
    fn empty(&self) -> bool;

    /// Queued job count (approximate for lock-free queues)
    fn size(&self) -> usize;

    /// Implementation capabilities
    fn capabilities(&self) -> QueueCapabilities;

    /// Signal shutdown and wake all blocked dequeuers; idempotent
    fn stop(&self);

    /// True once stop() has been called
    fn is_stopped(&self) -> bool;
}
