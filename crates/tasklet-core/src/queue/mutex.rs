//! Mutex-based FIFO job queue
//!
//! A `VecDeque` behind a mutex with two condvars: `not_empty` for
//! dequeuers, `not_full` for enqueuers blocked by the Block overflow
//! behaviour. Size is exact; submission order equals dequeue order.

use std::collections::VecDeque;
use std::sync::{Condvar, Mutex};
use std::time::{Duration, Instant};

use crate::error::{ErrorCode, ErrorInfo, TaskResult};
use crate::job::BoxedJob;
use crate::sched::{QueueCapabilities, Scheduler};

/// What a bounded queue does with an enqueue that finds it full
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OverflowBehavior {
    /// Fail the enqueue with `QueueFull`
    Reject,

    /// Block the enqueuer until space frees up or the queue stops
    Block,

    /// Drop the oldest queued job to make room
    DropOldest,

    /// Drop the incoming job; the enqueue reports success
    DropNewest,
}

struct QueueInner {
    jobs: VecDeque<BoxedJob>,
    stopped: bool,
}

/// Bounded or unbounded FIFO queue with blocking dequeue
pub struct MutexQueue {
    inner: Mutex<QueueInner>,
    not_empty: Condvar,
    not_full: Condvar,
    capacity: Option<usize>,
    overflow: OverflowBehavior,
}

impl MutexQueue {
    /// Unbounded queue
    pub fn unbounded() -> Self {
        Self::with_overflow(None, OverflowBehavior::Reject)
    }

    /// Bounded queue that rejects when full
    pub fn bounded(capacity: usize) -> Self {
        Self::with_overflow(Some(capacity), OverflowBehavior::Reject)
    }

    /// Bounded queue with an explicit overflow behaviour
    pub fn with_overflow(capacity: Option<usize>, overflow: OverflowBehavior) -> Self {
        Self {
            inner: Mutex::new(QueueInner {
                jobs: VecDeque::new(),
                stopped: false,
            }),
            not_empty: Condvar::new(),
            not_full: Condvar::new(),
            capacity,
            overflow,
        }
    }

    /// Maximum size, if bounded
    pub fn capacity(&self) -> Option<usize> {
        self.capacity
    }

    /// Remove and drop every queued job, returning how many were dropped
    ///
    /// Dropped jobs resolve their futures as cancelled via the promise
    /// drop path; used by immediate pool shutdown.
    pub fn clear(&self) -> usize {
        let mut inner = self.inner.lock().unwrap();
        let n = inner.jobs.len();
        inner.jobs.clear();
        drop(inner);
        if n > 0 {
            self.not_full.notify_all();
        }
        n
    }

    fn is_full(&self, len: usize) -> bool {
        self.capacity.map(|cap| len >= cap).unwrap_or(false)
    }

    fn push(
        &self,
        inner: &mut std::sync::MutexGuard<'_, QueueInner>,
        mut job: BoxedJob,
    ) {
        job.mark_enqueued(Instant::now());
        inner.jobs.push_back(job);
        self.not_empty.notify_one();
    }
}

impl Scheduler for MutexQueue {
    fn schedule(&self, job: BoxedJob) -> TaskResult<()> {
        let mut inner = self.inner.lock().unwrap();
        if inner.stopped {
            return Err(ErrorInfo::new(ErrorCode::QueueStopped));
        }

        if self.is_full(inner.jobs.len()) {
            match self.overflow {
                OverflowBehavior::Reject => {
                    return Err(ErrorInfo::with_message(
                        ErrorCode::QueueFull,
                        format!("capacity {} reached", self.capacity.unwrap_or(0)),
                    ));
                }
                OverflowBehavior::Block => {
                    while self.is_full(inner.jobs.len()) && !inner.stopped {
                        inner = self.not_full.wait(inner).unwrap();
                    }
                    if inner.stopped {
                        return Err(ErrorInfo::new(ErrorCode::QueueStopped));
                    }
                }
                OverflowBehavior::DropOldest => {
                    inner.jobs.pop_front();
                }
                OverflowBehavior::DropNewest => {
                    return Ok(());
                }
            }
        }

        self.push(&mut inner, job);
        Ok(())
    }

    fn schedule_batch(&self, jobs: Vec<BoxedJob>) -> TaskResult<()> {
        if jobs.is_empty() {
            return Err(ErrorInfo::with_message(
                ErrorCode::InvalidArgument,
                "empty batch",
            ));
        }

        let mut inner = self.inner.lock().unwrap();
        if inner.stopped {
            return Err(ErrorInfo::new(ErrorCode::QueueStopped));
        }

        match self.overflow {
            // All or none: the batch never straddles a capacity failure.
            OverflowBehavior::Reject => {
                if let Some(cap) = self.capacity {
                    if inner.jobs.len() + jobs.len() > cap {
                        return Err(ErrorInfo::with_message(
                            ErrorCode::QueueFull,
                            "batch exceeds remaining capacity",
                        ));
                    }
                }
                for job in jobs {
                    self.push(&mut inner, job);
                }
            }
            OverflowBehavior::Block => {
                for job in jobs {
                    while self.is_full(inner.jobs.len()) && !inner.stopped {
                        inner = self.not_full.wait(inner).unwrap();
                    }
                    if inner.stopped {
                        return Err(ErrorInfo::new(ErrorCode::QueueStopped));
                    }
                    self.push(&mut inner, job);
                }
            }
            OverflowBehavior::DropOldest => {
                for job in jobs {
                    while self.is_full(inner.jobs.len()) {
                        inner.jobs.pop_front();
                    }
                    self.push(&mut inner, job);
                }
            }
            OverflowBehavior::DropNewest => {
                for job in jobs {
                    if self.is_full(inner.jobs.len()) {
                        break;
                    }
                    self.push(&mut inner, job);
                }
            }
        }
        Ok(())
    }

    fn next_job(&self) -> TaskResult<BoxedJob> {
        let mut inner = self.inner.lock().unwrap();
        loop {
            if let Some(job) = inner.jobs.pop_front() {
                self.not_full.notify_one();
                return Ok(job);
            }
            if inner.stopped {
                return Err(ErrorInfo::new(ErrorCode::QueueEmpty));
            }
            inner = self.not_empty.wait(inner).unwrap();
        }
    }

    fn next_job_for(&self, timeout: Duration) -> TaskResult<BoxedJob> {
        let deadline = Instant::now() + timeout;
        let mut inner = self.inner.lock().unwrap();
        loop {
            if let Some(job) = inner.jobs.pop_front() {
                self.not_full.notify_one();
                return Ok(job);
            }
            if inner.stopped {
                return Err(ErrorInfo::new(ErrorCode::QueueEmpty));
            }
            let now = Instant::now();
            if now >= deadline {
                return Err(ErrorInfo::new(ErrorCode::QueueEmpty));
            }
            let (guard, _) = self
                .not_empty
                .wait_timeout(inner, deadline - now)
                .unwrap();
            inner = guard;
        }
    }

    fn try_next_job(&self) -> TaskResult<BoxedJob> {
        let mut inner = self.inner.lock().unwrap();
        match inner.jobs.pop_front() {
            Some(job) => {
                self.not_full.notify_one();
                Ok(job)
            }
            None => Err(ErrorInfo::new(ErrorCode::QueueEmpty)),
        }
    }

    fn wait_for_work(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut inner = self.inner.lock().unwrap();
        loop {
            if !inner.jobs.is_empty() {
                return true;
            }
            if inner.stopped {
                return false;
            }
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            let (guard, _) = self
                .not_empty
                .wait_timeout(inner, deadline - now)
                .unwrap();
            inner = guard;
        }
    }

    fn empty(&self) -> bool {
        self.inner.lock().unwrap().jobs.is_empty()
    }

    fn size(&self) -> usize {
        self.inner.lock().unwrap().jobs.len()
    }

    fn capabilities(&self) -> QueueCapabilities {
        QueueCapabilities::mutex()
    }

    fn stop(&self) {
        let mut inner = self.inner.lock().unwrap();
        inner.stopped = true;
        drop(inner);
        self.not_empty.notify_all();
        self.not_full.notify_all();
    }

    fn is_stopped(&self) -> bool {
        self.inner.lock().unwrap().stopped
    }
}

impl Default for MutexQueue {
    fn default() -> Self {
        Self::unbounded()
    }
}
