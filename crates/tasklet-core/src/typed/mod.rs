//! Priority-typed queues
//!
//! One FIFO sub-queue per [`JobType`]; dequeue drains the highest
//! priority non-empty sub-queue first. [`aging::AgingTypedQueue`] layers
//! wait-time-driven priority boosts on top so Background work cannot
//! starve.

pub mod aging;

use std::collections::VecDeque;
use std::sync::{Condvar, Mutex};
use std::time::{Duration, Instant};

use crate::error::{ErrorCode, ErrorInfo, TaskResult};
use crate::job::{BoxedJob, JobType};
use crate::sched::{QueueCapabilities, Scheduler};

pub use aging::{AgingConfig, AgingTypedQueue};

/// Scheduler with per-priority dequeue restricted to a subset
///
/// Typed workers serve a responsibility set; `allowed` is that set.
pub trait TypedScheduler: Scheduler {
    /// Non-blocking dequeue restricted to `allowed` types
    fn try_next_job_of(&self, allowed: &[JobType]) -> TaskResult<BoxedJob>;

    /// Blocking dequeue restricted to `allowed` types
    fn next_job_of_for(&self, allowed: &[JobType], timeout: Duration) -> TaskResult<BoxedJob>;

    /// Queued jobs of one type
    fn size_of(&self, ty: JobType) -> usize;
}

struct TypedInner {
    buckets: [VecDeque<BoxedJob>; JobType::COUNT],
    stopped: bool,
}

impl TypedInner {
    fn total(&self) -> usize {
        self.buckets.iter().map(|b| b.len()).sum()
    }

    fn pop_highest(&mut self, allowed: &[JobType]) -> Option<BoxedJob> {
        for ty in JobType::iter() {
            if !allowed.contains(&ty) {
                continue;
            }
            if let Some(job) = self.buckets[ty.as_index()].pop_front() {
                return Some(job);
            }
        }
        None
    }
}

/// Map of priority class to FIFO sub-queue
pub struct TypedJobQueue {
    inner: Mutex<TypedInner>,
    not_empty: Condvar,
}

impl TypedJobQueue {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(TypedInner {
                buckets: Default::default(),
                stopped: false,
            }),
            not_empty: Condvar::new(),
        }
    }

    /// Drop every queued job; used by immediate shutdown
    pub fn clear(&self) -> usize {
        let mut inner = self.inner.lock().unwrap();
        let n = inner.total();
        for bucket in inner.buckets.iter_mut() {
            bucket.clear();
        }
        n
    }
}

impl Scheduler for TypedJobQueue {
    fn schedule(&self, mut job: BoxedJob) -> TaskResult<()> {
        let mut inner = self.inner.lock().unwrap();
        if inner.stopped {
            return Err(ErrorInfo::new(ErrorCode::QueueStopped));
        }
        job.mark_enqueued(Instant::now());
        let idx = job.priority().as_index();
        inner.buckets[idx].push_back(job);
        drop(inner);
        self.not_empty.notify_one();
        Ok(())
    }

    fn next_job(&self) -> TaskResult<BoxedJob> {
        loop {
            match self.next_job_of_for(&ALL_TYPES, Duration::from_secs(3600)) {
                Err(e) if e.code() == ErrorCode::QueueEmpty && !self.is_stopped() => continue,
                other => return other,
            }
        }
    }

    fn next_job_for(&self, timeout: Duration) -> TaskResult<BoxedJob> {
        self.next_job_of_for(&ALL_TYPES, timeout)
    }

    fn try_next_job(&self) -> TaskResult<BoxedJob> {
        self.try_next_job_of(&ALL_TYPES)
    }

    fn wait_for_work(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut inner = self.inner.lock().unwrap();
        loop {
            if inner.total() > 0 {
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
        self.inner.lock().unwrap().total() == 0
    }

    fn size(&self) -> usize {
        self.inner.lock().unwrap().total()
    }

    fn capabilities(&self) -> QueueCapabilities {
        QueueCapabilities::mutex()
    }

    fn stop(&self) {
        let mut inner = self.inner.lock().unwrap();
        inner.stopped = true;
        drop(inner);
        self.not_empty.notify_all();
    }

    fn is_stopped(&self) -> bool {
        self.inner.lock().unwrap().stopped
    }
}

const ALL_TYPES: [JobType; JobType::COUNT] =
    [JobType::RealTime, JobType::Batch, JobType::Background];

impl TypedScheduler for TypedJobQueue {
    fn try_next_job_of(&self, allowed: &[JobType]) -> TaskResult<BoxedJob> {
        let mut inner = self.inner.lock().unwrap();
        inner
            .pop_highest(allowed)
            .ok_or_else(|| ErrorInfo::new(ErrorCode::QueueEmpty))
    }

    fn next_job_of_for(&self, allowed: &[JobType], timeout: Duration) -> TaskResult<BoxedJob> {
        let deadline = Instant::now() + timeout;
        let mut inner = self.inner.lock().unwrap();
        loop {
            if let Some(job) = inner.pop_highest(allowed) {
                return Ok(job);
            }
            if inner.stopped {
                return Err(ErrorInfo::new(ErrorCode::QueueEmpty));
            }
            let now = Instant::now();
            if now >= deadline {
                return Err(ErrorInfo::new(ErrorCode::QueueEmpty));
            }
            // Cap the wait so jobs of other types do not keep us asleep
            // past our deadline.
            let (guard, _) = self
                .not_empty
                .wait_timeout(inner, (deadline - now).min(Duration::from_millis(10)))
                .unwrap();
            inner = guard;
        }
    }

    fn size_of(&self, ty: JobType) -> usize {
        self.inner.lock().unwrap().buckets[ty.as_index()].len()
    }
}

impl Default for TypedJobQueue {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::JobBuilder;
    use std::sync::Arc;
    use std::thread;

    fn typed_job(ty: JobType) -> BoxedJob {
        Box::new(JobBuilder::new().priority(ty).work(|| Ok(())).build())
    }

    #[test]
    fn test_priority_order_across_buckets() {
        let queue = TypedJobQueue::new();
        queue.schedule(typed_job(JobType::Background)).unwrap();
        queue.schedule(typed_job(JobType::Batch)).unwrap();
        queue.schedule(typed_job(JobType::RealTime)).unwrap();

        assert_eq!(queue.try_next_job().unwrap().priority(), JobType::RealTime);
        assert_eq!(queue.try_next_job().unwrap().priority(), JobType::Batch);
        assert_eq!(queue.try_next_job().unwrap().priority(), JobType::Background);
    }

    #[test]
    fn test_fifo_within_bucket() {
        let queue = TypedJobQueue::new();
        let mut ids = Vec::new();
        for _ in 0..10 {
            let job = typed_job(JobType::Batch);
            ids.push(job.id());
            queue.schedule(job).unwrap();
        }
        for id in ids {
            assert_eq!(queue.try_next_job().unwrap().id(), id);
        }
    }

    #[test]
    fn test_subset_dequeue_skips_other_types() {
        let queue = TypedJobQueue::new();
        queue.schedule(typed_job(JobType::RealTime)).unwrap();
        queue.schedule(typed_job(JobType::Background)).unwrap();

        let job = queue.try_next_job_of(&[JobType::Background]).unwrap();
        assert_eq!(job.priority(), JobType::Background);

        // RealTime still queued, Background drained.
        assert_eq!(queue.size_of(JobType::RealTime), 1);
        assert_eq!(queue.size_of(JobType::Background), 0);
        assert_eq!(
            queue
                .try_next_job_of(&[JobType::Background])
                .unwrap_err()
                .code(),
            ErrorCode::QueueEmpty
        );
    }

    #[test]
    fn test_blocking_subset_dequeue() {
        let queue = Arc::new(TypedJobQueue::new());
        let q = Arc::clone(&queue);
        let consumer = thread::spawn(move || {
            q.next_job_of_for(&[JobType::RealTime], Duration::from_secs(2))
                .map(|j| j.priority())
        });

        thread::sleep(Duration::from_millis(20));
        queue.schedule(typed_job(JobType::Batch)).unwrap();
        thread::sleep(Duration::from_millis(20));
        queue.schedule(typed_job(JobType::RealTime)).unwrap();

        assert_eq!(consumer.join().unwrap().unwrap(), JobType::RealTime);
        assert_eq!(queue.size_of(JobType::Batch), 1);
    }

    #[test]
    fn test_stop_wakes_and_rejects() {
        let queue = Arc::new(TypedJobQueue::new());
        let q = Arc::clone(&queue);
        let consumer =
            thread::spawn(move || q.next_job_for(Duration::from_secs(5)).unwrap_err().code());

        thread::sleep(Duration::from_millis(20));
        queue.stop();
        assert_eq!(consumer.join().unwrap(), ErrorCode::QueueEmpty);
        assert_eq!(
            queue.schedule(typed_job(JobType::Batch)).unwrap_err().code(),
            ErrorCode::QueueStopped
        );
    }
}
