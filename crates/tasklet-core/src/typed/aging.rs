//! Typed queue with aging-based starvation prevention
//!
//! Each queued job accrues a priority boost as it waits:
//!
//! ```text
//! boost     = min(max_boost, waited / aging_interval)
//! effective = base_priority - boost
//! ```
//!
//! Boosts only grow, so a job's effective priority never decreases.
//! Re-bucketing runs lazily on dequeue, rate-limited by
//! `reevaluate_interval`; ties inside a sub-queue stay FIFO.

use std::collections::VecDeque;
use std::sync::{Condvar, Mutex};
use std::time::{Duration, Instant};

use crate::error::{ErrorCode, ErrorInfo, TaskResult};
use crate::job::{BoxedJob, JobType};
use crate::sched::{QueueCapabilities, Scheduler};
use crate::typed::TypedScheduler;

/// Aging behaviour knobs
#[derive(Debug, Clone)]
pub struct AgingConfig {
    /// Wait time per single priority-level boost
    pub aging_interval: Duration,

    /// Cap on the total boost
    pub max_boost: u32,

    /// Minimum spacing between re-bucketing passes
    pub reevaluate_interval: Duration,
}

impl Default for AgingConfig {
    fn default() -> Self {
        Self {
            aging_interval: Duration::from_millis(100),
            max_boost: (JobType::COUNT - 1) as u32,
            reevaluate_interval: Duration::from_millis(10),
        }
    }
}

impl AgingConfig {
    /// Boost earned by a job that has waited `waited`
    pub fn boost(&self, waited: Duration) -> u32 {
        let intervals = waited.as_nanos() / self.aging_interval.as_nanos().max(1);
        (intervals as u32).min(self.max_boost)
    }

    /// Effective sub-queue index for a job of `base` that waited `waited`
    pub fn effective_priority(&self, base: JobType, waited: Duration) -> usize {
        base.as_index().saturating_sub(self.boost(waited) as usize)
    }
}

struct Entry {
    job: BoxedJob,
    enqueued: Instant,
    base: JobType,
}

struct AgingInner {
    buckets: [VecDeque<Entry>; JobType::COUNT],
    stopped: bool,
    last_reevaluate: Instant,
}

impl AgingInner {
    fn total(&self) -> usize {
        self.buckets.iter().map(|b| b.len()).sum()
    }
}

/// Typed queue whose jobs age upward in priority while they wait
pub struct AgingTypedQueue {
    inner: Mutex<AgingInner>,
    not_empty: Condvar,
    config: AgingConfig,
}

impl AgingTypedQueue {
    pub fn new(config: AgingConfig) -> Self {
        Self {
            inner: Mutex::new(AgingInner {
                buckets: Default::default(),
                stopped: false,
                last_reevaluate: Instant::now(),
            }),
            not_empty: Condvar::new(),
            config,
        }
    }

    pub fn config(&self) -> &AgingConfig {
        &self.config
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

    /// Move aged entries into the sub-queue their boost earns them
    fn rebucket(&self, inner: &mut AgingInner, now: Instant) {
        if now.duration_since(inner.last_reevaluate) < self.config.reevaluate_interval {
            return;
        }
        inner.last_reevaluate = now;

        let mut moved: Vec<(usize, Entry)> = Vec::new();
        for idx in 1..JobType::COUNT {
            let mut i = 0;
            while i < inner.buckets[idx].len() {
                let entry = &inner.buckets[idx][i];
                let effective = self
                    .config
                    .effective_priority(entry.base, now.duration_since(entry.enqueued));
                if effective < idx {
                    let entry = inner.buckets[idx].remove(i).unwrap();
                    moved.push((effective, entry));
                } else {
                    i += 1;
                }
            }
        }
        // Promoted jobs queue behind existing occupants of their new
        // sub-queue; FIFO ties stay intact.
        for (idx, entry) in moved {
            inner.buckets[idx].push_back(entry);
        }
    }

    fn pop_allowed(&self, inner: &mut AgingInner, allowed: &[JobType]) -> Option<BoxedJob> {
        for bucket in inner.buckets.iter_mut() {
            if let Some(pos) = bucket.iter().position(|e| allowed.contains(&e.base)) {
                return bucket.remove(pos).map(|e| e.job);
            }
        }
        None
    }
}

const ALL_TYPES: [JobType; JobType::COUNT] =
    [JobType::RealTime, JobType::Batch, JobType::Background];

impl Scheduler for AgingTypedQueue {
    fn schedule(&self, mut job: BoxedJob) -> TaskResult<()> {
        let now = Instant::now();
        let mut inner = self.inner.lock().unwrap();
        if inner.stopped {
            return Err(ErrorInfo::new(ErrorCode::QueueStopped));
        }
        job.mark_enqueued(now);
        let base = job.priority();
        inner.buckets[base.as_index()].push_back(Entry {
            job,
            enqueued: now,
            base,
        });
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

impl TypedScheduler for AgingTypedQueue {
    fn try_next_job_of(&self, allowed: &[JobType]) -> TaskResult<BoxedJob> {
        let now = Instant::now();
        let mut inner = self.inner.lock().unwrap();
        self.rebucket(&mut inner, now);
        self.pop_allowed(&mut inner, allowed)
            .ok_or_else(|| ErrorInfo::new(ErrorCode::QueueEmpty))
    }

    fn next_job_of_for(&self, allowed: &[JobType], timeout: Duration) -> TaskResult<BoxedJob> {
        let deadline = Instant::now() + timeout;
        let mut inner = self.inner.lock().unwrap();
        loop {
            let now = Instant::now();
            self.rebucket(&mut inner, now);
            if let Some(job) = self.pop_allowed(&mut inner, allowed) {
                return Ok(job);
            }
            if inner.stopped {
                return Err(ErrorInfo::new(ErrorCode::QueueEmpty));
            }
            if now >= deadline {
                return Err(ErrorInfo::new(ErrorCode::QueueEmpty));
            }
            let (guard, _) = self
                .not_empty
                .wait_timeout(inner, (deadline - now).min(Duration::from_millis(10)))
                .unwrap();
            inner = guard;
        }
    }

    fn size_of(&self, ty: JobType) -> usize {
        // Counts by base type regardless of the bucket aging moved it to.
        let inner = self.inner.lock().unwrap();
        inner
            .buckets
            .iter()
            .map(|b| b.iter().filter(|e| e.base == ty).count())
            .sum()
    }
}
