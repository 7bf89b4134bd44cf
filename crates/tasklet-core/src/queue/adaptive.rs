//! Contention-adaptive queue
//!
//! Starts on the mutex queue (cheapest when uncontended) and migrates
//! to the lock-free queue once enqueue contention over a sliding window
//! crosses a threshold, the host has more than two cores, and the
//! target architecture has a strong memory model. Migration is one-way.
//!
//! The switch is protected by a generation counter: odd means a
//! migration is in flight and both enqueuers and dequeuers wait it out,
//! so no job can be pushed to the old implementation after the drain.

use std::sync::atomic::{AtomicBool, AtomicU64, AtomicU8, Ordering};
use std::time::{Duration, Instant};

use crate::error::{ErrorCode, ErrorInfo, TaskResult};
use crate::job::BoxedJob;
use crate::queue::lockfree::LockFreeQueue;
use crate::queue::mutex::MutexQueue;
use crate::sched::{QueueCapabilities, Scheduler};
use crate::ticket_lock::TicketLock;
use crate::window::SlidingWindow;

const IMPL_MUTEX: u8 = 0;
const IMPL_LOCKFREE: u8 = 1;

/// An enqueue slower than this counts as contended
const CONTENTION_LATENCY: Duration = Duration::from_micros(5);

/// Queue that promotes itself from mutex to lock-free under contention
pub struct AdaptiveQueue {
    mutex_q: MutexQueue,
    lockfree_q: LockFreeQueue,

    /// Which implementation serves requests
    active: AtomicU8,

    /// Even = stable, odd = migration in progress
    generation: AtomicU64,

    /// Serialises the migration; losers skip
    migration: TicketLock<()>,

    /// Contended-enqueue events over the observation window
    contention: SlidingWindow,

    /// Events within the window that trigger migration
    threshold: u64,

    stopped: AtomicBool,
}

impl AdaptiveQueue {
    pub fn new() -> Self {
        Self::with_threshold(64)
    }

    /// `threshold` contended enqueues within ~100ms trigger promotion
    pub fn with_threshold(threshold: u64) -> Self {
        Self {
            mutex_q: MutexQueue::unbounded(),
            lockfree_q: LockFreeQueue::new(),
            active: AtomicU8::new(IMPL_MUTEX),
            generation: AtomicU64::new(0),
            migration: TicketLock::new(()),
            contention: SlidingWindow::new(Duration::from_millis(100), 10),
            threshold: threshold.max(1),
            stopped: AtomicBool::new(false),
        }
    }

    /// True once the lock-free implementation is active
    pub fn is_lock_free(&self) -> bool {
        self.active_impl() == IMPL_LOCKFREE
    }

    /// Wait out any in-flight migration, then read the active impl
    fn active_impl(&self) -> u8 {
        loop {
            let gen = self.generation.load(Ordering::Acquire);
            if gen % 2 == 0 {
                let active = self.active.load(Ordering::Acquire);
                if self.generation.load(Ordering::Acquire) == gen {
                    return active;
                }
            }
            std::hint::spin_loop();
        }
    }

    fn should_migrate(&self) -> bool {
        if !cfg!(any(target_arch = "x86_64", target_arch = "x86")) {
            return false;
        }
        let cores = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1);
        cores > 2 && self.contention.count() >= self.threshold
    }

    fn migrate(&self) {
        // Losing the ticket race means another thread is migrating.
        self.migration.try_with(|_| {
            if self.active.load(Ordering::Acquire) != IMPL_MUTEX {
                return;
            }

            log::debug!("adaptive queue promoting to lock-free");
            self.generation.fetch_add(1, Ordering::AcqRel); // odd: accepts pause

            // Drain in FIFO order into the lock-free queue.
            while let Ok(job) = self.mutex_q.try_next_job() {
                // The lock-free queue cannot refuse: it is unbounded and not
                // stopped. Hazard exhaustion on this thread would already
                // have failed the triggering enqueue.
                if self.lockfree_q.schedule(job).is_err() {
                    break;
                }
            }

            self.active.store(IMPL_LOCKFREE, Ordering::Release);
            self.generation.fetch_add(1, Ordering::AcqRel); // even: stable
        });
    }
}

impl Scheduler for AdaptiveQueue {
    fn schedule(&self, job: BoxedJob) -> TaskResult<()> {
        if self.stopped.load(Ordering::Acquire) {
            return Err(ErrorInfo::new(ErrorCode::QueueStopped));
        }

        match self.active_impl() {
            IMPL_MUTEX => {
                let start = Instant::now();
                self.mutex_q.schedule(job)?;
                if start.elapsed() >= CONTENTION_LATENCY {
                    self.contention.record(1);
                    if self.should_migrate() {
                        self.migrate();
                    }
                }
                Ok(())
            }
            _ => self.lockfree_q.schedule(job),
        }
    }

    fn next_job(&self) -> TaskResult<BoxedJob> {
        loop {
            // Short slices so a dequeuer blocked on the old impl notices
            // the migration.
            match self.next_job_for(Duration::from_millis(10)) {
                Ok(job) => return Ok(job),
                Err(e) if e.code() == ErrorCode::QueueEmpty && !self.is_stopped() => continue,
                Err(e) => return Err(e),
            }
        }
    }

    fn next_job_for(&self, timeout: Duration) -> TaskResult<BoxedJob> {
        let deadline = Instant::now() + timeout;
        loop {
            let active = self.active_impl();
            let slice = deadline
                .saturating_duration_since(Instant::now())
                .min(Duration::from_millis(10));
            let result = match active {
                IMPL_MUTEX => self.mutex_q.next_job_for(slice),
                // An enqueuer that raced the migration may have landed a
                // late job on the mutex queue; sweep it before parking.
                _ => self
                    .mutex_q
                    .try_next_job()
                    .or_else(|_| self.lockfree_q.next_job_for(slice)),
            };
            match result {
                Ok(job) => return Ok(job),
                Err(e) if e.code() == ErrorCode::QueueEmpty => {
                    if active == IMPL_MUTEX && self.is_lock_free() {
                        continue; // migrated underneath us; retry on the new impl
                    }
                    if self.stopped.load(Ordering::Acquire) || Instant::now() >= deadline {
                        return Err(e);
                    }
                }
                Err(e) => return Err(e),
            }
        }
    }

    fn try_next_job(&self) -> TaskResult<BoxedJob> {
        match self.active_impl() {
            IMPL_MUTEX => self.mutex_q.try_next_job(),
            _ => self
                .mutex_q
                .try_next_job()
                .or_else(|_| self.lockfree_q.try_next_job()),
        }
    }

    fn wait_for_work(&self, timeout: Duration) -> bool {
        match self.active_impl() {
            IMPL_MUTEX => self.mutex_q.wait_for_work(timeout),
            _ => self.lockfree_q.wait_for_work(timeout),
        }
    }

    fn empty(&self) -> bool {
        self.mutex_q.empty() && self.lockfree_q.empty()
    }

    fn size(&self) -> usize {
        self.mutex_q.size() + self.lockfree_q.size()
    }

    fn capabilities(&self) -> QueueCapabilities {
        match self.active_impl() {
            IMPL_MUTEX => QueueCapabilities::mutex(),
            _ => QueueCapabilities::lock_free(),
        }
    }

    fn stop(&self) {
        self.stopped.store(true, Ordering::Release);
        self.mutex_q.stop();
        self.lockfree_q.stop();
    }

    fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::Acquire)
    }
}

impl Default for AdaptiveQueue {
    fn default() -> Self {
        Self::new()
    }
}
