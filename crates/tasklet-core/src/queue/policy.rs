//! Type-composed queue: synchronisation x bound x overflow
//!
//! `PolicyQueue` is a thin facade over an underlying queue primitive.
//! The sync policy is any [`Scheduler`] (mutex, lock-free, adaptive);
//! the bound policy answers capacity questions; the overflow policy
//! decides what a full queue does with an incoming job.
//!
//! Capacity enforcement sits above the sync primitive, so under heavy
//! concurrency the bound is approximate by one or two elements. Callers
//! needing a hard bound use `MutexQueue::bounded` directly.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use crate::error::{ErrorCode, ErrorInfo, TaskResult};
use crate::job::BoxedJob;
use crate::sched::{QueueCapabilities, Scheduler};

/// Capacity behaviour of a [`PolicyQueue`]
pub trait BoundPolicy: Send + Sync {
    /// Would adding one more element exceed the bound?
    fn is_full(&self, current: usize) -> bool;

    /// Maximum size, `None` when unbounded
    fn max_size(&self) -> Option<usize>;

    /// Informational remaining room
    fn remaining_capacity(&self, current: usize) -> usize {
        match self.max_size() {
            Some(max) => max.saturating_sub(current),
            None => usize::MAX,
        }
    }

    /// Grow the bound (Expand overflow); false when unsupported
    fn expand(&self) -> bool {
        false
    }
}

/// No capacity limit
pub struct Unbounded;

impl BoundPolicy for Unbounded {
    fn is_full(&self, _current: usize) -> bool {
        false
    }

    fn max_size(&self) -> Option<usize> {
        None
    }

    fn expand(&self) -> bool {
        true
    }
}

/// Fixed capacity, growable only through the Expand overflow policy
pub struct Bounded {
    max: AtomicUsize,
}

impl Bounded {
    pub fn new(max: usize) -> Self {
        Self {
            max: AtomicUsize::new(max.max(1)),
        }
    }
}

impl BoundPolicy for Bounded {
    fn is_full(&self, current: usize) -> bool {
        current >= self.max.load(Ordering::Acquire)
    }

    fn max_size(&self) -> Option<usize> {
        Some(self.max.load(Ordering::Acquire))
    }

    fn expand(&self) -> bool {
        let current = self.max.load(Ordering::Acquire);
        // Losing the race means a concurrent expand already made room.
        let _ = self.max.compare_exchange(
            current,
            current.saturating_mul(2),
            Ordering::AcqRel,
            Ordering::Relaxed,
        );
        true
    }
}

/// Optionally bounded: `None` behaves like [`Unbounded`]
pub struct DynamicBounded {
    /// usize::MAX encodes "no bound"
    max: AtomicUsize,
}

impl DynamicBounded {
    pub fn new(max: Option<usize>) -> Self {
        Self {
            max: AtomicUsize::new(max.unwrap_or(usize::MAX).max(1)),
        }
    }

    /// Replace the bound at runtime
    pub fn set_max(&self, max: Option<usize>) {
        self.max
            .store(max.unwrap_or(usize::MAX).max(1), Ordering::Release);
    }
}

impl BoundPolicy for DynamicBounded {
    fn is_full(&self, current: usize) -> bool {
        current >= self.max.load(Ordering::Acquire)
    }

    fn max_size(&self) -> Option<usize> {
        match self.max.load(Ordering::Acquire) {
            usize::MAX => None,
            n => Some(n),
        }
    }

    fn expand(&self) -> bool {
        let current = self.max.load(Ordering::Acquire);
        if current == usize::MAX {
            return true;
        }
        let _ = self.max.compare_exchange(
            current,
            current.saturating_mul(2),
            Ordering::AcqRel,
            Ordering::Relaxed,
        );
        true
    }
}

/// What the overflow policy told the enqueue path to do
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OverflowOutcome {
    /// Room was made (or waited for); push the incoming job
    Proceed,

    /// The incoming job was discarded; report success without pushing
    DroppedIncoming,
}

/// Queue operations visible to an overflow policy
pub trait OverflowOps {
    fn len(&self) -> usize;
    fn bound_is_full(&self, current: usize) -> bool;
    fn is_stopped(&self) -> bool;
    /// Pop and drop the head; false when nothing was dropped
    fn drop_oldest(&self) -> bool;
    /// Grow the bound; false when the bound cannot grow
    fn expand_bound(&self) -> bool;
}

/// Behaviour on enqueue into a full queue
pub trait OverflowPolicy: Send + Sync {
    fn apply(&self, queue: &dyn OverflowOps) -> TaskResult<OverflowOutcome>;
}

/// Fail the enqueue with `QueueFull`
pub struct Reject;

impl OverflowPolicy for Reject {
    fn apply(&self, _queue: &dyn OverflowOps) -> TaskResult<OverflowOutcome> {
        Err(ErrorInfo::new(ErrorCode::QueueFull))
    }
}

/// Wait until space frees up or the queue stops
pub struct Block;

impl OverflowPolicy for Block {
    fn apply(&self, queue: &dyn OverflowOps) -> TaskResult<OverflowOutcome> {
        loop {
            if queue.is_stopped() {
                return Err(ErrorInfo::new(ErrorCode::QueueStopped));
            }
            if !queue.bound_is_full(queue.len()) {
                return Ok(OverflowOutcome::Proceed);
            }
            std::thread::park_timeout(Duration::from_millis(1));
        }
    }
}

/// Drop queued heads until the incoming job fits
pub struct DropOldest;

impl OverflowPolicy for DropOldest {
    fn apply(&self, queue: &dyn OverflowOps) -> TaskResult<OverflowOutcome> {
        while queue.bound_is_full(queue.len()) {
            if !queue.drop_oldest() {
                break;
            }
        }
        Ok(OverflowOutcome::Proceed)
    }
}

/// Silently discard the incoming job
pub struct DropNewest;

impl OverflowPolicy for DropNewest {
    fn apply(&self, _queue: &dyn OverflowOps) -> TaskResult<OverflowOutcome> {
        Ok(OverflowOutcome::DroppedIncoming)
    }
}

/// Grow the bound on demand
pub struct Expand;

impl OverflowPolicy for Expand {
    fn apply(&self, queue: &dyn OverflowOps) -> TaskResult<OverflowOutcome> {
        if queue.expand_bound() {
            Ok(OverflowOutcome::Proceed)
        } else {
            Err(ErrorInfo::with_message(
                ErrorCode::QueueFull,
                "bound cannot expand",
            ))
        }
    }
}

/// Queue composed from sync, bound and overflow policies
pub struct PolicyQueue<S, B, O>
where
    S: Scheduler,
    B: BoundPolicy,
    O: OverflowPolicy,
{
    sync: S,
    bound: B,
    overflow: O,
}

impl<S, B, O> PolicyQueue<S, B, O>
where
    S: Scheduler,
    B: BoundPolicy,
    O: OverflowPolicy,
{
    pub fn new(sync: S, bound: B, overflow: O) -> Self {
        Self {
            sync,
            bound,
            overflow,
        }
    }

    /// Informational remaining room under the bound policy
    pub fn remaining_capacity(&self) -> usize {
        self.bound.remaining_capacity(self.sync.size())
    }

    /// The composed bound policy
    pub fn bound(&self) -> &B {
        &self.bound
    }
}

impl<S, B, O> OverflowOps for PolicyQueue<S, B, O>
where
    S: Scheduler,
    B: BoundPolicy,
    O: OverflowPolicy,
{
    fn len(&self) -> usize {
        self.sync.size()
    }

    fn bound_is_full(&self, current: usize) -> bool {
        self.bound.is_full(current)
    }

    fn is_stopped(&self) -> bool {
        self.sync.is_stopped()
    }

    fn drop_oldest(&self) -> bool {
        self.sync.try_next_job().is_ok()
    }

    fn expand_bound(&self) -> bool {
        self.bound.expand()
    }
}

impl<S, B, O> Scheduler for PolicyQueue<S, B, O>
where
    S: Scheduler,
    B: BoundPolicy,
    O: OverflowPolicy,
{
    fn schedule(&self, job: BoxedJob) -> TaskResult<()> {
        if self.sync.is_stopped() {
            return Err(ErrorInfo::new(ErrorCode::QueueStopped));
        }
        if self.bound.is_full(self.sync.size()) {
            match self.overflow.apply(self)? {
                OverflowOutcome::Proceed => {}
                OverflowOutcome::DroppedIncoming => return Ok(()),
            }
        }
        self.sync.schedule(job)
    }

    fn next_job(&self) -> TaskResult<BoxedJob> {
        self.sync.next_job()
    }

    fn next_job_for(&self, timeout: Duration) -> TaskResult<BoxedJob> {
        self.sync.next_job_for(timeout)
    }

    fn try_next_job(&self) -> TaskResult<BoxedJob> {
        self.sync.try_next_job()
    }

    fn wait_for_work(&self, timeout: Duration) -> bool {
        self.sync.wait_for_work(timeout)
    }

    fn empty(&self) -> bool {
        self.sync.empty()
    }

    fn size(&self) -> usize {
        self.sync.size()
    }

    fn capabilities(&self) -> QueueCapabilities {
        self.sync.capabilities()
    }

    fn stop(&self) {
        self.sync.stop();
    }

    fn is_stopped(&self) -> bool {
        self.sync.is_stopped()
    }
}
