//! Lock-free MPMC job queue (Michael-Scott algorithm)
//!
//! Singly linked list with atomic `head`/`tail` and a permanent dummy
//! node. Reclamation goes through the hazard-pointer domain, which also
//! rules out ABA: an address a thread has protected cannot be freed and
//! therefore cannot be recycled under it.
//!
//! Invariants:
//! - head is reachable from itself along `next` links up to tail
//! - the dummy node is always at head
//! - a dequeued node's payload is moved out before the node is retired
//! - retired nodes are freed only after a scan proves no hazard holds them
//!
//! Per-producer FIFO holds; there is no global order across producers.
//! `size()` is an approximate counter.

use std::cell::UnsafeCell;
use std::sync::atomic::{AtomicBool, AtomicPtr, AtomicUsize, Ordering};
use std::sync::{Condvar, Mutex};
use std::time::{Duration, Instant};

use crate::error::{ErrorCode, ErrorInfo, TaskResult};
use crate::hazard::HazardDomain;
use crate::job::BoxedJob;
use crate::sched::{QueueCapabilities, Scheduler};

struct Node {
    data: UnsafeCell<Option<BoxedJob>>,
    next: AtomicPtr<Node>,
}

impl Node {
    fn new(job: Option<BoxedJob>) -> *mut Node {
        Box::into_raw(Box::new(Node {
            data: UnsafeCell::new(job),
            next: AtomicPtr::new(std::ptr::null_mut()),
        }))
    }
}

// Safety: payloads are Send; node pointers are only dereferenced under
// hazard protection or exclusive ownership.
unsafe impl Send for Node {}
unsafe impl Sync for Node {}

/// Michael-Scott queue with hazard-pointer reclamation
pub struct LockFreeQueue {
    head: AtomicPtr<Node>,
    tail: AtomicPtr<Node>,

    /// Approximate element count
    len: AtomicUsize,

    stopped: AtomicBool,

    /// Blocking-dequeue support: consumers park here, producers only
    /// take the lock when a sleeper is registered.
    sleep_lock: Mutex<()>,
    sleep_cv: Condvar,
    sleepers: AtomicUsize,
}

impl LockFreeQueue {
    pub fn new() -> Self {
        let dummy = Node::new(None);
        Self {
            head: AtomicPtr::new(dummy),
            tail: AtomicPtr::new(dummy),
            len: AtomicUsize::new(0),
            stopped: AtomicBool::new(false),
            sleep_lock: Mutex::new(()),
            sleep_cv: Condvar::new(),
            sleepers: AtomicUsize::new(0),
        }
    }

    fn wake_one(&self) {
        if self.sleepers.load(Ordering::Acquire) > 0 {
            let _guard = self.sleep_lock.lock().unwrap();
            self.sleep_cv.notify_one();
        }
    }

    fn wake_all(&self) {
        let _guard = self.sleep_lock.lock().unwrap();
        self.sleep_cv.notify_all();
    }

    fn enqueue_node(&self, mut job: BoxedJob) -> TaskResult<()> {
        job.mark_enqueued(Instant::now());
        let node = Node::new(Some(job));
        let domain = HazardDomain::global();
        let guard = match domain.acquire() {
            Ok(g) => g,
            Err(e) => {
                // Back out: the node was never published.
                drop(unsafe { Box::from_raw(node) });
                return Err(e);
            }
        };

        loop {
            let tail = guard.protect(&self.tail);
            // Safety: tail is protected and queue nodes are only freed
            // after a hazard scan.
            let next = unsafe { (*tail).next.load(Ordering::Acquire) };
            if tail != self.tail.load(Ordering::Acquire) {
                continue;
            }
            if next.is_null() {
                if unsafe {
                    (*tail)
                        .next
                        .compare_exchange(
                            std::ptr::null_mut(),
                            node,
                            Ordering::AcqRel,
                            Ordering::Acquire,
                        )
                        .is_ok()
                } {
                    // Swing tail; losing this CAS just means someone helped.
                    let _ = self.tail.compare_exchange(
                        tail,
                        node,
                        Ordering::AcqRel,
                        Ordering::Relaxed,
                    );
                    break;
                }
            } else {
                // Tail is lagging; help advance it.
                let _ = self.tail.compare_exchange(
                    tail,
                    next,
                    Ordering::AcqRel,
                    Ordering::Relaxed,
                );
            }
        }

        self.len.fetch_add(1, Ordering::Relaxed);
        self.wake_one();
        Ok(())
    }

    fn dequeue_node(&self) -> TaskResult<Option<BoxedJob>> {
        let domain = HazardDomain::global();
        let head_guard = domain.acquire()?;
        let next_guard = domain.acquire()?;

        loop {
            let head = head_guard.protect(&self.head);
            let tail = self.tail.load(Ordering::Acquire);
            // Safety: head is protected.
            let next = next_guard.protect(unsafe { &(*head).next });
            if head != self.head.load(Ordering::SeqCst) {
                continue;
            }
            if head == tail {
                if next.is_null() {
                    return Ok(None);
                }
                // Tail lagging behind a completed enqueue; help it along.
                let _ = self.tail.compare_exchange(
                    tail,
                    next,
                    Ordering::AcqRel,
                    Ordering::Relaxed,
                );
                continue;
            }
            if next.is_null() {
                // head != tail with no successor is a transient view;
                // retry from the top.
                continue;
            }
            if self
                .head
                .compare_exchange(head, next, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
            {
                // Safety: we won the swing; `next` is the new dummy and
                // its payload belongs to us alone. Move it out before the
                // old dummy is retired.
                let job = unsafe { (*(*next).data.get()).take() };
                head_guard.clear();
                next_guard.clear();
                // Safety: head is unlinked and retired exactly once.
                unsafe { domain.retire(head) };
                self.len.fetch_sub(1, Ordering::Relaxed);
                return Ok(job);
            }
        }
    }
}

impl Scheduler for LockFreeQueue {
    fn schedule(&self, job: BoxedJob) -> TaskResult<()> {
        if self.stopped.load(Ordering::Acquire) {
            return Err(ErrorInfo::new(ErrorCode::QueueStopped));
        }
        self.enqueue_node(job)
    }

    fn next_job(&self) -> TaskResult<BoxedJob> {
        loop {
            if let Some(job) = self.dequeue_node()? {
                return Ok(job);
            }
            if self.stopped.load(Ordering::Acquire) {
                return Err(ErrorInfo::new(ErrorCode::QueueEmpty));
            }
            self.sleepers.fetch_add(1, Ordering::AcqRel);
            let guard = self.sleep_lock.lock().unwrap();
            // Re-check with the sleeper registered so a concurrent
            // enqueue cannot slip between check and wait.
            if self.len.load(Ordering::Acquire) == 0 && !self.stopped.load(Ordering::Acquire) {
                let _ = self
                    .sleep_cv
                    .wait_timeout(guard, Duration::from_millis(10))
                    .unwrap();
            }
            self.sleepers.fetch_sub(1, Ordering::AcqRel);
        }
    }

    fn next_job_for(&self, timeout: Duration) -> TaskResult<BoxedJob> {
        let deadline = Instant::now() + timeout;
        loop {
            if let Some(job) = self.dequeue_node()? {
                return Ok(job);
            }
            if self.stopped.load(Ordering::Acquire) {
                return Err(ErrorInfo::new(ErrorCode::QueueEmpty));
            }
            let now = Instant::now();
            if now >= deadline {
                return Err(ErrorInfo::new(ErrorCode::QueueEmpty));
            }
            let slice = (deadline - now).min(Duration::from_millis(10));
            self.sleepers.fetch_add(1, Ordering::AcqRel);
            let guard = self.sleep_lock.lock().unwrap();
            if self.len.load(Ordering::Acquire) == 0 && !self.stopped.load(Ordering::Acquire) {
                let _ = self.sleep_cv.wait_timeout(guard, slice).unwrap();
            }
            self.sleepers.fetch_sub(1, Ordering::AcqRel);
        }
    }

    fn try_next_job(&self) -> TaskResult<BoxedJob> {
        match self.dequeue_node()? {
            Some(job) => Ok(job),
            None => Err(ErrorInfo::new(ErrorCode::QueueEmpty)),
        }
    }

    fn wait_for_work(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        loop {
            if self.len.load(Ordering::Acquire) > 0 {
                return true;
            }
            if self.stopped.load(Ordering::Acquire) {
                return false;
            }
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            let slice = (deadline - now).min(Duration::from_millis(10));
            self.sleepers.fetch_add(1, Ordering::AcqRel);
            let guard = self.sleep_lock.lock().unwrap();
            if self.len.load(Ordering::Acquire) == 0 && !self.stopped.load(Ordering::Acquire) {
                let _ = self.sleep_cv.wait_timeout(guard, slice).unwrap();
            }
            self.sleepers.fetch_sub(1, Ordering::AcqRel);
        }
    }

    fn empty(&self) -> bool {
        self.len.load(Ordering::Acquire) == 0
    }

    fn size(&self) -> usize {
        self.len.load(Ordering::Acquire)
    }

    fn capabilities(&self) -> QueueCapabilities {
        QueueCapabilities::lock_free()
    }

    fn stop(&self) {
        self.stopped.store(true, Ordering::Release);
        self.wake_all();
    }

    fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::Acquire)
    }
}

impl Default for LockFreeQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for LockFreeQueue {
    fn drop(&mut self) {
        // Exclusive access: free the chain directly, dummy included.
        let mut node = *self.head.get_mut();
        while !node.is_null() {
            let boxed = unsafe { Box::from_raw(node) };
            node = boxed.next.load(Ordering::Relaxed);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::CallbackJob;
    use std::collections::HashSet;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Arc;
    use std::thread;

    fn noop_job() -> BoxedJob {
        Box::new(CallbackJob::new(|| Ok(())))
    }

    #[test]
    fn test_single_thread_fifo() {
        let queue = LockFreeQueue::new();
        let mut ids = Vec::new();
        for _ in 0..50 {
            let job = noop_job();
            ids.push(job.id());
            queue.schedule(job).unwrap();
        }

        let mut dequeued = Vec::new();
        while let Ok(job) = queue.try_next_job() {
            dequeued.push(job.id());
        }
        assert_eq!(ids, dequeued);
        assert!(queue.empty());
    }

    #[test]
    fn test_empty_dequeue() {
        let queue = LockFreeQueue::new();
        assert_eq!(queue.try_next_job().unwrap_err().code(), ErrorCode::QueueEmpty);
    }

    #[test]
    fn test_enqueue_after_stop_fails() {
        let queue = LockFreeQueue::new();
        queue.stop();
        assert_eq!(queue.schedule(noop_job()).unwrap_err().code(), ErrorCode::QueueStopped);
    }

    #[test]
    fn test_stop_wakes_blocked_consumer() {
        let queue = Arc::new(LockFreeQueue::new());
        let q = Arc::clone(&queue);
        let consumer = thread::spawn(move || q.next_job().err().map(|e| e.code()));

        thread::sleep(Duration::from_millis(30));
        queue.stop();
        assert_eq!(consumer.join().unwrap(), Some(ErrorCode::QueueEmpty));
    }

    #[test]
    fn test_mpmc_conservation() {
        // Every enqueued job is dequeued exactly once, none invented.
        const PRODUCERS: usize = 4;
        const CONSUMERS: usize = 4;
        const PER_PRODUCER: usize = 2_000;

        let queue = Arc::new(LockFreeQueue::new());
        let seen = Arc::new(Mutex::new(HashSet::new()));

        let mut handles = Vec::new();
        let mut all_ids = Arc::new(Mutex::new(HashSet::new()));
        for _ in 0..PRODUCERS {
            let q = Arc::clone(&queue);
            let ids = Arc::clone(&all_ids);
            handles.push(thread::spawn(move || {
                for _ in 0..PER_PRODUCER {
                    let job = noop_job();
                    ids.lock().unwrap().insert(job.id());
                    q.schedule(job).unwrap();
                }
            }));
        }
        for _ in 0..CONSUMERS {
            let q = Arc::clone(&queue);
            let seen = Arc::clone(&seen);
            handles.push(thread::spawn(move || loop {
                match q.next_job() {
                    Ok(job) => {
                        assert!(seen.lock().unwrap().insert(job.id()), "job dequeued twice");
                    }
                    Err(_) => break,
                }
            }));
        }

        // Wait for the producers, then let consumers drain and stop.
        for h in handles.drain(..PRODUCERS) {
            h.join().unwrap();
        }
        while !queue.empty() {
            thread::sleep(Duration::from_millis(5));
        }
        queue.stop();
        for h in handles {
            h.join().unwrap();
        }

        let all = Arc::get_mut(&mut all_ids).unwrap().get_mut().unwrap();
        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), PRODUCERS * PER_PRODUCER);
        assert_eq!(*all, *seen); // no phantom jobs
        HazardDomain::global().scan();
    }

    #[test]
    fn test_per_producer_fifo() {
        let queue = Arc::new(LockFreeQueue::new());

        // One producer tags jobs with a sequence; a competing producer
        // adds noise. The tagged sequence must come out in order.
        let order = Arc::new(Mutex::new(Vec::new()));
        let q = Arc::clone(&queue);
        let producer = thread::spawn(move || {
            for i in 0..1_000u64 {
                let job = crate::job::JobBuilder::new()
                    .name(format!("seq-{}", i))
                    .work(|| Ok(()))
                    .build();
                q.schedule(Box::new(job)).unwrap();
            }
        });
        let q = Arc::clone(&queue);
        let noise = thread::spawn(move || {
            for _ in 0..1_000 {
                q.schedule(noop_job()).unwrap();
            }
        });
        producer.join().unwrap();
        noise.join().unwrap();

        while let Ok(job) = queue.try_next_job() {
            let name = job.name().to_string();
            if let Some(seq) = name.strip_prefix("seq-") {
                order.lock().unwrap().push(seq.parse::<u64>().unwrap());
            }
        }
        let order = order.lock().unwrap();
        assert_eq!(order.len(), 1_000);
        assert!(order.windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn test_blocking_dequeue_gets_late_enqueue() {
        let queue = Arc::new(LockFreeQueue::new());
        let q = Arc::clone(&queue);
        let consumer = thread::spawn(move || q.next_job().map(|j| j.id()));

        thread::sleep(Duration::from_millis(30));
        let job = noop_job();
        let id = job.id();
        queue.schedule(job).unwrap();
        assert_eq!(consumer.join().unwrap().unwrap(), id);
    }

    #[test]
    fn test_size_is_tracked() {
        let queue = LockFreeQueue::new();
        for _ in 0..10 {
            queue.schedule(noop_job()).unwrap();
        }
        assert_eq!(queue.size(), 10);
        queue.try_next_job().unwrap();
        assert_eq!(queue.size(), 9);
    }

    #[test]
    fn test_drop_frees_remaining_jobs() {
        let drops = Arc::new(AtomicUsize::new(0));
        {
            let queue = LockFreeQueue::new();
            for _ in 0..5 {
                let d = Arc::clone(&drops);
                struct Probe(Arc<AtomicUsize>);
                impl Drop for Probe {
                    fn drop(&mut self) {
                        self.0.fetch_add(1, Ordering::SeqCst);
                    }
                }
                let probe = Probe(d);
                queue
                    .schedule(Box::new(CallbackJob::new(move || {
                        let _keep = &probe;
                        Ok(())
                    })))
                    .unwrap();
            }
        }
        assert_eq!(drops.load(Ordering::SeqCst), 5);
    }
}
