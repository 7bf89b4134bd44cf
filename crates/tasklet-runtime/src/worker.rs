//! Worker threads
//!
//! A worker loops: local deque first (LIFO, cache-warm), then the
//! shared queue, then stealing from peers, then parking on the queue
//! for `wake_interval`. Panics in job bodies are caught at the job
//! boundary and converted to `JobExecutionFailed`; the worker survives.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};

use tasklet_core::cancel::CancelToken;
use tasklet_core::deque::{DequeOwner, DequeStealer, Steal};
use tasklet_core::error::{ErrorCode, ErrorInfo};
use tasklet_core::job::BoxedJob;
use tasklet_core::metrics::MetricsService;
use tasklet_core::sched::Scheduler;

use crate::numa;
use crate::policy::PoolPolicy;
use crate::steal::{VictimSelector, WorkStealingConfig};

/// Observable worker state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum WorkerState {
    Idle = 0,
    Running = 1,
    Stopping = 2,
}

impl From<u8> for WorkerState {
    fn from(v: u8) -> Self {
        match v {
            1 => WorkerState::Running,
            2 => WorkerState::Stopping,
            _ => WorkerState::Idle,
        }
    }
}

/// Counters and control surface shared between a worker thread, its
/// pool and the autoscaler
pub struct WorkerShared {
    id: usize,
    state: AtomicU8,
    busy_ns: AtomicU64,
    idle_ns: AtomicU64,
    executed: AtomicU64,
    last_active_ms: AtomicU64,
    epoch: Instant,
    cancel: CancelToken,
}

impl WorkerShared {
    pub fn new(id: usize, cancel: CancelToken) -> Self {
        Self {
            id,
            state: AtomicU8::new(WorkerState::Idle as u8),
            busy_ns: AtomicU64::new(0),
            idle_ns: AtomicU64::new(0),
            executed: AtomicU64::new(0),
            last_active_ms: AtomicU64::new(0),
            epoch: Instant::now(),
            cancel,
        }
    }

    pub fn id(&self) -> usize {
        self.id
    }

    pub fn state(&self) -> WorkerState {
        WorkerState::from(self.state.load(Ordering::Acquire))
    }

    pub fn cancel_token(&self) -> &CancelToken {
        &self.cancel
    }

    pub fn busy_ns(&self) -> u64 {
        self.busy_ns.load(Ordering::Relaxed)
    }

    pub fn idle_ns(&self) -> u64 {
        self.idle_ns.load(Ordering::Relaxed)
    }

    pub fn executed(&self) -> u64 {
        self.executed.load(Ordering::Relaxed)
    }

    /// Time since this worker last ran a job
    pub fn idle_for(&self) -> Duration {
        let last = self.last_active_ms.load(Ordering::Relaxed);
        let now = self.epoch.elapsed().as_millis() as u64;
        Duration::from_millis(now.saturating_sub(last))
    }

    fn set_state(&self, state: WorkerState) {
        self.state.store(state as u8, Ordering::Release);
    }

    fn mark_active(&self) {
        self.last_active_ms
            .store(self.epoch.elapsed().as_millis() as u64, Ordering::Relaxed);
    }
}

/// Entry in a pool's stealer directory
pub struct StealerEntry {
    pub worker_id: usize,
    pub node: Option<usize>,
    pub stealer: DequeStealer<BoxedJob>,
}

/// Shared, growable directory of stealers (autoscaler appends)
pub type StealerDirectory = Arc<RwLock<Vec<StealerEntry>>>;

/// One worker thread's moving parts
pub struct Worker {
    shared: Arc<WorkerShared>,
    queue: Arc<dyn Scheduler>,
    metrics: Arc<MetricsService>,
    policies: Arc<Vec<Arc<dyn PoolPolicy>>>,
    wake_interval: Duration,
    local: Option<DequeOwner<BoxedJob>>,
    stealers: Option<StealerDirectory>,
    selector: Option<VictimSelector>,
    steal_config: Option<WorkStealingConfig>,
    pin_cpus: Vec<usize>,
}

impl Worker {
    pub fn new(
        shared: Arc<WorkerShared>,
        queue: Arc<dyn Scheduler>,
        metrics: Arc<MetricsService>,
        policies: Arc<Vec<Arc<dyn PoolPolicy>>>,
        wake_interval: Duration,
    ) -> Self {
        Self {
            shared,
            queue,
            metrics,
            policies,
            wake_interval,
            local: None,
            stealers: None,
            selector: None,
            steal_config: None,
            pin_cpus: Vec::new(),
        }
    }

    /// Attach a local deque and the pool's stealer directory
    pub fn with_stealing(
        mut self,
        local: DequeOwner<BoxedJob>,
        stealers: StealerDirectory,
        selector: VictimSelector,
        config: WorkStealingConfig,
    ) -> Self {
        self.local = Some(local);
        self.stealers = Some(stealers);
        self.selector = Some(selector);
        self.steal_config = Some(config);
        self
    }

    /// Pin the worker thread to these CPUs at startup
    pub fn with_pinning(mut self, cpus: Vec<usize>) -> Self {
        self.pin_cpus = cpus;
        self
    }

    pub fn shared(&self) -> Arc<WorkerShared> {
        Arc::clone(&self.shared)
    }

    /// The worker thread body; returns when the pool shuts down or the
    /// worker's cancel token fires
    pub fn run(mut self) {
        if !self.pin_cpus.is_empty() && !numa::pin_current_thread(&self.pin_cpus) {
            log::debug!("worker {} could not pin to {:?}", self.shared.id, self.pin_cpus);
        }
        log::debug!(
            "worker {} starting on cpu {:?}",
            self.shared.id,
            numa::current_cpu()
        );

        loop {
            if self.shared.cancel.is_cancelled() {
                break;
            }

            if let Some(job) = self.local.as_mut().and_then(|d| d.pop()) {
                self.execute(job);
                continue;
            }

            match self.queue.try_next_job() {
                Ok(job) => {
                    self.refill_local();
                    self.execute(job);
                    continue;
                }
                Err(_) if self.queue.is_stopped() => break,
                Err(_) => {}
            }

            if let Some(job) = self.try_steal() {
                self.execute(job);
                continue;
            }

            let idle_start = Instant::now();
            self.shared.set_state(WorkerState::Idle);
            self.queue.wait_for_work(self.wake_interval);
            let idle = idle_start.elapsed();
            self.metrics.record_idle(idle);
            self.shared.idle_ns.fetch_add(idle.as_nanos() as u64, Ordering::Relaxed);
        }

        // Graceful exit runs what is left in the local deque; a
        // cancelled worker drops it instead (futures resolve cancelled).
        if !self.shared.cancel.is_cancelled() {
            while let Some(job) = self.local.as_mut().and_then(|d| d.pop()) {
                self.execute(job);
            }
        }

        self.shared.set_state(WorkerState::Stopping);
        log::debug!("worker {} exiting", self.shared.id);
    }

    /// Move a batch of queued jobs into the local deque so peers have
    /// something to steal and this worker stays off the shared queue
    fn refill_local(&mut self) {
        let batch = match (&self.steal_config, &mut self.local) {
            (Some(config), Some(_)) => config.local_batch,
            _ => return,
        };
        for _ in 0..batch {
            match self.queue.try_next_job() {
                Ok(job) => self.local.as_mut().unwrap().push(job),
                Err(_) => break,
            }
        }
    }

    fn try_steal(&mut self) -> Option<BoxedJob> {
        let config = self.steal_config.as_ref()?;
        let directory = self.stealers.as_ref()?;
        let selector = self.selector.as_mut()?;

        let list = directory.read().unwrap();
        if list.len() < 2 {
            return None;
        }
        let victims: Vec<(usize, Option<usize>)> =
            list.iter().map(|e| (e.worker_id, e.node)).collect();

        for _ in 0..config.max_steal_attempts.max(1) {
            let idx = selector.pick(&victims)?;
            match list[idx].stealer.steal() {
                Steal::Success(job) => {
                    selector.record(idx, true);
                    self.metrics.record_steal(true);
                    return Some(job);
                }
                Steal::Empty | Steal::Retry => {
                    selector.record(idx, false);
                    self.metrics.record_steal(false);
                }
            }
        }
        None
    }

    fn execute(&mut self, job: BoxedJob) {
        execute_job(&self.shared, &self.metrics, &self.policies, job);
    }
}

/// Run one job on the calling worker thread: policy hooks, panic
/// capture, metrics and per-worker accounting. Shared by plain and
/// typed workers.
pub(crate) fn execute_job(
    shared: &WorkerShared,
    metrics: &MetricsService,
    policies: &[Arc<dyn PoolPolicy>],
    mut job: BoxedJob,
) {
    shared.set_state(WorkerState::Running);
    shared.mark_active();

    let wait = job
        .enqueued_at()
        .map(|t| t.elapsed())
        .unwrap_or(Duration::ZERO);

    for policy in policies.iter() {
        policy.on_job_start(&*job);
    }

    let start = Instant::now();
    let outcome = catch_unwind(AssertUnwindSafe(|| job.execute()));
    let duration = start.elapsed();

    let result = match outcome {
        Ok(result) => result,
        Err(panic) => Err(ErrorInfo::with_message(
            ErrorCode::JobExecutionFailed,
            format!("panic in job body: {}", panic_message(&panic)),
        )),
    };

    let success = result.is_ok();
    if let Err(err) = &result {
        log::debug!("worker {}: job {} failed: {}", shared.id, job.name(), err);
        job.on_error(err);
    }

    for policy in policies.iter() {
        policy.on_job_complete(&*job, success, result.as_ref().err());
    }

    metrics.record_executed(success, duration, wait);
    shared
        .busy_ns
        .fetch_add(duration.as_nanos() as u64, Ordering::Relaxed);
    shared.executed.fetch_add(1, Ordering::Relaxed);
    shared.set_state(WorkerState::Idle);
}

pub(crate) fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "opaque panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::thread;
    use tasklet_core::deque;
    use tasklet_core::job::CallbackJob;
    use tasklet_core::metrics::MetricsLevel;
    use tasklet_core::queue::MutexQueue;
    use crate::steal::StealPolicy;

    fn harness(queue: Arc<dyn Scheduler>) -> (Worker, Arc<WorkerShared>) {
        let shared = Arc::new(WorkerShared::new(0, CancelToken::new()));
        let worker = Worker::new(
            Arc::clone(&shared),
            queue,
            Arc::new(MetricsService::new(MetricsLevel::Basic)),
            Arc::new(Vec::new()),
            Duration::from_millis(10),
        );
        (worker, shared)
    }

    #[test]
    fn test_worker_drains_queue_then_exits_on_stop() {
        let queue = Arc::new(MutexQueue::unbounded());
        let counter = Arc::new(AtomicUsize::new(0));
        for _ in 0..50 {
            let c = Arc::clone(&counter);
            queue
                .schedule(Box::new(CallbackJob::new(move || {
                    c.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                })))
                .unwrap();
        }
        queue.stop();

        let (worker, shared) = harness(queue);
        let handle = thread::spawn(move || worker.run());
        handle.join().unwrap();

        assert_eq!(counter.load(Ordering::SeqCst), 50);
        assert_eq!(shared.executed(), 50);
        assert_eq!(shared.state(), WorkerState::Stopping);
    }

    #[test]
    fn test_worker_survives_panicking_job() {
        let queue = Arc::new(MutexQueue::unbounded());
        queue
            .schedule(Box::new(CallbackJob::new(|| panic!("deliberate"))))
            .unwrap();
        let ran_after = Arc::new(AtomicUsize::new(0));
        let r = Arc::clone(&ran_after);
        queue
            .schedule(Box::new(CallbackJob::new(move || {
                r.fetch_add(1, Ordering::SeqCst);
                Ok(())
            })))
            .unwrap();
        queue.stop();

        let metrics = Arc::new(MetricsService::new(MetricsLevel::Basic));
        let shared = Arc::new(WorkerShared::new(0, CancelToken::new()));
        let worker = Worker::new(
            Arc::clone(&shared),
            queue,
            Arc::clone(&metrics),
            Arc::new(Vec::new()),
            Duration::from_millis(10),
        );
        thread::spawn(move || worker.run()).join().unwrap();

        // The panic was recorded as a failure and the next job still ran.
        assert_eq!(ran_after.load(Ordering::SeqCst), 1);
        assert_eq!(metrics.tasks_executed(), 2);
        assert_eq!(metrics.tasks_failed(), 1);
    }

    #[test]
    fn test_cancelled_worker_stops_promptly() {
        let queue = Arc::new(MutexQueue::unbounded());
        let (worker, shared) = harness(queue);
        shared.cancel_token().cancel();

        let start = Instant::now();
        thread::spawn(move || worker.run()).join().unwrap();
        assert!(start.elapsed() < Duration::from_secs(1));
    }

    #[test]
    fn test_stealing_between_two_workers() {
        // Load worker A's deque with every job; worker B only steals.
        // B must end up with a real share of the work, and together they
        // must execute everything exactly once.
        const JOBS: usize = 1_000;

        let queue: Arc<dyn Scheduler> = Arc::new(MutexQueue::unbounded());
        let metrics = Arc::new(MetricsService::new(MetricsLevel::Basic));
        let policies: Arc<Vec<Arc<dyn PoolPolicy>>> = Arc::new(Vec::new());
        let directory: StealerDirectory = Arc::new(RwLock::new(Vec::new()));
        let executed = Arc::new(AtomicUsize::new(0));

        let (mut owner_a, _) = deque::deque::<BoxedJob>();
        let (owner_b, _) = deque::deque::<BoxedJob>();
        directory.write().unwrap().push(StealerEntry {
            worker_id: 0,
            node: None,
            stealer: owner_a.stealer(),
        });
        directory.write().unwrap().push(StealerEntry {
            worker_id: 1,
            node: None,
            stealer: owner_b.stealer(),
        });

        for _ in 0..JOBS {
            let c = Arc::clone(&executed);
            owner_a.push(Box::new(CallbackJob::new(move || {
                c.fetch_add(1, Ordering::SeqCst);
                // Enough work per job that the thief gets a fair shot.
                thread::sleep(Duration::from_micros(50));
                Ok(())
            })));
        }

        let config = WorkStealingConfig::new(StealPolicy::Random).max_steal_attempts(8);
        let mut workers = Vec::new();
        let mut shares = Vec::new();
        for (id, owner) in [(0usize, owner_a), (1usize, owner_b)] {
            let shared = Arc::new(WorkerShared::new(id, CancelToken::new()));
            shares.push(Arc::clone(&shared));
            let selector = VictimSelector::new(StealPolicy::Random, id, None, None);
            let worker = Worker::new(
                Arc::clone(&shared),
                Arc::clone(&queue),
                Arc::clone(&metrics),
                Arc::clone(&policies),
                Duration::from_millis(1),
            )
            .with_stealing(owner, Arc::clone(&directory), selector, config.clone());
            workers.push(thread::spawn(move || worker.run()));
        }

        // Wait for completion, then release the workers.
        let deadline = Instant::now() + Duration::from_secs(30);
        while executed.load(Ordering::SeqCst) < JOBS {
            assert!(Instant::now() < deadline, "stealing test stalled");
            thread::sleep(Duration::from_millis(5));
        }
        queue.stop();
        for w in workers {
            w.join().unwrap();
        }

        let a = shares[0].executed() as usize;
        let b = shares[1].executed() as usize;
        assert_eq!(a + b, JOBS);
        assert!(b * 10 > JOBS, "thief executed too little: {}", b);
        assert!(b * 10 < JOBS * 9, "thief executed too much: {}", b);
        assert!(metrics.snapshot().steal_successes > 0);
    }
}
