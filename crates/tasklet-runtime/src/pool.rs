//! Worker pool
//!
//! Owns the queue, the workers and the policy chain. Lifecycle:
//! `Created --start()--> Running --stop()--> Stopping --> Stopped`.
//! `stop()` is idempotent and safe under concurrent callers; one winner
//! performs the transition, the rest observe it complete.
//!
//! Shutdown ordering: mark Stopping, (immediate only: clear the queue,
//! cancel workers), stop the queue to unblock dequeuers, join worker
//! threads, run policy shutdown hooks, mark Stopped.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU8, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::thread;
use std::time::{Duration, Instant};

use tasklet_core::cancel::CancelToken;
use tasklet_core::deque;
use tasklet_core::error::{ErrorCode, ErrorInfo, TaskResult};
use tasklet_core::future::{future_pair, when_all, when_any, JobFuture, Promise};
use tasklet_core::job::{BoxedJob, Job, JobBuilder, JobType};
use tasklet_core::metrics::{MetricsService, MetricsSnapshot};
use tasklet_core::queue::{AdaptiveQueue, LockFreeQueue, MutexQueue};
use tasklet_core::retry::RetryPolicy;
use tasklet_core::sched::Scheduler;

use crate::autoscale::{Autoscaler, AutoscalerConfig, ScalingDecision};
use crate::builder::PoolBuilder;
use crate::config::{PoolConfig, QueueKind};
use crate::numa::NumaTopology;
use crate::policy::{run_on_enqueue, PoolPolicy};
use crate::steal::{VictimSelector, WorkStealingConfig};
use crate::worker::{StealerDirectory, StealerEntry, Worker, WorkerShared};

/// Pool lifecycle states
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum PoolState {
    Created = 0,
    Running = 1,
    Stopping = 2,
    Stopped = 3,
}

impl From<u8> for PoolState {
    fn from(v: u8) -> Self {
        match v {
            1 => PoolState::Running,
            2 => PoolState::Stopping,
            3 => PoolState::Stopped,
            _ => PoolState::Created,
        }
    }
}

/// Per-submission options
#[derive(Debug, Clone, Default)]
pub struct SubmitOptions {
    /// Diagnostic job name
    pub name: Option<String>,

    /// Batch submissions: block until every job finishes
    pub wait_all: bool,

    /// Batch submissions: block until the first job finishes
    pub wait_any: bool,
}

impl SubmitOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Name the submitted job
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            ..Self::default()
        }
    }

    /// Batch variant that blocks for every result
    pub fn all() -> Self {
        Self {
            wait_all: true,
            ..Self::default()
        }
    }

    /// Batch variant that blocks for the first result
    pub fn any() -> Self {
        Self {
            wait_any: true,
            ..Self::default()
        }
    }
}

pub(crate) struct WorkerHandle {
    pub(crate) shared: Arc<WorkerShared>,
    pub(crate) thread: Option<thread::JoinHandle<()>>,
}

/// Shared pool internals; workers and the autoscaler hold this
pub(crate) struct PoolCore {
    pub(crate) name: String,
    pub(crate) config: PoolConfig,
    pub(crate) queue: Arc<dyn Scheduler>,
    pub(crate) metrics: Arc<MetricsService>,
    pub(crate) policies: Arc<Vec<Arc<dyn PoolPolicy>>>,
    pub(crate) state: AtomicU8,
    pub(crate) workers: Mutex<Vec<WorkerHandle>>,
    pub(crate) stealers: StealerDirectory,
    pub(crate) steal_config: Option<WorkStealingConfig>,
    pub(crate) topology: Option<Arc<NumaTopology>>,
    next_worker_id: AtomicUsize,
    desired_workers: AtomicUsize,
}

impl PoolCore {
    pub(crate) fn state(&self) -> PoolState {
        PoolState::from(self.state.load(Ordering::Acquire))
    }

    /// Workers whose cancel token has not fired
    pub(crate) fn alive_workers(&self) -> usize {
        self.workers
            .lock()
            .unwrap()
            .iter()
            .filter(|w| !w.shared.cancel_token().is_cancelled())
            .count()
    }

    /// Spawn one worker thread and register it
    pub(crate) fn spawn_worker(self: &Arc<Self>) -> TaskResult<usize> {
        let id = self.next_worker_id.fetch_add(1, Ordering::AcqRel);
        let cancel = CancelToken::new();
        let shared = Arc::new(WorkerShared::new(id, cancel));

        let mut worker = Worker::new(
            Arc::clone(&shared),
            Arc::clone(&self.queue),
            Arc::clone(&self.metrics),
            Arc::clone(&self.policies),
            self.config.wake_interval,
        );

        let node = self
            .topology
            .as_ref()
            .map(|topology| topology.node_for_worker(id));

        if let Some(steal_config) = &self.steal_config {
            let (owner, stealer) = deque::deque::<BoxedJob>();
            self.stealers.write().unwrap().push(StealerEntry {
                worker_id: id,
                node,
                stealer,
            });
            let selector = VictimSelector::new(
                steal_config.policy,
                id,
                self.topology.clone(),
                node,
            );
            worker = worker.with_stealing(
                owner,
                Arc::clone(&self.stealers),
                selector,
                steal_config.clone(),
            );
        }

        if let (Some(topology), Some(node)) = (self.topology.as_ref(), node) {
            worker = worker.with_pinning(topology.cpus_for_node(node).to_vec());
        }

        let handle = thread::Builder::new()
            .name(format!("{}-worker-{}", self.name, id))
            .spawn(move || worker.run())
            .map_err(|e| {
                ErrorInfo::with_message(ErrorCode::InvalidArgument, "failed to spawn worker")
                    .with_source(e)
            })?;

        self.workers.lock().unwrap().push(WorkerHandle {
            shared,
            thread: Some(handle),
        });
        Ok(id)
    }

    /// Ask the `n` longest-idle workers to retire
    pub(crate) fn retire_workers(&self, n: usize) -> usize {
        let workers = self.workers.lock().unwrap();
        let mut candidates: Vec<&WorkerHandle> = workers
            .iter()
            .filter(|w| !w.shared.cancel_token().is_cancelled())
            .collect();
        candidates.sort_by_key(|w| std::cmp::Reverse(w.shared.idle_for()));

        let mut retired = 0;
        for handle in candidates.into_iter().take(n) {
            handle.shared.cancel_token().cancel();
            retired += 1;
        }
        // Cancelled workers notice at their next wake interval.
        retired
    }

    /// Pop and drop every queued job; their futures resolve cancelled
    pub(crate) fn drain_queue(&self) -> usize {
        let mut dropped = 0;
        while self.queue.try_next_job().is_ok() {
            dropped += 1;
        }
        dropped
    }
}

/// Task-execution pool
///
/// ```ignore
/// let pool = Pool::builder("encoder").workers(4).build_and_start()?;
/// let future = pool.submit(|| Ok(2 + 2), SubmitOptions::default())?;
/// assert_eq!(future.get()?, 4);
/// pool.stop(false)?;
/// ```
pub struct Pool {
    core: Arc<PoolCore>,
    autoscaler_config: Option<AutoscalerConfig>,
    autoscaler: Mutex<Option<Autoscaler>>,
}

impl Pool {
    /// Builder entry point
    pub fn builder(name: impl Into<String>) -> PoolBuilder {
        PoolBuilder::new(name)
    }

    /// Pool with default configuration (not started)
    pub fn new(name: impl Into<String>) -> Self {
        Self::builder(name).build()
    }

    pub(crate) fn from_parts(
        name: String,
        config: PoolConfig,
        queue: Arc<dyn Scheduler>,
        policies: Vec<Arc<dyn PoolPolicy>>,
        steal_config: Option<WorkStealingConfig>,
        topology: Option<Arc<NumaTopology>>,
        autoscaler_config: Option<AutoscalerConfig>,
    ) -> Self {
        let metrics = Arc::new(MetricsService::new(config.metrics_level));
        let desired = config.effective_workers();
        Self {
            core: Arc::new(PoolCore {
                name,
                config,
                queue,
                metrics,
                policies: Arc::new(policies),
                state: AtomicU8::new(PoolState::Created as u8),
                workers: Mutex::new(Vec::new()),
                stealers: Arc::new(RwLock::new(Vec::new())),
                steal_config,
                topology,
                next_worker_id: AtomicUsize::new(0),
                desired_workers: AtomicUsize::new(desired),
            }),
            autoscaler_config,
            autoscaler: Mutex::new(None),
        }
    }

    pub fn name(&self) -> &str {
        &self.core.name
    }

    pub fn state(&self) -> PoolState {
        self.core.state()
    }

    /// Change the initial worker count; only meaningful before `start`
    pub fn set_worker_count(&self, n: usize) {
        self.core.desired_workers.store(n, Ordering::Release);
    }

    /// Workers currently alive
    pub fn worker_count(&self) -> usize {
        self.core.alive_workers()
    }

    /// Jobs waiting in the queue (approximate for lock-free queues)
    pub fn queue_size(&self) -> usize {
        self.core.queue.size()
    }

    pub fn metrics(&self) -> &Arc<MetricsService> {
        &self.core.metrics
    }

    pub fn metrics_snapshot(&self) -> MetricsSnapshot {
        self.core.metrics.snapshot()
    }

    pub fn tasks_executed(&self) -> u64 {
        self.core.metrics.tasks_executed()
    }

    pub fn tasks_failed(&self) -> u64 {
        self.core.metrics.tasks_failed()
    }

    /// Start the workers. Errors: `NoWorkers`, `AlreadyRunning`.
    pub fn start(&self) -> TaskResult<()> {
        self.core.config.validate()?;
        let workers = self.core.desired_workers.load(Ordering::Acquire);
        if workers == 0 {
            return Err(ErrorInfo::with_message(
                ErrorCode::NoWorkers,
                "pool has no workers configured",
            ));
        }
        if self
            .core
            .state
            .compare_exchange(
                PoolState::Created as u8,
                PoolState::Running as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_err()
        {
            return Err(ErrorInfo::with_message(
                ErrorCode::AlreadyRunning,
                format!("pool {} is not in the created state", self.core.name),
            ));
        }

        log::debug!("pool {} starting {} workers", self.core.name, workers);
        for _ in 0..workers {
            self.core.spawn_worker()?;
        }

        if let Some(config) = &self.autoscaler_config {
            let scaler = Autoscaler::start(Arc::clone(&self.core), config.clone());
            *self.autoscaler.lock().unwrap() = Some(scaler);
        }
        Ok(())
    }

    /// Ask the attached autoscaler what it would decide right now
    ///
    /// Synchronous companion to the background sampler; the decision is
    /// returned, not applied. `None` when the pool has no autoscaler or
    /// it has already been stopped.
    pub fn evaluate_autoscaler_now(&self) -> Option<ScalingDecision> {
        self.autoscaler
            .lock()
            .unwrap()
            .as_ref()
            .map(|scaler| scaler.evaluate_now())
    }

    /// Submit a closure; the returned future resolves to its result
    pub fn submit<T, F>(&self, work: F, opts: SubmitOptions) -> TaskResult<JobFuture<T>>
    where
        T: Send + 'static,
        F: FnOnce() -> TaskResult<T> + Send + 'static,
    {
        self.submit_inner(work, opts, None, None)
    }

    /// Submit with an explicit priority (typed queues honor it)
    pub fn submit_with_priority<T, F>(
        &self,
        work: F,
        priority: JobType,
        opts: SubmitOptions,
    ) -> TaskResult<JobFuture<T>>
    where
        T: Send + 'static,
        F: FnOnce() -> TaskResult<T> + Send + 'static,
    {
        self.submit_inner(work, opts, Some(priority), None)
    }

    /// Submit with a retry policy; the future sees the final attempt
    pub fn submit_with_retry<T, F>(
        &self,
        work: F,
        retry: RetryPolicy,
        opts: SubmitOptions,
    ) -> TaskResult<JobFuture<T>>
    where
        T: Send + 'static,
        F: FnMut() -> TaskResult<T> + Send + 'static,
    {
        self.submit_retryable(work, opts, None, Some(retry))
    }

    fn submit_inner<T, F>(
        &self,
        work: F,
        opts: SubmitOptions,
        priority: Option<JobType>,
        retry: Option<RetryPolicy>,
    ) -> TaskResult<JobFuture<T>>
    where
        T: Send + 'static,
        F: FnOnce() -> TaskResult<T> + Send + 'static,
    {
        let mut cell = Some(work);
        self.submit_retryable(
            move || {
                let work = cell.take().ok_or_else(|| {
                    ErrorInfo::with_message(ErrorCode::InvalidArgument, "job already executed")
                })?;
                work()
            },
            opts,
            priority,
            retry,
        )
    }

    fn submit_retryable<T, F>(
        &self,
        work: F,
        opts: SubmitOptions,
        priority: Option<JobType>,
        retry: Option<RetryPolicy>,
    ) -> TaskResult<JobFuture<T>>
    where
        T: Send + 'static,
        F: FnMut() -> TaskResult<T> + Send + 'static,
    {
        if self.state() != PoolState::Running {
            return Err(ErrorInfo::with_message(
                ErrorCode::QueueStopped,
                format!("pool {} is not running", self.core.name),
            ));
        }

        let (job, future) = wrap_future_job(work, opts.name, priority, retry);
        self.submit_boxed(job)?;
        Ok(future)
    }

    /// Submit a pre-built job object; the future resolves with `()`
    pub fn submit_job(&self, job: BoxedJob) -> TaskResult<JobFuture<()>> {
        if self.state() != PoolState::Running {
            return Err(ErrorInfo::with_message(
                ErrorCode::QueueStopped,
                format!("pool {} is not running", self.core.name),
            ));
        }
        let token = job
            .cancel_token()
            .cloned()
            .unwrap_or_else(CancelToken::new);
        let (promise, future) = future_pair::<()>(token);
        let job: BoxedJob = Box::new(FutureJob {
            inner: job,
            promise: Some(promise),
        });
        self.submit_boxed(job)?;
        Ok(future)
    }

    fn submit_boxed(&self, job: BoxedJob) -> TaskResult<()> {
        run_on_enqueue(&self.core.policies, &*job)?;
        self.core.queue.schedule(job)?;
        self.core.metrics.record_submitted(1);
        Ok(())
    }

    /// Submit a batch of closures, returning one future per job
    pub fn submit_batch<T, F>(
        &self,
        works: Vec<F>,
        opts: SubmitOptions,
    ) -> TaskResult<Vec<JobFuture<T>>>
    where
        T: Send + 'static,
        F: FnOnce() -> TaskResult<T> + Send + 'static,
    {
        if works.is_empty() {
            return Err(ErrorInfo::with_message(
                ErrorCode::InvalidArgument,
                "empty batch",
            ));
        }
        let base_name = opts.name;
        works
            .into_iter()
            .enumerate()
            .map(|(i, work)| {
                let opts = SubmitOptions {
                    name: base_name.as_ref().map(|n| format!("{}-{}", n, i)),
                    ..SubmitOptions::default()
                };
                self.submit(work, opts)
            })
            .collect()
    }

    /// Submit a batch and block for every result (`SubmitOptions::all`)
    pub fn submit_batch_all<T, F>(&self, works: Vec<F>) -> TaskResult<Vec<T>>
    where
        T: Send + 'static,
        F: FnOnce() -> TaskResult<T> + Send + 'static,
    {
        when_all(self.submit_batch(works, SubmitOptions::all())?)
    }

    /// Submit a batch and block for the first result (`SubmitOptions::any`)
    pub fn submit_batch_any<T, F>(&self, works: Vec<F>) -> TaskResult<T>
    where
        T: Send + 'static,
        F: FnOnce() -> TaskResult<T> + Send + 'static,
    {
        when_any(self.submit_batch(works, SubmitOptions::any())?)
    }

    /// Stop the pool. Graceful (`immediate == false`) drains the queue;
    /// immediate drops pending jobs (their futures resolve cancelled).
    pub fn stop(&self, immediate: bool) -> TaskResult<()> {
        if let Some(scaler) = self.autoscaler.lock().unwrap().take() {
            scaler.stop();
        }

        loop {
            match self.state() {
                PoolState::Stopped => return Ok(()),
                PoolState::Stopping => {
                    // Another caller is stopping; observe it complete.
                    while self.state() != PoolState::Stopped {
                        thread::sleep(Duration::from_millis(1));
                    }
                    return Ok(());
                }
                PoolState::Created => {
                    if self
                        .core
                        .state
                        .compare_exchange(
                            PoolState::Created as u8,
                            PoolState::Stopped as u8,
                            Ordering::AcqRel,
                            Ordering::Acquire,
                        )
                        .is_ok()
                    {
                        self.core.queue.stop();
                        return Ok(());
                    }
                }
                PoolState::Running => {
                    if self
                        .core
                        .state
                        .compare_exchange(
                            PoolState::Running as u8,
                            PoolState::Stopping as u8,
                            Ordering::AcqRel,
                            Ordering::Acquire,
                        )
                        .is_err()
                    {
                        continue;
                    }

                    log::debug!(
                        "pool {} stopping (immediate={})",
                        self.core.name,
                        immediate
                    );

                    if immediate {
                        let dropped = self.core.drain_queue();
                        if dropped > 0 {
                            log::debug!("pool {} dropped {} pending jobs", self.core.name, dropped);
                        }
                        let workers = self.core.workers.lock().unwrap();
                        for handle in workers.iter() {
                            handle.shared.cancel_token().cancel();
                        }
                    }

                    self.core.queue.stop();

                    let handles: Vec<thread::JoinHandle<()>> = {
                        let mut workers = self.core.workers.lock().unwrap();
                        workers
                            .iter_mut()
                            .filter_map(|w| w.thread.take())
                            .collect()
                    };
                    for handle in handles {
                        let _ = handle.join();
                    }

                    for policy in self.core.policies.iter() {
                        policy.shutdown();
                    }

                    self.core
                        .state
                        .store(PoolState::Stopped as u8, Ordering::Release);
                    return Ok(());
                }
            }
        }
    }
}

impl Drop for Pool {
    fn drop(&mut self) {
        if matches!(self.state(), PoolState::Running | PoolState::Stopping) {
            let _ = self.stop(true);
        }
    }
}

/// Build a queueable job whose typed result feeds the returned future
///
/// The typed result crosses to the consumer through the promise; the
/// queue and worker only see the erased summary. Panics are caught here
/// so the future reports `JobExecutionFailed` rather than a
/// dropped-promise cancellation. The retry loop also lives here: the
/// one-shot promise may only see the final attempt.
pub(crate) fn wrap_future_job<T, F>(
    mut work: F,
    name: Option<String>,
    priority: Option<JobType>,
    retry: Option<RetryPolicy>,
) -> (BoxedJob, JobFuture<T>)
where
    T: Send + 'static,
    F: FnMut() -> TaskResult<T> + Send + 'static,
{
    let token = CancelToken::new();
    let (promise, future) = future_pair::<T>(token.clone());
    let mut promise = Some(promise);
    let body_token = token.clone();

    let body = move || {
        let mut attempt = 1u32;
        loop {
            let outcome = catch_unwind(AssertUnwindSafe(&mut work)).unwrap_or_else(|panic| {
                Err(ErrorInfo::with_message(
                    ErrorCode::JobExecutionFailed,
                    format!("panic in job body: {}", crate::worker::panic_message(&panic)),
                ))
            });
            let err = match outcome {
                Ok(value) => {
                    if let Some(promise) = promise.take() {
                        promise.complete(Ok(value));
                    }
                    return Ok(());
                }
                Err(err) => err,
            };

            let will_retry = retry
                .as_ref()
                .map(|policy| policy.should_retry(attempt, &err))
                .unwrap_or(false);
            if will_retry {
                let policy = retry.as_ref().unwrap();
                log::trace!("attempt {} failed, backing off: {}", attempt, err);
                if let Err(cancelled) = policy.sleep_backoff(attempt, Some(&body_token)) {
                    if let Some(promise) = promise.take() {
                        promise.complete(Err(cancelled.clone()));
                    }
                    return Err(cancelled);
                }
                attempt += 1;
                continue;
            }

            if let Some(promise) = promise.take() {
                promise.complete(Err(err.clone()));
            }
            return Err(err);
        }
    };

    let mut builder = JobBuilder::new().cancel_token(token).work(body);
    if let Some(name) = name {
        builder = builder.name(name);
    }
    if let Some(priority) = priority {
        builder = builder.priority(priority);
    }
    (builder.build_boxed(), future)
}

/// Adapter fulfilling a unit future from an arbitrary job's outcome
struct FutureJob {
    inner: BoxedJob,
    promise: Option<Promise<()>>,
}

impl Job for FutureJob {
    fn name(&self) -> &str {
        self.inner.name()
    }

    fn id(&self) -> u64 {
        self.inner.id()
    }

    fn execute(&mut self) -> TaskResult<()> {
        let outcome = catch_unwind(AssertUnwindSafe(|| self.inner.execute()))
            .unwrap_or_else(|panic| {
                Err(ErrorInfo::with_message(
                    ErrorCode::JobExecutionFailed,
                    format!(
                        "panic in job body: {}",
                        crate::worker::panic_message(&panic)
                    ),
                ))
            });
        if let Some(promise) = self.promise.take() {
            promise.complete(outcome.as_ref().map(|_| ()).map_err(|e| e.clone()));
        }
        outcome
    }

    fn priority(&self) -> JobType {
        self.inner.priority()
    }

    fn cancel_token(&self) -> Option<&CancelToken> {
        self.inner.cancel_token()
    }

    fn mark_enqueued(&mut self, at: Instant) {
        self.inner.mark_enqueued(at);
    }

    fn enqueued_at(&self) -> Option<Instant> {
        self.inner.enqueued_at()
    }

    fn on_error(&mut self, err: &ErrorInfo) {
        self.inner.on_error(err);
    }
}

/// Build the queue an ordinary pool runs on
pub(crate) fn build_queue(config: &PoolConfig) -> Arc<dyn Scheduler> {
    match config.queue_kind {
        QueueKind::Mutex => match config.queue_capacity {
            Some(capacity) => Arc::new(MutexQueue::bounded(capacity)),
            None => Arc::new(MutexQueue::unbounded()),
        },
        QueueKind::LockFree => Arc::new(LockFreeQueue::new()),
        QueueKind::Adaptive => Arc::new(AdaptiveQueue::new()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::breaker::{CircuitBreakerConfig, CircuitBreakerPolicy, CircuitState};
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn test_submit_before_start_fails() {
        let pool = Pool::builder("idle").workers(1).build();
        let err = pool
            .submit(|| Ok(1u32), SubmitOptions::default())
            .unwrap_err();
        assert_eq!(err.code(), ErrorCode::QueueStopped);
    }

    #[test]
    fn test_start_with_zero_workers_fails() {
        let pool = Pool::builder("empty").workers(1).build();
        pool.set_worker_count(0);
        assert_eq!(pool.start().unwrap_err().code(), ErrorCode::NoWorkers);
    }

    #[test]
    fn test_double_start_fails() {
        let pool = Pool::builder("twice").workers(1).build();
        pool.start().unwrap();
        assert_eq!(pool.start().unwrap_err().code(), ErrorCode::AlreadyRunning);
        pool.stop(false).unwrap();
    }

    #[test]
    fn test_submit_and_get() {
        let pool = Pool::builder("simple").workers(2).build_and_start().unwrap();
        let future = pool
            .submit(|| Ok("hello".to_string()), SubmitOptions::named("greet"))
            .unwrap();
        assert_eq!(future.get().unwrap(), "hello");
        pool.stop(false).unwrap();
    }

    #[test]
    fn test_ten_thousand_increments_four_workers() {
        let pool = Pool::builder("increments")
            .workers(4)
            .build_and_start()
            .unwrap();
        let counter = Arc::new(AtomicUsize::new(0));

        let futures: Vec<_> = (0..10_000)
            .map(|_| {
                let c = Arc::clone(&counter);
                pool.submit(
                    move || {
                        c.fetch_add(1, Ordering::Relaxed);
                        Ok(())
                    },
                    SubmitOptions::default(),
                )
                .unwrap()
            })
            .collect();
        assert!(when_all(futures).is_ok());

        assert_eq!(counter.load(Ordering::SeqCst), 10_000);
        assert_eq!(pool.tasks_executed(), 10_000);
        assert_eq!(pool.tasks_failed(), 0);
        pool.stop(false).unwrap();
    }

    #[test]
    fn test_job_failure_flows_through_future() {
        let pool = Pool::builder("failing").workers(1).build_and_start().unwrap();
        let future = pool
            .submit(
                || -> TaskResult<()> {
                    Err(ErrorInfo::with_message(
                        ErrorCode::JobExecutionFailed,
                        "no luck",
                    ))
                },
                SubmitOptions::default(),
            )
            .unwrap();
        let err = future.get().unwrap_err();
        assert_eq!(err.code(), ErrorCode::JobExecutionFailed);
        assert_eq!(pool.tasks_failed(), 1);
        pool.stop(false).unwrap();
    }

    #[test]
    fn test_panic_becomes_job_execution_failed() {
        let pool = Pool::builder("panicky").workers(1).build_and_start().unwrap();
        let future = pool
            .submit(
                || -> TaskResult<u32> { panic!("kaboom") },
                SubmitOptions::default(),
            )
            .unwrap();
        let err = future.get().unwrap_err();
        assert_eq!(err.code(), ErrorCode::JobExecutionFailed);
        assert!(err.message.contains("kaboom"));

        // Worker survives and keeps serving.
        let ok = pool.submit(|| Ok(1u32), SubmitOptions::default()).unwrap();
        assert_eq!(ok.get().unwrap(), 1);
        pool.stop(false).unwrap();
    }

    #[test]
    fn test_circuit_breaker_scenario() {
        let policy = Arc::new(CircuitBreakerPolicy::new(CircuitBreakerConfig {
            failure_threshold: 3,
            success_threshold: 1,
            timeout: Duration::from_millis(100),
            failure_rate_threshold: 1.1,
            min_requests: u64::MAX,
            half_open_max: 3,
            window: Duration::from_secs(10),
        }));
        let breaker = Arc::clone(policy.breaker());
        let pool = Pool::builder("guarded")
            .workers(1)
            .with_policy(policy)
            .build_and_start()
            .unwrap();

        for _ in 0..3 {
            let f = pool
                .submit(
                    || -> TaskResult<()> { Err(ErrorInfo::new(ErrorCode::JobExecutionFailed)) },
                    SubmitOptions::default(),
                )
                .unwrap();
            assert!(f.get().is_err());
        }

        // Fourth submission is rejected synchronously.
        let err = pool
            .submit(|| Ok(()), SubmitOptions::default())
            .unwrap_err();
        assert_eq!(err.code(), ErrorCode::CircuitOpen);

        std::thread::sleep(Duration::from_millis(150));
        let f = pool.submit(|| Ok(()), SubmitOptions::default()).unwrap();
        assert!(f.get().is_ok());
        // success_threshold = 1: one good trial closes the breaker.
        std::thread::sleep(Duration::from_millis(20));
        assert_eq!(breaker.state(), CircuitState::Closed);
        pool.stop(false).unwrap();
    }

    #[test]
    fn test_graceful_stop_drains_everything() {
        let pool = Pool::builder("drainer").workers(4).build_and_start().unwrap();
        let futures: Vec<_> = (0..100)
            .map(|_| {
                pool.submit(
                    || {
                        thread::sleep(Duration::from_millis(10));
                        Ok(())
                    },
                    SubmitOptions::default(),
                )
                .unwrap()
            })
            .collect();

        pool.stop(false).unwrap();
        assert_eq!(pool.state(), PoolState::Stopped);

        let results = when_all(futures);
        assert!(results.is_ok());
        assert_eq!(pool.tasks_executed(), 100);
    }

    #[test]
    fn test_immediate_stop_drops_pending_without_hanging() {
        let pool = Pool::builder("dropper").workers(2).build_and_start().unwrap();
        let futures: Vec<_> = (0..100)
            .map(|_| {
                pool.submit(
                    || {
                        thread::sleep(Duration::from_millis(10));
                        Ok(())
                    },
                    SubmitOptions::default(),
                )
                .unwrap()
            })
            .collect();

        thread::sleep(Duration::from_millis(20));
        pool.stop(true).unwrap();
        assert_eq!(pool.state(), PoolState::Stopped);

        let mut completed = 0;
        for future in futures {
            // No future may hang; dropped jobs resolve cancelled.
            match future.get_for(Duration::from_secs(1)) {
                Some(Ok(())) => completed += 1,
                Some(Err(err)) => assert_eq!(err.code(), ErrorCode::OperationCancelled),
                None => panic!("future hung after immediate stop"),
            }
        }
        assert!(completed < 100, "immediate stop completed everything");
    }

    #[test]
    fn test_stop_is_idempotent_under_repetition() {
        let pool = Pool::builder("idempotent").workers(1).build_and_start().unwrap();
        for _ in 0..5 {
            pool.stop(false).unwrap();
            assert_eq!(pool.state(), PoolState::Stopped);
        }
    }

    #[test]
    fn test_concurrent_stop_has_one_winner() {
        let pool = Arc::new(Pool::builder("racing").workers(2).build_and_start().unwrap());
        let mut handles = Vec::new();
        for _ in 0..4 {
            let p = Arc::clone(&pool);
            handles.push(thread::spawn(move || p.stop(false)));
        }
        for h in handles {
            assert!(h.join().unwrap().is_ok());
        }
        assert_eq!(pool.state(), PoolState::Stopped);
    }

    #[test]
    fn test_submit_batch_all_and_any() {
        let pool = Pool::builder("batcher").workers(4).build_and_start().unwrap();

        let works: Vec<_> = (0..8u32).map(|i| move || Ok(i * 2)).collect();
        let mut results = pool.submit_batch_all(works).unwrap();
        results.sort_unstable();
        assert_eq!(results, vec![0, 2, 4, 6, 8, 10, 12, 14]);

        let works: Vec<_> = (0..4u32).map(|i| move || Ok(i)).collect();
        let first = pool.submit_batch_any(works).unwrap();
        assert!(first < 4);

        let empty: Vec<fn() -> TaskResult<u32>> = Vec::new();
        assert_eq!(
            pool.submit_batch(empty, SubmitOptions::default())
                .unwrap_err()
                .code(),
            ErrorCode::InvalidArgument
        );
        pool.stop(false).unwrap();
    }

    #[test]
    fn test_retry_through_pool() {
        let pool = Pool::builder("retrier").workers(1).build_and_start().unwrap();
        let attempts = Arc::new(AtomicUsize::new(0));
        let a = Arc::clone(&attempts);
        let future = pool
            .submit_with_retry(
                move || {
                    if a.fetch_add(1, Ordering::SeqCst) < 2 {
                        Err(ErrorInfo::new(ErrorCode::JobExecutionFailed))
                    } else {
                        Ok("eventually")
                    }
                },
                RetryPolicy::new(5)
                    .initial_backoff(Duration::from_millis(1))
                    .jitter(0.0),
                SubmitOptions::default(),
            )
            .unwrap();

        assert_eq!(future.get().unwrap(), "eventually");
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
        // Retries are internal: one execution, zero failures recorded.
        assert_eq!(pool.tasks_executed(), 1);
        assert_eq!(pool.tasks_failed(), 0);
        pool.stop(false).unwrap();
    }

    #[test]
    fn test_future_cancel_skips_queued_job() {
        let pool = Pool::builder("canceller").workers(1).build_and_start().unwrap();

        // Occupy the only worker, then cancel a queued job.
        let blocker = pool
            .submit(
                || {
                    thread::sleep(Duration::from_millis(50));
                    Ok(())
                },
                SubmitOptions::default(),
            )
            .unwrap();
        let victim = pool
            .submit(|| Ok("ran anyway"), SubmitOptions::default())
            .unwrap();
        victim.cancel();

        let err = victim.get().unwrap_err();
        assert_eq!(err.code(), ErrorCode::OperationCancelled);
        assert!(blocker.get().is_ok());
        pool.stop(false).unwrap();
    }
}
