//! Typed pool: workers restricted to priority subsets
//!
//! Each typed worker serves a responsibility set of [`JobType`]s and
//! only dequeues jobs of those types from the shared aging queue.
//! There is no stealing across responsibility sets; workers with the
//! same set already share the same sub-queues, so within-set balancing
//! comes for free and a Background-only worker can never end up running
//! RealTime work.

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use tasklet_core::cancel::CancelToken;
use tasklet_core::error::{ErrorCode, ErrorInfo, TaskResult};
use tasklet_core::future::JobFuture;
use tasklet_core::job::JobType;
use tasklet_core::metrics::{MetricsLevel, MetricsService};
use tasklet_core::sched::Scheduler;
use tasklet_core::typed::{AgingConfig, AgingTypedQueue, TypedScheduler};

use crate::policy::{run_on_enqueue, PoolPolicy};
use crate::pool::{wrap_future_job, PoolState, SubmitOptions};
use crate::worker::{execute_job, WorkerShared};

struct TypedWorkerHandle {
    shared: Arc<WorkerShared>,
    responsibilities: Vec<JobType>,
    thread: Option<thread::JoinHandle<()>>,
}

/// Pool whose workers serve declared priority subsets
pub struct TypedPool {
    name: String,
    queue: Arc<AgingTypedQueue>,
    metrics: Arc<MetricsService>,
    policies: Arc<Vec<Arc<dyn PoolPolicy>>>,
    state: AtomicU8,
    wake_interval: Duration,
    /// Responsibility sets registered before start
    pending: Mutex<Vec<Vec<JobType>>>,
    workers: Mutex<Vec<TypedWorkerHandle>>,
}

impl TypedPool {
    pub fn new(name: impl Into<String>) -> Self {
        Self::with_aging(name, AgingConfig::default())
    }

    pub fn with_aging(name: impl Into<String>, aging: AgingConfig) -> Self {
        Self {
            name: name.into(),
            queue: Arc::new(AgingTypedQueue::new(aging)),
            metrics: Arc::new(MetricsService::new(MetricsLevel::Basic)),
            policies: Arc::new(Vec::new()),
            state: AtomicU8::new(PoolState::Created as u8),
            wake_interval: Duration::from_millis(100),
            pending: Mutex::new(Vec::new()),
            workers: Mutex::new(Vec::new()),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn state(&self) -> PoolState {
        PoolState::from(self.state.load(Ordering::Acquire))
    }

    pub fn metrics(&self) -> &Arc<MetricsService> {
        &self.metrics
    }

    /// Register a worker serving `responsibilities`; before `start` only
    pub fn add_worker(&self, responsibilities: Vec<JobType>) -> TaskResult<()> {
        if responsibilities.is_empty() {
            return Err(ErrorInfo::with_message(
                ErrorCode::InvalidArgument,
                "worker needs at least one job type",
            ));
        }
        if self.state() != PoolState::Created {
            return Err(ErrorInfo::with_message(
                ErrorCode::AlreadyRunning,
                "workers must be added before start",
            ));
        }
        self.pending.lock().unwrap().push(responsibilities);
        Ok(())
    }

    /// Convenience: one all-types worker per requested slot
    pub fn add_universal_workers(&self, n: usize) -> TaskResult<()> {
        for _ in 0..n {
            self.add_worker(JobType::iter().collect())?;
        }
        Ok(())
    }

    pub fn start(&self) -> TaskResult<()> {
        let pending = {
            let mut pending = self.pending.lock().unwrap();
            std::mem::take(&mut *pending)
        };
        if pending.is_empty() {
            return Err(ErrorInfo::with_message(
                ErrorCode::NoWorkers,
                "typed pool has no workers registered",
            ));
        }
        if self
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
                format!("typed pool {} is not in the created state", self.name),
            ));
        }

        let mut workers = self.workers.lock().unwrap();
        for (id, responsibilities) in pending.into_iter().enumerate() {
            let shared = Arc::new(WorkerShared::new(id, CancelToken::new()));
            let thread_shared = Arc::clone(&shared);
            let queue = Arc::clone(&self.queue);
            let metrics = Arc::clone(&self.metrics);
            let policies = Arc::clone(&self.policies);
            let allowed = responsibilities.clone();
            let wake_interval = self.wake_interval;

            let handle = thread::Builder::new()
                .name(format!("{}-typed-{}", self.name, id))
                .spawn(move || {
                    typed_worker_loop(thread_shared, queue, metrics, policies, allowed, wake_interval)
                })
                .map_err(|e| {
                    ErrorInfo::with_message(ErrorCode::InvalidArgument, "failed to spawn worker")
                        .with_source(e)
                })?;

            workers.push(TypedWorkerHandle {
                shared,
                responsibilities,
                thread: Some(handle),
            });
        }
        Ok(())
    }

    /// Submit a closure at the given priority
    pub fn submit<T, F>(
        &self,
        work: F,
        priority: JobType,
        opts: SubmitOptions,
    ) -> TaskResult<JobFuture<T>>
    where
        T: Send + 'static,
        F: FnOnce() -> TaskResult<T> + Send + 'static,
    {
        if self.state() != PoolState::Running {
            return Err(ErrorInfo::with_message(
                ErrorCode::QueueStopped,
                format!("typed pool {} is not running", self.name),
            ));
        }
        // No registered worker serving the type means the job would sit
        // forever; reject it up front.
        if !self.serves(priority) {
            return Err(ErrorInfo::with_message(
                ErrorCode::InvalidArgument,
                format!("no worker serves {} jobs", priority),
            ));
        }

        let mut cell = Some(work);
        let (job, future) = wrap_future_job(
            move || {
                let work = cell.take().ok_or_else(|| {
                    ErrorInfo::with_message(ErrorCode::InvalidArgument, "job already executed")
                })?;
                work()
            },
            opts.name,
            Some(priority),
            None,
        );
        run_on_enqueue(&self.policies, &*job)?;
        self.queue.schedule(job)?;
        self.metrics.record_submitted(1);
        Ok(future)
    }

    /// Queued jobs of one type (by base priority)
    pub fn queued_of(&self, ty: JobType) -> usize {
        self.queue.size_of(ty)
    }

    pub fn worker_count(&self) -> usize {
        self.workers.lock().unwrap().len()
    }

    fn serves(&self, ty: JobType) -> bool {
        self.workers
            .lock()
            .unwrap()
            .iter()
            .any(|w| w.responsibilities.contains(&ty))
    }

    /// Stop the pool; graceful drains, immediate drops pending jobs
    pub fn stop(&self, immediate: bool) -> TaskResult<()> {
        loop {
            match self.state() {
                PoolState::Stopped => return Ok(()),
                PoolState::Stopping => {
                    while self.state() != PoolState::Stopped {
                        thread::sleep(Duration::from_millis(1));
                    }
                    return Ok(());
                }
                PoolState::Created => {
                    if self
                        .state
                        .compare_exchange(
                            PoolState::Created as u8,
                            PoolState::Stopped as u8,
                            Ordering::AcqRel,
                            Ordering::Acquire,
                        )
                        .is_ok()
                    {
                        self.queue.stop();
                        return Ok(());
                    }
                }
                PoolState::Running => {
                    if self
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

                    if immediate {
                        let dropped = self.queue.clear();
                        if dropped > 0 {
                            log::debug!("typed pool {} dropped {} pending jobs", self.name, dropped);
                        }
                        for worker in self.workers.lock().unwrap().iter() {
                            worker.shared.cancel_token().cancel();
                        }
                    }

                    self.queue.stop();
                    let handles: Vec<thread::JoinHandle<()>> = {
                        let mut workers = self.workers.lock().unwrap();
                        workers.iter_mut().filter_map(|w| w.thread.take()).collect()
                    };
                    for handle in handles {
                        let _ = handle.join();
                    }
                    for policy in self.policies.iter() {
                        policy.shutdown();
                    }
                    self.state.store(PoolState::Stopped as u8, Ordering::Release);
                    return Ok(());
                }
            }
        }
    }
}

impl Drop for TypedPool {
    fn drop(&mut self) {
        if matches!(self.state(), PoolState::Running | PoolState::Stopping) {
            let _ = self.stop(true);
        }
    }
}

fn typed_worker_loop(
    shared: Arc<WorkerShared>,
    queue: Arc<AgingTypedQueue>,
    metrics: Arc<MetricsService>,
    policies: Arc<Vec<Arc<dyn PoolPolicy>>>,
    allowed: Vec<JobType>,
    wake_interval: Duration,
) {
    log::debug!("typed worker {} serving {:?}", shared.id(), allowed);
    loop {
        if shared.cancel_token().is_cancelled() {
            break;
        }
        let idle_start = std::time::Instant::now();
        match queue.next_job_of_for(&allowed, wake_interval) {
            Ok(job) => {
                metrics.record_idle(idle_start.elapsed());
                execute_job(&shared, &metrics, &policies, job);
            }
            Err(_) => {
                metrics.record_idle(idle_start.elapsed());
                if queue.is_stopped() {
                    // Drain anything of ours that is still queued.
                    while let Ok(job) = queue.try_next_job_of(&allowed) {
                        execute_job(&shared, &metrics, &policies, job);
                    }
                    break;
                }
            }
        }
    }
    log::debug!("typed worker {} exiting", shared.id());
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Instant;

    #[test]
    fn test_start_requires_workers() {
        let pool = TypedPool::new("typed-empty");
        assert_eq!(pool.start().unwrap_err().code(), ErrorCode::NoWorkers);
    }

    #[test]
    fn test_submit_unserved_type_rejected() {
        let pool = TypedPool::new("typed-partial");
        pool.add_worker(vec![JobType::RealTime]).unwrap();
        pool.start().unwrap();

        let err = pool
            .submit(|| Ok(()), JobType::Background, SubmitOptions::default())
            .unwrap_err();
        assert_eq!(err.code(), ErrorCode::InvalidArgument);
        pool.stop(false).unwrap();
    }

    #[test]
    fn test_typed_execution_routes_by_priority() {
        let pool = TypedPool::new("typed-routing");
        pool.add_worker(vec![JobType::RealTime, JobType::Batch]).unwrap();
        pool.add_worker(vec![JobType::Background]).unwrap();
        pool.start().unwrap();

        let background_done = Arc::new(AtomicUsize::new(0));
        let b = Arc::clone(&background_done);
        let bg = pool
            .submit(
                move || {
                    b.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                },
                JobType::Background,
                SubmitOptions::default(),
            )
            .unwrap();
        let rt = pool
            .submit(|| Ok("fast"), JobType::RealTime, SubmitOptions::default())
            .unwrap();

        assert_eq!(rt.get().unwrap(), "fast");
        assert!(bg.get().is_ok());
        assert_eq!(background_done.load(Ordering::SeqCst), 1);
        pool.stop(false).unwrap();
    }

    #[test]
    fn test_background_worker_never_runs_realtime() {
        // One Background-only worker; a RealTime job would starve, so
        // the pool refuses it, and queued Background work still flows.
        let pool = TypedPool::new("typed-guard");
        pool.add_worker(vec![JobType::Background]).unwrap();
        pool.start().unwrap();

        assert!(pool
            .submit(|| Ok(()), JobType::RealTime, SubmitOptions::default())
            .is_err());

        let f = pool
            .submit(|| Ok(7), JobType::Background, SubmitOptions::default())
            .unwrap();
        assert_eq!(f.get().unwrap(), 7);
        pool.stop(false).unwrap();
    }

    #[test]
    fn test_aged_background_jumps_ahead() {
        let pool = TypedPool::with_aging(
            "typed-aging",
            AgingConfig {
                aging_interval: Duration::from_millis(50),
                max_boost: 2,
                reevaluate_interval: Duration::from_millis(1),
            },
        );
        pool.add_universal_workers(1).unwrap();
        pool.start().unwrap();

        // Tie up the worker so the queue builds up.
        let order = Arc::new(Mutex::new(Vec::new()));
        let blocker = pool
            .submit(
                || {
                    thread::sleep(Duration::from_millis(120));
                    Ok(())
                },
                JobType::Batch,
                SubmitOptions::default(),
            )
            .unwrap();

        let o = Arc::clone(&order);
        let background = pool
            .submit(
                move || {
                    o.lock().unwrap().push("background");
                    Ok(())
                },
                JobType::Background,
                SubmitOptions::default(),
            )
            .unwrap();

        // Fresh Batch jobs keep arriving while the Background job ages.
        let mut batch_futures = Vec::new();
        let deadline = Instant::now() + Duration::from_millis(110);
        while Instant::now() < deadline {
            let o = Arc::clone(&order);
            batch_futures.push(
                pool.submit(
                    move || {
                        o.lock().unwrap().push("batch");
                        Ok(())
                    },
                    JobType::Batch,
                    SubmitOptions::default(),
                )
                .unwrap(),
            );
            thread::sleep(Duration::from_millis(10));
        }

        blocker.get().unwrap();
        background.get().unwrap();
        for f in batch_futures {
            f.get().unwrap();
        }

        let order = order.lock().unwrap();
        let background_pos = order.iter().position(|s| *s == "background").unwrap();
        assert!(
            background_pos < order.len() - 1,
            "aged background job ran dead last: {:?}",
            order
        );
        pool.stop(false).unwrap();
    }

    #[test]
    fn test_stop_immediate_drops_queued() {
        let pool = TypedPool::new("typed-stopper");
        pool.add_universal_workers(1).unwrap();
        pool.start().unwrap();

        let blocker = pool
            .submit(
                || {
                    thread::sleep(Duration::from_millis(50));
                    Ok(())
                },
                JobType::Batch,
                SubmitOptions::default(),
            )
            .unwrap();
        let doomed = pool
            .submit(|| Ok(()), JobType::Batch, SubmitOptions::default())
            .unwrap();

        thread::sleep(Duration::from_millis(10));
        pool.stop(true).unwrap();

        assert!(blocker.get().is_ok());
        match doomed.get_for(Duration::from_secs(1)) {
            Some(Err(err)) => assert_eq!(err.code(), ErrorCode::OperationCancelled),
            Some(Ok(())) => {} // raced the clear; acceptable
            None => panic!("future hung after immediate stop"),
        }
    }
}
