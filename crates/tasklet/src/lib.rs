//! # tasklet - task-execution runtime
//!
//! A library for latency-sensitive, high-throughput in-process
//! workloads: submit work units, have them executed across a pool of
//! worker threads, get the results back through one-shot futures.
//!
//! ## Features
//!
//! - **Queues**: mutex-based FIFO, lock-free Michael-Scott with
//!   hazard-pointer reclamation, policy-composed (sync x bound x
//!   overflow), and a contention-adaptive queue
//! - **Work stealing**: Chase-Lev deques with random, round-robin,
//!   adaptive and NUMA-aware victim selection
//! - **Priorities**: typed pools with aging-based starvation prevention
//! - **Resilience**: circuit breaker, autoscaler, retry with
//!   exponential backoff, token-bucket rate limiting
//! - **Cancellation**: cooperative tokens shared between jobs and
//!   futures
//!
//! ## Quick start
//!
//! ```ignore
//! use tasklet::{Pool, SubmitOptions};
//!
//! fn main() -> tasklet::TaskResult<()> {
//!     let pool = Pool::builder("app").workers(4).build_and_start()?;
//!
//!     let future = pool.submit(|| Ok(6 * 7), SubmitOptions::named("answer"))?;
//!     assert_eq!(future.get()?, 42);
//!
//!     pool.stop(false)
//! }
//! ```
//!
//! The runtime keeps process-wide state (the hazard-pointer domain)
//! that is never torn down; do not submit work during process-wide
//! teardown.

pub use tasklet_core::{
    deque, future_pair, when_all, when_any, AdaptiveQueue, AgingConfig, AgingTypedQueue, BoxedJob,
    CallbackJob, CancelToken, CancellableFuture, DequeOwner, DequeStealer, ErrorCode, ErrorInfo,
    FailureWindow, HazardDomain, Job, JobBuilder, JobFuture, JobState, JobType, LockFreeQueue,
    MetricsLevel, MetricsService, MetricsSink, MetricsSnapshot, MutexQueue, OverflowBehavior,
    PolicyQueue, Promise, QueueCapabilities, RetryPolicy, Scheduler, SlidingWindow, Steal,
    TaskResult, TokenBucket, TypedJobQueue, TypedScheduler,
};

pub use tasklet_runtime::{
    Autoscaler, AutoscalerConfig, CircuitBreaker, CircuitBreakerConfig, CircuitBreakerPolicy,
    CircuitState, NumaPool, NumaTopology, Pool, PoolBuilder, PoolConfig, PoolPolicy, PoolState,
    QueueKind, ScaleDirection, ScalingDecision, StealPolicy, SubmitOptions, TypedPool,
    WorkStealingConfig, WorkerState,
};

/// Policy-composition building blocks for [`PolicyQueue`]
pub mod queue_policies {
    pub use tasklet_core::queue::policy::{
        Block, BoundPolicy, Bounded, DropNewest, DropOldest, DynamicBounded, Expand,
        OverflowOutcome, OverflowPolicy, Reject, Unbounded,
    };
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    #[test]
    fn test_facade_end_to_end() {
        let pool = Pool::builder("facade")
            .workers(2)
            .build_and_start()
            .unwrap();

        let counter = Arc::new(AtomicUsize::new(0));
        let futures: Vec<_> = (0..100)
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
        when_all(futures).unwrap();

        assert_eq!(counter.load(Ordering::SeqCst), 100);
        pool.stop(false).unwrap();
    }

    #[test]
    fn test_facade_token_bucket_scenario() {
        // capacity 10, refill 5/s: a tight loop gets exactly the burst,
        // then a refill trickles in.
        let bucket = TokenBucket::new(10.0, 5.0);
        let start = std::time::Instant::now();
        let mut granted = 0;
        while start.elapsed() < Duration::from_millis(100) {
            if bucket.try_acquire(1.0) {
                granted += 1;
            }
        }
        assert_eq!(granted, 10);

        std::thread::sleep(Duration::from_millis(250));
        assert!(bucket.try_acquire(1.0));
    }

    #[test]
    fn test_facade_policy_queue_composition() {
        use crate::queue_policies::{Bounded, Reject};

        let queue = PolicyQueue::new(MutexQueue::unbounded(), Bounded::new(1), Reject);
        queue
            .schedule(Box::new(CallbackJob::new(|| Ok(()))))
            .unwrap();
        assert_eq!(
            queue
                .schedule(Box::new(CallbackJob::new(|| Ok(()))))
                .unwrap_err()
                .code(),
            ErrorCode::QueueFull
        );
    }
}
