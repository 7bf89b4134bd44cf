//! # tasklet-core
//!
//! Core types and primitives for the tasklet execution runtime.
//!
//! This crate is platform-agnostic: jobs, futures, queues and the
//! synchronisation primitives they rely on. Worker threads, pools and
//! the resilience policies live in `tasklet-runtime`.
//!
//! ## Modules
//!
//! - `error` - stable error codes and the `ErrorInfo` payload
//! - `cancel` - cooperative cancellation tokens
//! - `job` - `Job` trait, `CallbackJob`, `JobBuilder`, priority classes
//! - `future` - one-shot result futures with cancellation
//! - `retry` - exponential-backoff retry policy
//! - `sched` - the `Scheduler` queue contract and `QueueCapabilities`
//! - `queue` - mutex, lock-free, policy-composed and adaptive queues
//! - `deque` - Chase-Lev work-stealing deque
//! - `typed` - priority-typed queues with aging
//! - `hazard` - hazard-pointer domain for lock-free reclamation
//! - `ratelimit` - token-bucket rate limiter
//! - `window` - sliding-window counters
//! - `metrics` - pool metrics and the `MetricsSink` boundary
//! - `ticket_lock` - fair closure-scoped lock for short sections
//! - `env` - `TASKLET_*` environment overrides
//!
//! The hazard domain is process-wide and intentionally never torn down;
//! the runtime is not safe to use during process-wide teardown.

pub mod cancel;
pub mod deque;
pub mod env;
pub mod error;
pub mod future;
pub mod hazard;
pub mod job;
pub mod metrics;
pub mod queue;
pub mod ratelimit;
pub mod retry;
pub mod sched;
pub mod ticket_lock;
pub mod typed;
pub mod window;

// Re-exports for convenience
pub use cancel::CancelToken;
pub use deque::{deque, DequeOwner, DequeStealer, Steal};
pub use error::{ErrorCode, ErrorInfo, TaskResult};
pub use future::{future_pair, when_all, when_any, CancellableFuture, JobFuture, Promise};
pub use hazard::{HazardDomain, HazardGuard, MAX_HAZARDS_PER_THREAD, MAX_THREADS};
pub use job::{BoxedJob, CallbackJob, Job, JobBuilder, JobState, JobType};
pub use metrics::{MetricsLevel, MetricsService, MetricsSink, MetricsSnapshot};
pub use queue::{AdaptiveQueue, LockFreeQueue, MutexQueue, OverflowBehavior, PolicyQueue};
pub use ratelimit::TokenBucket;
pub use retry::RetryPolicy;
pub use sched::{QueueCapabilities, Scheduler};
pub use ticket_lock::TicketLock;
pub use typed::{AgingConfig, AgingTypedQueue, TypedJobQueue, TypedScheduler};
pub use window::{FailureWindow, SlidingWindow};
