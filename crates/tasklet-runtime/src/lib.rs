//! # tasklet-runtime
//!
//! Worker pool, scheduler wiring and resilience policies for the
//! tasklet execution runtime. Builds on the platform-agnostic types in
//! `tasklet-core`; this crate owns the threads and the OS interaction
//! (NUMA detection, CPU pinning).
//!
//! ## Modules
//!
//! - `config` - pool configuration with `TASKLET_*` env overrides
//! - `pool` - the worker pool, submission paths and shutdown
//! - `worker` - worker threads: run loop, stealing, panic capture
//! - `builder` - fluent pool construction
//! - `steal` - steal-victim selection policies
//! - `numa` - topology detection and pinning
//! - `numa_pool` - pool with NUMA-aware placement
//! - `typed_pool` - workers restricted to priority subsets
//! - `policy` - the `PoolPolicy` chain
//! - `breaker` - circuit breaker and its policy adapter
//! - `autoscale` - utilisation-driven worker scaling

pub mod autoscale;
pub mod breaker;
pub mod builder;
pub mod config;
pub mod numa;
pub mod numa_pool;
pub mod policy;
pub mod pool;
pub mod steal;
pub mod typed_pool;
pub mod worker;

// Re-exports for convenience
pub use autoscale::{Autoscaler, AutoscalerConfig, ScaleDirection, ScalingDecision};
pub use breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitBreakerPolicy, CircuitState};
pub use builder::PoolBuilder;
pub use config::{PoolConfig, QueueKind};
pub use numa::{NumaNode, NumaTopology};
pub use numa_pool::NumaPool;
pub use policy::PoolPolicy;
pub use pool::{Pool, PoolState, SubmitOptions};
pub use steal::{StealPolicy, VictimSelector, WorkStealingConfig};
pub use typed_pool::TypedPool;
pub use worker::{Worker, WorkerShared, WorkerState};
