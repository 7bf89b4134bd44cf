//! Compile-time configuration defaults
//!
//! Runtime overrides come from `TASKLET_*` environment variables; see
//! [`PoolConfig::from_env`](super::PoolConfig::from_env).

use super::QueueKind;

/// Worker threads when neither config nor env says otherwise (0 = one
/// per available core)
pub const NUM_WORKERS: usize = 0;

/// Queue implementation
pub const QUEUE_KIND: QueueKind = QueueKind::Mutex;

/// Queue capacity (0 = unbounded)
pub const QUEUE_CAPACITY: usize = 0;

/// How long an idle worker parks before re-checking for work (ms)
pub const WAKE_INTERVAL_MS: u64 = 100;

/// Steal attempts per idle pass when work stealing is enabled
pub const MAX_STEAL_ATTEMPTS: usize = 4;

/// Jobs a worker moves from the global queue to its local deque per
/// refill when work stealing is enabled
pub const LOCAL_BATCH: usize = 16;

/// Enhanced metrics off by default
pub const ENHANCED_METRICS: bool = false;
