//! Pool configuration
//!
//! Compile-time defaults with runtime environment overrides.
//!
//! # Configuration priority (highest wins)
//!
//! 1. Explicit builder calls
//! 2. Environment variables (`TASKLET_*`)
//! 3. Library defaults
//!
//! # Example
//!
//! ```ignore
//! use tasklet_runtime::config::PoolConfig;
//!
//! let config = PoolConfig::from_env()
//!     .num_workers(8)
//!     .queue_kind(QueueKind::LockFree);
//! ```

pub mod defaults;

use std::str::FromStr;
use std::time::Duration;

use tasklet_core::env::{override_flag, override_from_env};
use tasklet_core::error::{ErrorCode, ErrorInfo, TaskResult};
use tasklet_core::metrics::MetricsLevel;

/// Which queue implementation a pool uses
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueKind {
    /// Condvar-based FIFO, exact size
    Mutex,

    /// Michael-Scott queue with hazard pointers
    LockFree,

    /// Mutex first, promotes to lock-free under contention
    Adaptive,
}

impl FromStr for QueueKind {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "mutex" => Ok(QueueKind::Mutex),
            "lockfree" | "lock-free" => Ok(QueueKind::LockFree),
            "adaptive" => Ok(QueueKind::Adaptive),
            _ => Err(()),
        }
    }
}

/// Pool configuration with builder-style setters
#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// Worker threads (0 = one per available core)
    pub num_workers: usize,
    /// Queue implementation
    pub queue_kind: QueueKind,
    /// Queue capacity (None = unbounded); mutex queues only
    pub queue_capacity: Option<usize>,
    /// Idle worker park interval
    pub wake_interval: Duration,
    /// Steal attempts per idle pass (0 disables work stealing)
    pub max_steal_attempts: usize,
    /// Global-to-local refill batch when stealing is enabled
    pub local_batch: usize,
    /// Metrics detail level
    pub metrics_level: MetricsLevel,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self::from_env()
    }
}

impl PoolConfig {
    /// Defaults with environment overrides applied.
    ///
    /// Environment variables (all optional):
    /// - `TASKLET_WORKERS` - worker thread count (0 = per-core)
    /// - `TASKLET_QUEUE` - "mutex", "lockfree" or "adaptive"
    /// - `TASKLET_QUEUE_CAPACITY` - bound for mutex queues (0 = unbounded)
    /// - `TASKLET_WAKE_INTERVAL_MS` - idle park interval
    /// - `TASKLET_STEAL_ATTEMPTS` - steal attempts per idle pass
    /// - `TASKLET_LOCAL_BATCH` - local deque refill batch
    /// - `TASKLET_ENHANCED_METRICS` - enable enhanced metrics (0/1)
    pub fn from_env() -> Self {
        let capacity = override_from_env("QUEUE_CAPACITY", defaults::QUEUE_CAPACITY);
        Self {
            num_workers: override_from_env("WORKERS", defaults::NUM_WORKERS),
            queue_kind: override_from_env("QUEUE", defaults::QUEUE_KIND),
            queue_capacity: if capacity == 0 { None } else { Some(capacity) },
            wake_interval: Duration::from_millis(override_from_env(
                "WAKE_INTERVAL_MS",
                defaults::WAKE_INTERVAL_MS,
            )),
            max_steal_attempts: override_from_env("STEAL_ATTEMPTS", defaults::MAX_STEAL_ATTEMPTS),
            local_batch: override_from_env("LOCAL_BATCH", defaults::LOCAL_BATCH),
            metrics_level: if override_flag("ENHANCED_METRICS", defaults::ENHANCED_METRICS) {
                MetricsLevel::Enhanced
            } else {
                MetricsLevel::Basic
            },
        }
    }

    pub fn num_workers(mut self, n: usize) -> Self {
        self.num_workers = n;
        self
    }

    pub fn queue_kind(mut self, kind: QueueKind) -> Self {
        self.queue_kind = kind;
        self
    }

    pub fn queue_capacity(mut self, capacity: Option<usize>) -> Self {
        self.queue_capacity = capacity;
        self
    }

    pub fn wake_interval(mut self, interval: Duration) -> Self {
        self.wake_interval = interval;
        self
    }

    pub fn max_steal_attempts(mut self, attempts: usize) -> Self {
        self.max_steal_attempts = attempts;
        self
    }

    pub fn metrics_level(mut self, level: MetricsLevel) -> Self {
        self.metrics_level = level;
        self
    }

    /// Resolved worker count (0 means one per available core)
    pub fn effective_workers(&self) -> usize {
        if self.num_workers > 0 {
            self.num_workers
        } else {
            num_cpus::get()
        }
    }

    /// Reject nonsensical combinations before the pool starts
    pub fn validate(&self) -> TaskResult<()> {
        if self.wake_interval.is_zero() {
            return Err(ErrorInfo::with_message(
                ErrorCode::InvalidArgument,
                "wake_interval must be non-zero",
            ));
        }
        if self.queue_capacity == Some(0) {
            return Err(ErrorInfo::with_message(
                ErrorCode::InvalidArgument,
                "queue capacity of zero cannot accept work",
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = PoolConfig::from_env();
        assert_eq!(config.queue_kind, QueueKind::Mutex);
        assert!(config.effective_workers() >= 1);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_queue_kind_parsing() {
        assert_eq!("lockfree".parse(), Ok(QueueKind::LockFree));
        assert_eq!("LOCK-FREE".parse(), Ok(QueueKind::LockFree));
        assert_eq!("adaptive".parse(), Ok(QueueKind::Adaptive));
        assert_eq!("mutex".parse(), Ok(QueueKind::Mutex));
        assert_eq!("bogus".parse::<QueueKind>(), Err(()));
    }

    #[test]
    fn test_validate_rejects_zero_capacity() {
        let config = PoolConfig::from_env().queue_capacity(Some(0));
        assert_eq!(
            config.validate().unwrap_err().code(),
            ErrorCode::InvalidArgument
        );
    }

    #[test]
    fn test_builder_setters() {
        let config = PoolConfig::from_env()
            .num_workers(3)
            .queue_kind(QueueKind::Adaptive)
            .max_steal_attempts(9);
        assert_eq!(config.num_workers, 3);
        assert_eq!(config.effective_workers(), 3);
        assert_eq!(config.queue_kind, QueueKind::Adaptive);
        assert_eq!(config.max_steal_attempts, 9);
    }
}
