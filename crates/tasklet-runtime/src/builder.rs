//! Fluent pool construction
//!
//! ```ignore
//! let pool = Pool::builder("transcoder")
//!     .workers(8)
//!     .with_queue(QueueKind::LockFree)
//!     .with_work_stealing(WorkStealingConfig::new(StealPolicy::Adaptive))
//!     .with_circuit_breaker(CircuitBreakerConfig::default())
//!     .build_and_start()?;
//! ```

use std::sync::Arc;

use tasklet_core::error::TaskResult;
use tasklet_core::metrics::MetricsLevel;
use tasklet_core::sched::Scheduler;

use crate::autoscale::AutoscalerConfig;
use crate::breaker::{CircuitBreakerConfig, CircuitBreakerPolicy};
use crate::config::{PoolConfig, QueueKind};
use crate::numa::NumaTopology;
use crate::policy::PoolPolicy;
use crate::pool::{build_queue, Pool};
use crate::steal::WorkStealingConfig;

/// Assembles a [`Pool`] from configuration pieces
pub struct PoolBuilder {
    name: String,
    config: PoolConfig,
    queue: Option<Arc<dyn Scheduler>>,
    policies: Vec<Arc<dyn PoolPolicy>>,
    steal_config: Option<WorkStealingConfig>,
    topology: Option<Arc<NumaTopology>>,
    autoscaler: Option<AutoscalerConfig>,
}

impl PoolBuilder {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            config: PoolConfig::from_env(),
            queue: None,
            policies: Vec::new(),
            steal_config: None,
            topology: None,
            autoscaler: None,
        }
    }

    /// Worker thread count
    pub fn workers(mut self, n: usize) -> Self {
        self.config.num_workers = n;
        self
    }

    /// Replace the whole config (builder calls still apply on top)
    pub fn config(mut self, config: PoolConfig) -> Self {
        self.config = config;
        self
    }

    /// Queue implementation
    pub fn with_queue(mut self, kind: QueueKind) -> Self {
        self.config.queue_kind = kind;
        self
    }

    /// Use a caller-provided queue instead of building one
    pub fn with_queue_instance(mut self, queue: Arc<dyn Scheduler>) -> Self {
        self.queue = Some(queue);
        self
    }

    /// Bound the queue (mutex queues only)
    pub fn queue_capacity(mut self, capacity: usize) -> Self {
        self.config.queue_capacity = Some(capacity);
        self
    }

    /// Append a policy to the chain (runs in registration order)
    pub fn with_policy(mut self, policy: Arc<dyn PoolPolicy>) -> Self {
        self.policies.push(policy);
        self
    }

    /// Guard submissions with a circuit breaker
    pub fn with_circuit_breaker(self, config: CircuitBreakerConfig) -> Self {
        self.with_policy(Arc::new(CircuitBreakerPolicy::new(config)))
    }

    /// Grow and shrink the worker set automatically
    pub fn with_autoscaler(mut self, config: AutoscalerConfig) -> Self {
        self.autoscaler = Some(config);
        self
    }

    /// Give workers local deques and steal from peers when idle
    pub fn with_work_stealing(mut self, config: WorkStealingConfig) -> Self {
        self.steal_config = Some(config);
        self
    }

    /// Detect NUMA topology, pin workers and bias stealing by distance
    pub fn with_numa(mut self) -> Self {
        self.topology = Some(Arc::new(NumaTopology::detect()));
        self
    }

    pub(crate) fn with_topology(mut self, topology: Arc<NumaTopology>) -> Self {
        self.topology = Some(topology);
        self
    }

    /// Metrics detail level
    pub fn with_metrics(mut self, level: MetricsLevel) -> Self {
        self.config.metrics_level = level;
        self
    }

    /// Build the pool without starting it
    pub fn build(self) -> Pool {
        let queue = self
            .queue
            .unwrap_or_else(|| build_queue(&self.config));
        Pool::from_parts(
            self.name,
            self.config,
            queue,
            self.policies,
            self.steal_config,
            self.topology,
            self.autoscaler,
        )
    }

    /// Build and start in one call
    pub fn build_and_start(self) -> TaskResult<Pool> {
        let pool = self.build();
        pool.start()?;
        Ok(pool)
    }
}
