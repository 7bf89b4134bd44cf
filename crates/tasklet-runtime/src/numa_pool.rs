//! NUMA-aware pool
//!
//! A [`Pool`] whose workers are spread round-robin across the detected
//! NUMA nodes, pinned to their node's CPUs, and whose steal victims are
//! chosen with a distance bias (cost multiplier `distance / 10`). On
//! hosts without NUMA the single-node fallback makes this behave like a
//! plain work-stealing pool.

use std::ops::Deref;
use std::sync::Arc;

use tasklet_core::error::TaskResult;

use crate::builder::PoolBuilder;
use crate::numa::NumaTopology;
use crate::pool::Pool;
use crate::steal::{StealPolicy, WorkStealingConfig};

/// Pool with NUMA-aware placement and stealing
pub struct NumaPool {
    pool: Pool,
    topology: Arc<NumaTopology>,
}

impl NumaPool {
    /// Detect the topology and build a started pool on top of it
    pub fn new(name: impl Into<String>, workers: usize) -> TaskResult<Self> {
        Self::with_topology(name, workers, Arc::new(NumaTopology::detect()))
    }

    /// Build on an explicit topology (tests use the fallback here)
    pub fn with_topology(
        name: impl Into<String>,
        workers: usize,
        topology: Arc<NumaTopology>,
    ) -> TaskResult<Self> {
        let pool = PoolBuilder::new(name)
            .workers(workers)
            .with_work_stealing(WorkStealingConfig::new(StealPolicy::NumaAware))
            .with_topology(Arc::clone(&topology))
            .build_and_start()?;
        Ok(Self { pool, topology })
    }

    pub fn topology(&self) -> &NumaTopology {
        &self.topology
    }

    /// The underlying pool (also reachable through `Deref`)
    pub fn pool(&self) -> &Pool {
        &self.pool
    }
}

impl Deref for NumaPool {
    type Target = Pool;

    fn deref(&self) -> &Pool {
        &self.pool
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pool::SubmitOptions;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_numa_pool_executes_work() {
        let pool = NumaPool::new("numa", 2).unwrap();
        assert!(pool.topology().node_count() >= 1);

        let counter = Arc::new(AtomicUsize::new(0));
        let futures: Vec<_> = (0..200)
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
        for f in futures {
            f.get().unwrap();
        }
        assert_eq!(counter.load(Ordering::SeqCst), 200);
        pool.stop(false).unwrap();
    }

    #[test]
    fn test_fallback_topology_single_node() {
        let topology = Arc::new(NumaTopology::fallback());
        let pool = NumaPool::with_topology("numa-fallback", 2, topology).unwrap();
        assert_eq!(pool.topology().node_count(), 1);
        let f = pool.submit(|| Ok(1), SubmitOptions::default()).unwrap();
        assert_eq!(f.get().unwrap(), 1);
        pool.stop(false).unwrap();
    }
}
