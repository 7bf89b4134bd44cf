//! Pool policy chain
//!
//! Policies observe the life of every job that passes through a pool.
//! They run in registration order; any `on_enqueue` error short-circuits
//! the submission (that is how the circuit breaker rejects work).

use tasklet_core::error::{ErrorInfo, TaskResult};
use tasklet_core::job::Job;

/// Per-pool behaviour hooked into submission and execution
pub trait PoolPolicy: Send + Sync {
    /// Diagnostic name
    fn name(&self) -> &str;

    /// Runs before a job is queued; an error rejects the submission
    fn on_enqueue(&self, _job: &dyn Job) -> TaskResult<()> {
        Ok(())
    }

    /// Runs on the worker just before the job body
    fn on_job_start(&self, _job: &dyn Job) {}

    /// Runs on the worker after the job body, success or not
    fn on_job_complete(&self, _job: &dyn Job, _success: bool, _error: Option<&ErrorInfo>) {}

    /// Runs once during pool shutdown, after workers have joined
    fn shutdown(&self) {}
}

/// Run the chain's `on_enqueue` hooks in order, stopping at the first error
pub(crate) fn run_on_enqueue(policies: &[std::sync::Arc<dyn PoolPolicy>], job: &dyn Job) -> TaskResult<()> {
    for policy in policies {
        if let Err(err) = policy.on_enqueue(job) {
            log::debug!("policy {} rejected job {}: {}", policy.name(), job.name(), err);
            return Err(err);
        }
    }
    Ok(())
}
