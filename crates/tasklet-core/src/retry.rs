//! Exponential-backoff retry policy
//!
//! Attached to a job at build time. The executing side re-runs the work
//! closure until it succeeds, the attempts run out, the predicate
//! declines the error, or the cancel token fires. Only the final
//! attempt's outcome reaches the job's future.

use std::sync::Arc;
use std::time::Duration;

use rand::Rng;

use crate::cancel::CancelToken;
use crate::error::{ErrorCode, ErrorInfo, TaskResult};

type RetryPredicate = Arc<dyn Fn(&ErrorInfo) -> bool + Send + Sync>;

/// Backoff and attempt configuration
#[derive(Clone)]
pub struct RetryPolicy {
    /// Total attempts, first included; minimum 1
    pub max_attempts: u32,

    /// Delay before the second attempt
    pub initial_backoff: Duration,

    /// Ceiling for any computed delay
    pub max_backoff: Duration,

    /// Per-attempt growth factor
    pub multiplier: f64,

    /// Randomisation of each delay, 0.0..=1.0
    pub jitter: f64,

    /// Which errors are worth retrying; cancellation never is
    retry_on: Option<RetryPredicate>,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            initial_backoff: Duration::from_millis(10),
            max_backoff: Duration::from_secs(5),
            multiplier: 2.0,
            jitter: 0.1,
            retry_on: None,
        }
    }

    pub fn initial_backoff(mut self, backoff: Duration) -> Self {
        self.initial_backoff = backoff;
        self
    }

    pub fn max_backoff(mut self, backoff: Duration) -> Self {
        self.max_backoff = backoff;
        self
    }

    pub fn multiplier(mut self, multiplier: f64) -> Self {
        self.multiplier = multiplier.max(1.0);
        self
    }

    pub fn jitter(mut self, jitter: f64) -> Self {
        self.jitter = jitter.clamp(0.0, 1.0);
        self
    }

    /// Restrict retries to errors the predicate accepts
    pub fn retry_on<F>(mut self, predicate: F) -> Self
    where
        F: Fn(&ErrorInfo) -> bool + Send + Sync + 'static,
    {
        self.retry_on = Some(Arc::new(predicate));
        self
    }

    /// Should `err` from attempt number `attempt` (1-based) be retried?
    pub fn should_retry(&self, attempt: u32, err: &ErrorInfo) -> bool {
        if attempt >= self.max_attempts {
            return false;
        }
        if err.code() == ErrorCode::OperationCancelled {
            return false;
        }
        match &self.retry_on {
            Some(predicate) => predicate(err),
            None => true,
        }
    }

    /// Jittered delay before attempt `attempt + 1` (attempt is 1-based)
    pub fn backoff_for(&self, attempt: u32) -> Duration {
        let exp = self.multiplier.powi(attempt.saturating_sub(1) as i32);
        let base = self.initial_backoff.as_secs_f64() * exp;
        let capped = base.min(self.max_backoff.as_secs_f64());
        let factor = if self.jitter > 0.0 {
            rand::thread_rng().gen_range(1.0 - self.jitter..=1.0 + self.jitter)
        } else {
            1.0
        };
        Duration::from_secs_f64((capped * factor).max(0.0))
    }

    /// Sleep out a backoff, watching the token so shutdown is honored
    /// mid-wait. Errors with `OperationCancelled` when interrupted.
    pub fn sleep_backoff(&self, attempt: u32, token: Option<&CancelToken>) -> TaskResult<()> {
        let mut remaining = self.backoff_for(attempt);
        while remaining > Duration::ZERO {
            if let Some(token) = token {
                token.check()?;
            }
            let slice = remaining.min(Duration::from_millis(10));
            std::thread::sleep(slice);
            remaining = remaining.saturating_sub(slice);
        }
        if let Some(token) = token {
            token.check()?;
        }
        Ok(())
    }
}

impl std::fmt::Debug for RetryPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RetryPolicy")
            .field("max_attempts", &self.max_attempts)
            .field("initial_backoff", &self.initial_backoff)
            .field("max_backoff", &self.max_backoff)
            .field("multiplier", &self.multiplier)
            .field("jitter", &self.jitter)
            .field("has_predicate", &self.retry_on.is_some())
            .finish()
    }
}
