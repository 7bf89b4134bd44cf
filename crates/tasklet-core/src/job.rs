//! Job model: the unit of work submitted to a pool
//!
//! A job is an opaque, owned value exposing `execute()`. Ownership moves
//! submitter -> queue -> worker and the job is dropped after execution;
//! terminal outcomes are observed through the associated future.

use core::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use crate::cancel::CancelToken;
use crate::error::{ErrorCode, ErrorInfo, TaskResult};
use crate::retry::RetryPolicy;

/// Process-wide monotonic job id counter
static NEXT_JOB_ID: AtomicU64 = AtomicU64::new(1);

/// Allocate the next job id
#[inline]
pub fn next_job_id() -> u64 {
    NEXT_JOB_ID.fetch_add(1, Ordering::Relaxed)
}

/// Lifecycle state of a job
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum JobState {
    /// Built but not yet submitted
    Created = 0,

    /// Sitting in a queue
    Queued = 1,

    /// Executing on a worker
    Running = 2,

    /// Finished with Ok(())
    Completed = 3,

    /// Finished with an error
    Failed = 4,

    /// Cancelled before or during execution
    Cancelled = 5,
}

impl JobState {
    /// Check if this state is terminal
    #[inline]
    pub const fn is_terminal(&self) -> bool {
        matches!(self, JobState::Completed | JobState::Failed | JobState::Cancelled)
    }
}

/// Priority class of a job
///
/// Lower numeric variant means higher priority. Typed queues keep one
/// sub-queue per variant and drain them in this order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(u8)]
pub enum JobType {
    /// Latency-sensitive work, always drained first
    RealTime = 0,

    /// Default class for throughput work
    Batch = 1,

    /// Best-effort work; may be starved unless aging is enabled
    Background = 2,
}

impl JobType {
    /// Number of priority classes
    pub const COUNT: usize = 3;

    /// Get this class as a sub-queue index (0 = RealTime)
    #[inline]
    pub const fn as_index(&self) -> usize {
        *self as usize
    }

    /// Get a class from a sub-queue index
    #[inline]
    pub const fn from_index(idx: usize) -> Option<JobType> {
        match idx {
            0 => Some(JobType::RealTime),
            1 => Some(JobType::Batch),
            2 => Some(JobType::Background),
            _ => None,
        }
    }

    /// Iterator over all classes, highest priority first
    pub fn iter() -> impl Iterator<Item = JobType> {
        [JobType::RealTime, JobType::Batch, JobType::Background].into_iter()
    }
}

impl Default for JobType {
    fn default() -> Self {
        JobType::Batch
    }
}

impl fmt::Display for JobType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JobType::RealTime => write!(f, "REALTIME"),
            JobType::Batch => write!(f, "BATCH"),
            JobType::Background => write!(f, "BACKGROUND"),
        }
    }
}

/// Unit of work executed by a worker
///
/// Object-safe by design: pools and queues only ever see `Box<dyn Job>`.
/// `execute` takes `&mut self` so single-shot closures can be moved out.
pub trait Job: Send {
    /// Diagnostic name
    fn name(&self) -> &str;

    /// Process-wide monotonic id
    fn id(&self) -> u64;

    /// Run the job body
    fn execute(&mut self) -> TaskResult<()>;

    /// Priority class; typed queues bucket by this
    fn priority(&self) -> JobType {
        JobType::default()
    }

    /// Cooperative cancellation token, if the job carries one
    fn cancel_token(&self) -> Option<&CancelToken> {
        None
    }

    /// Record the enqueue timestamp; workers use it for wait-time metrics
    fn mark_enqueued(&mut self, _at: Instant) {}

    /// Enqueue timestamp recorded by `mark_enqueued`
    fn enqueued_at(&self) -> Option<Instant> {
        None
    }

    /// Observe a failed execution; default does nothing
    fn on_error(&mut self, _err: &ErrorInfo) {}

    /// Retry configuration, if the job carries one
    fn retry_policy(&self) -> Option<&RetryPolicy> {
        None
    }
}

/// Owning handle for jobs in queues and workers
pub type BoxedJob = Box<dyn Job>;

impl fmt::Debug for dyn Job {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Job")
            .field("name", &self.name())
            .field("id", &self.id())
            .finish()
    }
}

type WorkFn = Box<dyn FnMut() -> TaskResult<()> + Send>;
type ErrorFn = Box<dyn FnOnce(&ErrorInfo) + Send>;

/// Closure-backed job, the bread-and-butter implementation
///
/// Built via [`JobBuilder`]. The work closure is `FnMut` so an attached
/// [`RetryPolicy`] can re-run it; the job as a whole still executes
/// once, and a second `execute` call reports `InvalidArgument`.
pub struct CallbackJob {
    name: String,
    id: u64,
    priority: JobType,
    work: Option<WorkFn>,
    error_hook: Option<ErrorFn>,
    token: Option<CancelToken>,
    retry: Option<RetryPolicy>,
    enqueued_at: Option<Instant>,
    state: JobState,
}

impl CallbackJob {
    /// Create a job from a closure with a default name
    pub fn new<F>(work: F) -> Self
    where
        F: FnMut() -> TaskResult<()> + Send + 'static,
    {
        let id = next_job_id();
        Self {
            name: format!("job-{}", id),
            id,
            priority: JobType::default(),
            work: Some(Box::new(work)),
            error_hook: None,
            token: None,
            retry: None,
            enqueued_at: None,
            state: JobState::Created,
        }
    }

    /// Current lifecycle state
    #[inline]
    pub fn state(&self) -> JobState {
        self.state
    }

    /// Run the work closure under the retry policy, if any
    ///
    /// Only the final attempt's outcome is returned; intermediate
    /// failures are invisible to the caller.
    fn run_attempts(&mut self, mut work: WorkFn) -> TaskResult<()> {
        let Some(policy) = self.retry.clone() else {
            return work();
        };

        let mut attempt = 1u32;
        loop {
            let result = work();
            match result {
                Ok(()) => return Ok(()),
                Err(err) => {
                    if !policy.should_retry(attempt, &err) {
                        return Err(err);
                    }
                    log::trace!(
                        "job {} attempt {} failed, retrying: {}",
                        self.name,
                        attempt,
                        err
                    );
                    policy.sleep_backoff(attempt, self.token.as_ref())?;
                    attempt += 1;
                }
            }
        }
    }
}

impl Job for CallbackJob {
    fn name(&self) -> &str {
        &self.name
    }

    fn id(&self) -> u64 {
        self.id
    }

    fn execute(&mut self) -> TaskResult<()> {
        if let Some(token) = &self.token {
            if token.is_cancelled() {
                self.state = JobState::Cancelled;
                return Err(ErrorInfo::new(ErrorCode::OperationCancelled));
            }
        }
        let work = self.work.take().ok_or_else(|| {
            ErrorInfo::with_message(ErrorCode::InvalidArgument, "job already executed")
        })?;
        self.state = JobState::Running;
        let result = self.run_attempts(work);
        self.state = match &result {
            Ok(()) => JobState::Completed,
            Err(e) if e.is_cancelled() => JobState::Cancelled,
            Err(_) => JobState::Failed,
        };
        result
    }

    fn priority(&self) -> JobType {
        self.priority
    }

    fn cancel_token(&self) -> Option<&CancelToken> {
        self.token.as_ref()
    }

    fn mark_enqueued(&mut self, at: Instant) {
        self.enqueued_at = Some(at);
        self.state = JobState::Queued;
    }

    fn enqueued_at(&self) -> Option<Instant> {
        self.enqueued_at
    }

    fn on_error(&mut self, err: &ErrorInfo) {
        if let Some(hook) = self.error_hook.take() {
            hook(err);
        }
    }

    fn retry_policy(&self) -> Option<&RetryPolicy> {
        self.retry.as_ref()
    }
}

impl fmt::Debug for CallbackJob {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CallbackJob")
            .field("name", &self.name)
            .field("id", &self.id)
            .field("priority", &self.priority)
            .field("state", &self.state)
            .finish()
    }
}

/// Fluent builder for [`CallbackJob`]
///
/// ```ignore
/// let job = JobBuilder::new()
///     .name("resize-thumbnails")
///     .priority(JobType::Background)
///     .work(|| Ok(()))
///     .build();
/// ```
pub struct JobBuilder {
    name: Option<String>,
    priority: JobType,
    work: Option<WorkFn>,
    error_hook: Option<ErrorFn>,
    token: Option<CancelToken>,
    retry: Option<RetryPolicy>,
}

impl JobBuilder {
    pub fn new() -> Self {
        Self {
            name: None,
            priority: JobType::default(),
            work: None,
            error_hook: None,
            token: None,
            retry: None,
        }
    }

    /// Diagnostic name shown in logs and metrics
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// The job body; `FnMut` so a retry policy can re-run it
    pub fn work<F>(mut self, work: F) -> Self
    where
        F: FnMut() -> TaskResult<()> + Send + 'static,
    {
        self.work = Some(Box::new(work));
        self
    }

    /// Hook invoked with the final error if the job fails
    pub fn on_error<F>(mut self, hook: F) -> Self
    where
        F: FnOnce(&ErrorInfo) + Send + 'static,
    {
        self.error_hook = Some(Box::new(hook));
        self
    }

    /// Cooperative cancellation token
    pub fn cancel_token(mut self, token: CancelToken) -> Self {
        self.token = Some(token);
        self
    }

    /// Priority class for typed queues
    pub fn priority(mut self, priority: JobType) -> Self {
        self.priority = priority;
        self
    }

    /// Re-run the work on failure per `policy`
    pub fn retry(mut self, policy: RetryPolicy) -> Self {
        self.retry = Some(policy);
        self
    }

    /// Finish building; fails only if no work was provided
    pub fn try_build(self) -> Result<CallbackJob, ErrorInfo> {
        let work = self.work.ok_or_else(|| {
            ErrorInfo::with_message(ErrorCode::InvalidArgument, "job built without work")
        })?;
        let id = next_job_id();
        Ok(CallbackJob {
            name: self.name.unwrap_or_else(|| format!("job-{}", id)),
            id,
            priority: self.priority,
            work: Some(work),
            error_hook: self.error_hook,
            token: self.token,
            retry: self.retry,
            enqueued_at: None,
            state: JobState::Created,
        })
    }

    /// Finish building
    ///
    /// # Panics
    ///
    /// Panics if no work closure was provided; use `try_build` to get a
    /// `Result` instead.
    pub fn build(self) -> CallbackJob {
        self.try_build().unwrap()
    }

    /// Finish building as an owned trait object
    pub fn build_boxed(self) -> BoxedJob {
        Box::new(self.build())
    }
}

impl Default for JobBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Arc;

    #[test]
    fn test_job_ids_are_monotonic() {
        let a = CallbackJob::new(|| Ok(()));
        let b = CallbackJob::new(|| Ok(()));
        assert!(b.id() > a.id());
    }

    #[test]
    fn test_callback_job_runs_once() {
        let count = Arc::new(AtomicUsize::new(0));
        let c = Arc::clone(&count);
        let mut job = CallbackJob::new(move || {
            c.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });

        assert!(job.execute().is_ok());
        assert_eq!(job.state(), JobState::Completed);
        assert_eq!(count.load(Ordering::SeqCst), 1);

        // Second run is refused
        let err = job.execute().unwrap_err();
        assert_eq!(err.code(), ErrorCode::InvalidArgument);
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_builder_sets_fields() {
        let job = JobBuilder::new()
            .name("encode-frame")
            .priority(JobType::RealTime)
            .work(|| Ok(()))
            .build();

        assert_eq!(job.name(), "encode-frame");
        assert_eq!(job.priority(), JobType::RealTime);
        assert_eq!(job.state(), JobState::Created);
    }

    #[test]
    fn test_builder_without_work_fails() {
        let err = JobBuilder::new().name("nothing").try_build().err().unwrap();
        assert_eq!(err.code(), ErrorCode::InvalidArgument);
    }

    #[test]
    fn test_error_hook_fires() {
        let seen = Arc::new(AtomicUsize::new(0));
        let s = Arc::clone(&seen);
        let mut job = JobBuilder::new()
            .work(|| Err(ErrorInfo::with_message(ErrorCode::JobExecutionFailed, "boom")))
            .on_error(move |e| {
                assert_eq!(e.code(), ErrorCode::JobExecutionFailed);
                s.fetch_add(1, Ordering::SeqCst);
            })
            .build();

        let err = job.execute().unwrap_err();
        assert_eq!(job.state(), JobState::Failed);
        job.on_error(&err);
        assert_eq!(seen.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_cancelled_token_short_circuits_execution() {
        let token = CancelToken::new();
        token.cancel();
        let mut job = JobBuilder::new()
            .work(|| panic!("must not run"))
            .cancel_token(token)
            .build();

        let err = job.execute().unwrap_err();
        assert_eq!(err.code(), ErrorCode::OperationCancelled);
        assert_eq!(job.state(), JobState::Cancelled);
    }

    #[test]
    fn test_retry_runs_until_success() {
        use crate::retry::RetryPolicy;
        use std::time::Duration;

        let attempts = Arc::new(AtomicUsize::new(0));
        let a = Arc::clone(&attempts);
        let mut job = JobBuilder::new()
            .retry(
                RetryPolicy::new(5)
                    .initial_backoff(Duration::from_millis(1))
                    .jitter(0.0),
            )
            .work(move || {
                if a.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err(ErrorInfo::new(ErrorCode::JobExecutionFailed))
                } else {
                    Ok(())
                }
            })
            .build();

        // Two failures are absorbed; only the final outcome is visible.
        assert!(job.execute().is_ok());
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
        assert_eq!(job.state(), JobState::Completed);
    }

    #[test]
    fn test_retry_exhaustion_reports_last_error() {
        use crate::retry::RetryPolicy;
        use std::time::Duration;

        let attempts = Arc::new(AtomicUsize::new(0));
        let a = Arc::clone(&attempts);
        let mut job = JobBuilder::new()
            .retry(
                RetryPolicy::new(3)
                    .initial_backoff(Duration::from_millis(1))
                    .jitter(0.0),
            )
            .work(move || {
                a.fetch_add(1, Ordering::SeqCst);
                Err(ErrorInfo::new(ErrorCode::JobExecutionFailed))
            })
            .build();

        let err = job.execute().unwrap_err();
        assert_eq!(err.code(), ErrorCode::JobExecutionFailed);
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn test_job_type_indexing() {
        assert_eq!(JobType::RealTime.as_index(), 0);
        assert_eq!(JobType::from_index(2), Some(JobType::Background));
        assert_eq!(JobType::from_index(3), None);

        let order: Vec<_> = JobType::iter().collect();
        assert_eq!(order, vec![JobType::RealTime, JobType::Batch, JobType::Background]);
    }

    #[test]
    fn test_mark_enqueued_transitions_state() {
        let mut job = CallbackJob::new(|| Ok(()));
        assert!(job.enqueued_at().is_none());
        job.mark_enqueued(Instant::now());
        assert!(job.enqueued_at().is_some());
        assert_eq!(job.state(), JobState::Queued);
    }
}
