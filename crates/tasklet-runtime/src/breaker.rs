//! Circuit breaker
//!
//! Closed -> Open when windowed failures cross a count or rate
//! threshold; Open -> HalfOpen once the open timeout elapses; HalfOpen
//! admits a bounded number of trial requests and closes again after
//! enough consecutive successes, or re-opens on the first failure.
//!
//! State lives in one atomic byte plus an atomic open-timestamp;
//! transitions are serialised by a ticket lock so racing observers
//! converge on a single decision in arrival order.

use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tasklet_core::error::{ErrorCode, ErrorInfo, TaskResult};
use tasklet_core::job::Job;
use tasklet_core::ticket_lock::TicketLock;
use tasklet_core::window::FailureWindow;

use crate::policy::PoolPolicy;

/// Breaker states
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum CircuitState {
    /// Requests flow; failures are counted
    Closed = 0,

    /// Requests rejected until the open timeout elapses
    Open = 1,

    /// Limited trial requests allowed
    HalfOpen = 2,
}

impl From<u8> for CircuitState {
    fn from(v: u8) -> Self {
        match v {
            1 => CircuitState::Open,
            2 => CircuitState::HalfOpen,
            _ => CircuitState::Closed,
        }
    }
}

/// Breaker thresholds and timings
#[derive(Debug, Clone)]
pub struct CircuitBreakerConfig {
    /// Windowed failure count that opens the breaker
    pub failure_threshold: u64,

    /// Consecutive half-open successes that close it again
    pub success_threshold: u64,

    /// How long the breaker stays open before trialing
    pub timeout: Duration,

    /// Windowed failure rate (0..=1) that opens the breaker; only
    /// consulted once `min_requests` requests are in the window
    pub failure_rate_threshold: f64,

    /// Requests required before the rate threshold applies
    pub min_requests: u64,

    /// Concurrent trial requests admitted while half-open
    pub half_open_max: u64,

    /// Failure-counting window span
    pub window: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            success_threshold: 3,
            timeout: Duration::from_secs(30),
            failure_rate_threshold: 0.5,
            min_requests: 10,
            half_open_max: 3,
            window: Duration::from_secs(10),
        }
    }
}

/// Failure-driven request gate
pub struct CircuitBreaker {
    state: AtomicU8,

    /// Milliseconds since `epoch` at which the breaker last opened
    opened_at_ms: AtomicU64,
    epoch: Instant,

    window: FailureWindow,

    /// Trial requests currently in flight (half-open only)
    half_open_inflight: AtomicU64,

    /// Consecutive successes while half-open
    half_open_successes: AtomicU64,

    /// Serialises state transitions
    transition: TicketLock<()>,

    config: CircuitBreakerConfig,
}

impl CircuitBreaker {
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self {
            state: AtomicU8::new(CircuitState::Closed as u8),
            opened_at_ms: AtomicU64::new(0),
            epoch: Instant::now(),
            window: FailureWindow::new(config.window, 10),
            half_open_inflight: AtomicU64::new(0),
            half_open_successes: AtomicU64::new(0),
            transition: TicketLock::new(()),
            config,
        }
    }

    pub fn config(&self) -> &CircuitBreakerConfig {
        &self.config
    }

    /// Current state (transitions Open -> HalfOpen lazily, so this can
    /// observe Open just before an `allow_request` would trial)
    pub fn state(&self) -> CircuitState {
        CircuitState::from(self.state.load(Ordering::Acquire))
    }

    /// Gate a request; false means rejected
    pub fn allow_request(&self) -> bool {
        self.admission().is_ok()
    }

    /// Gate a request with the precise rejection code
    pub fn admission(&self) -> Result<(), ErrorCode> {
        match self.state() {
            CircuitState::Closed => Ok(()),
            CircuitState::Open => {
                if self.open_elapsed() < self.config.timeout {
                    return Err(ErrorCode::CircuitOpen);
                }
                // Timeout elapsed: the first arrival flips to half-open.
                self.transition.with(|_| {
                    if self.state() == CircuitState::Open
                        && self.open_elapsed() >= self.config.timeout
                    {
                        log::debug!("circuit breaker half-opening after timeout");
                        self.half_open_inflight.store(0, Ordering::Release);
                        self.half_open_successes.store(0, Ordering::Release);
                        self.state
                            .store(CircuitState::HalfOpen as u8, Ordering::Release);
                    }
                });
                self.admit_half_open()
            }
            CircuitState::HalfOpen => self.admit_half_open(),
        }
    }

    /// Record a successful request
    pub fn record_success(&self) {
        self.window.record_success();
        if self.state() != CircuitState::HalfOpen {
            return;
        }
        self.decrement_inflight();
        let successes = self.half_open_successes.fetch_add(1, Ordering::AcqRel) + 1;
        if successes >= self.config.success_threshold {
            self.transition.with(|_| {
                if self.state() == CircuitState::HalfOpen {
                    log::debug!("circuit breaker closing after {} successes", successes);
                    self.window.reset();
                    self.state
                        .store(CircuitState::Closed as u8, Ordering::Release);
                }
            });
        }
    }

    /// Record a failed request
    pub fn record_failure(&self) {
        self.window.record_failure();
        match self.state() {
            CircuitState::HalfOpen => {
                self.decrement_inflight();
                // First failure during trial re-opens immediately.
                self.trip();
            }
            CircuitState::Closed => {
                if self.should_open() {
                    self.trip();
                }
            }
            CircuitState::Open => {}
        }
    }

    /// Force the breaker open now
    pub fn trip(&self) {
        self.transition.with(|_| {
            if self.state() != CircuitState::Open {
                log::debug!(
                    "circuit breaker opening (failures={} rate={:.2})",
                    self.window.failure_count(),
                    self.window.failure_rate()
                );
                self.opened_at_ms
                    .store(self.now_ms(), Ordering::Release);
                self.state.store(CircuitState::Open as u8, Ordering::Release);
            }
        });
    }

    /// Reset to closed and clear the window
    pub fn reset(&self) {
        self.transition.with(|_| {
            self.window.reset();
            self.half_open_inflight.store(0, Ordering::Release);
            self.half_open_successes.store(0, Ordering::Release);
            self.state
                .store(CircuitState::Closed as u8, Ordering::Release);
        });
    }

    fn should_open(&self) -> bool {
        if self.window.failure_count() >= self.config.failure_threshold {
            return true;
        }
        self.window.total_requests() >= self.config.min_requests
            && self.window.failure_rate() >= self.config.failure_rate_threshold
    }

    fn admit_half_open(&self) -> Result<(), ErrorCode> {
        loop {
            let inflight = self.half_open_inflight.load(Ordering::Acquire);
            if inflight >= self.config.half_open_max {
                return Err(ErrorCode::CircuitHalfOpen);
            }
            if self
                .half_open_inflight
                .compare_exchange(
                    inflight,
                    inflight + 1,
                    Ordering::AcqRel,
                    Ordering::Relaxed,
                )
                .is_ok()
            {
                return Ok(());
            }
        }
    }

    fn decrement_inflight(&self) {
        let _ = self
            .half_open_inflight
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |v| v.checked_sub(1));
    }

    fn now_ms(&self) -> u64 {
        self.epoch.elapsed().as_millis() as u64
    }

    fn open_elapsed(&self) -> Duration {
        let opened = self.opened_at_ms.load(Ordering::Acquire);
        Duration::from_millis(self.now_ms().saturating_sub(opened))
    }
}

/// Pool policy adapter: rejects submissions while the breaker is open
/// and feeds execution outcomes back into it
pub struct CircuitBreakerPolicy {
    breaker: Arc<CircuitBreaker>,
    enabled: std::sync::atomic::AtomicBool,
}

impl CircuitBreakerPolicy {
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self::with_breaker(Arc::new(CircuitBreaker::new(config)))
    }

    pub fn with_breaker(breaker: Arc<CircuitBreaker>) -> Self {
        Self {
            breaker,
            enabled: std::sync::atomic::AtomicBool::new(true),
        }
    }

    pub fn breaker(&self) -> &Arc<CircuitBreaker> {
        &self.breaker
    }

    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::Release);
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Acquire)
    }

    /// False only while the breaker is fully open
    pub fn is_accepting_work(&self) -> bool {
        !self.is_enabled() || self.breaker.state() != CircuitState::Open
    }
}

impl PoolPolicy for CircuitBreakerPolicy {
    fn name(&self) -> &str {
        "circuit_breaker"
    }

    fn on_enqueue(&self, _job: &dyn Job) -> TaskResult<()> {
        if !self.is_enabled() {
            return Ok(());
        }
        match self.breaker.admission() {
            Ok(()) => Ok(()),
            Err(ErrorCode::CircuitHalfOpen) => Err(ErrorInfo::with_message(
                ErrorCode::CircuitHalfOpen,
                "circuit breaker half-open and at trial capacity",
            )),
            Err(_) => Err(ErrorInfo::with_message(
                ErrorCode::CircuitOpen,
                "circuit breaker open",
            )),
        }
    }

    fn on_job_complete(&self, _job: &dyn Job, success: bool, _error: Option<&ErrorInfo>) {
        if !self.is_enabled() {
            return;
        }
        if success {
            self.breaker.record_success();
        } else {
            self.breaker.record_failure();
        }
    }
}
