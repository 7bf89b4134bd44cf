//! Sliding-window counters
//!
//! Two flavours over the same bucket scheme: [`FailureWindow`] tracks
//! success/failure pairs for the circuit breaker, [`SlidingWindow`] is a
//! plain event-rate counter used for contention tracking and enhanced
//! metrics. Both are lock-free on the record path; buckets are expired
//! lazily by stamping each with its absolute bucket number.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::OnceLock;
use std::time::{Duration, Instant};

/// Process epoch for monotonic millisecond arithmetic
fn epoch() -> Instant {
    static EPOCH: OnceLock<Instant> = OnceLock::new();
    *EPOCH.get_or_init(Instant::now)
}

#[inline]
fn now_ms() -> u64 {
    epoch().elapsed().as_millis() as u64
}

struct FailureBucket {
    successes: AtomicU64,
    failures: AtomicU64,
    /// Absolute bucket number this bucket currently represents
    stamp: AtomicU64,
}

impl FailureBucket {
    fn new() -> Self {
        Self {
            successes: AtomicU64::new(0),
            failures: AtomicU64::new(0),
            stamp: AtomicU64::new(u64::MAX),
        }
    }
}

/// Sliding-bucket success/failure counter
///
/// Counts are approximate at bucket boundaries, which is acceptable for
/// threshold decisions. All reads expire stale buckets implicitly.
pub struct FailureWindow {
    buckets: Vec<FailureBucket>,
    bucket_ms: u64,
}

impl FailureWindow {
    /// Create a window spanning `window` with `bucket_count` buckets
    pub fn new(window: Duration, bucket_count: usize) -> Self {
        let bucket_count = bucket_count.max(1);
        let bucket_ms = (window.as_millis() as u64 / bucket_count as u64).max(1);
        Self {
            buckets: (0..bucket_count).map(|_| FailureBucket::new()).collect(),
            bucket_ms,
        }
    }

    /// Record one successful request
    pub fn record_success(&self) {
        self.current_bucket().successes.fetch_add(1, Ordering::Relaxed);
    }

    /// Record one failed request
    pub fn record_failure(&self) {
        self.current_bucket().failures.fetch_add(1, Ordering::Relaxed);
    }

    /// Failures inside the window
    pub fn failure_count(&self) -> u64 {
        self.sum(|b| b.failures.load(Ordering::Relaxed))
    }

    /// Successes inside the window
    pub fn success_count(&self) -> u64 {
        self.sum(|b| b.successes.load(Ordering::Relaxed))
    }

    /// Total requests inside the window
    pub fn total_requests(&self) -> u64 {
        self.sum(|b| {
            b.successes.load(Ordering::Relaxed) + b.failures.load(Ordering::Relaxed)
        })
    }

    /// Failed fraction of requests in the window; 0.0 when empty
    pub fn failure_rate(&self) -> f64 {
        let total = self.total_requests();
        if total == 0 {
            return 0.0;
        }
        self.failure_count() as f64 / total as f64
    }

    /// Zero all buckets
    pub fn reset(&self) {
        for bucket in &self.buckets {
            bucket.successes.store(0, Ordering::Relaxed);
            bucket.failures.store(0, Ordering::Relaxed);
            bucket.stamp.store(u64::MAX, Ordering::Relaxed);
        }
    }

    fn current_bucket(&self) -> &FailureBucket {
        let number = now_ms() / self.bucket_ms;
        let bucket = &self.buckets[(number % self.buckets.len() as u64) as usize];
        let stamp = bucket.stamp.load(Ordering::Relaxed);
        if stamp != number {
            // This slot last served an older bucket number; claim and zero
            // it. Losing the race just means another thread did the reset.
            if bucket
                .stamp
                .compare_exchange(stamp, number, Ordering::Relaxed, Ordering::Relaxed)
                .is_ok()
            {
                bucket.successes.store(0, Ordering::Relaxed);
                bucket.failures.store(0, Ordering::Relaxed);
            }
        }
        bucket
    }

    fn sum(&self, f: impl Fn(&FailureBucket) -> u64) -> u64 {
        let current = now_ms() / self.bucket_ms;
        let span = self.buckets.len() as u64;
        let oldest_live = current.saturating_sub(span - 1);
        self.buckets
            .iter()
            .filter(|b| {
                let stamp = b.stamp.load(Ordering::Relaxed);
                stamp != u64::MAX && stamp >= oldest_live && stamp <= current
            })
            .map(f)
            .sum()
    }
}

struct RateBucket {
    count: AtomicU64,
    stamp: AtomicU64,
}

/// Lock-free bucketed event-rate counter
pub struct SlidingWindow {
    buckets: Vec<RateBucket>,
    bucket_ms: u64,
    window_ms: u64,
}

impl SlidingWindow {
    pub fn new(window: Duration, bucket_count: usize) -> Self {
        let bucket_count = bucket_count.max(1);
        let window_ms = (window.as_millis() as u64).max(1);
        let bucket_ms = (window_ms / bucket_count as u64).max(1);
        Self {
            buckets: (0..bucket_count)
                .map(|_| RateBucket {
                    count: AtomicU64::new(0),
                    stamp: AtomicU64::new(u64::MAX),
                })
                .collect(),
            bucket_ms,
            window_ms,
        }
    }

    /// Record `n` events now
    pub fn record(&self, n: u64) {
        let number = now_ms() / self.bucket_ms;
        let bucket = &self.buckets[(number % self.buckets.len() as u64) as usize];
        let stamp = bucket.stamp.load(Ordering::Relaxed);
        if stamp != number
            && bucket
                .stamp
                .compare_exchange(stamp, number, Ordering::Relaxed, Ordering::Relaxed)
                .is_ok()
        {
            bucket.count.store(0, Ordering::Relaxed);
        }
        bucket.count.fetch_add(n, Ordering::Relaxed);
    }

    /// Events recorded inside the window
    pub fn count(&self) -> u64 {
        let current = now_ms() / self.bucket_ms;
        let span = self.buckets.len() as u64;
        let oldest_live = current.saturating_sub(span - 1);
        self.buckets
            .iter()
            .filter(|b| {
                let stamp = b.stamp.load(Ordering::Relaxed);
                stamp != u64::MAX && stamp >= oldest_live && stamp <= current
            })
            .map(|b| b.count.load(Ordering::Relaxed))
            .sum()
    }

    /// Events per second over the window span
    pub fn rate_per_sec(&self) -> f64 {
        self.count() as f64 * 1000.0 / self.window_ms as f64
    }

    /// Zero all buckets
    pub fn reset(&self) {
        for bucket in &self.buckets {
            bucket.count.store(0, Ordering::Relaxed);
            bucket.stamp.store(u64::MAX, Ordering::Relaxed);
        }
    }
}
