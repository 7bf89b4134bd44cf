//! Pool metrics
//!
//! Hot-path counters are relaxed atomics; everything else hangs off an
//! opt-in enhanced level. External emission goes through the
//! [`MetricsSink`] boundary; no backend lives in this crate.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use crate::window::SlidingWindow;

/// Where metric values leave the process
///
/// Implemented by integration adapters; absence of a sink is normal and
/// costs nothing on the hot path.
pub trait MetricsSink: Send + Sync {
    /// Monotonic counter observation
    fn counter(&self, name: &str, value: u64);

    /// Point-in-time gauge observation
    fn gauge(&self, name: &str, value: f64);
}

/// How much the service records
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetricsLevel {
    /// Atomic counters only
    Basic,

    /// Counters plus throughput window and latency histogram
    Enhanced,
}

/// Execution-latency histogram bucket boundaries (nanoseconds)
const LATENCY_BOUNDS_NS: [u64; 7] = [
    1_000,          // 1us
    10_000,         // 10us
    100_000,        // 100us
    1_000_000,      // 1ms
    10_000_000,     // 10ms
    100_000_000,    // 100ms
    1_000_000_000,  // 1s
];

struct Enhanced {
    /// Executions over the last second
    throughput: SlidingWindow,

    /// Latency histogram; last slot is the overflow bucket
    latency: [AtomicU64; LATENCY_BOUNDS_NS.len() + 1],
}

/// Shared counter block owned by a pool, updated by its workers
pub struct MetricsService {
    tasks_submitted: AtomicU64,
    tasks_executed: AtomicU64,
    tasks_failed: AtomicU64,
    total_busy_ns: AtomicU64,
    total_idle_ns: AtomicU64,
    total_wait_ns: AtomicU64,
    steal_attempts: AtomicU64,
    steal_successes: AtomicU64,
    enhanced: Option<Enhanced>,
}

impl MetricsService {
    pub fn new(level: MetricsLevel) -> Self {
        const ZERO: AtomicU64 = AtomicU64::new(0);
        Self {
            tasks_submitted: AtomicU64::new(0),
            tasks_executed: AtomicU64::new(0),
            tasks_failed: AtomicU64::new(0),
            total_busy_ns: AtomicU64::new(0),
            total_idle_ns: AtomicU64::new(0),
            total_wait_ns: AtomicU64::new(0),
            steal_attempts: AtomicU64::new(0),
            steal_successes: AtomicU64::new(0),
            enhanced: match level {
                MetricsLevel::Basic => None,
                MetricsLevel::Enhanced => Some(Enhanced {
                    throughput: SlidingWindow::new(Duration::from_secs(1), 10),
                    latency: [ZERO; LATENCY_BOUNDS_NS.len() + 1],
                }),
            },
        }
    }

    #[inline]
    pub fn record_submitted(&self, n: u64) {
        self.tasks_submitted.fetch_add(n, Ordering::Relaxed);
    }

    /// Record a finished execution with its duration and queue wait
    pub fn record_executed(&self, success: bool, duration: Duration, wait: Duration) {
        self.tasks_executed.fetch_add(1, Ordering::Relaxed);
        if !success {
            self.tasks_failed.fetch_add(1, Ordering::Relaxed);
        }
        let busy_ns = duration.as_nanos() as u64;
        self.total_busy_ns.fetch_add(busy_ns, Ordering::Relaxed);
        self.total_wait_ns
            .fetch_add(wait.as_nanos() as u64, Ordering::Relaxed);

        if let Some(enhanced) = &self.enhanced {
            enhanced.throughput.record(1);
            let idx = LATENCY_BOUNDS_NS
                .iter()
                .position(|&bound| busy_ns <= bound)
                .unwrap_or(LATENCY_BOUNDS_NS.len());
            enhanced.latency[idx].fetch_add(1, Ordering::Relaxed);
        }
    }

    #[inline]
    pub fn record_idle(&self, idle: Duration) {
        self.total_idle_ns
            .fetch_add(idle.as_nanos() as u64, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_steal(&self, success: bool) {
        self.steal_attempts.fetch_add(1, Ordering::Relaxed);
        if success {
            self.steal_successes.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn tasks_submitted(&self) -> u64 {
        self.tasks_submitted.load(Ordering::Relaxed)
    }

    pub fn tasks_executed(&self) -> u64 {
        self.tasks_executed.load(Ordering::Relaxed)
    }

    pub fn tasks_failed(&self) -> u64 {
        self.tasks_failed.load(Ordering::Relaxed)
    }

    /// Executions per second; zero at Basic level
    pub fn throughput_per_sec(&self) -> f64 {
        self.enhanced
            .as_ref()
            .map(|e| e.throughput.rate_per_sec())
            .unwrap_or(0.0)
    }

    /// busy / (busy + idle); 0.0 before any accounting
    pub fn utilisation(&self) -> f64 {
        let busy = self.total_busy_ns.load(Ordering::Relaxed) as f64;
        let idle = self.total_idle_ns.load(Ordering::Relaxed) as f64;
        if busy + idle == 0.0 {
            return 0.0;
        }
        busy / (busy + idle)
    }

    /// Point-in-time copy of every counter
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            tasks_submitted: self.tasks_submitted.load(Ordering::Relaxed),
            tasks_executed: self.tasks_executed.load(Ordering::Relaxed),
            tasks_failed: self.tasks_failed.load(Ordering::Relaxed),
            total_busy_ns: self.total_busy_ns.load(Ordering::Relaxed),
            total_idle_ns: self.total_idle_ns.load(Ordering::Relaxed),
            total_wait_ns: self.total_wait_ns.load(Ordering::Relaxed),
            steal_attempts: self.steal_attempts.load(Ordering::Relaxed),
            steal_successes: self.steal_successes.load(Ordering::Relaxed),
        }
    }

    /// Push the current counters into a sink
    pub fn publish(&self, sink: &dyn MetricsSink) {
        let snap = self.snapshot();
        sink.counter("tasks_submitted", snap.tasks_submitted);
        sink.counter("tasks_executed", snap.tasks_executed);
        sink.counter("tasks_failed", snap.tasks_failed);
        sink.counter("steal_attempts", snap.steal_attempts);
        sink.counter("steal_successes", snap.steal_successes);
        sink.gauge("utilisation", self.utilisation());
        if self.enhanced.is_some() {
            sink.gauge("throughput_per_sec", self.throughput_per_sec());
        }
    }
}

/// Frozen view of the service counters
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub tasks_submitted: u64,
    pub tasks_executed: u64,
    pub tasks_failed: u64,
    pub total_busy_ns: u64,
    pub total_idle_ns: u64,
    pub total_wait_ns: u64,
    pub steal_attempts: u64,
    pub steal_successes: u64,
}

impl MetricsSnapshot {
    pub fn utilisation(&self) -> f64 {
        let total = (self.total_busy_ns + self.total_idle_ns) as f64;
        if total == 0.0 {
            return 0.0;
        }
        self.total_busy_ns as f64 / total
    }

    pub fn average_wait(&self) -> Duration {
        if self.tasks_executed == 0 {
            return Duration::ZERO;
        }
        Duration::from_nanos(self.total_wait_ns / self.tasks_executed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[test]
    fn test_basic_counters() {
        let metrics = MetricsService::new(MetricsLevel::Basic);
        metrics.record_submitted(3);
        metrics.record_executed(true, Duration::from_micros(5), Duration::from_micros(1));
        metrics.record_executed(false, Duration::from_micros(5), Duration::from_micros(1));

        assert_eq!(metrics.tasks_submitted(), 3);
        assert_eq!(metrics.tasks_executed(), 2);
        assert_eq!(metrics.tasks_failed(), 1);
    }

    #[test]
    fn test_utilisation() {
        let metrics = MetricsService::new(MetricsLevel::Basic);
        assert_eq!(metrics.utilisation(), 0.0);

        metrics.record_executed(true, Duration::from_millis(30), Duration::ZERO);
        metrics.record_idle(Duration::from_millis(10));
        let u = metrics.utilisation();
        assert!((u - 0.75).abs() < 0.01, "utilisation was {}", u);
    }

    #[test]
    fn test_enhanced_throughput() {
        let metrics = MetricsService::new(MetricsLevel::Enhanced);
        for _ in 0..100 {
            metrics.record_executed(true, Duration::from_micros(1), Duration::ZERO);
        }
        assert!(metrics.throughput_per_sec() > 0.0);

        let basic = MetricsService::new(MetricsLevel::Basic);
        basic.record_executed(true, Duration::from_micros(1), Duration::ZERO);
        assert_eq!(basic.throughput_per_sec(), 0.0);
    }

    #[test]
    fn test_snapshot_average_wait() {
        let metrics = MetricsService::new(MetricsLevel::Basic);
        metrics.record_executed(true, Duration::ZERO, Duration::from_millis(4));
        metrics.record_executed(true, Duration::ZERO, Duration::from_millis(2));

        let snap = metrics.snapshot();
        assert_eq!(snap.average_wait(), Duration::from_millis(3));
    }

    #[test]
    fn test_publish_to_sink() {
        struct Capture(Mutex<Vec<(String, u64)>>);
        impl MetricsSink for Capture {
            fn counter(&self, name: &str, value: u64) {
                self.0.lock().unwrap().push((name.to_string(), value));
            }
            fn gauge(&self, _name: &str, _value: f64) {}
        }

        let metrics = MetricsService::new(MetricsLevel::Basic);
        metrics.record_submitted(7);
        let sink = Capture(Mutex::new(Vec::new()));
        metrics.publish(&sink);

        let seen = sink.0.lock().unwrap();
        assert!(seen.contains(&("tasks_submitted".to_string(), 7)));
    }
}
