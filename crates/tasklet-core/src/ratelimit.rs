//! Token-bucket rate limiter
//!
//! `try_acquire` is non-blocking by contract. Callers that want to wait
//! should sleep for `wait_hint(n)` and retry.

use std::time::{Duration, Instant};

use crate::ticket_lock::TicketLock;

struct BucketState {
    /// Current token count, <= capacity at all times
    tokens: f64,

    /// Last refill instant
    last_refill: Instant,
}

/// Rate limiter holding replenishing tokens
pub struct TokenBucket {
    capacity: f64,
    refill_per_sec: f64,
    state: TicketLock<BucketState>,
}

impl TokenBucket {
    /// Create a bucket that starts full
    ///
    /// `capacity` is the burst size; `refill_per_sec` the sustained rate.
    /// Non-positive values are clamped to a minimal working bucket.
    pub fn new(capacity: f64, refill_per_sec: f64) -> Self {
        let capacity = capacity.max(1.0);
        Self {
            capacity,
            refill_per_sec: refill_per_sec.max(0.0),
            state: TicketLock::new(BucketState {
                tokens: capacity,
                last_refill: Instant::now(),
            }),
        }
    }

    /// Try to take `n` tokens; false if not enough are available
    pub fn try_acquire(&self, n: f64) -> bool {
        if n <= 0.0 {
            return true;
        }
        let capacity = self.capacity;
        let rate = self.refill_per_sec;
        self.state.with(|state| {
            refill(state, capacity, rate);
            if state.tokens >= n {
                state.tokens -= n;
                true
            } else {
                false
            }
        })
    }

    /// Tokens currently available (after refill)
    pub fn available(&self) -> f64 {
        let capacity = self.capacity;
        let rate = self.refill_per_sec;
        self.state.with(|state| {
            refill(state, capacity, rate);
            state.tokens
        })
    }

    /// How long a caller should sleep before `n` tokens could be available
    ///
    /// Zero if they are available now. Callers still have to `try_acquire`
    /// afterwards; another thread may have drained the bucket meanwhile.
    pub fn wait_hint(&self, n: f64) -> Duration {
        let n = n.min(self.capacity);
        let capacity = self.capacity;
        let rate = self.refill_per_sec;
        self.state.with(|state| {
            refill(state, capacity, rate);
            if state.tokens >= n || rate <= 0.0 {
                return Duration::ZERO;
            }
            Duration::from_secs_f64((n - state.tokens) / rate)
        })
    }

    /// Burst capacity
    #[inline]
    pub fn capacity(&self) -> f64 {
        self.capacity
    }
}

fn refill(state: &mut BucketState, capacity: f64, rate: f64) {
    let now = Instant::now();
    let elapsed = now.duration_since(state.last_refill).as_secs_f64();
    if elapsed > 0.0 {
        state.tokens = (state.tokens + elapsed * rate).min(capacity);
        state.last_refill = now;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn test_bucket_starts_full() {
        let bucket = TokenBucket::new(10.0, 5.0);
        assert!((bucket.available() - 10.0).abs() < 0.01);
    }

    #[test]
    fn test_acquire_drains_then_fails() {
        let bucket = TokenBucket::new(10.0, 0.0);
        let mut granted = 0;
        for _ in 0..20 {
            if bucket.try_acquire(1.0) {
                granted += 1;
            }
        }
        assert_eq!(granted, 10);
        assert!(!bucket.try_acquire(1.0));
    }

    #[test]
    fn test_tokens_never_exceed_capacity() {
        let bucket = TokenBucket::new(4.0, 1000.0);
        thread::sleep(Duration::from_millis(20));
        assert!(bucket.available() <= 4.0);
    }

    #[test]
    fn test_refill_restores_tokens() {
        let bucket = TokenBucket::new(2.0, 100.0);
        assert!(bucket.try_acquire(2.0));
        assert!(!bucket.try_acquire(1.0));

        thread::sleep(Duration::from_millis(30));
        assert!(bucket.try_acquire(1.0));
    }

    #[test]
    fn test_wait_hint() {
        let bucket = TokenBucket::new(10.0, 10.0);
        assert!(bucket.try_acquire(10.0));

        let hint = bucket.wait_hint(1.0);
        assert!(hint > Duration::ZERO);
        assert!(hint <= Duration::from_millis(150));
    }

    #[test]
    fn test_zero_cost_acquire_always_succeeds() {
        let bucket = TokenBucket::new(1.0, 0.0);
        assert!(bucket.try_acquire(0.0));
        assert!(bucket.try_acquire(1.0));
        assert!(bucket.try_acquire(0.0));
    }
}
