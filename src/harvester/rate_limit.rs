//! Adaptive token-bucket rate limiting
//!
//! One limiter is shared by every outbound request. Tokens refill at the current
//! rate up to `capacity`; a 429 from upstream throttles the rate and each success
//! nudges it back towards the configured base.

use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};
use tokio::time::sleep;
use tracing::{debug, warn};

/// Floor for the throttled rate (requests per second)
pub const MIN_RATE: f64 = 0.5;

/// Factor applied by [`RateLimiter::throttle`] on a rate-limit response
pub const THROTTLE_FACTOR: f64 = 0.5;

/// Factor applied by [`RateLimiter::recover`] after a success
pub const RECOVER_FACTOR: f64 = 1.2;

#[derive(Debug)]
struct Bucket {
    tokens: f64,
    rate: f64,
    last_refill: Instant,
}

impl Bucket {
    fn refill(&mut self, capacity: f64) {
        let now = Instant::now();
        let elapsed = now.duration_since(self.last_refill).as_secs_f64();
        self.tokens = (self.tokens + elapsed * self.rate).min(capacity);
        self.last_refill = now;
    }
}

/// Token bucket with throttle/recover
#[derive(Debug)]
pub struct RateLimiter {
    bucket: Mutex<Bucket>,
    capacity: f64,
    base_rate: f64,
    min_rate: f64,
}

impl RateLimiter {
    /// Create a limiter issuing `rate` tokens per second with a burst of `capacity`
    ///
    /// The bucket starts full.
    pub fn new(rate: f64, capacity: f64) -> Self {
        let base_rate = if rate.is_finite() && rate > 0.0 { rate } else { MIN_RATE };
        let capacity = capacity.max(1.0);
        Self {
            bucket: Mutex::new(Bucket {
                tokens: capacity,
                rate: base_rate,
                last_refill: Instant::now(),
            }),
            capacity,
            base_rate,
            min_rate: MIN_RATE.min(base_rate),
        }
    }

    fn bucket(&self) -> MutexGuard<'_, Bucket> {
        self.bucket.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Take one token, waiting exactly as long as needed for it to accrue
    ///
    /// A caller that finds the bucket short reserves its token immediately by
    /// driving the balance negative, then sleeps off the deficit. Concurrent
    /// callers therefore queue behind each other and issuance stays at the
    /// configured rate without holding the lock across the sleep.
    ///
    /// Not cancel-safe: dropping the future mid-sleep forfeits the reserved token.
    pub async fn acquire(&self) {
        let wait = {
            let mut bucket = self.bucket();
            bucket.refill(self.capacity);
            bucket.tokens -= 1.0;
            if bucket.tokens < 0.0 {
                Duration::from_secs_f64(-bucket.tokens / bucket.rate)
            } else {
                Duration::ZERO
            }
        };

        if !wait.is_zero() {
            debug!(wait_ms = wait.as_millis() as u64, "Waiting for rate limit token");
            sleep(wait).await;
        }
    }

    /// Multiply the current rate by `factor`, floored at the minimum rate
    ///
    /// Returns the new rate.
    pub fn throttle(&self, factor: f64) -> f64 {
        let mut bucket = self.bucket();
        bucket.refill(self.capacity);
        let previous = bucket.rate;
        bucket.rate = (bucket.rate * factor).max(self.min_rate);
        warn!(
            previous_rate = previous,
            new_rate = bucket.rate,
            "Rate limiter throttled"
        );
        crate::metrics::record_rate_limiter_rate(bucket.rate);
        bucket.rate
    }

    /// Multiply the current rate by `factor`, capped at the base rate
    ///
    /// Returns the new rate.
    pub fn recover(&self, factor: f64) -> f64 {
        let mut bucket = self.bucket();
        if bucket.rate >= self.base_rate {
            return bucket.rate;
        }
        bucket.refill(self.capacity);
        bucket.rate = (bucket.rate * factor).min(self.base_rate);
        debug!(new_rate = bucket.rate, "Rate limiter recovering");
        crate::metrics::record_rate_limiter_rate(bucket.rate);
        bucket.rate
    }

    /// Current effective rate (tokens per second)
    pub fn current_rate(&self) -> f64 {
        self.bucket().rate
    }

    /// Configured base rate
    pub fn base_rate(&self) -> f64 {
        self.base_rate
    }

    /// Bucket capacity
    pub fn capacity(&self) -> f64 {
        self.capacity
    }

    /// Tokens available right now (negative while callers are queued)
    pub fn available_tokens(&self) -> f64 {
        let mut bucket = self.bucket();
        bucket.refill(self.capacity);
        bucket.tokens
    }
}
