//! Requeue delay calculation.
//!
//! Two limits combined, the larger delay wins:
//! - per-key exponential backoff with jitter, reset by [`RateLimiter::forget`]
//! - an overall token bucket shared by every key

use rand::Rng;
use std::collections::HashMap;
use std::hash::Hash;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::time::Instant;

use crate::config::RetryConfig;

/// Calculate exponential backoff delay with jitter.
///
/// `failures` counts previous failures of the key; the first requeue waits
/// `base_ms`.
pub fn calculate_backoff(failures: u32, base_ms: u64, max_ms: u64) -> Duration {
    let exponential_base = 2u64.saturating_pow(failures);
    let delay_ms = base_ms.saturating_mul(exponential_base);
    let capped_delay = delay_ms.min(max_ms);

    // 0 to 10% of the delay
    let jitter_range = capped_delay / 10;
    let jitter = if jitter_range > 0 {
        rand::thread_rng().gen_range(0..jitter_range)
    } else {
        0
    };

    Duration::from_millis(capped_delay.saturating_add(jitter))
}

/// Overall bucket. Instead of rejecting, it hands out a reservation: the time
/// until the caller's token becomes available.
#[derive(Debug)]
struct TokenBucket {
    tokens: f64,
    capacity: f64,
    refill_rate: f64,
    last_update: Instant,
}

impl TokenBucket {
    fn new(qps: u32, burst: u32) -> Self {
        let capacity = f64::from(burst.max(1));
        Self {
            tokens: capacity,
            capacity,
            refill_rate: f64::from(qps.max(1)),
            last_update: Instant::now(),
        }
    }

    fn reserve(&mut self) -> Duration {
        let now = Instant::now();
        let elapsed = now.duration_since(self.last_update).as_secs_f64();

        self.tokens = (self.tokens + elapsed * self.refill_rate).min(self.capacity);
        self.last_update = now;
        self.tokens -= 1.0;

        if self.tokens >= 0.0 {
            Duration::ZERO
        } else {
            Duration::from_secs_f64(-self.tokens / self.refill_rate)
        }
    }
}

#[derive(Debug)]
struct Inner<K> {
    failures: HashMap<K, u32>,
    bucket: TokenBucket,
}

/// Decides how long a failed key waits before it is processed again.
#[derive(Debug)]
pub struct RateLimiter<K> {
    base_ms: u64,
    max_ms: u64,
    inner: Mutex<Inner<K>>,
}

impl<K: Eq + Hash + Clone> RateLimiter<K> {
    pub fn new(config: &RetryConfig) -> Self {
        Self {
            base_ms: config.base_delay_ms,
            max_ms: config.max_delay_ms,
            inner: Mutex::new(Inner {
                failures: HashMap::new(),
                bucket: TokenBucket::new(config.qps, config.burst),
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner<K>> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Delay for the next requeue of `key`; counts as one more failure.
    pub fn when(&self, key: &K) -> Duration {
        let mut inner = self.lock();
        let failures = inner.failures.entry(key.clone()).or_insert(0);
        let backoff = calculate_backoff(*failures, self.base_ms, self.max_ms);
        *failures = failures.saturating_add(1);

        backoff.max(inner.bucket.reserve())
    }

    /// Clear the failure history of `key`.
    pub fn forget(&self, key: &K) {
        self.lock().failures.remove(key);
    }

    /// Failures recorded for `key` since the last [`forget`](Self::forget).
    pub fn num_requeues(&self, key: &K) -> u32 {
        self.lock().failures.get(key).copied().unwrap_or(0)
    }
}

impl<K: Eq + Hash + Clone> Default for RateLimiter<K> {
    fn default() -> Self {
        Self::new(&RetryConfig::default())
    }
}
