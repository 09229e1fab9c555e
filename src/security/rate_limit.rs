//! Per-application, per-client rate limiting.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

/// Bucket count above which idle buckets are dropped on insert.
const PRUNE_THRESHOLD: usize = 10_000;

/// `ratelimit { limit: 10; interval: 1000; }`: `limit` requests per `interval`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitPolicy {
    pub limit: u32,
    pub interval: Duration,
}

impl RateLimitPolicy {
    fn capacity(&self) -> f64 {
        self.limit as f64
    }

    /// Tokens per second.
    fn refill_rate(&self) -> f64 {
        let secs = self.interval.as_secs_f64();
        if secs <= 0.0 {
            f64::INFINITY
        } else {
            self.limit as f64 / secs
        }
    }
}

/// A simple token bucket rate limiter.
struct TokenBucket {
    tokens: f64,
    last_update: Instant,
}

impl TokenBucket {
    fn new(capacity: f64) -> Self {
        Self {
            tokens: capacity,
            last_update: Instant::now(),
        }
    }

    fn try_acquire(&mut self, capacity: f64, refill_rate: f64) -> bool {
        let now = Instant::now();
        let elapsed = now.duration_since(self.last_update).as_secs_f64();

        // Refill tokens
        self.tokens = (self.tokens + elapsed * refill_rate).min(capacity);
        self.last_update = now;

        if self.tokens >= 1.0 {
            self.tokens -= 1.0;
            true
        } else {
            false
        }
    }
}

/// Buckets for one application, keyed by client address.
#[derive(Default)]
pub struct RateLimiter {
    buckets: Mutex<HashMap<String, TokenBucket>>,
}

impl RateLimiter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Take one token for `client`. Returns false when the bucket is empty.
    pub fn check(&self, policy: &RateLimitPolicy, client: &str) -> bool {
        let mut buckets = self.buckets.lock().expect("rate limiter mutex poisoned");

        if buckets.len() >= PRUNE_THRESHOLD && !buckets.contains_key(client) {
            let idle = policy.interval.max(Duration::from_secs(1)) * 2;
            buckets.retain(|_, bucket| bucket.last_update.elapsed() < idle);
        }

        let bucket = buckets
            .entry(client.to_string())
            .or_insert_with(|| TokenBucket::new(policy.capacity()));

        bucket.try_acquire(policy.capacity(), policy.refill_rate())
    }

    /// Forget every client, e.g. after the policy changed.
    pub fn reset(&self) {
        self.buckets.lock().expect("rate limiter mutex poisoned").clear();
    }

    pub fn tracked_clients(&self) -> usize {
        self.buckets.lock().expect("rate limiter mutex poisoned").len()
    }
}

impl std::fmt::Debug for RateLimiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RateLimiter")
            .field("tracked_clients", &self.tracked_clients())
            .finish()
    }
}
