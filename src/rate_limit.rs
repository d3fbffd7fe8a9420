//! Per-identity rate limiting for classifier admission.
//!
//! Uses a token bucket algorithm with in-memory storage. Buckets are kept per
//! identity key (client id, IP, or the global default) and refill over time,
//! so a burst of images on initial page load is tolerated while sustained
//! load on the classifier stays bounded by the refill rate.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

/// Identity key used when the caller does not distinguish clients.
pub const GLOBAL_IDENTITY: &str = "global";

/// Rate limiter configuration
#[derive(Debug, Clone, Copy)]
pub struct RateLimitConfig {
    /// Maximum tokens (burst capacity)
    pub max_tokens: u32,
    /// Tokens added per second
    pub refill_rate: f64,
}

struct Bucket {
    tokens: f64,
    last_refill: Instant,
}

/// Per-identity rate limiter using the token bucket algorithm.
///
/// Rejection is a signal, not a retry: callers decide whether to back off or
/// surface a throttling error.
pub struct RateLimiter {
    config: RateLimitConfig,
    buckets: Mutex<HashMap<String, Bucket>>,
}

impl RateLimiter {
    pub fn new(config: RateLimitConfig) -> Self {
        Self {
            config,
            buckets: Mutex::new(HashMap::new()),
        }
    }

    /// Check whether a request from `identity` is admitted, consuming one
    /// token when it is.
    pub fn admit(&self, identity: &str) -> bool {
        self.admit_at(identity, Instant::now())
    }

    /// Whole tokens currently available to `identity`.
    pub fn remaining(&self, identity: &str) -> u32 {
        self.remaining_at(identity, Instant::now())
    }

    /// Time until the bucket for `identity` is fully refilled.
    pub fn reset_after(&self, identity: &str) -> Duration {
        self.reset_after_at(identity, Instant::now())
    }

    /// Drop buckets idle for longer than `max_idle` to bound key cardinality.
    /// Call periodically to prevent memory growth.
    pub fn prune(&self, max_idle: Duration) {
        let mut buckets = self.buckets.lock().unwrap();
        let now = Instant::now();
        buckets.retain(|_, bucket| now.duration_since(bucket.last_refill) < max_idle);
    }

    fn admit_at(&self, identity: &str, now: Instant) -> bool {
        let mut buckets = self.buckets.lock().unwrap();
        let bucket = Self::refill(&self.config, &mut buckets, identity, now);

        if bucket.tokens >= 1.0 {
            bucket.tokens -= 1.0;
            true
        } else {
            false
        }
    }

    fn remaining_at(&self, identity: &str, now: Instant) -> u32 {
        let mut buckets = self.buckets.lock().unwrap();
        Self::refill(&self.config, &mut buckets, identity, now).tokens as u32
    }

    fn reset_after_at(&self, identity: &str, now: Instant) -> Duration {
        let mut buckets = self.buckets.lock().unwrap();
        let tokens = Self::refill(&self.config, &mut buckets, identity, now).tokens;
        let needed = f64::from(self.config.max_tokens) - tokens;

        if self.config.refill_rate > 0.0 {
            Duration::from_secs_f64(needed / self.config.refill_rate)
        } else {
            Duration::ZERO
        }
    }

    /// Refill `identity`'s bucket for the elapsed time, clamped to capacity.
    fn refill<'a>(
        config: &RateLimitConfig,
        buckets: &'a mut HashMap<String, Bucket>,
        identity: &str,
        now: Instant,
    ) -> &'a mut Bucket {
        let bucket = buckets.entry(identity.to_owned()).or_insert_with(|| Bucket {
            tokens: f64::from(config.max_tokens),
            last_refill: now,
        });

        let elapsed = now.duration_since(bucket.last_refill);
        let refill = elapsed.as_secs_f64() * config.refill_rate;
        bucket.tokens = (bucket.tokens + refill).min(f64::from(config.max_tokens));
        bucket.last_refill = now;

        bucket
    }
}
