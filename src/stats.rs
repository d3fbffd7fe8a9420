//! Process-wide request counters.
//!
//! Counters are monotonic for the lifetime of the process and reset only on
//! restart; there is no persistence. They are lock-free so the hot path never
//! serializes on bookkeeping.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

/// Snapshot of the pipeline counters.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct StatsSnapshot {
    /// Every request received, including rejected and failed ones.
    pub total_requests: u64,
    /// Completed requests whose result was `is_ai`.
    pub ai_detections: u64,
    /// Completed requests served from cache.
    pub cache_hits: u64,
    /// Completed requests that went through classification.
    pub cache_misses: u64,
    /// Requests denied by the rate limiter.
    pub rejected: u64,
    /// Requests that never resolved: undecodable input, classifier errors,
    /// timeouts.
    pub failures: u64,
    /// Share of completed requests served from cache, in percent.
    pub cache_hit_rate_percent: f64,
}

/// Shared counters updated by the pipeline on every request.
#[derive(Default)]
pub struct PipelineStats {
    total_requests: AtomicU64,
    ai_detections: AtomicU64,
    cache_hits: AtomicU64,
    cache_misses: AtomicU64,
    rejected: AtomicU64,
    failures: AtomicU64,
}

impl PipelineStats {
    pub fn record_hit(&self, is_ai: bool) {
        self.total_requests.fetch_add(1, Ordering::Relaxed);
        self.cache_hits.fetch_add(1, Ordering::Relaxed);
        if is_ai {
            self.ai_detections.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn record_miss(&self, is_ai: bool) {
        self.total_requests.fetch_add(1, Ordering::Relaxed);
        self.cache_misses.fetch_add(1, Ordering::Relaxed);
        if is_ai {
            self.ai_detections.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn record_rejected(&self) {
        self.total_requests.fetch_add(1, Ordering::Relaxed);
        self.rejected.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_failure(&self) {
        self.total_requests.fetch_add(1, Ordering::Relaxed);
        self.failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        let cache_hits = self.cache_hits.load(Ordering::Relaxed);
        let cache_misses = self.cache_misses.load(Ordering::Relaxed);
        let completed = cache_hits + cache_misses;

        let cache_hit_rate_percent = if completed > 0 {
            cache_hits as f64 / completed as f64 * 100.0
        } else {
            0.0
        };

        StatsSnapshot {
            total_requests: self.total_requests.load(Ordering::Relaxed),
            ai_detections: self.ai_detections.load(Ordering::Relaxed),
            cache_hits,
            cache_misses,
            rejected: self.rejected.load(Ordering::Relaxed),
            failures: self.failures.load(Ordering::Relaxed),
            cache_hit_rate_percent,
        }
    }
}
