//! Bounded LRU cache of detection results keyed by perceptual fingerprint.
//!
//! Classification dominates request cost, and browsing sessions re-surface
//! the same images constantly (page re-scans, refreshes, repeated screenshots
//! of unchanged screen content), so a small recency-based cache eliminates
//! most repeat inference at O(1) expected cost. Lookups use exact fingerprint
//! equality; near-duplicate matching is left to the hash function's stability
//! under re-encoding.

use std::num::NonZeroUsize;
use std::time::{Duration, Instant};

use lru::LruCache;
use serde::Serialize;

use crate::detection::DetectionResult;
use crate::hashing::Fingerprint;

struct CacheEntry {
    result: DetectionResult,
    inserted_at: Instant,
    last_accessed_at: Instant,
}

/// Cache counters exposed through the stats surface.
///
/// Hits and misses are counted per lookup, independent of whether the
/// request later completes.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub size: usize,
    pub capacity: usize,
}

/// Bounded result cache with strict LRU eviction and optional max-age.
pub struct ResultCache {
    entries: LruCache<Fingerprint, CacheEntry>,
    max_age: Option<Duration>,
    hits: u64,
    misses: u64,
}

impl ResultCache {
    pub fn new(capacity: usize, max_age: Option<Duration>) -> Self {
        Self {
            entries: LruCache::new(
                NonZeroUsize::new(capacity).expect("cache capacity must be > 0"),
            ),
            max_age,
            hits: 0,
            misses: 0,
        }
    }

    /// Look up a fingerprint, refreshing recency on a hit.
    ///
    /// A hit returns a copy of the stored result with `cache_hit` set. An
    /// entry past `max_age` is removed and counted as a miss.
    pub fn lookup(&mut self, fingerprint: &Fingerprint) -> Option<DetectionResult> {
        self.lookup_at(fingerprint, Instant::now())
    }

    /// Insert or refresh an entry. A new key at capacity evicts exactly the
    /// least-recently-used entry; an existing key is updated in place.
    pub fn insert(&mut self, fingerprint: Fingerprint, result: DetectionResult) {
        self.insert_at(fingerprint, result, Instant::now());
    }

    /// Drop every cached entry. Counters are preserved.
    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn contains(&self, fingerprint: &Fingerprint) -> bool {
        self.entries.contains(fingerprint)
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits,
            misses: self.misses,
            size: self.entries.len(),
            capacity: self.entries.cap().get(),
        }
    }

    fn lookup_at(&mut self, fingerprint: &Fingerprint, now: Instant) -> Option<DetectionResult> {
        let expired = match self.entries.get_mut(fingerprint) {
            Some(entry)
                if self
                    .max_age
                    .is_none_or(|max_age| now.duration_since(entry.inserted_at) < max_age) =>
            {
                entry.last_accessed_at = now;
                self.hits += 1;
                let mut result = entry.result.clone();
                result.cache_hit = true;
                return Some(result);
            }
            Some(_) => true,
            None => false,
        };

        if expired {
            self.entries.pop(fingerprint);
        }
        self.misses += 1;
        None
    }

    fn insert_at(&mut self, fingerprint: Fingerprint, result: DetectionResult, now: Instant) {
        self.entries.put(
            fingerprint,
            CacheEntry {
                result,
                inserted_at: now,
                last_accessed_at: now,
            },
        );
    }

    #[cfg(test)]
    fn last_accessed(&self, fingerprint: &Fingerprint) -> Option<Instant> {
        self.entries.peek(fingerprint).map(|entry| entry.last_accessed_at)
    }
}
