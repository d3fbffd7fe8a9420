//! Pipeline configuration.
//!
//! Defaults match the production deployment; every knob can be overridden
//! through `ARGUS_*` environment variables.

use std::env;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::rate_limit::RateLimitConfig;

/// Confidence thresholds separating the uncertain band from a firm verdict.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct VerdictThresholds {
    /// Minimum AI probability for a `LikelyAi` verdict.
    pub likely_ai: f64,
    /// Minimum real probability for a `LikelyReal` verdict.
    pub likely_real: f64,
}

impl Default for VerdictThresholds {
    fn default() -> Self {
        Self {
            likely_ai: 0.6,
            likely_real: 0.6,
        }
    }
}

/// Tunables for the detection pipeline.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Maximum number of cached results.
    pub cache_capacity: usize,
    /// Entries older than this are treated as absent at lookup time.
    /// `None` disables age-based expiry.
    pub cache_max_age: Option<Duration>,
    /// Token bucket governing classifier admission.
    pub rate_limit: RateLimitConfig,
    /// Upper bound on a single classifier call.
    pub classify_timeout: Duration,
    pub thresholds: VerdictThresholds,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            cache_capacity: 100,
            cache_max_age: Some(Duration::from_secs(300)),
            // Burst of 30 requests, sustained rate of 30/min.
            rate_limit: RateLimitConfig {
                max_tokens: 30,
                refill_rate: 0.5,
            },
            classify_timeout: Duration::from_secs(30),
            thresholds: VerdictThresholds::default(),
        }
    }
}

impl PipelineConfig {
    /// Build a config from the environment, falling back to defaults.
    ///
    /// `ARGUS_CACHE_MAX_AGE_SECS=0` disables age-based expiry.
    pub fn from_env() -> Self {
        let defaults = Self::default();

        Self {
            cache_capacity: env_parsed("ARGUS_CACHE_CAPACITY")
                .filter(|v| *v > 0)
                .unwrap_or(defaults.cache_capacity),
            cache_max_age: match env_parsed::<u64>("ARGUS_CACHE_MAX_AGE_SECS") {
                Some(0) => None,
                Some(secs) => Some(Duration::from_secs(secs)),
                None => defaults.cache_max_age,
            },
            rate_limit: RateLimitConfig {
                max_tokens: env_parsed("ARGUS_RATE_LIMIT_BURST")
                    .filter(|v| *v > 0)
                    .unwrap_or(defaults.rate_limit.max_tokens),
                refill_rate: env_parsed("ARGUS_RATE_LIMIT_PER_SEC")
                    .filter(|v| *v > 0.0)
                    .unwrap_or(defaults.rate_limit.refill_rate),
            },
            classify_timeout: env_parsed("ARGUS_CLASSIFY_TIMEOUT_SECS")
                .filter(|v| *v > 0)
                .map(Duration::from_secs)
                .unwrap_or(defaults.classify_timeout),
            thresholds: VerdictThresholds {
                likely_ai: env_parsed("ARGUS_AI_THRESHOLD")
                    .unwrap_or(defaults.thresholds.likely_ai),
                likely_real: env_parsed("ARGUS_REAL_THRESHOLD")
                    .unwrap_or(defaults.thresholds.likely_real),
            },
        }
    }
}

fn env_parsed<T: FromStr>(key: &str) -> Option<T> {
    env::var(key).ok().and_then(|s| s.parse().ok())
}
