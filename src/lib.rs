//! Shared detection pipeline for the Argus AI image detector.
//!
//! Both the desktop screen monitor and the extension-facing API embed this
//! crate to classify images as AI-generated or real. The pipeline wraps a
//! pluggable [`Classifier`] with a perceptual-hash result cache, a token
//! bucket rate limiter, and per-request statistics and record emission.
//!
//! Screen capture, overlay rendering, DOM scanning, and the HTTP server all
//! live in the embedding applications; they talk to this crate exclusively
//! through [`DetectionPipeline`].

pub mod cache;
pub mod classifier;
pub mod config;
pub mod detection;
pub mod error;
pub mod hashing;
pub mod pipeline;
pub mod rate_limit;
pub mod record;
pub mod stats;

pub use cache::{CacheStats, ResultCache};
pub use classifier::{Classifier, ClassifierScores, ModelInfo, NoOpClassifier};
pub use config::{PipelineConfig, VerdictThresholds};
pub use detection::{DetectionResult, Verdict};
pub use error::PipelineError;
pub use hashing::{Fingerprint, PerceptualHasher};
pub use pipeline::{DetectionPipeline, Health, HealthStatus, SourceContext};
pub use rate_limit::{RateLimitConfig, RateLimiter};
pub use record::{AnalysisRecord, JsonLogSink, NullSink, RecordOutcome, RecordSink};
pub use stats::StatsSnapshot;
