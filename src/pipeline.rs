//! End-to-end request orchestration.
//!
//! Per-request flow: decode, fingerprint, cache lookup, then on a miss
//! admission control, classification, and cache population. Cache lookup runs
//! before admission so repeated images are never throttled, and the
//! classifier call runs outside every lock so distinct images classify in
//! parallel while only colliding briefly on bookkeeping.

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use anyhow::anyhow;
use bytes::Bytes;
use chrono::Utc;
use log::{debug, info, warn};
use serde::Serialize;
use uuid::Uuid;

use crate::cache::{CacheStats, ResultCache};
use crate::classifier::{Classifier, ClassifierScores};
use crate::config::PipelineConfig;
use crate::detection::DetectionResult;
use crate::error::PipelineError;
use crate::hashing::{Fingerprint, PerceptualHasher};
use crate::rate_limit::{GLOBAL_IDENTITY, RateLimiter};
use crate::record::{AnalysisRecord, RecordOutcome, RecordResult, RecordSink};
use crate::stats::{PipelineStats, StatsSnapshot};

/// Where a request came from, as reported by the caller.
#[derive(Debug, Clone, Default)]
pub struct SourceContext {
    /// Page URL, "screen", or whatever the caller uses to name the source.
    pub source: String,
    /// URL of the image itself, when known.
    pub image_url: Option<String>,
    /// Client identity for rate limiting; `None` shares the global bucket.
    pub client: Option<String>,
}

impl SourceContext {
    pub fn new(source: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            image_url: None,
            client: None,
        }
    }

    pub fn with_client(mut self, client: impl Into<String>) -> Self {
        self.client = Some(client.into());
        self
    }

    pub fn with_image_url(mut self, image_url: impl Into<String>) -> Self {
        self.image_url = Some(image_url.into());
        self
    }

    fn identity(&self) -> &str {
        self.client.as_deref().unwrap_or(GLOBAL_IDENTITY)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Offline,
}

/// Health surface reflecting the classifier collaborator's state.
#[derive(Debug, Clone, Serialize)]
pub struct Health {
    pub status: HealthStatus,
    pub model_loaded: bool,
    pub device: String,
}

/// Shared request pipeline wrapping the classifier collaborator.
///
/// Create one per process and hand it to every caller; all internal state
/// (cache, buckets, counters) is synchronized internally.
pub struct DetectionPipeline {
    config: PipelineConfig,
    hasher: PerceptualHasher,
    cache: Mutex<ResultCache>,
    limiter: RateLimiter,
    classifier: Arc<dyn Classifier>,
    sink: Arc<dyn RecordSink>,
    stats: PipelineStats,
}

impl DetectionPipeline {
    pub fn new(
        config: PipelineConfig,
        classifier: Arc<dyn Classifier>,
        sink: Arc<dyn RecordSink>,
    ) -> Self {
        Self {
            hasher: PerceptualHasher::new(),
            cache: Mutex::new(ResultCache::new(config.cache_capacity, config.cache_max_age)),
            limiter: RateLimiter::new(config.rate_limit),
            classifier,
            sink,
            stats: PipelineStats::default(),
            config,
        }
    }

    /// Run one image through the pipeline.
    ///
    /// Cache hits return immediately and are never throttled. Misses pass
    /// admission control before the classifier runs under the configured
    /// timeout; only successful classifications are cached.
    pub async fn handle_request(
        &self,
        image: Bytes,
        ctx: &SourceContext,
    ) -> Result<DetectionResult, PipelineError> {
        let request_id = Uuid::new_v4();
        let started = Instant::now();

        let decoded = match image::load_from_memory(&image) {
            Ok(decoded) => decoded,
            Err(e) => {
                self.stats.record_failure();
                return Err(PipelineError::InvalidImage(e));
            }
        };
        let fingerprint = self.hasher.fingerprint(&decoded);

        let cached = self.cache.lock().unwrap().lookup(&fingerprint);
        if let Some(hit) = cached {
            debug!("cache hit for {fingerprint} ({})", ctx.source);
            self.stats.record_hit(hit.is_ai);
            self.emit(request_id, &fingerprint, ctx, RecordOutcome::Completed, Some(&hit));
            return Ok(hit);
        }

        let identity = ctx.identity();
        if !self.limiter.admit(identity) {
            warn!("rate limited request from {identity} ({})", ctx.source);
            self.stats.record_rejected();
            self.emit(request_id, &fingerprint, ctx, RecordOutcome::Rejected, None);
            return Err(PipelineError::RateLimited {
                remaining: self.limiter.remaining(identity),
                retry_after: self.limiter.reset_after(identity),
            });
        }

        let scores = match self.classify_with_timeout(decoded).await {
            Ok(scores) => scores,
            Err(e) => {
                warn!("classification failed for {fingerprint}: {e:#}");
                self.stats.record_failure();
                return Err(PipelineError::ClassificationFailed(e));
            }
        };

        let elapsed_ms = started.elapsed().as_secs_f64() * 1000.0;
        let result = DetectionResult::from_scores(scores, &self.config.thresholds, elapsed_ms);

        self.cache
            .lock()
            .unwrap()
            .insert(fingerprint.clone(), result.clone());
        self.stats.record_miss(result.is_ai);
        info!(
            "classified {fingerprint} as {} in {elapsed_ms:.1}ms",
            result.verdict.as_str()
        );
        self.emit(request_id, &fingerprint, ctx, RecordOutcome::Completed, Some(&result));

        Ok(result)
    }

    /// Aggregate counters since process start.
    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    /// Cache counters and occupancy.
    pub fn cache_stats(&self) -> CacheStats {
        self.cache.lock().unwrap().stats()
    }

    /// Drop every cached result, e.g. after a model swap.
    pub fn clear_cache(&self) {
        self.cache.lock().unwrap().clear();
    }

    /// Drop rate-limit buckets idle for longer than `max_idle`.
    pub fn prune_identities(&self, max_idle: Duration) {
        self.limiter.prune(max_idle);
    }

    /// Health of the classifier collaborator.
    pub fn health(&self) -> Health {
        let loaded = self.classifier.is_loaded();
        Health {
            status: if loaded {
                HealthStatus::Healthy
            } else {
                HealthStatus::Offline
            },
            model_loaded: loaded,
            device: self.classifier.info().device,
        }
    }

    /// Run the classifier on a blocking worker under the configured timeout.
    /// No pipeline lock is held while inference runs.
    async fn classify_with_timeout(
        &self,
        image: image::DynamicImage,
    ) -> anyhow::Result<ClassifierScores> {
        let classifier = Arc::clone(&self.classifier);
        let task = tokio::task::spawn_blocking(move || classifier.classify(&image));

        match tokio::time::timeout(self.config.classify_timeout, task).await {
            Ok(Ok(result)) => result,
            Ok(Err(join_error)) => Err(anyhow!("classifier task panicked: {join_error}")),
            Err(_) => Err(anyhow!(
                "classification timed out after {:?}",
                self.config.classify_timeout
            )),
        }
    }

    fn emit(
        &self,
        request_id: Uuid,
        fingerprint: &Fingerprint,
        ctx: &SourceContext,
        outcome: RecordOutcome,
        result: Option<&DetectionResult>,
    ) {
        let record = AnalysisRecord {
            timestamp: Utc::now(),
            request_id,
            fingerprint: fingerprint.to_base64(),
            source: ctx.source.clone(),
            image_url: ctx.image_url.clone(),
            outcome,
            result: result.map(RecordResult::from),
            processing_time_ms: result
                .map(|r| (r.processing_time_ms * 100.0).round() / 100.0)
                .unwrap_or(0.0),
            model: self.classifier.info(),
            cache_hit: result.is_some_and(|r| r.cache_hit),
        };
        self.sink.record(&record);
    }
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use image::{DynamicImage, ImageBuffer, ImageFormat, Rgba};

    use super::*;
    use crate::classifier::ModelInfo;
    use crate::config::VerdictThresholds;
    use crate::rate_limit::RateLimitConfig;
    use crate::record::NullSink;

    /// Classifier returning fixed scores and counting invocations.
    struct ScriptedClassifier {
        scores: ClassifierScores,
        calls: AtomicUsize,
    }

    impl ScriptedClassifier {
        fn new(ai_probability: f64) -> Self {
            Self {
                scores: ClassifierScores {
                    ai_probability,
                    real_probability: 1.0 - ai_probability,
                },
                calls: AtomicUsize::new(0),
            }
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    impl Classifier for ScriptedClassifier {
        fn classify(&self, _image: &DynamicImage) -> anyhow::Result<ClassifierScores> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.scores)
        }

        fn info(&self) -> ModelInfo {
            ModelInfo {
                name: "scripted".to_string(),
                device: "cpu".to_string(),
            }
        }

        fn is_loaded(&self) -> bool {
            true
        }
    }

    struct FailingClassifier {
        calls: AtomicUsize,
    }

    impl Classifier for FailingClassifier {
        fn classify(&self, _image: &DynamicImage) -> anyhow::Result<ClassifierScores> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Err(anyhow!("model backend unavailable"))
        }

        fn info(&self) -> ModelInfo {
            ModelInfo {
                name: "failing".to_string(),
                device: "cpu".to_string(),
            }
        }

        fn is_loaded(&self) -> bool {
            true
        }
    }

    struct SlowClassifier {
        delay: Duration,
    }

    impl Classifier for SlowClassifier {
        fn classify(&self, _image: &DynamicImage) -> anyhow::Result<ClassifierScores> {
            std::thread::sleep(self.delay);
            Ok(ClassifierScores {
                ai_probability: 0.9,
                real_probability: 0.1,
            })
        }

        fn info(&self) -> ModelInfo {
            ModelInfo {
                name: "slow".to_string(),
                device: "cpu".to_string(),
            }
        }

        fn is_loaded(&self) -> bool {
            true
        }
    }

    /// Sink collecting records for assertions.
    #[derive(Default)]
    struct CollectingSink {
        records: Mutex<Vec<AnalysisRecord>>,
    }

    impl RecordSink for CollectingSink {
        fn record(&self, record: &AnalysisRecord) {
            self.records.lock().unwrap().push(record.clone());
        }
    }

    /// PNG bytes for a deterministic image; distinct seeds produce images
    /// with distinct fingerprints.
    fn png_bytes(seed: u64) -> Bytes {
        let image = DynamicImage::ImageRgba8(ImageBuffer::from_fn(64, 64, |x, y| {
            let block = ((x / 8) as u64) ^ (((y / 8) as u64) << 8) ^ (seed << 16);
            let v = block.wrapping_mul(0x9E37_79B9_7F4A_7C15);
            Rgba([(v >> 56) as u8, (v >> 48) as u8, (v >> 40) as u8, 255])
        }));

        let mut encoded = Cursor::new(Vec::new());
        image.write_to(&mut encoded, ImageFormat::Png).expect("encode png");
        Bytes::from(encoded.into_inner())
    }

    fn test_config() -> PipelineConfig {
        PipelineConfig {
            cache_capacity: 8,
            cache_max_age: None,
            rate_limit: RateLimitConfig {
                max_tokens: 100,
                refill_rate: 100.0,
            },
            classify_timeout: Duration::from_secs(5),
            thresholds: VerdictThresholds::default(),
        }
    }

    fn pipeline_with(
        config: PipelineConfig,
        classifier: Arc<dyn Classifier>,
    ) -> DetectionPipeline {
        DetectionPipeline::new(config, classifier, Arc::new(NullSink))
    }

    #[tokio::test]
    async fn repeated_image_is_served_from_cache() {
        let classifier = Arc::new(ScriptedClassifier::new(0.9));
        let pipeline = pipeline_with(test_config(), classifier.clone());
        let ctx = SourceContext::new("https://example.com");

        let first = pipeline
            .handle_request(png_bytes(1), &ctx)
            .await
            .expect("first request");
        let second = pipeline
            .handle_request(png_bytes(1), &ctx)
            .await
            .expect("second request");

        assert!(!first.cache_hit);
        assert!(second.cache_hit);
        assert_eq!(first.verdict, second.verdict);
        assert_eq!(first.confidence, second.confidence);
        assert_eq!(first.is_ai, second.is_ai);
        assert_eq!(classifier.calls(), 1);

        let stats = pipeline.stats();
        assert_eq!(stats.total_requests, 2);
        assert_eq!(stats.cache_hits, 1);
        assert_eq!(stats.cache_misses, 1);
        assert_eq!(stats.ai_detections, 2);
    }

    #[tokio::test]
    async fn rejected_request_never_reaches_classifier() {
        let classifier = Arc::new(ScriptedClassifier::new(0.9));
        let config = PipelineConfig {
            rate_limit: RateLimitConfig {
                max_tokens: 1,
                refill_rate: 0.001,
            },
            ..test_config()
        };
        let pipeline = pipeline_with(config, classifier.clone());
        let ctx = SourceContext::new("https://example.com");

        pipeline
            .handle_request(png_bytes(1), &ctx)
            .await
            .expect("admitted request");

        let rejected = pipeline.handle_request(png_bytes(2), &ctx).await;
        match rejected {
            Err(PipelineError::RateLimited { remaining, .. }) => assert_eq!(remaining, 0),
            other => panic!("expected RateLimited, got {other:?}"),
        }

        assert_eq!(classifier.calls(), 1);
        let stats = pipeline.stats();
        assert_eq!(stats.total_requests, 2);
        assert_eq!(stats.rejected, 1);
        assert_eq!(stats.cache_misses, 1);
    }

    #[tokio::test]
    async fn cache_hits_are_never_throttled() {
        let classifier = Arc::new(ScriptedClassifier::new(0.9));
        let config = PipelineConfig {
            rate_limit: RateLimitConfig {
                max_tokens: 1,
                refill_rate: 0.001,
            },
            ..test_config()
        };
        let pipeline = pipeline_with(config, classifier.clone());
        let ctx = SourceContext::new("https://example.com");

        pipeline
            .handle_request(png_bytes(1), &ctx)
            .await
            .expect("admitted request");

        // The bucket is empty, but the repeat of an already-seen image is a
        // cache hit and bypasses admission entirely.
        let hit = pipeline
            .handle_request(png_bytes(1), &ctx)
            .await
            .expect("cache hit");
        assert!(hit.cache_hit);
        assert_eq!(classifier.calls(), 1);
    }

    #[tokio::test]
    async fn failed_classification_is_not_cached() {
        let classifier = Arc::new(FailingClassifier {
            calls: AtomicUsize::new(0),
        });
        let pipeline = pipeline_with(test_config(), classifier.clone());
        let ctx = SourceContext::new("screen");

        for _ in 0..2 {
            let result = pipeline.handle_request(png_bytes(1), &ctx).await;
            assert!(matches!(result, Err(PipelineError::ClassificationFailed(_))));
        }

        // No partial result was cached, so the second attempt classified again.
        assert_eq!(classifier.calls.load(Ordering::SeqCst), 2);
        assert_eq!(pipeline.cache_stats().size, 0);

        let stats = pipeline.stats();
        assert_eq!(stats.total_requests, 2);
        assert_eq!(stats.failures, 2);
        assert_eq!(stats.cache_hits + stats.cache_misses, 0);
    }

    #[tokio::test]
    async fn slow_classifier_times_out() {
        let config = PipelineConfig {
            classify_timeout: Duration::from_millis(50),
            ..test_config()
        };
        let pipeline = pipeline_with(
            config,
            Arc::new(SlowClassifier {
                delay: Duration::from_millis(500),
            }),
        );
        let ctx = SourceContext::new("screen");

        let result = pipeline.handle_request(png_bytes(1), &ctx).await;

        assert!(matches!(result, Err(PipelineError::ClassificationFailed(_))));
        assert_eq!(pipeline.cache_stats().size, 0);
        assert_eq!(pipeline.stats().failures, 1);
    }

    #[tokio::test]
    async fn undecodable_payload_fails_fast() {
        let classifier = Arc::new(ScriptedClassifier::new(0.9));
        let pipeline = pipeline_with(test_config(), classifier.clone());
        let ctx = SourceContext::new("https://example.com");

        let result = pipeline
            .handle_request(Bytes::from_static(b"definitely not an image"), &ctx)
            .await;

        assert!(matches!(result, Err(PipelineError::InvalidImage(_))));
        assert_eq!(classifier.calls(), 0);

        let stats = pipeline.stats();
        assert_eq!(stats.total_requests, 1);
        assert_eq!(stats.failures, 1);
        // The cache was never consulted.
        assert_eq!(pipeline.cache_stats().misses, 0);
    }

    #[tokio::test]
    async fn records_cover_completed_and_rejected_requests() {
        let sink = Arc::new(CollectingSink::default());
        let config = PipelineConfig {
            rate_limit: RateLimitConfig {
                max_tokens: 1,
                refill_rate: 0.001,
            },
            ..test_config()
        };
        let pipeline = DetectionPipeline::new(
            config,
            Arc::new(ScriptedClassifier::new(0.9)),
            sink.clone(),
        );
        let ctx = SourceContext::new("https://example.com/page")
            .with_image_url("https://example.com/image.png")
            .with_client("203.0.113.7");

        pipeline
            .handle_request(png_bytes(1), &ctx)
            .await
            .expect("admitted request");
        let _ = pipeline.handle_request(png_bytes(2), &ctx).await;

        let records = sink.records.lock().unwrap();
        assert_eq!(records.len(), 2);

        assert_eq!(records[0].outcome, RecordOutcome::Completed);
        assert!(records[0].result.is_some());
        assert_eq!(records[0].source, "https://example.com/page");
        assert_eq!(
            records[0].image_url.as_deref(),
            Some("https://example.com/image.png")
        );
        assert_eq!(records[0].model.name, "scripted");

        assert_eq!(records[1].outcome, RecordOutcome::Rejected);
        assert!(records[1].result.is_none());
        assert_ne!(records[0].fingerprint, records[1].fingerprint);
        assert_ne!(records[0].request_id, records[1].request_id);
    }

    #[tokio::test]
    async fn counters_stay_consistent_across_mixed_traffic() {
        let pipeline = pipeline_with(test_config(), Arc::new(ScriptedClassifier::new(0.2)));
        let ctx = SourceContext::new("screen");

        // Two distinct images, each requested twice: two misses, two hits.
        for seed in [1, 2, 1, 2] {
            pipeline
                .handle_request(png_bytes(seed), &ctx)
                .await
                .expect("completed request");
        }

        let stats = pipeline.stats();
        assert_eq!(stats.cache_hits + stats.cache_misses, stats.total_requests);
        assert_eq!(stats.cache_hits, 2);
        assert_eq!(stats.cache_misses, 2);
        assert_eq!(stats.ai_detections, 0);
        assert_eq!(stats.cache_hit_rate_percent, 50.0);
    }

    #[tokio::test]
    async fn eviction_follows_recency_under_small_capacity() {
        let classifier = Arc::new(ScriptedClassifier::new(0.9));
        let config = PipelineConfig {
            cache_capacity: 2,
            ..test_config()
        };
        let pipeline = pipeline_with(config, classifier.clone());
        let ctx = SourceContext::new("screen");

        // Fill with A and B, touch A, then insert C: B is evicted.
        for seed in [1, 2, 1, 3] {
            pipeline
                .handle_request(png_bytes(seed), &ctx)
                .await
                .expect("completed request");
        }
        assert_eq!(classifier.calls(), 3);

        // A still cached, B classifies again.
        let a = pipeline
            .handle_request(png_bytes(1), &ctx)
            .await
            .expect("request for A");
        assert!(a.cache_hit);
        let b = pipeline
            .handle_request(png_bytes(2), &ctx)
            .await
            .expect("request for B");
        assert!(!b.cache_hit);
        assert_eq!(classifier.calls(), 4);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_requests_for_one_image_agree() {
        let classifier = Arc::new(ScriptedClassifier::new(0.9));
        let pipeline = Arc::new(pipeline_with(test_config(), classifier.clone()));

        let mut handles = Vec::new();
        for _ in 0..8 {
            let pipeline = Arc::clone(&pipeline);
            let image = png_bytes(1);
            handles.push(tokio::spawn(async move {
                pipeline
                    .handle_request(image, &SourceContext::new("screen"))
                    .await
            }));
        }

        for handle in handles {
            let result = handle.await.expect("task join").expect("request");
            assert!(result.is_ai);
        }

        // Concurrent misses may each classify (no single-flight), but they
        // all land on the same cache entry.
        assert!(classifier.calls() >= 1);
        assert_eq!(pipeline.cache_stats().size, 1);

        let stats = pipeline.stats();
        assert_eq!(stats.total_requests, 8);
        assert_eq!(stats.cache_hits + stats.cache_misses, 8);
    }

    #[tokio::test]
    async fn health_reflects_classifier_state() {
        let healthy = pipeline_with(test_config(), Arc::new(ScriptedClassifier::new(0.5)));
        let health = healthy.health();
        assert_eq!(health.status, HealthStatus::Healthy);
        assert!(health.model_loaded);
        assert_eq!(health.device, "cpu");

        let offline = pipeline_with(test_config(), Arc::new(crate::classifier::NoOpClassifier));
        let health = offline.health();
        assert_eq!(health.status, HealthStatus::Offline);
        assert!(!health.model_loaded);
    }

    #[tokio::test]
    async fn uncertain_band_respects_configured_thresholds() {
        let config = PipelineConfig {
            thresholds: VerdictThresholds {
                likely_ai: 0.8,
                likely_real: 0.8,
            },
            ..test_config()
        };
        let pipeline = pipeline_with(config, Arc::new(ScriptedClassifier::new(0.7)));
        let ctx = SourceContext::new("screen");

        let result = pipeline
            .handle_request(png_bytes(1), &ctx)
            .await
            .expect("completed request");

        assert_eq!(result.verdict, crate::detection::Verdict::Uncertain);
        assert!(!result.is_ai);
        assert_eq!(result.confidence, 0.7);
    }
}
