//! Structured per-request records for the logging collaborator.
//!
//! The pipeline emits one record per completed or rejected request. Where
//! records end up (JSONL files, a database, nowhere) is the embedding
//! application's choice via [`RecordSink`].

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use crate::classifier::ModelInfo;
use crate::detection::{DetectionResult, Verdict};

/// Terminal state the request reached.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordOutcome {
    Completed,
    Rejected,
}

/// Verdict fields embedded in a record.
#[derive(Debug, Clone, Serialize)]
pub struct RecordResult {
    pub is_ai: bool,
    pub confidence: f64,
    pub verdict: Verdict,
    pub ai_probability: f64,
    pub real_probability: f64,
}

impl From<&DetectionResult> for RecordResult {
    fn from(result: &DetectionResult) -> Self {
        Self {
            is_ai: result.is_ai,
            confidence: result.confidence,
            verdict: result.verdict,
            ai_probability: result.ai_probability,
            real_probability: result.real_probability,
        }
    }
}

/// One completed or rejected request, as handed to the record sink.
#[derive(Debug, Clone, Serialize)]
pub struct AnalysisRecord {
    pub timestamp: DateTime<Utc>,
    pub request_id: Uuid,
    /// Base64 perceptual hash of the analyzed image.
    pub fingerprint: String,
    /// Caller-supplied source identifier (page URL, "screen", ...).
    pub source: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image_url: Option<String>,
    pub outcome: RecordOutcome,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<RecordResult>,
    pub processing_time_ms: f64,
    pub model: ModelInfo,
    pub cache_hit: bool,
}

/// Receives analysis records. Implementations are called from concurrent
/// requests and must not block for long.
pub trait RecordSink: Send + Sync {
    fn record(&self, record: &AnalysisRecord);
}

/// Default sink: one JSON line per record through the `log` facade.
pub struct JsonLogSink;

impl RecordSink for JsonLogSink {
    fn record(&self, record: &AnalysisRecord) {
        match serde_json::to_string(record) {
            Ok(line) => log::info!(target: "argus::analysis", "{line}"),
            Err(e) => log::warn!("failed to serialize analysis record: {e}"),
        }
    }
}

/// Sink that discards every record - for testing or opt-out
pub struct NullSink;

impl RecordSink for NullSink {
    fn record(&self, _record: &AnalysisRecord) {}
}
