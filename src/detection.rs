//! Detection outcome types shared across the pipeline surface.

use serde::{Deserialize, Serialize};

use crate::classifier::ClassifierScores;
use crate::config::VerdictThresholds;

/// Three-way classification outcome derived from the classifier's scores.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Verdict {
    #[serde(rename = "Likely AI")]
    LikelyAi,
    #[serde(rename = "Uncertain")]
    Uncertain,
    #[serde(rename = "Likely Real")]
    LikelyReal,
}

impl Verdict {
    pub fn as_str(&self) -> &'static str {
        match self {
            Verdict::LikelyAi => "Likely AI",
            Verdict::Uncertain => "Uncertain",
            Verdict::LikelyReal => "Likely Real",
        }
    }
}

/// Immutable result of one classification request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DetectionResult {
    pub is_ai: bool,
    /// Probability backing the verdict, in `[0, 1]`.
    pub confidence: f64,
    pub verdict: Verdict,
    pub ai_probability: f64,
    pub real_probability: f64,
    pub processing_time_ms: f64,
    /// True when this copy was served from the result cache.
    pub cache_hit: bool,
}

impl DetectionResult {
    /// Derive a result from raw classifier scores.
    ///
    /// A verdict leans AI or real only when the matching probability clears
    /// its configured threshold; anything in between is uncertain, reported
    /// with the stronger of the two probabilities as confidence.
    pub fn from_scores(
        scores: ClassifierScores,
        thresholds: &VerdictThresholds,
        processing_time_ms: f64,
    ) -> Self {
        let (verdict, is_ai, confidence) = if scores.ai_probability > thresholds.likely_ai {
            (Verdict::LikelyAi, true, scores.ai_probability)
        } else if scores.real_probability > thresholds.likely_real {
            (Verdict::LikelyReal, false, scores.real_probability)
        } else {
            let confidence = scores.ai_probability.max(scores.real_probability);
            (Verdict::Uncertain, false, confidence)
        };

        Self {
            is_ai,
            confidence,
            verdict,
            ai_probability: scores.ai_probability,
            real_probability: scores.real_probability,
            processing_time_ms,
            cache_hit: false,
        }
    }
}
