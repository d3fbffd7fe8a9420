//! Classifier collaborator boundary.
//!
//! The actual model (architecture, weight loading, inference) lives outside
//! this crate. The pipeline only needs raw class scores plus enough metadata
//! to answer health checks and annotate log records.

use anyhow::Result;
use image::DynamicImage;
use serde::{Deserialize, Serialize};

/// Raw scores from one forward pass over the AI/real classes.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ClassifierScores {
    /// Probability the image is AI-generated, in `[0, 1]`.
    pub ai_probability: f64,
    /// Probability the image is a real photograph, in `[0, 1]`.
    pub real_probability: f64,
}

/// Model metadata surfaced through health checks and log records.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelInfo {
    pub name: String,
    pub device: String,
}

/// Pluggable image classifier service.
pub trait Classifier: Send + Sync {
    /// Score a decoded image. May be slow (GPU-bound); the pipeline runs this
    /// off the async runtime under a bounded timeout.
    fn classify(&self, image: &DynamicImage) -> Result<ClassifierScores>;

    /// Model metadata for health checks and log records.
    fn info(&self) -> ModelInfo;

    /// Whether the model weights are loaded and ready to serve.
    fn is_loaded(&self) -> bool;
}

mod noop;

pub use noop::NoOpClassifier;
