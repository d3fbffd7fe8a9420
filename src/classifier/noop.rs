use anyhow::Result;
use image::DynamicImage;

use super::{Classifier, ClassifierScores, ModelInfo};

/// No-op classifier that scores everything as real - for testing or opt-out
pub struct NoOpClassifier;

impl NoOpClassifier {
    pub fn new() -> Self {
        Self
    }
}

impl Default for NoOpClassifier {
    fn default() -> Self {
        Self::new()
    }
}

impl Classifier for NoOpClassifier {
    fn classify(&self, _image: &DynamicImage) -> Result<ClassifierScores> {
        Ok(ClassifierScores {
            ai_probability: 0.0,
            real_probability: 1.0,
        })
    }

    fn info(&self) -> ModelInfo {
        ModelInfo {
            name: "noop".to_string(),
            device: "none".to_string(),
        }
    }

    fn is_loaded(&self) -> bool {
        false
    }
}
