//! Request-level error taxonomy.

use std::time::Duration;

use thiserror::Error;

/// Errors surfaced to callers of
/// [`DetectionPipeline::handle_request`](crate::DetectionPipeline::handle_request).
///
/// Cache and limiter bookkeeping cannot fail; everything here is bad input,
/// admission control, or the classifier collaborator. Nothing is swallowed or
/// retried internally.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// The payload could not be decoded as an image. Raised before hashing,
    /// so the cache and limiter are never touched.
    #[error("invalid image data: {0}")]
    InvalidImage(#[from] image::ImageError),

    /// Admission denied by the token bucket. Recoverable by the caller with
    /// retry/backoff; the pipeline itself never retries.
    #[error("rate limit exceeded, retry in {retry_after:?}")]
    RateLimited {
        /// Whole tokens left for this identity.
        remaining: u32,
        /// Time until the identity's bucket is fully refilled.
        retry_after: Duration,
    },

    /// The classifier collaborator failed or timed out. Nothing was cached,
    /// so a later request for the same image classifies again.
    #[error("classification failed: {0}")]
    ClassificationFailed(#[source] anyhow::Error),
}
