//! Perceptual fingerprinting of decoded images.
//!
//! A fingerprint is a 16x16 mean hash of the image content: identical content
//! maps to identical bits, and near-duplicate frames (recompressed, lightly
//! resized) map to nearby bit patterns. Cache lookups use exact equality;
//! Hamming distance is exposed for callers that want fuzzy comparison.

use std::fmt;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use image::DynamicImage;
use image_hasher::{HashAlg, Hasher, HasherConfig};

/// Hash dimensions in bits per side. 16x16 gives 256-bit fingerprints.
const HASH_SIZE: u32 = 16;

/// Hamming distance below which two fingerprints count as near-duplicates.
pub const NEAR_DUPLICATE_DISTANCE: u32 = 5;

/// Content-derived identifier for an image, used as the cache key.
///
/// Derived purely from pixel data, never from source URLs or request
/// metadata, so the same image reaches the same cache entry regardless of
/// where it was seen.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Fingerprint(Box<[u8]>);

impl Fingerprint {
    /// Number of differing bits between two fingerprints.
    pub fn hamming_distance(&self, other: &Fingerprint) -> u32 {
        self.0
            .iter()
            .zip(other.0.iter())
            .map(|(a, b)| (a ^ b).count_ones())
            .sum()
    }

    /// True when `other` is within the near-duplicate distance.
    pub fn is_near_duplicate(&self, other: &Fingerprint) -> bool {
        self.hamming_distance(other) < NEAR_DUPLICATE_DISTANCE
    }

    /// Base64 rendering used in log records and debugging output.
    pub fn to_base64(&self) -> String {
        BASE64.encode(&self.0)
    }

    #[cfg(test)]
    pub(crate) fn from_bytes(bytes: &[u8]) -> Self {
        Self(bytes.to_vec().into_boxed_slice())
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_base64())
    }
}

/// Computes mean-hash fingerprints of decoded images.
///
/// Hashing is cheap relative to classification, so it runs unconditionally
/// on every request, cache hits included.
pub struct PerceptualHasher {
    hasher: Hasher,
}

impl PerceptualHasher {
    pub fn new() -> Self {
        Self {
            hasher: HasherConfig::new()
                .hash_alg(HashAlg::Mean)
                .hash_size(HASH_SIZE, HASH_SIZE)
                .to_hasher(),
        }
    }

    pub fn fingerprint(&self, image: &DynamicImage) -> Fingerprint {
        let hash = self.hasher.hash_image(image);
        Fingerprint(hash.as_bytes().to_vec().into_boxed_slice())
    }
}

impl Default for PerceptualHasher {
    fn default() -> Self {
        Self::new()
    }
}
