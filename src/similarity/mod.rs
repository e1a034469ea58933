//! Near-duplicate detection.
//!
//! Two strategies share the same pairwise ranking: perceptual hashes compared
//! by Hamming distance, and embedding vectors compared by cosine similarity.
//!
//! Every scan compares all n·(n-1)/2 unordered pairs of images that have a
//! usable signal. There is no index, so cost grows quadratically with the
//! gallery size; this is fine for single-user galleries of a few thousand
//! images and is the first thing to revisit beyond that.

pub mod hashing;
pub mod vector;

use rayon::prelude::*;
use serde::Serialize;
use std::cmp::Ordering;

use crate::db::{Image, ImageSummary};

pub use hashing::{hamming_distance, hash_similarity, HashEngine};
pub use vector::{cosine_similarity, VectorEngine};

pub const DEFAULT_THRESHOLD: f64 = 0.92;

/// A strategy for turning images into comparable signals.
pub trait SimilarityEngine: Sync {
    type Signal: Send;

    fn name(&self) -> &'static str;

    /// Extract the comparison signal for an image.
    /// `None` excludes the image from the scan.
    fn signal(&self, image: &Image) -> Option<Self::Signal>;

    /// Similarity between two signals, in [0, 1].
    fn similarity(&self, a: &Self::Signal, b: &Self::Signal) -> f64;
}

/// Two images judged similar by a scan.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SimilarityPair {
    pub image_a: ImageSummary,
    pub image_b: ImageSummary,
    /// Percentage in [0, 100], rounded to two decimals.
    pub similarity: f64,
}

/// Parse a user-supplied threshold, clamping to [0, 1].
/// Missing, non-numeric or non-finite input yields `default`.
pub fn parse_threshold(raw: Option<&str>, default: f64) -> f64 {
    raw.and_then(|value| value.trim().parse::<f64>().ok())
        .filter(|value| value.is_finite())
        .map(clamp_threshold)
        .unwrap_or(default)
}

pub fn clamp_threshold(threshold: f64) -> f64 {
    threshold.clamp(0.0, 1.0)
}

/// Convert a [0, 1] similarity to a percentage with two decimals.
pub fn to_percent(similarity: f64) -> f64 {
    (similarity * 10000.0).round() / 100.0
}

/// Compare every unordered pair once and keep those at or above `threshold`,
/// best first.
pub fn rank_pairs<T, F>(items: &[(ImageSummary, T)], threshold: f64, mut compare: F) -> Vec<SimilarityPair>
where
    F: FnMut(&T, &T) -> f64,
{
    let mut results = Vec::new();

    for (i, (summary_a, signal_a)) in items.iter().enumerate() {
        for (summary_b, signal_b) in &items[i + 1..] {
            let similarity = compare(signal_a, signal_b);
            if similarity >= threshold {
                results.push(SimilarityPair {
                    image_a: summary_a.clone(),
                    image_b: summary_b.clone(),
                    similarity: to_percent(similarity),
                });
            }
        }
    }

    results.sort_by(|a, b| b.similarity.partial_cmp(&a.similarity).unwrap_or(Ordering::Equal));
    results
}

/// Run a full scan over `images` with the given engine.
pub fn scan<E: SimilarityEngine>(engine: &E, images: &[Image], threshold: f64) -> Vec<SimilarityPair> {
    let signals: Vec<(ImageSummary, E::Signal)> = images
        .par_iter()
        .filter_map(|image| engine.signal(image).map(|signal| (image.summary(), signal)))
        .collect();

    tracing::debug!(
        engine = engine.name(),
        images = images.len(),
        usable = signals.len(),
        threshold,
        "Running similarity scan"
    );

    if signals.len() < 2 {
        return Vec::new();
    }

    rank_pairs(&signals, threshold, |a, b| engine.similarity(a, b))
}
