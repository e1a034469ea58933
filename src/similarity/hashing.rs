//! Perceptual hashing over a 16x16 grayscale reduction.

use anyhow::{anyhow, Result};
use std::path::{Path, PathBuf};

use super::SimilarityEngine;
use crate::db::Image;
use crate::storage::resolve_image_path;

/// Side of the grayscale grid the hash is computed from (256 bits, 64 hex digits).
pub const HASH_SIZE: u32 = 16;

/// Compute the perceptual hash of an image file as lowercase hex.
/// Unreadable or undecodable files yield `None`.
pub fn compute_hash(path: &Path) -> Option<String> {
    match perceptual_hash(path) {
        Ok(hash) => Some(hash),
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "Failed to hash image");
            None
        }
    }
}

fn perceptual_hash(path: &Path) -> Result<String> {
    use img_hash::{HashAlg, HasherConfig};

    let img = image::open(path)?;

    // Shrink first so the hasher's own resize works on a small image
    let gray = img.thumbnail(64, 64).to_luma8();
    let (width, height) = gray.dimensions();

    let hash_image = img_hash::image::GrayImage::from_raw(width, height, gray.into_raw())
        .ok_or_else(|| anyhow!("Failed to create image for hashing"))?;

    let hasher = HasherConfig::new()
        .hash_size(HASH_SIZE, HASH_SIZE)
        .hash_alg(HashAlg::Mean)
        .to_hasher();

    let hash = hasher.hash_image(&img_hash::image::DynamicImage::ImageLuma8(hash_image));

    Ok(hash.as_bytes().iter().map(|b| format!("{:02x}", b)).collect())
}

fn hex_value(digit: u8) -> Option<u32> {
    char::from(digit).to_digit(16)
}

/// Bitwise Hamming distance between two hex strings.
///
/// Positions past the end of the shorter hash count as 4 differing bits each.
/// A position where either character is not a hex digit contributes nothing.
pub fn hamming_distance(hash_a: &str, hash_b: &str) -> u32 {
    let (a, b) = (hash_a.as_bytes(), hash_b.as_bytes());

    let common: u32 = a
        .iter()
        .zip(b)
        .map(|(&x, &y)| match (hex_value(x), hex_value(y)) {
            (Some(x), Some(y)) => (x ^ y).count_ones(),
            _ => 0,
        })
        .sum();

    common + (a.len().abs_diff(b.len()) as u32) * 4
}

/// Similarity in [0, 1]: `1 - distance / (4 * max(len_a, len_b))`.
/// Two empty hashes are defined as 0.
pub fn hash_similarity(hash_a: &str, hash_b: &str) -> f64 {
    let total_bits = 4 * hash_a.len().max(hash_b.len());
    if total_bits == 0 {
        return 0.0;
    }
    1.0 - hamming_distance(hash_a, hash_b) as f64 / total_bits as f64
}

/// Hash-based strategy. Hashes are computed from the stored files at scan time.
pub struct HashEngine {
    uploads_dir: PathBuf,
}

impl HashEngine {
    pub fn new(uploads_dir: impl Into<PathBuf>) -> Self {
        Self {
            uploads_dir: uploads_dir.into(),
        }
    }
}

impl SimilarityEngine for HashEngine {
    type Signal = String;

    fn name(&self) -> &'static str {
        "perceptual-hash"
    }

    fn signal(&self, image: &Image) -> Option<String> {
        let Some(path) = resolve_image_path(&image.url, &self.uploads_dir) else {
            tracing::debug!(image_id = %image.id, url = %image.url, "Image file not found, skipping");
            return None;
        };
        compute_hash(&path)
    }

    fn similarity(&self, a: &String, b: &String) -> f64 {
        hash_similarity(a, b)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::similarity::scan;
    use chrono::Utc;
    use image::{GrayImage, Luma};

    fn write_pattern(path: &Path, invert: bool) {
        let img = GrayImage::from_fn(64, 64, |x, y| {
            let on = (x / 16 + y / 16) % 2 == 0;
            Luma([if on != invert { 255 } else { 0 }])
        });
        img.save(path).unwrap();
    }

    fn image_record(id: &str, url: &str) -> Image {
        Image {
            id: id.to_string(),
            url: url.to_string(),
            tags: Vec::new(),
            ocr_text: String::new(),
            created_at: Utc::now(),
            vector: None,
        }
    }

    #[test]
    fn test_hamming_distance() {
        assert_eq!(hamming_distance("ff00", "00ff"), 16);
        assert_eq!(hamming_distance("abcd", "abcd"), 0);
        assert_eq!(hamming_distance("0", "1"), 1);
        assert_eq!(hamming_distance("0", "f"), 4);
    }

    #[test]
    fn test_opposite_hashes_have_zero_similarity() {
        assert_eq!(hash_similarity("ff00", "00ff"), 0.0);
    }

    #[test]
    fn test_unequal_lengths_penalize_missing_digits() {
        // "ab" matches the first two digits; the two missing digits add 8 bits
        assert_eq!(hamming_distance("abcd", "ab"), 8);
        assert_eq!(hash_similarity("abcd", "ab"), 0.5);
        assert_eq!(hash_similarity("ab", "abcd"), 0.5);
    }

    #[test]
    fn test_degenerate_hashes() {
        assert_eq!(hash_similarity("", ""), 0.0);
        assert_eq!(hash_similarity("", "ff"), 0.0);
        // Non-hex positions add no distance
        assert_eq!(hamming_distance("zz", "00"), 0);
    }

    #[test]
    fn test_similarity_is_symmetric() {
        let pairs = [("1234abcd", "4321dcba"), ("ffff", "0f0f"), ("abc", "abcdef")];
        for (a, b) in pairs {
            assert_eq!(hash_similarity(a, b), hash_similarity(b, a));
        }
        assert_eq!(hash_similarity("deadbeef", "deadbeef"), 1.0);
    }

    #[test]
    fn test_identical_images_hash_identically() {
        let dir = tempfile::tempdir().unwrap();
        let a = dir.path().join("a.png");
        let b = dir.path().join("b.png");
        write_pattern(&a, false);
        write_pattern(&b, false);

        let hash_a = compute_hash(&a).unwrap();
        let hash_b = compute_hash(&b).unwrap();

        assert_eq!(hash_a.len(), 64);
        assert!(hash_similarity(&hash_a, &hash_b) >= 0.999);
    }

    #[test]
    fn test_inverted_image_is_dissimilar() {
        let dir = tempfile::tempdir().unwrap();
        let a = dir.path().join("a.png");
        let b = dir.path().join("b.png");
        write_pattern(&a, false);
        write_pattern(&b, true);

        let similarity = hash_similarity(&compute_hash(&a).unwrap(), &compute_hash(&b).unwrap());
        assert!(similarity < 0.5, "similarity was {}", similarity);
    }

    #[test]
    fn test_unreadable_file_has_no_hash() {
        let dir = tempfile::tempdir().unwrap();
        let garbage = dir.path().join("garbage.png");
        std::fs::write(&garbage, b"not an image").unwrap();

        assert!(compute_hash(&garbage).is_none());
        assert!(compute_hash(&dir.path().join("missing.png")).is_none());
    }

    #[test]
    fn test_scan_skips_missing_files() {
        let dir = tempfile::tempdir().unwrap();
        write_pattern(&dir.path().join("one.png"), false);
        write_pattern(&dir.path().join("two.png"), false);

        let images = vec![
            image_record("1", "http://localhost:5000/uploads/one.png"),
            image_record("2", "http://localhost:5000/uploads/gone.png"),
            image_record("3", "http://localhost:5000/uploads/two.png"),
        ];

        let engine = HashEngine::new(dir.path());
        let pairs = scan(&engine, &images, 0.92);

        assert_eq!(pairs.len(), 1);
        assert_eq!(pairs[0].image_a.id, "1");
        assert_eq!(pairs[0].image_b.id, "3");
        assert_eq!(pairs[0].similarity, 100.0);
    }
}
