use super::SimilarityEngine;
use crate::db::Image;

/// Cosine similarity between two embeddings.
///
/// Returns 0 when either vector is empty, the lengths differ, or either
/// magnitude is zero.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f64 {
    if a.is_empty() || b.is_empty() || a.len() != b.len() {
        return 0.0;
    }

    let mut dot = 0.0f64;
    let mut norm_a = 0.0f64;
    let mut norm_b = 0.0f64;

    for (&x, &y) in a.iter().zip(b) {
        let (x, y) = (x as f64, y as f64);
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }

    dot / (norm_a.sqrt() * norm_b.sqrt())
}

/// Embedding-based strategy over stored vectors.
pub struct VectorEngine;

impl SimilarityEngine for VectorEngine {
    type Signal = Vec<f32>;

    fn name(&self) -> &'static str {
        "embedding-vector"
    }

    fn signal(&self, image: &Image) -> Option<Vec<f32>> {
        image.vector.as_ref().filter(|v| !v.is_empty()).cloned()
    }

    fn similarity(&self, a: &Vec<f32>, b: &Vec<f32>) -> f64 {
        cosine_similarity(a, b)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::similarity::scan;
    use chrono::Utc;

    fn image_with(id: &str, vector: Option<Vec<f32>>) -> Image {
        Image {
            id: id.to_string(),
            url: format!("/uploads/{}.png", id),
            tags: Vec::new(),
            ocr_text: String::new(),
            created_at: Utc::now(),
            vector,
        }
    }

    #[test]
    fn test_orthogonal_vectors() {
        assert_eq!(cosine_similarity(&[1.0, 0.0], &[0.0, 1.0]), 0.0);

        let images = vec![
            image_with("x", Some(vec![1.0, 0.0])),
            image_with("y", Some(vec![0.0, 1.0])),
        ];
        assert!(scan(&VectorEngine, &images, 0.01).is_empty());
    }

    #[test]
    fn test_zero_vector_guard() {
        assert_eq!(cosine_similarity(&[0.0, 0.0, 0.0], &[1.0, 2.0, 3.0]), 0.0);
        assert_eq!(cosine_similarity(&[1.0, 2.0, 3.0], &[0.0, 0.0, 0.0]), 0.0);
    }

    #[test]
    fn test_degenerate_inputs() {
        assert_eq!(cosine_similarity(&[], &[]), 0.0);
        assert_eq!(cosine_similarity(&[1.0], &[]), 0.0);
        assert_eq!(cosine_similarity(&[1.0, 2.0], &[1.0, 2.0, 3.0]), 0.0);
    }

    #[test]
    fn test_symmetry_and_self_similarity() {
        let a = [0.3, -1.2, 4.5, 0.01];
        let b = [2.0, 0.5, -0.7, 3.3];

        assert_eq!(cosine_similarity(&a, &b), cosine_similarity(&b, &a));
        assert!((cosine_similarity(&a, &a) - 1.0).abs() < 1e-9);
        assert!((cosine_similarity(&a, &[0.6, -2.4, 9.0, 0.02]) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_identical_vectors_match() {
        let images = vec![
            image_with("a", Some(vec![0.1, 0.2, 0.3])),
            image_with("b", None),
            image_with("c", Some(vec![0.1, 0.2, 0.3])),
            image_with("d", Some(Vec::new())),
        ];

        let pairs = scan(&VectorEngine, &images, 0.92);
        assert_eq!(pairs.len(), 1);
        assert_eq!(pairs[0].image_a.id, "a");
        assert_eq!(pairs[0].image_b.id, "c");
        assert!(pairs[0].similarity >= 99.9);
    }
}
