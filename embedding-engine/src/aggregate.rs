use crate::similarity::cosine_similarity;
use thoughtmates_core::{EmbeddingError, Vector};

/// User affinity: mean of the `top_k` strongest pairwise similarities between
/// the two vector sets (all of them when fewer exist).
///
/// Averaging only the strongest overlaps keeps a prolific user from being
/// diluted by unrelated posts. Returns `0.0` when either side is empty.
/// Cost is `|a| * |b|` cosine evaluations.
pub fn affinity(a: &[Vector], b: &[Vector], top_k: usize) -> f32 {
    if a.is_empty() || b.is_empty() || top_k == 0 {
        return 0.0;
    }

    let mut similarities: Vec<f32> = Vec::with_capacity(a.len() * b.len());
    for va in a {
        for vb in b {
            similarities.push(cosine_similarity(va, vb));
        }
    }

    let k = top_k.min(similarities.len());
    if k < similarities.len() {
        similarities.select_nth_unstable_by(k - 1, |x, y| y.total_cmp(x));
        similarities.truncate(k);
    }
    // Fixed summation order keeps affinity(a, b) == affinity(b, a) bit for bit
    similarities.sort_unstable_by(|x, y| y.total_cmp(x));

    similarities.iter().sum::<f32>() / k as f32
}

/// Like [`affinity`] but reports mismatched dimensions instead of panicking.
pub fn try_affinity(a: &[Vector], b: &[Vector], top_k: usize) -> Result<f32, EmbeddingError> {
    if let Some(expected) = a.first().map(Vec::len) {
        check_dimensions(a, expected)?;
        check_dimensions(b, expected)?;
    }
    Ok(affinity(a, b, top_k))
}

pub fn check_dimensions(vectors: &[Vector], expected: usize) -> Result<(), EmbeddingError> {
    match vectors.iter().find(|v| v.len() != expected) {
        Some(v) => Err(EmbeddingError::DimensionMismatch {
            expected,
            actual: v.len(),
        }),
        None => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unit_at(cos: f32) -> Vector {
        vec![cos, (1.0 - cos * cos).sqrt()]
    }

    #[test]
    fn test_top_k_average_of_known_similarities() {
        let a = vec![vec![1.0, 0.0]];
        let b: Vec<Vector> = [0.9, 0.8, 0.7, 0.3, 0.1].iter().map(|c| unit_at(*c)).collect();

        let score = affinity(&a, &b, 5);
        assert!((score - 0.56).abs() < 1e-5, "score was {score}");
    }

    #[test]
    fn test_only_strongest_pairs_count() {
        let a = vec![vec![1.0, 0.0]];
        let b: Vec<Vector> = [0.9, 0.8, 0.1, 0.0].iter().map(|c| unit_at(*c)).collect();

        let score = affinity(&a, &b, 2);
        assert!((score - 0.85).abs() < 1e-5, "score was {score}");
    }

    #[test]
    fn test_fewer_pairs_than_k_uses_all() {
        let a = vec![vec![1.0, 0.0]];
        let b = vec![unit_at(0.6), unit_at(0.2)];

        let score = affinity(&a, &b, 5);
        assert!((score - 0.4).abs() < 1e-5, "score was {score}");
    }

    #[test]
    fn test_empty_side_is_zero() {
        let a = vec![vec![1.0, 0.0]];
        assert_eq!(affinity(&[], &a, 5), 0.0);
        assert_eq!(affinity(&a, &[], 5), 0.0);
    }

    #[test]
    fn test_symmetric() {
        let a = vec![vec![0.2, 0.9, -0.1], vec![0.5, 0.5, 0.5], vec![-0.3, 0.1, 0.8]];
        let b = vec![vec![0.7, 0.1, 0.2], vec![0.0, 1.0, 0.3]];

        for k in 1..=6 {
            assert_eq!(affinity(&a, &b, k), affinity(&b, &a, k));
        }
    }

    #[test]
    fn test_try_affinity_reports_dimension_mismatch() {
        let a = vec![vec![1.0, 0.0]];
        let b = vec![vec![1.0, 0.0, 0.0]];

        assert!(matches!(
            try_affinity(&a, &b, 5),
            Err(EmbeddingError::DimensionMismatch {
                expected: 2,
                actual: 3
            })
        ));
    }
}
