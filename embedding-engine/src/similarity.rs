/// Cosine similarity in `[-1, 1]`.
///
/// Vectors of different length are a programming error and panic. A zero
/// magnitude on either side yields `0.0`.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    assert_eq!(
        a.len(),
        b.len(),
        "cosine_similarity called with vectors of different length"
    );

    let dot = a.iter().zip(b).map(|(x, y)| x * y).sum::<f32>();
    let norm_a = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b = b.iter().map(|x| x * x).sum::<f32>().sqrt();

    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }

    (dot / (norm_a * norm_b)).clamp(-1.0, 1.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    const EPSILON: f32 = 1e-6;

    #[test]
    fn test_identical_vectors() {
        let v = [0.3, -1.2, 4.0, 0.5];
        assert!((cosine_similarity(&v, &v) - 1.0).abs() < EPSILON);
    }

    #[test]
    fn test_opposite_vectors() {
        let v = [0.3, -1.2, 4.0, 0.5];
        let neg: Vec<f32> = v.iter().map(|x| -x).collect();
        assert!((cosine_similarity(&v, &neg) + 1.0).abs() < EPSILON);
    }

    #[test]
    fn test_orthogonal_vectors() {
        assert!(cosine_similarity(&[1.0, 0.0], &[0.0, 2.0]).abs() < EPSILON);
    }

    #[test]
    fn test_symmetry() {
        let a = [0.1, 0.7, -0.2];
        let b = [0.9, -0.4, 0.3];
        assert_eq!(cosine_similarity(&a, &b), cosine_similarity(&b, &a));
    }

    #[test]
    fn test_zero_magnitude_is_no_relation() {
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 2.0]), 0.0);
        assert_eq!(cosine_similarity(&[1.0, 2.0], &[0.0, 0.0]), 0.0);
    }

    #[test]
    #[should_panic(expected = "different length")]
    fn test_length_mismatch_panics() {
        cosine_similarity(&[1.0, 0.0], &[1.0, 0.0, 0.0]);
    }
}
