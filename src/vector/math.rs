//! Cosine-similarity math shared by search and clustering.

/// Epsilon for floating-point norm comparisons.
const EPSILON: f32 = 1e-10;

/// Computes cosine similarity between two vectors.
///
/// Returns a value in `[-1, 1]`, or 0 when either vector has zero norm
/// (never divides by zero). The caller is responsible for dimension
/// agreement; mismatched lengths compare over the shorter prefix in release
/// builds and trip a debug assertion otherwise.
#[must_use]
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    debug_assert_eq!(a.len(), b.len(), "Vectors must have same dimension");

    let dot_product: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();

    if norm_a == 0.0 || norm_b == 0.0 {
        0.0
    } else {
        dot_product / (norm_a * norm_b)
    }
}

/// True when every component is exactly zero.
///
/// An all-zero vector is treated as "not embedded" throughout the engine.
#[must_use]
pub fn is_zero_vector(vector: &[f32]) -> bool {
    vector.iter().all(|x| *x == 0.0)
}

/// Normalizes a vector in-place to unit length.
///
/// Vectors with near-zero norm are left unchanged.
pub fn normalize_vector(vector: &mut [f32]) {
    let norm: f32 = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > EPSILON {
        for value in vector.iter_mut() {
            *value /= norm;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cosine_similarity() {
        // Identical vectors
        let a = vec![1.0, 2.0, 3.0];
        let b = vec![1.0, 2.0, 3.0];
        assert!((cosine_similarity(&a, &b) - 1.0).abs() < f32::EPSILON);

        // Orthogonal vectors
        let a = vec![1.0, 0.0];
        let b = vec![0.0, 1.0];
        assert!((cosine_similarity(&a, &b) - 0.0).abs() < f32::EPSILON);

        // Opposite vectors
        let a = vec![1.0, 2.0, 3.0];
        let b = vec![-1.0, -2.0, -3.0];
        assert!((cosine_similarity(&a, &b) - (-1.0)).abs() < f32::EPSILON);
    }

    #[test]
    fn test_cosine_similarity_is_symmetric() {
        let a = vec![0.3, -0.1, 0.7, 0.2];
        let b = vec![0.5, 0.5, 0.0, -0.3];
        assert_eq!(cosine_similarity(&a, &b), cosine_similarity(&b, &a));
    }

    #[test]
    fn test_zero_vector_has_zero_similarity() {
        let a = vec![1.0, 2.0, 3.0];
        let zero = vec![0.0, 0.0, 0.0];
        assert_eq!(cosine_similarity(&a, &zero), 0.0);
        assert_eq!(cosine_similarity(&zero, &a), 0.0);
        assert_eq!(cosine_similarity(&zero, &zero), 0.0);
    }

    #[test]
    fn test_is_zero_vector() {
        assert!(is_zero_vector(&[0.0, 0.0, 0.0]));
        assert!(!is_zero_vector(&[0.0, 1e-12, 0.0]));
        assert!(is_zero_vector(&[]));
    }

    #[test]
    fn test_normalize_vector() {
        let mut vector = vec![3.0, 4.0];
        normalize_vector(&mut vector);

        let norm: f32 = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < f32::EPSILON);
        assert!((vector[0] - 0.6).abs() < f32::EPSILON);
        assert!((vector[1] - 0.8).abs() < f32::EPSILON);

        // Zero vector stays put
        let mut zero = vec![0.0, 0.0];
        normalize_vector(&mut zero);
        assert_eq!(zero, vec![0.0, 0.0]);
    }
}
