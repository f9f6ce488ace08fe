//! Cosine distance.

use lumen_core::defaults::{DISTANCE_EPSILON, MAX_COSINE_DISTANCE};

/// Cosine distance `1 - cos(a, b)` in `[0, 2]`.
///
/// Accumulates in `f64`. Results below [`DISTANCE_EPSILON`] snap to `0.0`
/// so that identical vectors always compare as identical. A zero vector is
/// at distance `1.0` from any non-zero vector and `0.0` from another zero
/// vector.
///
/// Both slices must have the same length; callers validate dimensions first.
pub fn cosine_distance(a: &[f32], b: &[f32]) -> f64 {
    debug_assert_eq!(a.len(), b.len());

    let mut dot = 0.0f64;
    let mut norm_a = 0.0f64;
    let mut norm_b = 0.0f64;
    for (x, y) in a.iter().zip(b.iter()) {
        let x = f64::from(*x);
        let y = f64::from(*y);
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    if norm_a == 0.0 || norm_b == 0.0 {
        return if norm_a == norm_b { 0.0 } else { 1.0 };
    }

    let similarity = (dot / (norm_a.sqrt() * norm_b.sqrt())).clamp(-1.0, 1.0);
    let distance = (1.0 - similarity).clamp(0.0, MAX_COSINE_DISTANCE);
    if distance < DISTANCE_EPSILON {
        0.0
    } else {
        distance
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identical_vectors_are_zero() {
        let v = [0.3f32, -0.2, 0.9, 0.1];
        assert_eq!(cosine_distance(&v, &v), 0.0);
    }

    #[test]
    fn test_scaled_vectors_are_zero() {
        assert_eq!(cosine_distance(&[1.0, 2.0, 3.0], &[2.0, 4.0, 6.0]), 0.0);
    }

    #[test]
    fn test_orthogonal_is_one() {
        let d = cosine_distance(&[1.0, 0.0], &[0.0, 1.0]);
        assert!((d - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_opposite_is_two() {
        let d = cosine_distance(&[1.0, 0.0], &[-1.0, 0.0]);
        assert!((d - 2.0).abs() < 1e-12);
    }

    #[test]
    fn test_zero_vectors() {
        assert_eq!(cosine_distance(&[0.0, 0.0], &[0.0, 0.0]), 0.0);
        assert_eq!(cosine_distance(&[0.0, 0.0], &[1.0, 0.0]), 1.0);
    }

    #[test]
    fn test_distance_is_symmetric() {
        let a = [0.1f32, 0.7, -0.3];
        let b = [0.5f32, -0.1, 0.2];
        assert_eq!(cosine_distance(&a, &b), cosine_distance(&b, &a));
    }
}
