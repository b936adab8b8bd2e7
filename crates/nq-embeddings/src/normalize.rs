//! Vector normalization and similarity.

/// L2 (Euclidean) norm.
pub fn l2_norm(v: &[f32]) -> f32 {
    v.iter().map(|x| x * x).sum::<f32>().sqrt()
}

/// L2-normalize in place. Zero vectors stay zero.
pub fn l2_normalize(v: &mut [f32]) {
    let norm = l2_norm(v);
    if norm > 0.0 {
        for x in v.iter_mut() {
            *x /= norm;
        }
    }
}

/// Cosine similarity. Returns 0.0 for zero vectors or mismatched lengths.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() {
        return 0.0;
    }
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a = l2_norm(a);
    let norm_b = l2_norm(b);
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a * norm_b)
}

/// Encode a vector as little-endian `f32` bytes.
pub fn f32_slice_to_blob(v: &[f32]) -> Vec<u8> {
    v.iter().flat_map(|f| f.to_le_bytes()).collect()
}

/// Decode little-endian `f32` bytes. Trailing partial chunks are ignored.
pub fn blob_to_f32_vec(blob: &[u8]) -> Vec<f32> {
    blob.chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect()
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_unit_length() {
        let mut v = vec![3.0, 4.0];
        l2_normalize(&mut v);
        assert!((l2_norm(&v) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn zero_vector_stays_zero() {
        let mut v = vec![0.0; 4];
        l2_normalize(&mut v);
        assert!(v.iter().all(|x| *x == 0.0));
        assert!(cosine_similarity(&v, &[1.0, 0.0, 0.0, 0.0]).abs() < f32::EPSILON);
    }

    #[test]
    fn orthogonal_and_parallel() {
        assert!(cosine_similarity(&[1.0, 0.0], &[0.0, 1.0]).abs() < 1e-6);
        assert!((cosine_similarity(&[2.0, 0.0], &[5.0, 0.0]) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn mismatched_lengths_score_zero() {
        assert!(cosine_similarity(&[1.0], &[1.0, 0.0]).abs() < f32::EPSILON);
    }

    #[test]
    fn blob_layout_is_little_endian() {
        let blob = f32_slice_to_blob(&[1.0]);
        assert_eq!(blob, 1.0f32.to_le_bytes().to_vec());
        assert_eq!(blob_to_f32_vec(&[0, 0, 128, 63, 7]), vec![1.0]);
    }

    mod prop {
        use super::super::*;
        use proptest::prelude::*;

        proptest! {
            #[test]
            fn similarity_bounded(
                a in prop::collection::vec(-10.0f32..10.0, 8),
                b in prop::collection::vec(-10.0f32..10.0, 8),
            ) {
                let s = cosine_similarity(&a, &b);
                prop_assert!((-1.0001..=1.0001).contains(&s));
            }

            #[test]
            fn blob_preserves_values(v in prop::collection::vec(-1e6f32..1e6, 0..64)) {
                prop_assert_eq!(blob_to_f32_vec(&f32_slice_to_blob(&v)), v);
            }
        }
    }
}
