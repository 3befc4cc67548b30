// Vector and text helpers shared by the recommenders

use ndarray::{Array1, ArrayView1};

/// Cosine similarity of two equal-length vectors.
///
/// Returns `None` for length mismatches and zero-norm inputs.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> Option<f32> {
    if a.is_empty() || a.len() != b.len() {
        return None;
    }

    let a = ArrayView1::from(a);
    let b = ArrayView1::from(b);

    let norm_a = a.dot(&a).sqrt();
    let norm_b = b.dot(&b).sqrt();
    if norm_a < f32::EPSILON || norm_b < f32::EPSILON {
        return None;
    }

    Some(a.dot(&b) / (norm_a * norm_b))
}

/// Cosine distance (`1 - similarity`), matching pgvector's `<=>` operator.
pub fn cosine_distance(a: &[f32], b: &[f32]) -> Option<f32> {
    cosine_similarity(a, b).map(|s| 1.0 - s)
}

/// Weighted mean of `vectors`, skipping any whose length differs from `dimension`.
///
/// Returns `None` when nothing usable remains.
pub fn weighted_average<'a, I>(vectors: I, dimension: usize) -> Option<Vec<f32>>
where
    I: IntoIterator<Item = (&'a [f32], f32)>,
{
    let mut acc = Array1::<f32>::zeros(dimension);
    let mut total_weight = 0.0f32;

    for (vector, weight) in vectors {
        if vector.len() != dimension || weight <= 0.0 {
            continue;
        }
        acc.scaled_add(weight, &ArrayView1::from(vector));
        total_weight += weight;
    }

    if total_weight <= 0.0 {
        return None;
    }

    Some((acc / total_weight).to_vec())
}

/// First `max_chars` characters of `text`, never splitting a code point.
pub fn truncate_chars(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}
