use std::cmp::Ordering;

use crate::rag::RagError;

/// Cosine similarity of two equal-length vectors, clamped to `[0, 1]`.
///
/// Opposite or orthogonal directions both score 0; zero-norm inputs score 0.
pub fn cosine_similarity(query: &[f32], candidate: &[f32]) -> Result<f32, RagError> {
    if query.is_empty() || candidate.is_empty() {
        return Err(RagError::Query("Vectors must not be empty".to_string()));
    }
    if query.len() != candidate.len() {
        return Err(RagError::Query(format!(
            "Vector length mismatch: {} != {}",
            query.len(),
            candidate.len()
        )));
    }

    let dot: f64 = query
        .iter()
        .zip(candidate.iter())
        .map(|(a, b)| f64::from(*a) * f64::from(*b))
        .sum();
    let denom = l2_norm(query) * l2_norm(candidate);
    if denom <= f64::from(f32::EPSILON) {
        return Ok(0.0);
    }

    Ok((dot / denom).clamp(0.0, 1.0) as f32)
}

/// Scores every candidate and sorts best-first. Equal scores keep their
/// original relative order.
pub fn rank_descending_by_cosine(
    query: &[f32],
    candidates: &[Vec<f32>],
) -> Result<Vec<(usize, f32)>, RagError> {
    let mut scores = Vec::with_capacity(candidates.len());
    for (idx, candidate) in candidates.iter().enumerate() {
        let score = cosine_similarity(query, candidate)?;
        scores.push((idx, score));
    }

    scores.sort_by(|left, right| right.1.partial_cmp(&left.1).unwrap_or(Ordering::Equal));
    Ok(scores)
}

/// Scales `vector` to unit length in place. Zero vectors are left untouched.
pub fn normalize(vector: &mut [f32]) {
    let norm = l2_norm(vector);
    if norm > 0.0 {
        for value in vector.iter_mut() {
            *value = (f64::from(*value) / norm) as f32;
        }
    }
}

fn l2_norm(vector: &[f32]) -> f64 {
    vector
        .iter()
        .map(|v| f64::from(*v) * f64::from(*v))
        .sum::<f64>()
        .sqrt()
}
