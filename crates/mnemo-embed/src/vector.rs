//! Vector math used for similarity ranking.
//!
//! Everything here is pure and synchronous. Sums are accumulated in `f64`
//! so that self-similarity of long `f32` vectors stays at 1.

use crate::error::{EmbedError, Result};

/// Scoring function for [`k_nearest`]. Higher scores rank first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Metric {
    /// Cosine similarity in `[-1, 1]`.
    #[default]
    Cosine,
    /// Raw dot product.
    Dot,
    /// Negated Euclidean distance.
    NegEuclidean,
}

fn check_dims(a: &[f32], b: &[f32]) -> Result<()> {
    if a.len() != b.len() {
        return Err(EmbedError::DimensionMismatch {
            expected: a.len(),
            actual: b.len(),
        });
    }
    Ok(())
}

/// Dot product of two equal-length vectors.
pub fn dot(a: &[f32], b: &[f32]) -> Result<f32> {
    check_dims(a, b)?;
    let sum: f64 = a
        .iter()
        .zip(b.iter())
        .map(|(x, y)| f64::from(*x) * f64::from(*y))
        .sum();
    Ok(sum as f32)
}

/// Cosine similarity between two embeddings.
///
/// Fails with [`EmbedError::DimensionMismatch`] when the lengths differ.
/// Returns `0.0` when either vector has zero norm.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> Result<f32> {
    check_dims(a, b)?;

    let mut dot = 0.0f64;
    let mut norm_a = 0.0f64;
    let mut norm_b = 0.0f64;
    for (x, y) in a.iter().zip(b.iter()) {
        let (x, y) = (f64::from(*x), f64::from(*y));
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    if norm_a == 0.0 || norm_b == 0.0 {
        return Ok(0.0);
    }

    Ok((dot / (norm_a.sqrt() * norm_b.sqrt())).clamp(-1.0, 1.0) as f32)
}

/// Euclidean distance between two embeddings.
pub fn euclidean_distance(a: &[f32], b: &[f32]) -> Result<f32> {
    check_dims(a, b)?;
    let sum: f64 = a
        .iter()
        .zip(b.iter())
        .map(|(x, y)| (f64::from(*x) - f64::from(*y)).powi(2))
        .sum();
    Ok(sum.sqrt() as f32)
}

/// Scale a vector to unit length. Zero vectors are returned unchanged.
pub fn normalize(v: &[f32]) -> Vec<f32> {
    let norm = v.iter().map(|x| f64::from(*x).powi(2)).sum::<f64>().sqrt();
    if norm == 0.0 {
        return v.to_vec();
    }
    v.iter().map(|x| (f64::from(*x) / norm) as f32).collect()
}

/// Score every candidate against `query` and return the best `k` as
/// `(candidate_index, score)`, highest score first.
///
/// The sort is stable: equal scores keep their original candidate order.
pub fn k_nearest<C: AsRef<[f32]>>(
    query: &[f32],
    candidates: &[C],
    k: usize,
    metric: Metric,
) -> Result<Vec<(usize, f32)>> {
    let mut scored = Vec::with_capacity(candidates.len());
    for (index, candidate) in candidates.iter().enumerate() {
        let candidate = candidate.as_ref();
        let score = match metric {
            Metric::Cosine => cosine_similarity(query, candidate)?,
            Metric::Dot => dot(query, candidate)?,
            Metric::NegEuclidean => -euclidean_distance(query, candidate)?,
        };
        scored.push((index, score));
    }

    scored.sort_by(|a, b| b.1.total_cmp(&a.1));
    scored.truncate(k);
    Ok(scored)
}
