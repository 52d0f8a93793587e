//! Linear similarity ranking over in-process candidates.

use mnemo_embed::vector::{Metric, k_nearest};

use crate::error::{Result, StoreError};
use crate::types::{Embedded, Scored};

/// Rank `candidates` (already scope-filtered, in insertion order) against `query`.
///
/// With no query every candidate is returned with score 1 and `limit` is
/// ignored. Otherwise candidates without an embedding are dropped and the rest are
/// ordered by cosine similarity, ties keeping their input order.
pub fn rank<T: Embedded>(
    candidates: Vec<T>,
    query: Option<&[f32]>,
    limit: usize,
) -> Result<Vec<Scored<T>>> {
    let Some(query) = query else {
        return Ok(candidates.into_iter().map(Scored::perfect).collect());
    };

    let mut embedded: Vec<T> = candidates
        .into_iter()
        .filter(|c| c.embedding().is_some())
        .collect();
    let vectors: Vec<&[f32]> = embedded.iter().filter_map(|c| c.embedding()).collect();

    let ranked = k_nearest(query, &vectors, limit, Metric::Cosine).map_err(|e| match e {
        mnemo_embed::EmbedError::DimensionMismatch { expected, actual } => {
            StoreError::DimensionMismatch { expected, actual }
        }
        other => StoreError::InvalidData(other.to_string()),
    })?;

    // Take items out by index without cloning
    let mut slots: Vec<Option<T>> = embedded.drain(..).map(Some).collect();
    Ok(ranked
        .into_iter()
        .filter_map(|(index, score)| slots[index].take().map(|item| Scored::new(item, score)))
        .collect())
}

/// Apply `offset` then optional `limit` to an ordered list.
pub fn paginate<T>(items: Vec<T>, limit: Option<usize>, offset: usize) -> Vec<T> {
    let rest = items.into_iter().skip(offset);
    match limit {
        Some(limit) => rest.take(limit).collect(),
        None => rest.collect(),
    }
}
