//! Result filters that narrow search results to the relevant ones.
//!
//! A filter only chooses ids. The service keeps its own ranking order and
//! drops anything not chosen.

use async_trait::async_trait;
use serde::Serialize;

use crate::error::Result;

/// One search hit offered to a filter.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FilterCandidate {
    pub id: String,
    pub content: String,
    pub similarity_score: f32,
}

/// Chooses which candidates are relevant to a query.
#[async_trait]
pub trait ResultFilter: Send + Sync {
    /// Return the ids of the relevant candidates. Order is ignored.
    async fn select(
        &self,
        query: &str,
        candidates: &[FilterCandidate],
        context: Option<&str>,
    ) -> Result<Vec<String>>;

    fn name(&self) -> &str;
}

/// Keeps every candidate.
#[derive(Debug, Clone, Copy, Default)]
pub struct PassthroughFilter;

#[async_trait]
impl ResultFilter for PassthroughFilter {
    async fn select(
        &self,
        _query: &str,
        candidates: &[FilterCandidate],
        _context: Option<&str>,
    ) -> Result<Vec<String>> {
        Ok(candidates.iter().map(|c| c.id.clone()).collect())
    }

    fn name(&self) -> &str {
        "passthrough"
    }
}
