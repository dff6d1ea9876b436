//! Candidate sources feeding the context engine

use crate::types::*;
use anyhow::Result;
use async_trait::async_trait;

/// Trait for pluggable candidate sources (similarity search, fixtures, ...)
#[async_trait]
pub trait CandidateSource: Send + Sync {
    fn name(&self) -> &'static str;

    async fn fetch(
        &self,
        query: &RetrievalQuery,
        limit: usize,
    ) -> Result<Vec<RankCandidate>>;
}

/// In-memory source for tests and `--mock` mode
pub struct StaticCandidateSource {
    candidates: Vec<RankCandidate>,
}

impl StaticCandidateSource {
    pub fn new(candidates: Vec<RankCandidate>) -> Self {
        Self { candidates }
    }
}

#[async_trait]
impl CandidateSource for StaticCandidateSource {
    fn name(&self) -> &'static str {
        "static"
    }

    async fn fetch(
        &self,
        _query: &RetrievalQuery,
        limit: usize,
    ) -> Result<Vec<RankCandidate>> {
        Ok(self.candidates.iter().take(limit).cloned().collect())
    }
}
