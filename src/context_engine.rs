//! Core ContextEngine: fetches, ranks and mixes study material for prompts

use crate::generators::CandidateSource;
use crate::ingest::normalize_candidates;
use crate::scoring::{join_texts, rank, score_and_sort};
use crate::selection::mix_sources;
use crate::types::*;
use crate::weights_client::WeightsProvider;
use anyhow::Result;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

/// How many candidates each source is asked for, relative to the target
const FETCH_MULTIPLIER: usize = 4;
const MIN_FETCH: usize = 40;

/// Main context engine (thread-safe via Arc)
pub struct ContextEngine {
    pub sources: Vec<Box<dyn CandidateSource>>,
    pub weights: Option<Box<dyn WeightsProvider>>,
    pub default_weights: ScoringWeights,
}

pub type SharedContextEngine = Arc<ContextEngine>;

impl ContextEngine {
    /// Create a new context engine with sources and an optional weights provider
    pub fn new(
        sources: Vec<Box<dyn CandidateSource>>,
        weights: Option<Box<dyn WeightsProvider>>,
    ) -> SharedContextEngine {
        Arc::new(Self {
            sources,
            weights,
            default_weights: ScoringWeights::default(),
        })
    }

    /// Create a context engine that always ranks with the built-in defaults
    pub fn new_simple(sources: Vec<Box<dyn CandidateSource>>) -> SharedContextEngine {
        Self::new(sources, None)
    }

    /// Resolve weights: per-user config, then global config, then defaults.
    /// Never fails; provider errors are logged and skipped.
    pub async fn resolve_weights(&self, user_id: Option<&str>) -> ScoringWeights {
        let Some(provider) = &self.weights else {
            return self.default_weights;
        };

        let mut scopes: Vec<Option<&str>> = Vec::with_capacity(2);
        if user_id.is_some() {
            scopes.push(user_id);
        }
        scopes.push(None);

        for scope in scopes {
            match provider.load(scope).await {
                Ok(Some(partial)) => {
                    debug!("Using ranking weights from scope {:?}", scope);
                    return partial.resolve(self.default_weights);
                }
                Ok(None) => {}
                Err(e) => {
                    warn!("Failed to load ranking weights for {:?}: {:?}. Falling back.", scope, e);
                }
            }
        }

        self.default_weights
    }

    /// Rank caller-supplied raw candidates
    pub async fn rank_candidates(
        &self,
        raw: &[serde_json::Value],
        weights_override: Option<PartialWeights>,
        user_id: Option<&str>,
        top_n: usize,
        separator: Option<&str>,
    ) -> RankOutput {
        let candidates = normalize_candidates(raw);
        let base = self.resolve_weights(user_id).await;
        let weights = match weights_override {
            Some(partial) => partial.resolve(base),
            None => base,
        };

        let output = rank(
            &candidates,
            &weights,
            top_n,
            separator.unwrap_or(DEFAULT_SEPARATOR),
        );

        info!(
            "Ranked {} candidates, kept {} (alpha={}, beta={})",
            output.total_candidates,
            output.ranked.len(),
            weights.alpha,
            weights.beta
        );

        output
    }

    /// Main entry point: build the context text for question generation
    pub async fn assemble_context(&self, req: ContextRequest) -> Result<ContextResponse> {
        let start = Instant::now();

        info!(
            "Assembling context: query='{}', target={}, user_id={:?}, course_id={:?}",
            req.retrieval.query, req.target_total, req.retrieval.user_id, req.retrieval.course_id
        );

        // Step 1: Resolve weights
        let weights = self.resolve_weights(req.retrieval.user_id.as_deref()).await;

        // Step 2: Fetch candidates from every source
        let fetched = self.fetch_candidates(&req).await;
        let candidates_fetched: usize = fetched.iter().map(|v| v.len()).sum();

        // Step 3: Deduplicate across sources
        let candidates = dedup_candidates(fetched);
        let candidates_after_dedup = candidates.len();

        // Step 4: Score everything, then diversify down to the target
        let ranked = score_and_sort(&candidates, &weights);
        let items = mix_sources(&ranked, req.target_total, &req.mix);

        // Step 5: Join text
        let separator = req.separator.as_deref().unwrap_or(DEFAULT_SEPARATOR);
        let context_text = join_texts(&items, separator);

        let stats = ContextStats {
            candidates_fetched,
            candidates_after_dedup,
            candidates_selected: items.len(),
            file_distribution: compute_file_distribution(&items),
            elapsed_ms: start.elapsed().as_millis() as u64,
        };

        info!(
            "Context assembled: {} of {} candidates from {} files",
            stats.candidates_selected,
            stats.candidates_after_dedup,
            stats.file_distribution.len()
        );

        Ok(ContextResponse {
            items,
            context_text,
            weights,
            stats,
        })
    }

    /// Query all sources concurrently; failing sources are skipped
    async fn fetch_candidates(&self, req: &ContextRequest) -> Vec<Vec<RankCandidate>> {
        let limit = self.estimate_fetch_limit(req.target_total);

        let tasks = self.sources.iter().map(|source| {
            let query = &req.retrieval;
            async move { (source.name(), source.fetch(query, limit).await) }
        });

        let results = futures::future::join_all(tasks).await;

        let mut all_candidates = Vec::new();
        for (name, res) in results {
            match res {
                Ok(cands) => {
                    debug!("Source {} returned {} candidates", name, cands.len());
                    all_candidates.push(cands);
                }
                Err(e) => {
                    warn!("Candidate source {} failed: {:?}", name, e);
                }
            }
        }

        if all_candidates.iter().all(|v| v.is_empty()) {
            warn!("No candidates found for query: '{}'", req.retrieval.query);
        }

        all_candidates
    }

    fn estimate_fetch_limit(&self, target_total: usize) -> usize {
        target_total.saturating_mul(FETCH_MULTIPLIER).max(MIN_FETCH)
    }
}

/// Merge per-source lists by id. The first occurrence keeps its position;
/// the best similarity seen for that id wins.
fn dedup_candidates(candidate_vecs: Vec<Vec<RankCandidate>>) -> Vec<RankCandidate> {
    let mut index: HashMap<String, usize> = HashMap::new();
    let mut merged: Vec<RankCandidate> = Vec::new();

    for candidates in candidate_vecs {
        for cand in candidates {
            match index.get(&cand.id) {
                Some(&pos) => {
                    let existing = &mut merged[pos];
                    if cand.similarity > existing.similarity {
                        existing.similarity = cand.similarity;
                    }
                }
                None => {
                    index.insert(cand.id.clone(), merged.len());
                    merged.push(cand);
                }
            }
        }
    }

    merged
}

fn compute_file_distribution(items: &[RankedCandidate]) -> HashMap<String, usize> {
    let mut dist = HashMap::new();
    for item in items {
        if let Some(file) = &item.candidate.file_id {
            *dist.entry(file.clone()).or_insert(0) += 1;
        }
    }
    dist
}
