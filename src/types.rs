//! Core type definitions for Notely context ranking and job tracking

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Default number of candidates kept by `rank`
pub const DEFAULT_TOP_N: usize = 20;

/// Default delimiter placed between chunks in the assembled context
pub const DEFAULT_SEPARATOR: &str = "\n\n---\n\n";

/// One retrievable unit of context, already normalized from whatever
/// shape the similarity-search collaborator returned.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RankCandidate {
    pub id: String,
    pub text: String,
    pub similarity: f64,             // 0.0-1.0
    pub verified_weight: f64,        // 0-100, 0 = unverified domain
    pub manual_academic_weight: f64, // 0-100
    pub lang_boost_da: f64,          // 1 when confidently Danish
    pub domain_boost_dk: f64,        // 1 for .dk sources
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_id: Option<String>,
}

impl RankCandidate {
    pub fn new(id: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            text: text.into(),
            similarity: 0.0,
            verified_weight: 0.0,
            manual_academic_weight: 0.0,
            lang_boost_da: 0.0,
            domain_boost_dk: 0.0,
            file_id: None,
        }
    }
}

/// Candidate plus its computed score
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RankedCandidate {
    #[serde(flatten)]
    pub candidate: RankCandidate,
    pub final_score: f64,
}

/// Linear ranking coefficients. `alpha` and `beta` are independent
/// multipliers; nothing forces them to sum to 1.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ScoringWeights {
    pub alpha: f64,
    pub beta: f64,
    pub m_lang: f64,
    pub m_domain: f64,
}

impl Default for ScoringWeights {
    fn default() -> Self {
        Self {
            alpha: 0.7,
            beta: 0.3,
            m_lang: 0.05,
            m_domain: 0.05,
        }
    }
}

/// Weights as stored in the configuration collaborator, any field may be unset
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct PartialWeights {
    #[serde(default)]
    pub alpha: Option<f64>,
    #[serde(default)]
    pub beta: Option<f64>,
    #[serde(default, alias = "mLang")]
    pub m_lang: Option<f64>,
    #[serde(default, alias = "mDomain")]
    pub m_domain: Option<f64>,
}

impl PartialWeights {
    pub fn is_empty(&self) -> bool {
        self.alpha.is_none()
            && self.beta.is_none()
            && self.m_lang.is_none()
            && self.m_domain.is_none()
    }

    /// Fill unset fields from `base`, then drop non-finite values and clamp
    /// everything into its documented range.
    pub fn resolve(&self, base: ScoringWeights) -> ScoringWeights {
        fn pick(value: Option<f64>, fallback: f64, min: f64, max: f64) -> f64 {
            match value {
                Some(v) if v.is_finite() => v.clamp(min, max),
                _ => fallback,
            }
        }

        ScoringWeights {
            alpha: pick(self.alpha, base.alpha, 0.0, 1.0),
            beta: pick(self.beta, base.beta, 0.0, 1.0),
            m_lang: pick(self.m_lang, base.m_lang, 0.0, f64::MAX),
            m_domain: pick(self.m_domain, base.m_domain, 0.0, f64::MAX),
        }
    }
}

/// Result of a ranking call
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RankOutput {
    pub ranked: Vec<RankedCandidate>,
    pub ranked_text: String,
    pub total_candidates: usize,
}

impl RankOutput {
    pub fn empty() -> Self {
        Self {
            ranked: Vec::new(),
            ranked_text: String::new(),
            total_candidates: 0,
        }
    }
}

/// What to do with candidates that carry no file id when mixing sources
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnfiledPolicy {
    /// Never diversified, but may fill leftover slots
    #[default]
    Backfill,
    /// Left out of the mixed output entirely
    Drop,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MixOptions {
    pub min_files: usize,
    pub max_files: usize,
    #[serde(default)]
    pub unfiled: UnfiledPolicy,
}

impl Default for MixOptions {
    fn default() -> Self {
        Self {
            min_files: 2,
            max_files: 5,
            unfiled: UnfiledPolicy::Backfill,
        }
    }
}

/// Query handed to candidate sources
#[derive(Debug, Clone, Default)]
pub struct RetrievalQuery {
    pub query: String,
    pub user_id: Option<String>,
    pub course_id: Option<String>,
}

/// Request to assemble prompt context
#[derive(Debug, Clone)]
pub struct ContextRequest {
    pub retrieval: RetrievalQuery,
    pub target_total: usize,
    pub mix: MixOptions,
    pub separator: Option<String>,
}

/// Response from context assembly
#[derive(Debug, Serialize)]
pub struct ContextResponse {
    pub items: Vec<RankedCandidate>,
    pub context_text: String,
    pub weights: ScoringWeights,
    pub stats: ContextStats,
}

#[derive(Debug, Serialize)]
pub struct ContextStats {
    pub candidates_fetched: usize,
    pub candidates_after_dedup: usize,
    pub candidates_selected: usize,
    pub file_distribution: HashMap<String, usize>,
    pub elapsed_ms: u64,
}
