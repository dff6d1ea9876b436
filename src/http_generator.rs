//! HTTP-based candidate source that calls the similarity-search service

use crate::ingest::normalize_candidates;
use crate::{CandidateSource, RankCandidate, RetrievalQuery};
use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Request to the similarity-search service
#[derive(Debug, Serialize)]
struct SearchRequest<'a> {
    query: &'a str,
    k: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    user_id: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    course_id: Option<&'a str>,
}

/// Response from the similarity-search service. Rows are kept as raw JSON
/// because their field names vary between index versions.
#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(default, alias = "results", alias = "matches")]
    candidates: Vec<serde_json::Value>,
    #[serde(default)]
    query_time_ms: Option<f64>,
}

/// HTTP-based similarity-search source
pub struct HttpCandidateSource {
    service_url: String,
    client: reqwest::Client,
}

impl HttpCandidateSource {
    pub fn new(service_url: impl Into<String>) -> Self {
        Self {
            service_url: service_url.into().trim_end_matches('/').to_string(),
            client: reqwest::Client::new(),
        }
    }

    fn search_request<'a>(query: &'a RetrievalQuery, limit: usize) -> SearchRequest<'a> {
        SearchRequest {
            query: query.query.trim(),
            k: limit,
            user_id: query.user_id.as_deref(),
            course_id: query.course_id.as_deref(),
        }
    }
}

#[async_trait]
impl CandidateSource for HttpCandidateSource {
    fn name(&self) -> &'static str {
        "http_similarity"
    }

    async fn fetch(
        &self,
        query: &RetrievalQuery,
        limit: usize,
    ) -> Result<Vec<RankCandidate>> {
        if query.query.trim().is_empty() {
            return Ok(Vec::new());
        }

        let url = format!("{}/search", self.service_url);
        let response = self
            .client
            .post(&url)
            .json(&Self::search_request(query, limit))
            .send()
            .await
            .context("Failed to call similarity service")?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();
            anyhow::bail!("Similarity service error ({}): {}", status, error_text);
        }

        let search_response: SearchResponse = response
            .json()
            .await
            .context("Failed to parse similarity service response")?;

        let candidates = normalize_candidates(&search_response.candidates);

        tracing::info!(
            "Similarity search: {} candidates ({} usable) in {:.1}ms",
            search_response.candidates.len(),
            candidates.len(),
            search_response.query_time_ms.unwrap_or_default()
        );

        Ok(candidates)
    }
}
