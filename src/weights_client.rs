//! Ranking weight configuration: provider trait plus an HTTP client for the
//! key-value configuration store

use crate::types::PartialWeights;
use anyhow::Result;
use async_trait::async_trait;
use reqwest::StatusCode;
use tracing::debug;

/// Source of tunable ranking weights. `Ok(None)` means "not configured at
/// this scope".
#[async_trait]
pub trait WeightsProvider: Send + Sync {
    async fn load(&self, user_id: Option<&str>) -> Result<Option<PartialWeights>>;
}

/// Fixed weights, optionally with per-user overrides
#[derive(Debug, Clone, Default)]
pub struct StaticWeights {
    global: Option<PartialWeights>,
    per_user: std::collections::HashMap<String, PartialWeights>,
}

impl StaticWeights {
    pub fn new(global: Option<PartialWeights>) -> Self {
        Self {
            global,
            per_user: Default::default(),
        }
    }

    pub fn with_user(mut self, user_id: impl Into<String>, weights: PartialWeights) -> Self {
        self.per_user.insert(user_id.into(), weights);
        self
    }
}

#[async_trait]
impl WeightsProvider for StaticWeights {
    async fn load(&self, user_id: Option<&str>) -> Result<Option<PartialWeights>> {
        match user_id {
            Some(user) => Ok(self.per_user.get(user).copied()),
            None => Ok(self.global),
        }
    }
}

#[derive(Debug, Clone)]
pub struct WeightsClient {
    base_url: String,
    client: reqwest::Client,
}

impl WeightsClient {
    /// Create a new configuration store client
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            client: reqwest::Client::new(),
        }
    }

    fn weights_url(&self, user_id: Option<&str>) -> String {
        match user_id {
            Some(user) => format!(
                "{}/config/ranking_weights?user_id={}",
                self.base_url,
                urlencoding::encode(user)
            ),
            None => format!("{}/config/ranking_weights", self.base_url),
        }
    }

    /// Health check
    pub async fn health_check(&self) -> Result<bool> {
        let url = format!("{}/health", self.base_url);
        let response = self.client.get(&url).send().await?;
        Ok(response.status().is_success())
    }
}

#[async_trait]
impl WeightsProvider for WeightsClient {
    async fn load(&self, user_id: Option<&str>) -> Result<Option<PartialWeights>> {
        let url = self.weights_url(user_id);

        debug!("Fetching ranking weights from {}", url);

        let response = self.client.get(&url).send().await?;

        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("Config API error {}: {}", status, body);
        }

        let weights: PartialWeights = response.json().await?;
        Ok(if weights.is_empty() { None } else { Some(weights) })
    }
}
