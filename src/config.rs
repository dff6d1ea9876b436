//! Environment-driven service configuration

use crate::types::{MixOptions, DEFAULT_TOP_N};
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub port: u16,
    pub candidate_service_url: Option<String>,
    pub config_service_url: Option<String>,
    pub evaluator_service_url: Option<String>,
    pub top_n: usize,
    pub target_total: usize,
    pub mix: MixOptions,
    pub max_attempts: u32,
    pub claim_lease: Duration,
    pub poll_interval: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: 8081,
            candidate_service_url: None,
            config_service_url: None,
            evaluator_service_url: None,
            top_n: DEFAULT_TOP_N,
            target_total: 12,
            mix: MixOptions::default(),
            max_attempts: 2,
            claim_lease: Duration::from_secs(300),
            poll_interval: Duration::from_millis(1_000),
        }
    }
}

impl ServerConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from any key lookup; unparsable values keep the default
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let parsed = |key: &str| lookup(key).and_then(|v| v.trim().parse::<u64>().ok());
        let url = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        Self {
            port: parsed("NOTELY_PORT")
                .and_then(|p| u16::try_from(p).ok())
                .unwrap_or(defaults.port),
            candidate_service_url: url("CANDIDATE_SERVICE_URL"),
            config_service_url: url("CONFIG_SERVICE_URL"),
            evaluator_service_url: url("EVALUATOR_SERVICE_URL"),
            top_n: parsed("NOTELY_TOP_N").map(|v| v as usize).unwrap_or(defaults.top_n),
            target_total: parsed("NOTELY_TARGET_TOTAL")
                .map(|v| v as usize)
                .unwrap_or(defaults.target_total),
            mix: MixOptions {
                min_files: parsed("NOTELY_MIN_FILES")
                    .map(|v| v as usize)
                    .unwrap_or(defaults.mix.min_files),
                max_files: parsed("NOTELY_MAX_FILES")
                    .map(|v| v as usize)
                    .unwrap_or(defaults.mix.max_files),
                unfiled: defaults.mix.unfiled,
            },
            max_attempts: parsed("NOTELY_MAX_ATTEMPTS")
                .and_then(|v| u32::try_from(v).ok())
                .filter(|v| *v > 0)
                .unwrap_or(defaults.max_attempts),
            claim_lease: parsed("NOTELY_CLAIM_LEASE_SECS")
                .map(Duration::from_secs)
                .unwrap_or(defaults.claim_lease),
            poll_interval: parsed("NOTELY_POLL_INTERVAL_MS")
                .map(Duration::from_millis)
                .unwrap_or(defaults.poll_interval),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_defaults_when_unset() {
        let config = ServerConfig::from_lookup(|_| None);
        assert_eq!(config.port, 8081);
        assert_eq!(config.top_n, 20);
        assert_eq!(config.max_attempts, 2);
        assert!(config.candidate_service_url.is_none());
    }

    #[test]
    fn test_overrides_and_bad_values() {
        let env: HashMap<&str, &str> = HashMap::from([
            ("NOTELY_PORT", "9000"),
            ("NOTELY_TOP_N", "8"),
            ("NOTELY_MIN_FILES", "3"),
            ("NOTELY_MAX_ATTEMPTS", "0"),
            ("NOTELY_CLAIM_LEASE_SECS", "soon"),
            ("CANDIDATE_SERVICE_URL", " http://search:8083 "),
            ("CONFIG_SERVICE_URL", ""),
        ]);
        let config = ServerConfig::from_lookup(|key| env.get(key).map(|v| v.to_string()));

        assert_eq!(config.port, 9000);
        assert_eq!(config.top_n, 8);
        assert_eq!(config.mix.min_files, 3);
        assert_eq!(config.max_attempts, 2);
        assert_eq!(config.claim_lease, Duration::from_secs(300));
        assert_eq!(config.candidate_service_url.as_deref(), Some("http://search:8083"));
        assert!(config.config_service_url.is_none());
    }
}
