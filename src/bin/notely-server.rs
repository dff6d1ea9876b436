//! Notely HTTP server binary

use notely::config::ServerConfig;
use notely::server::{run_server, AppState};
use notely::worker::{HttpJobExecutor, WorkerConfig};
use notely::{
    CandidateSource, ContextEngine, HttpCandidateSource, InMemoryJobStore, JobLifecycle,
    RankCandidate, StaticCandidateSource, WeightsClient, WeightsProvider, Worker,
};
use std::sync::Arc;
use tracing::{info, warn};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_target(false)
        .with_level(true)
        .init();

    let config = ServerConfig::from_env();
    let use_mock = std::env::args().any(|arg| arg == "--mock");

    info!("Notely context service v{}", env!("CARGO_PKG_VERSION"));

    let sources: Vec<Box<dyn CandidateSource>> = match (&config.candidate_service_url, use_mock) {
        (Some(url), false) => {
            info!("Candidate source: similarity service at {}", url);
            vec![Box::new(HttpCandidateSource::new(url.clone()))]
        }
        _ => {
            info!("Candidate source: built-in sample material");
            vec![Box::new(StaticCandidateSource::new(sample_candidates()))]
        }
    };

    let weights: Option<Box<dyn WeightsProvider>> = match &config.config_service_url {
        Some(url) => {
            let client = WeightsClient::new(url.clone());
            match client.health_check().await {
                Ok(true) => info!("Config store is healthy: {}", url),
                Ok(false) | Err(_) => {
                    warn!("Config store at {} is not healthy, using default weights", url)
                }
            }
            Some(Box::new(client))
        }
        None => {
            info!("No CONFIG_SERVICE_URL, ranking with default weights");
            None
        }
    };

    let engine = ContextEngine::new(sources, weights);
    let jobs = Arc::new(
        JobLifecycle::new(Arc::new(InMemoryJobStore::new()))
            .with_default_max_attempts(config.max_attempts),
    );

    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
    let worker_handle = match &config.evaluator_service_url {
        Some(url) => {
            info!("Job worker enabled, evaluator at {}", url);
            let worker = Worker::new(
                jobs.clone(),
                Arc::new(HttpJobExecutor::new(url.clone())),
                WorkerConfig {
                    worker_id: format!("notely-{}", std::process::id()),
                    poll_interval: config.poll_interval,
                    claim_lease: config.claim_lease,
                },
            );
            Some(tokio::spawn(async move { worker.run(shutdown_rx).await }))
        }
        None => {
            info!("No EVALUATOR_SERVICE_URL, job worker disabled");
            None
        }
    };

    let state = AppState {
        engine,
        jobs,
        config: Arc::new(config.clone()),
    };

    let result = run_server(state, config.port).await;

    let _ = shutdown_tx.send(true);
    if let Some(handle) = worker_handle {
        handle.await??;
    }

    result
}

/// Sample study material for mock mode
fn sample_candidates() -> Vec<RankCandidate> {
    vec![
        RankCandidate {
            id: "bio-1".to_string(),
            text: concat!(
                "Fotosyntesen foregår i kloroplasterne, hvor lysenergi bruges til ",
                "at omdanne CO2 og vand til glukose og ilt."
            )
            .to_string(),
            similarity: 0.91,
            verified_weight: 60.0,
            manual_academic_weight: 20.0,
            lang_boost_da: 1.0,
            domain_boost_dk: 1.0,
            file_id: Some("biologi-noter.pdf".to_string()),
        },
        RankCandidate {
            id: "bio-2".to_string(),
            text: concat!(
                "Respirationen frigiver energien i glukose som ATP. ",
                "Processen består af glykolyse, citronsyrecyklus og elektrontransportkæden."
            )
            .to_string(),
            similarity: 0.84,
            verified_weight: 60.0,
            manual_academic_weight: 20.0,
            lang_boost_da: 1.0,
            domain_boost_dk: 1.0,
            file_id: Some("biologi-noter.pdf".to_string()),
        },
        RankCandidate {
            id: "bio-3".to_string(),
            text: concat!(
                "Chlorophyll absorbs mainly red and blue ",
                "light, which is why leaves appear green."
            )
            .to_string(),
            similarity: 0.78,
            verified_weight: 30.0,
            manual_academic_weight: 0.0,
            lang_boost_da: 0.0,
            domain_boost_dk: 0.0,
            file_id: Some("lecture-slides.pdf".to_string()),
        },
        RankCandidate {
            id: "bio-4".to_string(),
            text: concat!(
                "Mitokondriet kaldes cellens kraftværk, fordi ",
                "størstedelen af ATP-produktionen sker her."
            )
            .to_string(),
            similarity: 0.72,
            verified_weight: 0.0,
            manual_academic_weight: 40.0,
            lang_boost_da: 1.0,
            domain_boost_dk: 0.0,
            file_id: Some("eksamensnoter.docx".to_string()),
        },
        RankCandidate {
            id: "web-1".to_string(),
            text: "Planter laver sukker af sollys.".to_string(),
            similarity: 0.69,
            verified_weight: 0.0,
            manual_academic_weight: 0.0,
            lang_boost_da: 1.0,
            domain_boost_dk: 0.0,
            file_id: None,
        },
    ]
}
