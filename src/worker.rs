//! Polling worker that drives jobs through the lifecycle

use crate::jobs::{JobLifecycle, JobRecord};
use anyhow::{Context, Result};
use async_trait::async_trait;
use serde_json::{Map, Value};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

/// Executes one job. `Ok(Some(patch))` is merged into the job result.
#[async_trait]
pub trait JobExecutor: Send + Sync {
    async fn execute(&self, job: &JobRecord) -> Result<Option<Map<String, Value>>>;
}

/// Forwards jobs to the evaluator service, which owns the LLM calls
pub struct HttpJobExecutor {
    service_url: String,
    client: reqwest::Client,
}

impl HttpJobExecutor {
    pub fn new(service_url: impl Into<String>) -> Self {
        Self {
            service_url: service_url.into().trim_end_matches('/').to_string(),
            client: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl JobExecutor for HttpJobExecutor {
    async fn execute(&self, job: &JobRecord) -> Result<Option<Map<String, Value>>> {
        let url = format!("{}/jobs/execute", self.service_url);
        let response = self
            .client
            .post(&url)
            .json(job)
            .send()
            .await
            .context("Failed to call evaluator service")?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("Evaluator service error ({}): {}", status, body);
        }

        let body: Value = response
            .json()
            .await
            .context("Failed to parse evaluator response")?;

        Ok(match body {
            Value::Object(fields) => Some(fields),
            _ => None,
        })
    }
}

#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub worker_id: String,
    pub poll_interval: Duration,
    pub claim_lease: Duration,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            worker_id: "worker-1".to_string(),
            poll_interval: Duration::from_millis(1_000),
            claim_lease: Duration::from_secs(300),
        }
    }
}

/// What a single poll did
#[derive(Debug, Clone, PartialEq)]
pub enum Tick {
    Idle,
    Processed(JobRecord),
}

pub struct Worker {
    jobs: Arc<JobLifecycle>,
    executor: Arc<dyn JobExecutor>,
    config: WorkerConfig,
}

impl Worker {
    pub fn new(
        jobs: Arc<JobLifecycle>,
        executor: Arc<dyn JobExecutor>,
        config: WorkerConfig,
    ) -> Self {
        Self { jobs, executor, config }
    }

    /// Reap stale claims, then claim and execute at most one job
    pub async fn run_once(&self) -> Result<Tick> {
        let reaped = self.jobs.reap_stale_claims(self.config.claim_lease).await?;
        if !reaped.is_empty() {
            tracing::warn!("Reaped {} stale job claims", reaped.len());
        }

        let Some(job) = self.jobs.claim_next(&self.config.worker_id).await? else {
            return Ok(Tick::Idle);
        };

        tracing::info!("Executing {:?} job {} (attempt {})", job.kind, job.id, job.attempts + 1);

        // A reaped run must not touch the job once someone else holds it
        let finished = match self.executor.execute(&job).await {
            Ok(patch) => self.jobs.complete_claim(&job, patch).await?,
            Err(err) => self.jobs.fail_claim(&job, &format!("{:#}", err)).await?,
        };

        Ok(Tick::Processed(finished))
    }

    /// Poll until `shutdown` flips to true
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) -> Result<()> {
        tracing::info!("Worker {} started", self.config.worker_id);

        loop {
            if *shutdown.borrow() {
                break;
            }

            let idle = match self.run_once().await {
                Ok(Tick::Processed(_)) => false,
                Ok(Tick::Idle) => true,
                Err(err) => {
                    tracing::error!("Worker tick failed: {:?}", err);
                    true
                }
            };

            if idle {
                tokio::select! {
                    _ = tokio::time::sleep(self.config.poll_interval) => {}
                    _ = shutdown.changed() => {}
                }
            }
        }

        tracing::info!("Worker {} stopped", self.config.worker_id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job_store::InMemoryJobStore;
    use crate::jobs::{JobKind, JobStatus, ManualClock, NewJob};
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Fails the first `failures` calls, then succeeds with a score
    struct FlakyExecutor {
        failures: usize,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl JobExecutor for FlakyExecutor {
        async fn execute(&self, _job: &JobRecord) -> Result<Option<Map<String, Value>>> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if call < self.failures {
                anyhow::bail!("model unavailable");
            }
            let mut patch = Map::new();
            patch.insert("score".to_string(), json!(0.75));
            Ok(Some(patch))
        }
    }

    fn setup(failures: usize) -> (Worker, Arc<JobLifecycle>, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new(0));
        let store = Arc::new(InMemoryJobStore::new());
        let jobs = Arc::new(JobLifecycle::with_clock(store, clock.clone()));
        let executor = Arc::new(FlakyExecutor {
            failures,
            calls: AtomicUsize::new(0),
        });
        let worker = Worker::new(jobs.clone(), executor, WorkerConfig::default());
        (worker, jobs, clock)
    }

    async fn enqueue(jobs: &JobLifecycle, id: &str) {
        jobs.create(NewJob {
            id: Some(id.to_string()),
            kind: JobKind::Evaluate,
            payload: json!({}),
            max_attempts: None,
        })
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn test_idle_when_queue_empty() {
        let (worker, _, _) = setup(0);
        assert_eq!(worker.run_once().await.unwrap(), Tick::Idle);
    }

    #[tokio::test]
    async fn test_success_path() {
        let (worker, jobs, _) = setup(0);
        enqueue(&jobs, "j1").await;

        let Tick::Processed(job) = worker.run_once().await.unwrap() else {
            panic!("expected a processed job");
        };
        assert_eq!(job.status, JobStatus::Succeeded);
        assert_eq!(job.result, json!({ "score": 0.75 }));
    }

    #[tokio::test]
    async fn test_retry_then_success_after_backoff() {
        let (worker, jobs, clock) = setup(1);
        enqueue(&jobs, "j1").await;

        let Tick::Processed(job) = worker.run_once().await.unwrap() else {
            panic!("expected a processed job");
        };
        assert_eq!(job.status, JobStatus::Queued);
        assert_eq!(job.error.as_deref(), Some("model unavailable"));

        // Still backing off
        assert_eq!(worker.run_once().await.unwrap(), Tick::Idle);

        clock.advance(Duration::from_secs(60));
        let Tick::Processed(job) = worker.run_once().await.unwrap() else {
            panic!("expected a processed job");
        };
        assert_eq!(job.status, JobStatus::Succeeded);
        assert_eq!(job.attempts, 1);
    }

    #[tokio::test]
    async fn test_run_stops_on_shutdown() {
        let (worker, _, _) = setup(0);
        let (tx, rx) = watch::channel(false);
        let handle = tokio::spawn(async move { worker.run(rx).await });
        tx.send(true).unwrap();
        handle.await.unwrap().unwrap();
    }
}
