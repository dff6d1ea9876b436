//! Job lifecycle for asynchronous evaluate/generate work
//!
//! ```text
//! queued --claim--> running --ok--> succeeded
//!    ^                 |
//!    |   retry left    | err
//!    +-----------------+--- no retry left ---> failed
//!    ^                                            |
//!    +------------------ requeue_now -------------+
//! ```
//!
//! Every write is a compare-and-set on the record version, so concurrent
//! workers cannot lose an attempt increment or claim the same job twice.

use crate::job_store::{JobStore, StoreError};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use thiserror::Error;
use tracing::{debug, info, warn};

pub const BACKOFF_BASE_MS: i64 = 30_000;
pub const BACKOFF_CAP_MS: i64 = 120_000;
pub const DEFAULT_MAX_ATTEMPTS: u32 = 2;
pub const CLAIM_EXPIRED_ERROR: &str = "claim lease expired";

const MAX_CAS_RETRIES: usize = 5;
const MAX_ERROR_CHARS: usize = 1_024;
// 2^6 * 30s is already far past the cap
const MAX_BACKOFF_EXPONENT: u32 = 6;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Queued,
    Running,
    Succeeded,
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobKind {
    Evaluate,
    Generate,
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobRecord {
    pub id: String,
    pub kind: JobKind,
    #[serde(default)]
    pub payload: Value,
    #[serde(default)]
    pub result: Value,
    pub status: JobStatus,
    pub attempts: u32,
    pub max_attempts: u32,
    pub error: Option<String>,
    pub next_retry_at: i64,       // unix millis
    pub started_at: Option<i64>,
    pub finished_at: Option<i64>,
    pub claimed_by: Option<String>,
    pub created_at: i64,
    pub updated_at: i64,
    pub version: u64,
}

impl JobRecord {
    /// Fresh job, eligible immediately
    pub fn queued(
        id: impl Into<String>,
        kind: JobKind,
        payload: Value,
        max_attempts: u32,
        now: i64,
    ) -> Self {
        Self {
            id: id.into(),
            kind,
            payload,
            result: Value::Object(Map::new()),
            status: JobStatus::Queued,
            attempts: 0,
            max_attempts,
            error: None,
            next_retry_at: now,
            started_at: None,
            finished_at: None,
            claimed_by: None,
            created_at: now,
            updated_at: now,
            version: 0,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self.status, JobStatus::Succeeded | JobStatus::Failed)
    }
}

/// Request to create a job
#[derive(Debug, Clone, Deserialize)]
pub struct NewJob {
    #[serde(default)]
    pub id: Option<String>,
    pub kind: JobKind,
    #[serde(default)]
    pub payload: Value,
    #[serde(default)]
    pub max_attempts: Option<u32>,
}

#[derive(Debug, Error)]
pub enum JobError {
    #[error("job {0} not found")]
    NotFound(String),
    #[error("job {0} changed concurrently too many times")]
    Contended(String),
    #[error("invalid job: {0}")]
    Invalid(String),
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Wall clock in unix milliseconds
pub trait Clock: Send + Sync {
    fn now_ms(&self) -> i64;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_ms(&self) -> i64 {
        SystemTime::now()
            .duration_since(SystemTime::UNIX_EPOCH)
            .map(|d| d.as_millis() as i64)
            .unwrap_or_default()
    }
}

/// Settable clock for tests and simulations
#[derive(Debug, Default)]
pub struct ManualClock {
    now: AtomicI64,
}

impl ManualClock {
    pub fn new(start_ms: i64) -> Self {
        Self {
            now: AtomicI64::new(start_ms),
        }
    }

    pub fn advance(&self, by: Duration) {
        self.now.fetch_add(by.as_millis() as i64, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now_ms(&self) -> i64 {
        self.now.load(Ordering::SeqCst)
    }
}

/// Retry delay: `min(30s * 2^max(1, attempts), 120s)`.
///
/// The exponent floor means even the first retry waits 60s.
pub fn backoff(attempts: u32) -> Duration {
    let exp = attempts.max(1).min(MAX_BACKOFF_EXPONENT);
    let delay = BACKOFF_BASE_MS.saturating_mul(1 << exp).min(BACKOFF_CAP_MS);
    Duration::from_millis(delay as u64)
}

fn backoff_ms(attempts: u32) -> i64 {
    backoff(attempts).as_millis() as i64
}

fn sanitize_error(raw: &str) -> String {
    let trimmed = raw.trim();
    if trimmed.chars().count() <= MAX_ERROR_CHARS {
        return trimmed.to_string();
    }
    let mut out: String = trimmed.chars().take(MAX_ERROR_CHARS).collect();
    out.push_str("...");
    out
}

/// Failure transition: retry with backoff while attempts remain, else fail.
fn apply_failure(job: &JobRecord, error: &str, now: i64) -> JobRecord {
    let mut next = job.clone();
    next.attempts = job.attempts.saturating_add(1);
    next.error = Some(error.to_string());
    next.claimed_by = None;

    if next.attempts <= next.max_attempts {
        next.status = JobStatus::Queued;
        next.next_retry_at = now + backoff_ms(next.attempts - 1);
        next.started_at = None;
        next.finished_at = None;
    } else {
        next.status = JobStatus::Failed;
        next.finished_at = Some(now);
    }

    next.updated_at = now;
    next.version = job.version + 1;
    next
}

enum Outcome {
    Missing,
    Skipped(JobRecord),
    Applied(JobRecord),
}

/// State transitions over a `JobStore`
pub struct JobLifecycle {
    store: Arc<dyn JobStore>,
    clock: Arc<dyn Clock>,
    default_max_attempts: u32,
    seq: AtomicU64,
}

impl JobLifecycle {
    pub fn new(store: Arc<dyn JobStore>) -> Self {
        Self::with_clock(store, Arc::new(SystemClock))
    }

    pub fn with_clock(store: Arc<dyn JobStore>, clock: Arc<dyn Clock>) -> Self {
        Self {
            store,
            clock,
            default_max_attempts: DEFAULT_MAX_ATTEMPTS,
            seq: AtomicU64::new(0),
        }
    }

    pub fn with_default_max_attempts(mut self, max_attempts: u32) -> Self {
        self.default_max_attempts = max_attempts.max(1);
        self
    }

    pub fn now_ms(&self) -> i64 {
        self.clock.now_ms()
    }

    pub async fn get(&self, id: &str) -> Result<JobRecord, JobError> {
        self.store
            .get(id)
            .await?
            .ok_or_else(|| JobError::NotFound(id.to_string()))
    }

    /// Insert a new queued job with zero attempts
    pub async fn create(&self, new_job: NewJob) -> Result<JobRecord, JobError> {
        let max_attempts = new_job.max_attempts.unwrap_or(self.default_max_attempts);
        if max_attempts == 0 {
            return Err(JobError::Invalid("max_attempts must be at least 1".to_string()));
        }

        let now = self.now_ms();
        let id = match new_job.id {
            Some(id) if !id.trim().is_empty() => id.trim().to_string(),
            Some(_) => return Err(JobError::Invalid("id must not be blank".to_string())),
            None => format!("job-{}-{}", now, self.seq.fetch_add(1, Ordering::Relaxed)),
        };

        let job = JobRecord::queued(id, new_job.kind, new_job.payload, max_attempts, now);
        self.store.insert(job.clone()).await?;

        info!("Queued {:?} job {}", job.kind, job.id);
        Ok(job)
    }

    /// Terminal success. `patch` fields are merged into the job result.
    pub async fn mark_succeeded(
        &self,
        id: &str,
        patch: Option<Map<String, Value>>,
    ) -> Result<JobRecord, JobError> {
        self.succeed(id, None, patch).await
    }

    /// Success reported by the worker holding `claimed`. Ignored when the job
    /// has since been reaped or claimed by someone else.
    pub async fn complete_claim(
        &self,
        claimed: &JobRecord,
        patch: Option<Map<String, Value>>,
    ) -> Result<JobRecord, JobError> {
        self.succeed(&claimed.id, Some(claimed), patch).await
    }

    /// Record a failed attempt. Retries with backoff while
    /// `attempts <= max_attempts`, otherwise the job becomes `failed`.
    ///
    /// An unknown id still gets a best-effort `failed` record rather than an
    /// error; only store failures are returned.
    pub async fn mark_failed_with_auto_retry(
        &self,
        id: &str,
        error: &str,
    ) -> Result<JobRecord, JobError> {
        self.fail(id, None, error).await
    }

    /// Failure reported by the worker holding `claimed`. Ignored when the job
    /// has since been reaped or claimed by someone else.
    pub async fn fail_claim(
        &self,
        claimed: &JobRecord,
        error: &str,
    ) -> Result<JobRecord, JobError> {
        self.fail(&claimed.id, Some(claimed), error).await
    }

    async fn succeed(
        &self,
        id: &str,
        claim: Option<&JobRecord>,
        patch: Option<Map<String, Value>>,
    ) -> Result<JobRecord, JobError> {
        let outcome = self
            .transition(id, |job, now| {
                if claim.is_some_and(|claimed| !holds_claim(job, claimed)) {
                    return None;
                }
                let mut next = job.clone();
                next.status = JobStatus::Succeeded;
                next.error = None;
                next.finished_at = Some(now);
                next.claimed_by = None;
                if let Some(fields) = &patch {
                    merge_result(&mut next.result, fields);
                }
                next.updated_at = now;
                next.version = job.version + 1;
                Some(next)
            })
            .await?;

        match outcome {
            Outcome::Applied(job) => {
                info!("Job {} succeeded after {} failed attempts", job.id, job.attempts);
                Ok(job)
            }
            Outcome::Skipped(job) => {
                warn!("Discarding success for job {} from a lost claim", job.id);
                Ok(job)
            }
            Outcome::Missing => Err(JobError::NotFound(id.to_string())),
        }
    }

    async fn fail(
        &self,
        id: &str,
        claim: Option<&JobRecord>,
        error: &str,
    ) -> Result<JobRecord, JobError> {
        let error = sanitize_error(error);

        let outcome = self
            .transition(id, |job, now| {
                if claim.is_some_and(|claimed| !holds_claim(job, claimed)) {
                    return None;
                }
                Some(apply_failure(job, &error, now))
            })
            .await?;

        match outcome {
            Outcome::Applied(job) => {
                if job.status == JobStatus::Failed {
                    warn!(
                        "Job {} failed permanently after {} attempts: {}",
                        job.id, job.attempts, error
                    );
                } else {
                    info!(
                        "Job {} failed (attempt {}/{}), retrying at {}",
                        job.id, job.attempts, job.max_attempts, job.next_retry_at
                    );
                }
                Ok(job)
            }
            Outcome::Skipped(job) => {
                warn!("Discarding failure for job {} from a lost claim: {}", job.id, error);
                Ok(job)
            }
            Outcome::Missing => {
                warn!("Job {} not found while recording failure, writing failed record", id);
                let now = self.now_ms();
                let mut job = JobRecord::queued(
                    id,
                    JobKind::Unknown,
                    Value::Null,
                    self.default_max_attempts,
                    now,
                );
                job.status = JobStatus::Failed;
                job.attempts = 1;
                job.error = Some(error);
                job.finished_at = Some(now);
                self.store.put(job.clone()).await?;
                Ok(job)
            }
        }
    }

    /// Operator override: back to `queued`, eligible now, whatever the
    /// attempt count.
    pub async fn requeue_now(&self, id: &str) -> Result<JobRecord, JobError> {
        let outcome = self
            .transition(id, |job, now| {
                let mut next = job.clone();
                next.status = JobStatus::Queued;
                next.next_retry_at = now;
                next.error = None;
                next.started_at = None;
                next.finished_at = None;
                next.claimed_by = None;
                next.updated_at = now;
                next.version = job.version + 1;
                Some(next)
            })
            .await?;

        match outcome {
            Outcome::Applied(job) | Outcome::Skipped(job) => {
                info!("Job {} requeued manually (attempts={})", job.id, job.attempts);
                Ok(job)
            }
            Outcome::Missing => Err(JobError::NotFound(id.to_string())),
        }
    }

    /// Claim the oldest eligible queued job for `worker_id`
    pub async fn claim_next(&self, worker_id: &str) -> Result<Option<JobRecord>, JobError> {
        let now = self.now_ms();
        let mut eligible: Vec<JobRecord> = self
            .store
            .list_by_status(JobStatus::Queued)
            .await?
            .into_iter()
            .filter(|job| job.next_retry_at <= now)
            .collect();
        eligible.sort_by(|a, b| {
            (a.next_retry_at, a.created_at, &a.id).cmp(&(b.next_retry_at, b.created_at, &b.id))
        });

        for job in eligible {
            let mut next = job.clone();
            next.status = JobStatus::Running;
            next.started_at = Some(now);
            next.finished_at = None;
            next.claimed_by = Some(worker_id.to_string());
            next.updated_at = now;
            next.version = job.version + 1;

            if self.store.compare_and_set(job.version, next.clone()).await? {
                debug!("Worker {} claimed job {}", worker_id, next.id);
                return Ok(Some(next));
            }
            debug!("Lost claim race for job {}", job.id);
        }

        Ok(None)
    }

    /// Send jobs whose claim is older than `lease` back through the failure
    /// path. Returns the jobs that were reaped.
    pub async fn reap_stale_claims(&self, lease: Duration) -> Result<Vec<JobRecord>, JobError> {
        let now = self.now_ms();
        let lease_ms = lease.as_millis() as i64;
        let stale: Vec<JobRecord> = self
            .store
            .list_by_status(JobStatus::Running)
            .await?
            .into_iter()
            .filter(|job| job.started_at.map_or(true, |started| started + lease_ms < now))
            .collect();

        let mut reaped = Vec::new();
        for job in stale {
            let outcome = self
                .transition(&job.id, |current, now| {
                    // Someone finished or re-claimed it meanwhile
                    if !holds_claim(current, &job) {
                        return None;
                    }
                    Some(apply_failure(current, CLAIM_EXPIRED_ERROR, now))
                })
                .await?;

            if let Outcome::Applied(job) = outcome {
                warn!("Reaped stale claim on job {} (now {:?})", job.id, job.status);
                reaped.push(job);
            }
        }

        Ok(reaped)
    }

    /// Read, compute, compare-and-set; retried on lost races.
    /// `f` returning `None` leaves the record untouched.
    async fn transition<F>(&self, id: &str, f: F) -> Result<Outcome, JobError>
    where
        F: Fn(&JobRecord, i64) -> Option<JobRecord> + Send + Sync,
    {
        for _ in 0..MAX_CAS_RETRIES {
            let Some(current) = self.store.get(id).await? else {
                return Ok(Outcome::Missing);
            };
            let Some(next) = f(&current, self.now_ms()) else {
                return Ok(Outcome::Skipped(current));
            };
            if self.store.compare_and_set(current.version, next.clone()).await? {
                return Ok(Outcome::Applied(next));
            }
            debug!("Concurrent update on job {}, retrying", id);
        }

        Err(JobError::Contended(id.to_string()))
    }
}

/// `current` is still running under the claim recorded in `claimed`
fn holds_claim(current: &JobRecord, claimed: &JobRecord) -> bool {
    current.status == JobStatus::Running
        && current.claimed_by == claimed.claimed_by
        && current.started_at == claimed.started_at
}

fn merge_result(result: &mut Value, patch: &Map<String, Value>) {
    if !result.is_object() {
        *result = Value::Object(Map::new());
    }
    if let Value::Object(fields) = result {
        for (key, value) in patch {
            fields.insert(key.clone(), value.clone());
        }
    }
}
