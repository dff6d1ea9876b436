//! Persistence seam for job records

use crate::jobs::{JobRecord, JobStatus};
use async_trait::async_trait;
use std::collections::HashMap;
use thiserror::Error;
use tokio::sync::RwLock;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("job {0} already exists")]
    Duplicate(String),
    #[error("job store backend failure: {0}")]
    Backend(String),
}

/// Job table. Writes that depend on a previous read go through
/// `compare_and_set`, which only succeeds when the stored `version` still
/// equals `expected_version`.
#[async_trait]
pub trait JobStore: Send + Sync {
    async fn insert(&self, job: JobRecord) -> Result<(), StoreError>;

    async fn get(&self, id: &str) -> Result<Option<JobRecord>, StoreError>;

    /// Returns `false` when the row is missing or was changed concurrently
    async fn compare_and_set(
        &self,
        expected_version: u64,
        next: JobRecord,
    ) -> Result<bool, StoreError>;

    /// Unconditional upsert
    async fn put(&self, job: JobRecord) -> Result<(), StoreError>;

    async fn list_by_status(&self, status: JobStatus) -> Result<Vec<JobRecord>, StoreError>;
}

/// Process-local job table
#[derive(Debug, Default)]
pub struct InMemoryJobStore {
    jobs: RwLock<HashMap<String, JobRecord>>,
}

impl InMemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.jobs.read().await.len()
    }
}

#[async_trait]
impl JobStore for InMemoryJobStore {
    async fn insert(&self, job: JobRecord) -> Result<(), StoreError> {
        let mut jobs = self.jobs.write().await;
        if jobs.contains_key(&job.id) {
            return Err(StoreError::Duplicate(job.id));
        }
        jobs.insert(job.id.clone(), job);
        Ok(())
    }

    async fn get(&self, id: &str) -> Result<Option<JobRecord>, StoreError> {
        Ok(self.jobs.read().await.get(id).cloned())
    }

    async fn compare_and_set(
        &self,
        expected_version: u64,
        next: JobRecord,
    ) -> Result<bool, StoreError> {
        let mut jobs = self.jobs.write().await;
        match jobs.get_mut(&next.id) {
            Some(current) if current.version == expected_version => {
                *current = next;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn put(&self, job: JobRecord) -> Result<(), StoreError> {
        self.jobs.write().await.insert(job.id.clone(), job);
        Ok(())
    }

    async fn list_by_status(&self, status: JobStatus) -> Result<Vec<JobRecord>, StoreError> {
        Ok(self
            .jobs
            .read()
            .await
            .values()
            .filter(|job| job.status == status)
            .cloned()
            .collect())
    }
}
