//! Notely - context ranking and job lifecycle for the study assistant
//!
//! Implements:
//! - Linear, live-tunable ranking of retrieved study material
//! - Source-diversity mixing so one uploaded file cannot dominate a prompt
//! - Retry/backoff lifecycle for asynchronous evaluate/generate jobs

pub mod types;
pub mod config;
pub mod context_engine;
pub mod generators;
pub mod http_generator;
pub mod ingest;
pub mod job_store;
pub mod jobs;
pub mod scoring;
pub mod selection;
pub mod server;
pub mod weights_client;
pub mod worker;

pub use types::*;
pub use context_engine::ContextEngine;
pub use generators::{CandidateSource, StaticCandidateSource};
pub use http_generator::HttpCandidateSource;
pub use job_store::{InMemoryJobStore, JobStore};
pub use jobs::{backoff, JobError, JobLifecycle, JobRecord, JobStatus};
pub use scoring::rank;
pub use selection::mix_sources;
pub use weights_client::{StaticWeights, WeightsClient, WeightsProvider};
pub use worker::{JobExecutor, Worker};
