//! HTTP server for Notely context ranking and job tracking

use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::sync::Arc;
use tracing::{error, info};

use crate::{
    config::ServerConfig,
    jobs::{JobError, JobLifecycle, JobRecord, NewJob},
    ContextEngine, ContextRequest, ContextResponse, MixOptions, PartialWeights, RankOutput,
    RetrievalQuery, UnfiledPolicy,
};

/// Shared handler state
#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<ContextEngine>,
    pub jobs: Arc<JobLifecycle>,
    pub config: Arc<ServerConfig>,
}

#[derive(Debug, Deserialize)]
pub struct RankRequestHttp {
    pub candidates: Vec<Value>,
    pub weights: Option<PartialWeights>,
    pub user_id: Option<String>,
    pub top_n: Option<usize>,
    pub separator: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ContextRequestHttp {
    pub query: String,
    pub user_id: Option<String>,
    pub course_id: Option<String>,
    pub target_total: Option<usize>,
    pub min_files: Option<usize>,
    pub max_files: Option<usize>,
    #[serde(default)]
    pub unfiled: Option<UnfiledPolicy>,
    pub separator: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct SucceedRequestHttp {
    #[serde(default)]
    pub patch: Option<Map<String, Value>>,
}

#[derive(Debug, Deserialize)]
pub struct FailRequestHttp {
    pub error: String,
}

/// Error response
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub details: Option<String>,
}

/// Health check response
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub service: String,
    pub version: String,
}

type ApiError = (StatusCode, Json<ErrorResponse>);

fn api_error(status: StatusCode, error: &str, details: Option<String>) -> ApiError {
    (
        status,
        Json(ErrorResponse {
            error: error.to_string(),
            details,
        }),
    )
}

fn job_error(e: JobError) -> ApiError {
    let status = match &e {
        JobError::NotFound(_) => StatusCode::NOT_FOUND,
        JobError::Contended(_) => StatusCode::CONFLICT,
        JobError::Invalid(_) => StatusCode::BAD_REQUEST,
        JobError::Store(crate::job_store::StoreError::Duplicate(_)) => StatusCode::CONFLICT,
        JobError::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
    };
    if status == StatusCode::INTERNAL_SERVER_ERROR {
        error!("Job operation failed: {:?}", e);
    }
    api_error(status, "Job operation failed", Some(e.to_string()))
}

/// Rank caller-supplied candidates
async fn rank_handler(
    State(state): State<AppState>,
    Json(req): Json<RankRequestHttp>,
) -> Json<RankOutput> {
    info!(
        "Received rank request: {} candidates, top_n={:?}, user_id={:?}",
        req.candidates.len(),
        req.top_n,
        req.user_id
    );

    let output = state
        .engine
        .rank_candidates(
            &req.candidates,
            req.weights,
            req.user_id.as_deref(),
            req.top_n.unwrap_or(state.config.top_n),
            req.separator.as_deref(),
        )
        .await;

    Json(output)
}

/// Assemble prompt context from the similarity-search sources
async fn context_handler(
    State(state): State<AppState>,
    Json(req): Json<ContextRequestHttp>,
) -> Result<Json<ContextResponse>, ApiError> {
    if req.query.trim().is_empty() {
        return Err(api_error(StatusCode::BAD_REQUEST, "query must not be empty", None));
    }

    let defaults = state.config.mix;
    let context_req = ContextRequest {
        retrieval: RetrievalQuery {
            query: req.query,
            user_id: req.user_id,
            course_id: req.course_id,
        },
        target_total: req.target_total.unwrap_or(state.config.target_total),
        mix: MixOptions {
            min_files: req.min_files.unwrap_or(defaults.min_files),
            max_files: req.max_files.unwrap_or(defaults.max_files),
            unfiled: req.unfiled.unwrap_or(defaults.unfiled),
        },
        separator: req.separator,
    };

    match state.engine.assemble_context(context_req).await {
        Ok(response) => Ok(Json(response)),
        Err(e) => {
            error!("Context assembly failed: {:?}", e);
            Err(api_error(
                StatusCode::INTERNAL_SERVER_ERROR,
                "Context assembly failed",
                Some(e.to_string()),
            ))
        }
    }
}

async fn create_job_handler(
    State(state): State<AppState>,
    Json(req): Json<NewJob>,
) -> Result<(StatusCode, Json<JobRecord>), ApiError> {
    let job = state.jobs.create(req).await.map_err(job_error)?;
    Ok((StatusCode::CREATED, Json(job)))
}

async fn get_job_handler(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<JobRecord>, ApiError> {
    state.jobs.get(&id).await.map(Json).map_err(job_error)
}

async fn succeed_job_handler(
    State(state): State<AppState>,
    Path(id): Path<String>,
    body: Option<Json<SucceedRequestHttp>>,
) -> Result<Json<JobRecord>, ApiError> {
    let patch = body.and_then(|Json(b)| b.patch);
    state
        .jobs
        .mark_succeeded(&id, patch)
        .await
        .map(Json)
        .map_err(job_error)
}

async fn fail_job_handler(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(req): Json<FailRequestHttp>,
) -> Result<Json<JobRecord>, ApiError> {
    state
        .jobs
        .mark_failed_with_auto_retry(&id, &req.error)
        .await
        .map(Json)
        .map_err(job_error)
}

async fn requeue_job_handler(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<JobRecord>, ApiError> {
    info!("Operator requeue for job {}", id);
    state.jobs.requeue_now(&id).await.map(Json).map_err(job_error)
}

/// Health check handler
async fn health_handler() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        service: "notely".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

/// Create and configure the HTTP router
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/rank", post(rank_handler))
        .route("/context", post(context_handler))
        .route("/jobs", post(create_job_handler))
        .route("/jobs/:id", get(get_job_handler))
        .route("/jobs/:id/succeed", post(succeed_job_handler))
        .route("/jobs/:id/fail", post(fail_job_handler))
        .route("/jobs/:id/requeue", post(requeue_job_handler))
        .with_state(state)
}

/// Run the HTTP server
pub async fn run_server(state: AppState, port: u16) -> anyhow::Result<()> {
    let addr = format!("0.0.0.0:{}", port);
    info!("Starting Notely server on {}", addr);

    let app = create_router(state);

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!("Server listening on {}", addr);

    axum::serve(listener, app).await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job_store::{InMemoryJobStore, StoreError};
    use crate::jobs::{JobStatus, ManualClock};
    use crate::{RankCandidate, StaticCandidateSource};
    use axum::body::{to_bytes, Body};
    use axum::http::Request;
    use serde_json::json;
    use tower::ServiceExt;

    fn test_state() -> AppState {
        let mut c1 = RankCandidate::new("c1", "Krebs-cyklussen foregår i mitokondriet");
        c1.similarity = 0.9;
        c1.file_id = Some("bio.pdf".to_string());
        let mut c2 = RankCandidate::new("c2", "Glykolyse foregår i cytoplasmaet");
        c2.similarity = 0.6;
        c2.file_id = Some("bio.pdf".to_string());

        let source = StaticCandidateSource::new(vec![c1, c2]);
        let engine = ContextEngine::new_simple(vec![Box::new(source)]);
        let jobs = JobLifecycle::with_clock(
            Arc::new(InMemoryJobStore::new()),
            Arc::new(ManualClock::new(1_000)),
        );
        AppState {
            engine,
            jobs: Arc::new(jobs),
            config: Arc::new(ServerConfig::default()),
        }
    }

    async fn call(
        app: &Router,
        method: &str,
        uri: &str,
        body: Option<Value>,
    ) -> (StatusCode, Value) {
        let mut builder = Request::builder().method(method).uri(uri);
        let body = match body {
            Some(json) => {
                builder = builder.header("content-type", "application/json");
                Body::from(json.to_string())
            }
            None => Body::empty(),
        };
        let response = app.clone().oneshot(builder.body(body).unwrap()).await.unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let value = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, value)
    }

    #[tokio::test]
    async fn test_health() {
        let app = create_router(test_state());
        let (status, body) = call(&app, "GET", "/health", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["service"], "notely");
    }

    #[tokio::test]
    async fn test_rank_endpoint() {
        let app = create_router(test_state());
        let (status, body) = call(
            &app,
            "POST",
            "/rank",
            Some(json!({
                "candidates": [
                    { "id": "a", "text": "low", "similarity": 0.1 },
                    { "id": "b", "chunk": "high", "score": 0.9, "verifiedWeight": 10 }
                ],
                "top_n": 1
            })),
        )
        .await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["ranked"].as_array().unwrap().len(), 1);
        assert_eq!(body["ranked"][0]["id"], "b");
        assert_eq!(body["ranked_text"], "high");
        assert_eq!(body["total_candidates"], 2);
    }

    #[tokio::test]
    async fn test_context_endpoint() {
        let app = create_router(test_state());
        let request = json!({ "query": "cellers energi" });
        let (status, body) = call(&app, "POST", "/context", Some(request)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["stats"]["candidates_selected"], 2);
        assert!(body["context_text"].as_str().unwrap().starts_with("Krebs"));

        let (status, _) = call(&app, "POST", "/context", Some(json!({ "query": "  " }))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_job_routes() {
        let app = create_router(test_state());

        let (status, job) = call(
            &app,
            "POST",
            "/jobs",
            Some(json!({ "id": "eval-1", "kind": "evaluate", "payload": { "answer": "42" } })),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(job["status"], "queued");

        let duplicate = json!({ "id": "eval-1", "kind": "evaluate" });
        let (status, _) = call(&app, "POST", "/jobs", Some(duplicate)).await;
        assert_eq!(status, StatusCode::CONFLICT);

        for _ in 0..3 {
            let failure = json!({ "error": "timeout" });
            let (status, _) = call(&app, "POST", "/jobs/eval-1/fail", Some(failure)).await;
            assert_eq!(status, StatusCode::OK);
        }
        let (_, job) = call(&app, "GET", "/jobs/eval-1", None).await;
        assert_eq!(job["status"], "failed");
        assert_eq!(job["attempts"], 3);

        let (status, job) = call(&app, "POST", "/jobs/eval-1/requeue", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(job["status"], "queued");
        assert_eq!(job["error"], Value::Null);

        let (status, job) = call(
            &app,
            "POST",
            "/jobs/eval-1/succeed",
            Some(json!({ "patch": { "score": 3 } })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        let record: JobRecord = serde_json::from_value(job).unwrap();
        assert_eq!(record.status, JobStatus::Succeeded);
        assert_eq!(record.result["score"], 3);

        let (status, _) = call(&app, "GET", "/jobs/nope", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[test]
    fn test_job_error_status_mapping() {
        let (status, Json(body)) = job_error(JobError::Contended("j1".to_string()));
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(body.details.as_deref(), Some("job j1 changed concurrently too many times"));

        let (status, _) = job_error(JobError::NotFound("j1".to_string()));
        assert_eq!(status, StatusCode::NOT_FOUND);
        let (status, _) = job_error(JobError::Store(StoreError::Backend("disk".to_string())));
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    }
}
