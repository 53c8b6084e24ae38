//! HTTP serving layer.
//!
//! Exposes the research pipeline as a JSON API:
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `POST` | `/research` | Start a run, returns `{task_id}` |
//! | `GET`  | `/research/{task_id}` | Task status, progress, and result |
//! | `POST` | `/oneshot` | Run to completion, return all stage outputs |
//! | `GET`  | `/health` | Health check (returns version) |
//!
//! Error responses share one schema:
//!
//! ```json
//! { "error": { "code": "bad_request", "message": "query must not be empty" } }
//! ```
//!
//! All origins, methods, and headers are permitted so browser clients can
//! call the API directly.

use std::collections::HashMap;
use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, RwLock};
use tower_http::cors::{Any, CorsLayer};
use tracing::{error, info};
use uuid::Uuid;

use crate::config::Config;
use crate::embedding::Embedder;
use crate::index::RetrievalIndex;
use crate::ingest::IngestionPipeline;
use crate::models::{ResearchBrief, StageUpdate};
use crate::pipeline::Pipeline;

/// Shared application state passed to all route handlers.
#[derive(Clone)]
pub struct AppState {
    pipeline: Arc<Pipeline>,
    tasks: Arc<RwLock<HashMap<Uuid, TaskRecord>>>,
}

impl AppState {
    pub fn new(pipeline: Arc<Pipeline>) -> Self {
        Self {
            pipeline,
            tasks: Arc::new(RwLock::new(HashMap::new())),
        }
    }
}

/// Lifecycle of an asynchronous research task.
#[derive(Clone, Debug, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Running,
    Completed,
    Error,
}

/// One entry in the task registry, returned verbatim by the status endpoint.
#[derive(Clone, Serialize)]
pub struct TaskRecord {
    pub query: String,
    pub status: TaskStatus,
    pub created_at: DateTime<Utc>,
    /// Stamped when the run reaches a terminal state.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    /// Stage updates in emission order; the adaptive round re-emits
    /// `searching` and `reading` with the combined results.
    pub progress: Vec<StageUpdate>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<ResearchBrief>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Starts the HTTP server: builds the shared index, spawns the ingestion
/// watcher, and serves until the process is terminated.
pub async fn run_server(config: &Config) -> anyhow::Result<()> {
    let index = Arc::new(RetrievalIndex::new(Embedder::new(&config.embedding)));
    let pipeline = Arc::new(Pipeline::from_config(config, index.clone()));

    let ingestion = Arc::new(IngestionPipeline::new(index, config.ingest.clone()));
    let _watcher = ingestion.spawn();

    let state = AppState::new(pipeline);
    let app = router(state);

    let bind_addr = &config.server.bind;
    info!(addr = %bind_addr, "research API listening");
    println!("Research API listening on http://{}", bind_addr);

    let listener = tokio::net::TcpListener::bind(bind_addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}

pub fn router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/research", post(handle_start_research))
        .route("/research/{task_id}", get(handle_task_status))
        .route("/oneshot", post(handle_oneshot))
        .route("/health", get(handle_health))
        .layer(cors)
        .with_state(state)
}

// ============ Error response ============

#[derive(Serialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Serialize)]
struct ErrorDetail {
    code: String,
    message: String,
}

#[derive(Debug)]
struct AppError {
    status: StatusCode,
    code: String,
    message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: ErrorDetail {
                code: self.code,
                message: self.message,
            },
        };
        (self.status, Json(body)).into_response()
    }
}

fn bad_request(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::BAD_REQUEST,
        code: "bad_request".to_string(),
        message: message.into(),
    }
}

fn not_found(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::NOT_FOUND,
        code: "not_found".to_string(),
        message: message.into(),
    }
}

fn internal(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::INTERNAL_SERVER_ERROR,
        code: "internal".to_string(),
        message: message.into(),
    }
}

// ============ GET /health ============

#[derive(Serialize)]
struct HealthResponse {
    status: String,
    version: String,
}

async fn handle_health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

// ============ POST /research ============

#[derive(Deserialize)]
struct ResearchRequest {
    query: String,
}

#[derive(Serialize)]
struct StartedResponse {
    task_id: Uuid,
}

async fn handle_start_research(
    State(state): State<AppState>,
    Json(request): Json<ResearchRequest>,
) -> Result<Json<StartedResponse>, AppError> {
    let query = request.query.trim().to_string();
    if query.is_empty() {
        return Err(bad_request("query must not be empty"));
    }

    let task_id = Uuid::new_v4();
    state.tasks.write().await.insert(
        task_id,
        TaskRecord {
            query: query.clone(),
            status: TaskStatus::Running,
            created_at: Utc::now(),
            completed_at: None,
            progress: Vec::new(),
            result: None,
            error: None,
        },
    );

    let (tx, mut rx) = mpsc::channel(16);

    // Progress collector: appends each stage update to the registry entry.
    let progress_tasks = state.tasks.clone();
    tokio::spawn(async move {
        while let Some(update) = rx.recv().await {
            if let Some(record) = progress_tasks.write().await.get_mut(&task_id) {
                record.progress.push(update);
            }
        }
    });

    let pipeline = state.pipeline.clone();
    let tasks = state.tasks.clone();
    tokio::spawn(async move {
        let outcome = pipeline.run_streaming(&query, tx).await;
        let mut tasks = tasks.write().await;
        if let Some(record) = tasks.get_mut(&task_id) {
            match outcome {
                Ok(brief) => {
                    record.status = TaskStatus::Completed;
                    record.result = Some(brief);
                }
                Err(e) => {
                    error!(%task_id, error = %e, "research task failed");
                    record.status = TaskStatus::Error;
                    record.error = Some(e.to_string());
                }
            }
            record.completed_at = Some(Utc::now());
        }
    });

    Ok(Json(StartedResponse { task_id }))
}

// ============ GET /research/{task_id} ============

async fn handle_task_status(
    State(state): State<AppState>,
    Path(task_id): Path<Uuid>,
) -> Result<Json<TaskRecord>, AppError> {
    let tasks = state.tasks.read().await;
    tasks
        .get(&task_id)
        .cloned()
        .map(Json)
        .ok_or_else(|| not_found(format!("no task with id {}", task_id)))
}

// ============ POST /oneshot ============

async fn handle_oneshot(
    State(state): State<AppState>,
    Json(request): Json<ResearchRequest>,
) -> Result<Json<serde_json::Value>, AppError> {
    let query = request.query.trim();
    if query.is_empty() {
        return Err(bad_request("query must not be empty"));
    }

    let (updates, _brief) = state
        .pipeline
        .run_collect(query)
        .await
        .map_err(|e| internal(e.to_string()))?;

    Ok(Json(stage_map(&updates)))
}

/// Flatten stage updates into a `{"Planning": ..., "Searching": ...}` map.
/// Later updates of the same stage overwrite earlier ones, so the adaptive
/// round's combined results win.
fn stage_map(updates: &[StageUpdate]) -> serde_json::Value {
    let mut map = serde_json::Map::new();
    for update in updates {
        let key = capitalized_stage(update);
        if let Ok(serde_json::Value::Object(tagged)) = serde_json::to_value(update) {
            if let Some(data) = tagged.get("data") {
                map.insert(key.to_string(), data.clone());
            }
        }
    }
    serde_json::Value::Object(map)
}

fn capitalized_stage(update: &StageUpdate) -> &'static str {
    match update {
        StageUpdate::Planning(_) => "Planning",
        StageUpdate::Searching(_) => "Searching",
        StageUpdate::Reading(_) => "Reading",
        StageUpdate::Verifying(_) => "Verifying",
        StageUpdate::Reflecting(_) => "Reflecting",
        StageUpdate::Briefing(_) => "Briefing",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{EmbeddingConfig, IngestConfig, RetrievalConfig};
    use crate::generation::HeuristicClient;
    use crate::read::ReadingAdapter;
    use crate::scrape::{PageFetcher, ScrapedHit, SearchScraper};
    use crate::search::SearchAdapter;
    use anyhow::Result;
    use async_trait::async_trait;

    struct LoopbackScraper;

    #[async_trait]
    impl SearchScraper for LoopbackScraper {
        async fn scrape(&self, query: &str) -> Result<Vec<ScrapedHit>> {
            Ok(vec![ScrapedHit {
                title: format!("{} result", query),
                url: "https://example.org/page".to_string(),
            }])
        }
    }

    struct LoopbackFetcher;

    #[async_trait]
    impl PageFetcher for LoopbackFetcher {
        async fn fetch(&self, url: &str) -> Result<String> {
            Ok(format!("<article><p>body of {}</p></article>", url))
        }
    }

    fn test_state() -> AppState {
        let index = Arc::new(RetrievalIndex::new(Embedder::new(
            &EmbeddingConfig::default(),
        )));
        let generation = Arc::new(HeuristicClient);
        let search = SearchAdapter::new(
            index.clone(),
            Arc::new(LoopbackScraper),
            Arc::new(LoopbackFetcher),
            RetrievalConfig::default(),
            IngestConfig::default(),
        );
        let reading = ReadingAdapter::new(
            index,
            Arc::new(LoopbackFetcher),
            RetrievalConfig::default(),
            IngestConfig::default(),
        );
        AppState::new(Arc::new(Pipeline::new(generation, search, reading)))
    }

    #[tokio::test]
    async fn health_reports_ok_and_version() {
        let response = handle_health().await;
        assert_eq!(response.0.status, "ok");
        assert_eq!(response.0.version, env!("CARGO_PKG_VERSION"));
    }

    #[tokio::test]
    async fn blank_query_is_rejected() {
        let state = test_state();
        let err = handle_start_research(
            State(state.clone()),
            Json(ResearchRequest {
                query: "   ".to_string(),
            }),
        )
        .await
        .err()
        .unwrap();
        assert_eq!(err.status, StatusCode::BAD_REQUEST);

        let err = handle_oneshot(
            State(state),
            Json(ResearchRequest {
                query: String::new(),
            }),
        )
        .await
        .err()
        .unwrap();
        assert_eq!(err.status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn unknown_task_is_not_found() {
        let state = test_state();
        let err = handle_task_status(State(state), Path(Uuid::new_v4()))
            .await
            .err()
            .unwrap();
        assert_eq!(err.status, StatusCode::NOT_FOUND);
        assert_eq!(err.code, "not_found");
    }

    #[tokio::test]
    async fn started_task_reaches_a_terminal_state() {
        let state = test_state();
        let response = handle_start_research(
            State(state.clone()),
            Json(ResearchRequest {
                query: "what is melatonin".to_string(),
            }),
        )
        .await
        .unwrap();
        let task_id = response.0.task_id;

        // The heuristic pipeline finishes quickly; poll the registry.
        for _ in 0..100 {
            tokio::time::sleep(std::time::Duration::from_millis(20)).await;
            let tasks = state.tasks.read().await;
            if let Some(record) = tasks.get(&task_id) {
                if record.status != TaskStatus::Running {
                    assert_eq!(record.status, TaskStatus::Completed);
                    assert!(record.result.is_some());
                    assert!(!record.progress.is_empty());
                    let completed = record.completed_at.expect("terminal state must be stamped");
                    assert!(completed >= record.created_at);
                    return;
                }
            }
        }
        panic!("task never left the running state");
    }

    #[test]
    fn failed_task_serializes_error_without_result() {
        let record = TaskRecord {
            query: "doomed question".to_string(),
            status: TaskStatus::Error,
            created_at: Utc::now(),
            completed_at: Some(Utc::now()),
            progress: Vec::new(),
            result: None,
            error: Some("stage fault".to_string()),
        };
        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["status"], "error");
        assert_eq!(json["error"], "stage fault");
        assert!(json.get("result").is_none());
        assert!(json.get("completed_at").is_some());
    }

    #[tokio::test]
    async fn oneshot_returns_capitalized_stage_map() {
        let state = test_state();
        let response = handle_oneshot(
            State(state),
            Json(ResearchRequest {
                query: "what is melatonin".to_string(),
            }),
        )
        .await
        .unwrap();

        let map = response.0.as_object().unwrap();
        for key in ["Planning", "Searching", "Reading", "Verifying", "Reflecting", "Briefing"] {
            assert!(map.contains_key(key), "missing stage {}", key);
        }
        assert!(map["Briefing"].get("Sources").is_some());
    }
}
