//! HTTP Server for the sourcecat job API.
//!
//! Each submitted job runs to completion inside its request; the blocking
//! transform is moved to tokio's blocking pool.
//!
//! # API Endpoints
//!
//! | Method | Path                                  | Description                     |
//! |--------|---------------------------------------|---------------------------------|
//! | GET    | `/health`                             | Health check                    |
//! | POST   | `/api/jobs`                           | Submit a shared-file or query job |
//! | GET    | `/api/jobs`                           | List submitted jobs             |
//! | GET    | `/api/jobs/{request_id}`              | Aggregate context of a job      |
//! | GET    | `/api/jobs/{request_id}/sources/{id}` | Detail document of one source   |
//! | GET    | `/api/logs`                           | SSE stream for real-time logs   |

use axum::{
    extract::{Path, State},
    http::{header, Method, StatusCode},
    response::{sse::Event, IntoResponse, Json, Response, Sse},
    routing::get,
    Router,
};
use futures::stream::Stream;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::{convert::Infallible, net::SocketAddr, time::Duration};
use tokio::sync::RwLock;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::StreamExt as _;
use tower_http::cors::CorsLayer;
use uuid::Uuid;

use super::logs::{log_error, log_info, LOG_BROADCASTER};
use super::types::{error_response, JobRecord, JobRequest, JobSource, JobStatus};
use crate::config::{Settings, TransformConfig};
use crate::error::{PipelineError, PipelineResult, ServerError, ServerResult};
use crate::fetch::{TableFetcher, TapClient};
use crate::transform::pipeline::{
    fetch_table, job_config, transform, transform_fetched, TransformReport,
};

/// Shared handler state.
pub struct AppState<F = TapClient> {
    pub settings: Arc<Settings>,
    pub fetcher: Arc<F>,
    pub jobs: Arc<RwLock<HashMap<String, JobRecord>>>,
}

impl<F> AppState<F> {
    pub fn new(settings: Settings, fetcher: F) -> Self {
        Self {
            settings: Arc::new(settings),
            fetcher: Arc::new(fetcher),
            jobs: Arc::new(RwLock::new(HashMap::new())),
        }
    }
}

impl<F> Clone for AppState<F> {
    fn clone(&self) -> Self {
        Self {
            settings: Arc::clone(&self.settings),
            fetcher: Arc::clone(&self.fetcher),
            jobs: Arc::clone(&self.jobs),
        }
    }
}

impl IntoResponse for ServerError {
    fn into_response(self) -> Response {
        let status = match &self {
            ServerError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ServerError::NotFound(_) => StatusCode::NOT_FOUND,
            ServerError::Conflict(_) => StatusCode::CONFLICT,
            ServerError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
            ServerError::Pipeline(err) => match err {
                PipelineError::Config(_) => StatusCode::BAD_REQUEST,
                PipelineError::MissingColumn(_) | PipelineError::MalformedTable(_) => {
                    StatusCode::UNPROCESSABLE_ENTITY
                }
                PipelineError::Fetch(_) => StatusCode::BAD_GATEWAY,
                PipelineError::Io { .. } | PipelineError::Json(_) => {
                    StatusCode::INTERNAL_SERVER_ERROR
                }
            },
        };
        (status, Json(error_response(&self.to_string()))).into_response()
    }
}

/// Build the API router over `state`.
pub fn router<F>(state: AppState<F>) -> Router
where
    F: TableFetcher + Send + 'static,
{
    let cors = CorsLayer::new()
        .allow_origin(tower_http::cors::Any)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE, header::ACCEPT])
        .expose_headers([header::CONTENT_TYPE]);

    Router::new()
        .route("/", get(health))
        .route("/health", get(health))
        .route("/api/jobs", get(list_jobs::<F>).post(submit_job::<F>))
        .route("/api/jobs/{request_id}", get(get_job::<F>))
        .route("/api/jobs/{request_id}/sources/{id}", get(get_source::<F>))
        .route("/api/logs", get(sse_logs))
        .layer(cors)
        .with_state(state)
}

/// Start the HTTP server
pub async fn start_server(settings: Settings, port: u16) -> Result<(), Box<dyn std::error::Error>> {
    let fetcher = TapClient::new(settings.tap_url.clone());
    let app = router(AppState::new(settings, fetcher));

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    println!("🚀 Sourcecat server running on http://localhost:{}", port);
    println!("   POST /api/jobs                    - Submit a job");
    println!("   GET  /api/jobs/{{id}}               - Aggregate context");
    println!("   GET  /api/jobs/{{id}}/sources/{{n}}   - Source details");
    println!("   GET  /api/logs                    - SSE log stream");
    println!("   GET  /health                      - Health check");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

/// Health check endpoint
async fn health() -> Json<Value> {
    Json(json!({
        "status": "ok",
        "service": "sourcecat",
        "version": env!("CARGO_PKG_VERSION"),
        "endpoints": {
            "submit": "POST /api/jobs",
            "jobs": "GET /api/jobs",
            "context": "GET /api/jobs/{request_id}",
            "details": "GET /api/jobs/{request_id}/sources/{id}",
            "logs": "GET /api/logs (SSE)"
        }
    }))
}

/// SSE endpoint for real-time log streaming
async fn sse_logs() -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let rx = LOG_BROADCASTER.subscribe();

    let stream = BroadcastStream::new(rx).filter_map(|result| match result {
        Ok(entry) => {
            let json = serde_json::to_string(&entry).ok()?;
            Some(Ok(Event::default().data(json)))
        }
        Err(_) => None,
    });

    Sse::new(stream).keep_alive(
        axum::response::sse::KeepAlive::new()
            .interval(Duration::from_secs(15))
            .text("keep-alive"),
    )
}

/// Run a job and record its outcome.
async fn submit_job<F>(
    State(state): State<AppState<F>>,
    Json(request): Json<JobRequest>,
) -> ServerResult<Json<JobRecord>>
where
    F: TableFetcher + Send + 'static,
{
    let request_id = request
        .request_id
        .clone()
        .unwrap_or_else(|| Uuid::new_v4().to_string());

    {
        let mut jobs = state.jobs.write().await;
        if jobs.contains_key(&request_id) {
            return Err(ServerError::Conflict(format!(
                "request id '{}' was already submitted",
                request_id
            )));
        }
        // Jobs share the output directory, so one output file has one owner.
        if let Some(owner) = jobs
            .values()
            .find(|job| job.output_file == request.output_file && job.status != JobStatus::Failed)
        {
            return Err(ServerError::Conflict(format!(
                "output file '{}' belongs to job {}",
                request.output_file, owner.request_id
            )));
        }
        let record = JobRecord::new(&request_id, request.source.clone().into(), &request.output_file);
        jobs.insert(request_id.clone(), record);
    }

    println!("\n{}", "=".repeat(70));
    println!("📄 NEW JOB {} -> {}", request_id, request.output_file);
    println!("{}\n", "=".repeat(70));

    let outcome = run_job(&state, &request, &request_id).await;

    let mut jobs = state.jobs.write().await;
    let record = jobs
        .get_mut(&request_id)
        .ok_or_else(|| ServerError::Internal(format!("job {} vanished", request_id)))?;

    match outcome {
        Ok(report) => {
            record.complete(&report);
            Ok(Json(record.clone()))
        }
        Err(err) => {
            log_error(format!("Job {} failed: {}", request_id, err));
            record.fail(&err);
            Err(err)
        }
    }
}

async fn run_job<F>(
    state: &AppState<F>,
    request: &JobRequest,
    request_id: &str,
) -> ServerResult<TransformReport>
where
    F: TableFetcher + Send + 'static,
{
    let config = prepare_input(state, request, request_id).await?;
    let settings = Arc::clone(&state.settings);
    let fetched = matches!(request.source, JobSource::Query { .. });

    let report = tokio::task::spawn_blocking(move || {
        if fetched {
            transform_fetched(&settings, &config)
        } else {
            transform(&config)
        }
    })
    .await
    .map_err(|e| ServerError::Internal(e.to_string()))??;
    Ok(report)
}

/// Resolve the job's input table, fetching it first for query jobs.
async fn prepare_input<F>(
    state: &AppState<F>,
    request: &JobRequest,
    request_id: &str,
) -> PipelineResult<TransformConfig>
where
    F: TableFetcher + Send + 'static,
{
    let settings = state.settings.as_ref();
    let output_file = request.output_file.as_str();

    match &request.source {
        JobSource::SharedFile { sharedfile } => {
            let input_path = settings.shared_file_path(sharedfile)?;
            job_config(settings, input_path, output_file, request_id, request.options())
        }
        JobSource::Query { query } => {
            let config = job_config(
                settings,
                settings.fetched_table_path(output_file),
                output_file,
                request_id,
                request.options(),
            )?;
            fetch_table(settings, state.fetcher.as_ref(), query, output_file).await?;
            Ok(config)
        }
    }
}

/// List submitted jobs, oldest first
async fn list_jobs<F>(State(state): State<AppState<F>>) -> Json<Vec<JobRecord>> {
    let jobs = state.jobs.read().await;
    let mut records: Vec<JobRecord> = jobs.values().cloned().collect();
    records.sort_by(|a, b| a.created_at.cmp(&b.created_at));
    Json(records)
}

/// Aggregate context of a completed job
async fn get_job<F>(
    State(state): State<AppState<F>>,
    Path(request_id): Path<String>,
) -> ServerResult<Json<Value>> {
    let record = completed_job(&state, &request_id).await?;
    let path = state.settings.output_dir.join(&record.output_file);
    Ok(Json(read_json(path).await?))
}

/// Detail document of source `id`
async fn get_source<F>(
    State(state): State<AppState<F>>,
    Path((request_id, id)): Path<(String, usize)>,
) -> ServerResult<Json<Value>> {
    let record = completed_job(&state, &request_id).await?;
    if record.source_count.map_or(true, |count| id >= count) {
        return Err(ServerError::NotFound(format!(
            "source {} of job {}",
            id, request_id
        )));
    }
    let path = state.settings.details_path(&request_id, id);
    Ok(Json(read_json(path).await?))
}

async fn completed_job<F>(state: &AppState<F>, request_id: &str) -> ServerResult<JobRecord> {
    let jobs = state.jobs.read().await;
    let record = jobs
        .get(request_id)
        .ok_or_else(|| ServerError::NotFound(format!("job {}", request_id)))?;
    if !record.is_completed() {
        return Err(ServerError::BadRequest(format!(
            "job {} is {:?}",
            request_id, record.status
        )));
    }
    Ok(record.clone())
}

async fn read_json(path: PathBuf) -> ServerResult<Value> {
    log_info(format!("Serving {}", path.display()));
    let bytes = tokio::fs::read(&path)
        .await
        .map_err(|e| PipelineError::io(&path, e))?;
    let value = serde_json::from_slice(&bytes).map_err(PipelineError::from)?;
    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::FetchResult;
    use crate::votable::tests::GAIA_TWO_ROWS;
    use std::fs;
    use tempfile::{tempdir, TempDir};

    struct StaticFetcher;

    impl TableFetcher for StaticFetcher {
        async fn fetch(&self, _query: &str, destination: &std::path::Path) -> FetchResult<()> {
            fs::write(destination, GAIA_TWO_ROWS).map_err(|source| crate::error::FetchError::Io {
                path: destination.to_path_buf(),
                source,
            })
        }
    }

    fn test_state() -> (AppState<StaticFetcher>, TempDir, TempDir) {
        let input_dir = tempdir().unwrap();
        let output_dir = tempdir().unwrap();
        fs::write(input_dir.path().join("gaia.vot"), GAIA_TWO_ROWS).unwrap();
        let settings = Settings {
            input_dir: input_dir.path().to_path_buf(),
            output_dir: output_dir.path().to_path_buf(),
            ..Settings::default()
        };
        (AppState::new(settings, StaticFetcher), input_dir, output_dir)
    }

    fn request(body: Value) -> Json<JobRequest> {
        Json(serde_json::from_value(body).unwrap())
    }

    #[tokio::test]
    async fn test_shared_file_job_round_trip() {
        let (state, _input, output) = test_state();

        let Json(record) = submit_job(
            State(state.clone()),
            request(json!({"sharedfile": "gaia.vot", "outputFile": "out.json", "requestId": "42"})),
        )
        .await
        .unwrap();
        assert!(record.is_completed());
        assert_eq!(record.source_count, Some(2));
        assert!(output.path().join("42_1_details").exists());

        let Json(context) = get_job(State(state.clone()), Path("42".to_string())).await.unwrap();
        assert_eq!(context["sources"][1]["id"], 1);

        let Json(details) = get_source(State(state.clone()), Path(("42".to_string(), 0)))
            .await
            .unwrap();
        assert_eq!(details["source_id"], 1);
        assert!(details.get("id").is_none());

        let Json(jobs) = list_jobs(State(state)).await;
        assert_eq!(jobs.len(), 1);
    }

    #[tokio::test]
    async fn test_query_job_fetches_then_transforms() {
        let (state, _input, output) = test_state();

        let Json(record) = submit_job(
            State(state.clone()),
            request(json!({"query": "SELECT TOP 2 * FROM gaiadr1.gaia_source", "outputFile": "q.json"})),
        )
        .await
        .unwrap();
        assert!(record.is_completed());
        assert_eq!(Uuid::parse_str(&record.request_id).unwrap().get_version_num(), 4);
        assert!(output.path().join("simulatedData_q.json.vot").exists());
        assert!(output.path().join("q.json").exists());
    }

    #[tokio::test]
    async fn test_failed_job_is_recorded() {
        let (state, _input, _output) = test_state();

        let err = submit_job(
            State(state.clone()),
            request(json!({"sharedfile": "absent.vot", "outputFile": "out.json", "requestId": "1"})),
        )
        .await
        .unwrap_err();
        assert_eq!(err.into_response().status(), StatusCode::INTERNAL_SERVER_ERROR);

        let jobs = state.jobs.read().await;
        assert!(jobs["1"].error.is_some());
        drop(jobs);

        let err = get_job(State(state), Path("1".to_string())).await.unwrap_err();
        assert!(matches!(err, ServerError::BadRequest(_)));
    }

    #[tokio::test]
    async fn test_rejected_parameters() {
        let (state, _input, _output) = test_state();

        let err = submit_job(
            State(state.clone()),
            request(json!({"sharedfile": "../gaia.vot", "outputFile": "out.json"})),
        )
        .await
        .unwrap_err();
        assert_eq!(err.into_response().status(), StatusCode::BAD_REQUEST);

        let body = json!({"sharedfile": "gaia.vot", "outputFile": "out.json", "requestId": "5"});
        let Json(record) = submit_job(State(state.clone()), request(body.clone())).await.unwrap();
        assert!(record.is_completed());
        let err = submit_job(State(state), request(body)).await.unwrap_err();
        assert!(matches!(err, ServerError::Conflict(_)));
    }

    #[tokio::test]
    async fn test_output_file_has_one_owner() {
        let (state, _input, _output) = test_state();

        let Json(first) = submit_job(
            State(state.clone()),
            request(json!({"query": "SELECT TOP 2 * FROM gaiadr1.gaia_source", "outputFile": "out.json", "requestId": "a"})),
        )
        .await
        .unwrap();
        assert_eq!(first.source_count, Some(2));

        let err = submit_job(
            State(state.clone()),
            request(json!({"query": "SELECT TOP 1 * FROM gaiadr1.gaia_source", "outputFile": "out.json", "requestId": "b"})),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, ServerError::Conflict(ref m) if m.contains("job a")));
        assert_eq!(err.into_response().status(), StatusCode::CONFLICT);
        assert!(!state.jobs.read().await.contains_key("b"));

        let Json(context) = get_job(State(state), Path("a".to_string())).await.unwrap();
        assert_eq!(context["sources"].as_array().map(Vec::len), Some(2));
    }

    #[tokio::test]
    async fn test_unknown_job_and_source() {
        let (state, _input, _output) = test_state();

        let err = get_job(State(state.clone()), Path("nope".to_string())).await.unwrap_err();
        assert_eq!(err.into_response().status(), StatusCode::NOT_FOUND);

        let Json(record) = submit_job(
            State(state.clone()),
            request(json!({"sharedfile": "gaia.vot", "outputFile": "out.json", "requestId": "42"})),
        )
        .await
        .unwrap();
        assert_eq!(record.source_count, Some(2));
        let err = get_source(State(state), Path(("42".to_string(), 2))).await.unwrap_err();
        assert!(matches!(err, ServerError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_missing_column_maps_to_unprocessable() {
        let (state, input, _output) = test_state();
        let without_ra = GAIA_TWO_ROWS.replace(r#"name="ra""#, r#"name="alpha""#);
        fs::write(input.path().join("nora.vot"), without_ra).unwrap();

        let err = submit_job(
            State(state),
            request(json!({"sharedfile": "nora.vot", "outputFile": "out.json"})),
        )
        .await
        .unwrap_err();
        assert_eq!(err.into_response().status(), StatusCode::UNPROCESSABLE_ENTITY);
    }

    #[tokio::test]
    async fn test_health() {
        let Json(body) = health().await;
        assert_eq!(body["status"], "ok");
        assert_eq!(body["service"], "sourcecat");
    }
}
