use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::middleware::from_fn;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use clap::Parser;
use serde::Serialize;
use tokio::net::TcpListener;
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::{DefaultMakeSpan, DefaultOnFailure, DefaultOnResponse, TraceLayer};
use tracing::{Level, error, info, warn};

mod metrics;

use scrivener::cli::{EngineArgs, PipelineArgs};
use scrivener::{
    HttpEngine, JobId, JobRequest, JobResults, JobSnapshot, LocalFolderSource, PipelineConfig,
    TranscriptionEngine, TranscriptionService,
};

type Service = TranscriptionService<HttpEngine, LocalFolderSource>;

#[derive(Parser, Debug)]
#[command(name = "scrivener-server")]
#[command(about = "HTTP server for batch folder transcription")]
struct Params {
    /// Host interface to bind to.
    #[arg(long = "host", env = "SCRIVENER_HOST", default_value = "127.0.0.1")]
    host: String,

    /// TCP port to listen on.
    #[arg(long = "port", env = "SCRIVENER_PORT", default_value_t = 8080)]
    port: u16,

    /// Resolve relative folder references against this directory.
    #[arg(long = "folder-root", env = "SCRIVENER_FOLDER_ROOT")]
    folder_root: Option<PathBuf>,

    /// Per-request timeout, in seconds. Jobs keep running after their submit request returns.
    #[arg(
        long = "request-timeout-secs",
        env = "SCRIVENER_REQUEST_TIMEOUT_SECS",
        default_value_t = 600
    )]
    request_timeout_secs: u64,

    #[command(flatten)]
    engine: EngineArgs,

    #[command(flatten)]
    pipeline: PipelineArgs,
}

#[derive(Clone)]
struct AppState {
    service: Service,
}

#[derive(Debug, Serialize)]
struct ConfigResponse<'a> {
    model: &'a str,
    #[serde(flatten)]
    pipeline: &'a PipelineConfig,
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: String,
}

#[derive(Debug)]
struct AppError {
    status: StatusCode,
    message: String,
}

impl AppError {
    fn bad_request(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            message: message.into(),
        }
    }
}

impl From<scrivener::Error> for AppError {
    fn from(err: scrivener::Error) -> Self {
        let status = match &err {
            scrivener::Error::NotFound(_) => StatusCode::NOT_FOUND,
            scrivener::Error::Conflict(_) => StatusCode::CONFLICT,
            scrivener::Error::Discovery(_) => StatusCode::UNPROCESSABLE_ENTITY,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        Self {
            status,
            message: err.to_string(),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = Json(ErrorBody {
            error: self.message,
        });
        (self.status, body).into_response()
    }
}

#[tokio::main]
async fn main() {
    scrivener::init_logging();

    if let Err(err) = run().await {
        error!(error = ?err, "scrivener-server failed");
        std::process::exit(1);
    }
}

async fn run() -> Result<()> {
    let params = Params::parse();

    if let Err(err) = metrics::init() {
        warn!(error = ?err, "metrics disabled (init failed)");
    }

    let addr: SocketAddr = format!("{}:{}", params.host, params.port)
        .parse()
        .context("invalid host/port bind address")?;

    let config = params
        .pipeline
        .to_config()
        .context("invalid pipeline configuration")?;
    let engine =
        HttpEngine::new(params.engine.to_config()).context("failed to build engine client")?;
    let mut source = LocalFolderSource::new(&config);
    if let Some(root) = &params.folder_root {
        source = source.with_root(root);
    }
    let service =
        TranscriptionService::new(engine, source, config).context("failed to build service")?;

    let app = router(AppState { service })
        .layer(TimeoutLayer::new(Duration::from_secs(
            params.request_timeout_secs,
        )))
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(
                    DefaultMakeSpan::new()
                        .level(Level::INFO)
                        .include_headers(false),
                )
                .on_response(DefaultOnResponse::new().level(Level::INFO))
                .on_failure(DefaultOnFailure::new().level(Level::ERROR)),
        );

    let listener = TcpListener::bind(addr).await.context("bind failed")?;
    info!(%addr, "listening");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;

    info!("shut down");
    Ok(())
}

fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(root))
        .route("/healthz", get(healthz))
        .route("/metrics", get(metrics::prometheus_metrics))
        .route("/v1/config", get(config))
        .route("/v1/jobs", get(list_jobs).post(submit_job))
        .route("/v1/jobs/{id}", get(job_status).delete(evict_job))
        .route("/v1/jobs/{id}/results", get(job_results))
        .route_layer(from_fn(metrics::track_http_metrics))
        .with_state(state)
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        error!(error = %err, "failed to listen for ctrl-c");
        std::future::pending::<()>().await;
    }
    info!("shutdown requested; in-flight jobs will be dropped");
}

async fn root() -> &'static str {
    "scrivener-server: POST /v1/jobs {\"folder\": \"...\"}, then GET /v1/jobs/{id}"
}

async fn healthz() -> &'static str {
    "ok"
}

async fn config(State(state): State<AppState>) -> Response {
    Json(ConfigResponse {
        model: state.service.engine().model_id(),
        pipeline: state.service.config(),
    })
    .into_response()
}

async fn submit_job(
    State(state): State<AppState>,
    Json(request): Json<JobRequest>,
) -> std::result::Result<(StatusCode, Json<JobSnapshot>), AppError> {
    if request.folder.trim().is_empty() {
        return Err(AppError::bad_request("folder must not be empty"));
    }
    if request.max_file_size_bytes == Some(0) {
        return Err(AppError::bad_request(
            "max_file_size_bytes must be greater than zero",
        ));
    }

    let submitted = state.service.submit(request).await?;
    Ok((StatusCode::ACCEPTED, Json(submitted.snapshot)))
}

async fn list_jobs(State(state): State<AppState>) -> Json<Vec<JobSnapshot>> {
    Json(state.service.list())
}

async fn job_status(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> std::result::Result<Json<JobSnapshot>, AppError> {
    let id = parse_job_id(&id)?;
    Ok(Json(state.service.status(id)?))
}

async fn job_results(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> std::result::Result<Json<JobResults>, AppError> {
    let id = parse_job_id(&id)?;
    Ok(Json(state.service.results(id)?))
}

async fn evict_job(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> std::result::Result<Json<JobSnapshot>, AppError> {
    let id = parse_job_id(&id)?;
    Ok(Json(state.service.evict(id)?))
}

fn parse_job_id(raw: &str) -> std::result::Result<JobId, AppError> {
    JobId::parse(raw).ok_or_else(|| AppError::bad_request(format!("invalid job id '{raw}'")))
}
