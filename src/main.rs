mod batch;
mod config;
mod generation;
mod http;
mod insights;
mod jobs;
mod llm;
mod metrics;
mod models;
mod portfolio;
mod preprocess;
mod storage;

use axum::{
    Json, Router,
    extract::{DefaultBodyLimit, Path, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use base64::{Engine, engine::general_purpose::STANDARD as BASE64};
use batch::BatchOrchestrator;
use config::AppConfig;
use eyre::WrapErr;
use generation::{EditOptions, FluxTransport, GenerationClient};
use insights::InsightsService;
use llm::LlmClient;
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use models::{ApiError, PortfolioBody};
use portfolio::{PortfolioAssembler, PortfolioError, PortfolioErrorKind, PortfolioRequest, PortfolioResult};
use preprocess::ImagePreprocessor;
use serde::Serialize;
use serde_json::json;
use std::{net::SocketAddr, path::Path as FsPath, sync::Arc};
use storage::ArtifactStore;
use tower_http::{
    cors::{Any, CorsLayer},
    services::ServeDir,
    trace::TraceLayer,
};
use tracing::{error, info, warn};
use tracing_subscriber::{EnvFilter, fmt};

#[tokio::main]
async fn main() {
    if let Err(err) = run().await {
        error!(target = "snapsell.api", "server crashed: {err:?}");
    }
}

async fn run() -> eyre::Result<()> {
    let _ = dotenvy::dotenv();
    init_tracing();

    let config = AppConfig::from_env();
    if config.flux.api_key.is_none() {
        warn!(target = "snapsell.api", "FLUX_API_KEY not set, generation requests will be rejected");
    }
    if config.llm.api_key.is_none() {
        warn!(target = "snapsell.api", "OPENAI_API_KEY not set, curated mode uses category defaults");
    }

    let store = ArtifactStore::new(&config.output_dir);
    store
        .ensure_root()
        .await
        .wrap_err("creating output directory")?;

    let client = Arc::new(GenerationClient::new(
        Arc::new(FluxTransport::new(config.flux.clone())),
        config.poll,
    ));
    let orchestrator =
        BatchOrchestrator::new(client, store.clone(), config.batch, EditOptions::default());
    let insights = InsightsService::new(Arc::new(LlmClient::new(config.llm.clone())));
    let assembler = Arc::new(PortfolioAssembler::new(
        ImagePreprocessor::new(config.limits),
        orchestrator,
        insights,
        config.max_custom_prompts,
    ));
    let (queue, _worker) = jobs::JobQueue::spawn(assembler.clone(), config.queue_capacity, config.job_ttl);

    let prometheus_handle = PrometheusBuilder::new()
        .install_recorder()
        .wrap_err("installing prometheus recorder")?;

    let state = AppState {
        assembler,
        queue,
        openapi: Arc::new(load_openapi()),
        prometheus_handle,
        metrics_key: config.metrics_key.clone(),
    };
    let app = router(state, config.request_max_bytes, store.root());

    let addr: SocketAddr = ([0, 0, 0, 0], config.port).into();
    info!(target = "snapsell.api", output_dir = %store.root().display(), "listening on {addr}");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app.into_make_service()).await?;
    Ok(())
}

#[derive(Clone)]
struct AppState {
    assembler: Arc<PortfolioAssembler>,
    queue: jobs::JobQueue,
    openapi: Arc<serde_json::Value>,
    prometheus_handle: PrometheusHandle,
    metrics_key: Option<String>,
}

fn router(state: AppState, body_limit: usize, output_dir: &FsPath) -> Router {
    let cors = CorsLayer::new()
        .allow_headers(Any)
        .allow_methods(Any)
        .allow_origin(Any);

    Router::new()
        .route("/health", get(health))
        .route("/metrics", get(metrics_endpoint))
        .route("/openapi.json", get(openapi_json))
        .route("/portfolio", post(create_portfolio))
        .nest(
            "/jobs",
            Router::new()
                .route("/portfolio", post(enqueue_portfolio_job))
                .route("/{id}", get(get_job_status)),
        )
        .nest_service("/image", ServeDir::new(output_dir))
        .with_state(state)
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .layer(DefaultBodyLimit::max(body_limit))
}

fn load_openapi() -> serde_json::Value {
    serde_yaml::from_str(include_str!("../docs/openapi.yaml"))
        .unwrap_or_else(|_| json!({"openapi": "3.0.3"}))
}

/// Health and readiness check.
///
/// - Method: `GET`
/// - Path: `/health`
async fn health() -> Json<serde_json::Value> {
    Json(json!({
        "status": "ok",
        "service": "snapsell-api-rs",
    }))
}

async fn openapi_json(State(state): State<AppState>) -> Json<serde_json::Value> {
    Json((*state.openapi).clone())
}

async fn metrics_endpoint(State(state): State<AppState>, headers: HeaderMap) -> Response {
    if let Some(secret) = state.metrics_key.as_deref() {
        let presented = headers
            .get("X-Metrics-Key")
            .and_then(|v| v.to_str().ok())
            .unwrap_or("");
        if presented != secret {
            return (StatusCode::UNAUTHORIZED, "unauthorized").into_response();
        }
    }
    (
        [("Content-Type", "text/plain; version=0.0.4")],
        state.prometheus_handle.render(),
    )
        .into_response()
}

/// Build a listing image portfolio synchronously.
///
/// - Method: `POST`
/// - Path: `/portfolio`
/// - Body: `PortfolioBody`
/// - Response: `PortfolioResult` with generated images and per-job errors
async fn create_portfolio(
    State(state): State<AppState>,
    Json(body): Json<PortfolioBody>,
) -> Result<Json<PortfolioResult>, AppError> {
    crate::metrics::inc_requests("/portfolio");
    let request = portfolio_request(body)?;
    info!(
        target = "snapsell.api",
        mode = ?request.mode,
        item = %request.item.item_name,
        image_bytes = request.image.len(),
        "portfolio requested"
    );
    let result = state.assembler.build_portfolio(request).await?;
    Ok(Json(result))
}

#[derive(Debug, Serialize)]
struct EnqueueResponse {
    job_id: String,
}

async fn enqueue_portfolio_job(
    State(state): State<AppState>,
    Json(body): Json<PortfolioBody>,
) -> Result<(StatusCode, Json<EnqueueResponse>), AppError> {
    crate::metrics::inc_requests("/jobs/portfolio");
    let request = portfolio_request(body)?;
    state.assembler.validate(&request)?;
    let id = state
        .queue
        .enqueue(request)
        .await
        .map_err(|err| AppError::Internal(err.to_string()))?;
    Ok((
        StatusCode::ACCEPTED,
        Json(EnqueueResponse {
            job_id: id.to_string(),
        }),
    ))
}

async fn get_job_status(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<jobs::JobInfo>, AppError> {
    let Ok(uuid) = uuid::Uuid::parse_str(&id) else {
        return Err(AppError::InvalidInput("invalid_job_id", id));
    };
    state
        .queue
        .get(uuid)
        .await
        .map(Json)
        .ok_or(AppError::NotFound(id))
}

fn portfolio_request(body: PortfolioBody) -> Result<PortfolioRequest, AppError> {
    let image = decode_image(&body.image_base64)?;
    Ok(PortfolioRequest {
        image: Arc::from(image),
        item: body.item,
        mode: body.mode,
        prompts: body.prompts,
        overrides: body.overrides,
    })
}

/// Accepts raw base64 or a `data:<mime>;base64,<payload>` URL.
fn decode_image(raw: &str) -> Result<Vec<u8>, AppError> {
    let payload = raw
        .trim()
        .split_once(";base64,")
        .map(|(_, data)| data)
        .unwrap_or(raw.trim());
    let bytes = BASE64
        .decode(payload)
        .map_err(|err| AppError::InvalidInput("invalid_image_base64", err.to_string()))?;
    if bytes.is_empty() {
        return Err(AppError::InvalidInput("invalid_image_base64", "image is empty".into()));
    }
    Ok(bytes)
}

#[derive(Debug)]
enum AppError {
    Portfolio(PortfolioError),
    InvalidInput(&'static str, String),
    NotFound(String),
    Internal(String),
}

impl From<PortfolioError> for AppError {
    fn from(value: PortfolioError) -> Self {
        Self::Portfolio(value)
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error, detail) = match self {
            AppError::Portfolio(err) => {
                let status = match err.kind() {
                    PortfolioErrorKind::InvalidInput => StatusCode::BAD_REQUEST,
                    PortfolioErrorKind::Unprocessable => StatusCode::UNPROCESSABLE_ENTITY,
                    PortfolioErrorKind::Internal => StatusCode::INTERNAL_SERVER_ERROR,
                };
                (status, err.stage().to_string(), err.to_string())
            }
            AppError::InvalidInput(code, detail) => {
                (StatusCode::BAD_REQUEST, code.to_string(), detail)
            }
            AppError::NotFound(id) => (StatusCode::NOT_FOUND, "not_found".into(), id),
            AppError::Internal(detail) => {
                (StatusCode::INTERNAL_SERVER_ERROR, "internal".into(), detail)
            }
        };
        if status.is_server_error() {
            error!(target = "snapsell.api", %error, %detail, "request failed");
        }
        let payload = ApiError {
            error,
            detail: Some(detail),
        };
        (status, Json(payload)).into_response()
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,tower_http=debug"));
    let _ = fmt().with_env_filter(filter).try_init();
}
