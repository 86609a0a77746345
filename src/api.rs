use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use tower_http::cors::CorsLayer;

use crate::error::SentinelError;
use crate::history::RunRecord;
use crate::ingest::scheduler::RuntimeSnapshot;
use crate::publish::PublishReport;
use crate::sentinel::{ImportOptions, ImportOutcome, Sentinel};
use crate::sources::{Source, SourceQuery};
use crate::telemetry::{LogLine, MetricsSnapshot};

const DEFAULT_LIMIT: usize = 100;

pub type AppState = Arc<Sentinel>;

/// Control surface over one [`Sentinel`]. Prometheus `/metrics` is merged in
/// by the binary, since it needs the installed recorder.
pub fn router(sentinel: AppState) -> Router {
    Router::new()
        .route("/health", get(|| async { "ok" }))
        .route("/sentinel/status", get(status))
        .route("/sentinel/config", get(config))
        .route("/sentinel/enabled", post(set_enabled))
        .route("/sentinel/auto-persist", post(set_auto_persist))
        .route("/sentinel/frequency", post(set_frequency))
        .route("/sentinel/sources", get(list_sources).put(replace_sources))
        .route("/sentinel/sources/{id}/enabled", post(set_source_enabled))
        .route("/sentinel/run", post(run_once))
        .route("/sentinel/force-run", post(force_run))
        .route("/sentinel/stop", post(stop))
        .route("/sentinel/import", post(import_url))
        .route("/sentinel/auto-publish", post(auto_publish))
        .route("/sentinel/logs", get(logs))
        .route("/sentinel/metrics", get(metrics))
        .route("/sentinel/runs", get(runs))
        .layer(CorsLayer::very_permissive())
        .with_state(sentinel)
}

/// `SentinelError` as an HTTP response.
pub struct ApiError(pub SentinelError);

impl From<SentinelError> for ApiError {
    fn from(e: SentinelError) -> Self {
        Self(e)
    }
}

pub fn status_for(e: &SentinelError) -> StatusCode {
    match e {
        SentinelError::Busy(_) | SentinelError::Cooldown { .. } | SentinelError::Disabled => {
            StatusCode::CONFLICT
        }
        SentinelError::Validation(_) => StatusCode::BAD_REQUEST,
        SentinelError::NotFound(_) => StatusCode::NOT_FOUND,
        SentinelError::Rejected(_) | SentinelError::Duplicate(_) => StatusCode::UNPROCESSABLE_ENTITY,
        SentinelError::SourceFetch { .. } => StatusCode::BAD_GATEWAY,
        SentinelError::RateLimitExceeded { .. } => StatusCode::TOO_MANY_REQUESTS,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = status_for(&self.0);
        if status.is_server_error() {
            tracing::warn!(target: "sentinel", error = %self.0, "request failed");
        }
        let body = serde_json::json!({
            "error": self.0.kind(),
            "message": self.0.to_string(),
        });
        (status, Json(body)).into_response()
    }
}

type ApiResult<T> = Result<Json<T>, ApiError>;

#[derive(Deserialize)]
struct EnabledBody {
    enabled: bool,
}

#[derive(Deserialize)]
struct AutoPersistBody {
    auto_persist: bool,
}

#[derive(Deserialize)]
struct FrequencyBody {
    frequency_ms: u64,
}

#[derive(Deserialize)]
struct LimitQuery {
    limit: Option<usize>,
}

#[derive(Deserialize)]
struct ImportBody {
    url: String,
    #[serde(flatten)]
    opts: ImportOptions,
}

async fn status(State(s): State<AppState>) -> Json<RuntimeSnapshot> {
    Json(s.snapshot())
}

async fn config(State(s): State<AppState>) -> Json<crate::config::SentinelConfig> {
    Json(s.config())
}

async fn set_enabled(State(s): State<AppState>, Json(b): Json<EnabledBody>) -> Json<RuntimeSnapshot> {
    s.set_enabled(b.enabled);
    Json(s.snapshot())
}

async fn set_auto_persist(
    State(s): State<AppState>,
    Json(b): Json<AutoPersistBody>,
) -> Json<RuntimeSnapshot> {
    s.set_auto_persist(b.auto_persist);
    Json(s.snapshot())
}

async fn set_frequency(
    State(s): State<AppState>,
    Json(b): Json<FrequencyBody>,
) -> ApiResult<RuntimeSnapshot> {
    s.set_frequency_ms(b.frequency_ms)?;
    Ok(Json(s.snapshot()))
}

async fn list_sources(State(s): State<AppState>, Query(q): Query<SourceQuery>) -> Json<Vec<Source>> {
    Json(s.registry().list(&q))
}

async fn replace_sources(
    State(s): State<AppState>,
    Json(sources): Json<Vec<Source>>,
) -> ApiResult<Vec<Source>> {
    Ok(Json(s.replace_sources(sources)?))
}

async fn set_source_enabled(
    State(s): State<AppState>,
    Path(id): Path<String>,
    Json(b): Json<EnabledBody>,
) -> ApiResult<Source> {
    Ok(Json(s.registry().set_enabled(&id, b.enabled)?))
}

async fn run_once(State(s): State<AppState>) -> ApiResult<RunRecord> {
    Ok(Json(s.run_once().await?))
}

async fn force_run(State(s): State<AppState>) -> ApiResult<RunRecord> {
    Ok(Json(s.force_run().await?))
}

async fn stop(State(s): State<AppState>) -> Json<RuntimeSnapshot> {
    s.stop();
    Json(s.snapshot())
}

async fn import_url(State(s): State<AppState>, Json(b): Json<ImportBody>) -> ApiResult<ImportOutcome> {
    Ok(Json(s.import_url(&b.url, b.opts).await?))
}

async fn auto_publish(State(s): State<AppState>) -> ApiResult<PublishReport> {
    Ok(Json(s.auto_publish_sentinel_drafts().await?))
}

async fn logs(State(s): State<AppState>, Query(q): Query<LimitQuery>) -> Json<Vec<LogLine>> {
    Json(s.recent_logs(q.limit.unwrap_or(DEFAULT_LIMIT)))
}

async fn metrics(State(s): State<AppState>) -> Json<MetricsSnapshot> {
    Json(s.metrics())
}

async fn runs(State(s): State<AppState>, Query(q): Query<LimitQuery>) -> Json<Vec<RunRecord>> {
    Json(s.run_history(q.limit.unwrap_or(DEFAULT_LIMIT)))
}
