// src/server/http.rs

//! The HTTP front: the image route, the administrative command surface and
//! the Prometheus endpoint.

use super::context::AppState;
use crate::core::cache::engine::MaintenanceOutcome;
use crate::core::errors::PixelCacheError;
use crate::core::metrics::gather_metrics;
use crate::core::tasks::deferred::DeferredTaskContext;
use axum::extract::{Path, Query, State};
use axum::http::{HeaderName, StatusCode, Uri, header};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post, put};
use axum::{Json, Router};
use indexmap::IndexSet;
use serde::Deserialize;
use serde_json::json;
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

const X_CACHE: HeaderName = HeaderName::from_static("x-cache");
const X_CACHE_KEY: HeaderName = HeaderName::from_static("x-cache-key");

/// Maps engine errors to HTTP responses.
pub struct ApiError(PixelCacheError);

impl From<PixelCacheError> for ApiError {
    fn from(e: PixelCacheError) -> Self {
        ApiError(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            PixelCacheError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            PixelCacheError::OriginTransformFailure(_) => StatusCode::BAD_GATEWAY,
            PixelCacheError::CircuitOpen(_)
            | PixelCacheError::StoreUnavailable(_)
            | PixelCacheError::Timeout(_) => StatusCode::SERVICE_UNAVAILABLE,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        (status, Json(json!({ "error": self.0.to_string() }))).into_response()
    }
}

/// `?wait=true` forces a purge or sweep to finish before responding.
#[derive(Debug, Default, Deserialize)]
pub struct WaitParams {
    #[serde(default)]
    pub wait: bool,
}

#[derive(Debug, Deserialize)]
pub struct PathPurgeParams {
    pub pattern: String,
    #[serde(default)]
    pub wait: bool,
}

#[derive(Debug, Deserialize)]
pub struct MaintenanceParams {
    pub max_entries: Option<usize>,
    #[serde(default)]
    pub wait: bool,
}

#[derive(Debug, Deserialize)]
pub struct LogLevelParams {
    pub level: String,
}

/// Builds the router over the shared application state.
pub fn router(state: AppState) -> Router {
    let mut router = Router::new()
        .route("/admin/stats", get(stats))
        .route("/admin/purge/tag/{tag}", post(purge_tag))
        .route("/admin/purge/path", post(purge_path))
        .route("/admin/maintenance", post(maintenance))
        .route("/admin/log-level", put(log_level));
    if state.config.metrics.enabled {
        router = router.route("/metrics", get(metrics));
    }
    router.route("/{*path}", get(image)).with_state(state)
}

/// Serves the router until the shutdown signal arrives.
pub async fn serve(
    listener: TcpListener,
    router: Router,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> anyhow::Result<()> {
    axum::serve(listener, router)
        .with_graceful_shutdown(async move {
            shutdown_rx.recv().await.ok();
            info!("HTTP server shutting down.");
        })
        .await?;
    Ok(())
}

fn deferred_ctx(state: &AppState, wait: bool) -> Option<&dyn DeferredTaskContext> {
    if wait {
        None
    } else {
        Some(&state.deferred as &dyn DeferredTaskContext)
    }
}

async fn image(State(state): State<AppState>, uri: Uri) -> Result<Response, ApiError> {
    let res = state
        .service
        .handle(uri.path(), uri.query(), &IndexSet::new())
        .await?;
    let status = StatusCode::from_u16(res.status).unwrap_or(StatusCode::OK);
    let headers = [
        (header::CONTENT_TYPE, res.content_type),
        (header::CACHE_CONTROL, format!("public, max-age={}", res.max_age)),
        (X_CACHE, res.cache_status.to_string()),
        (X_CACHE_KEY, res.key.to_string()),
    ];
    Ok((status, headers, res.body).into_response())
}

async fn stats(State(state): State<AppState>) -> Result<Response, ApiError> {
    let stats = state.service.engine().stats().await?;
    Ok(Json(stats).into_response())
}

async fn purge_tag(
    State(state): State<AppState>,
    Path(tag): Path<String>,
    Query(params): Query<WaitParams>,
) -> Result<Response, ApiError> {
    let outcome = state
        .service
        .engine()
        .purge_by_tag(&tag, deferred_ctx(&state, params.wait))
        .await?;
    info!(tag = %tag, count = outcome.count, deferred = outcome.deferred, "Tag purge requested.");
    Ok(Json(outcome).into_response())
}

async fn purge_path(
    State(state): State<AppState>,
    Query(params): Query<PathPurgeParams>,
) -> Result<Response, ApiError> {
    let outcome = state
        .service
        .engine()
        .purge_by_path(&params.pattern, deferred_ctx(&state, params.wait))
        .await?;
    info!(pattern = %params.pattern, count = outcome.count, deferred = outcome.deferred, "Path purge requested.");
    Ok(Json(outcome).into_response())
}

async fn maintenance(
    State(state): State<AppState>,
    Query(params): Query<MaintenanceParams>,
) -> Response {
    let max_entries = params
        .max_entries
        .unwrap_or(state.config.maintenance.max_entries);
    match state
        .service
        .engine()
        .perform_maintenance(max_entries, deferred_ctx(&state, params.wait))
        .await
    {
        MaintenanceOutcome::Completed(report) => Json(report).into_response(),
        MaintenanceOutcome::Deferred => Json(json!({ "deferred": true })).into_response(),
    }
}

async fn log_level(
    State(state): State<AppState>,
    Query(params): Query<LogLevelParams>,
) -> Result<Response, ApiError> {
    let Some(handle) = &state.log_reload_handle else {
        return Err(PixelCacheError::Internal("log reloading is not available".into()).into());
    };
    let filter = EnvFilter::try_new(&params.level)
        .map_err(|e| PixelCacheError::InvalidRequest(format!("invalid log filter: {e}")))?;
    handle
        .reload(filter)
        .map_err(|e| PixelCacheError::Internal(format!("failed to reload log filter: {e}")))?;
    warn!(level = %params.level, "Log filter changed at runtime.");
    Ok(StatusCode::NO_CONTENT.into_response())
}

/// Encodes all registered metrics in the Prometheus text format.
async fn metrics() -> impl IntoResponse {
    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        gather_metrics(),
    )
}
