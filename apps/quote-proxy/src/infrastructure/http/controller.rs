//! HTTP Controller (Driver Adapter)
//!
//! Axum routes that delegate to the proxy executor, history ledger and
//! scheduler.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use axum::{
    Json, Router,
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
    routing::{get, post},
};
use chrono::Utc;
use serde_json::Value;

use crate::application::services::{ProxyExecutor, Scheduler, SchedulerError};
use crate::domain::scheduling::ScheduledJob;
use crate::infrastructure::metrics::{self, StoreKind, get_metrics_handle};

use super::request::{HistoryQuery, ProxyRequest, params_from_query};
use super::response::{
    ApiError, CacheStatsResponse, CleanupResponse, HealthResponse, HealthStatus, HistoryResponse,
};

/// Application state shared across handlers.
#[derive(Clone)]
pub struct AppState {
    /// Proxy executor, owning the response cache and history ledger.
    pub executor: ProxyExecutor,
    /// Job scheduler.
    pub scheduler: Arc<Scheduler>,
    /// Application version.
    pub version: String,
    started_at: Instant,
}

impl AppState {
    /// Create state; uptime counts from now.
    #[must_use]
    pub fn new(executor: ProxyExecutor, scheduler: Arc<Scheduler>, version: impl Into<String>) -> Self {
        Self {
            executor,
            scheduler,
            version: version.into(),
            started_at: Instant::now(),
        }
    }
}

/// Create the HTTP router with all endpoints.
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/api/{api}/{endpoint}", get(proxy_get).post(proxy_post))
        .route("/history/{subject}", get(history))
        .route("/cache", axum::routing::delete(clear_cache))
        .route("/cache/stats", get(cache_stats))
        .route("/cache/cleanup", post(cleanup_cache))
        .route("/scheduler/jobs", get(list_jobs))
        .route("/scheduler/jobs/{id}", get(get_job))
        .route("/scheduler/jobs/{id}/start", post(start_job))
        .route("/scheduler/jobs/{id}/stop", post(stop_job))
        .route("/scheduler/stats", get(scheduler_stats))
        .route("/health", get(health_check))
        .route("/healthz", get(liveness))
        .route("/metrics", get(metrics_handler))
        .with_state(state)
}

// =============================================================================
// Proxy
// =============================================================================

/// Query parameters naming path placeholders fill the path; the rest are
/// forwarded as the upstream query string.
async fn proxy_get(
    State(state): State<AppState>,
    Path((api, endpoint)): Path<(String, String)>,
    Query(query): Query<HashMap<String, String>>,
    headers: HeaderMap,
) -> Result<Json<Value>, ApiError> {
    let descriptor = state.executor.resolve(&api, &endpoint)?;
    let params = params_from_query(&descriptor, query, &headers);
    let body = state.executor.run(&api, &endpoint, &params, None).await?;
    Ok(Json(body))
}

async fn proxy_post(
    State(state): State<AppState>,
    Path((api, endpoint)): Path<(String, String)>,
    Json(request): Json<ProxyRequest>,
) -> Result<Json<Value>, ApiError> {
    let (params, extra_headers) = request.into_parts();
    let body = state
        .executor
        .run(&api, &endpoint, &params, extra_headers.as_ref())
        .await?;
    Ok(Json(body))
}

// =============================================================================
// History
// =============================================================================

async fn history(
    State(state): State<AppState>,
    Path(subject): Path<String>,
    Query(range): Query<HistoryQuery>,
) -> Json<HistoryResponse> {
    let points = state
        .executor
        .ledger()
        .get_history(&subject, range.start, range.end)
        .await;

    Json(HistoryResponse {
        subject,
        count: points.len(),
        points,
    })
}

// =============================================================================
// Cache
// =============================================================================

async fn cache_stats(State(state): State<AppState>) -> Json<CacheStatsResponse> {
    Json(CacheStatsResponse {
        responses: state.executor.cache().stats(),
        history: state.executor.ledger().series_store().stats(),
    })
}

async fn cleanup_cache(State(state): State<AppState>) -> Json<CleanupResponse> {
    let cache = state.executor.cache();
    let removed = cache.cleanup(None);
    metrics::record_cleanup_removed(removed);
    metrics::set_cache_entries(StoreKind::Response, cache.len());
    tracing::info!(removed, "Manual cache cleanup");
    Json(CleanupResponse { removed })
}

async fn clear_cache(State(state): State<AppState>) -> StatusCode {
    state.executor.cache().clear();
    metrics::set_cache_entries(StoreKind::Response, 0);
    tracing::info!("Response cache cleared");
    StatusCode::NO_CONTENT
}

// =============================================================================
// Scheduler
// =============================================================================

async fn list_jobs(State(state): State<AppState>) -> Json<Vec<ScheduledJob>> {
    Json(state.scheduler.get_all_statuses())
}

async fn get_job(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<ScheduledJob>, ApiError> {
    job_status(&state, id)
}

async fn start_job(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<ScheduledJob>, ApiError> {
    state.scheduler.start(&id)?;
    job_status(&state, id)
}

async fn stop_job(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<ScheduledJob>, ApiError> {
    state.scheduler.stop(&id)?;
    job_status(&state, id)
}

async fn scheduler_stats(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.scheduler.get_stats())
}

fn job_status(state: &AppState, id: String) -> Result<Json<ScheduledJob>, ApiError> {
    state
        .scheduler
        .get_status(&id)
        .map(Json)
        .ok_or_else(|| SchedulerError::JobNotFound(id).into())
}

// =============================================================================
// Health and Metrics
// =============================================================================

async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    let scheduler = state.scheduler.get_stats();
    let status = if scheduler.disabled > 0 {
        HealthStatus::Degraded
    } else {
        HealthStatus::Healthy
    };

    Json(HealthResponse {
        status,
        version: state.version.clone(),
        uptime_secs: state.started_at.elapsed().as_secs(),
        current_time: Utc::now(),
        cache: state.executor.cache().stats(),
        scheduler,
        history_subjects: state.executor.ledger().subjects().len(),
    })
}

async fn liveness() -> impl IntoResponse {
    (StatusCode::OK, "OK")
}

async fn metrics_handler() -> impl IntoResponse {
    get_metrics_handle().map_or_else(
        || {
            (
                StatusCode::SERVICE_UNAVAILABLE,
                [("content-type", "text/plain")],
                "Metrics not initialized".to_string(),
            )
        },
        |handle| {
            (
                StatusCode::OK,
                [("content-type", "text/plain; version=0.0.4; charset=utf-8")],
                handle.render(),
            )
        },
    )
}
