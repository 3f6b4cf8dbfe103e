//! HTTP response DTOs and error mapping.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::application::ports::TransportError;
use crate::application::services::{ProxyError, SchedulerError};
use crate::domain::cache::CacheStats;
use crate::domain::endpoint::MissingParam;
use crate::domain::history::HistoryPoint;
use crate::domain::scheduling::SchedulerStats;

/// Overall health status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    /// All jobs are runnable.
    Healthy,
    /// At least one job disabled itself.
    Degraded,
}

/// Response of `GET /health`.
#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    /// Overall status.
    pub status: HealthStatus,
    /// Proxy version.
    pub version: String,
    /// Server uptime in seconds.
    pub uptime_secs: u64,
    /// Current time.
    pub current_time: DateTime<Utc>,
    /// Response cache occupancy.
    pub cache: CacheStats,
    /// Scheduler counters.
    pub scheduler: SchedulerStats,
    /// Subjects with an in-memory history series.
    pub history_subjects: usize,
}

/// Response of `GET /history/{subject}`.
#[derive(Debug, Clone, Serialize)]
pub struct HistoryResponse {
    /// Requested subject.
    pub subject: String,
    /// Number of points returned.
    pub count: usize,
    /// Points, ascending by timestamp.
    pub points: Vec<HistoryPoint>,
}

/// Response of `GET /cache/stats`.
#[derive(Debug, Clone, Serialize)]
pub struct CacheStatsResponse {
    /// Proxied responses.
    pub responses: CacheStats,
    /// History series.
    pub history: CacheStats,
}

/// Response of `POST /cache/cleanup`.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct CleanupResponse {
    /// Entries removed.
    pub removed: usize,
}

/// Error body returned by every failing route.
#[derive(Debug, Clone, Serialize)]
pub struct ErrorResponse {
    /// Machine-readable kind.
    pub error: &'static str,
    /// Human-readable message.
    pub message: String,
    /// Upstream status, for upstream failures.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub upstream_status: Option<u16>,
    /// Missing parameters, for validation failures.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub missing: Vec<MissingParam>,
}

/// Route failure.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    /// Proxying failed.
    #[error(transparent)]
    Proxy(#[from] ProxyError),

    /// Scheduler operation failed.
    #[error(transparent)]
    Scheduler(#[from] SchedulerError),
}

impl ApiError {
    /// HTTP status for this error.
    #[must_use]
    pub const fn status(&self) -> StatusCode {
        match self {
            Self::Proxy(ProxyError::ConfigNotFound { .. }) | Self::Scheduler(_) => {
                StatusCode::NOT_FOUND
            }
            Self::Proxy(ProxyError::Validation(_)) => StatusCode::BAD_REQUEST,
            Self::Proxy(ProxyError::Transport(TransportError::Timeout(_))) => {
                StatusCode::GATEWAY_TIMEOUT
            }
            Self::Proxy(ProxyError::Transport(_)) => StatusCode::BAD_GATEWAY,
        }
    }

    fn body(&self) -> ErrorResponse {
        let (error, upstream_status, missing) = match self {
            Self::Proxy(ProxyError::ConfigNotFound { .. }) => ("config_not_found", None, Vec::new()),
            Self::Proxy(ProxyError::Validation(e)) => ("validation", None, e.missing.clone()),
            Self::Proxy(ProxyError::Transport(TransportError::Status { status, .. })) => {
                ("upstream_status", Some(*status), Vec::new())
            }
            Self::Proxy(ProxyError::Transport(TransportError::Timeout(_))) => {
                ("upstream_timeout", None, Vec::new())
            }
            Self::Proxy(ProxyError::Transport(_)) => ("upstream_error", None, Vec::new()),
            Self::Scheduler(_) => ("job_not_found", None, Vec::new()),
        };

        ErrorResponse {
            error,
            message: self.to_string(),
            upstream_status,
            missing,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status(), Json(self.body())).into_response()
    }
}
