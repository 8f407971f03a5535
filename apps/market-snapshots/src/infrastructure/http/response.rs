//! HTTP response envelope and error mapping.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;

use crate::application::ports::StorageError;
use crate::application::services::{
    CollectorError, LastRun, QueryError, SchedulerError, SchedulerState,
};
use crate::domain::shared::Timestamp;

/// `{success, data?, error?}`.
#[derive(Debug, Clone, Serialize)]
pub struct ApiResponse<T> {
    /// Whether the call succeeded.
    pub success: bool,
    /// Payload on success.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    /// Error message on failure.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl<T: Serialize> ApiResponse<T> {
    /// Successful response.
    pub const fn ok(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
        }
    }
}

impl<T: Serialize> IntoResponse for ApiResponse<T> {
    fn into_response(self) -> Response {
        (StatusCode::OK, Json(self)).into_response()
    }
}

/// A failed call: status plus message, rendered as the error envelope.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiError {
    /// HTTP status.
    pub status: StatusCode,
    /// Error message.
    pub message: String,
}

impl ApiError {
    /// New error.
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }

    /// 400.
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, message)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        if self.status.is_server_error() {
            tracing::error!(status = %self.status, error = %self.message, "Request failed");
        }
        let body: ApiResponse<()> = ApiResponse {
            success: false,
            data: None,
            error: Some(self.message),
        };
        (self.status, Json(body)).into_response()
    }
}

const fn storage_status(err: &StorageError) -> StatusCode {
    match err {
        StorageError::Unavailable { .. } | StorageError::Timeout { .. } => {
            StatusCode::SERVICE_UNAVAILABLE
        }
        StorageError::Query { .. } | StorageError::Serialization { .. } => {
            StatusCode::INTERNAL_SERVER_ERROR
        }
    }
}

impl From<QueryError> for ApiError {
    fn from(err: QueryError) -> Self {
        let status = match &err {
            QueryError::Storage(e) => storage_status(e),
            QueryError::Codec(_) | QueryError::InvalidDocument { .. } => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };
        Self::new(status, err.to_string())
    }
}

impl From<CollectorError> for ApiError {
    fn from(err: CollectorError) -> Self {
        let status = match &err {
            CollectorError::SourceUnavailable { .. } | CollectorError::EmptyFetch { .. } => {
                StatusCode::BAD_GATEWAY
            }
            CollectorError::Storage { source, .. } => storage_status(source),
        };
        Self::new(status, err.to_string())
    }
}

impl From<SchedulerError> for ApiError {
    fn from(err: SchedulerError) -> Self {
        match err {
            SchedulerError::AlreadyRunning => Self::new(StatusCode::CONFLICT, err.to_string()),
            SchedulerError::Stopped => Self::new(StatusCode::SERVICE_UNAVAILABLE, err.to_string()),
            SchedulerError::Cycle(e) => e.into(),
            SchedulerError::Panicked { .. } => {
                Self::new(StatusCode::INTERNAL_SERVER_ERROR, err.to_string())
            }
        }
    }
}

/// Overall health status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    /// Last cycle succeeded, or none has run yet.
    Healthy,
    /// Last cycle failed or was partial.
    Degraded,
}

/// `GET /health` body.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthResponse {
    /// Overall status.
    pub status: HealthStatus,
    /// Service version.
    pub version: String,
    /// Seconds since startup.
    pub uptime_secs: u64,
    /// Current time.
    pub current_time: Timestamp,
    /// Scheduler state.
    pub scheduler: SchedulerState,
    /// Ticks skipped because a cycle was in flight.
    pub skipped_ticks: u64,
    /// Most recent finished cycle.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_run: Option<LastRun>,
}
