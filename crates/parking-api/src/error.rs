//! API error handling

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use parking_monitor::MonitorError;
use serde::Serialize;
use thiserror::Error;

/// API error types
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Service unavailable: {0}")]
    Unavailable(String),

    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Database error: {0}")]
    Database(String),
}

impl ApiError {
    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Conflict(_) => StatusCode::CONFLICT,
            ApiError::Unavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            ApiError::Internal(_) | ApiError::Database(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

/// Error response body
#[derive(Serialize)]
struct ErrorResponse {
    error: String,
    message: String,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let error_type = match &self {
            ApiError::NotFound(_) => "not_found",
            ApiError::BadRequest(_) => "bad_request",
            ApiError::Conflict(_) => "conflict",
            ApiError::Unavailable(_) => "service_unavailable",
            ApiError::Internal(_) => "internal_error",
            ApiError::Database(_) => "database_error",
        };

        let body = Json(ErrorResponse {
            error: error_type.into(),
            message: self.to_string(),
        });

        (self.status(), body).into_response()
    }
}

impl From<MonitorError> for ApiError {
    fn from(err: MonitorError) -> Self {
        match err {
            MonitorError::AlreadyExists(_) => ApiError::Conflict(err.to_string()),
            MonitorError::NotFound(_) => ApiError::NotFound(err.to_string()),
            MonitorError::SourceUnreachable { .. } | MonitorError::InvalidLotId(_) => {
                ApiError::BadRequest(err.to_string())
            }
            MonitorError::ShutDown => ApiError::Unavailable(err.to_string()),
            MonitorError::Storage(e) => ApiError::Database(e.to_string()),
            MonitorError::Vision(_) | MonitorError::Internal(_) => ApiError::Internal(err.to_string()),
        }
    }
}

impl From<prometheus::Error> for ApiError {
    fn from(err: prometheus::Error) -> Self {
        ApiError::Internal(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_core::LotId;

    #[test]
    fn test_monitor_error_status() {
        let cases = [
            (MonitorError::AlreadyExists(LotId::new("a")), StatusCode::CONFLICT),
            (MonitorError::NotFound(LotId::new("a")), StatusCode::NOT_FOUND),
            (MonitorError::InvalidLotId("a/b".into()), StatusCode::BAD_REQUEST),
            (
                MonitorError::source_unreachable(LotId::new("a"), "rtsp://cam"),
                StatusCode::BAD_REQUEST,
            ),
            (MonitorError::ShutDown, StatusCode::SERVICE_UNAVAILABLE),
            (MonitorError::internal("boom"), StatusCode::INTERNAL_SERVER_ERROR),
        ];

        for (err, status) in cases {
            assert_eq!(ApiError::from(err).status(), status);
        }
    }
}
