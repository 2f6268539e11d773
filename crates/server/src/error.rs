use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use campaign::ScheduleError;
use catalog::CatalogError;
use segments::SegmentError;
use serde::{Deserialize, Serialize};
use serde_json::json;
use showtime::ShowtimeError;

pub type ServerResult<T> = Result<T, ServerError>;

/// Server error types
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("Authentication failed: {0}")]
    Authentication(String),

    #[error("Rate limit exceeded")]
    RateLimitExceeded,

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Catalog error: {0}")]
    Catalog(#[from] CatalogError),

    #[error("Segment error: {0}")]
    Segment(#[from] SegmentError),

    #[error("Internal server error: {0}")]
    Internal(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Not found")]
    NotFound,
}

/// API error response structure
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: ErrorDetail,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorDetail {
    pub code: String,
    pub message: String,
}

impl ServerError {
    /// Get HTTP status code for this error
    pub fn status_code(&self) -> StatusCode {
        match self {
            ServerError::Authentication(_) => StatusCode::UNAUTHORIZED,
            ServerError::RateLimitExceeded => StatusCode::TOO_MANY_REQUESTS,
            ServerError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ServerError::NotFound => StatusCode::NOT_FOUND,
            ServerError::Catalog(err) => match err {
                CatalogError::NotFound(_) | CatalogError::Schedule(ScheduleError::NotFound(_)) => {
                    StatusCode::NOT_FOUND
                }
                CatalogError::Invalid(_) => StatusCode::UNPROCESSABLE_ENTITY,
                CatalogError::Schedule(_) => StatusCode::CONFLICT,
                CatalogError::Source(_) => StatusCode::SERVICE_UNAVAILABLE,
                _ => StatusCode::INTERNAL_SERVER_ERROR,
            },
            ServerError::Segment(err) if err.is_configuration() => StatusCode::INTERNAL_SERVER_ERROR,
            ServerError::Segment(_) => StatusCode::BAD_GATEWAY,
            ServerError::Internal(_) | ServerError::Config(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Get error code string
    pub fn error_code(&self) -> &'static str {
        match self {
            ServerError::Authentication(_) => "AUTH_FAILED",
            ServerError::RateLimitExceeded => "RATE_LIMIT_EXCEEDED",
            ServerError::BadRequest(_) => "BAD_REQUEST",
            ServerError::Catalog(CatalogError::Invalid(_)) => "INVALID_CAMPAIGN",
            ServerError::Catalog(CatalogError::Schedule(_)) => "SCHEDULE_TRANSITION",
            ServerError::Catalog(CatalogError::NotFound(_)) => "NOT_FOUND",
            ServerError::Catalog(_) => "CATALOG_ERROR",
            ServerError::Segment(_) => "SEGMENT_PROVIDER_ERROR",
            ServerError::Internal(_) => "INTERNAL_ERROR",
            ServerError::Config(_) => "CONFIG_ERROR",
            ServerError::NotFound => "NOT_FOUND",
        }
    }
}

impl IntoResponse for ServerError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            tracing::error!(error = %self, "request failed");
        }

        let body = Json(json!({
            "error": {
                "code": self.error_code(),
                "message": self.to_string(),
            }
        }));

        (status, body).into_response()
    }
}

impl From<ShowtimeError> for ServerError {
    fn from(err: ShowtimeError) -> Self {
        match err {
            ShowtimeError::Catalog(err) => ServerError::Catalog(err),
            ShowtimeError::Segment(err) => ServerError::Segment(err),
            other => ServerError::Config(other.to_string()),
        }
    }
}

impl From<std::net::AddrParseError> for ServerError {
    fn from(err: std::net::AddrParseError) -> Self {
        ServerError::Config(format!("Invalid address: {err}"))
    }
}

impl From<serde_json::Error> for ServerError {
    fn from(err: serde_json::Error) -> Self {
        ServerError::BadRequest(format!("JSON parse error: {err}"))
    }
}

impl From<anyhow::Error> for ServerError {
    fn from(err: anyhow::Error) -> Self {
        ServerError::Internal(err.to_string())
    }
}
