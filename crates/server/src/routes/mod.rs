//! API route handlers
//!
//! - `showtime`: the public JSONP decision endpoint
//! - `health`: liveness, readiness and Prometheus metrics
//! - `campaigns`: campaign and schedule administration
//! - `admin`: cache maintenance and segment listing

pub mod admin;
pub mod campaigns;
pub mod health;
pub mod showtime;

use crate::error::{ServerError, ServerResult};
use axum::response::IntoResponse;
use axum::Json;
use serde_json::json;

/// API version and base info (GET /)
pub async fn api_info() -> ServerResult<impl IntoResponse> {
    Ok(Json(json!({
        "name": "Showtime Server",
        "version": env!("CARGO_PKG_VERSION"),
        "api_version": "v1",
        "endpoints": [
            "/campaigns/showtime",
            "/api/v1/campaigns",
            "/api/v1/cache/rebuild",
            "/api/v1/segments",
            "/health",
            "/ready",
            "/metrics"
        ]
    })))
}

/// 404 Not Found handler
pub async fn not_found() -> ServerError {
    ServerError::NotFound
}
