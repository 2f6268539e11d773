use crate::error::{ServerError, ServerResult};
use crate::state::ServerState;
use axum::extract::State;
use axum::http::header::CONTENT_TYPE;
use axum::response::IntoResponse;
use axum::Json;
use segments::CircuitState;
use serde_json::json;
use std::sync::Arc;
use std::time::SystemTime;

/// Global server start time for uptime calculation
static SERVER_START_TIME: once_cell::sync::Lazy<SystemTime> =
    once_cell::sync::Lazy::new(SystemTime::now);

fn uptime_seconds() -> u64 {
    SERVER_START_TIME
        .elapsed()
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

/// Health check endpoint (liveness)
pub async fn health_check() -> impl IntoResponse {
    Json(json!({
        "status": "healthy",
        "service": "showtime-server",
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "uptime_seconds": uptime_seconds(),
    }))
}

/// Readiness check endpoint
///
/// Reports `degraded` while any segment provider circuit is open; the
/// endpoint still answers 200 because showtime keeps serving campaigns that
/// do not depend on that provider.
pub async fn readiness_check(
    State(state): State<Arc<ServerState>>,
) -> ServerResult<impl IntoResponse> {
    let showtime = &state.showtime;
    let breakers = showtime.oracle().breaker_states();
    let degraded = breakers
        .iter()
        .any(|(_, circuit, _)| *circuit == CircuitState::Open);

    let providers: serde_json::Map<_, _> = breakers
        .into_iter()
        .map(|(provider, circuit, failures)| {
            (provider, json!({ "circuit": circuit, "failures": failures }))
        })
        .collect();

    Ok(Json(json!({
        "status": if degraded { "degraded" } else { "ready" },
        "service": "showtime-server",
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "uptime_seconds": uptime_seconds(),
        "components": {
            "campaigns": showtime.repository().len(),
            "active_campaigns": showtime.cache().active_ids().len(),
            "segment_providers": providers,
        }
    })))
}

/// Prometheus metrics endpoint
pub async fn metrics(State(state): State<Arc<ServerState>>) -> ServerResult<impl IntoResponse> {
    let handle = state.metrics.as_ref().ok_or(ServerError::NotFound)?;
    Ok((
        [(CONTENT_TYPE, "text/plain; version=0.0.4")],
        handle.render(),
    ))
}
