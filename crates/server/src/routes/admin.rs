use crate::error::ServerResult;
use crate::state::ServerState;
use axum::extract::State;
use axum::response::IntoResponse;
use axum::Json;
use serde_json::json;
use std::sync::Arc;

/// Rebuild every campaign snapshot from the repository
pub async fn rebuild_cache(State(state): State<Arc<ServerState>>) -> ServerResult<impl IntoResponse> {
    let cache = state.showtime.cache();
    let rebuilt = cache.warm()?;
    Ok(Json(json!({
        "rebuilt": rebuilt,
        "active": cache.active_ids().len(),
    })))
}

/// Forget every snapshot and the active id list. Showtime serves nothing
/// until the next rebuild or mutation.
pub async fn clear_cache(State(state): State<Arc<ServerState>>) -> ServerResult<impl IntoResponse> {
    state.showtime.cache().clear();
    state.showtime.oracle().clear_filters();
    tracing::warn!("campaign cache cleared");
    Ok(Json(json!({ "cleared": true })))
}

/// Segments of every registered provider
pub async fn list_segments(State(state): State<Arc<ServerState>>) -> ServerResult<impl IntoResponse> {
    let segments = state.showtime.oracle().list().await?;
    Ok(Json(json!({
        "total": segments.len(),
        "segments": segments,
    })))
}
