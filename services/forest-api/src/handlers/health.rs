//! Health, readiness and metrics handlers.

use std::sync::Arc;

use axum::{
    extract::Extension,
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;

use crate::state::AppState;

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: String,
}

#[derive(Serialize)]
pub struct ReadyResponse {
    pub ready: bool,
    pub tile_index: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tiles: Option<usize>,
}

/// GET /health - Basic health check
pub async fn health_handler() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
    })
}

/// GET /ready - Ready once the tile index has been loaded
pub async fn ready_handler(Extension(state): Extension<Arc<AppState>>) -> Response {
    let (status, response) = match state.pipeline.tile_index().get().await {
        Ok(index) => (
            StatusCode::OK,
            ReadyResponse {
                ready: true,
                tile_index: "ok".to_string(),
                tiles: Some(index.len()),
            },
        ),
        Err(e) => (
            StatusCode::SERVICE_UNAVAILABLE,
            ReadyResponse {
                ready: false,
                tile_index: format!("error: {e}"),
                tiles: None,
            },
        ),
    };
    (status, Json(response)).into_response()
}

/// GET /metrics - Prometheus metrics
pub async fn metrics_handler(Extension(state): Extension<Arc<AppState>>) -> Response {
    let body = state
        .prometheus
        .as_ref()
        .map(|handle| handle.render())
        .unwrap_or_default();
    (
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        body,
    )
        .into_response()
}
