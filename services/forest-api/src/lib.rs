//! Forest API Service Library
//!
//! HTTP surface of the forest-change tile pipeline: map tiles, forest area
//! analysis and raster downloads.

pub mod config;
pub mod handlers;
pub mod state;

use std::sync::Arc;

use axum::{
    routing::{get, post},
    Extension, Router,
};
use tower_http::{compression::CompressionLayer, cors::CorsLayer, trace::TraceLayer};

use state::AppState;

/// Build the service router over `state`.
pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        // Map tiles
        .route("/cog/tilejson.json", get(handlers::tile::tilejson_handler))
        .route("/cog/:z/:x/:y", get(handlers::tile::tile_handler))
        // Statistics and downloads
        .route("/analysis", post(handlers::analysis::analysis_handler))
        .route("/download", get(handlers::download::download_handler))
        // Health and metrics
        .route("/health", get(handlers::health::health_handler))
        .route("/ready", get(handlers::health::ready_handler))
        .route("/metrics", get(handlers::health::metrics_handler))
        // Middleware
        .layer(Extension(state))
        .layer(TraceLayer::new_for_http())
        .layer(CompressionLayer::new())
        .layer(CorsLayer::permissive())
}
