//! Yearly forest raster download handler.

use std::sync::Arc;

use axum::{
    extract::{Extension, Query},
    http::header,
    response::{IntoResponse, Response},
};
use serde::Deserialize;

use forest_common::{BoundingBox, ParamError};
use forest_pipeline::statistics::STACK_FILE;
use forest_pipeline::PipelineError;

use super::common::{pipeline_error, request_cancellation};
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct DownloadQuery {
    /// "minLon,minLat,maxLon,maxLat"
    pub bounds: Option<String>,
}

/// GET /download?bounds=minLon,minLat,maxLon,maxLat
pub async fn download_handler(
    Extension(state): Extension<Arc<AppState>>,
    Query(query): Query<DownloadQuery>,
) -> Response {
    let bounds = match query
        .bounds
        .ok_or_else(|| ParamError::missing("bounds"))
        .and_then(|b| BoundingBox::from_bounds_string(&b))
    {
        Ok(bounds) => bounds,
        Err(e) => return pipeline_error(&PipelineError::from(e)),
    };

    let (cancel, _guard) = request_cancellation();
    match state.pipeline.forest_layer(&bounds, cancel).await {
        Ok(raster) => (
            [
                (header::CONTENT_TYPE, "image/tiff".to_string()),
                (
                    header::CONTENT_DISPOSITION,
                    format!("attachment; filename=\"{STACK_FILE}\""),
                ),
            ],
            raster,
        )
            .into_response(),
        Err(e) => pipeline_error(&e),
    }
}
