//! Forest area analysis handler.

use std::sync::Arc;

use axum::{
    extract::{
        rejection::{JsonRejection, QueryRejection},
        Extension, Query,
    },
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Deserialize;

use forest_common::FeatureCollection;

use super::common::{binary_response, json_error, pipeline_error, request_cancellation};
use crate::state::AppState;

/// Request body of `POST /analysis`.
#[derive(Debug, Deserialize)]
pub struct AnalysisBody {
    pub geojson: FeatureCollection,
}

/// Output format of the analysis.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AnalysisFormat {
    /// `{year: hectares}` table.
    #[default]
    Json,
    /// Zip of the table and the yearly forest raster.
    Zip,
}

#[derive(Debug, Default, Deserialize)]
pub struct AnalysisQuery {
    #[serde(default)]
    pub format: AnalysisFormat,
}

/// POST /analysis
pub async fn analysis_handler(
    Extension(state): Extension<Arc<AppState>>,
    query: Result<Query<AnalysisQuery>, QueryRejection>,
    body: Result<Json<AnalysisBody>, JsonRejection>,
) -> Response {
    let Query(query) = match query {
        Ok(query) => query,
        Err(rejection) => return json_error(StatusCode::BAD_REQUEST, rejection.body_text()),
    };
    let Json(body) = match body {
        Ok(body) => body,
        Err(rejection) => return json_error(rejection.status(), rejection.body_text()),
    };

    let (cancel, _guard) = request_cancellation();
    match query.format {
        AnalysisFormat::Json => match state.pipeline.analyze(&body.geojson, cancel).await {
            Ok(table) => Json(table).into_response(),
            Err(e) => pipeline_error(&e),
        },
        AnalysisFormat::Zip => match state.pipeline.analyze_bundle(&body.geojson, cancel).await {
            Ok(archive) => binary_response("application/zip", archive),
            Err(e) => pipeline_error(&e),
        },
    }
}
