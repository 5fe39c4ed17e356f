//! Map tile handlers.

use std::sync::Arc;

use axum::{
    extract::{
        rejection::{PathRejection, QueryRejection},
        Extension, Path, Query, RawQuery,
    },
    http::StatusCode,
    response::Response,
    Json,
};
use serde::Deserialize;
use serde_json::{json, Value};

use forest_common::{LayerSpec, PaletteSpec, ParamError, ParamResult, TileCoord};
use forest_pipeline::{PipelineError, TileRequest};

use super::common::{binary_response, json_error, pipeline_error, request_cancellation};
use crate::state::AppState;

/// Query parameters of a tile request.
#[derive(Debug, Default, Deserialize)]
pub struct TileQuery {
    /// Layer name: `treecover2000`, `forest_cover`, or any stored layer.
    pub layer: Option<String>,

    /// Comma-separated colors, low to high.
    pub palette: Option<String>,

    pub min: Option<f64>,
    pub max: Option<f64>,

    /// Target year for the masked layers.
    pub year: Option<u16>,

    /// Minimum canopy cover percentage for `forest_cover`.
    pub min_forest_cover: Option<u8>,
}

impl TileQuery {
    /// Validate the query against the requested tile.
    pub fn into_request(self, tile: TileCoord) -> ParamResult<TileRequest> {
        let layer_name = self.layer.ok_or_else(|| ParamError::missing("layer"))?;
        let palette = self.palette.ok_or_else(|| ParamError::missing("palette"))?;
        let min = self.min.ok_or_else(|| ParamError::missing("min"))?;
        let max = self.max.ok_or_else(|| ParamError::missing("max"))?;

        Ok(TileRequest {
            tile,
            layer: LayerSpec::parse(&layer_name, self.year, self.min_forest_cover)?,
            palette: PaletteSpec::parse(&palette, min, max)?,
        })
    }
}

/// GET /cog/:z/:x/:y
pub async fn tile_handler(
    Extension(state): Extension<Arc<AppState>>,
    path: Result<Path<(u32, u32, u32)>, PathRejection>,
    query: Result<Query<TileQuery>, QueryRejection>,
) -> Response {
    let Path((z, x, y)) = match path {
        Ok(path) => path,
        Err(rejection) => return json_error(StatusCode::BAD_REQUEST, rejection.body_text()),
    };
    let Query(query) = match query {
        Ok(query) => query,
        Err(rejection) => return json_error(StatusCode::BAD_REQUEST, rejection.body_text()),
    };
    let request = match TileCoord::new(z, x, y).and_then(|tile| query.into_request(tile)) {
        Ok(request) => request,
        Err(e) => return pipeline_error(&PipelineError::from(e)),
    };

    let (cancel, _guard) = request_cancellation();
    match state.pipeline.render_tile(&request, cancel).await {
        Ok(image) => binary_response("image/webp", image),
        Err(e) => pipeline_error(&e),
    }
}

/// GET /cog/tilejson.json
///
/// TileJSON pointing back at the tile endpoint with the same query.
pub async fn tilejson_handler(
    RawQuery(raw): RawQuery,
    query: Result<Query<TileQuery>, QueryRejection>,
) -> Json<Value> {
    let search = raw.map(|q| format!("?{q}")).unwrap_or_default();
    let name = query.ok().and_then(|Query(q)| q.layer);

    Json(json!({
        "tilejson": "3.0.0",
        "tiles": [format!("/cog/{{z}}/{{x}}/{{y}}{search}")],
        "bounds": [-180.0, -85.05112877980659, 180.0, 85.0511287798066],
        "center": [0.0, 0.0, 0],
        "minzoom": 0,
        "maxzoom": 20,
        "scheme": "xyz",
        "name": name,
        "attribution": "",
    }))
}
