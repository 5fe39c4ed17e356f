//! Source tile index: which granules of the global grid cover a region.
//!
//! The index is an externally published FeatureCollection in which every
//! feature names a granule (`tile_id`) and carries its footprint. It is
//! fetched once per process through a [`TileIndexCache`] and shared
//! read-only by all requests.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use geo::{Intersects, MultiPolygon};
use metrics::counter;
use reqwest::Client;
use serde_json::Value;
use tokio::sync::OnceCell;
use tracing::{debug, info, warn};

use forest_common::Feature;

use crate::error::{PipelineError, PipelineResult};

/// Property holding the granule identifier.
pub const TILE_ID_PROPERTY: &str = "tile_id";

/// One granule of the source dataset.
#[derive(Debug, Clone)]
pub struct SourceTile {
    pub tile_id: String,
    pub footprint: MultiPolygon<f64>,
}

/// Reference to a granule selected for a request.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SourceTileRef {
    pub tile_id: String,
}

impl SourceTileRef {
    pub fn new(tile_id: impl Into<String>) -> Self {
        Self {
            tile_id: tile_id.into(),
        }
    }

    /// Raster path of this granule for `layer`: `{prefix}{layer}_{tile_id}.tif`.
    ///
    /// Remote prefixes are read through `/vsicurl/` so that only the byte
    /// ranges a tool needs are fetched.
    pub fn raster_path(&self, prefix: &str, layer: &str) -> String {
        let path = format!("{prefix}{layer}_{}.tif", self.tile_id);
        if prefix.starts_with("http://") || prefix.starts_with("https://") {
            format!("/vsicurl/{path}")
        } else {
            path
        }
    }
}

/// The parsed global tile index.
#[derive(Debug, Clone, Default)]
pub struct TileIndex {
    tiles: Vec<SourceTile>,
}

impl TileIndex {
    pub fn new(tiles: Vec<SourceTile>) -> Self {
        Self { tiles }
    }

    /// Parse a GeoJSON FeatureCollection.
    ///
    /// Features without a string `tile_id` or a polygonal footprint are
    /// skipped with a warning; a document that is not a FeatureCollection is
    /// rejected.
    pub fn from_geojson(document: &Value) -> PipelineResult<Self> {
        if document.get("type").and_then(Value::as_str) != Some("FeatureCollection") {
            return Err(PipelineError::IndexUnavailable(
                "tile index is not a FeatureCollection".to_string(),
            ));
        }
        let features = document
            .get("features")
            .and_then(Value::as_array)
            .ok_or_else(|| {
                PipelineError::IndexUnavailable("tile index has no features array".to_string())
            })?;

        let mut tiles = Vec::with_capacity(features.len());
        for (position, raw) in features.iter().enumerate() {
            match parse_tile(raw) {
                Some(tile) => tiles.push(tile),
                None => warn!(position, "Skipping tile index feature without tile_id or polygon footprint"),
            }
        }
        Ok(Self { tiles })
    }

    pub fn len(&self) -> usize {
        self.tiles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tiles.is_empty()
    }

    pub fn tiles(&self) -> &[SourceTile] {
        &self.tiles
    }

    /// Granules whose footprint intersects `region`, sorted by id.
    ///
    /// Intersection includes shared boundaries. An empty result is
    /// `NoCoverage`.
    pub fn intersecting(&self, region: &MultiPolygon<f64>) -> PipelineResult<Vec<SourceTileRef>> {
        let mut refs: Vec<SourceTileRef> = self
            .tiles
            .iter()
            .filter(|tile| {
                tile.footprint
                    .iter()
                    .any(|footprint| region.iter().any(|area| footprint.intersects(area)))
            })
            .map(|tile| SourceTileRef::new(tile.tile_id.clone()))
            .collect();

        if refs.is_empty() {
            return Err(PipelineError::NoCoverage);
        }
        refs.sort();
        refs.dedup();
        Ok(refs)
    }
}

fn parse_tile(raw: &Value) -> Option<SourceTile> {
    let feature: Feature = serde_json::from_value(raw.clone()).ok()?;
    let tile_id = feature.string_property(TILE_ID_PROPERTY)?.to_string();
    let footprint = feature.geometry.as_ref()?.to_multi_polygon()?;
    if footprint.0.is_empty() {
        return None;
    }
    Some(SourceTile { tile_id, footprint })
}

/// Where the tile index is published.
#[async_trait]
pub trait TileIndexSource: Send + Sync {
    /// Fetch and parse the index. Failures are `IndexUnavailable`.
    async fn fetch(&self) -> PipelineResult<TileIndex>;

    /// Human-readable location for logs.
    fn location(&self) -> String;
}

/// Index served over HTTP.
pub struct HttpTileIndexSource {
    client: Client,
    url: String,
}

impl HttpTileIndexSource {
    pub fn new(url: impl Into<String>) -> PipelineResult<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(60))
            .connect_timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| PipelineError::IndexUnavailable(format!("HTTP client: {e}")))?;
        Ok(Self {
            client,
            url: url.into(),
        })
    }
}

#[async_trait]
impl TileIndexSource for HttpTileIndexSource {
    async fn fetch(&self) -> PipelineResult<TileIndex> {
        let response = self
            .client
            .get(&self.url)
            .send()
            .await
            .map_err(|e| PipelineError::IndexUnavailable(format!("GET {}: {e}", self.url)))?;

        if !response.status().is_success() {
            return Err(PipelineError::IndexUnavailable(format!(
                "GET {} returned {}",
                self.url,
                response.status()
            )));
        }

        let document: Value = response
            .json()
            .await
            .map_err(|e| PipelineError::IndexUnavailable(format!("invalid tile index JSON: {e}")))?;
        TileIndex::from_geojson(&document)
    }

    fn location(&self) -> String {
        self.url.clone()
    }
}

/// Index read from a local GeoJSON file.
pub struct FileTileIndexSource {
    path: PathBuf,
}

impl FileTileIndexSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl TileIndexSource for FileTileIndexSource {
    async fn fetch(&self) -> PipelineResult<TileIndex> {
        let bytes = tokio::fs::read(&self.path).await.map_err(|e| {
            PipelineError::IndexUnavailable(format!("cannot read {}: {e}", self.path.display()))
        })?;
        let document: Value = serde_json::from_slice(&bytes)
            .map_err(|e| PipelineError::IndexUnavailable(format!("invalid tile index JSON: {e}")))?;
        TileIndex::from_geojson(&document)
    }

    fn location(&self) -> String {
        self.path.display().to_string()
    }
}

/// Pick a source for a configured location: http(s) URLs are fetched, anything
/// else is a file path.
pub fn source_for(location: &str) -> PipelineResult<Arc<dyn TileIndexSource>> {
    if location.starts_with("http://") || location.starts_with("https://") {
        Ok(Arc::new(HttpTileIndexSource::new(location)?))
    } else {
        Ok(Arc::new(FileTileIndexSource::new(location)))
    }
}

/// Lazily loaded, process-wide tile index.
///
/// The first successful fetch is kept for the life of the process. A failed
/// fetch is not remembered; the next caller tries again.
pub struct TileIndexCache {
    source: Arc<dyn TileIndexSource>,
    index: OnceCell<Arc<TileIndex>>,
}

impl TileIndexCache {
    pub fn new(source: Arc<dyn TileIndexSource>) -> Self {
        Self {
            source,
            index: OnceCell::new(),
        }
    }

    /// The index, fetching it on first use.
    pub async fn get(&self) -> PipelineResult<Arc<TileIndex>> {
        self.index
            .get_or_try_init(|| async {
                let start = Instant::now();
                let location = self.source.location();
                debug!(location = %location, "Fetching tile index");
                match self.source.fetch().await {
                    Ok(index) => {
                        counter!("forest_tile_index_fetch_total", "outcome" => "ok").increment(1);
                        info!(
                            location = %location,
                            tiles = index.len(),
                            elapsed_ms = start.elapsed().as_millis() as u64,
                            "Loaded tile index"
                        );
                        Ok(Arc::new(index))
                    }
                    Err(e) => {
                        counter!("forest_tile_index_fetch_total", "outcome" => "error").increment(1);
                        warn!(location = %location, error = %e, "Tile index fetch failed");
                        Err(e)
                    }
                }
            })
            .await
            .cloned()
    }

    pub fn is_loaded(&self) -> bool {
        self.index.initialized()
    }
}
