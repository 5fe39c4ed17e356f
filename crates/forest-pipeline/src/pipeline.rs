//! Request orchestration for tile images and regional statistics.
//!
//! Each public entry point follows the same shape: create the request's
//! context and workspace, run the stages in order, then finalize. Finalizing
//! records the terminal state, removes the workspace and records metrics,
//! whatever the outcome. A request future dropped before finalizing still
//! removes its workspace and kills its running tools (see [`Workspace`] and
//! [`ProcessExecutor`]).
//!
//! [`Workspace`]: crate::workspace::Workspace
//! [`ProcessExecutor`]: crate::executor::ProcessExecutor

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use bytes::Bytes;
use geo::MultiPolygon;
use metrics::{counter, histogram};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use forest_common::{
    BoundingBox, FeatureCollection, LayerSpec, PaletteSpec, TileCoord, LOSSYEAR_LAYER,
    TREECOVER_LAYER,
};

use crate::algebra::{apply_mask, year_sweep};
use crate::archive;
use crate::colorize::{colorize, composite, write_color_map};
use crate::config::PipelineConfig;
use crate::context::{PipelineState, RequestContext};
use crate::error::{PipelineError, PipelineResult};
use crate::executor::{CommandExecutor, ProcessExecutor};
use crate::mosaic::build_mosaic;
use crate::statistics::{forest_area, stack_years, ForestAreaTable};
use crate::tile_index::{source_for, SourceTileRef, TileIndexCache};
use crate::warp::{cutline_path, warp, WarpTarget};
use crate::workspace::Workspace;

/// A map tile request.
#[derive(Debug, Clone, PartialEq)]
pub struct TileRequest {
    pub tile: TileCoord,
    pub layer: LayerSpec,
    pub palette: PaletteSpec,
}

/// Runs tile and analysis requests against the shared tile index.
pub struct Pipeline {
    config: Arc<PipelineConfig>,
    executor: Arc<dyn CommandExecutor>,
    index: Arc<TileIndexCache>,
}

impl Pipeline {
    pub fn new(
        config: PipelineConfig,
        executor: Arc<dyn CommandExecutor>,
        index: Arc<TileIndexCache>,
    ) -> Self {
        Self {
            config: Arc::new(config),
            executor,
            index,
        }
    }

    /// A pipeline that runs the real toolchain and loads the configured index.
    pub fn from_config(config: PipelineConfig) -> PipelineResult<Self> {
        let executor = Arc::new(ProcessExecutor::new(
            config.toolchain.clone(),
            config.tool_timeout,
        ));
        let index = Arc::new(TileIndexCache::new(source_for(&config.tiles_collection)?));
        Ok(Self::new(config, executor, index))
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn tile_index(&self) -> &TileIndexCache {
        &self.index
    }

    /// Render one map tile as WebP.
    #[instrument(skip(self, request, cancel), fields(tile = %request.tile.cache_key(), layer = request.layer.name()))]
    pub async fn render_tile(
        &self,
        request: &TileRequest,
        cancel: CancellationToken,
    ) -> PipelineResult<Bytes> {
        let start = Instant::now();
        let ctx = match self.begin(cancel).await {
            Ok(ctx) => ctx,
            Err(e) => return Err(record("tile", start, e)),
        };
        let result = self.tile_stages(&ctx, request).await;
        self.finalize("tile", start, ctx, result).await
    }

    /// Forest area per year inside `region`.
    #[instrument(skip(self, region, cancel), fields(features = region.features.len()))]
    pub async fn analyze(
        &self,
        region: &FeatureCollection,
        cancel: CancellationToken,
    ) -> PipelineResult<ForestAreaTable> {
        let start = Instant::now();
        let ctx = match self.begin(cancel).await {
            Ok(ctx) => ctx,
            Err(e) => return Err(record("analysis", start, e)),
        };
        let result = async {
            let stack = self.region_stack(&ctx, region).await?;
            self.region_statistics(&ctx, &stack).await
        }
        .await;
        self.finalize("analysis", start, ctx, result).await
    }

    /// Forest area per year plus the yearly forest raster, as a zip archive.
    #[instrument(skip(self, region, cancel), fields(features = region.features.len()))]
    pub async fn analyze_bundle(
        &self,
        region: &FeatureCollection,
        cancel: CancellationToken,
    ) -> PipelineResult<Bytes> {
        let start = Instant::now();
        let ctx = match self.begin(cancel).await {
            Ok(ctx) => ctx,
            Err(e) => return Err(record("analysis_bundle", start, e)),
        };
        let result = async {
            let stack = self.region_stack(&ctx, region).await?;
            let table = self.region_statistics(&ctx, &stack).await?;
            let raster = ctx.workspace.read(&stack).await?;
            tokio::task::spawn_blocking(move || archive::bundle(&table, &raster))
                .await
                .map_err(|e| PipelineError::Workspace(format!("archive task failed: {e}")))?
        }
        .await;
        self.finalize("analysis_bundle", start, ctx, result).await
    }

    /// The yearly forest raster (one band per year) over `bounds`.
    #[instrument(skip(self, cancel))]
    pub async fn forest_layer(
        &self,
        bounds: &BoundingBox,
        cancel: CancellationToken,
    ) -> PipelineResult<Bytes> {
        let start = Instant::now();
        let ctx = match self.begin(cancel).await {
            Ok(ctx) => ctx,
            Err(e) => return Err(record("download", start, e)),
        };
        let region = FeatureCollection::from_bbox(bounds);
        let result = async {
            let stack = self.region_stack(&ctx, &region).await?;
            Ok::<_, PipelineError>(Bytes::from(ctx.workspace.read(&stack).await?))
        }
        .await;
        self.finalize("download", start, ctx, result).await
    }

    async fn begin(&self, cancel: CancellationToken) -> PipelineResult<RequestContext> {
        let request_id = Uuid::new_v4();
        let workspace = Workspace::create(&self.config.workspace_root, request_id).await?;
        debug!(request_id = %request_id, workspace = %workspace.path().display(), "Request started");
        Ok(RequestContext::new(
            request_id,
            workspace,
            cancel,
            self.executor.clone(),
        ))
    }

    /// Record the terminal state, remove the workspace and report.
    async fn finalize<T>(
        &self,
        kind: &'static str,
        start: Instant,
        ctx: RequestContext,
        result: PipelineResult<T>,
    ) -> PipelineResult<T> {
        // A request whose client left never returns output, even if the
        // last stage finished before noticing.
        let result = match result {
            Ok(_) if ctx.cancel.is_cancelled() => Err(PipelineError::ClientCancelled),
            other => other,
        };

        let request_id = ctx.request_id;
        let reached = ctx.state();
        match &result {
            Ok(_) => ctx.advance(PipelineState::Finalized),
            Err(_) => ctx.advance(PipelineState::Failed),
        }

        // Cleanup failures are logged by the workspace and never surfaced.
        let _ = ctx.into_workspace().close().await;

        let elapsed_ms = start.elapsed().as_millis() as u64;
        match &result {
            Ok(_) => info!(request_id = %request_id, kind, elapsed_ms, "Request complete"),
            Err(e) if e.is_reportable() => warn!(
                request_id = %request_id,
                kind,
                elapsed_ms,
                state = %reached,
                error = %e,
                "Request failed"
            ),
            Err(_) => debug!(request_id = %request_id, kind, state = %reached, "Request cancelled"),
        }

        match result {
            Ok(value) => {
                counter!("forest_pipeline_requests_total", "kind" => kind, "outcome" => "ok").increment(1);
                histogram!("forest_pipeline_duration_ms", "kind" => kind).record(elapsed_ms as f64);
                Ok(value)
            }
            Err(e) => Err(record(kind, start, e)),
        }
    }

    async fn resolve(&self, region: &MultiPolygon<f64>) -> PipelineResult<Vec<SourceTileRef>> {
        let index = self.index.get().await?;
        let tiles = index.intersecting(region)?;
        debug!(tile_count = tiles.len(), "Resolved source tiles");
        Ok(tiles)
    }

    /// Mosaics for the cover and loss-year layers, built concurrently.
    async fn mosaic_pair(
        &self,
        ctx: &RequestContext,
        tiles: &[SourceTileRef],
    ) -> PipelineResult<(String, String)> {
        let prefix = &self.config.layer_prefix;
        tokio::try_join!(
            build_mosaic(ctx, prefix, TREECOVER_LAYER, tiles),
            build_mosaic(ctx, prefix, LOSSYEAR_LAYER, tiles),
        )
    }

    /// Warp the cover and loss-year mosaics onto the same grid, concurrently.
    async fn warp_pair(
        &self,
        ctx: &RequestContext,
        (cover, loss): (String, String),
        target: &WarpTarget,
    ) -> PipelineResult<(PathBuf, PathBuf)> {
        tokio::try_join!(
            warp(ctx, TREECOVER_LAYER, &cover, target),
            warp(ctx, LOSSYEAR_LAYER, &loss, target),
        )
    }

    /// Mosaic, warp and (for derived layers) mask the single-band raster a
    /// tile is colorized from.
    async fn source_stages(
        &self,
        ctx: &RequestContext,
        request: &TileRequest,
        tiles: &[SourceTileRef],
    ) -> PipelineResult<PathBuf> {
        let config = &self.config;
        let target = WarpTarget::tile(request.tile.bounds(), config.tile_size);

        match request.layer.mask_rule() {
            Some(rule) => {
                let mosaics = self.mosaic_pair(ctx, tiles).await?;
                ctx.advance(PipelineState::MosaicsBuilt);

                let (cover, loss) = self.warp_pair(ctx, mosaics, &target).await?;
                ctx.advance(PipelineState::Warped);

                let masked = apply_mask(ctx, &rule, &cover, &loss).await?;
                ctx.advance(PipelineState::Masked);
                Ok(masked)
            }
            None => {
                let layer = request.layer.source_layer();
                let mosaic = build_mosaic(ctx, &config.layer_prefix, layer, tiles).await?;
                ctx.advance(PipelineState::MosaicsBuilt);

                let warped = warp(ctx, layer, &mosaic, &target).await?;
                ctx.advance(PipelineState::Warped);
                Ok(warped)
            }
        }
    }

    async fn tile_stages(&self, ctx: &RequestContext, request: &TileRequest) -> PipelineResult<Bytes> {
        let config = &self.config;
        let region = MultiPolygon::new(vec![request.tile.polygon()]);
        let tiles = self.resolve(&region).await?;
        ctx.advance(PipelineState::TilesResolved);

        // The color table is written while the source raster is assembled.
        let (color_map, source) = tokio::try_join!(
            write_color_map(ctx, &request.palette),
            self.source_stages(ctx, request, &tiles),
        )?;

        let bands = colorize(ctx, &source, &color_map).await?;
        ctx.advance(PipelineState::Colorized);

        let image = composite(ctx, &bands, config.tile_size, config.webp_quality).await?;
        ctx.advance(PipelineState::Stacked);

        Ok(Bytes::from(ctx.workspace.read(&image).await?))
    }

    /// Warp both layers over the region, sweep every year and stack the
    /// yearly masks. Returns the stacked raster.
    async fn region_stack(
        &self,
        ctx: &RequestContext,
        region: &FeatureCollection,
    ) -> PipelineResult<PathBuf> {
        let config = &self.config;
        let bbox = region.region_bounds()?;

        let cutline = cutline_path(ctx.workspace.path());
        let target = WarpTarget::region(bbox, cutline);
        let pixels = target.pixel_count();
        if pixels > config.max_analysis_pixels {
            return Err(PipelineError::AreaTooLarge {
                pixels,
                limit: config.max_analysis_pixels,
            });
        }

        let tiles = self.resolve(&region.multi_polygon()).await?;
        ctx.advance(PipelineState::TilesResolved);

        let roi = serde_json::to_string(region)
            .map_err(|e| PipelineError::InvalidRequest(format!("cannot encode region: {e}")))?;
        ctx.workspace.write_text("roi.geojson", &roi).await?;

        let mosaics = self.mosaic_pair(ctx, &tiles).await?;
        let (cover, loss) = self.warp_pair(ctx, mosaics, &target).await?;
        ctx.advance(PipelineState::WarpedPair);

        let bands = year_sweep(
            ctx,
            config.years(),
            config.analysis_min_forest_cover,
            &cover,
            &loss,
            config.year_sweep_concurrency,
        )
        .await?;
        ctx.advance(PipelineState::YearSweepComputed);

        let stack = stack_years(ctx, &bands).await?;
        ctx.advance(PipelineState::Stacked);
        Ok(stack)
    }

    async fn region_statistics(
        &self,
        ctx: &RequestContext,
        stack: &Path,
    ) -> PipelineResult<ForestAreaTable> {
        let config = &self.config;
        let table = forest_area(
            ctx,
            stack,
            config.first_year,
            config.year_count(),
            config.pixel_area_m2,
        )
        .await?;
        ctx.advance(PipelineState::StatisticsComputed);
        Ok(table)
    }
}

/// Count a failed request and pass the error through.
fn record(kind: &'static str, start: Instant, error: PipelineError) -> PipelineError {
    counter!("forest_pipeline_requests_total", "kind" => kind, "outcome" => error.kind()).increment(1);
    histogram!("forest_pipeline_duration_ms", "kind" => kind)
        .record(start.elapsed().as_millis() as f64);
    error
}
