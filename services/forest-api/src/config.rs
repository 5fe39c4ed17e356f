//! Command-line and environment settings for the service.

use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use forest_pipeline::{PipelineConfig, Toolchain};

/// Forest-change tile and statistics server
#[derive(Parser, Debug, Clone)]
#[command(name = "forest-api")]
#[command(about = "Forest-change map tiles and forest area statistics over HTTP")]
pub struct ServiceArgs {
    /// Listen address
    #[arg(short, long, default_value = "0.0.0.0:8000", env = "FOREST_LISTEN_ADDR")]
    pub listen: String,

    /// Log level
    #[arg(long, default_value = "info", env = "RUST_LOG")]
    pub log_level: String,

    /// Number of worker threads
    #[arg(long, env = "FOREST_WORKER_THREADS")]
    pub worker_threads: Option<usize>,

    /// Tile index GeoJSON: an http(s) URL or a local path
    #[arg(long, env = "HANSEN_TILES_COLLECTION")]
    pub tiles_collection: String,

    /// Prefix of the source rasters, `{prefix}{layer}_{tile_id}.tif`
    #[arg(long, env = "HANSEN_LAYER_PREFIX")]
    pub layer_prefix: String,

    /// Directory for per-request workspaces (defaults to the system temp dir)
    #[arg(long, env = "WORKSPACE_ROOT")]
    pub workspace_root: Option<PathBuf>,

    /// Concurrent algebra invocations in the yearly sweep
    #[arg(long, default_value_t = 8, env = "YEAR_SWEEP_CONCURRENCY")]
    pub year_sweep_concurrency: usize,

    /// Kill tool invocations running longer than this many seconds
    #[arg(long, env = "TOOL_TIMEOUT_SECS")]
    pub tool_timeout_secs: Option<u64>,

    /// Largest analysis raster accepted, in pixels
    #[arg(long, default_value_t = 400_000_000, env = "MAX_ANALYSIS_PIXELS")]
    pub max_analysis_pixels: u64,

    #[arg(long, default_value = "gdalbuildvrt", env = "GDALBUILDVRT_BIN")]
    pub gdalbuildvrt_bin: String,

    #[arg(long, default_value = "gdalwarp", env = "GDALWARP_BIN")]
    pub gdalwarp_bin: String,

    #[arg(long, default_value = "gdal_calc.py", env = "GDAL_CALC_BIN")]
    pub gdal_calc_bin: String,

    #[arg(long, default_value = "gdaldem", env = "GDALDEM_BIN")]
    pub gdaldem_bin: String,

    #[arg(long, default_value = "gdal_translate", env = "GDAL_TRANSLATE_BIN")]
    pub gdal_translate_bin: String,

    #[arg(long, default_value = "gdalinfo", env = "GDALINFO_BIN")]
    pub gdalinfo_bin: String,
}

impl ServiceArgs {
    /// Pipeline settings derived from the arguments; dataset constants keep
    /// their defaults.
    pub fn pipeline_config(&self) -> PipelineConfig {
        let defaults = PipelineConfig::default();
        PipelineConfig {
            tiles_collection: self.tiles_collection.clone(),
            layer_prefix: self.layer_prefix.clone(),
            workspace_root: self
                .workspace_root
                .clone()
                .unwrap_or(defaults.workspace_root.clone()),
            toolchain: Toolchain {
                buildvrt: self.gdalbuildvrt_bin.clone(),
                warp: self.gdalwarp_bin.clone(),
                calc: self.gdal_calc_bin.clone(),
                dem: self.gdaldem_bin.clone(),
                translate: self.gdal_translate_bin.clone(),
                info: self.gdalinfo_bin.clone(),
            },
            tool_timeout: self.tool_timeout_secs.map(Duration::from_secs),
            year_sweep_concurrency: self.year_sweep_concurrency,
            max_analysis_pixels: self.max_analysis_pixels,
            ..defaults
        }
    }
}
