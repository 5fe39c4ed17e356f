//! Pipeline configuration.

use std::path::PathBuf;
use std::time::Duration;

use forest_common::{FIRST_YEAR, LAST_YEAR};

use crate::executor::Toolchain;

/// Approximate ground distance of one degree, in metres.
pub const METRES_PER_DEGREE: f64 = 110_000.0;

/// Ground resolution of the source rasters, in metres.
pub const SOURCE_RESOLUTION_M: f64 = 30.0;

/// Settings shared by every request's pipeline.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Location of the tile index: an http(s) URL or a local GeoJSON path.
    pub tiles_collection: String,

    /// Prefix prepended to `{layer}_{tile_id}.tif`.
    pub layer_prefix: String,

    /// Directory under which per-request workspaces are created.
    pub workspace_root: PathBuf,

    /// Program names for the raster toolchain.
    pub toolchain: Toolchain,

    /// Kill a tool invocation that runs longer than this.
    pub tool_timeout: Option<Duration>,

    /// Maximum concurrent algebra invocations during the year sweep.
    pub year_sweep_concurrency: usize,

    /// Largest warped analysis raster accepted, in pixels.
    pub max_analysis_pixels: u64,

    // Dataset constants
    pub first_year: u16,
    pub last_year: u16,
    pub pixel_area_m2: f64,
    pub analysis_min_forest_cover: u8,
    pub tile_size: u32,
    pub webp_quality: u8,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            tiles_collection: String::new(),
            layer_prefix: String::new(),
            workspace_root: std::env::temp_dir(),
            toolchain: Toolchain::default(),
            tool_timeout: None,
            year_sweep_concurrency: 8,
            max_analysis_pixels: 400_000_000,
            first_year: FIRST_YEAR,
            last_year: LAST_YEAR,
            pixel_area_m2: SOURCE_RESOLUTION_M * SOURCE_RESOLUTION_M,
            analysis_min_forest_cover: 80,
            tile_size: 256,
            webp_quality: 90,
        }
    }
}

impl PipelineConfig {
    /// Years covered by the analysis sweep, in order.
    pub fn years(&self) -> impl Iterator<Item = u16> {
        self.first_year..=self.last_year
    }

    pub fn year_count(&self) -> usize {
        usize::from(self.last_year - self.first_year) + 1
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_cover_dataset_years() {
        let config = PipelineConfig::default();
        assert_eq!(config.year_count(), 24);
        assert_eq!(config.years().next(), Some(2000));
        assert_eq!(config.years().last(), Some(2023));
        assert_eq!(config.pixel_area_m2, 900.0);
        assert_eq!(config.analysis_min_forest_cover, 80);
        assert_eq!(config.tile_size, 256);
    }
}
