//! Per-year forest area from the stacked yearly masks.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use crate::context::RequestContext;
use crate::error::{PipelineError, PipelineResult};
use crate::executor::{ExecError, Tool, ToolInvocation};

/// File name of the stacked yearly forest raster.
pub const STACK_FILE: &str = "forest_cover_2000_2023.tif";

/// Forest area in hectares keyed by year, serialized as `{"2000": 123.4, ...}`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ForestAreaTable(pub BTreeMap<u16, f64>);

impl ForestAreaTable {
    pub fn get(&self, year: u16) -> Option<f64> {
        self.0.get(&year).copied()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn years(&self) -> impl Iterator<Item = u16> + '_ {
        self.0.keys().copied()
    }
}

/// Area in hectares of `count` pixels of `pixel_area_m2` each.
pub fn area_hectares(count: u64, pixel_area_m2: f64) -> f64 {
    (count as f64 * pixel_area_m2) / 10_000.0
}

/// Number of pixels with a non-zero value in one band's histogram.
///
/// Buckets whose interval contains 0 are excluded. With the default byte
/// binning (256 buckets over [-0.5, 255.5]) this is every bucket but the
/// first, i.e. the bucket for value 1 on a 0/1 mask.
fn nonzero_count(band: &Value) -> Option<u64> {
    let histogram = band.get("histogram")?;
    let min = histogram.get("min")?.as_f64()?;
    let max = histogram.get("max")?.as_f64()?;
    let buckets = histogram.get("buckets")?.as_array()?;
    if buckets.is_empty() || max <= min {
        return None;
    }
    let width = (max - min) / buckets.len() as f64;

    let mut total = 0u64;
    for (i, bucket) in buckets.iter().enumerate() {
        let lower = min + width * i as f64;
        let upper = lower + width;
        if lower <= 0.0 && 0.0 < upper {
            continue;
        }
        total += bucket.as_u64()?;
    }
    Some(total)
}

/// Build the year→hectares table from `gdalinfo -json -hist` output.
///
/// Band `i` (0-based) is year `first_year + i`; the document must hold
/// exactly one band per year.
pub fn parse_forest_area(
    info: &Value,
    first_year: u16,
    year_count: usize,
    pixel_area_m2: f64,
) -> PipelineResult<ForestAreaTable> {
    let bands = info
        .get("bands")
        .and_then(Value::as_array)
        .ok_or_else(|| PipelineError::StatisticsFailed("raster info has no bands".to_string()))?;
    if bands.len() != year_count {
        return Err(PipelineError::StatisticsFailed(format!(
            "expected {year_count} bands, raster has {}",
            bands.len()
        )));
    }

    let mut table = BTreeMap::new();
    for (i, band) in bands.iter().enumerate() {
        let count = nonzero_count(band).ok_or_else(|| {
            PipelineError::StatisticsFailed(format!("band {} has no usable histogram", i + 1))
        })?;
        table.insert(first_year + i as u16, area_hectares(count, pixel_area_m2));
    }
    Ok(ForestAreaTable(table))
}

/// Stack the yearly bands (one band per input, in order) into a ZSTD COG.
pub async fn stack_years(ctx: &RequestContext, bands: &[PathBuf]) -> PipelineResult<PathBuf> {
    let failed = |e: ExecError| PipelineError::from_exec(e, PipelineError::StatisticsFailed);

    let list = bands
        .iter()
        .map(|b| b.to_string_lossy().into_owned())
        .collect::<Vec<_>>()
        .join("\n");
    let list = ctx.workspace.write_text("forest_years_list.txt", &list).await?;

    let vrt = ctx.workspace.file("forest_years.vrt");
    ctx.run(
        ToolInvocation::new(Tool::BuildVrt)
            .args(["-separate", "-overwrite", "-input_file_list"])
            .path(&list)
            .output(&vrt),
    )
    .await
    .map_err(failed)?;

    let stack = ctx.workspace.file(STACK_FILE);
    ctx.run(
        ToolInvocation::new(Tool::Translate)
            .args(["-of", "COG", "-co", "COMPRESS=ZSTD"])
            .path(&vrt)
            .output(&stack),
    )
    .await
    .map_err(failed)?;

    debug!(request_id = %ctx.request_id, bands = bands.len(), "Stacked yearly bands");
    Ok(stack)
}

/// Histogram every band of `stack` and convert forest pixel counts to hectares.
pub async fn forest_area(
    ctx: &RequestContext,
    stack: &Path,
    first_year: u16,
    year_count: usize,
    pixel_area_m2: f64,
) -> PipelineResult<ForestAreaTable> {
    let output = ctx
        .run(
            ToolInvocation::new(Tool::Info)
                .args(["-json", "-stats", "-hist"])
                .path(stack),
        )
        .await
        .map_err(|e| PipelineError::from_exec(e, PipelineError::StatisticsFailed))?;

    let info: Value = serde_json::from_str(&output.stdout)
        .map_err(|e| PipelineError::StatisticsFailed(format!("invalid raster info JSON: {e}")))?;
    parse_forest_area(&info, first_year, year_count, pixel_area_m2)
}
