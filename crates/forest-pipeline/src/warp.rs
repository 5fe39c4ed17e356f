//! Reprojection and clipping to the request's footprint.

use std::path::{Path, PathBuf};

use forest_common::BoundingBox;
use tracing::debug;

use crate::config::{METRES_PER_DEGREE, SOURCE_RESOLUTION_M};
use crate::context::RequestContext;
use crate::error::{PipelineError, PipelineResult};
use crate::executor::{Tool, ToolInvocation};

/// Output CRS of every warped raster.
pub const TARGET_SRS: &str = "EPSG:4326";

/// Where and at what size a raster is warped.
#[derive(Debug, Clone, PartialEq)]
pub struct WarpTarget {
    pub bbox: BoundingBox,
    pub width: u32,
    pub height: u32,
    /// Polygon file to clip to; pixels outside it become nodata.
    pub cutline: Option<PathBuf>,
}

impl WarpTarget {
    /// Fixed-size output over `bbox`, as used for map tiles.
    pub fn tile(bbox: BoundingBox, size: u32) -> Self {
        Self {
            bbox,
            width: size,
            height: size,
            cutline: None,
        }
    }

    /// Output at the source ground resolution, clipped to `cutline`.
    pub fn region(bbox: BoundingBox, cutline: PathBuf) -> Self {
        let (height, width) = bbox.ground_shape(METRES_PER_DEGREE, SOURCE_RESOLUTION_M);
        Self {
            bbox,
            width: width.max(1),
            height: height.max(1),
            cutline: Some(cutline),
        }
    }

    pub fn pixel_count(&self) -> u64 {
        u64::from(self.width) * u64::from(self.height)
    }

    fn arguments(&self) -> Vec<String> {
        let b = &self.bbox;
        let mut args = vec![
            "-overwrite".to_string(),
            "-t_srs".to_string(),
            TARGET_SRS.to_string(),
            "-te".to_string(),
            b.min_x.to_string(),
            b.min_y.to_string(),
            b.max_x.to_string(),
            b.max_y.to_string(),
            "-ts".to_string(),
            self.width.to_string(),
            self.height.to_string(),
        ];
        if let Some(cutline) = &self.cutline {
            args.push("-cutline".to_string());
            args.push(cutline.to_string_lossy().into_owned());
            args.push("-crop_to_cutline".to_string());
            args.push("-dstnodata".to_string());
            args.push("0".to_string());
        }
        args
    }
}

/// Warp `source` onto `target`, writing `{layer}_image.tif`.
pub async fn warp(
    ctx: &RequestContext,
    layer: &str,
    source: &str,
    target: &WarpTarget,
) -> PipelineResult<PathBuf> {
    let failed = |reason: String| PipelineError::WarpFailed {
        layer: layer.to_string(),
        reason,
    };

    if target.bbox.is_degenerate() {
        return Err(failed(format!("degenerate bounding box {:?}", target.bbox)));
    }
    if target.width == 0 || target.height == 0 {
        return Err(failed("output shape has no pixels".to_string()));
    }

    let output = ctx.workspace.file(&format!("{layer}_image.tif"));
    let invocation = ToolInvocation::new(Tool::Warp)
        .args(target.arguments())
        .arg(source)
        .output(&output);

    ctx.run(invocation)
        .await
        .map_err(|e| PipelineError::from_exec(e, failed))?;

    debug!(
        request_id = %ctx.request_id,
        layer,
        width = target.width,
        height = target.height,
        clipped = target.cutline.is_some(),
        "Warped layer"
    );
    Ok(output)
}

/// Path of the cutline file written for a region request.
pub fn cutline_path(workspace_dir: &Path) -> PathBuf {
    workspace_dir.join("roi.geojson")
}
