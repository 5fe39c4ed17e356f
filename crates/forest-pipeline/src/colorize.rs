//! Colorization and alpha compositing of a single-band raster into a tile image.

use std::path::{Path, PathBuf};

use forest_common::PaletteSpec;
use tracing::debug;

use crate::context::RequestContext;
use crate::error::{PipelineError, PipelineResult};
use crate::executor::{ExecError, Tool, ToolInvocation};

/// Alpha expression: opaque where the source has data.
pub const ALPHA_FORMULA: &str = "(A!=0)*255";

/// Write the palette's color relief table to `color.txt`.
pub async fn write_color_map(ctx: &RequestContext, palette: &PaletteSpec) -> PipelineResult<PathBuf> {
    ctx.workspace.write_text("color.txt", &palette.color_map()).await
}

/// Color relief and alpha bands derived from one single-band raster.
#[derive(Debug, Clone, PartialEq)]
pub struct ColorBands {
    /// RGB relief, bands 1-3 of the final image.
    pub colored: PathBuf,
    /// Opacity, band 4 of the final image.
    pub alpha: PathBuf,
}

/// Apply the color map to `source` and derive its alpha band.
///
/// The two outputs do not depend on each other and are produced concurrently.
pub async fn colorize(
    ctx: &RequestContext,
    source: &Path,
    color_map: &Path,
) -> PipelineResult<ColorBands> {
    let render_failed = |e: ExecError| PipelineError::from_exec(e, PipelineError::RenderFailed);

    let alpha = ctx.workspace.file("alpha.tif");
    let colored = ctx.workspace.file("colored.tif");

    let alpha_call = ToolInvocation::new(Tool::Calc)
        .arg("-A")
        .path(source)
        .arg(format!("--outfile={}", alpha.display()))
        .arg(format!("--calc={ALPHA_FORMULA}"))
        .args(["--type=Byte", "--hideNoData"])
        .expects(&alpha);

    let relief_call = ToolInvocation::new(Tool::ColorRelief)
        .arg("color-relief")
        .path(source)
        .path(color_map)
        .output(&colored)
        .args(["-b", "1"]);

    tokio::try_join!(
        async { ctx.run(alpha_call).await.map_err(render_failed) },
        async { ctx.run(relief_call).await.map_err(render_failed) },
    )?;

    Ok(ColorBands { colored, alpha })
}

/// Stack color and alpha into one 4-band raster and encode it as a
/// `size`x`size` WebP. Returns the path of the encoded image.
pub async fn composite(
    ctx: &RequestContext,
    bands: &ColorBands,
    size: u32,
    quality: u8,
) -> PipelineResult<PathBuf> {
    let render_failed = |e: ExecError| PipelineError::from_exec(e, PipelineError::RenderFailed);

    let stacked = ctx.workspace.file("with_alpha.vrt");
    let stack_call = ToolInvocation::new(Tool::BuildVrt)
        .args(["-separate", "-overwrite"])
        .output(&stacked)
        .path(&bands.colored)
        .path(&bands.alpha);
    ctx.run(stack_call).await.map_err(render_failed)?;

    let image = ctx.workspace.file("tile.webp");
    let encode_call = ToolInvocation::new(Tool::Translate)
        .args(["-of", "WEBP", "-co"])
        .arg(format!("QUALITY={quality}"))
        .args(["-ot", "Byte", "-outsize"])
        .arg(size.to_string())
        .arg(size.to_string())
        .path(&stacked)
        .output(&image);
    ctx.run(encode_call).await.map_err(render_failed)?;

    debug!(request_id = %ctx.request_id, size, "Rendered tile image");
    Ok(image)
}
