//! Band algebra: cover/loss masking and the per-year forest sweep.

use std::path::{Path, PathBuf};

use futures::stream::{self, StreamExt, TryStreamExt};
use tracing::debug;

use forest_common::MaskRule;

use crate::context::RequestContext;
use crate::error::{PipelineError, PipelineResult};
use crate::executor::{Tool, ToolInvocation};

/// Build the band-algebra call for `rule` over cover raster A and loss-year
/// raster B.
fn mask_invocation(rule: &MaskRule, cover: &Path, loss: &Path, output: &Path) -> ToolInvocation {
    let mut invocation = ToolInvocation::new(Tool::Calc)
        .arg("-A")
        .path(cover)
        .arg("-B")
        .path(loss)
        .arg(format!("--calc={}", rule.formula()))
        .arg(format!("--outfile={}", output.display()))
        .arg("--overwrite");
    if rule.min_forest_cover.is_some() {
        invocation = invocation.args(["--NoDataValue=0", "--type=Byte"]);
    }
    invocation.arg("--hideNoData").expects(output)
}

/// Apply a layer's mask rule, writing `masked.tif`.
pub async fn apply_mask(
    ctx: &RequestContext,
    rule: &MaskRule,
    cover: &Path,
    loss: &Path,
) -> PipelineResult<PathBuf> {
    let output = ctx.workspace.file("masked.tif");
    ctx.run(mask_invocation(rule, cover, loss, &output))
        .await
        .map_err(|e| PipelineError::from_exec(e, PipelineError::AlgebraFailed))?;
    debug!(request_id = %ctx.request_id, formula = %rule.formula(), "Applied mask");
    Ok(output)
}

/// Compute the binary forest mask for every year in `years`.
///
/// At most `concurrency` algebra calls run at once. Outputs are
/// `forest_cover_{year}.tif`, returned in year order. The first failure
/// aborts the sweep and drops every call still in flight.
pub async fn year_sweep(
    ctx: &RequestContext,
    years: impl IntoIterator<Item = u16>,
    min_forest_cover: u8,
    cover: &Path,
    loss: &Path,
    concurrency: usize,
) -> PipelineResult<Vec<PathBuf>> {
    let bands: Vec<PathBuf> = stream::iter(years)
        .map(|year| async move {
            let rule = MaskRule::forest_cover(year, min_forest_cover);
            let output = ctx.workspace.file(&format!("forest_cover_{year}.tif"));
            ctx.run(mask_invocation(&rule, cover, loss, &output))
                .await
                .map_err(|e| {
                    PipelineError::from_exec(e, |reason| {
                        PipelineError::AlgebraFailed(format!("year {year}: {reason}"))
                    })
                })?;
            Ok::<_, PipelineError>(output)
        })
        .buffered(concurrency.max(1))
        .try_collect()
        .await?;

    debug!(request_id = %ctx.request_id, bands = bands.len(), "Year sweep complete");
    Ok(bands)
}
