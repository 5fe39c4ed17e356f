//! Mosaic construction over source granules.

use tracing::debug;

use crate::context::RequestContext;
use crate::error::{PipelineError, PipelineResult};
use crate::executor::{Tool, ToolInvocation};
use crate::tile_index::SourceTileRef;

/// Build one raster reference covering `tiles` for `layer`.
///
/// A single granule is used directly. Several granules are listed in
/// `{layer}_image_list.txt` and combined into `{layer}_collection.vrt`.
pub async fn build_mosaic(
    ctx: &RequestContext,
    layer_prefix: &str,
    layer: &str,
    tiles: &[SourceTileRef],
) -> PipelineResult<String> {
    let failed = |reason: String| PipelineError::MosaicBuildFailed {
        layer: layer.to_string(),
        reason,
    };

    let paths: Vec<String> = tiles
        .iter()
        .map(|tile| tile.raster_path(layer_prefix, layer))
        .collect();

    match paths.as_slice() {
        [] => Err(failed("no source tiles".to_string())),
        [single] => {
            debug!(request_id = %ctx.request_id, layer, path = %single, "Using single source tile");
            Ok(single.clone())
        }
        _ => {
            let list = ctx
                .workspace
                .write_text(&format!("{layer}_image_list.txt"), &paths.join("\n"))
                .await
                .map_err(|e| failed(format!("cannot write image list: {e}")))?;
            let vrt = ctx.workspace.file(&format!("{layer}_collection.vrt"));

            let invocation = ToolInvocation::new(Tool::BuildVrt)
                .arg("-overwrite")
                .arg("-input_file_list")
                .path(&list)
                .output(&vrt);
            ctx.run(invocation)
                .await
                .map_err(|e| PipelineError::from_exec(e, failed))?;

            debug!(
                request_id = %ctx.request_id,
                layer,
                tile_count = paths.len(),
                "Built mosaic"
            );
            Ok(vrt.to_string_lossy().into_owned())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{test_context, ScriptedExecutor};
    use std::sync::Arc;

    #[tokio::test]
    async fn test_single_tile_skips_buildvrt() {
        let root = tempfile::tempdir().unwrap();
        let executor = Arc::new(ScriptedExecutor::new());
        let ctx = test_context(root.path(), executor.clone()).await;

        let path = build_mosaic(&ctx, "/data/", "lossyear", &[SourceTileRef::new("10N_100E")])
            .await
            .unwrap();
        assert_eq!(path, "/data/lossyear_10N_100E.tif");
        assert!(executor.calls().is_empty());
        assert!(!ctx.workspace.file("lossyear_image_list.txt").exists());
    }

    #[tokio::test]
    async fn test_multiple_tiles_write_list_and_vrt() {
        let root = tempfile::tempdir().unwrap();
        let executor = Arc::new(ScriptedExecutor::new());
        let ctx = test_context(root.path(), executor.clone()).await;

        let tiles = [SourceTileRef::new("10N_100E"), SourceTileRef::new("00N_100E")];
        let path = build_mosaic(&ctx, "https://data.example/h_", "treecover2000", &tiles)
            .await
            .unwrap();

        let vrt = ctx.workspace.file("treecover2000_collection.vrt");
        assert_eq!(path, vrt.to_string_lossy());
        let list = std::fs::read_to_string(ctx.workspace.file("treecover2000_image_list.txt")).unwrap();
        assert_eq!(
            list,
            "/vsicurl/https://data.example/h_treecover2000_10N_100E.tif\n\
             /vsicurl/https://data.example/h_treecover2000_00N_100E.tif"
        );

        let calls = executor.calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].tool, Tool::BuildVrt);
        assert_eq!(calls[0].args[..2], ["-overwrite", "-input_file_list"]);
        assert_eq!(calls[0].output.as_deref(), Some(vrt.as_path()));
    }

    #[tokio::test]
    async fn test_failure_is_mosaic_build_failed() {
        let root = tempfile::tempdir().unwrap();
        let executor = Arc::new(ScriptedExecutor::new().fail_on(Tool::BuildVrt, "ERROR 4: not recognized"));
        let ctx = test_context(root.path(), executor).await;

        let tiles = [SourceTileRef::new("a"), SourceTileRef::new("b")];
        let err = build_mosaic(&ctx, "/data/", "lossyear", &tiles).await.unwrap_err();
        match err {
            PipelineError::MosaicBuildFailed { layer, reason } => {
                assert_eq!(layer, "lossyear");
                assert!(reason.contains("not recognized"));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_unwritable_image_list_is_mosaic_build_failed() {
        let root = tempfile::tempdir().unwrap();
        let executor = Arc::new(ScriptedExecutor::new());
        let ctx = test_context(root.path(), executor.clone()).await;
        // A directory in the way of the list file
        std::fs::create_dir(ctx.workspace.file("treecover2000_image_list.txt")).unwrap();

        let tiles = [SourceTileRef::new("a"), SourceTileRef::new("b")];
        let err = build_mosaic(&ctx, "/data/", "treecover2000", &tiles)
            .await
            .unwrap_err();
        match &err {
            PipelineError::MosaicBuildFailed { layer, reason } => {
                assert_eq!(layer, "treecover2000");
                assert!(reason.contains("image list"));
            }
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(err.http_status_code(), 500);
        assert!(executor.calls().is_empty());
    }
}
