//! End-to-end pipeline tests against the scripted toolchain.
//!
//! The synthetic index holds six 10-degree granules (0N-10N and 10S-0N,
//! 90E-120E). Tile 8/200/124 lies inside 10N_100E; tile 8/199/124 straddles
//! lon 100 and needs a mosaic of 10N_090E and 10N_100E.

use std::io::{Cursor, Read};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use forest_common::{BoundingBox, FeatureCollection, LayerSpec, PaletteSpec, TileCoord};
use forest_pipeline::statistics::{area_hectares, STACK_FILE};
use forest_pipeline::testing::{ScriptedExecutor, StaticIndexSource};
use forest_pipeline::{Pipeline, PipelineConfig, PipelineError, TileIndexCache, TileRequest, Tool};
use serde_json::json;
use test_utils::{dir_is_empty, gdalinfo_histogram, rect_region, scratch_dir, tropical_tile_index};
use tokio_util::sync::CancellationToken;

fn pipeline_with_index(root: &Path, executor: Arc<ScriptedExecutor>, index: serde_json::Value) -> Pipeline {
    let config = PipelineConfig {
        tiles_collection: "static".to_string(),
        layer_prefix: "/data/hansen_".to_string(),
        workspace_root: root.to_path_buf(),
        ..PipelineConfig::default()
    };
    let index = Arc::new(TileIndexCache::new(Arc::new(StaticIndexSource::new(index))));
    Pipeline::new(config, executor, index)
}

fn pipeline(root: &Path, executor: Arc<ScriptedExecutor>) -> Pipeline {
    pipeline_with_index(root, executor, tropical_tile_index())
}

fn tile_request(z: u32, x: u32, y: u32, layer: LayerSpec) -> TileRequest {
    TileRequest {
        tile: TileCoord::new(z, x, y).unwrap(),
        layer,
        palette: PaletteSpec::parse("#000000,#00ff00", 0.0, 1.0).unwrap(),
    }
}

fn forest_cover_tile(x: u32) -> TileRequest {
    tile_request(8, x, 124, LayerSpec::parse("forest_cover", Some(2015), Some(30)).unwrap())
}

fn region(value: serde_json::Value) -> FeatureCollection {
    serde_json::from_value(value).unwrap()
}

fn yearly_counts() -> Vec<u64> {
    (0..24).map(|i| 50_000 - i * 1_000).collect()
}

// ============================================================================
// Tile path
// ============================================================================

#[tokio::test]
async fn test_forest_cover_tile_single_granule() {
    let root = scratch_dir();
    let executor = Arc::new(ScriptedExecutor::new());
    let pipeline = pipeline(root.path(), executor.clone());

    let image = pipeline
        .render_tile(&forest_cover_tile(200), CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(&image[..], b"translate output");

    let calls = executor.calls();
    let tools: Vec<Tool> = calls.iter().map(|c| c.tool).collect();
    // Single granule: no mosaic build
    assert_eq!(tools.iter().filter(|t| **t == Tool::Warp).count(), 2);
    assert_eq!(tools.iter().filter(|t| **t == Tool::Calc).count(), 2);
    assert_eq!(tools.iter().filter(|t| **t == Tool::BuildVrt).count(), 1);
    assert_eq!(tools.last(), Some(&Tool::Translate));

    let sources: Vec<&str> = calls
        .iter()
        .filter(|c| c.tool == Tool::Warp)
        .map(|c| c.args[c.args.len() - 2].as_str())
        .collect();
    assert!(sources.contains(&"/data/hansen_treecover2000_10N_100E.tif"));
    assert!(sources.contains(&"/data/hansen_lossyear_10N_100E.tif"));

    let mask = calls
        .iter()
        .find(|c| c.args.iter().any(|a| a == "--calc=(A>=30)*logical_or(B==0,B>15)"));
    assert!(mask.is_some());

    assert!(dir_is_empty(root.path()));
}

#[tokio::test]
async fn test_passthrough_tile_across_granules() {
    let root = scratch_dir();
    let executor = Arc::new(ScriptedExecutor::new());
    let pipeline = pipeline(root.path(), executor.clone());

    let request = tile_request(8, 199, 124, LayerSpec::parse("lossyear", None, None).unwrap());
    pipeline
        .render_tile(&request, CancellationToken::new())
        .await
        .unwrap();

    let calls = executor.calls();
    let tools: Vec<Tool> = calls.iter().map(|c| c.tool).collect();
    assert_eq!(tools[0], Tool::BuildVrt);
    assert_eq!(tools[1], Tool::Warp);
    // Only the alpha band uses band algebra
    let calcs: Vec<_> = calls.iter().filter(|c| c.tool == Tool::Calc).collect();
    assert_eq!(calcs.len(), 1);
    assert!(calcs[0].args.contains(&"--calc=(A!=0)*255".to_string()));
    assert_eq!(tools.len(), 6);

    assert!(dir_is_empty(root.path()));
}

/// Paths of every `name` file inside the request workspaces under `root`.
fn workspace_files(root: &Path, name: &str) -> Vec<std::path::PathBuf> {
    std::fs::read_dir(root)
        .unwrap()
        .filter_map(|entry| Some(entry.ok()?.path().join(name)))
        .filter(|path| path.exists())
        .collect()
}

#[tokio::test]
async fn test_color_map_written_while_mosaics_build() {
    let root = scratch_dir();
    let executor = Arc::new(ScriptedExecutor::new().hang_on(Tool::BuildVrt));
    let pipeline = Arc::new(pipeline(root.path(), executor.clone()));
    let cancel = CancellationToken::new();

    let task = {
        let pipeline = pipeline.clone();
        let cancel = cancel.clone();
        tokio::spawn(async move { pipeline.render_tile(&forest_cover_tile(199), cancel).await })
    };

    tokio::time::timeout(Duration::from_secs(5), executor.wait_for_in_flight(2))
        .await
        .unwrap();
    let color_map = tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            if let Some(path) = workspace_files(root.path(), "color.txt").pop() {
                return path;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .unwrap();
    assert_eq!(std::fs::read_to_string(color_map).unwrap(), "0 0 0 0\n1 0 255 0");
    // Both mosaics are still running
    assert_eq!(executor.in_flight(), 2);
    assert!(executor.calls().iter().all(|c| c.tool == Tool::BuildVrt));

    cancel.cancel();
    assert!(matches!(task.await.unwrap(), Err(PipelineError::ClientCancelled)));
    assert!(dir_is_empty(root.path()));
}

#[tokio::test]
async fn test_no_coverage_makes_no_tool_calls() {
    let root = scratch_dir();
    let executor = Arc::new(ScriptedExecutor::new());
    let pipeline = pipeline(root.path(), executor.clone());

    let request = tile_request(8, 0, 0, LayerSpec::parse("lossyear", None, None).unwrap());
    let err = pipeline
        .render_tile(&request, CancellationToken::new())
        .await
        .unwrap_err();

    assert!(matches!(err, PipelineError::NoCoverage));
    assert_eq!(err.http_status_code(), 404);
    assert!(executor.calls().is_empty());
    assert!(dir_is_empty(root.path()));
}

#[tokio::test]
async fn test_stage_failure_removes_workspace() {
    let root = scratch_dir();
    let executor = Arc::new(ScriptedExecutor::new().fail_on(Tool::Warp, "ERROR 1: cannot open"));
    let pipeline = pipeline(root.path(), executor.clone());

    let err = pipeline
        .render_tile(&forest_cover_tile(200), CancellationToken::new())
        .await
        .unwrap_err();

    assert!(matches!(err, PipelineError::WarpFailed { .. }));
    assert_eq!(err.http_status_code(), 500);
    assert!(!executor.calls().iter().any(|c| c.tool == Tool::Calc));
    assert!(dir_is_empty(root.path()));
}

#[tokio::test]
async fn test_index_unavailable_is_retryable() {
    let root = scratch_dir();
    let executor = Arc::new(ScriptedExecutor::new());
    let pipeline = pipeline_with_index(root.path(), executor.clone(), json!({ "type": "Feature" }));

    let err = pipeline
        .render_tile(&forest_cover_tile(200), CancellationToken::new())
        .await
        .unwrap_err();

    assert!(matches!(err, PipelineError::IndexUnavailable(_)));
    assert!(err.is_retryable());
    assert_eq!(err.http_status_code(), 503);
    assert!(!pipeline.tile_index().is_loaded());
    assert!(dir_is_empty(root.path()));
}

// ============================================================================
// Cancellation
// ============================================================================

#[tokio::test]
async fn test_cancel_during_concurrent_mosaics() {
    let root = scratch_dir();
    let executor = Arc::new(ScriptedExecutor::new().hang_on(Tool::BuildVrt));
    let pipeline = Arc::new(pipeline(root.path(), executor.clone()));
    let cancel = CancellationToken::new();

    let task = {
        let pipeline = pipeline.clone();
        let cancel = cancel.clone();
        tokio::spawn(async move { pipeline.render_tile(&forest_cover_tile(199), cancel).await })
    };

    // Both the treecover2000 and lossyear mosaics are in flight.
    tokio::time::timeout(Duration::from_secs(5), executor.wait_for_in_flight(2))
        .await
        .unwrap();
    cancel.cancel();

    let err = task.await.unwrap().unwrap_err();
    assert!(matches!(err, PipelineError::ClientCancelled));
    assert!(!err.is_reportable());
    assert_eq!(executor.in_flight(), 0);
    assert!(!executor.calls().iter().any(|c| c.tool == Tool::Warp));
    assert!(dir_is_empty(root.path()));
}

#[tokio::test]
async fn test_dropped_request_removes_workspace() {
    let root = scratch_dir();
    let executor = Arc::new(ScriptedExecutor::new().hang_on(Tool::Warp));
    let pipeline = Arc::new(pipeline(root.path(), executor.clone()));

    let task = {
        let pipeline = pipeline.clone();
        tokio::spawn(async move {
            pipeline
                .render_tile(&forest_cover_tile(200), CancellationToken::new())
                .await
        })
    };

    tokio::time::timeout(Duration::from_secs(5), executor.wait_for_in_flight(2))
        .await
        .unwrap();
    assert!(!dir_is_empty(root.path()));

    task.abort();
    assert!(task.await.unwrap_err().is_cancelled());
    assert_eq!(executor.in_flight(), 0);
    assert!(dir_is_empty(root.path()));
}

#[tokio::test]
async fn test_cancellation_is_per_request() {
    let root = scratch_dir();
    let executor = Arc::new(ScriptedExecutor::new().with_delay(Duration::from_millis(20)));
    let pipeline = Arc::new(pipeline(root.path(), executor.clone()));

    let cancelled = CancellationToken::new();
    let first = {
        let pipeline = pipeline.clone();
        let cancel = cancelled.clone();
        tokio::spawn(async move { pipeline.render_tile(&forest_cover_tile(200), cancel).await })
    };
    let second = {
        let pipeline = pipeline.clone();
        tokio::spawn(async move {
            pipeline
                .render_tile(&forest_cover_tile(200), CancellationToken::new())
                .await
        })
    };

    tokio::time::sleep(Duration::from_millis(30)).await;
    cancelled.cancel();

    assert!(matches!(
        first.await.unwrap(),
        Err(PipelineError::ClientCancelled)
    ));
    assert_eq!(&second.await.unwrap().unwrap()[..], b"translate output");
    assert!(dir_is_empty(root.path()));
}

// ============================================================================
// Analysis path
// ============================================================================

#[tokio::test]
async fn test_analysis_table() {
    let root = scratch_dir();
    let counts = yearly_counts();
    let executor = Arc::new(ScriptedExecutor::new().with_info(&gdalinfo_histogram(&counts)));
    let pipeline = pipeline(root.path(), executor.clone());

    let table = pipeline
        .analyze(&region(rect_region(101.0, 1.0, 101.1, 1.1)), CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(table.len(), 24);
    for (i, year) in (2000..=2023).enumerate() {
        assert_eq!(table.get(year), Some(area_hectares(counts[i], 900.0)));
    }

    let calls = executor.calls();
    let warps: Vec<_> = calls.iter().filter(|c| c.tool == Tool::Warp).collect();
    assert_eq!(warps.len(), 2);
    for warp in &warps {
        // 0.1 degrees at 30 m is 367 pixels
        assert!(warp.args.windows(3).any(|w| w == ["-ts", "367", "367"]));
        let at = warp.args.iter().position(|a| a == "-cutline").unwrap();
        assert!(warp.args[at + 1].ends_with("roi.geojson"));
    }
    assert_eq!(calls.iter().filter(|c| c.tool == Tool::Calc).count(), 24);
    assert!(calls
        .iter()
        .any(|c| c.tool == Tool::Translate && c.args.contains(&"COMPRESS=ZSTD".to_string())));
    assert_eq!(calls.last().map(|c| c.tool), Some(Tool::Info));

    assert!(dir_is_empty(root.path()));
}

#[tokio::test]
async fn test_analysis_too_large_is_rejected_before_any_work() {
    let root = scratch_dir();
    let executor = Arc::new(ScriptedExecutor::new());
    let pipeline = pipeline(root.path(), executor.clone());

    let err = pipeline
        .analyze(&region(rect_region(95.0, -5.0, 105.0, 5.0)), CancellationToken::new())
        .await
        .unwrap_err();

    assert!(matches!(err, PipelineError::AreaTooLarge { .. }));
    assert_eq!(err.http_status_code(), 413);
    assert!(executor.calls().is_empty());
    assert!(dir_is_empty(root.path()));
}

#[tokio::test]
async fn test_analysis_rejects_region_without_polygons() {
    let root = scratch_dir();
    let executor = Arc::new(ScriptedExecutor::new());
    let pipeline = pipeline(root.path(), executor.clone());

    let err = pipeline
        .analyze(&FeatureCollection::new(), CancellationToken::new())
        .await
        .unwrap_err();

    assert_eq!(err.http_status_code(), 400);
    assert!(executor.calls().is_empty());
    assert!(dir_is_empty(root.path()));
}

#[tokio::test]
async fn test_analysis_sweep_failure() {
    let root = scratch_dir();
    let executor = Arc::new(
        ScriptedExecutor::new().fail_when(Tool::Calc, "forest_cover_2020.tif", "ERROR 1: write failed"),
    );
    let pipeline = pipeline(root.path(), executor.clone());

    let err = pipeline
        .analyze(&region(rect_region(101.0, 1.0, 101.1, 1.1)), CancellationToken::new())
        .await
        .unwrap_err();

    assert!(matches!(err, PipelineError::AlgebraFailed(_)));
    assert!(!executor.calls().iter().any(|c| c.tool == Tool::Info));
    assert!(dir_is_empty(root.path()));
}

#[tokio::test]
async fn test_analysis_bundle() {
    let root = scratch_dir();
    let executor = Arc::new(ScriptedExecutor::new().with_info(&gdalinfo_histogram(&yearly_counts())));
    let pipeline = pipeline(root.path(), executor.clone());

    let bytes = pipeline
        .analyze_bundle(&region(rect_region(101.0, 1.0, 101.1, 1.1)), CancellationToken::new())
        .await
        .unwrap();

    let mut archive = zip::ZipArchive::new(Cursor::new(bytes.to_vec())).unwrap();
    let mut json = String::new();
    archive
        .by_name("statistics.json")
        .unwrap()
        .read_to_string(&mut json)
        .unwrap();
    let table: serde_json::Value = serde_json::from_str(&json).unwrap();
    assert_eq!(table.as_object().unwrap().len(), 24);
    assert_eq!(table["2000"], json!(area_hectares(50_000, 900.0)));

    let mut raster = String::new();
    archive.by_name(STACK_FILE).unwrap().read_to_string(&mut raster).unwrap();
    assert_eq!(raster, "translate output");

    assert!(dir_is_empty(root.path()));
}

#[tokio::test]
async fn test_forest_layer_download() {
    let root = scratch_dir();
    let executor = Arc::new(ScriptedExecutor::new());
    let pipeline = pipeline(root.path(), executor.clone());

    let bytes = pipeline
        .forest_layer(&BoundingBox::new(109.95, -0.05, 110.05, 0.05), CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(&bytes[..], b"translate output");

    let calls = executor.calls();
    // Four granules meet at (110, 0): both layers need a mosaic
    let mosaics = calls
        .iter()
        .filter(|c| c.tool == Tool::BuildVrt && c.args.iter().any(|a| a.ends_with("_image_list.txt")))
        .count();
    assert_eq!(mosaics, 2);
    assert!(!calls.iter().any(|c| c.tool == Tool::Info));
    assert!(dir_is_empty(root.path()));
}
