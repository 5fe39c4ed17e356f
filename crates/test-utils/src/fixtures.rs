//! Common test fixtures for the forest tile pipeline.
//!
//! The source dataset is partitioned into 10x10 degree granules named after
//! their north-west corner, e.g. `10N_100E` covers 100E-110E, 0N-10N.

use std::path::Path;

use serde_json::{json, Value};
use tempfile::TempDir;

/// Granule identifier for the cell whose north-west corner is (`lon_left`, `lat_top`).
pub fn granule_id(lat_top: i32, lon_left: i32) -> String {
    let ns = if lat_top >= 0 { 'N' } else { 'S' };
    let ew = if lon_left >= 0 { 'E' } else { 'W' };
    format!("{:02}{}_{:03}{}", lat_top.abs(), ns, lon_left.abs(), ew)
}

/// Closed ring for an axis-aligned rectangle.
pub fn rect_ring(min_x: f64, min_y: f64, max_x: f64, max_y: f64) -> Value {
    json!([[
        [min_x, min_y],
        [max_x, min_y],
        [max_x, max_y],
        [min_x, max_y],
        [min_x, min_y]
    ]])
}

/// A tile index FeatureCollection covering the given granule rows and columns.
///
/// `lat_tops` and `lon_lefts` are the north and west edges of each granule.
pub fn grid_tile_index(lat_tops: &[i32], lon_lefts: &[i32]) -> Value {
    let mut features = Vec::new();
    for &top in lat_tops {
        for &left in lon_lefts {
            features.push(json!({
                "type": "Feature",
                "properties": { "tile_id": granule_id(top, left) },
                "geometry": {
                    "type": "Polygon",
                    "coordinates": rect_ring(
                        left as f64,
                        (top - 10) as f64,
                        (left + 10) as f64,
                        top as f64
                    )
                }
            }));
        }
    }
    json!({ "type": "FeatureCollection", "features": features })
}

/// A tile index over Borneo and Sumatra: rows 10N..0N, 0N..10S; columns 90E..120E.
pub fn tropical_tile_index() -> Value {
    grid_tile_index(&[10, 0], &[90, 100, 110])
}

/// A region of interest holding a single rectangular polygon.
pub fn rect_region(min_x: f64, min_y: f64, max_x: f64, max_y: f64) -> Value {
    json!({
        "type": "FeatureCollection",
        "features": [{
            "type": "Feature",
            "properties": { "name": "test-region" },
            "geometry": {
                "type": "Polygon",
                "coordinates": rect_ring(min_x, min_y, max_x, max_y)
            }
        }]
    })
}

/// Minimal `gdalinfo -json -hist` document for single-byte bands holding 0/1.
///
/// Each entry of `forest_pixels` becomes one band whose histogram has that
/// count in the bucket for value 1, using GDAL's default byte binning of 256
/// buckets over [-0.5, 255.5].
pub fn gdalinfo_histogram(forest_pixels: &[u64]) -> Value {
    let bands: Vec<Value> = forest_pixels
        .iter()
        .enumerate()
        .map(|(i, &count)| {
            let mut buckets = vec![0u64; 256];
            buckets[1] = count;
            json!({
                "band": i + 1,
                "type": "Byte",
                "noDataValue": 0,
                "histogram": {
                    "count": 256,
                    "min": -0.5,
                    "max": 255.5,
                    "buckets": buckets
                }
            })
        })
        .collect();
    json!({ "driverShortName": "GTiff", "bands": bands })
}

/// A fresh scratch directory for workspace roots.
pub fn scratch_dir() -> TempDir {
    tempfile::Builder::new()
        .prefix("forest-test-")
        .tempdir()
        .expect("failed to create scratch directory")
}

/// True when `dir` exists and holds no entries.
pub fn dir_is_empty(dir: &Path) -> bool {
    std::fs::read_dir(dir)
        .map(|mut entries| entries.next().is_none())
        .unwrap_or(false)
}
