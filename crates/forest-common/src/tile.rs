//! XYZ tile coordinates in the web-mercator tiling scheme.

use geo::Polygon;
use serde::{Deserialize, Serialize};

use crate::error::{ParamError, ParamResult};
use crate::BoundingBox;

/// Deepest zoom level accepted. Keeps `2^z` inside `u32`.
pub const MAX_ZOOM: u32 = 30;

/// A tile coordinate (z/x/y).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TileCoord {
    /// Zoom level
    pub z: u32,
    /// Column (x)
    pub x: u32,
    /// Row (y), counted from the north edge
    pub y: u32,
}

impl TileCoord {
    /// Create a coordinate, rejecting anything outside `0 <= x,y < 2^z`.
    pub fn new(z: u32, x: u32, y: u32) -> ParamResult<Self> {
        if z > MAX_ZOOM {
            return Err(ParamError::invalid(
                "z",
                format!("zoom {z} exceeds maximum {MAX_ZOOM}"),
            ));
        }
        let n = 1u32 << z;
        if x >= n || y >= n {
            return Err(ParamError::TileOutOfRange { z, x, y });
        }
        Ok(Self { z, x, y })
    }

    /// Tiles per axis at this zoom.
    pub fn matrix_size(&self) -> u32 {
        1u32 << self.z
    }

    pub fn cache_key(&self) -> String {
        format!("{}/{}/{}", self.z, self.x, self.y)
    }

    /// WGS84 bounds of the tile.
    pub fn bounds(&self) -> BoundingBox {
        let n = self.matrix_size() as f64;

        let lon_min = self.x as f64 / n * 360.0 - 180.0;
        let lon_max = (self.x + 1) as f64 / n * 360.0 - 180.0;

        let lat_max = mercator_row_to_lat(self.y as f64, n);
        let lat_min = mercator_row_to_lat((self.y + 1) as f64, n);

        BoundingBox::new(lon_min, lat_min, lon_max, lat_max)
    }

    /// The tile footprint as a polygon, used to select source tiles.
    pub fn polygon(&self) -> Polygon<f64> {
        self.bounds().to_polygon()
    }
}

fn mercator_row_to_lat(row: f64, n: f64) -> f64 {
    (std::f64::consts::PI * (1.0 - 2.0 * row / n))
        .sinh()
        .atan()
        .to_degrees()
}
