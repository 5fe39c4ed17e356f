//! Geographic bounding boxes.

use geo::{coord, LineString, Polygon, Rect};
use serde::{Deserialize, Serialize};

use crate::error::{ParamError, ParamResult};

/// An axis-aligned WGS84 bounding box in degrees: `[minLon, minLat, maxLon, maxLat]`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub min_x: f64,
    pub min_y: f64,
    pub max_x: f64,
    pub max_y: f64,
}

impl BoundingBox {
    /// Create a new bounding box from corner coordinates.
    pub fn new(min_x: f64, min_y: f64, max_x: f64, max_y: f64) -> Self {
        Self {
            min_x,
            min_y,
            max_x,
            max_y,
        }
    }

    /// Parse a `bounds` query parameter: "minLon,minLat,maxLon,maxLat"
    pub fn from_bounds_string(s: &str) -> ParamResult<Self> {
        let parts: Vec<&str> = s.split(',').map(str::trim).collect();
        if parts.len() != 4 {
            return Err(ParamError::InvalidBounds(format!(
                "{s}. Expected 'minLon,minLat,maxLon,maxLat'"
            )));
        }

        let mut values = [0.0f64; 4];
        for (value, part) in values.iter_mut().zip(&parts) {
            *value = part
                .parse()
                .ok()
                .filter(|v: &f64| v.is_finite())
                .ok_or_else(|| ParamError::InvalidBounds(format!("invalid number '{part}'")))?;
        }

        let bbox = Self::new(values[0], values[1], values[2], values[3]);
        if bbox.is_degenerate() {
            return Err(ParamError::InvalidBounds(format!(
                "{s}. Minimum must be below maximum on both axes"
            )));
        }
        Ok(bbox)
    }

    /// Width of the bounding box in degrees.
    pub fn width(&self) -> f64 {
        self.max_x - self.min_x
    }

    /// Height of the bounding box in degrees.
    pub fn height(&self) -> f64 {
        self.max_y - self.min_y
    }

    /// True when the box has no area.
    pub fn is_degenerate(&self) -> bool {
        !(self.width() > 0.0 && self.height() > 0.0)
    }

    /// Closed exterior ring, counter-clockwise from the south-west corner.
    pub fn to_polygon(&self) -> Polygon<f64> {
        Polygon::new(
            LineString::from(vec![
                (self.min_x, self.min_y),
                (self.max_x, self.min_y),
                (self.max_x, self.max_y),
                (self.min_x, self.max_y),
                (self.min_x, self.min_y),
            ]),
            vec![],
        )
    }

    /// Envelope of a polygon's exterior ring. Returns None for an empty ring.
    pub fn from_polygon(polygon: &Polygon<f64>) -> Option<Self> {
        use geo::BoundingRect;
        polygon.bounding_rect().map(Self::from)
    }

    /// Pixel shape `(height, width)` at a fixed ground resolution, using the
    /// flat 110 km per degree approximation.
    pub fn ground_shape(&self, metres_per_degree: f64, metres_per_pixel: f64) -> (u32, u32) {
        let width = (self.width().abs() * metres_per_degree / metres_per_pixel).round();
        let height = (self.height().abs() * metres_per_degree / metres_per_pixel).round();
        (height as u32, width as u32)
    }
}

impl From<Rect<f64>> for BoundingBox {
    fn from(rect: Rect<f64>) -> Self {
        let min = rect.min();
        let max = rect.max();
        Self::new(min.x, min.y, max.x, max.y)
    }
}

impl From<BoundingBox> for Rect<f64> {
    fn from(bbox: BoundingBox) -> Self {
        Rect::new(
            coord! { x: bbox.min_x, y: bbox.min_y },
            coord! { x: bbox.max_x, y: bbox.max_y },
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_utils::assert_approx_eq;

    #[test]
    fn test_parse_bounds() {
        let bbox = BoundingBox::from_bounds_string("101.5,-1.25,102.0,-0.75").unwrap();
        assert_eq!(bbox.min_x, 101.5);
        assert_eq!(bbox.min_y, -1.25);
        assert_eq!(bbox.max_x, 102.0);
        assert_eq!(bbox.max_y, -0.75);
    }

    #[test]
    fn test_parse_bounds_rejects_bad_input() {
        assert!(BoundingBox::from_bounds_string("1,2,3").is_err());
        assert!(BoundingBox::from_bounds_string("1,2,x,4").is_err());
        assert!(BoundingBox::from_bounds_string("1,2,NaN,4").is_err());
        assert!(BoundingBox::from_bounds_string("3,2,1,4").is_err());
        assert!(BoundingBox::from_bounds_string("1,2,1,4").is_err());
    }

    #[test]
    fn test_polygon_round_trip() {
        let bbox = BoundingBox::new(-63.2, -10.5, -62.9, -10.1);
        let back = BoundingBox::from_polygon(&bbox.to_polygon()).unwrap();
        assert_eq!(bbox, back);
    }

    #[test]
    fn test_ground_shape() {
        // 0.3 degrees * 110_000 / 30 = 1100 pixels
        let bbox = BoundingBox::new(10.0, 0.0, 10.3, 0.15);
        let (height, width) = bbox.ground_shape(110_000.0, 30.0);
        assert_eq!(width, 1100);
        assert_eq!(height, 550);
        assert_approx_eq!(bbox.width(), 0.3, 1e-12);
    }
}
