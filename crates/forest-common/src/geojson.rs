//! GeoJSON types for analysis regions and the source tile index.
//!
//! Only the subset needed here is modelled: a FeatureCollection of features
//! carrying simple geometries and free-form properties. Polygonal geometries
//! convert to `geo` types for intersection tests and envelopes.

use geo::{BoundingRect, LineString, MultiPolygon, Polygon};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{ParamError, ParamResult};
use crate::BoundingBox;

/// A GeoJSON FeatureCollection.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FeatureCollection {
    /// Type identifier (always "FeatureCollection").
    #[serde(rename = "type")]
    pub type_: String,

    /// Array of features.
    #[serde(default)]
    pub features: Vec<Feature>,
}

impl FeatureCollection {
    /// Create a new empty FeatureCollection.
    pub fn new() -> Self {
        Self {
            type_: "FeatureCollection".to_string(),
            features: Vec::new(),
        }
    }

    /// Add a feature to the collection.
    pub fn with_feature(mut self, feature: Feature) -> Self {
        self.features.push(feature);
        self
    }

    /// A collection holding a single rectangle, used for bounds-only requests.
    pub fn from_bbox(bbox: &BoundingBox) -> Self {
        Self::new().with_feature(Feature::new(Geometry::from(bbox.to_polygon())))
    }

    /// All polygonal geometry in the collection, flattened.
    pub fn multi_polygon(&self) -> MultiPolygon<f64> {
        let polygons = self
            .features
            .iter()
            .filter_map(|f| f.geometry.as_ref())
            .filter_map(Geometry::to_multi_polygon)
            .flat_map(|mp| mp.0)
            .collect();
        MultiPolygon::new(polygons)
    }

    /// Envelope of the polygonal geometry, if any.
    pub fn bounds(&self) -> Option<BoundingBox> {
        self.multi_polygon().bounding_rect().map(BoundingBox::from)
    }

    /// Validate a region of interest and return its envelope.
    ///
    /// The collection must contain at least one Polygon or MultiPolygon and the
    /// envelope must have area.
    pub fn region_bounds(&self) -> ParamResult<BoundingBox> {
        if self.type_ != "FeatureCollection" {
            return Err(ParamError::InvalidGeoJson(format!(
                "expected a FeatureCollection, got '{}'",
                self.type_
            )));
        }
        let bbox = self.bounds().ok_or_else(|| {
            ParamError::InvalidGeoJson("no Polygon or MultiPolygon features".to_string())
        })?;
        if bbox.is_degenerate() || ![bbox.min_x, bbox.min_y, bbox.max_x, bbox.max_y]
            .iter()
            .all(|v| v.is_finite())
        {
            return Err(ParamError::InvalidGeoJson(
                "region bounding box has no area".to_string(),
            ));
        }
        Ok(bbox)
    }
}

impl Default for FeatureCollection {
    fn default() -> Self {
        Self::new()
    }
}

/// A GeoJSON Feature.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Feature {
    /// Type identifier (always "Feature").
    #[serde(rename = "type")]
    pub type_: String,

    /// Optional feature identifier.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<Value>,

    /// The geometry of this feature. GeoJSON allows null.
    pub geometry: Option<Geometry>,

    /// Free-form properties.
    #[serde(default)]
    pub properties: Option<Map<String, Value>>,
}

impl Feature {
    pub fn new(geometry: Geometry) -> Self {
        Self {
            type_: "Feature".to_string(),
            id: None,
            geometry: Some(geometry),
            properties: Some(Map::new()),
        }
    }

    /// Set a property.
    pub fn with_property(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.properties
            .get_or_insert_with(Map::new)
            .insert(name.into(), value.into());
        self
    }

    /// Look up a string property.
    pub fn string_property(&self, name: &str) -> Option<&str> {
        self.properties.as_ref()?.get(name)?.as_str()
    }
}

/// A GeoJSON position: longitude, latitude and any further values
/// (altitude), which are carried through but not used.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "Vec<f64>", into = "Vec<f64>")]
pub struct Position(Vec<f64>);

impl Position {
    pub fn new(x: f64, y: f64) -> Self {
        Self(vec![x, y])
    }

    pub fn x(&self) -> f64 {
        self.0[0]
    }

    pub fn y(&self) -> f64 {
        self.0[1]
    }

    /// Third value, if present.
    pub fn z(&self) -> Option<f64> {
        self.0.get(2).copied()
    }
}

impl TryFrom<Vec<f64>> for Position {
    type Error = String;

    fn try_from(values: Vec<f64>) -> Result<Self, Self::Error> {
        if values.len() < 2 {
            return Err(format!(
                "a position needs at least 2 values, got {}",
                values.len()
            ));
        }
        Ok(Self(values))
    }
}

impl From<Position> for Vec<f64> {
    fn from(position: Position) -> Self {
        position.0
    }
}

/// GeoJSON geometry types.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type")]
pub enum Geometry {
    Point { coordinates: Position },
    MultiPoint { coordinates: Vec<Position> },
    LineString { coordinates: Vec<Position> },
    MultiLineString { coordinates: Vec<Vec<Position>> },
    /// Linear rings; the first is the exterior, the rest are holes.
    Polygon { coordinates: Vec<Vec<Position>> },
    MultiPolygon { coordinates: Vec<Vec<Vec<Position>>> },
}

impl Geometry {
    /// Polygonal geometry as a `geo` MultiPolygon; None for points and lines.
    pub fn to_multi_polygon(&self) -> Option<MultiPolygon<f64>> {
        match self {
            Geometry::Polygon { coordinates } => {
                rings_to_polygon(coordinates).map(|p| MultiPolygon::new(vec![p]))
            }
            Geometry::MultiPolygon { coordinates } => Some(MultiPolygon::new(
                coordinates
                    .iter()
                    .filter_map(|rings| rings_to_polygon(rings))
                    .collect(),
            )),
            _ => None,
        }
    }
}

impl From<Polygon<f64>> for Geometry {
    fn from(polygon: Polygon<f64>) -> Self {
        let ring = |ls: &LineString<f64>| {
            ls.coords()
                .map(|c| Position::new(c.x, c.y))
                .collect::<Vec<_>>()
        };
        let mut coordinates = vec![ring(polygon.exterior())];
        coordinates.extend(polygon.interiors().iter().map(ring));
        Geometry::Polygon { coordinates }
    }
}

fn rings_to_polygon(rings: &[Vec<Position>]) -> Option<Polygon<f64>> {
    let (exterior, holes) = rings.split_first()?;
    let to_line = |ring: &Vec<Position>| {
        LineString::from(ring.iter().map(|p| (p.x(), p.y())).collect::<Vec<_>>())
    };
    Some(Polygon::new(
        to_line(exterior),
        holes.iter().map(to_line).collect(),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    const ROI: &str = r#"{
        "type": "FeatureCollection",
        "features": [
            {
                "type": "Feature",
                "properties": {"name": "plot-a"},
                "geometry": {
                    "type": "Polygon",
                    "coordinates": [[[101.0, 0.5], [101.4, 0.5], [101.4, 0.9], [101.0, 0.9], [101.0, 0.5]]]
                }
            },
            {
                "type": "Feature",
                "properties": null,
                "geometry": {
                    "type": "MultiPolygon",
                    "coordinates": [[[[102.0, 0.0], [102.5, 0.0], [102.5, 0.2], [102.0, 0.0]]]]
                }
            },
            {
                "type": "Feature",
                "properties": {},
                "geometry": {"type": "Point", "coordinates": [150.0, 40.0]}
            }
        ]
    }"#;

    #[test]
    fn test_parse_and_bounds() {
        let fc: FeatureCollection = serde_json::from_str(ROI).unwrap();
        assert_eq!(fc.features.len(), 3);
        assert_eq!(fc.features[0].string_property("name"), Some("plot-a"));

        // Points do not contribute to the polygonal envelope
        let bbox = fc.region_bounds().unwrap();
        assert_eq!(bbox, BoundingBox::new(101.0, 0.0, 102.5, 0.9));
        assert_eq!(fc.multi_polygon().0.len(), 2);
    }

    #[test]
    fn test_region_without_polygons_is_rejected() {
        let fc = FeatureCollection::new().with_feature(Feature::new(Geometry::Point {
            coordinates: Position::new(1.0, 2.0),
        }));
        assert!(matches!(
            fc.region_bounds(),
            Err(ParamError::InvalidGeoJson(_))
        ));
        assert!(FeatureCollection::new().region_bounds().is_err());
    }

    #[test]
    fn test_from_bbox_serializes_as_polygon() {
        let bbox = BoundingBox::new(10.0, -5.0, 11.0, -4.0);
        let fc = FeatureCollection::from_bbox(&bbox);
        let json = serde_json::to_value(&fc).unwrap();
        assert_eq!(json["type"], "FeatureCollection");
        assert_eq!(json["features"][0]["geometry"]["type"], "Polygon");
        assert_eq!(
            json["features"][0]["geometry"]["coordinates"][0][0],
            serde_json::json!([10.0, -5.0])
        );
        assert_eq!(fc.region_bounds().unwrap(), bbox);
    }

    #[test]
    fn test_region_with_altitudes() {
        let fc: FeatureCollection = serde_json::from_str(
            r#"{
                "type": "FeatureCollection",
                "features": [{
                    "type": "Feature",
                    "properties": {},
                    "geometry": {
                        "type": "Polygon",
                        "coordinates": [[[101.0, 0.5, 0.0], [101.4, 0.5, 12.5], [101.4, 0.9, 3.0], [101.0, 0.9, 0.0], [101.0, 0.5, 0.0]]]
                    }
                }]
            }"#,
        )
        .unwrap();

        assert_eq!(
            fc.region_bounds().unwrap(),
            BoundingBox::new(101.0, 0.5, 101.4, 0.9)
        );

        // Altitudes survive re-encoding
        let json = serde_json::to_value(&fc).unwrap();
        assert_eq!(
            json["features"][0]["geometry"]["coordinates"][0][1],
            serde_json::json!([101.4, 0.5, 12.5])
        );
    }

    #[test]
    fn test_position_needs_two_values() {
        let err = serde_json::from_str::<Geometry>(r#"{"type": "Point", "coordinates": [101.0]}"#)
            .unwrap_err();
        assert!(err.to_string().contains("at least 2 values"));
        let point: Geometry =
            serde_json::from_str(r#"{"type": "Point", "coordinates": [101.0, 0.5, 7.0]}"#).unwrap();
        match point {
            Geometry::Point { coordinates } => {
                assert_eq!((coordinates.x(), coordinates.y(), coordinates.z()), (101.0, 0.5, Some(7.0)));
            }
            other => panic!("unexpected {other:?}"),
        }
    }
}
