//! Common types shared by the forest-change tile pipeline and its HTTP API.

pub mod bbox;
pub mod error;
pub mod geojson;
pub mod layer;
pub mod palette;
pub mod tile;

pub use bbox::BoundingBox;
pub use error::{ParamError, ParamResult};
pub use geojson::{Feature, FeatureCollection, Geometry, Position};
pub use layer::{LayerSpec, MaskRule, FIRST_YEAR, LAST_YEAR, LOSSYEAR_LAYER, TREECOVER_LAYER};
pub use palette::{Color, PaletteSpec};
pub use tile::TileCoord;
