//! Tile rendering and forest statistics over the global forest-change rasters.
//!
//! A request flows through these stages, each a call into the external raster
//! toolchain made through a [`CommandExecutor`]:
//!
//! 1. resolve the source granules intersecting the request ([`tile_index`])
//! 2. mosaic each needed layer ([`mosaic`])
//! 3. warp/clip onto the request's grid ([`warp`])
//! 4. mask cover by loss year ([`algebra`])
//! 5. colorize and composite a tile image ([`colorize`]), or stack the yearly
//!    masks and measure forest area ([`statistics`])
//!
//! [`Pipeline`] sequences the stages and owns each request's [`Workspace`].

pub mod algebra;
pub mod archive;
pub mod colorize;
pub mod config;
pub mod context;
pub mod error;
pub mod executor;
pub mod mosaic;
pub mod pipeline;
pub mod statistics;
#[cfg(any(test, feature = "testing"))]
pub mod testing;
pub mod tile_index;
pub mod warp;
pub mod workspace;

pub use config::PipelineConfig;
pub use context::{PipelineState, RequestContext};
pub use error::{PipelineError, PipelineResult};
pub use executor::{
    CommandExecutor, ExecError, ProcessExecutor, Tool, ToolInvocation, ToolOutput, Toolchain,
};
pub use pipeline::{Pipeline, TileRequest};
pub use statistics::ForestAreaTable;
pub use tile_index::{SourceTileRef, TileIndex, TileIndexCache, TileIndexSource};
pub use workspace::Workspace;
