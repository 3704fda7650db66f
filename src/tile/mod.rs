//! Tile service layer.
//!
//! This module turns viewer tile requests into encoded JPEG tiles.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────┐
//! │              HTTP Handlers              │
//! └────────────────────┬────────────────────┘
//!                      │
//!                      ▼
//! ┌─────────────────────────────────────────┐
//! │              Tile Service               │
//! │  ┌──────────┐ ┌───────────┐ ┌────────┐  │
//! │  │ mapper + │ │ TileCache │ │pipeline│  │
//! │  │extractor │ │ (pixels)  │ │+encoder│  │
//! │  └──────────┘ └───────────┘ └────────┘  │
//! └────────────────────┬────────────────────┘
//!                      │
//!                      ▼
//! ┌─────────────────────────────────────────┐
//! │        SlideSession / Slide             │
//! └─────────────────────────────────────────┘
//! ```
//!
//! # Components
//!
//! - [`map_tile`]: viewer level to native level and read rectangle
//! - [`extract_tile`]: read the rectangle and resample to the tile size
//! - [`TileCache`]: LRU cache for extracted tiles with size-based eviction
//! - [`PostProcessPipeline`]: fixed stage, custom transform, JPEG encoding
//! - [`TileService`]: main entry point, orchestrates the above
//!
//! # Example
//!
//! ```
//! use wsi_workbench::tile::map_tile;
//!
//! let dims = [(8192, 6144), (4096, 3072), (2048, 1536)];
//! let mapping = map_tile(&dims, 0, 0, 0, 512).unwrap();
//! assert_eq!(mapping.region.native_level, 2);
//! assert_eq!(mapping.region.read_width, 512);
//! ```

mod cache;
mod encoder;
mod extractor;
mod mapper;
mod pipeline;
mod service;

pub use cache::{TileCache, TileCacheKey, DEFAULT_TILE_CACHE_CAPACITY};
pub use encoder::{
    clamp_quality, is_valid_quality, JpegTileEncoder, DEFAULT_JPEG_QUALITY, MAX_JPEG_QUALITY,
    MIN_JPEG_QUALITY,
};
pub use extractor::{extract_tile, resample};
pub use mapper::{map_tile, LevelMapping, NativeRegion};
pub use pipeline::{IdentityPostProcess, PostProcess, PostProcessPipeline};
pub use service::{
    TileRequest, TileResponse, TileService, DEFAULT_TILE_SIZE, DEFAULT_TILE_TIMEOUT,
};
