//! # WSI Workbench
//!
//! A deep-zoom tile server for Whole Slide Images (WSI) with a
//! hot-reloadable tile post-processing transform and nuclei overlays.
//!
//! Slides are uploaded to a local directory and one of them is "current".
//! The viewer requests deep-zoom tiles, which are read from the matching
//! native pyramid level, resampled, post-processed and JPEG encoded. A
//! user-editable script can transform every tile; edits apply to the next
//! request.
//!
//! ## Features
//!
//! - **Native TIFF parsing**: Aperio SVS and pyramidal TIFF with JPEG tiles,
//!   read by byte range
//! - **Deep-zoom mapping**: viewer levels mapped onto the native pyramid
//! - **Custom transforms**: sandboxed `rhai` scripts, reloaded per request
//! - **Segmentation overlays**: nuclei centroids and contours per slide
//! - **Nuclei detection**: background job with progress polling
//!
//! ## Architecture
//!
//! - [`io`] - Range reads over local files
//! - [`mod@format`] - TIFF/SVS parsing and JPEG handling
//! - [`slide`] - Slide abstraction and the current slide
//! - [`tile`] - Level mapping, extraction, caching, post-processing
//! - [`script`] - The custom transform engine and registry
//! - [`overlay`] - Segmentation storage and queries
//! - [`upload`] - Upload directory management
//! - [`jobs`] - Background nuclei detection
//! - [`server`] - Axum-based HTTP server and routes
//! - [`config`] - CLI and configuration types

pub mod config;
pub mod error;
pub mod format;
pub mod io;
pub mod jobs;
pub mod overlay;
pub mod script;
pub mod server;
pub mod slide;
pub mod tile;
pub mod upload;

// Re-export commonly used types
pub use config::Config;
pub use error::{
    FormatError, IoError, JobError, OverlayError, ScriptError, SlideError, TiffError, TileError,
    UploadError,
};
pub use format::tiff::{
    ByteOrder, Compression, FieldType, Ifd, IfdEntry, PyramidLevel, TiffHeader, TiffPyramid,
    TiffTag, TileData, ValueReader, BIGTIFF_HEADER_SIZE, TIFF_HEADER_SIZE,
};
pub use format::{is_tiff_header, SlideFormat};
pub use io::{LocalFileReader, RangeReader};
pub use jobs::{DetectionParams, JobRunner, JobState, JobTracker};
pub use overlay::{Overlay, OverlayType, SegmentationSet, SegmentationStore};
pub use script::{CompiledTransform, TransformRegistry};
pub use server::{create_router, AppState, ErrorResponse, RouterConfig};
pub use slide::{open_local_slide, LoadedSlide, Slide, SlideSession, TiffSlide};
pub use tile::{
    map_tile, JpegTileEncoder, LevelMapping, NativeRegion, PostProcess, PostProcessPipeline,
    TileCache, TileRequest, TileResponse, TileService, DEFAULT_JPEG_QUALITY, DEFAULT_TILE_SIZE,
};
pub use upload::{secure_filename, SlideStore};
