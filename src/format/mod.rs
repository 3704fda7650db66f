//! Slide file formats.
//!
//! Supported slides are tiled pyramidal TIFFs with JPEG tiles: Aperio SVS
//! (recognised by the "Aperio" marker in the first ImageDescription) and
//! generic pyramidal TIFF.

pub mod detect;
pub mod jpeg;
pub mod tiff;

pub use detect::{ensure_tiff, is_tiff_header, SlideFormat};
