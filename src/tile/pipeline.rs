//! Post-processing applied to every extracted tile.
//!
//! ```text
//! extracted tile ─► PostProcess (level-aware) ─► custom transform ─► RGB JPEG
//! ```
//!
//! A failure at any stage fails the tile; the untransformed tile is never
//! returned in its place.

use std::sync::Arc;

use bytes::Bytes;
use image::RgbImage;

use crate::error::TileError;
use crate::script::CompiledTransform;

use super::encoder::JpegTileEncoder;

/// Fixed stage that runs before the custom transform.
///
/// Implementations receive the native level the tile was read from.
pub trait PostProcess: Send + Sync {
    fn apply(&self, tile: RgbImage, native_level: usize) -> Result<RgbImage, TileError>;
}

/// Default fixed stage: returns the tile unchanged.
#[derive(Debug, Clone, Copy, Default)]
pub struct IdentityPostProcess;

impl PostProcess for IdentityPostProcess {
    fn apply(&self, tile: RgbImage, _native_level: usize) -> Result<RgbImage, TileError> {
        Ok(tile)
    }
}

/// The fixed stage, optional custom transform and encoder, in that order.
#[derive(Clone)]
pub struct PostProcessPipeline {
    fixed: Arc<dyn PostProcess>,
    encoder: JpegTileEncoder,
}

impl PostProcessPipeline {
    pub fn new(fixed: Arc<dyn PostProcess>, encoder: JpegTileEncoder) -> Self {
        Self { fixed, encoder }
    }

    /// Run both transform stages; the result is what gets encoded.
    pub fn transform(
        &self,
        tile: RgbImage,
        native_level: usize,
        custom: Option<&CompiledTransform>,
    ) -> Result<RgbImage, TileError> {
        let tile = self.fixed.apply(tile, native_level)?;
        match custom {
            Some(transform) => Ok(transform.apply(tile)?),
            None => Ok(tile),
        }
    }

    /// Transform and encode. Blocking; run it off the async executor.
    pub fn run(
        &self,
        tile: RgbImage,
        native_level: usize,
        custom: Option<&CompiledTransform>,
    ) -> Result<Bytes, TileError> {
        let tile = self.transform(tile, native_level, custom)?;
        self.encoder.encode(&tile)
    }
}

impl Default for PostProcessPipeline {
    fn default() -> Self {
        Self::new(Arc::new(IdentityPostProcess), JpegTileEncoder::default())
    }
}
