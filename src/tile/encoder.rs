//! JPEG tile encoder.
//!
//! Every served tile is normalised to 3-channel RGB and encoded as baseline
//! JPEG. The viewer only ever sees JPEG, whatever the transform stages
//! produced.

use bytes::Bytes;
use image::codecs::jpeg::JpegEncoder;
use image::RgbImage;

use crate::error::TileError;

/// Default JPEG quality (1-100).
pub const DEFAULT_JPEG_QUALITY: u8 = 70;

pub const MIN_JPEG_QUALITY: u8 = 1;
pub const MAX_JPEG_QUALITY: u8 = 100;

/// JPEG encoder for finished tiles.
#[derive(Debug, Clone, Copy)]
pub struct JpegTileEncoder {
    quality: u8,
}

impl JpegTileEncoder {
    /// Create an encoder; quality is clamped to 1-100.
    pub fn new(quality: u8) -> Self {
        Self {
            quality: clamp_quality(quality),
        }
    }

    pub fn quality(&self) -> u8 {
        self.quality
    }

    pub fn encode(&self, tile: &RgbImage) -> Result<Bytes, TileError> {
        let mut output = Vec::with_capacity(tile.as_raw().len() / 8);
        JpegEncoder::new_with_quality(&mut output, self.quality)
            .encode_image(tile)
            .map_err(|e| TileError::EncodeError {
                message: e.to_string(),
            })?;
        Ok(Bytes::from(output))
    }
}

impl Default for JpegTileEncoder {
    fn default() -> Self {
        Self::new(DEFAULT_JPEG_QUALITY)
    }
}

#[inline]
pub fn is_valid_quality(quality: u8) -> bool {
    (MIN_JPEG_QUALITY..=MAX_JPEG_QUALITY).contains(&quality)
}

#[inline]
pub fn clamp_quality(quality: u8) -> u8 {
    quality.clamp(MIN_JPEG_QUALITY, MAX_JPEG_QUALITY)
}
