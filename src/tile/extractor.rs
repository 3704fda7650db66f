//! Region extraction and resampling.
//!
//! A mapped region is read from its native level and resampled to exactly
//! `S x S`. Resampling always runs, even when the region is already `S`
//! wide, so every tile goes through the same filter.

use image::imageops::{self, FilterType};
use image::RgbImage;

use crate::error::TileError;
use crate::slide::Slide;

use super::mapper::NativeRegion;

/// Bicubic resampling.
const RESAMPLE_FILTER: FilterType = FilterType::CatmullRom;

/// Read `region` from `slide` and resample it to `tile_size x tile_size`.
///
/// # Errors
///
/// - [`TileError::LevelOutOfRange`] when the native level is not in the slide,
///   checked before any read
/// - [`TileError::Slide`] when the read fails (corrupt file, origin outside
///   the level, I/O error)
pub async fn extract_tile(
    slide: &dyn Slide,
    region: &NativeRegion,
    tile_size: u32,
) -> Result<RgbImage, TileError> {
    let level_count = slide.level_count();
    if region.native_level >= level_count {
        return Err(TileError::LevelOutOfRange {
            level: region.native_level as i64,
            level_count,
        });
    }

    let pixels = slide
        .read_region(
            region.native_level,
            (region.origin_x, region.origin_y),
            (region.read_width, region.read_height),
        )
        .await?;

    tokio::task::spawn_blocking(move || resample(&pixels, tile_size))
        .await
        .map_err(|e| TileError::Worker {
            message: e.to_string(),
        })
}

/// Resample to a square tile.
pub fn resample(pixels: &RgbImage, tile_size: u32) -> RgbImage {
    imageops::resize(pixels, tile_size, tile_size, RESAMPLE_FILTER)
}
