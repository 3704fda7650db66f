//! Format-agnostic slide access.
//!
//! [`Slide`] is the only view the tile pipeline has of an open slide: the
//! per-level dimensions and a region read. [`TiffSlide`] implements it for
//! tiled JPEG pyramids (Aperio SVS and generic pyramidal TIFF) on top of any
//! [`RangeReader`].

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use image::{imageops, ImageFormat, RgbImage};
use tracing::debug;

use crate::error::{SlideError, TiffError};
use crate::format::jpeg::prepare_tile_jpeg;
use crate::format::tiff::{compression_name, Compression, PyramidLevel, TiffPyramid, TileData};
use crate::format::{ensure_tiff, SlideFormat};
use crate::io::{LocalFileReader, RangeReader};

/// Largest region, in pixels, a single read may allocate (about 768 MiB of RGB).
const MAX_REGION_PIXELS: u64 = 1 << 28;

// =============================================================================
// Slide Trait
// =============================================================================

/// An open slide.
///
/// Level 0 is the full-resolution image. Dimensions never grow as the level
/// index increases.
#[async_trait]
pub trait Slide: Send + Sync {
    fn format(&self) -> SlideFormat;

    /// `(width, height)` of every native level, level 0 first.
    fn level_dimensions(&self) -> &[(u32, u32)];

    fn level_count(&self) -> usize {
        self.level_dimensions().len()
    }

    /// Dimensions of level 0.
    fn dimensions(&self) -> Option<(u32, u32)> {
        self.level_dimensions().first().copied()
    }

    /// Read a `size` rectangle of `level` pixels whose top-left corner is
    /// `origin` in level-0 coordinates.
    ///
    /// Parts of the rectangle past the level edge are black. An origin
    /// outside the level is an error.
    async fn read_region(
        &self,
        level: usize,
        origin: (u64, u64),
        size: (u32, u32),
    ) -> Result<RgbImage, SlideError>;
}

/// Open a slide file from local storage.
pub async fn open_local_slide(path: impl AsRef<Path>) -> Result<Arc<dyn Slide>, SlideError> {
    let reader = LocalFileReader::open(path).await?;
    let slide = TiffSlide::open(reader).await?;
    Ok(Arc::new(slide))
}

// =============================================================================
// TiffSlide
// =============================================================================

/// A pyramidal TIFF slide with JPEG tiles.
pub struct TiffSlide<R: RangeReader + 'static> {
    reader: Arc<R>,
    format: SlideFormat,
    levels: Vec<PyramidLevel>,
    tile_data: Vec<Arc<TileData>>,
    dimensions: Vec<(u32, u32)>,
}

impl<R: RangeReader + 'static> TiffSlide<R> {
    /// Parse the pyramid and load every level's tile index.
    pub async fn open(reader: R) -> Result<Self, SlideError> {
        let magic_len = 8.min(reader.size() as usize);
        ensure_tiff(&reader.read_exact_at(0, magic_len).await?)?;

        let pyramid = TiffPyramid::parse(&reader).await?;
        let format = SlideFormat::from_description(pyramid.description.as_deref());

        let mut tile_data = Vec::with_capacity(pyramid.level_count());
        for level in &pyramid.levels {
            if Compression::from_u16(level.compression) != Some(Compression::Jpeg) {
                let name = compression_name(level.compression);
                return Err(TiffError::UnsupportedCompression(name).into());
            }
            tile_data.push(Arc::new(TileData::load(&reader, level, &pyramid.header).await?));
        }

        let dimensions = pyramid.levels.iter().map(|l| (l.width, l.height)).collect();

        debug!(
            source = reader.identifier(),
            format = format.name(),
            levels = pyramid.level_count(),
            "Opened slide"
        );

        Ok(TiffSlide {
            reader: Arc::new(reader),
            format,
            levels: pyramid.levels,
            tile_data,
            dimensions,
        })
    }

    async fn read_tile(&self, level: usize, tile_x: u32, tile_y: u32) -> Result<Bytes, SlideError> {
        let info = &self.levels[level];
        let location = info
            .tile_index(tile_x, tile_y)
            .and_then(|idx| self.tile_data[level].get_tile_location(idx));

        match location {
            Some((offset, len)) => Ok(self.reader.read_exact_at(offset, len as usize).await?),
            None => Err(SlideError::Decode {
                message: format!("tile ({}, {}) missing from level {}", tile_x, tile_y, level),
            }),
        }
    }
}

#[async_trait]
impl<R: RangeReader + 'static> Slide for TiffSlide<R> {
    fn format(&self) -> SlideFormat {
        self.format
    }

    fn level_dimensions(&self) -> &[(u32, u32)] {
        &self.dimensions
    }

    async fn read_region(
        &self,
        level: usize,
        origin: (u64, u64),
        size: (u32, u32),
    ) -> Result<RgbImage, SlideError> {
        let info = self.levels.get(level).ok_or(SlideError::InvalidLevel {
            level,
            level_count: self.levels.len(),
        })?;
        let (width, height) = size;

        if width as u64 * height as u64 > MAX_REGION_PIXELS {
            return Err(SlideError::Decode {
                message: format!("region of {}x{} pixels is too large", width, height),
            });
        }

        // Level-0 origin to level pixels
        let x0 = (origin.0 as f64 / info.downsample) as u64;
        let y0 = (origin.1 as f64 / info.downsample) as u64;
        if x0 >= info.width as u64 || y0 >= info.height as u64 {
            return Err(SlideError::RegionOutOfBounds {
                level,
                x: origin.0,
                y: origin.1,
                width: info.width,
                height: info.height,
            });
        }

        let tw = info.tile_width as u64;
        let th = info.tile_height as u64;
        let x_end = (x0 + width as u64).min(info.width as u64);
        let y_end = (y0 + height as u64).min(info.height as u64);

        let mut tiles = Vec::new();
        for ty in (y0 / th)..y_end.div_ceil(th) {
            for tx in (x0 / tw)..x_end.div_ceil(tw) {
                let data = self.read_tile(level, tx as u32, ty as u32).await?;
                tiles.push((tx, ty, data));
            }
        }

        let tables = self.tile_data[level].jpeg_tables.clone();
        let (level_width, level_height) = (info.width as u64, info.height as u64);

        tokio::task::spawn_blocking(move || {
            let mut canvas = RgbImage::new(width, height);
            for (tx, ty, data) in tiles {
                let jpeg = prepare_tile_jpeg(tables.as_deref(), &data);
                let decoded = image::load_from_memory_with_format(&jpeg, ImageFormat::Jpeg)
                    .map_err(|e| SlideError::Decode {
                        message: e.to_string(),
                    })?
                    .to_rgb8();

                // Edge tiles are padded to the full tile size; keep only
                // pixels inside the level.
                let visible_w = (level_width - tx * tw).min(tw).min(decoded.width() as u64);
                let visible_h = (level_height - ty * th).min(th).min(decoded.height() as u64);
                let visible =
                    imageops::crop_imm(&decoded, 0, 0, visible_w as u32, visible_h as u32).to_image();

                let dx = (tx * tw) as i64 - x0 as i64;
                let dy = (ty * th) as i64 - y0 as i64;
                imageops::replace(&mut canvas, &visible, dx, dy);
            }
            Ok(canvas)
        })
        .await
        .map_err(|e| SlideError::Decode {
            message: format!("decode worker failed: {}", e),
        })?
    }
}
