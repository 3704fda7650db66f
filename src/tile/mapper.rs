//! Viewer pyramid to native pyramid coordinate mapping.
//!
//! The deep-zoom viewer numbers its levels from the coarsest (0) upward,
//! while native slide levels are numbered from full resolution (0) downward.
//! A viewer tile `(level, col, row)` maps to a rectangle on one native level:
//!
//! ```text
//! native = L - d - 1
//! native <  0  →  overflow = -native, adjust = 2^(d - 2*overflow), native = 0
//! native >= 0  →  adjust = 2^d
//! zoom   = width(0) / width(native)
//! origin = (trunc(col*S*zoom*adjust), trunc(row*S*zoom*adjust))   level-0 pixels
//! size   = S * adjust                                             native pixels
//! ```
//!
//! Note the overflow exponent subtracts the overflow twice.

use crate::error::TileError;

/// A rectangle to read from one native level.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NativeRegion {
    pub native_level: usize,

    /// Top-left corner in level-0 pixel coordinates
    pub origin_x: u64,
    pub origin_y: u64,

    /// Size in pixels of the native level
    pub read_width: u32,
    pub read_height: u32,
}

/// Result of mapping a viewer tile.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LevelMapping {
    pub region: NativeRegion,
    pub adjust_ratio: f64,
    pub zoom_ratio: f64,
}

/// Map viewer tile `(viewer_level, col, row)` onto the native pyramid.
///
/// `level_dims` lists `(width, height)` of each native level, level 0 first.
///
/// # Errors
///
/// - [`TileError::LevelOutOfRange`] when the slide has no levels or the
///   computed native level is past the pyramid
/// - [`TileError::InvalidTileSize`] for a zero tile size
pub fn map_tile(
    level_dims: &[(u32, u32)],
    viewer_level: u32,
    col: u32,
    row: u32,
    tile_size: u32,
) -> Result<LevelMapping, TileError> {
    if tile_size == 0 {
        return Err(TileError::InvalidTileSize(tile_size));
    }

    let level_count = level_dims.len();
    let d = viewer_level as i64;
    let mut native = level_count as i64 - d - 1;

    if level_count == 0 || native >= level_count as i64 {
        return Err(TileError::LevelOutOfRange {
            level: native,
            level_count,
        });
    }

    let adjust_ratio = if native < 0 {
        let overflow = -native;
        native = 0;
        pow2(d - 2 * overflow)
    } else {
        pow2(d)
    };
    let native = native as usize;

    let base_width = level_dims[0].0 as f64;
    let native_width = level_dims[native].0.max(1) as f64;
    let zoom_ratio = base_width / native_width;

    let scale = tile_size as f64 * zoom_ratio * adjust_ratio;
    let read_size = (tile_size as f64 * adjust_ratio).min(u32::MAX as f64) as u32;

    Ok(LevelMapping {
        region: NativeRegion {
            native_level: native,
            origin_x: (col as f64 * scale) as u64,
            origin_y: (row as f64 * scale) as u64,
            read_width: read_size.max(1),
            read_height: read_size.max(1),
        },
        adjust_ratio,
        zoom_ratio,
    })
}

/// `2^exp` for any integer exponent; large magnitudes saturate.
fn pow2(exp: i64) -> f64 {
    2f64.powi(exp.clamp(i32::MIN as i64, i32::MAX as i64) as i32)
}
