//! Pyramid level identification.
//!
//! A slide file holds several IFDs: the resolution pyramid plus, for most
//! vendors, a label, a macro overview and a thumbnail. Pyramid levels are
//! the tiled IFDs whose sizes form a power-of-two downsample chain from the
//! largest one. Labels, macros and thumbnails are strip-organised in SVS
//! files and fall out at the first step.

use bytes::Bytes;

use crate::error::TiffError;
use crate::io::RangeReader;

use super::parser::{Ifd, IfdEntry, TiffHeader, BIGTIFF_HEADER_SIZE};
use super::tags::TiffTag;
use super::values::ValueReader;

/// Upper bound on the IFD chain length; also stops offset cycles.
const MAX_IFDS: usize = 100;

// =============================================================================
// PyramidLevel
// =============================================================================

/// A single level in the image pyramid.
#[derive(Debug, Clone)]
pub struct PyramidLevel {
    /// Index in the pyramid (0 = highest resolution)
    pub level_index: usize,

    /// Index of the IFD in the file's chain
    pub ifd_index: usize,

    pub width: u32,
    pub height: u32,
    pub tile_width: u32,
    pub tile_height: u32,
    pub tiles_x: u32,
    pub tiles_y: u32,

    /// Downsample factor relative to level 0
    pub downsample: f64,

    /// Raw compression value (7 = JPEG)
    pub compression: u16,

    pub tile_offsets_entry: Option<IfdEntry>,
    pub tile_byte_counts_entry: Option<IfdEntry>,
    pub jpeg_tables_entry: Option<IfdEntry>,
}

impl PyramidLevel {
    /// Build a level from an IFD; `None` if the IFD is not tiled.
    fn from_ifd(ifd: &Ifd, ifd_index: usize, header: &TiffHeader) -> Option<Self> {
        let byte_order = header.byte_order;
        let tile_width = ifd.tile_width(byte_order).filter(|w| *w > 0)?;
        let tile_height = ifd.tile_height(byte_order).filter(|h| *h > 0)?;
        let width = ifd.image_width(byte_order).filter(|w| *w > 0)?;
        let height = ifd.image_height(byte_order).filter(|h| *h > 0)?;

        Some(PyramidLevel {
            level_index: 0,
            ifd_index,
            width,
            height,
            tile_width,
            tile_height,
            tiles_x: width.div_ceil(tile_width),
            tiles_y: height.div_ceil(tile_height),
            downsample: 1.0,
            compression: ifd.compression(byte_order).unwrap_or(1),
            tile_offsets_entry: ifd.get_entry_by_tag(TiffTag::TileOffsets).cloned(),
            tile_byte_counts_entry: ifd.get_entry_by_tag(TiffTag::TileByteCounts).cloned(),
            jpeg_tables_entry: ifd.get_entry_by_tag(TiffTag::JpegTables).cloned(),
        })
    }

    pub fn has_tile_data(&self) -> bool {
        self.tile_offsets_entry.is_some() && self.tile_byte_counts_entry.is_some()
    }

    pub fn tile_count(&self) -> u32 {
        self.tiles_x * self.tiles_y
    }

    /// Row-major index of a tile, `None` when out of bounds.
    pub fn tile_index(&self, tile_x: u32, tile_y: u32) -> Option<u32> {
        if tile_x >= self.tiles_x || tile_y >= self.tiles_y {
            return None;
        }
        Some(tile_y * self.tiles_x + tile_x)
    }
}

// =============================================================================
// TiffPyramid
// =============================================================================

/// A parsed TIFF image pyramid, sorted so that level 0 is the largest.
#[derive(Debug, Clone)]
pub struct TiffPyramid {
    pub header: TiffHeader,
    pub levels: Vec<PyramidLevel>,

    /// ImageDescription of the first IFD, if any
    pub description: Option<String>,
}

impl TiffPyramid {
    /// Parse the header and IFD chain and identify the pyramid levels.
    pub async fn parse<R: RangeReader + ?Sized>(reader: &R) -> Result<Self, TiffError> {
        let header_len = BIGTIFF_HEADER_SIZE.min(reader.size() as usize);
        let header_bytes = reader.read_exact_at(0, header_len).await?;
        let header = TiffHeader::parse(&header_bytes, reader.size())?;

        let ifds = Self::parse_all_ifds(reader, &header).await?;

        let description = match ifds
            .first()
            .and_then(|ifd| ifd.get_entry_by_tag(TiffTag::ImageDescription))
        {
            Some(entry) => Some(ValueReader::new(reader, &header).read_ascii(entry).await?),
            None => None,
        };

        let levels = Self::build_levels(&ifds, &header);
        if levels.is_empty() {
            return Err(TiffError::NoPyramidLevels);
        }

        Ok(TiffPyramid {
            header,
            levels,
            description,
        })
    }

    async fn parse_all_ifds<R: RangeReader + ?Sized>(
        reader: &R,
        header: &TiffHeader,
    ) -> Result<Vec<Ifd>, TiffError> {
        let mut ifds = Vec::new();
        let mut offset = header.first_ifd_offset;

        while offset != 0 && ifds.len() < MAX_IFDS {
            if offset >= reader.size() {
                return Err(TiffError::InvalidIfdOffset(offset));
            }

            let count_bytes = reader.read_exact_at(offset, header.ifd_count_size()).await?;
            let entry_count = if header.is_bigtiff {
                header.byte_order.read_u64(&count_bytes)
            } else {
                header.byte_order.read_u16(&count_bytes) as u64
            };

            let ifd_size = Ifd::calculate_size(entry_count, header);
            let ifd_bytes = reader.read_exact_at(offset, ifd_size).await?;
            let ifd = Ifd::parse(&ifd_bytes, header)?;

            offset = ifd.next_ifd_offset;
            ifds.push(ifd);
        }

        Ok(ifds)
    }

    /// Keep tiled IFDs that form a power-of-two chain from the largest one.
    fn build_levels(ifds: &[Ifd], header: &TiffHeader) -> Vec<PyramidLevel> {
        let mut candidates: Vec<PyramidLevel> = ifds
            .iter()
            .enumerate()
            .filter_map(|(idx, ifd)| PyramidLevel::from_ifd(ifd, idx, header))
            .filter(|level| level.has_tile_data())
            .collect();

        candidates.sort_by_key(|l| std::cmp::Reverse(l.width as u64 * l.height as u64));

        let Some(base) = candidates.first() else {
            return Vec::new();
        };
        let base_width = base.width as f64;
        let base_height = base.height as f64;

        let mut levels: Vec<PyramidLevel> = Vec::new();
        for mut level in candidates {
            let downsample =
                (base_width / level.width as f64 + base_height / level.height as f64) / 2.0;

            let duplicate = levels
                .last()
                .is_some_and(|prev| prev.width == level.width && prev.height == level.height);

            if !duplicate && Self::is_valid_downsample(downsample, levels.len()) {
                level.level_index = levels.len();
                level.downsample = downsample;
                levels.push(level);
            }
        }

        levels
    }

    /// Level 0 must be ~1.0; later levels must be close to a power of two.
    fn is_valid_downsample(downsample: f64, level_idx: usize) -> bool {
        if level_idx == 0 {
            return (downsample - 1.0).abs() < 0.1;
        }

        let rounded = downsample.log2().round();
        if rounded < 1.0 {
            return false;
        }

        let ratio = downsample / 2.0_f64.powf(rounded);
        ratio > 0.8 && ratio < 1.2
    }

    pub fn level_count(&self) -> usize {
        self.levels.len()
    }
}

// =============================================================================
// Tile Data Loading
// =============================================================================

/// Tile locations and shared JPEG tables of one pyramid level.
#[derive(Debug, Clone)]
pub struct TileData {
    pub offsets: Vec<u64>,
    pub byte_counts: Vec<u64>,
    pub jpeg_tables: Option<Bytes>,
}

impl TileData {
    pub async fn load<R: RangeReader + ?Sized>(
        reader: &R,
        level: &PyramidLevel,
        header: &TiffHeader,
    ) -> Result<Self, TiffError> {
        let values = ValueReader::new(reader, header);

        let offsets_entry = level
            .tile_offsets_entry
            .as_ref()
            .ok_or(TiffError::MissingTag("TileOffsets"))?;
        let counts_entry = level
            .tile_byte_counts_entry
            .as_ref()
            .ok_or(TiffError::MissingTag("TileByteCounts"))?;

        let offsets = values.read_u64_array(offsets_entry).await?;
        let byte_counts = values.read_u64_array(counts_entry).await?;

        let expected = level.tile_count() as usize;
        if offsets.len() < expected || byte_counts.len() < expected {
            return Err(TiffError::InvalidTagValue {
                tag: "TileOffsets",
                message: format!(
                    "expected {} tiles, found {} offsets and {} byte counts",
                    expected,
                    offsets.len(),
                    byte_counts.len()
                ),
            });
        }

        let jpeg_tables = match level.jpeg_tables_entry {
            Some(ref entry) => Some(values.read_bytes(entry).await?),
            None => None,
        };

        Ok(TileData {
            offsets,
            byte_counts,
            jpeg_tables,
        })
    }

    /// Offset and size of a tile.
    pub fn get_tile_location(&self, tile_index: u32) -> Option<(u64, u64)> {
        let idx = tile_index as usize;
        Some((*self.offsets.get(idx)?, *self.byte_counts.get(idx)?))
    }
}
