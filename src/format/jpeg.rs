//! Abbreviated JPEG tile handling.
//!
//! Aperio stores each tile as an abbreviated JPEG stream: the scan data is
//! present but the quantization (DQT) and Huffman (DHT) tables live once per
//! level in the `JPEGTables` tag. Before a tile can be decoded the two are
//! spliced together: tables without their EOI, then the tile without its SOI.

use bytes::{Bytes, BytesMut};

pub const SOI: [u8; 2] = [0xFF, 0xD8];
pub const EOI: [u8; 2] = [0xFF, 0xD9];
pub const DHT: [u8; 2] = [0xFF, 0xC4];
pub const DQT: [u8; 2] = [0xFF, 0xDB];
pub const SOS: [u8; 2] = [0xFF, 0xDA];

/// True when the stream reaches SOS without defining any DQT or DHT.
pub fn is_abbreviated_stream(data: &[u8]) -> bool {
    if data.len() < 4 || data[0..2] != SOI {
        return false;
    }

    let mut pos = 2;
    while pos + 1 < data.len() {
        if data[pos] != 0xFF {
            pos += 1;
            continue;
        }

        let marker = [data[pos], data[pos + 1]];
        if marker == DQT || marker == DHT {
            return false;
        }
        if marker == SOS {
            return true;
        }

        // Skip the segment body using its big-endian length
        if pos + 3 < data.len() && !matches!(marker[1], 0x00 | 0xD8 | 0xD9) {
            let length = u16::from_be_bytes([data[pos + 2], data[pos + 3]]) as usize;
            pos += 2 + length;
        } else {
            pos += 2;
        }
    }

    false
}

/// True when the stream carries its own quantization tables.
pub fn is_complete_stream(data: &[u8]) -> bool {
    data.len() >= 4 && data[0..2] == SOI && data[2..].windows(2).any(|w| w == DQT)
}

/// Splice level-wide tables into an abbreviated tile.
pub fn merge_jpeg_tables(tables: &[u8], tile_data: &[u8]) -> Bytes {
    if tables.is_empty() {
        return Bytes::copy_from_slice(tile_data);
    }
    if tile_data.is_empty() {
        return Bytes::new();
    }

    let tables_end = if tables.ends_with(&EOI) {
        tables.len() - 2
    } else {
        tables.len()
    };
    let tile_start = if tile_data.starts_with(&SOI) { 2 } else { 0 };

    let mut merged = BytesMut::with_capacity(tables_end + tile_data.len() - tile_start);
    merged.extend_from_slice(&tables[..tables_end]);
    merged.extend_from_slice(&tile_data[tile_start..]);
    merged.freeze()
}

/// Return a decodable JPEG for a stored tile, merging tables when needed.
pub fn prepare_tile_jpeg(tables: Option<&[u8]>, tile_data: &[u8]) -> Bytes {
    match tables {
        Some(tables) if !is_complete_stream(tile_data) && is_abbreviated_stream(tile_data) => {
            merge_jpeg_tables(tables, tile_data)
        }
        _ => Bytes::copy_from_slice(tile_data),
    }
}
