//! Vendor classification of slide files.
//!
//! Every supported file is a tiled pyramidal TIFF; the vendor only changes
//! how tiles are stored. Aperio writes abbreviated JPEG tiles that need the
//! level's JPEGTables merged in before decoding.

use crate::error::FormatError;

use super::tiff::{ByteOrder, TIFF_HEADER_SIZE};

/// Marker Aperio writes at the start of the first ImageDescription.
const APERIO_MARKER: &str = "Aperio";

/// Detected slide format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlideFormat {
    AperioSvs,
    GenericTiff,
}

impl SlideFormat {
    /// Classify a slide from the ImageDescription of its first IFD.
    pub fn from_description(description: Option<&str>) -> Self {
        match description {
            Some(text) if text.contains(APERIO_MARKER) => SlideFormat::AperioSvs,
            _ => SlideFormat::GenericTiff,
        }
    }

    pub const fn name(&self) -> &'static str {
        match self {
            SlideFormat::AperioSvs => "Aperio SVS",
            SlideFormat::GenericTiff => "Generic Pyramidal TIFF",
        }
    }
}

/// Quick check for TIFF or BigTIFF magic before attempting a full parse.
pub fn is_tiff_header(bytes: &[u8]) -> bool {
    if bytes.len() < TIFF_HEADER_SIZE {
        return false;
    }

    let byte_order = match &bytes[0..2] {
        b"II" => ByteOrder::LittleEndian,
        b"MM" => ByteOrder::BigEndian,
        _ => return false,
    };

    matches!(byte_order.read_u16(&bytes[2..4]), 42 | 43)
}

/// Reject anything that is not a TIFF container.
pub fn ensure_tiff(bytes: &[u8]) -> Result<(), FormatError> {
    if is_tiff_header(bytes) {
        Ok(())
    } else {
        Err(FormatError::UnsupportedFormat {
            reason: "not a TIFF or BigTIFF file".to_string(),
        })
    }
}
