//! TIFF tag and field type vocabulary.
//!
//! Only the subset needed to locate tiled JPEG pyramid levels is modelled.
//! Unknown tags and field types are kept as raw numbers by the IFD parser
//! and ignored afterwards.

/// TIFF field types that determine how values are encoded.
///
/// The element size decides whether a value is stored inline in the IFD
/// entry or at an offset elsewhere in the file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum FieldType {
    Byte = 1,
    Ascii = 2,
    Short = 3,
    Long = 4,
    /// Two Longs (numerator, denominator)
    Rational = 5,
    Undefined = 7,
    /// BigTIFF only
    Long8 = 16,
}

impl FieldType {
    /// Size of one element of this type in bytes.
    #[inline]
    pub const fn size_in_bytes(self) -> usize {
        match self {
            FieldType::Byte | FieldType::Ascii | FieldType::Undefined => 1,
            FieldType::Short => 2,
            FieldType::Long => 4,
            FieldType::Rational | FieldType::Long8 => 8,
        }
    }

    pub fn from_u16(value: u16) -> Option<Self> {
        match value {
            1 => Some(FieldType::Byte),
            2 => Some(FieldType::Ascii),
            3 => Some(FieldType::Short),
            4 => Some(FieldType::Long),
            5 => Some(FieldType::Rational),
            7 => Some(FieldType::Undefined),
            16 => Some(FieldType::Long8),
            _ => None,
        }
    }

    /// Whether `count` elements fit in the entry's value field
    /// (4 bytes in classic TIFF, 8 in BigTIFF).
    #[inline]
    pub fn fits_inline(self, count: u64, is_bigtiff: bool) -> bool {
        let threshold = if is_bigtiff { 8 } else { 4 };
        (self.size_in_bytes() as u64).saturating_mul(count) <= threshold
    }
}

/// TIFF tag IDs the slide reader looks at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u16)]
pub enum TiffTag {
    ImageWidth = 256,
    ImageLength = 257,
    BitsPerSample = 258,
    Compression = 259,
    PhotometricInterpretation = 262,
    /// Free text; Aperio writes its vendor metadata here
    ImageDescription = 270,
    SamplesPerPixel = 277,
    TileWidth = 322,
    TileLength = 323,
    TileOffsets = 324,
    TileByteCounts = 325,
    /// Shared quantization/Huffman tables for abbreviated JPEG tiles
    JpegTables = 347,
}

impl TiffTag {
    pub fn from_u16(value: u16) -> Option<Self> {
        match value {
            256 => Some(TiffTag::ImageWidth),
            257 => Some(TiffTag::ImageLength),
            258 => Some(TiffTag::BitsPerSample),
            259 => Some(TiffTag::Compression),
            262 => Some(TiffTag::PhotometricInterpretation),
            270 => Some(TiffTag::ImageDescription),
            277 => Some(TiffTag::SamplesPerPixel),
            322 => Some(TiffTag::TileWidth),
            323 => Some(TiffTag::TileLength),
            324 => Some(TiffTag::TileOffsets),
            325 => Some(TiffTag::TileByteCounts),
            347 => Some(TiffTag::JpegTables),
            _ => None,
        }
    }

    #[inline]
    pub const fn as_u16(self) -> u16 {
        self as u16
    }
}

/// TIFF compression scheme identifiers.
///
/// Only JPEG tiles can be decoded; anything else is rejected when a slide
/// is opened.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum Compression {
    None = 1,
    Lzw = 5,
    OldJpeg = 6,
    Jpeg = 7,
    Deflate = 8,
    AdobeDeflate = 32946,
    Jpeg2000 = 33003,
}

impl Compression {
    pub fn from_u16(value: u16) -> Option<Self> {
        match value {
            1 => Some(Compression::None),
            5 => Some(Compression::Lzw),
            6 => Some(Compression::OldJpeg),
            7 => Some(Compression::Jpeg),
            8 => Some(Compression::Deflate),
            32946 => Some(Compression::AdobeDeflate),
            33003 | 33005 => Some(Compression::Jpeg2000),
            _ => None,
        }
    }

    #[inline]
    pub const fn is_supported(self) -> bool {
        matches!(self, Compression::Jpeg)
    }

    pub const fn name(self) -> &'static str {
        match self {
            Compression::None => "None",
            Compression::Lzw => "LZW",
            Compression::OldJpeg => "Old JPEG",
            Compression::Jpeg => "JPEG",
            Compression::Deflate => "Deflate",
            Compression::AdobeDeflate => "Adobe Deflate",
            Compression::Jpeg2000 => "JPEG 2000",
        }
    }
}

/// Human-readable name for a raw compression value, including unknown ones.
pub fn compression_name(value: u16) -> String {
    match Compression::from_u16(value) {
        Some(c) => c.name().to_string(),
        None => format!("unknown ({})", value),
    }
}
