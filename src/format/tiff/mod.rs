//! TIFF container parsing for pyramidal slides.
//!
//! Aperio SVS and generic pyramidal TIFF files share the same container:
//! a header, a chain of IFDs, and tiled image data. Classic TIFF and BigTIFF
//! are both handled, in either byte order. Values that do not fit inline in
//! an IFD entry are fetched through the [`RangeReader`](crate::io::RangeReader)
//! the slide was opened with.

mod parser;
mod pyramid;
mod tags;
mod values;

pub use parser::{ByteOrder, Ifd, IfdEntry, TiffHeader, BIGTIFF_HEADER_SIZE, TIFF_HEADER_SIZE};
pub use pyramid::{PyramidLevel, TiffPyramid, TileData};
pub use tags::{compression_name, Compression, FieldType, TiffTag};
pub use values::ValueReader;
