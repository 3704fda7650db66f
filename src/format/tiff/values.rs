//! Reading tag values that live inline or elsewhere in the file.
//!
//! Array values such as TileOffsets are fetched with a single range read.

use bytes::Bytes;

use crate::error::TiffError;
use crate::io::RangeReader;

use super::parser::{IfdEntry, TiffHeader};
use super::tags::FieldType;

/// Reads tag values from a TIFF file, respecting its byte order.
pub struct ValueReader<'a, R: RangeReader + ?Sized> {
    reader: &'a R,
    header: &'a TiffHeader,
}

impl<'a, R: RangeReader + ?Sized> ValueReader<'a, R> {
    pub fn new(reader: &'a R, header: &'a TiffHeader) -> Self {
        Self { reader, header }
    }

    /// Raw bytes of an entry's value, fetched from the file when not inline.
    pub async fn read_bytes(&self, entry: &IfdEntry) -> Result<Bytes, TiffError> {
        let size = entry
            .value_byte_size()
            .ok_or(TiffError::UnknownFieldType(entry.field_type_raw))?;

        if entry.is_inline {
            return Ok(Bytes::copy_from_slice(
                &entry.value_offset_bytes[..size as usize],
            ));
        }

        let offset = entry.value_offset(self.header.byte_order);
        let len = usize::try_from(size).map_err(|_| TiffError::InvalidTagValue {
            tag: "value",
            message: format!("value of {} bytes is too large", size),
        })?;
        Ok(self.reader.read_exact_at(offset, len).await?)
    }

    /// Read a Short/Long/Long8 array as u64 values.
    pub async fn read_u64_array(&self, entry: &IfdEntry) -> Result<Vec<u64>, TiffError> {
        let field_type = entry
            .field_type
            .ok_or(TiffError::UnknownFieldType(entry.field_type_raw))?;
        if entry.count == 0 {
            return Ok(Vec::new());
        }

        let bytes = self.read_bytes(entry).await?;
        let byte_order = self.header.byte_order;
        let width = field_type.size_in_bytes();

        let values = match field_type {
            FieldType::Short => bytes
                .chunks_exact(width)
                .map(|c| byte_order.read_u16(c) as u64)
                .collect(),
            FieldType::Long => bytes
                .chunks_exact(width)
                .map(|c| byte_order.read_u32(c) as u64)
                .collect(),
            FieldType::Long8 => bytes
                .chunks_exact(width)
                .map(|c| byte_order.read_u64(c))
                .collect(),
            other => {
                return Err(TiffError::InvalidTagValue {
                    tag: "array",
                    message: format!("expected Short, Long, or Long8, got {:?}", other),
                })
            }
        };

        Ok(values)
    }

    /// Read an ASCII value, dropping the trailing NUL.
    pub async fn read_ascii(&self, entry: &IfdEntry) -> Result<String, TiffError> {
        let bytes = self.read_bytes(entry).await?;
        let text = bytes.split(|b| *b == 0).next().unwrap_or(&[]);
        Ok(String::from_utf8_lossy(text).into_owned())
    }
}
