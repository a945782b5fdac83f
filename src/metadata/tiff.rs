//! TIFF directory walker for Exif blocks.
//!
//! ```text
//! "II" | "MM"   byte order
//! 00 2A         magic 42
//! OO OO OO OO   offset of IFD0
//!
//! IFD:  NN NN                         entry count
//!       TT TT YY YY CC CC CC CC VV VV VV VV   x count
//!       XX XX XX XX                   offset of the next IFD, 0 if none
//! ```
//!
//! Values of up to four bytes live inline in `VV`; larger values live at
//! the offset stored there. All offsets are relative to the TIFF header.
//!
//! ## Security
//!
//! Every offset is bounds-checked against the segment, entry counts and
//! nesting depth are capped, and each IFD offset may be visited once, so a
//! hostile block cannot loop or read outside its own bytes.

use super::model::{Extraction, MetadataMap, MetadataValue};
use super::tags::{self, Directory};
use crate::constants::{MAX_IFD_DEPTH, MAX_IFD_ENTRIES};
use crate::error::{Error, Result};
use std::collections::HashSet;

const HEADER_LEN: usize = 8;
const ENTRY_LEN: usize = 12;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ByteOrder {
    Little,
    Big,
}

impl ByteOrder {
    fn u16(self, b: &[u8]) -> u16 {
        match self {
            Self::Little => u16::from_le_bytes([b[0], b[1]]),
            Self::Big => u16::from_be_bytes([b[0], b[1]]),
        }
    }

    fn u32(self, b: &[u8]) -> u32 {
        match self {
            Self::Little => u32::from_le_bytes([b[0], b[1], b[2], b[3]]),
            Self::Big => u32::from_be_bytes([b[0], b[1], b[2], b[3]]),
        }
    }

    fn u64(self, b: &[u8]) -> u64 {
        let arr = [b[0], b[1], b[2], b[3], b[4], b[5], b[6], b[7]];
        match self {
            Self::Little => u64::from_le_bytes(arr),
            Self::Big => u64::from_be_bytes(arr),
        }
    }
}

/// Size in bytes of one value of a TIFF field type.
fn type_size(field_type: u16) -> Option<usize> {
    match field_type {
        1 | 2 | 6 | 7 => Some(1),
        3 | 8 => Some(2),
        4 | 9 | 11 | 13 => Some(4),
        5 | 10 | 12 => Some(8),
        _ => None,
    }
}

struct Walker<'a> {
    data: &'a [u8],
    order: ByteOrder,
    segment: &'a str,
    visited: HashSet<u32>,
    warnings: Vec<String>,
}

/// Parses a TIFF-structured Exif block.
///
/// IFD0 tags land at the top level; Exif, GPS and interoperability IFDs
/// become nested directories, and IFD1 becomes `Thumbnail`.
///
/// `segment` names the block in error messages.
pub(crate) fn parse(data: &[u8], segment: &str) -> Result<Extraction> {
    let mut walker = Walker {
        data,
        order: ByteOrder::Little,
        segment,
        visited: HashSet::new(),
        warnings: Vec::new(),
    };

    if data.len() < HEADER_LEN {
        return Err(walker.malformed(format!(
            "TIFF header needs {} bytes, block has {}",
            HEADER_LEN,
            data.len()
        )));
    }
    walker.order = match &data[..2] {
        b"II" => ByteOrder::Little,
        b"MM" => ByteOrder::Big,
        other => {
            return Err(walker.malformed(format!("invalid byte order {}", hex::encode(other))));
        }
    };
    let magic = walker.u16_at(2)?;
    if magic != 42 {
        return Err(walker.malformed(format!("invalid TIFF magic {}", magic)));
    }

    let ifd0 = walker.u32_at(4)?;
    let (mut entries, next) = walker.read_ifd(ifd0, Directory::Primary, 0)?;

    // IFD1 is only reachable through a next-IFD link, which many writers
    // leave dangling; a bad link costs the thumbnail, not the block.
    if next != 0 {
        match walker.read_ifd(next, Directory::Thumbnail, 1) {
            Ok((thumbnail, _)) if !thumbnail.is_empty() => {
                let name = Directory::Thumbnail.name();
                if !entries.insert_first(name, MetadataValue::Directory(thumbnail)) {
                    walker.warnings.push(format!("duplicate tag {} ignored", name));
                }
            }
            Ok(_) => {}
            Err(e) => walker.warnings.push(format!("skipped IFD1: {}", e)),
        }
    }

    Ok(Extraction {
        entries,
        warnings: walker.warnings,
    })
}

impl<'a> Walker<'a> {
    fn malformed(&self, reason: impl Into<String>) -> Error {
        Error::MalformedMetadata {
            segment: self.segment.to_string(),
            reason: reason.into(),
        }
    }

    fn slice(&self, offset: usize, len: usize) -> Result<&'a [u8]> {
        let data = self.data;
        offset
            .checked_add(len)
            .and_then(|end| data.get(offset..end))
            .ok_or_else(|| {
                self.malformed(format!(
                    "{} bytes at offset {} outside block of {} bytes",
                    len,
                    offset,
                    data.len()
                ))
            })
    }

    fn u16_at(&self, offset: usize) -> Result<u16> {
        Ok(self.order.u16(self.slice(offset, 2)?))
    }

    fn u32_at(&self, offset: usize) -> Result<u32> {
        Ok(self.order.u32(self.slice(offset, 4)?))
    }

    /// Reads one IFD and everything below it. Returns the next-IFD link.
    fn read_ifd(&mut self, offset: u32, dir: Directory, depth: usize) -> Result<(MetadataMap, u32)> {
        if depth > MAX_IFD_DEPTH {
            return Err(self.malformed(format!(
                "{} nested deeper than {} levels",
                dir.name(),
                MAX_IFD_DEPTH
            )));
        }
        if !self.visited.insert(offset) {
            return Err(self.malformed(format!(
                "{} at offset {} was already visited",
                dir.name(),
                offset
            )));
        }

        let base = offset as usize;
        let count = self.u16_at(base)? as usize;
        if count > MAX_IFD_ENTRIES {
            return Err(self.malformed(format!(
                "{} declares {} entries, limit is {}",
                dir.name(),
                count,
                MAX_IFD_ENTRIES
            )));
        }
        let table = base + 2;
        let table_end = table + count * ENTRY_LEN;
        if table_end > self.data.len() {
            return Err(self.malformed(format!(
                "{} entry table ends at {}, block is {} bytes",
                dir.name(),
                table_end,
                self.data.len()
            )));
        }
        let next = match self.u32_at(table_end) {
            Ok(next) => next,
            Err(_) => {
                self.warnings
                    .push(format!("{} has no next-IFD link", dir.name()));
                0
            }
        };

        let mut map = MetadataMap::new();
        for i in 0..count {
            let at = table + i * ENTRY_LEN;
            let tag = self.u16_at(at)?;
            let field_type = self.u16_at(at + 2)?;
            let value_count = self.u32_at(at + 4)?;
            let value_at = at + 8;

            let (key, value) = match tags::sub_directory(dir, tag) {
                Some(sub) => {
                    let sub_offset = self.u32_at(value_at)?;
                    let (sub_map, _) = self.read_ifd(sub_offset, sub, depth + 1)?;
                    (sub.name().to_string(), MetadataValue::Directory(sub_map))
                }
                None => {
                    let name = tags::tag_name(dir, tag)
                        .map(str::to_string)
                        .unwrap_or_else(|| tags::unknown_tag_name(tag));
                    let value = self.read_value(dir, tag, &name, field_type, value_count, value_at)?;
                    (name, value)
                }
            };

            if !map.insert_first(key.as_str(), value) {
                self.warnings
                    .push(format!("duplicate tag {} in {} ignored", key, dir.name()));
            }
        }

        Ok((map, next))
    }

    fn read_value(
        &mut self,
        dir: Directory,
        tag: u16,
        name: &str,
        field_type: u16,
        count: u32,
        value_at: usize,
    ) -> Result<MetadataValue> {
        let Some(size) = type_size(field_type) else {
            self.warnings.push(format!(
                "{} has unknown field type {}, kept as raw bytes",
                name, field_type
            ));
            return Ok(MetadataValue::Bytes(self.slice(value_at, 4)?.to_vec()));
        };

        let total = count as u64 * size as u64;
        let bytes = if total <= 4 {
            self.slice(value_at, total as usize)?
        } else {
            if total > self.data.len() as u64 {
                return Err(self.malformed(format!(
                    "{} declares {} bytes, block is {} bytes",
                    name,
                    total,
                    self.data.len()
                )));
            }
            let offset = self.u32_at(value_at)? as usize;
            self.slice(offset, total as usize)?
        };

        Ok(self.decode(dir, tag, name, field_type, size, bytes))
    }

    fn decode(
        &mut self,
        dir: Directory,
        tag: u16,
        name: &str,
        field_type: u16,
        size: usize,
        bytes: &[u8],
    ) -> MetadataValue {
        let order = self.order;
        let values = bytes.chunks_exact(size);
        match field_type {
            1 if tags::is_xp_text(tag) => match decode_utf16(bytes, ByteOrder::Little) {
                Some(text) => MetadataValue::Text(text),
                None => MetadataValue::Bytes(bytes.to_vec()),
            },
            1 => collect(values.map(|b| MetadataValue::Integer(b[0] as i64))),
            2 => self.ascii(name, bytes),
            3 => collect(values.map(|b| MetadataValue::Integer(order.u16(b) as i64))),
            4 | 13 => collect(values.map(|b| MetadataValue::Integer(order.u32(b) as i64))),
            5 => collect(values.map(|b| MetadataValue::Rational {
                numerator: order.u32(&b[..4]) as i64,
                denominator: order.u32(&b[4..]) as i64,
            })),
            6 => collect(values.map(|b| MetadataValue::Integer(b[0] as i8 as i64))),
            7 => self.undefined(dir, tag, name, bytes),
            8 => collect(values.map(|b| MetadataValue::Integer(order.u16(b) as i16 as i64))),
            9 => collect(values.map(|b| MetadataValue::Integer(order.u32(b) as i32 as i64))),
            10 => collect(values.map(|b| MetadataValue::Rational {
                numerator: order.u32(&b[..4]) as i32 as i64,
                denominator: order.u32(&b[4..]) as i32 as i64,
            })),
            11 => collect(values.map(|b| MetadataValue::Float(f32::from_bits(order.u32(b)) as f64))),
            12 => collect(values.map(|b| MetadataValue::Float(f64::from_bits(order.u64(b))))),
            _ => MetadataValue::Bytes(bytes.to_vec()),
        }
    }

    fn ascii(&mut self, name: &str, bytes: &[u8]) -> MetadataValue {
        let end = bytes.iter().position(|&b| b == 0).unwrap_or(bytes.len());
        match std::str::from_utf8(&bytes[..end]) {
            Ok(text) => MetadataValue::Text(text.to_string()),
            Err(_) => {
                self.warnings
                    .push(format!("{} is not valid UTF-8, kept as raw bytes", name));
                MetadataValue::Bytes(bytes.to_vec())
            }
        }
    }

    fn undefined(&mut self, dir: Directory, tag: u16, name: &str, bytes: &[u8]) -> MetadataValue {
        let is_version = match dir {
            Directory::Interop => tag == tags::INTEROP_VERSION,
            _ => tag == tags::EXIF_VERSION || tag == tags::FLASHPIX_VERSION,
        };
        if is_version && !bytes.is_empty() && bytes.iter().all(u8::is_ascii_graphic) {
            return MetadataValue::Text(String::from_utf8_lossy(bytes).into_owned());
        }
        if tag == tags::USER_COMMENT && dir == Directory::Exif {
            return self.user_comment(name, bytes);
        }
        MetadataValue::Bytes(bytes.to_vec())
    }

    /// Decodes `UserComment`: an 8-byte charset id followed by the text.
    fn user_comment(&mut self, name: &str, bytes: &[u8]) -> MetadataValue {
        if bytes.len() < 8 {
            return MetadataValue::Bytes(bytes.to_vec());
        }
        let (charset, body) = bytes.split_at(8);
        let text = match charset {
            b"ASCII\0\0\0" | b"\0\0\0\0\0\0\0\0" => std::str::from_utf8(body)
                .ok()
                .map(|s| s.trim_end_matches(['\0', ' ']).to_string()),
            b"UNICODE\0" => decode_utf16(body, self.order),
            _ => None,
        };
        match text {
            Some(text) => MetadataValue::Text(text),
            None => {
                self.warnings.push(format!(
                    "{} charset {} not decoded, kept as raw bytes",
                    name,
                    String::from_utf8_lossy(charset).trim_end_matches('\0')
                ));
                MetadataValue::Bytes(bytes.to_vec())
            }
        }
    }
}

fn collect(values: impl Iterator<Item = MetadataValue>) -> MetadataValue {
    let mut values: Vec<MetadataValue> = values.collect();
    if values.len() == 1 {
        values.remove(0)
    } else {
        MetadataValue::List(values)
    }
}

fn decode_utf16(bytes: &[u8], order: ByteOrder) -> Option<String> {
    let units = bytes.chunks_exact(2).map(|b| order.u16(b));
    char::decode_utf16(units)
        .collect::<std::result::Result<String, _>>()
        .ok()
        .map(|s| s.trim_end_matches('\0').to_string())
}
