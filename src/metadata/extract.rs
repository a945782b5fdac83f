//! Per-segment metadata extraction.
//!
//! [`extract`] turns the payload of one metadata segment into a
//! [`MetadataMap`]; [`merge`] folds the per-segment results into the
//! document returned to callers.
//!
//! | Kind | Output |
//! |------|--------|
//! | Exif | IFD0 tags at top level, nested `ExifIFD`, `GPSInfo`, `Thumbnail` |
//! | XMP | `XMP` packet text |
//! | Extended XMP | `XMPExtension` GUID |
//! | ICC / iCCP | `ICCProfile` header directory |
//! | COM | `Comment` |
//! | tEXt / zTXt / iTXt | keyword to text |
//! | tIME | `ModifyDate` |
//! | Photoshop, MPF, JFXX, APPn | opaque bytes under the kind name |
//! | Trailer | nothing |
//!
//! Only Exif structure violations fail extraction. Every other anomaly
//! degrades to an opaque value plus a warning.

use super::model::{Extraction, MetadataKind, MetadataMap, MetadataSegment, MetadataValue};
use super::tiff;
use crate::constants::MAX_INFLATED_TEXT;
use crate::container::jpeg::{EXIF_ID, ICC_ID, XMP_EXTENSION_ID, XMP_ID};
use crate::error::Result;
use flate2::read::ZlibDecoder;
use std::io::Read;

/// Length of an ICC profile header.
const ICC_HEADER_LEN: usize = 128;

/// Longest PNG keyword, excluding its terminator.
const PNG_KEYWORD_MAX: usize = 79;

/// Decodes the payload of one metadata segment.
///
/// `payload` holds the bytes of `segment.segment.payload`: the JPEG segment
/// body after the length field, or the PNG chunk data without its CRC.
///
/// ## Errors
///
/// [`Error::MalformedMetadata`](crate::Error::MalformedMetadata) when an Exif
/// block violates its own offset or size bounds.
pub fn extract(segment: &MetadataSegment, payload: &[u8]) -> Result<Extraction> {
    let mut out = Extraction::default();
    let kind = segment.kind;

    match kind {
        MetadataKind::Exif => {
            let block = match payload.strip_prefix(EXIF_ID) {
                // "Exif\0" is followed by one pad byte.
                Some(rest) => rest.get(1..).unwrap_or_default(),
                None => payload,
            };
            return tiff::parse(block, &describe(segment));
        }
        MetadataKind::Xmp => {
            let packet = payload.strip_prefix(XMP_ID).unwrap_or(payload);
            let value = text_or_bytes(trim_nul(packet), "XMP", &mut out.warnings);
            out.entries.insert_first("XMP", value);
        }
        MetadataKind::XmpExtension => {
            let body = payload.strip_prefix(XMP_EXTENSION_ID).unwrap_or(payload);
            let value = match body.get(..32) {
                Some(guid) if guid.iter().all(u8::is_ascii_alphanumeric) => {
                    MetadataValue::Text(String::from_utf8_lossy(guid).into_owned())
                }
                _ => {
                    out.warnings
                        .push("XMPExtension without a valid GUID".to_string());
                    MetadataValue::Bytes(body.to_vec())
                }
            };
            out.entries.insert_first("XMPExtension", value);
        }
        MetadataKind::Icc => {
            let body = payload.strip_prefix(ICC_ID).unwrap_or(payload);
            match body {
                [1, _, profile @ ..] => match icc_header(profile) {
                    Some(header) => {
                        out.entries
                            .insert_first(kind.name(), MetadataValue::Directory(header));
                    }
                    None => {
                        out.warnings
                            .push("ICC profile header truncated".to_string());
                        out.entries
                            .insert_first(kind.name(), MetadataValue::Bytes(profile.to_vec()));
                    }
                },
                // Continuation chunks carry no header.
                [_, _, ..] => {}
                _ => out
                    .warnings
                    .push("ICC chunk without sequence numbers".to_string()),
            }
        }
        MetadataKind::CompressedIcc => compressed_icc(payload, &mut out),
        MetadataKind::Comment => {
            let value = text_or_bytes(trim_nul(payload), "Comment", &mut out.warnings);
            out.entries.insert_first("Comment", value);
        }
        MetadataKind::Text => png_text(payload, &mut out),
        MetadataKind::CompressedText => png_compressed_text(payload, &mut out),
        MetadataKind::InternationalText => png_international_text(payload, &mut out),
        MetadataKind::Time => match payload {
            [y0, y1, month, day, hour, minute, second] => {
                let year = u16::from_be_bytes([*y0, *y1]);
                out.entries.insert_first(
                    "ModifyDate",
                    MetadataValue::Text(format!(
                        "{:04}:{:02}:{:02} {:02}:{:02}:{:02}",
                        year, month, day, hour, minute, second
                    )),
                );
            }
            _ => {
                out.warnings
                    .push(format!("tIME chunk is {} bytes, expected 7", payload.len()));
                out.entries
                    .insert_first(kind.name(), MetadataValue::Bytes(payload.to_vec()));
            }
        },
        MetadataKind::Photoshop
        | MetadataKind::Mpf
        | MetadataKind::Jfxx
        | MetadataKind::Application(_) => {
            out.entries
                .insert_first(kind.name(), MetadataValue::Bytes(payload.to_vec()));
        }
        MetadataKind::Trailer => {}
    }

    Ok(out)
}

/// Folds per-segment extractions, in source order, into one document.
///
/// The first occurrence of a tag wins; later duplicates become warnings.
pub fn merge(extractions: impl IntoIterator<Item = Extraction>) -> Extraction {
    let mut merged = Extraction::default();
    for extraction in extractions {
        merged.warnings.extend(extraction.warnings);
        for duplicate in merged.entries.merge_first(extraction.entries) {
            merged
                .warnings
                .push(format!("duplicate tag {} ignored", duplicate));
        }
    }
    merged
}

/// Names a segment in error messages.
pub fn describe(segment: &MetadataSegment) -> String {
    format!(
        "{} segment {} at offset {}",
        segment.kind.name(),
        segment.segment.label,
        segment.segment.range.start
    )
}

fn trim_nul(bytes: &[u8]) -> &[u8] {
    let end = bytes.iter().rposition(|&b| b != 0).map_or(0, |i| i + 1);
    &bytes[..end]
}

fn text_or_bytes(bytes: &[u8], name: &str, warnings: &mut Vec<String>) -> MetadataValue {
    match std::str::from_utf8(bytes) {
        Ok(text) => MetadataValue::Text(text.to_string()),
        Err(_) => {
            warnings.push(format!("{} is not valid UTF-8, kept as raw bytes", name));
            MetadataValue::Bytes(bytes.to_vec())
        }
    }
}

/// PNG text outside `iTXt` is ISO 8859-1, which maps byte for char.
fn latin1(bytes: &[u8]) -> String {
    bytes.iter().map(|&b| b as char).collect()
}

/// Inflates a zlib stream, refusing output beyond `limit` bytes.
fn inflate(data: &[u8], limit: u64) -> std::result::Result<Vec<u8>, String> {
    let mut out = Vec::new();
    ZlibDecoder::new(data)
        .take(limit + 1)
        .read_to_end(&mut out)
        .map_err(|e| e.to_string())?;
    if out.len() as u64 > limit {
        return Err(format!("inflates past {} bytes", limit));
    }
    Ok(out)
}

/// Splits `keyword\0rest`.
fn split_keyword(payload: &[u8]) -> Option<(String, &[u8])> {
    let nul = payload.iter().position(|&b| b == 0)?;
    if nul == 0 || nul > PNG_KEYWORD_MAX {
        return None;
    }
    Some((latin1(&payload[..nul]), &payload[nul + 1..]))
}

fn opaque_chunk(kind: MetadataKind, payload: &[u8], reason: String, out: &mut Extraction) {
    out.warnings.push(reason);
    out.entries
        .insert_first(kind.name(), MetadataValue::Bytes(payload.to_vec()));
}

fn insert_keyword(out: &mut Extraction, keyword: String, value: MetadataValue) {
    if !out.entries.insert_first(keyword.as_str(), value) {
        out.warnings
            .push(format!("duplicate keyword {} ignored", keyword));
    }
}

fn png_text(payload: &[u8], out: &mut Extraction) {
    match split_keyword(payload) {
        Some((keyword, text)) => insert_keyword(out, keyword, MetadataValue::Text(latin1(text))),
        None => opaque_chunk(
            MetadataKind::Text,
            payload,
            "tEXt chunk without a valid keyword".to_string(),
            out,
        ),
    }
}

fn png_compressed_text(payload: &[u8], out: &mut Extraction) {
    let kind = MetadataKind::CompressedText;
    let Some((keyword, rest)) = split_keyword(payload) else {
        return opaque_chunk(kind, payload, "zTXt chunk without a valid keyword".to_string(), out);
    };
    match rest {
        [0, compressed @ ..] => match inflate(compressed, MAX_INFLATED_TEXT) {
            Ok(text) => insert_keyword(out, keyword, MetadataValue::Text(latin1(&text))),
            Err(e) => opaque_chunk(kind, payload, format!("zTXt {}: {}", keyword, e), out),
        },
        _ => opaque_chunk(
            kind,
            payload,
            format!("zTXt {} uses an unknown compression method", keyword),
            out,
        ),
    }
}

fn png_international_text(payload: &[u8], out: &mut Extraction) {
    let kind = MetadataKind::InternationalText;
    let Some((keyword, rest)) = split_keyword(payload) else {
        return opaque_chunk(kind, payload, "iTXt chunk without a valid keyword".to_string(), out);
    };
    let [flag, method, rest @ ..] = rest else {
        return opaque_chunk(kind, payload, format!("iTXt {} is truncated", keyword), out);
    };

    // language tag and translated keyword, each NUL terminated
    let mut fields = rest.splitn(3, |&b| b == 0);
    let (Some(_language), Some(_translated), Some(text)) =
        (fields.next(), fields.next(), fields.next())
    else {
        return opaque_chunk(kind, payload, format!("iTXt {} is truncated", keyword), out);
    };

    let text = match (*flag, *method) {
        (0, _) => text.to_vec(),
        (1, 0) => match inflate(text, MAX_INFLATED_TEXT) {
            Ok(text) => text,
            Err(e) => return opaque_chunk(kind, payload, format!("iTXt {}: {}", keyword, e), out),
        },
        _ => {
            return opaque_chunk(
                kind,
                payload,
                format!("iTXt {} uses an unknown compression method", keyword),
                out,
            );
        }
    };

    let value = text_or_bytes(&text, &keyword, &mut out.warnings);
    insert_keyword(out, keyword, value);
}

fn compressed_icc(payload: &[u8], out: &mut Extraction) {
    let kind = MetadataKind::CompressedIcc;
    let Some((name, rest)) = split_keyword(payload) else {
        return opaque_chunk(kind, payload, "iCCP chunk without a profile name".to_string(), out);
    };
    let [0, compressed @ ..] = rest else {
        return opaque_chunk(
            kind,
            payload,
            "iCCP uses an unknown compression method".to_string(),
            out,
        );
    };

    // Only the header is needed, so inflate no further than that.
    let mut header = Vec::with_capacity(ICC_HEADER_LEN);
    let inflated = ZlibDecoder::new(compressed)
        .take(ICC_HEADER_LEN as u64)
        .read_to_end(&mut header);

    match inflated.ok().and_then(|_| icc_header(&header)) {
        Some(directory) => {
            let mut named = MetadataMap::new();
            named.insert_first("ProfileName", MetadataValue::Text(name));
            named.merge_first(directory);
            out.entries
                .insert_first(kind.name(), MetadataValue::Directory(named));
        }
        None => opaque_chunk(kind, payload, "iCCP profile header unreadable".to_string(), out),
    }
}

/// Decodes the fixed fields at the start of an ICC profile header.
fn icc_header(profile: &[u8]) -> Option<MetadataMap> {
    let header = profile.get(..24)?;
    let signature = |at: usize| {
        let raw = &header[at..at + 4];
        if raw.iter().all(|&b| b == 0 || b.is_ascii_graphic() || b == b' ') {
            MetadataValue::Text(latin1(trim_nul(raw)).trim_end().to_string())
        } else {
            MetadataValue::Bytes(raw.to_vec())
        }
    };

    let mut map = MetadataMap::new();
    map.insert_first(
        "ProfileSize",
        MetadataValue::Integer(u32::from_be_bytes([header[0], header[1], header[2], header[3]]) as i64),
    );
    map.insert_first("PreferredCMM", signature(4));
    map.insert_first(
        "Version",
        MetadataValue::Text(format!(
            "{}.{}.{}",
            header[8],
            header[9] >> 4,
            header[9] & 0x0F
        )),
    );
    map.insert_first("ProfileClass", signature(12));
    map.insert_first("ColorSpace", signature(16));
    map.insert_first("ConnectionSpace", signature(20));
    Some(map)
}
