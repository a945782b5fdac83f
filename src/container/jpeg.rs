//! JPEG segment grammar.
//!
//! ```text
//! FF D8                         SOI
//! FF xx LL LL <payload>         marker segment, LL includes itself
//! FF DA LL LL <header> <scan>   SOS; scan runs to the next real marker
//! FF D9                         EOI
//! <anything>                    trailer
//! ```
//!
//! Inside scan data `FF 00` is a stuffed byte and `FF D0`..`FF D7` are
//! restart markers; neither ends the scan. Runs of `FF` fill bytes may
//! precede any marker.

use super::scan::ScanReader;
use super::{ByteRange, Segment, SegmentKind, SegmentLabel};
use crate::constants::{APP_IDENTIFIER_PEEK, MAX_JPEG_FILL_RUN, MAX_SEGMENTS};
use crate::error::{Error, Result};
use crate::metadata::MetadataKind;
use tracing::debug;

pub(super) const SIGNATURE: &[u8] = &[0xFF, 0xD8];

const SOI: u8 = 0xD8;
const EOI: u8 = 0xD9;
const SOS: u8 = 0xDA;
const COM: u8 = 0xFE;
const TEM: u8 = 0x01;
const APP0: u8 = 0xE0;
const APP15: u8 = 0xEF;

pub(crate) const EXIF_ID: &[u8] = b"Exif\0";
pub(crate) const XMP_ID: &[u8] = b"http://ns.adobe.com/xap/1.0/\0";
pub(crate) const XMP_EXTENSION_ID: &[u8] = b"http://ns.adobe.com/xmp/extension/\0";
pub(crate) const ICC_ID: &[u8] = b"ICC_PROFILE\0";

/// Human-readable marker name.
pub(super) fn marker_name(marker: u8) -> String {
    match marker {
        SOI => "SOI".to_string(),
        EOI => "EOI".to_string(),
        SOS => "SOS".to_string(),
        COM => "COM".to_string(),
        0xC4 => "DHT".to_string(),
        0xDB => "DQT".to_string(),
        0xDD => "DRI".to_string(),
        0xC0..=0xCF => format!("SOF{}", marker - 0xC0),
        0xD0..=0xD7 => format!("RST{}", marker - 0xD0),
        APP0..=APP15 => format!("APP{}", marker - APP0),
        other => format!("0xFF{:02X}", other),
    }
}

fn is_standalone(marker: u8) -> bool {
    matches!(marker, TEM | 0xD0..=0xD7)
}

/// Classifies a marker segment from its marker and leading payload bytes.
pub(super) fn classify(marker: u8, identifier: &[u8]) -> SegmentKind {
    match marker {
        SOS => SegmentKind::ImageData,
        COM => SegmentKind::Metadata(MetadataKind::Comment),
        APP0 if identifier.starts_with(b"JFIF\0") => SegmentKind::Other,
        APP0 if identifier.starts_with(b"JFXX\0") => SegmentKind::Metadata(MetadataKind::Jfxx),
        0xE1 if identifier.starts_with(EXIF_ID) => SegmentKind::Metadata(MetadataKind::Exif),
        0xE1 if identifier.starts_with(XMP_ID) => SegmentKind::Metadata(MetadataKind::Xmp),
        0xE1 if identifier.starts_with(XMP_EXTENSION_ID) => {
            SegmentKind::Metadata(MetadataKind::XmpExtension)
        }
        0xE2 if identifier.starts_with(ICC_ID) => SegmentKind::Metadata(MetadataKind::Icc),
        0xE2 if identifier.starts_with(b"MPF\0") => SegmentKind::Metadata(MetadataKind::Mpf),
        0xED if identifier.starts_with(b"Photoshop 3.0\0") => {
            SegmentKind::Metadata(MetadataKind::Photoshop)
        }
        // Adobe transform flags change how decoders convert colour.
        0xEE if identifier.starts_with(b"Adobe") => SegmentKind::Other,
        APP0..=APP15 => SegmentKind::Metadata(MetadataKind::Application(marker - APP0)),
        _ => SegmentKind::Other,
    }
}

/// Decodes every segment after the signature check.
pub(super) async fn decode_segments(reader: &mut ScanReader) -> Result<Vec<Segment>> {
    let soi = reader.read_exact(2).await?;
    if soi != SIGNATURE {
        return Err(Error::MalformedContainer {
            offset: 0,
            reason: "missing SOI marker".to_string(),
        });
    }

    let mut segments = vec![Segment {
        kind: SegmentKind::Other,
        label: SegmentLabel::Marker(SOI),
        range: ByteRange::new(0, 2),
        payload: ByteRange::new(2, 0),
    }];

    loop {
        reader.deadline().check("scan JPEG segments")?;
        if segments.len() >= MAX_SEGMENTS {
            return Err(Error::MalformedContainer {
                offset: reader.position(),
                reason: format!("more than {} segments", MAX_SEGMENTS),
            });
        }

        let start = reader.position();
        let marker = read_marker(reader, start).await?;

        match marker {
            EOI => {
                segments.push(Segment {
                    kind: SegmentKind::Other,
                    label: SegmentLabel::Marker(EOI),
                    range: ByteRange::from_bounds(start, reader.position()),
                    payload: ByteRange::new(reader.position(), 0),
                });
                break;
            }
            SOI | 0x00 => {
                return Err(Error::MalformedContainer {
                    offset: start,
                    reason: format!("unexpected marker {}", marker_name(marker)),
                });
            }
            m if is_standalone(m) => {
                segments.push(Segment {
                    kind: SegmentKind::Other,
                    label: SegmentLabel::Marker(m),
                    range: ByteRange::from_bounds(start, reader.position()),
                    payload: ByteRange::new(reader.position(), 0),
                });
            }
            m => segments.push(read_marker_segment(reader, start, m).await?),
        }
    }

    let trailer_start = reader.position();
    let trailer_len = reader.skip(u64::MAX).await?;
    if trailer_len > 0 {
        debug!("JPEG has {} trailing bytes after EOI", trailer_len);
        let range = ByteRange::new(trailer_start, trailer_len);
        segments.push(Segment {
            kind: SegmentKind::Metadata(MetadataKind::Trailer),
            label: SegmentLabel::Trailer,
            range,
            payload: range,
        });
    }

    Ok(segments)
}

/// Reads `FF [FF..] xx` and returns `xx`.
async fn read_marker(reader: &mut ScanReader, start: u64) -> Result<u8> {
    let missing_eoi = |position: u64| Error::TruncatedInput {
        offset: start,
        needed: position - start + 1,
        available: position - start,
    };

    match reader.read_u8().await? {
        Some(0xFF) => {}
        Some(other) => {
            return Err(Error::MalformedContainer {
                offset: start,
                reason: format!("expected marker, found 0x{:02X}", other),
            });
        }
        None => return Err(missing_eoi(reader.position())),
    }

    loop {
        match reader.read_u8().await? {
            Some(0xFF) => continue,
            Some(marker) => return Ok(marker),
            None => return Err(missing_eoi(reader.position())),
        }
    }
}

async fn read_marker_segment(reader: &mut ScanReader, start: u64, marker: u8) -> Result<Segment> {
    let length_bytes = reader.read_exact(2).await.map_err(|e| retarget(e, start))?;
    let length = u16::from_be_bytes([length_bytes[0], length_bytes[1]]) as u64;
    if length < 2 {
        return Err(Error::MalformedContainer {
            offset: start,
            reason: format!("{} declares length {}", marker_name(marker), length),
        });
    }

    let payload_start = reader.position();
    let payload_len = length - 2;
    let header_len = payload_start - start;

    let identifier = if (APP0..=APP15).contains(&marker) {
        reader.peek(APP_IDENTIFIER_PEEK.min(payload_len as usize)).await?
    } else {
        Vec::new()
    };
    let kind = classify(marker, &identifier);

    let skipped = reader.skip(payload_len).await?;
    if skipped < payload_len {
        return Err(Error::TruncatedInput {
            offset: start,
            needed: header_len + payload_len,
            available: header_len + skipped,
        });
    }

    if marker == SOS {
        scan_entropy_data(reader, start).await?;
    }

    Ok(Segment {
        kind,
        label: SegmentLabel::Marker(marker),
        range: ByteRange::from_bounds(start, reader.position()),
        payload: ByteRange::new(payload_start, payload_len),
    })
}

/// Advances to the `FF` that starts the next real marker after a scan.
///
/// A run of fill bytes belongs to the marker it precedes, so the reader
/// stops at the first `FF` of the run.
async fn scan_entropy_data(reader: &mut ScanReader, segment_start: u64) -> Result<()> {
    let mut want = 2;
    // Leading buffered bytes already known to be a fill run.
    let mut carried_fill = 0;
    loop {
        reader.deadline().check("scan JPEG entropy data")?;

        let available = reader.ensure(want).await?;
        if available < want {
            return Err(Error::TruncatedInput {
                offset: segment_start,
                needed: reader.position() - segment_start + want as u64,
                available: reader.position() - segment_start + available as u64,
            });
        }

        let data = reader.buffered();
        let len = data.len();
        let (mut i, mut fill_start) = if carried_fill > 1 {
            (carried_fill - 1, Some(0))
        } else {
            (0, None)
        };
        let mut marker_start = None;
        while i + 1 < len {
            if data[i] == 0xFF {
                match data[i + 1] {
                    0x00 | 0xD0..=0xD7 => {
                        fill_start = None;
                        i += 2;
                        continue;
                    }
                    0xFF => {
                        fill_start.get_or_insert(i);
                    }
                    _ => {
                        marker_start = Some(fill_start.unwrap_or(i));
                        break;
                    }
                }
            } else {
                fill_start = None;
            }
            i += 1;
        }

        if let Some(at) = marker_start {
            reader.consume(at);
            return Ok(());
        }

        // An unfinished fill run stays buffered until its marker arrives.
        let keep_from = fill_start.unwrap_or(i);
        reader.consume(keep_from);
        let kept = len - keep_from;
        if kept > MAX_JPEG_FILL_RUN {
            return Err(Error::MalformedContainer {
                offset: reader.position(),
                reason: format!("more than {} fill bytes after scan", MAX_JPEG_FILL_RUN),
            });
        }
        carried_fill = if fill_start.is_some() { kept } else { 0 };
        want = (kept + 1).max(2);
    }
}

/// Reports a short header read against the segment that owns it.
fn retarget(err: Error, start: u64) -> Error {
    match err {
        Error::TruncatedInput {
            offset,
            needed,
            available,
        } => Error::TruncatedInput {
            offset: start,
            needed: needed + (offset - start),
            available: available + (offset - start),
        },
        other => other,
    }
}
