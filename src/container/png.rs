//! PNG chunk grammar.
//!
//! ```text
//! 89 50 4E 47 0D 0A 1A 0A       signature
//! LL LL LL LL TT TT TT TT <data> CC CC CC CC
//! ```
//!
//! `LL` is the big-endian data length, `TT` the chunk type and `CC` a CRC
//! over type and data. The first chunk must be `IHDR` and the last `IEND`.
//! Chunks are removed whole, CRC included, so no checksum is recomputed.

use super::scan::ScanReader;
use super::{ByteRange, Segment, SegmentKind, SegmentLabel};
use crate::constants::{MAX_SEGMENTS, PNG_MAX_CHUNK_LEN};
use crate::error::{Error, Result};
use crate::metadata::MetadataKind;
use tracing::debug;

pub(super) const SIGNATURE: &[u8] = b"\x89PNG\r\n\x1a\n";

pub(super) const IHDR: [u8; 4] = *b"IHDR";
pub(super) const IEND: [u8; 4] = *b"IEND";

/// Classifies a chunk by its type.
pub(super) fn classify(chunk_type: [u8; 4]) -> SegmentKind {
    match &chunk_type {
        b"IDAT" | b"fdAT" => SegmentKind::ImageData,
        b"eXIf" => SegmentKind::Metadata(MetadataKind::Exif),
        b"tEXt" => SegmentKind::Metadata(MetadataKind::Text),
        b"zTXt" => SegmentKind::Metadata(MetadataKind::CompressedText),
        b"iTXt" => SegmentKind::Metadata(MetadataKind::InternationalText),
        b"tIME" => SegmentKind::Metadata(MetadataKind::Time),
        b"iCCP" => SegmentKind::Metadata(MetadataKind::CompressedIcc),
        _ => SegmentKind::Other,
    }
}

pub(super) async fn decode_segments(reader: &mut ScanReader) -> Result<Vec<Segment>> {
    let signature = reader.read_exact(SIGNATURE.len()).await?;
    if signature != SIGNATURE {
        return Err(Error::MalformedContainer {
            offset: 0,
            reason: "missing PNG signature".to_string(),
        });
    }

    let sig_len = SIGNATURE.len() as u64;
    let mut segments = vec![Segment {
        kind: SegmentKind::Other,
        label: SegmentLabel::Signature,
        range: ByteRange::new(0, sig_len),
        payload: ByteRange::new(sig_len, 0),
    }];

    loop {
        reader.deadline().check("scan PNG chunks")?;
        if segments.len() >= MAX_SEGMENTS {
            return Err(Error::MalformedContainer {
                offset: reader.position(),
                reason: format!("more than {} chunks", MAX_SEGMENTS),
            });
        }

        let start = reader.position();
        let header = reader.read_exact(8).await?;
        let length = u32::from_be_bytes([header[0], header[1], header[2], header[3]]);
        let chunk_type = [header[4], header[5], header[6], header[7]];

        if length > PNG_MAX_CHUNK_LEN {
            return Err(Error::MalformedContainer {
                offset: start,
                reason: format!("chunk length {} exceeds 2^31-1", length),
            });
        }
        if !chunk_type.iter().all(u8::is_ascii_alphabetic) {
            return Err(Error::MalformedContainer {
                offset: start,
                reason: format!("invalid chunk type {}", hex::encode(chunk_type)),
            });
        }
        if segments.len() == 1 && chunk_type != IHDR {
            return Err(Error::MalformedContainer {
                offset: start,
                reason: format!(
                    "first chunk is {}, expected IHDR",
                    String::from_utf8_lossy(&chunk_type)
                ),
            });
        }

        let body_len = length as u64 + 4;
        let skipped = reader.skip(body_len).await?;
        if skipped < body_len {
            return Err(Error::TruncatedInput {
                offset: start,
                needed: 8 + body_len,
                available: 8 + skipped,
            });
        }

        segments.push(Segment {
            kind: classify(chunk_type),
            label: SegmentLabel::Chunk(chunk_type),
            range: ByteRange::new(start, 8 + body_len),
            payload: ByteRange::new(start + 8, length as u64),
        });

        if chunk_type == IEND {
            break;
        }
    }

    let trailer_start = reader.position();
    let trailer_len = reader.skip(u64::MAX).await?;
    if trailer_len > 0 {
        debug!("PNG has {} trailing bytes after IEND", trailer_len);
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
