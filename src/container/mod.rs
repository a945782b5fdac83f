//! # Container Codec
//!
//! Parses image containers into an ordered list of top-level segments and
//! re-emits them, without decoding pixels.
//!
//! ## Supported Containers
//!
//! | Format | Signature | Segments |
//! |--------|-----------|----------|
//! | JPEG | `FF D8` | marker segments, `SOS` + entropy-coded data, `EOI` |
//! | PNG | `89 50 4E 47 0D 0A 1A 0A` | length-prefixed chunks ending with `IEND` |
//!
//! ## Document Model
//!
//! ```text
//!  offset 0                                                  total_len
//!  ├── SOI ──┼── APP0 JFIF ──┼── APP1 Exif ──┼── DQT … SOS+data ──┼── EOI ──┤
//!     Other        Other         Metadata          ImageData        Other
//! ```
//!
//! A decoded [`ContainerDocument`] holds byte ranges only. Segments are
//! contiguous and non-overlapping; concatenated in order they reproduce the
//! original object exactly. Payload bytes are materialized on demand through
//! [`ObjectSource::read_range`].
//!
//! ## Streaming
//!
//! [`decode`] reads the object once, sequentially, through a bounded scan
//! buffer; only segment headers and short `APPn` identifiers are inspected.
//! [`encode`] produces a lazy [`ByteStream`] that reads the object once more
//! and forwards only the ranges of the segments still in the document.
//!
//! [`ObjectSource::read_range`]: crate::origin::ObjectSource::read_range

mod encode;
pub(crate) mod jpeg;
mod png;
mod scan;

pub use encode::{encode, encode_to_vec};

use crate::constants::{JPEG_CONTENT_TYPE, PNG_CONTENT_TYPE};
use crate::deadline::Deadline;
use crate::error::{Error, Result};
use crate::metadata::{MetadataKind, MetadataSegment};
use crate::origin::{ByteStream, ObjectSource};
use scan::ScanReader;
use tracing::debug;

/// Half-open byte range `[start, start + len)` within the origin object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ByteRange {
    /// Offset of the first byte.
    pub start: u64,
    /// Number of bytes.
    pub len: u64,
}

impl ByteRange {
    /// Creates a range.
    pub fn new(start: u64, len: u64) -> Self {
        Self { start, len }
    }

    /// Creates a range from its bounds.
    pub fn from_bounds(start: u64, end: u64) -> Self {
        Self {
            start,
            len: end.saturating_sub(start),
        }
    }

    /// Offset one past the last byte.
    pub fn end(&self) -> u64 {
        self.start + self.len
    }

    /// Returns true for a zero-length range.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Returns true if the ranges share at least one byte.
    pub fn overlaps(&self, other: &ByteRange) -> bool {
        self.start < other.end() && other.start < self.end()
    }
}

/// Recognized container formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContainerFormat {
    /// JPEG / JFIF / Exif.
    Jpeg,
    /// Portable Network Graphics.
    Png,
}

impl ContainerFormat {
    /// Content type of the format.
    pub fn content_type(&self) -> &'static str {
        match self {
            Self::Jpeg => JPEG_CONTENT_TYPE,
            Self::Png => PNG_CONTENT_TYPE,
        }
    }

    /// Magic bytes at offset zero.
    pub fn signature(&self) -> &'static [u8] {
        match self {
            Self::Jpeg => jpeg::SIGNATURE,
            Self::Png => png::SIGNATURE,
        }
    }
}

impl std::fmt::Display for ContainerFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Jpeg => write!(f, "jpeg"),
            Self::Png => write!(f, "png"),
        }
    }
}

/// Detects the container format from the first bytes of an object.
pub fn detect(prefix: &[u8]) -> Option<ContainerFormat> {
    [ContainerFormat::Jpeg, ContainerFormat::Png]
        .into_iter()
        .find(|format| prefix.starts_with(format.signature()))
}

/// Role of a segment within its container.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SegmentKind {
    /// Compressed pixel data (`SOS` + scan, `IDAT`).
    ImageData,
    /// Auxiliary tagged data; removed by the stripper.
    Metadata(MetadataKind),
    /// Structural segments the image needs (tables, headers, markers).
    Other,
}

impl SegmentKind {
    /// Returns true for metadata segments.
    pub fn is_metadata(&self) -> bool {
        matches!(self, Self::Metadata(_))
    }
}

/// Format-specific identity of a segment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SegmentLabel {
    /// Container signature (PNG).
    Signature,
    /// JPEG marker byte following `0xFF`.
    Marker(u8),
    /// PNG chunk type.
    Chunk([u8; 4]),
    /// Bytes after the end of the image.
    Trailer,
}

impl std::fmt::Display for SegmentLabel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Signature => write!(f, "signature"),
            Self::Marker(marker) => f.write_str(&jpeg::marker_name(*marker)),
            Self::Chunk(kind) => write!(f, "{}", String::from_utf8_lossy(kind)),
            Self::Trailer => write!(f, "trailer"),
        }
    }
}

/// One top-level segment of a container.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Segment {
    /// Role of the segment.
    pub kind: SegmentKind,
    /// Marker or chunk identity.
    pub label: SegmentLabel,
    /// Full extent, including markers, length fields and checksums.
    pub range: ByteRange,
    /// Extent of the payload alone.
    pub payload: ByteRange,
}

/// A parsed container: format plus ordered segment table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerDocument {
    format: ContainerFormat,
    source_len: u64,
    segments: Vec<Segment>,
}

impl ContainerDocument {
    /// Container format.
    pub fn format(&self) -> ContainerFormat {
        self.format
    }

    /// Size of the object the document was decoded from.
    pub fn source_len(&self) -> u64 {
        self.source_len
    }

    /// Segments in container order.
    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    /// Metadata segments in container order.
    pub fn metadata_segments(&self) -> impl Iterator<Item = MetadataSegment> + '_ {
        self.segments.iter().filter_map(|segment| match segment.kind {
            SegmentKind::Metadata(kind) => Some(MetadataSegment {
                segment: *segment,
                kind,
            }),
            _ => None,
        })
    }

    /// Returns true if any segment is metadata.
    pub fn has_metadata(&self) -> bool {
        self.segments.iter().any(|s| s.kind.is_metadata())
    }

    /// Number of bytes [`encode`] will emit for this document.
    pub fn encoded_len(&self) -> u64 {
        self.segments.iter().map(|s| s.range.len).sum()
    }

    /// Returns a document with the same format and source, keeping only the
    /// segments for which `keep` returns true.
    pub fn retain<F>(&self, mut keep: F) -> Self
    where
        F: FnMut(&Segment) -> bool,
    {
        Self {
            format: self.format,
            source_len: self.source_len,
            segments: self.segments.iter().copied().filter(|s| keep(s)).collect(),
        }
    }

    /// Checks that segments are ordered, non-overlapping and inside the source.
    pub fn verify_ordered(&self) -> Result<()> {
        let mut cursor = 0u64;
        for segment in &self.segments {
            if segment.range.start < cursor || segment.range.end() > self.source_len {
                return Err(Error::Internal(format!(
                    "segment {} at {}..{} out of order (cursor {}, source {})",
                    segment.label,
                    segment.range.start,
                    segment.range.end(),
                    cursor,
                    self.source_len
                )));
            }
            cursor = segment.range.end();
        }
        Ok(())
    }

    /// Checks that segments tile `[0, source_len)` exactly.
    pub fn verify_contiguous(&self) -> Result<()> {
        let mut cursor = 0u64;
        for segment in &self.segments {
            if segment.range.start != cursor || segment.range.is_empty() {
                return Err(Error::Internal(format!(
                    "segment {} starts at {}, expected {}",
                    segment.label, segment.range.start, cursor
                )));
            }
            cursor = segment.range.end();
        }
        if cursor != self.source_len {
            return Err(Error::Internal(format!(
                "segments end at {}, source is {} bytes",
                cursor, self.source_len
            )));
        }
        Ok(())
    }
}

/// Opens a stream over `source` and decodes it.
pub async fn decode(
    source: &dyn ObjectSource,
    deadline: &Deadline,
) -> Result<ContainerDocument> {
    let stream = deadline
        .run("open origin stream", source.stream_from(0))
        .await?;
    decode_stream(stream, source.len(), deadline).await
}

/// Decodes a container from a sequential byte stream.
///
/// `total_len` is the size the origin declared; the stream must deliver
/// exactly that many bytes.
///
/// ## Errors
///
/// - [`Error::MalformedContainer`]: unknown signature or grammar violation
/// - [`Error::TruncatedInput`]: a declared segment runs past the end
/// - [`Error::Timeout`]: the deadline passed between segments
pub async fn decode_stream(
    stream: ByteStream,
    total_len: u64,
    deadline: &Deadline,
) -> Result<ContainerDocument> {
    let mut reader = ScanReader::new(stream, *deadline);

    let available = reader.ensure(png::SIGNATURE.len()).await?;
    let prefix = &reader.buffered()[..available.min(png::SIGNATURE.len())];
    let format = detect(prefix).ok_or_else(|| Error::MalformedContainer {
        offset: 0,
        reason: format!("unrecognized signature {}", hex::encode(prefix)),
    })?;

    let segments = match format {
        ContainerFormat::Jpeg => jpeg::decode_segments(&mut reader).await?,
        ContainerFormat::Png => png::decode_segments(&mut reader).await?,
    };

    let end = reader.position();
    if end < total_len {
        return Err(Error::TruncatedInput {
            offset: end,
            needed: total_len - end,
            available: 0,
        });
    }
    if end > total_len {
        return Err(Error::MalformedContainer {
            offset: total_len,
            reason: format!("object is {} bytes, origin declared {}", end, total_len),
        });
    }

    let document = ContainerDocument {
        format,
        source_len: end,
        segments,
    };
    document.verify_contiguous()?;

    debug!(
        "Decoded {} container: {} segments, {} metadata",
        format,
        document.segments.len(),
        document.metadata_segments().count()
    );
    Ok(document)
}
