//! Metadata stripping.
//!
//! Removal works on the segment table alone: the stripped document keeps
//! every non-metadata segment, in order, and [`encode`](crate::container::encode)
//! forwards their original bytes untouched. Image data is never rewritten.

use crate::container::{ByteRange, ContainerDocument, ContainerFormat, SegmentKind, SegmentLabel};
use crate::error::{Error, Result};
use tracing::debug;

const JPEG_SOI: u8 = 0xD8;
const JPEG_EOI: u8 = 0xD9;

/// A stripped document plus the ranges that were dropped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StripOutcome {
    /// Document without metadata segments.
    pub document: ContainerDocument,
    /// Source ranges of the removed segments, in order.
    pub removed: Vec<ByteRange>,
}

impl StripOutcome {
    /// Total number of bytes removed.
    pub fn removed_bytes(&self) -> u64 {
        self.removed.iter().map(|r| r.len).sum()
    }

    /// Returns true if nothing was removed.
    pub fn is_unchanged(&self) -> bool {
        self.removed.is_empty()
    }
}

/// Removes every metadata segment from `doc`.
///
/// Non-metadata segments keep their relative order. A document without
/// metadata comes back unchanged, so stripping twice equals stripping once.
pub fn strip(doc: &ContainerDocument) -> StripOutcome {
    let removed: Vec<ByteRange> = doc
        .segments()
        .iter()
        .filter(|s| s.kind.is_metadata())
        .map(|s| s.range)
        .collect();

    let document = if removed.is_empty() {
        doc.clone()
    } else {
        doc.retain(|s| !s.kind.is_metadata())
    };

    let outcome = StripOutcome { document, removed };
    debug!(
        "Stripped {} metadata segments ({} bytes) from {} document",
        outcome.removed.len(),
        outcome.removed_bytes(),
        doc.format()
    );
    outcome
}

/// Checks a (stripped) document against its format's structural rules.
///
/// The signature segment must come first, the end marker last, and at
/// least one image-data segment must remain. PNG additionally requires
/// `IHDR` directly after the signature.
pub fn validate_structure(doc: &ContainerDocument) -> Result<()> {
    let segments = doc.segments();
    let violation = |offset: u64, reason: &str| Error::MalformedContainer {
        offset,
        reason: format!("{} document {}", doc.format(), reason),
    };

    let (Some(first), Some(last)) = (segments.first(), segments.last()) else {
        return Err(violation(0, "has no segments"));
    };

    let (starts, ends) = match doc.format() {
        ContainerFormat::Jpeg => (
            first.label == SegmentLabel::Marker(JPEG_SOI),
            last.label == SegmentLabel::Marker(JPEG_EOI),
        ),
        ContainerFormat::Png => (
            first.label == SegmentLabel::Signature
                && segments.get(1).map(|s| s.label) == Some(SegmentLabel::Chunk(*b"IHDR")),
            last.label == SegmentLabel::Chunk(*b"IEND"),
        ),
    };

    if !starts {
        return Err(violation(first.range.start, "does not start with its header"));
    }
    if !ends {
        return Err(violation(last.range.start, "does not end with its end marker"));
    }
    if !segments.iter().any(|s| s.kind == SegmentKind::ImageData) {
        return Err(violation(first.range.start, "has no image data"));
    }
    Ok(())
}
