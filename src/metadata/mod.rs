//! # Metadata
//!
//! Model and extractors for the auxiliary data embedded in image
//! containers.
//!
//! ## Flow
//!
//! ```text
//! ContainerDocument ──metadata_segments()──► MetadataSegment ─┐
//!                                                             │ read_range(payload)
//!                                                             ▼
//!                                        extract() ──► Extraction ──merge()──► MetadataMap ──► JSON
//! ```
//!
//! Extraction never sees pixel data: the handler reads only the payload
//! ranges of metadata segments.

mod extract;
mod model;
mod tags;
mod tiff;

pub use extract::{describe, extract, merge};
pub use model::{Extraction, MetadataKind, MetadataMap, MetadataSegment, MetadataValue};
pub use tags::Directory;
