//! # exifgate
//!
//! **On-Demand Image Metadata Stripping and Extraction**
//!
//! This crate serves transformed copies of images held in a private object
//! store when an edge cache misses. Every object read is answered in one of
//! two modes:
//!
//! - the image with all embedded metadata removed (default), or
//! - when the caller sets the `showExif` query flag, the extracted metadata
//!   as a JSON document instead of image bytes.
//!
//! No pixel is ever decoded. Containers are parsed into segment tables and
//! re-emitted byte for byte minus the metadata segments.
//!
//! # Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────┐
//! │                      TransformationHandler                          │
//! │   Fetching → Decoding → Selecting → Producing → Writing → Done      │
//! ├─────────────────────────────────────────────────────────────────────┤
//! │  ┌──────────────┐   ┌──────────────────┐   ┌────────────────────┐   │
//! │  │    Origin    │   │  Container Codec │   │     WriteBack      │   │
//! │  │ HTTP / File  │──►│  JPEG  │  PNG    │   │  Memory / File     │   │
//! │  │   / Memory   │   │ decode │ encode  │   │  (atomic rename)   │   │
//! │  └──────────────┘   └───┬─────────┬────┘   └─────────▲──────────┘   │
//! │                         │         │                  │              │
//! │                 ┌───────▼──┐  ┌───▼───────────┐      │              │
//! │                 │ Stripper │  │   Extractor   │      │              │
//! │                 │          │  │ Exif/XMP/ICC  │      │              │
//! │                 └───────┬──┘  └───┬───────────┘      │              │
//! │                         └────┬────┘                  │              │
//! │                        TransformedPayload ───────────┘              │
//! └─────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Guarantees
//!
//! - **Round trip**: decoding then re-encoding an object reproduces it
//!   exactly.
//! - **Image data untouched**: stripping only drops whole metadata
//!   segments; everything else is forwarded from the origin unchanged.
//! - **Exclusive payloads**: a response carries either image bytes or a
//!   metadata document, never both, and the metadata path never reads
//!   image data.
//! - **No partial payloads**: failures produce a well-formed error response
//!   with an empty body.
//! - **Bounded memory**: objects are streamed through a fixed scan buffer;
//!   only segment tables, and in metadata mode the metadata bytes, are held.
//! - **Bounded time**: an invocation deadline interrupts scanning between
//!   segments and bounds every I/O wait.
//!
//! # Example
//!
//! ```rust,ignore
//! use exifgate::{
//!     FileOrigin, HandlerConfig, MemoryWriteBack, OriginObjectReference,
//!     TransformationHandler, TransformationRequest,
//! };
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> exifgate::Result<()> {
//!     let handler = TransformationHandler::new(
//!         Arc::new(FileOrigin::new("/srv/images")),
//!         HandlerConfig::from_env()?,
//!     );
//!     let request = TransformationRequest::new(OriginObjectReference::new("photo.jpg"), false);
//!     let writeback = MemoryWriteBack::new();
//!     let outcome = handler.handle(request, &writeback).await;
//!     assert!(outcome.is_success());
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod constants;
pub mod container;
pub mod deadline;
pub mod error;
pub mod event;
pub mod handler;
pub mod metadata;
pub mod origin;
pub mod selector;
pub mod strip;
pub mod writeback;

// Re-exports
pub use config::HandlerConfig;
pub use constants::*;
pub use container::{
    ByteRange, ContainerDocument, ContainerFormat, Segment, SegmentKind, SegmentLabel,
};
pub use deadline::Deadline;
pub use error::{Error, FailureReason, Result};
pub use event::{ObjectLambdaEvent, WriteBackTarget};
pub use handler::{InvocationOutcome, Phase, TransformationHandler, TransformationRequest};
pub use metadata::{Extraction, MetadataKind, MetadataMap, MetadataSegment, MetadataValue};
pub use origin::{
    ByteStream, FileOrigin, HttpOrigin, MemoryOrigin, MemorySource, ObjectSource, Origin,
    OriginObjectReference,
};
pub use selector::{ResponseMode, TransformedPayload};
pub use strip::{StripOutcome, strip, validate_structure};
pub use writeback::{FileWriteBack, MemoryWriteBack, ResponseHead, WriteBack, WrittenResponse};
