//! Response selection.
//!
//! A request is answered with exactly one of two payloads. The branch is a
//! pure function of the request flag, and the payload type makes the two
//! outcomes mutually exclusive.

use crate::constants::METADATA_CONTENT_TYPE;
use crate::origin::ByteStream;
use bytes::Bytes;
use futures::StreamExt;

/// What a request will be answered with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseMode {
    /// The image with every metadata segment removed.
    StrippedImage,
    /// The extracted metadata as JSON.
    MetadataDocument,
}

impl std::fmt::Display for ResponseMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::StrippedImage => write!(f, "stripped-image"),
            Self::MetadataDocument => write!(f, "metadata-document"),
        }
    }
}

/// Chooses the response mode for a request.
pub fn select(show_metadata: bool) -> ResponseMode {
    if show_metadata {
        ResponseMode::MetadataDocument
    } else {
        ResponseMode::StrippedImage
    }
}

/// The single payload produced for a request.
pub enum TransformedPayload {
    /// Stripped image bytes, streamed lazily.
    Image {
        content_type: String,
        content_length: u64,
        body: ByteStream,
    },
    /// Serialized metadata document.
    MetadataDocument { bytes: Bytes },
}

impl TransformedPayload {
    /// Mode this payload answers.
    pub fn mode(&self) -> ResponseMode {
        match self {
            Self::Image { .. } => ResponseMode::StrippedImage,
            Self::MetadataDocument { .. } => ResponseMode::MetadataDocument,
        }
    }

    /// Content type for the response head.
    pub fn content_type(&self) -> &str {
        match self {
            Self::Image { content_type, .. } => content_type,
            Self::MetadataDocument { .. } => METADATA_CONTENT_TYPE,
        }
    }

    /// Exact number of body bytes.
    pub fn content_length(&self) -> u64 {
        match self {
            Self::Image { content_length, .. } => *content_length,
            Self::MetadataDocument { bytes } => bytes.len() as u64,
        }
    }

    /// Consumes the payload, returning its body as a stream.
    pub fn into_body(self) -> ByteStream {
        match self {
            Self::Image { body, .. } => body,
            Self::MetadataDocument { bytes } => {
                futures::stream::once(async move { Ok::<_, std::io::Error>(bytes) }).boxed()
            }
        }
    }
}

impl std::fmt::Debug for TransformedPayload {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransformedPayload")
            .field("mode", &self.mode())
            .field("content_type", &self.content_type())
            .field("content_length", &self.content_length())
            .finish()
    }
}
