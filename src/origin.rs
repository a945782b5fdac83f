//! # Origin Read Interface
//!
//! Reads original object bytes from the backing store. The handler never sees
//! where bytes come from; it only talks to the two traits below:
//!
//! - [`Origin`] resolves an [`OriginObjectReference`] into an open object.
//! - [`ObjectSource`] exposes the object's size, ranged reads for lazily
//!   materialized segments, and a sequential [`ByteStream`].
//!
//! ## Implementations
//!
//! | Origin | Locator | Use |
//! |--------|---------|-----|
//! | [`HttpOrigin`] | presigned `https://` URL | object-lambda invocations |
//! | [`FileOrigin`] | key relative to a base directory | CLI, local testing |
//! | [`MemoryOrigin`] | key into an in-memory map | tests |
//!
//! ## Two-Pass Reads
//!
//! Decoding reads the object once to find segment boundaries. The image path
//! then reads it a second time while encoding. [`HttpOrigin`] pins the second
//! pass to the first with `If-Match` on the object's ETag, so an object
//! replaced between the passes fails instead of being spliced.
//!
//! ## Security
//!
//! Presigned URLs carry credentials in their query string. The reference's
//! `Debug` and `Display` output drop the query string, so the locator can be
//! logged freely. [`FileOrigin`] rejects absolute keys and `..` components.

use crate::constants::{ORIGIN_CONNECT_TIMEOUT, READ_CHUNK_SIZE};
use crate::container::ByteRange;
use crate::error::{Error, Result};
use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::{BoxStream, StreamExt, TryStreamExt};
use std::collections::HashMap;
use std::io::SeekFrom;
use std::path::{Component, Path, PathBuf};
use tokio::io::{AsyncReadExt, AsyncSeekExt};
use tracing::debug;

/// Lazy, finite, non-restartable sequence of object bytes.
pub type ByteStream = BoxStream<'static, std::io::Result<Bytes>>;

// =============================================================================
// Object Reference
// =============================================================================

/// Opaque locator of the original object.
///
/// Supplied per request by the caller and never persisted.
#[derive(Clone, PartialEq, Eq)]
pub struct OriginObjectReference {
    locator: String,
}

impl OriginObjectReference {
    /// Wraps a locator (URL, file key or memory key).
    pub fn new(locator: impl Into<String>) -> Self {
        Self {
            locator: locator.into(),
        }
    }

    /// Returns the full locator, including any credentials.
    pub fn locator(&self) -> &str {
        &self.locator
    }

    /// Returns the locator with its query string removed.
    pub fn redacted(&self) -> String {
        match self.locator.split_once('?') {
            Some((base, _)) => format!("{}?<redacted>", base),
            None => self.locator.clone(),
        }
    }
}

impl std::fmt::Debug for OriginObjectReference {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("OriginObjectReference")
            .field(&self.redacted())
            .finish()
    }
}

impl std::fmt::Display for OriginObjectReference {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.redacted())
    }
}

// =============================================================================
// Traits
// =============================================================================

/// An opened origin object.
#[async_trait]
pub trait ObjectSource: Send + Sync {
    /// Total object size in bytes.
    fn len(&self) -> u64;

    /// Returns true for an empty object.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Content type reported by the origin, if any.
    fn content_type(&self) -> Option<&str> {
        None
    }

    /// Reads exactly `range` from the object.
    async fn read_range(&self, range: ByteRange) -> Result<Bytes>;

    /// Streams the object from `offset` to its end.
    async fn stream_from(&self, offset: u64) -> Result<ByteStream>;
}

/// Resolves object references into readable objects.
#[async_trait]
pub trait Origin: Send + Sync {
    /// Opens the referenced object.
    ///
    /// ## Errors
    ///
    /// - [`Error::OriginNotFound`]: the object does not exist
    /// - [`Error::OriginAccessDenied`]: the credential was refused
    /// - [`Error::OriginUnavailable`]: network or protocol failure
    async fn open(&self, reference: &OriginObjectReference) -> Result<Box<dyn ObjectSource>>;
}

fn check_range(range: ByteRange, len: u64) -> Result<()> {
    if range.end() > len {
        return Err(Error::TruncatedInput {
            offset: range.start,
            needed: range.len,
            available: len.saturating_sub(range.start),
        });
    }
    Ok(())
}

fn usize_len(range: ByteRange) -> Result<usize> {
    usize::try_from(range.len)
        .map_err(|_| Error::Internal(format!("range of {} bytes exceeds usize", range.len)))
}

// =============================================================================
// HTTP Origin
// =============================================================================

/// Origin reached over HTTP(S), typically through a presigned URL.
///
/// Size discovery uses a one-byte ranged `GET` rather than `HEAD`, since
/// presigned URLs are signed for a single method.
#[derive(Clone)]
pub struct HttpOrigin {
    client: reqwest::Client,
}

impl HttpOrigin {
    /// Creates an origin with a default client.
    pub fn new() -> Result<Self> {
        let client = reqwest::Client::builder()
            .connect_timeout(ORIGIN_CONNECT_TIMEOUT)
            .build()
            .map_err(|e| Error::Internal(format!("failed to build HTTP client: {}", e)))?;
        Ok(Self { client })
    }

    /// Creates an origin around an existing client.
    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl Origin for HttpOrigin {
    async fn open(&self, reference: &OriginObjectReference) -> Result<Box<dyn ObjectSource>> {
        let response = self
            .client
            .get(reference.locator())
            .header(reqwest::header::RANGE, "bytes=0-0")
            .send()
            .await
            .map_err(|e| Error::OriginUnavailable {
                reference: reference.redacted(),
                reason: e.to_string(),
            })?;

        let status = response.status().as_u16();
        let headers = response.headers();
        let header = |name: reqwest::header::HeaderName| {
            headers
                .get(name)
                .and_then(|v| v.to_str().ok())
                .map(str::to_string)
        };

        let len = object_len(
            status,
            header(reqwest::header::CONTENT_RANGE).as_deref(),
            response.content_length(),
            reference,
        )?;

        let source = HttpSource {
            client: self.client.clone(),
            reference: reference.clone(),
            len,
            etag: header(reqwest::header::ETAG),
            content_type: header(reqwest::header::CONTENT_TYPE),
        };

        debug!(
            "Opened {} ({} bytes, etag {:?})",
            reference, source.len, source.etag
        );
        Ok(Box::new(source))
    }
}

fn status_error(status: u16, reference: &OriginObjectReference) -> Error {
    match status {
        404 => Error::OriginNotFound {
            reference: reference.redacted(),
        },
        401 | 403 => Error::OriginAccessDenied {
            reference: reference.redacted(),
        },
        412 => Error::OriginUnavailable {
            reference: reference.redacted(),
            reason: "object changed while being read".to_string(),
        },
        other => Error::OriginUnavailable {
            reference: reference.redacted(),
            reason: format!("unexpected status {}", other),
        },
    }
}

/// Object size from the response to the `bytes=0-0` probe.
///
/// A `200` means the origin ignored the range and sent the whole object,
/// so only its `Content-Length` can size it. An empty object answers `416`.
fn object_len(
    status: u16,
    content_range: Option<&str>,
    content_length: Option<u64>,
    reference: &OriginObjectReference,
) -> Result<u64> {
    let unsized_response = |reason: &str| Error::OriginUnavailable {
        reference: reference.redacted(),
        reason: reason.to_string(),
    };
    match status {
        206 => content_range
            .and_then(parse_content_range_total)
            .ok_or_else(|| unsized_response("206 response without a usable Content-Range")),
        200 => content_length
            .ok_or_else(|| unsized_response("origin did not report object size")),
        416 => Ok(0),
        _ => Err(status_error(status, reference)),
    }
}

/// Extracts the total from `bytes 0-0/1234`.
fn parse_content_range_total(value: &str) -> Option<u64> {
    let (_, total) = value.trim().rsplit_once('/')?;
    total.trim().parse().ok()
}

struct HttpSource {
    client: reqwest::Client,
    reference: OriginObjectReference,
    len: u64,
    etag: Option<String>,
    content_type: Option<String>,
}

impl HttpSource {
    async fn ranged_get(&self, first: u64, last: Option<u64>) -> Result<reqwest::Response> {
        let range = match last {
            Some(last) => format!("bytes={}-{}", first, last),
            None => format!("bytes={}-", first),
        };
        let mut request = self
            .client
            .get(self.reference.locator())
            .header(reqwest::header::RANGE, range);
        if let Some(etag) = &self.etag {
            request = request.header(reqwest::header::IF_MATCH, etag);
        }

        let response = request.send().await.map_err(|e| Error::OriginUnavailable {
            reference: self.reference.redacted(),
            reason: e.to_string(),
        })?;

        match response.status().as_u16() {
            206 => Ok(response),
            // A full body is only acceptable when it is what was asked for.
            200 if first == 0 && last.is_none() => Ok(response),
            status => Err(status_error(status, &self.reference)),
        }
    }
}

#[async_trait]
impl ObjectSource for HttpSource {
    fn len(&self) -> u64 {
        self.len
    }

    fn content_type(&self) -> Option<&str> {
        self.content_type.as_deref()
    }

    async fn read_range(&self, range: ByteRange) -> Result<Bytes> {
        check_range(range, self.len)?;
        if range.is_empty() {
            return Ok(Bytes::new());
        }

        let response = self.ranged_get(range.start, Some(range.end() - 1)).await?;
        let body = response
            .bytes()
            .await
            .map_err(|e| Error::OriginUnavailable {
                reference: self.reference.redacted(),
                reason: e.to_string(),
            })?;

        if body.len() as u64 != range.len {
            return Err(Error::TruncatedInput {
                offset: range.start,
                needed: range.len,
                available: body.len() as u64,
            });
        }
        Ok(body)
    }

    async fn stream_from(&self, offset: u64) -> Result<ByteStream> {
        if offset >= self.len {
            return Ok(futures::stream::empty().boxed());
        }
        let response = self.ranged_get(offset, None).await?;
        Ok(response
            .bytes_stream()
            .map_err(std::io::Error::other)
            .boxed())
    }
}

// =============================================================================
// File Origin
// =============================================================================

/// Origin backed by a local directory.
#[derive(Debug, Clone)]
pub struct FileOrigin {
    base_dir: PathBuf,
    chunk_size: usize,
}

impl FileOrigin {
    /// Creates an origin rooted at `base_dir`.
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
            chunk_size: READ_CHUNK_SIZE,
        }
    }

    /// Sets the chunk size of streams produced by this origin.
    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size.max(1);
        self
    }

    /// Returns the base directory.
    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    /// Resolves a key to a path inside the base directory.
    ///
    /// SECURITY: Rejects absolute keys and any `..` or root component so a
    /// crafted key cannot escape the base directory.
    pub fn resolve(&self, key: &str) -> Result<PathBuf> {
        let relative = Path::new(key);
        let escapes = key.is_empty()
            || relative.components().any(|c| {
                matches!(
                    c,
                    Component::ParentDir | Component::RootDir | Component::Prefix(_)
                )
            });
        if escapes {
            return Err(Error::OriginAccessDenied {
                reference: key.to_string(),
            });
        }
        Ok(self.base_dir.join(relative))
    }
}

#[async_trait]
impl Origin for FileOrigin {
    async fn open(&self, reference: &OriginObjectReference) -> Result<Box<dyn ObjectSource>> {
        let path = self.resolve(reference.locator())?;
        let metadata = tokio::fs::metadata(&path).await.map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => Error::OriginNotFound {
                reference: reference.redacted(),
            },
            std::io::ErrorKind::PermissionDenied => Error::OriginAccessDenied {
                reference: reference.redacted(),
            },
            _ => Error::OriginUnavailable {
                reference: reference.redacted(),
                reason: e.to_string(),
            },
        })?;

        if !metadata.is_file() {
            return Err(Error::OriginNotFound {
                reference: reference.redacted(),
            });
        }

        Ok(Box::new(FileSource {
            path,
            len: metadata.len(),
            chunk_size: self.chunk_size,
        }))
    }
}

struct FileSource {
    path: PathBuf,
    len: u64,
    chunk_size: usize,
}

#[async_trait]
impl ObjectSource for FileSource {
    fn len(&self) -> u64 {
        self.len
    }

    async fn read_range(&self, range: ByteRange) -> Result<Bytes> {
        check_range(range, self.len)?;
        let mut file = tokio::fs::File::open(&self.path).await?;
        file.seek(SeekFrom::Start(range.start)).await?;
        let mut buf = vec![0u8; usize_len(range)?];
        file.read_exact(&mut buf).await?;
        Ok(Bytes::from(buf))
    }

    async fn stream_from(&self, offset: u64) -> Result<ByteStream> {
        let mut file = tokio::fs::File::open(&self.path).await?;
        file.seek(SeekFrom::Start(offset)).await?;
        let chunk_size = self.chunk_size;

        let stream = futures::stream::try_unfold(file, move |mut file| async move {
            let mut buf = vec![0u8; chunk_size];
            let n = file.read(&mut buf).await?;
            if n == 0 {
                return Ok::<_, std::io::Error>(None);
            }
            buf.truncate(n);
            Ok(Some((Bytes::from(buf), file)))
        });
        Ok(stream.boxed())
    }
}

// =============================================================================
// Memory Origin
// =============================================================================

/// Origin holding objects in memory.
#[derive(Debug, Clone, Default)]
pub struct MemoryOrigin {
    objects: HashMap<String, Bytes>,
    chunk_size: Option<usize>,
}

impl MemoryOrigin {
    /// Creates an empty origin.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds or replaces an object.
    pub fn insert(&mut self, key: impl Into<String>, data: impl Into<Bytes>) {
        self.objects.insert(key.into(), data.into());
    }

    /// Builder form of [`MemoryOrigin::insert`].
    pub fn with_object(mut self, key: impl Into<String>, data: impl Into<Bytes>) -> Self {
        self.insert(key, data);
        self
    }

    /// Splits streams into chunks of `chunk_size` bytes.
    ///
    /// Small chunks exercise segment headers straddling chunk boundaries.
    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = Some(chunk_size.max(1));
        self
    }
}

#[async_trait]
impl Origin for MemoryOrigin {
    async fn open(&self, reference: &OriginObjectReference) -> Result<Box<dyn ObjectSource>> {
        let data = self
            .objects
            .get(reference.locator())
            .cloned()
            .ok_or_else(|| Error::OriginNotFound {
                reference: reference.redacted(),
            })?;
        Ok(Box::new(MemorySource {
            data,
            chunk_size: self.chunk_size.unwrap_or(READ_CHUNK_SIZE),
        }))
    }
}

/// In-memory object.
#[derive(Debug, Clone)]
pub struct MemorySource {
    data: Bytes,
    chunk_size: usize,
}

impl MemorySource {
    /// Wraps bytes as an object source.
    pub fn new(data: impl Into<Bytes>) -> Self {
        Self {
            data: data.into(),
            chunk_size: READ_CHUNK_SIZE,
        }
    }

    /// Splits streams into chunks of `chunk_size` bytes.
    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size.max(1);
        self
    }
}

#[async_trait]
impl ObjectSource for MemorySource {
    fn len(&self) -> u64 {
        self.data.len() as u64
    }

    async fn read_range(&self, range: ByteRange) -> Result<Bytes> {
        check_range(range, self.len())?;
        let start = usize::try_from(range.start)
            .map_err(|_| Error::Internal("range start exceeds usize".to_string()))?;
        Ok(self.data.slice(start..start + usize_len(range)?))
    }

    async fn stream_from(&self, offset: u64) -> Result<ByteStream> {
        let start = usize::try_from(offset)
            .unwrap_or(usize::MAX)
            .min(self.data.len());
        let rest = self.data.slice(start..);
        let chunks: Vec<std::io::Result<Bytes>> = (0..rest.len())
            .step_by(self.chunk_size)
            .map(|i| Ok(rest.slice(i..(i + self.chunk_size).min(rest.len()))))
            .collect();
        Ok(futures::stream::iter(chunks).boxed())
    }
}
