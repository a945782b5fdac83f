//! # Write-Back Interface
//!
//! Delivers the response for one invocation: a [`ResponseHead`] (status,
//! content type, exact content length, optional error code and message)
//! followed by the body stream.
//!
//! ## Delivery Contract
//!
//! - The body must deliver exactly `content_length` bytes. A short or long
//!   body, or a stream error, fails with [`Error::WriteBackFailed`].
//! - Nothing partial is ever published. [`MemoryWriteBack`] records a
//!   response only after its body completed; [`FileWriteBack`] streams into a
//!   temporary file and renames it over the target on success.
//! - Delivery is attempted once. Retrying is the invoking layer's concern.

use crate::error::{Error, Result};
use crate::origin::ByteStream;
use async_trait::async_trait;
use futures::TryStreamExt;
use std::path::{Path, PathBuf};
use std::sync::RwLock;
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};

/// Status line and headers of a response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResponseHead {
    /// HTTP status code.
    pub status: u16,
    /// Content type of the body, absent for error responses.
    pub content_type: Option<String>,
    /// Exact body length.
    pub content_length: u64,
    /// Machine-readable error code, for error responses.
    pub error_code: Option<String>,
    /// Human-readable error message, for error responses.
    pub error_message: Option<String>,
}

impl ResponseHead {
    /// Head of a successful response.
    pub fn ok(content_type: impl Into<String>, content_length: u64) -> Self {
        Self {
            status: 200,
            content_type: Some(content_type.into()),
            content_length,
            error_code: None,
            error_message: None,
        }
    }

    /// Head of the error response for `err`. Error responses have no body.
    pub fn error(err: &Error) -> Self {
        Self {
            status: err.status_code(),
            content_type: None,
            content_length: 0,
            error_code: Some(err.error_code().to_string()),
            error_message: Some(err.to_string()),
        }
    }

    /// Returns true for 2xx statuses.
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Destination of an invocation's response.
#[async_trait]
pub trait WriteBack: Send + Sync {
    /// Delivers `head` and `body`, returning the number of body bytes written.
    ///
    /// ## Errors
    ///
    /// [`Error::WriteBackFailed`] if the body fails, its length disagrees
    /// with `head.content_length`, or the destination rejects it.
    async fn write_response(&self, head: ResponseHead, body: ByteStream) -> Result<u64>;
}

fn length_mismatch(expected: u64, actual: u64) -> Error {
    Error::WriteBackFailed(format!(
        "body length {} does not match declared content length {}",
        actual, expected
    ))
}

fn body_failed(err: std::io::Error) -> Error {
    Error::WriteBackFailed(format!("body stream failed: {}", err))
}

// =============================================================================
// Memory Write-Back
// =============================================================================

/// A completely delivered response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WrittenResponse {
    /// Response head as delivered.
    pub head: ResponseHead,
    /// Complete body.
    pub body: Vec<u8>,
}

/// Collects responses in memory.
#[derive(Debug, Default)]
pub struct MemoryWriteBack {
    responses: RwLock<Vec<WrittenResponse>>,
}

impl MemoryWriteBack {
    /// Creates an empty collector.
    pub fn new() -> Self {
        Self::default()
    }

    /// Responses delivered so far, in order.
    pub fn responses(&self) -> Result<Vec<WrittenResponse>> {
        let responses = self
            .responses
            .read()
            .map_err(|e| Error::Internal(format!("lock poisoned: {}", e)))?;
        Ok(responses.clone())
    }

    /// The only delivered response, if exactly one was delivered.
    pub fn single(&self) -> Result<Option<WrittenResponse>> {
        let mut responses = self.responses()?;
        if responses.len() == 1 {
            Ok(responses.pop())
        } else {
            Ok(None)
        }
    }
}

#[async_trait]
impl WriteBack for MemoryWriteBack {
    async fn write_response(&self, head: ResponseHead, body: ByteStream) -> Result<u64> {
        let mut collected = Vec::new();
        let mut body = body;
        while let Some(chunk) = body.try_next().await.map_err(body_failed)? {
            if collected.len() as u64 + chunk.len() as u64 > head.content_length {
                return Err(length_mismatch(
                    head.content_length,
                    collected.len() as u64 + chunk.len() as u64,
                ));
            }
            collected.extend_from_slice(&chunk);
        }
        let written = collected.len() as u64;
        if written != head.content_length {
            return Err(length_mismatch(head.content_length, written));
        }

        let mut responses = self
            .responses
            .write()
            .map_err(|e| Error::Internal(format!("lock poisoned: {}", e)))?;
        responses.push(WrittenResponse {
            head,
            body: collected,
        });
        Ok(written)
    }
}

// =============================================================================
// File Write-Back
// =============================================================================

/// Writes successful response bodies to a file.
///
/// The body is streamed into a sibling temporary file that is renamed over
/// the target only once it is complete, so a failed response never leaves a
/// partial file behind. Error responses leave the target untouched; their
/// head is kept for inspection.
#[derive(Debug)]
pub struct FileWriteBack {
    path: PathBuf,
    last_head: RwLock<Option<ResponseHead>>,
}

impl FileWriteBack {
    /// Creates a write-back targeting `path`.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            last_head: RwLock::new(None),
        }
    }

    /// Target path.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Head of the most recent response, successful or not.
    pub fn last_head(&self) -> Result<Option<ResponseHead>> {
        let head = self
            .last_head
            .read()
            .map_err(|e| Error::Internal(format!("lock poisoned: {}", e)))?;
        Ok(head.clone())
    }

    fn temp_path(&self) -> PathBuf {
        let name = self
            .path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "response".to_string());
        self.path
            .with_file_name(format!(".{}.tmp.{}", name, std::process::id()))
    }

    async fn write_body(&self, temp: &Path, expected: u64, mut body: ByteStream) -> Result<u64> {
        let io_failed = |e: std::io::Error| {
            Error::WriteBackFailed(format!("writing {}: {}", temp.display(), e))
        };

        let mut file = tokio::fs::File::create(temp).await.map_err(io_failed)?;
        let mut written = 0u64;
        while let Some(chunk) = body.try_next().await.map_err(body_failed)? {
            written += chunk.len() as u64;
            if written > expected {
                return Err(length_mismatch(expected, written));
            }
            file.write_all(&chunk).await.map_err(io_failed)?;
        }
        if written != expected {
            return Err(length_mismatch(expected, written));
        }
        file.flush().await.map_err(io_failed)?;
        file.sync_all().await.map_err(io_failed)?;
        Ok(written)
    }

    fn record(&self, head: ResponseHead) -> Result<()> {
        let mut last = self
            .last_head
            .write()
            .map_err(|e| Error::Internal(format!("lock poisoned: {}", e)))?;
        *last = Some(head);
        Ok(())
    }
}

#[async_trait]
impl WriteBack for FileWriteBack {
    async fn write_response(&self, head: ResponseHead, body: ByteStream) -> Result<u64> {
        if !head.is_success() {
            debug!(
                "Not writing {} for status {}",
                self.path.display(),
                head.status
            );
            self.record(head)?;
            return Ok(0);
        }

        let temp = self.temp_path();
        let written = match self.write_body(&temp, head.content_length, body).await {
            Ok(written) => written,
            Err(e) => {
                if let Err(cleanup) = tokio::fs::remove_file(&temp).await {
                    warn!("Failed to remove {}: {}", temp.display(), cleanup);
                }
                return Err(e);
            }
        };

        if let Err(e) = tokio::fs::rename(&temp, &self.path).await {
            let _ = tokio::fs::remove_file(&temp).await;
            return Err(Error::WriteBackFailed(format!(
                "renaming into {}: {}",
                self.path.display(),
                e
            )));
        }

        debug!("Wrote {} bytes to {}", written, self.path.display());
        self.record(head)?;
        Ok(written)
    }
}
