//! # Transformation Handler
//!
//! Serves one cache-miss request: fetch the original object, parse its
//! container, then answer with either the metadata-stripped image or the
//! extracted metadata as JSON.
//!
//! ## Lifecycle
//!
//! ```text
//! Fetching ──► Decoding ──► Selecting ──► Producing ──► Writing ──► Done
//!    │            │                          │             │
//!    └────────────┴──────────────────────────┴─────────────┴──► Failed(reason)
//! ```
//!
//! | Phase | Failure | Response |
//! |-------|---------|----------|
//! | Fetching | not found / denied / unreachable | 404 / 403 / 502 |
//! | Decoding | unrecognized or truncated container | 415 |
//! | Producing | malformed Exif structure | 422 |
//! | Producing | origin read failed | 502 |
//! | any before Writing | budget exhausted | 504 |
//! | Writing | delivery failed | none |
//!
//! Error responses carry an error code and message and an empty body; a
//! partial payload is never written. Nothing is retried.
//!
//! ## Statelessness
//!
//! A handler holds only its configuration and origin. Each invocation builds
//! its own deadline, document and payload, so one handler may serve any
//! number of concurrent invocations.

use crate::config::HandlerConfig;
use crate::container::{self, ContainerDocument};
use crate::deadline::Deadline;
use crate::error::{Error, FailureReason, Result};
use crate::metadata::{self, Extraction, MetadataKind};
use crate::origin::{ObjectSource, Origin, OriginObjectReference};
use crate::selector::{self, ResponseMode, TransformedPayload};
use crate::strip;
use crate::writeback::{ResponseHead, WriteBack};
use bytes::Bytes;
use futures::StreamExt;
use std::sync::Arc;
use tracing::{debug, error, info, instrument, warn};

// =============================================================================
// Request
// =============================================================================

/// One transformation request. Consumed by a single invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransformationRequest {
    /// Original object.
    pub origin: OriginObjectReference,
    /// Answer with metadata instead of the stripped image.
    pub show_metadata: bool,
    /// Platform request id, for log correlation.
    pub request_id: Option<String>,
}

impl TransformationRequest {
    /// Creates a request.
    pub fn new(origin: OriginObjectReference, show_metadata: bool) -> Self {
        Self {
            origin,
            show_metadata,
            request_id: None,
        }
    }

    /// Attaches a platform request id.
    pub fn with_request_id(mut self, request_id: impl Into<String>) -> Self {
        self.request_id = Some(request_id.into());
        self
    }
}

// =============================================================================
// Phases
// =============================================================================

/// Lifecycle phase of an invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// Opening the origin object.
    Fetching,
    /// Parsing the container.
    Decoding,
    /// Choosing the response mode.
    Selecting,
    /// Building the payload.
    Producing,
    /// Delivering the response.
    Writing,
    /// Response delivered.
    Done,
    /// Invocation failed.
    Failed(FailureReason),
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Fetching => write!(f, "Fetching"),
            Self::Decoding => write!(f, "Decoding"),
            Self::Selecting => write!(f, "Selecting"),
            Self::Producing => write!(f, "Producing"),
            Self::Writing => write!(f, "Writing"),
            Self::Done => write!(f, "Done"),
            Self::Failed(reason) => write!(f, "Failed({})", reason),
        }
    }
}

struct PhaseTracker {
    current: Phase,
}

impl PhaseTracker {
    fn new() -> Self {
        debug!("Phase {}", Phase::Fetching);
        Self {
            current: Phase::Fetching,
        }
    }

    fn advance(&mut self, next: Phase) {
        debug!("Phase {} -> {}", self.current, next);
        self.current = next;
    }
}

/// How an invocation ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvocationOutcome {
    /// Terminal phase: `Done` or `Failed`.
    pub phase: Phase,
    /// Phase in which a failure occurred.
    pub failed_in: Option<Phase>,
    /// Status of the response that was written, if any.
    pub status: Option<u16>,
    /// Mode of the payload, once selected.
    pub mode: Option<ResponseMode>,
    /// Body bytes delivered.
    pub bytes_written: u64,
}

impl InvocationOutcome {
    /// Returns true if the payload was delivered.
    pub fn is_success(&self) -> bool {
        self.phase == Phase::Done
    }

    /// Failure class, if the invocation failed.
    pub fn failure(&self) -> Option<FailureReason> {
        match self.phase {
            Phase::Failed(reason) => Some(reason),
            _ => None,
        }
    }
}

// =============================================================================
// Handler
// =============================================================================

/// Stateless per-invocation transformation handler.
#[derive(Clone)]
pub struct TransformationHandler {
    origin: Arc<dyn Origin>,
    config: HandlerConfig,
}

impl TransformationHandler {
    /// Creates a handler reading from `origin`.
    pub fn new(origin: Arc<dyn Origin>, config: HandlerConfig) -> Self {
        Self { origin, config }
    }

    /// Handler configuration.
    pub fn config(&self) -> &HandlerConfig {
        &self.config
    }

    /// Deadline for an invocation starting now.
    pub fn deadline(&self) -> Deadline {
        Deadline::after(self.config.effective_budget())
    }

    /// Produces the payload for `request` without delivering it.
    ///
    /// ## Errors
    ///
    /// Any [`Error`]; [`Error::reason`] gives its failure class.
    pub async fn transform(
        &self,
        request: &TransformationRequest,
        deadline: &Deadline,
    ) -> Result<TransformedPayload> {
        let mut tracker = PhaseTracker::new();
        self.produce(request, deadline, &mut tracker).await
    }

    /// Serves `request` end to end, delivering exactly one response to
    /// `writeback`.
    ///
    /// A failure before `Writing` delivers an error response with an empty
    /// body. A failure while writing delivers nothing further.
    #[instrument(
        skip(self, request, writeback),
        fields(
            request_id = request.request_id.as_deref().unwrap_or("-"),
            origin = %request.origin,
            show_metadata = request.show_metadata,
        )
    )]
    pub async fn handle(
        &self,
        request: TransformationRequest,
        writeback: &dyn WriteBack,
    ) -> InvocationOutcome {
        let deadline = self.deadline();
        let mut tracker = PhaseTracker::new();
        info!("Transforming {}", request.origin);

        let payload = match self.produce(&request, &deadline, &mut tracker).await {
            Ok(payload) => payload,
            Err(e) => return self.fail(&mut tracker, e, writeback).await,
        };

        tracker.advance(Phase::Writing);
        let mode = payload.mode();
        let head = ResponseHead::ok(payload.content_type(), payload.content_length());
        let status = head.status;
        let written = deadline
            .run(
                "write response",
                writeback.write_response(head, payload.into_body()),
            )
            .await;

        match written {
            Ok(bytes_written) => {
                tracker.advance(Phase::Done);
                info!(
                    "Delivered {} ({} bytes) for {}",
                    mode, bytes_written, request.origin
                );
                InvocationOutcome {
                    phase: Phase::Done,
                    failed_in: None,
                    status: Some(status),
                    mode: Some(mode),
                    bytes_written,
                }
            }
            Err(e) => {
                let e = match e {
                    Error::WriteBackFailed(_) => e,
                    other => Error::WriteBackFailed(other.to_string()),
                };
                let reason = e.reason();
                error!(error = %e, "Response delivery failed");
                let failed_in = tracker.current;
                tracker.advance(Phase::Failed(reason));
                InvocationOutcome {
                    phase: Phase::Failed(reason),
                    failed_in: Some(failed_in),
                    status: None,
                    mode: Some(mode),
                    bytes_written: 0,
                }
            }
        }
    }

    async fn fail(
        &self,
        tracker: &mut PhaseTracker,
        err: Error,
        writeback: &dyn WriteBack,
    ) -> InvocationOutcome {
        let reason = err.reason();
        let failed_in = tracker.current;
        error!(phase = %failed_in, reason = %reason, error = %err, "Transformation failed");
        tracker.advance(Phase::Failed(reason));

        // The safety margin left after the deadline is reserved for this.
        let head = ResponseHead::error(&err);
        let status = head.status;
        let delivered = writeback
            .write_response(head, futures::stream::empty().boxed())
            .await;
        if let Err(e) = &delivered {
            warn!(error = %e, "Error response could not be delivered");
        }

        InvocationOutcome {
            phase: Phase::Failed(reason),
            failed_in: Some(failed_in),
            status: delivered.ok().map(|_| status),
            mode: None,
            bytes_written: 0,
        }
    }

    async fn produce(
        &self,
        request: &TransformationRequest,
        deadline: &Deadline,
        tracker: &mut PhaseTracker,
    ) -> Result<TransformedPayload> {
        let source = deadline
            .run("fetch origin", self.origin.open(&request.origin))
            .await?;
        if source.len() > self.config.max_object_size {
            return Err(Error::ObjectTooLarge {
                size: source.len(),
                limit: self.config.max_object_size,
            });
        }
        debug!("Opened {} ({} bytes)", request.origin, source.len());

        tracker.advance(Phase::Decoding);
        let document = container::decode(&*source, deadline)
            .await
            .map_err(|e| origin_io_error(e, &request.origin))?;
        let detected = document.format().content_type();
        if let Some(declared) = source.content_type() {
            if !declared_type_matches(declared, detected) {
                warn!(
                    declared,
                    detected, "Origin content type disagrees with the object's bytes"
                );
            }
        }

        tracker.advance(Phase::Selecting);
        let mode = selector::select(request.show_metadata);
        debug!("Selected {}", mode);

        tracker.advance(Phase::Producing);
        match mode {
            ResponseMode::MetadataDocument => {
                self.metadata_document(&document, &*source, &request.origin, deadline)
                    .await
            }
            ResponseMode::StrippedImage => {
                self.stripped_image(&document, &*source, &request.origin, deadline)
                    .await
            }
        }
    }

    async fn stripped_image(
        &self,
        document: &ContainerDocument,
        source: &dyn ObjectSource,
        reference: &OriginObjectReference,
        deadline: &Deadline,
    ) -> Result<TransformedPayload> {
        let outcome = strip::strip(document);
        strip::validate_structure(&outcome.document)?;

        let content_length = outcome.document.encoded_len();
        let upstream = deadline
            .run("reopen origin stream", source.stream_from(0))
            .await
            .map_err(|e| origin_io_error(e, reference))?;
        let body = container::encode(&outcome.document, upstream)?;

        Ok(TransformedPayload::Image {
            content_type: document.format().content_type().to_string(),
            content_length,
            body,
        })
    }

    async fn metadata_document(
        &self,
        document: &ContainerDocument,
        source: &dyn ObjectSource,
        reference: &OriginObjectReference,
        deadline: &Deadline,
    ) -> Result<TransformedPayload> {
        let mut extractions: Vec<Extraction> = Vec::new();
        let mut budget = self.config.max_metadata_bytes;

        for segment in document.metadata_segments() {
            deadline.check("extract metadata")?;
            if segment.kind == MetadataKind::Trailer {
                continue;
            }

            let payload = segment.segment.payload;
            if payload.len > budget {
                warn!(
                    "Skipping {}: {} bytes exceed the remaining metadata budget of {}",
                    metadata::describe(&segment),
                    payload.len,
                    budget
                );
                continue;
            }
            budget -= payload.len;

            let bytes: Bytes = deadline
                .run("read metadata segment", source.read_range(payload))
                .await
                .map_err(|e| origin_io_error(e, reference))?;
            extractions.push(metadata::extract(&segment, &bytes)?);
        }

        let merged = metadata::merge(extractions);
        for warning in &merged.warnings {
            warn!("Metadata: {}", warning);
        }
        debug!("Extracted {} top-level tags", merged.entries.len());

        let bytes = merged.entries.to_json_bytes()?;
        Ok(TransformedPayload::MetadataDocument {
            bytes: Bytes::from(bytes),
        })
    }
}

/// Compares a declared `Content-Type` with a detected one, ignoring
/// parameters and case.
fn declared_type_matches(declared: &str, detected: &str) -> bool {
    let essence = declared.split(';').next().unwrap_or(declared).trim();
    essence.eq_ignore_ascii_case(detected)
}

/// Every read before `Writing` is an origin read; a broken one is the
/// origin's failure, not the container's or the response's.
fn origin_io_error(err: Error, reference: &OriginObjectReference) -> Error {
    match err {
        Error::Io(e) => Error::OriginUnavailable {
            reference: reference.redacted(),
            reason: e.to_string(),
        },
        other => other,
    }
}
