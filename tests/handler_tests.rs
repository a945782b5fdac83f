//! End-to-end tests for `TransformationHandler`.
//!
//! Every test drives a full invocation against an in-memory origin and
//! inspects the single response delivered to a `MemoryWriteBack`.

mod common;

use async_trait::async_trait;
use bytes::Bytes;
use common::*;
use exifgate::container;
use exifgate::{
    ByteRange, ByteStream, Deadline, Error, FailureReason, HandlerConfig, InvocationOutcome,
    MemoryOrigin, MemorySource, MemoryWriteBack, ObjectSource, Origin, OriginObjectReference,
    Phase, ResponseHead, ResponseMode, SegmentKind, TransformationHandler, TransformationRequest,
    WriteBack, WrittenResponse,
};
use futures::StreamExt;
use serde_json::json;
use std::sync::{Arc, Mutex};
use std::time::Duration;

const KEY: &str = "photo";

fn handler_for(data: Vec<u8>, config: HandlerConfig) -> TransformationHandler {
    let origin = MemoryOrigin::new().with_object(KEY, data).with_chunk_size(7);
    TransformationHandler::new(Arc::new(origin), config)
}

async fn invoke_with(
    data: Vec<u8>,
    show_metadata: bool,
    config: HandlerConfig,
) -> (InvocationOutcome, Option<WrittenResponse>) {
    let handler = handler_for(data, config);
    let writeback = MemoryWriteBack::new();
    let request = TransformationRequest::new(OriginObjectReference::new(KEY), show_metadata);
    let outcome = handler.handle(request, &writeback).await;
    let response = writeback.single().unwrap();
    (outcome, response)
}

async fn invoke(data: Vec<u8>, show_metadata: bool) -> (InvocationOutcome, WrittenResponse) {
    let (outcome, response) = invoke_with(data, show_metadata, HandlerConfig::default()).await;
    (outcome, response.expect("exactly one response"))
}

fn json_body(response: &WrittenResponse) -> serde_json::Value {
    serde_json::from_slice(&response.body).expect("metadata body is JSON")
}

// =============================================================================
// Scenarios
// =============================================================================

#[tokio::test]
async fn test_strip_removes_exif_and_keeps_image_bytes() {
    let input = jpeg_with_orientation();
    let (outcome, response) = invoke(input, false).await;

    assert!(outcome.is_success());
    assert_eq!(outcome.mode, Some(ResponseMode::StrippedImage));
    assert_eq!(response.head.status, 200);
    assert_eq!(response.head.content_type.as_deref(), Some("image/jpeg"));
    assert_eq!(response.head.content_length, response.body.len() as u64);

    // Identical to the same image built without the Exif segment.
    assert_eq!(response.body, jpeg_with(&[]));
    assert!(!contains(&response.body, b"Exif\0\0"));
}

#[tokio::test]
async fn test_show_metadata_returns_orientation() {
    let (outcome, response) = invoke(jpeg_with_orientation(), true).await;

    assert!(outcome.is_success());
    assert_eq!(outcome.mode, Some(ResponseMode::MetadataDocument));
    assert_eq!(
        response.head.content_type.as_deref(),
        Some("application/json")
    );
    assert_eq!(json_body(&response), json!({ "Orientation": 1 }));
}

#[tokio::test]
async fn test_image_without_metadata() {
    let input = jpeg_with(&[]);

    let (_, stripped) = invoke(input.clone(), false).await;
    assert_eq!(stripped.body, input);

    let (outcome, metadata) = invoke(input, true).await;
    assert!(outcome.is_success());
    assert_eq!(json_body(&metadata), json!({}));
}

#[tokio::test]
async fn test_unknown_tag_type_is_opaque() {
    let tiff = tiff(&[short(0x0112, 6), raw(0x9999, 99, [1, 2, 3, 4])], &[]);
    let input = jpeg_with(&[exif_app1(&tiff)]);

    let (outcome, response) = invoke(input, true).await;

    assert!(outcome.is_success());
    assert_eq!(
        json_body(&response),
        json!({
            "Orientation": 6,
            "Tag0x9999": { "type": "bytes", "hex": "01020304" }
        })
    );
}

// =============================================================================
// Metadata Documents
// =============================================================================

#[tokio::test]
async fn test_metadata_merges_segments_in_order() {
    let tiff = tiff(
        &[ascii(0x010F, "Acme"), short(0x0112, 1)],
        &[rational(0x829A, 1, 250), undefined(0x9000, b"0232")],
    );
    let input = jpeg_with(&[
        exif_app1(&tiff),
        xmp_app1("<x:xmpmeta/>"),
        icc_app2(&icc_profile_header()),
        comment("hello"),
    ]);

    let (_, response) = invoke(input, true).await;
    let body = json_body(&response);

    assert_eq!(body["Make"], json!("Acme"));
    assert_eq!(body["Orientation"], json!(1));
    assert_eq!(body["ExifIFD"]["ExposureTime"], json!(0.004));
    assert_eq!(body["ExifIFD"]["ExifVersion"], json!("0232"));
    assert_eq!(body["XMP"], json!("<x:xmpmeta/>"));
    assert_eq!(body["ICCProfile"]["ColorSpace"], json!("RGB"));
    assert_eq!(body["ICCProfile"]["ProfileClass"], json!("mntr"));
    assert_eq!(body["Comment"], json!("hello"));

    // Keys follow segment order, then tag order within a segment.
    let text = String::from_utf8(response.body.clone()).unwrap();
    let positions: Vec<usize> = ["Make", "Orientation", "ExifIFD", "XMP", "ICCProfile", "Comment"]
        .iter()
        .map(|key| text.find(&format!("\"{}\":", key)).unwrap())
        .collect();
    assert!(positions.windows(2).all(|w| w[0] < w[1]), "{}", text);
}

#[tokio::test]
async fn test_first_occurrence_of_duplicate_tag_wins() {
    let input = jpeg_with(&[
        exif_app1(&tiff(&[short(0x0112, 3)], &[])),
        exif_app1(&tiff(&[short(0x0112, 8)], &[])),
    ]);

    let (outcome, response) = invoke(input, true).await;

    assert!(outcome.is_success());
    assert_eq!(json_body(&response), json!({ "Orientation": 3 }));
}

#[tokio::test]
async fn test_zero_denominator_serializes_as_null() {
    let input = jpeg_with(&[exif_app1(&tiff(&[], &[rational(0x829A, 1, 0)]))]);

    let (_, response) = invoke(input, true).await;

    assert_eq!(json_body(&response)["ExifIFD"]["ExposureTime"], json!(null));
}

#[tokio::test]
async fn test_png_text_chunks() {
    let input = png_with(&[
        text_chunk("Title", "Sunset"),
        ztxt_chunk("Description", "A long description"),
        itxt_chunk("Author", "Zoë", true),
        time_chunk(2024, 2, 29, 13, 5, 9),
        exif_chunk(&tiff(&[short(0x0112, 1)], &[])),
    ]);

    let (outcome, response) = invoke(input, true).await;

    assert!(outcome.is_success());
    assert_eq!(
        json_body(&response),
        json!({
            "Title": "Sunset",
            "Description": "A long description",
            "Author": "Zoë",
            "ModifyDate": "2024:02:29 13:05:09",
            "Orientation": 1
        })
    );
}

#[tokio::test]
async fn test_malformed_exif_fails_metadata_but_not_strip() {
    let mut bad = tiff(&[short(0x0112, 1)], &[]);
    bad[..2].copy_from_slice(b"XX");
    let input = jpeg_with(&[exif_app1(&bad)]);

    let (outcome, response) = invoke(input.clone(), true).await;
    assert_eq!(outcome.failure(), Some(FailureReason::MalformedMetadata));
    assert_eq!(outcome.failed_in, Some(Phase::Producing));
    assert_eq!(response.head.status, 422);
    assert_eq!(response.head.error_code.as_deref(), Some("MalformedMetadata"));
    assert!(response.body.is_empty());

    // Stripping never parses the Exif block.
    let (outcome, response) = invoke(input, false).await;
    assert!(outcome.is_success());
    assert_eq!(response.body, jpeg_with(&[]));
}

#[tokio::test]
async fn test_metadata_budget_skips_large_segments() {
    let big = "x".repeat(512);
    let input = jpeg_with(&[xmp_app1(&big), comment("kept")]);
    let config = HandlerConfig {
        max_metadata_bytes: 64,
        ..HandlerConfig::default()
    };

    let (outcome, response) = invoke_with(input, true, config).await;
    let response = response.unwrap();

    assert!(outcome.is_success());
    assert_eq!(json_body(&response), json!({ "Comment": "kept" }));
}

// =============================================================================
// Properties
// =============================================================================

fn metadata_rich_jpeg() -> Vec<u8> {
    let tiff = tiff(
        &[ascii(0x010F, "SecretCam"), short(0x0112, 1)],
        &[ascii(0x9003, "2021:01:01 00:00:00")],
    );
    let mut input = jpeg_with(&[
        exif_app1(&tiff),
        xmp_app1("<x:xmpmeta>secret-xmp</x:xmpmeta>"),
        icc_app2(&icc_profile_header()),
        comment("secret-comment"),
    ]);
    input.extend_from_slice(b"secret-trailer");
    input
}

fn metadata_rich_png() -> Vec<u8> {
    png_with(&[
        text_chunk("Author", "secret-author"),
        exif_chunk(&tiff(&[ascii(0x010F, "SecretCam")], &[])),
        time_chunk(2020, 1, 1, 0, 0, 0),
    ])
}

#[tokio::test]
async fn test_strip_leaks_no_metadata() {
    for input in [metadata_rich_jpeg(), metadata_rich_png()] {
        let (outcome, response) = invoke(input, false).await;
        assert!(outcome.is_success());

        for needle in [
            &b"SecretCam"[..],
            b"secret-xmp",
            b"secret-comment",
            b"secret-trailer",
            b"secret-author",
            b"ICC_PROFILE",
            b"tIME",
        ] {
            assert!(
                !contains(&response.body, needle),
                "stripped output contains {}",
                String::from_utf8_lossy(needle)
            );
        }

        let source = MemorySource::new(response.body.clone());
        let deadline = Deadline::after(Duration::from_secs(10));
        let document = container::decode(&source, &deadline).await.unwrap();
        assert!(!document.has_metadata());
    }
}

#[tokio::test]
async fn test_strip_is_idempotent() {
    for input in [metadata_rich_jpeg(), metadata_rich_png()] {
        let (_, once) = invoke(input, false).await;
        let (_, twice) = invoke(once.body.clone(), false).await;
        assert_eq!(once.body, twice.body);
    }
}

#[tokio::test]
async fn test_strip_preserves_image_data_segments() {
    let input = metadata_rich_png();
    let (_, response) = invoke(input.clone(), false).await;

    let deadline = Deadline::after(Duration::from_secs(10));
    let original = container::decode(&MemorySource::new(input.clone()), &deadline)
        .await
        .unwrap();
    let stripped = container::decode(&MemorySource::new(response.body.clone()), &deadline)
        .await
        .unwrap();

    let kept_bytes = |doc: &exifgate::ContainerDocument, data: &[u8]| -> Vec<Vec<u8>> {
        doc.segments()
            .iter()
            .filter(|s| !s.kind.is_metadata())
            .map(|s| data[s.range.start as usize..s.range.end() as usize].to_vec())
            .collect()
    };
    assert_eq!(
        kept_bytes(&original, &input),
        kept_bytes(&stripped, &response.body)
    );
}

#[tokio::test]
async fn test_payload_modes_are_exclusive() {
    let input = metadata_rich_jpeg();

    let (_, image) = invoke(input.clone(), false).await;
    assert_eq!(image.head.content_type.as_deref(), Some("image/jpeg"));
    assert!(image.body.starts_with(&SOI));
    assert!(serde_json::from_slice::<serde_json::Value>(&image.body).is_err());

    let (_, metadata) = invoke(input, true).await;
    assert_eq!(
        metadata.head.content_type.as_deref(),
        Some("application/json")
    );
    assert!(!contains(&metadata.body, &SCAN_DATA));
    assert!(json_body(&metadata).is_object());
}

/// Records every ranged read and stream opened on an in-memory object.
#[derive(Default)]
struct AccessLog {
    ranges: Vec<ByteRange>,
    streams: usize,
}

struct RecordingSource {
    inner: MemorySource,
    log: Arc<Mutex<AccessLog>>,
}

#[async_trait]
impl ObjectSource for RecordingSource {
    fn len(&self) -> u64 {
        self.inner.len()
    }

    async fn read_range(&self, range: ByteRange) -> exifgate::Result<Bytes> {
        self.log.lock().unwrap().ranges.push(range);
        self.inner.read_range(range).await
    }

    async fn stream_from(&self, offset: u64) -> exifgate::Result<ByteStream> {
        self.log.lock().unwrap().streams += 1;
        self.inner.stream_from(offset).await
    }
}

struct RecordingOrigin {
    data: Bytes,
    log: Arc<Mutex<AccessLog>>,
}

#[async_trait]
impl Origin for RecordingOrigin {
    async fn open(
        &self,
        _reference: &OriginObjectReference,
    ) -> exifgate::Result<Box<dyn ObjectSource>> {
        Ok(Box::new(RecordingSource {
            inner: MemorySource::new(self.data.clone()),
            log: Arc::clone(&self.log),
        }))
    }
}

#[tokio::test]
async fn test_metadata_mode_never_reads_image_data() {
    let input = metadata_rich_jpeg();
    let log = Arc::new(Mutex::new(AccessLog::default()));
    let origin = RecordingOrigin {
        data: Bytes::from(input.clone()),
        log: Arc::clone(&log),
    };
    let handler = TransformationHandler::new(Arc::new(origin), HandlerConfig::default());
    let writeback = MemoryWriteBack::new();

    let outcome = handler
        .handle(
            TransformationRequest::new(OriginObjectReference::new(KEY), true),
            &writeback,
        )
        .await;
    assert!(outcome.is_success());

    let deadline = Deadline::after(Duration::from_secs(10));
    let document = container::decode(&MemorySource::new(input), &deadline)
        .await
        .unwrap();
    let image_ranges: Vec<ByteRange> = document
        .segments()
        .iter()
        .filter(|s| s.kind == SegmentKind::ImageData)
        .map(|s| s.range)
        .collect();
    assert!(!image_ranges.is_empty());

    let log = log.lock().unwrap();
    assert_eq!(log.streams, 1, "metadata mode scans the object once");
    assert!(!log.ranges.is_empty());
    for read in &log.ranges {
        for image in &image_ranges {
            assert!(!read.overlaps(image), "read {:?} touches image data", read);
        }
    }
}

#[tokio::test]
async fn test_truncated_input_never_yields_partial_payload() {
    for input in [jpeg_with_orientation(), metadata_rich_png()] {
        for cut in 0..input.len() {
            for show_metadata in [false, true] {
                let (outcome, response) = invoke(input[..cut].to_vec(), show_metadata).await;

                assert_eq!(
                    outcome.failure(),
                    Some(FailureReason::UnsupportedFormat),
                    "cut at {} of {}",
                    cut,
                    input.len()
                );
                assert_eq!(response.head.status, 415);
                assert!(response.body.is_empty());
                assert_eq!(response.head.content_length, 0);
            }
        }
    }
}

#[tokio::test]
async fn test_unrecognized_format() {
    let (outcome, response) = invoke(b"GIF89a\x01\x00\x01\x00".to_vec(), false).await;

    assert_eq!(outcome.failure(), Some(FailureReason::UnsupportedFormat));
    assert_eq!(outcome.failed_in, Some(Phase::Decoding));
    assert_eq!(response.head.error_code.as_deref(), Some("UnsupportedFormat"));
}

// =============================================================================
// Origin Failures
// =============================================================================

#[tokio::test]
async fn test_missing_object_is_404() {
    let handler = handler_for(jpeg_with(&[]), HandlerConfig::default());
    let writeback = MemoryWriteBack::new();

    let outcome = handler
        .handle(
            TransformationRequest::new(OriginObjectReference::new("missing"), false),
            &writeback,
        )
        .await;

    assert_eq!(outcome.failure(), Some(FailureReason::OriginUnavailable));
    assert_eq!(outcome.failed_in, Some(Phase::Fetching));
    assert_eq!(outcome.status, Some(404));
    let response = writeback.single().unwrap().unwrap();
    assert_eq!(response.head.error_code.as_deref(), Some("NoSuchKey"));
    assert!(response.body.is_empty());
}

#[tokio::test]
async fn test_object_over_size_limit() {
    let config = HandlerConfig {
        max_object_size: 16,
        ..HandlerConfig::default()
    };

    let (outcome, response) = invoke_with(jpeg_with(&[]), false, config).await;

    assert_eq!(outcome.failure(), Some(FailureReason::OriginUnavailable));
    assert_eq!(response.unwrap().head.status, 413);
}

// =============================================================================
// Deadline
// =============================================================================

/// Origin whose `open` takes longer than any test budget.
struct SlowOrigin;

#[async_trait]
impl Origin for SlowOrigin {
    async fn open(
        &self,
        _reference: &OriginObjectReference,
    ) -> exifgate::Result<Box<dyn ObjectSource>> {
        tokio::time::sleep(Duration::from_secs(3600)).await;
        Ok(Box::new(MemorySource::new(jpeg_with(&[]))))
    }
}

/// Object whose stream delivers the first bytes and then stalls.
struct StallingOrigin;

struct StallingSource {
    data: Bytes,
}

#[async_trait]
impl ObjectSource for StallingSource {
    fn len(&self) -> u64 {
        self.data.len() as u64
    }

    async fn read_range(&self, range: ByteRange) -> exifgate::Result<Bytes> {
        MemorySource::new(self.data.clone()).read_range(range).await
    }

    async fn stream_from(&self, _offset: u64) -> exifgate::Result<ByteStream> {
        let head: std::io::Result<Bytes> = Ok(self.data.slice(..4));
        Ok(futures::stream::iter(vec![head])
            .chain(futures::stream::pending())
            .boxed())
    }
}

#[async_trait]
impl Origin for StallingOrigin {
    async fn open(
        &self,
        _reference: &OriginObjectReference,
    ) -> exifgate::Result<Box<dyn ObjectSource>> {
        Ok(Box::new(StallingSource {
            data: Bytes::from(jpeg_with(&[])),
        }))
    }
}

fn short_budget() -> HandlerConfig {
    HandlerConfig {
        budget: Duration::from_secs(1),
        safety_margin: Duration::from_millis(100),
        ..HandlerConfig::default()
    }
}

#[tokio::test(start_paused = true)]
async fn test_slow_origin_times_out() {
    let handler = TransformationHandler::new(Arc::new(SlowOrigin), short_budget());
    let writeback = MemoryWriteBack::new();

    let outcome = handler
        .handle(
            TransformationRequest::new(OriginObjectReference::new(KEY), false),
            &writeback,
        )
        .await;

    assert_eq!(outcome.failure(), Some(FailureReason::Timeout));
    assert_eq!(outcome.failed_in, Some(Phase::Fetching));
    let response = writeback.single().unwrap().unwrap();
    assert_eq!(response.head.status, 504);
    assert!(response.body.is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_stalled_scan_times_out() {
    let handler = TransformationHandler::new(Arc::new(StallingOrigin), short_budget());
    let writeback = MemoryWriteBack::new();

    let outcome = handler
        .handle(
            TransformationRequest::new(OriginObjectReference::new(KEY), true),
            &writeback,
        )
        .await;

    assert_eq!(outcome.failure(), Some(FailureReason::Timeout));
    assert_eq!(outcome.failed_in, Some(Phase::Decoding));
    assert_eq!(outcome.status, Some(504));
}

/// Object whose origin labels it with the wrong content type.
struct MislabeledSource {
    inner: MemorySource,
}

#[async_trait]
impl ObjectSource for MislabeledSource {
    fn len(&self) -> u64 {
        self.inner.len()
    }

    fn content_type(&self) -> Option<&str> {
        Some("application/octet-stream")
    }

    async fn read_range(&self, range: ByteRange) -> exifgate::Result<Bytes> {
        self.inner.read_range(range).await
    }

    async fn stream_from(&self, offset: u64) -> exifgate::Result<ByteStream> {
        self.inner.stream_from(offset).await
    }
}

struct MislabelingOrigin;

#[async_trait]
impl Origin for MislabelingOrigin {
    async fn open(
        &self,
        _reference: &OriginObjectReference,
    ) -> exifgate::Result<Box<dyn ObjectSource>> {
        Ok(Box::new(MislabeledSource {
            inner: MemorySource::new(jpeg_with_orientation()),
        }))
    }
}

#[tokio::test]
async fn test_content_type_follows_detected_format() {
    let handler = TransformationHandler::new(Arc::new(MislabelingOrigin), HandlerConfig::default());
    let writeback = MemoryWriteBack::new();

    let outcome = handler
        .handle(
            TransformationRequest::new(OriginObjectReference::new(KEY), false),
            &writeback,
        )
        .await;

    assert!(outcome.is_success());
    let response = writeback.single().unwrap().unwrap();
    assert_eq!(response.head.content_type.as_deref(), Some("image/jpeg"));
    assert_eq!(response.body, jpeg_with(&[]));
}

// =============================================================================
// Origin Read Failures
// =============================================================================

/// Object that decodes cleanly but whose connection drops on every read
/// after the first scan.
struct DroppingSource {
    inner: MemorySource,
    streams: Mutex<usize>,
}

fn connection_reset() -> Error {
    Error::Io(std::io::Error::new(
        std::io::ErrorKind::ConnectionReset,
        "connection reset by peer",
    ))
}

#[async_trait]
impl ObjectSource for DroppingSource {
    fn len(&self) -> u64 {
        self.inner.len()
    }

    async fn read_range(&self, _range: ByteRange) -> exifgate::Result<Bytes> {
        Err(connection_reset())
    }

    async fn stream_from(&self, offset: u64) -> exifgate::Result<ByteStream> {
        let opened = {
            let mut streams = self.streams.lock().unwrap();
            *streams += 1;
            *streams
        };
        if opened > 1 {
            return Err(connection_reset());
        }
        self.inner.stream_from(offset).await
    }
}

struct DroppingOrigin;

#[async_trait]
impl Origin for DroppingOrigin {
    async fn open(
        &self,
        _reference: &OriginObjectReference,
    ) -> exifgate::Result<Box<dyn ObjectSource>> {
        Ok(Box::new(DroppingSource {
            inner: MemorySource::new(jpeg_with_orientation()),
            streams: Mutex::new(0),
        }))
    }
}

#[tokio::test]
async fn test_origin_read_failure_while_producing_is_origin_unavailable() {
    for show_metadata in [true, false] {
        let handler = TransformationHandler::new(Arc::new(DroppingOrigin), HandlerConfig::default());
        let writeback = MemoryWriteBack::new();

        let outcome = handler
            .handle(
                TransformationRequest::new(OriginObjectReference::new(KEY), show_metadata),
                &writeback,
            )
            .await;

        assert_eq!(
            outcome.failure(),
            Some(FailureReason::OriginUnavailable),
            "show_metadata={}",
            show_metadata
        );
        assert_eq!(outcome.failed_in, Some(Phase::Producing));
        let response = writeback.single().unwrap().unwrap();
        assert_eq!(response.head.status, 502);
        assert_eq!(response.head.error_code.as_deref(), Some("OriginUnavailable"));
        assert!(response.body.is_empty());
    }
}

#[tokio::test]
async fn test_transform_reports_origin_read_failure() {
    let handler = TransformationHandler::new(Arc::new(DroppingOrigin), HandlerConfig::default());
    let request = TransformationRequest::new(OriginObjectReference::new(KEY), true);

    let err = handler
        .transform(&request, &handler.deadline())
        .await
        .err()
        .unwrap();

    assert!(matches!(err, Error::OriginUnavailable { .. }), "{}", err);
    assert!(err.to_string().contains("connection reset"));
}

// =============================================================================
// Write-Back Failures
// =============================================================================

/// Destination that rejects every response.
struct RejectingWriteBack {
    attempts: Mutex<Vec<u16>>,
}

#[async_trait]
impl WriteBack for RejectingWriteBack {
    async fn write_response(&self, head: ResponseHead, _body: ByteStream) -> exifgate::Result<u64> {
        self.attempts.lock().unwrap().push(head.status);
        Err(Error::WriteBackFailed("connection reset".to_string()))
    }
}

#[tokio::test]
async fn test_write_back_failure_is_not_retried() {
    let handler = handler_for(jpeg_with_orientation(), HandlerConfig::default());
    let writeback = RejectingWriteBack {
        attempts: Mutex::new(Vec::new()),
    };

    let outcome = handler
        .handle(
            TransformationRequest::new(OriginObjectReference::new(KEY), false),
            &writeback,
        )
        .await;

    assert_eq!(outcome.failure(), Some(FailureReason::WriteBackFailed));
    assert_eq!(outcome.failed_in, Some(Phase::Writing));
    assert_eq!(outcome.status, None);
    assert_eq!(outcome.bytes_written, 0);
    assert_eq!(*writeback.attempts.lock().unwrap(), vec![200]);
}

// =============================================================================
// Concurrency
// =============================================================================

#[tokio::test]
async fn test_concurrent_invocations_share_handler() {
    let origin = MemoryOrigin::new()
        .with_object("a.jpg", jpeg_with_orientation())
        .with_object("b.png", metadata_rich_png());
    let handler = TransformationHandler::new(Arc::new(origin), HandlerConfig::default());

    let runs = (0..8).map(|i| {
        let handler = handler.clone();
        async move {
            let key = if i % 2 == 0 { "a.jpg" } else { "b.png" };
            let writeback = MemoryWriteBack::new();
            let request = TransformationRequest::new(OriginObjectReference::new(key), i % 4 < 2)
                .with_request_id(format!("req-{}", i));
            let outcome = handler.handle(request, &writeback).await;
            (outcome, writeback.single().unwrap().unwrap())
        }
    });

    for (outcome, response) in futures::future::join_all(runs).await {
        assert!(outcome.is_success());
        assert_eq!(response.head.content_length, response.body.len() as u64);
    }
}

#[tokio::test]
async fn test_transform_without_delivery() {
    let handler = handler_for(jpeg_with_orientation(), HandlerConfig::default());
    let request = TransformationRequest::new(OriginObjectReference::new(KEY), true);

    let payload = handler
        .transform(&request, &handler.deadline())
        .await
        .unwrap();

    assert_eq!(payload.mode(), ResponseMode::MetadataDocument);
    assert_eq!(payload.content_type(), "application/json");
    let body: Vec<Bytes> = payload.into_body().map(|c| c.unwrap()).collect().await;
    let body: Vec<u8> = body.concat();
    assert_eq!(
        serde_json::from_slice::<serde_json::Value>(&body).unwrap(),
        json!({ "Orientation": 1 })
    );
}
