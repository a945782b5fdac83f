//! # Transformation Constants
//!
//! Defines the resource limits, timeouts, wire identifiers and configuration
//! keys used by the transformation handler. These constants are the single
//! source of truth for the bounds enforced while parsing untrusted images.
//!
//! ## Security Rationale
//!
//! Every object served through the handler comes from a bucket that end users
//! can write to, so every parser bound below is a defence against crafted
//! inputs:
//! - The bounded value and units
//! - What the limit protects
//! - The attack vector it closes
//!
//! ## Cross-References
//!
//! - [`crate::container`]: Uses segment and chunk limits while decoding
//! - [`crate::metadata`]: Uses IFD limits while extracting
//! - [`crate::handler`]: Uses the invocation budget and size limits
//! - [`crate::config`]: Uses the environment keys and hard bounds

use std::time::Duration;

// =============================================================================
// Size Limits
// =============================================================================

/// Default maximum origin object size (512 MiB).
///
/// **Security**: Objects above this size are refused before decoding starts.
/// Decoding is streaming, so this bounds wall-clock time rather than memory.
pub const DEFAULT_MAX_OBJECT_SIZE: u64 = 512 * 1024 * 1024;

/// Hard ceiling for the configurable object size (4 GiB).
pub const MAX_OBJECT_SIZE_CEILING: u64 = 4 * 1024 * 1024 * 1024;

/// Maximum total bytes of metadata segments materialized in metadata mode
/// (16 MiB).
///
/// **Security**: Metadata mode is the only path that reads segment payloads
/// into memory. A PNG can declare text chunks of up to 2 GiB each.
pub const MAX_METADATA_BYTES: u64 = 16 * 1024 * 1024;

/// Maximum number of top-level segments in a container.
///
/// **Attack Vector**: Millions of empty `COM` segments or zero-length PNG
/// chunks would inflate the segment table without bound.
pub const MAX_SEGMENTS: usize = 65_536;

/// Maximum entries in a single TIFF image file directory.
///
/// **Attack Vector**: An IFD entry count of 65535 pointing at a tiny segment
/// is rejected by bounds checks, but this keeps the worst case explicit.
pub const MAX_IFD_ENTRIES: usize = 4096;

/// Maximum nesting of Exif sub-directories (IFD0 -> Exif -> Interop).
pub const MAX_IFD_DEPTH: usize = 4;

/// Maximum inflated size of a compressed PNG text or ICC chunk (1 MiB).
///
/// **Attack Vector**: Compression bombs in `zTXt` / `iCCP`.
pub const MAX_INFLATED_TEXT: u64 = 1024 * 1024;

/// Longest run of `FF` fill bytes accepted before a JPEG marker after a
/// scan (64 KiB).
///
/// **Attack Vector**: The run is buffered until its marker arrives, so an
/// endless run of `FF` would otherwise grow the scan buffer without bound.
pub const MAX_JPEG_FILL_RUN: usize = 64 * 1024;

/// Bytes of an `APPn` payload retained while decoding to classify it.
pub const APP_IDENTIFIER_PEEK: usize = 64;

/// Default read chunk size for the scan buffer and the encode stream (64 KiB).
pub const READ_CHUNK_SIZE: usize = 64 * 1024;

/// Smallest accepted read chunk size.
pub const MIN_READ_CHUNK_SIZE: usize = 4 * 1024;

/// Largest accepted read chunk size.
pub const MAX_READ_CHUNK_SIZE: usize = 8 * 1024 * 1024;

/// Largest length a PNG chunk may declare (2^31 - 1).
pub const PNG_MAX_CHUNK_LEN: u32 = 0x7FFF_FFFF;

// =============================================================================
// Timeouts
// =============================================================================

/// Default wall-clock budget for one invocation (60 seconds).
///
/// Matches the one-minute timeout the transformation function is deployed
/// with. The handler stops before the platform kills it.
pub const DEFAULT_INVOCATION_BUDGET: Duration = Duration::from_secs(60);

/// Portion of the budget reserved for writing an error response.
pub const DEADLINE_SAFETY_MARGIN: Duration = Duration::from_secs(2);

/// Largest configurable invocation budget (15 minutes).
pub const MAX_INVOCATION_BUDGET: Duration = Duration::from_secs(900);

/// Timeout for establishing a connection to the origin.
pub const ORIGIN_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

// =============================================================================
// Request Flags and Content Types
// =============================================================================

/// Query string parameter selecting metadata mode.
///
/// This is the only query parameter forwarded to the origin and included in
/// the edge cache key.
pub const SHOW_METADATA_PARAM: &str = "showExif";

/// Content type of the metadata document.
pub const METADATA_CONTENT_TYPE: &str = "application/json";

/// Content type of a stripped JPEG.
pub const JPEG_CONTENT_TYPE: &str = "image/jpeg";

/// Content type of a stripped PNG.
pub const PNG_CONTENT_TYPE: &str = "image/png";

// =============================================================================
// Configuration Keys
// =============================================================================

/// Environment variable for the invocation budget in milliseconds.
pub const ENV_BUDGET_MS: &str = "EXIFGATE_BUDGET_MS";

/// Environment variable for the deadline safety margin in milliseconds.
pub const ENV_SAFETY_MARGIN_MS: &str = "EXIFGATE_SAFETY_MARGIN_MS";

/// Environment variable for the maximum object size in bytes.
pub const ENV_MAX_OBJECT_SIZE: &str = "EXIFGATE_MAX_OBJECT_SIZE";

/// Environment variable for the maximum metadata bytes in metadata mode.
pub const ENV_MAX_METADATA_BYTES: &str = "EXIFGATE_MAX_METADATA_BYTES";

/// Environment variable for the read chunk size in bytes.
pub const ENV_READ_CHUNK_SIZE: &str = "EXIFGATE_READ_CHUNK_SIZE";

/// Environment variable overriding the metadata query parameter name.
pub const ENV_SHOW_METADATA_PARAM: &str = "EXIFGATE_SHOW_METADATA_PARAM";

/// Environment variable holding the log filter directive.
pub const ENV_LOG: &str = "EXIFGATE_LOG";

/// Environment variable selecting the log format (`json` or `text`).
pub const ENV_LOG_FORMAT: &str = "EXIFGATE_LOG_FORMAT";
