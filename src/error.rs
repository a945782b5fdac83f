//! Error types for the transformation handler.

use std::time::Duration;

/// Result type alias for transformation operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while transforming an object.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    // =========================================================================
    // Origin Errors
    // =========================================================================
    /// Origin object does not exist.
    #[error("origin object not found: {reference}")]
    OriginNotFound { reference: String },

    /// Origin refused access to the object.
    #[error("access denied to origin object: {reference}")]
    OriginAccessDenied { reference: String },

    /// Origin could not be reached or returned an unexpected response.
    #[error("origin unavailable for {reference}: {reason}")]
    OriginUnavailable { reference: String, reason: String },

    /// Origin object exceeds the configured size limit.
    #[error("object exceeds size limit: {size} > {limit} bytes")]
    ObjectTooLarge { size: u64, limit: u64 },

    // =========================================================================
    // Container Errors
    // =========================================================================
    /// Input is not a recognized container or violates its grammar.
    #[error("malformed container at offset {offset}: {reason}")]
    MalformedContainer { offset: u64, reason: String },

    /// A declared segment extends past the available bytes.
    #[error("truncated input: segment at offset {offset} needs {needed} bytes, {available} available")]
    TruncatedInput {
        offset: u64,
        needed: u64,
        available: u64,
    },

    // =========================================================================
    // Metadata Errors
    // =========================================================================
    /// A metadata segment violates its own size or offset bounds.
    #[error("malformed metadata in {segment}: {reason}")]
    MalformedMetadata { segment: String, reason: String },

    // =========================================================================
    // Delivery Errors
    // =========================================================================
    /// The response could not be delivered.
    #[error("write-back failed: {0}")]
    WriteBackFailed(String),

    // =========================================================================
    // Timeout Errors
    // =========================================================================
    /// The invocation budget was exhausted.
    #[error("operation timed out after {duration:?}: {operation}")]
    Timeout {
        operation: String,
        duration: Duration,
    },

    // =========================================================================
    // Input and Configuration Errors
    // =========================================================================
    /// The invocation event is missing required fields.
    #[error("invalid invocation event: {0}")]
    InvalidEvent(String),

    /// A configuration value is out of bounds or unparsable.
    #[error("invalid configuration {key}: {reason}")]
    InvalidConfig { key: String, reason: String },

    // =========================================================================
    // I/O Errors
    // =========================================================================
    /// Generic I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    // =========================================================================
    // Internal Errors
    // =========================================================================
    /// Internal error (should not happen).
    #[error("internal error: {0}")]
    Internal(String),
}

/// Failure classes reported to the invoking layer.
///
/// Every [`Error`] collapses into exactly one of these when an invocation
/// ends in the `Failed` state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureReason {
    /// Fetch failed: not found, access denied or network.
    OriginUnavailable,
    /// Input is not a recognized container or is truncated.
    UnsupportedFormat,
    /// A metadata segment's internal structure is invalid.
    MalformedMetadata,
    /// Response delivery failed.
    WriteBackFailed,
    /// Budget exceeded mid-processing.
    Timeout,
}

impl std::fmt::Display for FailureReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::OriginUnavailable => write!(f, "OriginUnavailable"),
            Self::UnsupportedFormat => write!(f, "UnsupportedFormat"),
            Self::MalformedMetadata => write!(f, "MalformedMetadata"),
            Self::WriteBackFailed => write!(f, "WriteBackFailed"),
            Self::Timeout => write!(f, "Timeout"),
        }
    }
}

impl Error {
    /// Maps this error onto the failure taxonomy.
    ///
    /// Only [`Error::WriteBackFailed`] is a delivery failure; the handler
    /// wraps every error raised while writing into it. Before that, I/O
    /// is always an origin read and an internal error means the input
    /// could not be laid out in memory.
    pub fn reason(&self) -> FailureReason {
        match self {
            Self::OriginNotFound { .. }
            | Self::OriginAccessDenied { .. }
            | Self::OriginUnavailable { .. }
            | Self::ObjectTooLarge { .. }
            | Self::InvalidEvent(_)
            | Self::Io(_) => FailureReason::OriginUnavailable,
            Self::MalformedContainer { .. }
            | Self::TruncatedInput { .. }
            | Self::InvalidConfig { .. }
            | Self::Internal(_) => FailureReason::UnsupportedFormat,
            Self::MalformedMetadata { .. } | Self::Serialization(_) => {
                FailureReason::MalformedMetadata
            }
            Self::Timeout { .. } => FailureReason::Timeout,
            Self::WriteBackFailed(_) => FailureReason::WriteBackFailed,
        }
    }

    /// HTTP status of the error response written for this error.
    pub fn status_code(&self) -> u16 {
        match self {
            Self::OriginNotFound { .. } => 404,
            Self::OriginAccessDenied { .. } => 403,
            Self::ObjectTooLarge { .. } => 413,
            Self::InvalidEvent(_) => 400,
            Self::OriginUnavailable { .. } | Self::Io(_) => 502,
            Self::MalformedContainer { .. } | Self::TruncatedInput { .. } => 415,
            Self::MalformedMetadata { .. } => 422,
            Self::Timeout { .. } => 504,
            _ => 500,
        }
    }

    /// Short machine-readable error code for the error response.
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::OriginNotFound { .. } => "NoSuchKey",
            Self::OriginAccessDenied { .. } => "AccessDenied",
            Self::ObjectTooLarge { .. } => "EntityTooLarge",
            Self::InvalidEvent(_) => "InvalidRequest",
            Self::OriginUnavailable { .. } | Self::Io(_) => "OriginUnavailable",
            Self::MalformedContainer { .. } | Self::TruncatedInput { .. } => "UnsupportedFormat",
            Self::MalformedMetadata { .. } => "MalformedMetadata",
            Self::Timeout { .. } => "Timeout",
            _ => "InternalError",
        }
    }

    /// Returns true if the error came from the container codec.
    pub fn is_container_error(&self) -> bool {
        matches!(
            self,
            Self::MalformedContainer { .. } | Self::TruncatedInput { .. }
        )
    }
}
