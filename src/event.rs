//! # Invocation Event
//!
//! Serde model of the object-lambda invocation event and its conversion into
//! a [`TransformationRequest`].
//!
//! ```json
//! {
//!   "xAmzRequestId": "1a5ed718-5f53-471d-b6fe-5cf62d88d02a",
//!   "getObjectContext": {
//!     "inputS3Url": "https://bucket.s3.amazonaws.com/photo.jpg?X-Amz-Signature=...",
//!     "outputRoute": "io-iad-cell001",
//!     "outputToken": "..."
//!   },
//!   "userRequest": {
//!     "url": "https://ap-123.s3-object-lambda.amazonaws.com/photo.jpg?showExif=true",
//!     "headers": { "Host": "..." }
//!   },
//!   "protocolVersion": "1.00"
//! }
//! ```
//!
//! `inputS3Url` is presigned and `outputToken` authorizes the response, so
//! neither appears in `Debug` output.

use crate::error::{Error, Result};
use crate::handler::TransformationRequest;
use crate::origin::OriginObjectReference;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::warn;

/// Object-lambda invocation event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ObjectLambdaEvent {
    /// Request id assigned by the platform.
    #[serde(rename = "xAmzRequestId")]
    pub x_amz_request_id: String,
    /// Where to read the object and where to send the response.
    pub get_object_context: GetObjectContext,
    /// The request the end user made.
    #[serde(default)]
    pub user_request: Option<UserRequest>,
    /// Event schema version.
    #[serde(default)]
    pub protocol_version: Option<String>,
}

/// Origin and response routing for one invocation.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GetObjectContext {
    /// Presigned URL of the original object.
    pub input_s3_url: String,
    /// Routing token of the response destination.
    pub output_route: String,
    /// Authorization token of the response destination.
    pub output_token: String,
}

impl std::fmt::Debug for GetObjectContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GetObjectContext")
            .field(
                "input_s3_url",
                &OriginObjectReference::new(self.input_s3_url.as_str()).redacted(),
            )
            .field("output_route", &self.output_route)
            .field("output_token", &"<redacted>")
            .finish()
    }
}

/// The end user's original request.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct UserRequest {
    /// Full request URL, including the query string.
    pub url: String,
    /// Request headers.
    #[serde(default)]
    pub headers: HashMap<String, String>,
}

/// Destination of the invocation's response.
#[derive(Clone, PartialEq, Eq)]
pub struct WriteBackTarget {
    /// Routing token.
    pub route: String,
    /// Authorization token.
    pub token: String,
}

impl std::fmt::Debug for WriteBackTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WriteBackTarget")
            .field("route", &self.route)
            .field("token", &"<redacted>")
            .finish()
    }
}

impl ObjectLambdaEvent {
    /// Parses and validates an event from JSON.
    pub fn from_json(data: &[u8]) -> Result<Self> {
        let event: Self =
            serde_json::from_slice(data).map_err(|e| Error::InvalidEvent(e.to_string()))?;
        event.validate()?;
        Ok(event)
    }

    /// Checks that the fields needed to serve the request are present.
    pub fn validate(&self) -> Result<()> {
        let context = &self.get_object_context;
        let url = context.input_s3_url.as_str();
        if !(url.starts_with("https://") || url.starts_with("http://")) {
            return Err(Error::InvalidEvent(
                "getObjectContext.inputS3Url must be an http(s) URL".to_string(),
            ));
        }
        if context.output_route.is_empty() {
            return Err(Error::InvalidEvent(
                "getObjectContext.outputRoute is empty".to_string(),
            ));
        }
        if context.output_token.is_empty() {
            return Err(Error::InvalidEvent(
                "getObjectContext.outputToken is empty".to_string(),
            ));
        }
        Ok(())
    }

    /// Response destination named by the event.
    pub fn write_back_target(&self) -> WriteBackTarget {
        WriteBackTarget {
            route: self.get_object_context.output_route.clone(),
            token: self.get_object_context.output_token.clone(),
        }
    }

    /// Reads the metadata flag `param` from the user request's query string.
    ///
    /// Absent means false. A bare flag or `1`, `true`, `yes`, `on` (any case)
    /// means true; anything else means false.
    pub fn show_metadata(&self, param: &str) -> bool {
        let Some(user_request) = &self.user_request else {
            return false;
        };
        let url = match reqwest::Url::parse(&user_request.url) {
            Ok(url) => url,
            Err(e) => {
                warn!("Unparsable user request URL: {}", e);
                return false;
            }
        };
        url.query_pairs()
            .find(|(key, _)| key == param)
            .map(|(_, value)| parse_flag(param, &value))
            .unwrap_or(false)
    }

    /// Converts the event into the request the handler serves.
    pub fn into_request(self, param: &str) -> TransformationRequest {
        let show_metadata = self.show_metadata(param);
        TransformationRequest::new(
            OriginObjectReference::new(self.get_object_context.input_s3_url),
            show_metadata,
        )
        .with_request_id(self.x_amz_request_id)
    }
}

/// Interprets a query flag value.
pub fn parse_flag(param: &str, value: &str) -> bool {
    match value.to_ascii_lowercase().as_str() {
        "" | "1" | "true" | "yes" | "on" => true,
        "0" | "false" | "no" | "off" => false,
        other => {
            warn!("Unrecognized {} value {:?}, treating as false", param, other);
            false
        }
    }
}
