//! Wire protocol - frame types exchanged with clients and the internal envelope
//!
//! Every inbound text frame is a JSON [`Request`]. Every accepted frame is
//! answered with exactly one outbound frame: a [`Response`] on success or an
//! [`ErrorFrame`] when the payload cannot be decoded or processing fails.
//! Both carry the `requestId` the gateway generated at ingestion.

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

pub mod client;
mod envelope;

pub use client::{Client, ClientError};
pub use envelope::{ConnectionError, ConnectionHandle, Envelope};

// ============================================================================
// Inbound
// ============================================================================

/// A decoded request frame.
///
/// `operation` is matched case-insensitively by the processor. Unknown
/// operations are answered with a diagnostic result, not an error frame.
#[serde_with::skip_serializing_none]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Request {
  pub operation: String,
  #[serde(default)]
  pub data: String,
  pub parameters: Option<Map<String, Value>>,
}

impl Request {
  pub fn new(operation: impl Into<String>, data: impl Into<String>) -> Self {
    Self {
      operation: operation.into(),
      data: data.into(),
      parameters: None,
    }
  }

  pub fn with_parameters(mut self, parameters: Map<String, Value>) -> Self {
    self.parameters = Some(parameters);
    self
  }
}

// ============================================================================
// Outbound
// ============================================================================

/// Successful result frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Response {
  pub request_id: String,
  pub result: Value,
  pub worker_id: usize,
  pub core_id: usize,
  /// Milliseconds between dequeue and the result being ready
  pub processing_time: u64,
}

/// Error frame sent on decode or processing failure.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorFrame {
  pub request_id: String,
  pub error: String,
  pub timestamp: DateTime<Utc>,
}

impl ErrorFrame {
  pub fn new(request_id: impl Into<String>, error: impl Into<String>) -> Self {
    Self {
      request_id: request_id.into(),
      error: error.into(),
      timestamp: Utc::now(),
    }
  }

  /// Render the frame as JSON text.
  ///
  /// Built from a `Value` so it cannot fail; this is the frame of last resort
  /// when a response itself cannot be encoded.
  pub fn to_text(&self) -> String {
    serde_json::json!({
      "requestId": self.request_id,
      "error": self.error,
      "timestamp": self.timestamp.to_rfc3339_opts(SecondsFormat::Millis, true),
    })
    .to_string()
  }
}

/// Any frame the controller sends back for a request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Reply {
  Response(Response),
  Error(ErrorFrame),
}

impl Reply {
  pub fn request_id(&self) -> &str {
    match self {
      Reply::Response(r) => &r.request_id,
      Reply::Error(e) => &e.request_id,
    }
  }

  pub fn is_error(&self) -> bool {
    matches!(self, Reply::Error(_))
  }

  pub fn response(&self) -> Option<&Response> {
    match self {
      Reply::Response(r) => Some(r),
      Reply::Error(_) => None,
    }
  }

  pub fn error(&self) -> Option<&ErrorFrame> {
    match self {
      Reply::Error(e) => Some(e),
      Reply::Response(_) => None,
    }
  }

  /// Encode for the wire, degrading to an error frame if the result value
  /// cannot be serialized.
  pub fn to_text(&self) -> String {
    match serde_json::to_string(self) {
      Ok(text) => text,
      Err(e) => ErrorFrame::new(self.request_id(), format!("Failed to encode response: {e}")).to_text(),
    }
  }
}

impl From<Response> for Reply {
  fn from(response: Response) -> Self {
    Reply::Response(response)
  }
}

impl From<ErrorFrame> for Reply {
  fn from(error: ErrorFrame) -> Self {
    Reply::Error(error)
  }
}

// ============================================================================
// Tests
// ============================================================================
