//! JSON-RPC 2.0 envelope types and the wire codec.
//!
//! Every MCP frame is exactly one of three envelope shapes, distinguished by
//! the presence of `id`, `method`, and `result`/`error`:
//!
//! - Request: has `id` and `method`
//! - Notification: has `method` but no `id`
//! - Response: has `id` and exactly one of `result` / `error`
//!
//! [`Envelope::decode`] parses untrusted bytes into a typed envelope and
//! rejects everything else. [`Envelope::encode`] emits the canonical field
//! order `{jsonrpc, id, method, params, result, error}` so that serialized
//! output is byte-stable across runs.
//!
//! # Security Note
//!
//! Decoding operates on untrusted input. Frames larger than
//! [`MAX_FRAME_BYTES`] are rejected before any JSON parsing to bound
//! allocation from crafted input.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;

use crate::error::ErrorObject;

/// JSON-RPC 2.0 version constant.
pub const JSONRPC_VERSION: &str = "2.0";

/// Maximum accepted frame size (10 MiB), checked before JSON parsing.
pub const MAX_FRAME_BYTES: usize = 10 * 1024 * 1024;

// ─────────────────────────────────────────────────────────────────────────────
// Request ID
// ─────────────────────────────────────────────────────────────────────────────

/// JSON-RPC 2.0 request ID.
///
/// The wire format allows string, integer, or null IDs. The exact type is
/// preserved end-to-end: a request sent with `"id": 7` is answered with
/// `"id": 7`, never `"id": "7"`. Floats, booleans, arrays, and objects are
/// rejected at decode time.
///
/// `Null` appears on responses to frames whose ID could not be recovered
/// (for example a parse error), and on the rare peer that sends an explicit
/// `"id": null` request.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum RequestId {
    /// Integer ID (e.g., `"id": 1`).
    Number(i64),
    /// String ID (e.g., `"id": "abc-123"`).
    String(String),
    /// Explicit null ID.
    Null,
}

impl Serialize for RequestId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            RequestId::Number(n) => serializer.serialize_i64(*n),
            RequestId::String(s) => serializer.serialize_str(s),
            RequestId::Null => serializer.serialize_none(),
        }
    }
}

impl<'de> Deserialize<'de> for RequestId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = Value::deserialize(deserializer)?;
        RequestId::from_value(&value)
            .ok_or_else(|| serde::de::Error::custom("id must be a string, integer, or null"))
    }
}

impl RequestId {
    /// Parse an ID from a JSON value, rejecting floats, booleans, arrays,
    /// and objects.
    #[must_use]
    pub fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::Number(n) => n.as_i64().map(RequestId::Number),
            Value::String(s) => Some(RequestId::String(s.clone())),
            Value::Null => Some(RequestId::Null),
            _ => None,
        }
    }
}

impl From<i64> for RequestId {
    fn from(id: i64) -> Self {
        RequestId::Number(id)
    }
}

impl From<&str> for RequestId {
    fn from(id: &str) -> Self {
        RequestId::String(id.to_owned())
    }
}

impl From<String> for RequestId {
    fn from(id: String) -> Self {
        RequestId::String(id)
    }
}

impl std::fmt::Display for RequestId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RequestId::Number(n) => write!(f, "{n}"),
            RequestId::String(s) => write!(f, "{s}"),
            RequestId::Null => write!(f, "null"),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Envelope Types
// ─────────────────────────────────────────────────────────────────────────────

/// A request expecting exactly one response.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Request {
    /// Always "2.0".
    pub jsonrpc: String,
    /// Request ID, echoed back in the response.
    pub id: RequestId,
    /// Method name.
    pub method: String,
    /// Method parameters. MCP methods use objects; arrays never appear.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

impl Request {
    /// Create a request.
    #[must_use]
    pub fn new(id: impl Into<RequestId>, method: impl Into<String>, params: Option<Value>) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_owned(),
            id: id.into(),
            method: method.into(),
            params,
        }
    }
}

/// A fire-and-forget notification. Never correlated, never answered.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Notification {
    /// Always "2.0".
    pub jsonrpc: String,
    /// Method name.
    pub method: String,
    /// Method parameters.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

impl Notification {
    /// Create a notification.
    #[must_use]
    pub fn new(method: impl Into<String>, params: Option<Value>) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_owned(),
            method: method.into(),
            params,
        }
    }
}

/// A response carrying exactly one of `result` / `error`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Response {
    /// Always "2.0".
    pub jsonrpc: String,
    /// ID of the request being answered. `Null` when the request's ID could
    /// not be recovered (parse errors).
    pub id: RequestId,
    /// Result value, present on success.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    /// Error object, present on failure.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorObject>,
}

impl Response {
    /// Create a success response.
    #[must_use]
    pub fn success(id: RequestId, result: Value) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_owned(),
            id,
            result: Some(result),
            error: None,
        }
    }

    /// Create an error response.
    #[must_use]
    pub fn error(id: RequestId, error: ErrorObject) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_owned(),
            id,
            result: None,
            error: Some(error),
        }
    }

    /// Returns true if this response carries an error.
    #[must_use]
    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }
}

/// A decoded wire frame: one of the three envelope shapes.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Envelope {
    /// A request expecting a response.
    Request(Request),
    /// A fire-and-forget notification.
    Notification(Notification),
    /// A response to a previous request.
    Response(Response),
}

// ─────────────────────────────────────────────────────────────────────────────
// Codec Errors
// ─────────────────────────────────────────────────────────────────────────────

/// Errors produced while decoding a wire frame.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    /// Frame exceeds [`MAX_FRAME_BYTES`]; checked before JSON parsing.
    #[error("frame exceeds {max_bytes} bytes")]
    Oversized {
        /// The enforced limit.
        max_bytes: usize,
    },
    /// The bytes are not a complete JSON document.
    #[error("malformed JSON: {reason}")]
    Malformed {
        /// Parser diagnostic.
        reason: String,
    },
    /// The document is a JSON array. MCP does not use batch framing.
    #[error("batch frames are not supported")]
    UnsupportedBatch,
    /// The document is valid JSON but not an object.
    #[error("frame must be a JSON object")]
    NotAnObject,
    /// The `jsonrpc` field is absent.
    #[error("missing jsonrpc version field")]
    MissingVersion,
    /// The `jsonrpc` field is present but not `"2.0"`.
    #[error("unsupported jsonrpc version {version:?}")]
    UnsupportedVersion {
        /// The version string the peer sent.
        version: String,
    },
    /// The `id` field is present but not a string, integer, or null.
    #[error("invalid id field")]
    InvalidId,
    /// A frame with an `id` but no `method` must carry exactly one of
    /// `result` / `error`; this one carried both.
    #[error("response carries both result and error")]
    ResultAndError,
    /// The `error` member of a response is not a valid error object.
    #[error("invalid error object: {reason}")]
    InvalidErrorObject {
        /// Deserializer diagnostic.
        reason: String,
    },
    /// A frame with an `id` but no `method` carried neither `result` nor
    /// `error`.
    #[error("response carries neither result nor error")]
    IncompleteResponse,
    /// The frame has neither `id` nor `method` and cannot be classified.
    #[error("frame has neither id nor method")]
    Unclassifiable,
}

impl CodecError {
    /// Stable label for log fields and counters.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Oversized { .. } => "oversized",
            Self::Malformed { .. } => "malformed_json",
            Self::UnsupportedBatch => "unsupported_batch",
            Self::NotAnObject => "not_an_object",
            Self::MissingVersion => "missing_version",
            Self::UnsupportedVersion { .. } => "unsupported_version",
            Self::InvalidId => "invalid_id",
            Self::ResultAndError => "result_and_error",
            Self::InvalidErrorObject { .. } => "invalid_error_object",
            Self::IncompleteResponse => "incomplete_response",
            Self::Unclassifiable => "unclassifiable",
        }
    }

    /// Returns true when the input was not parseable JSON at all, as opposed
    /// to valid JSON with an invalid envelope shape. The two map to different
    /// wire error codes.
    #[must_use]
    pub fn is_parse_failure(&self) -> bool {
        matches!(self, Self::Oversized { .. } | Self::Malformed { .. })
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Codec
// ─────────────────────────────────────────────────────────────────────────────

impl Envelope {
    /// Decode a single UTF-8 JSON document into a typed envelope.
    ///
    /// # Errors
    ///
    /// Returns [`CodecError`] for oversized input, malformed JSON, batch
    /// arrays, a missing or wrong `jsonrpc` version, an invalid `id` type,
    /// a response violating the result-xor-error rule, or a frame that fits
    /// none of the three shapes.
    pub fn decode(bytes: &[u8]) -> Result<Self, CodecError> {
        if bytes.len() > MAX_FRAME_BYTES {
            return Err(CodecError::Oversized {
                max_bytes: MAX_FRAME_BYTES,
            });
        }

        let value: Value = serde_json::from_slice(bytes).map_err(|e| CodecError::Malformed {
            reason: e.to_string(),
        })?;

        Self::from_value(value)
    }

    /// Classify and convert an already-parsed JSON value.
    ///
    /// # Errors
    ///
    /// Same shape rules as [`Envelope::decode`], minus the size and JSON
    /// syntax checks.
    pub fn from_value(value: Value) -> Result<Self, CodecError> {
        if value.is_array() {
            return Err(CodecError::UnsupportedBatch);
        }
        let Value::Object(mut obj) = value else {
            return Err(CodecError::NotAnObject);
        };

        match obj.get("jsonrpc").and_then(Value::as_str) {
            Some(JSONRPC_VERSION) => {}
            Some(other) => {
                return Err(CodecError::UnsupportedVersion {
                    version: other.to_owned(),
                });
            }
            None => return Err(CodecError::MissingVersion),
        }

        // Distinguish an absent `id` (notification) from an explicit
        // `"id": null` (request or response with a null ID).
        let id = match obj.get("id") {
            Some(v) => Some(RequestId::from_value(v).ok_or(CodecError::InvalidId)?),
            None => None,
        };
        let method = obj.get("method").and_then(Value::as_str).map(String::from);

        match (id, method) {
            (Some(id), Some(method)) => Ok(Envelope::Request(Request {
                jsonrpc: JSONRPC_VERSION.to_owned(),
                id,
                method,
                params: obj.remove("params"),
            })),
            (None, Some(method)) => Ok(Envelope::Notification(Notification {
                jsonrpc: JSONRPC_VERSION.to_owned(),
                method,
                params: obj.remove("params"),
            })),
            (Some(id), None) => {
                let result = obj.remove("result");
                let error = match obj.remove("error") {
                    Some(e) => Some(serde_json::from_value::<ErrorObject>(e).map_err(|e| {
                        CodecError::InvalidErrorObject {
                            reason: e.to_string(),
                        }
                    })?),
                    None => None,
                };
                match (result, error) {
                    (Some(_), Some(_)) => Err(CodecError::ResultAndError),
                    (None, None) => Err(CodecError::IncompleteResponse),
                    (result, error) => Ok(Envelope::Response(Response {
                        jsonrpc: JSONRPC_VERSION.to_owned(),
                        id,
                        result,
                        error,
                    })),
                }
            }
            (None, None) => Err(CodecError::Unclassifiable),
        }
    }

    /// Encode this envelope as a single JSON document in canonical field
    /// order.
    #[must_use]
    pub fn encode(&self) -> Vec<u8> {
        // Struct field order drives serde_json output order; serialization
        // of these shapes cannot fail.
        serde_json::to_vec(self).unwrap_or_default()
    }

    /// The method name, for requests and notifications.
    #[must_use]
    pub fn method(&self) -> Option<&str> {
        match self {
            Envelope::Request(r) => Some(&r.method),
            Envelope::Notification(n) => Some(&n.method),
            Envelope::Response(_) => None,
        }
    }

    /// The frame's ID, for requests and responses.
    #[must_use]
    pub fn id(&self) -> Option<&RequestId> {
        match self {
            Envelope::Request(r) => Some(&r.id),
            Envelope::Response(r) => Some(&r.id),
            Envelope::Notification(_) => None,
        }
    }
}

impl From<Request> for Envelope {
    fn from(r: Request) -> Self {
        Envelope::Request(r)
    }
}

impl From<Notification> for Envelope {
    fn from(n: Notification) -> Self {
        Envelope::Notification(n)
    }
}

impl From<Response> for Envelope {
    fn from(r: Response) -> Self {
        Envelope::Response(r)
    }
}
