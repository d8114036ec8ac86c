//! Error model and the wire-code mapping.
//!
//! Every internal failure that can surface to a peer maps to exactly one
//! JSON-RPC error code:
//!
//! | Condition | Code |
//! |---|---|
//! | JSON parse failure | -32700 |
//! | Envelope shape violation | -32600 |
//! | Unknown method | -32601 |
//! | Schema violation / bad params | -32602 |
//! | Handler failure | -32603 |
//! | Unmatched response id | -32001 |
//! | Bad notification shape | -32002 |
//! | Transport input terminated | -32003 |
//! | Transport read error | -32004 |
//! | Transport write error | -32005 |
//! | Not authenticated | -32010 |
//! | Forbidden | -32011 |
//! | Request cancelled by peer | -32800 |
//!
//! Server-defined codes stay inside [-32099, -32000] as JSON-RPC reserves;
//! -32800 follows the MCP cancellation convention.
//!
//! Wire messages are short fixed strings ([`ProtocolError::wire_message`]);
//! the richer `Display` text is for logs only and never leaves the process.

mod jsonrpc;

pub use jsonrpc::ErrorObject;

use serde_json::{json, Value};
use thiserror::Error;

use crate::jsonrpc::CodecError;
use crate::protocol::capability::SUPPORTED_PROTOCOL_VERSIONS;

/// All failures the protocol engine can surface.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ProtocolError {
    /// The peer sent bytes that are not a JSON document.
    #[error("invalid JSON: {details}")]
    Parse {
        /// Parser diagnostic.
        details: String,
    },

    /// The frame is valid JSON but violates the envelope rules, arrived in
    /// the wrong session phase, or reuses an in-flight request ID.
    #[error("invalid request: {details}")]
    InvalidRequest {
        /// What made the request invalid.
        details: String,
    },

    /// The requested method does not exist.
    #[error("method '{method}' not found")]
    MethodNotFound {
        /// The method name that was not found.
        method: String,
    },

    /// The params failed validation against the handler's schema.
    #[error("invalid parameters: {details}")]
    InvalidParams {
        /// Validation diagnostic.
        details: String,
    },

    /// A handler failed in a way the protocol cannot express more precisely.
    #[error("internal error: {details}")]
    Internal {
        /// Short diagnostic, safe for the wire.
        details: String,
    },

    /// No protocol version is supported by both peers.
    #[error("unsupported protocol version {requested:?}")]
    VersionMismatch {
        /// The version the peer asked for.
        requested: String,
    },

    /// A response arrived whose ID matches no in-flight outbound request.
    #[error("response id {id} matches no in-flight request")]
    UnmatchedResponse {
        /// The orphaned response ID, rendered for diagnostics.
        id: String,
    },

    /// A notification frame was structurally invalid for its method.
    #[error("invalid notification: {details}")]
    InvalidNotification {
        /// What made the notification invalid.
        details: String,
    },

    /// The transport reported end of input or the session closed.
    #[error("transport closed")]
    TransportClosed,

    /// The transport failed while reading.
    #[error("transport read failed: {details}")]
    Read {
        /// I/O diagnostic.
        details: String,
    },

    /// The transport failed while writing.
    #[error("transport write failed: {details}")]
    Write {
        /// I/O diagnostic.
        details: String,
    },

    /// The peer presented no credentials where the transport requires them.
    #[error("unauthorized")]
    Unauthorized,

    /// The peer's credentials do not permit the operation.
    #[error("forbidden")]
    Forbidden,

    /// The request was cancelled before the handler produced a result.
    #[error("request cancelled")]
    Cancelled,
}

impl ProtocolError {
    /// Maps this error to its JSON-RPC 2.0 error code.
    #[must_use]
    pub fn code(&self) -> i32 {
        match self {
            Self::Parse { .. } => -32700,
            Self::InvalidRequest { .. } => -32600,
            Self::MethodNotFound { .. } => -32601,
            Self::InvalidParams { .. } | Self::VersionMismatch { .. } => -32602,
            Self::Internal { .. } => -32603,
            Self::UnmatchedResponse { .. } => -32001,
            Self::InvalidNotification { .. } => -32002,
            Self::TransportClosed => -32003,
            Self::Read { .. } => -32004,
            Self::Write { .. } => -32005,
            Self::Unauthorized => -32010,
            Self::Forbidden => -32011,
            Self::Cancelled => -32800,
        }
    }

    /// The fixed message string used on the wire for this error.
    #[must_use]
    pub fn wire_message(&self) -> &'static str {
        match self {
            Self::Parse { .. } => "parse error",
            Self::InvalidRequest { .. } => "invalid request",
            Self::MethodNotFound { .. } => "method not found",
            Self::InvalidParams { .. } | Self::VersionMismatch { .. } => "invalid params",
            Self::Internal { .. } => "internal error",
            Self::UnmatchedResponse { .. } => "invalid response",
            Self::InvalidNotification { .. } => "invalid notification",
            Self::TransportClosed => "transport closed",
            Self::Read { .. } | Self::Write { .. } => "i/o error",
            Self::Unauthorized => "unauthorized",
            Self::Forbidden => "forbidden",
            Self::Cancelled => "cancelled",
        }
    }

    /// Stable label for log fields and counters.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Parse { .. } => "parse_error",
            Self::InvalidRequest { .. } => "invalid_request",
            Self::MethodNotFound { .. } => "method_not_found",
            Self::InvalidParams { .. } => "invalid_params",
            Self::Internal { .. } => "internal_error",
            Self::VersionMismatch { .. } => "version_mismatch",
            Self::UnmatchedResponse { .. } => "unmatched_response",
            Self::InvalidNotification { .. } => "invalid_notification",
            Self::TransportClosed => "transport_closed",
            Self::Read { .. } => "read_error",
            Self::Write { .. } => "write_error",
            Self::Unauthorized => "unauthorized",
            Self::Forbidden => "forbidden",
            Self::Cancelled => "cancelled",
        }
    }

    /// Context attached to the wire error object, where the protocol calls
    /// for it. Handler diagnostics travel as a short string; a version
    /// mismatch lists the versions this side supports.
    #[must_use]
    fn wire_data(&self) -> Option<Value> {
        match self {
            Self::Internal { details } => Some(Value::String(details.clone())),
            Self::VersionMismatch { requested } => Some(json!({
                "supportedVersions": SUPPORTED_PROTOCOL_VERSIONS,
                "requested": requested,
            })),
            _ => None,
        }
    }

    /// Build the JSON-RPC error object for this failure.
    #[must_use]
    pub fn to_error_object(&self) -> ErrorObject {
        ErrorObject {
            code: self.code(),
            message: self.wire_message().to_owned(),
            data: self.wire_data(),
        }
    }
}

impl From<CodecError> for ProtocolError {
    fn from(err: CodecError) -> Self {
        if err.is_parse_failure() {
            ProtocolError::Parse {
                details: err.to_string(),
            }
        } else {
            ProtocolError::InvalidRequest {
                details: err.to_string(),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn all_variants() -> Vec<ProtocolError> {
        vec![
            ProtocolError::Parse {
                details: "x".into(),
            },
            ProtocolError::InvalidRequest {
                details: "x".into(),
            },
            ProtocolError::MethodNotFound {
                method: "nope".into(),
            },
            ProtocolError::InvalidParams {
                details: "x".into(),
            },
            ProtocolError::Internal {
                details: "x".into(),
            },
            ProtocolError::VersionMismatch {
                requested: "1999-01-01".into(),
            },
            ProtocolError::UnmatchedResponse { id: "9".into() },
            ProtocolError::InvalidNotification {
                details: "x".into(),
            },
            ProtocolError::TransportClosed,
            ProtocolError::Read {
                details: "x".into(),
            },
            ProtocolError::Write {
                details: "x".into(),
            },
            ProtocolError::Unauthorized,
            ProtocolError::Forbidden,
            ProtocolError::Cancelled,
        ]
    }

    #[test]
    fn test_code_mapping() {
        let expected: Vec<i32> = vec![
            -32700, -32600, -32601, -32602, -32603, -32602, -32001, -32002, -32003, -32004,
            -32005, -32010, -32011, -32800,
        ];
        let actual: Vec<i32> = all_variants().iter().map(ProtocolError::code).collect();
        assert_eq!(actual, expected);
    }

    #[test]
    fn test_server_defined_codes_in_reserved_range() {
        for err in all_variants() {
            let code = err.code();
            let standard = matches!(code, -32700 | -32600 | -32601 | -32602 | -32603 | -32800);
            if !standard {
                assert!(
                    (-32099..=-32000).contains(&code),
                    "code {code} outside server-defined range"
                );
            }
        }
    }

    #[test]
    fn test_wire_messages_are_fixed_strings() {
        assert_eq!(
            ProtocolError::Parse {
                details: "unexpected eof".into()
            }
            .wire_message(),
            "parse error"
        );
        assert_eq!(
            ProtocolError::MethodNotFound {
                method: "nope".into()
            }
            .wire_message(),
            "method not found"
        );
        assert_eq!(ProtocolError::Cancelled.wire_message(), "cancelled");
        assert_eq!(
            ProtocolError::Read {
                details: "eof".into()
            }
            .wire_message(),
            "i/o error"
        );
        assert_eq!(
            ProtocolError::Write {
                details: "pipe".into()
            }
            .wire_message(),
            "i/o error"
        );
    }

    #[test]
    fn test_internal_error_carries_diagnostic_data() {
        let err = ProtocolError::Internal {
            details: "handler panicked".into(),
        };
        let obj = err.to_error_object();
        assert_eq!(obj.code, -32603);
        assert_eq!(obj.message, "internal error");
        assert_eq!(obj.data.unwrap(), "handler panicked");
    }

    #[test]
    fn test_version_mismatch_lists_supported_versions() {
        let err = ProtocolError::VersionMismatch {
            requested: "1999-01-01".into(),
        };
        let obj = err.to_error_object();
        assert_eq!(obj.code, -32602);
        let data = obj.data.unwrap();
        assert_eq!(data["requested"], "1999-01-01");
        let versions = data["supportedVersions"].as_array().unwrap();
        assert!(!versions.is_empty());
    }

    #[test]
    fn test_plain_errors_carry_no_data() {
        let obj = ProtocolError::MethodNotFound {
            method: "nope".into(),
        }
        .to_error_object();
        assert!(obj.data.is_none());
    }

    #[test]
    fn test_codec_error_conversion() {
        let parse: ProtocolError = CodecError::Malformed {
            reason: "eof".into(),
        }
        .into();
        assert_eq!(parse.code(), -32700);

        let shape: ProtocolError = CodecError::Unclassifiable.into();
        assert_eq!(shape.code(), -32600);

        let batch: ProtocolError = CodecError::UnsupportedBatch.into();
        assert_eq!(batch.code(), -32600);
    }

    #[test]
    fn test_kind_labels_unique() {
        let mut kinds: Vec<&str> = all_variants().iter().map(ProtocolError::kind).collect();
        kinds.sort_unstable();
        kinds.dedup();
        assert_eq!(kinds.len(), all_variants().len());
    }
}
