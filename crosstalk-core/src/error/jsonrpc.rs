//! JSON-RPC 2.0 error object wire structure.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// JSON-RPC 2.0 error object, embedded in error responses.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorObject {
    /// Error code (standard JSON-RPC or server-defined).
    pub code: i32,
    /// Short, stable error message.
    pub message: String,
    /// Additional error context (optional).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl ErrorObject {
    /// Create an error object without data.
    #[must_use]
    pub fn new(code: i32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            data: None,
        }
    }

    /// Attach context data.
    #[must_use]
    pub fn with_data(mut self, data: Value) -> Self {
        self.data = Some(data);
        self
    }
}

impl std::fmt::Display for ErrorObject {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} (code {})", self.message, self.code)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_data_omitted_when_none() {
        let error = ErrorObject::new(-32700, "parse error");
        let text = serde_json::to_string(&error).unwrap();
        assert_eq!(text, r#"{"code":-32700,"message":"parse error"}"#);
    }

    #[test]
    fn test_data_serialized_when_present() {
        let error = ErrorObject::new(-32602, "invalid params")
            .with_data(json!({"supportedVersions": ["2025-06-18"]}));
        let value = serde_json::to_value(&error).unwrap();
        assert_eq!(value["data"]["supportedVersions"][0], "2025-06-18");
    }

    #[test]
    fn test_display() {
        let error = ErrorObject::new(-32601, "method not found");
        assert_eq!(error.to_string(), "method not found (code -32601)");
    }
}
