//! Session configuration.
//!
//! One explicit configuration value per session, passed into construction.
//! There are no process-wide globals; test doubles construct their own.

use std::time::Duration;

use serde_json::{json, Value};

use crate::jsonrpc::MAX_FRAME_BYTES;
use crate::protocol::types::ServerInfo;

/// Configuration for one session.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Identity reported in the `initialize` exchange.
    pub server_info: ServerInfo,
    /// Capability advertisement for this side.
    pub capabilities: Value,
    /// Timeout applied to outbound requests. `None` waits indefinitely.
    /// On expiry the caller sees a cancelled outcome and the peer receives
    /// `notifications/cancelled`.
    pub request_timeout: Option<Duration>,
    /// Outbound pump queue depth. Producers back-pressure when full.
    pub pump_depth: usize,
    /// Maximum accepted frame size in bytes.
    pub max_frame_bytes: usize,
    /// Page size for `tools/list`, `resources/list`, and `prompts/list`.
    pub page_size: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            server_info: ServerInfo {
                name: env!("CARGO_PKG_NAME").to_owned(),
                version: env!("CARGO_PKG_VERSION").to_owned(),
            },
            // The in-memory registries can announce mutations, so the
            // default advertisement carries listChanged for every kind.
            capabilities: json!({
                "tools": {"listChanged": true},
                "resources": {"listChanged": true},
                "prompts": {"listChanged": true}
            }),
            request_timeout: Some(Duration::from_secs(30)),
            pump_depth: 64,
            max_frame_bytes: MAX_FRAME_BYTES,
            page_size: 50,
        }
    }
}

impl SessionConfig {
    /// Build a configuration from `CROSSTALK_*` environment variables,
    /// falling back to defaults:
    ///
    /// - `CROSSTALK_SERVER_NAME` / `CROSSTALK_SERVER_VERSION`
    /// - `CROSSTALK_REQUEST_TIMEOUT_SECS` (0 disables the timeout)
    /// - `CROSSTALK_PAGE_SIZE`
    #[must_use]
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(name) = std::env::var("CROSSTALK_SERVER_NAME") {
            config.server_info.name = name;
        }
        if let Ok(version) = std::env::var("CROSSTALK_SERVER_VERSION") {
            config.server_info.version = version;
        }
        if let Some(secs) = std::env::var("CROSSTALK_REQUEST_TIMEOUT_SECS")
            .ok()
            .and_then(|v| v.parse::<u64>().ok())
        {
            config.request_timeout = (secs > 0).then(|| Duration::from_secs(secs));
        }
        if let Some(size) = std::env::var("CROSSTALK_PAGE_SIZE")
            .ok()
            .and_then(|v| v.parse::<usize>().ok())
            .filter(|&s| s > 0)
        {
            config.page_size = size;
        }

        config
    }

    /// Set the reported server identity.
    #[must_use]
    pub fn with_server_info(mut self, name: impl Into<String>, version: impl Into<String>) -> Self {
        self.server_info = ServerInfo {
            name: name.into(),
            version: version.into(),
        };
        self
    }

    /// Set the capability advertisement.
    #[must_use]
    pub fn with_capabilities(mut self, capabilities: Value) -> Self {
        self.capabilities = capabilities;
        self
    }

    /// Set or disable the outbound request timeout.
    #[must_use]
    pub fn with_request_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Set the list page size.
    #[must_use]
    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size.max(1);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = SessionConfig::default();
        assert_eq!(config.max_frame_bytes, MAX_FRAME_BYTES);
        assert!(config.request_timeout.is_some());
        assert!(config.page_size > 0);
    }

    #[test]
    fn test_builders() {
        let config = SessionConfig::default()
            .with_server_info("s", "1")
            .with_capabilities(json!({"tools": {"listChanged": true}}))
            .with_request_timeout(None)
            .with_page_size(0);
        assert_eq!(config.server_info.name, "s");
        assert!(config.request_timeout.is_none());
        // Page size is clamped to at least one.
        assert_eq!(config.page_size, 1);
        assert_eq!(config.capabilities["tools"]["listChanged"], true);
    }
}
