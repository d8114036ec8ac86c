//! Capability and protocol-version negotiation.
//!
//! Capabilities are JSON objects of named feature flags with optional
//! per-feature sub-objects (e.g. `{"tools": {"listChanged": true}}`).
//! The operational set after the handshake is the *intersection* of what
//! both peers advertised: a feature exists only if both sides carry it, and
//! boolean subkeys are ANDed. Comparison is key-based, so JSON key order
//! never matters.

use serde_json::{Map, Value};

use crate::error::ProtocolError;

/// Protocol versions this engine speaks, oldest first.
pub const SUPPORTED_PROTOCOL_VERSIONS: &[&str] = &["2024-11-05", "2025-03-26", "2025-06-18"];

/// The newest supported protocol version.
pub const LATEST_PROTOCOL_VERSION: &str = "2025-06-18";

/// Pick the protocol version for a session.
///
/// Returns the requested version when this side supports it (the highest
/// version both peers support: the peer asks for the newest it speaks, and
/// version strings date-order).
///
/// # Errors
///
/// [`ProtocolError::VersionMismatch`] when the requested version is unknown;
/// its wire form lists [`SUPPORTED_PROTOCOL_VERSIONS`] in `data`.
pub fn negotiate_version(requested: &str) -> Result<String, ProtocolError> {
    if SUPPORTED_PROTOCOL_VERSIONS.contains(&requested) {
        Ok(requested.to_owned())
    } else {
        Err(ProtocolError::VersionMismatch {
            requested: requested.to_owned(),
        })
    }
}

/// Intersect two capability advertisements.
///
/// Rules, applied recursively:
/// - A key survives only if present on both sides.
/// - Two objects intersect key-by-key.
/// - Two `true` booleans stay `true`; any other boolean pair becomes `false`.
/// - Mismatched shapes collapse to an empty object (the feature exists, with
///   no agreed sub-features).
#[must_use]
pub fn intersect_capabilities(ours: &Value, theirs: &Value) -> Value {
    match (ours, theirs) {
        (Value::Object(a), Value::Object(b)) => {
            let mut out = Map::new();
            for (key, ours_value) in a {
                if let Some(theirs_value) = b.get(key) {
                    out.insert(key.clone(), intersect_capabilities(ours_value, theirs_value));
                }
            }
            Value::Object(out)
        }
        (Value::Bool(a), Value::Bool(b)) => Value::Bool(*a && *b),
        _ => Value::Object(Map::new()),
    }
}

/// Whether a capability advertisement enables a boolean subkey, e.g.
/// `has_flag(caps, "tools", "listChanged")`.
#[must_use]
pub fn has_flag(capabilities: &Value, feature: &str, flag: &str) -> bool {
    capabilities
        .get(feature)
        .and_then(|f| f.get(flag))
        .and_then(Value::as_bool)
        .unwrap_or(false)
}
