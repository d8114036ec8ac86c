//! Crosstalk Core: transport-agnostic Model Context Protocol model.
//!
//! This library provides the protocol layer shared by every crosstalk
//! transport and both peer roles:
//!
//! - JSON-RPC 2.0 envelope types, classification, and the wire codec
//! - MCP method names and typed request/result payloads
//! - Capability and protocol-version negotiation
//! - The error model with its JSON-RPC error-code mapping
//! - Session configuration
//!
//! Nothing in this crate performs I/O. The session engine, task execution,
//! and the stdio/HTTP transports live in the `crosstalk` crate.

pub mod config;
pub mod error;
pub mod jsonrpc;
pub mod protocol;

pub use config::SessionConfig;
pub use error::{ErrorObject, ProtocolError};
pub use jsonrpc::{CodecError, Envelope, Notification, Request, RequestId, Response};
