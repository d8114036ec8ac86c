//! Crosstalk: a bidirectional Model Context Protocol engine.
//!
//! The engine layers, leaves first:
//!
//! - [`transport`]: lossless, order-preserving frame delivery over stdio
//!   NDJSON or HTTP+SSE, pushed into a bounded queue the session owns.
//! - [`session`]: per-connection protocol state: phase machine,
//!   capability negotiation, correlation of in-flight requests both ways.
//! - [`tasks`] / [`context`]: cancellable execution of inbound request
//!   handlers with fire-and-forget progress reporting.
//! - [`pump`]: the single-writer queue serializing every outbound frame.
//! - [`registry`]: tool/resource/prompt collaborators behind traits.
//! - [`client`]: handshake-driving facade with typed method wrappers.
//!
//! Protocol types, the codec, and the error model live in
//! [`crosstalk_core`].
//!
//! # Server example
//!
//! ```ignore
//! let connection = StdioTransport::new().connect().await?;
//! let (session, _handle) = Session::new(
//!     connection,
//!     SessionConfig::default(),
//!     Registries::default(),
//! );
//! session.run().await;
//! ```

pub mod cli;
pub mod client;
pub mod context;
pub mod handlers;
pub mod pump;
pub mod registry;
pub mod session;
pub mod tasks;
pub mod transport;

pub use client::{ClientError, ClientSession};
pub use context::TaskContext;
pub use registry::{
    InMemoryPrompts, InMemoryResources, InMemoryTools, PromptRegistry, Registries,
    ResourceRegistry, ToolRegistry,
};
pub use session::pending::{ResponseHandle, ResponseOutcome};
pub use session::phase::SessionPhase;
pub use session::{Session, SessionHandle};
pub use transport::{CloseReason, Connection, Transport};

pub use crosstalk_core as core;
pub use crosstalk_core::SessionConfig;
