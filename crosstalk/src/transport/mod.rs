//! Transport abstraction: lossless, order-preserving frame delivery.
//!
//! A transport connects once and yields a [`Connection`]: a [`FrameSink`]
//! for whole-frame writes and a bounded event queue the transport's reader
//! pushes into. The session's ingest loop owns the receiving end and decides
//! dispatch; transports never call back into the engine.
//!
//! Delivery contract:
//!
//! - `send` writes a whole frame or fails; never a partial frame.
//! - Events preserve the order frames were observed on the wire.
//! - [`TransportEvent::Closed`] is pushed at most once, after which no more
//!   frames arrive.
//! - `send` after close fails with [`ProtocolError::TransportClosed`].
//! - `close` is idempotent.

pub mod http;
pub mod memory;
pub mod sse;
pub mod stdio;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::mpsc;

use crosstalk_core::error::ProtocolError;

/// Depth of the transport → ingest event queue. Readers back-pressure once
/// the session falls this far behind.
pub const EVENT_QUEUE_DEPTH: usize = 64;

/// Why a transport stopped delivering frames.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CloseReason {
    /// The peer closed the stream (EOF on stdio, stream end on SSE).
    Eof,
    /// Reading from the transport failed.
    ReadError(String),
    /// Writing to the transport failed.
    WriteError(String),
    /// This side closed the transport.
    LocalClose,
}

impl std::fmt::Display for CloseReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CloseReason::Eof => write!(f, "peer closed the stream"),
            CloseReason::ReadError(e) => write!(f, "read error: {e}"),
            CloseReason::WriteError(e) => write!(f, "write error: {e}"),
            CloseReason::LocalClose => write!(f, "closed locally"),
        }
    }
}

/// Push-delivered transport events.
#[derive(Debug, Clone)]
pub enum TransportEvent {
    /// One complete frame, exactly as observed on the wire.
    Frame(Bytes),
    /// The transport stopped; pushed at most once.
    Closed(CloseReason),
}

/// Write half of a connection.
#[async_trait]
pub trait FrameSink: Send {
    /// Write one whole frame.
    ///
    /// # Errors
    ///
    /// [`ProtocolError::TransportClosed`] after close, or
    /// [`ProtocolError::Write`] on I/O failure.
    async fn send(&mut self, frame: Bytes) -> Result<(), ProtocolError>;

    /// Close the transport. Idempotent.
    ///
    /// # Errors
    ///
    /// [`ProtocolError::Write`] when the close handshake itself fails;
    /// repeated calls succeed.
    async fn close(&mut self) -> Result<(), ProtocolError>;
}

/// An established transport connection.
pub struct Connection {
    /// Write half, handed to the pump.
    pub sink: Box<dyn FrameSink>,
    /// Read half: the queue the transport reader pushes into.
    pub events: mpsc::Receiver<TransportEvent>,
}

/// A connectable transport.
#[async_trait]
pub trait Transport: Send {
    /// Establish the connection, spawning whatever reader the variant needs.
    ///
    /// # Errors
    ///
    /// Transport-specific connection failures, mapped onto
    /// [`ProtocolError`].
    async fn connect(&mut self) -> Result<Connection, ProtocolError>;
}
