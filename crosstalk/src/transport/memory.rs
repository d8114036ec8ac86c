//! In-memory duplex transport for tests and same-process peers.

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::mpsc;

use crosstalk_core::error::ProtocolError;

use super::{CloseReason, Connection, FrameSink, TransportEvent, EVENT_QUEUE_DEPTH};

/// Create a connected pair. Frames sent on one side's sink arrive on the
/// other side's event queue; closing a sink delivers `Closed(Eof)` to the
/// peer, mirroring what EOF looks like on a real stream.
#[must_use]
pub fn pair() -> (Connection, Connection) {
    let (a_tx, a_rx) = mpsc::channel(EVENT_QUEUE_DEPTH);
    let (b_tx, b_rx) = mpsc::channel(EVENT_QUEUE_DEPTH);

    let left = Connection {
        sink: Box::new(MemorySink {
            peer: b_tx,
            closed: false,
        }),
        events: a_rx,
    };
    let right = Connection {
        sink: Box::new(MemorySink {
            peer: a_tx,
            closed: false,
        }),
        events: b_rx,
    };
    (left, right)
}

struct MemorySink {
    peer: mpsc::Sender<TransportEvent>,
    closed: bool,
}

#[async_trait]
impl FrameSink for MemorySink {
    async fn send(&mut self, frame: Bytes) -> Result<(), ProtocolError> {
        if self.closed {
            return Err(ProtocolError::TransportClosed);
        }
        self.peer
            .send(TransportEvent::Frame(frame))
            .await
            .map_err(|_| ProtocolError::TransportClosed)
    }

    async fn close(&mut self) -> Result<(), ProtocolError> {
        if !self.closed {
            self.closed = true;
            let _ = self
                .peer
                .send(TransportEvent::Closed(CloseReason::Eof))
                .await;
        }
        Ok(())
    }
}
