//! The notification pump: single-writer serialization of outbound frames.
//!
//! All outbound traffic, responses and notifications alike, funnels
//! through one bounded queue per session, drained by one writer task that
//! owns the transport sink. Frames a single producer enqueues reach the
//! wire in that order; no order is promised between producers.
//!
//! After [`Pump::close`], further enqueues fail with transport-closed and
//! the frames already queued are drained best-effort until the sink errors.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crosstalk_core::error::ProtocolError;
use crosstalk_core::jsonrpc::Envelope;

use crate::transport::FrameSink;

enum Command {
    Frame(Bytes),
    Shutdown,
}

/// Cloneable handle onto a session's outbound queue.
#[derive(Clone)]
pub struct Pump {
    tx: mpsc::Sender<Command>,
    closed: Arc<AtomicBool>,
}

impl Pump {
    /// Start the writer task over a sink. Returns the handle producers use
    /// and the writer's join handle.
    #[must_use]
    pub fn start(sink: Box<dyn FrameSink>, depth: usize) -> (Pump, JoinHandle<()>) {
        let (tx, rx) = mpsc::channel(depth.max(1));
        let closed = Arc::new(AtomicBool::new(false));
        let writer = tokio::spawn(write_loop(sink, rx, Arc::clone(&closed)));
        (Pump { tx, closed }, writer)
    }

    /// Returns true once close has been initiated or the sink has failed.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Enqueue one encoded frame, waiting for queue space.
    ///
    /// # Errors
    ///
    /// [`ProtocolError::TransportClosed`] once close has been initiated or
    /// the writer has stopped.
    pub async fn enqueue(&self, frame: Bytes) -> Result<(), ProtocolError> {
        if self.is_closed() {
            return Err(ProtocolError::TransportClosed);
        }
        self.tx
            .send(Command::Frame(frame))
            .await
            .map_err(|_| ProtocolError::TransportClosed)
    }

    /// Encode and enqueue an envelope.
    ///
    /// # Errors
    ///
    /// Same as [`Pump::enqueue`].
    pub async fn send(&self, envelope: &Envelope) -> Result<(), ProtocolError> {
        self.enqueue(Bytes::from(envelope.encode())).await
    }

    /// Fire-and-forget enqueue for progress traffic: drops the frame when
    /// the queue is full or closing rather than suspending the producer.
    /// Returns whether the frame was queued.
    pub fn try_send(&self, envelope: &Envelope) -> bool {
        if self.is_closed() {
            return false;
        }
        self.tx
            .try_send(Command::Frame(Bytes::from(envelope.encode())))
            .is_ok()
    }

    /// Initiate close. Frames already queued ahead of the shutdown marker
    /// are still written; later enqueues fail.
    pub async fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        // Queue the marker behind any already-queued frames so they drain
        // first. If the queue is gone the writer already stopped.
        let _ = self.tx.send(Command::Shutdown).await;
    }
}

async fn write_loop(
    mut sink: Box<dyn FrameSink>,
    mut rx: mpsc::Receiver<Command>,
    closed: Arc<AtomicBool>,
) {
    while let Some(command) = rx.recv().await {
        match command {
            Command::Frame(frame) => {
                if let Err(e) = sink.send(frame).await {
                    tracing::warn!(error = %e, "outbound write failed; dropping queued frames");
                    closed.store(true, Ordering::Release);
                    break;
                }
            }
            Command::Shutdown => break,
        }
    }
    closed.store(true, Ordering::Release);
    let _ = sink.close().await;
}
