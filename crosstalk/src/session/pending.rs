//! In-flight outbound request tracking.
//!
//! Every outbound request registers a oneshot completion under its ID.
//! The session completes each entry exactly once (on the matching
//! response, on timeout, on explicit cancel, or on session close) and
//! never retains the sender afterwards.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use serde_json::Value;
use tokio::sync::oneshot;

use crosstalk_core::error::{ErrorObject, ProtocolError};
use crosstalk_core::jsonrpc::RequestId;

/// Terminal outcome of an outbound request.
#[derive(Debug)]
pub enum ResponseOutcome {
    /// The peer answered with a result.
    Result(Value),
    /// The peer answered with an error.
    Error(ErrorObject),
    /// Cancelled locally: explicit cancel, timeout, or session close before
    /// any response arrived.
    Cancelled,
}

/// Awaitable completion for one outbound request.
#[derive(Debug)]
pub struct ResponseHandle {
    id: RequestId,
    rx: oneshot::Receiver<ResponseOutcome>,
}

impl ResponseHandle {
    /// The request ID this handle is waiting on.
    #[must_use]
    pub fn id(&self) -> &RequestId {
        &self.id
    }

    /// Wait for the terminal outcome. A session torn down without settling
    /// this entry reads as transport-closed.
    pub async fn wait(self) -> ResponseOutcome {
        match self.rx.await {
            Ok(outcome) => outcome,
            Err(_) => ResponseOutcome::Error(ProtocolError::TransportClosed.to_error_object()),
        }
    }
}

/// The OutboundPending correlation map.
#[derive(Debug, Default)]
pub struct PendingMap {
    inner: Mutex<HashMap<RequestId, oneshot::Sender<ResponseOutcome>>>,
}

impl PendingMap {
    /// Create an empty map.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<RequestId, oneshot::Sender<ResponseOutcome>>> {
        // Held only for map updates, never across I/O; a poisoned lock
        // still holds a coherent map.
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register an outbound request. Returns the awaitable handle.
    ///
    /// A given ID is in flight at most once; re-registering an ID replaces
    /// the stale entry, which then reads as cancelled.
    #[must_use]
    pub fn register(&self, id: RequestId) -> ResponseHandle {
        let (tx, rx) = oneshot::channel();
        if self.lock().insert(id.clone(), tx).is_some() {
            tracing::warn!(id = %id, "replaced stale pending entry");
        }
        ResponseHandle { id, rx }
    }

    /// Complete an entry. Returns false when the ID is not in flight;
    /// the caller treats that as an unmatched response.
    pub fn complete(&self, id: &RequestId, outcome: ResponseOutcome) -> bool {
        match self.lock().remove(id) {
            Some(tx) => {
                // A dropped handle is fine; the entry is gone either way.
                let _ = tx.send(outcome);
                true
            }
            None => false,
        }
    }

    /// Fail every in-flight entry with transport-closed and empty the map.
    pub fn fail_all_closed(&self) {
        let drained: Vec<_> = self.lock().drain().collect();
        for (id, tx) in drained {
            tracing::debug!(id = %id, "failing pending request: transport closed");
            let _ = tx.send(ResponseOutcome::Error(
                ProtocolError::TransportClosed.to_error_object(),
            ));
        }
    }

    /// Number of in-flight entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// True when nothing is in flight.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }
}
