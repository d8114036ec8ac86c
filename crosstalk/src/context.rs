//! Handler-facing task context: progress emission and cancellation.
//!
//! A [`TaskContext`] is handed to every request handler. It carries the
//! request's identity, a fire-and-forget progress emitter (a no-op when the
//! request carried no progress token), and the cooperative cancellation
//! observer. Handlers poll [`TaskContext::checkpoint`] at natural
//! suspension points or await [`TaskContext::cancelled`].

use std::sync::{Arc, Mutex, PoisonError};

use tokio_util::sync::CancellationToken;

use crosstalk_core::error::ProtocolError;
use crosstalk_core::jsonrpc::{Envelope, Notification, RequestId};
use crosstalk_core::protocol::methods::NOTIF_PROGRESS;
use crosstalk_core::protocol::params::{ProgressParams, ProgressToken};

use crate::pump::Pump;
use crate::tasks::TaskState;

/// Sends `notifications/progress` frames for one task.
///
/// Emission is fire-and-forget: a full pump queue drops the report rather
/// than suspending the handler, and nothing is emitted once the task has
/// left the running state.
#[derive(Clone)]
pub struct ProgressEmitter {
    token: Option<ProgressToken>,
    pump: Option<Pump>,
    state: Arc<Mutex<TaskState>>,
}

impl ProgressEmitter {
    pub(crate) fn new(
        token: Option<ProgressToken>,
        pump: Pump,
        state: Arc<Mutex<TaskState>>,
    ) -> Self {
        Self {
            token,
            pump: Some(pump),
            state,
        }
    }

    /// An emitter that drops everything, for requests without a token.
    #[must_use]
    pub fn disabled() -> Self {
        Self {
            token: None,
            pump: None,
            state: Arc::new(Mutex::new(TaskState::Running)),
        }
    }

    /// Whether the originating request asked for progress.
    #[must_use]
    pub fn is_enabled(&self) -> bool {
        self.token.is_some() && self.pump.is_some()
    }

    fn emit(&self, progress: f64, total: Option<f64>, message: Option<&str>) {
        let (Some(token), Some(pump)) = (&self.token, &self.pump) else {
            return;
        };
        let running = {
            let state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
            *state == TaskState::Running
        };
        if !running {
            return;
        }

        let params = ProgressParams {
            progress_token: token.clone(),
            progress,
            total,
            message: message.map(String::from),
        };
        let notification = Notification::new(
            NOTIF_PROGRESS,
            serde_json::to_value(&params).ok(),
        );
        if !pump.try_send(&Envelope::Notification(notification)) {
            tracing::debug!(token = %token, "dropped progress report: pump full or closed");
        }
    }
}

impl std::fmt::Debug for ProgressEmitter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProgressEmitter")
            .field("enabled", &self.is_enabled())
            .finish_non_exhaustive()
    }
}

/// Per-request context handed to handlers.
#[derive(Debug, Clone)]
pub struct TaskContext {
    request_id: RequestId,
    progress: ProgressEmitter,
    cancel: CancellationToken,
}

impl TaskContext {
    pub(crate) fn new(
        request_id: RequestId,
        progress: ProgressEmitter,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            request_id,
            progress,
            cancel,
        }
    }

    /// A standalone context for exercising handlers in tests: no progress
    /// sink, fresh cancellation token.
    #[must_use]
    pub fn detached() -> Self {
        Self {
            request_id: RequestId::Number(0),
            progress: ProgressEmitter::disabled(),
            cancel: CancellationToken::new(),
        }
    }

    /// The originating request's ID.
    #[must_use]
    pub fn request_id(&self) -> &RequestId {
        &self.request_id
    }

    /// Report progress on the current operation. No-op without a token.
    pub fn report_progress(&self, progress: f64, total: Option<f64>) {
        self.progress.emit(progress, total, None);
    }

    /// Report progress with a status message.
    pub fn report_progress_with_message(&self, progress: f64, total: Option<f64>, message: &str) {
        self.progress.emit(progress, total, Some(message));
    }

    /// True once cancellation has been requested.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Cooperative cancellation checkpoint.
    ///
    /// # Errors
    ///
    /// [`ProtocolError::Cancelled`] once cancellation has been requested;
    /// propagating it settles the task with the cancelled error envelope.
    pub fn checkpoint(&self) -> Result<(), ProtocolError> {
        if self.cancel.is_cancelled() {
            Err(ProtocolError::Cancelled)
        } else {
            Ok(())
        }
    }

    /// Resolves once cancellation is requested. Useful inside `select!`
    /// against slow I/O.
    pub async fn cancelled(&self) {
        self.cancel.cancelled().await;
    }
}
