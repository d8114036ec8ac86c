//! Inbound task lifecycle: the InboundActive map and the task state machine.
//!
//! Each inbound request the dispatcher accepts becomes a task tracked here
//! until its terminal response is handed to the pump. Cancellation is
//! published through a [`CancellationToken`]; handlers observe it
//! cooperatively; nothing here preempts a running handler.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio_util::sync::CancellationToken;

use crosstalk_core::jsonrpc::RequestId;

/// Task lifecycle state.
///
/// Transitions:
/// - Pending → Running (dispatcher hands the task to the worker pool)
/// - Running → Succeeded | Failed | Cancelled (terminal)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskState {
    /// Accepted, not yet executing.
    Pending,
    /// Handler executing. The only state in which progress is emitted.
    Running,
    /// Handler returned a result.
    Succeeded,
    /// Handler returned a protocol-level error.
    Failed,
    /// Handler acknowledged cancellation before producing a result.
    Cancelled,
}

impl TaskState {
    /// Returns true for terminal states.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed | Self::Cancelled)
    }

    /// Checks whether a transition from this state to another is valid.
    #[must_use]
    pub fn can_transition_to(&self, to: TaskState) -> bool {
        matches!(
            (self, to),
            (TaskState::Pending, TaskState::Running)
                | (TaskState::Running, TaskState::Succeeded)
                | (TaskState::Running, TaskState::Failed)
                | (TaskState::Running, TaskState::Cancelled)
        )
    }
}

impl std::fmt::Display for TaskState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Running => write!(f, "running"),
            Self::Succeeded => write!(f, "succeeded"),
            Self::Failed => write!(f, "failed"),
            Self::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// Handle onto one in-flight inbound task.
#[derive(Debug, Clone)]
pub struct TaskHandle {
    cancel: CancellationToken,
    state: Arc<Mutex<TaskState>>,
}

impl TaskHandle {
    fn new() -> Self {
        Self {
            cancel: CancellationToken::new(),
            state: Arc::new(Mutex::new(TaskState::Pending)),
        }
    }

    /// The task's cancellation token.
    #[must_use]
    pub fn cancellation(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Shared view of the task state, read by the progress emitter.
    #[must_use]
    pub(crate) fn state_cell(&self) -> Arc<Mutex<TaskState>> {
        Arc::clone(&self.state)
    }

    /// Current state.
    #[must_use]
    pub fn state(&self) -> TaskState {
        *lock_state(&self.state)
    }

    /// Advance the state machine. Invalid transitions are logged and
    /// ignored; a terminal state never changes again.
    pub fn set_state(&self, to: TaskState) {
        let mut state = lock_state(&self.state);
        if state.can_transition_to(to) {
            *state = to;
        } else {
            tracing::debug!(from = ?*state, to = ?to, "ignoring invalid task transition");
        }
    }
}

fn lock_state(state: &Mutex<TaskState>) -> MutexGuard<'_, TaskState> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}

/// The InboundActive correlation map.
#[derive(Debug, Default)]
pub struct ActiveTasks {
    inner: Mutex<HashMap<RequestId, TaskHandle>>,
}

impl ActiveTasks {
    /// Create an empty map.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<RequestId, TaskHandle>> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Admit a task under an ID. Returns `None` when that ID is already in
    /// flight; the caller rejects the duplicate request.
    #[must_use]
    pub fn begin(&self, id: &RequestId) -> Option<TaskHandle> {
        let mut map = self.lock();
        if map.contains_key(id) {
            return None;
        }
        let handle = TaskHandle::new();
        map.insert(id.clone(), handle.clone());
        Some(handle)
    }

    /// Request cancellation of a task. Returns false for unknown IDs;
    /// the request may have already completed, which is not an error.
    pub fn cancel(&self, id: &RequestId) -> bool {
        match self.lock().get(id) {
            Some(handle) => {
                handle.cancel.cancel();
                true
            }
            None => false,
        }
    }

    /// Remove a settled task from the map.
    pub fn finish(&self, id: &RequestId) {
        self.lock().remove(id);
    }

    /// Request cancellation of every in-flight task (session close).
    pub fn cancel_all(&self) {
        for handle in self.lock().values() {
            handle.cancel.cancel();
        }
    }

    /// Number of in-flight tasks.
    #[must_use]
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// True when no task is in flight.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }
}
