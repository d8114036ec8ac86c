//! Session: per-connection protocol state and the message ingest loop.
//!
//! One [`Session`] owns one transport connection. Its ingest loop is the
//! single consumer of transport events and the only place session phase
//! changes (the client-side handshake in [`crate::client`] is the one
//! sanctioned exception). Inbound requests become tasks on the worker pool;
//! inbound responses complete the pending map; notifications mutate phase,
//! cancel tasks, or route progress.
//!
//! The loop never blocks on handler work: requests are spawned, and every
//! outbound frame goes through the pump.

pub mod pending;
pub mod phase;

use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, Mutex, OnceLock, PoisonError};
use std::time::Duration;

use bytes::Bytes;
use serde_json::Value;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crosstalk_core::config::SessionConfig;
use crosstalk_core::error::ProtocolError;
use crosstalk_core::jsonrpc::{Envelope, Notification, Request, RequestId, Response};
use crosstalk_core::protocol::capability::{has_flag, intersect_capabilities, negotiate_version};
use crosstalk_core::protocol::methods::{
    self, ServerMethod, NOTIF_CANCELLED, NOTIF_INITIALIZED, NOTIF_PROGRESS,
    NOTIF_PROMPTS_LIST_CHANGED, NOTIF_RESOURCES_LIST_CHANGED, NOTIF_TOOLS_LIST_CHANGED,
};
use crosstalk_core::protocol::params::{
    progress_token_of, CancelledParams, InitializeParams, InitializeResult, ProgressParams,
    ProgressToken,
};

use crate::context::{ProgressEmitter, TaskContext};
use crate::handlers::dispatch;
use crate::pump::Pump;
use crate::registry::Registries;
use crate::tasks::{ActiveTasks, TaskState};
use crate::transport::{CloseReason, Connection, TransportEvent};

use pending::{PendingMap, ResponseHandle, ResponseOutcome};
use phase::SessionPhase;

/// State agreed during the `initialize` exchange.
#[derive(Debug, Clone)]
pub struct Negotiated {
    /// The protocol version both peers speak.
    pub protocol_version: String,
    /// Operational capability set: the intersection of both advertisements.
    pub capabilities: Value,
    /// Peer name from its info block.
    pub peer_name: String,
    /// Peer version from its info block.
    pub peer_version: String,
}

type ProgressRoutes = Mutex<HashMap<ProgressToken, mpsc::UnboundedSender<ProgressParams>>>;

/// Cloneable handle for interacting with a running session: sending
/// requests and notifications, observing phase, and routing progress.
#[derive(Clone)]
pub struct SessionHandle {
    pump: Pump,
    pending: Arc<PendingMap>,
    active: Arc<ActiveTasks>,
    phase: Arc<watch::Sender<SessionPhase>>,
    progress_routes: Arc<ProgressRoutes>,
    negotiated: Arc<OnceLock<Negotiated>>,
    next_id: Arc<AtomicI64>,
    request_timeout: Option<Duration>,
    session_id: Uuid,
    closer: CancellationToken,
}

impl SessionHandle {
    /// Ask the ingest loop to shut the session down. Idempotent.
    pub fn close(&self) {
        self.closer.cancel();
    }

    /// This session's identifier, for log correlation.
    #[must_use]
    pub fn session_id(&self) -> Uuid {
        self.session_id
    }

    /// Current protocol phase.
    #[must_use]
    pub fn phase(&self) -> SessionPhase {
        *self.phase.borrow()
    }

    /// Wait until the session reaches a phase (or a later one on the happy
    /// path). Returns immediately when already there.
    pub async fn wait_for_phase(&self, target: SessionPhase) {
        let mut rx = self.phase.subscribe();
        loop {
            if *rx.borrow() == target {
                return;
            }
            if rx.changed().await.is_err() {
                return;
            }
        }
    }

    /// The negotiated handshake state, once the session is past
    /// initialization.
    #[must_use]
    pub fn negotiated(&self) -> Option<Negotiated> {
        self.negotiated.get().cloned()
    }

    /// The underlying pump, for wiring registry change notifiers.
    #[must_use]
    pub fn pump(&self) -> Pump {
        self.pump.clone()
    }

    pub(crate) fn set_phase(&self, to: SessionPhase) {
        let from = *self.phase.borrow();
        if from.can_transition_to(to) {
            tracing::debug!(session = %self.session_id, %from, %to, "session phase change");
            self.phase.send_replace(to);
        } else if from != to {
            tracing::warn!(session = %self.session_id, %from, %to, "invalid phase transition ignored");
        }
    }

    pub(crate) fn set_negotiated(&self, negotiated: Negotiated) {
        if self.negotiated.set(negotiated).is_err() {
            tracing::warn!(session = %self.session_id, "handshake state already set");
        }
    }

    fn allocate_id(&self) -> RequestId {
        RequestId::Number(self.next_id.fetch_add(1, Ordering::Relaxed))
    }

    /// Send a request and return the handle that resolves to its outcome.
    ///
    /// When the session carries a default request timeout, expiry resolves
    /// the handle as cancelled and tells the peer via
    /// `notifications/cancelled`.
    ///
    /// # Errors
    ///
    /// [`ProtocolError::TransportClosed`] when the session is shutting
    /// down.
    pub async fn request(
        &self,
        method: &str,
        params: Option<Value>,
    ) -> Result<ResponseHandle, ProtocolError> {
        let id = self.allocate_id();
        let handle = self.pending.register(id.clone());
        let frame = Envelope::Request(Request::new(id.clone(), method, params));

        if let Err(e) = self.pump.send(&frame).await {
            let _ = self.pending.complete(&id, ResponseOutcome::Cancelled);
            return Err(e);
        }

        if let Some(timeout) = self.request_timeout {
            let watchdog = self.clone();
            tokio::spawn(async move {
                tokio::time::sleep(timeout).await;
                watchdog.settle_cancelled(&id, "timeout").await;
            });
        }
        Ok(handle)
    }

    /// Send a notification.
    ///
    /// # Errors
    ///
    /// [`ProtocolError::TransportClosed`] when the session is shutting
    /// down.
    pub async fn notify(&self, method: &str, params: Option<Value>) -> Result<(), ProtocolError> {
        self.pump
            .send(&Envelope::Notification(Notification::new(method, params)))
            .await
    }

    /// Cancel an in-flight outbound request. The handle resolves as
    /// cancelled and the peer receives `notifications/cancelled`. A request
    /// that already completed is left untouched.
    pub async fn cancel_request(&self, id: &RequestId) {
        self.settle_cancelled(id, "cancelled by caller").await;
    }

    async fn settle_cancelled(&self, id: &RequestId, reason: &str) {
        if !self.pending.complete(id, ResponseOutcome::Cancelled) {
            return;
        }
        tracing::debug!(session = %self.session_id, id = %id, reason, "outbound request cancelled");
        let params = CancelledParams {
            request_id: id.clone(),
            reason: Some(reason.to_owned()),
        };
        let notification =
            Notification::new(NOTIF_CANCELLED, serde_json::to_value(&params).ok());
        if let Err(e) = self.pump.send(&Envelope::Notification(notification)).await {
            tracing::debug!(error = %e, "could not send cancellation to peer");
        }
    }

    /// Route inbound `notifications/progress` frames carrying `token` to
    /// `sink`. Frames for unobserved tokens are dropped.
    pub fn observe_progress(
        &self,
        token: ProgressToken,
        sink: mpsc::UnboundedSender<ProgressParams>,
    ) {
        self.progress_routes
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(token, sink);
    }

    /// Stop routing a progress token.
    pub fn release_progress(&self, token: &ProgressToken) {
        self.progress_routes
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(token);
    }

    fn route_progress(&self, params: ProgressParams) {
        let mut routes = self
            .progress_routes
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let token = params.progress_token.clone();
        match routes.get(&token) {
            Some(sink) => {
                if sink.send(params).is_err() {
                    routes.remove(&token);
                }
            }
            None => {
                tracing::debug!(token = %token, "dropping progress for dead token");
            }
        }
    }

    /// Number of in-flight outbound requests. Exposed for tests and
    /// diagnostics.
    #[must_use]
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// Number of in-flight inbound tasks. Exposed for tests and
    /// diagnostics.
    #[must_use]
    pub fn active_len(&self) -> usize {
        self.active.len()
    }
}

/// A session bound to one transport connection. Drive it with
/// [`Session::run`].
pub struct Session {
    config: SessionConfig,
    registries: Registries,
    events: mpsc::Receiver<TransportEvent>,
    handle: SessionHandle,
    writer: Option<JoinHandle<()>>,
}

impl Session {
    /// Bind a session to an established connection.
    #[must_use]
    pub fn new(
        connection: Connection,
        config: SessionConfig,
        registries: Registries,
    ) -> (Self, SessionHandle) {
        let (pump, writer) = Pump::start(connection.sink, config.pump_depth);
        let (phase_tx, _) = watch::channel(SessionPhase::Uninitialized);
        let handle = SessionHandle {
            pump,
            pending: Arc::new(PendingMap::new()),
            active: Arc::new(ActiveTasks::new()),
            phase: Arc::new(phase_tx),
            progress_routes: Arc::new(Mutex::new(HashMap::new())),
            negotiated: Arc::new(OnceLock::new()),
            next_id: Arc::new(AtomicI64::new(1)),
            request_timeout: config.request_timeout,
            session_id: Uuid::new_v4(),
            closer: CancellationToken::new(),
        };
        let session = Self {
            config,
            registries,
            events: connection.events,
            handle: handle.clone(),
            writer: Some(writer),
        };
        (session, handle)
    }

    /// Run the ingest loop until the transport closes. Returns why.
    ///
    /// On close the session fails all pending outbound requests with
    /// transport-closed, requests cancellation of every active task, and
    /// drains the pump best-effort.
    pub async fn run(mut self) -> CloseReason {
        let closer = self.handle.closer.clone();
        let reason = loop {
            tokio::select! {
                () = closer.cancelled() => break CloseReason::LocalClose,
                event = self.events.recv() => match event {
                    Some(TransportEvent::Frame(frame)) => self.on_frame(frame).await,
                    Some(TransportEvent::Closed(reason)) => break reason,
                    // The transport dropped its sender without a close
                    // event; treat it as EOF.
                    None => break CloseReason::Eof,
                }
            }
        };
        tracing::info!(session = %self.handle.session_id, %reason, "session closing");
        self.shutdown().await;
        reason
    }

    async fn shutdown(&mut self) {
        self.handle.set_phase(SessionPhase::Closing);
        self.handle.active.cancel_all();
        self.handle.pending.fail_all_closed();
        self.handle.pump.close().await;
        if let Some(writer) = self.writer.take() {
            let _ = writer.await;
        }
        self.handle.set_phase(SessionPhase::Closed);
    }

    async fn on_frame(&self, frame: Bytes) {
        let envelope = if frame.len() > self.config.max_frame_bytes {
            Err(ProtocolError::Parse {
                details: format!("frame exceeds {} bytes", self.config.max_frame_bytes),
            })
        } else {
            Envelope::decode(&frame).map_err(ProtocolError::from)
        };

        match envelope {
            Ok(Envelope::Request(request)) => self.on_request(request).await,
            Ok(Envelope::Response(response)) => self.on_response(response),
            Ok(Envelope::Notification(notification)) => self.on_notification(notification),
            Err(error) => {
                // A frame that cannot be correlated is answered exactly
                // once with a null-id error; the session stays open.
                tracing::warn!(session = %self.handle.session_id, kind = error.kind(), "rejecting inbound frame");
                self.reply_error(RequestId::Null, &error).await;
            }
        }
    }

    // ─── Requests ───────────────────────────────────────────────────────

    async fn on_request(&self, request: Request) {
        let phase = self.handle.phase();
        let method = request.method.as_str();
        tracing::debug!(session = %self.handle.session_id, %phase, method, id = %request.id, "inbound request");

        // Ping is served in every phase past Uninitialized, including
        // Closing/Closed (where the reply is dropped with the pump).
        if method == methods::PING && phase != SessionPhase::Uninitialized {
            self.reply_success(request.id, Value::Object(Default::default()))
                .await;
            return;
        }

        match phase {
            SessionPhase::Uninitialized => {
                if method == methods::INITIALIZE {
                    self.on_initialize(request).await;
                } else {
                    self.reply_error(
                        request.id,
                        &ProtocolError::InvalidRequest {
                            details: "server not initialized".to_owned(),
                        },
                    )
                    .await;
                }
            }
            SessionPhase::Initializing => {
                self.reply_error(
                    request.id,
                    &ProtocolError::InvalidRequest {
                        details: "initialization not complete".to_owned(),
                    },
                )
                .await;
            }
            SessionPhase::Ready => match ServerMethod::from_name(method) {
                Some(ServerMethod::Initialize) => {
                    self.reply_error(
                        request.id,
                        &ProtocolError::InvalidRequest {
                            details: "session already initialized".to_owned(),
                        },
                    )
                    .await;
                }
                Some(method) => self.spawn_task(request, method).await,
                None => {
                    self.reply_error(
                        request.id.clone(),
                        &ProtocolError::MethodNotFound {
                            method: method.to_owned(),
                        },
                    )
                    .await;
                }
            },
            SessionPhase::Closing | SessionPhase::Closed => {
                self.reply_error(
                    request.id,
                    &ProtocolError::InvalidRequest {
                        details: "session closing".to_owned(),
                    },
                )
                .await;
            }
        }
    }

    async fn on_initialize(&self, request: Request) {
        let params: InitializeParams = match request.params.clone().map(serde_json::from_value) {
            Some(Ok(params)) => params,
            Some(Err(e)) => {
                self.reply_error(
                    request.id,
                    &ProtocolError::InvalidParams {
                        details: e.to_string(),
                    },
                )
                .await;
                return;
            }
            None => {
                self.reply_error(
                    request.id,
                    &ProtocolError::InvalidParams {
                        details: "missing params".to_owned(),
                    },
                )
                .await;
                return;
            }
        };

        let version = match negotiate_version(&params.protocol_version) {
            Ok(version) => version,
            Err(error) => {
                self.reply_error(request.id, &error).await;
                return;
            }
        };

        let operational = intersect_capabilities(&self.config.capabilities, &params.capabilities);
        self.arm_change_notifiers(&operational);
        self.handle.set_negotiated(Negotiated {
            protocol_version: version.clone(),
            capabilities: operational,
            peer_name: params.client_info.name.clone(),
            peer_version: params.client_info.version.clone(),
        });

        // The reply advertises this side's own capability set; the
        // operational set kept above is the intersection.
        let result = InitializeResult {
            protocol_version: version,
            server_info: self.config.server_info.clone(),
            capabilities: self.config.capabilities.clone(),
        };
        match serde_json::to_value(&result) {
            Ok(value) => {
                self.reply_success(request.id, value).await;
                self.handle.set_phase(SessionPhase::Initializing);
                tracing::info!(
                    session = %self.handle.session_id,
                    peer = %params.client_info.name,
                    "handshake reply sent; awaiting initialized"
                );
            }
            Err(e) => {
                self.reply_error(
                    request.id,
                    &ProtocolError::Internal {
                        details: e.to_string(),
                    },
                )
                .await;
            }
        }
    }

    /// Arm each registry's change notifier for the features whose
    /// `listChanged` flag survived capability intersection. Registry
    /// mutation after this point emits the matching list-changed
    /// notification through the pump.
    fn arm_change_notifiers(&self, operational: &Value) {
        let features: [(&str, &'static str, Option<&crate::registry::ChangeNotifier>); 3] = [
            (
                "tools",
                NOTIF_TOOLS_LIST_CHANGED,
                self.registries.tools.change_notifier(),
            ),
            (
                "resources",
                NOTIF_RESOURCES_LIST_CHANGED,
                self.registries.resources.change_notifier(),
            ),
            (
                "prompts",
                NOTIF_PROMPTS_LIST_CHANGED,
                self.registries.prompts.change_notifier(),
            ),
        ];
        for (feature, method, notifier) in features {
            if !has_flag(operational, feature, "listChanged") {
                continue;
            }
            if let Some(notifier) = notifier {
                notifier.arm(self.handle.pump.clone(), method);
                tracing::debug!(session = %self.handle.session_id, feature, "list-changed notifications armed");
            }
        }
    }

    async fn spawn_task(&self, request: Request, method: ServerMethod) {
        let Request { id, params, .. } = request;

        let Some(task) = self.handle.active.begin(&id) else {
            self.reply_error(
                id,
                &ProtocolError::InvalidRequest {
                    details: "request id already in flight".to_owned(),
                },
            )
            .await;
            return;
        };

        let token = progress_token_of(params.as_ref());
        let emitter = ProgressEmitter::new(token, self.handle.pump.clone(), task.state_cell());
        let ctx = TaskContext::new(id.clone(), emitter, task.cancellation());
        task.set_state(TaskState::Running);

        let handle = self.handle.clone();
        let registries = self.registries.clone();
        let page_size = self.config.page_size;
        tokio::spawn(async move {
            let outcome = dispatch(method, params, ctx, &registries, page_size).await;
            let (state, response) = match outcome {
                Ok(value) => (TaskState::Succeeded, Response::success(id.clone(), value)),
                Err(error @ ProtocolError::Cancelled) => (
                    TaskState::Cancelled,
                    Response::error(id.clone(), error.to_error_object()),
                ),
                Err(error) => {
                    tracing::debug!(session = %handle.session_id, id = %id, kind = error.kind(), "task failed");
                    (
                        TaskState::Failed,
                        Response::error(id.clone(), error.to_error_object()),
                    )
                }
            };
            // Terminal state first: progress stops before the response can
            // reach the wire. The task leaves the active map only after its
            // response is handed to the pump.
            task.set_state(state);
            if let Err(e) = handle.pump.send(&Envelope::Response(response)).await {
                tracing::debug!(session = %handle.session_id, id = %id, error = %e, "response dropped: session closing");
            }
            handle.active.finish(&id);
        });
    }

    // ─── Responses ──────────────────────────────────────────────────────

    fn on_response(&self, response: Response) {
        let outcome = match response.error {
            Some(error) => ResponseOutcome::Error(error),
            None => ResponseOutcome::Result(response.result.unwrap_or(Value::Null)),
        };
        if !self.handle.pending.complete(&response.id, outcome) {
            // Unmatched responses produce a diagnostic, never a frame.
            let error = ProtocolError::UnmatchedResponse {
                id: response.id.to_string(),
            };
            tracing::warn!(session = %self.handle.session_id, kind = error.kind(), id = %response.id, "dropping unmatched response");
        }
    }

    // ─── Notifications ──────────────────────────────────────────────────

    fn on_notification(&self, notification: Notification) {
        match notification.method.as_str() {
            NOTIF_INITIALIZED => {
                if self.handle.phase() == SessionPhase::Initializing {
                    self.handle.set_phase(SessionPhase::Ready);
                    tracing::info!(session = %self.handle.session_id, "session ready");
                } else {
                    tracing::debug!(session = %self.handle.session_id, "ignoring initialized out of phase");
                }
            }
            NOTIF_CANCELLED => match notification
                .params
                .map(serde_json::from_value::<CancelledParams>)
            {
                Some(Ok(params)) => {
                    // Unknown ids are ignored: the task may have already
                    // completed, which is not an error.
                    let hit = self.handle.active.cancel(&params.request_id);
                    tracing::debug!(
                        session = %self.handle.session_id,
                        id = %params.request_id,
                        hit,
                        "cancellation request"
                    );
                }
                _ => {
                    let error = ProtocolError::InvalidNotification {
                        details: "malformed notifications/cancelled params".to_owned(),
                    };
                    tracing::warn!(session = %self.handle.session_id, kind = error.kind(), "dropping notification");
                }
            },
            NOTIF_PROGRESS => match notification
                .params
                .map(serde_json::from_value::<ProgressParams>)
            {
                Some(Ok(params)) => self.handle.route_progress(params),
                _ => {
                    let error = ProtocolError::InvalidNotification {
                        details: "malformed notifications/progress params".to_owned(),
                    };
                    tracing::warn!(session = %self.handle.session_id, kind = error.kind(), "dropping notification");
                }
            },
            other => {
                tracing::debug!(session = %self.handle.session_id, method = other, "unhandled notification");
            }
        }
    }

    // ─── Replies ────────────────────────────────────────────────────────

    async fn reply_success(&self, id: RequestId, result: Value) {
        let response = Response::success(id, result);
        if let Err(e) = self.handle.pump.send(&Envelope::Response(response)).await {
            tracing::debug!(session = %self.handle.session_id, error = %e, "reply dropped: session closing");
        }
    }

    async fn reply_error(&self, id: RequestId, error: &ProtocolError) {
        reply_error_on(&self.handle, id, error).await;
    }
}

async fn reply_error_on(handle: &SessionHandle, id: RequestId, error: &ProtocolError) {
    let response = Response::error(id, error.to_error_object());
    if let Err(e) = handle.pump.send(&Envelope::Response(response)).await {
        tracing::debug!(session = %handle.session_id, error = %e, "error reply dropped: session closing");
    }
}
