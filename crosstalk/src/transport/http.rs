//! HTTP + Server-Sent Events transport, server side.
//!
//! Inbound frames arrive as one JSON document per POST to the endpoint
//! path. Outbound frames go to every open SSE stream on the same path
//! (`GET` with `Accept: text/event-stream`), each as a single `data:`
//! payload with a monotonically increasing event id.
//!
//! A bounded replay ring keeps the most recent events; a reconnecting
//! client presents `Last-Event-ID` and receives the tail it missed,
//! best-effort; the ring is an optimization, never a delivery guarantee.
//!
//! When a bearer token is configured, both the POST and the SSE GET
//! require `Authorization: Bearer <token>`.

use std::collections::VecDeque;
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use axum::extract::State;
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::IntoResponse;
use axum::routing::post;
use axum::Router;
use bytes::Bytes;
use futures_util::stream::StreamExt;
use tokio::sync::{broadcast, mpsc};
use tokio_stream::wrappers::BroadcastStream;
use tokio_util::sync::CancellationToken;

use crosstalk_core::error::ProtocolError;
use crosstalk_core::jsonrpc::MAX_FRAME_BYTES;

use super::{CloseReason, Connection, FrameSink, Transport, TransportEvent, EVENT_QUEUE_DEPTH};

/// Default endpoint path for POST and the SSE stream.
pub const DEFAULT_ENDPOINT_PATH: &str = "/mcp";

/// Default replay ring depth.
pub const DEFAULT_REPLAY_DEPTH: usize = 256;

/// One outbound SSE event.
#[derive(Debug, Clone)]
struct SseFrame {
    id: u64,
    data: String,
}

struct HttpState {
    ingest: mpsc::Sender<TransportEvent>,
    broadcast: broadcast::Sender<SseFrame>,
    ring: Mutex<VecDeque<SseFrame>>,
    next_event_id: AtomicU64,
    replay_depth: usize,
    bearer_token: Option<String>,
}

impl HttpState {
    fn authorized(&self, headers: &HeaderMap) -> bool {
        let Some(token) = &self.bearer_token else {
            return true;
        };
        headers
            .get(header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|v| v == format!("Bearer {token}"))
    }

    fn publish(&self, data: String) {
        let id = self.next_event_id.fetch_add(1, Ordering::Relaxed) + 1;
        let frame = SseFrame {
            id,
            data,
        };
        {
            let mut ring = self.ring.lock().unwrap_or_else(PoisonError::into_inner);
            ring.push_back(frame.clone());
            while ring.len() > self.replay_depth {
                ring.pop_front();
            }
        }
        // No subscribers is fine; the ring still remembers the tail.
        let _ = self.broadcast.send(frame);
    }

    fn replay_after(&self, last_seen: u64) -> Vec<SseFrame> {
        self.ring
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|f| f.id > last_seen)
            .cloned()
            .collect()
    }
}

/// HTTP+SSE server transport bound to a listen address.
pub struct HttpServerTransport {
    listen_addr: String,
    bearer_token: Option<String>,
    replay_depth: usize,
    local_addr: Option<SocketAddr>,
}

impl HttpServerTransport {
    /// Create a transport that will bind `listen_addr` (e.g.
    /// `"127.0.0.1:8080"`).
    #[must_use]
    pub fn new(listen_addr: impl Into<String>) -> Self {
        Self {
            listen_addr: listen_addr.into(),
            bearer_token: None,
            replay_depth: DEFAULT_REPLAY_DEPTH,
            local_addr: None,
        }
    }

    /// Require a bearer token on both routes.
    #[must_use]
    pub fn with_bearer_token(mut self, token: impl Into<String>) -> Self {
        self.bearer_token = Some(token.into());
        self
    }

    /// Override the replay ring depth.
    #[must_use]
    pub fn with_replay_depth(mut self, depth: usize) -> Self {
        self.replay_depth = depth.max(1);
        self
    }

    /// The bound address, available after `connect` (useful with port 0).
    #[must_use]
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr
    }
}

#[async_trait]
impl Transport for HttpServerTransport {
    async fn connect(&mut self) -> Result<Connection, ProtocolError> {
        let listener = tokio::net::TcpListener::bind(&self.listen_addr)
            .await
            .map_err(|e| ProtocolError::Internal {
                details: format!("bind {}: {e}", self.listen_addr),
            })?;
        self.local_addr = listener.local_addr().ok();

        let (tx, rx) = mpsc::channel(EVENT_QUEUE_DEPTH);
        let (broadcast_tx, _) = broadcast::channel(EVENT_QUEUE_DEPTH);
        let state = Arc::new(HttpState {
            ingest: tx.clone(),
            broadcast: broadcast_tx,
            ring: Mutex::new(VecDeque::new()),
            next_event_id: AtomicU64::new(0),
            replay_depth: self.replay_depth,
            bearer_token: self.bearer_token.clone(),
        });

        let router = Router::new()
            .route(DEFAULT_ENDPOINT_PATH, post(post_frame).get(sse_stream))
            .layer(axum::extract::DefaultBodyLimit::max(MAX_FRAME_BYTES))
            .with_state(Arc::clone(&state));

        let shutdown = CancellationToken::new();
        let serve_shutdown = shutdown.clone();
        tokio::spawn(async move {
            let result = axum::serve(listener, router)
                .with_graceful_shutdown(async move { serve_shutdown.cancelled().await })
                .await;
            let reason = match result {
                Ok(()) => CloseReason::LocalClose,
                Err(e) => CloseReason::ReadError(e.to_string()),
            };
            let _ = tx.send(TransportEvent::Closed(reason)).await;
        });

        Ok(Connection {
            sink: Box::new(SseSink {
                state,
                shutdown,
                closed: false,
            }),
            events: rx,
        })
    }
}

async fn post_frame(
    State(state): State<Arc<HttpState>>,
    headers: HeaderMap,
    body: Bytes,
) -> impl IntoResponse {
    if !state.authorized(&headers) {
        return StatusCode::UNAUTHORIZED;
    }
    if body.is_empty() {
        return StatusCode::BAD_REQUEST;
    }
    // The response to this frame, if any, is delivered over the SSE
    // stream; the POST only acknowledges receipt.
    match state.ingest.send(TransportEvent::Frame(body)).await {
        Ok(()) => StatusCode::ACCEPTED,
        Err(_) => StatusCode::SERVICE_UNAVAILABLE,
    }
}

async fn sse_stream(
    State(state): State<Arc<HttpState>>,
    headers: HeaderMap,
) -> axum::response::Response {
    if !state.authorized(&headers) {
        return StatusCode::UNAUTHORIZED.into_response();
    }

    let last_seen: u64 = headers
        .get("last-event-id")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse().ok())
        .unwrap_or(0);

    // Subscribe before snapshotting the ring so nothing published in
    // between is lost; the floor filter drops any overlap.
    let live = BroadcastStream::new(state.broadcast.subscribe());
    let replay = state.replay_after(last_seen);
    let mut floor = replay.last().map_or(last_seen, |f| f.id);

    let stream = futures_util::stream::iter(replay)
        .chain(live.filter_map(move |item| {
            let next = match item {
                Ok(frame) if frame.id > floor => {
                    floor = frame.id;
                    Some(frame)
                }
                // Overlap with the replay tail, or a lagged receiver that
                // missed events; replay is best-effort.
                _ => None,
            };
            futures_util::future::ready(next)
        }))
        .map(|frame| Ok::<_, Infallible>(Event::default().id(frame.id.to_string()).data(frame.data)));

    Sse::new(stream)
        .keep_alive(KeepAlive::default())
        .into_response()
}

struct SseSink {
    state: Arc<HttpState>,
    shutdown: CancellationToken,
    closed: bool,
}

#[async_trait]
impl FrameSink for SseSink {
    async fn send(&mut self, frame: Bytes) -> Result<(), ProtocolError> {
        if self.closed {
            return Err(ProtocolError::TransportClosed);
        }
        let data = String::from_utf8(frame.to_vec()).map_err(|e| ProtocolError::Write {
            details: format!("frame is not UTF-8: {e}"),
        })?;
        self.state.publish(data);
        Ok(())
    }

    async fn close(&mut self) -> Result<(), ProtocolError> {
        if !self.closed {
            self.closed = true;
            self.shutdown.cancel();
        }
        Ok(())
    }
}
