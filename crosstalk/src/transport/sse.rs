//! HTTP + Server-Sent Events transport, client side.
//!
//! Outbound frames go out as one POST per frame to the endpoint URL. A
//! `200` with a JSON body is the peer answering inline; a `202` defers the
//! answer to the SSE stream. Inbound frames arrive over a long-lived
//! `text/event-stream` GET on the same URL: each event's `data:` payload is
//! one complete JSON document. Non-`data:` fields other than `id:` are
//! ignored.
//!
//! The reader tracks the last seen event id and reconnects with
//! `Last-Event-ID` so the server can replay what was missed. When a bearer
//! token is configured it is attached to both the POST and the SSE GET.

use async_trait::async_trait;
use bytes::Bytes;
use futures_util::StreamExt;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crosstalk_core::error::ProtocolError;

use super::{CloseReason, Connection, FrameSink, Transport, TransportEvent, EVENT_QUEUE_DEPTH};

/// Give up after this many consecutive failed stream attempts.
const MAX_RECONNECT_ATTEMPTS: u32 = 8;

/// Initial reconnect backoff.
const RECONNECT_INITIAL_BACKOFF_MS: u64 = 50;

/// Maximum reconnect backoff.
const RECONNECT_MAX_BACKOFF_MS: u64 = 2000;

// ─────────────────────────────────────────────────────────────────────────────
// SSE Wire Decoding
// ─────────────────────────────────────────────────────────────────────────────

/// One decoded server-sent event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SseEvent {
    /// The `id:` field, when present.
    pub id: Option<String>,
    /// Concatenated `data:` payload.
    pub data: String,
}

/// Incremental decoder for a `text/event-stream` byte stream.
///
/// Feed raw chunks as they arrive; complete events come out. Field
/// handling follows the stream format: `data:` lines accumulate (joined
/// with `\n`), `id:` sets the event id, an empty line dispatches, comment
/// and unknown fields are dropped.
#[derive(Debug, Default)]
pub struct SseDecoder {
    buf: Vec<u8>,
    data: String,
    id: Option<String>,
}

impl SseDecoder {
    /// Create an empty decoder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed a chunk; returns every event completed by it.
    pub fn feed(&mut self, chunk: &[u8]) -> Vec<SseEvent> {
        self.buf.extend_from_slice(chunk);
        let mut events = Vec::new();

        while let Some(pos) = self.buf.iter().position(|&b| b == b'\n') {
            let line: Vec<u8> = self.buf.drain(..=pos).collect();
            let line = String::from_utf8_lossy(&line);
            let line = line.trim_end_matches(['\n', '\r']);

            if line.is_empty() {
                if !self.data.is_empty() {
                    events.push(SseEvent {
                        id: self.id.take(),
                        data: std::mem::take(&mut self.data),
                    });
                } else {
                    self.id = None;
                }
                continue;
            }

            if let Some(value) = field_value(line, "data") {
                if !self.data.is_empty() {
                    self.data.push('\n');
                }
                self.data.push_str(value);
            } else if let Some(value) = field_value(line, "id") {
                self.id = Some(value.to_owned());
            }
            // Comments (leading ':') and other fields are ignored.
        }
        events
    }
}

/// Extract the value of `field:` from a line, stripping one leading space.
fn field_value<'a>(line: &'a str, field: &str) -> Option<&'a str> {
    let rest = line.strip_prefix(field)?;
    let rest = rest.strip_prefix(':')?;
    Some(rest.strip_prefix(' ').unwrap_or(rest))
}

// ─────────────────────────────────────────────────────────────────────────────
// Client Transport
// ─────────────────────────────────────────────────────────────────────────────

/// HTTP+SSE client transport for an absolute endpoint URL.
pub struct HttpSseClient {
    endpoint: String,
    bearer_token: Option<String>,
    connect_timeout: std::time::Duration,
}

impl HttpSseClient {
    /// Create a client for an endpoint URL (e.g.
    /// `"https://host:8080/mcp"`). TLS comes from the URL scheme; trust
    /// roots are the host environment's.
    #[must_use]
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            bearer_token: None,
            connect_timeout: std::time::Duration::from_secs(5),
        }
    }

    /// Attach a bearer token to the POST and SSE requests.
    #[must_use]
    pub fn with_bearer_token(mut self, token: impl Into<String>) -> Self {
        self.bearer_token = Some(token.into());
        self
    }
}

#[async_trait]
impl Transport for HttpSseClient {
    async fn connect(&mut self) -> Result<Connection, ProtocolError> {
        let client = reqwest::Client::builder()
            .connect_timeout(self.connect_timeout)
            .build()
            .map_err(|e| ProtocolError::Internal {
                details: format!("http client: {e}"),
            })?;

        let (tx, rx) = mpsc::channel(EVENT_QUEUE_DEPTH);
        let shutdown = CancellationToken::new();

        tokio::spawn(stream_loop(
            client.clone(),
            self.endpoint.clone(),
            self.bearer_token.clone(),
            tx.clone(),
            shutdown.clone(),
        ));

        Ok(Connection {
            sink: Box::new(PostSink {
                client,
                endpoint: self.endpoint.clone(),
                bearer_token: self.bearer_token.clone(),
                ingest: tx,
                shutdown,
                closed: false,
            }),
            events: rx,
        })
    }
}

fn with_bearer(
    request: reqwest::RequestBuilder,
    bearer_token: Option<&String>,
) -> reqwest::RequestBuilder {
    match bearer_token {
        Some(token) => request.bearer_auth(token),
        None => request,
    }
}

/// Long-lived SSE reader: stream, decode, push frames; reconnect with
/// `Last-Event-ID` until the reconnect attempts are exhausted or close is
/// requested.
async fn stream_loop(
    client: reqwest::Client,
    endpoint: String,
    bearer_token: Option<String>,
    tx: mpsc::Sender<TransportEvent>,
    shutdown: CancellationToken,
) {
    let mut last_event_id: Option<String> = None;
    let mut failures: u32 = 0;

    loop {
        if shutdown.is_cancelled() {
            let _ = tx.send(TransportEvent::Closed(CloseReason::LocalClose)).await;
            return;
        }

        let mut request = with_bearer(client.get(&endpoint), bearer_token.as_ref())
            .header(reqwest::header::ACCEPT, "text/event-stream");
        if let Some(id) = &last_event_id {
            request = request.header("Last-Event-ID", id.clone());
        }

        let response = tokio::select! {
            () = shutdown.cancelled() => {
                let _ = tx.send(TransportEvent::Closed(CloseReason::LocalClose)).await;
                return;
            }
            response = request.send() => response,
        };

        match response {
            Ok(response) if response.status().is_success() => {
                failures = 0;
                let mut decoder = SseDecoder::new();
                let mut stream = response.bytes_stream();
                loop {
                    let chunk = tokio::select! {
                        () = shutdown.cancelled() => {
                            let _ = tx.send(TransportEvent::Closed(CloseReason::LocalClose)).await;
                            return;
                        }
                        chunk = stream.next() => chunk,
                    };
                    match chunk {
                        Some(Ok(chunk)) => {
                            for event in decoder.feed(&chunk) {
                                if let Some(id) = event.id {
                                    last_event_id = Some(id);
                                }
                                if event.data.is_empty() {
                                    continue;
                                }
                                if tx
                                    .send(TransportEvent::Frame(Bytes::from(event.data)))
                                    .await
                                    .is_err()
                                {
                                    return; // session gone
                                }
                            }
                        }
                        Some(Err(e)) => {
                            tracing::debug!(error = %e, "sse stream error; reconnecting");
                            break;
                        }
                        None => {
                            tracing::debug!("sse stream ended; reconnecting");
                            break;
                        }
                    }
                }
            }
            Ok(response) if response.status() == reqwest::StatusCode::UNAUTHORIZED => {
                let _ = tx
                    .send(TransportEvent::Closed(CloseReason::ReadError(
                        "unauthorized".to_owned(),
                    )))
                    .await;
                return;
            }
            Ok(response) => {
                tracing::debug!(status = %response.status(), "sse request rejected");
                failures += 1;
            }
            Err(e) => {
                tracing::debug!(error = %e, "sse connect failed");
                failures += 1;
            }
        }

        if failures >= MAX_RECONNECT_ATTEMPTS {
            let _ = tx
                .send(TransportEvent::Closed(CloseReason::ReadError(
                    "sse reconnect attempts exhausted".to_owned(),
                )))
                .await;
            return;
        }
        let backoff = (RECONNECT_INITIAL_BACKOFF_MS << failures.min(6))
            .min(RECONNECT_MAX_BACKOFF_MS);
        tokio::time::sleep(std::time::Duration::from_millis(backoff)).await;
    }
}

struct PostSink {
    client: reqwest::Client,
    endpoint: String,
    bearer_token: Option<String>,
    ingest: mpsc::Sender<TransportEvent>,
    shutdown: CancellationToken,
    closed: bool,
}

#[async_trait]
impl FrameSink for PostSink {
    async fn send(&mut self, frame: Bytes) -> Result<(), ProtocolError> {
        if self.closed {
            return Err(ProtocolError::TransportClosed);
        }
        let request = with_bearer(self.client.post(&self.endpoint), self.bearer_token.as_ref())
            .header(reqwest::header::CONTENT_TYPE, "application/json")
            .body(frame);
        let response = request.send().await.map_err(|e| ProtocolError::Write {
            details: e.to_string(),
        })?;

        match response.status() {
            status if status == reqwest::StatusCode::ACCEPTED => Ok(()),
            status if status.is_success() => {
                // Inline answer: the body is the response document.
                let body = response.bytes().await.map_err(|e| ProtocolError::Read {
                    details: e.to_string(),
                })?;
                if !body.is_empty() {
                    let _ = self.ingest.send(TransportEvent::Frame(body)).await;
                }
                Ok(())
            }
            reqwest::StatusCode::UNAUTHORIZED => Err(ProtocolError::Unauthorized),
            reqwest::StatusCode::FORBIDDEN => Err(ProtocolError::Forbidden),
            status => Err(ProtocolError::Write {
                details: format!("endpoint returned {status}"),
            }),
        }
    }

    async fn close(&mut self) -> Result<(), ProtocolError> {
        if !self.closed {
            self.closed = true;
            self.shutdown.cancel();
        }
        Ok(())
    }
}
