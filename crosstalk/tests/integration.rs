//! End-to-end session scenarios over an in-memory transport.
//!
//! Each test drives a server session with literal wire frames and asserts
//! the literal frames that come back, covering the handshake, listing,
//! progress + cancellation, error mapping, and close semantics.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use serde_json::{json, Value};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::timeout;

use crosstalk::core::error::ProtocolError;
use crosstalk::core::protocol::params::CallToolResult;
use crosstalk::core::protocol::types::{ClientInfo, Tool};
use crosstalk::core::SessionConfig;
use crosstalk::registry::{InMemoryTools, Registries, ToolHandler};
use crosstalk::session::pending::ResponseOutcome;
use crosstalk::transport::memory;
use crosstalk::transport::{CloseReason, Connection, FrameSink, TransportEvent};
use crosstalk::{ClientError, ClientSession, Session, SessionHandle, SessionPhase};

const WAIT: Duration = Duration::from_secs(5);

// ─────────────────────────────────────────────────────────────────────────────
// Harness
// ─────────────────────────────────────────────────────────────────────────────

/// The test's side of the wire: raw frame I/O against a running session.
struct Peer {
    sink: Box<dyn FrameSink>,
    events: mpsc::Receiver<TransportEvent>,
}

impl Peer {
    async fn send(&mut self, frame: Value) {
        self.send_raw(frame.to_string().into_bytes()).await;
    }

    async fn send_raw(&mut self, bytes: Vec<u8>) {
        self.sink
            .send(Bytes::from(bytes))
            .await
            .expect("peer send failed");
    }

    async fn recv(&mut self) -> Value {
        match timeout(WAIT, self.events.recv()).await {
            Ok(Some(TransportEvent::Frame(frame))) => {
                serde_json::from_slice(&frame).expect("server emitted invalid JSON")
            }
            Ok(Some(TransportEvent::Closed(reason))) => panic!("transport closed: {reason}"),
            Ok(None) => panic!("event channel dropped"),
            Err(_) => panic!("timed out waiting for a frame"),
        }
    }

    async fn close(&mut self) {
        self.sink.close().await.expect("peer close failed");
    }
}

fn server_config() -> SessionConfig {
    SessionConfig::default()
        .with_server_info("s", "1")
        .with_capabilities(json!({"tools": {}}))
        .with_request_timeout(None)
}

fn spawn_server(
    config: SessionConfig,
    registries: Registries,
) -> (Peer, SessionHandle, JoinHandle<CloseReason>) {
    let (server_side, peer_side) = memory::pair();
    let (session, handle) = Session::new(server_side, config, registries);
    let runner = tokio::spawn(session.run());
    let Connection { sink, events } = peer_side;
    (Peer { sink, events }, handle, runner)
}

/// A tool that reports 0.5 progress, then waits for cancellation and
/// acknowledges it.
fn slow_tool() -> ToolHandler {
    Arc::new(|_arguments, ctx| {
        Box::pin(async move {
            ctx.report_progress(0.5, None);
            ctx.cancelled().await;
            ctx.checkpoint()?;
            Ok(CallToolResult::text("unreachable"))
        })
    })
}

fn tool_named(name: &str) -> Tool {
    Tool {
        name: name.to_owned(),
        description: None,
        input_schema: json!({"type": "object"}),
    }
}

fn registries_with(tools: InMemoryTools) -> Registries {
    Registries {
        tools: Arc::new(tools),
        ..Registries::default()
    }
}

async fn handshake(peer: &mut Peer, handle: &SessionHandle) {
    peer.send(json!({
        "jsonrpc": "2.0", "id": 1, "method": "initialize",
        "params": {
            "protocolVersion": "2025-06-18",
            "clientInfo": {"name": "c", "version": "1"},
            "capabilities": {}
        }
    }))
    .await;
    let reply = peer.recv().await;
    assert_eq!(reply["id"], 1);
    assert!(reply.get("result").is_some(), "handshake failed: {reply}");

    peer.send(json!({"jsonrpc": "2.0", "method": "notifications/initialized"}))
        .await;
    timeout(WAIT, handle.wait_for_phase(SessionPhase::Ready))
        .await
        .expect("session never became ready");
}

// ─────────────────────────────────────────────────────────────────────────────
// Literal Scenarios
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_handshake_success() {
    let (mut peer, handle, _runner) = spawn_server(server_config(), Registries::default());

    peer.send(json!({
        "jsonrpc": "2.0", "id": 1, "method": "initialize",
        "params": {
            "protocolVersion": "2025-06-18",
            "clientInfo": {"name": "c", "version": "1"},
            "capabilities": {}
        }
    }))
    .await;

    assert_eq!(
        peer.recv().await,
        json!({
            "jsonrpc": "2.0", "id": 1,
            "result": {
                "protocolVersion": "2025-06-18",
                "serverInfo": {"name": "s", "version": "1"},
                "capabilities": {"tools": {}}
            }
        })
    );
    assert_eq!(handle.phase(), SessionPhase::Initializing);

    peer.send(json!({"jsonrpc": "2.0", "method": "notifications/initialized"}))
        .await;
    timeout(WAIT, handle.wait_for_phase(SessionPhase::Ready))
        .await
        .expect("session never became ready");

    // The notification produced no response frame: the next frame out is
    // the answer to this ping.
    peer.send(json!({"jsonrpc": "2.0", "id": 99, "method": "ping"})).await;
    assert_eq!(
        peer.recv().await,
        json!({"jsonrpc": "2.0", "id": 99, "result": {}})
    );
}

#[tokio::test]
async fn test_list_tools_on_empty_registry() {
    let (mut peer, handle, _runner) = spawn_server(server_config(), Registries::default());
    handshake(&mut peer, &handle).await;

    peer.send(json!({"jsonrpc": "2.0", "id": 2, "method": "tools/list"}))
        .await;
    assert_eq!(
        peer.recv().await,
        json!({"jsonrpc": "2.0", "id": 2, "result": {"tools": []}})
    );
}

#[tokio::test]
async fn test_tool_call_with_progress_and_cancellation() {
    let tools = InMemoryTools::new();
    tools.register(tool_named("slow"), slow_tool());
    let (mut peer, handle, _runner) = spawn_server(server_config(), registries_with(tools));
    handshake(&mut peer, &handle).await;

    peer.send(json!({
        "jsonrpc": "2.0", "id": 3, "method": "tools/call",
        "params": {"name": "slow", "_meta": {"progressToken": "p1"}}
    }))
    .await;

    assert_eq!(
        peer.recv().await,
        json!({
            "jsonrpc": "2.0", "method": "notifications/progress",
            "params": {"progressToken": "p1", "progress": 0.5}
        })
    );

    peer.send(json!({
        "jsonrpc": "2.0", "method": "notifications/cancelled",
        "params": {"requestId": 3}
    }))
    .await;

    assert_eq!(
        peer.recv().await,
        json!({
            "jsonrpc": "2.0", "id": 3,
            "error": {"code": -32800, "message": "cancelled"}
        })
    );

    // The settled task leaves the active map; id 3 becomes reusable.
    timeout(WAIT, async {
        while handle.active_len() != 0 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("task never left the active map");
}

#[tokio::test]
async fn test_unknown_method() {
    let (mut peer, handle, _runner) = spawn_server(server_config(), Registries::default());
    handshake(&mut peer, &handle).await;

    peer.send(json!({"jsonrpc": "2.0", "id": 4, "method": "nope"}))
        .await;
    assert_eq!(
        peer.recv().await,
        json!({
            "jsonrpc": "2.0", "id": 4,
            "error": {"code": -32601, "message": "method not found"}
        })
    );
}

#[tokio::test]
async fn test_ping_allowed_before_initialized() {
    let (mut peer, _handle, _runner) = spawn_server(server_config(), Registries::default());

    peer.send(json!({
        "jsonrpc": "2.0", "id": 1, "method": "initialize",
        "params": {
            "protocolVersion": "2025-06-18",
            "clientInfo": {"name": "c", "version": "1"},
            "capabilities": {}
        }
    }))
    .await;
    let _ = peer.recv().await;

    // No notifications/initialized yet: the session is INITIALIZING, and
    // ping is still served.
    peer.send(json!({"jsonrpc": "2.0", "id": 5, "method": "ping"})).await;
    assert_eq!(
        peer.recv().await,
        json!({"jsonrpc": "2.0", "id": 5, "result": {}})
    );
}

#[tokio::test]
async fn test_parse_error_keeps_session_open() {
    let (mut peer, handle, _runner) = spawn_server(server_config(), Registries::default());
    handshake(&mut peer, &handle).await;

    peer.send_raw(br#"{"jsonrpc":"2.0","id":6,"method":"#.to_vec())
        .await;
    assert_eq!(
        peer.recv().await,
        json!({
            "jsonrpc": "2.0", "id": null,
            "error": {"code": -32700, "message": "parse error"}
        })
    );

    // The session is still serving.
    peer.send(json!({"jsonrpc": "2.0", "id": 7, "method": "ping"})).await;
    assert_eq!(
        peer.recv().await,
        json!({"jsonrpc": "2.0", "id": 7, "result": {}})
    );
}

// ─────────────────────────────────────────────────────────────────────────────
// Phase Gating & Envelope Boundaries
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_request_before_initialize_rejected() {
    let (mut peer, _handle, _runner) = spawn_server(server_config(), Registries::default());

    peer.send(json!({"jsonrpc": "2.0", "id": 1, "method": "tools/list"}))
        .await;
    let reply = peer.recv().await;
    assert_eq!(reply["id"], 1);
    assert_eq!(reply["error"]["code"], -32600);
    assert_eq!(reply["error"]["message"], "invalid request");
}

#[tokio::test]
async fn test_ping_rejected_while_uninitialized() {
    let (mut peer, _handle, _runner) = spawn_server(server_config(), Registries::default());

    peer.send(json!({"jsonrpc": "2.0", "id": 1, "method": "ping"})).await;
    assert_eq!(peer.recv().await["error"]["code"], -32600);
}

#[tokio::test]
async fn test_non_ping_rejected_while_initializing() {
    let (mut peer, _handle, _runner) = spawn_server(server_config(), Registries::default());

    peer.send(json!({
        "jsonrpc": "2.0", "id": 1, "method": "initialize",
        "params": {
            "protocolVersion": "2025-06-18",
            "clientInfo": {"name": "c", "version": "1"},
            "capabilities": {}
        }
    }))
    .await;
    let _ = peer.recv().await;

    peer.send(json!({"jsonrpc": "2.0", "id": 2, "method": "tools/list"}))
        .await;
    assert_eq!(peer.recv().await["error"]["code"], -32600);
}

#[tokio::test]
async fn test_version_mismatch_lists_supported_versions() {
    let (mut peer, handle, _runner) = spawn_server(server_config(), Registries::default());

    peer.send(json!({
        "jsonrpc": "2.0", "id": 1, "method": "initialize",
        "params": {
            "protocolVersion": "1999-01-01",
            "clientInfo": {"name": "c", "version": "1"},
            "capabilities": {}
        }
    }))
    .await;
    let reply = peer.recv().await;
    assert_eq!(reply["error"]["code"], -32602);
    assert_eq!(reply["error"]["data"]["requested"], "1999-01-01");
    assert!(reply["error"]["data"]["supportedVersions"]
        .as_array()
        .is_some_and(|v| !v.is_empty()));
    assert_eq!(handle.phase(), SessionPhase::Uninitialized);
}

#[tokio::test]
async fn test_duplicate_inflight_id_rejected() {
    let tools = InMemoryTools::new();
    tools.register(tool_named("slow"), slow_tool());
    let (mut peer, handle, _runner) = spawn_server(server_config(), registries_with(tools));
    handshake(&mut peer, &handle).await;

    peer.send(json!({
        "jsonrpc": "2.0", "id": 7, "method": "tools/call",
        "params": {"name": "slow"}
    }))
    .await;
    peer.send(json!({
        "jsonrpc": "2.0", "id": 7, "method": "tools/call",
        "params": {"name": "slow"}
    }))
    .await;

    // The duplicate is rejected while the first is still running.
    let reply = peer.recv().await;
    assert_eq!(reply["id"], 7);
    assert_eq!(reply["error"]["code"], -32600);

    // Cancel the first; it settles with the cancelled code.
    peer.send(json!({
        "jsonrpc": "2.0", "method": "notifications/cancelled",
        "params": {"requestId": 7}
    }))
    .await;
    let reply = peer.recv().await;
    assert_eq!(reply["id"], 7);
    assert_eq!(reply["error"]["code"], -32800);
}

#[tokio::test]
async fn test_unmatched_response_produces_no_frame() {
    let (mut peer, handle, _runner) = spawn_server(server_config(), Registries::default());
    handshake(&mut peer, &handle).await;

    peer.send(json!({"jsonrpc": "2.0", "id": 424242, "result": {}}))
        .await;

    // Nothing came back for the orphan: the next frame answers the ping.
    peer.send(json!({"jsonrpc": "2.0", "id": 8, "method": "ping"})).await;
    assert_eq!(
        peer.recv().await,
        json!({"jsonrpc": "2.0", "id": 8, "result": {}})
    );
}

#[tokio::test]
async fn test_cancelling_unknown_id_is_ignored() {
    let (mut peer, handle, _runner) = spawn_server(server_config(), Registries::default());
    handshake(&mut peer, &handle).await;

    peer.send(json!({
        "jsonrpc": "2.0", "method": "notifications/cancelled",
        "params": {"requestId": 31337}
    }))
    .await;

    peer.send(json!({"jsonrpc": "2.0", "id": 9, "method": "ping"})).await;
    assert_eq!(
        peer.recv().await,
        json!({"jsonrpc": "2.0", "id": 9, "result": {}})
    );
}

#[tokio::test]
async fn test_responses_ordered_by_completion_not_arrival() {
    let tools = InMemoryTools::new();
    let sleepy: ToolHandler = Arc::new(|_arguments, _ctx| {
        Box::pin(async move {
            tokio::time::sleep(Duration::from_millis(200)).await;
            Ok(CallToolResult::text("sleepy"))
        })
    });
    let quick: ToolHandler =
        Arc::new(|_arguments, _ctx| Box::pin(async move { Ok(CallToolResult::text("quick")) }));
    tools.register(tool_named("sleepy"), sleepy);
    tools.register(tool_named("quick"), quick);

    let (mut peer, handle, _runner) = spawn_server(server_config(), registries_with(tools));
    handshake(&mut peer, &handle).await;

    peer.send(json!({
        "jsonrpc": "2.0", "id": 10, "method": "tools/call",
        "params": {"name": "sleepy"}
    }))
    .await;
    peer.send(json!({
        "jsonrpc": "2.0", "id": 11, "method": "tools/call",
        "params": {"name": "quick"}
    }))
    .await;

    let first = peer.recv().await;
    let second = peer.recv().await;
    assert_eq!(first["id"], 11, "fast task should answer first");
    assert_eq!(second["id"], 10);
}

#[tokio::test]
async fn test_invalid_params_rejected_before_execution() {
    let (mut peer, handle, _runner) = spawn_server(server_config(), Registries::default());
    handshake(&mut peer, &handle).await;

    // tools/call without its required name.
    peer.send(json!({
        "jsonrpc": "2.0", "id": 12, "method": "tools/call",
        "params": {"arguments": {}}
    }))
    .await;
    let reply = peer.recv().await;
    assert_eq!(reply["id"], 12);
    assert_eq!(reply["error"]["code"], -32602);
    assert_eq!(reply["error"]["message"], "invalid params");
}

#[tokio::test]
async fn test_tool_level_failure_is_a_successful_envelope() {
    let tools = InMemoryTools::new();
    let failing: ToolHandler = Arc::new(|_arguments, _ctx| {
        Box::pin(async move { Ok(CallToolResult::error_text("disk on fire")) })
    });
    tools.register(tool_named("fragile"), failing);
    let (mut peer, handle, _runner) = spawn_server(server_config(), registries_with(tools));
    handshake(&mut peer, &handle).await;

    peer.send(json!({
        "jsonrpc": "2.0", "id": 13, "method": "tools/call",
        "params": {"name": "fragile"}
    }))
    .await;
    let reply = peer.recv().await;
    assert!(reply.get("error").is_none(), "tool failure must not be a JSON-RPC error");
    assert_eq!(reply["result"]["isError"], true);
    assert_eq!(reply["result"]["content"][0]["text"], "disk on fire");
}

#[tokio::test]
async fn test_list_pagination_cursor_walk() {
    let tools = InMemoryTools::new();
    for name in ["a", "b", "c"] {
        let handler: ToolHandler =
            Arc::new(|_arguments, _ctx| Box::pin(async move { Ok(CallToolResult::text("ok")) }));
        tools.register(tool_named(name), handler);
    }
    let config = server_config().with_page_size(2);
    let (mut peer, handle, _runner) = spawn_server(config, registries_with(tools));
    handshake(&mut peer, &handle).await;

    peer.send(json!({"jsonrpc": "2.0", "id": 14, "method": "tools/list"}))
        .await;
    let first = peer.recv().await;
    assert_eq!(first["result"]["tools"].as_array().unwrap().len(), 2);
    let cursor = first["result"]["nextCursor"]
        .as_str()
        .expect("expected a next cursor")
        .to_owned();

    peer.send(json!({
        "jsonrpc": "2.0", "id": 15, "method": "tools/list",
        "params": {"cursor": cursor}
    }))
    .await;
    let second = peer.recv().await;
    assert_eq!(second["result"]["tools"].as_array().unwrap().len(), 1);
    assert!(second["result"].get("nextCursor").is_none());

    // A cursor this server never minted is invalid params.
    peer.send(json!({
        "jsonrpc": "2.0", "id": 16, "method": "tools/list",
        "params": {"cursor": "???"}
    }))
    .await;
    assert_eq!(peer.recv().await["error"]["code"], -32602);
}

#[tokio::test]
async fn test_close_fails_pending_and_empties_maps() {
    let (mut peer, handle, runner) = spawn_server(server_config(), Registries::default());
    handshake(&mut peer, &handle).await;

    // An outbound server→client request the peer never answers.
    let pending = handle.request("ping", None).await.expect("request queued");
    let _ = peer.recv().await; // the ping frame itself
    assert_eq!(handle.pending_len(), 1);

    peer.close().await;
    let reason = timeout(WAIT, runner).await.expect("run never returned").unwrap();
    assert_eq!(reason, CloseReason::Eof);

    assert_eq!(handle.phase(), SessionPhase::Closed);
    assert_eq!(handle.pending_len(), 0, "pending map must be empty at CLOSED");

    let ResponseOutcome::Error(error) = pending.wait().await else {
        panic!("expected transport-closed error");
    };
    assert_eq!(error.code, -32003);
    assert_eq!(error.message, "transport closed");
}

// ─────────────────────────────────────────────────────────────────────────────
// Client ↔ Server
// ─────────────────────────────────────────────────────────────────────────────

fn echo_registries() -> Registries {
    let tools = InMemoryTools::new();
    let echo: ToolHandler = Arc::new(|arguments, ctx| {
        Box::pin(async move {
            ctx.report_progress(1.0, Some(1.0));
            let text = arguments
                .and_then(|a| a.get("text").and_then(|t| t.as_str()).map(String::from))
                .unwrap_or_default();
            Ok(CallToolResult::text(text))
        })
    });
    tools.register(tool_named("echo"), echo);
    registries_with(tools)
}

async fn client_server_pair(
    server_config: SessionConfig,
    client_config: SessionConfig,
    registries: Registries,
) -> ClientSession {
    let (server_side, client_side) = memory::pair();
    let (session, _handle) = Session::new(server_side, server_config, registries);
    tokio::spawn(session.run());

    ClientSession::establish(
        client_side,
        client_config,
        ClientInfo {
            name: "test-client".into(),
            version: "1".into(),
        },
    )
    .await
    .expect("handshake failed")
}

#[tokio::test]
async fn test_client_handshake_and_tool_call() {
    let client = client_server_pair(
        server_config(),
        SessionConfig::default().with_request_timeout(None),
        echo_registries(),
    )
    .await;

    assert_eq!(client.server_handshake().server_info.name, "s");
    assert_eq!(client.handle().phase(), SessionPhase::Ready);
    let negotiated = client.handle().negotiated().expect("negotiated state");
    assert_eq!(negotiated.protocol_version, "2025-06-18");
    assert_eq!(negotiated.peer_name, "s");

    client.ping().await.expect("ping failed");

    let listing = client.list_tools(None).await.expect("list failed");
    assert_eq!(listing.tools.len(), 1);
    assert_eq!(listing.tools[0].name, "echo");

    let result = client
        .call_tool("echo", Some(json!({"text": "round trip"})))
        .await
        .expect("call failed");
    assert!(!result.is_error);
    assert_eq!(
        serde_json::to_value(&result.content[0]).unwrap()["text"],
        "round trip"
    );
}

#[tokio::test]
async fn test_client_receives_progress_for_its_token() {
    let client = client_server_pair(
        server_config(),
        SessionConfig::default().with_request_timeout(None),
        echo_registries(),
    )
    .await;

    let (tx, mut rx) = mpsc::unbounded_channel();
    let result = client
        .call_tool_with_progress("echo", Some(json!({"text": "x"})), tx)
        .await
        .expect("call failed");
    assert!(!result.is_error);

    let progress = timeout(WAIT, rx.recv())
        .await
        .expect("no progress before timeout")
        .expect("progress channel closed");
    assert!((progress.progress - 1.0).abs() < f64::EPSILON);
    assert_eq!(progress.total, Some(1.0));
}

#[tokio::test]
async fn test_client_request_timeout_resolves_cancelled() {
    let tools = InMemoryTools::new();
    let stuck: ToolHandler = Arc::new(|_arguments, ctx| {
        Box::pin(async move {
            // Ignores cancellation long enough to outlive the client
            // timeout, then acknowledges.
            ctx.cancelled().await;
            ctx.checkpoint()?;
            Ok(CallToolResult::text("late"))
        })
    });
    tools.register(tool_named("stuck"), stuck);

    let client = client_server_pair(
        server_config(),
        SessionConfig::default().with_request_timeout(Some(Duration::from_millis(100))),
        registries_with(tools),
    )
    .await;

    let err = client
        .call_tool("stuck", None)
        .await
        .expect_err("expected timeout");
    assert!(matches!(err, ClientError::Cancelled));
}

#[tokio::test]
async fn test_client_surfaces_peer_error_envelope() {
    let client = client_server_pair(
        server_config(),
        SessionConfig::default().with_request_timeout(None),
        Registries::default(),
    )
    .await;

    let err = client
        .call_tool("missing", None)
        .await
        .expect_err("expected rpc error");
    let ClientError::Rpc(error) = err else {
        panic!("expected rpc error, got {err:?}");
    };
    assert_eq!(error.code, -32602);
}

#[tokio::test]
async fn test_client_shutdown_settles_session() {
    let client = client_server_pair(
        server_config(),
        SessionConfig::default().with_request_timeout(None),
        Registries::default(),
    )
    .await;

    let reason = timeout(WAIT, client.shutdown())
        .await
        .expect("shutdown hung");
    assert_eq!(reason, CloseReason::LocalClose);
}

// ─────────────────────────────────────────────────────────────────────────────
// HTTP + SSE
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_http_sse_end_to_end() {
    use crosstalk::transport::http::HttpServerTransport;
    use crosstalk::transport::sse::HttpSseClient;
    use crosstalk::transport::Transport;

    let mut server_transport =
        HttpServerTransport::new("127.0.0.1:0").with_bearer_token("hunter2");
    let server_connection = server_transport.connect().await.expect("bind failed");
    let addr = server_transport.local_addr().expect("bound address");

    let (session, _handle) = Session::new(server_connection, server_config(), echo_registries());
    tokio::spawn(session.run());

    let client = ClientSession::connect(
        HttpSseClient::new(format!("http://{addr}/mcp")).with_bearer_token("hunter2"),
        SessionConfig::default().with_request_timeout(Some(Duration::from_secs(5))),
        ClientInfo {
            name: "http-client".into(),
            version: "1".into(),
        },
    )
    .await
    .expect("http handshake failed");

    client.ping().await.expect("ping over http failed");
    let result = client
        .call_tool("echo", Some(json!({"text": "over sse"})))
        .await
        .expect("call over http failed");
    assert_eq!(
        serde_json::to_value(&result.content[0]).unwrap()["text"],
        "over sse"
    );
}

#[tokio::test]
async fn test_http_rejects_missing_bearer_token() {
    use crosstalk::transport::http::HttpServerTransport;
    use crosstalk::transport::Transport;

    let mut server_transport =
        HttpServerTransport::new("127.0.0.1:0").with_bearer_token("hunter2");
    let server_connection = server_transport.connect().await.expect("bind failed");
    let addr = server_transport.local_addr().expect("bound address");
    let (session, _handle) =
        Session::new(server_connection, server_config(), Registries::default());
    tokio::spawn(session.run());

    let response = reqwest::Client::new()
        .post(format!("http://{addr}/mcp"))
        .header("content-type", "application/json")
        .body("{}")
        .send()
        .await
        .expect("request failed");
    assert_eq!(response.status(), reqwest::StatusCode::UNAUTHORIZED);
}

// ─────────────────────────────────────────────────────────────────────────────
// List-Changed Notifications
// ─────────────────────────────────────────────────────────────────────────────

fn noop_tool_handler() -> ToolHandler {
    Arc::new(|_arguments, _ctx| Box::pin(async move { Ok(CallToolResult::text("ok")) }))
}

async fn handshake_with_caps(peer: &mut Peer, handle: &SessionHandle, capabilities: Value) {
    peer.send(json!({
        "jsonrpc": "2.0", "id": 1, "method": "initialize",
        "params": {
            "protocolVersion": "2025-06-18",
            "clientInfo": {"name": "c", "version": "1"},
            "capabilities": capabilities
        }
    }))
    .await;
    let reply = peer.recv().await;
    assert!(reply.get("result").is_some(), "handshake failed: {reply}");

    peer.send(json!({"jsonrpc": "2.0", "method": "notifications/initialized"}))
        .await;
    timeout(WAIT, handle.wait_for_phase(SessionPhase::Ready))
        .await
        .expect("session never became ready");
}

#[tokio::test]
async fn test_registry_mutation_emits_list_changed_after_handshake() {
    let tools = Arc::new(InMemoryTools::new());
    let registries = Registries {
        tools: tools.clone(),
        ..Registries::default()
    };
    let config = SessionConfig::default()
        .with_server_info("s", "1")
        .with_capabilities(json!({"tools": {"listChanged": true}}))
        .with_request_timeout(None);
    let (mut peer, handle, _runner) = spawn_server(config, registries);

    handshake_with_caps(&mut peer, &handle, json!({"tools": {"listChanged": true}})).await;

    // Both sides advertised listChanged, so mutating the registry after
    // the handshake announces the change.
    tools.register(tool_named("fresh"), noop_tool_handler());
    assert_eq!(
        peer.recv().await,
        json!({"jsonrpc": "2.0", "method": "notifications/tools/list_changed"})
    );
}

#[tokio::test]
async fn test_no_list_changed_without_peer_flag() {
    let tools = Arc::new(InMemoryTools::new());
    let registries = Registries {
        tools: tools.clone(),
        ..Registries::default()
    };
    let config = SessionConfig::default()
        .with_server_info("s", "1")
        .with_capabilities(json!({"tools": {"listChanged": true}}))
        .with_request_timeout(None);
    let (mut peer, handle, _runner) = spawn_server(config, registries);

    // The peer does not advertise listChanged; intersection drops it.
    handshake_with_caps(&mut peer, &handle, json!({"tools": {}})).await;

    tools.register(tool_named("quiet"), noop_tool_handler());

    // No notification was emitted: the next frame out answers the ping.
    peer.send(json!({"jsonrpc": "2.0", "id": 30, "method": "ping"})).await;
    assert_eq!(
        peer.recv().await,
        json!({"jsonrpc": "2.0", "id": 30, "result": {}})
    );
}

// ─────────────────────────────────────────────────────────────────────────────
// Progress Token Edge Cases
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_inbound_progress_for_dead_token_dropped() {
    let (mut peer, handle, _runner) = spawn_server(server_config(), Registries::default());
    handshake(&mut peer, &handle).await;

    // No live observer for this token on the server side.
    peer.send(json!({
        "jsonrpc": "2.0", "method": "notifications/progress",
        "params": {"progressToken": "ghost", "progress": 0.9}
    }))
    .await;

    peer.send(json!({"jsonrpc": "2.0", "id": 17, "method": "ping"})).await;
    assert_eq!(
        peer.recv().await,
        json!({"jsonrpc": "2.0", "id": 17, "result": {}})
    );
}

#[tokio::test]
async fn test_no_progress_without_token() {
    let tools = InMemoryTools::new();
    let chatty: ToolHandler = Arc::new(|_arguments, ctx| {
        Box::pin(async move {
            ctx.report_progress(0.5, None);
            Ok(CallToolResult::text("done"))
        })
    });
    tools.register(tool_named("chatty"), chatty);
    let (mut peer, handle, _runner) = spawn_server(server_config(), registries_with(tools));
    handshake(&mut peer, &handle).await;

    // No _meta.progressToken: the report is a no-op and the only frame is
    // the response.
    peer.send(json!({
        "jsonrpc": "2.0", "id": 18, "method": "tools/call",
        "params": {"name": "chatty"}
    }))
    .await;
    let reply = peer.recv().await;
    assert_eq!(reply["id"], 18);
    assert_eq!(reply["result"]["content"][0]["text"], "done");
}

#[tokio::test]
async fn test_completion_beats_late_cancellation() {
    let tools = InMemoryTools::new();
    let quick: ToolHandler =
        Arc::new(|_arguments, _ctx| Box::pin(async move { Ok(CallToolResult::text("done")) }));
    tools.register(tool_named("quick"), quick);
    let (mut peer, handle, _runner) = spawn_server(server_config(), registries_with(tools));
    handshake(&mut peer, &handle).await;

    peer.send(json!({
        "jsonrpc": "2.0", "id": 19, "method": "tools/call",
        "params": {"name": "quick"}
    }))
    .await;
    let reply = peer.recv().await;
    assert_eq!(reply["id"], 19);
    assert!(reply.get("result").is_some());

    // Cancellation for the already-completed request is silently ignored;
    // exactly one response ever exists for id 19.
    peer.send(json!({
        "jsonrpc": "2.0", "method": "notifications/cancelled",
        "params": {"requestId": 19}
    }))
    .await;
    peer.send(json!({"jsonrpc": "2.0", "id": 20, "method": "ping"})).await;
    assert_eq!(
        peer.recv().await,
        json!({"jsonrpc": "2.0", "id": 20, "result": {}})
    );
}

// ─────────────────────────────────────────────────────────────────────────────
// Codec Invariant (unused-method guard)
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_unknown_notification_is_ignored() {
    let (mut peer, handle, _runner) = spawn_server(server_config(), Registries::default());
    handshake(&mut peer, &handle).await;

    peer.send(json!({"jsonrpc": "2.0", "method": "notifications/unknown/thing"}))
        .await;
    peer.send(json!({"jsonrpc": "2.0", "id": 21, "method": "ping"})).await;
    assert_eq!(
        peer.recv().await,
        json!({"jsonrpc": "2.0", "id": 21, "result": {}})
    );
}

#[tokio::test]
async fn test_protocol_error_is_send_sync() {
    fn assert_send_sync<T: Send + Sync>() {}
    assert_send_sync::<ProtocolError>();
}
