//! Client-side session facade.
//!
//! Drives the `initialize` handshake and wraps the raw request API in typed
//! method calls. The underlying [`Session`] is fully bidirectional: a
//! client with registered registries also serves inbound requests from the
//! server, and `ping` both ways.

use serde_json::Value;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crosstalk_core::config::SessionConfig;
use crosstalk_core::error::{ErrorObject, ProtocolError};
use crosstalk_core::protocol::capability::{intersect_capabilities, negotiate_version};
use crosstalk_core::protocol::methods::{
    self, NOTIF_INITIALIZED, PROMPTS_GET, RESOURCES_READ, TOOLS_CALL, TOOLS_LIST,
};
use crosstalk_core::protocol::params::{
    CallToolResult, GetPromptResult, InitializeParams, InitializeResult, ListPromptsResult,
    ListResourcesResult, ListToolsResult, ProgressParams, ProgressToken, ReadResourceResult,
};
use crosstalk_core::protocol::types::ClientInfo;

use crate::registry::Registries;
use crate::session::pending::ResponseOutcome;
use crate::session::phase::SessionPhase;
use crate::session::{Negotiated, Session, SessionHandle};
use crate::transport::{CloseReason, Connection, Transport};

/// Failures surfaced by client calls.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    /// The peer answered with a JSON-RPC error envelope.
    #[error("peer error: {0}")]
    Rpc(ErrorObject),
    /// The request was cancelled locally (explicit cancel or timeout).
    #[error("request cancelled")]
    Cancelled,
    /// A local protocol failure (transport closed, codec, handshake).
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
}

/// A connected, initialized client session.
pub struct ClientSession {
    handle: SessionHandle,
    init: InitializeResult,
    runner: JoinHandle<CloseReason>,
}

impl ClientSession {
    /// Connect a transport, run the session, and complete the handshake:
    /// `initialize` → result → `notifications/initialized` → ready.
    ///
    /// # Errors
    ///
    /// Connection failures, a peer version this side does not speak, or a
    /// handshake rejected by the server.
    pub async fn connect(
        mut transport: impl Transport,
        config: SessionConfig,
        client_info: ClientInfo,
    ) -> Result<Self, ClientError> {
        let connection = transport.connect().await?;
        Self::establish(connection, config, client_info).await
    }

    /// Complete the handshake over an already-established connection.
    ///
    /// # Errors
    ///
    /// Same as [`ClientSession::connect`], minus connection failures.
    pub async fn establish(
        connection: Connection,
        config: SessionConfig,
        client_info: ClientInfo,
    ) -> Result<Self, ClientError> {
        let our_capabilities = config.capabilities.clone();
        let (session, handle) = Session::new(connection, config, Registries::default());
        let runner = tokio::spawn(session.run());

        // The handshake handler is the one place outside the ingest loop
        // that moves phase.
        handle.set_phase(SessionPhase::Initializing);

        let params = InitializeParams {
            protocol_version: crosstalk_core::protocol::LATEST_PROTOCOL_VERSION.to_owned(),
            client_info,
            capabilities: our_capabilities.clone(),
        };
        let request = handle
            .request(
                methods::INITIALIZE,
                Some(serde_json::to_value(&params).map_err(|e| ProtocolError::Internal {
                    details: e.to_string(),
                })?),
            )
            .await?;

        let init: InitializeResult = match request.wait().await {
            ResponseOutcome::Result(value) => {
                serde_json::from_value(value).map_err(|e| ProtocolError::InvalidParams {
                    details: format!("malformed initialize result: {e}"),
                })?
            }
            ResponseOutcome::Error(error) => return Err(ClientError::Rpc(error)),
            ResponseOutcome::Cancelled => return Err(ClientError::Cancelled),
        };

        // The server must pick a version we speak.
        negotiate_version(&init.protocol_version).map_err(ClientError::Protocol)?;

        handle.set_negotiated(Negotiated {
            protocol_version: init.protocol_version.clone(),
            capabilities: intersect_capabilities(&our_capabilities, &init.capabilities),
            peer_name: init.server_info.name.clone(),
            peer_version: init.server_info.version.clone(),
        });

        handle.notify(NOTIF_INITIALIZED, None).await?;
        handle.set_phase(SessionPhase::Ready);
        tracing::info!(
            session = %handle.session_id(),
            server = %init.server_info.name,
            version = %init.protocol_version,
            "client session ready"
        );

        Ok(Self {
            handle,
            init,
            runner,
        })
    }

    /// The `initialize` result the server returned.
    #[must_use]
    pub fn server_handshake(&self) -> &InitializeResult {
        &self.init
    }

    /// The raw session handle, for request patterns the typed wrappers do
    /// not cover.
    #[must_use]
    pub fn handle(&self) -> &SessionHandle {
        &self.handle
    }

    async fn call<T: serde::de::DeserializeOwned>(
        &self,
        method: &str,
        params: Option<Value>,
    ) -> Result<T, ClientError> {
        let request = self.handle.request(method, params).await?;
        match request.wait().await {
            ResponseOutcome::Result(value) => {
                serde_json::from_value(value).map_err(|e| {
                    ClientError::Protocol(ProtocolError::InvalidParams {
                        details: format!("malformed result: {e}"),
                    })
                })
            }
            ResponseOutcome::Error(error) => Err(ClientError::Rpc(error)),
            ResponseOutcome::Cancelled => Err(ClientError::Cancelled),
        }
    }

    /// `ping`: resolves when the server answers.
    ///
    /// # Errors
    ///
    /// [`ClientError`] on transport loss or cancellation.
    pub async fn ping(&self) -> Result<(), ClientError> {
        let _: Value = self.call(methods::PING, None).await?;
        Ok(())
    }

    /// `tools/list`: one page.
    ///
    /// # Errors
    ///
    /// [`ClientError`] on peer errors or transport loss.
    pub async fn list_tools(&self, cursor: Option<String>) -> Result<ListToolsResult, ClientError> {
        let params = cursor.map(|cursor| serde_json::json!({ "cursor": cursor }));
        self.call(TOOLS_LIST, params).await
    }

    /// `resources/list`: one page.
    ///
    /// # Errors
    ///
    /// [`ClientError`] on peer errors or transport loss.
    pub async fn list_resources(
        &self,
        cursor: Option<String>,
    ) -> Result<ListResourcesResult, ClientError> {
        let params = cursor.map(|cursor| serde_json::json!({ "cursor": cursor }));
        self.call(methods::RESOURCES_LIST, params).await
    }

    /// `prompts/list`: one page.
    ///
    /// # Errors
    ///
    /// [`ClientError`] on peer errors or transport loss.
    pub async fn list_prompts(
        &self,
        cursor: Option<String>,
    ) -> Result<ListPromptsResult, ClientError> {
        let params = cursor.map(|cursor| serde_json::json!({ "cursor": cursor }));
        self.call(methods::PROMPTS_LIST, params).await
    }

    /// `tools/call` without progress reporting.
    ///
    /// # Errors
    ///
    /// [`ClientError`] on peer errors or transport loss; tool-level
    /// failures come back as `Ok` with `is_error` set.
    pub async fn call_tool(
        &self,
        name: &str,
        arguments: Option<Value>,
    ) -> Result<CallToolResult, ClientError> {
        let mut params = serde_json::json!({ "name": name });
        if let Some(arguments) = arguments {
            params["arguments"] = arguments;
        }
        self.call(TOOLS_CALL, Some(params)).await
    }

    /// `tools/call` with a progress observer. A unique progress token is
    /// attached to the request and inbound `notifications/progress` frames
    /// carrying it are forwarded to `progress` until the call settles.
    ///
    /// # Errors
    ///
    /// Same as [`ClientSession::call_tool`].
    pub async fn call_tool_with_progress(
        &self,
        name: &str,
        arguments: Option<Value>,
        progress: mpsc::UnboundedSender<ProgressParams>,
    ) -> Result<CallToolResult, ClientError> {
        let token = ProgressToken::String(format!("ct-{}", uuid::Uuid::new_v4()));
        self.handle.observe_progress(token.clone(), progress);

        let mut params = serde_json::json!({
            "name": name,
            "_meta": { "progressToken": token }
        });
        if let Some(arguments) = arguments {
            params["arguments"] = arguments;
        }

        let result = self.call(TOOLS_CALL, Some(params)).await;
        self.handle.release_progress(&token);
        result
    }

    /// `resources/read`.
    ///
    /// # Errors
    ///
    /// [`ClientError`] on peer errors or transport loss.
    pub async fn read_resource(&self, uri: &str) -> Result<ReadResourceResult, ClientError> {
        self.call(RESOURCES_READ, Some(serde_json::json!({ "uri": uri })))
            .await
    }

    /// `prompts/get`.
    ///
    /// # Errors
    ///
    /// [`ClientError`] on peer errors or transport loss.
    pub async fn get_prompt(
        &self,
        name: &str,
        arguments: Option<std::collections::HashMap<String, String>>,
    ) -> Result<GetPromptResult, ClientError> {
        let mut params = serde_json::json!({ "name": name });
        if let Some(arguments) = arguments {
            params["arguments"] = serde_json::to_value(arguments)
                .map_err(|e| ProtocolError::Internal {
                    details: e.to_string(),
                })?;
        }
        self.call(PROMPTS_GET, Some(params)).await
    }

    /// Close the session and wait for the ingest loop to settle.
    pub async fn shutdown(self) -> CloseReason {
        self.handle.close();
        match self.runner.await {
            Ok(reason) => reason,
            Err(_) => CloseReason::LocalClose,
        }
    }
}
