//! Built-in request handlers, dispatched by method tag.
//!
//! Each handler validates its params by deserializing into the typed
//! structure; a mismatch settles the task with invalid-params before any
//! registry work happens. Handshake methods (`initialize`, `ping`) never
//! reach this table; the ingest loop serves them inline because they touch
//! session phase.

use serde_json::{json, Value};

use crosstalk_core::error::ProtocolError;
use crosstalk_core::protocol::methods::ServerMethod;
use crosstalk_core::protocol::params::{
    CallToolParams, GetPromptParams, ListPromptsParams, ListPromptsResult, ListResourcesParams,
    ListResourcesResult, ListToolsParams, ListToolsResult, ReadResourceParams,
};

use crate::context::TaskContext;
use crate::registry::Registries;

fn parse_params<T: serde::de::DeserializeOwned + Default>(
    params: Option<Value>,
) -> Result<T, ProtocolError> {
    match params {
        None => Ok(T::default()),
        Some(value) => serde_json::from_value(value).map_err(|e| ProtocolError::InvalidParams {
            details: e.to_string(),
        }),
    }
}

fn parse_required_params<T: serde::de::DeserializeOwned>(
    params: Option<Value>,
) -> Result<T, ProtocolError> {
    let value = params.ok_or_else(|| ProtocolError::InvalidParams {
        details: "missing params".to_owned(),
    })?;
    serde_json::from_value(value).map_err(|e| ProtocolError::InvalidParams {
        details: e.to_string(),
    })
}

fn to_result<T: serde::Serialize>(result: &T) -> Result<Value, ProtocolError> {
    serde_json::to_value(result).map_err(|e| ProtocolError::Internal {
        details: e.to_string(),
    })
}

/// Execute one non-handshake request against the registries.
///
/// # Errors
///
/// Propagates param validation and registry failures; the task engine turns
/// them into error envelopes.
pub(crate) async fn dispatch(
    method: ServerMethod,
    params: Option<Value>,
    ctx: TaskContext,
    registries: &Registries,
    page_size: usize,
) -> Result<Value, ProtocolError> {
    match method {
        ServerMethod::Initialize => Err(ProtocolError::InvalidRequest {
            details: "initialize is served during the handshake".to_owned(),
        }),
        ServerMethod::Ping => Ok(json!({})),

        ServerMethod::ToolsList => {
            let params: ListToolsParams = parse_params(params)?;
            let page = registries
                .tools
                .list(params.cursor.as_deref(), page_size)
                .await?;
            to_result(&ListToolsResult {
                tools: page.items,
                next_cursor: page.next_cursor,
            })
        }
        ServerMethod::ToolsCall => {
            let params: CallToolParams = parse_required_params(params)?;
            let result = registries
                .tools
                .call(&params.name, params.arguments, ctx)
                .await?;
            to_result(&result)
        }

        ServerMethod::ResourcesList => {
            let params: ListResourcesParams = parse_params(params)?;
            let page = registries
                .resources
                .list(params.cursor.as_deref(), page_size)
                .await?;
            to_result(&ListResourcesResult {
                resources: page.items,
                next_cursor: page.next_cursor,
            })
        }
        ServerMethod::ResourcesRead => {
            let params: ReadResourceParams = parse_required_params(params)?;
            let result = registries.resources.read(&params.uri, ctx).await?;
            to_result(&result)
        }

        ServerMethod::PromptsList => {
            let params: ListPromptsParams = parse_params(params)?;
            let page = registries
                .prompts
                .list(params.cursor.as_deref(), page_size)
                .await?;
            to_result(&ListPromptsResult {
                prompts: page.items,
                next_cursor: page.next_cursor,
            })
        }
        ServerMethod::PromptsGet => {
            let params: GetPromptParams = parse_required_params(params)?;
            let result = registries
                .prompts
                .get(&params.name, params.arguments, ctx)
                .await?;
            to_result(&result)
        }
    }
}
