//! Tool, resource, and prompt registries.
//!
//! Registries are collaborators of the engine: the dispatcher resolves
//! list/call/read/get operations against these traits and never assumes an
//! implementation. In-memory implementations are provided for servers that
//! register handlers at startup.
//!
//! List operations paginate with opaque cursors: URL-safe base64 of the
//! start offset. Clients must treat cursors as opaque; decode failures
//! surface as invalid params.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError, RwLock};

use async_trait::async_trait;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use futures_util::future::BoxFuture;
use serde_json::Value;

use crosstalk_core::error::ProtocolError;
use crosstalk_core::jsonrpc::{Envelope, Notification};
use crosstalk_core::protocol::params::{CallToolResult, GetPromptResult, ReadResourceResult};
use crosstalk_core::protocol::types::{Prompt, Resource, Tool};

use crate::context::TaskContext;
use crate::pump::Pump;

// ─────────────────────────────────────────────────────────────────────────────
// Pagination
// ─────────────────────────────────────────────────────────────────────────────

/// One page of a listing.
#[derive(Debug, Clone)]
pub struct Page<T> {
    /// Items on this page.
    pub items: Vec<T>,
    /// Cursor for the next page; `None` on the last page.
    pub next_cursor: Option<String>,
}

fn encode_cursor(offset: usize) -> String {
    URL_SAFE_NO_PAD.encode(offset.to_string())
}

fn decode_cursor(cursor: &str) -> Result<usize, ProtocolError> {
    let invalid = || ProtocolError::InvalidParams {
        details: "invalid cursor".to_owned(),
    };
    let bytes = URL_SAFE_NO_PAD.decode(cursor).map_err(|_| invalid())?;
    let text = std::str::from_utf8(&bytes).map_err(|_| invalid())?;
    text.parse().map_err(|_| invalid())
}

/// Slice one page out of a full listing.
///
/// # Errors
///
/// [`ProtocolError::InvalidParams`] for cursors this side did not mint.
pub fn paginate<T: Clone>(
    items: &[T],
    cursor: Option<&str>,
    page_size: usize,
) -> Result<Page<T>, ProtocolError> {
    let offset = match cursor {
        Some(c) => decode_cursor(c)?,
        None => 0,
    };
    if offset >= items.len() {
        return Ok(Page {
            items: Vec::new(),
            next_cursor: None,
        });
    }
    let end = offset.saturating_add(page_size).min(items.len());
    Ok(Page {
        items: items[offset..end].to_vec(),
        next_cursor: (end < items.len()).then(|| encode_cursor(end)),
    })
}

// ─────────────────────────────────────────────────────────────────────────────
// Registry Traits
// ─────────────────────────────────────────────────────────────────────────────

/// Tool lookup and invocation.
#[async_trait]
pub trait ToolRegistry: Send + Sync {
    /// List one page of tools.
    async fn list(
        &self,
        cursor: Option<&str>,
        page_size: usize,
    ) -> Result<Page<Tool>, ProtocolError>;

    /// Invoke a tool by name.
    ///
    /// # Errors
    ///
    /// [`ProtocolError::InvalidParams`] for unknown tools or argument
    /// violations; tool-level failures travel inside a successful
    /// [`CallToolResult`] with `is_error` set.
    async fn call(
        &self,
        name: &str,
        arguments: Option<Value>,
        ctx: TaskContext,
    ) -> Result<CallToolResult, ProtocolError>;

    /// The registry's change notifier, for sessions that negotiate the
    /// `listChanged` capability. `None` means mutations go unannounced.
    fn change_notifier(&self) -> Option<&ChangeNotifier> {
        None
    }
}

/// Resource lookup and reads.
#[async_trait]
pub trait ResourceRegistry: Send + Sync {
    /// List one page of resources.
    async fn list(
        &self,
        cursor: Option<&str>,
        page_size: usize,
    ) -> Result<Page<Resource>, ProtocolError>;

    /// Read a resource by URI.
    async fn read(&self, uri: &str, ctx: TaskContext)
        -> Result<ReadResourceResult, ProtocolError>;

    /// The registry's change notifier, for sessions that negotiate the
    /// `listChanged` capability. `None` means mutations go unannounced.
    fn change_notifier(&self) -> Option<&ChangeNotifier> {
        None
    }
}

/// Prompt lookup and rendering.
#[async_trait]
pub trait PromptRegistry: Send + Sync {
    /// List one page of prompts.
    async fn list(
        &self,
        cursor: Option<&str>,
        page_size: usize,
    ) -> Result<Page<Prompt>, ProtocolError>;

    /// Render a prompt by name.
    async fn get(
        &self,
        name: &str,
        arguments: Option<HashMap<String, String>>,
        ctx: TaskContext,
    ) -> Result<GetPromptResult, ProtocolError>;

    /// The registry's change notifier, for sessions that negotiate the
    /// `listChanged` capability. `None` means mutations go unannounced.
    fn change_notifier(&self) -> Option<&ChangeNotifier> {
        None
    }
}

/// The registry collaborators for one session.
#[derive(Clone)]
pub struct Registries {
    /// Tool registry.
    pub tools: Arc<dyn ToolRegistry>,
    /// Resource registry.
    pub resources: Arc<dyn ResourceRegistry>,
    /// Prompt registry.
    pub prompts: Arc<dyn PromptRegistry>,
}

impl Default for Registries {
    fn default() -> Self {
        Self {
            tools: Arc::new(InMemoryTools::new()),
            resources: Arc::new(InMemoryResources::new()),
            prompts: Arc::new(InMemoryPrompts::new()),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Change Notification
// ─────────────────────────────────────────────────────────────────────────────

/// Emits `notifications/*/list_changed` when an armed registry mutates.
///
/// Registries start disarmed; the session arms them after the handshake
/// when the negotiated capabilities carry the matching `listChanged` flag.
#[derive(Default)]
pub struct ChangeNotifier {
    inner: Mutex<Option<(Pump, &'static str)>>,
}

impl ChangeNotifier {
    /// Arm with the pump and notification method to emit.
    pub fn arm(&self, pump: Pump, method: &'static str) {
        *self.inner.lock().unwrap_or_else(PoisonError::into_inner) = Some((pump, method));
    }

    /// Fire the notification if armed. Best-effort.
    pub fn notify(&self) {
        let guard = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some((pump, method)) = guard.as_ref() {
            let sent = pump.try_send(&Envelope::Notification(Notification::new(*method, None)));
            if !sent {
                tracing::debug!(method, "dropped list-changed notification");
            }
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// In-Memory Implementations
// ─────────────────────────────────────────────────────────────────────────────

/// Async tool handler: arguments + context in, call result out.
pub type ToolHandler = Arc<
    dyn Fn(Option<Value>, TaskContext) -> BoxFuture<'static, Result<CallToolResult, ProtocolError>>
        + Send
        + Sync,
>;

/// Async resource reader.
pub type ResourceReader = Arc<
    dyn Fn(TaskContext) -> BoxFuture<'static, Result<ReadResourceResult, ProtocolError>>
        + Send
        + Sync,
>;

/// Async prompt renderer.
pub type PromptRenderer = Arc<
    dyn Fn(
            Option<HashMap<String, String>>,
            TaskContext,
        ) -> BoxFuture<'static, Result<GetPromptResult, ProtocolError>>
        + Send
        + Sync,
>;

/// In-memory tool registry. Registration order is listing order.
#[derive(Default)]
pub struct InMemoryTools {
    entries: RwLock<Vec<(Tool, ToolHandler)>>,
    /// Fires `notifications/tools/list_changed` once armed.
    pub changed: ChangeNotifier,
}

impl InMemoryTools {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a tool, replacing any previous registration of the same
    /// name.
    pub fn register(&self, tool: Tool, handler: ToolHandler) {
        {
            let mut entries = self
                .entries
                .write()
                .unwrap_or_else(PoisonError::into_inner);
            if let Some(entry) = entries.iter_mut().find(|(t, _)| t.name == tool.name) {
                *entry = (tool, handler);
            } else {
                entries.push((tool, handler));
            }
        }
        self.changed.notify();
    }

    fn snapshot(&self) -> Vec<Tool> {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|(tool, _)| tool.clone())
            .collect()
    }
}

#[async_trait]
impl ToolRegistry for InMemoryTools {
    async fn list(
        &self,
        cursor: Option<&str>,
        page_size: usize,
    ) -> Result<Page<Tool>, ProtocolError> {
        paginate(&self.snapshot(), cursor, page_size)
    }

    async fn call(
        &self,
        name: &str,
        arguments: Option<Value>,
        ctx: TaskContext,
    ) -> Result<CallToolResult, ProtocolError> {
        let handler = {
            let entries = self.entries.read().unwrap_or_else(PoisonError::into_inner);
            entries
                .iter()
                .find(|(tool, _)| tool.name == name)
                .map(|(_, handler)| Arc::clone(handler))
        };
        match handler {
            Some(handler) => handler(arguments, ctx).await,
            None => Err(ProtocolError::InvalidParams {
                details: format!("unknown tool '{name}'"),
            }),
        }
    }

    fn change_notifier(&self) -> Option<&ChangeNotifier> {
        Some(&self.changed)
    }
}

/// In-memory resource registry.
#[derive(Default)]
pub struct InMemoryResources {
    entries: RwLock<Vec<(Resource, ResourceReader)>>,
    /// Fires `notifications/resources/list_changed` once armed.
    pub changed: ChangeNotifier,
}

impl InMemoryResources {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a resource, replacing any previous registration of the
    /// same URI.
    pub fn register(&self, resource: Resource, reader: ResourceReader) {
        {
            let mut entries = self
                .entries
                .write()
                .unwrap_or_else(PoisonError::into_inner);
            if let Some(entry) = entries.iter_mut().find(|(r, _)| r.uri == resource.uri) {
                *entry = (resource, reader);
            } else {
                entries.push((resource, reader));
            }
        }
        self.changed.notify();
    }
}

#[async_trait]
impl ResourceRegistry for InMemoryResources {
    async fn list(
        &self,
        cursor: Option<&str>,
        page_size: usize,
    ) -> Result<Page<Resource>, ProtocolError> {
        let resources: Vec<Resource> = self
            .entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|(resource, _)| resource.clone())
            .collect();
        paginate(&resources, cursor, page_size)
    }

    async fn read(
        &self,
        uri: &str,
        ctx: TaskContext,
    ) -> Result<ReadResourceResult, ProtocolError> {
        let reader = {
            let entries = self.entries.read().unwrap_or_else(PoisonError::into_inner);
            entries
                .iter()
                .find(|(resource, _)| resource.uri == uri)
                .map(|(_, reader)| Arc::clone(reader))
        };
        match reader {
            Some(reader) => reader(ctx).await,
            None => Err(ProtocolError::InvalidParams {
                details: format!("unknown resource '{uri}'"),
            }),
        }
    }

    fn change_notifier(&self) -> Option<&ChangeNotifier> {
        Some(&self.changed)
    }
}

/// In-memory prompt registry.
#[derive(Default)]
pub struct InMemoryPrompts {
    entries: RwLock<Vec<(Prompt, PromptRenderer)>>,
    /// Fires `notifications/prompts/list_changed` once armed.
    pub changed: ChangeNotifier,
}

impl InMemoryPrompts {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a prompt, replacing any previous registration of the same
    /// name.
    pub fn register(&self, prompt: Prompt, renderer: PromptRenderer) {
        {
            let mut entries = self
                .entries
                .write()
                .unwrap_or_else(PoisonError::into_inner);
            if let Some(entry) = entries.iter_mut().find(|(p, _)| p.name == prompt.name) {
                *entry = (prompt, renderer);
            } else {
                entries.push((prompt, renderer));
            }
        }
        self.changed.notify();
    }
}

#[async_trait]
impl PromptRegistry for InMemoryPrompts {
    async fn list(
        &self,
        cursor: Option<&str>,
        page_size: usize,
    ) -> Result<Page<Prompt>, ProtocolError> {
        let prompts: Vec<Prompt> = self
            .entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|(prompt, _)| prompt.clone())
            .collect();
        paginate(&prompts, cursor, page_size)
    }

    async fn get(
        &self,
        name: &str,
        arguments: Option<HashMap<String, String>>,
        ctx: TaskContext,
    ) -> Result<GetPromptResult, ProtocolError> {
        let renderer = {
            let entries = self.entries.read().unwrap_or_else(PoisonError::into_inner);
            entries
                .iter()
                .find(|(prompt, _)| prompt.name == name)
                .map(|(_, renderer)| Arc::clone(renderer))
        };
        match renderer {
            Some(renderer) => renderer(arguments, ctx).await,
            None => Err(ProtocolError::InvalidParams {
                details: format!("unknown prompt '{name}'"),
            }),
        }
    }

    fn change_notifier(&self) -> Option<&ChangeNotifier> {
        Some(&self.changed)
    }
}
