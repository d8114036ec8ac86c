//! MCP method names, payload types, and handshake negotiation.

pub mod capability;
pub mod methods;
pub mod params;
pub mod types;

pub use capability::{
    has_flag, intersect_capabilities, negotiate_version, LATEST_PROTOCOL_VERSION,
    SUPPORTED_PROTOCOL_VERSIONS,
};
pub use methods::ServerMethod;
pub use params::{
    progress_token_of, CallToolParams, CallToolResult, CancelledParams, GetPromptParams,
    GetPromptResult, InitializeParams, InitializeResult, ListPromptsParams, ListPromptsResult,
    ListResourcesParams, ListResourcesResult, ListToolsParams, ListToolsResult, ProgressParams,
    ProgressToken, ReadResourceParams, ReadResourceResult, RequestMeta,
};
pub use types::{
    ClientInfo, Content, Prompt, PromptArgument, PromptMessage, Resource, ResourceContents, Role,
    ServerInfo, Tool,
};
