//! MCP method name table.

/// `initialize`: handshake request.
pub const INITIALIZE: &str = "initialize";
/// `ping`: liveness check, served from the handshake onward.
pub const PING: &str = "ping";
/// `tools/list`: paginated tool listing.
pub const TOOLS_LIST: &str = "tools/list";
/// `tools/call`: invoke a tool by name.
pub const TOOLS_CALL: &str = "tools/call";
/// `resources/list`: paginated resource listing.
pub const RESOURCES_LIST: &str = "resources/list";
/// `resources/read`: read a resource by URI.
pub const RESOURCES_READ: &str = "resources/read";
/// `prompts/list`: paginated prompt listing.
pub const PROMPTS_LIST: &str = "prompts/list";
/// `prompts/get`: render a prompt by name.
pub const PROMPTS_GET: &str = "prompts/get";

/// `notifications/initialized`: completes the handshake.
pub const NOTIF_INITIALIZED: &str = "notifications/initialized";
/// `notifications/cancelled`: requests cancellation of an in-flight request.
pub const NOTIF_CANCELLED: &str = "notifications/cancelled";
/// `notifications/progress`: progress report tied to a progress token.
pub const NOTIF_PROGRESS: &str = "notifications/progress";
/// `notifications/tools/list_changed`: the tool set changed.
pub const NOTIF_TOOLS_LIST_CHANGED: &str = "notifications/tools/list_changed";
/// `notifications/resources/list_changed`: the resource set changed.
pub const NOTIF_RESOURCES_LIST_CHANGED: &str = "notifications/resources/list_changed";
/// `notifications/prompts/list_changed`: the prompt set changed.
pub const NOTIF_PROMPTS_LIST_CHANGED: &str = "notifications/prompts/list_changed";

/// The request methods this engine serves.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerMethod {
    /// Handshake.
    Initialize,
    /// Liveness check.
    Ping,
    /// List tools.
    ToolsList,
    /// Call a tool.
    ToolsCall,
    /// List resources.
    ResourcesList,
    /// Read a resource.
    ResourcesRead,
    /// List prompts.
    PromptsList,
    /// Render a prompt.
    PromptsGet,
}

impl ServerMethod {
    /// Look up a method by its wire name. `None` means method-not-found.
    #[must_use]
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            INITIALIZE => Some(Self::Initialize),
            PING => Some(Self::Ping),
            TOOLS_LIST => Some(Self::ToolsList),
            TOOLS_CALL => Some(Self::ToolsCall),
            RESOURCES_LIST => Some(Self::ResourcesList),
            RESOURCES_READ => Some(Self::ResourcesRead),
            PROMPTS_LIST => Some(Self::PromptsList),
            PROMPTS_GET => Some(Self::PromptsGet),
            _ => None,
        }
    }

    /// The wire name of this method.
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::Initialize => INITIALIZE,
            Self::Ping => PING,
            Self::ToolsList => TOOLS_LIST,
            Self::ToolsCall => TOOLS_CALL,
            Self::ResourcesList => RESOURCES_LIST,
            Self::ResourcesRead => RESOURCES_READ,
            Self::PromptsList => PROMPTS_LIST,
            Self::PromptsGet => PROMPTS_GET,
        }
    }
}

impl std::fmt::Display for ServerMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}
