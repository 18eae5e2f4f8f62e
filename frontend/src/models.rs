use serde::{Deserialize, Serialize};

/// Title the backend gives sessions until they are renamed.
pub const DEFAULT_SESSION_TITLE: &str = "New Chat";

/// Prefix of sessions that exist only in the browser until the first send.
pub const LOCAL_SESSION_PREFIX: &str = "local-";

/// Agent tool whose results are clarification requests.
pub const CLARIFICATION_TOOL: &str = "ask_clarification";

/// Matches the backend `Session` model.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    pub id: String,
    #[serde(default)]
    pub workspace_id: String,
    #[serde(default)]
    pub user_id: String,
    #[serde(default)]
    pub page_id: Option<String>,
    pub title: String,
    #[serde(default)]
    pub thread_id: Option<String>,
    #[serde(default)]
    pub selected_page_ids: Vec<String>,
    #[serde(default)]
    pub created_at: String,
    #[serde(default)]
    pub updated_at: String,
}

impl Session {
    /// Placeholder shown before anything is sent; never sent to the backend.
    pub fn local(stamp: u64) -> Self {
        Self {
            id: format!("{LOCAL_SESSION_PREFIX}{stamp}"),
            workspace_id: String::new(),
            user_id: String::new(),
            page_id: None,
            title: DEFAULT_SESSION_TITLE.to_string(),
            thread_id: None,
            selected_page_ids: Vec::new(),
            created_at: String::new(),
            updated_at: String::new(),
        }
    }

    pub fn is_local(&self) -> bool {
        self.id.starts_with(LOCAL_SESSION_PREFIX)
    }
}

#[derive(Clone, Copy, Debug, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

#[derive(Clone, Copy, Debug, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum MessageType {
    #[default]
    Chat,
    ToolUse,
    ToolResult,
}

#[derive(Clone, Copy, Debug, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ToolStatus {
    Success,
    Error,
}

#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub args: serde_json::Value,
}

#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Source {
    pub page_id: String,
    pub title: String,
    #[serde(default)]
    pub slug_id: String,
    #[serde(default)]
    pub space_slug: String,
    #[serde(default)]
    pub url: Option<String>,
    pub excerpt: String,
    pub similarity: f64,
    #[serde(default)]
    pub chunk_index: i32,
}

/// Matches the backend `Message` model.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub id: String,
    #[serde(default)]
    pub session_id: String,
    pub role: Role,
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thinking: Option<String>,
    #[serde(default)]
    pub sources: Vec<Source>,
    #[serde(default)]
    pub message_type: MessageType,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCall>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_status: Option<ToolStatus>,
    #[serde(default)]
    pub created_at: String,
}

impl Message {
    pub fn new(id: String, session_id: String, role: Role, content: String) -> Self {
        Self {
            id,
            session_id,
            role,
            content,
            thinking: None,
            sources: Vec::new(),
            message_type: MessageType::Chat,
            tool_calls: Vec::new(),
            tool_call_id: None,
            tool_name: None,
            tool_status: None,
            created_at: String::new(),
        }
    }

    pub fn is_clarification(&self) -> bool {
        self.message_type == MessageType::ToolResult && self.tool_name.as_deref() == Some(CLARIFICATION_TOOL)
    }

    /// Plain assistant text, i.e. not part of a tool transaction.
    pub fn is_plain_assistant(&self) -> bool {
        self.role == Role::Assistant && self.message_type == MessageType::Chat
    }
}

#[derive(Clone, Debug, Serialize, PartialEq)]
pub struct TurnMessage {
    pub role: Role,
    pub content: String,
}

impl From<&Message> for TurnMessage {
    fn from(m: &Message) -> Self {
        Self { role: m.role, content: m.content.clone() }
    }
}

/// Body of `POST /chat/stream`.
#[derive(Clone, Debug, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatRequest {
    pub messages: Vec<TurnMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    pub thinking: bool,
    pub selected_page_ids: Vec<String>,
    pub is_web_search_enabled: bool,
    pub skip_user_persist: bool,
}

#[derive(Clone, Copy, Debug, Default, Deserialize, PartialEq, Eq)]
pub struct MemoryStatus {
    pub enabled: bool,
    pub loaded: bool,
}

/// One event of the chat stream. Matches the backend `StreamEvent`.
#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(tag = "type", content = "data", rename_all = "lowercase")]
pub enum StreamEvent {
    Sources(Vec<Source>),
    Chunk(String),
    Thinking(String),
    Memory(MemoryStatus),
    Error(String),
}

#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ModelInfo {
    pub id: String,
    pub label: String,
    pub supports_thinking: bool,
}

#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct StatusResponse {
    pub configured: bool,
    pub models: Vec<ModelInfo>,
    pub default_model: String,
}

#[derive(Clone, Debug, Deserialize)]
pub struct SessionWithMessages {
    pub session: Session,
    pub messages: Vec<Message>,
}

#[derive(Clone, Debug, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateSessionRequest {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub thread_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub selected_page_ids: Option<Vec<String>>,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClarifyObjectiveResponse {
    pub objective: String,
    #[allow(dead_code)]
    pub original_message: String,
}
