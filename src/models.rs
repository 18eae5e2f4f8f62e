use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Title a session carries until it is renamed (manually or by auto-title).
pub const DEFAULT_SESSION_TITLE: &str = "New Chat";

/// Name of the agent tool whose results are clarification interrupts.
pub const CLARIFICATION_TOOL: &str = "ask_clarification";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    pub id: String,
    pub workspace_id: String,
    pub user_id: String,
    pub page_id: Option<String>,
    pub title: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub thread_id: Option<String>,
    #[serde(default)]
    pub selected_page_ids: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Session {
    pub fn new(workspace_id: String, user_id: String, page_id: Option<String>) -> Self {
        let now = Utc::now();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            workspace_id,
            user_id,
            page_id,
            title: DEFAULT_SESSION_TITLE.to_string(),
            thread_id: None,
            selected_page_ids: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_owned_by(&self, scope: &Scope) -> bool {
        self.workspace_id == scope.workspace_id && self.user_id == scope.user_id
    }

    pub fn has_default_title(&self) -> bool {
        self.title == DEFAULT_SESSION_TITLE
    }
}

/// Workspace and user identity a request acts on behalf of.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Scope {
    pub workspace_id: String,
    pub user_id: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    User,
    Assistant,
}

impl MessageRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageRole::User => "user",
            MessageRole::Assistant => "assistant",
        }
    }
}

impl std::fmt::Display for MessageRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl TryFrom<String> for MessageRole {
    type Error = String;
    fn try_from(s: String) -> Result<Self, Self::Error> {
        match s.to_lowercase().as_str() {
            "user" => Ok(MessageRole::User),
            "assistant" => Ok(MessageRole::Assistant),
            other => Err(format!("Unknown role: {other}")),
        }
    }
}

/// Subtype discriminator of a stored message.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageType {
    #[default]
    Chat,
    ToolUse,
    ToolResult,
}

impl MessageType {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageType::Chat => "chat",
            MessageType::ToolUse => "tool_use",
            MessageType::ToolResult => "tool_result",
        }
    }
}

impl TryFrom<String> for MessageType {
    type Error = String;
    fn try_from(s: String) -> Result<Self, Self::Error> {
        match s.as_str() {
            "chat" => Ok(MessageType::Chat),
            "tool_use" => Ok(MessageType::ToolUse),
            "tool_result" => Ok(MessageType::ToolResult),
            other => Err(format!("Unknown message type: {other}")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ToolStatus {
    Success,
    Error,
}

impl ToolStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ToolStatus::Success => "success",
            ToolStatus::Error => "error",
        }
    }
}

impl TryFrom<String> for ToolStatus {
    type Error = String;
    fn try_from(s: String) -> Result<Self, <Self as TryFrom<String>>::Error> {
        match s.as_str() {
            "success" => Ok(ToolStatus::Success),
            "error" => Ok(ToolStatus::Error),
            other => Err(format!("Unknown tool status: {other}")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub args: serde_json::Value,
}

/// Citation snapshot stored on the assistant message that produced it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Source {
    pub page_id: String,
    pub title: String,
    #[serde(default)]
    pub slug_id: String,
    #[serde(default)]
    pub space_slug: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    pub excerpt: String,
    pub similarity: f64,
    #[serde(default)]
    pub chunk_index: i32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub id: String,
    pub session_id: String,
    pub role: MessageRole,
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
    pub created_at: DateTime<Utc>,
}

impl Message {
    pub fn new(session_id: String, role: MessageRole, content: String) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
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
            created_at: Utc::now(),
        }
    }

    pub fn with_sources(mut self, sources: Vec<Source>) -> Self {
        self.sources = sources;
        self
    }

    pub fn with_thinking(mut self, thinking: String) -> Self {
        self.thinking = (!thinking.is_empty()).then_some(thinking);
        self
    }
}

// ── Request / response DTOs ───────────────────────────────────────────────────

/// One history entry sent by the client with a chat turn.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TurnMessage {
    pub role: MessageRole,
    pub content: String,
}

/// Body of `POST /chat/stream`.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatRequest {
    pub messages: Vec<TurnMessage>,
    #[serde(default)]
    pub session_id: Option<String>,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub thinking: bool,
    #[serde(default)]
    pub selected_page_ids: Vec<String>,
    #[serde(default)]
    pub is_web_search_enabled: bool,
    #[serde(default)]
    pub skip_user_persist: bool,
}

/// Payload of the `memory` stream event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemoryStatus {
    pub enabled: bool,
    pub loaded: bool,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateSessionRequest {
    #[serde(default)]
    pub page_id: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateSessionRequest {
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub thread_id: Option<String>,
    #[serde(default)]
    pub selected_page_ids: Option<Vec<String>>,
}

/// Body of `POST /sessions/:id/messages`.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateMessageRequest {
    pub role: MessageRole,
    pub content: String,
    #[serde(default)]
    pub thinking: Option<String>,
    #[serde(default)]
    pub sources: Vec<Source>,
    #[serde(default)]
    pub message_type: MessageType,
    #[serde(default)]
    pub tool_calls: Vec<ToolCall>,
    #[serde(default)]
    pub tool_call_id: Option<String>,
    #[serde(default)]
    pub tool_name: Option<String>,
    #[serde(default)]
    pub tool_status: Option<ToolStatus>,
}

impl CreateMessageRequest {
    pub fn into_message(self, session_id: String) -> Message {
        let mut message = Message::new(session_id, self.role, self.content);
        message.thinking = self.thinking;
        message.sources = self.sources;
        message.message_type = self.message_type;
        message.tool_calls = self.tool_calls;
        message.tool_call_id = self.tool_call_id;
        message.tool_name = self.tool_name;
        message.tool_status = self.tool_status;
        message
    }
}

#[derive(Debug, Serialize)]
pub struct SessionWithMessages {
    pub session: Session,
    pub messages: Vec<Message>,
}

#[derive(Debug, Deserialize)]
pub struct ClarifyObjectiveRequest {
    pub message: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ClarifyObjectiveResponse {
    pub objective: String,
    pub original_message: String,
}

/// Body of `POST /answers`: a single question answered from the knowledge base.
#[derive(Debug, Deserialize)]
pub struct AnswersRequest {
    pub query: String,
}

impl From<AnswersRequest> for ChatRequest {
    fn from(request: AnswersRequest) -> Self {
        ChatRequest {
            messages: vec![TurnMessage { role: MessageRole::User, content: request.query }],
            ..Default::default()
        }
    }
}

/// Editor actions offered on a text selection.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EditorAction {
    ImproveWriting,
    FixSpellingGrammar,
    MakeShorter,
    MakeLonger,
    Simplify,
    ChangeTone,
    Summarize,
    Explain,
    ContinueWriting,
    Translate,
    #[default]
    Custom,
}

/// Body of `POST /generate` and `POST /generate/stream`.
#[derive(Debug, Clone, Deserialize)]
pub struct GenerateRequest {
    #[serde(default)]
    pub action: Option<EditorAction>,
    pub content: String,
    /// Tone, target language or a free-form instruction, depending on the action.
    #[serde(default)]
    pub prompt: Option<String>,
    #[serde(default)]
    pub model: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct GenerateResponse {
    pub content: String,
}

/// Body of `POST /pages/search`. Explicit ids win over a title query.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PageSearchRequest {
    #[serde(default)]
    pub query: Option<String>,
    #[serde(default)]
    pub space_id: Option<String>,
    #[serde(default)]
    pub page_ids: Option<Vec<String>>,
}

/// A page as offered by the context picker.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PageSummary {
    pub page_id: String,
    pub title: String,
    pub slug_id: String,
    pub space_id: String,
    pub space_slug: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chat_request_accepts_minimal_camel_case_body() {
        let body = r#"{"messages":[{"role":"user","content":"hi"}],"sessionId":"s1","isWebSearchEnabled":true}"#;
        let req: ChatRequest = serde_json::from_str(body).unwrap();
        assert_eq!(req.session_id.as_deref(), Some("s1"));
        assert!(req.is_web_search_enabled);
        assert!(!req.thinking);
        assert!(req.selected_page_ids.is_empty());
    }

    #[test]
    fn chat_request_rejects_unknown_role() {
        let body = r#"{"messages":[{"role":"system","content":"hi"}]}"#;
        assert!(serde_json::from_str::<ChatRequest>(body).is_err());
    }

    #[test]
    fn message_serializes_subtype_and_omits_empty_tool_fields() {
        let msg = Message::new("s1".into(), MessageRole::Assistant, "hello".into());
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["messageType"], "chat");
        assert_eq!(json["role"], "assistant");
        assert!(json.get("toolCalls").is_none());
        assert!(json.get("thinking").is_none());
    }

    #[test]
    fn empty_thinking_is_not_stored() {
        let msg = Message::new("s1".into(), MessageRole::Assistant, "a".into())
            .with_thinking(String::new());
        assert_eq!(msg.thinking, None);
    }

    #[test]
    fn generate_request_defaults_to_custom_action() {
        let req: GenerateRequest = serde_json::from_str(r#"{"content":"text"}"#).unwrap();
        assert_eq!(req.action.unwrap_or_default(), EditorAction::Custom);
        let req: GenerateRequest =
            serde_json::from_str(r#"{"action":"fix_spelling_grammar","content":"teh"}"#).unwrap();
        assert_eq!(req.action, Some(EditorAction::FixSpellingGrammar));
    }

    #[test]
    fn role_round_trips_through_storage_text() {
        assert_eq!(MessageRole::try_from("ASSISTANT".to_string()), Ok(MessageRole::Assistant));
        assert!(MessageRole::try_from("tool".to_string()).is_err());
        assert_eq!(MessageType::try_from("tool_use".to_string()), Ok(MessageType::ToolUse));
    }
}
