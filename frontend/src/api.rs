use std::cell::Cell;
use std::fmt;
use std::rc::Rc;

use gloo_net::http::{Request, RequestBuilder, Response};
use js_sys::{Reflect, Uint8Array};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::json;
use wasm_bindgen::{JsCast, JsValue};
use wasm_bindgen_futures::JsFuture;
use web_sys::{AbortController, Headers, ReadableStreamDefaultReader, RequestInit};

use crate::agent_stream::StateSnapshot;
use crate::models::{
    ChatRequest, ClarifyObjectiveResponse, Message, Session, SessionWithMessages, StatusResponse,
    UpdateSessionRequest,
};

/// Reads a build-time setting, falling back to the local default.
macro_rules! build_setting {
    ($name:literal, $default:literal) => {
        match option_env!($name) {
            Some(value) => value,
            None => $default,
        }
    };
}

/// Base URL of the backend API server.
const API_BASE: &str = build_setting!("WORKSPACE_AI_API_BASE", "http://localhost:8080");

/// Base URL of the agent runtime used by design mode.
const AGENT_BASE: &str = build_setting!("WORKSPACE_AI_AGENT_BASE", "http://localhost:2024");

// Identity is resolved by the gateway in deployment; these are the local defaults.
const WORKSPACE_ID: &str = build_setting!("WORKSPACE_AI_WORKSPACE_ID", "default");
const USER_ID: &str = build_setting!("WORKSPACE_AI_USER_ID", "local-user");

fn scoped(builder: RequestBuilder) -> RequestBuilder {
    builder.header("X-Workspace-Id", WORKSPACE_ID).header("X-User-Id", USER_ID)
}

async fn parse<T: DeserializeOwned>(resp: Response) -> Result<T, String> {
    if !resp.ok() {
        return Err(format!("Server error: {}", resp.status()));
    }
    resp.json::<T>().await.map_err(|e| format!("Parse error: {e}"))
}

/// Fetches the model table.
pub async fn fetch_status() -> Result<StatusResponse, String> {
    let resp = Request::get(&format!("{API_BASE}/status"))
        .send()
        .await
        .map_err(|e| format!("Network error: {e}"))?;
    parse(resp).await
}

/// Fetches the caller's sessions, most recent first.
pub async fn fetch_sessions() -> Result<Vec<Session>, String> {
    let resp = scoped(Request::get(&format!("{API_BASE}/sessions")))
        .send()
        .await
        .map_err(|e| format!("Network error: {e}"))?;
    parse(resp).await
}

pub async fn create_session() -> Result<Session, String> {
    let resp = scoped(Request::post(&format!("{API_BASE}/sessions")))
        .send()
        .await
        .map_err(|e| format!("Network error: {e}"))?;
    parse(resp).await
}

/// Fetches a session together with its messages in creation order.
pub async fn fetch_session(id: &str) -> Result<SessionWithMessages, String> {
    let resp = scoped(Request::get(&format!("{API_BASE}/sessions/{id}")))
        .send()
        .await
        .map_err(|e| format!("Network error: {e}"))?;
    parse(resp).await
}

pub async fn update_session(id: &str, update: &UpdateSessionRequest) -> Result<Session, String> {
    let resp = scoped(Request::patch(&format!("{API_BASE}/sessions/{id}")))
        .json(update)
        .map_err(|e| format!("Serialize error: {e}"))?
        .send()
        .await
        .map_err(|e| format!("Network error: {e}"))?;
    parse(resp).await
}

pub async fn delete_session(id: &str) -> Result<(), String> {
    let resp = scoped(Request::delete(&format!("{API_BASE}/sessions/{id}")))
        .send()
        .await
        .map_err(|e| format!("Network error: {e}"))?;
    if !resp.ok() {
        return Err(format!("Server error: {}", resp.status()));
    }
    Ok(())
}

/// Appends a message produced outside the chat stream (design mode).
pub async fn add_message(session_id: &str, message: &Message) -> Result<Message, String> {
    let resp = scoped(Request::post(&format!("{API_BASE}/sessions/{session_id}/messages")))
        .json(message)
        .map_err(|e| format!("Serialize error: {e}"))?
        .send()
        .await
        .map_err(|e| format!("Network error: {e}"))?;
    parse(resp).await
}

/// Deletes `message_id` and everything after it. Returns how many messages were removed.
pub async fn truncate_messages(session_id: &str, message_id: &str) -> Result<u64, String> {
    #[derive(Deserialize)]
    struct Removed {
        removed: u64,
    }
    let url = format!("{API_BASE}/sessions/{session_id}/messages/{message_id}/truncate");
    let resp = scoped(Request::delete(&url))
        .send()
        .await
        .map_err(|e| format!("Network error: {e}"))?;
    parse::<Removed>(resp).await.map(|r| r.removed)
}

pub async fn auto_title(session_id: &str) -> Result<Session, String> {
    let resp = scoped(Request::post(&format!("{API_BASE}/sessions/{session_id}/auto-title")))
        .send()
        .await
        .map_err(|e| format!("Network error: {e}"))?;
    parse(resp).await
}

pub async fn clarify_objective(message: &str) -> Result<ClarifyObjectiveResponse, String> {
    let resp = scoped(Request::post(&format!("{API_BASE}/clarify-objective")))
        .json(&json!({ "message": message }))
        .map_err(|e| format!("Serialize error: {e}"))?
        .send()
        .await
        .map_err(|e| format!("Network error: {e}"))?;
    parse(resp).await
}

/// Creates a thread on the agent runtime and returns its id.
pub async fn create_thread() -> Result<String, String> {
    #[derive(Deserialize)]
    struct Thread {
        thread_id: String,
    }
    let resp = Request::post(&format!("{AGENT_BASE}/threads"))
        .json(&json!({}))
        .map_err(|e| format!("Serialize error: {e}"))?
        .send()
        .await
        .map_err(|e| format!("Network error: {e}"))?;
    parse::<Thread>(resp).await.map(|t| t.thread_id)
}

/// Current graph state of an agent thread.
pub async fn fetch_thread_state(thread_id: &str) -> Result<StateSnapshot, String> {
    #[derive(Deserialize)]
    struct ThreadState {
        #[serde(default)]
        values: StateSnapshot,
    }
    let resp = Request::get(&format!("{AGENT_BASE}/threads/{thread_id}/state"))
        .send()
        .await
        .map_err(|e| format!("Network error: {e}"))?;
    parse::<ThreadState>(resp).await.map(|s| s.values)
}

// ── Streaming ───────────────────────────────────────────────────────────────

#[derive(Clone, Debug, PartialEq)]
pub enum StreamError {
    Transport(String),
    Http { status: u16 },
    /// The user stopped the stream. Not an error to report.
    Cancelled,
}

impl fmt::Display for StreamError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StreamError::Transport(msg) => write!(f, "Network error: {msg}"),
            StreamError::Http { status } => write!(f, "Server error: {status}"),
            StreamError::Cancelled => write!(f, "Cancelled"),
        }
    }
}

/// Cancels an in-flight stream. Cloning shares the same cancellation.
#[derive(Clone)]
pub struct StreamHandle {
    controller: AbortController,
    cancelled: Rc<Cell<bool>>,
}

impl StreamHandle {
    pub fn new() -> Result<Self, StreamError> {
        let controller = AbortController::new().map_err(js_error)?;
        Ok(Self { controller, cancelled: Rc::new(Cell::new(false)) })
    }

    pub fn cancel(&self) {
        self.cancelled.set(true);
        self.controller.abort();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.get()
    }

    fn failure(&self, err: JsValue) -> StreamError {
        if self.is_cancelled() {
            StreamError::Cancelled
        } else {
            js_error(err)
        }
    }
}

fn js_error(err: JsValue) -> StreamError {
    StreamError::Transport(err.as_string().unwrap_or_else(|| format!("{err:?}")))
}

/// Raw chunks of a streaming response body.
pub struct ByteStream {
    reader: ReadableStreamDefaultReader,
    handle: StreamHandle,
}

impl ByteStream {
    /// Next chunk, or `None` at end of body. Cancellation is checked before every read.
    pub async fn next_chunk(&mut self) -> Result<Option<Vec<u8>>, StreamError> {
        if self.handle.is_cancelled() {
            return Err(StreamError::Cancelled);
        }
        let result = JsFuture::from(self.reader.read())
            .await
            .map_err(|e| self.handle.failure(e))?;
        let done = Reflect::get(&result, &JsValue::from_str("done"))
            .map_err(js_error)?
            .as_bool()
            .unwrap_or(false);
        if done {
            return Ok(None);
        }
        let value = Reflect::get(&result, &JsValue::from_str("value")).map_err(js_error)?;
        Ok(Some(Uint8Array::new(&value).to_vec()))
    }
}

async fn open_stream(
    url: &str,
    body: String,
    with_identity: bool,
    handle: &StreamHandle,
) -> Result<ByteStream, StreamError> {
    let window = web_sys::window().ok_or_else(|| StreamError::Transport("no window".into()))?;

    let headers = Headers::new().map_err(js_error)?;
    headers.set("Content-Type", "application/json").map_err(js_error)?;
    headers.set("Accept", "text/event-stream").map_err(js_error)?;
    if with_identity {
        headers.set("X-Workspace-Id", WORKSPACE_ID).map_err(js_error)?;
        headers.set("X-User-Id", USER_ID).map_err(js_error)?;
    }

    let init = RequestInit::new();
    init.set_method("POST");
    init.set_headers(&headers);
    init.set_body(&JsValue::from_str(&body));
    init.set_signal(Some(&handle.controller.signal()));

    let resp = JsFuture::from(window.fetch_with_str_and_init(url, &init))
        .await
        .map_err(|e| handle.failure(e))?;
    let resp: web_sys::Response = resp.dyn_into().map_err(js_error)?;
    if !resp.ok() {
        return Err(StreamError::Http { status: resp.status() });
    }
    let body = resp
        .body()
        .ok_or_else(|| StreamError::Transport("response has no body".into()))?;
    let reader: ReadableStreamDefaultReader = body.get_reader().unchecked_into();
    Ok(ByteStream { reader, handle: handle.clone() })
}

/// Opens `POST /chat/stream`.
pub async fn stream_chat(request: &ChatRequest, handle: &StreamHandle) -> Result<ByteStream, StreamError> {
    let body = serde_json::to_string(request).map_err(|e| StreamError::Transport(e.to_string()))?;
    open_stream(&format!("{API_BASE}/chat/stream"), body, true, handle).await
}

/// Opens a streaming run on an agent thread.
pub async fn stream_run(
    thread_id: &str,
    payload: &serde_json::Value,
    handle: &StreamHandle,
) -> Result<ByteStream, StreamError> {
    let url = format!("{AGENT_BASE}/threads/{thread_id}/runs/stream");
    open_stream(&url, payload.to_string(), false, handle).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn build_settings_are_usable() {
        for base in [API_BASE, AGENT_BASE] {
            assert!(base.starts_with("http"), "{base}");
            assert!(!base.ends_with('/'), "{base}");
        }
        assert!(!WORKSPACE_ID.trim().is_empty());
        assert!(!USER_ID.trim().is_empty());
    }
}
