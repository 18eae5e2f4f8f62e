use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use serde_json::json;

use super::error_response;
use crate::config::ModelRoute;
use crate::errors::AppError;
use crate::models::{
    ClarifyObjectiveRequest, CreateMessageRequest, CreateSessionRequest, GenerateRequest, GenerateResponse,
    PageSearchRequest, Scope, UpdateSessionRequest,
};
use crate::state::AppState;

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusResponse {
    pub configured: bool,
    pub models: Vec<ModelRoute>,
    pub default_model: String,
}

/// GET `/status` — available models and the default selection
pub async fn status_handler(State(state): State<AppState>) -> Json<StatusResponse> {
    let models = state.models.routes().to_vec();
    Json(StatusResponse {
        configured: !models.is_empty(),
        models,
        default_model: state.models.default_model().to_string(),
    })
}

/// GET `/sessions`
pub async fn list_sessions_handler(State(state): State<AppState>, scope: Scope) -> Response {
    match state.chat.list_sessions(&scope).await {
        Ok(sessions) => Json(sessions).into_response(),
        Err(e) => error_response(&e),
    }
}

/// POST `/sessions`
pub async fn create_session_handler(
    State(state): State<AppState>,
    scope: Scope,
    body: Bytes,
) -> Response {
    // the body is optional
    let request = if body.is_empty() {
        CreateSessionRequest::default()
    } else {
        match serde_json::from_slice::<CreateSessionRequest>(&body) {
            Ok(r) => r,
            Err(e) => return error_response(&AppError::Invalid(e.to_string())),
        }
    };
    match state.chat.create_session(&scope, request).await {
        Ok(session) => (StatusCode::CREATED, Json(session)).into_response(),
        Err(e) => error_response(&e),
    }
}

/// GET `/sessions/:id` — session with its messages in creation order
pub async fn get_session_handler(State(state): State<AppState>, scope: Scope, Path(id): Path<String>) -> Response {
    match state.chat.get_session(&scope, &id).await {
        Ok(found) => Json(found).into_response(),
        Err(e) => error_response(&e),
    }
}

/// PATCH `/sessions/:id`
pub async fn update_session_handler(
    State(state): State<AppState>,
    scope: Scope,
    Path(id): Path<String>,
    Json(request): Json<UpdateSessionRequest>,
) -> Response {
    match state.chat.update_session(&scope, &id, request).await {
        Ok(session) => Json(session).into_response(),
        Err(e) => error_response(&e),
    }
}

/// DELETE `/sessions/:id`
pub async fn delete_session_handler(State(state): State<AppState>, scope: Scope, Path(id): Path<String>) -> Response {
    match state.chat.delete_session(&scope, &id).await {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(e) => error_response(&e),
    }
}

/// POST `/sessions/:id/messages`
pub async fn add_message_handler(
    State(state): State<AppState>,
    scope: Scope,
    Path(id): Path<String>,
    Json(request): Json<CreateMessageRequest>,
) -> Response {
    match state.chat.add_message(&scope, &id, request).await {
        Ok(message) => (StatusCode::CREATED, Json(message)).into_response(),
        Err(e) => error_response(&e),
    }
}

/// DELETE `/sessions/:id/messages/:message_id/truncate`
pub async fn truncate_messages_handler(
    State(state): State<AppState>,
    scope: Scope,
    Path((id, message_id)): Path<(String, String)>,
) -> Response {
    match state.chat.truncate_messages(&scope, &id, &message_id).await {
        Ok(removed) => Json(json!({ "removed": removed })).into_response(),
        Err(e) => error_response(&e),
    }
}

/// POST `/sessions/:id/auto-title`
pub async fn auto_title_handler(State(state): State<AppState>, scope: Scope, Path(id): Path<String>) -> Response {
    match state.chat.auto_title(&scope, &id).await {
        Ok(session) => Json(session).into_response(),
        Err(e) => error_response(&e),
    }
}

/// POST `/clarify-objective`
pub async fn clarify_objective_handler(
    State(state): State<AppState>,
    _scope: Scope,
    Json(request): Json<ClarifyObjectiveRequest>,
) -> Response {
    match state.chat.clarify_objective(&request.message).await {
        Ok(response) => Json(response).into_response(),
        Err(e) => error_response(&e),
    }
}

/// POST `/generate` — editor action, answered in one piece
pub async fn generate_handler(
    State(state): State<AppState>,
    _scope: Scope,
    Json(request): Json<GenerateRequest>,
) -> Response {
    match state.editor.generate(request).await {
        Ok(content) => Json(GenerateResponse { content }).into_response(),
        Err(e) => error_response(&e),
    }
}

/// POST `/pages/search` — pages offered as pinned context
pub async fn search_pages_handler(
    State(state): State<AppState>,
    scope: Scope,
    Json(request): Json<PageSearchRequest>,
) -> Response {
    match state.pages.search_pages(request, &scope).await {
        Ok(pages) => Json(pages).into_response(),
        Err(e) => error_response(&e),
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use axum::body::Body;
    use axum::http::Request;
    use serde_json::Value;
    use tower::ServiceExt;

    use super::*;
    use crate::db::memory::MemoryStore;
    use crate::db::ChatStore;
    use crate::models::{Message, MessageRole, Session};
    use crate::provider::testing::{ScriptedProvider, Step};
    use crate::routes::router;
    use crate::state::testing::state;

    fn app_with(store: Arc<MemoryStore>) -> axum::Router {
        router(state(store, Arc::new(ScriptedProvider::new(vec![]))))
    }

    fn request(method: &str, uri: &str, user: &str, body: Option<Value>) -> Request<Body> {
        let builder = Request::builder()
            .method(method)
            .uri(uri)
            .header("x-workspace-id", "ws")
            .header("x-user-id", user);
        match body {
            Some(b) => builder
                .header("content-type", "application/json")
                .body(Body::from(b.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        }
    }

    async fn json_body(resp: axum::response::Response) -> Value {
        let bytes = axum::body::to_bytes(resp.into_body(), 1024 * 1024).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn status_lists_models() {
        let resp = app_with(Arc::new(MemoryStore::new()))
            .oneshot(Request::get("/status").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let body = json_body(resp).await;
        assert_eq!(body["defaultModel"], "plain");
        assert_eq!(body["models"][1]["supportsThinking"], true);
        assert!(body["models"][0].get("provider").is_none());
    }

    #[tokio::test]
    async fn session_routes_require_identity_headers() {
        let resp = app_with(Arc::new(MemoryStore::new()))
            .oneshot(Request::get("/sessions").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn create_then_fetch_session() {
        let store = Arc::new(MemoryStore::new());
        let resp = app_with(store.clone())
            .oneshot(request("POST", "/sessions", "u1", Some(json!({ "pageId": "p-1" }))))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::CREATED);
        let created = json_body(resp).await;
        assert_eq!(created["title"], "New Chat");
        assert_eq!(created["pageId"], "p-1");
        let id = created["id"].as_str().unwrap().to_string();

        let resp = app_with(store.clone())
            .oneshot(request("GET", &format!("/sessions/{id}"), "u1", None))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(json_body(resp).await["messages"], json!([]));

        let resp = app_with(store)
            .oneshot(request("GET", &format!("/sessions/{id}"), "someone-else", None))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn truncate_reports_removed_count() {
        let store = Arc::new(MemoryStore::new());
        let session = Session::new("ws".into(), "u1".into(), None);
        store.create_session(&session).await.unwrap();
        let mut first = Message::new(session.id.clone(), MessageRole::User, "one".into());
        first.created_at = session.created_at;
        let mut second = Message::new(session.id.clone(), MessageRole::Assistant, "two".into());
        second.created_at = session.created_at + chrono::Duration::seconds(1);
        store.insert_message(&first).await.unwrap();
        store.insert_message(&second).await.unwrap();

        let uri = format!("/sessions/{}/messages/{}/truncate", session.id, first.id);
        let resp = app_with(store.clone()).oneshot(request("DELETE", &uri, "u1", None)).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(json_body(resp).await["removed"], 2);
        assert!(store.find_messages(&session.id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn delete_returns_no_content() {
        let store = Arc::new(MemoryStore::new());
        let session = Session::new("ws".into(), "u1".into(), None);
        store.create_session(&session).await.unwrap();
        let resp = app_with(store.clone())
            .oneshot(request("DELETE", &format!("/sessions/{}", session.id), "u1", None))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::NO_CONTENT);
        assert!(store.find_session(&session.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn auto_title_renames_default_session() {
        let store = Arc::new(MemoryStore::new());
        let session = Session::new("ws".into(), "u1".into(), None);
        store.create_session(&session).await.unwrap();
        store
            .insert_message(&Message::new(session.id.clone(), MessageRole::User, "plan the offsite".into()))
            .await
            .unwrap();
        let resp = app_with(store)
            .oneshot(request("POST", &format!("/sessions/{}/auto-title", session.id), "u1", None))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(json_body(resp).await["title"], "Scripted Title");
    }

    #[tokio::test]
    async fn generate_returns_the_whole_text() {
        let provider = Arc::new(ScriptedProvider::new(vec![Step::Text("Fixed "), Step::Text("text.")]));
        let app = router(state(Arc::new(MemoryStore::new()), provider));
        let resp = app
            .oneshot(request(
                "POST",
                "/generate",
                "u1",
                Some(json!({ "action": "fix_spelling_grammar", "content": "fixd txt" })),
            ))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(json_body(resp).await, json!({ "content": "Fixed text." }));
    }

    #[tokio::test]
    async fn generate_rejects_empty_content() {
        let resp = app_with(Arc::new(MemoryStore::new()))
            .oneshot(request("POST", "/generate", "u1", Some(json!({ "content": "" }))))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn page_search_lists_pinnable_pages() {
        let app = app_with(Arc::new(MemoryStore::new()));
        let resp = app
            .clone()
            .oneshot(request("POST", "/pages/search", "u1", Some(json!({ "pageIds": ["B", "A"] }))))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let body = json_body(resp).await;
        assert_eq!(body[0]["pageId"], "B");
        assert_eq!(body[1]["slugId"], "slug-A");
        assert_eq!(body[1]["spaceId"], "space-1");

        let resp = app
            .oneshot(request("POST", "/pages/search", "u1", Some(json!({ "spaceId": "space-1", "query": "page b" }))))
            .await
            .unwrap();
        let body = json_body(resp).await;
        assert_eq!(body.as_array().map(Vec::len), Some(1));
        assert_eq!(body[0]["title"], "Page B");
    }
}
