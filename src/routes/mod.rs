pub mod api_routes;
pub mod chat_routes;

use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use serde_json::json;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::errors::AppError;
use crate::models::Scope;
use crate::state::AppState;

const WORKSPACE_HEADER: &str = "x-workspace-id";
const USER_HEADER: &str = "x-user-id";

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/status", get(api_routes::status_handler))
        .route(
            "/sessions",
            get(api_routes::list_sessions_handler).post(api_routes::create_session_handler),
        )
        .route(
            "/sessions/{id}",
            get(api_routes::get_session_handler)
                .patch(api_routes::update_session_handler)
                .delete(api_routes::delete_session_handler),
        )
        .route("/sessions/{id}/messages", post(api_routes::add_message_handler))
        .route(
            "/sessions/{id}/messages/{message_id}/truncate",
            delete(api_routes::truncate_messages_handler),
        )
        .route("/sessions/{id}/auto-title", post(api_routes::auto_title_handler))
        .route("/clarify-objective", post(api_routes::clarify_objective_handler))
        .route("/chat/stream", post(chat_routes::chat_stream_handler))
        .route("/answers", post(chat_routes::answers_handler))
        .route("/generate", post(api_routes::generate_handler))
        .route("/generate/stream", post(chat_routes::generate_stream_handler))
        .route("/pages/search", post(api_routes::search_pages_handler))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Caller identity comes from gateway-set headers; authentication happens upstream.
impl<S: Send + Sync> FromRequestParts<S> for Scope {
    type Rejection = Response;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let header = |name: &str| {
            parts
                .headers
                .get(name)
                .and_then(|v| v.to_str().ok())
                .map(str::trim)
                .filter(|v| !v.is_empty())
                .map(str::to_string)
        };
        match (header(WORKSPACE_HEADER), header(USER_HEADER)) {
            (Some(workspace_id), Some(user_id)) => Ok(Scope { workspace_id, user_id }),
            _ => Err(error_response(&AppError::Invalid(
                "X-Workspace-Id and X-User-Id headers are required".to_string(),
            ))),
        }
    }
}

pub(crate) fn error_status(err: &AppError) -> StatusCode {
    if err.is_validation() {
        StatusCode::BAD_REQUEST
    } else if err.is_not_found() {
        StatusCode::NOT_FOUND
    } else if err.is_agent_unavailable() {
        StatusCode::SERVICE_UNAVAILABLE
    } else {
        StatusCode::INTERNAL_SERVER_ERROR
    }
}

pub(crate) fn error_response(err: &AppError) -> Response {
    (error_status(err), Json(json!({ "error": err.to_string() }))).into_response()
}
