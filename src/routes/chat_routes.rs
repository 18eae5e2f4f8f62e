use std::convert::Infallible;

use axum::body::Body;
use axum::extract::rejection::JsonRejection;
use axum::extract::State;
use axum::http::header::{CACHE_CONTROL, CONTENT_TYPE};
use axum::http::HeaderName;
use axum::response::{IntoResponse, Response};
use axum::Json;
use futures_util::StreamExt;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, warn};

use crate::errors::AppError;
use crate::models::{AnswersRequest, ChatRequest, GenerateRequest, Scope};
use crate::sse::{Frame, StreamEvent};
use crate::state::AppState;

/// Frames buffered between the turn task and the response body.
const STREAM_BUFFER: usize = 64;

const X_ACCEL_BUFFERING: HeaderName = HeaderName::from_static("x-accel-buffering");

/// POST `/chat/stream` — Server-Sent-Events answer for one chat turn.
///
/// Once the caller is identified the status is always 200: a malformed body,
/// an unknown model or a foreign session arrives as a single `error` event
/// with no `[DONE]`, exactly like a failure mid-stream.
/// Dropping the response body closes the channel, which cancels the turn.
pub async fn chat_stream_handler(
    State(state): State<AppState>,
    scope: Scope,
    body: Result<Json<ChatRequest>, JsonRejection>,
) -> Response {
    match body {
        Ok(Json(request)) => stream_turn(state, scope, request).await,
        Err(rejection) => error_stream(&AppError::Invalid(rejection.body_text())),
    }
}

/// POST `/answers` — one-shot question over the workspace, streamed like a chat turn
/// but never tied to a session.
pub async fn answers_handler(
    State(state): State<AppState>,
    scope: Scope,
    body: Result<Json<AnswersRequest>, JsonRejection>,
) -> Response {
    match body {
        Ok(Json(request)) => stream_turn(state, scope, request.into()).await,
        Err(rejection) => error_stream(&AppError::Invalid(rejection.body_text())),
    }
}

/// POST `/generate/stream` — editor action streamed as `chunk` events.
pub async fn generate_stream_handler(
    State(state): State<AppState>,
    _scope: Scope,
    body: Result<Json<GenerateRequest>, JsonRejection>,
) -> Response {
    let prepared = match body
        .map_err(|rejection| AppError::Invalid(rejection.body_text()))
        .and_then(|Json(request)| state.editor.prepare(request))
    {
        Ok(prepared) => prepared,
        Err(e) => return error_stream(&e),
    };

    let (tx, rx) = mpsc::channel::<Frame>(STREAM_BUFFER);
    let editor = state.editor.clone();
    tokio::spawn(async move { editor.stream(prepared, tx).await });
    sse_response(rx)
}

async fn stream_turn(state: AppState, scope: Scope, request: ChatRequest) -> Response {
    let turn = match state.orchestrator.prepare(request, &scope).await {
        Ok(turn) => turn,
        Err(e) => return error_stream(&e),
    };

    let (tx, rx) = mpsc::channel::<Frame>(STREAM_BUFFER);
    let orchestrator = state.orchestrator.clone();
    tokio::spawn(async move {
        let outcome = orchestrator.run_turn(turn, tx).await;
        debug!("Chat turn finished: {outcome:?}");
    });
    sse_response(rx)
}

/// A stream that carries one `error` event and ends without `[DONE]`.
fn error_stream(error: &AppError) -> Response {
    warn!("Stream rejected before start: {error}");
    let (tx, rx) = mpsc::channel::<Frame>(1);
    let _ = tx.try_send(Frame::Event(StreamEvent::Error(error.to_string())));
    sse_response(rx)
}

fn sse_response(rx: mpsc::Receiver<Frame>) -> Response {
    let body = Body::from_stream(ReceiverStream::new(rx).map(|frame| Ok::<_, Infallible>(frame.encode())));
    (
        [
            (CONTENT_TYPE, "text/event-stream"),
            (CACHE_CONTROL, "no-cache"),
            (X_ACCEL_BUFFERING, "no"),
        ],
        body,
    )
        .into_response()
}
