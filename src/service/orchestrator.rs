//! One chat turn: retrieval, event emission, provider streaming and
//! persistence.
//!
//! Event order on the wire is always `sources`, `memory`, then any number of
//! `chunk`/`thinking` deltas, then either `[DONE]` or a single `error`.
//! A closed sink means the client went away: the provider stream is dropped
//! and nothing is persisted.

use std::sync::Arc;

use futures_util::StreamExt;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::config::ModelRoute;
use crate::db::{ChatStore, TurnRecord};
use crate::errors::AppError;
use crate::models::{ChatRequest, MemoryStatus, Message, MessageRole, Scope, Session, Source, TurnMessage};
use crate::prompt::{build_rag_system_prompt, Persona};
use crate::provider::{ChatProvider, ProviderDelta, ProviderRequest, ProviderRouter};
use crate::retrieval::{ContextRequest, Retriever};
use crate::sse::{Frame, StreamEvent};

const MAX_MESSAGE_LENGTH: usize = 8000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnOutcome {
    Completed,
    Failed,
    Cancelled,
}

/// A validated turn, ready to stream.
pub struct PreparedTurn {
    scope: Scope,
    session: Option<Session>,
    history: Vec<TurnMessage>,
    route: ModelRoute,
    provider: Arc<dyn ChatProvider>,
    thinking: bool,
    selected_page_ids: Vec<String>,
    web_search: bool,
    skip_user_persist: bool,
}

impl std::fmt::Debug for PreparedTurn {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PreparedTurn")
            .field("scope", &self.scope)
            .field("session", &self.session)
            .field("history", &self.history)
            .field("route", &self.route)
            .field("thinking", &self.thinking)
            .field("selected_page_ids", &self.selected_page_ids)
            .field("web_search", &self.web_search)
            .field("skip_user_persist", &self.skip_user_persist)
            .finish_non_exhaustive()
    }
}

struct Answer {
    content: String,
    thinking: String,
    sources: Vec<Source>,
}

#[derive(Clone)]
pub struct ChatOrchestrator {
    store: Arc<dyn ChatStore>,
    retriever: Retriever,
    router: ProviderRouter,
    memory_enabled: bool,
    history_limit: usize,
    persona: Persona,
}

async fn emit(sink: &mpsc::Sender<Frame>, event: StreamEvent) -> Result<(), AppError> {
    sink.send(Frame::Event(event)).await.map_err(|_| AppError::Cancelled)
}

impl ChatOrchestrator {
    pub fn new(
        store: Arc<dyn ChatStore>,
        retriever: Retriever,
        router: ProviderRouter,
        memory_enabled: bool,
        history_limit: usize,
    ) -> Self {
        Self { store, retriever, router, memory_enabled, history_limit, persona: Persona::default() }
    }

    pub fn with_persona(mut self, persona: Persona) -> Self {
        self.persona = persona;
        self
    }

    /// Checks everything that must be rejected before a stream starts.
    pub async fn prepare(&self, request: ChatRequest, scope: &Scope) -> Result<PreparedTurn, AppError> {
        let last = request
            .messages
            .last()
            .ok_or_else(|| AppError::EmptyField { field_name: "messages".to_string() })?;
        if last.role != MessageRole::User {
            return Err(AppError::Invalid("last message must come from the user".to_string()));
        }
        if last.content.trim().is_empty() {
            return Err(AppError::EmptyField { field_name: "content".to_string() });
        }
        if last.content.len() > MAX_MESSAGE_LENGTH {
            return Err(AppError::FieldTooLong {
                field_name: "content".to_string(),
                max_length: MAX_MESSAGE_LENGTH,
                actual_length: last.content.len(),
            });
        }

        let (route, provider) = self.router.route(request.model.as_deref())?;

        let session = match request.session_id.as_deref() {
            Some(id) => {
                let session = self
                    .store
                    .find_session(id)
                    .await?
                    .filter(|s| s.is_owned_by(scope))
                    .ok_or_else(|| AppError::SessionNotFound { id: id.to_string() })?;
                Some(session)
            }
            None => None,
        };

        let skip = request.messages.len().saturating_sub(self.history_limit.max(1));
        let history = request.messages.into_iter().skip(skip).collect();

        Ok(PreparedTurn {
            scope: scope.clone(),
            session,
            history,
            route,
            provider,
            thinking: request.thinking,
            selected_page_ids: request.selected_page_ids,
            web_search: request.is_web_search_enabled,
            skip_user_persist: request.skip_user_persist,
        })
    }

    /// Streams a prepared turn into `sink`. Returns once the turn completed,
    /// failed, or the sink was closed by the receiver.
    pub async fn run_turn(&self, turn: PreparedTurn, sink: mpsc::Sender<Frame>) -> TurnOutcome {
        match self.stream_answer(&turn, &sink).await {
            Ok(answer) => {
                self.persist(&turn, answer).await;
                if sink.send(Frame::Done).await.is_err() {
                    debug!("Client left before the end-of-stream marker");
                }
                TurnOutcome::Completed
            }
            Err(AppError::Cancelled) => {
                info!("Chat turn cancelled by client, nothing persisted");
                TurnOutcome::Cancelled
            }
            Err(e) => {
                error!("Chat turn failed: {e}");
                // the receiver may already be gone; nothing else to do then
                let _ = sink.send(Frame::Event(StreamEvent::Error(e.to_string()))).await;
                TurnOutcome::Failed
            }
        }
    }

    async fn stream_answer(&self, turn: &PreparedTurn, sink: &mpsc::Sender<Frame>) -> Result<Answer, AppError> {
        let retrieval = self
            .retriever
            .resolve(ContextRequest {
                scope: &turn.scope,
                history: &turn.history,
                selected_page_ids: &turn.selected_page_ids,
                web_search: turn.web_search,
            })
            .await?;
        debug!("Context resolved via {:?} with {} sources", retrieval.strategy, retrieval.sources.len());

        emit(sink, StreamEvent::Sources(retrieval.sources.clone())).await?;
        emit(
            sink,
            StreamEvent::Memory(MemoryStatus { enabled: self.memory_enabled, loaded: self.memory_enabled }),
        )
        .await?;

        let emit_thinking = turn.route.supports_thinking && turn.thinking;
        let request = ProviderRequest {
            model: turn.route.upstream_model.clone(),
            system_prompt: build_rag_system_prompt(&retrieval.sources, &self.persona),
            messages: turn.history.clone(),
            thinking: turn.route.supports_thinking.then_some(turn.thinking),
        };

        let mut stream = tokio::select! {
            biased;
            _ = sink.closed() => return Err(AppError::Cancelled),
            started = turn.provider.stream_chat(request) => started?,
        };

        let mut content = String::new();
        let mut thinking = String::new();
        loop {
            let next = tokio::select! {
                biased;
                _ = sink.closed() => return Err(AppError::Cancelled),
                next = stream.next() => next,
            };
            match next {
                None => break,
                Some(Ok(ProviderDelta::Text(text))) => {
                    content.push_str(&text);
                    emit(sink, StreamEvent::Chunk(text)).await?;
                }
                Some(Ok(ProviderDelta::Reasoning(text))) if emit_thinking => {
                    thinking.push_str(&text);
                    emit(sink, StreamEvent::Thinking(text)).await?;
                }
                Some(Ok(ProviderDelta::Reasoning(_))) => {}
                Some(Err(e)) => return Err(e),
            }
        }

        Ok(Answer { content, thinking, sources: retrieval.sources })
    }

    /// Failures here are logged only: the client already has the answer.
    async fn persist(&self, turn: &PreparedTurn, answer: Answer) {
        let Some(session) = &turn.session else {
            return;
        };
        let user = if turn.skip_user_persist {
            None
        } else {
            turn.history
                .last()
                .map(|m| Message::new(session.id.clone(), MessageRole::User, m.content.clone()))
        };
        let assistant = Message::new(session.id.clone(), MessageRole::Assistant, answer.content)
            .with_sources(answer.sources)
            .with_thinking(answer.thinking);
        let record = TurnRecord::new(user, assistant, turn.selected_page_ids.clone());
        if let Err(e) = self.store.append_turn(&record).await {
            warn!("Failed to persist turn for session {}: {e}", session.id);
        }
    }
}
