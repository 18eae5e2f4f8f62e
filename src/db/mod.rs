//! Session and message persistence.

pub mod memory;
pub mod message_repository;
pub mod session_repository;

use async_trait::async_trait;
use chrono::Duration;
use sqlx::PgPool;

use crate::errors::AppError;
use crate::models::{Message, Scope, Session};

use self::message_repository::MessageRepository;
use self::session_repository::SessionRepository;

/// Maximum number of sessions returned by a listing.
pub const SESSION_LIST_LIMIT: i64 = 20;

/// Messages written together when a streamed turn completes.
#[derive(Debug, Clone)]
pub struct TurnRecord {
    /// `None` when the user message was already stored by the caller.
    pub user: Option<Message>,
    pub assistant: Message,
    pub selected_page_ids: Vec<String>,
}

impl TurnRecord {
    /// Builds a record whose assistant message sorts strictly after the
    /// user message, even when both are created within the same clock tick.
    pub fn new(user: Option<Message>, mut assistant: Message, selected_page_ids: Vec<String>) -> Self {
        if let Some(user) = &user {
            let floor = user.created_at + Duration::microseconds(1);
            if assistant.created_at < floor {
                assistant.created_at = floor;
            }
        }
        Self { user, assistant, selected_page_ids }
    }
}

#[async_trait]
pub trait ChatStore: Send + Sync {
    async fn create_session(&self, session: &Session) -> Result<Session, AppError>;
    async fn find_session(&self, id: &str) -> Result<Option<Session>, AppError>;
    /// Most recently updated first, at most [`SESSION_LIST_LIMIT`].
    async fn list_sessions(&self, scope: &Scope) -> Result<Vec<Session>, AppError>;
    async fn update_session(&self, session: &Session) -> Result<Session, AppError>;
    /// Deletes the session and all of its messages.
    async fn delete_session(&self, id: &str) -> Result<(), AppError>;
    async fn touch_session(&self, id: &str) -> Result<(), AppError>;

    async fn insert_message(&self, message: &Message) -> Result<Message, AppError>;
    /// Messages in creation order.
    async fn find_messages(&self, session_id: &str) -> Result<Vec<Message>, AppError>;
    /// Persists a completed turn in a single transaction.
    async fn append_turn(&self, turn: &TurnRecord) -> Result<(), AppError>;
    /// Removes `message_id` and every later message of the session.
    async fn truncate_from(&self, session_id: &str, message_id: &str) -> Result<u64, AppError>;
}

/// Postgres-backed [`ChatStore`].
#[derive(Clone)]
pub struct PgStore {
    sessions: SessionRepository,
    messages: MessageRepository,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self {
            sessions: SessionRepository::new(pool.clone()),
            messages: MessageRepository::new(pool),
        }
    }
}

#[async_trait]
impl ChatStore for PgStore {
    async fn create_session(&self, session: &Session) -> Result<Session, AppError> {
        self.sessions.save(session).await
    }

    async fn find_session(&self, id: &str) -> Result<Option<Session>, AppError> {
        self.sessions.find_by_id(id).await
    }

    async fn list_sessions(&self, scope: &Scope) -> Result<Vec<Session>, AppError> {
        self.sessions.find_by_owner(scope, SESSION_LIST_LIMIT).await
    }

    async fn update_session(&self, session: &Session) -> Result<Session, AppError> {
        self.sessions.update(session).await
    }

    async fn delete_session(&self, id: &str) -> Result<(), AppError> {
        self.sessions.delete(id).await
    }

    async fn touch_session(&self, id: &str) -> Result<(), AppError> {
        self.sessions.update_timestamp(id).await
    }

    async fn insert_message(&self, message: &Message) -> Result<Message, AppError> {
        self.messages.save(message).await
    }

    async fn find_messages(&self, session_id: &str) -> Result<Vec<Message>, AppError> {
        self.messages.find_by_session_id(session_id).await
    }

    async fn append_turn(&self, turn: &TurnRecord) -> Result<(), AppError> {
        self.messages.save_turn(turn).await
    }

    async fn truncate_from(&self, session_id: &str, message_id: &str) -> Result<u64, AppError> {
        self.messages.delete_from(session_id, message_id).await
    }
}
