//! In-memory [`ChatStore`]. Not persistent across restarts; used when no
//! database is configured and in tests.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::RwLock;

use super::{ChatStore, TurnRecord, SESSION_LIST_LIMIT};
use crate::errors::AppError;
use crate::models::{Message, Scope, Session};

#[derive(Default)]
struct Tables {
    sessions: HashMap<String, Session>,
    messages: Vec<Message>,
}

#[derive(Default)]
pub struct MemoryStore {
    tables: RwLock<Tables>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ChatStore for MemoryStore {
    async fn create_session(&self, session: &Session) -> Result<Session, AppError> {
        self.tables.write().await.sessions.insert(session.id.clone(), session.clone());
        Ok(session.clone())
    }

    async fn find_session(&self, id: &str) -> Result<Option<Session>, AppError> {
        Ok(self.tables.read().await.sessions.get(id).cloned())
    }

    async fn list_sessions(&self, scope: &Scope) -> Result<Vec<Session>, AppError> {
        let tables = self.tables.read().await;
        let mut sessions: Vec<Session> =
            tables.sessions.values().filter(|s| s.is_owned_by(scope)).cloned().collect();
        sessions.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        sessions.truncate(SESSION_LIST_LIMIT as usize);
        Ok(sessions)
    }

    async fn update_session(&self, session: &Session) -> Result<Session, AppError> {
        let mut tables = self.tables.write().await;
        match tables.sessions.get_mut(&session.id) {
            Some(stored) => {
                *stored = session.clone();
                Ok(session.clone())
            }
            None => Err(AppError::SessionNotFound { id: session.id.clone() }),
        }
    }

    async fn delete_session(&self, id: &str) -> Result<(), AppError> {
        let mut tables = self.tables.write().await;
        tables.sessions.remove(id);
        tables.messages.retain(|m| m.session_id != id);
        Ok(())
    }

    async fn touch_session(&self, id: &str) -> Result<(), AppError> {
        if let Some(session) = self.tables.write().await.sessions.get_mut(id) {
            session.updated_at = Utc::now();
        }
        Ok(())
    }

    async fn insert_message(&self, message: &Message) -> Result<Message, AppError> {
        let mut tables = self.tables.write().await;
        if !tables.sessions.contains_key(&message.session_id) {
            return Err(AppError::Persistence(format!("session {} does not exist", message.session_id)));
        }
        tables.messages.push(message.clone());
        Ok(message.clone())
    }

    async fn find_messages(&self, session_id: &str) -> Result<Vec<Message>, AppError> {
        let tables = self.tables.read().await;
        let mut messages: Vec<Message> =
            tables.messages.iter().filter(|m| m.session_id == session_id).cloned().collect();
        // stable: insertion order breaks timestamp ties
        messages.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(messages)
    }

    async fn append_turn(&self, turn: &TurnRecord) -> Result<(), AppError> {
        let mut tables = self.tables.write().await;
        let session_id = &turn.assistant.session_id;
        let Some(session) = tables.sessions.get_mut(session_id) else {
            return Err(AppError::Persistence(format!("session {session_id} does not exist")));
        };
        session.selected_page_ids = turn.selected_page_ids.clone();
        session.updated_at = Utc::now();
        if let Some(user) = &turn.user {
            tables.messages.push(user.clone());
        }
        tables.messages.push(turn.assistant.clone());
        Ok(())
    }

    async fn truncate_from(&self, session_id: &str, message_id: &str) -> Result<u64, AppError> {
        let mut tables = self.tables.write().await;
        let cutoff = tables
            .messages
            .iter()
            .find(|m| m.id == message_id && m.session_id == session_id)
            .map(|m| m.created_at)
            .ok_or_else(|| AppError::RecordNotFound {
                entity_type: "message".to_string(),
                id: message_id.to_string(),
            })?;
        let before = tables.messages.len();
        tables
            .messages
            .retain(|m| m.session_id != session_id || m.created_at < cutoff);
        Ok((before - tables.messages.len()) as u64)
    }
}

#[cfg(test)]
mod tests {
    use chrono::Duration;

    use super::*;
    use crate::models::MessageRole;

    fn scope(user: &str) -> Scope {
        Scope { workspace_id: "ws".into(), user_id: user.into() }
    }

    async fn store_with_session() -> (MemoryStore, Session) {
        let store = MemoryStore::new();
        let session = Session::new("ws".into(), "u1".into(), None);
        store.create_session(&session).await.unwrap();
        (store, session)
    }

    fn message_at(session: &Session, role: MessageRole, content: &str, offset_secs: i64) -> Message {
        let mut m = Message::new(session.id.clone(), role, content.into());
        m.created_at = session.created_at + Duration::seconds(offset_secs);
        m
    }

    #[tokio::test]
    async fn lists_only_owned_sessions_newest_first() {
        let store = MemoryStore::new();
        let mut older = Session::new("ws".into(), "u1".into(), None);
        older.updated_at -= Duration::minutes(5);
        let newer = Session::new("ws".into(), "u1".into(), None);
        let foreign = Session::new("ws".into(), "u2".into(), None);
        for s in [&older, &newer, &foreign] {
            store.create_session(s).await.unwrap();
        }
        let listed = store.list_sessions(&scope("u1")).await.unwrap();
        let ids: Vec<&str> = listed.iter().map(|s| s.id.as_str()).collect();
        assert_eq!(ids, vec![newer.id.as_str(), older.id.as_str()]);
    }

    #[tokio::test]
    async fn append_turn_writes_both_messages_and_pages() {
        let (store, session) = store_with_session().await;
        let user = message_at(&session, MessageRole::User, "q", 1);
        let assistant = message_at(&session, MessageRole::Assistant, "a", 1);
        let turn = TurnRecord::new(Some(user), assistant, vec!["A".into()]);
        store.append_turn(&turn).await.unwrap();

        let messages = store.find_messages(&session.id).await.unwrap();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].role, MessageRole::User);
        let stored = store.find_session(&session.id).await.unwrap().unwrap();
        assert_eq!(stored.selected_page_ids, vec!["A".to_string()]);
    }

    #[tokio::test]
    async fn truncate_removes_anchor_and_later_messages() {
        let (store, session) = store_with_session().await;
        let first = message_at(&session, MessageRole::User, "one", 1);
        let second = message_at(&session, MessageRole::Assistant, "two", 2);
        let third = message_at(&session, MessageRole::User, "three", 3);
        for m in [&first, &second, &third] {
            store.insert_message(m).await.unwrap();
        }
        let removed = store.truncate_from(&session.id, &second.id).await.unwrap();
        assert_eq!(removed, 2);
        let left = store.find_messages(&session.id).await.unwrap();
        assert_eq!(left, vec![first]);
    }

    #[tokio::test]
    async fn truncate_unknown_message_is_not_found() {
        let (store, session) = store_with_session().await;
        let err = store.truncate_from(&session.id, "missing").await.unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn delete_cascades_to_messages() {
        let (store, session) = store_with_session().await;
        store
            .insert_message(&message_at(&session, MessageRole::User, "hi", 1))
            .await
            .unwrap();
        store.delete_session(&session.id).await.unwrap();
        assert!(store.find_session(&session.id).await.unwrap().is_none());
        assert!(store.find_messages(&session.id).await.unwrap().is_empty());
    }
}
