use std::sync::Arc;

use chrono::Utc;
use tracing::{error, info, warn};

use crate::agent::{self, Completer};
use crate::db::ChatStore;
use crate::errors::AppError;
use crate::models::{
    ClarifyObjectiveResponse, CreateMessageRequest, CreateSessionRequest, Message, MessageRole, MessageType,
    Scope, Session, SessionWithMessages, UpdateSessionRequest,
};

const MAX_TITLE_LENGTH: usize = 255;
const MAX_MESSAGE_LENGTH: usize = 100_000;

/// Session and message operations on behalf of one workspace user.
/// Sessions owned by anyone else are reported as not found.
#[derive(Clone)]
pub struct ChatService {
    store: Arc<dyn ChatStore>,
    completer: Arc<dyn Completer>,
}

impl ChatService {
    pub fn new(store: Arc<dyn ChatStore>, completer: Arc<dyn Completer>) -> Self {
        Self { store, completer }
    }

    async fn owned_session(&self, scope: &Scope, id: &str) -> Result<Session, AppError> {
        self.store
            .find_session(id)
            .await?
            .filter(|s| s.is_owned_by(scope))
            .ok_or_else(|| AppError::SessionNotFound { id: id.to_string() })
    }

    pub async fn list_sessions(&self, scope: &Scope) -> Result<Vec<Session>, AppError> {
        self.store.list_sessions(scope).await
    }

    pub async fn create_session(&self, scope: &Scope, request: CreateSessionRequest) -> Result<Session, AppError> {
        let session = Session::new(scope.workspace_id.clone(), scope.user_id.clone(), request.page_id);
        let session = self.store.create_session(&session).await?;
        info!("Created session {}", session.id);
        Ok(session)
    }

    pub async fn get_session(&self, scope: &Scope, id: &str) -> Result<SessionWithMessages, AppError> {
        let session = self.owned_session(scope, id).await?;
        let messages = self.store.find_messages(id).await?;
        Ok(SessionWithMessages { session, messages })
    }

    pub async fn update_session(
        &self,
        scope: &Scope,
        id: &str,
        request: UpdateSessionRequest,
    ) -> Result<Session, AppError> {
        let mut session = self.owned_session(scope, id).await?;
        if let Some(title) = request.title {
            let title = title.trim();
            if title.is_empty() {
                return Err(AppError::EmptyField { field_name: "title".to_string() });
            }
            if title.chars().count() > MAX_TITLE_LENGTH {
                return Err(AppError::FieldTooLong {
                    field_name: "title".to_string(),
                    max_length: MAX_TITLE_LENGTH,
                    actual_length: title.chars().count(),
                });
            }
            session.title = title.to_string();
        }
        if let Some(thread_id) = request.thread_id {
            session.thread_id = Some(thread_id).filter(|t| !t.is_empty());
        }
        if let Some(page_ids) = request.selected_page_ids {
            session.selected_page_ids = page_ids;
        }
        session.updated_at = Utc::now();
        self.store.update_session(&session).await
    }

    pub async fn delete_session(&self, scope: &Scope, id: &str) -> Result<(), AppError> {
        self.owned_session(scope, id).await?;
        self.store.delete_session(id).await?;
        info!("Deleted session {id}");
        Ok(())
    }

    /// Appends a message as-is. Design mode stores agent transcripts through
    /// this, so tool messages may carry empty text.
    pub async fn add_message(
        &self,
        scope: &Scope,
        session_id: &str,
        request: CreateMessageRequest,
    ) -> Result<Message, AppError> {
        self.owned_session(scope, session_id).await?;
        if request.message_type == MessageType::Chat && request.content.trim().is_empty() {
            return Err(AppError::EmptyField { field_name: "content".to_string() });
        }
        if request.content.len() > MAX_MESSAGE_LENGTH {
            return Err(AppError::FieldTooLong {
                field_name: "content".to_string(),
                max_length: MAX_MESSAGE_LENGTH,
                actual_length: request.content.len(),
            });
        }
        let message = self.store.insert_message(&request.into_message(session_id.to_string())).await?;
        if let Err(e) = self.store.touch_session(session_id).await {
            error!("Failed to update session timestamp: {e}");
        }
        Ok(message)
    }

    pub async fn truncate_messages(&self, scope: &Scope, session_id: &str, message_id: &str) -> Result<u64, AppError> {
        self.owned_session(scope, session_id).await?;
        let removed = self.store.truncate_from(session_id, message_id).await?;
        info!("Truncated {removed} messages from session {session_id}");
        Ok(removed)
    }

    /// Names a session after its first user message. Sessions already renamed
    /// and model failures leave the title untouched.
    pub async fn auto_title(&self, scope: &Scope, id: &str) -> Result<Session, AppError> {
        let mut session = self.owned_session(scope, id).await?;
        if !session.has_default_title() {
            return Ok(session);
        }
        let messages = self.store.find_messages(id).await?;
        let Some(first) = messages.iter().find(|m| m.role == MessageRole::User) else {
            return Ok(session);
        };
        match agent::generate_title(self.completer.as_ref(), &first.content).await {
            Ok(title) => {
                session.title = title;
                session.updated_at = Utc::now();
                self.store.update_session(&session).await
            }
            Err(e) => {
                warn!("Auto-title failed for session {id}: {e}");
                Ok(session)
            }
        }
    }

    pub async fn clarify_objective(&self, message: &str) -> Result<ClarifyObjectiveResponse, AppError> {
        if message.trim().is_empty() {
            return Err(AppError::EmptyField { field_name: "message".to_string() });
        }
        let objective = agent::clarify_objective(self.completer.as_ref(), message).await;
        Ok(ClarifyObjectiveResponse { objective, original_message: message.to_string() })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::testing::ScriptedCompleter;
    use crate::db::memory::MemoryStore;

    fn scope(user: &str) -> Scope {
        Scope { workspace_id: "ws".into(), user_id: user.into() }
    }

    fn service(reply: &str) -> ChatService {
        ChatService::new(Arc::new(MemoryStore::new()), Arc::new(ScriptedCompleter::replying(reply)))
    }

    fn user_message(text: &str) -> CreateMessageRequest {
        serde_json::from_value(serde_json::json!({ "role": "user", "content": text })).unwrap()
    }

    #[tokio::test]
    async fn sessions_are_private_to_their_owner() {
        let svc = service("");
        let session = svc.create_session(&scope("u1"), CreateSessionRequest::default()).await.unwrap();
        assert_eq!(session.title, "New Chat");

        let err = svc.get_session(&scope("u2"), &session.id).await.unwrap_err();
        assert!(err.is_not_found());
        assert!(svc.delete_session(&scope("u2"), &session.id).await.is_err());
        assert!(svc.list_sessions(&scope("u2")).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn update_rejects_blank_title() {
        let svc = service("");
        let session = svc.create_session(&scope("u1"), CreateSessionRequest::default()).await.unwrap();
        let req = UpdateSessionRequest { title: Some("   ".into()), ..Default::default() };
        assert!(svc.update_session(&scope("u1"), &session.id, req).await.unwrap_err().is_validation());

        let req = UpdateSessionRequest {
            title: Some(" Roadmap ".into()),
            thread_id: Some("t-1".into()),
            selected_page_ids: None,
        };
        let updated = svc.update_session(&scope("u1"), &session.id, req).await.unwrap();
        assert_eq!(updated.title, "Roadmap");
        assert_eq!(updated.thread_id.as_deref(), Some("t-1"));
    }

    #[tokio::test]
    async fn auto_title_uses_first_user_message_once() {
        let svc = service("Quarterly Planning");
        let s = scope("u1");
        let session = svc.create_session(&s, CreateSessionRequest::default()).await.unwrap();
        svc.add_message(&s, &session.id, user_message("help me plan Q3")).await.unwrap();

        let titled = svc.auto_title(&s, &session.id).await.unwrap();
        assert_eq!(titled.title, "Quarterly Planning");

        let svc_again = ChatService::new(svc.store.clone(), Arc::new(ScriptedCompleter::replying("Other")));
        let unchanged = svc_again.auto_title(&s, &session.id).await.unwrap();
        assert_eq!(unchanged.title, "Quarterly Planning");
    }

    #[tokio::test]
    async fn auto_title_failure_keeps_default() {
        let store: Arc<dyn ChatStore> = Arc::new(MemoryStore::new());
        let svc = ChatService::new(store, Arc::new(ScriptedCompleter::failing("offline")));
        let s = scope("u1");
        let session = svc.create_session(&s, CreateSessionRequest::default()).await.unwrap();
        svc.add_message(&s, &session.id, user_message("hello")).await.unwrap();
        let result = svc.auto_title(&s, &session.id).await.unwrap();
        assert!(result.has_default_title());
    }

    #[tokio::test]
    async fn empty_chat_message_is_rejected_but_tool_use_is_not() {
        let svc = service("");
        let s = scope("u1");
        let session = svc.create_session(&s, CreateSessionRequest::default()).await.unwrap();
        assert!(svc.add_message(&s, &session.id, user_message(" ")).await.is_err());

        let tool_use: CreateMessageRequest = serde_json::from_value(serde_json::json!({
            "role": "assistant",
            "content": "",
            "messageType": "tool_use",
            "toolCalls": [{ "id": "c1", "name": "web_search", "args": {} }]
        }))
        .unwrap();
        let stored = svc.add_message(&s, &session.id, tool_use).await.unwrap();
        assert_eq!(stored.tool_calls.len(), 1);
    }
}
