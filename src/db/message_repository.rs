use chrono::Utc;
use sqlx::postgres::PgRow;
use sqlx::types::Json;
use sqlx::{PgConnection, PgPool, Row};
use tracing::error;

use super::TurnRecord;
use crate::errors::AppError;
use crate::models::{Message, MessageRole, MessageType, Source, ToolCall, ToolStatus};

const MESSAGE_COLUMNS: &str = "id, session_id, role, content, thinking, sources, message_type, \
                               tool_calls, tool_call_id, tool_name, tool_status, created_at";

#[derive(Clone)]
pub struct MessageRepository {
    pool: PgPool,
}

fn message_from_row(row: &PgRow) -> Result<Message, AppError> {
    let role_str: String = row.try_get("role").map_err(|e| AppError::db_query("Failed to read role", e))?;
    let role = MessageRole::try_from(role_str)
        .map_err(|e| AppError::Unexpected(format!("Unknown message role: {e}")))?;
    let type_str: String = row
        .try_get("message_type")
        .map_err(|e| AppError::db_query("Failed to read message_type", e))?;
    let message_type = MessageType::try_from(type_str).map_err(AppError::Unexpected)?;
    let status_str: Option<String> = row
        .try_get("tool_status")
        .map_err(|e| AppError::db_query("Failed to read tool_status", e))?;
    let tool_status = status_str.map(ToolStatus::try_from).transpose().map_err(AppError::Unexpected)?;
    let sources: Json<Vec<Source>> =
        row.try_get("sources").map_err(|e| AppError::db_query("Failed to read sources", e))?;
    let tool_calls: Json<Vec<ToolCall>> = row
        .try_get("tool_calls")
        .map_err(|e| AppError::db_query("Failed to read tool_calls", e))?;

    Ok(Message {
        id: row.try_get("id").map_err(|e| AppError::db_query("Failed to read id", e))?,
        session_id: row
            .try_get("session_id")
            .map_err(|e| AppError::db_query("Failed to read session_id", e))?,
        role,
        content: row.try_get("content").map_err(|e| AppError::db_query("Failed to read content", e))?,
        thinking: row.try_get("thinking").map_err(|e| AppError::db_query("Failed to read thinking", e))?,
        sources: sources.0,
        message_type,
        tool_calls: tool_calls.0,
        tool_call_id: row
            .try_get("tool_call_id")
            .map_err(|e| AppError::db_query("Failed to read tool_call_id", e))?,
        tool_name: row.try_get("tool_name").map_err(|e| AppError::db_query("Failed to read tool_name", e))?,
        tool_status,
        created_at: row
            .try_get("created_at")
            .map_err(|e| AppError::db_query("Failed to read created_at", e))?,
    })
}

async fn insert(conn: &mut PgConnection, message: &Message) -> Result<(), AppError> {
    sqlx::query(
        "INSERT INTO ai_messages
            (id, session_id, role, content, thinking, sources, message_type,
             tool_calls, tool_call_id, tool_name, tool_status, created_at)
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)",
    )
    .bind(&message.id)
    .bind(&message.session_id)
    .bind(message.role.as_str())
    .bind(&message.content)
    .bind(&message.thinking)
    .bind(Json(&message.sources))
    .bind(message.message_type.as_str())
    .bind(Json(&message.tool_calls))
    .bind(&message.tool_call_id)
    .bind(&message.tool_name)
    .bind(message.tool_status.map(|s| s.as_str()))
    .bind(message.created_at)
    .execute(conn)
    .await
    .map_err(|e| {
        error!("Failed to save message {}: {e}", message.id);
        AppError::db_query("Failed to save message", e)
    })?;
    Ok(())
}

impl MessageRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn find_by_session_id(&self, session_id: &str) -> Result<Vec<Message>, AppError> {
        let rows = sqlx::query(&format!(
            "SELECT {MESSAGE_COLUMNS} FROM ai_messages
             WHERE session_id = $1
             ORDER BY created_at ASC"
        ))
        .bind(session_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| {
            error!("Failed to fetch messages for session {session_id}: {e}");
            AppError::db_query(format!("Failed to fetch messages for session {session_id}"), e)
        })?;
        rows.iter().map(message_from_row).collect()
    }

    pub async fn save(&self, message: &Message) -> Result<Message, AppError> {
        let mut conn = self
            .pool
            .acquire()
            .await
            .map_err(|e| AppError::db_query("Failed to acquire connection", e))?;
        insert(&mut conn, message).await?;
        Ok(message.clone())
    }

    /// Writes a completed turn atomically: the optional user message, the
    /// assistant reply and the session's pinned pages and timestamp.
    pub async fn save_turn(&self, turn: &TurnRecord) -> Result<(), AppError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| AppError::db_query("Failed to begin transaction", e))?;

        if let Some(user) = &turn.user {
            insert(&mut tx, user).await?;
        }
        insert(&mut tx, &turn.assistant).await?;

        sqlx::query("UPDATE ai_sessions SET selected_page_ids = $1, updated_at = $2 WHERE id = $3")
            .bind(Json(&turn.selected_page_ids))
            .bind(Utc::now())
            .bind(&turn.assistant.session_id)
            .execute(&mut *tx)
            .await
            .map_err(|e| {
                error!("Failed to update session {}: {e}", turn.assistant.session_id);
                AppError::db_query("Failed to update session", e)
            })?;

        tx.commit()
            .await
            .map_err(|e| AppError::db_query("Failed to commit turn", e))
    }

    /// Deletes `message_id` and everything created at or after it.
    /// Returns the number of removed messages.
    pub async fn delete_from(&self, session_id: &str, message_id: &str) -> Result<u64, AppError> {
        let anchor = sqlx::query("SELECT created_at FROM ai_messages WHERE id = $1 AND session_id = $2")
            .bind(message_id)
            .bind(session_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| AppError::db_query(format!("Failed to find message {message_id}"), e))?
            .ok_or_else(|| AppError::RecordNotFound {
                entity_type: "message".to_string(),
                id: message_id.to_string(),
            })?;
        let cutoff: chrono::DateTime<Utc> = anchor
            .try_get("created_at")
            .map_err(|e| AppError::db_query("Failed to read created_at", e))?;

        let result = sqlx::query("DELETE FROM ai_messages WHERE session_id = $1 AND created_at >= $2")
            .bind(session_id)
            .bind(cutoff)
            .execute(&self.pool)
            .await
            .map_err(|e| {
                error!("Failed to truncate session {session_id}: {e}");
                AppError::db_query("Failed to truncate messages", e)
            })?;
        Ok(result.rows_affected())
    }
}
