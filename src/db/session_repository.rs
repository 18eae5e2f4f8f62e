use chrono::Utc;
use sqlx::postgres::PgRow;
use sqlx::types::Json;
use sqlx::{PgPool, Row};
use tracing::error;

use crate::errors::AppError;
use crate::models::{Scope, Session};

const SESSION_COLUMNS: &str =
    "id, workspace_id, user_id, page_id, title, thread_id, selected_page_ids, created_at, updated_at";

#[derive(Clone)]
pub struct SessionRepository {
    pool: PgPool,
}

fn session_from_row(row: &PgRow) -> Result<Session, AppError> {
    let selected: Json<Vec<String>> = row
        .try_get("selected_page_ids")
        .map_err(|e| AppError::db_query("Failed to read selected_page_ids", e))?;
    Ok(Session {
        id: row.try_get("id").map_err(|e| AppError::db_query("Failed to read id", e))?,
        workspace_id: row
            .try_get("workspace_id")
            .map_err(|e| AppError::db_query("Failed to read workspace_id", e))?,
        user_id: row.try_get("user_id").map_err(|e| AppError::db_query("Failed to read user_id", e))?,
        page_id: row.try_get("page_id").map_err(|e| AppError::db_query("Failed to read page_id", e))?,
        title: row.try_get("title").map_err(|e| AppError::db_query("Failed to read title", e))?,
        thread_id: row.try_get("thread_id").map_err(|e| AppError::db_query("Failed to read thread_id", e))?,
        selected_page_ids: selected.0,
        created_at: row
            .try_get("created_at")
            .map_err(|e| AppError::db_query("Failed to read created_at", e))?,
        updated_at: row
            .try_get("updated_at")
            .map_err(|e| AppError::db_query("Failed to read updated_at", e))?,
    })
}

impl SessionRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn find_by_owner(&self, scope: &Scope, limit: i64) -> Result<Vec<Session>, AppError> {
        let rows = sqlx::query(&format!(
            "SELECT {SESSION_COLUMNS} FROM ai_sessions
             WHERE workspace_id = $1 AND user_id = $2
             ORDER BY updated_at DESC
             LIMIT $3"
        ))
        .bind(&scope.workspace_id)
        .bind(&scope.user_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| {
            error!("Failed to list sessions for user {}: {e}", scope.user_id);
            AppError::db_query("Failed to list sessions", e)
        })?;
        rows.iter().map(session_from_row).collect()
    }

    pub async fn find_by_id(&self, id: &str) -> Result<Option<Session>, AppError> {
        let row = sqlx::query(&format!("SELECT {SESSION_COLUMNS} FROM ai_sessions WHERE id = $1"))
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| {
                error!("Failed to find session {id}: {e}");
                AppError::db_query(format!("Failed to find session {id}"), e)
            })?;
        row.as_ref().map(session_from_row).transpose()
    }

    pub async fn save(&self, session: &Session) -> Result<Session, AppError> {
        sqlx::query(
            "INSERT INTO ai_sessions
                (id, workspace_id, user_id, page_id, title, thread_id, selected_page_ids, created_at, updated_at)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)",
        )
        .bind(&session.id)
        .bind(&session.workspace_id)
        .bind(&session.user_id)
        .bind(&session.page_id)
        .bind(&session.title)
        .bind(&session.thread_id)
        .bind(Json(&session.selected_page_ids))
        .bind(session.created_at)
        .bind(session.updated_at)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            error!("Failed to save session {}: {e}", session.id);
            AppError::db_query("Failed to save session", e)
        })?;
        Ok(session.clone())
    }

    pub async fn update(&self, session: &Session) -> Result<Session, AppError> {
        let result = sqlx::query(
            "UPDATE ai_sessions
             SET title = $2, thread_id = $3, selected_page_ids = $4, updated_at = $5
             WHERE id = $1",
        )
        .bind(&session.id)
        .bind(&session.title)
        .bind(&session.thread_id)
        .bind(Json(&session.selected_page_ids))
        .bind(session.updated_at)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            error!("Failed to update session {}: {e}", session.id);
            AppError::db_query("Failed to update session", e)
        })?;
        if result.rows_affected() == 0 {
            return Err(AppError::SessionNotFound { id: session.id.clone() });
        }
        Ok(session.clone())
    }

    pub async fn delete(&self, id: &str) -> Result<(), AppError> {
        sqlx::query("DELETE FROM ai_sessions WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(|e| {
                error!("Failed to delete session {id}: {e}");
                AppError::db_query("Failed to delete session", e)
            })?;
        Ok(())
    }

    pub async fn update_timestamp(&self, id: &str) -> Result<(), AppError> {
        sqlx::query("UPDATE ai_sessions SET updated_at = $1 WHERE id = $2")
            .bind(Utc::now())
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(|e| {
                error!("Failed to update session timestamp {id}: {e}");
                AppError::db_query("Failed to update session", e)
            })?;
        Ok(())
    }
}
