use thiserror::Error;

/// Top-level application error.
///
/// Mirrors the failure taxonomy of a chat turn: transport, provider,
/// retrieval, persistence, validation and cancellation. Cancellation is an
/// expected user action and is never rendered as an error to the client.
#[derive(Debug, Error)]
pub enum AppError {
    // ── Database errors ──────────────────────────────────────────────────────
    #[error("Database query failed: {message}")]
    DatabaseQueryFailed {
        message: String,
        #[source]
        source: sqlx::Error,
    },

    #[error("Persistence failed: {0}")]
    Persistence(String),

    #[error("Record not found: {entity_type} with id '{id}'")]
    RecordNotFound { entity_type: String, id: String },

    // ── Model / provider errors ──────────────────────────────────────────────
    #[error("Model service unavailable at {host}")]
    ProviderUnavailable { host: String },

    #[error("Provider error: {message}")]
    Provider { message: String },

    #[error("Transport error: {0}")]
    Transport(String),

    // ── Retrieval errors ─────────────────────────────────────────────────────
    #[error("Retrieval failed: {0}")]
    Retrieval(String),

    // ── Validation errors ────────────────────────────────────────────────────
    #[error("Field '{field_name}' cannot be empty")]
    EmptyField { field_name: String },

    #[error("Field '{field_name}' exceeds max length of {max_length} (actual: {actual_length})")]
    FieldTooLong { field_name: String, max_length: usize, actual_length: usize },

    #[error("Invalid request: {0}")]
    Invalid(String),

    #[error("Unknown model '{model_id}'")]
    UnknownModel { model_id: String },

    // ── Session errors ───────────────────────────────────────────────────────
    #[error("Session '{id}' not found")]
    SessionNotFound { id: String },

    // ── Control flow ─────────────────────────────────────────────────────────
    #[error("Stream cancelled by client")]
    Cancelled,

    // ── System errors ────────────────────────────────────────────────────────
    #[error("Unexpected error: {0}")]
    Unexpected(String),
}

impl AppError {
    pub fn db_query(message: impl Into<String>, source: sqlx::Error) -> Self {
        AppError::DatabaseQueryFailed { message: message.into(), source }
    }

    pub fn provider(message: impl Into<String>) -> Self {
        AppError::Provider { message: message.into() }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, AppError::SessionNotFound { .. } | AppError::RecordNotFound { .. })
    }

    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            AppError::EmptyField { .. }
                | AppError::FieldTooLong { .. }
                | AppError::Invalid(_)
                | AppError::UnknownModel { .. }
        )
    }

    pub fn is_agent_unavailable(&self) -> bool {
        matches!(self, AppError::ProviderUnavailable { .. })
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, AppError::Cancelled)
    }
}

impl From<reqwest::Error> for AppError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_connect() || err.is_timeout() {
            AppError::Transport(err.to_string())
        } else {
            AppError::provider(err.to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validation_predicate_covers_request_errors() {
        assert!(AppError::EmptyField { field_name: "messages".into() }.is_validation());
        assert!(AppError::UnknownModel { model_id: "gpt-x".into() }.is_validation());
        assert!(!AppError::Retrieval("index down".into()).is_validation());
    }

    #[test]
    fn cancellation_is_distinguished() {
        assert!(AppError::Cancelled.is_cancelled());
        assert!(!AppError::provider("boom").is_cancelled());
        assert_eq!(AppError::Cancelled.to_string(), "Stream cancelled by client");
    }

    #[test]
    fn not_found_predicate() {
        let err = AppError::SessionNotFound { id: "s1".into() };
        assert!(err.is_not_found());
        assert_eq!(err.to_string(), "Session 's1' not found");
    }
}
