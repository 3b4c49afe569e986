//! Error types for the PharmaChat chat coordinator

use thiserror::Error;

use crate::types::SessionStatus;

/// Errors produced by the chat coordinator and its store adapters.
#[derive(Debug, Error)]
pub enum ChatError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid session transition: {from:?} -> {to:?}")]
    InvalidTransition {
        from: SessionStatus,
        to: SessionStatus,
    },

    #[error("Session already assigned to {agent_name}")]
    AlreadyAssigned { agent_name: String },

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Infrastructure error: {0}")]
    Infrastructure(String),
}

impl ChatError {
    /// Shorthand for a missing session.
    pub fn session_not_found(id: uuid::Uuid) -> Self {
        ChatError::NotFound(format!("session {id}"))
    }

    /// Shorthand for a missing message.
    pub fn message_not_found(id: uuid::Uuid) -> Self {
        ChatError::NotFound(format!("message {id}"))
    }
}

impl From<sqlx::Error> for ChatError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::RowNotFound => ChatError::NotFound("row".to_string()),
            other => ChatError::Infrastructure(other.to_string()),
        }
    }
}
