//! Structured error types for xp-session

use thiserror::Error;

pub type Result<T> = std::result::Result<T, ProfilerError>;

#[derive(Error, Debug)]
pub enum ProfilerError {
    #[error("Session with id '{0}' already exists")]
    SessionExists(String),

    #[error("Owner URI '{0}' is already bound to a session")]
    OwnerUriInUse(String),

    #[error("Session with id '{0}' not found")]
    SessionNotFound(String),

    #[error("Session for owner URI '{0}' not found")]
    OwnerUriNotFound(String),

    #[error("Session '{0}' is read-only and cannot be paused or resumed")]
    ReadOnlySession(String),

    #[error("Invalid filter: {0}")]
    InvalidFilter(String),

    #[error("{operation} failed: {message}")]
    Rpc {
        operation: &'static str,
        message: String,
    },

    #[error("Invalid configuration: {0}")]
    Config(#[from] toml::de::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl ProfilerError {
    pub fn rpc(operation: &'static str, message: impl Into<String>) -> Self {
        Self::Rpc {
            operation,
            message: message.into(),
        }
    }
}
