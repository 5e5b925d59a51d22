//! Error types for adforge

use thiserror::Error;
use uuid::Uuid;

#[derive(Error, Debug)]
pub enum AdforgeError {
    /// Socket-level failure. Drives reconnection.
    #[error("Transport error: {0}")]
    Transport(String),

    /// Credential exchange was malformed or rejected.
    #[error("Authentication error: {0}")]
    Authentication(String),

    /// Inbound message could not be understood.
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// The endpoint rejected one specific task.
    #[error("Task {task_uuid} failed: {message}")]
    Task { task_uuid: Uuid, message: String },

    /// The connection could not be made ready.
    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Request timeout: {0}")]
    Timeout(String),

    #[error("Client closed: {0}")]
    Closed(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
}

impl AdforgeError {
    /// Whether retrying the same operation later can succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            AdforgeError::Transport(_)
                | AdforgeError::Authentication(_)
                | AdforgeError::Timeout(_)
                | AdforgeError::Http(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, AdforgeError>;
