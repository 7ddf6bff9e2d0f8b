//! Error types for listshare-hub

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Todo list not found")]
    NotFound,

    #[error("Invalid edit token")]
    Unauthorized,

    #[error("Invalid request: {0}")]
    Validation(String),

    /// The list changed underneath every reconciliation attempt.
    #[error("Todo list was modified concurrently, retry the update")]
    Conflict,

    #[error("WebSocket is disabled")]
    FeatureUnavailable,

    #[error("Store error: {0}")]
    Store(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Server error: {0}")]
    Server(String),
}

pub type Result<T> = std::result::Result<T, Error>;
