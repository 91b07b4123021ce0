use thiserror::Error;

#[derive(Debug, Error)]
pub enum UrpmError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Media not found: {0}")]
    MediaNotFound(String),

    #[error("Invalid synthesis index: {0}")]
    InvalidSynthesis(String),

    #[error("Resolver error: {0}")]
    Resolver(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, UrpmError>;
