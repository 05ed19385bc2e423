//! Error types for configuration and payload handling.

use thiserror::Error;

/// Result type alias for core operations.
pub type CoreResult<T> = Result<T, CoreError>;

/// Errors raised while loading configuration or (de)serializing payloads.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("failed to parse configuration: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("payload codec error: {0}")]
    Codec(#[from] serde_json::Error),

    #[error("truncated payload stream: {0}")]
    Truncated(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}
