use thiserror::Error;

/// Common error type for GPIO-HA components.
#[derive(Debug, Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Zenoh error: {0}")]
    Zenoh(#[from] zenoh::Error),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Unknown entity: {0}")]
    UnknownEntity(String),

    #[error("Duplicate entity identity: {0}")]
    DuplicateEntity(String),
}

/// Result type alias using the GPIO-HA Error.
pub type Result<T> = std::result::Result<T, Error>;
