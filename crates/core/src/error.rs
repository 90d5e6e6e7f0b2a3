use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Resource not found: {0}")]
    ResourceNotFound(String),

    #[error("Invalid intent spec: {0}")]
    InvalidSpec(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Skill not bound to a message bus: {0}")]
    NotBound(String),

    #[error("Dialog error: {0}")]
    Dialog(String),

    #[error("Timeout: {0}")]
    Timeout(String),

    #[error("Handler error: {0}")]
    Handler(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
