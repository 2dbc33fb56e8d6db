//! Error types shared across the crate.

use thiserror::Error;

/// Failures of the local persistence layer (SQLite store, durable buffer).
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("lock poisoned: {0}")]
    Lock(String),

    #[error("background task failed: {0}")]
    Task(String),
}

/// Failures of a batch flush. All of them are transient from the buffer's point
/// of view: the events stay buffered and the next trigger retries.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SyncError {
    #[error("network error: {0}")]
    Network(String),

    #[error("server responded with HTTP {0}")]
    Status(u16),

    #[error("malformed response: {0}")]
    Malformed(String),

    #[error("store error: {0}")]
    Store(String),
}

impl From<StoreError> for SyncError {
    fn from(err: StoreError) -> Self {
        SyncError::Store(err.to_string())
    }
}

/// A study item that violates its shape constraints.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ItemError {
    #[error("item id '{0}' contains characters outside [A-Za-z0-9_-]")]
    InvalidId(String),

    #[error("item '{0}' has an empty prompt or answer")]
    Empty(String),

    #[error("multiple-choice item '{0}' needs at least 3 options")]
    TooFewOptions(String),

    #[error("multiple-choice item '{0}' has duplicate options")]
    DuplicateOptions(String),

    #[error("multiple-choice item '{0}' does not list its answer among the options")]
    AnswerNotAnOption(String),

    #[error("unknown CEFR level '{0}'")]
    UnknownLevel(String),
}

#[derive(Error, Debug)]
pub enum ExportError {
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("invalid item: {0}")]
    Item(#[from] ItemError),

    #[error("deck theme is empty after sanitizing")]
    EmptyTheme,
}

pub type StoreResult<T> = Result<T, StoreError>;
