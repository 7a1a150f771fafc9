use std::path::PathBuf;
use thiserror::Error;

/// Errors surfaced by the view counter service
#[derive(Debug, Error)]
pub enum ViewError {
    /// Type not in {movie, tv} after sanitization, or id empty after digit stripping
    #[error("Invalid type or ID")]
    InvalidArgument,

    #[error("Method not allowed")]
    MethodNotAllowed,

    #[error("storage failure: {0}")]
    Storage(#[from] StoreError),
}

/// Failures of the persistence layer behind a counter store
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("I/O error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("failed to encode view table: {0}")]
    Json(#[from] serde_json::Error),

    #[error("view count overflow for {0}")]
    Overflow(String),

    #[error("storage task did not complete: {0}")]
    Interrupted(String),
}

impl StoreError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        StoreError::Io {
            path: path.into(),
            source,
        }
    }
}
