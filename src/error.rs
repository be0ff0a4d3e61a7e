//! Error types for the notebook cache/search core.
//!
//! `CoreError` is the single sum type that crosses the `Core` boundary,
//! generalizing the retry/classification pattern the teacher uses in
//! `search::errors::SearchError` (`is_transient()`, `retry_delay()`) to the
//! whole crate. Leaf modules still define their own `thiserror` enums where
//! that's the more natural boundary (e.g. `search::errors::SearchError`);
//! those convert into `CoreError` with `#[from]`.

use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

pub type CoreResult<T> = Result<T, CoreError>;

#[derive(Debug, Error)]
pub enum CoreError {
    #[error("configuration invalid: {0}")]
    ConfigInvalid(String),

    #[error("unauthorized: access token missing or rejected")]
    Unauthorized,

    #[error("rate limited, retry after {retry_after:?}")]
    RateLimited { retry_after: Duration },

    #[error("transient failure: {cause}")]
    Transient { cause: String },

    #[error("permanent failure: {cause}")]
    Permanent { cause: String },

    #[error("not found: {0}")]
    NotFound(String),

    #[error("schema mismatch: on-disk schema version {found} is not the supported version {expected}")]
    SchemaMismatch { found: u32, expected: u32 },

    #[error("storage I/O failure at {path:?}: {cause}")]
    StorageIo { path: PathBuf, cause: String },

    #[error("search index unavailable (state: {state})")]
    IndexUnavailable { state: String },

    #[error("operation cancelled")]
    Cancelled,

    #[error("conflict on page {page_id}: {reason}")]
    Conflict { page_id: String, reason: String },

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl CoreError {
    /// Whether a caller should retry this error after backing off.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            CoreError::Transient { .. } | CoreError::RateLimited { .. }
        )
    }

    /// Suggested delay before retrying, if any.
    #[must_use]
    pub fn retry_delay(&self) -> Option<Duration> {
        match self {
            CoreError::RateLimited { retry_after } => Some(*retry_after),
            CoreError::Transient { .. } => Some(Duration::from_millis(500)),
            _ => None,
        }
    }

    /// Whether the enclosing operation must abort rather than isolate this
    /// failure to a single item (§7 propagation policy).
    #[must_use]
    pub fn aborts_enclosing_operation(&self) -> bool {
        matches!(
            self,
            CoreError::StorageIo { .. } | CoreError::SchemaMismatch { .. } | CoreError::Unauthorized
        )
    }

    pub fn storage_io(path: impl Into<PathBuf>, cause: impl std::fmt::Display) -> Self {
        CoreError::StorageIo {
            path: path.into(),
            cause: cause.to_string(),
        }
    }
}

impl From<std::io::Error> for CoreError {
    fn from(e: std::io::Error) -> Self {
        CoreError::StorageIo {
            path: PathBuf::new(),
            cause: e.to_string(),
        }
    }
}

impl From<sqlx::Error> for CoreError {
    fn from(e: sqlx::Error) -> Self {
        CoreError::StorageIo {
            path: PathBuf::new(),
            cause: e.to_string(),
        }
    }
}
