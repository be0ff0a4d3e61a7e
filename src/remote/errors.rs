//! Error taxonomy for the remote notebook API, generalizing the
//! `is_transient()`/retry-delay convention the teacher uses in
//! `search::errors::SearchError` to network-facing errors.

use std::time::Duration;
use thiserror::Error;

use crate::error::CoreError;

#[derive(Debug, Error)]
pub enum RemoteError {
    #[error("access token rejected or missing")]
    Unauthorized,

    #[error("resource not found: {0}")]
    NotFound(String),

    #[error("rate limited by remote API, retry after {retry_after:?}")]
    RateLimited { retry_after: Duration },

    #[error("transient network failure: {0}")]
    Transient(String),

    #[error("permanent failure (status {status}): {body}")]
    Permanent { status: u16, body: String },

    #[error("circuit open, remote API presumed unhealthy")]
    CircuitOpen,

    #[error("request body was not valid JSON: {0}")]
    Decode(#[from] serde_json::Error),
}

impl RemoteError {
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(self, RemoteError::RateLimited { .. } | RemoteError::Transient(_))
    }

    #[must_use]
    pub fn retry_delay(&self) -> Option<Duration> {
        match self {
            RemoteError::RateLimited { retry_after } => Some(*retry_after),
            RemoteError::Transient(_) => Some(Duration::from_millis(500)),
            _ => None,
        }
    }
}

impl From<reqwest::Error> for RemoteError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() || e.is_connect() {
            RemoteError::Transient(e.to_string())
        } else {
            RemoteError::Permanent {
                status: e.status().map_or(0, |s| s.as_u16()),
                body: e.to_string(),
            }
        }
    }
}

impl From<RemoteError> for CoreError {
    fn from(e: RemoteError) -> Self {
        match e {
            RemoteError::Unauthorized => CoreError::Unauthorized,
            RemoteError::NotFound(what) => CoreError::NotFound(what),
            RemoteError::RateLimited { retry_after } => CoreError::RateLimited { retry_after },
            RemoteError::Transient(cause) => CoreError::Transient { cause },
            RemoteError::CircuitOpen => CoreError::Transient {
                cause: "circuit breaker open".to_string(),
            },
            RemoteError::Permanent { status, body } => CoreError::Permanent {
                cause: format!("status {status}: {body}"),
            },
            RemoteError::Decode(e) => CoreError::Permanent {
                cause: format!("decode error: {e}"),
            },
        }
    }
}
