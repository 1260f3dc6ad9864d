//! Error types shared by every layer of the crate.

use std::time::Duration;
use thiserror::Error;

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;

/// Errors surfaced to callers of the client and cache layers.
///
/// `Clone` because a single deduplicated fetch hands the same outcome to
/// every waiter.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Operation cancelled")]
    Cancelled,

    #[error("Deadline exceeded")]
    DeadlineExceeded,

    #[error("Rate limiter closed")]
    LimiterClosed,

    #[error("Request failed: {message}")]
    Transport { message: String, timeout: bool },

    #[error("Rate limited by remote API (retry after {retry_after:?})")]
    RateLimited { retry_after: Option<Duration> },

    #[error("Server error {status}: {body}")]
    Server { status: u16, body: String },

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Bad request {status}: {body}")]
    BadRequest { status: u16, body: String },

    #[error("Failed to decode response: {0}")]
    Decode(String),

    #[error("Max retries exceeded after {attempts} attempts: {last_error}")]
    RetriesExhausted { attempts: u32, last_error: String },

    #[error("Cache error: {0}")]
    Cache(String),

    #[error("Cache unavailable: {0}")]
    CacheUnavailable(String),

    #[error("{0}")]
    Internal(String),
}

impl Error {
    /// Whether another attempt of the same request may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Error::Transport { .. } | Error::RateLimited { .. } | Error::Server { .. }
        )
    }

    /// Whether the error came from the caller's own scope rather than the
    /// remote side.
    pub fn is_cancellation(&self) -> bool {
        matches!(self, Error::Cancelled | Error::DeadlineExceeded)
    }
}

impl From<reqwest::Error> for Error {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            return Error::Decode(err.to_string());
        }
        Error::Transport {
            timeout: err.is_timeout(),
            message: err.to_string(),
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Decode(err.to_string())
    }
}

impl From<redis::RedisError> for Error {
    fn from(err: redis::RedisError) -> Self {
        Error::Cache(err.to_string())
    }
}
