//! # Error Types
//!
//! Every fallible operation in the crate returns [`Result<T>`], an alias over
//! [`VixivError`]. Variants map one-to-one onto the failure classes a caller
//! may want to treat differently: configuration mistakes, authentication,
//! rate limiting, transport failures and server-side application failures.
//!
//! No variant is retried internally; retry policy belongs to the caller.

use std::path::PathBuf;

use thiserror::Error;

/// Errors produced by the Vixiv client.
#[derive(Debug, Error)]
pub enum VixivError {
    /// Missing API key, unconfigured backend, invalid header value, ...
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Operation name that maps to no backend, or to more than one.
    #[error("Routing error: {0}")]
    Routing(String),

    /// HTTP 401. Fatal, retrying with the same key will not help.
    #[error("Invalid API key")]
    Authentication,

    /// HTTP 429. Safe to retry later.
    #[error("Rate limit exceeded. Please try again later.")]
    RateLimited,

    /// Any other non-2xx response.
    #[error("Request failed with status {status}: {message}")]
    Request {
        status: u16,
        message: String,
        traceback: Option<String>,
    },

    /// The server answered 2xx but flagged the call as failed.
    #[error("Server reported failure: {message}")]
    Application {
        message: String,
        traceback: Option<String>,
    },

    #[error("File not found: {0}")]
    FileNotFound(PathBuf),

    #[error("Unsupported file format for {path}: expected .{expected}")]
    UnsupportedFormat { path: PathBuf, expected: &'static str },

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Response body did not have the expected shape.
    #[error("Decode error: {0}")]
    Decode(String),

    /// Bucket upload failed after permission was granted.
    #[error("Storage error: {0}")]
    Storage(String),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Archive error: {0}")]
    Archive(#[from] zip::result::ZipError),
}

impl VixivError {
    /// Whether the caller may reasonably retry the same call later.
    pub fn is_retryable(&self) -> bool {
        match self {
            VixivError::RateLimited => true,
            VixivError::Request { status, .. } => *status >= 500,
            VixivError::Http(e) => e.is_timeout() || e.is_connect(),
            _ => false,
        }
    }

    /// Server-side traceback attached to the failure, if any.
    pub fn traceback(&self) -> Option<&str> {
        match self {
            VixivError::Request { traceback, .. } | VixivError::Application { traceback, .. } => {
                traceback.as_deref()
            }
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, VixivError>;
