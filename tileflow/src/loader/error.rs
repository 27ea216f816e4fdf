//! Loader error types.

use thiserror::Error;

use crate::actor::{ErrorKind, RemoteError};

/// Errors while retrieving raw tile bytes.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FetchError {
    /// Transport failure.
    #[error("Request to {url} failed: {message}")]
    Request { url: String, message: String },

    /// Non-success HTTP status other than 404/204.
    #[error("HTTP {status} from {url}")]
    Status { url: String, status: u16 },

    #[error("Timed out fetching {url}")]
    Timeout { url: String },

    #[error("Fetch cancelled")]
    Cancelled,

    #[error("Failed to create HTTP client: {0}")]
    Client(String),
}

impl FetchError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            FetchError::Cancelled => ErrorKind::Cancelled,
            FetchError::Client(_) => ErrorKind::Internal,
            _ => ErrorKind::Network,
        }
    }
}

impl From<FetchError> for RemoteError {
    fn from(err: FetchError) -> Self {
        RemoteError::new(err.kind(), err.to_string())
    }
}

/// Errors turning raw bytes into a parsed tile.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    #[error("Invalid gzip payload: {0}")]
    Gzip(String),

    #[error("Malformed tile payload: {0}")]
    Malformed(String),
}

impl From<DecodeError> for RemoteError {
    fn from(err: DecodeError) -> Self {
        RemoteError::new(ErrorKind::Parse, err.to_string())
    }
}
