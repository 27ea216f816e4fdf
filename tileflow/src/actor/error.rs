//! Actor channel errors.

use thiserror::Error;

use super::message::{ErrorKind, RemoteError};

/// Errors surfaced to the caller of [`Actor::send_async`](super::Actor::send_async).
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ActorError {
    /// The request was cancelled before a response arrived.
    #[error("request cancelled")]
    Cancelled,

    /// The channel was torn down while the request was outstanding.
    #[error("actor disposed while request was outstanding")]
    Disposed,

    /// The remote side has no handler for the message type.
    #[error("no handler registered for message type '{0}'")]
    NoHandler(String),

    /// The remote handler failed.
    #[error("remote {kind} error: {message}")]
    Remote { kind: ErrorKind, message: String },

    /// A message could not be encoded or decoded.
    #[error("message serialization failed: {0}")]
    Serialization(String),

    /// The transport to the remote side is closed.
    #[error("actor channel closed")]
    ChannelClosed,
}

impl ActorError {
    /// True for outcomes that are not application failures.
    pub fn is_cancellation(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}

impl From<RemoteError> for ActorError {
    fn from(err: RemoteError) -> Self {
        match err.kind {
            ErrorKind::Cancelled => Self::Cancelled,
            ErrorKind::Disposed => Self::Disposed,
            ErrorKind::NoHandler => Self::NoHandler(err.message),
            kind => Self::Remote {
                kind,
                message: err.message,
            },
        }
    }
}

impl From<serde_json::Error> for ActorError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}
