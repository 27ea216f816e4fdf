//! Per-tile load errors.

use thiserror::Error;

use crate::actor::{ActorError, ErrorKind};

/// Why a tile failed to load.
///
/// Errors are contained to the tile they belong to; the source cache records
/// them in the tile's state and never propagates them out of `update`.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TileError {
    /// Transport failure. Retried with backoff when `retryable`.
    #[error("network error: {message}")]
    Network { message: String, retryable: bool },

    /// The payload could not be decoded. Never retried automatically.
    #[error("parse error: {0}")]
    Parse(String),

    /// The load was cancelled. Not an application error.
    #[error("load cancelled")]
    Cancelled,

    /// The channel to the worker was torn down mid-request.
    #[error("worker channel disposed")]
    Disposed,
}

impl TileError {
    pub fn network(message: impl Into<String>) -> Self {
        TileError::Network {
            message: message.into(),
            retryable: true,
        }
    }

    /// Eligible for automatic retry.
    pub fn is_retryable(&self) -> bool {
        matches!(self, TileError::Network { retryable: true, .. })
    }

    pub fn is_cancellation(&self) -> bool {
        matches!(self, TileError::Cancelled)
    }
}

impl From<ActorError> for TileError {
    fn from(err: ActorError) -> Self {
        match err {
            ActorError::Cancelled => TileError::Cancelled,
            ActorError::Disposed | ActorError::ChannelClosed => TileError::Disposed,
            ActorError::Serialization(message) => TileError::Parse(message),
            ActorError::NoHandler(message_type) => TileError::Network {
                message: format!("worker has no handler for {}", message_type),
                retryable: false,
            },
            ActorError::Remote { kind, message } => match kind {
                ErrorKind::Network => TileError::Network {
                    message,
                    retryable: true,
                },
                ErrorKind::Parse => TileError::Parse(message),
                ErrorKind::Cancelled => TileError::Cancelled,
                ErrorKind::Disposed => TileError::Disposed,
                ErrorKind::NoHandler | ErrorKind::Internal => TileError::Network {
                    message,
                    retryable: false,
                },
            },
        }
    }
}
