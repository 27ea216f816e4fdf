//! Wire format for actor messages.
//!
//! Every message crossing an actor boundary is encoded to JSON bytes. Tiles
//! are referred to by their string key only, never by shared reference, so
//! the remote side can report results without sharing object identity.

use std::fmt;

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Per-actor request id. Doubles as the fencing token for late responses.
pub type MessageId = u64;

/// Identity of the actor that originated a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ActorId(pub u64);

impl fmt::Display for ActorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "actor-{}", self.0)
    }
}

/// Error category carried in an error response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Transport failure while fetching. Retryable.
    Network,
    /// Payload could not be decoded. Not retried automatically.
    Parse,
    /// Request was cancelled.
    Cancelled,
    /// Channel torn down.
    Disposed,
    /// No handler for the message type.
    NoHandler,
    /// Anything else, including a panicking handler.
    Internal,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Network => "network",
            Self::Parse => "parse",
            Self::Cancelled => "cancelled",
            Self::Disposed => "disposed",
            Self::NoHandler => "no-handler",
            Self::Internal => "internal",
        };
        f.write_str(name)
    }
}

/// Error returned by a remote handler.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteError {
    pub kind: ErrorKind,
    pub message: String,
}

impl RemoteError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn network(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Network, message)
    }

    pub fn parse(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Parse, message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Internal, message)
    }
}

impl fmt::Display for RemoteError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)
    }
}

impl std::error::Error for RemoteError {}

/// Message body variants.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum MessageBody {
    /// A request to run the handler registered for `message_type`.
    Request {
        #[serde(rename = "type")]
        message_type: String,
        payload: Value,
        /// False for fire-and-forget notifications.
        expects_response: bool,
    },
    /// The outcome of a request with the same id.
    Response { result: Result<Value, RemoteError> },
    /// Abort the request with the same id.
    Cancel,
}

/// A message as it travels between actors.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub id: MessageId,
    pub origin_id: ActorId,
    #[serde(flatten)]
    pub body: MessageBody,
}

impl Message {
    pub fn request(
        id: MessageId,
        origin_id: ActorId,
        message_type: impl Into<String>,
        payload: Value,
        expects_response: bool,
    ) -> Self {
        Self {
            id,
            origin_id,
            body: MessageBody::Request {
                message_type: message_type.into(),
                payload,
                expects_response,
            },
        }
    }

    pub fn response(id: MessageId, origin_id: ActorId, result: Result<Value, RemoteError>) -> Self {
        Self {
            id,
            origin_id,
            body: MessageBody::Response { result },
        }
    }

    pub fn cancel(id: MessageId, origin_id: ActorId) -> Self {
        Self {
            id,
            origin_id,
            body: MessageBody::Cancel,
        }
    }

    /// Serialize for transport.
    pub fn encode(&self) -> Result<Bytes, serde_json::Error> {
        serde_json::to_vec(self).map(Bytes::from)
    }

    /// Deserialize a transported frame.
    pub fn decode(frame: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(frame)
    }
}
