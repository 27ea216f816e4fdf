//! Request handlers registered on an actor.

use std::future::Future;
use std::pin::Pin;

use serde_json::Value;
use tokio_util::sync::CancellationToken;

use super::message::{ActorId, MessageId, RemoteError};

/// Boxed future returned by handlers.
pub type HandlerFuture = Pin<Box<dyn Future<Output = Result<Value, RemoteError>> + Send + 'static>>;

/// Context passed to a handler invocation.
#[derive(Debug, Clone)]
pub struct HandlerContext {
    /// Id of the request being handled.
    pub request_id: MessageId,
    /// Actor that sent the request.
    pub origin: ActorId,
    /// Triggered when the sender cancels the request or the actor is removed.
    /// Long-running handlers should stop early once it fires.
    pub cancellation: CancellationToken,
}

/// Handles one message type.
///
/// Handlers return a future so asynchronous work (fetching, decoding on a
/// blocking thread) can run without stalling the actor's queue. Failures are
/// reported as a [`RemoteError`] and travel back to the sender as an error
/// response; a panicking handler is reported as an internal error.
pub trait MessageHandler: Send + Sync + 'static {
    fn handle(&self, payload: Value, ctx: HandlerContext) -> HandlerFuture;
}

impl<F, Fut> MessageHandler for F
where
    F: Fn(Value, HandlerContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Value, RemoteError>> + Send + 'static,
{
    fn handle(&self, payload: Value, ctx: HandlerContext) -> HandlerFuture {
        Box::pin(self(payload, ctx))
    }
}
