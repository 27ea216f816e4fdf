//! Actor messaging between the coordinator and parallel execution units.
//!
//! An [`Actor`] is one end of a bidirectional channel. It sends requests and
//! awaits responses, serves requests from the other end through registered
//! [`MessageHandler`]s, and supports best-effort cancellation. Every message
//! is serialized to bytes before crossing the channel, so no mutable state is
//! shared between the two sides.
//!
//! # Example
//!
//! ```ignore
//! use tileflow::actor::{Actor, HandlerContext};
//! use serde_json::{json, Value};
//!
//! let (coordinator, worker) = Actor::linked_pair("coordinator", "worker");
//! worker.register_handler("echo", |payload: Value, _ctx: HandlerContext| async move {
//!     Ok(payload)
//! });
//! let reply = coordinator.send_async("echo", json!({"ok": true}), None).await?;
//! ```

#[allow(clippy::module_inception)]
mod actor;
mod error;
mod handler;
mod message;

pub use actor::{Actor, ActorStats};
pub use error::ActorError;
pub use handler::{HandlerContext, HandlerFuture, MessageHandler};
pub use message::{ActorId, ErrorKind, Message, MessageBody, MessageId, RemoteError};
