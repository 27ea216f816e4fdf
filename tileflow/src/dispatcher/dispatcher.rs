//! Round-robin access to actors bound to the worker pool.

use std::ops::Deref;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use futures::future::try_join_all;
use serde_json::Value;
use tracing::debug;

use super::pool::WorkerPool;
use super::PoolError;
use crate::actor::{Actor, ActorError, MessageHandler};

static NEXT_DISPATCHER_ID: AtomicU64 = AtomicU64::new(1);

/// An actor together with the index of the worker unit it talks to.
#[derive(Debug, Clone)]
pub struct ActorHandle {
    unit: usize,
    actor: Arc<Actor>,
}

impl ActorHandle {
    /// Index of the bound worker unit.
    pub fn unit(&self) -> usize {
        self.unit
    }

    pub fn actor(&self) -> &Arc<Actor> {
        &self.actor
    }
}

impl Deref for ActorHandle {
    type Target = Actor;

    fn deref(&self) -> &Actor {
        &self.actor
    }
}

/// Hands out actors bound to a fixed set of worker units.
///
/// A dispatcher acquires the pool on creation and opens one actor channel
/// per unit. [`get_actor`](Self::get_actor) cycles through them so load is
/// spread evenly; the set of units never changes for the dispatcher's
/// lifetime. Must be created inside a Tokio runtime, which drives the
/// coordinator-side receive loops.
pub struct Dispatcher {
    owner: String,
    pool: Arc<WorkerPool>,
    actors: Vec<ActorHandle>,
    next: AtomicUsize,
    removed: AtomicBool,
}

impl Dispatcher {
    /// Acquire `pool` and connect one actor per unit.
    pub fn new(pool: Arc<WorkerPool>) -> Result<Self, PoolError> {
        let owner = format!("dispatcher-{}", NEXT_DISPATCHER_ID.fetch_add(1, Ordering::Relaxed));
        let units = pool.acquire(&owner)?;

        let mut actors: Vec<ActorHandle> = Vec::with_capacity(units.len());
        for unit in units.iter() {
            let connection = match unit.connect(&owner) {
                Ok(connection) => connection,
                Err(e) => {
                    for handle in &actors {
                        handle.actor.remove();
                    }
                    pool.release(&owner);
                    return Err(e);
                }
            };
            let actor = Actor::new(format!("{}:unit-{}", owner, unit.index()), connection.to_worker);
            actor.start(connection.from_worker);
            actors.push(ActorHandle {
                unit: unit.index(),
                actor,
            });
        }
        debug!(owner = %owner, actors = actors.len(), "Dispatcher created");

        Ok(Self {
            owner,
            pool,
            actors,
            next: AtomicUsize::new(0),
            removed: AtomicBool::new(false),
        })
    }

    /// Name this dispatcher holds the pool under.
    pub fn owner(&self) -> &str {
        &self.owner
    }

    /// Number of bound actors (equal to the pool size).
    pub fn size(&self) -> usize {
        self.actors.len()
    }

    /// Next actor in round-robin order.
    pub fn get_actor(&self) -> ActorHandle {
        let index = self.next.fetch_add(1, Ordering::Relaxed) % self.actors.len();
        self.actors[index].clone()
    }

    /// Every bound actor, in unit order.
    pub fn actors(&self) -> &[ActorHandle] {
        &self.actors
    }

    /// Register a handler for requests the workers send to the coordinator.
    pub fn register_handler(&self, message_type: &str, handler: Arc<dyn MessageHandler>) {
        for handle in &self.actors {
            handle
                .actor
                .register_shared_handler(message_type, Arc::clone(&handler));
        }
    }

    /// Send the same request to every unit and collect all responses.
    ///
    /// Fails with the first error; requests already sent are not retried.
    pub async fn broadcast(&self, message_type: &str, payload: Value) -> Result<Vec<Value>, ActorError> {
        if self.removed.load(Ordering::Acquire) {
            return Err(ActorError::Disposed);
        }
        try_join_all(
            self.actors
                .iter()
                .map(|handle| handle.actor.send_async(message_type, payload.clone(), None)),
        )
        .await
    }

    /// Tear down every actor and release the pool. Idempotent.
    ///
    /// Releasing the last hold stops the worker threads. Called from a plain
    /// thread this waits for them to exit; see
    /// [`WorkerUnit::shutdown`](super::WorkerUnit::shutdown).
    pub fn remove(&self) {
        if self.removed.swap(true, Ordering::AcqRel) {
            return;
        }
        for handle in &self.actors {
            handle.actor.remove();
        }
        self.pool.release(&self.owner);
        debug!(owner = %self.owner, "Dispatcher removed");
    }
}

impl Drop for Dispatcher {
    fn drop(&mut self) {
        self.remove();
    }
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("owner", &self.owner)
            .field("actors", &self.actors.len())
            .finish()
    }
}
