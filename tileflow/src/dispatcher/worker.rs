//! A single parallel execution unit.
//!
//! Each unit is a named OS thread running its own current-thread Tokio
//! runtime. Coordinators reach it only through actor channels: every
//! [`connect`](WorkerUnit::connect) creates a worker-side [`Actor`] on the
//! unit's runtime and wires it to a fresh pair of byte channels.

use std::sync::Arc;
use std::thread::JoinHandle;

use bytes::Bytes;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use super::PoolError;
use crate::actor::Actor;

/// Installs message handlers on each worker-side actor.
///
/// Implementations hold immutable shared services (fetchers, decoders); any
/// per-connection mutable state must be created inside `install`.
pub trait WorkerSetup: Send + Sync + 'static {
    fn install(&self, actor: &Arc<Actor>, unit_index: usize);
}

enum UnitCommand {
    Connect {
        owner: String,
        inbound: mpsc::UnboundedReceiver<Bytes>,
        outbound: mpsc::UnboundedSender<Bytes>,
    },
    Shutdown,
}

/// Channel ends returned to the coordinator by [`WorkerUnit::connect`].
pub struct UnitConnection {
    /// Frames written here reach the worker-side actor.
    pub to_worker: mpsc::UnboundedSender<Bytes>,
    /// Frames sent by the worker-side actor.
    pub from_worker: mpsc::UnboundedReceiver<Bytes>,
}

/// Handle to a running worker thread.
pub struct WorkerUnit {
    index: usize,
    commands: mpsc::UnboundedSender<UnitCommand>,
    thread: Mutex<Option<JoinHandle<()>>>,
}

impl WorkerUnit {
    /// Spawn the worker thread.
    pub fn spawn(index: usize, setup: Arc<dyn WorkerSetup>) -> Result<Self, PoolError> {
        let (commands, mut rx) = mpsc::unbounded_channel::<UnitCommand>();

        let thread = std::thread::Builder::new()
            .name(format!("tileflow-worker-{}", index))
            .spawn(move || {
                let runtime = match tokio::runtime::Builder::new_current_thread()
                    .enable_all()
                    .build()
                {
                    Ok(runtime) => runtime,
                    Err(e) => {
                        error!(unit = index, error = %e, "Failed to build worker runtime");
                        return;
                    }
                };

                runtime.block_on(async move {
                    let mut actors: Vec<Arc<Actor>> = Vec::new();
                    while let Some(command) = rx.recv().await {
                        match command {
                            UnitCommand::Connect {
                                owner,
                                inbound,
                                outbound,
                            } => {
                                actors.retain(|actor| !actor.is_disposed());
                                let actor =
                                    Actor::new(format!("worker-{}:{}", index, owner), outbound);
                                setup.install(&actor, index);
                                actor.start(inbound);
                                debug!(unit = index, owner = %owner, actor = %actor.id(), "Worker connection opened");
                                actors.push(actor);
                            }
                            UnitCommand::Shutdown => break,
                        }
                    }
                    for actor in actors {
                        actor.remove();
                    }
                });
                debug!(unit = index, "Worker thread exiting");
            })?;

        Ok(Self {
            index,
            commands,
            thread: Mutex::new(Some(thread)),
        })
    }

    /// Position of this unit in its pool.
    pub fn index(&self) -> usize {
        self.index
    }

    /// True while the worker thread accepts connections.
    pub fn is_running(&self) -> bool {
        !self.commands.is_closed()
    }

    /// Open a new actor channel to this unit on behalf of `owner`.
    pub fn connect(&self, owner: &str) -> Result<UnitConnection, PoolError> {
        let (to_worker, inbound) = mpsc::unbounded_channel();
        let (outbound, from_worker) = mpsc::unbounded_channel();
        self.commands
            .send(UnitCommand::Connect {
                owner: owner.to_string(),
                inbound,
                outbound,
            })
            .map_err(|_| PoolError::Terminated)?;
        Ok(UnitConnection {
            to_worker,
            from_worker,
        })
    }

    /// Stop the worker thread. Idempotent.
    ///
    /// Outside a Tokio runtime this blocks until the thread has exited. Inside
    /// one the join is handed to a short-lived reaper thread so the calling
    /// runtime thread is never parked; [`is_running`](Self::is_running) turns
    /// false once the worker has drained its actors.
    pub fn shutdown(&self) {
        let _ = self.commands.send(UnitCommand::Shutdown);
        let Some(thread) = self.thread.lock().take() else {
            return;
        };
        let index = self.index;
        if tokio::runtime::Handle::try_current().is_err() {
            join_worker(index, thread);
            return;
        }
        let reaper = std::thread::Builder::new()
            .name(format!("tileflow-reaper-{}", index))
            .spawn(move || join_worker(index, thread));
        if let Err(e) = reaper {
            // The worker still exits on its own after the shutdown command.
            warn!(unit = index, error = %e, "Worker thread detached without join");
        }
    }
}

fn join_worker(index: usize, thread: JoinHandle<()>) {
    if thread.join().is_err() {
        error!(unit = index, "Worker thread panicked");
    } else {
        info!(unit = index, "Worker stopped");
    }
}

impl Drop for WorkerUnit {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl std::fmt::Debug for WorkerUnit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerUnit")
            .field("index", &self.index)
            .field("running", &self.is_running())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::actor::HandlerContext;
    use serde_json::{json, Value};
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::time::Duration;

    struct Echo;

    impl WorkerSetup for Echo {
        fn install(&self, actor: &Arc<Actor>, unit_index: usize) {
            actor.register_handler("whoami", move |_p: Value, _c: HandlerContext| async move {
                Ok(json!({
                    "unit": unit_index,
                    "thread": std::thread::current().name().map(str::to_string),
                }))
            });
        }
    }

    #[tokio::test]
    async fn test_connect_and_request() {
        let unit = WorkerUnit::spawn(2, Arc::new(Echo)).unwrap();
        let connection = unit.connect("test").unwrap();
        let actor = Actor::new("coordinator", connection.to_worker);
        actor.start(connection.from_worker);

        let reply = actor.send_async("whoami", Value::Null, None).await.unwrap();
        assert_eq!(reply["unit"], 2);
        assert_eq!(reply["thread"], "tileflow-worker-2");

        actor.remove();
        unit.shutdown();
        wait_stopped(&unit).await;
        assert!(matches!(unit.connect("late"), Err(PoolError::Terminated)));
    }

    #[test]
    fn test_shutdown_outside_runtime_joins() {
        let unit = WorkerUnit::spawn(0, Arc::new(Echo)).unwrap();
        unit.shutdown();
        assert!(!unit.is_running());
        unit.shutdown();
    }

    struct Stall {
        started: Arc<AtomicBool>,
    }

    impl WorkerSetup for Stall {
        fn install(&self, actor: &Arc<Actor>, _unit_index: usize) {
            let started = Arc::clone(&self.started);
            actor.register_handler("stall", move |_p: Value, _c: HandlerContext| {
                let started = Arc::clone(&started);
                async move {
                    started.store(true, Ordering::SeqCst);
                    std::thread::sleep(Duration::from_millis(400));
                    Ok(Value::Null)
                }
            });
        }
    }

    #[tokio::test]
    async fn test_shutdown_inside_runtime_does_not_block() {
        let started = Arc::new(AtomicBool::new(false));
        let unit = WorkerUnit::spawn(1, Arc::new(Stall { started: Arc::clone(&started) })).unwrap();
        let connection = unit.connect("test").unwrap();
        let actor = Actor::new("coordinator", connection.to_worker);
        actor.start(connection.from_worker);

        let request = {
            let actor = Arc::clone(&actor);
            tokio::spawn(async move { actor.send_async("stall", Value::Null, None).await })
        };
        while !started.load(Ordering::SeqCst) {
            tokio::time::sleep(Duration::from_millis(1)).await;
        }

        // The worker thread is busy for a while yet.
        let begin = std::time::Instant::now();
        unit.shutdown();
        assert!(begin.elapsed() < Duration::from_millis(200));

        wait_stopped(&unit).await;
        actor.remove();
        let _ = request.await;
    }

    async fn wait_stopped(unit: &WorkerUnit) {
        tokio::time::timeout(Duration::from_secs(5), async {
            while unit.is_running() {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("worker did not stop");
    }
}
