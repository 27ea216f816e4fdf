//! Bidirectional request/response channel with cancellation.

use std::collections::{HashMap, HashSet, VecDeque};
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use dashmap::DashMap;
use futures::FutureExt;
use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use super::error::ActorError;
use super::handler::{HandlerContext, MessageHandler};
use super::message::{ActorId, Message, MessageBody, MessageId, RemoteError};

/// Source of process-unique actor ids.
static NEXT_ACTOR_ID: AtomicU64 = AtomicU64::new(1);

type PendingSender = oneshot::Sender<Result<Value, ActorError>>;

/// A request waiting in the inbound queue.
#[derive(Debug)]
struct QueuedRequest {
    id: MessageId,
    origin: ActorId,
    message_type: String,
    payload: Value,
    expects_response: bool,
}

/// Point-in-time counters for an actor.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ActorStats {
    /// Requests sent with [`Actor::send_async`] or [`Actor::notify`].
    pub requests_sent: u64,
    /// Responses matched to a pending request.
    pub responses_received: u64,
    /// Outgoing requests cancelled before a response arrived.
    pub cancellations: u64,
    /// Responses dropped because their id was no longer pending.
    pub stale_responses: u64,
    /// Incoming requests handed to a handler.
    pub requests_handled: u64,
}

#[derive(Debug, Default)]
struct StatCounters {
    requests_sent: AtomicU64,
    responses_received: AtomicU64,
    cancellations: AtomicU64,
    stale_responses: AtomicU64,
    requests_handled: AtomicU64,
}

/// One end of a message channel to a parallel execution unit.
///
/// An actor both sends requests (awaiting their responses through
/// [`send_async`](Self::send_async)) and serves requests from the other side
/// through registered [`MessageHandler`]s.
///
/// Incoming requests are queued and drained one per scheduling turn by the
/// task started with [`start`](Self::start), so a burst of messages cannot
/// monopolize the runtime. Draining is FIFO.
///
/// Cancellation is best effort: a cancelled request is rejected locally at
/// once and a cancel message is sent to the remote side without waiting for
/// acknowledgment. Any response that still arrives for that id is discarded.
pub struct Actor {
    id: ActorId,
    name: String,
    outbound: mpsc::UnboundedSender<Bytes>,
    pending: DashMap<MessageId, PendingSender>,
    handlers: Mutex<HashMap<String, Arc<dyn MessageHandler>>>,
    queue: Mutex<VecDeque<QueuedRequest>>,
    /// Request ids seen from the remote side and not yet finished.
    active: Mutex<HashSet<MessageId>>,
    /// Cancellation tokens of requests whose handler is running.
    in_progress: DashMap<MessageId, CancellationToken>,
    next_message_id: AtomicU64,
    disposed: AtomicBool,
    shutdown: CancellationToken,
    stats: StatCounters,
}

impl Actor {
    /// Create an actor that writes encoded frames to `outbound`.
    pub fn new(name: impl Into<String>, outbound: mpsc::UnboundedSender<Bytes>) -> Arc<Self> {
        Arc::new(Self {
            id: ActorId(NEXT_ACTOR_ID.fetch_add(1, Ordering::Relaxed)),
            name: name.into(),
            outbound,
            pending: DashMap::new(),
            handlers: Mutex::new(HashMap::new()),
            queue: Mutex::new(VecDeque::new()),
            active: Mutex::new(HashSet::new()),
            in_progress: DashMap::new(),
            next_message_id: AtomicU64::new(1),
            disposed: AtomicBool::new(false),
            shutdown: CancellationToken::new(),
            stats: StatCounters::default(),
        })
    }

    /// Create two actors wired to each other and start both on the current
    /// runtime.
    pub fn linked_pair(
        a_name: impl Into<String>,
        b_name: impl Into<String>,
    ) -> (Arc<Self>, Arc<Self>) {
        let (a_tx, a_rx) = mpsc::unbounded_channel();
        let (b_tx, b_rx) = mpsc::unbounded_channel();
        let a = Self::new(a_name, a_tx);
        let b = Self::new(b_name, b_tx);
        a.start(b_rx);
        b.start(a_rx);
        (a, b)
    }

    pub fn id(&self) -> ActorId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// True once [`remove`](Self::remove) ran.
    pub fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::Acquire)
    }

    /// Number of outgoing requests awaiting a response.
    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    pub fn stats(&self) -> ActorStats {
        ActorStats {
            requests_sent: self.stats.requests_sent.load(Ordering::Relaxed),
            responses_received: self.stats.responses_received.load(Ordering::Relaxed),
            cancellations: self.stats.cancellations.load(Ordering::Relaxed),
            stale_responses: self.stats.stale_responses.load(Ordering::Relaxed),
            requests_handled: self.stats.requests_handled.load(Ordering::Relaxed),
        }
    }

    /// Register the handler for `message_type`, replacing any previous one.
    pub fn register_handler(&self, message_type: impl Into<String>, handler: impl MessageHandler) {
        self.handlers
            .lock()
            .insert(message_type.into(), Arc::new(handler));
    }

    /// Register an already shared handler.
    pub fn register_shared_handler(
        &self,
        message_type: impl Into<String>,
        handler: Arc<dyn MessageHandler>,
    ) {
        self.handlers.lock().insert(message_type.into(), handler);
    }

    /// Spawn the receive loop on the current runtime.
    ///
    /// The loop ends when `inbound` closes or the actor is removed; either
    /// way the actor is disposed on exit.
    pub fn start(self: &Arc<Self>, mut inbound: mpsc::UnboundedReceiver<Bytes>) -> JoinHandle<()> {
        let actor = Arc::clone(self);
        tokio::spawn(async move {
            loop {
                let has_work = !actor.queue.lock().is_empty();
                tokio::select! {
                    biased;
                    _ = actor.shutdown.cancelled() => break,
                    frame = inbound.recv() => match frame {
                        Some(frame) => actor.receive_frame(&frame),
                        None => break,
                    },
                    _ = std::future::ready(()), if has_work => {
                        actor.process_next();
                        tokio::task::yield_now().await;
                    }
                }
            }
            debug!(actor = %actor.id, name = %actor.name, "Actor receive loop stopped");
            actor.remove();
        })
    }

    /// Send a request and wait for its response.
    ///
    /// If `cancel` fires first, the remote side is asked to abort and this
    /// returns [`ActorError::Cancelled`]. Dropping the returned future has the
    /// same effect as cancelling it.
    pub async fn send_async(
        &self,
        message_type: &str,
        payload: Value,
        cancel: Option<CancellationToken>,
    ) -> Result<Value, ActorError> {
        if self.is_disposed() {
            return Err(ActorError::Disposed);
        }

        let id = self.next_message_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();
        self.pending.insert(id, tx);
        let mut guard = PendingGuard {
            actor: self,
            id,
            armed: true,
        };

        if let Err(e) = self.transmit(&Message::request(id, self.id, message_type, payload, true)) {
            guard.armed = false;
            self.pending.remove(&id);
            return Err(e);
        }
        self.stats.requests_sent.fetch_add(1, Ordering::Relaxed);
        trace!(actor = %self.id, id, message_type, "Request sent");

        let cancel = cancel.unwrap_or_default();
        let outcome = tokio::select! {
            biased;
            result = rx => {
                guard.armed = false;
                result.unwrap_or(Err(ActorError::Disposed))
            }
            _ = cancel.cancelled() => Err(ActorError::Cancelled),
        };
        drop(guard);
        outcome
    }

    /// Send a fire-and-forget request. The remote handler runs but no
    /// response is sent back.
    pub fn notify(&self, message_type: &str, payload: Value) -> Result<(), ActorError> {
        if self.is_disposed() {
            return Err(ActorError::Disposed);
        }
        let id = self.next_message_id.fetch_add(1, Ordering::Relaxed);
        self.transmit(&Message::request(id, self.id, message_type, payload, false))?;
        self.stats.requests_sent.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    /// Handle one decoded message from the remote side.
    ///
    /// Responses resolve the matching pending request; responses for unknown
    /// ids are dropped. Requests are queued for the receive loop. Cancel
    /// messages abort a queued or running request.
    pub fn receive(&self, message: Message) {
        if self.is_disposed() {
            return;
        }
        match message.body {
            MessageBody::Response { result } => match self.pending.remove(&message.id) {
                Some((_, tx)) => {
                    self.stats.responses_received.fetch_add(1, Ordering::Relaxed);
                    let _ = tx.send(result.map_err(ActorError::from));
                }
                None => {
                    self.stats.stale_responses.fetch_add(1, Ordering::Relaxed);
                    trace!(actor = %self.id, id = message.id, "Dropping response for unknown request");
                }
            },
            MessageBody::Cancel => self.cancel_incoming(message.id),
            MessageBody::Request {
                message_type,
                payload,
                expects_response,
            } => {
                if !self.active.lock().insert(message.id) {
                    debug!(actor = %self.id, id = message.id, "Ignoring duplicate request id");
                    return;
                }
                self.queue.lock().push_back(QueuedRequest {
                    id: message.id,
                    origin: message.origin_id,
                    message_type,
                    payload,
                    expects_response,
                });
            }
        }
    }

    /// Tear the channel down.
    ///
    /// Rejects every outstanding request with [`ActorError::Disposed`],
    /// aborts running handlers and drops registered handlers. Idempotent.
    pub fn remove(&self) {
        if self.disposed.swap(true, Ordering::AcqRel) {
            return;
        }
        self.shutdown.cancel();

        let ids: Vec<MessageId> = self.pending.iter().map(|entry| *entry.key()).collect();
        let rejected = ids.len();
        for id in ids {
            if let Some((_, tx)) = self.pending.remove(&id) {
                let _ = tx.send(Err(ActorError::Disposed));
            }
        }
        for entry in self.in_progress.iter() {
            entry.value().cancel();
        }
        self.in_progress.clear();
        self.queue.lock().clear();
        self.active.lock().clear();
        self.handlers.lock().clear();

        debug!(actor = %self.id, name = %self.name, rejected, "Actor removed");
    }

    fn receive_frame(&self, frame: &[u8]) {
        match Message::decode(frame) {
            Ok(message) => self.receive(message),
            Err(e) => warn!(actor = %self.id, error = %e, "Dropping undecodable frame"),
        }
    }

    fn cancel_incoming(&self, id: MessageId) {
        let removed = {
            let mut queue = self.queue.lock();
            let before = queue.len();
            queue.retain(|request| request.id != id);
            before != queue.len()
        };
        if removed {
            self.active.lock().remove(&id);
            trace!(actor = %self.id, id, "Cancelled queued request");
        } else if let Some((_, token)) = self.in_progress.remove(&id) {
            token.cancel();
            trace!(actor = %self.id, id, "Cancelled running request");
        }
    }

    /// Pop one queued request and start its handler.
    fn process_next(self: &Arc<Self>) {
        let Some(request) = self.queue.lock().pop_front() else {
            return;
        };
        let handler = self.handlers.lock().get(&request.message_type).cloned();
        let Some(handler) = handler else {
            warn!(actor = %self.id, message_type = %request.message_type, "No handler registered");
            self.finish(
                &request,
                Err(RemoteError::new(
                    super::message::ErrorKind::NoHandler,
                    request.message_type.clone(),
                )),
            );
            return;
        };

        let token = self.shutdown.child_token();
        self.in_progress.insert(request.id, token.clone());
        self.stats.requests_handled.fetch_add(1, Ordering::Relaxed);

        let ctx = HandlerContext {
            request_id: request.id,
            origin: request.origin,
            cancellation: token.clone(),
        };
        let future = handler.handle(request.payload.clone(), ctx);
        let actor = Arc::clone(self);
        tokio::spawn(async move {
            let outcome = tokio::select! {
                biased;
                _ = token.cancelled() => None,
                result = AssertUnwindSafe(future).catch_unwind() => Some(result),
            };
            actor.in_progress.remove(&request.id);
            match outcome {
                None => {
                    actor.active.lock().remove(&request.id);
                    trace!(actor = %actor.id, id = request.id, "Handler aborted");
                }
                Some(Ok(result)) => actor.finish(&request, result),
                Some(Err(_)) => {
                    warn!(actor = %actor.id, message_type = %request.message_type, "Handler panicked");
                    actor.finish(&request, Err(RemoteError::internal("handler panicked")));
                }
            }
        });
    }

    fn finish(&self, request: &QueuedRequest, result: Result<Value, RemoteError>) {
        self.active.lock().remove(&request.id);
        if !request.expects_response || self.is_disposed() {
            return;
        }
        if let Err(e) = self.transmit(&Message::response(request.id, self.id, result)) {
            debug!(actor = %self.id, id = request.id, error = %e, "Could not deliver response");
        }
    }

    fn transmit(&self, message: &Message) -> Result<(), ActorError> {
        let frame = message.encode()?;
        self.outbound
            .send(frame)
            .map_err(|_| ActorError::ChannelClosed)
    }
}

impl std::fmt::Debug for Actor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Actor")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("pending", &self.pending.len())
            .field("disposed", &self.is_disposed())
            .finish()
    }
}

/// Removes a pending request and notifies the remote side unless the request
/// completed normally.
struct PendingGuard<'a> {
    actor: &'a Actor,
    id: MessageId,
    armed: bool,
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        if self.actor.pending.remove(&self.id).is_some() {
            self.actor.stats.cancellations.fetch_add(1, Ordering::Relaxed);
            if !self.actor.is_disposed() {
                let _ = self.actor.transmit(&Message::cancel(self.id, self.actor.id));
            }
            trace!(actor = %self.actor.id, id = self.id, "Request cancelled");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::actor::message::ErrorKind;
    use serde_json::json;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    /// Flags when the handler future holding it is dropped.
    struct SetOnDrop(Arc<AtomicBool>);

    impl Drop for SetOnDrop {
        fn drop(&mut self) {
            self.0.store(true, Ordering::SeqCst);
        }
    }

    fn echo_pair() -> (Arc<Actor>, Arc<Actor>) {
        let (coordinator, worker) = Actor::linked_pair("coordinator", "worker");
        worker.register_handler("echo", |payload: Value, _ctx: HandlerContext| async move {
            Ok(payload)
        });
        (coordinator, worker)
    }

    #[tokio::test]
    async fn test_request_response() {
        let (coordinator, _worker) = echo_pair();
        let result = coordinator
            .send_async("echo", json!({"key": "2/0/2/1/1"}), None)
            .await
            .unwrap();
        assert_eq!(result, json!({"key": "2/0/2/1/1"}));
        assert_eq!(coordinator.pending_count(), 0);
        assert_eq!(coordinator.stats().responses_received, 1);
    }

    #[tokio::test]
    async fn test_handler_error_becomes_rejection() {
        let (coordinator, worker) = Actor::linked_pair("c", "w");
        worker.register_handler("fail", |_p: Value, _c: HandlerContext| async move {
            Err(RemoteError::parse("truncated payload"))
        });
        let err = coordinator.send_async("fail", Value::Null, None).await.unwrap_err();
        assert_eq!(
            err,
            ActorError::Remote {
                kind: ErrorKind::Parse,
                message: "truncated payload".to_string()
            }
        );
    }

    #[tokio::test]
    async fn test_panicking_handler_is_contained() {
        let (coordinator, worker) = Actor::linked_pair("c", "w");
        worker.register_handler("boom", |_p: Value, _c: HandlerContext| async move {
            if true {
                panic!("handler bug");
            }
            Ok(Value::Null)
        });
        let err = coordinator.send_async("boom", Value::Null, None).await.unwrap_err();
        assert!(matches!(err, ActorError::Remote { kind: ErrorKind::Internal, .. }));

        // The worker keeps serving afterwards.
        worker.register_handler("echo", |p: Value, _c: HandlerContext| async move { Ok(p) });
        assert_eq!(
            coordinator.send_async("echo", json!(1), None).await.unwrap(),
            json!(1)
        );
    }

    #[tokio::test]
    async fn test_missing_handler() {
        let (coordinator, _worker) = Actor::linked_pair("c", "w");
        let err = coordinator.send_async("nope", Value::Null, None).await.unwrap_err();
        assert_eq!(err, ActorError::NoHandler("nope".to_string()));
    }

    #[tokio::test]
    async fn test_cancel_rejects_and_aborts_remote() {
        let (coordinator, worker) = Actor::linked_pair("c", "w");
        let aborted = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&aborted);
        worker.register_handler("slow", move |_p: Value, _ctx: HandlerContext| {
            let signal = SetOnDrop(Arc::clone(&flag));
            async move {
                let _signal = signal;
                std::future::pending::<()>().await;
                Ok(Value::Null)
            }
        });

        let cancel = CancellationToken::new();
        let request = {
            let coordinator = Arc::clone(&coordinator);
            let cancel = cancel.clone();
            tokio::spawn(async move { coordinator.send_async("slow", Value::Null, Some(cancel)).await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        cancel.cancel();

        assert_eq!(request.await.unwrap(), Err(ActorError::Cancelled));
        assert_eq!(coordinator.pending_count(), 0);
        assert_eq!(coordinator.stats().cancellations, 1);

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(aborted.load(Ordering::SeqCst), "remote handler should be aborted");
    }

    #[tokio::test]
    async fn test_cancel_is_idempotent() {
        let (coordinator, _worker) = echo_pair();
        let cancel = CancellationToken::new();
        let result = coordinator
            .send_async("echo", json!("done"), Some(cancel.clone()))
            .await;
        assert_eq!(result, Ok(json!("done")));

        // Cancelling after resolution, twice, has no effect.
        cancel.cancel();
        cancel.cancel();
        assert_eq!(coordinator.stats().cancellations, 0);
        assert_eq!(coordinator.pending_count(), 0);
    }

    #[tokio::test]
    async fn test_late_response_is_dropped() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let actor = Actor::new("c", tx);

        let cancel = CancellationToken::new();
        cancel.cancel();
        let result = actor.send_async("loadTile", Value::Null, Some(cancel)).await;
        assert_eq!(result, Err(ActorError::Cancelled));

        let request = Message::decode(&rx.recv().await.unwrap()).unwrap();
        let cancel_msg = Message::decode(&rx.recv().await.unwrap()).unwrap();
        assert_eq!(cancel_msg.body, MessageBody::Cancel);
        assert_eq!(cancel_msg.id, request.id);

        actor.receive(Message::response(request.id, ActorId(99), Ok(json!("late"))));
        assert_eq!(actor.stats().stale_responses, 1);
        assert_eq!(actor.stats().responses_received, 0);
    }

    #[tokio::test]
    async fn test_remove_rejects_outstanding() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let actor = Actor::new("c", tx);

        let pending = {
            let actor = Arc::clone(&actor);
            tokio::spawn(async move { actor.send_async("loadTile", Value::Null, None).await })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(actor.pending_count(), 1);

        actor.remove();
        actor.remove();
        assert_eq!(pending.await.unwrap(), Err(ActorError::Disposed));
        assert_eq!(
            actor.send_async("loadTile", Value::Null, None).await,
            Err(ActorError::Disposed)
        );
    }

    #[tokio::test]
    async fn test_requests_drain_fifo() {
        let (coordinator, worker) = Actor::linked_pair("c", "w");
        let order = Arc::new(Mutex::new(Vec::new()));
        let seen = Arc::clone(&order);
        worker.register_handler("record", move |p: Value, _c: HandlerContext| {
            seen.lock().push(p.as_u64().unwrap_or_default());
            async move { Ok(Value::Null) }
        });

        for i in 0..20u64 {
            coordinator.notify("record", json!(i)).unwrap();
        }
        let done = coordinator.send_async("record", json!(20), None).await;
        assert!(done.is_ok());
        assert_eq!(*order.lock(), (0..=20).collect::<Vec<u64>>());
    }

    #[tokio::test]
    async fn test_duplicate_request_id_handled_once() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let worker = Actor::new("w", tx);
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        worker.register_handler("count", move |_p: Value, _c: HandlerContext| {
            counter.fetch_add(1, Ordering::SeqCst);
            async move { Ok(Value::Null) }
        });

        let (_in_tx, in_rx) = mpsc::unbounded_channel::<Bytes>();
        worker.receive(Message::request(5, ActorId(1), "count", Value::Null, true));
        worker.receive(Message::request(5, ActorId(1), "count", Value::Null, true));
        worker.start(in_rx);
        tokio::time::sleep(Duration::from_millis(20)).await;

        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
