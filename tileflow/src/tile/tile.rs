//! The coordinator's view of one tile.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::time::Instant;
use tracing::{debug, trace};

use super::{ExpiryData, ExpiryState, ParsedTile, TileError, TileState};
use crate::actor::Actor;
use crate::loader::protocol::{TileRef, REMOVE_TILE};
use crate::tile_id::OverscaledTileId;

/// Process-unique tile instance id. Identifies per-tile worker state.
pub type TileUid = u64;

static NEXT_TILE_UID: AtomicU64 = AtomicU64::new(1);

/// One loaded or loading unit of content.
///
/// Tiles are only mutated on the coordinator. The payload is shared behind
/// an [`Arc`] so the renderer can hold it across `update` calls; it is
/// replaced wholesale when a reload completes, never modified in place.
#[derive(Debug)]
pub struct Tile {
    id: OverscaledTileId,
    uid: TileUid,
    state: TileState,
    payload: Option<Arc<ParsedTile>>,
    expiry: ExpiryState,
    cacheable: bool,
    error: Option<TileError>,
    actor: Option<Arc<Actor>>,
    load_count: u32,
}

impl Tile {
    pub fn new(id: OverscaledTileId) -> Self {
        Self {
            id,
            uid: NEXT_TILE_UID.fetch_add(1, Ordering::Relaxed),
            state: TileState::Idle,
            payload: None,
            expiry: ExpiryState::default(),
            cacheable: true,
            error: None,
            actor: None,
            load_count: 0,
        }
    }

    pub fn id(&self) -> &OverscaledTileId {
        &self.id
    }

    pub fn uid(&self) -> TileUid {
        self.uid
    }

    pub fn state(&self) -> TileState {
        self.state
    }

    pub fn payload(&self) -> Option<&Arc<ParsedTile>> {
        self.payload.as_ref()
    }

    /// Error from the most recent failed load.
    pub fn error(&self) -> Option<&TileError> {
        self.error.as_ref()
    }

    /// Actor bound to the worker holding this tile's raw data.
    pub fn actor(&self) -> Option<&Arc<Actor>> {
        self.actor.as_ref()
    }

    /// Number of successful loads, including reloads.
    pub fn load_count(&self) -> u32 {
        self.load_count
    }

    pub fn expiry(&self) -> &ExpiryState {
        &self.expiry
    }

    /// The renderer may draw this tile.
    ///
    /// A reloading tile keeps drawing its previous payload until the new one
    /// arrives.
    pub fn is_renderable(&self) -> bool {
        self.payload.is_some() && matches!(self.state, TileState::Loaded | TileState::Reloading)
    }

    pub fn has_data(&self) -> bool {
        self.payload.is_some()
    }

    /// The last response allowed caching.
    pub fn is_cacheable(&self) -> bool {
        self.cacheable
    }

    /// Remaining time before this tile should be reloaded.
    pub fn expiry_timeout(&self) -> Option<Duration> {
        self.expiry.timeout(Instant::now())
    }

    /// Move the tile to another world copy (tile cache hit for a different wrap).
    pub(crate) fn rewrap(&mut self, wrap: i32) {
        self.id = self.id.unwrap_to(wrap);
    }

    pub(crate) fn bind_actor(&mut self, actor: Arc<Actor>) {
        self.actor = Some(actor);
    }

    /// Enter the in-flight state for a new load.
    pub(crate) fn mark_loading(&mut self) {
        self.state = match self.state {
            TileState::Idle | TileState::Unloaded => TileState::Loading,
            TileState::Loading => TileState::Loading,
            TileState::Loaded | TileState::Reloading | TileState::Errored => TileState::Reloading,
        };
        trace!(tile = %self.id, state = %self.state, "Tile load issued");
    }

    /// Return to a resting state after an in-flight load was abandoned.
    pub(crate) fn abandon_load(&mut self) {
        if !self.state.is_in_flight() {
            return;
        }
        self.state = if self.payload.is_some() {
            TileState::Loaded
        } else if self.error.is_some() {
            TileState::Errored
        } else {
            TileState::Idle
        };
    }

    /// Apply a successful load. Returns `true` if the content arrived expired.
    pub(crate) fn complete_load(&mut self, payload: ParsedTile, expiry: &ExpiryData) -> bool {
        self.payload = Some(Arc::new(payload));
        self.state = TileState::Loaded;
        self.error = None;
        self.cacheable = expiry.is_cacheable();
        self.load_count = self.load_count.saturating_add(1);
        self.expiry.apply(expiry, Utc::now(), Instant::now())
    }

    /// Apply a failed load. The tile stops being renderable.
    pub(crate) fn fail_load(&mut self, error: TileError) {
        self.payload = None;
        self.state = TileState::Errored;
        self.error = Some(error);
    }

    /// Release the payload and the worker-side state. Idempotent.
    pub fn unload(&mut self) {
        if self.state == TileState::Unloaded {
            return;
        }
        if let Some(actor) = self.actor.take() {
            let target = TileRef {
                uid: self.uid,
                key: self.id.key(),
            };
            match serde_json::to_value(&target) {
                Ok(payload) => {
                    // The worker may already be gone; nothing left to release then.
                    let _ = actor.notify(REMOVE_TILE, payload);
                }
                Err(e) => debug!(tile = %self.id, error = %e, "Failed to encode removeTile"),
            }
        }
        self.payload = None;
        self.expiry.clear();
        self.state = TileState::Unloaded;
        trace!(tile = %self.id, uid = self.uid, "Tile unloaded");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::actor::HandlerContext;
    use bytes::Bytes;

    fn tile() -> Tile {
        Tile::new(OverscaledTileId::new(3, 0, 3, 1, 2).unwrap())
    }

    fn payload() -> ParsedTile {
        ParsedTile::new(Bytes::from_static(b"tile"), 4, false)
    }

    #[test]
    fn test_uids_are_unique() {
        assert_ne!(tile().uid(), tile().uid());
    }

    #[test]
    fn test_load_lifecycle() {
        let mut t = tile();
        assert_eq!(t.state(), TileState::Idle);

        t.mark_loading();
        assert_eq!(t.state(), TileState::Loading);
        assert!(!t.is_renderable());

        t.complete_load(payload(), &ExpiryData::default());
        assert_eq!(t.state(), TileState::Loaded);
        assert!(t.is_renderable());

        t.mark_loading();
        assert_eq!(t.state(), TileState::Reloading);
        assert!(t.is_renderable(), "old payload stays renderable");
    }

    #[test]
    fn test_failure_is_not_renderable() {
        let mut t = tile();
        t.mark_loading();
        t.fail_load(TileError::network("refused"));
        assert_eq!(t.state(), TileState::Errored);
        assert!(!t.is_renderable());
        assert!(t.error().unwrap().is_retryable());

        t.mark_loading();
        assert_eq!(t.state(), TileState::Reloading);
        t.abandon_load();
        assert_eq!(t.state(), TileState::Errored);
    }

    #[test]
    fn test_abandon_without_data_returns_to_idle() {
        let mut t = tile();
        t.mark_loading();
        t.abandon_load();
        assert_eq!(t.state(), TileState::Idle);
    }

    #[test]
    fn test_no_store_response() {
        let mut t = tile();
        t.complete_load(payload(), &ExpiryData::new(Some("no-store".into()), None));
        assert!(!t.is_cacheable());
    }

    #[tokio::test]
    async fn test_unload_notifies_worker() {
        let (coordinator, worker) = Actor::linked_pair("coordinator", "worker");
        let removed = Arc::new(parking_lot::Mutex::new(Vec::new()));
        let seen = Arc::clone(&removed);
        worker.register_handler(REMOVE_TILE, move |payload: serde_json::Value, _ctx: HandlerContext| {
            let seen = Arc::clone(&seen);
            async move {
                seen.lock().push(payload["uid"].as_u64());
                Ok(serde_json::Value::Null)
            }
        });

        let mut t = tile();
        t.bind_actor(Arc::clone(&coordinator));
        t.complete_load(payload(), &ExpiryData::default());
        t.unload();
        t.unload();
        assert_eq!(t.state(), TileState::Unloaded);
        assert!(t.payload().is_none());

        for _ in 0..50 {
            if !removed.lock().is_empty() {
                break;
            }
            tokio::task::yield_now().await;
        }
        assert_eq!(*removed.lock(), vec![Some(t.uid())]);
    }
}
