//! The source cache state machine.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{broadcast, mpsc};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use super::coverage::{Coverage, Viewport};
use super::feature_state::{FeatureState, FeatureStateChange, FeatureStateStore};
use super::retain::{compute_retained, ResidentStatus};
use super::{SourceCacheConfig, SourceError, SourceEvent};
use crate::actor::Actor;
use crate::cache::TileCache;
use crate::dispatcher::Dispatcher;
use crate::loader::protocol::{
    LoadTileRequest, LoadTileResponse, TileRef, ABORT_TILE, LOAD_TILE, RELOAD_TILE,
};
use crate::tile::{Tile, TileError, TileState, TileUid};
use crate::tile_id::OverscaledTileId;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LoadKind {
    /// Fetch and decode.
    Load,
    /// Re-decode the worker's retained raw data.
    Reload,
}

/// The single load task allowed per tile.
struct InFlight {
    seq: u64,
    cancel: CancellationToken,
    uid: TileUid,
    actor: Arc<Actor>,
}

/// A load result marshaled back to the coordinator.
struct LoadCompletion {
    id: OverscaledTileId,
    seq: u64,
    result: Result<LoadTileResponse, TileError>,
}

#[derive(Debug, Clone, Copy)]
struct RetryState {
    attempts: u32,
    due: Instant,
}

/// Point-in-time source cache counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SourceCacheStats {
    /// Tiles in the retained set.
    pub retained: usize,
    pub renderable: usize,
    pub in_flight: usize,
    pub errored: usize,
    /// Tiles parked in the tile cache.
    pub cached: usize,
    pub cache_capacity: usize,
    pub loads_issued: u64,
    pub loads_completed: u64,
    pub loads_failed: u64,
    pub loads_cancelled: u64,
    /// Tiles restored from the tile cache instead of loaded.
    pub cache_hits: u64,
    /// Load results discarded because a newer load superseded them.
    pub stale_completions: u64,
    pub retries: u64,
}

/// Orchestrates tiles for one data source.
///
/// All state is owned by the coordinator task that calls the methods here.
/// Load tasks run on the worker pool; their results are queued and applied
/// at the start of the next [`update`](Self::update) (or by
/// [`poll_completions`](Self::poll_completions) /
/// [`next_event_ready`](Self::next_event_ready)), never concurrently.
///
/// Each tile has at most one load in flight. Starting a new load cancels the
/// previous one, and every result carries the sequence number of the load
/// that produced it so a late result from a cancelled load is discarded.
///
/// Methods that issue loads spawn onto the current Tokio runtime.
pub struct SourceCache {
    config: SourceCacheConfig,
    dispatcher: Arc<Dispatcher>,
    coverage: Arc<dyn Coverage>,
    tiles: HashMap<OverscaledTileId, Tile>,
    cache: TileCache<Tile>,
    in_flight: HashMap<OverscaledTileId, InFlight>,
    reload_at: HashMap<OverscaledTileId, Instant>,
    retries: HashMap<OverscaledTileId, RetryState>,
    deferred: HashMap<OverscaledTileId, LoadKind>,
    next_seq: u64,
    completions_tx: mpsc::UnboundedSender<LoadCompletion>,
    completions_rx: mpsc::UnboundedReceiver<LoadCompletion>,
    ideal: Vec<OverscaledTileId>,
    paused: bool,
    feature_state: FeatureStateStore,
    events: broadcast::Sender<SourceEvent>,
    counters: SourceCacheStats,
}

impl SourceCache {
    pub fn new(
        config: SourceCacheConfig,
        dispatcher: Arc<Dispatcher>,
        coverage: Arc<dyn Coverage>,
    ) -> Result<Self, SourceError> {
        config.validate()?;
        let (completions_tx, completions_rx) = mpsc::unbounded_channel();
        let (events, _) = broadcast::channel(config.event_capacity.max(1));
        let cache = TileCache::new(config.cache_capacity(0)).with_on_remove(|mut tile: Tile| tile.unload());

        info!(
            source = %config.source_id,
            url = %config.url_template,
            zoom = ?(config.min_zoom, config.max_zoom),
            workers = dispatcher.size(),
            "Source cache created"
        );

        Ok(Self {
            config,
            dispatcher,
            coverage,
            tiles: HashMap::new(),
            cache,
            in_flight: HashMap::new(),
            reload_at: HashMap::new(),
            retries: HashMap::new(),
            deferred: HashMap::new(),
            next_seq: 1,
            completions_tx,
            completions_rx,
            ideal: Vec::new(),
            paused: false,
            feature_state: FeatureStateStore::new(),
            events,
            counters: SourceCacheStats::default(),
        })
    }

    pub fn config(&self) -> &SourceCacheConfig {
        &self.config
    }

    pub fn source_id(&self) -> &str {
        &self.config.source_id
    }

    /// Subscribe to tile lifecycle events.
    pub fn subscribe(&self) -> broadcast::Receiver<SourceEvent> {
        self.events.subscribe()
    }

    /// Bring the retained set in line with `viewport`. Call once per frame.
    ///
    /// Never blocks: it applies finished loads, issues or cancels load tasks
    /// and returns.
    pub fn update(&mut self, viewport: &Viewport) {
        self.poll_completions();
        self.process_timers();

        let ideal = self
            .coverage
            .ideal_tiles(viewport, &self.config.coverage_params());
        self.cache.prune_expired();
        self.resize_cache(ideal.len());

        for id in &ideal {
            self.add_tile(*id);
        }
        self.promote_cached_ancestors(&ideal);

        let resident: HashMap<OverscaledTileId, ResidentStatus> = self
            .tiles
            .iter()
            .map(|(id, tile)| {
                (
                    *id,
                    ResidentStatus {
                        has_data: tile.is_renderable(),
                        errored: tile.state() == TileState::Errored,
                    },
                )
            })
            .collect();
        let retained = compute_retained(&ideal, &resident, &self.config.retain_params());

        let mut evicted: Vec<OverscaledTileId> = self
            .tiles
            .keys()
            .filter(|id| !retained.contains(*id))
            .copied()
            .collect();
        evicted.sort();
        for id in evicted {
            self.remove_tile(id);
        }
        for id in &retained {
            self.add_tile(*id);
        }

        self.issue_pending_loads(&ideal);
        trace!(
            source = %self.config.source_id,
            ideal = ideal.len(),
            retained = self.tiles.len(),
            in_flight = self.in_flight.len(),
            "Source updated"
        );
        self.ideal = ideal;
    }

    /// Apply every load result received so far. Returns how many changed a
    /// tile; stale results are discarded and not counted.
    pub fn poll_completions(&mut self) -> usize {
        let mut applied = 0;
        while let Ok(completion) = self.completions_rx.try_recv() {
            if self.apply_completion(completion) {
                applied += 1;
            }
        }
        applied
    }

    /// Wait until a load result changes a tile, then apply it and any others
    /// queued. Returns how many were applied.
    ///
    /// With nothing in flight this sleeps until the earliest reload or retry
    /// timer and fires it. A return of 0 means no result can arrive without
    /// a call from the owner: the source is paused, or it has no loads and no
    /// timers left. Loops polling until [`loaded`](Self::loaded) should stop
    /// on 0.
    pub async fn next_event_ready(&mut self) -> usize {
        loop {
            let applied = self.poll_completions();
            if applied > 0 {
                return applied;
            }
            if !self.in_flight.is_empty() {
                let Some(first) = self.completions_rx.recv().await else {
                    return 0;
                };
                if self.apply_completion(first) {
                    return 1 + self.poll_completions();
                }
                continue;
            }
            if self.paused {
                return 0;
            }
            let Some(due) = self.next_load_timer() else {
                return 0;
            };
            tokio::time::sleep_until(due).await;
            self.process_timers();
            if self.in_flight.is_empty() {
                return 0;
            }
        }
    }

    /// Stop issuing new loads. Loads already in flight continue.
    pub fn pause(&mut self) {
        if !self.paused {
            self.paused = true;
            debug!(source = %self.config.source_id, "Source paused");
        }
    }

    /// Resume issuing loads, including any requested while paused.
    pub fn resume(&mut self) {
        if !self.paused {
            return;
        }
        self.paused = false;
        debug!(source = %self.config.source_id, deferred = self.deferred.len(), "Source resumed");

        self.poll_completions();
        let mut deferred: Vec<(OverscaledTileId, LoadKind)> = self.deferred.drain().collect();
        deferred.sort_by_key(|(id, _)| *id);
        for (id, kind) in deferred {
            self.start_load(id, kind);
        }
        self.process_timers();
        let ideal = self.ideal.clone();
        self.issue_pending_loads(&ideal);
    }

    pub fn is_paused(&self) -> bool {
        self.paused
    }

    /// Re-decode every retained tile and drop everything cached.
    ///
    /// Loaded tiles stay renderable while reloading. Errored tiles are left
    /// to their retry schedule.
    pub fn reload(&mut self) {
        self.cache.reset();
        let mut ids: Vec<OverscaledTileId> = self
            .tiles
            .iter()
            .filter(|(_, tile)| !matches!(tile.state(), TileState::Errored | TileState::Idle))
            .map(|(id, _)| *id)
            .collect();
        ids.sort();
        debug!(source = %self.config.source_id, tiles = ids.len(), "Reloading source");
        for id in ids {
            self.start_load(id, LoadKind::Reload);
        }
    }

    /// Reload one retained tile. Cached copies in other world copies are
    /// dropped. Returns `false` if the tile is not retained.
    pub fn reload_tile(&mut self, id: &OverscaledTileId) -> bool {
        if !self.tiles.contains_key(id) {
            return false;
        }
        let wrapped = id.wrapped();
        self.cache.filter(|tile| tile.id().wrapped() != wrapped);
        self.start_load(*id, LoadKind::Reload);
        true
    }

    /// Manually retry an errored tile now. Returns `false` if the tile is
    /// not retained or not errored.
    pub fn retry_tile(&mut self, id: &OverscaledTileId) -> bool {
        let errored = self
            .tiles
            .get(id)
            .is_some_and(|tile| tile.state() == TileState::Errored);
        if !errored {
            return false;
        }
        self.retries.remove(id);
        self.counters.retries += 1;
        self.start_load(*id, LoadKind::Load);
        true
    }

    /// Point the source at new tile data. Cached tiles are dropped and every
    /// retained tile is fetched again.
    pub fn set_url_template(&mut self, url_template: impl Into<String>) -> Result<(), SourceError> {
        let mut config = self.config.clone();
        config.url_template = url_template.into();
        config.validate()?;
        self.config = config;

        self.cache.reset();
        let mut ids: Vec<OverscaledTileId> = self
            .tiles
            .iter()
            .filter(|(_, tile)| tile.state() != TileState::Idle)
            .map(|(id, _)| *id)
            .collect();
        ids.sort();
        for id in ids {
            self.retries.remove(&id);
            self.start_load(id, LoadKind::Load);
        }
        Ok(())
    }

    /// Unload every tile, retained and cached.
    pub fn clear_tiles(&mut self) {
        let mut ids: Vec<OverscaledTileId> = self.tiles.keys().copied().collect();
        ids.sort();
        for id in ids {
            self.cancel_in_flight(&id, true);
            if let Some(mut tile) = self.tiles.remove(&id) {
                tile.unload();
            }
            self.emit(SourceEvent::TileEvicted { id, cached: false });
        }
        self.reload_at.clear();
        self.retries.clear();
        self.deferred.clear();
        self.cache.reset();
    }

    /// True when every retained tile has settled and nothing is in flight.
    pub fn loaded(&self) -> bool {
        self.in_flight.is_empty() && self.tiles.values().all(|tile| tile.state().is_settled())
    }

    pub fn get_tile(&self, id: &OverscaledTileId) -> Option<&Tile> {
        self.tiles.get(id)
    }

    /// Ids of all retained tiles, in tile id order.
    pub fn get_ids(&self) -> Vec<OverscaledTileId> {
        let mut ids: Vec<OverscaledTileId> = self.tiles.keys().copied().collect();
        ids.sort();
        ids
    }

    /// Ids of the renderable tiles, in tile id order.
    pub fn get_visible_coordinates(&self) -> Vec<OverscaledTileId> {
        self.get_renderable_tiles()
            .into_iter()
            .map(|tile| *tile.id())
            .collect()
    }

    /// Snapshot of the tiles the renderer may draw, in tile id order.
    pub fn get_renderable_tiles(&self) -> Vec<&Tile> {
        let mut tiles: Vec<&Tile> = self
            .tiles
            .values()
            .filter(|tile| tile.is_renderable())
            .collect();
        tiles.sort_by(|a, b| a.id().cmp(b.id()));
        tiles
    }

    /// Ideal tiles computed by the last update, nearest first.
    pub fn ideal_tiles(&self) -> &[OverscaledTileId] {
        &self.ideal
    }

    pub fn tile_cache(&self) -> &TileCache<Tile> {
        &self.cache
    }

    /// Earliest moment a timer (expiry reload, retry, cache TTL) is due.
    pub fn next_wakeup(&self) -> Option<Instant> {
        self.next_load_timer()
            .into_iter()
            .chain(self.cache.next_expiry())
            .min()
    }

    fn next_load_timer(&self) -> Option<Instant> {
        self.reload_at
            .values()
            .copied()
            .chain(self.retries.values().map(|retry| retry.due))
            .min()
    }

    pub fn stats(&self) -> SourceCacheStats {
        SourceCacheStats {
            retained: self.tiles.len(),
            renderable: self.tiles.values().filter(|t| t.is_renderable()).count(),
            in_flight: self.in_flight.len(),
            errored: self
                .tiles
                .values()
                .filter(|t| t.state() == TileState::Errored)
                .count(),
            cached: self.cache.len(),
            cache_capacity: self.cache.max_size(),
            ..self.counters
        }
    }

    pub fn set_feature_state(&mut self, layer: &str, feature_id: &str, state: FeatureState) {
        self.feature_state.set(layer, feature_id, state);
    }

    pub fn get_feature_state(&self, layer: &str, feature_id: &str) -> FeatureState {
        self.feature_state.get(layer, feature_id)
    }

    pub fn remove_feature_state(&mut self, layer: &str, feature_id: Option<&str>, key: Option<&str>) {
        self.feature_state.remove(layer, feature_id, key);
    }

    /// Coalesced feature state changes since the last call.
    pub fn take_feature_state_changes(&mut self) -> Vec<FeatureStateChange> {
        self.feature_state.take_changes()
    }

    fn emit(&self, event: SourceEvent) {
        // No subscribers is fine.
        let _ = self.events.send(event);
    }

    fn resize_cache(&mut self, ideal_count: usize) {
        let capacity = self.config.cache_capacity(ideal_count);
        if capacity != self.cache.max_size() {
            self.cache.set_max_size(capacity);
            self.emit(SourceEvent::CacheResized { max_size: capacity });
        }
    }

    /// Make `id` resident: reuse a cached tile if one exists, else create an
    /// idle tile for the next load pass.
    fn add_tile(&mut self, id: OverscaledTileId) {
        if self.tiles.contains_key(&id) {
            return;
        }
        if let Some(mut tile) = self.cache.get_and_remove(&id) {
            if *tile.id() != id {
                tile.rewrap(id.wrap());
            }
            if let Some(timeout) = tile.expiry_timeout() {
                self.reload_at.insert(id, Instant::now() + timeout);
            }
            self.counters.cache_hits += 1;
            trace!(tile = %id, "Tile restored from cache");
            self.tiles.insert(id, tile);
            return;
        }
        self.tiles.insert(id, Tile::new(id));
    }

    /// Bring cached ancestors of data-less ideal tiles back so they can
    /// stand in while the ideal tiles load.
    fn promote_cached_ancestors(&mut self, ideal: &[OverscaledTileId]) {
        let params = self.config.retain_params();
        for id in ideal {
            if self.tiles.get(id).is_some_and(Tile::is_renderable) {
                continue;
            }
            let min_covering = id
                .overscaled_z()
                .saturating_sub(params.max_overzoom)
                .max(params.min_zoom);
            let mut z = id.overscaled_z();
            while z > min_covering {
                z -= 1;
                let Ok(parent) = id.scaled_to(z) else {
                    break;
                };
                if self.tiles.get(&parent).is_some_and(Tile::is_renderable) {
                    break;
                }
                if !self.tiles.contains_key(&parent) && self.cache.has(&parent) {
                    self.add_tile(parent);
                    break;
                }
            }
        }
    }

    /// Take a tile out of the retained set, parking it in the tile cache if
    /// it has cacheable data.
    fn remove_tile(&mut self, id: OverscaledTileId) {
        let Some(mut tile) = self.tiles.remove(&id) else {
            return;
        };
        if self.cancel_in_flight(&id, true) {
            tile.abandon_load();
        }
        self.reload_at.remove(&id);
        self.retries.remove(&id);
        self.deferred.remove(&id);

        let cached = tile.is_renderable() && tile.is_cacheable();
        if cached {
            let ttl = match (tile.expiry_timeout(), self.config.cache_ttl) {
                (Some(expiry), Some(limit)) => Some(expiry.min(limit)),
                (expiry, limit) => expiry.or(limit),
            };
            self.cache.add(id, tile, ttl);
        } else {
            tile.unload();
        }
        trace!(tile = %id, cached, "Tile evicted");
        self.emit(SourceEvent::TileEvicted { id, cached });
    }

    /// Start loads for idle tiles, ideal tiles first in coverage order.
    fn issue_pending_loads(&mut self, ideal: &[OverscaledTileId]) {
        if self.paused {
            return;
        }
        let rank: HashMap<&OverscaledTileId, usize> =
            ideal.iter().enumerate().map(|(i, id)| (id, i)).collect();
        let mut pending: Vec<OverscaledTileId> = self
            .tiles
            .iter()
            .filter(|(_, tile)| matches!(tile.state(), TileState::Idle | TileState::Unloaded))
            .map(|(id, _)| *id)
            .collect();
        pending.sort_by_key(|id| (rank.get(id).copied().unwrap_or(usize::MAX), *id));
        for id in pending {
            self.start_load(id, LoadKind::Load);
        }
    }

    /// Issue expiry reloads and retries that are due.
    fn process_timers(&mut self) {
        if self.paused {
            return;
        }
        let now = Instant::now();

        let mut due: Vec<OverscaledTileId> = self
            .reload_at
            .iter()
            .filter(|(_, at)| **at <= now)
            .map(|(id, _)| *id)
            .collect();
        due.sort();
        for id in due {
            self.reload_at.remove(&id);
            if self
                .tiles
                .get(&id)
                .is_some_and(|tile| tile.state() == TileState::Loaded)
            {
                debug!(tile = %id, "Tile expired, reloading");
                self.start_load(id, LoadKind::Load);
            }
        }

        let mut due: Vec<OverscaledTileId> = self
            .retries
            .iter()
            .filter(|(_, retry)| retry.due <= now)
            .map(|(id, _)| *id)
            .collect();
        due.sort();
        for id in due {
            if self
                .tiles
                .get(&id)
                .is_some_and(|tile| tile.state() == TileState::Errored)
            {
                debug!(tile = %id, "Retrying errored tile");
                self.counters.retries += 1;
                self.start_load(id, LoadKind::Load);
            }
        }
    }

    /// Issue a load task for a retained tile, superseding any in flight.
    fn start_load(&mut self, id: OverscaledTileId, kind: LoadKind) -> bool {
        if !self.tiles.contains_key(&id) {
            return false;
        }
        if self.paused {
            self.deferred.insert(id, kind);
            return false;
        }
        self.cancel_in_flight(&id, false);
        self.reload_at.remove(&id);

        let Some(tile) = self.tiles.get_mut(&id) else {
            return false;
        };
        let existing = tile.actor().filter(|actor| !actor.is_disposed()).cloned();
        let actor = match existing {
            Some(actor) => actor,
            None => {
                let actor = Arc::clone(self.dispatcher.get_actor().actor());
                tile.bind_actor(Arc::clone(&actor));
                actor
            }
        };

        let uid = tile.uid();
        let request = LoadTileRequest {
            uid,
            key: id.key(),
            url: id
                .canonical()
                .url(&self.config.url_template, self.config.scheme),
            source: self.config.source_id.clone(),
        };
        let payload = match serde_json::to_value(&request) {
            Ok(payload) => payload,
            Err(e) => {
                tile.fail_load(TileError::Parse(e.to_string()));
                return false;
            }
        };
        tile.mark_loading();

        let seq = self.next_seq;
        self.next_seq += 1;
        let cancel = CancellationToken::new();
        let message_type = match kind {
            LoadKind::Load => LOAD_TILE,
            LoadKind::Reload => RELOAD_TILE,
        };

        let task_actor = Arc::clone(&actor);
        let token = cancel.clone();
        let completions = self.completions_tx.clone();
        tokio::spawn(async move {
            let result = match task_actor.send_async(message_type, payload, Some(token)).await {
                Ok(value) => serde_json::from_value::<LoadTileResponse>(value)
                    .map_err(|e| TileError::Parse(format!("invalid load response: {}", e))),
                Err(e) => Err(TileError::from(e)),
            };
            // The receiver only closes when the source cache is dropped.
            let _ = completions.send(LoadCompletion { id, seq, result });
        });

        self.in_flight.insert(
            id,
            InFlight {
                seq,
                cancel,
                uid,
                actor,
            },
        );
        self.counters.loads_issued += 1;
        trace!(tile = %id, seq, kind = ?kind, url = %request.url, "Load issued");
        true
    }

    /// Cancel the in-flight load for `id`, optionally telling the worker to
    /// abort it. Returns `false` if nothing was in flight.
    fn cancel_in_flight(&mut self, id: &OverscaledTileId, send_abort: bool) -> bool {
        let Some(flight) = self.in_flight.remove(id) else {
            return false;
        };
        flight.cancel.cancel();
        if send_abort {
            let target = TileRef {
                uid: flight.uid,
                key: id.key(),
            };
            if let Ok(payload) = serde_json::to_value(&target) {
                // Best effort: the worker may already be gone.
                let _ = flight.actor.notify(ABORT_TILE, payload);
            }
        }
        self.counters.loads_cancelled += 1;
        trace!(tile = %id, seq = flight.seq, "Load cancelled");
        true
    }

    /// Apply one load result. Returns `false` for stale results.
    fn apply_completion(&mut self, completion: LoadCompletion) -> bool {
        let LoadCompletion { id, seq, result } = completion;
        match self.in_flight.get(&id) {
            Some(flight) if flight.seq == seq => {
                self.in_flight.remove(&id);
            }
            _ => {
                self.counters.stale_completions += 1;
                trace!(tile = %id, seq, "Discarding stale load result");
                return false;
            }
        }
        let Some(tile) = self.tiles.get_mut(&id) else {
            return false;
        };

        let event = match result {
            Ok(response) => {
                let reloaded = tile.load_count() > 0;
                let expired = tile.complete_load(response.tile, &response.expiry);
                if expired {
                    debug!(
                        tile = %id,
                        count = tile.expiry().expired_request_count(),
                        "Tile content arrived expired"
                    );
                }
                if let Some(timeout) = tile.expiry_timeout() {
                    self.reload_at.insert(id, Instant::now() + timeout);
                }
                self.retries.remove(&id);
                self.counters.loads_completed += 1;
                if reloaded {
                    SourceEvent::TileReloaded { id }
                } else {
                    SourceEvent::TileLoaded { id }
                }
            }
            Err(TileError::Cancelled) => {
                tile.abandon_load();
                return true;
            }
            Err(error) => {
                tile.fail_load(error.clone());
                self.counters.loads_failed += 1;
                let retry_in = if error.is_retryable() {
                    let now = Instant::now();
                    let retry = self.retries.entry(id).or_insert(RetryState {
                        attempts: 0,
                        due: now,
                    });
                    retry.attempts = retry.attempts.saturating_add(1);
                    let delay = self.config.retry.delay(retry.attempts);
                    retry.due = now + delay;
                    Some(delay)
                } else {
                    None
                };
                warn!(tile = %id, error = %error, retry_in = ?retry_in, "Tile load failed");
                SourceEvent::TileErrored {
                    id,
                    error,
                    retry_in,
                }
            }
        };
        self.emit(event);
        true
    }
}

impl Drop for SourceCache {
    fn drop(&mut self) {
        self.clear_tiles();
    }
}

impl std::fmt::Debug for SourceCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SourceCache")
            .field("source", &self.config.source_id)
            .field("retained", &self.tiles.len())
            .field("in_flight", &self.in_flight.len())
            .field("cached", &self.cache.len())
            .field("paused", &self.paused)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatcher::{WorkerPool, WorkerPoolConfig};
    use crate::loader::{GzipDecoder, MemoryFetcher, TileWorkerSetup};
    use crate::source::{GridCoverage, RetryBackoff};
    use std::time::Duration;

    struct Harness {
        fetcher: Arc<MemoryFetcher>,
        source: SourceCache,
    }

    fn harness(fetcher: MemoryFetcher, config: SourceCacheConfig) -> Harness {
        let fetcher = Arc::new(fetcher);
        let setup = TileWorkerSetup::new(fetcher.clone(), Arc::new(GzipDecoder::new()));
        let pool = WorkerPool::new(WorkerPoolConfig::default().with_size(2), Arc::new(setup));
        let dispatcher = Arc::new(Dispatcher::new(pool).unwrap());
        let source = SourceCache::new(config, dispatcher, Arc::new(GridCoverage)).unwrap();
        Harness { fetcher, source }
    }

    fn config() -> SourceCacheConfig {
        SourceCacheConfig::new("test", "mem://{z}/{x}/{y}")
    }

    async fn settle(source: &mut SourceCache) {
        tokio::time::timeout(Duration::from_secs(10), async {
            while !source.loaded() {
                if source.next_event_ready().await == 0 {
                    break;
                }
            }
        })
        .await
        .expect("source settles");
    }

    fn view() -> Viewport {
        Viewport::new(0.5, 0.5, 2.0, 1024, 1024)
    }

    #[tokio::test]
    async fn test_update_loads_ideal_tiles() {
        let mut h = harness(MemoryFetcher::synthetic(), config());
        let mut events = h.source.subscribe();
        h.source.update(&view());
        assert_eq!(h.source.stats().in_flight, 4);
        assert!(!h.source.loaded());

        settle(&mut h.source).await;
        let tiles = h.source.get_renderable_tiles();
        assert_eq!(tiles.len(), 4);
        let ids: Vec<_> = tiles.iter().map(|t| *t.id()).collect();
        let mut sorted = ids.clone();
        sorted.sort();
        assert_eq!(ids, sorted);
        assert_eq!(
            tiles[0].payload().unwrap().data.as_ref(),
            b"mem://2/1/1"
        );

        let mut loaded = 0;
        while let Ok(event) = events.try_recv() {
            if matches!(event, SourceEvent::TileLoaded { .. }) {
                loaded += 1;
            }
        }
        assert_eq!(loaded, 4);
    }

    #[tokio::test]
    async fn test_repeated_update_issues_no_new_loads() {
        let mut h = harness(MemoryFetcher::synthetic(), config());
        h.source.update(&view());
        settle(&mut h.source).await;
        h.source.update(&view());
        h.source.update(&view());
        assert_eq!(h.source.stats().loads_issued, 4);
        assert_eq!(h.fetcher.fetch_count(), 4);
    }

    #[tokio::test]
    async fn test_retry_after_backoff() {
        let config = config().with_retry(RetryBackoff::new(
            Duration::from_millis(20),
            Duration::from_millis(100),
        ));
        let fetcher = MemoryFetcher::synthetic();
        fetcher.fail(
            "mem://0/0/0",
            crate::loader::FetchError::Timeout {
                url: "mem://0/0/0".into(),
            },
        );
        let mut h = harness(fetcher, config);
        let world = Viewport::new(0.5, 0.5, 0.0, 512, 512);
        let id = OverscaledTileId::new(0, 0, 0, 0, 0).unwrap();

        h.source.update(&world);
        settle(&mut h.source).await;
        assert_eq!(h.source.get_tile(&id).unwrap().state(), TileState::Errored);

        h.fetcher.clear_failure("mem://0/0/0");
        h.source.update(&world);
        assert_eq!(h.source.stats().in_flight, 0, "backoff not elapsed");

        tokio::time::sleep(Duration::from_millis(30)).await;
        h.source.update(&world);
        settle(&mut h.source).await;
        assert_eq!(h.source.get_tile(&id).unwrap().state(), TileState::Loaded);
        assert_eq!(h.source.stats().retries, 1);
    }

    #[tokio::test]
    async fn test_next_event_ready_fires_retry_timer() {
        let config = config().with_retry(RetryBackoff::new(
            Duration::from_millis(20),
            Duration::from_millis(100),
        ));
        let fetcher = MemoryFetcher::synthetic();
        fetcher.fail(
            "mem://0/0/0",
            crate::loader::FetchError::Timeout {
                url: "mem://0/0/0".into(),
            },
        );
        let mut h = harness(fetcher, config);
        let id = OverscaledTileId::new(0, 0, 0, 0, 0).unwrap();

        h.source.update(&Viewport::new(0.5, 0.5, 0.0, 512, 512));
        settle(&mut h.source).await;
        assert_eq!(h.source.get_tile(&id).unwrap().state(), TileState::Errored);
        assert_eq!(h.source.stats().in_flight, 0);

        h.fetcher.clear_failure("mem://0/0/0");
        let applied = tokio::time::timeout(Duration::from_secs(5), h.source.next_event_ready())
            .await
            .expect("retry fires");
        assert_eq!(applied, 1);
        assert_eq!(h.source.get_tile(&id).unwrap().state(), TileState::Loaded);
        assert_eq!(h.source.stats().retries, 1);
    }

    #[tokio::test]
    async fn test_next_event_ready_returns_when_paused() {
        let mut h = harness(MemoryFetcher::synthetic(), config());
        h.source.pause();
        h.source.update(&view());
        assert!(!h.source.loaded());

        let applied = tokio::time::timeout(Duration::from_secs(1), h.source.next_event_ready())
            .await
            .expect("does not wait while paused");
        assert_eq!(applied, 0);
        assert!(!h.source.loaded());
        assert_eq!(h.fetcher.fetch_count(), 0);
    }

    #[tokio::test]
    async fn test_parse_errors_not_retried() {
        let config = config().with_retry(RetryBackoff::new(
            Duration::from_millis(1),
            Duration::from_millis(1),
        ));
        let fetcher = MemoryFetcher::new().with_generator(|_| Some(bytes::Bytes::from_static(&[0x1f, 0x8b, 0x01])));
        let mut h = harness(fetcher, config);
        let world = Viewport::new(0.5, 0.5, 0.0, 512, 512);
        h.source.update(&world);
        settle(&mut h.source).await;
        tokio::time::sleep(Duration::from_millis(10)).await;
        h.source.update(&world);
        assert_eq!(h.source.stats().in_flight, 0);
        assert_eq!(h.source.stats().errored, 1);

        let id = OverscaledTileId::new(0, 0, 0, 0, 0).unwrap();
        assert!(matches!(
            h.source.get_tile(&id).unwrap().error(),
            Some(TileError::Parse(_))
        ));
        assert!(h.source.retry_tile(&id));
        assert_eq!(h.source.stats().in_flight, 1);
    }

    #[tokio::test]
    async fn test_reload_keeps_tiles_renderable() {
        let mut h = harness(MemoryFetcher::synthetic(), config());
        h.source.update(&view());
        settle(&mut h.source).await;

        h.source.reload();
        assert_eq!(h.source.stats().in_flight, 4);
        assert_eq!(h.source.get_renderable_tiles().len(), 4);
        assert!(h
            .source
            .get_renderable_tiles()
            .iter()
            .all(|t| t.state() == TileState::Reloading));

        settle(&mut h.source).await;
        // Reload re-decodes retained raw data: no new fetches.
        assert_eq!(h.fetcher.fetch_count(), 4);
        assert!(h
            .source
            .get_renderable_tiles()
            .iter()
            .all(|t| t.load_count() == 2));
    }

    #[tokio::test]
    async fn test_set_url_template_refetches() {
        let mut h = harness(MemoryFetcher::synthetic(), config());
        h.source.update(&view());
        settle(&mut h.source).await;
        h.source.set_url_template("other://{z}/{x}/{y}").unwrap();
        settle(&mut h.source).await;
        assert_eq!(h.fetcher.fetch_count(), 8);
        let tile = h.source.get_renderable_tiles()[0];
        assert!(tile.payload().unwrap().data.starts_with(b"other://"));
        assert!(h.source.set_url_template("").is_err());
    }

    #[tokio::test]
    async fn test_clear_tiles() {
        let mut h = harness(MemoryFetcher::synthetic(), config());
        h.source.update(&view());
        settle(&mut h.source).await;
        h.source.clear_tiles();
        let stats = h.source.stats();
        assert_eq!(stats.retained, 0);
        assert_eq!(stats.cached, 0);
        assert!(h.source.loaded());
    }

    #[tokio::test]
    async fn test_feature_state_survives_reload() {
        let mut h = harness(MemoryFetcher::synthetic(), config());
        h.source.update(&view());
        settle(&mut h.source).await;

        let state = serde_json::json!({"hover": true}).as_object().cloned().unwrap();
        h.source.set_feature_state("roads", "17", state.clone());
        h.source.reload();
        settle(&mut h.source).await;
        assert_eq!(h.source.get_feature_state("roads", "17"), state);
        assert_eq!(h.source.take_feature_state_changes().len(), 1);

        h.source.remove_feature_state("roads", Some("17"), None);
        assert!(h.source.get_feature_state("roads", "17").is_empty());
    }

    #[tokio::test]
    async fn test_cache_resized_from_view() {
        let mut h = harness(MemoryFetcher::synthetic(), config());
        h.source.update(&view());
        assert_eq!(h.source.stats().cache_capacity, 20);

        let mut fixed = harness(
            MemoryFetcher::synthetic(),
            config().with_max_cache_tiles(Some(3)),
        );
        fixed.source.update(&view());
        assert_eq!(fixed.source.stats().cache_capacity, 3);
    }
}
