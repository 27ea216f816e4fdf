//! Tile message handlers installed on each worker-side actor.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use super::decode::TileDecoder;
use super::fetch::TileFetcher;
use super::protocol::{
    LoadTileRequest, LoadTileResponse, TileRef, ABORT_TILE, LOAD_TILE, RELOAD_TILE, REMOVE_TILE,
};
use crate::actor::{Actor, ErrorKind, HandlerContext, RemoteError};
use crate::dispatcher::WorkerSetup;
use crate::tile::{ExpiryData, TileUid};

/// Immutable services shared by every connection on every unit.
struct Services {
    fetcher: Arc<dyn TileFetcher>,
    decoder: Arc<dyn TileDecoder>,
}

/// Per-connection tile state. Lives as long as the worker-side actor.
#[derive(Default)]
struct ConnectionTiles {
    /// Raw payloads kept for `reloadTile` re-decoding.
    raw: Mutex<HashMap<TileUid, (Bytes, ExpiryData)>>,
    /// In-progress loads, tagged with a generation so an older load
    /// finishing late does not clear a newer one's token.
    loading: Mutex<HashMap<TileUid, (u64, CancellationToken)>>,
    generation: AtomicU64,
}

impl ConnectionTiles {
    fn begin(&self, uid: TileUid, parent: &CancellationToken) -> (u64, CancellationToken) {
        let generation = self.generation.fetch_add(1, Ordering::Relaxed);
        let token = parent.child_token();
        if let Some((_, previous)) = self.loading.lock().insert(uid, (generation, token.clone())) {
            previous.cancel();
        }
        (generation, token)
    }

    fn finish(&self, uid: TileUid, generation: u64) {
        let mut loading = self.loading.lock();
        if loading.get(&uid).is_some_and(|(g, _)| *g == generation) {
            loading.remove(&uid);
        }
    }

    fn abort(&self, uid: TileUid) -> bool {
        match self.loading.lock().remove(&uid) {
            Some((_, token)) => {
                token.cancel();
                true
            }
            None => false,
        }
    }
}

/// [`WorkerSetup`] that registers `loadTile`, `reloadTile`, `abortTile` and
/// `removeTile` on each worker-side actor.
///
/// Raw payloads are kept per connection so `reloadTile` can re-decode
/// without a fetch; `removeTile` drops them.
pub struct TileWorkerSetup {
    services: Arc<Services>,
}

impl TileWorkerSetup {
    pub fn new(fetcher: Arc<dyn TileFetcher>, decoder: Arc<dyn TileDecoder>) -> Self {
        Self {
            services: Arc::new(Services { fetcher, decoder }),
        }
    }
}

impl WorkerSetup for TileWorkerSetup {
    fn install(&self, actor: &Arc<Actor>, unit_index: usize) {
        let tiles = Arc::new(ConnectionTiles::default());

        let (services, conn) = (Arc::clone(&self.services), Arc::clone(&tiles));
        actor.register_handler(LOAD_TILE, move |payload: Value, ctx: HandlerContext| {
            load_tile(Arc::clone(&services), Arc::clone(&conn), payload, ctx, false)
        });

        let (services, conn) = (Arc::clone(&self.services), Arc::clone(&tiles));
        actor.register_handler(RELOAD_TILE, move |payload: Value, ctx: HandlerContext| {
            load_tile(Arc::clone(&services), Arc::clone(&conn), payload, ctx, true)
        });

        let conn = Arc::clone(&tiles);
        actor.register_handler(ABORT_TILE, move |payload: Value, _ctx: HandlerContext| {
            let conn = Arc::clone(&conn);
            async move {
                let target: TileRef = parse_payload(payload)?;
                let aborted = conn.abort(target.uid);
                trace!(tile = %target.key, aborted, "abortTile");
                Ok(Value::Bool(aborted))
            }
        });

        let conn = tiles;
        actor.register_handler(REMOVE_TILE, move |payload: Value, _ctx: HandlerContext| {
            let conn = Arc::clone(&conn);
            async move {
                let target: TileRef = parse_payload(payload)?;
                conn.abort(target.uid);
                let removed = conn.raw.lock().remove(&target.uid).is_some();
                trace!(tile = %target.key, removed, "removeTile");
                Ok(Value::Bool(removed))
            }
        });

        debug!(unit = unit_index, actor = %actor.id(), "Tile handlers installed");
    }
}

async fn load_tile(
    services: Arc<Services>,
    tiles: Arc<ConnectionTiles>,
    payload: Value,
    ctx: HandlerContext,
    reuse_raw: bool,
) -> Result<Value, RemoteError> {
    let request: LoadTileRequest = parse_payload(payload)?;

    if reuse_raw {
        let retained = tiles.raw.lock().get(&request.uid).cloned();
        if let Some((raw, expiry)) = retained {
            trace!(tile = %request.key, "Re-decoding retained payload");
            let tile = services.decoder.decode(&raw)?;
            return encode_response(LoadTileResponse {
                key: request.key,
                tile,
                expiry,
            });
        }
    }

    let (generation, token) = tiles.begin(request.uid, &ctx.cancellation);
    let fetched = services.fetcher.fetch(&request.url, token.clone()).await;
    tiles.finish(request.uid, generation);

    let response = fetched?;
    if token.is_cancelled() {
        return Err(RemoteError::new(ErrorKind::Cancelled, "load aborted"));
    }
    let tile = services.decoder.decode(&response.data)?;
    tiles
        .raw
        .lock()
        .insert(request.uid, (response.data, response.expiry.clone()));
    trace!(tile = %request.key, source = %request.source, bytes = tile.len(), "Tile loaded");

    encode_response(LoadTileResponse {
        key: request.key,
        tile,
        expiry: response.expiry,
    })
}

fn parse_payload<T: DeserializeOwned>(payload: Value) -> Result<T, RemoteError> {
    serde_json::from_value(payload)
        .map_err(|e| RemoteError::internal(format!("malformed request payload: {}", e)))
}

fn encode_response(response: LoadTileResponse) -> Result<Value, RemoteError> {
    serde_json::to_value(response).map_err(|e| RemoteError::internal(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::actor::{ActorError, ErrorKind};
    use crate::loader::{FetchError, GzipDecoder, MemoryFetcher};
    use serde_json::json;
    use std::time::Duration;

    fn request(uid: TileUid, url: &str) -> Value {
        serde_json::to_value(LoadTileRequest {
            uid,
            key: format!("tile-{}", uid),
            url: url.to_string(),
            source: "test".into(),
        })
        .unwrap()
    }

    fn tile_ref(uid: TileUid) -> Value {
        json!({ "uid": uid, "key": format!("tile-{}", uid) })
    }

    fn pair(fetcher: Arc<MemoryFetcher>) -> (Arc<Actor>, Arc<Actor>) {
        let (coordinator, worker) = Actor::linked_pair("coordinator", "worker");
        TileWorkerSetup::new(fetcher, Arc::new(GzipDecoder::new())).install(&worker, 0);
        (coordinator, worker)
    }

    #[tokio::test]
    async fn test_load_tile() {
        let fetcher = Arc::new(MemoryFetcher::synthetic());
        let (coordinator, _worker) = pair(Arc::clone(&fetcher));

        let reply = coordinator.send_async(LOAD_TILE, request(1, "u/1"), None).await.unwrap();
        let reply: LoadTileResponse = serde_json::from_value(reply).unwrap();
        assert_eq!(reply.key, "tile-1");
        assert_eq!(reply.tile.data.as_ref(), b"u/1");
    }

    #[tokio::test]
    async fn test_reload_reuses_raw_data() {
        let fetcher = Arc::new(MemoryFetcher::synthetic());
        let (coordinator, _worker) = pair(Arc::clone(&fetcher));

        coordinator.send_async(LOAD_TILE, request(1, "u/1"), None).await.unwrap();
        coordinator.send_async(RELOAD_TILE, request(1, "u/1"), None).await.unwrap();
        assert_eq!(fetcher.fetch_count(), 1);

        coordinator.send_async(REMOVE_TILE, tile_ref(1), None).await.unwrap();
        coordinator.send_async(RELOAD_TILE, request(1, "u/1"), None).await.unwrap();
        assert_eq!(fetcher.fetch_count(), 2);
    }

    #[tokio::test]
    async fn test_fetch_failure_is_network_error() {
        let fetcher = Arc::new(MemoryFetcher::synthetic());
        fetcher.fail("u/1", FetchError::Status { url: "u/1".into(), status: 500 });
        let (coordinator, _worker) = pair(fetcher);

        let err = coordinator.send_async(LOAD_TILE, request(1, "u/1"), None).await.unwrap_err();
        assert!(matches!(err, ActorError::Remote { kind: ErrorKind::Network, .. }));
    }

    #[tokio::test]
    async fn test_malformed_payload_is_parse_error() {
        let fetcher = Arc::new(MemoryFetcher::new());
        fetcher.insert(
            "u/1",
            crate::loader::FetchResponse::new(
                Bytes::from_static(&[0x1f, 0x8b, 0x00]),
                ExpiryData::default(),
            ),
        );
        let (coordinator, _worker) = pair(fetcher);

        let err = coordinator.send_async(LOAD_TILE, request(1, "u/1"), None).await.unwrap_err();
        assert!(matches!(err, ActorError::Remote { kind: ErrorKind::Parse, .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn test_abort_tile_cancels_load() {
        let fetcher = Arc::new(MemoryFetcher::synthetic().with_latency(Duration::from_secs(10)));
        let (coordinator, _worker) = pair(Arc::clone(&fetcher));

        let load = {
            let coordinator = Arc::clone(&coordinator);
            tokio::spawn(async move { coordinator.send_async(LOAD_TILE, request(7, "u/7"), None).await })
        };
        tokio::time::sleep(Duration::from_millis(100)).await;
        let aborted = coordinator.send_async(ABORT_TILE, tile_ref(7), None).await.unwrap();
        assert_eq!(aborted, Value::Bool(true));

        let err = load.await.unwrap().unwrap_err();
        assert_eq!(err, ActorError::Cancelled);
    }
}
