use std::time::Duration;

use crate::tile::TileError;
use crate::tile_id::OverscaledTileId;

/// Notifications published by a [`SourceCache`](super::SourceCache).
#[derive(Debug, Clone, PartialEq)]
pub enum SourceEvent {
    /// First payload for a tile arrived.
    TileLoaded { id: OverscaledTileId },
    /// A reload replaced a tile's payload.
    TileReloaded { id: OverscaledTileId },
    /// A load failed. `retry_in` is set when an automatic retry is scheduled.
    TileErrored {
        id: OverscaledTileId,
        error: TileError,
        retry_in: Option<Duration>,
    },
    /// A tile left the retained set, either parked in the tile cache or
    /// unloaded.
    TileEvicted { id: OverscaledTileId, cached: bool },
    /// The tile cache capacity changed.
    CacheResized { max_size: usize },
}
