//! Coordinator-side tile objects.
//!
//! A [`Tile`] is one loaded (or loading) unit of content for an
//! [`OverscaledTileId`](crate::tile_id::OverscaledTileId). It is owned by the
//! source cache while retained and by the tile cache after eviction.

mod error;
mod expiry;
mod payload;
mod state;
#[allow(clippy::module_inception)]
mod tile;

pub use error::TileError;
pub use expiry::{CacheControl, ExpiryData, ExpiryState, CLOCK_SKEW_RETRY_TIMEOUT, MAX_EXPIRY_TIMEOUT};
pub use payload::ParsedTile;
pub use state::TileState;
pub use tile::{Tile, TileUid};
