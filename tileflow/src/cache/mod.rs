//! Bounded store of recently used tiles.
//!
//! Tiles leaving the retained set are parked here so a viewport that pans
//! away and back can reuse them without a new load. See [`TileCache`].

mod tile_cache;

pub use tile_cache::{EntryId, TileCache};
