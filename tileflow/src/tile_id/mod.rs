//! Tile coordinate algebra.
//!
//! Pure value types for addressing tiles in a multi-resolution quadtree:
//!
//! - [`CanonicalTileId`]: `{z, x, y}` within one world copy
//! - [`UnwrappedTileId`]: canonical tile plus a world-copy offset
//! - [`OverscaledTileId`]: the identity used by the cache and loader, which
//!   may render a shallower canonical tile at a deeper effective zoom
//!
//! Nothing in this module performs I/O.

mod canonical;
mod error;
mod overscaled;
mod unwrapped;

pub use canonical::{CanonicalTileId, TileScheme};
pub use error::TileIdError;
pub use overscaled::OverscaledTileId;
pub use unwrapped::UnwrappedTileId;

/// Deepest canonical zoom level.
pub const MAX_ZOOM: u8 = 25;

/// Deepest effective zoom an overscaled tile may be rendered at.
pub const MAX_OVERSCALED_ZOOM: u8 = 32;
