//! Per-source tile orchestration.
//!
//! A [`SourceCache`] decides which tiles a viewport needs, keeps loaded
//! substitutes on screen while those load, parks tiles that leave the view
//! in a [`TileCache`](crate::cache::TileCache) and issues load work to the
//! worker pool through a [`Dispatcher`](crate::dispatcher::Dispatcher).
//!
//! ```text
//!  update(viewport)
//!       │
//!       ▼
//!  Coverage ──► ideal set ──► compute_retained ──► evict ──► TileCache
//!                                   │                           │
//!                                   ▼                           │ hit
//!                              start loads ◄────────────────────┘
//!                                   │ Actor (loadTile)
//!                                   ▼
//!                          poll_completions (fenced by seq)
//! ```

mod backoff;
mod config;
mod coverage;
mod error;
mod events;
mod feature_state;
mod retain;
mod source_cache;

pub use backoff::RetryBackoff;
pub use config::{SourceCacheConfig, DEFAULT_CACHE_MULTIPLIER};
pub use coverage::{Coverage, CoverageParams, GridCoverage, Viewport, BASE_TILE_SIZE};
pub use error::SourceError;
pub use events::SourceEvent;
pub use feature_state::{FeatureState, FeatureStateChange, FeatureStateStore};
pub use retain::{
    compute_retained, ResidentStatus, RetainParams, DEFAULT_MAX_OVERZOOM, DEFAULT_MAX_UNDERZOOM,
};
pub use source_cache::{SourceCache, SourceCacheStats};
