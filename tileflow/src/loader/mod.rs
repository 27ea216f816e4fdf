//! Tile loading inside the worker units.
//!
//! Everything here runs on a worker thread, never on the coordinator:
//!
//! 1. [`TileWorkerSetup`] registers the tile message handlers on each
//!    worker-side actor
//! 2. a [`TileFetcher`] retrieves the raw bytes (HTTP, optionally through a
//!    [`ResponseCache`])
//! 3. a [`TileDecoder`] turns them into a [`ParsedTile`](crate::tile::ParsedTile)
//!
//! The coordinator only sees the [`protocol`] messages.

mod decode;
mod error;
mod fetch;
pub mod protocol;
mod response_cache;
mod worker;

pub use decode::{GzipDecoder, PassthroughDecoder, TileDecoder};
pub use error::{DecodeError, FetchError};
pub use fetch::{
    BoxFuture, FetchResponse, HttpFetcherConfig, HttpTileFetcher, MemoryFetcher, TileFetcher,
};
pub use response_cache::{CachingFetcher, ResponseCache, ResponseCacheConfig, ResponseCacheStats};
pub use worker::TileWorkerSetup;
