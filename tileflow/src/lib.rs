//! Tileflow - tile loading and caching for map clients.
//!
//! Given a viewport, a [`source::SourceCache`] works out which tiles should
//! be on screen, keeps already-loaded tiles at other zoom levels visible as
//! stand-ins while those load, parks off-screen tiles in a bounded
//! [`cache::TileCache`] and hands fetch/decode work to a pool of worker
//! threads through a request/response [`actor::Actor`] channel with
//! cancellation.
//!
//! # Modules
//!
//! - [`tile_id`]: canonical, unwrapped and overscaled tile coordinates
//! - [`tile`]: per-tile state, payload and expiry
//! - [`cache`]: LRU + TTL tile cache keyed across world copies
//! - [`actor`]: typed messages, handlers and cancellation over channels
//! - [`dispatcher`]: worker threads, the shared pool and per-source dispatchers
//! - [`loader`]: fetchers, response cache, decoders and worker-side handlers
//! - [`source`]: coverage, retain logic and the source cache itself
//! - [`config`]: the INI configuration file
//! - [`logging`]: tracing subscriber setup
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use tileflow::dispatcher::{Dispatcher, WorkerPool, WorkerPoolConfig};
//! use tileflow::loader::{GzipDecoder, MemoryFetcher, TileWorkerSetup};
//! use tileflow::source::{GridCoverage, SourceCache, SourceCacheConfig, Viewport};
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let setup = TileWorkerSetup::new(
//!     Arc::new(MemoryFetcher::synthetic()),
//!     Arc::new(GzipDecoder::new()),
//! );
//! let pool = WorkerPool::new(WorkerPoolConfig::default(), Arc::new(setup));
//! let dispatcher = Arc::new(Dispatcher::new(pool)?);
//!
//! let config = SourceCacheConfig::new("demo", "mem://{z}/{x}/{y}");
//! let mut source = SourceCache::new(config, dispatcher, Arc::new(GridCoverage))?;
//!
//! source.update(&Viewport::new(0.5, 0.5, 3.0, 1280, 720));
//! while !source.loaded() {
//!     // 0 means paused or nothing left to wait for.
//!     if source.next_event_ready().await == 0 {
//!         break;
//!     }
//! }
//! println!("{} tiles ready", source.get_renderable_tiles().len());
//! # Ok(())
//! # }
//! ```

pub mod actor;
pub mod cache;
pub mod config;
pub mod dispatcher;
pub mod loader;
pub mod logging;
pub mod source;
pub mod tile;
pub mod tile_id;

/// Crate version, used in the default HTTP user agent.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
