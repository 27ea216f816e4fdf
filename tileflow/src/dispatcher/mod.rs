//! Worker pool and dispatcher.
//!
//! ```text
//! ┌─────────────┐   get_actor()    ┌──────────────┐   bytes    ┌────────────────┐
//! │ SourceCache │ ───────────────► │  Dispatcher  │ ═════════► │ WorkerUnit 0   │
//! └─────────────┘  round robin     │  actor 0..N  │ ═════════► │ WorkerUnit 1   │
//!                                  └──────┬───────┘ ═════════► │ WorkerUnit N   │
//!                                         │ acquire/release    └────────────────┘
//!                                  ┌──────▼───────┐                  ▲
//!                                  │  WorkerPool  │ ─────────────────┘
//!                                  │ (ref-counted)│   spawn / shutdown
//!                                  └──────────────┘
//! ```

#[allow(clippy::module_inception)]
mod dispatcher;
mod error;
mod pool;
mod worker;

pub use dispatcher::{ActorHandle, Dispatcher};
pub use error::PoolError;
pub use pool::{WorkerPool, WorkerPoolConfig, MAX_DEFAULT_WORKERS};
pub use worker::{UnitConnection, WorkerSetup, WorkerUnit};
