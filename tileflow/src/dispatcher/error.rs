//! Worker pool errors.

use thiserror::Error;

/// Errors raised while starting or using the worker pool.
#[derive(Debug, Error)]
pub enum PoolError {
    /// A worker thread could not be spawned.
    #[error("failed to spawn worker thread: {0}")]
    Spawn(#[from] std::io::Error),

    /// The pool was torn down before the operation.
    #[error("worker pool has been terminated")]
    Terminated,

    /// The pool was configured with zero workers.
    #[error("worker pool size must be at least 1")]
    EmptyPool,

    /// A process-wide pool already exists.
    #[error("global worker pool is already initialized")]
    AlreadyInitialized,
}
