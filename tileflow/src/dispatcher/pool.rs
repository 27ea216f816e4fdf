//! Reference-counted pool of worker units.

use std::collections::HashSet;
use std::sync::{Arc, OnceLock};

use parking_lot::Mutex;
use tracing::{debug, info};

use super::worker::{WorkerSetup, WorkerUnit};
use super::PoolError;

/// Upper bound for the default pool size.
pub const MAX_DEFAULT_WORKERS: usize = 8;

/// Process-wide pool, installed with [`WorkerPool::init_global`].
static GLOBAL_POOL: OnceLock<Arc<WorkerPool>> = OnceLock::new();

/// Worker pool configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerPoolConfig {
    /// Number of worker threads.
    pub size: usize,
}

impl Default for WorkerPoolConfig {
    fn default() -> Self {
        let cpus = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1);
        Self {
            size: cpus.clamp(1, MAX_DEFAULT_WORKERS),
        }
    }
}

impl WorkerPoolConfig {
    pub fn with_size(mut self, size: usize) -> Self {
        self.size = size;
        self
    }
}

struct PoolState {
    units: Option<Arc<[Arc<WorkerUnit>]>>,
    owners: HashSet<String>,
}

/// Fixed-size set of worker units shared by every [`Dispatcher`](super::Dispatcher).
///
/// Units start lazily on the first [`acquire`](Self::acquire). Each owner
/// (normally one dispatcher) is tracked by name; when the last owner calls
/// [`release`](Self::release) the units are shut down. A later acquire starts
/// a fresh set.
///
/// Applications share one pool through [`init_global`](Self::init_global) and
/// [`global`](Self::global); tests build isolated pools with
/// [`new`](Self::new).
pub struct WorkerPool {
    config: WorkerPoolConfig,
    setup: Arc<dyn WorkerSetup>,
    state: Mutex<PoolState>,
}

impl WorkerPool {
    pub fn new(config: WorkerPoolConfig, setup: Arc<dyn WorkerSetup>) -> Arc<Self> {
        Arc::new(Self {
            config,
            setup,
            state: Mutex::new(PoolState {
                units: None,
                owners: HashSet::new(),
            }),
        })
    }

    /// Install the process-wide pool.
    pub fn init_global(
        config: WorkerPoolConfig,
        setup: Arc<dyn WorkerSetup>,
    ) -> Result<Arc<Self>, PoolError> {
        let pool = Self::new(config, setup);
        GLOBAL_POOL
            .set(Arc::clone(&pool))
            .map_err(|_| PoolError::AlreadyInitialized)?;
        Ok(pool)
    }

    /// The process-wide pool, if installed.
    pub fn global() -> Option<Arc<Self>> {
        GLOBAL_POOL.get().cloned()
    }

    /// Configured number of units.
    pub fn size(&self) -> usize {
        self.config.size
    }

    /// True while at least one owner holds the pool.
    pub fn is_active(&self) -> bool {
        !self.state.lock().owners.is_empty()
    }

    /// Number of owners currently holding the pool.
    pub fn owner_count(&self) -> usize {
        self.state.lock().owners.len()
    }

    /// Register `owner` and return the units, starting them if needed.
    ///
    /// Acquiring twice with the same owner name counts once.
    pub fn acquire(&self, owner: &str) -> Result<Arc<[Arc<WorkerUnit>]>, PoolError> {
        if self.config.size == 0 {
            return Err(PoolError::EmptyPool);
        }
        let mut state = self.state.lock();
        let units = match &state.units {
            Some(units) => Arc::clone(units),
            None => {
                let units = (0..self.config.size)
                    .map(|index| WorkerUnit::spawn(index, Arc::clone(&self.setup)).map(Arc::new))
                    .collect::<Result<Vec<_>, _>>()?;
                info!(size = units.len(), "Worker pool started");
                let units: Arc<[Arc<WorkerUnit>]> = units.into();
                state.units = Some(Arc::clone(&units));
                units
            }
        };
        state.owners.insert(owner.to_string());
        debug!(owner, owners = state.owners.len(), "Worker pool acquired");
        Ok(units)
    }

    /// Drop `owner`'s hold. The last release shuts the units down.
    pub fn release(&self, owner: &str) {
        let units = {
            let mut state = self.state.lock();
            if !state.owners.remove(owner) {
                return;
            }
            debug!(owner, owners = state.owners.len(), "Worker pool released");
            if !state.owners.is_empty() {
                return;
            }
            state.units.take()
        };
        if let Some(units) = units {
            for unit in units.iter() {
                unit.shutdown();
            }
            info!("Worker pool terminated");
        }
    }
}

impl std::fmt::Debug for WorkerPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock();
        f.debug_struct("WorkerPool")
            .field("size", &self.config.size)
            .field("owners", &state.owners.len())
            .field("running", &state.units.is_some())
            .finish()
    }
}
