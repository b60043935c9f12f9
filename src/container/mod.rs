//! Container Module
//!
//! The public facade: a numbered list of byte streams sharing one backing
//! store.
//!
//! ## Responsibilities
//! - Create or load a container over any `BackingStore`
//! - Add, insert, remove, swap and clear streams
//! - Hand out at most one open `StreamHandle` at a time
//! - Serialize all access behind one re-entrant lock
//!
//! ## Concurrency Model
//!
//! All state sits behind a `parking_lot::ReentrantMutex`. Every public
//! method takes it for its own duration; `access_scope()` and an open
//! `StreamHandle` hold it for longer. The lock is re-entrant, so the thread
//! holding a scope or a handle may keep calling container methods, but
//! structural operations (add, insert, remove, swap, clear, opening another
//! stream) are rejected while a handle is alive.
//!
//! ```text
//!                 open_stream / add / insert
//!      ┌────────┐ ────────────────────────► ┌────────────┐
//!      │ Closed │                           │ StreamOpen │
//!      └────────┘ ◄──────────────────────── └────────────┘
//!                     handle dropped
//! ```

mod handle;
mod state;

use std::cell::RefCell;
use std::fs::{File, OpenOptions};
use std::path::Path;
use std::sync::Arc;

use parking_lot::{ReentrantMutex, ReentrantMutexGuard};

use crate::cluster_map::ClusterMap;
use crate::config::Config;
use crate::directory::Directory;
use crate::error::Result;
use crate::format::{Header, StreamDescriptor};
use crate::observer::StorageObserver;
use crate::store::BackingStore;

pub use handle::StreamHandle;
pub use state::IntegrityReport;

use state::ContainerState;

/// A list of independently sized byte streams stored in cluster chains
pub struct StreamContainer<S: BackingStore> {
    state: ReentrantMutex<RefCell<ContainerState<S>>>,
}

/// Holds the container lock until dropped
///
/// Groups several container calls so no other thread interleaves with them.
pub struct AccessScope<'a, S: BackingStore> {
    _guard: ReentrantMutexGuard<'a, RefCell<ContainerState<S>>>,
}

impl<S: BackingStore> StreamContainer<S> {
    // =========================================================================
    // Construction
    // =========================================================================

    /// Initialize a new, empty container over `store`
    ///
    /// Existing contents of the store are discarded.
    pub fn create(store: S, config: Config) -> Result<Self> {
        config.validate()?;
        let map = ClusterMap::create(store, config.cluster_size, config.integrity_checks)?;
        let directory = Directory::new(config.directory_growth, config.integrity_checks);

        tracing::info!(cluster_size = config.cluster_size, "Created stream container");
        Ok(Self::from_parts(map, directory, config))
    }

    /// Load an existing container from `store`
    ///
    /// The cluster size recorded in the header wins over `config`.
    pub fn load(store: S, config: Config) -> Result<Self> {
        config.validate()?;
        let map = ClusterMap::load(store, config.integrity_checks)?;
        if map.cluster_size() != config.cluster_size {
            tracing::debug!(
                stored = map.cluster_size(),
                configured = config.cluster_size,
                "Using cluster size from header"
            );
        }
        let directory = Directory::load(&map, config.directory_growth, config.integrity_checks)?;

        tracing::info!(
            streams = directory.count(),
            clusters = map.total_clusters(),
            "Loaded stream container"
        );
        Ok(Self::from_parts(map, directory, config))
    }

    /// Load `store` if it holds anything, otherwise create a new container
    pub fn open(mut store: S, config: Config) -> Result<Self> {
        if store.len()? == 0 {
            Self::create(store, config)
        } else {
            Self::load(store, config)
        }
    }

    fn from_parts(map: ClusterMap<S>, directory: Directory, mut config: Config) -> Self {
        config.cluster_size = map.cluster_size();
        Self {
            state: ReentrantMutex::new(RefCell::new(ContainerState {
                map,
                directory,
                config,
                open: None,
            })),
        }
    }

    // =========================================================================
    // Accessors
    // =========================================================================

    /// Number of streams
    pub fn count(&self) -> u64 {
        self.state.lock().borrow().directory.count()
    }

    pub fn is_empty(&self) -> bool {
        self.count() == 0
    }

    pub fn cluster_size(&self) -> u32 {
        self.state.lock().borrow().map.cluster_size()
    }

    pub fn total_clusters(&self) -> u64 {
        self.state.lock().borrow().map.total_clusters()
    }

    /// Snapshot of the header as last written
    pub fn header(&self) -> Header {
        *self.state.lock().borrow().map.header()
    }

    /// Effective configuration (cluster size taken from the header)
    pub fn config(&self) -> Config {
        self.state.lock().borrow().config.clone()
    }

    /// Descriptor of stream `index`
    pub fn descriptor(&self, index: u64) -> Result<StreamDescriptor> {
        let guard = self.state.lock();
        let mut state = guard.borrow_mut();
        let ContainerState { map, directory, .. } = &mut *state;
        directory.get(map, index)
    }

    /// Whether a `StreamHandle` is currently alive
    pub fn is_stream_open(&self) -> bool {
        self.state.lock().borrow().open.is_some()
    }

    /// Register a mutation hook
    pub fn subscribe(&self, observer: Arc<dyn StorageObserver>) {
        self.state.lock().borrow_mut().map.subscribe(observer);
    }

    /// Take the container lock until the returned scope is dropped
    pub fn access_scope(&self) -> AccessScope<'_, S> {
        AccessScope {
            _guard: self.state.lock(),
        }
    }

    // =========================================================================
    // Stream Operations
    // =========================================================================

    /// Append an empty stream and open it
    pub fn add(&self) -> Result<StreamHandle<'_, S>> {
        let guard = self.state.lock();
        let index = {
            let mut state = guard.borrow_mut();
            let index = state.add()?;
            state.open_stream(index)?;
            index
        };
        Ok(StreamHandle::new(guard, index))
    }

    /// Insert an empty stream at `index` and open it
    ///
    /// Streams at or above `index` move up by one. `index` may equal
    /// `count()`.
    pub fn insert(&self, index: u64) -> Result<StreamHandle<'_, S>> {
        let guard = self.state.lock();
        {
            let mut state = guard.borrow_mut();
            state.insert(index)?;
            state.open_stream(index)?;
        }
        Ok(StreamHandle::new(guard, index))
    }

    /// Open stream `index` for reading and writing
    pub fn open_stream(&self, index: u64) -> Result<StreamHandle<'_, S>> {
        let guard = self.state.lock();
        guard.borrow_mut().open_stream(index)?;
        Ok(StreamHandle::new(guard, index))
    }

    /// Delete stream `index` and its clusters; later streams move down by one
    pub fn remove(&self, index: u64) -> Result<()> {
        let guard = self.state.lock();
        let mut state = guard.borrow_mut();
        state.remove(index)
    }

    /// Exchange the positions of two streams
    pub fn swap(&self, a: u64, b: u64) -> Result<()> {
        let guard = self.state.lock();
        let mut state = guard.borrow_mut();
        state.swap(a, b)
    }

    /// Truncate stream `index` to zero length, keeping its slot
    pub fn clear(&self, index: u64) -> Result<()> {
        let guard = self.state.lock();
        let mut state = guard.borrow_mut();
        state.clear(index)
    }

    /// Remove every stream and every cluster
    pub fn clear_all(&self) -> Result<()> {
        let guard = self.state.lock();
        let mut state = guard.borrow_mut();
        state.clear_all()
    }

    /// Walk every chain and check the structure end to end
    pub fn verify(&self) -> Result<IntegrityReport> {
        let guard = self.state.lock();
        let mut state = guard.borrow_mut();
        state.verify().map_err(|e| {
            tracing::warn!(error = %e, "Container failed verification");
            e
        })
    }

    /// Flush and fsync the backing store
    pub fn sync(&self) -> Result<()> {
        let guard = self.state.lock();
        let mut state = guard.borrow_mut();
        state.map.sync()
    }

    /// Give back the backing store
    pub fn into_inner(self) -> S {
        self.state.into_inner().into_inner().map.into_inner()
    }
}

impl StreamContainer<File> {
    /// Open or create a container file at `path`
    pub fn open_path(path: impl AsRef<Path>, config: Config) -> Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path.as_ref())?;
        tracing::debug!(path = %path.as_ref().display(), "Opening container file");
        Self::open(file, config)
    }
}
