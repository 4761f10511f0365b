//! Static resource lookup: cache first, loader only on a true miss.
//!
//! # Data Flow
//! ```text
//! fetch(key)
//!     → cache.get: Positive / Negative → done
//!     → Absent: take the per-key load lock
//!         → cache.get again (another thread may have loaded it)
//!         → loader.load(key) → cache.put (missing → Negative)
//!             → too large for the cache → served uncached
//!         → load error → surfaced, not cached
//! ```

use bytes::Bytes;
use dashmap::DashMap;
use std::io;
use std::path::{Component, Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};

use super::{Lookup, ResourceCache};
use crate::error::CacheLoadError;

/// Backing storage consulted on a cache miss.
pub trait ResourceLoader: Send + Sync {
    /// `Ok(None)` means the resource does not exist and may be cached as such.
    fn load(&self, path: &str) -> Result<Option<Bytes>, CacheLoadError>;
}

/// Loads resources from a directory on disk.
#[derive(Debug, Clone)]
pub struct FsLoader {
    root: PathBuf,
}

impl FsLoader {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Map a url path under the root. Anything that could escape it yields `None`.
    fn resolve(&self, url_path: &str) -> Option<PathBuf> {
        let mut resolved = self.root.clone();
        for component in Path::new(url_path.trim_start_matches('/')).components() {
            match component {
                Component::Normal(part) => resolved.push(part),
                Component::CurDir => {}
                _ => return None,
            }
        }
        Some(resolved)
    }
}

impl ResourceLoader for FsLoader {
    fn load(&self, path: &str) -> Result<Option<Bytes>, CacheLoadError> {
        let Some(file) = self.resolve(path) else {
            tracing::warn!(path, "Rejected static path outside the resource root");
            return Ok(None);
        };
        match std::fs::read(&file) {
            Ok(bytes) => Ok(Some(Bytes::from(bytes))),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) if file.is_dir() => {
                tracing::debug!(path, error = %e, "Static path is a directory");
                Ok(None)
            }
            Err(source) => Err(CacheLoadError {
                path: path.to_string(),
                source,
            }),
        }
    }
}

/// Cache plus loader with per-key load coalescing.
pub struct StaticResources {
    cache: Arc<ResourceCache>,
    loader: Arc<dyn ResourceLoader>,
    loads: DashMap<String, Arc<Mutex<()>>>,
}

impl StaticResources {
    pub fn new(cache: Arc<ResourceCache>, loader: Arc<dyn ResourceLoader>) -> Self {
        Self {
            cache,
            loader,
            loads: DashMap::new(),
        }
    }

    pub fn cache(&self) -> &Arc<ResourceCache> {
        &self.cache
    }

    /// Resolve `key` to its payload. `Ok(None)` for missing resources.
    ///
    /// Concurrent misses for one key wait on a shared lock so the loader runs
    /// once; the waiters then find the entry in the cache.
    pub fn fetch(&self, key: &str) -> Result<Option<Bytes>, CacheLoadError> {
        if let Some(found) = cached(&self.cache, key) {
            return Ok(found);
        }

        let lock = Arc::clone(self.loads.entry(key.to_string()).or_default().value());
        let result = {
            let _guard = lock.lock().unwrap_or_else(PoisonError::into_inner);
            match cached(&self.cache, key) {
                Some(found) => Ok(found),
                None => self.load_and_store(key),
            }
        };
        drop(lock);
        // Only the map still holds the lock: nobody else is waiting.
        self.loads.remove_if(key, |_, held| Arc::strong_count(held) == 1);
        result
    }

    fn load_and_store(&self, key: &str) -> Result<Option<Bytes>, CacheLoadError> {
        match self.loader.load(key) {
            Ok(payload) => {
                let cached = self.cache.put(key, payload.clone());
                tracing::debug!(key, found = payload.is_some(), cached, "Loaded static resource");
                Ok(payload)
            }
            Err(e) => {
                tracing::warn!(key, error = %e, "Static resource load failed; not caching");
                Err(e)
            }
        }
    }
}

fn cached(cache: &ResourceCache, key: &str) -> Option<Option<Bytes>> {
    match cache.get(key) {
        Lookup::Absent => None,
        Lookup::Negative => Some(None),
        Lookup::Positive(bytes) => Some(Some(bytes)),
    }
}

impl std::fmt::Debug for StaticResources {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StaticResources")
            .field("cache", &self.cache)
            .field("pending_loads", &self.loads.len())
            .finish()
    }
}
