//! Memoization of tile computations.
//!
//! Computations are identified by a [`ComputationKey`], formed by the kind of computation, the
//! source it belongs to, and its [`ParameterSet`]. [`Caches`] keeps one [`SourceCache`] per
//! source, which hands out [`AsyncRef`]s to one shared record per key.
//!
//! # Lifetime of records
//!
//! Records are never evicted on their own. A record whose interest dropped to zero before it
//! started producing is deferred, and stays in the cache until it is wanted again.
//! Resolved records, failures included, are served from the cache until their source is
//! [flushed](Caches::flush). Flushing only forgets the records: existing handles keep working,
//! and pending records still resolve for whoever holds them.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;
use tilewright_sources::SourceId;

use crate::async_ref::{AsyncRef, Scheduler};

mod cache_error;
mod cache_key;
mod memory;


pub use cache_error::*;
pub use cache_key::*;
pub use memory::*;

/// The registry of all per-source caches.
pub struct Caches {
    scheduler: Arc<dyn Scheduler>,
    sources: Mutex<HashMap<SourceId, Arc<SourceCache>>>,
}

impl Caches {
    /// Creates an empty registry whose records are produced by `scheduler`.
    pub fn new(scheduler: Arc<dyn Scheduler>) -> Self {
        Self {
            scheduler,
            sources: Mutex::new(HashMap::new()),
        }
    }

    /// Returns the cache of `source`, creating it on first use.
    pub fn source_cache(&self, source: &SourceId) -> Arc<SourceCache> {
        let mut sources = self.sources.lock();
        let cache = sources.entry(source.clone()).or_insert_with(|| {
            Arc::new(SourceCache::new(source.clone(), Arc::clone(&self.scheduler)))
        });
        Arc::clone(cache)
    }

    /// Returns a handle to the record for `request` on `source`.
    pub fn get<R: ComputationRequest>(&self, source: &SourceId, request: R) -> AsyncRef {
        self.source_cache(source).get(request)
    }

    /// Drops all records of `source`. See [`SourceCache::flush`].
    pub fn flush(&self, source: &SourceId) -> usize {
        let cache = self.sources.lock().get(source).cloned();
        cache.map_or(0, |cache| cache.flush())
    }

    /// Drops all records of all sources.
    pub fn clear(&self) {
        let caches: Vec<_> = self.sources.lock().values().cloned().collect();
        for cache in caches {
            cache.flush();
        }
    }
}

impl fmt::Debug for Caches {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let sources: Vec<_> = self.sources.lock().keys().cloned().collect();
        f.debug_struct("Caches").field("sources", &sources).finish()
    }
}
