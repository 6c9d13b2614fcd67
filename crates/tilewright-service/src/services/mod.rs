//! Provides the tile services and a way to initialize them.
//!
//! The main [`create_service`] fn starts the [`ProducerPool`] according to the provided
//! [`Config`], and connects it to a fresh set of [`Caches`]. Sources are created on top of
//! those caches, and stacked into [`Viewer`](viewer::Viewer)s for painting.

use std::fmt;
use std::sync::Arc;

use anyhow::{Context, Result};
use tilewright_sources::SourceId;

use crate::caching::Caches;
use crate::config::Config;

pub mod producer;
pub mod source;
pub mod viewer;

use self::producer::ProducerPool;
use self::source::{CachedSource, TileProducer};
use self::viewer::Viewer;

/// The process-scoped state shared by all viewers.
///
/// Dropping the services shuts down the producer threads. Records that are still queued stay
/// pending.
pub struct SharedServices {
    config: Arc<Config>,
    caches: Caches,
    producers: ProducerPool,
}

impl SharedServices {
    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn caches(&self) -> &Caches {
        &self.caches
    }

    pub fn producers(&self) -> &ProducerPool {
        &self.producers
    }

    /// Creates a source whose tiles are produced by `producer` on the producer threads.
    pub fn cached_source<P: TileProducer>(&self, id: SourceId, producer: P) -> CachedSource<P> {
        CachedSource::new(id, producer, &self.caches)
    }

    /// Creates a viewer without layers.
    pub fn viewer(&self) -> Viewer {
        Viewer::new(&self.config)
    }
}

impl fmt::Debug for SharedServices {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SharedServices")
            .field("caches", &self.caches)
            .field("workers", &self.producers.workers())
            .finish()
    }
}

pub fn create_service(config: Arc<Config>) -> Result<SharedServices> {
    let producers =
        ProducerPool::new(&config.producers).context("failed to start producer threads")?;
    let caches = Caches::new(producers.scheduler());

    Ok(SharedServices {
        config,
        caches,
        producers,
    })
}
