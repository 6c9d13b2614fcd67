use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;
use tilewright_sources::SourceId;

use super::{ComputationKey, FailureCode};
use crate::async_ref::{AsyncRecord, AsyncRef, ProductionContext, Scheduler};
use crate::present::Present;

/// A request for a memoizable computation.
pub trait ComputationRequest: Send + 'static {
    /// The memoization identity of this request.
    fn cache_key(&self) -> ComputationKey;

    /// Resolves the request without producing anything, if possible.
    ///
    /// This is used for requests that are known to be out of bounds, and avoids scheduling
    /// them at all.
    fn resolve_early(&self) -> Option<Present> {
        None
    }

    /// Produces the result on a producer thread.
    ///
    /// Returned errors, as well as panics, resolve the record to a [`Present::Failure`].
    fn compute(self, context: &ProductionContext) -> Result<Present, FailureCode>;
}

/// The memoizing cache of a single source.
///
/// This is the only place where records for the source are minted, so concurrent requests
/// for equal keys are always served by the same record. Records stay in the cache until it is
/// [flushed](Self::flush), whether they are still pending or not.
pub struct SourceCache {
    source: SourceId,
    scheduler: Arc<dyn Scheduler>,
    records: Mutex<HashMap<ComputationKey, Arc<AsyncRecord>>>,
}

impl SourceCache {
    pub fn new(source: SourceId, scheduler: Arc<dyn Scheduler>) -> Self {
        Self {
            source,
            scheduler,
            records: Mutex::new(HashMap::new()),
        }
    }

    pub fn source(&self) -> &SourceId {
        &self.source
    }

    /// Returns a handle to the record for `request`, creating the record on first use.
    ///
    /// This never blocks on a computation. The returned handle has no interest yet.
    pub fn get<R: ComputationRequest>(&self, request: R) -> AsyncRef {
        let key = request.cache_key();
        let kind = key.kind().to_owned();
        metric!(counter("caches.access") += 1, "kind" => &kind);

        let record = {
            let mut records = self.records.lock();
            match records.get(&key) {
                Some(record) => {
                    metric!(counter("caches.memory.hit") += 1, "kind" => &kind);
                    Arc::clone(record)
                }
                None => {
                    metric!(counter("caches.computation") += 1, "kind" => &kind);
                    let record = match request.resolve_early() {
                        Some(present) => {
                            tracing::trace!(%key, present = present.name(), "resolved early");
                            AsyncRecord::resolved(key.clone(), present, Arc::clone(&self.scheduler))
                        }
                        None => AsyncRecord::new(
                            key.clone(),
                            Box::new(move |context: &ProductionContext| request.compute(context)),
                            Arc::clone(&self.scheduler),
                        ),
                    };
                    records.insert(key, Arc::clone(&record));
                    record
                }
            }
        };

        AsyncRef::new(record, "cache")
    }

    /// Drops all records of this source, returning how many there were.
    ///
    /// Existing handles stay valid and pending records still resolve, but the next request
    /// for any key creates a fresh record.
    pub fn flush(&self) -> usize {
        let records = std::mem::take(&mut *self.records.lock());
        metric!(counter("caches.flush") += 1, "source" => self.source.as_str());
        tracing::debug!(source = %self.source, records = records.len(), "flushed cache");
        records.len()
    }

    /// The number of cached records.
    pub fn len(&self) -> usize {
        self.records.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.lock().is_empty()
    }
}

impl fmt::Debug for SourceCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SourceCache")
            .field("source", &self.source)
            .field("records", &self.len())
            .finish()
    }
}
