use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

/// A monotonically increasing counter of paint passes.
///
/// Clones share the same counter. Each viewer owns one, and advances it once per pass.
#[derive(Clone, Debug, Default)]
pub struct GenerationCounter(Arc<AtomicU64>);

impl GenerationCounter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Starts a new generation and returns it.
    pub fn advance(&self) -> u64 {
        self.0.fetch_add(1, Ordering::AcqRel) + 1
    }

    /// The current generation.
    pub fn current(&self) -> u64 {
        self.0.load(Ordering::Acquire)
    }

    /// A token for the current generation.
    pub fn token(&self) -> EpochToken {
        EpochToken {
            counter: self.clone(),
            epoch: self.current(),
        }
    }
}

/// Captures the generation a callback was registered in.
///
/// Callbacks scoped to a token only run while their generation is still current.
#[derive(Clone, Debug)]
pub struct EpochToken {
    counter: GenerationCounter,
    epoch: u64,
}

impl EpochToken {
    /// The captured generation.
    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    /// Whether no newer generation has started since this token was taken.
    pub fn is_current(&self) -> bool {
        self.counter.current() == self.epoch
    }
}
