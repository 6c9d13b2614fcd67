use std::time::Duration;

use thiserror::Error;

/// The reason a computation failed to produce a tile.
///
/// Failures are regular, cacheable outcomes: a key that failed once keeps failing with the
/// same code until its source is flushed. The [`Display`](std::fmt::Display) output is what
/// diagnostic placeholders show.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FailureCode {
    /// The source has no imagery for the requested tile.
    #[error("not found")]
    NotFound,
    /// The source imagery could not be fetched.
    ///
    /// The attached string contains the reason given by the source.
    #[error("fetch failed: {0}")]
    Fetch(String),
    /// The source imagery was fetched, but could not be decoded.
    #[error("decode failed: {0}")]
    Decode(String),
    /// Warping, projecting or cropping the decoded imagery failed.
    #[error("transform failed: {0}")]
    Transform(String),
    /// Producing the tile took longer than allowed.
    #[error("timed out after {0:?}")]
    Timeout(Duration),
    /// An unexpected error in the producer itself, including panics.
    #[error("internal error")]
    InternalError,
}

impl From<std::io::Error> for FailureCode {
    #[track_caller]
    fn from(err: std::io::Error) -> Self {
        Self::from_std_error(err)
    }
}

impl FailureCode {
    /// Logs the given error and converts it into an [`InternalError`](Self::InternalError).
    #[track_caller]
    pub fn from_std_error<E: std::error::Error + 'static>(e: E) -> Self {
        let dynerr: &dyn std::error::Error = &e; // tracing expects a `&dyn Error`
        tracing::error!(error = dynerr);
        Self::InternalError
    }
}
