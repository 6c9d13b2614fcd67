use tilewright_sources::SourceExtent;

use crate::caching::FailureCode;
use crate::image::ImageRef;

/// The state of a computation as seen by its handles.
///
/// Every variant other than [`Pending`](Self::Pending) is terminal: once a record turns
/// terminal, it keeps presenting the same value for its whole lifetime.
///
/// Tile records resolve to an [`Image`](Self::Image), [`OutOfBounds`](Self::OutOfBounds) or a
/// [`Failure`](Self::Failure). Only the bounds records of a source resolve to
/// [`Bounds`](Self::Bounds).
///
/// Cloning an [`Image`](Self::Image) duplicates the contained [`ImageRef`], so every clone
/// holds its own share of the buffer and releases it when dropped.
#[derive(Clone, Debug)]
pub enum Present {
    /// The computation has not finished yet.
    Pending,
    /// A produced tile image.
    Image(ImageRef),
    /// The defined extent of a source, as resolved by its bounds record.
    Bounds(SourceExtent),
    /// The request addresses a region outside of the source's extent.
    ///
    /// This is a regular outcome, and is not displayed like a failure.
    OutOfBounds,
    /// The computation failed.
    Failure(FailureCode),
}

impl Present {
    /// Whether this is a final outcome.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Pending)
    }

    /// The contained image, if any.
    pub fn image(&self) -> Option<&ImageRef> {
        match self {
            Self::Image(image) => Some(image),
            _ => None,
        }
    }

    /// The contained failure, if any.
    pub fn failure(&self) -> Option<&FailureCode> {
        match self {
            Self::Failure(code) => Some(code),
            _ => None,
        }
    }

    /// A short name of the variant, used in logs and metrics.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Image(_) => "image",
            Self::Bounds(_) => "bounds",
            Self::OutOfBounds => "out_of_bounds",
            Self::Failure(_) => "failure",
        }
    }

    /// Releases any image share held by this value.
    pub fn dispose(self) {
        drop(self)
    }
}
