//! Identities and value types shared by tile sources and the rendering core.
//!
//! Includes tile addressing, source extents, paint geometry and the configuration
//! of the synthetic tile sources used for load testing.

#![warn(missing_docs)]

mod geometry;
mod sources;
mod types;

pub use geometry::*;
pub use sources::*;
pub use types::*;
