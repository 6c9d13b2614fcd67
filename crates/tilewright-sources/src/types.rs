use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// An identifier for a tile source.
///
/// Source ids partition the memoizing caches: every source owns its own set of
/// in-flight and completed computations.
#[derive(Clone, Debug, Hash, Eq, Ord, PartialEq, PartialOrd, Deserialize, Serialize)]
pub struct SourceId(String);

impl SourceId {
    /// Creates a new [`SourceId`].
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Deref the [`SourceId`] to a `&str`.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SourceId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl AsRef<str> for SourceId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// The address of a single tile in a square, power-of-two tile pyramid.
///
/// At zoom level `z` the world is covered by `2^z` columns and `2^z` rows.
#[derive(Clone, Copy, Debug, Hash, Eq, Ord, PartialEq, PartialOrd, Deserialize, Serialize)]
pub struct TileAddress {
    /// The zoom level.
    pub zoom: u8,
    /// Zero-based column, growing eastwards.
    pub col: u32,
    /// Zero-based row, growing southwards.
    pub row: u32,
}

/// The highest zoom level a [`TileAddress`] may use.
pub const MAX_ZOOM: u8 = 30;

impl TileAddress {
    /// Creates a new tile address.
    pub fn new(col: u32, row: u32, zoom: u8) -> Self {
        Self { zoom, col, row }
    }

    /// The number of tiles along one axis at this address' zoom level.
    pub fn tiles_per_axis(&self) -> u64 {
        1u64 << self.zoom.min(MAX_ZOOM)
    }

    /// Whether this address lies within the world grid of its zoom level.
    pub fn is_in_world(&self) -> bool {
        let n = self.tiles_per_axis();
        self.zoom <= MAX_ZOOM && u64::from(self.col) < n && u64::from(self.row) < n
    }

    /// The area covered by this tile, in normalized world coordinates.
    ///
    /// Returns `(left, top, right, bottom)`.
    pub fn normalized_bounds(&self) -> (f64, f64, f64, f64) {
        let n = self.tiles_per_axis() as f64;
        let left = f64::from(self.col) / n;
        let top = f64::from(self.row) / n;
        (left, top, left + 1.0 / n, top + 1.0 / n)
    }
}

impl fmt::Display for TileAddress {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}/{}/{}", self.zoom, self.col, self.row)
    }
}

/// An error parsing a [`TileAddress`] from its `zoom/col/row` notation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid tile address `{0}`, expected `zoom/col/row`")]
pub struct ParseTileAddressError(String);

impl FromStr for TileAddress {
    type Err = ParseTileAddressError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let err = || ParseTileAddressError(s.to_owned());
        let mut parts = s.split('/');
        let zoom = parts.next().and_then(|p| p.parse().ok()).ok_or_else(err)?;
        let col = parts.next().and_then(|p| p.parse().ok()).ok_or_else(err)?;
        let row = parts.next().and_then(|p| p.parse().ok()).ok_or_else(err)?;
        if parts.next().is_some() || zoom > MAX_ZOOM {
            return Err(err());
        }
        Ok(Self { zoom, col, row })
    }
}

/// The defined extent of a tile source.
///
/// The extent is given in normalized world coordinates, where `(0, 0)` is the
/// north-western and `(1, 1)` the south-eastern corner of the world, together
/// with the range of zoom levels the source is able to produce.
#[derive(Clone, Copy, Debug, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct SourceExtent {
    /// The lowest zoom level with imagery.
    pub min_zoom: u8,
    /// The highest zoom level with imagery.
    pub max_zoom: u8,
    /// Western edge.
    pub left: f64,
    /// Northern edge.
    pub top: f64,
    /// Eastern edge.
    pub right: f64,
    /// Southern edge.
    pub bottom: f64,
}

impl SourceExtent {
    /// An extent covering the whole world at every zoom level.
    pub const WORLD: SourceExtent = SourceExtent {
        min_zoom: 0,
        max_zoom: MAX_ZOOM,
        left: 0.0,
        top: 0.0,
        right: 1.0,
        bottom: 1.0,
    };

    /// Whether the given tile overlaps this extent.
    ///
    /// Tiles merely touching an edge of the extent are not considered inside.
    pub fn contains(&self, address: &TileAddress) -> bool {
        if !address.is_in_world() || address.zoom < self.min_zoom || address.zoom > self.max_zoom
        {
            return false;
        }
        let (left, top, right, bottom) = address.normalized_bounds();
        left < self.right && right > self.left && top < self.bottom && bottom > self.top
    }

    /// Whether the given normalized point lies within this extent.
    pub fn contains_point(&self, x: f64, y: f64) -> bool {
        x >= self.left && x < self.right && y >= self.top && y < self.bottom
    }
}

impl Default for SourceExtent {
    fn default() -> Self {
        Self::WORLD
    }
}
