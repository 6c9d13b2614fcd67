use serde::{Deserialize, Serialize};

/// A rectangle on the painting surface, in device pixels.
#[derive(Clone, Copy, Debug, Default, Hash, Eq, PartialEq, Deserialize, Serialize)]
pub struct PaintRect {
    /// Left edge.
    pub x: i32,
    /// Top edge.
    pub y: i32,
    /// Width in pixels.
    pub width: i32,
    /// Height in pixels.
    pub height: i32,
}

impl PaintRect {
    /// Creates a new rectangle.
    pub fn new(x: i32, y: i32, width: i32, height: i32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    /// A rectangle anchored at the origin with the given size.
    pub fn from_size(width: i32, height: i32) -> Self {
        Self::new(0, 0, width, height)
    }

    /// The exclusive right edge.
    pub fn right(&self) -> i32 {
        self.x.saturating_add(self.width)
    }

    /// The exclusive bottom edge.
    pub fn bottom(&self) -> i32 {
        self.y.saturating_add(self.height)
    }

    /// Whether the rectangle covers no pixels.
    pub fn is_empty(&self) -> bool {
        self.width <= 0 || self.height <= 0
    }

    /// The number of pixels covered by this rectangle.
    pub fn area(&self) -> u64 {
        if self.is_empty() {
            0
        } else {
            self.width as u64 * self.height as u64
        }
    }

    /// The overlap of two rectangles, which is empty when they are disjoint.
    pub fn intersect(&self, other: &PaintRect) -> PaintRect {
        let x = self.x.max(other.x);
        let y = self.y.max(other.y);
        let right = self.right().min(other.right());
        let bottom = self.bottom().min(other.bottom());
        PaintRect {
            x,
            y,
            width: (right - x).max(0),
            height: (bottom - y).max(0),
        }
    }

    /// Whether the pixel at `(px, py)` lies within this rectangle.
    pub fn contains(&self, px: i32, py: i32) -> bool {
        px >= self.x && px < self.right() && py >= self.y && py < self.bottom()
    }
}

/// The position a viewer is centered on.
///
/// Coordinates are normalized world coordinates, so `(0.5, 0.5)` is the center of
/// the world regardless of zoom.
#[derive(Clone, Copy, Debug, PartialEq, Deserialize, Serialize)]
pub struct ViewPosition {
    /// Horizontal center, from `0.0` (west) to `1.0` (east).
    pub x: f64,
    /// Vertical center, from `0.0` (north) to `1.0` (south).
    pub y: f64,
    /// The zoom level being displayed.
    pub zoom: u8,
}

impl ViewPosition {
    /// Creates a new view position.
    pub fn new(x: f64, y: f64, zoom: u8) -> Self {
        Self { x, y, zoom }
    }

    /// Moves the view by the given normalized offsets, wrapping around the world.
    pub fn panned(&self, dx: f64, dy: f64) -> Self {
        Self {
            x: (self.x + dx).rem_euclid(1.0),
            y: (self.y + dy).clamp(0.0, 1.0 - f64::EPSILON),
            zoom: self.zoom,
        }
    }
}

impl Default for ViewPosition {
    fn default() -> Self {
        Self::new(0.5, 0.5, 0)
    }
}
