//! Tile sources as seen by paint passes.
//!
//! A [`DisplayableSource`] hands out handles to tile images and its bounds. The stock
//! implementation is [`CachedSource`], which memoizes the work of a [`TileProducer`] in the
//! source's [`SourceCache`].

use std::fmt;
use std::sync::Arc;

use tilewright_sources::{MAX_ZOOM, PaintRect, SourceExtent, SourceId, TileAddress, ViewPosition};

use crate::async_ref::{AsyncRef, ProductionContext};
use crate::caching::{Caches, ComputationKey, ComputationRequest, FailureCode, SourceCache};
use crate::image::{ImageRef, PixelBuffer};
use crate::present::Present;

/// A tile visible in a view.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TileDescriptor {
    pub address: TileAddress,
    /// Where the tile is painted, in view pixels.
    pub paint_location: PaintRect,
}

/// A pixel of a view, located within a tile.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TileHit {
    pub address: TileAddress,
    /// Offset from the left edge of the tile, in view pixels.
    pub x: u32,
    /// Offset from the top edge of the tile, in view pixels.
    pub y: u32,
}

/// Maps views to the tiles covering them.
pub trait CoordinateSystem: Send + Sync {
    /// The edge length of a tile on screen, in pixels.
    fn tile_size(&self) -> u32;

    /// All tiles overlapping `view` when it is centered on `center`.
    fn tile_array(&self, center: &ViewPosition, view: PaintRect) -> Vec<TileDescriptor>;

    /// The tile and offset under the view pixel `(px, py)`.
    fn tile_at(
        &self,
        center: &ViewPosition,
        view: PaintRect,
        px: i32,
        py: i32,
    ) -> Option<TileHit>;
}

/// A square, power-of-two tile pyramid over normalized world coordinates.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SquareTileGrid {
    tile_size: u32,
}

impl SquareTileGrid {
    pub fn new(tile_size: u32) -> Self {
        Self {
            tile_size: tile_size.max(1),
        }
    }

    /// The pixel position of the world origin within the view, and the world size.
    fn origin(&self, center: &ViewPosition, view: PaintRect) -> (f64, f64, f64) {
        let tiles = (1u64 << center.zoom.min(MAX_ZOOM)) as f64;
        let world = f64::from(self.tile_size) * tiles;
        let view_x = f64::from(view.x) + f64::from(view.width) / 2.0;
        let view_y = f64::from(view.y) + f64::from(view.height) / 2.0;
        (
            (view_x - center.x * world).round(),
            (view_y - center.y * world).round(),
            world,
        )
    }
}

impl CoordinateSystem for SquareTileGrid {
    fn tile_size(&self) -> u32 {
        self.tile_size
    }

    fn tile_array(&self, center: &ViewPosition, view: PaintRect) -> Vec<TileDescriptor> {
        if view.is_empty() {
            return Vec::new();
        }
        let (origin_x, origin_y, _) = self.origin(center, view);
        let size = f64::from(self.tile_size);
        let last = (1i64 << center.zoom.min(MAX_ZOOM)) - 1;

        let range = |start: i32, end: i32, origin: f64| {
            let first = ((f64::from(start) - origin) / size).floor() as i64;
            let past = ((f64::from(end) - origin) / size).ceil() as i64;
            first.max(0)..=(past - 1).min(last)
        };
        let cols = range(view.x, view.right(), origin_x);
        let rows = range(view.y, view.bottom(), origin_y);

        let mut tiles = Vec::new();
        for row in rows {
            for col in cols.clone() {
                tiles.push(TileDescriptor {
                    address: TileAddress::new(col as u32, row as u32, center.zoom),
                    paint_location: PaintRect::new(
                        (origin_x + col as f64 * size) as i32,
                        (origin_y + row as f64 * size) as i32,
                        self.tile_size as i32,
                        self.tile_size as i32,
                    ),
                });
            }
        }
        tiles
    }

    fn tile_at(
        &self,
        center: &ViewPosition,
        view: PaintRect,
        px: i32,
        py: i32,
    ) -> Option<TileHit> {
        let (origin_x, origin_y, world) = self.origin(center, view);
        let world_x = f64::from(px) - origin_x;
        let world_y = f64::from(py) - origin_y;
        if !(0.0..world).contains(&world_x) || !(0.0..world).contains(&world_y) {
            return None;
        }

        let size = f64::from(self.tile_size);
        let col = (world_x / size).floor();
        let row = (world_y / size).floor();
        Some(TileHit {
            address: TileAddress::new(col as u32, row as u32, center.zoom),
            x: (world_x - col * size) as u32,
            y: (world_y - row * size) as u32,
        })
    }
}

/// A source of tiles that paint passes can display.
pub trait DisplayableSource: Send + Sync {
    fn id(&self) -> &SourceId;

    /// A handle to the image of the tile at `address`.
    fn get_image(&self, address: &TileAddress) -> AsyncRef;

    /// A handle to the defined extent of this source.
    fn get_bounds(&self) -> AsyncRef;

    /// The coordinate system this source's tiles are laid out in.
    fn default_coordinate_system(&self) -> Arc<dyn CoordinateSystem>;

    /// Attribution to display alongside the imagery.
    fn credit(&self) -> Option<String>;

    /// Forgets all cached results, so they are produced anew on the next request.
    fn flush(&self);
}

/// Produces the imagery of a [`CachedSource`].
///
/// Methods are called on producer threads.
pub trait TileProducer: Send + Sync + 'static {
    /// The region and zoom levels this producer has imagery for.
    fn extent(&self) -> SourceExtent;

    /// The edge length of a tile on screen.
    fn tile_size(&self) -> u32 {
        256
    }

    /// Identifies the chain of transformations applied to the imagery.
    fn transform_id(&self) -> &str {
        "identity"
    }

    fn credit(&self) -> Option<String> {
        None
    }

    /// Produces the tile at `address`, which always lies within [`extent`](Self::extent).
    fn produce_image(
        &self,
        address: &TileAddress,
        context: &ProductionContext,
    ) -> Result<PixelBuffer, FailureCode>;

    /// Produces the extent of this source.
    fn produce_bounds(&self, _context: &ProductionContext) -> Result<SourceExtent, FailureCode> {
        Ok(self.extent())
    }
}

struct ImageRequest<P> {
    source: SourceId,
    address: TileAddress,
    producer: Arc<P>,
}

impl<P: TileProducer> ComputationRequest for ImageRequest<P> {
    fn cache_key(&self) -> ComputationKey {
        ComputationKey::builder("image", &self.source)
            .param("tile", self.address)
            .param("transform", self.producer.transform_id())
            .build()
    }

    fn resolve_early(&self) -> Option<Present> {
        (!self.producer.extent().contains(&self.address)).then_some(Present::OutOfBounds)
    }

    fn compute(self, context: &ProductionContext) -> Result<Present, FailureCode> {
        let buffer = self.producer.produce_image(&self.address, context)?;
        Ok(Present::Image(ImageRef::new(buffer, "tile")))
    }
}

struct BoundsRequest<P> {
    source: SourceId,
    producer: Arc<P>,
}

impl<P: TileProducer> ComputationRequest for BoundsRequest<P> {
    fn cache_key(&self) -> ComputationKey {
        ComputationKey::builder("bounds", &self.source)
            .param("transform", self.producer.transform_id())
            .build()
    }

    fn compute(self, context: &ProductionContext) -> Result<Present, FailureCode> {
        self.producer.produce_bounds(context).map(Present::Bounds)
    }
}

/// A [`DisplayableSource`] memoizing the work of a [`TileProducer`].
///
/// Requests for tiles outside of the producer's extent resolve to [`Present::OutOfBounds`]
/// right away, without ever reaching the producer.
pub struct CachedSource<P> {
    id: SourceId,
    producer: Arc<P>,
    cache: Arc<SourceCache>,
    coordinate_system: Arc<SquareTileGrid>,
}

impl<P: TileProducer> CachedSource<P> {
    pub fn new(id: SourceId, producer: P, caches: &Caches) -> Self {
        let cache = caches.source_cache(&id);
        let coordinate_system = Arc::new(SquareTileGrid::new(producer.tile_size()));
        Self {
            id,
            producer: Arc::new(producer),
            cache,
            coordinate_system,
        }
    }

    pub fn producer(&self) -> &P {
        &self.producer
    }

    pub fn cache(&self) -> &SourceCache {
        &self.cache
    }
}

impl<P: TileProducer> DisplayableSource for CachedSource<P> {
    fn id(&self) -> &SourceId {
        &self.id
    }

    fn get_image(&self, address: &TileAddress) -> AsyncRef {
        self.cache.get(ImageRequest {
            source: self.id.clone(),
            address: *address,
            producer: Arc::clone(&self.producer),
        })
    }

    fn get_bounds(&self) -> AsyncRef {
        self.cache.get(BoundsRequest {
            source: self.id.clone(),
            producer: Arc::clone(&self.producer),
        })
    }

    fn default_coordinate_system(&self) -> Arc<dyn CoordinateSystem> {
        self.coordinate_system.clone()
    }

    fn credit(&self) -> Option<String> {
        self.producer.credit()
    }

    fn flush(&self) {
        self.cache.flush();
    }
}

impl<P> fmt::Debug for CachedSource<P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CachedSource")
            .field("id", &self.id)
            .field("cache", &self.cache)
            .finish()
    }
}
