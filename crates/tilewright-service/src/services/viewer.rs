//! Assembly of paint passes.
//!
//! A [`Viewer`] stacks a base layer and any number of alpha layers. Each call to
//! [`Viewer::paint`] is one paint pass: it starts a new generation, requests every visible
//! tile of every layer, and returns a [`PaintPlan`] with whatever is ready right now. Tiles
//! that are still pending get a placeholder and a callback that asks for another pass once
//! they resolve. Those callbacks are scoped to the generation of the pass, so a pass that has
//! been superseded never triggers a repaint.
//!
//! Painting never blocks on a production.

use std::fmt;
use std::sync::Arc;

use tilewright_sources::{PaintRect, TileAddress, ViewPosition};

use crate::async_ref::{
    AsyncRef, CallbackRegistration, EpochToken, GenerationCounter, Interest, InterestList,
    PersistentInterest,
};
use crate::config::{Config, InterestConfig, ViewerConfig};
use crate::image::ImageRef;
use crate::present::Present;
use crate::services::source::{DisplayableSource, TileDescriptor};

/// Requests another paint pass. Called from producer threads.
pub type Invalidate = Arc<dyn Fn() + Send + Sync>;

/// The region a paint pass covers.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct PaintSpec {
    /// The whole view, in device pixels.
    pub view: PaintRect,
    /// The part of the view that actually needs painting.
    pub clip: PaintRect,
    /// The world position shown at the center of the view.
    pub center: ViewPosition,
}

impl PaintSpec {
    /// A pass painting all of `view`.
    pub fn new(view: PaintRect, center: ViewPosition) -> Self {
        Self {
            view,
            clip: view,
            center,
        }
    }

    pub fn with_clip(mut self, clip: PaintRect) -> Self {
        self.clip = clip;
        self
    }

    fn center_pixel(&self) -> (i32, i32) {
        (
            self.view.x + self.view.width / 2,
            self.view.y + self.view.height / 2,
        )
    }
}

/// Something to paint onto a tile.
#[derive(Clone, Debug)]
pub enum TilePaint {
    /// The tile's imagery.
    Image(ImageRef),
    /// Stands in for imagery that is not available yet.
    Placeholder { stack_order: usize },
    /// A text shown instead of imagery that failed to produce.
    Message { stack_order: usize, text: String },
    /// An outline of the tile.
    TileBoundary,
    /// The address of the tile.
    TileName(String),
}

/// Everything to paint for one tile of one layer.
#[derive(Clone, Debug)]
pub struct PaintKit {
    pub address: TileAddress,
    /// The position of the layer in the viewer, `0` being the base layer.
    pub stack_order: usize,
    pub paint_location: PaintRect,
    /// The layer content, painted first.
    pub meaty: Vec<TilePaint>,
    /// Decorations painted above all layers.
    pub annotations: Vec<TilePaint>,
}

/// The outcome of a paint pass.
///
/// Images in the plan are shares of their buffers, which are released when the plan is
/// dropped or [disposed](Self::dispose).
#[derive(Debug, Default)]
pub struct PaintPlan {
    /// The generation of the pass that produced this plan.
    pub generation: u64,
    pub kits: Vec<PaintKit>,
    /// The number of tiles the pass asked for.
    pub tiles_required: usize,
    /// The number of those tiles that resolved, whether to an image or not.
    pub tiles_available: usize,
}

impl PaintPlan {
    /// Whether nothing in this plan is waiting for a production.
    pub fn is_complete(&self) -> bool {
        self.tiles_available == self.tiles_required
    }

    /// All images of the plan, in paint order.
    pub fn images(&self) -> impl Iterator<Item = &ImageRef> {
        self.kits.iter().flat_map(|kit| {
            kit.meaty.iter().filter_map(|paint| match paint {
                TilePaint::Image(image) => Some(image),
                _ => None,
            })
        })
    }

    /// Releases all image shares of this plan.
    pub fn dispose(self) {
        drop(self)
    }
}

struct Layer {
    source: Arc<dyn DisplayableSource>,
    bounds_interest: Option<PersistentInterest>,
}

/// Paints a stack of tile sources.
pub struct Viewer {
    layers: Vec<Layer>,
    generation: GenerationCounter,
    interest_list: InterestList,
    interest: InterestConfig,
    config: ViewerConfig,
}

impl Viewer {
    /// Creates a viewer without any layers, counting its own generations.
    pub fn new(config: &Config) -> Self {
        Self::with_generation(config, GenerationCounter::new())
    }

    /// Creates a viewer that advances the given, possibly shared, generation counter.
    pub fn with_generation(config: &Config, generation: GenerationCounter) -> Self {
        Self {
            layers: Vec::new(),
            generation,
            interest_list: InterestList::new(),
            interest: config.interest.clone(),
            config: config.viewer.clone(),
        }
    }

    /// Stacks `source` on top of all layers. The first layer added is the base layer.
    pub fn add_layer(&mut self, source: Arc<dyn DisplayableSource>) {
        tracing::debug!(source = %source.id(), stack_order = self.layers.len(), "added layer");
        self.layers.push(Layer {
            source,
            bounds_interest: None,
        });
    }

    pub fn layers(&self) -> usize {
        self.layers.len()
    }

    /// The generation of the latest paint pass.
    pub fn generation(&self) -> u64 {
        self.generation.current()
    }

    /// The number of records the latest paint pass declared interest in.
    pub fn interested_records(&self) -> usize {
        self.interest_list.len()
    }

    /// Runs a paint pass.
    ///
    /// `invalidate` is called whenever something this pass is waiting for resolves, unless a
    /// newer pass has started by then.
    pub fn paint(&mut self, spec: &PaintSpec, invalidate: Invalidate) -> PaintPlan {
        let generation = self.generation.advance();

        // the previous interests stay in place until the new ones are applied
        let previous = std::mem::take(&mut self.interest_list);
        let mut interests = InterestList::new();

        let mut pass = Pass {
            token: self.generation.token(),
            invalidate: &invalidate,
            config: &self.config,
            plan: PaintPlan {
                generation,
                ..Default::default()
            },
        };

        for (stack_order, layer) in self.layers.iter_mut().enumerate() {
            let bounds = layer.source.get_bounds();
            let bounds_interest = Interest::new(self.interest.bounds);
            if self.interest.persistent {
                if !layer
                    .bounds_interest
                    .as_ref()
                    .is_some_and(|persistent| persistent.is_for(&bounds))
                {
                    layer.bounds_interest = Some(PersistentInterest::new(&bounds, bounds_interest));
                }
            } else {
                interests.add(&bounds, bounds_interest);
            }
            if let CallbackRegistration::Ready(Present::Failure(code)) =
                bounds.add_scoped_callback(&pass.token, invalidating(pass.invalidate))
            {
                tracing::debug!(source = %layer.source.id(), %code, "source bounds failed");
            }

            let coordinate_system = layer.source.default_coordinate_system();
            for tile in coordinate_system.tile_array(&spec.center, spec.view) {
                let visible = tile.paint_location.intersect(&spec.clip);
                let handle = layer.source.get_image(&tile.address);
                interests.add(
                    &handle,
                    Interest::for_area(self.interest.tile_base, visible.area()),
                );
                pass.paint_tile(&handle, stack_order, tile);
            }
        }

        interests.activate();
        self.interest_list = interests;
        drop(previous);

        let plan = pass.plan;
        metric!(gauge("viewer.tiles_required") = plan.tiles_required as u64);
        metric!(gauge("viewer.tiles_available") = plan.tiles_available as u64);
        tracing::debug!(
            generation,
            required = plan.tiles_required,
            available = plan.tiles_available,
            "painted"
        );

        plan
    }

    /// Forgets everything the layers produced so far.
    ///
    /// The next paint pass requests all tiles anew. Plans and images handed out earlier stay
    /// valid.
    pub fn invalidate_pipeline(&mut self) {
        for layer in &self.layers {
            layer.source.flush();
        }
        tracing::debug!(layers = self.layers.len(), "invalidated pipeline");
    }

    /// The color of the base layer at the center of the view.
    ///
    /// Returns `None` if there is no base layer, or if the tile under the center is not
    /// available yet. This never requests a production.
    pub fn base_layer_center_pixel(&self, spec: &PaintSpec) -> Option<[u8; 4]> {
        let layer = self.layers.first()?;
        let coordinate_system = layer.source.default_coordinate_system();
        let (px, py) = spec.center_pixel();
        let hit = coordinate_system.tile_at(&spec.center, spec.view, px, py)?;

        let handle = layer.source.get_image(&hit.address);
        let Present::Image(image) = handle.present() else {
            return None;
        };

        let tile_size = u64::from(coordinate_system.tile_size());
        image.with_lock(|buffer| {
            let x = u64::from(hit.x) * u64::from(buffer.width()) / tile_size;
            let y = u64::from(hit.y) * u64::from(buffer.height()) / tile_size;
            buffer.pixel(x as u32, y as u32)
        })
    }

    /// The credits of all layers, base layer first.
    pub fn credits(&self) -> Vec<String> {
        self.layers
            .iter()
            .filter_map(|layer| layer.source.credit())
            .collect()
    }
}

impl fmt::Debug for Viewer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let layers: Vec<_> = self.layers.iter().map(|l| l.source.id().clone()).collect();
        f.debug_struct("Viewer")
            .field("layers", &layers)
            .field("generation", &self.generation.current())
            .field("interest_list", &self.interest_list.len())
            .finish()
    }
}

/// The state of a single paint pass.
struct Pass<'a> {
    token: EpochToken,
    invalidate: &'a Invalidate,
    config: &'a ViewerConfig,
    plan: PaintPlan,
}

impl Pass<'_> {
    fn paint_tile(&mut self, handle: &AsyncRef, stack_order: usize, tile: TileDescriptor) {
        let mut kit = PaintKit {
            address: tile.address,
            stack_order,
            paint_location: tile.paint_location,
            meaty: Vec::new(),
            annotations: Vec::new(),
        };
        self.plan.tiles_required += 1;

        let present = match handle.add_scoped_callback(&self.token, invalidating(self.invalidate)) {
            CallbackRegistration::Registered => Present::Pending,
            CallbackRegistration::Ready(present) => present,
        };

        let mut has_boundary = false;
        match present {
            Present::Image(image) => {
                self.plan.tiles_available += 1;
                kit.meaty.push(TilePaint::Image(image));
            }
            Present::OutOfBounds | Present::Bounds(_) => self.plan.tiles_available += 1,
            Present::Failure(code) => {
                self.plan.tiles_available += 1;
                let text = if self.config.show_failure_details {
                    code.to_string()
                } else {
                    "X".to_owned()
                };
                kit.meaty.push(TilePaint::Message { stack_order, text });
            }
            Present::Pending if stack_order == 0 => {
                kit.meaty.push(TilePaint::Placeholder { stack_order });
                kit.annotations.push(TilePaint::TileBoundary);
                has_boundary = true;
            }
            Present::Pending => kit.annotations.push(TilePaint::Placeholder { stack_order }),
        }

        if self.config.show_tile_boundaries && !has_boundary {
            kit.annotations.push(TilePaint::TileBoundary);
        }
        if self.config.show_tile_names {
            kit.annotations.push(TilePaint::TileName(tile.address.to_string()));
        }
        self.plan.kits.push(kit);
    }
}

fn invalidating(invalidate: &Invalidate) -> impl FnOnce(&Present) + Send + 'static {
    let invalidate = Arc::clone(invalidate);
    move |_| invalidate()
}
