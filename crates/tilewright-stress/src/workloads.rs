use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::Notify;

use tilewright_service::services::SharedServices;
use tilewright_service::services::source::DisplayableSource;
use tilewright_service::services::viewer::{PaintSpec, Viewer};
use tilewright_sources::{PaintRect, SourceConfig, ViewPosition};

use crate::sources::create_source;

#[derive(Debug, Deserialize, Serialize)]
pub struct WorkloadsConfig {
    pub workloads: Vec<Workload>,
}

#[derive(Debug, Deserialize, Serialize)]
pub struct Workload {
    pub concurrency: usize,
    /// The stacked sources, base layer first.
    pub layers: Vec<SourceConfig>,
    /// The normalized distance every operation moves the view by.
    #[serde(default)]
    pub pan: [f64; 2],
    #[serde(default)]
    pub zoom: u8,
    /// The size of the view, in pixels.
    #[serde(default = "default_view")]
    pub view: [i32; 2],
}

fn default_view() -> [i32; 2] {
    [1024, 768]
}

/// A workload with its sources set up.
pub struct PreparedWorkload {
    layers: Vec<Arc<dyn DisplayableSource>>,
    pan: [f64; 2],
    zoom: u8,
    view: PaintRect,
    operations: AtomicU64,
}

pub fn prepare_workload(services: &SharedServices, workload: Workload) -> PreparedWorkload {
    let layers = workload
        .layers
        .iter()
        .map(|config| create_source(services, config))
        .collect();

    PreparedWorkload {
        layers,
        pan: workload.pan,
        zoom: workload.zoom,
        view: PaintRect::from_size(workload.view[0], workload.view[1]),
        operations: AtomicU64::new(0),
    }
}

/// The outcome of painting one view until it was complete.
#[derive(Debug)]
pub struct Painted {
    pub passes: usize,
    pub tiles: usize,
}

/// Paints the next view of the workload, repainting whenever something resolved, until all
/// tiles are available.
pub async fn process_workload(services: &SharedServices, workload: &PreparedWorkload) -> Painted {
    let step = workload.operations.fetch_add(1, Ordering::Relaxed) as f64;
    let center = ViewPosition::new(0.5, 0.5, workload.zoom)
        .panned(workload.pan[0] * step, workload.pan[1] * step);
    let spec = PaintSpec::new(workload.view, center);

    let mut viewer: Viewer = services.viewer();
    for layer in &workload.layers {
        viewer.add_layer(Arc::clone(layer));
    }

    let repaint = Arc::new(Notify::new());
    let invalidate = {
        let repaint = Arc::clone(&repaint);
        Arc::new(move || repaint.notify_one())
    };

    let mut passes = 0;
    loop {
        let plan = viewer.paint(&spec, invalidate.clone());
        passes += 1;
        if plan.is_complete() {
            return Painted {
                passes,
                tiles: plan.tiles_required,
            };
        }
        drop(plan);

        // a timeout guards against callbacks of records flushed by someone else
        tokio::time::timeout(Duration::from_secs(1), repaint.notified())
            .await
            .ok();
    }
}
